//! Stitcher: pairs request and response frames for one
//! connection-direction-pair, including the 1:N more-to-come fan-out and
//! the kReserved one-sided case. Uses a moving consumed-flag per queue
//! entry plus a filter-drain at the end of each cycle rather than erasing
//! entries in place.

use std::collections::VecDeque;

use crate::record::Record;
use crate::wire::frame::Frame;

/// Result of one stitching pass.
#[derive(Debug, Default)]
pub struct StitchResult {
    pub records: Vec<Record>,
    pub error_count: usize,
}

/// Bounded-memory policy: cap the number of pending, unconsumed requests
/// before stitching. Overflow drops the oldest requests and counts each as
/// an error.
pub fn enforce_request_cap(reqs: &mut VecDeque<Frame>, max_pending: usize) -> usize {
    let mut dropped = 0;
    while reqs.len() > max_pending {
        reqs.pop_front();
        dropped += 1;
    }
    dropped
}

/// Pair `reqs` against `resps` for one connection-direction-pair.
pub fn stitch(reqs: &mut VecDeque<Frame>, resps: &mut VecDeque<Frame>) -> StitchResult {
    let mut records = Vec::new();
    let mut error_count = 0usize;

    for req_idx in 0..reqs.len() {
        if reqs[req_idx].consumed {
            continue;
        }

        if reqs[req_idx].is_reserved() {
            reqs[req_idx].consumed = true;
            records.push(Record {
                req: reqs[req_idx].clone(),
                resp: Frame::default(),
            });
            continue;
        }

        // Reset chain-tracking state on entering the inner loop for this request.
        let mut more_to_come = false;
        let mut head_resp_idx: Option<usize> = None;
        let mut prev_resp_req_id: i32 = 0;

        for resp_idx in 0..resps.len() {
            if resps[resp_idx].consumed {
                continue;
            }

            let req_id = reqs[req_idx].request_id;
            let req_ts = reqs[req_idx].timestamp_ns;

            if resps[resp_idx].timestamp_ns < req_ts {
                resps[resp_idx].consumed = true;
                error_count += 1;
                continue;
            }

            if resps[resp_idx].more_to_come() {
                more_to_come = true;
            }

            if req_id != resps[resp_idx].response_to && !more_to_come {
                continue;
            }

            if more_to_come {
                if req_id != resps[resp_idx].response_to
                    && prev_resp_req_id != resps[resp_idx].response_to
                {
                    resps[resp_idx].consumed = true;
                    error_count += 1;
                    continue;
                }

                prev_resp_req_id = resps[resp_idx].request_id;

                if req_id == resps[resp_idx].response_to {
                    head_resp_idx = Some(resp_idx);
                    continue;
                }

                let continuation_sections = std::mem::take(&mut resps[resp_idx].sections);
                if let Some(h) = head_resp_idx {
                    resps[h].sections.extend(continuation_sections);
                }
                resps[resp_idx].consumed = true;

                if resps[resp_idx].more_to_come() {
                    continue;
                }
            }

            reqs[req_idx].consumed = true;
            if more_to_come {
                let h = head_resp_idx
                    .expect("head response must be set once a more-to-come chain terminates");
                resps[h].consumed = true;
                records.push(Record {
                    req: reqs[req_idx].clone(),
                    resp: resps[h].clone(),
                });
            } else {
                resps[resp_idx].consumed = true;
                records.push(Record {
                    req: reqs[req_idx].clone(),
                    resp: resps[resp_idx].clone(),
                });
            }
            break;
        }
    }

    // Drop the consumed prefix; unconsumed requests are retried next cycle.
    while let Some(front) = reqs.front() {
        if front.consumed {
            reqs.pop_front();
        } else {
            break;
        }
    }
    // Responses only ever follow requests; anything left unmatched this
    // cycle cannot become valid later.
    error_count += resps.iter().filter(|r| !r.consumed).count();
    resps.clear();

    StitchResult {
        records,
        error_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::frame::{OP_MSG, OP_RESERVED};

    fn frame(ts: i64, request_id: i32, response_to: i32, more_to_come: bool) -> Frame {
        Frame {
            op_code: OP_MSG,
            request_id,
            response_to,
            timestamp_ns: ts,
            flag_bits: if more_to_come { 0x2 } else { 0 },
            ..Default::default()
        }
    }

    #[test]
    fn idempotent_on_empty_inputs() {
        let mut reqs = VecDeque::new();
        let mut resps = VecDeque::new();
        let result = stitch(&mut reqs, &mut resps);
        assert_eq!(result.error_count, 0);
        assert!(result.records.is_empty());
    }

    #[test]
    fn one_to_one_matching_in_arrival_order() {
        let mut reqs: VecDeque<Frame> = (0..8)
            .map(|i| frame(i * 2, i as i32 * 2 + 1, 0, false))
            .collect();
        let mut resps: VecDeque<Frame> = (0..8)
            .map(|i| frame(i * 2 + 1, i as i32 * 2 + 2, i as i32 * 2 + 1, false))
            .collect();

        let result = stitch(&mut reqs, &mut resps);
        assert_eq!(result.error_count, 0);
        assert_eq!(result.records.len(), 8);
        assert!(reqs.is_empty());
        assert!(resps.is_empty());
    }

    #[test]
    fn s6_one_to_n_more_to_come_stitching() {
        let mut reqs: VecDeque<Frame> = VecDeque::from(vec![frame(4, 5, 0, false)]);

        let mut r1 = frame(5, 6, 5, true);
        r1.sections = vec![crate::wire::frame::Section {
            kind: 0,
            length: 5,
            seq_identifier: None,
            documents: vec!["1".to_string()],
        }];
        let mut r2 = frame(6, 7, 6, true);
        r2.sections = vec![crate::wire::frame::Section {
            kind: 0,
            length: 5,
            seq_identifier: None,
            documents: vec!["2".to_string()],
        }];
        let mut r3 = frame(7, 8, 7, false);
        r3.sections = vec![crate::wire::frame::Section {
            kind: 0,
            length: 5,
            seq_identifier: None,
            documents: vec!["3".to_string()],
        }];

        let mut resps: VecDeque<Frame> = VecDeque::from(vec![r1, r2, r3]);

        let result = stitch(&mut reqs, &mut resps);
        assert_eq!(result.error_count, 0);
        assert_eq!(result.records.len(), 1);
        let resp = &result.records[0].resp;
        assert_eq!(resp.sections.len(), 3);
        assert_eq!(resp.sections[0].documents[0], "1");
        assert_eq!(resp.sections[1].documents[0], "2");
        assert_eq!(resp.sections[2].documents[0], "3");
        assert!(reqs.is_empty());
        assert!(resps.is_empty());
    }

    #[test]
    fn s7_stale_response_is_counted_and_dropped() {
        let mut reqs: VecDeque<Frame> = VecDeque::from(vec![frame(1, 2, 0, false)]);
        let mut resps: VecDeque<Frame> = VecDeque::from(vec![frame(0, 1, 10, false)]);

        let result = stitch(&mut reqs, &mut resps);
        assert_eq!(result.error_count, 1);
        assert!(result.records.is_empty());
        assert!(resps.is_empty());
    }

    #[test]
    fn unmatched_requests_are_not_cleaned_up() {
        let mut reqs: VecDeque<Frame> = VecDeque::from(vec![
            frame(0, 1, 0, false),
            frame(1, 2, 0, false),
            frame(3, 4, 0, false),
        ]);
        let mut resps: VecDeque<Frame> = VecDeque::from(vec![
            frame(2, 3, 2, false),
            frame(4, 5, 4, false),
        ]);

        let result = stitch(&mut reqs, &mut resps);
        assert_eq!(result.error_count, 0);
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.records[0].req.request_id, 2);
        assert_eq!(result.records[1].req.request_id, 4);

        assert_eq!(reqs.len(), 3);
        assert!(!reqs[0].consumed);
        assert!(reqs[1].consumed);
        assert!(reqs[2].consumed);
        assert!(resps.is_empty());
    }

    #[test]
    fn reserved_request_is_one_sided() {
        let mut reqs: VecDeque<Frame> = VecDeque::from(vec![Frame {
            op_code: OP_RESERVED,
            request_id: 1,
            timestamp_ns: 0,
            ..Default::default()
        }]);
        let mut resps: VecDeque<Frame> = VecDeque::new();

        let result = stitch(&mut reqs, &mut resps);
        assert_eq!(result.error_count, 0);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].resp, Frame::default());
        assert!(reqs.is_empty());
    }

    #[test]
    fn bounded_memory_drops_oldest_requests() {
        let mut reqs: VecDeque<Frame> = (0..5).map(|i| frame(i, i as i32, 0, false)).collect();
        let dropped = enforce_request_cap(&mut reqs, 3);
        assert_eq!(dropped, 2);
        assert_eq!(reqs.len(), 3);
        assert_eq!(reqs[0].request_id, 2);
    }
}
