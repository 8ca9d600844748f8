//! Per-connection driver: owns the two byte-stream buffers for one
//! connection, invokes the Frame Parser then the Stitcher on each transfer
//! cycle, and projects paired records into output rows.
//!
//! Each connection's buffers and queues are owned by a single task for the
//! lifetime of that connection, with no shared locks (§5's "single-threaded
//! cooperative" model).

use std::collections::VecDeque;

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

use crate::record::{self, OutputRow};
use crate::stitcher::{self, StitchResult};
use crate::wire::frame::{Direction, Frame, ParseOutcome};
use crate::wire::parse_frame;

/// Which side of the socket a captured fragment travelled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventDirection {
    Send,
    Recv,
}

impl EventDirection {
    fn wire_direction(self) -> Direction {
        match self {
            // The traced socket's outbound bytes are the client's request;
            // inbound bytes are the server's response.
            EventDirection::Send => Direction::Request,
            EventDirection::Recv => Direction::Response,
        }
    }
}

/// One captured payload fragment for one direction of one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnEvent {
    pub conn_id: u64,
    pub direction: EventDirection,
    pub seq_num: u64,
    pub timestamp_ns: i64,
    pub payload: Vec<u8>,
}

/// A single-producer/single-consumer byte buffer for one direction of one
/// connection, tagged with enough timestamp bookkeeping to assign a capture
/// time to each frame the Parser extracts from it.
#[derive(Debug, Default)]
struct ByteStream {
    buf: BytesMut,
    /// Remaining byte count and capture timestamp of each ingested chunk,
    /// oldest first.
    chunks: VecDeque<(usize, i64)>,
    poisoned: bool,
}

impl ByteStream {
    fn ingest(&mut self, payload: &[u8], timestamp_ns: i64) {
        if self.poisoned || payload.is_empty() {
            return;
        }
        self.buf.extend_from_slice(payload);
        self.chunks.push_back((payload.len(), timestamp_ns));
    }

    /// Capture timestamp of the oldest unconsumed byte, or 0 if empty.
    fn peek_timestamp(&self) -> i64 {
        self.chunks.front().map(|(_, ts)| *ts).unwrap_or(0)
    }

    fn advance(&mut self, mut n: usize) {
        self.buf.advance(n);
        while n > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if front.0 <= n {
                n -= front.0;
                self.chunks.pop_front();
            } else {
                front.0 -= n;
                n = 0;
            }
        }
    }

    fn poison(&mut self) {
        self.poisoned = true;
        self.buf.clear();
        self.chunks.clear();
    }
}

/// Per-connection observability counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectionStats {
    pub invalid_frames: u64,
    pub ignored_frames: u64,
    pub unmatched_responses: u64,
}

/// Owns one connection's buffers, frame queues, and accumulated stats.
pub struct ConnectionDriver {
    pub conn_id: u64,
    /// Process id owning the socket, threaded through from the capture
    /// layer at connection start (it does not vary frame to frame).
    pub tgid: i64,
    max_pending_requests: usize,
    clock_offset_ns: i64,

    req_stream: ByteStream,
    resp_stream: ByteStream,
    reqs: VecDeque<Frame>,
    resps: VecDeque<Frame>,

    pub stats: ConnectionStats,
}

impl ConnectionDriver {
    pub fn new(conn_id: u64, tgid: i64, max_pending_requests: usize, clock_offset_ns: i64) -> Self {
        Self {
            conn_id,
            tgid,
            max_pending_requests,
            clock_offset_ns,
            req_stream: ByteStream::default(),
            resp_stream: ByteStream::default(),
            reqs: VecDeque::new(),
            resps: VecDeque::new(),
            stats: ConnectionStats::default(),
        }
    }

    /// Append one captured fragment to the appropriate direction's buffer.
    pub fn ingest(&mut self, event: &ConnEvent) {
        debug_assert_eq!(event.conn_id, self.conn_id);
        match event.direction.wire_direction() {
            Direction::Request => self.req_stream.ingest(&event.payload, event.timestamp_ns),
            Direction::Response => self.resp_stream.ingest(&event.payload, event.timestamp_ns),
        }
    }

    /// Run one transfer cycle: parse as many frames as are available from
    /// each direction, stitch, and project the resulting records into rows.
    pub fn run_cycle(&mut self) -> Vec<OutputRow> {
        self.drain(Direction::Request);
        self.drain(Direction::Response);

        let dropped = stitcher::enforce_request_cap(&mut self.reqs, self.max_pending_requests);
        self.stats.unmatched_responses += dropped as u64;

        let StitchResult {
            records,
            error_count,
        } = stitcher::stitch(&mut self.reqs, &mut self.resps);
        self.stats.unmatched_responses += error_count as u64;

        records
            .iter()
            .map(|rec| record::project(rec, self.clock_offset_ns, self.tgid))
            .collect()
    }

    fn drain(&mut self, direction: Direction) {
        loop {
            let stream = match direction {
                Direction::Request => &mut self.req_stream,
                Direction::Response => &mut self.resp_stream,
            };
            if stream.poisoned || stream.buf.is_empty() {
                return;
            }

            let timestamp_ns = stream.peek_timestamp();
            let (outcome, consumed) = parse_frame(&stream.buf, direction, timestamp_ns);

            match outcome {
                ParseOutcome::NeedsMoreData => return,
                ParseOutcome::Success(frame) => {
                    stream.advance(consumed);
                    match direction {
                        Direction::Request => self.reqs.push_back(frame),
                        Direction::Response => self.resps.push_back(frame),
                    }
                }
                ParseOutcome::Ignored => {
                    stream.advance(consumed);
                    self.stats.ignored_frames += 1;
                }
                ParseOutcome::Invalid { poisoned } => {
                    self.stats.invalid_frames += 1;
                    if poisoned {
                        stream.poison();
                        tracing::warn!(conn_id = self.conn_id, ?direction, "connection stream poisoned by unrecoverable length field");
                        return;
                    }
                    stream.advance(consumed);
                }
            }
        }
    }
}
