//! Record Projector: turns a paired (request, response) into the flat,
//! typed output row consumed by the downstream table writer.

use serde::Serialize;

use crate::wire::frame::Frame;

/// One paired exchange. If the request is the reserved one-sided opcode,
/// `resp` is the default/empty frame.
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub req: Frame,
    pub resp: Frame,
}

/// Excerpts longer than this are truncated before being placed in an
/// output row; full documents remain available on the `Frame` itself for
/// any consumer that needs them.
const MAX_EXCERPT_BYTES: usize = 2048;

/// The outbound, columnar row schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRow {
    pub time_: i64,
    pub tgid: i64,
    pub req_cmd: String,
    pub req_body: String,
    pub resp_status: String,
    pub resp_body: String,
    pub latency_ns: Option<i64>,
}

/// Project one `Record` into its `OutputRow`.
///
/// `clock_offset_ns` translates the capture clock's `timestamp_ns` to wall
/// clock time; `tgid` is threaded through from the connection's
/// capture-layer metadata.
pub fn project(record: &Record, clock_offset_ns: i64, tgid: i64) -> OutputRow {
    let latency_ns = if record.req.is_reserved() {
        None
    } else {
        Some(record.resp.timestamp_ns - record.req.timestamp_ns)
    };

    OutputRow {
        time_: record.req.timestamp_ns + clock_offset_ns,
        tgid,
        req_cmd: record.req.op_msg_type.clone(),
        req_body: excerpt(&record.req),
        resp_status: record.resp.op_msg_type.clone(),
        resp_body: excerpt(&record.resp),
        latency_ns,
    }
}

/// First JSON document of the first section, truncated.
fn excerpt(frame: &Frame) -> String {
    let Some(doc) = frame.sections.first().and_then(|s| s.documents.first()) else {
        return String::new();
    };
    if doc.len() <= MAX_EXCERPT_BYTES {
        doc.clone()
    } else {
        let mut truncated = doc.as_bytes()[..MAX_EXCERPT_BYTES].to_vec();
        while std::str::from_utf8(&truncated).is_err() {
            truncated.pop();
        }
        String::from_utf8(truncated).expect("trimmed to a valid utf-8 boundary")
    }
}
