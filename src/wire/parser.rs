//! Frame Parser: consumes one complete frame from the front of a byte
//! stream, or reports why it could not.

use crate::bsonsec;
use crate::decoder::BinaryDecoder;
use crate::wire::frame::{is_valid_op_code, Direction, Frame, ParseOutcome, OP_COMPRESSED, OP_MSG, OP_RESERVED};

const HEADER_LEN: usize = 16;

/// Attempt to consume one frame from the front of `buf`.
///
/// Returns the outcome plus the number of bytes the caller should drop from
/// the front of its buffer: the full declared message length on
/// `Success`/`Ignored`/non-poisoned `Invalid`, zero otherwise.
pub fn parse_frame(buf: &[u8], direction: Direction, timestamp_ns: i64) -> (ParseOutcome, usize) {
    let _ = direction; // carried on the Frame by the caller; parsing itself is direction-agnostic.

    if buf.len() < HEADER_LEN {
        return (ParseOutcome::NeedsMoreData, 0);
    }

    let mut cursor = BinaryDecoder::new(buf);
    let message_length = cursor
        .extract_le::<u32>()
        .expect("length checked above");

    // A declared length shorter than the header itself cannot be trusted
    // as a skip distance: the stream is poisoned.
    if message_length < HEADER_LEN as u32 {
        return (ParseOutcome::Invalid { poisoned: true }, 0);
    }

    let declared_body_and_header = message_length as usize - 4;
    if cursor.remaining() < declared_body_and_header {
        return (ParseOutcome::NeedsMoreData, 0);
    }

    let request_id = cursor.extract_le::<i32>().expect("checked above");
    let response_to = cursor.extract_le::<i32>().expect("checked above");
    let op_code = cursor.extract_le::<i32>().expect("checked above");

    let mut frame = Frame {
        length: message_length - 4,
        request_id,
        response_to,
        op_code,
        timestamp_ns,
        ..Default::default()
    };

    if !is_valid_op_code(op_code) {
        return (ParseOutcome::Invalid { poisoned: false }, message_length as usize);
    }

    if op_code == OP_COMPRESSED || op_code == OP_RESERVED {
        return (ParseOutcome::Ignored, message_length as usize);
    }

    if op_code != OP_MSG {
        // Other legacy opcodes (OP_REPLY, OP_UPDATE, OP_INSERT, OP_QUERY,
        // OP_GET_MORE, OP_DELETE, OP_KILL_CURSORS): recognized but their
        // bodies are not decoded.
        return (ParseOutcome::Ignored, message_length as usize);
    }

    // OP_MSG: decode the body bounded to exactly the declared frame bytes.
    let body_len = declared_body_and_header - HEADER_LEN + 4; // body bytes after the 16-byte header
    let body = match cursor.extract_bytes(body_len) {
        Ok(b) => b,
        Err(_) => return (ParseOutcome::Invalid { poisoned: false }, message_length as usize),
    };

    match bsonsec::decode_op_msg_body(body, &mut frame) {
        Ok(()) => (ParseOutcome::Success(frame), message_length as usize),
        // The frame's own declared length said this many bytes were
        // available, so a missing checksum trailer here is not a resync
        // problem; treat it the same as any other short read.
        Err(bsonsec::BodyError::Incomplete) => (ParseOutcome::NeedsMoreData, 0),
        Err(bsonsec::BodyError::Invalid) => {
            (ParseOutcome::Invalid { poisoned: false }, message_length as usize)
        }
    }
}
