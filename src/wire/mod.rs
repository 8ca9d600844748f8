//! Wire-level frame types and the Frame Parser.

pub mod frame;
pub mod parser;

pub use frame::{Direction, Frame, ParseOutcome, Section, SeqIdentifier};
pub use parser::parse_frame;
