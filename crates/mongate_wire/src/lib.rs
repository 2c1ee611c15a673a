//! MongoDB wire-level framing.
//!
//! The proxy treats messages as a 16-byte header plus an opaque body; nothing
//! here parses BSON. The header carries the opcode tag that drives the two
//! forwarding decisions: does the server reply, and may the client follow up
//! with `getLastError` on the same connection.

mod framer;
mod header;
mod tee;

pub use framer::{FrameError, copy_message, copy_n, read_header, write_header};
pub use header::{HEADER_LEN, MessageHeader, OpCode};
pub use tee::{Tee, tee_enabled};
