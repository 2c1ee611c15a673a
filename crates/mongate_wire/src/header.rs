use bytes::{Buf, BufMut};

/// Size of the standard message header on the wire.
pub const HEADER_LEN: usize = 16;

// =======================================================
// OPCODES
// =======================================================

/// MongoDB wire opcode tag.
///
/// Unrecognized values are kept as [`OpCode::Other`] and forwarded opaquely;
/// they carry neither predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Reply,
    Msg,
    Update,
    Insert,
    Reserved,
    Query,
    GetMore,
    Delete,
    KillCursors,
    Other(u32),
}

impl OpCode {
    pub fn from_wire(raw: u32) -> Self {
        match raw {
            1 => Self::Reply,
            1000 => Self::Msg,
            2001 => Self::Update,
            2002 => Self::Insert,
            2003 => Self::Reserved,
            2004 => Self::Query,
            2005 => Self::GetMore,
            2006 => Self::Delete,
            2007 => Self::KillCursors,
            other => Self::Other(other),
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            Self::Reply => 1,
            Self::Msg => 1000,
            Self::Update => 2001,
            Self::Insert => 2002,
            Self::Reserved => 2003,
            Self::Query => 2004,
            Self::GetMore => 2005,
            Self::Delete => 2006,
            Self::KillCursors => 2007,
            Self::Other(other) => other,
        }
    }

    /// The server sends a reply before this exchange is done.
    pub fn has_response(self) -> bool {
        matches!(self, Self::Query | Self::GetMore)
    }

    /// The client may follow up with `getLastError` on the same connection.
    pub fn is_mutation(self) -> bool {
        matches!(self, Self::Update | Self::Insert | Self::Delete)
    }
}

// =======================================================
// MESSAGE HEADER
// =======================================================

/// The 16-byte header that prefixes every wire message, little-endian.
/// `message_length` counts the header itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_length: u32,
    pub request_id: u32,
    pub response_to: u32,
    pub op_code: OpCode,
}

impl MessageHeader {
    /// Number of body bytes that follow the header.
    pub fn body_len(&self) -> u64 {
        u64::from(self.message_length).saturating_sub(HEADER_LEN as u64)
    }

    pub fn decode(raw: &[u8; HEADER_LEN]) -> Self {
        let mut buf = &raw[..];
        Self {
            message_length: buf.get_u32_le(),
            request_id: buf.get_u32_le(),
            response_to: buf.get_u32_le(),
            op_code: OpCode::from_wire(buf.get_u32_le()),
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut raw = [0u8; HEADER_LEN];
        let mut buf = &mut raw[..];
        buf.put_u32_le(self.message_length);
        buf.put_u32_le(self.request_id);
        buf.put_u32_le(self.response_to);
        buf.put_u32_le(self.op_code.to_wire());
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_predicates_match_wire_semantics() {
        assert!(OpCode::Query.has_response());
        assert!(OpCode::GetMore.has_response());
        assert!(!OpCode::Insert.has_response());
        assert!(!OpCode::Reply.has_response());

        assert!(OpCode::Insert.is_mutation());
        assert!(OpCode::Update.is_mutation());
        assert!(OpCode::Delete.is_mutation());
        assert!(!OpCode::Query.is_mutation());
        assert!(!OpCode::KillCursors.is_mutation());
    }

    #[test]
    fn unknown_opcode_is_opaque_passthrough() {
        let op = OpCode::from_wire(2013);
        assert_eq!(op, OpCode::Other(2013));
        assert!(!op.has_response());
        assert!(!op.is_mutation());
        assert_eq!(op.to_wire(), 2013);
    }

    #[test]
    fn header_encodes_little_endian() {
        let h = MessageHeader {
            message_length: 40,
            request_id: 7,
            response_to: 0,
            op_code: OpCode::GetMore,
        };
        let raw = h.encode();
        assert_eq!(&raw[0..4], &[40, 0, 0, 0]);
        assert_eq!(&raw[12..16], &2005u32.to_le_bytes());
        assert_eq!(MessageHeader::decode(&raw), h);
        assert_eq!(h.body_len(), 24);
    }
}
