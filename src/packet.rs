//! WireGuard header inspection
//!
//! The relay never decrypts anything. Routing needs exactly three facts
//! about a datagram: its message type, and the sender/receiver session
//! indices that sit at fixed offsets in the clear portion of the header.
//! Everything after the indices is opaque payload and is forwarded
//! verbatim.

use thiserror::Error;

// ============================================================================
// Wire Format Constants
// ============================================================================

/// Handshake initiation (first handshake message)
pub const MESSAGE_INITIATION_TYPE: u8 = 1;
/// Handshake response (second handshake message)
pub const MESSAGE_RESPONSE_TYPE: u8 = 2;
/// Cookie reply (DoS mitigation)
pub const MESSAGE_COOKIE_REPLY_TYPE: u8 = 3;
/// Transport data (encrypted payload)
pub const MESSAGE_TRANSPORT_TYPE: u8 = 4;

/// Exact size of a handshake initiation message
pub const MESSAGE_INITIATION_SIZE: usize = 148;
/// Exact size of a handshake response message
pub const MESSAGE_RESPONSE_SIZE: usize = 92;
/// Exact size of a cookie reply message
pub const MESSAGE_COOKIE_REPLY_SIZE: usize = 64;
/// Minimum size of a transport message (header only, empty payload)
pub const MESSAGE_TRANSPORT_HEADER_SIZE: usize = 16;

/// Receiver index offset within a transport message
pub const MESSAGE_TRANSPORT_OFFSET_RECEIVER: usize = 4;
/// Nonce counter offset within a transport message
pub const MESSAGE_TRANSPORT_OFFSET_COUNTER: usize = 8;
/// Encrypted content offset within a transport message
pub const MESSAGE_TRANSPORT_OFFSET_CONTENT: usize = 16;

// ============================================================================
// Data Structures
// ============================================================================

/// The four WireGuard message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Initiation,
    Response,
    CookieReply,
    Transport,
}

impl MessageType {
    /// Map the first header byte to a message type
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            MESSAGE_INITIATION_TYPE => Some(MessageType::Initiation),
            MESSAGE_RESPONSE_TYPE => Some(MessageType::Response),
            MESSAGE_COOKIE_REPLY_TYPE => Some(MessageType::CookieReply),
            MESSAGE_TRANSPORT_TYPE => Some(MessageType::Transport),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageType::Initiation => "Initiation",
            MessageType::Response => "Response",
            MessageType::CookieReply => "CookieReply",
            MessageType::Transport => "Transport",
        };
        f.write_str(name)
    }
}

/// Errors produced while classifying a datagram
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("packet too small: {0} bytes")]
    Truncated(usize),
    #[error("unknown message type: {0}")]
    UnknownType(u8),
    #[error("invalid {msg_type} message size: expected {expected}, got {actual}")]
    BadSize {
        msg_type: MessageType,
        expected: usize,
        actual: usize,
    },
    #[error("invalid transport message size: minimum {minimum}, got {actual}")]
    TransportTooShort { minimum: usize, actual: usize },
}

/// A parsed WireGuard header
///
/// Borrows the caller's buffer; nothing is copied. Which indices are
/// present is fixed by the message type: initiations carry only a sender,
/// cookie replies and transport packets only a receiver, responses both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    pub msg_type: MessageType,
    pub sender: Option<u32>,
    pub receiver: Option<u32>,
    /// The raw datagram, aliased from the caller's buffer
    pub data: &'a [u8],
}

// ============================================================================
// Parsing
// ============================================================================

/// Classify a WireGuard datagram and extract its routing indices.
///
/// Total on well-formed input, rejects everything else: frames shorter
/// than the 4-byte type prefix, unknown type bytes, and size mismatches
/// (exact for types 1-3, minimum header size for transport).
pub fn parse(data: &[u8]) -> Result<Message<'_>, ParseError> {
    if data.len() < 4 {
        return Err(ParseError::Truncated(data.len()));
    }

    // Byte 0 is the type, bytes 1..3 are reserved
    match MessageType::from_wire(data[0]) {
        Some(MessageType::Initiation) => parse_initiation(data),
        Some(MessageType::Response) => parse_response(data),
        Some(MessageType::CookieReply) => parse_cookie_reply(data),
        Some(MessageType::Transport) => parse_transport(data),
        None => Err(ParseError::UnknownType(data[0])),
    }
}

/// Read the little-endian u32 index at `offset`. Caller has validated length.
fn index_at(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn parse_initiation(data: &[u8]) -> Result<Message<'_>, ParseError> {
    if data.len() != MESSAGE_INITIATION_SIZE {
        return Err(ParseError::BadSize {
            msg_type: MessageType::Initiation,
            expected: MESSAGE_INITIATION_SIZE,
            actual: data.len(),
        });
    }

    Ok(Message {
        msg_type: MessageType::Initiation,
        sender: Some(index_at(data, 4)),
        receiver: None,
        data,
    })
}

fn parse_response(data: &[u8]) -> Result<Message<'_>, ParseError> {
    if data.len() != MESSAGE_RESPONSE_SIZE {
        return Err(ParseError::BadSize {
            msg_type: MessageType::Response,
            expected: MESSAGE_RESPONSE_SIZE,
            actual: data.len(),
        });
    }

    Ok(Message {
        msg_type: MessageType::Response,
        sender: Some(index_at(data, 4)),
        receiver: Some(index_at(data, 8)),
        data,
    })
}

fn parse_cookie_reply(data: &[u8]) -> Result<Message<'_>, ParseError> {
    if data.len() != MESSAGE_COOKIE_REPLY_SIZE {
        return Err(ParseError::BadSize {
            msg_type: MessageType::CookieReply,
            expected: MESSAGE_COOKIE_REPLY_SIZE,
            actual: data.len(),
        });
    }

    Ok(Message {
        msg_type: MessageType::CookieReply,
        sender: None,
        receiver: Some(index_at(data, 4)),
        data,
    })
}

fn parse_transport(data: &[u8]) -> Result<Message<'_>, ParseError> {
    if data.len() < MESSAGE_TRANSPORT_HEADER_SIZE {
        return Err(ParseError::TransportTooShort {
            minimum: MESSAGE_TRANSPORT_HEADER_SIZE,
            actual: data.len(),
        });
    }

    Ok(Message {
        msg_type: MessageType::Transport,
        sender: None,
        receiver: Some(index_at(data, MESSAGE_TRANSPORT_OFFSET_RECEIVER)),
        data,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn initiation_packet(sender: u32) -> Vec<u8> {
        let mut data = vec![0u8; MESSAGE_INITIATION_SIZE];
        data[0] = MESSAGE_INITIATION_TYPE;
        data[4..8].copy_from_slice(&sender.to_le_bytes());
        data
    }

    fn response_packet(sender: u32, receiver: u32) -> Vec<u8> {
        let mut data = vec![0u8; MESSAGE_RESPONSE_SIZE];
        data[0] = MESSAGE_RESPONSE_TYPE;
        data[4..8].copy_from_slice(&sender.to_le_bytes());
        data[8..12].copy_from_slice(&receiver.to_le_bytes());
        data
    }

    fn cookie_reply_packet(receiver: u32) -> Vec<u8> {
        let mut data = vec![0u8; MESSAGE_COOKIE_REPLY_SIZE];
        data[0] = MESSAGE_COOKIE_REPLY_TYPE;
        data[4..8].copy_from_slice(&receiver.to_le_bytes());
        data
    }

    fn transport_packet(receiver: u32) -> Vec<u8> {
        let mut data = vec![0u8; MESSAGE_TRANSPORT_HEADER_SIZE + 32];
        data[0] = MESSAGE_TRANSPORT_TYPE;
        data[4..8].copy_from_slice(&receiver.to_le_bytes());
        data
    }

    #[test]
    fn test_parse_initiation() {
        let data = initiation_packet(12345);
        let msg = parse(&data).unwrap();

        assert_eq!(msg.msg_type, MessageType::Initiation);
        assert_eq!(msg.sender, Some(12345));
        assert_eq!(msg.receiver, None);
    }

    #[test]
    fn test_parse_response() {
        let data = response_packet(22222, 11111);
        let msg = parse(&data).unwrap();

        assert_eq!(msg.msg_type, MessageType::Response);
        assert_eq!(msg.sender, Some(22222));
        assert_eq!(msg.receiver, Some(11111));
    }

    #[test]
    fn test_parse_cookie_reply() {
        let data = cookie_reply_packet(33333);
        let msg = parse(&data).unwrap();

        assert_eq!(msg.msg_type, MessageType::CookieReply);
        assert_eq!(msg.sender, None);
        assert_eq!(msg.receiver, Some(33333));
    }

    #[test]
    fn test_parse_transport() {
        let data = transport_packet(55555);
        let msg = parse(&data).unwrap();

        assert_eq!(msg.msg_type, MessageType::Transport);
        assert_eq!(msg.sender, None);
        assert_eq!(msg.receiver, Some(55555));
    }

    #[test]
    fn test_parse_transport_minimum_size() {
        let mut data = vec![0u8; MESSAGE_TRANSPORT_HEADER_SIZE];
        data[0] = MESSAGE_TRANSPORT_TYPE;
        assert!(parse(&data).is_ok());
    }

    #[test]
    fn test_parse_does_not_copy() {
        let data = transport_packet(42);
        let msg = parse(&data).unwrap();
        assert_eq!(msg.data, &data[..]);
        assert!(std::ptr::eq(msg.data.as_ptr(), data.as_ptr()));
    }

    #[test]
    fn test_indices_are_little_endian() {
        let mut data = vec![0u8; MESSAGE_INITIATION_SIZE];
        data[0] = MESSAGE_INITIATION_TYPE;
        data[4] = 0x39;
        data[5] = 0x30;
        let msg = parse(&data).unwrap();
        assert_eq!(msg.sender, Some(0x3039));
    }

    #[test]
    fn test_reject_truncated() {
        assert_eq!(parse(&[]), Err(ParseError::Truncated(0)));
        assert_eq!(parse(&[1, 0, 0]), Err(ParseError::Truncated(3)));
    }

    #[test]
    fn test_reject_unknown_type() {
        let data = [0u8, 0, 0, 0];
        assert_eq!(parse(&data), Err(ParseError::UnknownType(0)));

        let data = [5u8, 0, 0, 0];
        assert_eq!(parse(&data), Err(ParseError::UnknownType(5)));

        let data = [0xffu8, 0, 0, 0];
        assert_eq!(parse(&data), Err(ParseError::UnknownType(0xff)));
    }

    #[test]
    fn test_reject_wrong_sizes() {
        // Initiation must be exactly 148 bytes
        let mut data = vec![0u8; MESSAGE_INITIATION_SIZE - 1];
        data[0] = MESSAGE_INITIATION_TYPE;
        assert!(matches!(parse(&data), Err(ParseError::BadSize { .. })));

        let mut data = vec![0u8; MESSAGE_INITIATION_SIZE + 1];
        data[0] = MESSAGE_INITIATION_TYPE;
        assert!(matches!(parse(&data), Err(ParseError::BadSize { .. })));

        // Response must be exactly 92 bytes
        let mut data = vec![0u8; MESSAGE_RESPONSE_SIZE + 4];
        data[0] = MESSAGE_RESPONSE_TYPE;
        assert!(matches!(parse(&data), Err(ParseError::BadSize { .. })));

        // Cookie reply must be exactly 64 bytes
        let mut data = vec![0u8; MESSAGE_COOKIE_REPLY_SIZE - 8];
        data[0] = MESSAGE_COOKIE_REPLY_TYPE;
        assert!(matches!(parse(&data), Err(ParseError::BadSize { .. })));

        // Transport must be at least 16 bytes
        let mut data = vec![0u8; MESSAGE_TRANSPORT_HEADER_SIZE - 1];
        data[0] = MESSAGE_TRANSPORT_TYPE;
        assert!(matches!(
            parse(&data),
            Err(ParseError::TransportTooShort { .. })
        ));
    }

    #[test]
    fn test_parse_total_on_arbitrary_bytes() {
        // Every length from 0 to 200 with a sweep of type bytes either
        // parses to a consistent message or errors, never panics.
        for len in 0..200usize {
            for ty in [0u8, 1, 2, 3, 4, 5, 0x80, 0xff] {
                let mut data = vec![0u8; len];
                if len > 0 {
                    data[0] = ty;
                }
                match parse(&data) {
                    Ok(msg) => {
                        assert_eq!(msg.data.len(), len);
                        match msg.msg_type {
                            MessageType::Initiation => {
                                assert!(msg.sender.is_some() && msg.receiver.is_none())
                            }
                            MessageType::Response => {
                                assert!(msg.sender.is_some() && msg.receiver.is_some())
                            }
                            MessageType::CookieReply | MessageType::Transport => {
                                assert!(msg.sender.is_none() && msg.receiver.is_some())
                            }
                        }
                    }
                    Err(_) => {}
                }
            }
        }
    }
}
