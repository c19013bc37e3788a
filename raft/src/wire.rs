//! Protobuf encode/decode helpers for [`Message`], available when the `prost` feature is
//! enabled.
//!
//! This module does not frame or length-prefix anything — it only turns a [`Message`] into bytes
//! and back. Framing (length prefixes, peer/partition addressing) is a transport concern that
//! lives above this crate.

use alloc::vec::Vec;

use bytes::BytesMut;
use prost::Message as _;

use crate::message::Message;

/// Encode a [`Message`] to its protobuf wire representation.
pub fn encode(message: &Message) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(message.encoded_len());
    // `Message`'s buffer is sized exactly above, so this can't fail.
    message.encode(&mut buf).expect("buffer sized for message");
    buf.to_vec()
}

/// Decode a [`Message`] from its protobuf wire representation.
pub fn decode(buf: &[u8]) -> Result<Message, prost::DecodeError> {
    Message::decode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{LogIndex, Rpc, TermId, VoteRequest};

    #[test]
    fn round_trips_a_message() {
        let message = Message {
            term: TermId { id: 3 },
            rpc: Some(Rpc::VoteRequest(VoteRequest {
                last_log_idx: LogIndex { id: 0 },
                last_log_term: TermId { id: 2 },
            })),
        };

        let encoded = encode(&message);
        let decoded = decode(&encoded).unwrap();

        assert!(message == decoded);
    }
}
