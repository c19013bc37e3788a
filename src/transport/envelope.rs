//! Wire envelope carrying one Raft message for one replication group, plus
//! length-prefixed TCP framing (spec.md §4.2's "partition identifier carried
//! in the message envelope").

use std::convert::TryInto;

use crate::replication::GroupKey;

#[derive(Debug, Clone)]
pub struct Envelope {
    pub group: GroupKey,
    pub from: String,
    pub message: raft::message::Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeDecodeError {
    Truncated,
    InvalidUtf8,
    BadMessage,
}

impl Envelope {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_lp(&mut buf, self.group.topic.as_bytes());
        write_lp(&mut buf, self.group.partition.as_bytes());
        write_lp(&mut buf, self.from.as_bytes());
        write_lp(&mut buf, &raft::wire::encode(&self.message));
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, EnvelopeDecodeError> {
        let (topic, rest) = read_lp(buf)?;
        let (partition, rest) = read_lp(rest)?;
        let (from, rest) = read_lp(rest)?;
        let (message_bytes, _) = read_lp(rest)?;

        let topic = String::from_utf8(topic.to_vec()).map_err(|_| EnvelopeDecodeError::InvalidUtf8)?;
        let partition =
            String::from_utf8(partition.to_vec()).map_err(|_| EnvelopeDecodeError::InvalidUtf8)?;
        let from = String::from_utf8(from.to_vec()).map_err(|_| EnvelopeDecodeError::InvalidUtf8)?;
        let message = raft::wire::decode(message_bytes).map_err(|_| EnvelopeDecodeError::BadMessage)?;

        Ok(Envelope {
            group: GroupKey { topic, partition },
            from,
            message,
        })
    }
}

fn write_lp(buf: &mut Vec<u8>, field: &[u8]) {
    buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
    buf.extend_from_slice(field);
}

fn read_lp(buf: &[u8]) -> Result<(&[u8], &[u8]), EnvelopeDecodeError> {
    if buf.len() < 4 {
        return Err(EnvelopeDecodeError::Truncated);
    }
    let (len_bytes, rest) = buf.split_at(4);
    let len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
    if rest.len() < len {
        return Err(EnvelopeDecodeError::Truncated);
    }
    Ok(rest.split_at(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use raft::message::{Message, TermId};

    #[test]
    fn round_trips_an_envelope() {
        let envelope = Envelope {
            group: GroupKey {
                topic: "orders".to_string(),
                partition: "1".to_string(),
            },
            from: "10.0.0.2:7000".to_string(),
            message: Message {
                term: TermId { id: 1 },
                rpc: None,
            },
        };

        let encoded = envelope.encode();
        let decoded = Envelope::decode(&encoded).unwrap();

        assert_eq!(decoded.group, envelope.group);
        assert_eq!(decoded.from, envelope.from);
    }
}
