//! The payload carried by every Raft log entry in a `ReplicationGroup`.
//!
//! `Append` carries one canonical record destined for the group's
//! pending-queries queue; `Drain` carries the nonce-correlated pop count
//! that resolves spec.md's "drain is itself replicated" requirement (see
//! `original_source/src/broker/broker.py`'s `Raft.remove_queries`). Both
//! variants carry the nonce that correlates a commit with the waiter
//! registered by the handler thread that submitted it.

use bytes::Bytes;

const TAG_APPEND: u8 = 0;
const TAG_DRAIN: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOp {
    Append { nonce: u64, record: String },
    Drain { nonce: u64, count: u64 },
}

impl LogOp {
    pub fn nonce(&self) -> u64 {
        match self {
            LogOp::Append { nonce, .. } => *nonce,
            LogOp::Drain { nonce, .. } => *nonce,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = Vec::new();
        match self {
            LogOp::Append { nonce, record } => {
                buf.push(TAG_APPEND);
                buf.extend_from_slice(&nonce.to_le_bytes());
                buf.extend_from_slice(&(record.len() as u32).to_le_bytes());
                buf.extend_from_slice(record.as_bytes());
            }
            LogOp::Drain { nonce, count } => {
                buf.push(TAG_DRAIN);
                buf.extend_from_slice(&nonce.to_le_bytes());
                buf.extend_from_slice(&count.to_le_bytes());
            }
        }
        Bytes::from(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self, LogOpDecodeError> {
        let (&tag, rest) = data.split_first().ok_or(LogOpDecodeError::Truncated)?;
        let (nonce_bytes, rest) = split_at(rest, 8)?;
        let nonce = u64::from_le_bytes(nonce_bytes.try_into().unwrap());

        match tag {
            TAG_APPEND => {
                let (len_bytes, rest) = split_at(rest, 4)?;
                let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
                if rest.len() != len {
                    return Err(LogOpDecodeError::Truncated);
                }
                let record = String::from_utf8(rest.to_vec())
                    .map_err(|_| LogOpDecodeError::InvalidUtf8)?;
                Ok(LogOp::Append { nonce, record })
            }
            TAG_DRAIN => {
                let (count_bytes, _) = split_at(rest, 8)?;
                let count = u64::from_le_bytes(count_bytes.try_into().unwrap());
                Ok(LogOp::Drain { nonce, count })
            }
            _ => Err(LogOpDecodeError::UnknownTag(tag)),
        }
    }
}

fn split_at(data: &[u8], mid: usize) -> Result<(&[u8], &[u8]), LogOpDecodeError> {
    if data.len() < mid {
        Err(LogOpDecodeError::Truncated)
    } else {
        Ok(data.split_at(mid))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOpDecodeError {
    Truncated,
    InvalidUtf8,
    UnknownTag(u8),
}

impl std::fmt::Display for LogOpDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "log entry payload truncated"),
            Self::InvalidUtf8 => write!(f, "log entry record was not valid UTF-8"),
            Self::UnknownTag(tag) => write!(f, "unknown log op tag {}", tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_append() {
        let op = LogOp::Append {
            nonce: 7,
            record: "INSERT INTO topic(...)".to_string(),
        };
        let encoded = op.encode();
        assert_eq!(LogOp::decode(&encoded).unwrap(), op);
    }

    #[test]
    fn round_trips_drain() {
        let op = LogOp::Drain { nonce: 42, count: 2 };
        let encoded = op.encode();
        assert_eq!(LogOp::decode(&encoded).unwrap(), op);
    }
}
