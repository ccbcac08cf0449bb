//! Poll Records
//!
//! Versioned binary encoding of a poll, used for the persistent store and for
//! message content that embeds a poll.
//!
//! Layout (little-endian):
//!
//! ```text
//! u8   version
//! u8   flags            bit 0: closed
//! str  question         u32 length + UTF-8
//! u32  option count
//!   u8   flags          bit 0: chosen
//!   str  text
//!   blob token          u32 length + bytes
//!   i32  voter count
//! i32  total voter count
//! u32  CRC-32 of everything above
//! ```

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use super::types::{Poll, PollId, PollOption};

/// Current record version
pub const RECORD_VERSION: u8 = 1;

const POLL_FLAG_CLOSED: u8 = 1 << 0;
const OPTION_FLAG_CHOSEN: u8 = 1 << 0;
const CHECKSUM_LEN: usize = 4;
/// Smallest encoded option: flags, two empty length prefixes, voter count
const MIN_OPTION_LEN: usize = 1 + 4 + 4 + 4;

const REFERENCE_TAG_REMOTE: u8 = 0;
const REFERENCE_TAG_LOCAL: u8 = 1;

/// Record decoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("Record is truncated")]
    Truncated,

    #[error("Unsupported record version {0}")]
    UnsupportedVersion(u8),

    #[error("Record checksum mismatch")]
    ChecksumMismatch,

    #[error("Record has {0} unexpected trailing bytes")]
    TrailingBytes(usize),

    #[error("Record contains invalid UTF-8 text")]
    InvalidText,

    #[error("Unknown poll reference tag {0}")]
    UnknownReferenceTag(u8),

    #[error("Poll reference carries invalid identifier {0}")]
    InvalidReferenceId(i64),
}

/// Poll as embedded in a message record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollReference {
    /// Server-confirmed poll, hydrated from the store on demand
    Remote(PollId),
    /// Unsent poll carried in full; it gets a fresh local id when parsed
    Local { previous_id: PollId, poll: Poll },
}

/// Encode a poll into a checksummed record
pub fn encode_poll(poll: &Poll) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(64 + poll.question.len());
    buf.put_u8(RECORD_VERSION);
    buf.put_u8(if poll.is_closed { POLL_FLAG_CLOSED } else { 0 });
    put_blob(&mut buf, poll.question.as_bytes());
    buf.put_u32_le(poll.options.len() as u32);
    for option in &poll.options {
        buf.put_u8(if option.is_chosen { OPTION_FLAG_CHOSEN } else { 0 });
        put_blob(&mut buf, option.text.as_bytes());
        put_blob(&mut buf, &option.data);
        buf.put_i32_le(option.voter_count);
    }
    buf.put_i32_le(poll.total_voter_count);
    let checksum = crc32fast::hash(&buf);
    buf.put_u32_le(checksum);
    buf.to_vec()
}

/// Decode a record produced by [`encode_poll`]
pub fn decode_poll(raw: &[u8]) -> Result<Poll, RecordError> {
    if raw.len() < CHECKSUM_LEN {
        return Err(RecordError::Truncated);
    }
    let (body, mut checksum) = raw.split_at(raw.len() - CHECKSUM_LEN);
    if crc32fast::hash(body) != checksum.get_u32_le() {
        return Err(RecordError::ChecksumMismatch);
    }

    let mut buf = body;
    let version = take_u8(&mut buf)?;
    if version != RECORD_VERSION {
        return Err(RecordError::UnsupportedVersion(version));
    }
    let flags = take_u8(&mut buf)?;
    let question = take_text(&mut buf)?;

    let option_count = take_u32(&mut buf)? as usize;
    let mut options = Vec::with_capacity(option_count.min(buf.remaining() / MIN_OPTION_LEN));
    for _ in 0..option_count {
        let option_flags = take_u8(&mut buf)?;
        let text = take_text(&mut buf)?;
        let data = take_blob(&mut buf)?;
        let voter_count = take_i32(&mut buf)?;
        options.push(PollOption {
            text,
            data,
            voter_count,
            is_chosen: option_flags & OPTION_FLAG_CHOSEN != 0,
        });
    }
    let total_voter_count = take_i32(&mut buf)?;

    if buf.has_remaining() {
        return Err(RecordError::TrailingBytes(buf.remaining()));
    }

    Ok(Poll {
        question,
        options,
        total_voter_count,
        is_closed: flags & POLL_FLAG_CLOSED != 0,
    })
}

/// Encode the poll a message embeds. Local polls are carried in full.
pub fn encode_poll_reference(poll_id: PollId, local_poll: Option<&Poll>) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(16);
    match local_poll {
        Some(poll) if poll_id.is_local() => {
            buf.put_u8(REFERENCE_TAG_LOCAL);
            buf.put_i64_le(poll_id.get());
            buf.put_slice(&encode_poll(poll));
        }
        _ => {
            buf.put_u8(REFERENCE_TAG_REMOTE);
            buf.put_i64_le(poll_id.get());
        }
    }
    buf.to_vec()
}

/// Decode a reference produced by [`encode_poll_reference`]
pub fn decode_poll_reference(raw: &[u8]) -> Result<PollReference, RecordError> {
    let mut buf = raw;
    let tag = take_u8(&mut buf)?;
    let id = take_i64(&mut buf)?;
    let poll_id = PollId::new(id);
    match tag {
        REFERENCE_TAG_REMOTE => {
            if !poll_id.is_remote() {
                return Err(RecordError::InvalidReferenceId(id));
            }
            if buf.has_remaining() {
                return Err(RecordError::TrailingBytes(buf.remaining()));
            }
            Ok(PollReference::Remote(poll_id))
        }
        REFERENCE_TAG_LOCAL => {
            if !poll_id.is_local() {
                return Err(RecordError::InvalidReferenceId(id));
            }
            let poll = decode_poll(buf)?;
            Ok(PollReference::Local {
                previous_id: poll_id,
                poll,
            })
        }
        other => Err(RecordError::UnknownReferenceTag(other)),
    }
}

fn put_blob(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32_le(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn take_u8(buf: &mut &[u8]) -> Result<u8, RecordError> {
    if buf.remaining() < 1 {
        return Err(RecordError::Truncated);
    }
    Ok(buf.get_u8())
}

fn take_u32(buf: &mut &[u8]) -> Result<u32, RecordError> {
    if buf.remaining() < 4 {
        return Err(RecordError::Truncated);
    }
    Ok(buf.get_u32_le())
}

fn take_i32(buf: &mut &[u8]) -> Result<i32, RecordError> {
    if buf.remaining() < 4 {
        return Err(RecordError::Truncated);
    }
    Ok(buf.get_i32_le())
}

fn take_i64(buf: &mut &[u8]) -> Result<i64, RecordError> {
    if buf.remaining() < 8 {
        return Err(RecordError::Truncated);
    }
    Ok(buf.get_i64_le())
}

fn take_blob(buf: &mut &[u8]) -> Result<Vec<u8>, RecordError> {
    let len = take_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(RecordError::Truncated);
    }
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    Ok(bytes)
}

fn take_text(buf: &mut &[u8]) -> Result<String, RecordError> {
    String::from_utf8(take_blob(buf)?).map_err(|_| RecordError::InvalidText)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_poll() -> Poll {
        Poll {
            question: "Best editor?".to_string(),
            options: vec![
                PollOption {
                    text: "vim".to_string(),
                    data: vec![0x00, 0xff],
                    voter_count: 12,
                    is_chosen: true,
                },
                PollOption {
                    text: "emacs ✓".to_string(),
                    data: b"1".to_vec(),
                    voter_count: 9,
                    is_chosen: false,
                },
            ],
            total_voter_count: 19,
            is_closed: true,
        }
    }

    #[test]
    fn test_record_round_trip() {
        let poll = sample_poll();
        let decoded = decode_poll(&encode_poll(&poll)).unwrap();
        assert_eq!(decoded, poll);
    }

    #[test]
    fn test_empty_record_is_truncated() {
        assert_eq!(decode_poll(&[]), Err(RecordError::Truncated));
    }

    #[test]
    fn test_corrupted_record_fails_checksum() {
        let mut raw = encode_poll(&sample_poll());
        raw[5] ^= 0x40;
        assert_eq!(decode_poll(&raw), Err(RecordError::ChecksumMismatch));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let mut raw = encode_poll(&sample_poll());
        raw[0] = 9;
        let body_len = raw.len() - CHECKSUM_LEN;
        let checksum = crc32fast::hash(&raw[..body_len]);
        raw[body_len..].copy_from_slice(&checksum.to_le_bytes());
        assert_eq!(decode_poll(&raw), Err(RecordError::UnsupportedVersion(9)));
    }

    #[test]
    fn test_oversized_option_count_is_truncated() {
        let mut body = BytesMut::new();
        body.put_u8(RECORD_VERSION);
        body.put_u8(0);
        put_blob(&mut body, b"Q");
        body.put_u32_le(u32::MAX);
        let checksum = crc32fast::hash(&body);
        body.put_u32_le(checksum);
        assert_eq!(decode_poll(&body), Err(RecordError::Truncated));
    }

    #[test]
    fn test_remote_reference() {
        let raw = encode_poll_reference(PollId::new(42), None);
        assert_eq!(
            decode_poll_reference(&raw),
            Ok(PollReference::Remote(PollId::new(42)))
        );
    }

    #[test]
    fn test_local_reference_carries_poll() {
        let poll = sample_poll();
        let raw = encode_poll_reference(PollId::new(-3), Some(&poll));
        match decode_poll_reference(&raw).unwrap() {
            PollReference::Local { previous_id, poll: decoded } => {
                assert_eq!(previous_id, PollId::new(-3));
                assert_eq!(decoded, poll);
            }
            other => panic!("expected local reference, got {other:?}"),
        }
    }

    #[test]
    fn test_reference_with_mismatched_id_is_rejected() {
        let raw = encode_poll_reference(PollId::new(-3), None);
        assert_eq!(
            decode_poll_reference(&raw),
            Err(RecordError::InvalidReferenceId(-3))
        );
        assert_eq!(
            decode_poll_reference(&[7, 0, 0, 0, 0, 0, 0, 0, 0]),
            Err(RecordError::UnknownReferenceTag(7))
        );
    }
}
