//! Per-ego-group union payloads.
//!
//! A union topic carries a `pblog.Union` message: one `MsgPair` per ego
//! group. The outer message is walked entry by entry so one malformed
//! `MsgPair` is skipped without losing its neighbours.

use protobuf::{CodedInputStream, Message, UnknownFields};

use crate::protos::pblog::MsgPair;

/// Tag of `Union.messages` (field 1, length-delimited)
const MESSAGES_TAG: u32 = (1 << 3) | 2;

/// Result of scanning a union payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnionPayload {
    /// Well-formed entries in payload order
    pub messages: Vec<MsgPair>,
    /// Entries dropped because they could not be decoded
    pub skipped: usize,
    /// The outer message ended in the middle of a field
    pub truncated: bool,
}

impl UnionPayload {
    pub fn decode(buf: &[u8]) -> Self {
        let mut result = UnionPayload::default();
        let mut is = CodedInputStream::from_bytes(buf);
        let mut unknown = UnknownFields::new();

        loop {
            let tag = match is.read_raw_tag_or_eof() {
                Ok(Some(tag)) => tag,
                Ok(None) => break,
                Err(_) => {
                    result.truncated = true;
                    break;
                }
            };

            if tag == MESSAGES_TAG {
                match is.read_bytes() {
                    Ok(entry) => match decode_entry(&entry) {
                        Some(pair) => result.messages.push(pair),
                        None => result.skipped += 1,
                    },
                    Err(_) => {
                        result.truncated = true;
                        break;
                    }
                }
            } else if protobuf::rt::read_unknown_or_skip_group(tag, &mut is, &mut unknown).is_err()
            {
                result.truncated = true;
                break;
            }
        }

        result
    }

    pub fn is_clean(&self) -> bool {
        self.skipped == 0 && !self.truncated
    }
}

/// An entry is usable only if it parses and names its group
fn decode_entry(entry: &[u8]) -> Option<MsgPair> {
    MsgPair::parse_from_bytes(entry)
        .ok()
        .filter(|pair| !pair.groupname.is_empty())
}
