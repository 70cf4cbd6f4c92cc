//! Log entry identifiers and the typed decode step at the log boundary.

use crate::models::{MessageRecord, MessageStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Raw field map carried by a log entry.
pub type EntryFields = BTreeMap<String, String>;

pub const FIELD_MESSAGE_ID: &str = "message_id";
pub const FIELD_SENDER_ID: &str = "sender_id";
pub const FIELD_RECEIVER_ID: &str = "receiver_id";
pub const FIELD_CONTENT: &str = "content";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_READ: &str = "read";

/// Stream entry ID in `<milliseconds>-<sequence>` form.
///
/// Ordering is numeric on `(ms, seq)`, never lexicographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId {
    pub ms: u64,
    pub seq: u64,
}

impl EntryId {
    pub const fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }
}

impl Ord for EntryId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.ms, self.seq).cmp(&(other.ms, other.seq))
    }
}

impl PartialOrd for EntryId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid entry id '{0}'")]
pub struct InvalidEntryId(pub String);

impl FromStr for EntryId {
    type Err = InvalidEntryId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ms, seq) = s.split_once('-').ok_or_else(|| InvalidEntryId(s.to_string()))?;
        let ms = ms.parse().map_err(|_| InvalidEntryId(s.to_string()))?;
        let seq = seq.parse().map_err(|_| InvalidEntryId(s.to_string()))?;
        Ok(Self { ms, seq })
    }
}

/// One entry read from the durable log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: EntryId,
    pub fields: EntryFields,
}

/// Failure to turn raw entry fields into a [`MessageRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Encode a record into the field map appended to the log.
pub fn encode_record(record: &MessageRecord) -> EntryFields {
    let mut fields = EntryFields::new();
    fields.insert(FIELD_MESSAGE_ID.into(), record.message_id.to_string());
    fields.insert(FIELD_SENDER_ID.into(), record.sender_id.clone());
    fields.insert(FIELD_RECEIVER_ID.into(), record.receiver_id.clone());
    fields.insert(FIELD_CONTENT.into(), record.content.clone());
    fields.insert(
        FIELD_TIMESTAMP.into(),
        record.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
    );
    fields.insert(FIELD_STATUS.into(), record.status.as_str().into());
    fields.insert(FIELD_READ.into(), record.read.to_string());
    fields
}

fn required<'a>(fields: &'a EntryFields, name: &'static str) -> Result<&'a str, DecodeError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(DecodeError::MissingField(name))
}

fn non_empty(fields: &EntryFields, name: &'static str) -> Result<String, DecodeError> {
    let value = required(fields, name)?;
    if value.is_empty() {
        return Err(DecodeError::InvalidField {
            field: name,
            reason: "must not be empty".into(),
        });
    }
    Ok(value.to_string())
}

/// Decode raw entry fields into a typed record.
///
/// `read` is optional for entries written before it was made explicit and
/// defaults to `false`.
pub fn decode_record(fields: &EntryFields) -> Result<MessageRecord, DecodeError> {
    let message_id = Uuid::parse_str(required(fields, FIELD_MESSAGE_ID)?).map_err(|e| {
        DecodeError::InvalidField {
            field: FIELD_MESSAGE_ID,
            reason: e.to_string(),
        }
    })?;

    let timestamp = DateTime::parse_from_rfc3339(required(fields, FIELD_TIMESTAMP)?)
        .map_err(|e| DecodeError::InvalidField {
            field: FIELD_TIMESTAMP,
            reason: e.to_string(),
        })?
        .with_timezone(&Utc);

    let status = required(fields, FIELD_STATUS)?
        .parse::<MessageStatus>()
        .map_err(|reason| DecodeError::InvalidField {
            field: FIELD_STATUS,
            reason,
        })?;

    let read = match fields.get(FIELD_READ) {
        None => false,
        Some(v) => v.parse::<bool>().map_err(|e| DecodeError::InvalidField {
            field: FIELD_READ,
            reason: e.to_string(),
        })?,
    };

    Ok(MessageRecord {
        message_id,
        sender_id: non_empty(fields, FIELD_SENDER_ID)?,
        receiver_id: non_empty(fields, FIELD_RECEIVER_ID)?,
        content: non_empty(fields, FIELD_CONTENT)?,
        timestamp,
        read,
        status,
    })
}

impl TryFrom<&LogEntry> for MessageRecord {
    type Error = DecodeError;

    fn try_from(entry: &LogEntry) -> Result<Self, Self::Error> {
        decode_record(&entry.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MessageRecord {
        MessageRecord::new_outgoing("u1".into(), "u2".into(), "hi".into())
    }

    #[test]
    fn entry_ids_order_numerically() {
        let a: EntryId = "9-5".parse().unwrap();
        let b: EntryId = "10-0".parse().unwrap();
        let c: EntryId = "10-1".parse().unwrap();

        assert!(a < b, "ms must compare as numbers, not strings");
        assert!(b < c);
        assert_eq!(b.to_string(), "10-0");
    }

    #[test]
    fn malformed_entry_ids_are_rejected() {
        for bad in ["", "123", "a-1", "1-b", "1-2-3"] {
            assert!(bad.parse::<EntryId>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn decode_restores_encoded_record() {
        let record = sample();
        let decoded = decode_record(&encode_record(&record)).unwrap();

        assert_eq!(decoded.message_id, record.message_id);
        assert_eq!(decoded.sender_id, "u1");
        assert_eq!(decoded.status, MessageStatus::Sent);
        assert!(!decoded.read);
        // Microsecond precision survives the text encoding.
        assert_eq!(
            decoded.timestamp.timestamp_micros(),
            record.timestamp.timestamp_micros()
        );
    }

    #[test]
    fn decode_reports_missing_field() {
        let mut fields = encode_record(&sample());
        fields.remove(FIELD_CONTENT);

        assert_eq!(
            decode_record(&fields),
            Err(DecodeError::MissingField(FIELD_CONTENT))
        );
    }

    #[test]
    fn decode_reports_malformed_fields() {
        let mut fields = encode_record(&sample());
        fields.insert(FIELD_MESSAGE_ID.into(), "not-a-uuid".into());
        assert!(matches!(
            decode_record(&fields),
            Err(DecodeError::InvalidField { field: FIELD_MESSAGE_ID, .. })
        ));

        let mut fields = encode_record(&sample());
        fields.insert(FIELD_TIMESTAMP.into(), "yesterday".into());
        assert!(matches!(
            decode_record(&fields),
            Err(DecodeError::InvalidField { field: FIELD_TIMESTAMP, .. })
        ));

        let mut fields = encode_record(&sample());
        fields.insert(FIELD_SENDER_ID.into(), String::new());
        assert!(matches!(
            decode_record(&fields),
            Err(DecodeError::InvalidField { field: FIELD_SENDER_ID, .. })
        ));
    }

    #[test]
    fn read_flag_defaults_to_false_when_absent() {
        let mut fields = encode_record(&sample());
        fields.remove(FIELD_READ);
        assert!(!decode_record(&fields).unwrap().read);
    }
}
