//! Database models for attendees, events, and the scan log.
//!
//! The serde attributes match the remote ticket system's JSON rows
//! (`qr_code`, `attendee_name`, ...), so the same types are used for the
//! local cache and for records pulled from the remote store.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Verification state of an attendee's ticket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VerificationStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    /// Convert verification status to its string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }

    /// Parse a verification status from its string representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "verified" => Self::Verified,
            "rejected" => Self::Rejected,
            _ => Self::Pending,
        }
    }
}

impl Serialize for VerificationStatus {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for VerificationStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s: Option<String> = Option::deserialize(d)?;
        Ok(s.map(|s| Self::parse(&s)).unwrap_or_default())
    }
}

/// An attendee's entry right for one event.
///
/// Invariant: `checked_in_at` is `Some` iff `checked_in` is true. Use
/// [`Attendee::normalized`] before persisting records from outside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendee {
    pub id: String,
    pub event_id: String,
    #[serde(rename = "qr_code", alias = "code")]
    pub code: String,
    #[serde(
        rename = "attendee_name",
        alias = "name",
        default,
        deserialize_with = "null_as_default"
    )]
    pub name: String,
    #[serde(
        rename = "attendee_email",
        alias = "email",
        default,
        deserialize_with = "null_as_default"
    )]
    pub email: String,
    #[serde(default)]
    pub ticket_type: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub checked_in: bool,
    #[serde(default, with = "lenient_timestamp")]
    pub checked_in_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp_or_epoch")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub verification_status: VerificationStatus,
    /// Event row embedded by the remote query, if requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
}

impl Attendee {
    /// Enforce the `checked_in` / `checked_in_at` invariant.
    ///
    /// A checked-in record without a timestamp borrows `updated_at`; an
    /// unchecked record drops any stray timestamp.
    pub fn normalized(mut self) -> Self {
        if self.checked_in {
            if self.checked_in_at.is_none() {
                self.checked_in_at = Some(self.updated_at);
            }
        } else {
            self.checked_in_at = None;
        }
        self
    }
}

/// Cached event details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub event_date: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub organizer_id: Option<String>,
    #[serde(default, with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// One successful admission recorded by a scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanLogEntry {
    pub scan_id: i64,
    pub code: String,
    pub scanner_id: String,
    pub scanned_at: DateTime<Utc>,
    pub synced: bool,
}

/// Counters over the local store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub attendees: u64,
    pub checked_in: u64,
    pub scans: u64,
    pub unsynced_scans: u64,
}

/// Outcome counts of an `upsert_attendees` batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    pub inserted: u64,
    pub updated: u64,
    /// Existing rows kept because they were at least as new as the incoming ones.
    pub kept_local: u64,
    /// Records refused by the store (e.g. a code already owned by another id).
    pub rejected: u64,
}

/// Convert a timestamp to the integer milliseconds stored in SQLite.
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Convert stored milliseconds back to a timestamp.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Truncate a timestamp to the millisecond precision the store keeps.
pub fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    from_millis(to_millis(at))
}

/// Parse the timestamp shapes seen in remote rows and legacy caches:
/// RFC 3339 with offset, naive ISO 8601, or `YYYY-MM-DD HH:MM:SS`.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

fn timestamp_or_epoch<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    Ok(lenient_timestamp::deserialize(d)?.unwrap_or_default())
}

mod lenient_timestamp {
    use super::parse_timestamp;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match at {
            Some(at) => s.serialize_str(&at.to_rfc3339()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let s: Option<String> = Option::deserialize(d)?;
        match s {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => parse_timestamp(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn verification_status_roundtrip() {
        for status in [
            VerificationStatus::Pending,
            VerificationStatus::Verified,
            VerificationStatus::Rejected,
        ] {
            assert_eq!(VerificationStatus::parse(status.as_str()), status);
        }
        assert_eq!(VerificationStatus::parse("bogus"), VerificationStatus::Pending);
    }

    #[test]
    fn attendee_from_remote_row() {
        let json = r#"{
            "id": "a1",
            "event_id": "EVENT-1",
            "qr_code": "EH-AB12CD34",
            "attendee_name": "Jane Smith",
            "attendee_email": null,
            "checked_in": true,
            "checked_in_at": "2024-05-01T10:00:00.250+02:00",
            "updated_at": "2024-05-01 08:00:01",
            "verification_status": null,
            "created_at": "2024-04-01T00:00:00Z",
            "event": {
                "id": "EVENT-1",
                "name": "Launch",
                "event_date": "2024-05-01",
                "venue": "Hall A"
            }
        }"#;

        let attendee: Attendee = serde_json::from_str(json).unwrap();
        assert_eq!(attendee.code, "EH-AB12CD34");
        assert_eq!(attendee.name, "Jane Smith");
        assert_eq!(attendee.email, "");
        assert!(attendee.checked_in);
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let expected = base + chrono::Duration::milliseconds(250);
        assert_eq!(attendee.checked_in_at, Some(expected));
        assert_eq!(attendee.updated_at, Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 1).unwrap());
        assert_eq!(attendee.verification_status, VerificationStatus::Pending);
        assert_eq!(attendee.event.unwrap().venue.as_deref(), Some("Hall A"));
    }

    #[test]
    fn missing_updated_at_defaults_to_epoch() {
        let json = r#"{"id": "a1", "event_id": "E1", "qr_code": "C1", "updated_at": ""}"#;
        let attendee: Attendee = serde_json::from_str(json).unwrap();
        assert_eq!(attendee.updated_at, DateTime::<Utc>::default());
        assert!(!attendee.checked_in);
        assert!(attendee.checked_in_at.is_none());
    }

    #[test]
    fn normalized_enforces_checked_in_invariant() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let base = Attendee {
            id: "a1".into(),
            event_id: "E1".into(),
            code: "C1".into(),
            name: String::new(),
            email: String::new(),
            ticket_type: None,
            checked_in: true,
            checked_in_at: None,
            updated_at: at,
            verification_status: VerificationStatus::Pending,
            event: None,
        };

        let checked = base.clone().normalized();
        assert_eq!(checked.checked_in_at, Some(at));

        let unchecked = Attendee {
            checked_in: false,
            checked_in_at: Some(at),
            ..base
        }
        .normalized();
        assert!(unchecked.checked_in_at.is_none());
    }

    #[test]
    fn millis_conversion_truncates() {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let at = base + chrono::Duration::microseconds(1_500);
        assert_eq!(truncate_to_millis(at), from_millis(to_millis(at)));
        assert_eq!(to_millis(truncate_to_millis(at)) % 1000, 1);
    }
}
