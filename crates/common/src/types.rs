//! Common data types for Waitroom components.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Prefix used to derive a pending pool identifier from its meeting identifier.
pub const WAITING_AREA_PREFIX: &str = "waiting-";

/// Error returned when a meeting identifier is empty after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Meeting id must not be empty")]
pub struct EmptyMeetingId;

/// Unique identifier for a meeting.
///
/// Identifiers are case-normalized: surrounding whitespace is trimmed and the
/// remainder lower-cased, so `" ABC "` and `"abc"` name the same meeting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MeetingId(String);

impl MeetingId {
    /// Parse and normalize a meeting identifier.
    ///
    /// # Errors
    ///
    /// Returns [`EmptyMeetingId`] if nothing remains after trimming.
    pub fn parse(raw: &str) -> Result<Self, EmptyMeetingId> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(EmptyMeetingId);
        }
        Ok(Self(normalized))
    }

    /// The normalized identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier of the pending pool paired with this meeting.
    #[must_use]
    pub fn waiting_area_id(&self) -> String {
        format!("{WAITING_AREA_PREFIX}{}", self.0)
    }
}

impl fmt::Display for MeetingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MeetingId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Unique identifier for a live signaling connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Participant role, fixed when the connection is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Meeting coordinator; admits, rejects and evicts guests.
    Host,
    /// Participant that waits for admission.
    Guest,
}

impl Role {
    /// Map the `isHost` connection flag to a role.
    #[must_use]
    pub const fn from_is_host(is_host: bool) -> Self {
        if is_host {
            Role::Host
        } else {
            Role::Guest
        }
    }

    #[must_use]
    pub const fn is_host(self) -> bool {
        matches!(self, Role::Host)
    }
}

/// Metadata carried by a connection, immutable after connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMetadata {
    /// Display name.
    pub name: String,
    /// Role derived from the `isHost` flag.
    pub role: Role,
}

impl ConnectionMetadata {
    #[must_use]
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    #[must_use]
    pub fn host(name: impl Into<String>) -> Self {
        Self::new(name, Role::Host)
    }

    #[must_use]
    pub fn guest(name: impl Into<String>) -> Self {
        Self::new(name, Role::Guest)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_meeting_id_is_normalized() {
        let id = MeetingId::parse("  Team-Sync ").unwrap();
        assert_eq!(id.as_str(), "team-sync");
        assert_eq!(id, MeetingId::parse("TEAM-SYNC").unwrap());
    }

    #[test]
    fn test_meeting_id_rejects_blank() {
        assert_eq!(MeetingId::parse(""), Err(EmptyMeetingId));
        assert_eq!(MeetingId::parse("   "), Err(EmptyMeetingId));
    }

    #[test]
    fn test_waiting_area_id() {
        let id = MeetingId::parse("abc").unwrap();
        assert_eq!(id.waiting_area_id(), "waiting-abc");
    }

    #[test]
    fn test_meeting_id_deserialize_normalizes() {
        let id: MeetingId = serde_json::from_str("\"ABC\"").unwrap();
        assert_eq!(id.as_str(), "abc");

        let err = serde_json::from_str::<MeetingId>("\"  \"");
        assert!(err.is_err());
    }

    #[test]
    fn test_role_from_flag() {
        assert_eq!(Role::from_is_host(true), Role::Host);
        assert_eq!(Role::from_is_host(false), Role::Guest);
        assert!(Role::Host.is_host());
        assert!(!Role::Guest.is_host());
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
