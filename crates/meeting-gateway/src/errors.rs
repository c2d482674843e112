//! Meeting Gateway error types.
//!
//! Every error maps to a numeric signaling error code and to a client-safe
//! message. Internal details are logged server-side but never sent to clients.

use media_engine::MediaError;
use thiserror::Error;

/// Meeting Gateway error type.
///
/// Maps to signaling error codes:
/// - `PermissionDenied`: `FORBIDDEN` (3)
/// - `*NotFound`, `NotInMeeting`: `NOT_FOUND` (4)
/// - `Conflict`: `CONFLICT` (5)
/// - `Internal`: `INTERNAL_ERROR` (6)
/// - `Draining`: `CAPACITY_EXCEEDED` (7)
/// - `InvalidRequest`: `INVALID_REQUEST` (8)
/// - `RoutingNotReady`: `NOT_READY` (9)
/// - `Media`: `MEDIA_ERROR` (10)
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Caller's role does not allow the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No Session exists for the meeting id.
    #[error("Meeting not found: {0}")]
    MeetingNotFound(String),

    /// No Pending Pool exists for the meeting id.
    #[error("Waiting area not found: {0}")]
    WaitingAreaNotFound(String),

    /// Target connection is not where the operation expects it.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// Transport id unknown to the caller's endpoint.
    #[error("Transport not found: {0}")]
    TransportNotFound(String),

    /// Producer id unknown to the meeting.
    #[error("Producer not found: {0}")]
    ProducerNotFound(String),

    /// Caller has not joined a meeting, or is not admitted to its Session.
    #[error("Not in meeting: {0}")]
    NotInMeeting(String),

    /// Conflict error (e.g., meeting id already in use).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed or semantically invalid request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The meeting's routing context has not been allocated yet.
    #[error("Routing context not ready")]
    RoutingNotReady,

    /// Media Engine failure.
    #[error("Media engine error: {0}")]
    Media(#[from] MediaError),

    /// Gateway is draining (graceful shutdown).
    #[error("Gateway is draining")]
    Draining,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the signaling error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            GatewayError::PermissionDenied(_) => 3, // FORBIDDEN
            GatewayError::MeetingNotFound(_)
            | GatewayError::WaitingAreaNotFound(_)
            | GatewayError::ParticipantNotFound(_)
            | GatewayError::TransportNotFound(_)
            | GatewayError::ProducerNotFound(_)
            | GatewayError::NotInMeeting(_) => 4, // NOT_FOUND
            GatewayError::Conflict(_) => 5,        // CONFLICT
            GatewayError::Internal(_) => 6,        // INTERNAL_ERROR
            GatewayError::Draining => 7,           // CAPACITY_EXCEEDED
            GatewayError::InvalidRequest(_) => 8,  // INVALID_REQUEST
            GatewayError::RoutingNotReady => 9,    // NOT_READY
            GatewayError::Media(_) => 10,          // MEDIA_ERROR
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::PermissionDenied(msg)
            | GatewayError::Conflict(msg)
            | GatewayError::InvalidRequest(msg)
            | GatewayError::NotInMeeting(msg) => msg.clone(),
            GatewayError::MeetingNotFound(_) => "Meeting not found".to_string(),
            GatewayError::WaitingAreaNotFound(_) => "Waiting area not found".to_string(),
            GatewayError::ParticipantNotFound(_) => "User not found".to_string(),
            GatewayError::TransportNotFound(_) => "Transport not found".to_string(),
            GatewayError::ProducerNotFound(_) => "Producer not found".to_string(),
            GatewayError::RoutingNotReady => {
                "Media routing is not ready yet, please retry".to_string()
            }
            GatewayError::Media(e) => match e {
                MediaError::InvalidParameters(detail) => {
                    format!("Invalid media parameters: {detail}")
                }
                MediaError::CannotConsume { .. } => "Cannot consume this producer".to_string(),
                MediaError::UnsupportedKind(kind) => format!("Unsupported media kind: {kind}"),
                MediaError::Closed(_) | MediaError::NotFound(_) => {
                    "Media object is no longer available".to_string()
                }
                MediaError::Unavailable(_) => "Media service unavailable".to_string(),
            },
            GatewayError::Draining => "Server is shutting down, please reconnect".to_string(),
            GatewayError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use media_engine::MediaKind;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            GatewayError::PermissionDenied("not host".to_string()).error_code(),
            3
        );
        assert_eq!(
            GatewayError::MeetingNotFound("abc".to_string()).error_code(),
            4
        );
        assert_eq!(
            GatewayError::WaitingAreaNotFound("abc".to_string()).error_code(),
            4
        );
        assert_eq!(
            GatewayError::NotInMeeting("no meeting".to_string()).error_code(),
            4
        );
        assert_eq!(
            GatewayError::Conflict("Room already exists".to_string()).error_code(),
            5
        );
        assert_eq!(GatewayError::Internal("boom".to_string()).error_code(), 6);
        assert_eq!(GatewayError::Draining.error_code(), 7);
        assert_eq!(
            GatewayError::InvalidRequest("bad".to_string()).error_code(),
            8
        );
        assert_eq!(GatewayError::RoutingNotReady.error_code(), 9);
        assert_eq!(
            GatewayError::Media(MediaError::Unavailable("worker died".to_string())).error_code(),
            10
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let internal = GatewayError::Internal("channel send failed: receiver dropped".to_string());
        assert_eq!(internal.client_message(), "An internal error occurred");

        let unavailable =
            GatewayError::Media(MediaError::Unavailable("worker pid 4242 exited".to_string()));
        assert!(!unavailable.client_message().contains("4242"));

        let missing = GatewayError::MeetingNotFound("secret-meeting".to_string());
        assert_eq!(missing.client_message(), "Meeting not found");
    }

    #[test]
    fn test_media_error_conversion() {
        let err: GatewayError = MediaError::UnsupportedKind(MediaKind::Video).into();
        assert!(matches!(err, GatewayError::Media(_)));
        assert_eq!(err.client_message(), "Unsupported media kind: video");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", GatewayError::Conflict("Room already exists".to_string())),
            "Conflict: Room already exists"
        );
        assert_eq!(
            format!("{}", GatewayError::RoutingNotReady),
            "Routing context not ready"
        );
    }
}
