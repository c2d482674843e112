//! JSON frames of the signaling WebSocket.
//!
//! ```text
//! client:  {"id": 7, "event": "joinMeeting", "data": {"meetingId": "abc"}}
//! reply:   {"id": 7, "type": "success", "res": "Room Joined Successfully"}
//!          {"id": 7, "type": "error", "err": "Meeting not found"}
//! push:    {"event": "userJoined", "data": {"message": "...", "user": {...}}}
//! ```

use crate::actors::messages::{ClientRequest, Response, ServerEvent};
use crate::errors::GatewayError;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request frame as received from the client.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(default)]
    id: Option<u64>,
    event: String,
    #[serde(default)]
    data: Option<Value>,
}

/// A frame that could not be turned into a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameError {
    /// Request id, if the frame got far enough to carry one.
    pub id: Option<u64>,
    pub message: String,
}

impl FrameError {
    fn new(id: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
        }
    }
}

/// Decode a text frame into its request id and request.
pub fn parse_frame(text: &str) -> Result<(Option<u64>, ClientRequest), FrameError> {
    let frame: ClientFrame = serde_json::from_str(text)
        .map_err(|e| FrameError::new(None, format!("Malformed frame: {e}")))?;
    let id = frame.id;

    let request = match frame.event.as_str() {
        "createMeeting" => ClientRequest::CreateMeeting(payload(id, frame.data)?),
        "joinMeeting" => ClientRequest::JoinMeeting(payload(id, frame.data)?),
        "listRoomMembers" => ClientRequest::ListRoomMembers,
        "listPendingMembers" => ClientRequest::ListPendingMembers,
        "acceptPendingMember" => ClientRequest::AcceptPendingMember(payload(id, frame.data)?),
        "rejectPendingMember" => ClientRequest::RejectPendingMember(payload(id, frame.data)?),
        "evictMember" => ClientRequest::EvictMember(payload(id, frame.data)?),
        "leaveMeeting" => ClientRequest::LeaveMeeting,
        "getRoutingCapabilities" => ClientRequest::GetRoutingCapabilities,
        "listProducers" => ClientRequest::ListProducers,
        "createTransport" => {
            ClientRequest::CreateTransport(optional_payload(id, frame.data)?.unwrap_or_default())
        }
        "connectTransport" => ClientRequest::ConnectTransport(payload(id, frame.data)?),
        "produce" => ClientRequest::Produce(payload(id, frame.data)?),
        "closeProducer" => ClientRequest::CloseProducer(payload(id, frame.data)?),
        "consume" => ClientRequest::Consume(payload(id, frame.data)?),
        other => return Err(FrameError::new(id, format!("Unknown event: {other}"))),
    };

    Ok((id, request))
}

fn payload<T: DeserializeOwned>(id: Option<u64>, data: Option<Value>) -> Result<T, FrameError> {
    optional_payload(id, data)?.ok_or_else(|| FrameError::new(id, "Missing request data"))
}

fn optional_payload<T: DeserializeOwned>(
    id: Option<u64>,
    data: Option<Value>,
) -> Result<Option<T>, FrameError> {
    match data {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| FrameError::new(id, format!("Invalid request data: {e}"))),
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Outcome<'a> {
    Success { res: &'a Response },
    Error { err: String },
}

#[derive(Debug, Serialize)]
struct ReplyFrame<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(flatten)]
    outcome: Outcome<'a>,
}

/// Encode the reply to a request. Fire-and-forget requests yield `None`.
pub fn encode_reply(
    id: Option<u64>,
    result: &Result<Response, GatewayError>,
) -> Result<Option<String>, serde_json::Error> {
    let outcome = match result {
        Ok(Response::NoReply) => return Ok(None),
        Ok(response) => Outcome::Success { res: response },
        Err(e) => Outcome::Error {
            err: e.client_message(),
        },
    };
    serde_json::to_string(&ReplyFrame { id, outcome }).map(Some)
}

/// Encode the error reply for a frame that could not be parsed.
pub fn encode_frame_error(error: &FrameError) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ReplyFrame {
        id: error.id,
        outcome: Outcome::Error {
            err: error.message.clone(),
        },
    })
}

/// Encode a server push.
pub fn encode_push(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::messages::{MeetingRef, Notice, ProducedInfo};
    use serde_json::json;

    #[test]
    fn test_parse_request_with_payload() {
        let (id, request) =
            parse_frame(r#"{"id": 3, "event": "joinMeeting", "data": {"meetingId": "Abc"}}"#)
                .unwrap();
        assert_eq!(id, Some(3));
        assert_eq!(
            request,
            ClientRequest::JoinMeeting(MeetingRef {
                meeting_id: "Abc".to_string()
            })
        );
    }

    #[test]
    fn test_create_transport_data_is_optional() {
        let (_, request) = parse_frame(r#"{"id": 1, "event": "createTransport"}"#).unwrap();
        assert_eq!(
            request,
            ClientRequest::CreateTransport(Default::default())
        );

        let (_, request) = parse_frame(
            r#"{"id": 2, "event": "createTransport", "data": {"forceTcp": true}}"#,
        )
        .unwrap();
        assert!(matches!(
            request,
            ClientRequest::CreateTransport(ref options) if options.force_tcp
        ));
    }

    #[test]
    fn test_parse_errors_echo_id() {
        let err = parse_frame(r#"{"id": 9, "event": "teleport"}"#).unwrap_err();
        assert_eq!(err.id, Some(9));
        assert_eq!(err.message, "Unknown event: teleport");

        let err = parse_frame(r#"{"id": 10, "event": "evictMember"}"#).unwrap_err();
        assert_eq!(err.id, Some(10));

        let err = parse_frame("not json").unwrap_err();
        assert_eq!(err.id, None);
    }

    #[test]
    fn test_reply_shapes() {
        let ack = encode_reply(Some(1), &Ok(Response::ack("Room Created Successfully")))
            .unwrap()
            .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&ack).unwrap(),
            json!({"id": 1, "type": "success", "res": "Room Created Successfully"})
        );

        let produced = encode_reply(
            Some(2),
            &Ok(Response::Produced(ProducedInfo {
                producer_id: "p1".to_string(),
            })),
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&produced).unwrap(),
            json!({"id": 2, "type": "success", "res": {"producerId": "p1"}})
        );

        let error = encode_reply(
            Some(3),
            &Err(GatewayError::Conflict("Room already exists".to_string())),
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&error).unwrap(),
            json!({"id": 3, "type": "error", "err": "Room already exists"})
        );

        assert!(encode_reply(Some(4), &Ok(Response::NoReply))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_push_shape() {
        let push = encode_push(&ServerEvent::MemberEvicted(Notice::new(
            "User removed from room",
        )))
        .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&push).unwrap(),
            json!({"event": "memberEvicted", "data": {"message": "User removed from room"}})
        );
    }
}
