//! Integration tests for the WebSocket signaling surface.
//!
//! Serves `signaling_router` on an ephemeral port and talks to it with a
//! real WebSocket client, headers and all.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use meeting_gateway::signaling::{signaling_router, ADMIN_HEADER, NAME_HEADER};
use mg_test_utils::{random_meeting_id, TestGateway};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

async fn start_server() -> (TestGateway, SocketAddr) {
    let gateway = TestGateway::new();
    let app = signaling_router(gateway.handle.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (gateway, addr)
}

async fn open(addr: SocketAddr, name: Option<&'static str>, is_host: bool) -> Socket {
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    if let Some(name) = name {
        request
            .headers_mut()
            .insert(NAME_HEADER, HeaderValue::from_static(name));
    }
    if is_host {
        request
            .headers_mut()
            .insert(ADMIN_HEADER, HeaderValue::from_static("true"));
    }
    let (socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, frame: Value) {
    socket.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn send_raw(socket: &mut Socket, text: &str) {
    socket.send(Message::Text(text.to_string())).await.unwrap();
}

/// Next JSON frame matching `wanted`, skipping everything else.
async fn recv_matching(socket: &mut Socket, wanted: impl Fn(&Value) -> bool) -> Value {
    tokio::time::timeout(FRAME_TIMEOUT, async {
        loop {
            let frame = socket
                .next()
                .await
                .expect("socket closed")
                .expect("socket error");
            if let Message::Text(text) = frame {
                let value: Value = serde_json::from_str(&text).unwrap();
                if wanted(&value) {
                    return value;
                }
            }
        }
    })
    .await
    .expect("frame within timeout")
}

async fn reply(socket: &mut Socket, id: u64) -> Value {
    recv_matching(socket, |frame| frame["id"] == json!(id)).await
}

async fn push(socket: &mut Socket, event: &str) -> Value {
    recv_matching(socket, |frame| frame["event"] == json!(event)).await
}

/// Issue a request and wait for its reply.
async fn call(socket: &mut Socket, id: u64, event: &str, data: Value) -> Value {
    send(socket, json!({"id": id, "event": event, "data": data})).await;
    reply(socket, id).await
}

#[tokio::test]
async fn test_create_and_join_over_websocket() {
    let (_gateway, addr) = start_server().await;
    let meeting = random_meeting_id();
    let mut host = open(addr, Some("alice"), true).await;

    let created = call(&mut host, 1, "createMeeting", json!({"meetingId": meeting})).await;
    assert_eq!(
        created,
        json!({"id": 1, "type": "success", "res": "Room Created Successfully"})
    );

    let joined = call(&mut host, 2, "joinMeeting", json!({"meetingId": meeting})).await;
    assert_eq!(
        joined,
        json!({"id": 2, "type": "success", "res": "Room Joined Successfully"})
    );

    let again = call(&mut host, 3, "createMeeting", json!({"meetingId": meeting})).await;
    assert_eq!(
        again,
        json!({"id": 3, "type": "error", "err": "Room already exists"})
    );
}

#[tokio::test]
async fn test_admission_over_websocket() {
    let (_gateway, addr) = start_server().await;
    let meeting = random_meeting_id();

    let mut host = open(addr, Some("alice"), true).await;
    call(&mut host, 1, "createMeeting", json!({"meetingId": meeting})).await;
    call(&mut host, 2, "joinMeeting", json!({"meetingId": meeting})).await;

    let mut guest = open(addr, Some("bob"), false).await;
    let waiting = call(&mut guest, 1, "joinMeeting", json!({"meetingId": meeting})).await;
    assert_eq!(waiting["res"], "Waiting Room Joined Successfully");

    let notice = push(&mut host, "userJoinedWaitingArea").await;
    assert_eq!(notice["data"]["message"], "bob is in waiting room");
    assert_eq!(notice["data"]["user"]["name"], "bob");
    assert_eq!(notice["data"]["user"]["isHost"], false);
    let guest_id = notice["data"]["user"]["id"].clone();

    let pending = call(&mut host, 3, "listPendingMembers", Value::Null).await;
    assert_eq!(pending["res"], json!([{"id": guest_id, "name": "bob"}]));

    let accepted = call(
        &mut host,
        4,
        "acceptPendingMember",
        json!({"connectionId": guest_id}),
    )
    .await;
    assert_eq!(accepted["res"], "User accepted successfully");

    let notice = push(&mut guest, "memberAccepted").await;
    assert_eq!(notice["data"]["message"], "User accepted successfully");

    let members = call(&mut guest, 2, "listRoomMembers", Value::Null).await;
    let members = members["res"].as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["name"], "alice");
    assert_eq!(members[0]["isHost"], true);
}

#[tokio::test]
async fn test_guest_cannot_create_meeting() {
    let (_gateway, addr) = start_server().await;
    let mut guest = open(addr, Some("mallory"), false).await;

    let denied = call(
        &mut guest,
        1,
        "createMeeting",
        json!({"meetingId": random_meeting_id()}),
    )
    .await;
    assert_eq!(
        denied,
        json!({"id": 1, "type": "error", "err": "You are not authorized to create a room"})
    );
}

#[tokio::test]
async fn test_bad_frames_keep_socket_open() {
    let (_gateway, addr) = start_server().await;
    let mut host = open(addr, Some("alice"), true).await;

    send_raw(&mut host, "not json").await;
    let error = recv_matching(&mut host, |frame| frame["type"] == "error").await;
    assert!(error.get("id").is_none());

    send(&mut host, json!({"id": 5, "event": "teleport"})).await;
    assert_eq!(
        reply(&mut host, 5).await,
        json!({"id": 5, "type": "error", "err": "Unknown event: teleport"})
    );

    send(&mut host, json!({"id": 6, "event": "joinMeeting"})).await;
    assert_eq!(reply(&mut host, 6).await["err"], "Missing request data");

    // Still serving requests
    let created = call(
        &mut host,
        7,
        "createMeeting",
        json!({"meetingId": random_meeting_id()}),
    )
    .await;
    assert_eq!(created["type"], "success");
}

#[tokio::test]
async fn test_close_producer_has_no_reply() {
    let (_gateway, addr) = start_server().await;
    let meeting = random_meeting_id();
    let mut host = open(addr, Some("alice"), true).await;
    call(&mut host, 1, "createMeeting", json!({"meetingId": meeting})).await;
    call(&mut host, 2, "joinMeeting", json!({"meetingId": meeting})).await;

    send(
        &mut host,
        json!({"id": 3, "event": "closeProducer", "data": {"producerId": "gone"}}),
    )
    .await;
    send(
        &mut host,
        json!({"id": 4, "event": "listRoomMembers"}),
    )
    .await;

    // The first reply on the socket answers the second request
    let first = recv_matching(&mut host, |frame| frame.get("id").is_some()).await;
    assert_eq!(first["id"], 4);
    assert_eq!(first["res"], json!([]));
}

#[tokio::test]
async fn test_socket_close_disconnects() {
    let (gateway, addr) = start_server().await;
    let meeting = random_meeting_id();

    let mut host = open(addr, Some("alice"), true).await;
    call(&mut host, 1, "createMeeting", json!({"meetingId": meeting})).await;
    call(&mut host, 2, "joinMeeting", json!({"meetingId": meeting})).await;

    // No name header: the default display name applies
    let mut guest = open(addr, None, false).await;
    call(&mut guest, 1, "joinMeeting", json!({"meetingId": meeting})).await;
    let joined = push(&mut host, "userJoinedWaitingArea").await;
    assert_eq!(joined["data"]["user"]["name"], "User");

    guest.close(None).await.unwrap();

    let left = push(&mut host, "userLeftWaitingArea").await;
    assert_eq!(left["data"]["user"]["id"], joined["data"]["user"]["id"]);

    let pending = call(&mut host, 3, "listPendingMembers", Value::Null).await;
    assert_eq!(pending["res"], json!([]));

    let status = gateway.handle.get_status().await.unwrap();
    assert_eq!(status.meeting_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_leave_closes_socket() {
    let (_gateway, addr) = start_server().await;

    for _ in 0..10 {
        let meeting = random_meeting_id();
        let mut host = open(addr, Some("alice"), true).await;
        call(&mut host, 1, "createMeeting", json!({"meetingId": meeting})).await;
        call(&mut host, 2, "joinMeeting", json!({"meetingId": meeting})).await;

        let left = call(&mut host, 3, "leaveMeeting", Value::Null).await;
        assert_eq!(
            left,
            json!({"id": 3, "type": "success", "res": "Left room successfully"})
        );

        // The server closes its side; the stream ends on a close frame or EOF
        let closed = tokio::time::timeout(FRAME_TIMEOUT, async {
            loop {
                match host.next().await {
                    None | Some(Ok(Message::Close(_)) | Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "socket still open after leaveMeeting");
    }
}
