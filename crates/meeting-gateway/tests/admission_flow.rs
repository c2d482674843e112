//! Integration tests for meeting creation and host-controlled admission.
//!
//! Drives the public handle API end to end: connections talk to the
//! gateway, which routes to the meeting actor owning the Session and its
//! Pending Pool.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use common::types::MeetingId;
use meeting_gateway::actors::{Response, RoutingStatus, ServerEvent};
use meeting_gateway::errors::GatewayError;
use mg_test_utils::{random_meeting_id, TestGateway};

#[tokio::test]
async fn test_guest_waits_until_host_accepts() {
    let gateway = TestGateway::new();
    let meeting = random_meeting_id();

    let mut host = gateway.host("alice");
    host.create_and_join(&meeting).await;

    let mut guest = gateway.guest("bob");
    let reply = guest.join(&meeting).await.unwrap();
    assert_eq!(reply, Response::ack("Waiting Room Joined Successfully"));

    match host.next_event().await {
        ServerEvent::UserJoinedWaitingArea(notice) => {
            assert_eq!(notice.message, "bob is in waiting room");
            assert_eq!(notice.user.id, guest.id());
            assert!(!notice.user.is_host);
        }
        other => panic!("expected userJoinedWaitingArea, got {other:?}"),
    }

    let pending = host.pending_members().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, guest.id());
    assert_eq!(pending[0].name, "bob");

    // Pending guests cannot negotiate media
    let err = guest.create_transport().await.unwrap_err();
    assert!(matches!(err, GatewayError::NotInMeeting(_)));

    let reply = host.accept(guest.id()).await.unwrap();
    assert_eq!(reply, Response::ack("User accepted successfully"));

    match guest.next_event().await {
        ServerEvent::MemberAccepted(notice) => {
            assert_eq!(notice.message, "User accepted successfully");
        }
        other => panic!("expected memberAccepted, got {other:?}"),
    }
    match host.next_event().await {
        ServerEvent::MemberAccepted(notice) => assert_eq!(notice.message, "bob joined the room"),
        other => panic!("expected memberAccepted, got {other:?}"),
    }

    assert!(host.pending_members().await.unwrap().is_empty());

    let members = host.room_members().await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].id, guest.id());

    let state = gateway
        .handle
        .get_meeting_state(MeetingId::parse(&meeting).unwrap())
        .await
        .unwrap();
    assert_eq!(state.session_members.len(), 2);
    assert!(state.pending_members.is_empty());
}

#[tokio::test]
async fn test_only_hosts_create_and_manage() {
    let gateway = TestGateway::new();
    let meeting = random_meeting_id();

    let guest = gateway.guest("mallory");
    match guest.create_meeting(&meeting).await {
        Err(GatewayError::PermissionDenied(msg)) => {
            assert_eq!(msg, "You are not authorized to create a room");
        }
        other => panic!("expected permission denied, got {other:?}"),
    }

    let host = gateway.host("alice");
    host.create_and_join(&meeting).await;
    guest.join(&meeting).await.unwrap();

    let other_guest = gateway.guest("trudy");
    other_guest.join(&meeting).await.unwrap();

    for result in [
        guest.accept(other_guest.id()).await,
        guest.reject(other_guest.id()).await,
        guest.evict(host.id()).await,
    ] {
        match result {
            Err(GatewayError::PermissionDenied(msg)) => {
                assert_eq!(msg, "You are not authorized to manage members");
            }
            other => panic!("expected permission denied, got {other:?}"),
        }
    }

    assert!(matches!(
        guest.pending_members().await,
        Err(GatewayError::PermissionDenied(_))
    ));
    assert_eq!(host.pending_members().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_meeting_ids_are_unique_and_normalized() {
    let gateway = TestGateway::new();
    let host = gateway.host("alice");

    assert_eq!(
        host.create_meeting("Standup").await.unwrap(),
        Response::ack("Room Created Successfully")
    );
    match host.create_meeting("  standup ").await {
        Err(GatewayError::Conflict(msg)) => assert_eq!(msg, "Room already exists"),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert!(matches!(
        host.create_meeting("   ").await,
        Err(GatewayError::InvalidRequest(_))
    ));

    assert_eq!(
        host.join("STANDUP").await.unwrap(),
        Response::ack("Room Joined Successfully")
    );

    let status = gateway.handle.get_status().await.unwrap();
    assert_eq!(status.meeting_count, 1);
    assert!(!status.is_draining);
}

#[tokio::test]
async fn test_join_unknown_meeting() {
    let gateway = TestGateway::new();

    let host = gateway.host("alice");
    assert!(matches!(
        host.join("nowhere").await,
        Err(GatewayError::MeetingNotFound(_))
    ));

    let guest = gateway.guest("bob");
    assert!(matches!(
        guest.join("nowhere").await,
        Err(GatewayError::WaitingAreaNotFound(_))
    ));
}

#[tokio::test]
async fn test_connection_joins_only_once() {
    let gateway = TestGateway::new();
    let first = random_meeting_id();
    let second = random_meeting_id();

    let host = gateway.host("alice");
    host.create_and_join(&first).await;
    host.create_meeting(&second).await.unwrap();

    match host.join(&second).await {
        Err(GatewayError::Conflict(msg)) => assert_eq!(msg, "You have already joined a meeting"),
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reject_keeps_guest_pending() {
    let gateway = TestGateway::new();
    let meeting = random_meeting_id();

    let mut host = gateway.host("alice");
    host.create_and_join(&meeting).await;
    let mut guest = gateway.guest("bob");
    guest.join(&meeting).await.unwrap();
    host.next_event().await;

    assert_eq!(
        host.reject(guest.id()).await.unwrap(),
        Response::ack("User rejected successfully")
    );
    match guest.next_event().await {
        ServerEvent::MemberRejected(notice) => {
            assert_eq!(notice.message, "User rejected successfully");
        }
        other => panic!("expected memberRejected, got {other:?}"),
    }
    assert_eq!(host.pending_members().await.unwrap().len(), 1);

    // The rejected client leaves on its own
    guest.leave().await.unwrap();
    match host.next_event().await {
        ServerEvent::UserLeftWaitingArea(notice) => {
            assert_eq!(notice.user.id, guest.id());
            assert_eq!(notice.message, "bob left the waiting room");
        }
        other => panic!("expected userLeftWaitingArea, got {other:?}"),
    }
    assert!(host.pending_members().await.unwrap().is_empty());
    assert!(guest.wait_for_event_stream_end().await);
}

#[tokio::test]
async fn test_accept_or_reject_unknown_member() {
    let gateway = TestGateway::new();
    let meeting = random_meeting_id();

    let host = gateway.host("alice");
    host.create_and_join(&meeting).await;
    let stranger = gateway.guest("eve");

    assert!(matches!(
        host.accept(stranger.id()).await,
        Err(GatewayError::ParticipantNotFound(_))
    ));
    assert!(matches!(
        host.reject(stranger.id()).await,
        Err(GatewayError::ParticipantNotFound(_))
    ));
    assert!(matches!(
        host.evict(stranger.id()).await,
        Err(GatewayError::ParticipantNotFound(_))
    ));
}

#[tokio::test]
async fn test_evict_removes_guest_from_session() {
    let gateway = TestGateway::new();
    let meeting = random_meeting_id();

    let mut host = gateway.host("alice");
    host.create_and_join(&meeting).await;
    let mut co_host = gateway.host("carol");
    co_host.join(&meeting).await.unwrap();
    host.next_event().await; // carol joined

    let mut guest = gateway.guest("bob");
    guest.join(&meeting).await.unwrap();
    host.accept(guest.id()).await.unwrap();
    host.drain_events();
    co_host.drain_events();
    guest.next_event().await; // accepted

    // Hosts cannot be evicted
    match host.evict(co_host.id()).await {
        Err(GatewayError::PermissionDenied(msg)) => assert_eq!(msg, "You cannot evict a host"),
        other => panic!("expected permission denied, got {other:?}"),
    }

    assert_eq!(
        host.evict(guest.id()).await.unwrap(),
        Response::ack("User removed from room")
    );
    match guest.next_event().await {
        ServerEvent::MemberEvicted(notice) => assert_eq!(notice.message, "User removed from room"),
        other => panic!("expected memberEvicted, got {other:?}"),
    }
    for client in [&mut host, &mut co_host] {
        match client.next_event().await {
            ServerEvent::UserLeft(notice) => assert_eq!(notice.user.id, guest.id()),
            other => panic!("expected userLeft, got {other:?}"),
        }
    }

    let members = host.room_members().await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].id, co_host.id());
    assert!(matches!(
        guest.room_members().await,
        Err(GatewayError::NotInMeeting(_))
    ));
}

#[tokio::test]
async fn test_leave_after_eviction_still_closes_connection() {
    let gateway = TestGateway::new();
    let meeting = random_meeting_id();

    let host = gateway.host("alice");
    host.create_and_join(&meeting).await;
    let mut guest = gateway.guest("bob");
    guest.join(&meeting).await.unwrap();
    host.accept(guest.id()).await.unwrap();
    host.evict(guest.id()).await.unwrap();
    guest.drain_events();

    assert!(matches!(
        guest.leave().await,
        Err(GatewayError::ParticipantNotFound(_))
    ));
    assert!(guest.wait_for_event_stream_end().await);
    assert!(matches!(
        guest.room_members().await,
        Err(GatewayError::Internal(_))
    ));
}

#[tokio::test]
async fn test_leave_before_join_keeps_connection() {
    let gateway = TestGateway::new();
    let meeting = random_meeting_id();

    let host = gateway.host("alice");
    assert!(matches!(
        host.leave().await,
        Err(GatewayError::NotInMeeting(_))
    ));

    // Still usable afterwards
    host.create_and_join(&meeting).await;
    assert!(host.room_members().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_accepted_guest_media_skips_waiting_guest() {
    let gateway = TestGateway::new();
    let meeting = random_meeting_id();

    let mut host = gateway.host("alice");
    host.create_and_join(&meeting).await;
    host.wait_for_routing().await;

    let mut first = gateway.guest("g1");
    first.join(&meeting).await.unwrap();
    let mut second = gateway.guest("g2");
    second.join(&meeting).await.unwrap();
    assert_eq!(host.pending_members().await.unwrap().len(), 2);

    host.accept(first.id()).await.unwrap();
    first.next_event().await; // accepted
    host.drain_events();
    second.drain_events();

    let transport = first.connected_transport().await;
    let producer_id = first
        .produce(&transport, media_engine::MediaKind::Video)
        .await
        .unwrap();

    match host.next_event().await {
        ServerEvent::NewProducers(entries) => {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].producer_id, producer_id);
            assert_eq!(entries[0].user_id, first.id());
        }
        other => panic!("expected newProducers, got {other:?}"),
    }
    second.assert_no_event().await;

    let pending = host.pending_members().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, second.id());
    assert_eq!(pending[0].name, "g2");
}

#[tokio::test]
async fn test_guests_only_see_hosts() {
    let gateway = TestGateway::new();
    let meeting = random_meeting_id();

    let host = gateway.host("alice");
    host.create_and_join(&meeting).await;

    let mut guests = Vec::new();
    for name in ["bob", "dave"] {
        let guest = gateway.guest(name);
        guest.join(&meeting).await.unwrap();
        host.accept(guest.id()).await.unwrap();
        guests.push(guest);
    }

    let seen_by_host = host.room_members().await.unwrap();
    assert_eq!(seen_by_host.len(), 2);
    assert!(seen_by_host.iter().all(|member| !member.is_host));

    let seen_by_guest = guests[0].room_members().await.unwrap();
    assert_eq!(seen_by_guest.len(), 1);
    assert_eq!(seen_by_guest[0].id, host.id());
    assert!(seen_by_guest[0].is_host);

    // Pending guests may list the room too
    let waiting = gateway.guest("erin");
    waiting.join(&meeting).await.unwrap();
    let seen_while_pending = waiting.room_members().await.unwrap();
    assert_eq!(seen_while_pending.len(), 1);
    assert_eq!(seen_while_pending[0].id, host.id());
}

#[tokio::test]
async fn test_host_departure_notifies_everyone() {
    let gateway = TestGateway::new();
    let meeting = random_meeting_id();

    let mut host = gateway.host("alice");
    host.create_and_join(&meeting).await;
    let mut guest = gateway.guest("bob");
    guest.join(&meeting).await.unwrap();
    host.accept(guest.id()).await.unwrap();
    guest.next_event().await; // accepted

    guest.wait_for_routing().await;

    let mut waiting = gateway.guest("erin");
    waiting.join(&meeting).await.unwrap();
    host.drain_events();

    host.disconnect();

    match guest.next_event().await {
        ServerEvent::UserLeft(notice) => {
            assert_eq!(notice.user.id, host.id());
            assert_eq!(notice.message, "alice left the room");
        }
        other => panic!("expected userLeft, got {other:?}"),
    }
    // Pending Pool members are not told about Session departures
    waiting.assert_no_event().await;
    assert!(host.wait_for_event_stream_end().await);

    let state = gateway
        .handle
        .get_meeting_state(MeetingId::parse(&meeting).unwrap())
        .await
        .unwrap();
    assert_eq!(state.session_members.len(), 1);
    assert_eq!(state.pending_members.len(), 1);
    assert_eq!(state.routing, RoutingStatus::Ready);
}

#[tokio::test]
async fn test_guest_departure_notifies_hosts_only() {
    let gateway = TestGateway::new();
    let meeting = random_meeting_id();

    let mut host = gateway.host("alice");
    host.create_and_join(&meeting).await;

    let mut stays = gateway.guest("bob");
    stays.join(&meeting).await.unwrap();
    host.accept(stays.id()).await.unwrap();
    let goes = gateway.guest("dave");
    goes.join(&meeting).await.unwrap();
    host.accept(goes.id()).await.unwrap();
    host.drain_events();
    stays.next_event().await; // accepted

    assert_eq!(
        goes.leave().await.unwrap(),
        Response::ack("Left room successfully")
    );

    match host.next_event().await {
        ServerEvent::UserLeft(notice) => assert_eq!(notice.user.id, goes.id()),
        other => panic!("expected userLeft, got {other:?}"),
    }
    stays.assert_no_event().await;
}

#[tokio::test]
async fn test_shutdown_stops_accepting_connections() {
    let gateway = TestGateway::new();
    let host = gateway.host("alice");
    host.create_meeting(&random_meeting_id()).await.unwrap();

    gateway.handle.shutdown().await.unwrap();

    assert!(matches!(
        gateway.handle.connect(common::types::ConnectionMetadata::host("late")),
        Err(GatewayError::Draining)
    ));
}
