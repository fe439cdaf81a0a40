use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use comms::{
    message::{JamMessage, PlaybackFrame},
    transport::client::{self, CommandWriter, EventStream},
};
use jam_server::{
    collaborators::{HeaderIdentityProvider, StaticTrackResolver},
    gateway::{self, AppState, CreateRoomResponse},
    room_manager::{RoomManager, RoomSettings},
};
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

const WAIT: Duration = Duration::from_secs(5);
/// Every event of a room on this track is large enough to fill socket buffers quickly
const BULKY_TRACK_LEN: usize = 256 * 1024;

fn bulky_track() -> String {
    "b".repeat(BULKY_TRACK_LEN)
}

struct TestServer {
    addr: SocketAddr,
    room_manager: Arc<RoomManager>,
    sessions: TaskTracker,
    shutdown: CancellationToken,
}

impl TestServer {
    async fn start() -> TestServer {
        Self::start_with(RoomSettings::default()).await
    }

    async fn start_with(settings: RoomSettings) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let room_manager = Arc::new(RoomManager::new(
            Arc::new(StaticTrackResolver::new([
                String::from("t1"),
                String::from("t2"),
                bulky_track(),
            ])),
            settings,
        ));
        let shutdown = CancellationToken::new();
        let sessions = TaskTracker::new();

        tokio::spawn(gateway::serve(
            listener,
            AppState {
                room_manager: room_manager.clone(),
                identity: Arc::new(HeaderIdentityProvider::default()),
                shutdown: shutdown.clone(),
                sessions: sessions.clone(),
                max_frame_bytes: 64 * 1024,
            },
        ));

        TestServer {
            addr,
            room_manager,
            sessions,
            shutdown,
        }
    }

    async fn create_room(&self, host_id: &str, track_id: &str, position: u64) -> String {
        let response = reqwest::Client::new()
            .post(format!("http://{}/jam", self.addr))
            .header(comms::USER_ID_HEADER, host_id)
            .json(&serde_json::json!({ "trackId": track_id, "position": position }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);

        let created: CreateRoomResponse = response.json().await.unwrap();
        assert_eq!(created.host_id, host_id);
        created.room_id
    }

    async fn connect(&self, room_id: &str, user_id: &str) -> (EventStream, CommandWriter) {
        client::connect(&format!("ws://{}/jam/{}", self.addr, room_id), user_id)
            .await
            .unwrap()
    }

    /// Connect and consume the join snapshot
    async fn join(&self, room_id: &str, user_id: &str) -> (EventStream, CommandWriter, PlaybackFrame) {
        let (mut events, commands) = self.connect(room_id, user_id).await;
        match next_event(&mut events).await {
            JamMessage::Join(snapshot) => (events, commands, snapshot),
            other => panic!("expected a join snapshot, got {:?}", other),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn next_event(events: &mut EventStream) -> JamMessage {
    tokio::time::timeout(WAIT, events.next())
        .await
        .expect("timed out waiting for an event")
        .expect("connection closed")
        .expect("could not decode event")
}

/// Wait for the server to close the connection, returning the events sent before that
async fn drain_until_closed(events: &mut EventStream) -> Vec<JamMessage> {
    let mut drained = Vec::new();
    loop {
        match tokio::time::timeout(WAIT, events.next())
            .await
            .expect("timed out waiting for the connection to close")
        {
            Some(Ok(event)) => drained.push(event),
            Some(Err(_)) | None => return drained,
        }
    }
}

async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn frame(user_id: &str, track_id: &str, position: u64, paused: bool) -> PlaybackFrame {
    PlaybackFrame {
        track_id: track_id.into(),
        position,
        paused,
        user_id: user_id.into(),
    }
}

fn command(position: u64) -> PlaybackFrame {
    PlaybackFrame {
        position,
        ..PlaybackFrame::default()
    }
}

#[tokio::test]
async fn host_creates_a_paused_room() {
    let server = TestServer::start().await;

    let room_id = server.create_room("host", "t1", 0).await;

    assert!(server.room_manager.contains(&room_id).await);
    assert_eq!(server.room_manager.member_count(&room_id).await.unwrap(), 1);
    assert_eq!(
        server.room_manager.snapshot(&room_id).await.unwrap(),
        frame("host", "t1", 0, true)
    );
}

#[tokio::test]
async fn joiner_receives_the_room_snapshot() {
    let server = TestServer::start().await;
    let room_id = server.create_room("host", "t1", 0).await;
    let (mut host_events, _host_commands, host_snapshot) = server.join(&room_id, "host").await;
    assert_eq!(host_snapshot, frame("host", "t1", 0, true));

    let (_guest_events, _guest_commands, snapshot) = server.join(&room_id, "guest").await;

    assert_eq!(snapshot, frame("guest", "t1", 0, true));
    assert_eq!(
        next_event(&mut host_events).await,
        JamMessage::Join(frame("guest", "t1", 0, true))
    );
    assert_eq!(server.room_manager.member_count(&room_id).await.unwrap(), 2);
}

#[tokio::test]
async fn pause_reaches_every_member() {
    let server = TestServer::start().await;
    let room_id = server.create_room("host", "t1", 0).await;
    let (mut host_events, mut host_commands, _) = server.join(&room_id, "host").await;
    let (mut guest_events, _guest_commands, _) = server.join(&room_id, "guest").await;
    // the host learns about the guest first
    next_event(&mut host_events).await;

    host_commands
        .write(&JamMessage::Pause(command(5000)))
        .await
        .unwrap();

    let expected = JamMessage::Pause(frame("host", "t1", 5000, true));
    assert_eq!(next_event(&mut host_events).await, expected);
    assert_eq!(next_event(&mut guest_events).await, expected);
}

#[tokio::test]
async fn play_round_trip_uses_the_authenticated_identity() {
    let server = TestServer::start().await;
    let room_id = server.create_room("host", "t1", 0).await;
    let (mut host_events, _host_commands, _) = server.join(&room_id, "host").await;
    let (mut guest_events, mut guest_commands, _) = server.join(&room_id, "guest").await;
    next_event(&mut host_events).await;

    guest_commands
        .write(&JamMessage::Play(PlaybackFrame {
            track_id: "t2".into(),
            position: 1200,
            paused: true,
            user_id: "someone-else".into(),
        }))
        .await
        .unwrap();

    let expected = JamMessage::Play(frame("guest", "t1", 1200, false));
    assert_eq!(next_event(&mut guest_events).await, expected);
    assert_eq!(next_event(&mut host_events).await, expected);

    let snapshot = server.room_manager.snapshot(&room_id).await.unwrap();
    assert!(!snapshot.paused);
    assert!(snapshot.position >= 1200);
}

#[tokio::test]
async fn abrupt_disconnect_is_announced_as_a_leave() {
    let server = TestServer::start().await;
    let room_id = server.create_room("host", "t1", 0).await;
    let (mut host_events, _host_commands, _) = server.join(&room_id, "host").await;
    let (guest_events, guest_commands, _) = server.join(&room_id, "guest").await;
    next_event(&mut host_events).await;
    assert_eq!(server.room_manager.member_count(&room_id).await.unwrap(), 2);

    drop(guest_events);
    drop(guest_commands);

    assert_eq!(
        next_event(&mut host_events).await,
        JamMessage::Leave(frame("guest", "t1", 0, true))
    );
    eventually(|| async { server.room_manager.member_count(&room_id).await.ok() == Some(1) })
        .await;
}

#[tokio::test]
async fn join_of_unknown_room_creates_nothing() {
    let server = TestServer::start().await;

    let rejected = client::connect(&format!("ws://{}/jam/unknownRoom", server.addr), "guest").await;

    assert!(rejected.is_err());
    assert_eq!(server.room_manager.room_count().await, 0);
    assert!(server.room_manager.get_room("unknownRoom").await.is_err());
}

#[tokio::test]
async fn last_member_leaving_removes_the_room() {
    let server = TestServer::start().await;
    let room_id = server.create_room("host", "t1", 0).await;
    let (mut host_events, mut host_commands, _) = server.join(&room_id, "host").await;

    host_commands
        .write(&JamMessage::Leave(PlaybackFrame::default()))
        .await
        .unwrap();

    // the leaving member stops listening before the room closes
    let remaining = drain_until_closed(&mut host_events).await;
    assert!(remaining.is_empty());
    eventually(|| async { !server.room_manager.contains(&room_id).await }).await;
    assert!(server.room_manager.get_room(&room_id).await.is_err());

    let rejected = client::connect(&format!("ws://{}/jam/{}", server.addr, room_id), "host").await;
    assert!(rejected.is_err());
}

#[tokio::test]
async fn host_leaving_closes_the_room_for_everyone() {
    let server = TestServer::start().await;
    let room_id = server.create_room("host", "t1", 0).await;
    let (mut host_events, host_commands, _) = server.join(&room_id, "host").await;
    let (mut guest_events, _guest_commands, _) = server.join(&room_id, "guest").await;
    next_event(&mut host_events).await;

    drop(host_events);
    drop(host_commands);

    let remaining = drain_until_closed(&mut guest_events).await;
    assert_eq!(remaining, vec![JamMessage::Leave(frame("host", "t1", 0, true))]);
    eventually(|| async { server.room_manager.room_count().await == 0 }).await;
}

#[tokio::test]
async fn members_observe_commands_in_the_same_order() {
    let server = TestServer::start().await;
    let room_id = server.create_room("host", "t1", 0).await;
    let (mut host_events, mut host_commands, _) = server.join(&room_id, "host").await;
    let (mut a_events, mut a_commands, _) = server.join(&room_id, "a").await;
    next_event(&mut host_events).await;
    let (mut b_events, _b_commands, _) = server.join(&room_id, "b").await;
    next_event(&mut host_events).await;
    next_event(&mut a_events).await;

    let host_writes = async {
        for position in 0..20 {
            host_commands
                .write(&JamMessage::Seek(command(position)))
                .await
                .unwrap();
        }
    };
    let a_writes = async {
        for position in 100..120 {
            a_commands
                .write(&JamMessage::Seek(command(position)))
                .await
                .unwrap();
        }
    };
    tokio::join!(host_writes, a_writes);

    let mut observed = Vec::new();
    for events in [&mut host_events, &mut a_events, &mut b_events] {
        let mut seen = Vec::new();
        for _ in 0..40 {
            seen.push(next_event(events).await);
        }
        observed.push(seen);
    }

    assert_eq!(observed[0], observed[1]);
    assert_eq!(observed[1], observed[2]);
}

#[tokio::test]
async fn malformed_frame_closes_only_that_connection() {
    let server = TestServer::start().await;
    let room_id = server.create_room("host", "t1", 0).await;
    let (mut host_events, _host_commands, _) = server.join(&room_id, "host").await;
    let (mut guest_events, mut guest_commands, _) = server.join(&room_id, "guest").await;
    next_event(&mut host_events).await;

    guest_commands
        .write_raw(r#"{"type":"rewind","position":3}"#)
        .await
        .unwrap();

    let remaining = drain_until_closed(&mut guest_events).await;
    assert!(matches!(remaining.as_slice(), [JamMessage::Error(_)]));
    assert_eq!(
        next_event(&mut host_events).await,
        JamMessage::Leave(frame("guest", "t1", 0, true))
    );
    assert!(server.room_manager.contains(&room_id).await);
}

#[tokio::test]
async fn rejected_commands_keep_the_connection_open() {
    let server = TestServer::start().await;
    let room_id = server.create_room("host", "t1", 0).await;
    let (mut host_events, mut host_commands, _) = server.join(&room_id, "host").await;

    host_commands
        .write(&JamMessage::Join(PlaybackFrame::default()))
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut host_events).await,
        JamMessage::Error(e) if e.user_id == "host"
    ));

    host_commands
        .write(&JamMessage::Seek(command(42)))
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut host_events).await,
        JamMessage::Seek(frame("host", "t1", 42, true))
    );
}

#[tokio::test]
async fn second_connection_of_a_member_is_rejected() {
    let server = TestServer::start().await;
    let room_id = server.create_room("host", "t1", 0).await;
    let (_host_events, _host_commands, _) = server.join(&room_id, "host").await;

    let (mut events, _commands) = server.connect(&room_id, "host").await;

    let remaining = drain_until_closed(&mut events).await;
    assert!(matches!(remaining.as_slice(), [JamMessage::Error(e)] if e.error.contains("already joined")));
    assert_eq!(server.room_manager.member_count(&room_id).await.unwrap(), 1);
}

#[tokio::test]
async fn full_room_rejects_new_members() {
    let server = TestServer::start_with(RoomSettings {
        max_members: Some(2),
        ..RoomSettings::default()
    })
    .await;
    let room_id = server.create_room("host", "t1", 0).await;
    let (_guest_events, _guest_commands, _) = server.join(&room_id, "guest").await;

    let (mut events, _commands) = server.connect(&room_id, "late").await;

    let remaining = drain_until_closed(&mut events).await;
    assert!(matches!(remaining.as_slice(), [JamMessage::Error(e)] if e.error == "room is full"));

    // the host's seat stays reserved
    let (_host_events, _host_commands, snapshot) = server.join(&room_id, "host").await;
    assert_eq!(snapshot.user_id, "host");
}

#[tokio::test]
async fn leaving_twice_has_no_further_effect() {
    let server = TestServer::start().await;
    let room_id = server.create_room("host", "t1", 0).await;
    let (mut host_events, _host_commands, _) = server.join(&room_id, "host").await;
    let (mut guest_events, mut guest_commands, _) = server.join(&room_id, "guest").await;
    next_event(&mut host_events).await;

    guest_commands
        .write(&JamMessage::Leave(PlaybackFrame::default()))
        .await
        .unwrap();
    // a second leave on a closing connection is either ignored or never read
    let _ = guest_commands
        .write(&JamMessage::Leave(PlaybackFrame::default()))
        .await;
    drain_until_closed(&mut guest_events).await;

    assert_eq!(
        next_event(&mut host_events).await,
        JamMessage::Leave(frame("guest", "t1", 0, true))
    );
    eventually(|| async { server.room_manager.member_count(&room_id).await.ok() == Some(1) })
        .await;

    // nothing else was broadcast about the guest
    assert!(
        tokio::time::timeout(Duration::from_millis(200), host_events.next())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn member_that_stops_reading_is_dropped_and_its_session_ends() {
    let server = TestServer::start_with(RoomSettings {
        outbox_capacity: 4,
        ..RoomSettings::default()
    })
    .await;
    let room_id = server.create_room("host", &bulky_track(), 0).await;
    let (mut host_events, mut host_commands, _) = server.join(&room_id, "host").await;
    // joined but never read from again
    let (_stalled_events, _stalled_commands, _) = server.join(&room_id, "stalled").await;
    assert!(matches!(next_event(&mut host_events).await, JamMessage::Join(_)));

    let mut position = 0;
    loop {
        host_commands
            .write(&JamMessage::Seek(command(position)))
            .await
            .unwrap();
        match next_event(&mut host_events).await {
            JamMessage::Seek(_) => {}
            JamMessage::Leave(frame) if frame.user_id == "stalled" => break,
            other => panic!("unexpected event {:?}", other),
        }
        position += 1;
        assert!(position < 1_000, "the stalled member was never dropped");
    }

    assert_eq!(server.room_manager.member_count(&room_id).await.unwrap(), 1);
    eventually(|| async { server.sessions.len() == 1 }).await;

    server.shutdown.cancel();
    server.sessions.close();
    assert!(tokio::time::timeout(WAIT, server.sessions.wait()).await.is_ok());
}

#[tokio::test]
async fn shutdown_does_not_wait_for_a_stalled_reader() {
    let server = TestServer::start_with(RoomSettings {
        outbox_capacity: 1_024,
        ..RoomSettings::default()
    })
    .await;
    let room_id = server.create_room("host", &bulky_track(), 0).await;
    let (mut host_events, mut host_commands, _) = server.join(&room_id, "host").await;
    let (_stalled_events, _stalled_commands, _) = server.join(&room_id, "stalled").await;
    next_event(&mut host_events).await;

    // far more than the socket buffers between the server and the stalled client hold
    for position in 0..128 {
        host_commands
            .write(&JamMessage::Seek(command(position)))
            .await
            .unwrap();
        assert!(matches!(next_event(&mut host_events).await, JamMessage::Seek(_)));
    }
    assert_eq!(server.room_manager.member_count(&room_id).await.unwrap(), 2);

    server.shutdown.cancel();
    server.sessions.close();

    assert!(
        tokio::time::timeout(WAIT, server.sessions.wait()).await.is_ok(),
        "a session kept shutdown waiting"
    );
}
