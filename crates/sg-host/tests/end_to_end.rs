//! End-to-end tests over real sockets
//!
//! A test client drives the full wire protocol: SRP handshake, sealed
//! session request, forwarding through a shared worker, and the close
//! paths for authorization, spawn failure, OS logoff and shutdown.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use sg_core::secure::{Side, TrafficCrypto};
use sg_core::srp::ClientHandshake;
use sg_core::users::{UserGroup, UserStore};
use sg_protocol::{CloseReason, FrameCodec, Message, OsSessionId, SessionKind};

use sg_host::monitor::EventFeed;
use sg_host::{HostServer, HostState};

use common::{FakeSpawner, WorkerMode};

struct TestHost {
    addr: SocketAddr,
    feed: EventFeed,
    cancel: CancellationToken,
    state: Arc<HostState>,
}

async fn start_host(mode: WorkerMode) -> (TestHost, Arc<FakeSpawner>) {
    let mut users = UserStore::new();
    users.insert("alice", "hunter2", UserGroup::User);
    users.insert("vera", "viewonly", UserGroup::Viewer);

    let state = Arc::new(HostState::new(common::test_config(), users));
    let spawner = Arc::new(FakeSpawner::new(mode));
    let cancel = CancellationToken::new();

    let server = Arc::new(HostServer::new(
        Arc::clone(&state),
        spawner.clone(),
        cancel.clone(),
    ));
    let feed = server.event_feed();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn({
        let server = Arc::clone(&server);
        async move {
            server.serve(listener).await.unwrap();
        }
    });

    (
        TestHost {
            addr,
            feed,
            cancel,
            state,
        },
        spawner,
    )
}

struct TestClient {
    framed: Framed<TcpStream, FrameCodec>,
    crypto: Option<TrafficCrypto>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(stream, FrameCodec::new()),
            crypto: None,
        }
    }

    async fn send_clear(&mut self, message: &Message) {
        let payload = bincode::serialize(message).unwrap();
        self.framed.send(Bytes::from(payload)).await.unwrap();
    }

    async fn recv_clear(&mut self) -> Message {
        let frame = timeout(Duration::from_secs(2), self.framed.next())
            .await
            .expect("timed out waiting for reply")
            .expect("connection closed")
            .expect("frame error");
        bincode::deserialize(&frame).unwrap()
    }

    async fn send(&mut self, message: &Message) {
        let payload = bincode::serialize(message).unwrap();
        let sealed = self.crypto.as_mut().expect("not authenticated").seal(&payload);
        self.framed.send(Bytes::from(sealed)).await.unwrap();
    }

    async fn recv(&mut self) -> Message {
        let frame = timeout(Duration::from_secs(2), self.framed.next())
            .await
            .expect("timed out waiting for reply")
            .expect("connection closed")
            .expect("frame error");
        let plain = self
            .crypto
            .as_mut()
            .expect("not authenticated")
            .open(&frame)
            .unwrap();
        bincode::deserialize(&plain).unwrap()
    }

    /// Run one handshake attempt; returns the server's answer to the proof
    async fn try_auth(&mut self, username: &str, password: &str) -> Message {
        self.send_clear(&Message::Hello {
            username: username.to_string(),
        })
        .await;

        let (salt, server_public) = match self.recv_clear().await {
            Message::Challenge {
                salt,
                server_public,
            } => (salt, server_public),
            other => panic!("expected challenge, got {:?}", other),
        };

        let handshake = ClientHandshake::new(username, password);
        let proof = handshake.respond(&salt, &server_public).unwrap();
        self.send_clear(&Message::Proof {
            client_public: proof.client_public.clone(),
            evidence: proof.evidence.clone(),
        })
        .await;

        let reply = self.recv_clear().await;
        if let Message::Confirm { evidence } = &reply {
            proof.verify_server(evidence).unwrap();
            self.crypto = Some(TrafficCrypto::derive(&proof.shared_key, Side::Client));
        }
        reply
    }

    /// Authenticate and open a session; panics on refusal
    async fn open_session(&mut self, username: &str, password: &str, kind: SessionKind, os: u32) {
        let reply = self.try_auth(username, password).await;
        assert!(matches!(reply, Message::Confirm { .. }), "auth failed: {:?}", reply);

        self.send(&Message::SessionRequest {
            kind,
            os_session: OsSessionId::new(os),
        })
        .await;
        match self.recv().await {
            Message::SessionAccepted => {}
            other => panic!("session refused: {:?}", other),
        }
    }
}

#[tokio::test]
async fn full_flow_with_shared_session_and_logoff() {
    let (host, spawner) = start_host(WorkerMode::Echo).await;

    // First client authenticates and opens desktop-manage on OS session 2
    let mut first = TestClient::connect(host.addr).await;
    first
        .open_session("alice", "hunter2", SessionKind::DesktopManage, 2)
        .await;

    first.send(&Message::Data(Bytes::from_static(b"hello"))).await;
    match first.recv().await {
        Message::Data(data) => assert_eq!(data.as_ref(), b"hello"),
        other => panic!("expected echoed data, got {:?}", other),
    }

    // Second client shares the same session; no second worker
    let mut second = TestClient::connect(host.addr).await;
    second
        .open_session("alice", "hunter2", SessionKind::DesktopManage, 2)
        .await;
    assert_eq!(spawner.spawn_count(), 1);

    // Worker output fans out to every attached connection
    second.send(&Message::Data(Bytes::from_static(b"shared"))).await;
    match second.recv().await {
        Message::Data(data) => assert_eq!(data.as_ref(), b"shared"),
        other => panic!("expected echoed data, got {:?}", other),
    }
    match first.recv().await {
        Message::Data(data) => assert_eq!(data.as_ref(), b"shared"),
        other => panic!("expected fanned-out data, got {:?}", other),
    }

    // OS logoff forces both connections closed and removes the session
    host.feed
        .push(sg_protocol::SessionStatusEvent {
            os_session: OsSessionId::new(2),
            status: sg_protocol::SessionStatus::Logoff,
        })
        .await;

    assert!(matches!(
        first.recv().await,
        Message::Close {
            reason: CloseReason::SessionTerminated
        }
    ));
    assert!(matches!(
        second.recv().await,
        Message::Close {
            reason: CloseReason::SessionTerminated
        }
    ));

    sleep(Duration::from_millis(50)).await;
    assert!(host.state.snapshot.is_empty());
}

#[tokio::test]
async fn wrong_password_is_denied_then_retry_succeeds() {
    let (host, _spawner) = start_host(WorkerMode::Echo).await;
    let mut client = TestClient::connect(host.addr).await;

    let reply = client.try_auth("alice", "wrong").await;
    assert!(matches!(reply, Message::Denied { attempts_left: 2 }));

    let reply = client.try_auth("alice", "hunter2").await;
    assert!(matches!(reply, Message::Confirm { .. }));
}

#[tokio::test]
async fn attempts_ceiling_closes_the_connection() {
    let (host, _spawner) = start_host(WorkerMode::Echo).await;
    let mut client = TestClient::connect(host.addr).await;

    assert!(matches!(
        client.try_auth("alice", "bad1").await,
        Message::Denied { attempts_left: 2 }
    ));
    assert!(matches!(
        client.try_auth("alice", "bad2").await,
        Message::Denied { attempts_left: 1 }
    ));
    assert!(matches!(
        client.try_auth("alice", "bad3").await,
        Message::Close {
            reason: CloseReason::AuthenticationFailed
        }
    ));
}

#[tokio::test]
async fn unknown_username_is_indistinguishable_on_the_wire() {
    let (host, _spawner) = start_host(WorkerMode::Echo).await;

    let mut known = TestClient::connect(host.addr).await;
    let known_reply = known.try_auth("alice", "wrong").await;

    let mut unknown = TestClient::connect(host.addr).await;
    let unknown_reply = unknown.try_auth("mallory", "whatever").await;

    // Same message type, same attempts remaining; the challenge was equally
    // well-formed or the handshake math above would have panicked
    match (known_reply, unknown_reply) {
        (
            Message::Denied { attempts_left: a },
            Message::Denied { attempts_left: b },
        ) => assert_eq!(a, b),
        other => panic!("expected both denied, got {:?}", other),
    }
}

#[tokio::test]
async fn viewer_may_not_open_desktop_manage() {
    let (host, spawner) = start_host(WorkerMode::Echo).await;
    let mut client = TestClient::connect(host.addr).await;

    let reply = client.try_auth("vera", "viewonly").await;
    assert!(matches!(reply, Message::Confirm { .. }));

    client
        .send(&Message::SessionRequest {
            kind: SessionKind::DesktopManage,
            os_session: OsSessionId::new(2),
        })
        .await;

    assert!(matches!(
        client.recv().await,
        Message::SessionRefused {
            reason: CloseReason::NotAuthorized
        }
    ));
    assert_eq!(spawner.spawn_count(), 0);
}

#[tokio::test]
async fn viewer_may_open_desktop_view() {
    let (host, _spawner) = start_host(WorkerMode::Echo).await;
    let mut client = TestClient::connect(host.addr).await;
    client
        .open_session("vera", "viewonly", SessionKind::DesktopView, 2)
        .await;
}

#[tokio::test]
async fn spawn_failure_is_reported_to_the_client() {
    let (host, _spawner) = start_host(WorkerMode::Refuse).await;
    let mut client = TestClient::connect(host.addr).await;

    let reply = client.try_auth("alice", "hunter2").await;
    assert!(matches!(reply, Message::Confirm { .. }));

    client
        .send(&Message::SessionRequest {
            kind: SessionKind::FileTransfer,
            os_session: OsSessionId::new(1),
        })
        .await;

    assert!(matches!(
        client.recv().await,
        Message::SessionRefused {
            reason: CloseReason::SpawnFailed
        }
    ));
}

#[tokio::test]
async fn shutdown_closes_attached_clients_with_reason() {
    let (host, _spawner) = start_host(WorkerMode::Echo).await;

    let mut client = TestClient::connect(host.addr).await;
    client
        .open_session("alice", "hunter2", SessionKind::DesktopManage, 1)
        .await;

    host.cancel.cancel();

    assert!(matches!(
        client.recv().await,
        Message::Close {
            reason: CloseReason::ServerShutdown
        }
    ));
}
