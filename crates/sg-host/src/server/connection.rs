//! Per-connection handling
//!
//! Each accepted connection runs this pipeline in its own task:
//! handshake → sealed session request → entitlement check → registry
//! attach → bidirectional forwarding. Failures here are connection-local;
//! only the registry decides anything session-scoped.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use sg_core::secure::{Side, TrafficCrypto};
use sg_core::users::UserStore;
use sg_core::{AuthError, HostError};
use sg_protocol::{CloseReason, FrameCodec, Message, ProtocolError, SessionKey};

use crate::auth::{AuthOutcome, AuthSuccess, Negotiator};
use crate::registry::{Attachment, RegistryHandle, SessionOutput};
use crate::state::HostState;

type Transport = Framed<TcpStream, FrameCodec>;

pub(crate) async fn handle_connection(
    socket: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<HostState>,
    registry: RegistryHandle,
    cancel: CancellationToken,
) -> Result<(), HostError> {
    let mut framed = Framed::new(socket, FrameCodec::new());
    let config = &state.config;

    let success = tokio::time::timeout(
        config.handshake_timeout,
        authenticate(&mut framed, &state.users, config.max_auth_attempts),
    )
    .await
    .map_err(|_| AuthError::Timeout)??;

    let mut crypto = TrafficCrypto::derive(&success.shared_key, Side::Host);

    // The first sealed application message selects the session
    let request = tokio::time::timeout(
        config.handshake_timeout,
        recv_sealed(&mut framed, &mut crypto),
    )
    .await
    .map_err(|_| AuthError::Timeout)??;

    let (kind, os_session) = match request {
        Message::SessionRequest { kind, os_session } => (kind, os_session),
        other => {
            tracing::warn!("Expected session request from {}, got {:?}", peer_addr, other);
            return Err(ProtocolError::UnexpectedMessage {
                state: "session-request",
            }
            .into());
        }
    };

    if !success.group.may_open(kind) {
        let _ = send_sealed(
            &mut framed,
            &mut crypto,
            &Message::SessionRefused {
                reason: CloseReason::NotAuthorized,
            },
        )
        .await;
        return Err(AuthError::NotEntitled { kind }.into());
    }

    let key = SessionKey::new(os_session, kind);
    let attachment = match registry.attach(key, &success.username).await {
        Ok(attachment) => attachment,
        Err(e) => {
            let _ = send_sealed(
                &mut framed,
                &mut crypto,
                &Message::SessionRefused {
                    reason: close_reason(&e),
                },
            )
            .await;
            return Err(e);
        }
    };

    if let Err(e) = send_sealed(&mut framed, &mut crypto, &Message::SessionAccepted).await {
        registry.detach(key, attachment.id).await;
        return Err(e);
    }
    tracing::info!(
        "{} attached to {} from {}",
        success.username,
        key,
        peer_addr
    );

    forward(framed, crypto, attachment, registry, cancel).await
}

/// Drive the handshake until it succeeds or fails
async fn authenticate(
    framed: &mut Transport,
    users: &UserStore,
    max_attempts: u32,
) -> Result<AuthSuccess, HostError> {
    let mut negotiator = Negotiator::new(users, max_attempts);

    loop {
        let frame = match framed.next().await {
            Some(frame) => frame?,
            None => {
                return Err(HostError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed during handshake",
                )))
            }
        };
        let message: Message =
            bincode::deserialize(&frame).map_err(ProtocolError::from)?;

        match negotiator.process(message) {
            AuthOutcome::Continue(reply) => send_clear(framed, &reply).await?,
            AuthOutcome::Success(success) => {
                send_clear(
                    framed,
                    &Message::Confirm {
                        evidence: success.evidence.clone(),
                    },
                )
                .await?;
                return Ok(success);
            }
            AuthOutcome::Failure(e) => {
                let _ = send_clear(
                    framed,
                    &Message::Close {
                        reason: CloseReason::AuthenticationFailed,
                    },
                )
                .await;
                return Err(e.into());
            }
        }
    }
}

/// Forward between the network and the session until either side closes
async fn forward(
    mut framed: Transport,
    mut crypto: TrafficCrypto,
    mut attachment: Attachment,
    registry: RegistryHandle,
    cancel: CancellationToken,
) -> Result<(), HostError> {
    // Set when the session itself closed us; no detach needed then
    let mut session_closed = false;

    let result: Result<(), HostError> = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = send_sealed(&mut framed, &mut crypto, &Message::Close {
                    reason: CloseReason::ServerShutdown,
                }).await;
                break Ok(());
            }

            output = attachment.output.recv() => match output {
                Ok(SessionOutput::Data(data)) => {
                    if let Err(e) = send_sealed(&mut framed, &mut crypto, &Message::Data(data)).await {
                        break Err(e);
                    }
                }
                Ok(SessionOutput::Closed(reason)) => {
                    session_closed = true;
                    let _ = send_sealed(&mut framed, &mut crypto, &Message::Close { reason }).await;
                    break Ok(());
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // This client fell too far behind the worker's output
                    tracing::warn!("Connection {} lagged {} frames; closing", attachment.id, n);
                    let _ = send_sealed(&mut framed, &mut crypto, &Message::Close {
                        reason: CloseReason::ChannelFailed,
                    }).await;
                    break Ok(());
                }
                Err(broadcast::error::RecvError::Closed) => {
                    session_closed = true;
                    break Ok(());
                }
            },

            frame = framed.next() => match frame {
                Some(Ok(frame)) => {
                    let plain = match crypto.open(&frame) {
                        Ok(plain) => plain,
                        Err(e) => break Err(e.into()),
                    };
                    let message: Message = match bincode::deserialize(&plain) {
                        Ok(message) => message,
                        Err(e) => break Err(ProtocolError::from(e).into()),
                    };
                    match message {
                        Message::Data(data) => {
                            // Suspends under channel backpressure, which in
                            // turn pauses our reads from the network
                            if let Err(e) = attachment.to_worker.send(data).await {
                                break Err(e.into());
                            }
                        }
                        Message::Close { .. } => break Ok(()),
                        other => {
                            tracing::warn!("Unexpected message mid-session: {:?}", other);
                            break Ok(());
                        }
                    }
                }
                Some(Err(e)) => break Err(e.into()),
                None => break Ok(()),
            },
        }
    };

    if !session_closed {
        registry.detach(attachment.key, attachment.id).await;
    }
    result
}

async fn send_clear(framed: &mut Transport, message: &Message) -> Result<(), HostError> {
    let payload = bincode::serialize(message).map_err(ProtocolError::from)?;
    framed.send(Bytes::from(payload)).await?;
    Ok(())
}

async fn send_sealed(
    framed: &mut Transport,
    crypto: &mut TrafficCrypto,
    message: &Message,
) -> Result<(), HostError> {
    let payload = bincode::serialize(message).map_err(ProtocolError::from)?;
    framed.send(Bytes::from(crypto.seal(&payload))).await?;
    Ok(())
}

async fn recv_sealed(
    framed: &mut Transport,
    crypto: &mut TrafficCrypto,
) -> Result<Message, HostError> {
    let frame = match framed.next().await {
        Some(frame) => frame?,
        None => {
            return Err(HostError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed before session request",
            )))
        }
    };
    let plain = crypto.open(&frame)?;
    Ok(bincode::deserialize(&plain).map_err(ProtocolError::from)?)
}

/// Reason code reported to the client for a refused attach
fn close_reason(error: &HostError) -> CloseReason {
    match error {
        HostError::Auth(AuthError::NotEntitled { .. }) => CloseReason::NotAuthorized,
        HostError::Auth(_) => CloseReason::AuthenticationFailed,
        HostError::Spawn(_) => CloseReason::SpawnFailed,
        HostError::Channel(_) => CloseReason::ChannelFailed,
        _ => CloseReason::SessionTerminated,
    }
}
