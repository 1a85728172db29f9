//! Worker channel loop
//!
//! Speaks the session channel framing on the streams the host handed us:
//! `Ready` first, then protocol payloads through the service, then a clean
//! exit on `Terminate`. Nothing is flushed or persisted on the way out.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use sg_protocol::{ChannelMessage, MessageCodec};

use crate::service::SessionService;

/// Run one session over the given channel streams until the host closes
/// it or asks us to terminate.
pub async fn run_session<R, W>(
    reader: R,
    writer: W,
    mut service: Box<dyn SessionService>,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut source = FramedRead::new(reader, MessageCodec::<ChannelMessage>::new());
    let mut sink = FramedWrite::new(writer, MessageCodec::<ChannelMessage>::new());

    // Readiness must beat the host's spawn timeout
    sink.send(ChannelMessage::Ready {
        pid: std::process::id(),
    })
    .await?;

    while let Some(message) = source.next().await {
        match message? {
            ChannelMessage::Data(data) => {
                if let Some(reply) = service.handle(data).await? {
                    sink.send(ChannelMessage::Data(reply)).await?;
                }
            }
            ChannelMessage::Status(status) => service.on_status(status),
            ChannelMessage::Terminate => {
                tracing::info!("Terminate received; exiting");
                sink.send(ChannelMessage::Exited { code: Some(0) }).await?;
                return Ok(());
            }
            other => {
                tracing::warn!("Unexpected message from host: {:?}", other);
            }
        }
    }

    tracing::info!("Host closed the channel; exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::service_for;
    use bytes::Bytes;
    use sg_protocol::SessionKind;
    use tokio_util::codec::Framed;

    /// Host-side framed handle over a duplex pair running one session
    fn start_session(
        kind: SessionKind,
    ) -> Framed<tokio::io::DuplexStream, MessageCodec<ChannelMessage>> {
        let (host_io, worker_io) = tokio::io::duplex(4096);
        let (worker_read, worker_write) = tokio::io::split(worker_io);
        tokio::spawn(async move {
            let _ = run_session(worker_read, worker_write, service_for(kind)).await;
        });
        Framed::new(host_io, MessageCodec::<ChannelMessage>::new())
    }

    #[tokio::test]
    async fn test_ready_comes_first() {
        let mut host = start_session(SessionKind::DesktopManage);
        assert!(matches!(
            host.next().await.unwrap().unwrap(),
            ChannelMessage::Ready { .. }
        ));
    }

    #[tokio::test]
    async fn test_payloads_are_serviced() {
        let mut host = start_session(SessionKind::FileTransfer);
        host.next().await.unwrap().unwrap(); // Ready

        host.send(ChannelMessage::Data(Bytes::from_static(b"chunk")))
            .await
            .unwrap();
        match host.next().await.unwrap().unwrap() {
            ChannelMessage::Data(data) => assert_eq!(data.as_ref(), b"chunk"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_terminate_produces_clean_exit() {
        let mut host = start_session(SessionKind::DesktopManage);
        host.next().await.unwrap().unwrap(); // Ready

        host.send(ChannelMessage::Terminate).await.unwrap();
        assert!(matches!(
            host.next().await.unwrap().unwrap(),
            ChannelMessage::Exited { code: Some(0) }
        ));
        // Channel closes after the exit announcement
        assert!(host.next().await.is_none());
    }
}
