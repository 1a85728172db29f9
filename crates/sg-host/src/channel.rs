//! Session channel: framed IPC between the host and a worker process
//!
//! A channel is a pair of unidirectional framed streams over the worker's
//! stdio. Outbound traffic goes through a bounded queue drained by a writer
//! task, so `send().await` suspends once the worker stops draining; that
//! suspension is the backpressure signal, and it propagates to whatever is
//! producing (the network forwarding task pauses its reads). A watch flag
//! reports high-water transitions for observers.
//!
//! Channel failure (worker exit, broken pipe, framing error) surfaces as a
//! terminal [`ChannelEvent`], never a silent hang.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite};

use sg_core::ChannelError;
use sg_protocol::{ChannelMessage, MessageCodec};

/// Control queue depth; control messages are few and must never be dropped
const CONTROL_QUEUE: usize = 8;

/// Event queue depth between the channel reader and the session router
const EVENT_QUEUE: usize = 64;

/// Events delivered from a worker's channel
#[derive(Debug)]
pub enum ChannelEvent {
    /// The worker signaled readiness
    Ready {
        /// Worker process ID as reported by the worker
        pid: u32,
    },
    /// Opaque protocol payload from the worker
    Data(Bytes),
    /// The worker announced a clean exit
    Exited {
        /// Exit code, if the protocol termination ended normally
        code: Option<i32>,
    },
    /// The channel broke; terminal
    Failed(ChannelError),
}

/// Cloneable sender for opaque payloads bound for the worker.
///
/// Each clone preserves its own FIFO order; clones held by different
/// connections interleave at frame boundaries, never inside a frame.
#[derive(Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<Bytes>,
    queued: Arc<AtomicUsize>,
    paused: Arc<watch::Sender<bool>>,
    high_water: usize,
}

impl ChannelSender {
    /// Queue a payload for the worker.
    ///
    /// Suspends while the queue is at the high-water mark. Returns
    /// `ChannelError::Closed` once the channel is torn down.
    pub async fn send(&self, data: Bytes) -> Result<(), ChannelError> {
        let depth = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        if depth >= self.high_water {
            let _ = self.paused.send(true);
        }
        self.tx.send(data).await.map_err(|_| {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            ChannelError::Closed
        })
    }
}

/// One open channel to a worker, as handed to the registry
pub struct ChannelPair {
    /// Payload path into the worker
    pub data: ChannelSender,
    /// Control path into the worker (terminate, status pushes)
    pub control: mpsc::Sender<ChannelMessage>,
    /// Events from the worker; exactly one terminal event ends the stream
    pub events: mpsc::Receiver<ChannelEvent>,
    /// High-water flag: true while sends are suspended on a full queue
    pub paused: watch::Receiver<bool>,
}

/// Open a channel over a worker's byte streams.
///
/// Spawns the reader and writer tasks; both end when their stream does.
pub fn open<R, W>(reader: R, writer: W, high_water: usize) -> ChannelPair
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let high_water = high_water.max(1);
    let (data_tx, data_rx) = mpsc::channel::<Bytes>(high_water);
    let (control_tx, control_rx) = mpsc::channel::<ChannelMessage>(CONTROL_QUEUE);
    let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(EVENT_QUEUE);
    let (paused_tx, paused_rx) = watch::channel(false);

    let queued = Arc::new(AtomicUsize::new(0));
    let paused_tx = Arc::new(paused_tx);

    tokio::spawn(write_loop(
        writer,
        data_rx,
        control_rx,
        Arc::clone(&queued),
        Arc::clone(&paused_tx),
        high_water,
    ));
    tokio::spawn(read_loop(reader, event_tx));

    ChannelPair {
        data: ChannelSender {
            tx: data_tx,
            queued,
            paused: paused_tx,
            high_water,
        },
        control: control_tx,
        events: event_rx,
        paused: paused_rx,
    }
}

async fn write_loop<W>(
    writer: W,
    mut data_rx: mpsc::Receiver<Bytes>,
    mut control_rx: mpsc::Receiver<ChannelMessage>,
    queued: Arc<AtomicUsize>,
    paused: Arc<watch::Sender<bool>>,
    high_water: usize,
) where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut sink = FramedWrite::new(writer, MessageCodec::<ChannelMessage>::new());

    loop {
        let message = tokio::select! {
            // Control first so a terminate cannot starve behind data
            biased;
            ctrl = control_rx.recv() => match ctrl {
                Some(msg) => msg,
                None => break,
            },
            data = data_rx.recv() => match data {
                Some(bytes) => {
                    let depth = queued.fetch_sub(1, Ordering::SeqCst) - 1;
                    // Hysteresis: resume well below the mark to avoid flapping
                    if depth <= high_water / 2 {
                        let _ = paused.send(false);
                    }
                    ChannelMessage::Data(bytes)
                }
                None => break,
            },
        };

        if let Err(e) = sink.send(message).await {
            tracing::debug!("Channel write failed: {}", e);
            break;
        }
    }
}

async fn read_loop<R>(reader: R, events: mpsc::Sender<ChannelEvent>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut stream = FramedRead::new(reader, MessageCodec::<ChannelMessage>::new());

    while let Some(item) = stream.next().await {
        match item {
            Ok(ChannelMessage::Ready { pid }) => {
                if events.send(ChannelEvent::Ready { pid }).await.is_err() {
                    return;
                }
            }
            Ok(ChannelMessage::Data(data)) => {
                if events.send(ChannelEvent::Data(data)).await.is_err() {
                    return;
                }
            }
            Ok(ChannelMessage::Exited { code }) => {
                let _ = events.send(ChannelEvent::Exited { code }).await;
                return;
            }
            Ok(other) => {
                tracing::warn!("Unexpected message from worker: {:?}", other);
            }
            Err(e) => {
                let _ = events
                    .send(ChannelEvent::Failed(ChannelError::Protocol(e)))
                    .await;
                return;
            }
        }
    }

    // EOF without an Exited announcement: the worker died on us
    let _ = events
        .send(ChannelEvent::Failed(ChannelError::Broken(
            "worker closed the channel".to_string(),
        )))
        .await;
}
