//! Kernel channels WebSocket pump.
//!
//! Inbound binary frames are decoded and dispatched: shell traffic strictly
//! in arrival order on its own task, control traffic directly so an
//! interrupt can reach a kernel whose shell queue is blocked. Outbound
//! frames go through a bounded queue drained by a writer task that also
//! sends heartbeat pings.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use gateway_core::ids::ConnectionId;
use gateway_core::{wire, Channel, Envelope};
use gateway_kernel::{ChannelContext, MessageRouter, Outbox, Published};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, Interval};
use tracing::{debug, info, warn};

/// Counters shared by every channels connection.
#[derive(Debug, Default)]
pub struct ChannelStats {
    connections: AtomicUsize,
    dropped_frames: AtomicU64,
    overflowed_frames: AtomicU64,
}

impl ChannelStats {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Inbound frames discarded because they could not be decoded.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Outbound frames discarded because a send queue was full.
    pub fn overflowed_frames(&self) -> u64 {
        self.overflowed_frames.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ChannelOptions {
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Encodes envelopes onto a connection's send queue. Never blocks: when the
/// queue is full the frame is dropped and counted.
#[derive(Clone)]
struct FrameSink {
    connection: ConnectionId,
    tx: mpsc::Sender<Vec<u8>>,
    stats: Arc<ChannelStats>,
}

impl Outbox for FrameSink {
    fn deliver(&self, envelope: Envelope) {
        let frame = wire::encode(&envelope);
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(frame)) => {
                let _ = self.stats.overflowed_frames.fetch_add(1, Ordering::Relaxed);
                warn!(
                    connection = %self.connection,
                    msg_type = envelope.msg_type(),
                    bytes = frame.len(),
                    "send queue full, dropping frame"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

async fn next_ping(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Run one channels connection until the client goes away.
pub async fn serve_channels(
    socket: WebSocket,
    router: Arc<MessageRouter>,
    ctx: ChannelContext,
    iopub: Option<broadcast::Receiver<Published>>,
    options: ChannelOptions,
    stats: Arc<ChannelStats>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(options.max_send_queue.max(1));
    let _ = stats.connections.fetch_add(1, Ordering::Relaxed);
    info!(connection = %ctx.connection, kernel_id = %ctx.kernel_id, ns = %ctx.key, "channels connected");

    let writer = tokio::spawn(async move {
        // a zero interval disables pings
        let mut heartbeat = (!options.heartbeat_interval.is_zero()).then(|| {
            tokio::time::interval_at(
                Instant::now() + options.heartbeat_interval,
                options.heartbeat_interval,
            )
        });
        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        if ws_tx.send(Message::Binary(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                () = next_ping(&mut heartbeat) => {
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let sink = FrameSink {
        connection: ctx.connection.clone(),
        tx,
        stats: stats.clone(),
    };

    let forwarder = iopub.map(|mut viewer| {
        let sink = sink.clone();
        tokio::spawn(async move {
            loop {
                match viewer.recv().await {
                    Ok(published) if published.origin == sink.connection => {}
                    Ok(published) => sink.deliver(published.envelope),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(connection = %sink.connection, missed, "iopub viewer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    });

    let (shell_tx, mut shell_rx) = mpsc::channel::<Envelope>(options.max_send_queue.max(1));
    let shell = {
        let router = router.clone();
        let ctx = ctx.clone();
        let sink = sink.clone();
        tokio::spawn(async move {
            while let Some(envelope) = shell_rx.recv().await {
                router.dispatch(&ctx, envelope, &sink).await;
            }
        })
    };

    let mut dropped = 0u64;
    while let Some(message) = ws_rx.next().await {
        let data = match message {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Text(_)) => {
                dropped += 1;
                let _ = stats.dropped_frames.fetch_add(1, Ordering::Relaxed);
                warn!(connection = %ctx.connection, "text frame on binary channel, dropping");
                continue;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(connection = %ctx.connection, error = %e, "socket read failed");
                break;
            }
        };
        let envelope = match wire::decode(&data) {
            Ok(envelope) => envelope,
            Err(e) => {
                dropped += 1;
                let _ = stats.dropped_frames.fetch_add(1, Ordering::Relaxed);
                warn!(connection = %ctx.connection, error = %e, bytes = data.len(), "dropping malformed frame");
                continue;
            }
        };
        if envelope.channel == Channel::Control {
            router.dispatch(&ctx, envelope, &sink).await;
        } else if shell_tx.send(envelope).await.is_err() {
            break;
        }
    }

    drop(shell_tx);
    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }
    drop(sink);
    // The shell task keeps running until its in-flight request completes so
    // the kernel's counter stays consistent; the writer exits once every
    // sender is gone.
    drop(shell);
    drop(writer);
    let _ = stats.connections.fetch_sub(1, Ordering::Relaxed);
    info!(connection = %ctx.connection, dropped_frames = dropped, "channels disconnected");
}

#[cfg(test)]
mod tests {
    use gateway_core::content::Content;

    use super::*;

    fn sink(capacity: usize) -> (FrameSink, mpsc::Receiver<Vec<u8>>, Arc<ChannelStats>) {
        let (tx, rx) = mpsc::channel(capacity);
        let stats = Arc::new(ChannelStats::default());
        let sink = FrameSink {
            connection: ConnectionId::new(),
            tx,
            stats: stats.clone(),
        };
        (sink, rx, stats)
    }

    #[test]
    fn sink_encodes_frames() {
        let (sink, mut rx, _) = sink(4);
        let envelope = Envelope::new(Channel::Shell, "k", Content::KernelInfoRequest);
        sink.deliver(envelope.clone());
        let frame = rx.try_recv().unwrap();
        assert_eq!(wire::decode(&frame).unwrap(), envelope);
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let (sink, _rx, stats) = sink(1);
        for _ in 0..3 {
            sink.deliver(Envelope::new(Channel::Iopub, "k", Content::KernelInfoRequest));
        }
        assert_eq!(stats.overflowed_frames(), 2);
    }

    #[test]
    fn closed_queue_is_silent() {
        let (sink, rx, stats) = sink(1);
        drop(rx);
        sink.deliver(Envelope::new(Channel::Iopub, "k", Content::KernelInfoRequest));
        assert_eq!(stats.overflowed_frames(), 0);
    }
}
