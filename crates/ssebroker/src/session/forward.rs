//! The per-connection forwarding loop

use super::sink::EventSink;
use crate::broker::Subscription;
use crate::error::SessionError;
use crate::event::{comment, retry_hint};
use bytes::Bytes;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-connection behaviour
#[derive(Debug, Clone, Default)]
pub struct ForwardOptions {
    /// Close after the first frame
    pub legacy: bool,
    /// Write a comment frame after this much idle time
    pub keep_alive: Option<Duration>,
    /// Reconnection hint sent before any event
    pub retry: Option<Duration>,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Server-wide cancellation
    Cancelled,
    /// The client disconnected
    PeerClosed,
    /// A write or flush failed
    WriteFailed,
    /// The broker stopped and closed the delivery queue
    BrokerStopped,
    /// A legacy client got its single frame
    LegacyDelivered,
}

impl SessionEnd {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::PeerClosed => "peer closed",
            Self::WriteFailed => "write failed",
            Self::BrokerStopped => "broker stopped",
            Self::LegacyDelivered => "legacy client served",
        }
    }

    /// Whether the client can still receive a proper end of stream
    fn is_clean(&self) -> bool {
        !matches!(self, Self::PeerClosed | Self::WriteFailed)
    }
}

/// Copy frames from `subscription` to `sink` until something ends the session.
///
/// The subscription is dropped (and so unregistered) before this returns,
/// whatever the reason.
pub async fn forward<S: EventSink>(
    mut subscription: Subscription,
    mut sink: S,
    options: ForwardOptions,
    cancel: CancellationToken,
) -> SessionEnd {
    let id = subscription.id();
    debug!(subscriber = %id, legacy = options.legacy, "stream opened");

    let mut keep_alive = options.keep_alive.map(|period| {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    let mut end = None;
    if let Some(retry) = options.retry {
        end = deliver(&mut sink, retry_hint(retry), &cancel).await.err();
    }

    let end = match end {
        Some(end) => end,
        None => loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break SessionEnd::Cancelled,
                _ = sink.closed() => break SessionEnd::PeerClosed,
                frame = subscription.recv() => {
                    let Some(frame) = frame else {
                        break SessionEnd::BrokerStopped;
                    };
                    if let Err(end) = deliver(&mut sink, frame, &cancel).await {
                        break end;
                    }
                    if options.legacy {
                        break SessionEnd::LegacyDelivered;
                    }
                    if let Some(interval) = keep_alive.as_mut() {
                        interval.reset();
                    }
                }
                _ = tick(&mut keep_alive) => {
                    if let Err(end) = deliver(&mut sink, comment("keep-alive"), &cancel).await {
                        break end;
                    }
                }
            }
        },
    };

    drop(subscription);

    if end.is_clean() {
        match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(subscriber = %id, error = %err, "failed to finish stream"),
            Err(_) => debug!(subscriber = %id, "timed out finishing stream"),
        }
    }

    debug!(subscriber = %id, reason = end.as_str(), "stream closed");
    end
}

/// Write one frame and flush it, giving up on cancellation.
async fn deliver<S: EventSink>(
    sink: &mut S,
    frame: Bytes,
    cancel: &CancellationToken,
) -> Result<(), SessionEnd> {
    let write = async {
        sink.write(frame).await?;
        sink.flush().await
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SessionEnd::Cancelled),
        result = write => result.map_err(|err: SessionError| {
            debug!(error = %err, "write to subscriber failed");
            SessionEnd::WriteFailed
        }),
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
