//! Live channel: one WebSocket per observer
//!
//! The connection task owns the socket. Broadcasts arrive on a bounded
//! channel whose sender is registered with the [`Broadcaster`]; when the
//! broadcaster drops a failed observer the channel closes and the task ends.
//!
//! Keepalive: the server pings every `ping_interval_secs`, and any inbound
//! frame (pong, text, anything) resets the idle deadline. A connection that
//! stays silent for `idle_timeout_secs` is closed. Inbound payloads are
//! otherwise ignored.

use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, info};

use super::handlers::ApiState;
use super::source::SourceIdentity;
use crate::broadcast::Broadcaster;
use crate::config::ObserverConfig;
use crate::types::SourceId;

/// Timing and buffering for one observer connection.
#[derive(Debug, Clone, Copy)]
struct Keepalive {
    ping_interval: Duration,
    idle_timeout: Duration,
    send_buffer: usize,
}

impl From<&ObserverConfig> for Keepalive {
    fn from(config: &ObserverConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            idle_timeout: config.idle_timeout(),
            send_buffer: config.send_buffer,
        }
    }
}

/// GET /api/v1/ws
pub async fn live_channel(
    State(state): State<ApiState>,
    SourceIdentity(source): SourceIdentity,
    ws: WebSocketUpgrade,
) -> Response {
    let keepalive = Keepalive::from(&state.config.observers);
    let broadcaster = Arc::clone(&state.broadcaster);

    ws.max_message_size(state.config.observers.max_message_bytes)
        .on_upgrade(move |socket| {
            let (sink, inbound) = socket.split();
            run_observer(sink, inbound, broadcaster, source, keepalive)
        })
}

async fn run_observer<S, R, E>(
    mut sink: S,
    mut inbound: R,
    broadcaster: Arc<Broadcaster>,
    source: SourceId,
    keepalive: Keepalive,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (tx, mut outbound) = mpsc::channel::<Arc<str>>(keepalive.send_buffer);
    let observer_id = broadcaster.register(Arc::new(tx), source);

    let mut ping = interval_at(Instant::now() + keepalive.ping_interval, keepalive.ping_interval);
    let idle = sleep(keepalive.idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(payload) = message else {
                    debug!(observer_id = %observer_id, "Observer dropped by broadcaster");
                    break;
                };
                if let Err(e) = sink.send(Message::Text(payload.to_string())).await {
                    debug!(observer_id = %observer_id, error = %e, "Live channel write failed");
                    break;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    debug!(observer_id = %observer_id, error = %e, "Live channel ping failed");
                    break;
                }
            }
            frame = inbound.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => idle.as_mut().reset(Instant::now() + keepalive.idle_timeout),
                Some(Err(e)) => {
                    debug!(observer_id = %observer_id, error = %e, "Live channel read failed");
                    break;
                }
            },
            () = &mut idle => {
                info!(observer_id = %observer_id, "Live channel idle, closing");
                break;
            }
        }
    }

    broadcaster.deregister(observer_id);
    let _ = sink.close().await;
}
