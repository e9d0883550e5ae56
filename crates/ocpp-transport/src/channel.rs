//! Request/response pairing for an OCPP-J session

use crate::{
    error::{TransportError, TransportResult},
    ConnectionState, DeviceChannel, TransportConfig, TransportStats,
};
use dashmap::DashMap;
use ocpp_types::{Call, Reply};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

type PendingReply = oneshot::Sender<TransportResult<Value>>;

/// Pairs outbound Calls with the CallResult/CallError frames fed back through
/// [`MessageChannel::handle_incoming`].
///
/// Outbound frames are written as text to the queue returned by
/// [`MessageChannel::new`]; whoever owns the socket drains it.
pub struct MessageChannel {
    charging_station_id: String,
    config: TransportConfig,
    outbound: mpsc::Sender<String>,
    pending: DashMap<String, (String, PendingReply)>,
    closed: AtomicBool,
    calls_sent: AtomicU64,
    replies_received: AtomicU64,
    timeouts: AtomicU64,
    orphan_replies: AtomicU64,
}

impl MessageChannel {
    /// Create a channel and the receiving end of its outbound frame queue
    pub fn new(
        charging_station_id: impl Into<String>,
        config: TransportConfig,
    ) -> (Self, mpsc::Receiver<String>) {
        let (outbound, frames) = mpsc::channel(config.message_buffer_size.max(1));
        let channel = Self {
            charging_station_id: charging_station_id.into(),
            config,
            outbound,
            pending: DashMap::new(),
            closed: AtomicBool::new(false),
            calls_sent: AtomicU64::new(0),
            replies_received: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            orphan_replies: AtomicU64::new(0),
        };
        (channel, frames)
    }

    /// Feed a text frame received from the charge point.
    ///
    /// Returns `true` when the frame resolved a pending call.
    pub fn handle_incoming(&self, text: &str) -> TransportResult<bool> {
        if text.len() > self.config.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: text.len(),
                limit: self.config.max_message_size,
            });
        }

        let frame: Value = serde_json::from_str(text)?;
        let reply = Reply::from_frame(&frame)?;

        let Some((_, (action, waiter))) = self.pending.remove(reply.unique_id()) else {
            self.orphan_replies.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Reply {} from {} matches no pending call",
                reply.unique_id(),
                self.charging_station_id
            );
            return Ok(false);
        };

        self.replies_received.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Paired {} reply {} from {}",
            action,
            reply.unique_id(),
            self.charging_station_id
        );

        let outcome = match reply {
            Reply::Result { payload, .. } => Ok(payload),
            Reply::Error {
                error_code,
                description,
                ..
            } => Err(TransportError::CallError {
                code: error_code,
                description,
            }),
        };
        // The caller may have timed out in the meantime
        let _ = waiter.send(outcome);
        Ok(true)
    }

    /// Number of calls still waiting for a reply
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            calls_sent: self.calls_sent.load(Ordering::Relaxed),
            replies_received: self.replies_received.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            orphan_replies: self.orphan_replies.load(Ordering::Relaxed),
        }
    }

    fn fail_pending(&self, reason: &str) {
        let ids: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, (_, waiter))) = self.pending.remove(&id) {
                let _ = waiter.send(Err(TransportError::ConnectionClosed {
                    reason: reason.to_string(),
                }));
            }
        }
    }
}

#[async_trait::async_trait]
impl DeviceChannel for MessageChannel {
    fn charging_station_id(&self) -> &str {
        &self.charging_station_id
    }

    async fn call(&self, call: Call) -> TransportResult<Value> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(TransportError::NotReady { state });
        }

        let text = serde_json::to_string(&call.to_frame())?;
        if text.len() > self.config.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: text.len(),
                limit: self.config.max_message_size,
            });
        }

        let (tx, rx) = oneshot::channel();
        self.pending
            .insert(call.unique_id.clone(), (call.action.clone(), tx));

        if self.outbound.send(text).await.is_err() {
            self.pending.remove(&call.unique_id);
            return Err(TransportError::ConnectionClosed {
                reason: "outbound queue dropped".to_string(),
            });
        }
        self.calls_sent.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Sent {} ({}) to {}",
            call.action, call.unique_id, self.charging_station_id
        );

        match timeout(self.config.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TransportError::ConnectionClosed {
                reason: "reply slot dropped".to_string(),
            }),
            Err(_) => {
                self.pending.remove(&call.unique_id);
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Timeout {
                    action: call.action,
                    timeout_ms: self.config.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::Acquire) {
            ConnectionState::Closed
        } else {
            ConnectionState::Connected
        }
    }

    async fn close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(
            "Closing channel to {} ({} pending): {}",
            self.charging_station_id,
            self.pending.len(),
            reason
        );
        self.fail_pending(reason);
    }
}
