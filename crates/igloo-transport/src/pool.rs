//! The relay pool.
//!
//! Owns one task per relay. Adding a relay that is already present is a
//! no-op, which is what makes re-subscription after session restores and
//! connect-URI merges idempotent. The pool never exceeds its relay cap;
//! relays beyond it are dropped with a warning.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use igloo_core::NostrEvent;

use crate::backoff::{backoff_delay, jittered, BACKOFF_BASE, BACKOFF_CAP};
use crate::frames::{parse_inbound, publish_frame, subscribe_frame, InboundFrame};
use crate::normalize_relay_url;

/// Default cap on the relay union.
pub const DEFAULT_MAX_RELAYS: usize = 12;
/// Default deadline for one websocket write.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub max_relays: usize,
    pub send_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_relays: DEFAULT_MAX_RELAYS,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// An envelope received from a relay.
#[derive(Debug)]
pub struct IncomingEvent {
    pub relay: String,
    pub event: NostrEvent,
}

/// One relay's state as the operator sees it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RelayStatus {
    pub url: String,
    pub connected: bool,
}

struct RelayHandle {
    outbound_tx: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
}

/// The pool. Cheap to share behind an `Arc`.
pub struct RelayPool {
    transport_pubkey: String,
    config: TransportConfig,
    relays: Mutex<HashMap<String, RelayHandle>>,
    incoming_tx: mpsc::Sender<IncomingEvent>,
}

impl RelayPool {
    /// Build the pool and hand back the receiver the broker drains.
    pub fn new(
        transport_pubkey: String,
        config: TransportConfig,
    ) -> (Arc<Self>, mpsc::Receiver<IncomingEvent>) {
        let (incoming_tx, incoming_rx) = mpsc::channel(256);
        let pool = Arc::new(Self {
            transport_pubkey,
            config,
            relays: Mutex::new(HashMap::new()),
            incoming_tx,
        });
        (pool, incoming_rx)
    }

    /// Merge relay URLs into the pool, spawning tasks for new ones.
    /// Invalid URLs are skipped; URLs beyond the cap are dropped with a
    /// warning. Returns how many relays were actually added.
    pub async fn add_relays<I, S>(self: &Arc<Self>, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = 0;
        let mut relays = self.relays.lock().await;

        for raw in urls {
            let url = match normalize_relay_url(raw.as_ref()) {
                Ok(url) => url,
                Err(e) => {
                    warn!(error = %e, "skipping unusable relay url");
                    continue;
                }
            };
            if relays.contains_key(&url) {
                continue;
            }
            if relays.len() >= self.config.max_relays {
                warn!(
                    %url,
                    cap = self.config.max_relays,
                    "relay cap reached, dropping relay"
                );
                continue;
            }

            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let connected = Arc::new(AtomicBool::new(false));
            relays.insert(
                url.clone(),
                RelayHandle {
                    outbound_tx,
                    connected: Arc::clone(&connected),
                },
            );

            tokio::spawn(run_relay(
                url.clone(),
                self.transport_pubkey.clone(),
                self.config.send_timeout,
                outbound_rx,
                self.incoming_tx.clone(),
                connected,
            ));
            info!(%url, "relay added");
            added += 1;
        }
        added
    }

    /// Publish one signed event to every relay.
    pub async fn publish(&self, event: &NostrEvent) {
        let Some(frame) = publish_frame(event) else {
            return;
        };
        let relays = self.relays.lock().await;
        for (url, handle) in relays.iter() {
            if handle.outbound_tx.send(frame.clone()).is_err() {
                warn!(%url, "relay task is gone, frame dropped");
            }
        }
    }

    /// Current relay set.
    pub async fn relay_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.relays.lock().await.keys().cloned().collect();
        urls.sort();
        urls
    }

    /// Connection status per relay, for the operator surface.
    pub async fn status(&self) -> Vec<RelayStatus> {
        let relays = self.relays.lock().await;
        let mut statuses: Vec<RelayStatus> = relays
            .iter()
            .map(|(url, handle)| RelayStatus {
                url: url.clone(),
                connected: handle.connected.load(Ordering::Relaxed),
            })
            .collect();
        statuses.sort_by(|a, b| a.url.cmp(&b.url));
        statuses
    }
}

/// One relay's connect/read/write loop. Lives until the pool drops.
async fn run_relay(
    url: String,
    transport_pubkey: String,
    send_timeout: Duration,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    incoming_tx: mpsc::Sender<IncomingEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut attempts: u32 = 0;

    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                info!(%url, "relay connected");
                attempts = 0;
                connected.store(true, Ordering::Relaxed);

                let (mut write, mut read) = stream.split();

                // Re-subscribe on every (re)connect.
                let req = subscribe_frame(&transport_pubkey);
                if let Err(e) = write.send(Message::Text(req)).await {
                    warn!(%url, error = %e, "subscribe failed");
                    connected.store(false, Ordering::Relaxed);
                } else {
                    'session: loop {
                        tokio::select! {
                            frame = outbound_rx.recv() => {
                                let Some(frame) = frame else {
                                    // Pool dropped; shut the task down.
                                    let _ = write.send(Message::Close(None)).await;
                                    return;
                                };
                                match timeout(send_timeout, write.send(Message::Text(frame))).await {
                                    Ok(Ok(())) => {}
                                    Ok(Err(e)) => {
                                        warn!(%url, error = %e, "relay write failed");
                                        break 'session;
                                    }
                                    Err(_) => {
                                        // Deadline expired: drop the message,
                                        // keep the connection.
                                        warn!(%url, "relay write timed out, frame dropped");
                                    }
                                }
                            }
                            message = read.next() => {
                                match message {
                                    Some(Ok(Message::Text(text))) => {
                                        if let InboundFrame::Envelope(event) = parse_inbound(&url, &text) {
                                            if incoming_tx.send(IncomingEvent {
                                                relay: url.clone(),
                                                event,
                                            }).await.is_err() {
                                                // Broker gone.
                                                return;
                                            }
                                        }
                                    }
                                    Some(Ok(Message::Ping(payload))) => {
                                        let _ = write.send(Message::Pong(payload)).await;
                                    }
                                    Some(Ok(Message::Close(_))) | None => {
                                        debug!(%url, "relay closed the connection");
                                        break 'session;
                                    }
                                    Some(Ok(_)) => {}
                                    Some(Err(e)) => {
                                        warn!(%url, error = %e, "relay read failed");
                                        break 'session;
                                    }
                                }
                            }
                        }
                    }
                    connected.store(false, Ordering::Relaxed);
                }
            }
            Err(e) => {
                warn!(%url, error = %e, "relay connect failed");
            }
        }

        let delay = jittered(backoff_delay(attempts, BACKOFF_BASE, BACKOFF_CAP));
        attempts = attempts.saturating_add(1);
        debug!(%url, attempts, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> (Arc<RelayPool>, mpsc::Receiver<IncomingEvent>) {
        RelayPool::new("a".repeat(64), TransportConfig::default())
    }

    #[tokio::test]
    async fn relay_union_is_deduplicated_and_idempotent() {
        let (pool, _rx) = pool();

        let added = pool
            .add_relays(["wss://r1.example", "wss://r1.example/", "wss://r2.example"])
            .await;
        assert_eq!(added, 2);

        // Re-adding is a no-op.
        assert_eq!(pool.add_relays(["wss://r1.example"]).await, 0);
        assert_eq!(
            pool.relay_urls().await,
            vec!["wss://r1.example", "wss://r2.example"]
        );
    }

    #[tokio::test]
    async fn relay_union_is_capped() {
        let (pool, _rx) = RelayPool::new(
            "a".repeat(64),
            TransportConfig {
                max_relays: 3,
                ..TransportConfig::default()
            },
        );

        let urls: Vec<String> = (0..6).map(|n| format!("wss://r{}.example", n)).collect();
        assert_eq!(pool.add_relays(&urls).await, 3);
        assert_eq!(pool.relay_urls().await.len(), 3);
    }

    #[tokio::test]
    async fn invalid_urls_are_skipped() {
        let (pool, _rx) = pool();
        let added = pool
            .add_relays(["https://not-ws.example", "nonsense", "wss://good.example"])
            .await;
        assert_eq!(added, 1);
        assert_eq!(pool.relay_urls().await, vec!["wss://good.example"]);
    }

    #[tokio::test]
    async fn status_reports_disconnected_until_ready() {
        let (pool, _rx) = pool();
        pool.add_relays(["wss://unreachable.invalid"]).await;
        let status = pool.status().await;
        assert_eq!(status.len(), 1);
        assert!(!status[0].connected);
    }
}
