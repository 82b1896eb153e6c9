//! Pairing state for one session code
//!
//! A [`Bridge`] holds at most one producer link and one consumer link.
//! The slots store mpsc senders feeding each connection's writer task,
//! never the sockets themselves, so endpoints can be swapped while the
//! opposite pump keeps running. Forwarders look the current link up per
//! message; a swap between two messages just means the next message
//! lands on the successor.
//!
//! Shutdown is a single cancellation token owned by the bridge. Every
//! attachment gets a child token, which lets a replacement cancel one
//! connection without disturbing the session, while [`Bridge::teardown`]
//! cancels the parent and takes everything down at once.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{RelayError, Result};

/// Session code shared by a producer/consumer pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionCode(String);

impl SessionCode {
    /// Create a session code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bridge lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    /// Registered but no endpoint attached yet.
    Empty,
    /// Producer waiting for a consumer.
    HostOnly,
    /// Consumer waiting for a producer.
    ClientOnly,
    /// Both ends attached, traffic flowing.
    Paired,
    /// Torn down. Terminal.
    Closed,
}

/// Producer slot: where control lines are delivered.
#[derive(Debug)]
struct HostLink {
    conn_id: u64,
    control_tx: mpsc::Sender<String>,
    token: CancellationToken,
}

/// Consumer slot: where video frames are delivered.
#[derive(Debug)]
struct ClientLink {
    conn_id: u64,
    frame_tx: mpsc::Sender<Vec<u8>>,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct Slots {
    host: Option<HostLink>,
    client: Option<ClientLink>,
}

/// Outcome of attaching an endpoint to a bridge.
#[derive(Debug)]
pub struct Attachment {
    /// Token scoped to this attachment. Cancelled when the endpoint is
    /// displaced by a newcomer or when the session tears down.
    pub token: CancellationToken,
    /// Connection id of the same-role endpoint this attach displaced.
    pub displaced: Option<u64>,
    /// Whether this attach completed the pair.
    pub paired: bool,
}

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    frame_bytes: AtomicU64,
    control_lines: AtomicU64,
}

/// Snapshot of a bridge's forwarding counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Video frames delivered to the consumer.
    pub frames_forwarded: u64,
    /// Video payload bytes delivered to the consumer.
    pub bytes_forwarded: u64,
    /// Control lines delivered to the producer.
    pub lines_forwarded: u64,
}

/// One session: a rendezvous point for a producer and a consumer.
#[derive(Debug)]
pub struct Bridge {
    code: SessionCode,
    /// Parent of every attachment token.
    shutdown: CancellationToken,
    closed: AtomicBool,
    slots: Mutex<Slots>,
    /// Bumped on every attach, displacement, and teardown so blocked
    /// forwarders re-check the slots.
    roster: watch::Sender<u64>,
    counters: Counters,
}

impl Bridge {
    pub(crate) fn new(code: SessionCode) -> Self {
        let (roster, _) = watch::channel(0);
        Self {
            code,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            slots: Mutex::new(Slots::default()),
            roster,
            counters: Counters::default(),
        }
    }

    /// The session code this bridge serves.
    pub fn code(&self) -> &SessionCode {
        &self.code
    }

    /// True once [`Bridge::teardown`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Attach a producer, displacing any previous one.
    ///
    /// The displaced producer's attachment token is cancelled; the
    /// session and any attached consumer are untouched. Fails with
    /// [`RelayError::SessionClosed`] if the bridge is already torn down,
    /// in which case the caller should fetch a fresh bridge.
    pub async fn attach_host(
        &self,
        conn_id: u64,
        control_tx: mpsc::Sender<String>,
    ) -> Result<Attachment> {
        let mut slots = self.slots.lock().await;
        if self.is_closed() {
            return Err(RelayError::SessionClosed);
        }
        let token = self.shutdown.child_token();
        let displaced = slots
            .host
            .replace(HostLink {
                conn_id,
                control_tx,
                token: token.clone(),
            })
            .map(|old| {
                old.token.cancel();
                old.conn_id
            });
        let paired = slots.client.is_some();
        drop(slots);
        self.roster.send_modify(|epoch| *epoch += 1);

        if let Some(old) = displaced {
            tracing::info!(
                session = %self.code,
                conn = conn_id,
                displaced = old,
                "producer replaced"
            );
        }
        Ok(Attachment {
            token,
            displaced,
            paired,
        })
    }

    /// Attach a consumer, displacing any previous one.
    ///
    /// Mirror of [`Bridge::attach_host`]. The displaced consumer's
    /// writer sends the replaced close code before dropping the socket.
    pub async fn attach_client(
        &self,
        conn_id: u64,
        frame_tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<Attachment> {
        let mut slots = self.slots.lock().await;
        if self.is_closed() {
            return Err(RelayError::SessionClosed);
        }
        let token = self.shutdown.child_token();
        let displaced = slots
            .client
            .replace(ClientLink {
                conn_id,
                frame_tx,
                token: token.clone(),
            })
            .map(|old| {
                old.token.cancel();
                old.conn_id
            });
        let paired = slots.host.is_some();
        drop(slots);
        self.roster.send_modify(|epoch| *epoch += 1);

        if let Some(old) = displaced {
            tracing::info!(
                session = %self.code,
                conn = conn_id,
                displaced = old,
                "consumer replaced"
            );
        }
        Ok(Attachment {
            token,
            displaced,
            paired,
        })
    }

    /// Deliver one video frame to the current consumer.
    ///
    /// Blocks while no consumer is attached and resumes as soon as one
    /// arrives, so a producer can start streaming before its consumer
    /// connects. Fails only once the session is torn down.
    pub async fn forward_frame(&self, frame: Vec<u8>) -> Result<()> {
        let len = frame.len() as u64;
        let mut frame = frame;
        loop {
            // Subscribe before snapshotting so an attach landing between
            // the snapshot and the wait still wakes us.
            let mut roster = self.roster.subscribe();
            let tx = {
                let slots = self.slots.lock().await;
                if self.is_closed() {
                    return Err(RelayError::SessionClosed);
                }
                slots.client.as_ref().map(|link| link.frame_tx.clone())
            };
            match tx {
                Some(tx) => match tx.send(frame).await {
                    Ok(()) => {
                        self.counters.frames.fetch_add(1, Ordering::Relaxed);
                        self.counters.frame_bytes.fetch_add(len, Ordering::Relaxed);
                        return Ok(());
                    }
                    Err(mpsc::error::SendError(returned)) => {
                        // Dead receiver. If a swap replaced the link the
                        // roster epoch already moved and the wait returns
                        // at once; if the writer died the wait ends at
                        // the next attach or teardown.
                        frame = returned;
                        if roster.changed().await.is_err() {
                            return Err(RelayError::SessionClosed);
                        }
                    }
                },
                None => {
                    if roster.changed().await.is_err() {
                        return Err(RelayError::SessionClosed);
                    }
                }
            }
        }
    }

    /// Deliver one normalized control line to the current producer.
    ///
    /// Same waiting behavior as [`Bridge::forward_frame`], consumer to
    /// producer direction.
    pub async fn forward_control(&self, line: String) -> Result<()> {
        let mut line = line;
        loop {
            let mut roster = self.roster.subscribe();
            let tx = {
                let slots = self.slots.lock().await;
                if self.is_closed() {
                    return Err(RelayError::SessionClosed);
                }
                slots.host.as_ref().map(|link| link.control_tx.clone())
            };
            match tx {
                Some(tx) => match tx.send(line).await {
                    Ok(()) => {
                        self.counters.control_lines.fetch_add(1, Ordering::Relaxed);
                        return Ok(());
                    }
                    Err(mpsc::error::SendError(returned)) => {
                        line = returned;
                        if roster.changed().await.is_err() {
                            return Err(RelayError::SessionClosed);
                        }
                    }
                },
                None => {
                    if roster.changed().await.is_err() {
                        return Err(RelayError::SessionClosed);
                    }
                }
            }
        }
    }

    /// Tear the session down. Only the first caller has any effect.
    ///
    /// Drops both links, cancels every attachment token through the
    /// parent, and wakes any blocked forwarder. The pair dies as a unit:
    /// whichever side failed, the other side's writer observes the
    /// cancellation within one scheduling step.
    pub async fn teardown(&self, reason: &str) {
        let mut slots = self.slots.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let stats = self.stats();
        tracing::info!(
            session = %self.code,
            reason,
            frames = stats.frames_forwarded,
            bytes = stats.bytes_forwarded,
            lines = stats.lines_forwarded,
            "session torn down"
        );
        slots.host = None;
        slots.client = None;
        drop(slots);
        self.shutdown.cancel();
        self.roster.send_modify(|epoch| *epoch += 1);
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> BridgePhase {
        let slots = self.slots.lock().await;
        if self.is_closed() {
            return BridgePhase::Closed;
        }
        match (slots.host.is_some(), slots.client.is_some()) {
            (false, false) => BridgePhase::Empty,
            (true, false) => BridgePhase::HostOnly,
            (false, true) => BridgePhase::ClientOnly,
            (true, true) => BridgePhase::Paired,
        }
    }

    /// Whether either slot still holds the given connection.
    pub async fn holds_connection(&self, conn_id: u64) -> bool {
        let slots = self.slots.lock().await;
        slots.host.as_ref().map(|link| link.conn_id) == Some(conn_id)
            || slots.client.as_ref().map(|link| link.conn_id) == Some(conn_id)
    }

    /// Snapshot of the forwarding counters.
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            frames_forwarded: self.counters.frames.load(Ordering::Relaxed),
            bytes_forwarded: self.counters.frame_bytes.load(Ordering::Relaxed),
            lines_forwarded: self.counters.control_lines.load(Ordering::Relaxed),
        }
    }
}
