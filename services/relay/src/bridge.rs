//! Connection bridge: drives one client from accept to teardown.
//!
//! ```text
//! ACCEPTED -> ANNOUNCED -> SUBSCRIBED -> ACTIVE -> DRAINING -> CLOSED
//! ```
//!
//! - `ANNOUNCED`: the client has been sent its own id (to it alone).
//! - `SUBSCRIBED`: a broker slot is checked out, the topic is subscribed and
//!   `"<id> connected"` has been published to it.
//! - `ACTIVE`: two pumps run concurrently.  The inbound pump decodes client
//!   frames and publishes plain messages (echoing control kinds back to the
//!   sender); the outbound pump forwards every topic delivery to the client.
//! - `DRAINING`: whichever pump finishes first flips a shared watch signal;
//!   the other pump abandons whatever it is awaiting (a read, a write to the
//!   client or a publish) and returns.
//! - `CLOSED`: topics unsubscribed, `"<id> disconnected"` published, the
//!   broker slot returned.  Closing twice is a no-op.
//!
//! Setup failures skip straight to `CLOSED`.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chat_protocol::{ChatMessage, MessageKind};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::broker::{BrokerError, BrokerPool, PooledBroker, Subscription};
use crate::identity::SessionId;
use crate::transport::{ClientSink, ClientSource, CloseReason, TransportError};

/// How long a close frame may take before the socket is simply dropped.
const SINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Accepted,
    Announced,
    Subscribed,
    Active,
    Draining,
    Closed,
}

impl SessionState {
    /// States only move forward one step at a time, except that `Closed` is
    /// reachable from anywhere (setup can fail at any step).
    pub fn can_advance_to(self, next: SessionState) -> bool {
        match (self, next) {
            (SessionState::Closed, _) => false,
            (_, SessionState::Closed) => true,
            (SessionState::Accepted, SessionState::Announced)
            | (SessionState::Announced, SessionState::Subscribed)
            | (SessionState::Subscribed, SessionState::Active)
            | (SessionState::Active, SessionState::Draining) => true,
            _ => false,
        }
    }
}

/// One live connection's state.
#[derive(Debug)]
pub struct ClientSession {
    id: SessionId,
    subscribed_topics: BTreeSet<String>,
    state: SessionState,
    history: Vec<SessionState>,
}

impl ClientSession {
    pub fn accept(id: SessionId) -> Self {
        Self {
            id,
            subscribed_topics: BTreeSet::new(),
            state: SessionState::Accepted,
            history: vec![SessionState::Accepted],
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn subscribed_topics(&self) -> &BTreeSet<String> {
        &self.subscribed_topics
    }

    /// Every state this session has been in, oldest first.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal session transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(session_id = %self.id, from = ?self.state, to = ?next, "session transition");
        self.state = next;
        self.history.push(next);
    }
}

// ---------------------------------------------------------------------------
// Outcomes and errors
// ---------------------------------------------------------------------------

/// Why a pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    ClientDisconnected,
    MalformedInbound,
    TransportFailed,
    BrokerStreamEnded,
    BrokerStreamFailed,
    /// The other pump finished first.
    Cancelled,
    ServerShutdown,
}

impl fmt::Display for PumpExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PumpExit::ClientDisconnected => "client_disconnected",
            PumpExit::MalformedInbound => "malformed_inbound",
            PumpExit::TransportFailed => "transport_failed",
            PumpExit::BrokerStreamEnded => "broker_stream_ended",
            PumpExit::BrokerStreamFailed => "broker_stream_failed",
            PumpExit::Cancelled => "cancelled",
            PumpExit::ServerShutdown => "server_shutdown",
        };
        f.write_str(s)
    }
}

/// Errors that prevent a session from being established.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session_id: SessionId,
    /// Exit of the pump that finished first.
    pub exit: PumpExit,
    /// Client messages published to the topic.
    pub published: u64,
    /// Topic deliveries forwarded to the client.
    pub delivered: u64,
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Shared, cheaply cloned entry point used by the transport endpoint.
#[derive(Clone)]
pub struct Bridge {
    pool: BrokerPool,
    topic: String,
}

impl Bridge {
    pub fn new(pool: BrokerPool, topic: impl Into<String>) -> Self {
        Self {
            pool,
            topic: topic.into(),
        }
    }

    pub fn pool(&self) -> &BrokerPool {
        &self.pool
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Run a whole session: establish, pump until either side ends, tear down.
    pub async fn serve<Tx, Rx>(
        &self,
        id: SessionId,
        mut sink: Tx,
        mut source: Rx,
        shutdown: watch::Receiver<bool>,
    ) -> Result<SessionOutcome, SessionError>
    where
        Tx: ClientSink,
        Rx: ClientSource,
    {
        let mut link = self.establish(id, &mut sink).await?;
        let exit = link.run_pumps(&mut sink, &mut source, shutdown).await;
        link.close().await;
        let reason = if exit == PumpExit::ServerShutdown {
            CloseReason::GoingAway
        } else {
            CloseReason::Normal
        };
        close_sink(&mut sink, link.session.id(), reason).await;
        Ok(link.into_outcome(exit))
    }

    /// ACCEPTED through SUBSCRIBED.
    ///
    /// A failed identity send means the client is already gone.  A broker
    /// failure is reported to the client with a close frame; the connection
    /// is rejected rather than left half set up.
    pub async fn establish<Tx: ClientSink>(
        &self,
        id: SessionId,
        sink: &mut Tx,
    ) -> Result<SessionLink, SessionError> {
        let mut session = ClientSession::accept(id);
        info!(session_id = %session.id, "client connected");

        let hello = ChatMessage::identity_announcement(session.id.as_str()).encode();
        if let Err(e) = sink.send_text(hello).await {
            session.advance(SessionState::Closed);
            debug!(session_id = %session.id, error = %e, "client left before identity announcement");
            return Err(e.into());
        }
        session.advance(SessionState::Announced);

        match self.attach(&mut session).await {
            Ok((broker, subscription)) => Ok(SessionLink {
                session,
                topic: self.topic.clone(),
                broker,
                subscription: Some(subscription),
                published: 0,
                delivered: 0,
            }),
            Err(e) => {
                session.advance(SessionState::Closed);
                warn!(session_id = %session.id, error = %e, "session setup failed, rejecting client");
                close_sink(sink, &session.id, CloseReason::BrokerUnavailable).await;
                Err(e.into())
            }
        }
    }

    async fn attach(
        &self,
        session: &mut ClientSession,
    ) -> Result<(PooledBroker, Box<dyn Subscription>), BrokerError> {
        let broker = self.pool.checkout().await?;
        let mut subscription = broker.subscribe(&self.topic).await?;
        session.subscribed_topics.insert(self.topic.clone());
        session.advance(SessionState::Subscribed);

        let join = ChatMessage::connected(session.id.as_str())
            .with_topic(self.topic.as_str())
            .encode();
        if let Err(e) = broker.publish(&self.topic, &join).await {
            let _ = subscription.unsubscribe_all().await;
            session.subscribed_topics.clear();
            return Err(e);
        }
        Ok((broker, subscription))
    }
}

async fn close_sink<Tx: ClientSink>(sink: &mut Tx, id: &SessionId, reason: CloseReason) {
    if tokio::time::timeout(SINK_CLOSE_TIMEOUT, sink.close(reason))
        .await
        .is_err()
    {
        debug!(session_id = %id, "client did not take the close frame, dropping socket");
    }
}

// ---------------------------------------------------------------------------
// Established session
// ---------------------------------------------------------------------------

/// A session past setup.  Owns its broker slot and subscription handle.
pub struct SessionLink {
    session: ClientSession,
    topic: String,
    broker: PooledBroker,
    subscription: Option<Box<dyn Subscription>>,
    published: u64,
    delivered: u64,
}

struct PumpContext<'a, 's, Tx> {
    session_id: &'a SessionId,
    topic: &'a str,
    broker: &'a PooledBroker,
    sink: &'a Mutex<&'s mut Tx>,
}

impl SessionLink {
    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    /// ACTIVE through DRAINING.  Returns the exit of the pump that finished
    /// first; the other pump has been cancelled by the time this returns.
    pub async fn run_pumps<Tx, Rx>(
        &mut self,
        sink: &mut Tx,
        source: &mut Rx,
        shutdown: watch::Receiver<bool>,
    ) -> PumpExit
    where
        Tx: ClientSink,
        Rx: ClientSource,
    {
        let Some(subscription) = self.subscription.as_mut() else {
            return PumpExit::Cancelled;
        };
        self.session.advance(SessionState::Active);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let sink = Mutex::new(sink);
        let ctx = PumpContext {
            session_id: &self.session.id,
            topic: &self.topic,
            broker: &self.broker,
            sink: &sink,
        };

        // `send_replace` hands back the previous value, so exactly one pump
        // sees `false` and wins the race.
        let inbound = async {
            let (exit, published) =
                inbound_pump(&ctx, source, cancel_rx.clone(), shutdown).await;
            (exit, published, !cancel_tx.send_replace(true))
        };
        let outbound = async {
            let (exit, delivered) =
                outbound_pump(&ctx, &mut **subscription, cancel_rx.clone()).await;
            (exit, delivered, !cancel_tx.send_replace(true))
        };
        let ((in_exit, published, inbound_won), (out_exit, delivered, _)) =
            tokio::join!(inbound, outbound);

        self.published += published;
        self.delivered += delivered;
        let exit = if inbound_won { in_exit } else { out_exit };
        self.session.advance(SessionState::Draining);
        info!(session_id = %self.session.id, exit = %exit, "session draining");
        exit
    }

    /// CLOSED: unsubscribe and announce the departure.  Only the first call
    /// does anything; it returns `true`, later calls return `false`.
    pub async fn close(&mut self) -> bool {
        if self.session.state == SessionState::Closed {
            return false;
        }
        if let Some(mut subscription) = self.subscription.take() {
            if let Err(e) = subscription.unsubscribe_all().await {
                warn!(session_id = %self.session.id, error = %e, "unsubscribe failed");
            }
        }
        self.session.subscribed_topics.clear();

        let leave = ChatMessage::disconnected(self.session.id.as_str())
            .with_topic(self.topic.as_str())
            .encode();
        if let Err(e) = self.broker.publish(&self.topic, &leave).await {
            warn!(session_id = %self.session.id, error = %e, "leave announcement dropped");
        }
        self.session.advance(SessionState::Closed);
        info!(
            session_id = %self.session.id,
            published = self.published,
            delivered = self.delivered,
            "client disconnected"
        );
        true
    }

    /// Consume the link, returning its broker slot to the pool.
    pub fn into_outcome(self, exit: PumpExit) -> SessionOutcome {
        SessionOutcome {
            session_id: self.session.id,
            exit,
            published: self.published,
            delivered: self.delivered,
        }
    }
}

// ---------------------------------------------------------------------------
// Pumps
// ---------------------------------------------------------------------------

/// Resolves once `rx` holds `true`.  A dropped sender never fires.
async fn signalled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|fired| *fired).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Drive `op` unless `cancel` (or `shutdown`, when given) fires first, in
/// which case `op` is dropped mid-flight.  Every await inside a pump goes
/// through here so DRAINING never waits on a stalled client or broker.
async fn interruptible<F: Future>(
    cancel: &mut watch::Receiver<bool>,
    shutdown: Option<&mut watch::Receiver<bool>>,
    op: F,
) -> Result<F::Output, PumpExit> {
    let shutdown_fired = async {
        match shutdown {
            Some(rx) => signalled(rx).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        biased;
        () = signalled(cancel) => Err(PumpExit::Cancelled),
        () = shutdown_fired => Err(PumpExit::ServerShutdown),
        out = op => Ok(out),
    }
}

async fn inbound_pump<Tx, Rx>(
    ctx: &PumpContext<'_, '_, Tx>,
    source: &mut Rx,
    mut cancel: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) -> (PumpExit, u64)
where
    Tx: ClientSink,
    Rx: ClientSource,
{
    let mut published = 0;
    loop {
        let frame = match interruptible(&mut cancel, Some(&mut shutdown), source.recv_text()).await {
            Ok(frame) => frame,
            Err(exit) => return (exit, published),
        };
        let text = match frame {
            Ok(text) => text,
            Err(TransportError::Closed) => return (PumpExit::ClientDisconnected, published),
            Err(TransportError::NonText) => {
                warn!(session_id = %ctx.session_id, "non-text frame from client, ending session");
                return (PumpExit::MalformedInbound, published);
            }
            Err(e) => {
                debug!(session_id = %ctx.session_id, error = %e, "client read failed");
                return (PumpExit::TransportFailed, published);
            }
        };

        let msg = match ChatMessage::decode_from_client(&text, ctx.session_id.as_str()) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(session_id = %ctx.session_id, error = %e, "malformed message from client, ending session");
                return (PumpExit::MalformedInbound, published);
            }
        };

        match msg.kind() {
            MessageKind::Plain => {
                let payload = msg.with_topic(ctx.topic).encode();
                let publish = ctx.broker.publish(ctx.topic, &payload);
                match interruptible(&mut cancel, Some(&mut shutdown), publish).await {
                    Ok(Ok(())) => published += 1,
                    Ok(Err(e)) => {
                        warn!(session_id = %ctx.session_id, error = %e, "publish failed, message dropped");
                    }
                    Err(exit) => return (exit, published),
                }
            }
            MessageKind::IdentityAnnouncement => {
                debug!(session_id = %ctx.session_id, kind = %msg.kind(), "echoing control message to sender");
                let echo = async { ctx.sink.lock().await.send_text(msg.encode()).await };
                match interruptible(&mut cancel, Some(&mut shutdown), echo).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => return (PumpExit::TransportFailed, published),
                    Err(exit) => return (exit, published),
                }
            }
        }
    }
}

async fn outbound_pump<Tx>(
    ctx: &PumpContext<'_, '_, Tx>,
    subscription: &mut dyn Subscription,
    mut cancel: watch::Receiver<bool>,
) -> (PumpExit, u64)
where
    Tx: ClientSink,
{
    let mut delivered = 0;
    loop {
        let next = match interruptible(&mut cancel, None, subscription.next()).await {
            Ok(next) => next,
            Err(exit) => return (exit, delivered),
        };
        let delivery = match next {
            Some(Ok(delivery)) => delivery,
            Some(Err(e)) => {
                warn!(session_id = %ctx.session_id, error = %e, "subscription failed");
                return (PumpExit::BrokerStreamFailed, delivered);
            }
            None => {
                info!(session_id = %ctx.session_id, "subscription ended");
                return (PumpExit::BrokerStreamEnded, delivered);
            }
        };
        debug!(session_id = %ctx.session_id, topic = %delivery.topic, "delivering to client");
        let forward = async { ctx.sink.lock().await.send_text(delivery.payload).await };
        match interruptible(&mut cancel, None, forward).await {
            Ok(Ok(())) => delivered += 1,
            Ok(Err(_)) => return (PumpExit::TransportFailed, delivered),
            Err(exit) => return (exit, delivered),
        }
    }
}
