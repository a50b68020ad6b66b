#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_stream::try_stream;
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::classify::{Classified, classify};
use super::config::Config;
use super::error::WsError;
use super::events::{Event, EventBus, EventKind, Payload, SubscriptionHandle};
use super::heartbeat::{HeartbeatMonitor, is_pong};
use super::queue::MessageQueue;
use super::reconnect::{ReconnectScheduler, Veto};
use super::transport::{
    AlwaysOnline, Failure, NORMAL_CLOSURE, Platform, ReadyState, Transport, TransportEvent,
    TransportSink, TransportStream, WsTransport,
};
use crate::error::Error;
use crate::Result;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected
    Idle,
    /// Attempting to connect
    Connecting,
    /// Successfully connected
    Open {
        /// When the connection was established
        since: Instant,
    },
    /// Shutting down towards a terminal close
    Closing,
    /// Waiting on an armed retry timer
    Reconnecting {
        /// Current reconnection attempt number
        attempt: u32,
    },
    /// No connection and no pending retry
    Closed,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// The coarse view exposed to application code.
    #[must_use]
    pub const fn status(self) -> ConnectionStatus {
        match self {
            Self::Connecting | Self::Reconnecting { .. } => ConnectionStatus::Connecting,
            Self::Open { .. } => ConnectionStatus::Connected,
            Self::Closing => ConnectionStatus::Closing,
            Self::Idle | Self::Closed => ConnectionStatus::Disconnected,
        }
    }

    /// The transport ready-state equivalent of this state.
    #[must_use]
    pub const fn ready_state(self) -> ReadyState {
        match self {
            Self::Connecting | Self::Reconnecting { .. } => ReadyState::Connecting,
            Self::Open { .. } => ReadyState::Open,
            Self::Closing => ReadyState::Closing,
            Self::Idle | Self::Closed => ReadyState::Closed,
        }
    }
}

/// Application-facing connection status.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionStatus {
    /// An attempt or retry is in progress
    Connecting,
    /// The connection is open
    Connected,
    /// A terminal close is in progress
    Closing,
    /// No connection and no pending retry
    Disconnected,
}

/// Commands from the public handle to the connection loop.
enum Command {
    Connect {
        url: Url,
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        text: String,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Manages WebSocket connection lifecycle, reconnection, heartbeat and
/// outbound queueing for one endpoint at a time.
///
/// One manager owns at most one live transport; concurrent `connect` calls
/// never open a second one. All connection work runs in a background task;
/// this handle is cheap to clone and communicates over channels. The manager
/// has an explicit lifecycle: create it where the application composes its
/// services, inject it where needed, and destroy it with
/// [`ConnectionManager::disconnect`].
///
/// # Example
///
/// ```no_run
/// use storefront_realtime::{Config, ConnectionManager, EventKind};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let manager = ConnectionManager::new(Config::default());
///     let _updates = manager.on(EventKind::Message, |event| println!("{event:?}"));
///
///     manager.connect("wss://realtime.storefront.example/updates").await?;
///     manager.send(&serde_json::json!({"subscribe": "inventory"}))?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    /// Sender channel for commands to the connection loop
    command_tx: mpsc::UnboundedSender<Command>,
    /// Watch channel receiver for state changes
    state_rx: watch::Receiver<ConnectionState>,
    /// Fan-out for connection and message events
    events: Arc<EventBus>,
    /// Root token; cancelling it disarms every outstanding timer
    cancel: CancellationToken,
    /// Set once `disconnect` has run; the manager is then inert
    destroyed: Arc<AtomicBool>,
    join_timeout: Duration,
}

impl ConnectionManager {
    /// Create a manager backed by the production transport.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_transport(config, WsTransport, AlwaysOnline)
    }

    /// Create a manager with explicit transport and platform capabilities.
    ///
    /// This is the seam for running the full state machine against fakes.
    pub fn with_transport<T, P>(config: Config, transport: T, platform: P) -> Self
    where
        T: Transport,
        P: Platform,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let events = Arc::new(EventBus::new());
        let cancel = CancellationToken::new();

        let join_timeout = config.join_timeout;
        let queue = MessageQueue::new(config.queue_capacity);
        let scheduler = ReconnectScheduler::new(config.reconnect.clone());

        let actor = ConnectionActor {
            config,
            transport: Arc::new(transport),
            platform: Arc::new(platform),
            events: Arc::clone(&events),
            state_tx,
            command_rx,
            cancel: cancel.clone(),
            session: None,
            queue,
            scheduler,
            monitor: HeartbeatMonitor::new(),
        };
        tokio::spawn(actor.run());

        Self {
            command_tx,
            state_rx,
            events,
            cancel,
            destroyed: Arc::new(AtomicBool::new(false)),
            join_timeout,
        }
    }

    /// Open a connection to `url`, or join the attempt already in flight.
    ///
    /// Resolves with the outcome of that attempt: `Ok(())` once the connection
    /// is open, or the classified error that ended it. When the failure is
    /// retryable, reconnection continues in the background and is observable
    /// through [`ConnectionManager::on`] and [`ConnectionManager::events`].
    pub async fn connect(&self, url: &str) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(WsError::Destroyed.into());
        }
        let url = Url::parse(url)
            .map_err(|e| Error::validation(format!("invalid endpoint url: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(WsError::UnsupportedScheme(url.scheme().to_owned()).into());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Connect {
                url,
                reply: reply_tx,
            })
            .map_err(|_e| WsError::Destroyed)?;

        // The connection loop serializes attempts, so this wait also covers an
        // attempt another caller already has in flight.
        match timeout(self.join_timeout, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(WsError::ConnectionClosed.into()),
            Err(_) => Err(WsError::JoinTimeout.into()),
        }
    }

    /// Permanently shut the manager down.
    ///
    /// Idempotent. Cancels every outstanding timer (heartbeat interval, pong
    /// deadline, reconnect delay, establishment timeout) before returning,
    /// closes the transport with a normal-closure code and emits one final
    /// [`Event::Disconnected`]; no events or reconnect attempts follow.
    pub async fn disconnect(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Cancelling the token synchronously disarms every pending timer, so
        // none of them can fire against a stale transport reference.
        self.cancel.cancel();

        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .command_tx
            .send(Command::Disconnect { reply: reply_tx })
            .is_ok()
        {
            drop(reply_rx.await);
        }
    }

    /// Send a JSON message now, or park it for the next open connection.
    ///
    /// Returns `true` when the message was handed to an open transport and
    /// `false` when it was queued; queued delivery is deferred, not guaranteed.
    pub fn send<R: Serialize>(&self, message: &R) -> Result<bool> {
        self.send_text(serde_json::to_string(message)?)
    }

    /// Send a raw text payload now, or park it for the next open connection.
    pub fn send_text<S: Into<String>>(&self, text: S) -> Result<bool> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(WsError::Destroyed.into());
        }
        let sent_now = self.state_rx.borrow().is_open();
        self.command_tx
            .send(Command::Send { text: text.into() })
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(sent_now)
    }

    /// Register `callback` for events of `kind`.
    ///
    /// The returned handle removes the subscription via
    /// [`SubscriptionHandle::unsubscribe`]; dropping it without unsubscribing
    /// leaves the subscription active.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events.on(kind, callback)
    }

    /// Remove a subscription previously registered with [`ConnectionManager::on`].
    pub fn off(&self, handle: &SubscriptionHandle) {
        self.events.off(handle.id());
    }

    /// Current coarse status: `connecting`, `connected`, `closing` or
    /// `disconnected`.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.state_rx.borrow().status()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    ///
    /// Returns a receiver that notifies when the connection state changes.
    /// This is useful for detecting reconnections and re-establishing
    /// application-level subscriptions.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Consume events as a stream.
    ///
    /// Each call returns an independent stream. A consumer that falls behind
    /// the broadcast buffer observes a [`WsError::Lagged`] error and may keep
    /// reading afterwards.
    pub fn events(&self) -> impl Stream<Item = Result<Event>> {
        let mut rx = self.events.watch();
        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Event stream lagged, missed {count} events");
                        Err(WsError::Lagged { count })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Book-keeping for one connect-until-terminal-close lifecycle.
#[derive(Debug)]
struct Session {
    url: Url,
    attempt_count: u32,
    last_error: Option<Classified>,
    manual_disconnect: bool,
}

impl Session {
    fn new(url: Url) -> Self {
        Self {
            url,
            attempt_count: 0,
            last_error: None,
            manual_disconnect: false,
        }
    }
}

/// Outcome of one establishment attempt.
enum Establish {
    Opened(Box<dyn TransportSink>, Box<dyn TransportStream>),
    Failed(Failure),
    Cancelled,
}

/// How an open connection ended.
enum ServeExit {
    Stop {
        reply: Option<oneshot::Sender<()>>,
    },
    Failed(Failure),
}

/// What to do after a failure was classified.
enum RetryOutcome {
    Retry {
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Terminal,
    Stop {
        reply: Option<oneshot::Sender<()>>,
    },
}

/// Whether the connection loop keeps running.
enum Flow {
    Continue,
    Stop,
}

/// The background task that exclusively owns the transport handle.
struct ConnectionActor {
    config: Config,
    transport: Arc<dyn Transport>,
    platform: Arc<dyn Platform>,
    events: Arc<EventBus>,
    state_tx: watch::Sender<ConnectionState>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    session: Option<Session>,
    queue: MessageQueue,
    scheduler: ReconnectScheduler,
    monitor: HeartbeatMonitor,
}

impl ConnectionActor {
    /// Top-level loop: wait for commands while no session is active.
    async fn run(mut self) {
        loop {
            let command = tokio::select! {
                () = self.cancel.cancelled() => None,
                command = self.command_rx.recv() => command,
            };

            match command {
                None => {
                    self.finish_shutdown(None);
                    return;
                }
                Some(Command::Connect { url, reply }) => {
                    if let Flow::Stop = self.connect_flow(url, reply).await {
                        return;
                    }
                }
                Some(Command::Send { text }) => Self::park(&mut self.queue, &self.events, text),
                Some(Command::Disconnect { reply }) => {
                    self.finish_shutdown(Some(reply));
                    return;
                }
            }
        }
    }

    /// Drive the state machine from an explicit connect until the session
    /// reaches a terminal close or the manager shuts down.
    async fn connect_flow(&mut self, url: Url, reply: oneshot::Sender<Result<()>>) -> Flow {
        self.session = Some(Session::new(url));
        self.scheduler.reset();
        let mut pending_reply = Some(reply);

        loop {
            let url = match self.session.as_ref() {
                Some(session) => session.url.clone(),
                None => return Flow::Continue,
            };

            _ = self.state_tx.send(ConnectionState::Connecting);

            match self.establish(&url).await {
                Establish::Cancelled => {
                    self.finish_shutdown(None);
                    return Flow::Stop;
                }
                Establish::Opened(sink, stream) => {
                    if let Some(session) = self.session.as_mut() {
                        session.attempt_count = 0;
                        session.last_error = None;
                    }
                    self.scheduler.reset();
                    _ = self.state_tx.send(ConnectionState::Open {
                        since: Instant::now(),
                    });
                    #[cfg(feature = "tracing")]
                    tracing::debug!(endpoint = %url, "Connection established");
                    self.events.emit(&Event::Connected);
                    if let Some(reply) = pending_reply.take() {
                        drop(reply.send(Ok(())));
                    }

                    match self.serve(sink, stream).await {
                        ServeExit::Stop { reply } => {
                            self.finish_shutdown(reply);
                            return Flow::Stop;
                        }
                        ServeExit::Failed(failure) => {
                            let classified = self.classify_and_report(&failure, ReadyState::Closed);
                            match self.await_retry(classified).await {
                                RetryOutcome::Retry { reply } => {
                                    if reply.is_some() {
                                        pending_reply = reply;
                                    }
                                }
                                RetryOutcome::Terminal => return Flow::Continue,
                                RetryOutcome::Stop { reply } => {
                                    self.finish_shutdown(reply);
                                    return Flow::Stop;
                                }
                            }
                        }
                    }
                }
                Establish::Failed(failure) => {
                    let classified = self.classify_and_report(&failure, ReadyState::Connecting);
                    if let Some(reply) = pending_reply.take() {
                        drop(reply.send(Err(WsError::Attempt(classified.clone()).into())));
                    }
                    match self.await_retry(classified).await {
                        RetryOutcome::Retry { reply } => {
                            if reply.is_some() {
                                pending_reply = reply;
                            }
                        }
                        RetryOutcome::Terminal => return Flow::Continue,
                        RetryOutcome::Stop { reply } => {
                            self.finish_shutdown(reply);
                            return Flow::Stop;
                        }
                    }
                }
            }
        }
    }

    /// One establishment attempt, bounded by the configured deadline.
    ///
    /// Commands are deliberately not read here: an in-flight attempt is
    /// exclusive, and callers queue behind it.
    async fn establish(&self, url: &Url) -> Establish {
        tokio::select! {
            () = self.cancel.cancelled() => Establish::Cancelled,
            attempt = timeout(self.config.connect_timeout, self.transport.connect(url)) => {
                match attempt {
                    Ok(Ok((sink, stream))) => Establish::Opened(sink, stream),
                    Ok(Err(failure)) => Establish::Failed(failure),
                    Err(_) => Establish::Failed(Failure::Timeout),
                }
            }
        }
    }

    /// Service an open connection until it fails or the manager shuts down.
    async fn serve(
        &mut self,
        mut sink: Box<dyn TransportSink>,
        mut stream: Box<dyn TransportStream>,
    ) -> ServeExit {
        let (ping_tx, mut ping_rx) = mpsc::unbounded_channel();
        let (expired_tx, mut expired_rx) = mpsc::unbounded_channel();
        self.monitor
            .start(&self.config, ping_tx, expired_tx, self.cancel.child_token());

        // Flush exactly once on entering the open state, before any command
        // sent after the transition is serviced.
        if let Err(failure) = Self::flush(&mut self.queue, sink.as_mut()).await {
            self.monitor.stop();
            return ServeExit::Failed(failure);
        }

        let exit = {
            let ConnectionActor {
                command_rx,
                cancel,
                events,
                monitor,
                state_tx,
                session,
                ..
            } = self;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        sink.close(NORMAL_CLOSURE, "client disconnect").await;
                        break ServeExit::Stop { reply: None };
                    }
                    maybe_event = stream.next_event() => match maybe_event {
                        Some(TransportEvent::Text(text)) => {
                            Self::deliver(events, monitor, &text);
                        }
                        Some(TransportEvent::Closed { code, reason }) => {
                            break ServeExit::Failed(Failure::Closed { code, reason });
                        }
                        Some(TransportEvent::Failed(failure)) => {
                            break ServeExit::Failed(failure);
                        }
                        None => {
                            break ServeExit::Failed(Failure::Closed {
                                code: None,
                                reason: String::new(),
                            });
                        }
                    },
                    command = command_rx.recv() => match command {
                        None => {
                            sink.close(NORMAL_CLOSURE, "client disconnect").await;
                            break ServeExit::Stop { reply: None };
                        }
                        Some(Command::Send { text }) => {
                            if let Err(failure) = sink.send(text).await {
                                break ServeExit::Failed(failure);
                            }
                        }
                        Some(Command::Connect { url, reply }) => {
                            let outcome = match session.as_ref() {
                                Some(active) if active.url == url => Ok(()),
                                Some(active) => Err(WsError::AlreadyConnected {
                                    current: active.url.to_string(),
                                }
                                .into()),
                                None => Err(WsError::ConnectionClosed.into()),
                            };
                            drop(reply.send(outcome));
                        }
                        Some(Command::Disconnect { reply }) => {
                            if let Some(active) = session.as_mut() {
                                active.manual_disconnect = true;
                            }
                            _ = state_tx.send(ConnectionState::Closing);
                            sink.close(NORMAL_CLOSURE, "client disconnect").await;
                            break ServeExit::Stop { reply: Some(reply) };
                        }
                    },
                    Some(ping) = ping_rx.recv() => {
                        if let Err(failure) = sink.send(ping).await {
                            break ServeExit::Failed(failure);
                        }
                    }
                    Some(()) = expired_rx.recv() => {
                        // A dead link is handled exactly like a transport error.
                        sink.close(NORMAL_CLOSURE, "heartbeat timeout").await;
                        break ServeExit::Failed(Failure::HeartbeatExpired);
                    }
                }
            }
        };

        self.monitor.stop();
        exit
    }

    /// Route one inbound text frame.
    fn deliver(events: &EventBus, monitor: &HeartbeatMonitor, text: &str) {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => {
                if is_pong(&value) {
                    monitor.observe_pong();
                } else {
                    events.emit(&Event::MessageReceived {
                        payload: Payload::Json(value),
                    });
                }
            }
            Err(e) => {
                // Malformed input is isolated per message and never closes
                // the connection.
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Inbound message is not valid JSON, passing through as text");
                events.emit(&Event::ParseError {
                    raw: text.to_owned(),
                    detail: e.to_string(),
                });
                events.emit(&Event::MessageReceived {
                    payload: Payload::Text(text.to_owned()),
                });
            }
        }
    }

    /// Drain the queue into the freshly opened connection, oldest first.
    async fn flush(queue: &mut MessageQueue, sink: &mut dyn TransportSink) -> std::result::Result<(), Failure> {
        if queue.is_empty() {
            return Ok(());
        }

        let entries = queue.drain();
        #[cfg(feature = "tracing")]
        tracing::debug!(count = entries.len(), "Flushing queued messages");

        let mut pending = entries.into_iter();
        while let Some(message) = pending.next() {
            if let Err(failure) = sink.send(message.payload.clone()).await {
                // The connection died mid-flush; the undelivered tail goes
                // back in front so a reconnect replays it in order.
                let mut remaining = vec![message];
                remaining.extend(pending);
                queue.requeue_front(remaining);
                return Err(failure);
            }
        }
        Ok(())
    }

    /// Queue an outbound payload while no connection is open.
    fn park(queue: &mut MessageQueue, events: &EventBus, text: String) {
        let dropped = queue.enqueue(text);
        if dropped > 0 {
            events.emit(&Event::QueueOverflow { dropped });
        }
    }

    /// Classify a failure, record it on the session and announce it.
    fn classify_and_report(&mut self, failure: &Failure, ready_state: ReadyState) -> Classified {
        let classified = classify(failure, ready_state, self.config.environment);
        #[cfg(feature = "tracing")]
        tracing::warn!(
            category = %classified.category,
            retryable = classified.retryable,
            message = %classified.message,
            "Connection failure"
        );
        if let Some(session) = self.session.as_mut() {
            session.last_error = Some(classified.clone());
        }
        self.events.emit(&Event::Errored {
            error: classified.clone(),
        });
        classified
    }

    /// Decide what happens after a classified failure: arm a retry timer,
    /// settle into a terminal close, or stop because of a shutdown.
    async fn await_retry(&mut self, classified: Classified) -> RetryOutcome {
        if !classified.retryable {
            #[cfg(feature = "tracing")]
            tracing::error!(category = %classified.category, "Failure is not retryable, closing");
            return self.settle_closed();
        }

        let (attempt, manual) = match self.session.as_ref() {
            Some(session) => (session.attempt_count, session.manual_disconnect),
            None => return RetryOutcome::Terminal,
        };

        let delay = match self.scheduler.schedule(attempt, manual) {
            Ok(delay) => delay,
            Err(Veto::ManualDisconnect) => return RetryOutcome::Stop { reply: None },
            Err(Veto::AttemptsExhausted) => {
                #[cfg(feature = "tracing")]
                tracing::error!(attempts = attempt, "Reconnect attempts exhausted");
                self.events.emit(&Event::Exhausted {
                    attempts: attempt,
                    last_error: self.session.as_ref().and_then(|s| s.last_error.clone()),
                });
                return self.settle_closed();
            }
        };
        if let Some(session) = self.session.as_mut() {
            session.attempt_count = attempt.saturating_add(1);
        }

        // Hold the retry until the platform reports the network reachable.
        if !self.platform.is_online() {
            #[cfg(feature = "tracing")]
            tracing::info!("Network offline, holding the retry until reachability returns");
            tokio::select! {
                () = self.cancel.cancelled() => return RetryOutcome::Stop { reply: None },
                () = self.platform.wait_online() => {}
            }
        }

        _ = self.state_tx.send(ConnectionState::Reconnecting { attempt });
        self.events.emit(&Event::Reconnecting { attempt, delay });

        let ConnectionActor {
            command_rx,
            cancel,
            events,
            queue,
            state_tx,
            session,
            scheduler,
            ..
        } = self;

        let timer = tokio::time::sleep(delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return RetryOutcome::Stop { reply: None },
                () = &mut timer => return RetryOutcome::Retry { reply: None },
                command = command_rx.recv() => match command {
                    None => return RetryOutcome::Stop { reply: None },
                    Some(Command::Send { text }) => Self::park(queue, events, text),
                    Some(Command::Disconnect { reply }) => {
                        if let Some(active) = session.as_mut() {
                            active.manual_disconnect = true;
                        }
                        _ = state_tx.send(ConnectionState::Closing);
                        return RetryOutcome::Stop { reply: Some(reply) };
                    }
                    Some(Command::Connect { url, reply }) => {
                        // An explicit connect overrides the pending timer and
                        // starts a fresh attempt budget.
                        if let Some(active) = session.as_mut() {
                            active.url = url;
                            active.attempt_count = 0;
                        }
                        scheduler.reset();
                        return RetryOutcome::Retry { reply: Some(reply) };
                    }
                }
            }
        }
    }

    /// Terminal close without a manual disconnect: drop the session, drop
    /// anything still queued and settle into `Closed`.
    fn settle_closed(&mut self) -> RetryOutcome {
        _ = self.state_tx.send(ConnectionState::Closing);
        let dropped = self.queue.clear();
        if dropped > 0 {
            #[cfg(feature = "tracing")]
            tracing::warn!(dropped, "Dropping queued messages, connection will not recover");
        }
        self.session = None;
        self.scheduler.reset();
        _ = self.state_tx.send(ConnectionState::Closed);
        RetryOutcome::Terminal
    }

    /// Final bookkeeping for a manual disconnect or handle teardown. Emits
    /// one `Disconnected` event, then silences the bus for good.
    fn finish_shutdown(&mut self, reply: Option<oneshot::Sender<()>>) {
        self.monitor.stop();
        _ = self.state_tx.send(ConnectionState::Closing);
        self.queue.clear();
        self.session = None;
        _ = self.state_tx.send(ConnectionState::Closed);
        self.events.emit(&Event::Disconnected);
        self.events.close();
        if let Some(reply) = reply {
            drop(reply.send(()));
        }
    }
}
