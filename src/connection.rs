//! Connection builder and runtime loop.
//!
//! A [`Connection`] owns one byte stream to the server and multiplexes any
//! number of concurrent callers over it:
//! 1. `send` draws a token, registers a pending entry and queues the frame
//!    on the writer task, then returns a [`PendingReply`] immediately
//! 2. The read loop reassembles frames and hands them to the dispatcher,
//!    which resolves the pending entry matching each response token
//! 3. On close, peer EOF, transport failure or protocol violation, every
//!    pending caller receives the same connection error, exactly once
//!
//! # Example
//!
//! ```no_run
//! use kvwire_client::{Command, Connection, Transaction};
//!
//! # async fn run() -> kvwire_client::Result<()> {
//! let conn = Connection::builder()
//!     .request_timeout(std::time::Duration::from_secs(1))
//!     .connect_tcp("127.0.0.1:6379")
//!     .await?;
//!
//! conn.execute(Command::new("SET", ["k", "v"])).await?;
//! let result = conn
//!     .exec(Transaction::new().command("GET", ["k"]).command("DEL", ["k"]))
//!     .await?;
//! println!("{:?}", result);
//!
//! conn.close();
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ConnectionConfig;
use crate::correlation::{Completer, CorrelationTable, PendingEntry, Reply, RequestKind};
use crate::dispatcher::{DispatchOutcome, ResponseDispatcher};
use crate::error::{KvError, Result};
use crate::protocol::{Command, FrameBuffer, FrameCodec, RequestBody, Value};
use crate::request::RequestBuilder;
use crate::transaction::{Transaction, TransactionResult};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle};

/// Why a connection stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed locally, or the peer closed the stream.
    Closed,
    /// Reading or writing the stream failed.
    Transport(String),
    /// The peer violated the protocol.
    Protocol(String),
    /// The server announced it is closing the connection.
    ServerClosing(String),
}

impl CloseReason {
    /// Error delivered to pending callers and later sends.
    pub fn to_error(&self) -> KvError {
        match self {
            CloseReason::Closed => KvError::ConnectionClosed,
            CloseReason::Transport(message) => KvError::Transport(message.clone()),
            CloseReason::Protocol(message) => KvError::Protocol(message.clone()),
            CloseReason::ServerClosing(message) => KvError::ClosingError(message.clone()),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Closed => write!(f, "closed"),
            CloseReason::Transport(message) => write!(f, "transport failure: {}", message),
            CloseReason::Protocol(message) => write!(f, "protocol violation: {}", message),
            CloseReason::ServerClosing(message) => write!(f, "server closing: {}", message),
        }
    }
}

/// Builder for configuring and opening a connection.
pub struct ConnectionBuilder {
    config: ConnectionConfig,
    push_tx: Option<mpsc::UnboundedSender<Value>>,
}

impl ConnectionBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self::from_config(ConnectionConfig::default())
    }

    /// Create a builder from an existing configuration.
    pub fn from_config(config: ConnectionConfig) -> Self {
        Self {
            config,
            push_tx: None,
        }
    }

    /// Current configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Set the maximum number of requests awaiting a response.
    ///
    /// Default: 65536
    pub fn max_pending(mut self, limit: usize) -> Self {
        self.config.max_pending = limit;
        self
    }

    /// Set the maximum queued frames before backpressure applies.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.max_pending_frames = limit;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.backpressure_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Give every request a deadline.
    ///
    /// Default: none
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set how often expired requests are swept.
    ///
    /// Default: 10 ms
    pub fn timeout_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.timeout_sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the largest frame payload accepted in either direction.
    ///
    /// Default: 512 MiB
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the socket read buffer size.
    ///
    /// Default: 64 KiB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Forward server push messages to `tx`. Without it they are dropped.
    pub fn push_sender(mut self, tx: mpsc::UnboundedSender<Value>) -> Self {
        self.push_tx = Some(tx);
        self
    }

    /// Start a connection over an already established stream.
    ///
    /// Must be called within a tokio runtime.
    pub fn connect<R, W>(self, reader: R, writer: W) -> Result<Connection>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.config.validate()?;
        Ok(Connection::start(self.config, self.push_tx, reader, writer))
    }

    /// Connect over TCP.
    pub async fn connect_tcp<A: tokio::net::ToSocketAddrs>(self, addr: A) -> Result<Connection> {
        self.config.validate()?;
        let (reader, writer) = crate::transport::connect_tcp(addr).await?;
        self.connect(reader, writer)
    }

    /// Connect over a Unix Domain Socket.
    #[cfg(unix)]
    pub async fn connect_unix<P: AsRef<std::path::Path>>(self, path: P) -> Result<Connection> {
        self.config.validate()?;
        let (reader, writer) = crate::transport::connect_unix(path).await?;
        self.connect(reader, writer)
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable state guarded by one lock, so that checking for teardown and
/// registering a request cannot interleave with teardown itself.
struct State {
    table: CorrelationTable,
    closed: Option<CloseReason>,
}

/// State shared by the connection, its tasks and outstanding replies.
struct Shared {
    state: Mutex<State>,
    /// Held from token allocation until the frame is queued, so wire order
    /// follows token order.
    send_order: AsyncMutex<()>,
    writer: WriterHandle,
    codec: FrameCodec,
    request_timeout: Option<Duration>,
    closed_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl Shared {
    /// Stop the connection and reject every pending entry.
    ///
    /// Only the first call has an effect.
    fn teardown(&self, reason: CloseReason) -> bool {
        let drained = {
            let mut state = self.state.lock();
            if state.closed.is_some() {
                return false;
            }
            state.closed = Some(reason.clone());
            state.table.drain_all()
        };

        tracing::debug!(%reason, cancelled = drained.len(), "Connection torn down");
        for (_, entry) in drained {
            entry.into_completer().reject(reason.to_error());
        }

        self.closed_tx.send_replace(true);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        true
    }

    fn close_error(&self) -> Option<KvError> {
        self.state.lock().closed.as_ref().map(CloseReason::to_error)
    }

    fn cancel(&self, token: u32, error: KvError) -> bool {
        self.state.lock().table.cancel(token, error)
    }

    fn expire(&self, now: Instant) {
        let expired = self.state.lock().table.expire(now);
        if expired.is_empty() {
            return;
        }

        tracing::debug!(expired = expired.len(), "Requests timed out");
        for (token, entry) in expired {
            tracing::trace!(token, "Request deadline passed");
            entry.into_completer().reject(KvError::Timeout);
        }
    }
}

/// A multiplexed connection to the server.
///
/// Share it between tasks with `Arc<Connection>`. Dropping it closes the
/// connection.
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Create a new connection builder.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    fn start<R, W>(
        config: ConnectionConfig,
        push_tx: Option<mpsc::UnboundedSender<Value>>,
        reader: R,
        writer: W,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let codec = FrameCodec::new(config.max_frame_size);
        let (writer, writer_task) = spawn_writer_task(writer, config.writer_config());
        let (closed_tx, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                table: CorrelationTable::new(config.max_pending),
                closed: None,
            }),
            send_order: AsyncMutex::new(()),
            writer,
            codec,
            request_timeout: config.request_timeout(),
            closed_tx,
            tasks: Mutex::new(Vec::new()),
        });

        let writer_abort = writer_task.abort_handle();
        let monitor = tokio::spawn({
            let shared = shared.clone();
            async move {
                let reason = match writer_task.await {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => CloseReason::Transport(e.to_string()),
                    Err(e) if e.is_cancelled() => return,
                    Err(e) => CloseReason::Transport(e.to_string()),
                };
                shared.teardown(reason);
            }
        });

        let dispatcher = ResponseDispatcher::new(codec, push_tx);
        let reader_task = tokio::spawn({
            let shared = shared.clone();
            async move {
                let reason = read_loop(reader, &shared, dispatcher, &config).await;
                shared.teardown(reason);
            }
        });

        shared.tasks.lock().extend([
            reader_task.abort_handle(),
            writer_abort,
            monitor.abort_handle(),
        ]);

        // A task may have failed before its handle was recorded
        let closed_early = shared.state.lock().closed.clone();
        if let Some(reason) = closed_early {
            for task in shared.tasks.lock().drain(..) {
                task.abort();
            }
            tracing::debug!(%reason, "Connection closed during startup");
        }

        Connection { shared }
    }

    /// Send a request and return its completion handle.
    ///
    /// Returns once the frame is queued for writing; the response is awaited
    /// through the returned [`PendingReply`]. Concurrent calls are queued in
    /// the order they reach `send`, and their frames are written in that same
    /// order.
    pub async fn send(&self, body: RequestBody) -> Result<PendingReply> {
        let deadline = self
            .shared
            .request_timeout
            .map(|timeout| Instant::now() + timeout);
        let (completer, rx) = Completer::new();

        let _order = self.shared.send_order.lock().await;

        let request = {
            let mut state = self.shared.state.lock();
            if let Some(reason) = &state.closed {
                return Err(reason.to_error());
            }
            let kind = RequestKind::of(&body);
            let request = RequestBuilder::new(&mut state.table).build(body)?;
            state
                .table
                .register(request.token, PendingEntry::new(kind, completer, deadline))?;
            request
        };

        // From here on dropping the reply cancels the entry
        let reply = PendingReply::new(request.token, rx, Arc::downgrade(&self.shared));

        let payload = self.shared.codec.request_payload(&request)?;
        tracing::trace!(
            token = request.token,
            commands = request.body.command_count(),
            bytes = payload.len(),
            "Sending request"
        );

        if let Err(e) = self
            .shared
            .writer
            .send(OutboundFrame::new(Bytes::from(payload)))
            .await
        {
            return Err(self.shared.close_error().unwrap_or(e));
        }

        Ok(reply)
    }

    /// Send one command.
    pub async fn send_command(&self, command: Command) -> Result<PendingReply> {
        self.send(RequestBody::Single(command)).await
    }

    /// Send a transaction as one request.
    pub async fn send_transaction(&self, transaction: Transaction) -> Result<PendingReply> {
        self.send(transaction.into_body()).await
    }

    /// Send one command and wait for its result.
    pub async fn execute(&self, command: Command) -> Result<Value> {
        self.send_command(command).await?.wait().await?.into_value()
    }

    /// Run a transaction and wait for its outcome.
    ///
    /// An empty transaction still goes to the server, which settles any
    /// watched keys.
    pub async fn exec(&self, transaction: Transaction) -> Result<TransactionResult> {
        self.send_transaction(transaction)
            .await?
            .wait()
            .await?
            .into_transaction()
    }

    /// Close the connection.
    ///
    /// Every pending request fails with `ConnectionClosed`. Calling it again
    /// has no effect.
    pub fn close(&self) {
        self.shared.teardown(CloseReason::Closed);
    }

    /// Whether the connection has stopped.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed.is_some()
    }

    /// Why the connection stopped, if it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.state.lock().closed.clone()
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.state.lock().table.len()
    }

    /// Get the current backpressure status.
    pub fn is_backpressure_active(&self) -> bool {
        self.shared.writer.is_backpressure_active()
    }

    /// Get the current queued frame count.
    pub fn pending_frames(&self) -> usize {
        self.shared.writer.pending_count()
    }

    /// Wait until the connection has stopped, and return why.
    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.shared.closed_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.close_reason().unwrap_or(CloseReason::Closed)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.teardown(CloseReason::Closed);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Connection")
            .field("pending", &state.table.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Main read loop - reads frames and dispatches responses.
///
/// Returns why the loop stopped. Also sweeps request deadlines when they are
/// enabled.
async fn read_loop<R>(
    mut reader: R,
    shared: &Shared,
    dispatcher: ResponseDispatcher,
    config: &ConnectionConfig,
) -> CloseReason
where
    R: AsyncRead + Unpin,
{
    let mut frame_buffer =
        FrameBuffer::with_capacity_and_max_frame(config.read_buffer_size, config.max_frame_size);
    let mut buf = vec![0u8; config.read_buffer_size];

    let sweep_enabled = shared.request_timeout.is_some();
    let mut sweep = tokio::time::interval(config.timeout_sweep_interval());
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = match read {
                    Ok(0) => {
                        tracing::debug!("Peer closed the connection");
                        return CloseReason::Closed;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        tracing::error!(error = %e, "Read failed");
                        return CloseReason::Transport(e.to_string());
                    }
                };

                let frames = match frame_buffer.push(&buf[..n]) {
                    Ok(frames) => frames,
                    Err(e) => {
                        tracing::error!(error = %e, "Malformed frame, closing connection");
                        return CloseReason::Protocol(protocol_message(e));
                    }
                };

                for frame in frames {
                    let outcome = {
                        let mut state = shared.state.lock();
                        dispatcher.on_frame(&frame, &mut state.table)
                    };
                    match outcome {
                        Ok(DispatchOutcome::Closing(message)) => {
                            return CloseReason::ServerClosing(message);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Protocol violation, closing connection");
                            return CloseReason::Protocol(protocol_message(e));
                        }
                    }
                }
            }

            _ = sweep.tick(), if sweep_enabled => {
                shared.expire(Instant::now());
            }
        }
    }
}

fn protocol_message(error: KvError) -> String {
    match error {
        KvError::Protocol(message) => message,
        other => other.to_string(),
    }
}

/// Completion handle for one request.
///
/// Resolves exactly once: with the reply, a server error, a local timeout or
/// cancellation, or the connection error. Dropping an unresolved handle
/// cancels the request; a response arriving later is discarded.
pub struct PendingReply {
    token: u32,
    rx: oneshot::Receiver<Result<Reply>>,
    shared: Weak<Shared>,
    done: bool,
}

impl PendingReply {
    fn new(token: u32, rx: oneshot::Receiver<Result<Reply>>, shared: Weak<Shared>) -> Self {
        Self {
            token,
            rx,
            shared,
            done: false,
        }
    }

    /// Correlation token of the request.
    #[inline]
    pub fn token(&self) -> u32 {
        self.token
    }

    /// Wait for the outcome.
    pub async fn wait(mut self) -> Result<Reply> {
        let outcome = (&mut self.rx).await;
        self.done = true;
        outcome.unwrap_or(Err(KvError::ConnectionClosed))
    }

    /// Wait for the outcome at most `timeout`.
    ///
    /// On expiry the request is cancelled and `Timeout` returned.
    pub async fn wait_timeout(mut self, timeout: Duration) -> Result<Reply> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(outcome) => {
                self.done = true;
                outcome.unwrap_or(Err(KvError::ConnectionClosed))
            }
            Err(_) => {
                self.done = true;
                if self.remove_entry(KvError::Timeout) {
                    return Err(KvError::Timeout);
                }
                // Resolved between the timer firing and the removal
                match self.rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(KvError::Timeout),
                }
            }
        }
    }

    /// Abandon the request.
    ///
    /// Returns `true` if it was still pending. The request may still run on
    /// the server.
    pub fn cancel(mut self) -> bool {
        self.done = true;
        self.remove_entry(KvError::Cancelled)
    }

    fn remove_entry(&self, error: KvError) -> bool {
        match self.shared.upgrade() {
            Some(shared) => {
                let removed = shared.cancel(self.token, error);
                if removed {
                    tracing::trace!(token = self.token, "Request abandoned");
                }
                removed
            }
            None => false,
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if !self.done {
            self.remove_entry(KvError::Cancelled);
        }
    }
}

impl fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply")
            .field("token", &self.token)
            .finish()
    }
}
