//! Correlation of responses to outstanding requests.
//!
//! Every request in flight owns one [`PendingEntry`] keyed by its token. The
//! entry holds a [`Completer`], a single-use slot that resolves the caller's
//! handle. Entries leave the table exactly once: when the response arrives,
//! when the caller cancels or times out, or when the connection is torn down.
//!
//! The table is plain owned state. The connection keeps it behind its state
//! lock, so every mutation below happens with that lock held.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::error::{KvError, Result};
use crate::protocol::{RequestBody, Value};
use crate::transaction::TransactionResult;

/// What the caller of a request eventually receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Result of a single command.
    Value(Value),
    /// Result of a transaction.
    Transaction(TransactionResult),
}

impl Reply {
    /// Unwrap a single-command result.
    pub fn into_value(self) -> Result<Value> {
        match self {
            Reply::Value(value) => Ok(value),
            Reply::Transaction(_) => Err(KvError::Protocol(
                "Expected a command result, got a transaction result".into(),
            )),
        }
    }

    /// Unwrap a transaction result.
    pub fn into_transaction(self) -> Result<TransactionResult> {
        match self {
            Reply::Transaction(result) => Ok(result),
            Reply::Value(_) => Err(KvError::Protocol(
                "Expected a transaction result, got a command result".into(),
            )),
        }
    }
}

/// Shape of the request an entry is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// One command; the response value is delivered as is.
    Single,
    /// A transaction; the response must be nil or hold `commands` results.
    Transaction {
        /// Number of commands sent.
        commands: usize,
    },
}

impl RequestKind {
    /// Kind of the given request body.
    pub fn of(body: &RequestBody) -> Self {
        match body {
            RequestBody::Single(_) => RequestKind::Single,
            RequestBody::Transaction(commands) => RequestKind::Transaction {
                commands: commands.len(),
            },
        }
    }
}

/// Single-use completion slot for one request.
///
/// Completing consumes the slot, so a handle cannot be resolved twice.
#[derive(Debug)]
pub struct Completer {
    tx: oneshot::Sender<Result<Reply>>,
}

impl Completer {
    /// Create a slot and the receiver the caller awaits.
    pub fn new() -> (Self, oneshot::Receiver<Result<Reply>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Deliver an outcome. Returns `false` if the caller is gone.
    pub fn complete(self, outcome: Result<Reply>) -> bool {
        self.tx.send(outcome).is_ok()
    }

    /// Deliver a successful reply.
    pub fn resolve(self, reply: Reply) -> bool {
        self.complete(Ok(reply))
    }

    /// Deliver an error.
    pub fn reject(self, error: KvError) -> bool {
        self.complete(Err(error))
    }

    /// Whether the receiving side was dropped.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One outstanding request.
#[derive(Debug)]
pub struct PendingEntry {
    kind: RequestKind,
    completer: Completer,
    deadline: Option<Instant>,
}

impl PendingEntry {
    /// Create an entry.
    pub fn new(kind: RequestKind, completer: Completer, deadline: Option<Instant>) -> Self {
        Self {
            kind,
            completer,
            deadline,
        }
    }

    /// Shape of the request.
    #[inline]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Deadline, if any.
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Give up the entry for its completion slot.
    pub fn into_completer(self) -> Completer {
        self.completer
    }
}

/// Token to pending-entry map for one connection.
#[derive(Debug)]
pub struct CorrelationTable {
    entries: HashMap<u32, PendingEntry>,
    next_token: u32,
    max_pending: usize,
}

impl CorrelationTable {
    /// Create an empty table accepting up to `max_pending` entries.
    pub fn new(max_pending: usize) -> Self {
        Self {
            entries: HashMap::new(),
            next_token: 1,
            max_pending,
        }
    }

    /// Issue a token not held by any pending entry.
    ///
    /// Tokens increase from 1 and wrap past `u32::MAX`, skipping 0 and any
    /// token still pending.
    pub fn allocate(&mut self) -> Result<u32> {
        if self.entries.len() >= self.max_pending {
            return Err(KvError::TooManyPending {
                max: self.max_pending,
            });
        }

        loop {
            let token = self.next_token;
            self.next_token = match self.next_token.wrapping_add(1) {
                0 => 1,
                next => next,
            };
            if !self.entries.contains_key(&token) {
                return Ok(token);
            }
        }
    }

    /// Insert an entry for `token`.
    ///
    /// A token that is already pending is a programming error and is refused
    /// with `DuplicateToken`.
    pub fn register(&mut self, token: u32, entry: PendingEntry) -> Result<()> {
        if self.entries.contains_key(&token) {
            tracing::error!(token, "Refusing to register a token that is already pending");
            return Err(KvError::DuplicateToken(token));
        }
        if self.entries.len() >= self.max_pending {
            return Err(KvError::TooManyPending {
                max: self.max_pending,
            });
        }

        self.entries.insert(token, entry);
        Ok(())
    }

    /// Remove and return the entry for `token`.
    ///
    /// Fails with `UnexpectedResponse` if nothing is pending under it, so a
    /// second response for the same token never reaches a handle.
    pub fn take(&mut self, token: u32) -> Result<PendingEntry> {
        self.entries
            .remove(&token)
            .ok_or(KvError::UnexpectedResponse(token))
    }

    /// Remove an entry and reject its handle with `error`.
    ///
    /// Returns `false` if the token was not pending.
    pub fn cancel(&mut self, token: u32, error: KvError) -> bool {
        match self.entries.remove(&token) {
            Some(entry) => {
                entry.into_completer().reject(error);
                true
            }
            None => false,
        }
    }

    /// Remove every entry whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<(u32, PendingEntry)> {
        let expired: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline.is_some_and(|deadline| deadline <= now))
            .map(|(token, _)| *token)
            .collect();

        expired
            .into_iter()
            .filter_map(|token| self.entries.remove(&token).map(|entry| (token, entry)))
            .collect()
    }

    /// Remove every entry.
    pub fn drain_all(&mut self) -> Vec<(u32, PendingEntry)> {
        self.entries.drain().collect()
    }

    /// Number of pending entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending tokens in ascending order.
    pub fn pending_tokens(&self) -> Vec<u32> {
        let mut tokens: Vec<u32> = self.entries.keys().copied().collect();
        tokens.sort_unstable();
        tokens
    }

    /// Configured capacity.
    #[inline]
    pub fn max_pending(&self) -> usize {
        self.max_pending
    }
}
