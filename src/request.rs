//! Request construction.
//!
//! [`RequestBuilder`] pairs a command, or an ordered command list, with a
//! freshly allocated token. It borrows the correlation table only to draw the
//! token; registering the pending entry is left to the caller, which does so
//! under the same lock.

use crate::correlation::CorrelationTable;
use crate::error::Result;
use crate::protocol::{Command, Request, RequestBody};
use crate::transaction::Transaction;

/// Builds wire-ready requests with unique tokens.
pub struct RequestBuilder<'a> {
    table: &'a mut CorrelationTable,
}

impl<'a> RequestBuilder<'a> {
    /// Draw tokens from `table`.
    pub fn new(table: &'a mut CorrelationTable) -> Self {
        Self { table }
    }

    /// Wrap one command.
    pub fn build_single(&mut self, command: Command) -> Result<Request> {
        self.build(RequestBody::Single(command))
    }

    /// Wrap a transaction as one request; command order is kept verbatim.
    pub fn build_transaction(&mut self, transaction: Transaction) -> Result<Request> {
        self.build(transaction.into_body())
    }

    /// Wrap an arbitrary body.
    pub fn build(&mut self, body: RequestBody) -> Result<Request> {
        let token = self.table.allocate()?;
        Ok(Request::new(token, body))
    }
}
