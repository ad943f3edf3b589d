//! Atomic transactions.
//!
//! A [`Transaction`] is an ordered command list sent as one request under one
//! token. The server either runs every command, in order, and answers with an
//! array holding one result per command, or answers with nil because the
//! transaction was aborted (for example a watched key changed).
//!
//! # Example
//!
//! ```
//! use kvwire_client::{interpret_transaction, Transaction, TransactionResult, Value};
//!
//! let tx = Transaction::new()
//!     .command("SET", ["k", "v"])
//!     .command("GET", ["k"]);
//! assert_eq!(tx.len(), 2);
//!
//! let reply = Value::Array(vec![Value::Okay, Value::bulk("v")]);
//! assert_eq!(
//!     interpret_transaction(reply, tx.len()).unwrap(),
//!     TransactionResult::Completed(vec![Value::Okay, Value::bulk("v")]),
//! );
//! assert_eq!(
//!     interpret_transaction(Value::Nil, tx.len()).unwrap(),
//!     TransactionResult::Aborted,
//! );
//! ```

use bytes::Bytes;

use crate::error::{KvError, Result};
use crate::protocol::{Command, RequestBody, Value};

/// An ordered list of commands executed atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    commands: Vec<Command>,
}

impl Transaction {
    /// Create an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command.
    pub fn add(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    /// Append a command built from a name and arguments.
    pub fn command<I, A>(self, name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        self.add(Command::new(name, args))
    }

    /// Number of commands.
    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether no command was added.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Commands in execution order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Convert into a request body, preserving command order.
    pub fn into_body(self) -> RequestBody {
        RequestBody::Transaction(self.commands)
    }
}

impl From<Vec<Command>> for Transaction {
    fn from(commands: Vec<Command>) -> Self {
        Self { commands }
    }
}

/// Outcome of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionResult {
    /// The server discarded the transaction without running it.
    Aborted,
    /// One result per command, in command order.
    Completed(Vec<Value>),
}

impl TransactionResult {
    /// Whether the transaction was aborted.
    #[inline]
    pub fn is_aborted(&self) -> bool {
        matches!(self, TransactionResult::Aborted)
    }

    /// Per-command results, or `None` if aborted.
    pub fn into_values(self) -> Option<Vec<Value>> {
        match self {
            TransactionResult::Aborted => None,
            TransactionResult::Completed(values) => Some(values),
        }
    }
}

/// Interpret the server's reply to a transaction of `expected` commands.
///
/// Nil means aborted. An array must hold exactly `expected` results; any other
/// count or shape is a protocol violation.
pub fn interpret_transaction(value: Value, expected: usize) -> Result<TransactionResult> {
    match value {
        Value::Nil => Ok(TransactionResult::Aborted),
        Value::Array(values) if values.len() == expected => {
            Ok(TransactionResult::Completed(values))
        }
        Value::Array(values) => Err(KvError::Protocol(format!(
            "Transaction of {} commands answered with {} results",
            expected,
            values.len()
        ))),
        other => Err(KvError::Protocol(format!(
            "Transaction answered with non-array value {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorKind;
    use proptest::prelude::*;

    #[test]
    fn test_builder_preserves_order() {
        let tx = Transaction::new()
            .command("WATCH", ["k"])
            .add(Command::new("SET", ["k", "1"]))
            .command("INCR", ["k"]);

        let names: Vec<_> = tx.commands().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, ["WATCH", "SET", "INCR"]);

        match tx.into_body() {
            RequestBody::Transaction(commands) => assert_eq!(commands.len(), 3),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_empty_transaction() {
        let tx = Transaction::new();
        assert!(tx.is_empty());
        assert_eq!(
            interpret_transaction(Value::Array(Vec::new()), 0).unwrap(),
            TransactionResult::Completed(Vec::new())
        );
    }

    #[test]
    fn test_nil_is_abort() {
        let result = interpret_transaction(Value::Nil, 3).unwrap();
        assert!(result.is_aborted());
        assert_eq!(result.into_values(), None);
    }

    #[test]
    fn test_nested_nil_is_a_value() {
        let reply = Value::Array(vec![Value::Okay, Value::Nil]);
        let result = interpret_transaction(reply, 2).unwrap();
        assert_eq!(result.into_values(), Some(vec![Value::Okay, Value::Nil]));
    }

    #[test]
    fn test_nested_errors_are_kept_in_place() {
        let failed = Value::Error {
            kind: ErrorKind::Unspecified,
            message: "WRONGTYPE".into(),
        };
        let reply = Value::Array(vec![Value::Okay, failed.clone(), Value::Int(2)]);
        let result = interpret_transaction(reply, 3).unwrap();
        assert_eq!(
            result,
            TransactionResult::Completed(vec![Value::Okay, failed, Value::Int(2)])
        );
    }

    #[test]
    fn test_non_array_is_protocol_error() {
        let result = interpret_transaction(Value::Okay, 1);
        assert!(matches!(result, Err(KvError::Protocol(_))));
    }

    proptest! {
        #[test]
        fn prop_count_must_match(expected in 0usize..8, actual in 0usize..8) {
            let reply = Value::Array((0..actual as i64).map(Value::Int).collect());
            let result = interpret_transaction(reply, expected);
            if expected == actual {
                let values = result.unwrap().into_values().unwrap();
                prop_assert_eq!(values.len(), expected);
                for (index, value) in values.iter().enumerate() {
                    prop_assert_eq!(value, &Value::Int(index as i64));
                }
            } else {
                prop_assert!(matches!(result, Err(KvError::Protocol(_))));
            }
        }
    }
}
