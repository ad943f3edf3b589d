//! Request and response envelopes carried inside frames.
//!
//! A request envelope tags a single command or an ordered command list with a
//! correlation token. A response envelope carries the token back together with
//! a value or an error, or carries no token at all for server-initiated pushes.
//!
//! # Example
//!
//! ```
//! use kvwire_client::protocol::{Command, Request, RequestBody};
//!
//! let request = Request::new(7, RequestBody::Single(Command::new("GET", ["key"])));
//! assert_eq!(request.token, 7);
//! assert_eq!(request.body.command_count(), 1);
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Category of a server-reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Any error without a more specific category.
    Unspecified,
    /// A transaction was discarded because a queued command was rejected.
    ExecAbort,
    /// The server gave up waiting on the request.
    Timeout,
    /// The server lost its backend connection while serving the request.
    Disconnect,
}

/// A value returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// The null/nil marker.
    Nil,
    /// The "OK" status reply.
    Okay,
    /// Integer reply.
    Int(i64),
    /// Floating point reply.
    Double(f64),
    /// Boolean reply.
    Boolean(bool),
    /// Binary-safe string reply.
    BulkString(Bytes),
    /// Status string reply.
    SimpleString(String),
    /// Aggregate reply.
    Array(Vec<Value>),
    /// An error element nested inside an aggregate.
    Error {
        /// Error category.
        kind: ErrorKind,
        /// Server-provided message.
        message: String,
    },
}

impl Value {
    /// Build a bulk string from anything byte-like.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Value::BulkString(data.into())
    }

    /// Check for the nil marker.
    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

/// A single command: operation name plus opaque byte arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    name: String,
    args: Vec<Bytes>,
}

impl Command {
    /// Create a command from a name and its arguments.
    pub fn new<I, A>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a command without arguments.
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Operation name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arguments in order.
    #[inline]
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }
}

/// What a request carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestBody {
    /// One command.
    Single(Command),
    /// An ordered list of commands executed atomically.
    Transaction(Vec<Command>),
}

impl RequestBody {
    /// Number of commands carried.
    pub fn command_count(&self) -> usize {
        match self {
            RequestBody::Single(_) => 1,
            RequestBody::Transaction(commands) => commands.len(),
        }
    }

    /// Whether this is a transaction.
    #[inline]
    pub fn is_transaction(&self) -> bool {
        matches!(self, RequestBody::Transaction(_))
    }
}

/// A request envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation token, unique among outstanding requests.
    pub token: u32,
    /// Command or command list.
    pub body: RequestBody,
}

impl Request {
    /// Create a new request envelope.
    pub fn new(token: u32, body: RequestBody) -> Self {
        Self { token, body }
    }
}

/// A response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Successful result for one request.
    Value {
        /// Token of the originating request.
        token: u32,
        /// Result payload.
        value: Value,
    },
    /// Server error for one request.
    Error {
        /// Token of the originating request.
        token: u32,
        /// Error category.
        kind: ErrorKind,
        /// Server-provided message.
        message: String,
    },
    /// Server-initiated message, not tied to a request.
    Push {
        /// Pushed payload.
        value: Value,
    },
    /// The server is closing the connection.
    ClosingError {
        /// Reason given by the server.
        message: String,
    },
}

impl Response {
    /// Correlation token, if this response answers a request.
    pub fn token(&self) -> Option<u32> {
        match self {
            Response::Value { token, .. } | Response::Error { token, .. } => Some(*token),
            Response::Push { .. } | Response::ClosingError { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_accessors() {
        let cmd = Command::new("SET", ["key", "value"]);
        assert_eq!(cmd.name(), "SET");
        assert_eq!(cmd.args().len(), 2);
        assert_eq!(&cmd.args()[1][..], b"value");

        let bare = Command::bare("PING");
        assert!(bare.args().is_empty());
    }

    #[test]
    fn test_command_binary_args() {
        let cmd = Command::new("SET", [Bytes::from_static(b"k"), Bytes::from(vec![0u8, 255])]);
        assert_eq!(&cmd.args()[1][..], &[0u8, 255]);
    }

    #[test]
    fn test_request_body_counts() {
        let single = RequestBody::Single(Command::bare("PING"));
        assert_eq!(single.command_count(), 1);
        assert!(!single.is_transaction());

        let tx = RequestBody::Transaction(vec![Command::bare("A"), Command::bare("B")]);
        assert_eq!(tx.command_count(), 2);
        assert!(tx.is_transaction());

        assert_eq!(RequestBody::Transaction(Vec::new()).command_count(), 0);
    }

    #[test]
    fn test_response_tokens() {
        let value = Response::Value {
            token: 3,
            value: Value::Okay,
        };
        assert_eq!(value.token(), Some(3));

        let error = Response::Error {
            token: 4,
            kind: ErrorKind::Unspecified,
            message: "ERR".into(),
        };
        assert_eq!(error.token(), Some(4));

        assert_eq!(Response::Push { value: Value::Nil }.token(), None);
        assert_eq!(
            Response::ClosingError {
                message: "bye".into()
            }
            .token(),
            None
        );
    }

    #[test]
    fn test_value_helpers() {
        assert!(Value::Nil.is_nil());
        assert!(!Value::Okay.is_nil());
        assert_eq!(Value::bulk("abc"), Value::BulkString(Bytes::from_static(b"abc")));
    }
}
