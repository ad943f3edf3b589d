//! # kvwire-client
//!
//! Multiplexing and framing core of a key-value store client.
//!
//! Many callers share one connection. Each request carries a correlation
//! token; responses may come back in any order and are routed to the caller
//! holding the matching token.
//!
//! ## Architecture
//!
//! - **Framing**: varint length prefix + MessagePack envelope ([`protocol`])
//! - **Correlation**: token to pending-handle table ([`correlation`])
//! - **Dispatch**: decoded responses resolve pending handles ([`dispatcher`])
//! - **Transactions**: ordered command lists sent under one token, answered
//!   with all results or nil ([`transaction`])
//! - **Connection**: one writer task, one read loop, shared teardown
//!   ([`Connection`])
//!
//! ## Example
//!
//! ```no_run
//! use kvwire_client::{Command, Connection, TransactionResult, Transaction};
//!
//! # async fn run() -> kvwire_client::Result<()> {
//! let conn = Connection::builder().connect_tcp("127.0.0.1:6379").await?;
//!
//! // Pipelined: both requests are on the wire before either answer arrives
//! let a = conn.send_command(Command::new("GET", ["a"])).await?;
//! let b = conn.send_command(Command::new("GET", ["b"])).await?;
//! let (a, b) = (a.wait().await?, b.wait().await?);
//!
//! match conn.exec(Transaction::new().command("INCR", ["n"])).await? {
//!     TransactionResult::Completed(values) => println!("{:?}", values),
//!     TransactionResult::Aborted => println!("aborted"),
//! }
//! # let _ = (a, b);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod request;
pub mod transaction;
pub mod transport;
pub mod writer;

mod connection;

pub use config::ConnectionConfig;
pub use connection::{CloseReason, Connection, ConnectionBuilder, PendingReply};
pub use correlation::Reply;
pub use error::{KvError, Result};
pub use protocol::{Command, ErrorKind, RequestBody, Value};
pub use request::RequestBuilder;
pub use transaction::{interpret_transaction, Transaction, TransactionResult};
