//! Routing of decoded frames to pending callers.
//!
//! The dispatcher decodes one frame payload into a response envelope and
//! resolves the matching entry of the correlation table. Responses may arrive
//! in any order; only the token decides who receives them.
//!
//! Outcomes per envelope:
//! - `Value` / `Error` with a pending token: the entry is taken and its
//!   handle resolved or rejected.
//! - `Value` / `Error` with an unknown token: logged and dropped. This is the
//!   expected fate of a response to a cancelled or timed-out request.
//! - `Push`: forwarded to the push channel, if one is installed.
//! - `ClosingError`: reported to the caller, which tears the connection down.
//!
//! A malformed envelope or a transaction reply with the wrong number of
//! results is returned as a `Protocol` error and is fatal for the connection.

use tokio::sync::mpsc;

use crate::correlation::{CorrelationTable, PendingEntry, Reply, RequestKind};
use crate::error::{KvError, Result};
use crate::protocol::{FrameCodec, Response, Value};
use crate::transaction::interpret_transaction;

/// What happened to one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A pending handle was resolved or rejected.
    Delivered(u32),
    /// No entry was pending under the token.
    Orphaned(u32),
    /// A push message was handled.
    Pushed,
    /// The server announced it is closing the connection.
    Closing(String),
}

/// Decodes frames and resolves pending handles.
#[derive(Debug)]
pub struct ResponseDispatcher {
    codec: FrameCodec,
    push_tx: Option<mpsc::UnboundedSender<Value>>,
}

impl ResponseDispatcher {
    /// Create a dispatcher. Push messages go to `push_tx` if given.
    pub fn new(codec: FrameCodec, push_tx: Option<mpsc::UnboundedSender<Value>>) -> Self {
        Self { codec, push_tx }
    }

    /// Handle one frame payload.
    pub fn on_frame(&self, payload: &[u8], table: &mut CorrelationTable) -> Result<DispatchOutcome> {
        let response = self.codec.decode_response(payload)?;
        self.dispatch(response, table)
    }

    /// Handle one decoded response envelope.
    pub fn dispatch(
        &self,
        response: Response,
        table: &mut CorrelationTable,
    ) -> Result<DispatchOutcome> {
        match response {
            Response::Push { value } => {
                self.forward_push(value);
                Ok(DispatchOutcome::Pushed)
            }

            Response::ClosingError { message } => {
                tracing::debug!(reason = %message, "Server is closing the connection");
                Ok(DispatchOutcome::Closing(message))
            }

            Response::Value { token, value } => {
                let Some(entry) = Self::take_or_orphan(table, token) else {
                    return Ok(DispatchOutcome::Orphaned(token));
                };

                let kind = entry.kind();
                let completer = entry.into_completer();
                let reply = match kind {
                    RequestKind::Single => Reply::Value(value),
                    RequestKind::Transaction { commands } => {
                        match interpret_transaction(value, commands) {
                            Ok(result) => Reply::Transaction(result),
                            Err(e) => {
                                let message = match e {
                                    KvError::Protocol(message) => message,
                                    other => other.to_string(),
                                };
                                completer.reject(KvError::Protocol(message.clone()));
                                return Err(KvError::Protocol(message));
                            }
                        }
                    }
                };

                if !completer.resolve(reply) {
                    tracing::trace!(token, "Caller dropped before its response arrived");
                }
                Ok(DispatchOutcome::Delivered(token))
            }

            Response::Error {
                token,
                kind,
                message,
            } => {
                let Some(entry) = Self::take_or_orphan(table, token) else {
                    return Ok(DispatchOutcome::Orphaned(token));
                };

                tracing::debug!(token, ?kind, "Server rejected request");
                if !entry
                    .into_completer()
                    .reject(KvError::Server { kind, message })
                {
                    tracing::trace!(token, "Caller dropped before its response arrived");
                }
                Ok(DispatchOutcome::Delivered(token))
            }
        }
    }

    fn take_or_orphan(
        table: &mut CorrelationTable,
        token: u32,
    ) -> Option<PendingEntry> {
        match table.take(token) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(token, error = %e, "Dropping orphan response");
                None
            }
        }
    }

    fn forward_push(&self, value: Value) {
        match &self.push_tx {
            Some(tx) => {
                if tx.send(value).is_err() {
                    tracing::debug!("Push receiver dropped, discarding push message");
                }
            }
            None => tracing::debug!("No push receiver installed, discarding push message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::Completer;
    use crate::protocol::ErrorKind;
    use crate::transaction::TransactionResult;
    use tokio::sync::oneshot;

    fn register(
        table: &mut CorrelationTable,
        kind: RequestKind,
    ) -> (u32, oneshot::Receiver<Result<Reply>>) {
        let token = table.allocate().unwrap();
        let (completer, rx) = Completer::new();
        table
            .register(token, PendingEntry::new(kind, completer, None))
            .unwrap();
        (token, rx)
    }

    fn frame(response: &Response) -> Vec<u8> {
        crate::codec::MsgPackCodec::encode(response).unwrap()
    }

    #[test]
    fn test_out_of_order_delivery() {
        let dispatcher = ResponseDispatcher::new(FrameCodec::default(), None);
        let mut table = CorrelationTable::new(16);
        let (a, mut rx_a) = register(&mut table, RequestKind::Single);
        let (b, mut rx_b) = register(&mut table, RequestKind::Single);

        let reply_b = Response::Value {
            token: b,
            value: Value::bulk("B"),
        };
        let reply_a = Response::Value {
            token: a,
            value: Value::bulk("A"),
        };
        assert_eq!(
            dispatcher.on_frame(&frame(&reply_b), &mut table).unwrap(),
            DispatchOutcome::Delivered(b)
        );
        assert_eq!(
            dispatcher.on_frame(&frame(&reply_a), &mut table).unwrap(),
            DispatchOutcome::Delivered(a)
        );

        assert_eq!(rx_a.try_recv().unwrap().unwrap(), Reply::Value(Value::bulk("A")));
        assert_eq!(rx_b.try_recv().unwrap().unwrap(), Reply::Value(Value::bulk("B")));
        assert!(table.is_empty());
    }

    #[test]
    fn test_server_error_goes_to_one_handle() {
        let dispatcher = ResponseDispatcher::new(FrameCodec::default(), None);
        let mut table = CorrelationTable::new(16);
        let (a, mut rx_a) = register(&mut table, RequestKind::Single);
        let (_b, mut rx_b) = register(&mut table, RequestKind::Single);

        let response = Response::Error {
            token: a,
            kind: ErrorKind::Unspecified,
            message: "WRONGTYPE".into(),
        };
        dispatcher.dispatch(response, &mut table).unwrap();

        assert!(matches!(
            rx_a.try_recv().unwrap(),
            Err(KvError::Server { kind: ErrorKind::Unspecified, ref message }) if message == "WRONGTYPE"
        ));
        assert!(rx_b.try_recv().is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_orphan_is_not_fatal() {
        let dispatcher = ResponseDispatcher::new(FrameCodec::default(), None);
        let mut table = CorrelationTable::new(16);
        let (token, mut rx) = register(&mut table, RequestKind::Single);

        let orphan = Response::Value {
            token: 999,
            value: Value::Okay,
        };
        assert_eq!(
            dispatcher.dispatch(orphan, &mut table).unwrap(),
            DispatchOutcome::Orphaned(999)
        );

        // Duplicate response: first delivers, second is an orphan
        let reply = Response::Value {
            token,
            value: Value::Int(1),
        };
        dispatcher.dispatch(reply.clone(), &mut table).unwrap();
        assert_eq!(
            dispatcher.dispatch(reply, &mut table).unwrap(),
            DispatchOutcome::Orphaned(token)
        );
        assert_eq!(rx.try_recv().unwrap().unwrap(), Reply::Value(Value::Int(1)));
    }

    #[test]
    fn test_transaction_interpretation() {
        let dispatcher = ResponseDispatcher::new(FrameCodec::default(), None);
        let mut table = CorrelationTable::new(16);
        let (done, mut rx_done) = register(&mut table, RequestKind::Transaction { commands: 2 });
        let (aborted, mut rx_aborted) =
            register(&mut table, RequestKind::Transaction { commands: 2 });

        dispatcher
            .dispatch(
                Response::Value {
                    token: done,
                    value: Value::Array(vec![Value::Okay, Value::bulk("v")]),
                },
                &mut table,
            )
            .unwrap();
        dispatcher
            .dispatch(
                Response::Value {
                    token: aborted,
                    value: Value::Nil,
                },
                &mut table,
            )
            .unwrap();

        assert_eq!(
            rx_done.try_recv().unwrap().unwrap(),
            Reply::Transaction(TransactionResult::Completed(vec![
                Value::Okay,
                Value::bulk("v")
            ]))
        );
        assert_eq!(
            rx_aborted.try_recv().unwrap().unwrap(),
            Reply::Transaction(TransactionResult::Aborted)
        );
    }

    #[test]
    fn test_transaction_count_mismatch_is_fatal() {
        let dispatcher = ResponseDispatcher::new(FrameCodec::default(), None);
        let mut table = CorrelationTable::new(16);
        let (token, mut rx) = register(&mut table, RequestKind::Transaction { commands: 3 });

        let result = dispatcher.dispatch(
            Response::Value {
                token,
                value: Value::Array(vec![Value::Okay, Value::Okay]),
            },
            &mut table,
        );

        assert!(matches!(result, Err(KvError::Protocol(_))));
        assert!(matches!(rx.try_recv().unwrap(), Err(KvError::Protocol(_))));
    }

    #[test]
    fn test_exec_abort_error_is_server_error() {
        let dispatcher = ResponseDispatcher::new(FrameCodec::default(), None);
        let mut table = CorrelationTable::new(16);
        let (token, mut rx) = register(&mut table, RequestKind::Transaction { commands: 2 });

        dispatcher
            .dispatch(
                Response::Error {
                    token,
                    kind: ErrorKind::ExecAbort,
                    message: "EXECABORT".into(),
                },
                &mut table,
            )
            .unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(KvError::Server {
                kind: ErrorKind::ExecAbort,
                ..
            })
        ));
    }

    #[test]
    fn test_push_forwarded() {
        let (push_tx, mut push_rx) = mpsc::unbounded_channel();
        let dispatcher = ResponseDispatcher::new(FrameCodec::default(), Some(push_tx));
        let mut table = CorrelationTable::new(16);

        let outcome = dispatcher
            .dispatch(
                Response::Push {
                    value: Value::bulk("news"),
                },
                &mut table,
            )
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Pushed);
        assert_eq!(push_rx.try_recv().unwrap(), Value::bulk("news"));
    }

    #[test]
    fn test_push_without_receiver_is_dropped() {
        let dispatcher = ResponseDispatcher::new(FrameCodec::default(), None);
        let mut table = CorrelationTable::new(16);
        let outcome = dispatcher
            .dispatch(Response::Push { value: Value::Nil }, &mut table)
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Pushed);
    }

    #[test]
    fn test_closing_error_reported() {
        let dispatcher = ResponseDispatcher::new(FrameCodec::default(), None);
        let mut table = CorrelationTable::new(16);
        let outcome = dispatcher
            .dispatch(
                Response::ClosingError {
                    message: "shutdown".into(),
                },
                &mut table,
            )
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Closing("shutdown".into()));
    }

    #[test]
    fn test_malformed_frame_is_protocol_error() {
        let dispatcher = ResponseDispatcher::new(FrameCodec::default(), None);
        let mut table = CorrelationTable::new(16);
        let result = dispatcher.on_frame(b"\xC1\xC1", &mut table);
        assert!(matches!(result, Err(KvError::Protocol(_))));

        // An empty frame is a valid boundary but not a valid envelope
        let result = dispatcher.on_frame(&[], &mut table);
        assert!(matches!(result, Err(KvError::Protocol(_))));
    }
}
