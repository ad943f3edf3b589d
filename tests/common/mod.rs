//! Shared fixtures for integration tests.
//!
//! - [`ScriptedServer`]: the far end of an in-memory stream, driven by the
//!   test itself (read requests, answer in any order, write raw bytes)
//! - [`KvServer`]: a tiny in-memory key-value server with `WATCH` based
//!   optimistic locking, shared by any number of connections

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use kvwire_client::protocol::{
    Command, ErrorKind, FrameBuffer, FrameCodec, Request, RequestBody, Response, Value,
};
use kvwire_client::{Connection, ConnectionBuilder};
use parking_lot::Mutex;
use tokio::io::{
    duplex, split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadHalf,
    WriteHalf,
};

const STREAM_CAPACITY: usize = 256 * 1024;

/// Test-driven peer.
pub struct ScriptedServer {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
    buffer: FrameBuffer,
    queued: VecDeque<Bytes>,
    codec: FrameCodec,
}

impl ScriptedServer {
    /// Read the next request envelope.
    pub async fn next_request(&mut self) -> Request {
        loop {
            if let Some(frame) = self.queued.pop_front() {
                return self.codec.decode_request(&frame).unwrap();
            }
            let mut chunk = [0u8; 4096];
            let n = self.reader.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed the stream");
            self.queued.extend(self.buffer.push(&chunk[..n]).unwrap());
        }
    }

    /// Read the next `count` request envelopes.
    pub async fn next_requests(&mut self, count: usize) -> Vec<Request> {
        let mut requests = Vec::with_capacity(count);
        for _ in 0..count {
            requests.push(self.next_request().await);
        }
        requests
    }

    /// Send one response envelope.
    pub async fn reply(&mut self, response: &Response) {
        let bytes = self.codec.encode_response(response).unwrap();
        self.write_raw(&bytes).await;
    }

    /// Send a value for `token`.
    pub async fn reply_value(&mut self, token: u32, value: Value) {
        self.reply(&Response::Value { token, value }).await;
    }

    /// Write raw bytes to the client.
    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }
}

/// Open a connection whose far end is driven by the test.
pub fn scripted(builder: ConnectionBuilder) -> (Connection, ScriptedServer) {
    let (client, server) = duplex(STREAM_CAPACITY);
    let (client_read, client_write) = split(client);
    let (reader, writer) = split(server);

    let conn = builder.connect(client_read, client_write).unwrap();
    let server = ScriptedServer {
        reader,
        writer,
        buffer: FrameBuffer::new(),
        queued: VecDeque::new(),
        codec: FrameCodec::default(),
    };
    (conn, server)
}

/// Key space with per-key versions for optimistic locking.
#[derive(Default)]
struct Store {
    data: HashMap<Bytes, Bytes>,
    versions: HashMap<Bytes, u64>,
}

impl Store {
    fn version(&self, key: &Bytes) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn touch(&mut self, key: &Bytes) {
        *self.versions.entry(key.clone()).or_insert(0) += 1;
    }

    fn set(&mut self, key: Bytes, value: Bytes) {
        self.touch(&key);
        self.data.insert(key, value);
    }

    fn execute(&mut self, command: &Command) -> Result<Value, String> {
        let args = command.args();
        match (command.name(), args.len()) {
            ("PING", 0) => Ok(Value::SimpleString("PONG".into())),
            ("SET", 2) => {
                self.set(args[0].clone(), args[1].clone());
                Ok(Value::Okay)
            }
            ("GET", 1) => Ok(self
                .data
                .get(&args[0])
                .cloned()
                .map(Value::BulkString)
                .unwrap_or(Value::Nil)),
            ("DEL", n) if n > 0 => {
                let mut removed = 0;
                for key in args {
                    if self.data.remove(key).is_some() {
                        self.touch(key);
                        removed += 1;
                    }
                }
                Ok(Value::Int(removed))
            }
            ("INCR", 1) => {
                let current = match self.data.get(&args[0]) {
                    Some(raw) => std::str::from_utf8(raw)
                        .ok()
                        .and_then(|s| s.parse::<i64>().ok())
                        .ok_or("ERR value is not an integer")?,
                    None => 0,
                };
                let next = current + 1;
                self.set(args[0].clone(), Bytes::from(next.to_string()));
                Ok(Value::Int(next))
            }
            (name, _) => Err(format!("ERR unknown command or wrong arity '{}'", name)),
        }
    }
}

/// In-memory key-value server.
#[derive(Clone, Default)]
pub struct KvServer {
    store: Arc<Mutex<Store>>,
}

impl KvServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a client connection served by this server.
    pub fn connect(&self, builder: ConnectionBuilder) -> Connection {
        let (client, server) = duplex(STREAM_CAPACITY);
        tokio::spawn(self.clone().serve(server));
        let (reader, writer) = split(client);
        builder.connect(reader, writer).unwrap()
    }

    /// Mutate a key from outside any connection.
    pub fn set(&self, key: &str, value: &str) {
        self.store
            .lock()
            .set(Bytes::copy_from_slice(key.as_bytes()), Bytes::copy_from_slice(value.as_bytes()));
    }

    /// Read a key from outside any connection.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.store.lock().data.get(key.as_bytes()).cloned()
    }

    /// Serve one client stream until it closes.
    pub async fn serve<S>(self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = split(stream);
        let codec = FrameCodec::default();
        let mut buffer = FrameBuffer::new();
        let mut watched: HashMap<Bytes, u64> = HashMap::new();
        let mut chunk = vec![0u8; 16 * 1024];

        loop {
            let n = match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            let Ok(frames) = buffer.push(&chunk[..n]) else {
                return;
            };

            let mut out = Vec::new();
            for frame in frames {
                let Ok(request) = codec.decode_request(&frame) else {
                    return;
                };
                let response = self.handle(request, &mut watched);
                out.extend(codec.encode_response(&response).unwrap());
            }

            if writer.write_all(&out).await.is_err() {
                return;
            }
        }
    }

    fn handle(&self, request: Request, watched: &mut HashMap<Bytes, u64>) -> Response {
        let token = request.token;
        let mut store = self.store.lock();

        match request.body {
            RequestBody::Single(command) => {
                let outcome = match command.name() {
                    "WATCH" if !command.args().is_empty() => {
                        for key in command.args() {
                            watched.insert(key.clone(), store.version(key));
                        }
                        Ok(Value::Okay)
                    }
                    "UNWATCH" => {
                        watched.clear();
                        Ok(Value::Okay)
                    }
                    _ => store.execute(&command),
                };
                match outcome {
                    Ok(value) => Response::Value { token, value },
                    Err(message) => Response::Error {
                        token,
                        kind: ErrorKind::Unspecified,
                        message,
                    },
                }
            }

            RequestBody::Transaction(commands) => {
                let conflict = watched
                    .drain()
                    .any(|(key, version)| store.version(&key) != version);
                if conflict {
                    return Response::Value {
                        token,
                        value: Value::Nil,
                    };
                }

                let results = commands
                    .iter()
                    .map(|command| match store.execute(command) {
                        Ok(value) => value,
                        Err(message) => Value::Error {
                            kind: ErrorKind::Unspecified,
                            message,
                        },
                    })
                    .collect();
                Response::Value {
                    token,
                    value: Value::Array(results),
                }
            }
        }
    }
}
