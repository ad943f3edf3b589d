//! Pipelined commands and an optimistic transaction over one connection.
//!
//! This example demonstrates:
//! - Pipelining several GETs before awaiting any reply
//! - Guarding a read-modify-write with WATCH and retrying on abort
//!
//! # Running
//!
//! Point it at a server speaking the framed protocol:
//!
//! ```text
//! cargo run --example pipeline -- 127.0.0.1:6379
//! ```

use kvwire_client::{Command, Connection, Transaction, TransactionResult, Value};

const MAX_ATTEMPTS: usize = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:6379".to_string());

    let conn = Connection::builder()
        .request_timeout(std::time::Duration::from_secs(2))
        .connect_tcp(addr.as_str())
        .await?;

    conn.execute(Command::new("SET", ["balance", "100"])).await?;

    // All three requests are on the wire before the first reply is read
    let mut replies = Vec::new();
    for key in ["balance", "owner", "missing"] {
        replies.push((key, conn.send_command(Command::new("GET", [key])).await?));
    }
    for (key, reply) in replies {
        println!("GET {} -> {:?}", key, reply.wait().await?.into_value()?);
    }

    for attempt in 1..=MAX_ATTEMPTS {
        conn.execute(Command::new("WATCH", ["balance"])).await?;
        let balance = match conn.execute(Command::new("GET", ["balance"])).await? {
            Value::BulkString(raw) => std::str::from_utf8(&raw)?.parse::<i64>()?,
            _ => 0,
        };

        let tx = Transaction::new()
            .command("SET", ["balance".to_string(), (balance - 10).to_string()])
            .command("GET", ["balance"]);

        match conn.exec(tx).await? {
            TransactionResult::Completed(values) => {
                println!("withdrew on attempt {}: {:?}", attempt, values);
                break;
            }
            TransactionResult::Aborted => println!("balance changed, retrying"),
        }
    }

    conn.close();
    Ok(())
}
