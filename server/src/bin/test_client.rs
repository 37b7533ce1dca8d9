//! Manual smoke-test client: creates a session, starts it solo, and prints
//! whatever comes back. Not part of the automated test suite — a debugging
//! aid for poking at a running server by hand, in the spirit of the
//! original UDP test client this replaces.

use std::env;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, WriteHalf};
use tokio::net::TcpStream;

async fn send(writer: &mut WriteHalf<TcpStream>, msg_type: &str, data: Value) -> std::io::Result<()> {
    let line = format!("{}\n", json!({"type": msg_type, "data": data}));
    println!(">> {}", line.trim_end());
    writer.write_all(line.as_bytes()).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = env::args().nth(1).unwrap_or_else(|| "127.0.0.1:8888".to_string());
    let player_name = env::args().nth(2).unwrap_or_else(|| "tester".to_string());

    println!("connecting to {addr}");
    let stream = TcpStream::connect(&addr).await?;
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    send(&mut write_half, "create_session", json!({"player_name": player_name})).await?;
    if let Some(reply) = lines.next_line().await? {
        println!("<< {reply}");
    }

    send(&mut write_half, "start_session", json!({})).await?;

    for _ in 0..20 {
        match lines.next_line().await? {
            Some(reply) => println!("<< {reply}"),
            None => {
                println!("connection closed by server");
                break;
            }
        }
    }

    Ok(())
}
