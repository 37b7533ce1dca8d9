//! End-to-end tests driving the server over real TCP sockets: accept loop,
//! envelope framing, session lobby, and the tick loop's broadcasts, all
//! exercised the way an actual client would see them.

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

use server::app::AppHandle;
use server::config::ServerConfig;

/// Bind on an ephemeral port, spawn the accept loop, and return its address.
async fn spawn_server(config: ServerConfig) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().unwrap().to_string();
    let app = AppHandle::new(config);
    tokio::spawn(app.run_accept_loop(listener));
    addr
}

async fn fast_config() -> ServerConfig {
    ServerConfig { tick_interval_ms: 20, ..ServerConfig::default() }
}

struct Client {
    writer: tokio::net::tcp::OwnedWriteHalf,
    lines: tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
}

impl Client {
    async fn connect(addr: &str) -> Client {
        let stream = TcpStream::connect(addr).await.expect("connect to server");
        let (read_half, writer) = stream.into_split();
        Client { writer, lines: BufReader::new(read_half).lines() }
    }

    async fn send(&mut self, msg_type: &str, data: Value) {
        let line = format!("{}\n", json!({ "type": msg_type, "data": data }));
        self.writer.write_all(line.as_bytes()).await.expect("write line");
    }

    async fn recv(&mut self) -> Value {
        let line = timeout(Duration::from_secs(2), self.lines.next_line())
            .await
            .expect("reply within timeout")
            .expect("read line")
            .expect("connection stayed open");
        serde_json::from_str(&line).expect("reply is valid json")
    }

    async fn recv_closed(&mut self) {
        let line = timeout(Duration::from_secs(2), self.lines.next_line())
            .await
            .expect("close observed within timeout")
            .expect("read does not error");
        assert!(line.is_none(), "expected connection to close, got {line:?}");
    }
}

#[tokio::test]
async fn create_session_replies_with_session_join() {
    let addr = spawn_server(ServerConfig::default()).await;
    let mut client = Client::connect(&addr).await;

    client.send("create_session", json!({"player_name": "alice"})).await;
    let reply = client.recv().await;

    assert_eq!(reply["type"], "session_join");
    assert_eq!(reply["data"]["player"]["name"], "alice");
    assert!(reply["data"]["code"].as_str().unwrap().len() == 4);
    assert_eq!(reply["data"]["owner_key"], reply["data"]["player"]["key"]);
}

#[tokio::test]
async fn joining_an_unknown_code_is_rejected() {
    let addr = spawn_server(ServerConfig::default()).await;
    let mut client = Client::connect(&addr).await;

    client.send("join", json!({"code": "ZZZZ", "player_name": "bob"})).await;
    let reply = client.recv().await;

    assert_eq!(reply["type"], "invalid_session");
    assert_eq!(reply["data"]["exists"], false);
}

#[tokio::test]
async fn second_player_can_join_and_sees_the_roster() {
    let addr = spawn_server(ServerConfig::default()).await;
    let mut owner = Client::connect(&addr).await;
    owner.send("create_session", json!({"player_name": "alice"})).await;
    let join_reply = owner.recv().await;
    let code = join_reply["data"]["code"].as_str().unwrap().to_string();

    let mut guest = Client::connect(&addr).await;
    guest.send("join", json!({"code": code, "player_name": "bob"})).await;
    let guest_reply = guest.recv().await;

    assert_eq!(guest_reply["type"], "session_join");
    let players = guest_reply["data"]["players"].as_array().expect("roster included for joiner");
    assert_eq!(players.len(), 2);

    let owner_broadcast = owner.recv().await;
    assert_eq!(owner_broadcast["type"], "session_join");
    assert_eq!(owner_broadcast["data"]["player"]["name"], "bob");
    assert!(owner_broadcast["data"]["players"].is_null());
}

#[tokio::test]
async fn duplicate_player_name_is_rejected() {
    let addr = spawn_server(ServerConfig::default()).await;
    let mut owner = Client::connect(&addr).await;
    owner.send("create_session", json!({"player_name": "alice"})).await;
    let code = owner.recv().await["data"]["code"].as_str().unwrap().to_string();

    let mut guest = Client::connect(&addr).await;
    guest.send("join", json!({"code": code, "player_name": "alice"})).await;
    let reply = guest.recv().await;

    assert_eq!(reply["type"], "player_name_already_taken");
}

#[tokio::test]
async fn only_the_owner_may_start_the_session() {
    let addr = spawn_server(ServerConfig::default()).await;
    let mut owner = Client::connect(&addr).await;
    owner.send("create_session", json!({"player_name": "alice"})).await;
    let code = owner.recv().await["data"]["code"].as_str().unwrap().to_string();

    let mut guest = Client::connect(&addr).await;
    guest.send("join", json!({"code": code, "player_name": "bob"})).await;
    guest.recv().await;
    owner.recv().await;

    guest.send("start_session", json!({})).await;
    let reply = guest.recv().await;
    assert_eq!(reply["type"], "not_session_owner");
}

#[tokio::test]
async fn starting_a_session_broadcasts_initial_state_and_then_ticks() {
    let addr = spawn_server(fast_config().await).await;
    let mut owner = Client::connect(&addr).await;
    owner.send("create_session", json!({"player_name": "alice"})).await;
    owner.recv().await;

    owner.send("start_session", json!({})).await;
    let start = owner.recv().await;
    assert_eq!(start["type"], "session_start");
    assert_eq!(start["data"]["state"]["tick"], 0);
    assert_eq!(start["data"]["state"]["alive_players"].as_array().unwrap().len(), 1);

    let tick = owner.recv().await;
    assert_eq!(tick["type"], "session_state_update");
    assert_eq!(tick["data"]["tick"], 1);
}

#[tokio::test]
async fn input_after_start_changes_the_broadcast_direction() {
    let addr = spawn_server(fast_config().await).await;
    let mut owner = Client::connect(&addr).await;
    owner.send("create_session", json!({"player_name": "alice"})).await;
    owner.recv().await;
    owner.send("start_session", json!({})).await;
    owner.recv().await; // session_start

    owner.send("input", json!({"new_direction": 3})).await; // Right
    let tick = owner.recv().await;
    let players = tick["data"]["alive_players"].as_array().unwrap();
    assert_eq!(players[0]["direction"], 3);
}

#[tokio::test]
async fn input_before_joining_a_session_is_rejected() {
    let addr = spawn_server(ServerConfig::default()).await;
    let mut client = Client::connect(&addr).await;

    client.send("input", json!({"new_direction": 1})).await;
    let reply = client.recv().await;
    assert_eq!(reply["type"], "not_in_session");
}

#[tokio::test]
async fn leaving_before_start_notifies_remaining_players_and_promotes_owner() {
    let addr = spawn_server(ServerConfig::default()).await;
    let mut owner = Client::connect(&addr).await;
    owner.send("create_session", json!({"player_name": "alice"})).await;
    let code = owner.recv().await["data"]["code"].as_str().unwrap().to_string();

    let mut guest = Client::connect(&addr).await;
    guest.send("join", json!({"code": code, "player_name": "bob"})).await;
    guest.recv().await;
    owner.recv().await; // session_join broadcast about bob

    drop(guest);

    let leave = owner.recv().await;
    assert_eq!(leave["type"], "session_leave");
}

#[tokio::test]
async fn a_lone_player_disconnecting_tears_the_session_down() {
    let addr = spawn_server(ServerConfig::default()).await;
    let mut owner = Client::connect(&addr).await;
    owner.send("create_session", json!({"player_name": "alice"})).await;
    let code = owner.recv().await["data"]["code"].as_str().unwrap().to_string();
    drop(owner);

    // Give the registry a moment to process the disconnect before probing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut other = Client::connect(&addr).await;
    other.send("join", json!({"code": code, "player_name": "someone"})).await;
    let reply = other.recv().await;
    assert_eq!(reply["type"], "invalid_session");
    assert_eq!(reply["data"]["exists"], false);
}

#[tokio::test]
async fn malformed_json_closes_the_connection() {
    let addr = spawn_server(ServerConfig::default()).await;
    let mut client = Client::connect(&addr).await;
    client.writer.write_all(b"not json at all\n").await.unwrap();
    client.recv_closed().await;
}

#[tokio::test]
async fn unknown_message_type_closes_the_connection() {
    let addr = spawn_server(ServerConfig::default()).await;
    let mut client = Client::connect(&addr).await;
    client.send("do_a_backflip", json!({})).await;
    client.recv_closed().await;
}

#[tokio::test]
async fn missing_data_field_closes_the_connection() {
    let addr = spawn_server(ServerConfig::default()).await;
    let mut client = Client::connect(&addr).await;
    let line = format!("{}\n", json!({"type": "create_session"}));
    client.writer.write_all(line.as_bytes()).await.unwrap();
    client.recv_closed().await;
}
