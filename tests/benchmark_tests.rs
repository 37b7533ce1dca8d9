//! Performance benchmarks for the hot paths a live session exercises every
//! tick: envelope framing and broadcasting the wire state of a full lobby.
//! These run as ordinary `#[test]`s (no `cargo bench` harness in the
//! dependency stack) and assert generous wall-clock ceilings rather than
//! precise throughput numbers, so they stay robust across machines while
//! still catching an accidental quadratic blowup.
//!
//! Run with `cargo test --release benchmark_` for numbers that mean
//! anything; debug builds are fine for the regression-catching assertions.

use std::time::Instant;

use serde_json::json;

use server::codec::{decode_data, decode_line, encode_line};
use shared::{Direction, PlayerView, Position, StateView};

fn sample_state(player_count: usize, chunks_per_player: usize) -> StateView {
    let alive_players = (0..player_count)
        .map(|i| PlayerView {
            key: format!("127.0.0.1:{}", 9000 + i),
            name: format!("player-{i}"),
            chunks: (0..chunks_per_player).map(|c| Position::new(i as i32, c as i32)).collect(),
            direction: Direction::Right,
        })
        .collect();
    StateView { tick: 1234, apples: vec![Position::new(3, 3)], alive_players }
}

/// Encoding one tick's state update is on the critical path of every
/// session's tick loop, once per tick, regardless of how many players are
/// watching (the line is built once and broadcast to everyone).
#[test]
fn benchmark_state_update_encoding() {
    let state = sample_state(8, 12);
    let iterations = 20_000;

    let start = Instant::now();
    for _ in 0..iterations {
        let _ = encode_line("session_state_update", &state);
    }
    let duration = start.elapsed();

    println!(
        "state_update encode: {} iterations in {:?} ({:.0} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );
    assert!(duration.as_millis() < 500, "encoding a state update got unexpectedly slow");
}

/// A full lobby's roster (as sent on `session_join` to a newly-joined
/// player) is the largest single payload besides a running tick's state.
#[test]
fn benchmark_large_roster_encoding() {
    let players: Vec<PlayerView> = (0..32)
        .map(|i| PlayerView {
            key: format!("127.0.0.1:{}", 9000 + i),
            name: format!("player-{i}"),
            chunks: vec![Position::new(i, 0)],
            direction: Direction::Up,
        })
        .collect();

    let iterations = 5_000;
    let start = Instant::now();
    for _ in 0..iterations {
        let _ = encode_line("session_join", &json!({"players": players}));
    }
    let duration = start.elapsed();

    println!(
        "32-player roster encode: {} iterations in {:?} ({:.0} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );
    assert!(duration.as_millis() < 500);
}

/// Every inbound line goes through `decode_line` before dispatch; this is
/// the one function every byte a client sends must pass through.
#[test]
fn benchmark_envelope_decoding() {
    const KNOWN: &[&str] = &["input"];
    let line = r#"{"type":"input","data":{"new_direction":3}}"#;
    let iterations = 50_000;

    let start = Instant::now();
    for _ in 0..iterations {
        let envelope = decode_line(line, KNOWN).unwrap();
        let _: shared::InputData = decode_data(&envelope).unwrap();
    }
    let duration = start.elapsed();

    println!(
        "input decode: {} iterations in {:?} ({:.0} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );
    assert!(duration.as_millis() < 500);
}

/// Round-trips a state update through encode then decode back into a
/// `serde_json::Value`, approximating the cost a test client (or a
/// slow-path introspecting proxy) pays per tick.
#[test]
fn benchmark_state_update_roundtrip() {
    let state = sample_state(16, 20);
    let iterations = 10_000;

    let start = Instant::now();
    for _ in 0..iterations {
        let line = encode_line("session_state_update", &state);
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "session_state_update");
    }
    let duration = start.elapsed();

    println!(
        "state_update roundtrip: {} iterations in {:?} ({:.2} us/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );
    assert!(duration.as_millis() < 1000);
}
