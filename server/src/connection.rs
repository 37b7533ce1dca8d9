//! Per-connection actor: one Tokio task per accepted TCP socket.
//!
//! Mirrors the teacher's network task layout — one task reads, one channel
//! carries outbound traffic — but here both directions live in a single
//! task racing each other with `tokio::select!`, since each connection (unlike
//! the UDP server's single shared socket) owns its own stream exclusively.

use log::{info, warn};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use shared::{connection_key, CreateSessionData, InputData, JoinData};

use crate::app::AppHandle;
use crate::codec::{decode_data, decode_line, encode_line, ProtocolViolation};
use crate::session::{ConnectError, SessionHandle, StartError};

const KNOWN_TYPES: &[&str] = &["create_session", "join", "start_session", "input"];
const OUTBOUND_MAILBOX_SIZE: usize = 64;

/// A message destined for a connection's writer task, produced by whichever
/// session that connection currently belongs to.
pub enum OutboundEvent {
    Send(String),
    /// The session this connection belonged to is gone; stop routing
    /// session-bound commands until the peer joins or creates a new one.
    Detach,
}

#[derive(Serialize)]
struct EmptyData {}

#[derive(Serialize)]
struct InvalidSessionData {
    exists: bool,
}

pub async fn handle_connection(stream: TcpStream, app: AppHandle) {
    let peer = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("could not read peer address, dropping connection: {e}");
            return;
        }
    };
    let key = connection_key(&peer.ip().to_string(), peer.port());
    app.register_connection(key.clone());
    info!("connection {key} accepted");

    let (read_half, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundEvent>(OUTBOUND_MAILBOX_SIZE);
    let mut session: Option<SessionHandle> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        match handle_line(&line, &key, &app, &outbound_tx, &mut session).await {
                            Ok(None) => {}
                            Ok(Some(response)) => {
                                if writer.write_all(response.as_bytes()).await.is_err() {
                                    break;
                                }
                            }
                            Err(violation) => {
                                warn!("connection {key}: protocol violation: {violation}");
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        info!("connection {key} closed by peer");
                        break;
                    }
                    Err(e) => {
                        warn!("connection {key}: read error: {e}");
                        break;
                    }
                }
            }
            event = outbound_rx.recv() => {
                match event {
                    Some(OutboundEvent::Send(line)) => {
                        if writer.write_all(line.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    Some(OutboundEvent::Detach) => {
                        session = None;
                    }
                    None => unreachable!("this task holds its own outbound_tx clone alive"),
                }
            }
        }
    }

    if let Some(handle) = session.take() {
        handle.disconnect(key.clone()).await;
    }
    app.remove_connection(&key);
    info!("connection {key} torn down");
}

async fn handle_line(
    line: &str,
    key: &str,
    app: &AppHandle,
    outbound_tx: &mpsc::Sender<OutboundEvent>,
    session: &mut Option<SessionHandle>,
) -> Result<Option<String>, ProtocolViolation> {
    let envelope = decode_line(line, KNOWN_TYPES)?;

    match envelope.msg_type.as_str() {
        "create_session" => {
            let data: CreateSessionData = decode_data(&envelope)?;
            match app.create_session(key.to_string(), data.player_name, outbound_tx.clone()) {
                Ok(handle) => {
                    *session = Some(handle);
                    Ok(None)
                }
                Err(_) => {
                    log::error!("connection {key}: exhausted invite-code attempts creating a session");
                    Ok(None)
                }
            }
        }
        "join" => {
            let data: JoinData = decode_data(&envelope)?;
            match app.get_session(&data.code) {
                None => Ok(Some(encode_line("invalid_session", &InvalidSessionData { exists: false }))),
                Some(handle) => {
                    match handle.connect(key.to_string(), data.player_name, outbound_tx.clone()).await {
                        Ok(()) => {
                            if let Some(previous) = session.take() {
                                previous.disconnect(key.to_string()).await;
                            }
                            *session = Some(handle);
                            Ok(None)
                        }
                        Err(ConnectError::Running) => {
                            Ok(Some(encode_line("invalid_session", &InvalidSessionData { exists: true })))
                        }
                        Err(ConnectError::NameTaken) => {
                            Ok(Some(encode_line("player_name_already_taken", &EmptyData {})))
                        }
                        Err(ConnectError::Gone) => {
                            Ok(Some(encode_line("invalid_session", &InvalidSessionData { exists: false })))
                        }
                    }
                }
            }
        }
        "start_session" => match session.as_ref() {
            None => Ok(Some(encode_line("not_in_session", &EmptyData {}))),
            Some(handle) => match handle.start(key.to_string()).await {
                Ok(()) => Ok(None),
                Err(StartError::NotOwner) => Ok(Some(encode_line("not_session_owner", &EmptyData {}))),
                Err(StartError::Gone) => Ok(Some(encode_line("not_in_session", &EmptyData {}))),
            },
        },
        "input" => {
            let data: InputData = decode_data(&envelope)?;
            match session.as_ref() {
                None => Ok(Some(encode_line("not_in_session", &EmptyData {}))),
                Some(handle) => {
                    handle.input(key.to_string(), data.new_direction).await;
                    Ok(None)
                }
            }
        }
        other => unreachable!("decode_line already rejects unknown types, got {other}"),
    }
}
