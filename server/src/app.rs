//! The process-wide registry: live connections and live sessions.
//!
//! This is the one piece of state genuinely shared across tasks, so it's the
//! one piece of state behind a lock. Everything else (a session's own
//! simulation state, a connection's own socket) is owned exclusively by the
//! single task responsible for it.

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use log::{error, info, warn};
use rand::seq::SliceRandom;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use shared::{INVITE_CODE_ALPHABET, INVITE_CODE_LEN};

use crate::config::ServerConfig;
use crate::connection::{self, OutboundEvent};
use crate::session::{Session, SessionHandle};

const CREATE_SESSION_ATTEMPTS: usize = 5;

struct Registry {
    connections: IndexMap<String, ()>,
    sessions: IndexMap<String, SessionHandle>,
}

/// A cheap, cloneable handle to the shared registry.
#[derive(Clone)]
pub struct AppHandle {
    registry: Arc<Mutex<Registry>>,
    config: Arc<ServerConfig>,
}

#[derive(Debug)]
pub struct SessionsExhausted;

impl AppHandle {
    pub fn new(config: ServerConfig) -> Self {
        AppHandle {
            registry: Arc::new(Mutex::new(Registry { connections: IndexMap::new(), sessions: IndexMap::new() })),
            config: Arc::new(config),
        }
    }

    #[cfg(test)]
    pub fn new_for_test() -> Self {
        AppHandle::new(ServerConfig::default())
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }

    pub fn register_connection(&self, key: String) {
        self.registry.lock().unwrap().connections.insert(key, ());
    }

    pub fn remove_connection(&self, key: &str) {
        self.registry.lock().unwrap().connections.shift_remove(key);
    }

    pub fn get_session(&self, code: &str) -> Option<SessionHandle> {
        self.registry.lock().unwrap().sessions.get(code).cloned()
    }

    /// Create and spawn a brand new session with `owner` as its sole
    /// founding player. Retries invite-code generation on collision; gives
    /// up after a handful of attempts (astronomically unlikely at this
    /// alphabet size, but we don't spin forever).
    pub fn create_session(
        &self,
        owner_key: String,
        owner_name: String,
        owner_outbound: mpsc::Sender<OutboundEvent>,
    ) -> Result<SessionHandle, SessionsExhausted> {
        // Held across Session::spawn (a plain sync call, no `.await` inside
        // the critical section) so no other create_session can win the same
        // code between the uniqueness check and the insert.
        let mut registry = self.registry.lock().unwrap();
        let mut code = None;
        for _ in 0..CREATE_SESSION_ATTEMPTS {
            let candidate = generate_invite_code();
            if !registry.sessions.contains_key(&candidate) {
                code = Some(candidate);
                break;
            }
        }
        let code = code.ok_or(SessionsExhausted)?;

        let (handle, join_handle) =
            Session::spawn(code.clone(), owner_key, owner_name, owner_outbound, &self.config, self.clone());
        registry.sessions.insert(code.clone(), handle.clone());
        drop(registry);

        let app = self.clone();
        let reaper_code = code.clone();
        tokio::spawn(async move {
            if let Err(e) = join_handle.await {
                error!("session {reaper_code} task ended abnormally: {e}");
            }
            app.remove_session(&reaper_code);
        });

        info!("created session {code}");
        Ok(handle)
    }

    pub fn remove_session(&self, code: &str) {
        if self.registry.lock().unwrap().sessions.shift_remove(code).is_some() {
            info!("removed session {code}");
        }
    }

    /// Accept connections off `listener` forever, spawning one task per
    /// accepted socket. Returns only if the listener itself fails.
    pub async fn run_accept_loop(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!("accepted connection from {addr}");
                    let app = self.clone();
                    tokio::spawn(connection::handle_connection(stream, app));
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                }
            }
        }
    }
}

fn generate_invite_code() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITE_CODE_LEN)
        .map(|_| *INVITE_CODE_ALPHABET.choose(&mut rng).expect("alphabet is non-empty") as char)
        .collect()
}
