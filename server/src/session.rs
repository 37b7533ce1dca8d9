//! The session actor: one Tokio task owns one game's entire mutable state
//! and is reachable only through its command mailbox. No lock is needed
//! around `Session` itself — the single task that owns it is the only thing
//! that ever touches it — the registry mutex in [`crate::app`] exists purely
//! to protect the shared connection/session *maps*, not this struct.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use indexmap::{IndexMap, IndexSet};
use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::Instant;

use shared::{Direction, Position, PlayerView, StateView, GRID_HEIGHT, GRID_WIDTH};

use crate::app::AppHandle;
use crate::codec::encode_line;
use crate::config::ServerConfig;
use crate::connection::OutboundEvent;
use crate::player::Player;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    Running,
    NameTaken,
    Gone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartError {
    NotOwner,
    Gone,
}

enum SessionCommand {
    Connect {
        key: String,
        name: String,
        outbound: mpsc::Sender<OutboundEvent>,
        resp: oneshot::Sender<Result<(), ConnectError>>,
    },
    Start {
        key: String,
        resp: oneshot::Sender<Result<(), StartError>>,
    },
    Input {
        key: String,
        direction: Direction,
    },
    Disconnect {
        key: String,
    },
}

/// A cheap, cloneable reference to a running session's mailbox.
#[derive(Clone)]
pub struct SessionHandle {
    pub code: String,
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn connect(
        &self,
        key: String,
        name: String,
        outbound: mpsc::Sender<OutboundEvent>,
    ) -> Result<(), ConnectError> {
        let (resp, resp_rx) = oneshot::channel();
        if self
            .tx
            .send(SessionCommand::Connect { key, name, outbound, resp })
            .await
            .is_err()
        {
            return Err(ConnectError::Gone);
        }
        resp_rx.await.unwrap_or(Err(ConnectError::Gone))
    }

    pub async fn start(&self, key: String) -> Result<(), StartError> {
        let (resp, resp_rx) = oneshot::channel();
        if self.tx.send(SessionCommand::Start { key, resp }).await.is_err() {
            return Err(StartError::Gone);
        }
        resp_rx.await.unwrap_or(Err(StartError::Gone))
    }

    pub async fn input(&self, key: String, direction: Direction) {
        let _ = self.tx.send(SessionCommand::Input { key, direction }).await;
    }

    pub async fn disconnect(&self, key: String) {
        let _ = self.tx.send(SessionCommand::Disconnect { key }).await;
    }
}

#[derive(Serialize)]
struct SessionJoinData {
    code: String,
    player: PlayerView,
    owner_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    players: Option<Vec<PlayerView>>,
}

#[derive(Serialize)]
struct SessionLeaveData {
    code: String,
    key: String,
    owner_key: String,
}

#[derive(Serialize)]
struct SessionStartData {
    code: String,
    state: StateView,
}

#[derive(Serialize)]
struct SessionEndData {
    code: String,
    leaderboard: Vec<Vec<PlayerView>>,
}

pub struct Session {
    code: String,
    owner: String,
    players: IndexMap<String, Player>,
    alive: IndexSet<String>,
    apples: Option<Position>,
    leaderboard: Vec<Vec<PlayerView>>,
    current_deaths: Vec<Player>,
    running: bool,
    should_stop: bool,
    tick: u64,
    tick_interval: Duration,
    game_speed: u32,
    initial_chunk_amount: usize,
    next_deadline: Instant,
    outbound: IndexMap<String, mpsc::Sender<OutboundEvent>>,
    command_rx: mpsc::Receiver<SessionCommand>,
    app: AppHandle,
}

/// If a player's head now occupies a cell elsewhere in its own body, sever
/// everything from that cell onward. Does not kill the player.
fn truncate_self_cut(player: &mut Player) {
    let head = player.chunks[0];
    if let Some(rel) = player.chunks[1..].iter().position(|p| *p == head) {
        player.chunks.truncate(rel + 1);
    }
}

impl Session {
    /// Construct the session with its owner already seated, spawn its tick
    /// task, and return a handle plus the task's `JoinHandle` so the caller
    /// can supervise it (see `App::create_session`).
    pub fn spawn(
        code: String,
        owner_key: String,
        owner_name: String,
        owner_outbound: mpsc::Sender<OutboundEvent>,
        config: &ServerConfig,
        app: AppHandle,
    ) -> (SessionHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);

        let mut session = Session {
            code: code.clone(),
            owner: owner_key.clone(),
            players: IndexMap::new(),
            alive: IndexSet::new(),
            apples: None,
            leaderboard: Vec::new(),
            current_deaths: Vec::new(),
            running: false,
            should_stop: false,
            tick: 0,
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            game_speed: config.game_speed.max(1),
            initial_chunk_amount: config.initial_chunk_amount,
            next_deadline: Instant::now(),
            outbound: IndexMap::new(),
            command_rx: rx,
            app,
        };

        let owner_player = Player::new(owner_key.clone(), owner_name, vec![Position::new(0, 0)], Direction::Up);
        let view = owner_player.to_view();
        session.players.insert(owner_key.clone(), owner_player);
        session.alive.insert(owner_key.clone());
        session.outbound.insert(owner_key.clone(), owner_outbound.clone());

        let join_data = SessionJoinData {
            code: code.clone(),
            player: view.clone(),
            owner_key: owner_key.clone(),
            players: Some(vec![view]),
        };
        let _ = owner_outbound.try_send(OutboundEvent::Send(encode_line("session_join", &join_data)));

        let join_handle = tokio::spawn(session.run());
        (SessionHandle { code, tx }, join_handle)
    }

    async fn run(mut self) {
        loop {
            let sleep = tokio::time::sleep_until(self.next_deadline);
            tokio::select! {
                maybe_cmd = self.command_rx.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                    if self.should_stop {
                        break;
                    }
                }
                _ = sleep, if self.running => {
                    self.do_tick();
                    self.next_deadline += self.tick_interval;
                    if Instant::now() > self.next_deadline {
                        warn!("session {} is falling behind its tick schedule", self.code);
                    }
                    if self.should_stop {
                        break;
                    }
                    if self.alive.len() <= 1 {
                        self.finish_game();
                        break;
                    }
                }
            }
        }
        debug!("session {} task ending", self.code);
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Connect { key, name, outbound, resp } => {
                self.handle_connect(key, name, outbound, resp)
            }
            SessionCommand::Start { key, resp } => self.handle_start(&key, resp),
            SessionCommand::Input { key, direction } => self.handle_input(&key, direction),
            SessionCommand::Disconnect { key } => self.handle_disconnect(&key),
        }
    }

    fn handle_connect(
        &mut self,
        key: String,
        name: String,
        outbound: mpsc::Sender<OutboundEvent>,
        resp: oneshot::Sender<Result<(), ConnectError>>,
    ) {
        if self.running {
            let _ = resp.send(Err(ConnectError::Running));
            return;
        }
        if self.players.values().any(|p| p.name == name) {
            let _ = resp.send(Err(ConnectError::NameTaken));
            return;
        }

        let player = Player::new(key.clone(), name, vec![Position::new(0, 0)], Direction::Up);
        let view = player.to_view();
        self.players.insert(key.clone(), player);
        self.alive.insert(key.clone());
        self.outbound.insert(key.clone(), outbound);
        let _ = resp.send(Ok(()));

        for (recipient, tx) in &self.outbound {
            let data = SessionJoinData {
                code: self.code.clone(),
                player: view.clone(),
                owner_key: self.owner.clone(),
                players: if *recipient == key {
                    Some(self.players.values().map(Player::to_view).collect())
                } else {
                    None
                },
            };
            let _ = tx.try_send(OutboundEvent::Send(encode_line("session_join", &data)));
        }
    }

    fn handle_start(&mut self, key: &str, resp: oneshot::Sender<Result<(), StartError>>) {
        if key != self.owner {
            let _ = resp.send(Err(StartError::NotOwner));
            return;
        }
        if self.running {
            // Already underway: a second start_session from the owner is a
            // no-op, not a re-deal — ignore it rather than resetting tick
            // and repositioning every live snake mid-game.
            let _ = resp.send(Ok(()));
            return;
        }
        self.running = true;
        self.tick = 0;
        self.next_deadline = Instant::now() + self.tick_interval;
        self.place_players();
        let _ = resp.send(Ok(()));

        let state = self.current_state_view();
        self.broadcast_all("session_start", &SessionStartData { code: self.code.clone(), state });
    }

    fn handle_input(&mut self, key: &str, direction: Direction) {
        if !self.alive.contains(key) {
            return;
        }
        if let Some(player) = self.players.get_mut(key) {
            player.set_direction(direction);
        }
    }

    fn handle_disconnect(&mut self, key: &str) {
        if !self.players.contains_key(key) {
            return;
        }
        if self.running {
            if let Some(p) = self.players.get(key) {
                self.current_deaths.push(p.clone());
            }
        }
        let leaver_outbound = self.outbound.shift_remove(key);
        self.players.shift_remove(key);
        self.alive.shift_remove(key);

        if self.players.is_empty() {
            self.app.remove_session(&self.code);
            self.should_stop = true;
            return;
        }

        if self.owner == key {
            self.owner = self.players.keys().next().cloned().expect("just checked non-empty");
        }

        let data = SessionLeaveData {
            code: self.code.clone(),
            key: key.to_string(),
            owner_key: self.owner.clone(),
        };
        let line = encode_line("session_leave", &data);
        let remaining: Vec<String> = self.outbound.keys().cloned().collect();
        self.broadcast_line(line.clone(), remaining.into_iter());
        if let Some(tx) = leaver_outbound {
            let _ = tx.try_send(OutboundEvent::Send(line));
        }

        if self.running && self.alive.len() <= 1 {
            self.finish_game();
            self.should_stop = true;
        }
    }

    fn place_players(&mut self) {
        let n = self.players.len() as i32;
        let center_y = GRID_HEIGHT / 2;
        let amount = self.initial_chunk_amount as i32;
        let top = center_y - (amount - 1) / 2;
        for (i, player) in self.players.values_mut().enumerate() {
            let x = GRID_WIDTH * (i as i32 + 1) / (n + 1);
            player.chunks = (0..amount).map(|dy| Position::new(x, top + dy)).collect();
            player.direction = Direction::Up;
            player.last_tail_piece = None;
        }
    }

    fn current_state_view(&self) -> StateView {
        StateView {
            tick: self.tick,
            apples: self.apples.into_iter().collect(),
            alive_players: self.alive.iter().map(|k| self.players[k].to_view()).collect(),
        }
    }

    fn do_tick(&mut self) {
        self.update_leaderboard();
        self.tick += 1;
        if self.tick % self.game_speed as u64 == 0 {
            self.run_movement();
        }
        self.maybe_generate_apple();

        let state = self.current_state_view();
        let line = encode_line("session_state_update", &state);
        let recipients: Vec<String> = self.players.keys().cloned().collect();
        self.broadcast_line(line, recipients.into_iter());
    }

    fn run_movement(&mut self) {
        let apple = self.apples;
        for key in self.alive.iter() {
            let player = self.players.get_mut(key).expect("alive keys always have a player");
            let new_head = player.head().moved(player.direction);
            player.chunks.insert(0, new_head);
            if Some(new_head) == apple {
                player.last_tail_piece = player.chunks.pop();
                self.apples = None;
            } else {
                player.chunks.pop();
            }
        }

        let wall_deaths: HashSet<String> = self
            .alive
            .iter()
            .filter(|k| !self.players[*k].head().in_bounds())
            .cloned()
            .collect();
        self.apply_deaths(wall_deaths);

        for key in self.alive.iter().cloned().collect::<Vec<_>>() {
            let player = self.players.get_mut(&key).expect("alive");
            truncate_self_cut(player);
        }

        let tail_deaths = self.resolve_tail_collisions();
        self.apply_deaths(tail_deaths);
        let overlap_deaths = self.resolve_head_overlaps();
        self.apply_deaths(overlap_deaths);
        let head_on_deaths = self.resolve_head_on_collisions();
        self.apply_deaths(head_on_deaths);

        for key in self.alive.iter().cloned().collect::<Vec<_>>() {
            let player = self.players.get_mut(&key).expect("alive");
            if let Some(tail) = player.last_tail_piece.take() {
                player.chunks.push(tail);
            }
        }
    }

    fn resolve_tail_collisions(&self) -> HashSet<String> {
        let keys: Vec<String> = self.alive.iter().cloned().collect();
        let mut dead = HashSet::new();
        for i in 0..keys.len() {
            for j in (i + 1)..keys.len() {
                let (a, b) = (&keys[i], &keys[j]);
                if dead.contains(a) || dead.contains(b) {
                    continue;
                }
                let (pa, pb) = (&self.players[a], &self.players[b]);
                let head_overlap = pa.head() == pb.head();
                let head_on = pa.len() > 1
                    && pb.len() > 1
                    && pa.chunks[0] == pb.chunks[1]
                    && pb.chunks[0] == pa.chunks[1];
                if head_overlap || head_on {
                    continue;
                }
                let mut candidates = Vec::new();
                if pb.chunks.contains(&pa.head()) {
                    candidates.push(a.clone());
                }
                if pa.chunks.contains(&pb.head()) {
                    candidates.push(b.clone());
                }
                match candidates.len() {
                    0 => {}
                    1 => {
                        dead.insert(candidates.into_iter().next().unwrap());
                    }
                    _ => {
                        for loser in self.choose_losers(&candidates) {
                            dead.insert(loser);
                        }
                    }
                }
            }
        }
        dead
    }

    fn resolve_head_overlaps(&self) -> HashSet<String> {
        let mut buckets: HashMap<Position, Vec<String>> = HashMap::new();
        for key in self.alive.iter() {
            buckets.entry(self.players[key].head()).or_default().push(key.clone());
        }
        let mut dead = HashSet::new();
        for bucket in buckets.into_values() {
            if bucket.len() >= 2 {
                for loser in self.choose_losers(&bucket) {
                    dead.insert(loser);
                }
            }
        }
        dead
    }

    fn resolve_head_on_collisions(&self) -> HashSet<String> {
        let keys: Vec<String> = self.alive.iter().cloned().collect();
        let mut dead = HashSet::new();
        for i in 0..keys.len() {
            for j in (i + 1)..keys.len() {
                let (a, b) = (&keys[i], &keys[j]);
                if dead.contains(a) || dead.contains(b) {
                    continue;
                }
                let (pa, pb) = (&self.players[a], &self.players[b]);
                if pa.len() > 1 && pb.len() > 1 && pa.chunks[0] == pb.chunks[1] && pb.chunks[0] == pa.chunks[1] {
                    for loser in self.choose_losers(&[a.clone(), b.clone()]) {
                        dead.insert(loser);
                    }
                }
            }
        }
        dead
    }

    /// The longest of `candidates` survives; ties broken uniformly at random.
    fn choose_losers(&self, candidates: &[String]) -> Vec<String> {
        let max_len = candidates.iter().map(|k| self.players[k].len()).max().unwrap_or(0);
        let longest: Vec<&String> = candidates.iter().filter(|k| self.players[*k].len() == max_len).collect();
        let winner = longest
            .choose(&mut rand::thread_rng())
            .expect("candidates is non-empty")
            .to_string();
        candidates.iter().filter(|k| **k != winner).cloned().collect()
    }

    fn apply_deaths(&mut self, dead: HashSet<String>) {
        for key in dead {
            if let Some(player) = self.players.get(&key) {
                self.current_deaths.push(player.clone());
            }
            self.alive.shift_remove(&key);
        }
    }

    fn maybe_generate_apple(&mut self) {
        if self.apples.is_some() {
            return;
        }
        let occupied: HashSet<Position> =
            self.alive.iter().flat_map(|k| self.players[k].chunks.iter().copied()).collect();

        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let candidate = Position::new(rng.gen_range(0..GRID_WIDTH), rng.gen_range(0..GRID_HEIGHT));
            if !occupied.contains(&candidate) {
                self.apples = Some(candidate);
                return;
            }
        }
        let free: Vec<Position> = (0..GRID_WIDTH)
            .flat_map(|x| (0..GRID_HEIGHT).map(move |y| Position::new(x, y)))
            .filter(|p| !occupied.contains(p))
            .collect();
        self.apples = free.choose(&mut rng).copied();
    }

    fn update_leaderboard(&mut self) {
        if self.current_deaths.is_empty() {
            return;
        }
        self.current_deaths.sort_by_key(Player::len);
        let mut places: Vec<Vec<PlayerView>> = Vec::new();
        let mut current_len = None;
        for player in self.current_deaths.drain(..) {
            let len = player.len();
            if current_len != Some(len) {
                places.push(Vec::new());
                current_len = Some(len);
            }
            places.last_mut().unwrap().push(player.to_view());
        }
        self.leaderboard.extend(places);
    }

    fn finish_game(&mut self) {
        let survivors: Vec<String> = self.alive.iter().cloned().collect();
        for key in survivors {
            if let Some(player) = self.players.get(&key) {
                self.current_deaths.push(player.clone());
            }
        }
        self.alive.clear();
        self.update_leaderboard();

        let mut leaderboard = self.leaderboard.clone();
        leaderboard.reverse();
        let data = SessionEndData { code: self.code.clone(), leaderboard };
        let line = encode_line("session_end", &data);

        for (_, tx) in self.outbound.drain(..) {
            let _ = tx.try_send(OutboundEvent::Send(line.clone()));
            let _ = tx.try_send(OutboundEvent::Detach);
        }
        self.running = false;
        self.app.remove_session(&self.code);
    }

    fn broadcast_all(&mut self, msg_type: &str, data: &impl Serialize) {
        let line = encode_line(msg_type, data);
        let recipients: Vec<String> = self.outbound.keys().cloned().collect();
        self.broadcast_line(line, recipients.into_iter());
    }

    /// Send a pre-encoded line to each of `keys`. A recipient whose mailbox
    /// is full or closed is dropped from the session rather than allowed to
    /// stall the tick loop.
    fn broadcast_line(&mut self, line: String, keys: impl Iterator<Item = String>) {
        let mut stalled = Vec::new();
        for key in keys {
            if let Some(tx) = self.outbound.get(&key) {
                if tx.try_send(OutboundEvent::Send(line.clone())).is_err() {
                    stalled.push(key);
                }
            }
        }
        for key in stalled {
            warn!("connection {key} fell behind in session {}, disconnecting", self.code);
            self.handle_disconnect(&key);
        }
    }
}
