use crate::table::{Outbound, Outcome, Table};
use crate::view::{build_view, lobby_summary};
use hearthside_protocol::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use uuid::Uuid;

/// How long a vacated seat stays reserved for its credential after a
/// non-explicit disconnect.
pub const GRACE_WINDOW: Duration = Duration::from_secs(30);

/// The fixed set of tables, created once at startup and never destroyed.
pub const TABLE_SEEDS: &[(&str, &str)] = &[
    ("ember", "The Ember Court"),
    ("gale", "Gale's Crossing"),
    ("thorn", "Thornhollow"),
    ("tide", "Tidewater Deep"),
];

pub type ConnId = Uuid;
pub type SharedHub = Arc<Mutex<Hub>>;

/// ---- session store ----

/// What a reconnect credential buys back: a named seat at a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatClaim {
    pub table: String,
    pub seat: usize,
    pub name: String,
}

/// Durable credential -> seat bindings, outliving any single connection.
/// A credential resolves to at most one claim; once revoked it never
/// resolves again.
#[derive(Default)]
pub struct SessionStore {
    claims: HashMap<Uuid, SeatClaim>,
}

impl SessionStore {
    pub fn register(&mut self, table: &str, seat: usize, name: &str) -> Uuid {
        let credential = Uuid::new_v4();
        self.claims.insert(
            credential,
            SeatClaim {
                table: table.to_string(),
                seat,
                name: name.to_string(),
            },
        );
        credential
    }

    pub fn resolve(&self, credential: &Uuid) -> Option<&SeatClaim> {
        self.claims.get(credential)
    }

    /// Idempotent: revoking an unknown credential is a no-op.
    pub fn revoke(&mut self, credential: &Uuid) {
        self.claims.remove(credential);
    }
}

/// ---- connection registry ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub table: String,
    pub seat: usize,
    pub credential: Uuid,
}

/// One live connection. The entry exists exactly as long as the socket
/// does; `kill` lets the hub terminate a superseded connection's read
/// loop from the outside.
pub struct ConnEntry {
    pub tx: Outbound,
    pub kill: Arc<Notify>,
    pub binding: Option<Binding>,
}

/// ---- hub ----

/// All coordination state, owned behind one lock. Every inbound message
/// and timer callback locks, mutates, broadcasts, unlocks; nothing else
/// touches tables or sessions.
pub struct Hub {
    pub tables: HashMap<String, Table>,
    pub sessions: SessionStore,
    pub connections: HashMap<ConnId, ConnEntry>,
}

impl Hub {
    pub fn new() -> Self {
        let tables = TABLE_SEEDS
            .iter()
            .map(|(id, name)| (id.to_string(), Table::new(*id, *name)))
            .collect();
        Hub {
            tables,
            sessions: SessionStore::default(),
            connections: HashMap::new(),
        }
    }

    pub fn shared() -> SharedHub {
        Arc::new(Mutex::new(Hub::new()))
    }
}

impl Default for Hub {
    fn default() -> Self {
        Hub::new()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("unknown table")]
    UnknownTable,
    #[error("display name cannot be empty")]
    EmptyName,
    #[error("table is full")]
    TableFull,
    #[error("table is locked")]
    TableLocked,
    #[error("already seated at a table")]
    AlreadySeated,
}

/// ---- connection lifecycle ----

pub fn register_connection(hub: &SharedHub, conn: ConnId, tx: Outbound, kill: Arc<Notify>) {
    let mut h = hub.lock();
    let tables = lobby_summary(h.tables.values());
    let _ = tx.send(ServerToClient::Lobby { tables });
    h.connections.insert(
        conn,
        ConnEntry {
            tx,
            kill,
            binding: None,
        },
    );
    tracing::debug!(conn = %conn, "connection registered");
}

/// Non-explicit disconnect: the connection binding dies immediately, the
/// seat (if any) enters grace.
pub fn handle_disconnect(hub: &SharedHub, conn: ConnId) {
    let mut h = hub.lock();
    let Some(entry) = h.connections.remove(&conn) else {
        return;
    };
    let Some(binding) = entry.binding else {
        return;
    };
    let Some(table) = h.tables.get_mut(&binding.table) else {
        return;
    };
    let seat = &mut table.seats[binding.seat];
    // A reconnect may already have rebound this seat to a newer
    // connection; only the current credential holder enters grace.
    if seat.credential != Some(binding.credential) {
        return;
    }
    seat.conn = None;
    if let Some(stale) = seat.grace.take() {
        stale.abort();
    }
    let hub2 = hub.clone();
    let (table_id, seat_idx, credential) =
        (binding.table.clone(), binding.seat, binding.credential);
    seat.grace = Some(tokio::spawn(async move {
        tokio::time::sleep(GRACE_WINDOW).await;
        expire_grace(&hub2, &table_id, seat_idx, credential);
    }));
    tracing::info!(table = %binding.table, seat = binding.seat, "connection dropped, seat in grace");
    broadcast_table(&h.tables[&binding.table]);
}

/// Grace expiry. Runs on the shared queue like any other event; the seat
/// is re-checked under the lock because the timer may have been queued
/// behind a reconnect or leave that already won.
pub fn expire_grace(hub: &SharedHub, table_id: &str, seat_idx: usize, credential: Uuid) {
    let mut h = hub.lock();
    let Some(table) = h.tables.get_mut(table_id) else {
        return;
    };
    let seat = &mut table.seats[seat_idx];
    if seat.conn.is_some() || seat.credential != Some(credential) {
        return;
    }
    seat.grace = None;
    let name = seat.name.take();
    seat.credential = None;
    if let Some(name) = &name {
        table.log_event(LogKind::System, format!("{}'s seat is released.", name));
    }
    table.clear_ephemeral(seat_idx);
    h.sessions.revoke(&credential);
    tracing::info!(table = table_id, seat = seat_idx, "grace window elapsed, seat vacated");
    broadcast_table(&h.tables[table_id]);
    broadcast_lobby(&h);
}

/// ---- join / leave / reconnect ----

pub fn join_table(hub: &SharedHub, conn: ConnId, table_id: &str, name: &str) {
    let mut h = hub.lock();
    let Some(tx) = h.connections.get(&conn).map(|c| c.tx.clone()) else {
        return;
    };
    match try_join(&mut h, conn, &tx, table_id, name) {
        Ok((seat, credential)) => {
            let _ = tx.send(ServerToClient::JoinAccepted {
                credential,
                table: table_id.to_string(),
                seat,
                is_gm: seat == 0,
            });
            tracing::info!(table = table_id, seat, name, "player joined");
            broadcast_table(&h.tables[table_id]);
            broadcast_lobby(&h);
        }
        Err(err) => {
            tracing::debug!(table = table_id, name, %err, "join rejected");
            let _ = tx.send(ServerToClient::JoinRejected {
                reason: err.to_string(),
            });
        }
    }
}

fn try_join(
    h: &mut Hub,
    conn: ConnId,
    tx: &Outbound,
    table_id: &str,
    name: &str,
) -> Result<(usize, Uuid), JoinError> {
    if h.connections
        .get(&conn)
        .is_some_and(|c| c.binding.is_some())
    {
        return Err(JoinError::AlreadySeated);
    }
    let name = clamp_text(name, NAME_MAX);
    if name.is_empty() {
        return Err(JoinError::EmptyName);
    }
    let table = h.tables.get_mut(table_id).ok_or(JoinError::UnknownTable)?;
    let seat = table.find_free_seat().ok_or(JoinError::TableFull)?;
    if table.locked && seat != 0 {
        return Err(JoinError::TableLocked);
    }

    table.ensure_session();
    table.seats[seat].name = Some(name.clone());
    table.seats[seat].conn = Some(tx.clone());
    let credential = h.sessions.register(table_id, seat, &name);
    table.seats[seat].credential = Some(credential);
    table.log_event(LogKind::Join, format!("{} takes seat {}.", name, seat));

    if let Some(entry) = h.connections.get_mut(&conn) {
        entry.binding = Some(Binding {
            table: table_id.to_string(),
            seat,
            credential,
        });
    }
    Ok((seat, credential))
}

/// Explicit leave bypasses the grace window entirely: the seat is
/// vacated and the credential revoked on the spot.
pub fn leave_table(hub: &SharedHub, conn: ConnId) {
    let mut h = hub.lock();
    let Some(entry) = h.connections.get_mut(&conn) else {
        return;
    };
    let Some(binding) = entry.binding.take() else {
        return;
    };
    let tx = entry.tx.clone();
    vacate_seat(&mut h, &binding.table, binding.seat);
    let _ = tx.send(ServerToClient::LeftTable);
    tracing::info!(table = %binding.table, seat = binding.seat, "player left");
    broadcast_table(&h.tables[&binding.table]);
    broadcast_lobby(&h);
}

fn vacate_seat(h: &mut Hub, table_id: &str, seat_idx: usize) {
    let Some(table) = h.tables.get_mut(table_id) else {
        return;
    };
    let (name, credential) = {
        let seat = &mut table.seats[seat_idx];
        if let Some(timer) = seat.grace.take() {
            timer.abort();
        }
        seat.conn = None;
        (seat.name.take(), seat.credential.take())
    };
    if let Some(name) = &name {
        table.log_event(LogKind::Leave, format!("{} leaves the table.", name));
        table.clear_ephemeral(seat_idx);
    }
    if let Some(credential) = credential {
        h.sessions.revoke(&credential);
    }
}

/// Credential-based resumption. Cancels the pending eviction timer and
/// rebinds the live connection; everything the seat held (name, sheet,
/// last action, last roll) stays as it was.
pub fn reconnect(hub: &SharedHub, conn: ConnId, credential: Uuid) {
    let mut h = hub.lock();
    let Some(tx) = h.connections.get(&conn).map(|c| c.tx.clone()) else {
        return;
    };
    if h.connections
        .get(&conn)
        .is_some_and(|c| c.binding.is_some())
    {
        let _ = tx.send(ServerToClient::ReconnectRejected);
        return;
    }
    let Some(claim) = h.sessions.resolve(&credential).cloned() else {
        tracing::debug!(conn = %conn, "reconnect with unknown credential");
        let _ = tx.send(ServerToClient::ReconnectRejected);
        return;
    };

    // A seat has at most one live connection: a zombie still holding it
    // is forcibly terminated before the rebind.
    let superseded: Option<ConnId> = h
        .connections
        .iter()
        .find(|(id, e)| {
            **id != conn
                && e.binding
                    .as_ref()
                    .is_some_and(|b| b.table == claim.table && b.seat == claim.seat)
        })
        .map(|(id, _)| *id);
    if let Some(old_id) = superseded {
        if let Some(old) = h.connections.get_mut(&old_id) {
            old.binding = None;
            old.kill.notify_one();
        }
        tracing::info!(old = %old_id, "terminated superseded connection");
    }

    let Some(table) = h.tables.get_mut(&claim.table) else {
        let _ = tx.send(ServerToClient::ReconnectRejected);
        return;
    };
    {
        let seat = &mut table.seats[claim.seat];
        if let Some(timer) = seat.grace.take() {
            timer.abort();
        }
        seat.conn = Some(tx.clone());
    }
    table.log_event(LogKind::System, format!("{} reconnects.", claim.name));

    if let Some(entry) = h.connections.get_mut(&conn) {
        entry.binding = Some(Binding {
            table: claim.table.clone(),
            seat: claim.seat,
            credential,
        });
    }
    let _ = tx.send(ServerToClient::ReconnectAccepted {
        name: claim.name.clone(),
        table: claim.table.clone(),
        seat: claim.seat,
        is_gm: claim.seat == 0,
    });
    tracing::info!(table = %claim.table, seat = claim.seat, "player reconnected");
    broadcast_table(&h.tables[&claim.table]);
    broadcast_lobby(&h);
}

/// ---- seat-scoped mutations ----

/// Runs a mutation as the invoking connection's seat, if it resolves to
/// a currently occupied seat. Broadcasts only when something changed;
/// everything else is a silent drop.
pub fn seat_scoped<F>(hub: &SharedHub, conn: ConnId, f: F) -> Outcome
where
    F: FnOnce(&mut Table, usize) -> Outcome,
{
    scoped(hub, conn, false, |table, seat| f(table, seat))
}

/// Like [`seat_scoped`] but gated to the GM seat.
pub fn gm_scoped<F>(hub: &SharedHub, conn: ConnId, f: F) -> Outcome
where
    F: FnOnce(&mut Table) -> Outcome,
{
    scoped(hub, conn, true, |table, _| f(table))
}

fn scoped<F>(hub: &SharedHub, conn: ConnId, gm_only: bool, f: F) -> Outcome
where
    F: FnOnce(&mut Table, usize) -> Outcome,
{
    let mut h = hub.lock();
    let Some(binding) = h.connections.get(&conn).and_then(|c| c.binding.clone()) else {
        return Outcome::Ignored;
    };
    if gm_only && binding.seat != 0 {
        return Outcome::Ignored;
    }
    let Some(table) = h.tables.get_mut(&binding.table) else {
        return Outcome::Ignored;
    };
    if !table.seat_occupied(binding.seat) {
        return Outcome::Ignored;
    }
    let outcome = f(table, binding.seat);
    if outcome == Outcome::Applied {
        broadcast_table(&h.tables[&binding.table]);
    }
    outcome
}

/// Lock toggling changes admission state, so the lobby hears about it
/// too, unlike the other GM mutations.
pub fn set_lock(hub: &SharedHub, conn: ConnId, locked: bool) -> Outcome {
    let mut h = hub.lock();
    let Some(binding) = h.connections.get(&conn).and_then(|c| c.binding.clone()) else {
        return Outcome::Ignored;
    };
    if binding.seat != 0 {
        return Outcome::Ignored;
    }
    let Some(table) = h.tables.get_mut(&binding.table) else {
        return Outcome::Ignored;
    };
    if !table.seat_occupied(0) {
        return Outcome::Ignored;
    }
    table.locked = locked;
    table.log_event(
        LogKind::System,
        if locked {
            "The table is locked."
        } else {
            "The table is unlocked."
        },
    );
    tracing::info!(table = %binding.table, locked, "lock toggled");
    broadcast_table(&h.tables[&binding.table]);
    broadcast_lobby(&h);
    Outcome::Applied
}

/// Re-sends the requesting connection its current per-seat view.
pub fn send_state(hub: &SharedHub, conn: ConnId) {
    let h = hub.lock();
    let Some(entry) = h.connections.get(&conn) else {
        return;
    };
    let Some(binding) = entry.binding.as_ref() else {
        return;
    };
    if let Some(table) = h.tables.get(&binding.table) {
        let _ = entry.tx.send(ServerToClient::State {
            view: build_view(table, binding.seat),
        });
    }
}

/// ---- broadcast drivers ----

/// Recomputes and pushes the per-seat projection to every live
/// connection bound to the table.
pub fn broadcast_table(table: &Table) {
    for (i, seat) in table.seats.iter().enumerate() {
        if let Some(tx) = &seat.conn {
            let _ = tx.send(ServerToClient::State {
                view: build_view(table, i),
            });
        }
    }
}

/// Pushes the coarse summary to every live connection, seated or not.
pub fn broadcast_lobby(h: &Hub) {
    let tables = lobby_summary(h.tables.values());
    for entry in h.connections.values() {
        let _ = entry.tx.send(ServerToClient::Lobby {
            tables: tables.clone(),
        });
    }
}

/// Event-log snapshot for the export endpoint; `None` when the table is
/// unknown or has never had a session.
pub fn export_log(hub: &SharedHub, table_id: &str) -> Option<Vec<LogEntry>> {
    let h = hub.lock();
    let table = h.tables.get(table_id)?;
    let session = table.session.as_ref()?;
    Some(session.log.iter().cloned().collect())
}
