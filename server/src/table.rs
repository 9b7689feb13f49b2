use hearthside_protocol::*;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Outbound channel for one live connection. Writes are fire-and-forget;
/// a closed receiver just means the socket is gone.
pub type Outbound = mpsc::UnboundedSender<ServerToClient>;

/// Result of a seat-scoped mutation. `Ignored` covers every silently
/// dropped request (bad input, failed precondition); no broadcast may
/// follow an `Ignored` outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Ignored,
}

/// One slot at a table. Exactly one of three states holds at any time:
/// empty (no name), occupied (name + live connection), or grace-pending
/// (name + credential retained, no connection, eviction timer armed).
#[derive(Default)]
pub struct Seat {
    pub conn: Option<Outbound>,
    pub name: Option<String>,
    pub credential: Option<Uuid>,
    pub grace: Option<JoinHandle<()>>,
}

impl Seat {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
    }

    pub fn is_occupied(&self) -> bool {
        self.name.is_some() && self.conn.is_some()
    }

    pub fn is_grace_pending(&self) -> bool {
        self.name.is_some() && self.conn.is_none()
    }
}

/// Per-seat ephemeral fields, reset only when the seat is fully vacated.
#[derive(Default, Clone)]
pub struct SeatEphemeral {
    pub action: Option<String>,
    pub last_roll: Option<DiceRoll>,
    pub sheet: Option<CharacterSheet>,
}

/// Mutable shared session data, created lazily on the table's first join
/// and kept for the process lifetime.
pub struct SessionState {
    pub scene: String,
    pub location: String,
    pub media: Option<Media>,
    pub chat: VecDeque<ChatEntry>,
    pub log: VecDeque<LogEntry>,
    pub ephemeral: Vec<SeatEphemeral>,
    pub npcs: Vec<Npc>,
}

impl SessionState {
    fn new() -> Self {
        SessionState {
            scene: String::new(),
            location: String::new(),
            media: None,
            chat: VecDeque::with_capacity(CHAT_CAPACITY),
            log: VecDeque::with_capacity(LOG_CAPACITY),
            ephemeral: vec![SeatEphemeral::default(); SEATS_PER_TABLE],
            npcs: Vec::new(),
        }
    }

    pub fn push_chat(&mut self, entry: ChatEntry) {
        if self.chat.len() == CHAT_CAPACITY {
            self.chat.pop_front();
        }
        self.chat.push_back(entry);
    }

    pub fn push_log(&mut self, entry: LogEntry) {
        if self.log.len() == LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(entry);
    }
}

pub struct Table {
    pub id: String,
    pub name: String,
    pub locked: bool,
    pub seats: Vec<Seat>,
    pub session: Option<SessionState>,
}

impl Table {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Table {
            id: id.into(),
            name: name.into(),
            locked: false,
            seats: (0..SEATS_PER_TABLE).map(|_| Seat::default()).collect(),
            session: None,
        }
    }

    /// First empty seat in increasing index order. Seat 0 is the GM seat
    /// but is allocated by the same rule; it simply gets scanned first.
    pub fn find_free_seat(&self) -> Option<usize> {
        self.seats.iter().position(|s| s.is_empty())
    }

    pub fn is_full(&self) -> bool {
        self.find_free_seat().is_none()
    }

    pub fn occupant_count(&self) -> usize {
        self.seats.iter().filter(|s| !s.is_empty()).count()
    }

    pub fn gm_present(&self) -> bool {
        !self.seats[0].is_empty()
    }

    pub fn seat_occupied(&self, seat: usize) -> bool {
        self.seats.get(seat).is_some_and(|s| s.is_occupied())
    }

    /// Session exists from the first join onward; the `Dormant` phase is
    /// only observable before anyone has ever sat down.
    pub fn ensure_session(&mut self) -> &mut SessionState {
        self.session.get_or_insert_with(SessionState::new)
    }

    pub fn log_event(&mut self, kind: LogKind, text: impl Into<String>) {
        if let Some(session) = self.session.as_mut() {
            session.push_log(LogEntry::now(kind, text));
        }
    }

    /// Wipes a seat's ephemeral slot on full vacation; the next occupant
    /// starts from a clean slate. Grace-window reconnects never pass
    /// through here, so a resuming occupant keeps their state.
    pub fn clear_ephemeral(&mut self, seat: usize) {
        if let Some(session) = self.session.as_mut() {
            session.ephemeral[seat] = SeatEphemeral::default();
        }
    }

    /* ---- unprivileged mutations (any occupied seat) ---- */

    pub fn post_chat(&mut self, seat: usize, text: &str) -> Outcome {
        let text = clamp_text(text, CHAT_MAX);
        if text.is_empty() {
            return Outcome::Ignored;
        }
        let Some(name) = self.seats[seat].name.clone() else {
            return Outcome::Ignored;
        };
        let Some(session) = self.session.as_mut() else {
            return Outcome::Ignored;
        };
        session.push_chat(ChatEntry {
            seat,
            name,
            text,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
        Outcome::Applied
    }

    pub fn set_action(&mut self, seat: usize, text: &str) -> Outcome {
        let text = clamp_text(text, ACTION_MAX);
        let Some(session) = self.session.as_mut() else {
            return Outcome::Ignored;
        };
        session.ephemeral[seat].action = if text.is_empty() { None } else { Some(text) };
        Outcome::Applied
    }

    pub fn submit_sheet(&mut self, seat: usize, sheet: &CharacterSheet) -> Outcome {
        let Some(session) = self.session.as_mut() else {
            return Outcome::Ignored;
        };
        session.ephemeral[seat].sheet = Some(sheet.sanitized());
        Outcome::Applied
    }

    /// Best-effort dice handling: malformed notation or a disallowed
    /// sides value produces no roll and no broadcast.
    pub fn roll_dice(&mut self, seat: usize, notation: &str) -> Outcome {
        let Some(roll) = roll_dice(notation) else {
            return Outcome::Ignored;
        };
        let Some(name) = self.seats[seat].name.clone() else {
            return Outcome::Ignored;
        };
        let Some(session) = self.session.as_mut() else {
            return Outcome::Ignored;
        };
        session.push_log(LogEntry::now(
            LogKind::Roll,
            format!(
                "{} rolled {} for {} ({:?})",
                name, roll.notation, roll.total, roll.rolls
            ),
        ));
        session.ephemeral[seat].last_roll = Some(roll);
        Outcome::Applied
    }

    /* ---- privileged mutations (seat 0) ---- */

    pub fn set_scene(&mut self, text: &str) -> Outcome {
        let text = clamp_text(text, SCENE_MAX);
        let Some(session) = self.session.as_mut() else {
            return Outcome::Ignored;
        };
        session.scene = text;
        session.push_log(LogEntry::now(LogKind::Scene, "The scene changes."));
        Outcome::Applied
    }

    pub fn push_media(&mut self, kind: MediaKind, url: &str) -> Outcome {
        let url = clamp_text(url, MEDIA_URL_MAX);
        if url.is_empty() {
            return Outcome::Ignored;
        }
        let Some(session) = self.session.as_mut() else {
            return Outcome::Ignored;
        };
        // A single slot: pushing replaces whatever was there.
        session.media = Some(Media { kind, url });
        Outcome::Applied
    }

    pub fn clear_media(&mut self) -> Outcome {
        let Some(session) = self.session.as_mut() else {
            return Outcome::Ignored;
        };
        session.media = None;
        Outcome::Applied
    }

    pub fn set_location(&mut self, label: &str) -> Outcome {
        let label = clamp_text(label, LOCATION_MAX);
        let Some(session) = self.session.as_mut() else {
            return Outcome::Ignored;
        };
        session.push_log(LogEntry::now(
            LogKind::Location,
            format!("The party moves to {}.", label),
        ));
        session.location = label;
        Outcome::Applied
    }

    pub fn declare_defeat(&mut self, target: usize) -> Outcome {
        let Some(name) = self.seats.get(target).and_then(|s| s.name.clone()) else {
            return Outcome::Ignored;
        };
        let Some(session) = self.session.as_mut() else {
            return Outcome::Ignored;
        };
        session.push_log(LogEntry::now(
            LogKind::Defeat,
            format!("{} has fallen.", name),
        ));
        Outcome::Applied
    }

    pub fn spawn_npc(
        &mut self,
        name: &str,
        faction: &str,
        notes: &str,
        challenge: u8,
        demeanor: Option<&str>,
    ) -> Outcome {
        let name = clamp_text(name, NPC_NAME_MAX);
        if name.is_empty() {
            return Outcome::Ignored;
        }
        let npc = Npc {
            id: Uuid::new_v4(),
            name: name.clone(),
            faction: clamp_text(faction, NPC_NAME_MAX),
            notes: clamp_text(notes, NPC_NOTES_MAX),
            challenge: challenge.clamp(CHALLENGE_MIN, CHALLENGE_MAX),
            demeanor: Demeanor::from_tag(demeanor),
        };
        let Some(session) = self.session.as_mut() else {
            return Outcome::Ignored;
        };
        session.push_log(LogEntry::now(
            LogKind::Spawn,
            format!("{} appears ({}).", name, npc.demeanor),
        ));
        session.npcs.push(npc);
        Outcome::Applied
    }

    pub fn remove_npc(&mut self, id: Uuid) -> Outcome {
        let Some(session) = self.session.as_mut() else {
            return Outcome::Ignored;
        };
        let Some(pos) = session.npcs.iter().position(|n| n.id == id) else {
            return Outcome::Ignored;
        };
        let npc = session.npcs.remove(pos);
        session.push_log(LogEntry::now(
            LogKind::Despawn,
            format!("{} is gone.", npc.name),
        ));
        Outcome::Applied
    }
}
