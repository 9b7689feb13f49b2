use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// ---- Table geometry ----
pub const SEATS_PER_TABLE: usize = 6;
pub const CHAT_CAPACITY: usize = 80;
pub const LOG_CAPACITY: usize = 200;

/// Display colors assigned by seat index, stable for the table's lifetime.
pub const SEAT_COLORS: [&str; SEATS_PER_TABLE] = [
    "#e6b450", "#7fb4ca", "#98bb6c", "#c4746e", "#957fb8", "#a3a3a3",
];

/// ---- Text bounds ----
pub const NAME_MAX: usize = 40;
pub const SCENE_MAX: usize = 4000;
pub const CHAT_MAX: usize = 500;
pub const ACTION_MAX: usize = 200;
pub const LOCATION_MAX: usize = 120;
pub const MEDIA_URL_MAX: usize = 500;
pub const NPC_NAME_MAX: usize = 80;
pub const NPC_NOTES_MAX: usize = 500;
pub const SHEET_TEXT_MAX: usize = 120;
pub const SHEET_NOTES_MAX: usize = 1000;

/// Trims and truncates free-form text to `max` characters, respecting
/// char boundaries.
pub fn clamp_text(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

/// ---- Dice ----
pub const MAX_DICE: u32 = 20;
pub const ALLOWED_SIDES: [u32; 7] = [4, 6, 8, 10, 12, 20, 100];

/// Parses "<count>d<sides>" notation. Count is capped at [`MAX_DICE`];
/// sides outside [`ALLOWED_SIDES`] or malformed input yield `None`.
pub fn parse_notation(notation: &str) -> Option<(u32, u32)> {
    let (count, sides) = notation.trim().split_once(['d', 'D'])?;
    let count: u32 = count.trim().parse().ok()?;
    let sides: u32 = sides.trim().parse().ok()?;
    if count == 0 || !ALLOWED_SIDES.contains(&sides) {
        return None;
    }
    Some((count.min(MAX_DICE), sides))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiceRoll {
    pub notation: String,
    pub rolls: Vec<u32>,
    pub total: u32,
    pub timestamp: String,
}

/// Rolls the given notation with a thread-local RNG, or `None` when the
/// notation is outside the accepted grammar.
pub fn roll_dice(notation: &str) -> Option<DiceRoll> {
    let (count, sides) = parse_notation(notation)?;
    let mut rng = rand::thread_rng();
    let rolls: Vec<u32> = (0..count).map(|_| rng.gen_range(1..=sides)).collect();
    let total = rolls.iter().sum();
    Some(DiceRoll {
        notation: format!("{}d{}", count, sides),
        rolls,
        total,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// ---- Pushed media ----
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Media {
    pub kind: MediaKind,
    pub url: String,
}

/// ---- NPCs ----
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Demeanor {
    Passive,
    Wary,
    Hostile,
}

impl Default for Demeanor {
    fn default() -> Self {
        Demeanor::Passive
    }
}

impl Demeanor {
    /// Maps a free-form tag to the closed set; anything unrecognized
    /// falls back to the default.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(|t| t.trim().to_ascii_lowercase()).as_deref() {
            Some("passive") => Demeanor::Passive,
            Some("wary") => Demeanor::Wary,
            Some("hostile") => Demeanor::Hostile,
            _ => Demeanor::default(),
        }
    }
}

impl fmt::Display for Demeanor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Demeanor::Passive => write!(f, "passive"),
            Demeanor::Wary => write!(f, "wary"),
            Demeanor::Hostile => write!(f, "hostile"),
        }
    }
}

pub const CHALLENGE_MIN: u8 = 0;
pub const CHALLENGE_MAX: u8 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Npc {
    pub id: Uuid,
    pub name: String,
    pub faction: String,
    pub notes: String,
    pub challenge: u8,
    pub demeanor: Demeanor,
}

/// ---- Character sheets ----
pub const LEVEL_MIN: u8 = 1;
pub const LEVEL_MAX: u8 = 20;
pub const HP_MAX: u16 = 999;
pub const ABILITY_MIN: u8 = 1;
pub const ABILITY_MAX: u8 = 30;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CharacterSheet {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub level: u8,
    #[serde(default)]
    pub hp: u16,
    #[serde(default)]
    pub max_hp: u16,
    #[serde(default)]
    pub strength: u8,
    #[serde(default)]
    pub dexterity: u8,
    #[serde(default)]
    pub constitution: u8,
    #[serde(default)]
    pub intelligence: u8,
    #[serde(default)]
    pub wisdom: u8,
    #[serde(default)]
    pub charisma: u8,
    #[serde(default)]
    pub inventory: String,
    #[serde(default)]
    pub notes: String,
}

impl CharacterSheet {
    /// Clamps every field independently; out-of-range numbers are pulled
    /// into range rather than rejected.
    pub fn sanitized(&self) -> CharacterSheet {
        let max_hp = self.max_hp.min(HP_MAX);
        CharacterSheet {
            name: clamp_text(&self.name, SHEET_TEXT_MAX),
            class_name: clamp_text(&self.class_name, SHEET_TEXT_MAX),
            level: self.level.clamp(LEVEL_MIN, LEVEL_MAX),
            hp: self.hp.min(max_hp),
            max_hp,
            strength: self.strength.clamp(ABILITY_MIN, ABILITY_MAX),
            dexterity: self.dexterity.clamp(ABILITY_MIN, ABILITY_MAX),
            constitution: self.constitution.clamp(ABILITY_MIN, ABILITY_MAX),
            intelligence: self.intelligence.clamp(ABILITY_MIN, ABILITY_MAX),
            wisdom: self.wisdom.clamp(ABILITY_MIN, ABILITY_MAX),
            charisma: self.charisma.clamp(ABILITY_MIN, ABILITY_MAX),
            inventory: clamp_text(&self.inventory, SHEET_NOTES_MAX),
            notes: clamp_text(&self.notes, SHEET_NOTES_MAX),
        }
    }
}

/// ---- Chat & event log ----
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatEntry {
    pub seat: usize,
    pub name: String,
    pub text: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogKind {
    Join,
    Leave,
    Roll,
    Scene,
    Location,
    Defeat,
    Spawn,
    Despawn,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub kind: LogKind,
    pub text: String,
    pub timestamp: String,
}

impl LogEntry {
    pub fn now(kind: LogKind, text: impl Into<String>) -> Self {
        LogEntry {
            kind,
            text: text.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// ---- Projection ----
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionPhase {
    /// No occupant has ever joined; no session state exists yet.
    Dormant,
    /// Session created on first join; persists for the table's lifetime.
    Active,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RosterEntry {
    pub seat: usize,
    pub name: String,
    pub is_gm: bool,
    pub online: bool,
    pub color: String,
    pub sheet: Option<CharacterSheet>,
    pub action: Option<String>,
    pub last_roll: Option<DiceRoll>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableView {
    pub phase: SessionPhase,
    pub table: String,
    pub name: String,
    pub locked: bool,
    pub scene: String,
    pub location: String,
    pub media: Option<Media>,
    pub chat: Vec<ChatEntry>,
    pub log: Vec<LogEntry>,
    pub roster: Vec<RosterEntry>,
    pub npcs: Vec<Npc>,
    pub my_seat: usize,
    pub is_gm: bool,
    pub my_character: Option<CharacterSheet>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LobbyTable {
    pub id: String,
    pub name: String,
    pub occupants: usize,
    pub gm_present: bool,
    pub locked: bool,
    pub session_active: bool,
    pub names: Vec<String>,
}

/// ---- Wire messages ----
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientToServer {
    JoinTable { table: String, name: String },
    LeaveTable,
    Reconnect { credential: Uuid },
    RequestState,

    // Any occupied seat
    RollDice { notation: String },
    PostChat { text: String },
    SetAction { text: String },
    SubmitSheet { sheet: CharacterSheet },

    // GM (seat 0) only
    SetScene { text: String },
    PushMedia { kind: MediaKind, url: String },
    ClearMedia,
    SetLocation { label: String },
    SetLock { locked: bool },
    DeclareDefeat { seat: usize },
    SpawnNpc {
        name: String,
        faction: String,
        notes: String,
        challenge: u8,
        demeanor: Option<String>,
    },
    RemoveNpc { id: Uuid },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerToClient {
    Lobby {
        tables: Vec<LobbyTable>,
    },
    JoinAccepted {
        credential: Uuid,
        table: String,
        seat: usize,
        is_gm: bool,
    },
    JoinRejected {
        reason: String,
    },
    ReconnectAccepted {
        name: String,
        table: String,
        seat: usize,
        is_gm: bool,
    },
    ReconnectRejected,
    LeftTable,
    State {
        view: TableView,
    },
}
