use crate::table::Table;
use hearthside_protocol::*;

/// Derives the projection one seat sees. Pure over table state, so tests
/// can call it without any live connection. Every viewer gets the same
/// shared fields; only `my_seat` / `is_gm` / `my_character` differ.
pub fn build_view(table: &Table, seat: usize) -> TableView {
    let (phase, scene, location, media, chat, log, npcs, my_character) = match &table.session {
        Some(s) => (
            SessionPhase::Active,
            s.scene.clone(),
            s.location.clone(),
            s.media.clone(),
            s.chat.iter().cloned().collect(),
            s.log.iter().cloned().collect(),
            s.npcs.clone(),
            s.ephemeral[seat].sheet.clone(),
        ),
        None => (
            SessionPhase::Dormant,
            String::new(),
            String::new(),
            None,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            None,
        ),
    };

    let roster = table
        .seats
        .iter()
        .enumerate()
        .filter_map(|(i, s)| {
            let name = s.name.clone()?;
            let eph = table.session.as_ref().map(|sess| &sess.ephemeral[i]);
            Some(RosterEntry {
                seat: i,
                name,
                is_gm: i == 0,
                online: s.conn.is_some(),
                color: SEAT_COLORS[i].to_string(),
                sheet: eph.and_then(|e| e.sheet.clone()),
                action: eph.and_then(|e| e.action.clone()),
                last_roll: eph.and_then(|e| e.last_roll.clone()),
            })
        })
        .collect();

    TableView {
        phase,
        table: table.id.clone(),
        name: table.name.clone(),
        locked: table.locked,
        scene,
        location,
        media,
        chat,
        log,
        roster,
        npcs,
        my_seat: seat,
        is_gm: seat == 0,
        my_character,
    }
}

/// Coarse per-table summary for connections browsing the lobby. Sorted
/// by table id so the list is stable across broadcasts.
pub fn lobby_summary<'a>(tables: impl Iterator<Item = &'a Table>) -> Vec<LobbyTable> {
    let mut out: Vec<LobbyTable> = tables
        .map(|t| LobbyTable {
            id: t.id.clone(),
            name: t.name.clone(),
            occupants: t.occupant_count(),
            gm_present: t.gm_present(),
            locked: t.locked,
            session_active: t.session.is_some(),
            names: t.seats.iter().filter_map(|s| s.name.clone()).collect(),
        })
        .collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}
