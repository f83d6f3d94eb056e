use apnasquad_types::{
    api::Page, Amount, Mode, PrizeRank, Tournament, TournamentInvariantError, TournamentPatch,
    TournamentStatus,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};

use super::{column_amount, column_enum, column_time, immediate, now_ms, to_ms, Store, StoreError};
use crate::ids;

const TOURNAMENT_COLUMNS: &str = "id, title, mode, entry_fee, prize_pool, total_spots, \
     joined_spots, match_time, map, room_id, password, is_active, is_completed, publish, status, \
     prize_distribution, created_by, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct NewTournament {
    pub title: String,
    pub mode: Mode,
    pub entry_fee: Amount,
    pub prize_pool: Amount,
    pub total_spots: u32,
    pub match_time: DateTime<Utc>,
    pub map: String,
    pub room_id: String,
    pub password: String,
    pub prize_distribution: Vec<PrizeRank>,
    pub created_by: Option<String>,
}

/// Filters for the upcoming-tournament listing.
#[derive(Clone, Debug, Default)]
pub struct TournamentFilter {
    pub map: Option<String>,
    pub mode: Option<Mode>,
    /// Defaults to live.
    pub status: Option<TournamentStatus>,
    /// Only tournaments starting after this instant (and after now).
    pub after: Option<DateTime<Utc>>,
}

pub(crate) fn map_tournament(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tournament> {
    let distribution: String = row.get("prize_distribution")?;
    let prize_distribution = serde_json::from_str(&distribution).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(Tournament {
        id: row.get("id")?,
        title: row.get("title")?,
        mode: column_enum(row, "mode")?,
        entry_fee: column_amount(row, "entry_fee")?,
        prize_pool: column_amount(row, "prize_pool")?,
        total_spots: row.get("total_spots")?,
        joined_spots: row.get("joined_spots")?,
        match_time: column_time(row, "match_time")?,
        map: row.get("map")?,
        room_id: row.get("room_id")?,
        password: row.get("password")?,
        is_active: row.get("is_active")?,
        is_completed: row.get("is_completed")?,
        publish: row.get("publish")?,
        status: column_enum(row, "status")?,
        prize_distribution,
        created_by: row.get("created_by")?,
        created_at: column_time(row, "created_at")?,
        updated_at: column_time(row, "updated_at")?,
    })
}

pub(crate) fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Tournament>, StoreError> {
    let sql = format!("SELECT {TOURNAMENT_COLUMNS} FROM tournaments WHERE id = ?");
    Ok(conn.query_row(&sql, [id], map_tournament).optional()?)
}

fn encode_distribution(distribution: &[PrizeRank]) -> Result<String, StoreError> {
    serde_json::to_string(distribution).map_err(|err| StoreError::Corrupt(err.to_string()))
}

fn insert(conn: &Connection, new: NewTournament) -> Result<Tournament, StoreError> {
    let id = ids::new_id();
    let now = now_ms();
    conn.execute(
        "INSERT INTO tournaments (id, title, mode, entry_fee, prize_pool, total_spots, \
         joined_spots, match_time, map, room_id, password, is_active, is_completed, publish, \
         status, prize_distribution, created_by, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, 1, 0, 1, ?, ?, ?, ?, ?)",
        params![
            id,
            new.title,
            new.mode.as_str(),
            new.entry_fee.paise(),
            new.prize_pool.paise(),
            new.total_spots,
            to_ms(new.match_time),
            new.map,
            new.room_id,
            new.password,
            TournamentStatus::Live.as_str(),
            encode_distribution(&new.prize_distribution)?,
            new.created_by,
            now,
            now
        ],
    )?;
    find_by_id(conn, &id)?.ok_or_else(|| StoreError::Corrupt(format!("tournament {id} vanished")))
}

fn list_upcoming(
    conn: &Connection,
    filter: &TournamentFilter,
    page: Page,
    now: DateTime<Utc>,
) -> Result<(Vec<Tournament>, u64), StoreError> {
    let after = filter.after.map_or(now, |after| after.max(now));
    let mut clauses = vec![
        "is_active = 1".to_string(),
        "is_completed = 0".to_string(),
        "status = ?".to_string(),
        "match_time > ?".to_string(),
    ];
    let mut values = vec![
        Value::Text(filter.status.unwrap_or(TournamentStatus::Live).as_str().to_string()),
        Value::Integer(to_ms(after)),
    ];
    if let Some(map) = &filter.map {
        clauses.push("map = ?".to_string());
        values.push(Value::Text(map.clone()));
    }
    if let Some(mode) = filter.mode {
        clauses.push("mode = ?".to_string());
        values.push(Value::Text(mode.as_str().to_string()));
    }
    let filter_sql = clauses.join(" AND ");

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM tournaments WHERE {filter_sql}"),
        params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    values.push(Value::Integer(page.limit as i64));
    values.push(Value::Integer(page.offset() as i64));
    let mut stmt = conn.prepare(&format!(
        "SELECT {TOURNAMENT_COLUMNS} FROM tournaments WHERE {filter_sql} \
         ORDER BY match_time ASC LIMIT ? OFFSET ?"
    ))?;
    let tournaments = stmt
        .query_map(params_from_iter(values.iter()), map_tournament)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((tournaments, total.max(0) as u64))
}

/// Outcome of an admin edit.
#[derive(Debug)]
pub enum PatchOutcome {
    Updated(Tournament),
    NotFound,
    Invalid(TournamentInvariantError),
}

fn update(conn: &mut Connection, id: &str, patch: TournamentPatch) -> Result<PatchOutcome, StoreError> {
    immediate(conn, |tx| {
        let Some(mut tournament) = find_by_id(tx, id)? else {
            return Ok(PatchOutcome::NotFound);
        };
        if let Err(err) = patch.apply(&mut tournament) {
            return Ok(PatchOutcome::Invalid(err));
        }
        tx.execute(
            "UPDATE tournaments SET title = ?, mode = ?, entry_fee = ?, prize_pool = ?, \
             total_spots = ?, match_time = ?, map = ?, room_id = ?, password = ?, is_active = ?, \
             is_completed = ?, publish = ?, status = ?, prize_distribution = ?, updated_at = ? \
             WHERE id = ?",
            params![
                tournament.title,
                tournament.mode.as_str(),
                tournament.entry_fee.paise(),
                tournament.prize_pool.paise(),
                tournament.total_spots,
                to_ms(tournament.match_time),
                tournament.map,
                tournament.room_id,
                tournament.password,
                tournament.is_active,
                tournament.is_completed,
                tournament.publish,
                tournament.status.as_str(),
                encode_distribution(&tournament.prize_distribution)?,
                now_ms(),
                id
            ],
        )?;
        let updated = find_by_id(tx, id)?
            .ok_or_else(|| StoreError::Corrupt(format!("tournament {id} vanished")))?;
        Ok(PatchOutcome::Updated(updated))
    })
}

impl Store {
    pub async fn insert_tournament(&self, new: NewTournament) -> Result<Tournament, StoreError> {
        self.call(move |conn| insert(conn, new)).await
    }

    pub async fn find_tournament(&self, id: &str) -> Result<Option<Tournament>, StoreError> {
        let id = id.to_string();
        self.call(move |conn| find_by_id(conn, &id)).await
    }

    pub async fn list_upcoming_tournaments(
        &self,
        filter: TournamentFilter,
        page: Page,
    ) -> Result<(Vec<Tournament>, u64), StoreError> {
        self.call(move |conn| list_upcoming(conn, &filter, page, Utc::now()))
            .await
    }

    pub async fn update_tournament(
        &self,
        id: &str,
        patch: TournamentPatch,
    ) -> Result<PatchOutcome, StoreError> {
        let id = id.to_string();
        self.call(move |conn| update(conn, &id, patch)).await
    }

    /// Deletes the tournament together with its registrations.
    pub async fn delete_tournament(&self, id: &str) -> Result<Option<Tournament>, StoreError> {
        let id = id.to_string();
        self.call(move |conn| {
            immediate(conn, |tx| {
                let Some(tournament) = find_by_id(tx, &id)? else {
                    return Ok(None);
                };
                tx.execute("DELETE FROM tournaments WHERE id = ?", [&id])?;
                Ok(Some(tournament))
            })
        })
        .await
    }
}
