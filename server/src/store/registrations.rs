use apnasquad_types::{
    api::Page,
    wallet::{EntryCharge, WalletError},
    Mode, PaymentState, Registration, RegistrationStatus, TeamPlayer, Tournament,
    TransactionKind, TransactionMethod, TransactionStatus,
};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use super::{
    column_enum, column_time, immediate, now_ms, tournaments, users, Store, StoreError,
};
use crate::ids;

/// Team id collisions are retried this many times before giving up.
const TEAM_ID_ATTEMPTS: usize = 5;

const REGISTRATION_COLUMNS: &str = "id, tournament_id, mode, team_name, slot, team_id, \
     team_password, status, payment, created_at, updated_at";

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("Tournament not found.")]
    TournamentNotFound,
    #[error("User not found. Please log in again.")]
    UserNotFound,
    #[error("{0}")]
    MissingDetails(&'static str),
    #[error("This tournament is no longer accepting registrations.")]
    Closed,
    #[error("Tournament is full. No spots available.")]
    Full,
    #[error("You are already registered in this tournament.")]
    AlreadyRegistered,
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for JoinError {
    fn from(err: rusqlite::Error) -> Self {
        JoinError::Store(err.into())
    }
}

#[derive(Debug, Error)]
pub enum JoinTeamError {
    #[error("User not found. Please log in again.")]
    UserNotFound,
    #[error("{0}")]
    MissingDetails(&'static str),
    #[error("Invalid Team ID or Team Password")]
    InvalidCredentials,
    #[error("You are already a member of this team.")]
    AlreadyInTeam,
    #[error("You are already registered in this tournament with another team.")]
    AlreadyInTournament,
    #[error("Team is full. A {mode} team can only have {capacity} players.")]
    TeamFull { mode: Mode, capacity: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for JoinTeamError {
    fn from(err: rusqlite::Error) -> Self {
        JoinTeamError::Store(err.into())
    }
}

/// A player of a team with the profile fields shown on tournament pages.
#[derive(Clone, Debug)]
pub struct TeamMember {
    pub user_id: String,
    pub name: String,
    pub bgmi_id: String,
    pub avatar: String,
    pub team_name: String,
    pub phone: String,
    pub is_captain: bool,
}

#[derive(Clone, Debug)]
pub struct TeamView {
    pub registration: Registration,
    pub members: Vec<TeamMember>,
}

/// A registration of the caller together with its tournament.
#[derive(Clone, Debug)]
pub struct JoinedTeam {
    pub registration: Registration,
    pub tournament: Tournament,
}

fn map_registration(row: &rusqlite::Row<'_>) -> rusqlite::Result<Registration> {
    Ok(Registration {
        id: row.get("id")?,
        tournament_id: row.get("tournament_id")?,
        mode: column_enum(row, "mode")?,
        team_name: row.get("team_name")?,
        slot: row.get("slot")?,
        team_id: row.get::<_, i64>("team_id")? as u64,
        team_password: row.get("team_password")?,
        players: Vec::new(),
        status: column_enum(row, "status")?,
        payment: column_enum(row, "payment")?,
        created_at: column_time(row, "created_at")?,
        updated_at: column_time(row, "updated_at")?,
    })
}

fn load_players(conn: &Connection, registration_id: &str) -> Result<Vec<TeamPlayer>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT user_id, is_captain FROM registration_players \
         WHERE registration_id = ? ORDER BY joined_at ASC, rowid ASC",
    )?;
    let players = stmt
        .query_map([registration_id], |row| {
            Ok(TeamPlayer {
                user: row.get(0)?,
                is_captain: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(players)
}

fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Registration>, StoreError> {
    let sql = format!("SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE id = ?");
    let Some(mut registration) = conn.query_row(&sql, [id], map_registration).optional()? else {
        return Ok(None);
    };
    registration.players = load_players(conn, id)?;
    Ok(Some(registration))
}

fn is_registered(conn: &Connection, tournament_id: &str, user_id: &str) -> Result<bool, StoreError> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM registration_players WHERE tournament_id = ? AND user_id = ?)",
        [tournament_id, user_id],
        |row| row.get(0),
    )?)
}

/// Lowest slot number not held by a team; slots of removed teams are reused.
fn free_slot(conn: &Connection, tournament_id: &str) -> Result<u32, StoreError> {
    let mut stmt =
        conn.prepare("SELECT slot FROM registrations WHERE tournament_id = ? ORDER BY slot ASC")?;
    let taken = stmt
        .query_map([tournament_id], |row| row.get::<_, u32>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut slot = 1;
    for held in taken {
        if held == slot {
            slot += 1;
        } else if held > slot {
            break;
        }
    }
    Ok(slot)
}

/// Registers the caller's team: charges the entry fee, takes a spot, creates
/// the registration and records the ledger entry, all or nothing.
fn join(conn: &mut Connection, user_id: &str, tournament_id: &str) -> Result<Registration, JoinError> {
    immediate(conn, |tx| {
        let tournament =
            tournaments::find_by_id(tx, tournament_id)?.ok_or(JoinError::TournamentNotFound)?;
        let user = users::find_by_id(tx, user_id)?.ok_or(JoinError::UserNotFound)?;
        if let Some(missing) = user.missing_player_details() {
            return Err(JoinError::MissingDetails(missing));
        }
        if tournament.has_ended() || !tournament.is_active {
            return Err(JoinError::Closed);
        }
        if tournament.is_full() {
            return Err(JoinError::Full);
        }
        if is_registered(tx, tournament_id, user_id)? {
            return Err(JoinError::AlreadyRegistered);
        }

        let charge = EntryCharge::compute(tournament.entry_fee, user.bonus);
        charge.ensure_affordable(user.balance)?;
        let now = now_ms();
        if charge.entry_fee.is_positive() {
            let debited = tx.execute(
                "UPDATE users SET balance = balance - ?1, bonus = bonus - ?2, updated_at = ?3 \
                 WHERE id = ?4 AND balance >= ?1 AND bonus >= ?2",
                params![
                    charge.balance_used.paise(),
                    charge.bonus_used.paise(),
                    now,
                    user_id
                ],
            )?;
            if debited == 0 {
                return Err(WalletError::InsufficientBalance {
                    needed: charge.balance_used,
                    available: user.balance,
                }
                .into());
            }
        }

        let claimed = tx.execute(
            "UPDATE tournaments SET joined_spots = joined_spots + 1, updated_at = ? \
             WHERE id = ? AND joined_spots < total_spots",
            params![now, tournament_id],
        )?;
        if claimed == 0 {
            return Err(JoinError::Full);
        }
        let slot = free_slot(tx, tournament_id)?;

        let registration_id = ids::new_id();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let inserted = tx.execute(
                "INSERT INTO registrations (id, tournament_id, mode, team_name, slot, team_id, \
                 team_password, status, payment, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    registration_id,
                    tournament_id,
                    tournament.mode.as_str(),
                    user.team_name,
                    slot,
                    ids::team_id() as i64,
                    ids::team_password(),
                    RegistrationStatus::Confirmed.as_str(),
                    PaymentState::Paid.as_str(),
                    now,
                    now
                ],
            );
            match inserted.map_err(StoreError::from) {
                Ok(_) => break,
                Err(err) if err.is_constraint() && attempts < TEAM_ID_ATTEMPTS => continue,
                Err(err) => return Err(err.into()),
            }
        }
        tx.execute(
            "INSERT INTO registration_players (registration_id, tournament_id, user_id, \
             is_captain, joined_at) VALUES (?, ?, ?, 1, ?)",
            params![registration_id, tournament_id, user_id, now],
        )?;

        if charge.entry_fee.is_positive() {
            tx.execute(
                "INSERT INTO transactions (id, user_id, kind, amount, status, method, \
                 tournament_id, transaction_id, order_id, description, bonus_used, created_at, \
                 updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?, ?)",
                params![
                    ids::new_id(),
                    user_id,
                    TransactionKind::Join.as_str(),
                    charge.entry_fee.paise(),
                    TransactionStatus::Success.as_str(),
                    TransactionMethod::Wallet.as_str(),
                    tournament_id,
                    ids::transaction_reference(),
                    charge.description(),
                    charge.bonus_used.paise(),
                    now,
                    now
                ],
            )?;
        }

        find_by_id(tx, &registration_id)?.ok_or_else(|| {
            StoreError::Corrupt(format!("registration {registration_id} vanished")).into()
        })
    })
}

/// Adds the caller to an existing team; the player count is re-checked by
/// the insert itself.
fn join_team(
    conn: &mut Connection,
    user_id: &str,
    team_id: u64,
    team_password: u32,
) -> Result<Registration, JoinTeamError> {
    immediate(conn, |tx| {
        let user = users::find_by_id(tx, user_id)?.ok_or(JoinTeamError::UserNotFound)?;
        if let Some(missing) = user.missing_player_details() {
            return Err(JoinTeamError::MissingDetails(missing));
        }
        let sql = format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE team_id = ? AND team_password = ?"
        );
        let mut registration = tx
            .query_row(&sql, params![team_id as i64, team_password], map_registration)
            .optional()?
            .ok_or(JoinTeamError::InvalidCredentials)?;
        registration.players = load_players(tx, &registration.id)?;
        if registration.has_player(user_id) {
            return Err(JoinTeamError::AlreadyInTeam);
        }
        if is_registered(tx, &registration.tournament_id, user_id)? {
            return Err(JoinTeamError::AlreadyInTournament);
        }
        let capacity = registration.mode.capacity();
        let team_full = JoinTeamError::TeamFull {
            mode: registration.mode,
            capacity,
        };
        if registration.is_full() {
            return Err(team_full);
        }

        let now = now_ms();
        let inserted = tx.execute(
            "INSERT INTO registration_players (registration_id, tournament_id, user_id, \
             is_captain, joined_at) \
             SELECT ?1, ?2, ?3, 0, ?4 \
             WHERE (SELECT COUNT(*) FROM registration_players WHERE registration_id = ?1) < ?5",
            params![
                registration.id,
                registration.tournament_id,
                user_id,
                now,
                capacity as i64
            ],
        )?;
        if inserted == 0 {
            return Err(team_full);
        }
        tx.execute(
            "UPDATE registrations SET updated_at = ? WHERE id = ?",
            params![now, registration.id],
        )?;
        find_by_id(tx, &registration.id)?.ok_or_else(|| {
            StoreError::Corrupt(format!("registration {} vanished", registration.id)).into()
        })
    })
}

fn teams_for_tournament(conn: &Connection, tournament_id: &str) -> Result<Vec<TeamView>, StoreError> {
    let sql = format!(
        "SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE tournament_id = ? \
         ORDER BY slot ASC, created_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let registrations = stmt
        .query_map([tournament_id], map_registration)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut members_stmt = conn.prepare(
        "SELECT p.user_id, p.is_captain, u.name, u.bgmi_id, u.avatar, u.team_name, u.phone \
         FROM registration_players p JOIN users u ON u.id = p.user_id \
         WHERE p.registration_id = ? ORDER BY p.joined_at ASC, p.rowid ASC",
    )?;
    let mut teams = Vec::with_capacity(registrations.len());
    for mut registration in registrations {
        let members = members_stmt
            .query_map([&registration.id], |row| {
                Ok(TeamMember {
                    user_id: row.get(0)?,
                    is_captain: row.get(1)?,
                    name: row.get(2)?,
                    bgmi_id: row.get(3)?,
                    avatar: row.get(4)?,
                    team_name: row.get(5)?,
                    phone: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        registration.players = members
            .iter()
            .map(|member| TeamPlayer {
                user: member.user_id.clone(),
                is_captain: member.is_captain,
            })
            .collect();
        teams.push(TeamView {
            registration,
            members,
        });
    }
    Ok(teams)
}

fn joined_by_user(
    conn: &Connection,
    user_id: &str,
    page: Page,
) -> Result<(Vec<JoinedTeam>, u64), StoreError> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM registration_players WHERE user_id = ?",
        [user_id],
        |row| row.get(0),
    )?;
    let mut stmt = conn.prepare(
        "SELECT registration_id FROM registration_players WHERE user_id = ? \
         ORDER BY joined_at DESC LIMIT ? OFFSET ?",
    )?;
    let registration_ids = stmt
        .query_map(
            params![user_id, page.limit as i64, page.offset() as i64],
            |row| row.get::<_, String>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let mut joined = Vec::with_capacity(registration_ids.len());
    for registration_id in registration_ids {
        let Some(registration) = find_by_id(conn, &registration_id)? else {
            continue;
        };
        let Some(tournament) = tournaments::find_by_id(conn, &registration.tournament_id)? else {
            continue;
        };
        joined.push(JoinedTeam {
            registration,
            tournament,
        });
    }
    Ok((joined, total.max(0) as u64))
}

impl Store {
    pub async fn join_tournament(
        &self,
        user_id: &str,
        tournament_id: &str,
    ) -> Result<Registration, JoinError> {
        let user_id = user_id.to_string();
        let tournament_id = tournament_id.to_string();
        self.call(move |conn| join(conn, &user_id, &tournament_id))
            .await
    }

    pub async fn join_team(
        &self,
        user_id: &str,
        team_id: u64,
        team_password: u32,
    ) -> Result<Registration, JoinTeamError> {
        let user_id = user_id.to_string();
        self.call(move |conn| join_team(conn, &user_id, team_id, team_password))
            .await
    }

    pub async fn teams_for_tournament(&self, tournament_id: &str) -> Result<Vec<TeamView>, StoreError> {
        let tournament_id = tournament_id.to_string();
        self.call(move |conn| teams_for_tournament(conn, &tournament_id))
            .await
    }

    pub async fn tournaments_joined_by(
        &self,
        user_id: &str,
        page: Page,
    ) -> Result<(Vec<JoinedTeam>, u64), StoreError> {
        let user_id = user_id.to_string();
        self.call(move |conn| joined_by_user(conn, &user_id, page))
            .await
    }
}
