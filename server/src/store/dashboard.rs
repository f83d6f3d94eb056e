use apnasquad_types::{Amount, PaymentState, TournamentStatus};
use chrono::{DateTime, Datelike, Duration, Months, Utc};
use rusqlite::{params, Connection};

use super::{column_amount, column_enum, to_ms, Store, StoreError};

/// Months shown on the revenue chart, oldest first, ending with the current one.
const REVENUE_MONTHS: u32 = 7;
const RECENT_TOURNAMENTS: i64 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonthlyRevenue {
    /// Short month name, e.g. `Jan`.
    pub label: String,
    pub revenue: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecentTournament {
    pub title: String,
    pub map: String,
    pub prize_pool: Amount,
    pub joined_spots: u32,
    pub total_spots: u32,
    pub status: TournamentStatus,
    pub is_completed: bool,
}

/// Raw figures behind the admin dashboard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DashboardSnapshot {
    pub total_tournaments: u64,
    pub tournaments_this_month: u64,
    pub tournaments_last_month: u64,
    pub live_matches: u64,
    pub total_players: u64,
    pub new_players_this_week: u64,
    pub total_earnings: Amount,
    pub earnings_this_month: Amount,
    pub monthly_revenue: Vec<MonthlyRevenue>,
    pub completed_tournaments: u64,
    pub upcoming_tournaments: u64,
    pub recent: Vec<RecentTournament>,
}

/// Midnight UTC on the first day of the month `back` months before `now`.
fn month_start(now: DateTime<Utc>, back: u32) -> Result<DateTime<Utc>, StoreError> {
    now.date_naive()
        .with_day(1)
        .and_then(|first| first.checked_sub_months(Months::new(back)))
        .and_then(|first| first.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| StoreError::Corrupt(format!("no month start {back} months before {now}")))
}

fn count(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<u64, StoreError> {
    let count: i64 = conn.query_row(sql, params, |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

/// Entry fees of paid registrations created in `[from, until)`.
fn earnings(conn: &Connection, from: i64, until: i64) -> Result<Amount, StoreError> {
    let paise: i64 = conn.query_row(
        "SELECT COALESCE(SUM(t.entry_fee), 0) FROM registrations r \
         JOIN tournaments t ON t.id = r.tournament_id \
         WHERE r.payment = ? AND r.created_at >= ? AND r.created_at < ?",
        params![PaymentState::Paid.as_str(), from, until],
        |row| row.get(0),
    )?;
    Ok(Amount::from_paise(paise))
}

pub(crate) fn snapshot(conn: &Connection, now: DateTime<Utc>) -> Result<DashboardSnapshot, StoreError> {
    let this_month = to_ms(month_start(now, 0)?);
    let last_month = to_ms(month_start(now, 1)?);
    let now_ms = to_ms(now);

    let total_tournaments = count(conn, "SELECT COUNT(*) FROM tournaments", [])?;
    let tournaments_this_month = count(
        conn,
        "SELECT COUNT(*) FROM tournaments WHERE created_at >= ?",
        [this_month],
    )?;
    let tournaments_last_month = count(
        conn,
        "SELECT COUNT(*) FROM tournaments WHERE created_at >= ? AND created_at < ?",
        [last_month, this_month],
    )?;
    let live_matches = count(
        conn,
        "SELECT COUNT(*) FROM tournaments WHERE status = ?",
        [TournamentStatus::Live.as_str()],
    )?;
    let total_players = count(conn, "SELECT COUNT(*) FROM users", [])?;
    let new_players_this_week = count(
        conn,
        "SELECT COUNT(*) FROM users WHERE created_at >= ?",
        [to_ms(now - Duration::days(7))],
    )?;
    let total_earnings = earnings(conn, i64::MIN, i64::MAX)?;
    let earnings_this_month = earnings(conn, this_month, i64::MAX)?;

    let mut monthly_revenue = Vec::with_capacity(REVENUE_MONTHS as usize);
    for back in (0..REVENUE_MONTHS).rev() {
        let start = month_start(now, back)?;
        let end = if back == 0 {
            i64::MAX
        } else {
            to_ms(month_start(now, back - 1)?)
        };
        monthly_revenue.push(MonthlyRevenue {
            label: start.format("%b").to_string(),
            revenue: earnings(conn, to_ms(start), end)?,
        });
    }

    let completed_tournaments = count(
        conn,
        "SELECT COUNT(*) FROM tournaments WHERE is_completed = 1",
        [],
    )?;
    let upcoming_tournaments = count(
        conn,
        "SELECT COUNT(*) FROM tournaments WHERE match_time > ? AND is_completed = 0 AND status != ?",
        params![now_ms, TournamentStatus::End.as_str()],
    )?;

    let mut stmt = conn.prepare(
        "SELECT title, map, prize_pool, joined_spots, total_spots, status, is_completed \
         FROM tournaments ORDER BY created_at DESC LIMIT ?",
    )?;
    let recent = stmt
        .query_map([RECENT_TOURNAMENTS], |row| {
            Ok(RecentTournament {
                title: row.get("title")?,
                map: row.get("map")?,
                prize_pool: column_amount(row, "prize_pool")?,
                joined_spots: row.get("joined_spots")?,
                total_spots: row.get("total_spots")?,
                status: column_enum(row, "status")?,
                is_completed: row.get("is_completed")?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DashboardSnapshot {
        total_tournaments,
        tournaments_this_month,
        tournaments_last_month,
        live_matches,
        total_players,
        new_players_this_week,
        total_earnings,
        earnings_this_month,
        monthly_revenue,
        completed_tournaments,
        upcoming_tournaments,
        recent,
    })
}

impl Store {
    pub async fn dashboard(&self) -> Result<DashboardSnapshot, StoreError> {
        self.call(|conn| snapshot(conn, Utc::now())).await
    }
}
