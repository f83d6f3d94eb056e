use apnasquad_types::{
    api::{PageQuery, DEFAULT_PAGE_LIMIT},
    AccountPatch, Amount, Mode, PrizeRank, ProfilePatch, Role, TournamentPatch, TournamentStatus,
    User, WithdrawalMethod, WithdrawalStatus, MAX_NAME_LENGTH, MIN_NAME_LENGTH,
};
use axum::{
    extract::{Path, State as AxumState},
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ok, parse_wire, present, ApiJson, ApiQuery};
use crate::auth::AdminUser;
use crate::error::{ApiError, Result};
use crate::store::{
    DashboardSnapshot, PatchOutcome, UserFilter, WithdrawalContact, WithdrawalFilter,
    WithdrawalUpdate, WithdrawalWithUser,
};
use crate::App;

const NOTHING_TO_UPDATE: &str = "What you want to update";

#[derive(Serialize)]
struct StatCard {
    title: &'static str,
    value: serde_json::Value,
    change: String,
}

#[derive(Serialize)]
struct Dataset<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<&'static str>,
    data: Vec<T>,
}

#[derive(Serialize)]
struct Chart<L, T> {
    labels: Vec<L>,
    datasets: Vec<Dataset<T>>,
}

#[derive(Serialize)]
struct RecentCard {
    name: String,
    game: String,
    prize: String,
    spots: String,
    status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Dashboard {
    stats: Vec<StatCard>,
    line_chart_data: Chart<String, Amount>,
    doughnut_chart_data: Chart<&'static str, u64>,
    recent_tournaments: Vec<RecentCard>,
}

/// Month-over-month growth of new tournaments, in percent.
fn growth_percent(this_month: u64, last_month: u64) -> f64 {
    match (this_month, last_month) {
        (_, 0) if this_month == 0 => 0.0,
        (_, 0) => 100.0,
        _ => (this_month as f64 - last_month as f64) / last_month as f64 * 100.0,
    }
}

fn signed(value: f64) -> String {
    if value < 0.0 {
        format!("{value:.2}")
    } else {
        format!("+{value:.2}")
    }
}

impl From<DashboardSnapshot> for Dashboard {
    fn from(snapshot: DashboardSnapshot) -> Self {
        let growth = growth_percent(
            snapshot.tournaments_this_month,
            snapshot.tournaments_last_month,
        );
        let stats = vec![
            StatCard {
                title: "Total Tournaments",
                value: snapshot.total_tournaments.into(),
                change: format!("{}% this month", signed(growth)),
            },
            StatCard {
                title: "Live Matches",
                value: snapshot.live_matches.into(),
                change: "Currently active".to_string(),
            },
            StatCard {
                title: "Total Players",
                value: snapshot.total_players.into(),
                change: format!("+{} new players this week", snapshot.new_players_this_week),
            },
            StatCard {
                title: "Total Earnings",
                value: snapshot.total_earnings.to_string().into(),
                change: format!("+{} this month", snapshot.earnings_this_month),
            },
        ];

        let (labels, revenue): (Vec<String>, Vec<Amount>) = snapshot
            .monthly_revenue
            .into_iter()
            .map(|month| (month.label, month.revenue))
            .unzip();

        let recent_tournaments = snapshot
            .recent
            .into_iter()
            .map(|tournament| RecentCard {
                name: tournament.title,
                game: tournament.map,
                prize: tournament.prize_pool.to_string(),
                spots: format!("{}/{}", tournament.joined_spots, tournament.total_spots),
                status: if tournament.status == TournamentStatus::Live {
                    "Live"
                } else if tournament.is_completed {
                    "Completed"
                } else {
                    "End"
                },
            })
            .collect();

        Dashboard {
            stats,
            line_chart_data: Chart {
                labels,
                datasets: vec![Dataset {
                    label: Some("Revenue"),
                    data: revenue,
                }],
            },
            doughnut_chart_data: Chart {
                labels: vec!["Completed", "Live", "Upcoming"],
                datasets: vec![Dataset {
                    label: None,
                    data: vec![
                        snapshot.completed_tournaments,
                        snapshot.live_matches,
                        snapshot.upcoming_tournaments,
                    ],
                }],
            },
            recent_tournaments,
        }
    }
}

pub(super) async fn dashboard(
    AxumState(app): AxumState<Arc<App>>,
    AdminUser(_): AdminUser,
) -> Result<Response> {
    let snapshot = app.store.dashboard().await?;
    Ok(ok(Dashboard::from(snapshot), "dashboard analytics fetched"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TournamentUpdateRequest {
    title: Option<String>,
    mode: Option<Mode>,
    entry_fee: Option<Amount>,
    prize_pool: Option<Amount>,
    total_spots: Option<u32>,
    match_time: Option<DateTime<Utc>>,
    map: Option<String>,
    room_id: Option<String>,
    password: Option<String>,
    is_active: Option<bool>,
    is_completed: Option<bool>,
    publish: Option<bool>,
    status: Option<TournamentStatus>,
    prize_distribution: Option<Vec<PrizeRank>>,
}

impl From<TournamentUpdateRequest> for TournamentPatch {
    fn from(body: TournamentUpdateRequest) -> Self {
        TournamentPatch {
            title: present(body.title),
            mode: body.mode,
            entry_fee: body.entry_fee,
            prize_pool: body.prize_pool,
            total_spots: body.total_spots,
            match_time: body.match_time,
            map: present(body.map),
            room_id: body.room_id.map(|value| value.trim().to_string()),
            password: body.password.map(|value| value.trim().to_string()),
            is_active: body.is_active,
            is_completed: body.is_completed,
            publish: body.publish,
            status: body.status,
            prize_distribution: body.prize_distribution,
        }
    }
}

pub(super) async fn update_tournament(
    AxumState(app): AxumState<Arc<App>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<TournamentUpdateRequest>,
) -> Result<Response> {
    let patch = TournamentPatch::from(body);
    if patch.is_empty() {
        return Err(ApiError::bad_request(NOTHING_TO_UPDATE));
    }
    match app.store.update_tournament(&id, patch).await? {
        PatchOutcome::Updated(tournament) => {
            tracing::info!(tournament_id = %id, admin_id = %admin.id, "tournament updated");
            Ok(ok(tournament, "Tournament updated successfully"))
        }
        PatchOutcome::NotFound => Err(ApiError::not_found("Tournament not found")),
        PatchOutcome::Invalid(err) => Err(err.into()),
    }
}

pub(super) async fn delete_tournament(
    AxumState(app): AxumState<Arc<App>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Response> {
    let deleted = app
        .store
        .delete_tournament(&id)
        .await?
        .ok_or_else(|| ApiError::bad_request("tournament not found"))?;
    tracing::info!(tournament_id = %id, admin_id = %admin.id, "tournament deleted");
    Ok(ok(deleted, "Tournament deleted successfully"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UsersQuery {
    #[serde(flatten)]
    page: PageQuery,
    id: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    bgmi_id: Option<String>,
    role: Option<String>,
}

impl UsersQuery {
    fn filter(self) -> Result<UserFilter> {
        Ok(UserFilter {
            id: present(self.id),
            email: present(self.email).map(|email| email.to_lowercase()),
            phone: present(self.phone),
            bgmi_id: present(self.bgmi_id),
            role: parse_wire::<Role>(self.role, "Invalid role.")?,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UsersPage {
    users: Vec<User>,
    current_page: u32,
    total_pages: u64,
    total_users: u64,
    limit: u32,
}

pub(super) async fn users(
    AxumState(app): AxumState<Arc<App>>,
    AdminUser(_): AdminUser,
    ApiQuery(query): ApiQuery<UsersQuery>,
) -> Result<Response> {
    let page = query.page.resolve(DEFAULT_PAGE_LIMIT);
    let filter = query.filter()?;
    let (users, total) = app.store.list_users(filter, page).await?;
    Ok(ok(
        UsersPage {
            users,
            current_page: page.page,
            total_pages: page.total_pages(total),
            total_users: total,
            limit: page.limit,
        },
        "Users fetched successfully",
    ))
}

pub(super) async fn delete_user(
    AxumState(app): AxumState<Arc<App>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Response> {
    if !app.store.delete_user(&id).await? {
        return Err(ApiError::bad_request("user not found"));
    }
    tracing::info!(user_id = %id, admin_id = %admin.id, "user deleted");
    Ok(ok(serde_json::json!({}), "User deleted success"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AccountUpdateRequest {
    name: Option<String>,
    bgmi_id: Option<String>,
    phone: Option<String>,
    upi_id: Option<String>,
    upi_name: Option<String>,
    team_name: Option<String>,
    avatar: Option<String>,
    role: Option<Role>,
    balance: Option<Amount>,
    bonus: Option<Amount>,
}

impl AccountUpdateRequest {
    fn into_patch(self) -> Result<AccountPatch> {
        let name = present(self.name);
        if let Some(name) = &name {
            let length = name.chars().count();
            if !(MIN_NAME_LENGTH..=MAX_NAME_LENGTH).contains(&length) {
                return Err(ApiError::bad_request(format!(
                    "Name must be between {MIN_NAME_LENGTH} and {MAX_NAME_LENGTH} characters long"
                )));
            }
        }
        if self.balance.is_some_and(Amount::is_negative) {
            return Err(ApiError::bad_request("Balance cannot be negative."));
        }
        if self.bonus.is_some_and(Amount::is_negative) {
            return Err(ApiError::bad_request("Bonus cannot be negative."));
        }
        let trimmed = |value: Option<String>| value.map(|value| value.trim().to_string());
        Ok(AccountPatch {
            profile: ProfilePatch {
                name,
                bgmi_id: trimmed(self.bgmi_id),
                phone: trimmed(self.phone),
                upi_id: trimmed(self.upi_id),
                upi_name: trimmed(self.upi_name),
                team_name: trimmed(self.team_name),
                avatar: trimmed(self.avatar),
                file_id: None,
            },
            role: self.role,
            balance: self.balance,
            bonus: self.bonus,
        })
    }
}

pub(super) async fn update_user(
    AxumState(app): AxumState<Arc<App>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<AccountUpdateRequest>,
) -> Result<Response> {
    let patch = body.into_patch()?;
    if patch.is_empty() {
        return Err(ApiError::bad_request(NOTHING_TO_UPDATE));
    }
    let updated = app
        .store
        .update_account(&id, patch)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    tracing::info!(user_id = %id, admin_id = %admin.id, "user updated");
    Ok(ok(updated, "User updated successfully"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WithdrawalsQuery {
    #[serde(flatten)]
    page: PageQuery,
    transaction_id: Option<String>,
    status: Option<String>,
}

/// A withdrawal with its requester's contact details in place of the id.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalRow {
    #[serde(rename = "_id")]
    id: String,
    user_id: Option<WithdrawalContact>,
    amount: Amount,
    status: WithdrawalStatus,
    withdrawal_method: WithdrawalMethod,
    transaction_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WithdrawalWithUser> for WithdrawalRow {
    fn from(row: WithdrawalWithUser) -> Self {
        let WithdrawalWithUser { withdrawal, user } = row;
        Self {
            id: withdrawal.id,
            user_id: user,
            amount: withdrawal.amount,
            status: withdrawal.status,
            withdrawal_method: withdrawal.withdrawal_method,
            transaction_id: withdrawal.transaction_id,
            created_at: withdrawal.created_at,
            updated_at: withdrawal.updated_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalsPage {
    withdrawals: Vec<WithdrawalRow>,
    page: u32,
    limit: u32,
    total_pages: u64,
    total_withdrawals: u64,
}

pub(super) async fn withdrawals(
    AxumState(app): AxumState<Arc<App>>,
    AdminUser(_): AdminUser,
    ApiQuery(query): ApiQuery<WithdrawalsQuery>,
) -> Result<Response> {
    let page = query.page.resolve(DEFAULT_PAGE_LIMIT);
    let filter = WithdrawalFilter {
        transaction_id: present(query.transaction_id),
        status: parse_wire(query.status, "Invalid status provided.")?,
    };
    let (rows, total) = app.store.list_withdrawals(filter, page).await?;
    Ok(ok(
        WithdrawalsPage {
            withdrawals: rows.into_iter().map(WithdrawalRow::from).collect(),
            page: page.page,
            limit: page.limit,
            total_pages: page.total_pages(total),
            total_withdrawals: total,
        },
        "All withdrawal requests fetched with pagination successfully.",
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WithdrawalStatusRequest {
    status: Option<String>,
    #[serde(rename = "_id")]
    id: Option<String>,
    transaction_id: Option<String>,
}

pub(super) async fn update_withdrawal(
    AxumState(app): AxumState<Arc<App>>,
    AdminUser(admin): AdminUser,
    ApiJson(body): ApiJson<WithdrawalStatusRequest>,
) -> Result<Response> {
    let status: WithdrawalStatus = parse_wire(body.status, "Invalid status provided.")?
        .ok_or_else(|| ApiError::bad_request("Invalid status provided."))?;
    let (Some(id), Some(transaction_id)) = (present(body.id), present(body.transaction_id)) else {
        return Err(ApiError::not_found("Withdrawal request not found"));
    };
    let withdrawal = app
        .store
        .update_withdrawal_status(WithdrawalUpdate {
            id,
            transaction_id,
            status,
        })
        .await?;
    if withdrawal.status.is_terminal() {
        app.wallet_metrics().inc_withdrawal_settled();
    }
    tracing::info!(
        withdrawal_id = %withdrawal.id,
        status = %withdrawal.status,
        admin_id = %admin.id,
        "withdrawal status updated"
    );
    Ok(ok(withdrawal, "Withdrawal status updated successfully"))
}
