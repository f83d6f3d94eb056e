use apnasquad_types::{
    api::PageQuery, validate_terms, Amount, Mode, PaymentState, PrizeRank, Registration,
    RegistrationStatus, Tournament, TournamentStatus,
};
use axum::{extract::State as AxumState, http::StatusCode, response::Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{ok, parse_wire, present, reply, ApiJson, ApiQuery, Pagination};
use crate::auth::{AdminUser, AuthUser};
use crate::error::{ApiError, Result};
use crate::store::{NewTournament, TeamView, TournamentFilter};
use crate::App;

/// Listing pages default to five cards.
const TOURNAMENT_PAGE_LIMIT: u32 = 5;

/// Fields hidden until a player has joined.
const ROOM_FIELDS: [&str; 2] = ["roomId", "password"];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateTournamentRequest {
    title: Option<String>,
    mode: Option<String>,
    entry_fee: Option<Amount>,
    prize_pool: Option<Amount>,
    total_spots: Option<u32>,
    match_time: Option<DateTime<Utc>>,
    map: Option<String>,
    room_id: Option<String>,
    password: Option<String>,
    prize_distribution: Option<Vec<PrizeRank>>,
}

fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| ApiError::bad_request(format!("{field} is required")))
}

impl CreateTournamentRequest {
    fn into_new(self, created_by: &str, now: DateTime<Utc>) -> Result<NewTournament> {
        let title = required(present(self.title), "Title")?;
        let mode: Mode = parse_wire(self.mode, "Mode must be one of solo, duo or squad.")?
            .ok_or_else(|| ApiError::bad_request("Mode is required"))?;
        let entry_fee = required(self.entry_fee, "EntryFee")?;
        let prize_pool = required(self.prize_pool, "PrizePool")?;
        let total_spots = required(self.total_spots, "TotalSpots")?;
        let match_time = required(self.match_time, "MatchTime")?;
        let map = required(present(self.map), "Map")?;
        let prize_distribution = required(self.prize_distribution, "PrizeDistribution")?;

        if match_time <= now {
            return Err(ApiError::bad_request("Match time must be in the future."));
        }
        validate_terms(entry_fee, prize_pool, total_spots, 0, &prize_distribution)?;

        Ok(NewTournament {
            title,
            mode,
            entry_fee,
            prize_pool,
            total_spots,
            match_time,
            map,
            room_id: present(self.room_id).unwrap_or_default(),
            password: present(self.password).unwrap_or_default(),
            prize_distribution,
            created_by: Some(created_by.to_string()),
        })
    }
}

pub(super) async fn create(
    AxumState(app): AxumState<Arc<App>>,
    AdminUser(admin): AdminUser,
    ApiJson(body): ApiJson<CreateTournamentRequest>,
) -> Result<Response> {
    let new = body.into_new(&admin.id, Utc::now())?;
    let tournament = app.store.insert_tournament(new).await?;
    tracing::info!(
        tournament_id = %tournament.id,
        admin_id = %admin.id,
        "tournament created"
    );
    Ok(reply(
        StatusCode::CREATED,
        tournament,
        "Tournament created successfully and is now live!",
    ))
}

/// Serializes a tournament with the room credentials removed.
fn without_room(tournament: &Tournament) -> Result<Value> {
    let mut value = serde_json::to_value(tournament)
        .map_err(|err| ApiError::internal("Failed to render tournament", err))?;
    if let Value::Object(fields) = &mut value {
        for field in ROOM_FIELDS {
            fields.remove(field);
        }
    }
    Ok(value)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UpcomingQuery {
    #[serde(flatten)]
    page: PageQuery,
    map: Option<String>,
    mode: Option<String>,
    status: Option<String>,
    match_time: Option<String>,
}

impl UpcomingQuery {
    fn filter(self) -> Result<TournamentFilter> {
        let after = match present(self.match_time) {
            Some(raw) => Some(
                raw.parse::<DateTime<Utc>>()
                    .map_err(|_| ApiError::bad_request("Invalid matchTime."))?,
            ),
            None => None,
        };
        Ok(TournamentFilter {
            map: present(self.map),
            mode: parse_wire(self.mode, "Invalid mode.")?,
            status: parse_wire::<TournamentStatus>(self.status, "Invalid status.")?,
            after,
        })
    }
}

#[derive(Serialize)]
struct UpcomingPage {
    tournaments: Vec<Value>,
    pagination: Pagination,
}

pub(super) async fn upcoming(
    AxumState(app): AxumState<Arc<App>>,
    AuthUser(_): AuthUser,
    ApiQuery(query): ApiQuery<UpcomingQuery>,
) -> Result<Response> {
    let page = query.page.resolve(TOURNAMENT_PAGE_LIMIT);
    let filter = query.filter()?;
    let (tournaments, total) = app.store.list_upcoming_tournaments(filter, page).await?;
    let tournaments = tournaments
        .iter()
        .map(without_room)
        .collect::<Result<Vec<_>>>()?;
    Ok(ok(
        UpcomingPage {
            tournaments,
            pagination: Pagination::new(page, total),
        },
        "Upcoming tournaments fetched successfully.",
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocsPagination {
    total_docs: u64,
    limit: u32,
    page: u32,
    total_pages: u64,
    has_next_page: bool,
    has_prev_page: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MyTournaments {
    live_tournaments: Vec<Tournament>,
    completed_tournaments: Vec<Tournament>,
    pagination: DocsPagination,
}

pub(super) async fn mine(
    AxumState(app): AxumState<Arc<App>>,
    AuthUser(user): AuthUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Response> {
    let page = query.resolve(TOURNAMENT_PAGE_LIMIT);
    let (joined, total) = app.store.tournaments_joined_by(&user.id, page).await?;
    let (completed_tournaments, live_tournaments): (Vec<_>, Vec<_>) = joined
        .into_iter()
        .map(|entry| entry.tournament)
        .partition(|tournament| tournament.is_completed);
    let total_pages = page.total_pages(total);
    Ok(ok(
        MyTournaments {
            live_tournaments,
            completed_tournaments,
            pagination: DocsPagination {
                total_docs: total,
                limit: page.limit,
                page: page.page,
                total_pages,
                has_next_page: (page.page as u64) < total_pages,
                has_prev_page: page.page > 1,
            },
        },
        "Fetched success",
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TournamentIdQuery {
    tournament_id: Option<String>,
}

impl TournamentIdQuery {
    fn id(self) -> Result<String> {
        present(self.tournament_id).ok_or_else(|| ApiError::bad_request("Tournament id is required"))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerProfile {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    bgmi_id: String,
    avatar: String,
    team_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerSummary {
    user: PlayerProfile,
    is_captain: bool,
}

/// A team as other players see it; joining credentials are never included.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TeamSummary {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "tournament")]
    tournament_id: String,
    mode: Mode,
    team_name: String,
    slot: u32,
    status: RegistrationStatus,
    payment: PaymentState,
    players: Vec<PlayerSummary>,
    created_at: DateTime<Utc>,
}

impl TeamSummary {
    fn new(team: TeamView, show_phone: bool) -> Self {
        let TeamView {
            registration,
            members,
        } = team;
        let players = members
            .into_iter()
            .map(|member| PlayerSummary {
                is_captain: member.is_captain,
                user: PlayerProfile {
                    id: member.user_id,
                    name: member.name,
                    bgmi_id: member.bgmi_id,
                    avatar: member.avatar,
                    team_name: member.team_name,
                    phone: show_phone.then_some(member.phone),
                },
            })
            .collect();
        Self {
            id: registration.id,
            tournament_id: registration.tournament_id,
            mode: registration.mode,
            team_name: registration.team_name,
            slot: registration.slot,
            status: registration.status,
            payment: registration.payment,
            players,
            created_at: registration.created_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TournamentDetails {
    tournament: Value,
    teams: Vec<TeamSummary>,
    is_joined: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    team_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    team_password: Option<u32>,
}

pub(super) async fn details(
    AxumState(app): AxumState<Arc<App>>,
    AuthUser(user): AuthUser,
    ApiQuery(query): ApiQuery<TournamentIdQuery>,
) -> Result<Response> {
    let tournament_id = query.id()?;
    let (tournament, teams) = futures::try_join!(
        app.store.find_tournament(&tournament_id),
        app.store.teams_for_tournament(&tournament_id),
    )?;
    let tournament = tournament.ok_or_else(|| ApiError::not_found("Tournament not found."))?;

    let own_team = teams
        .iter()
        .find(|team| team.registration.has_player(&user.id))
        .map(|team| (team.registration.team_id, team.registration.team_password));
    let is_joined = own_team.is_some();
    let is_admin = user.is_admin();

    let tournament = if is_joined || is_admin {
        serde_json::to_value(&tournament)
            .map_err(|err| ApiError::internal("Failed to render tournament", err))?
    } else {
        without_room(&tournament)?
    };
    let teams = teams
        .into_iter()
        .map(|team| TeamSummary::new(team, is_admin))
        .collect();

    Ok(ok(
        TournamentDetails {
            tournament,
            teams,
            is_joined,
            team_id: own_team.map(|(team_id, _)| team_id),
            team_password: own_team.map(|(_, team_password)| team_password),
        },
        "Tournament details fetched successfully.",
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinedTeamCredentials {
    #[serde(rename = "_id")]
    id: String,
    team_id: u64,
    team_password: u32,
    slot: u32,
}

impl From<Registration> for JoinedTeamCredentials {
    fn from(registration: Registration) -> Self {
        Self {
            id: registration.id,
            team_id: registration.team_id,
            team_password: registration.team_password,
            slot: registration.slot,
        }
    }
}

pub(super) async fn join(
    AxumState(app): AxumState<Arc<App>>,
    AuthUser(user): AuthUser,
    ApiQuery(query): ApiQuery<TournamentIdQuery>,
) -> Result<Response> {
    let tournament_id = query.id()?;
    let registration = app.store.join_tournament(&user.id, &tournament_id).await?;
    app.wallet_metrics().inc_tournament_join();
    tracing::info!(
        user_id = %user.id,
        tournament_id = %tournament_id,
        team_id = registration.team_id,
        "tournament joined"
    );
    Ok(ok(
        JoinedTeamCredentials::from(registration),
        "Tournament joined successfully",
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct JoinTeamRequest {
    team_id: Option<Value>,
    team_password: Option<Value>,
}

/// Team credentials arrive either as JSON numbers or as digit strings.
fn numeric<T: std::str::FromStr>(value: Option<&Value>) -> Option<T> {
    match value? {
        Value::Number(number) => number.to_string().parse().ok(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

pub(super) async fn join_team(
    AxumState(app): AxumState<Arc<App>>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<JoinTeamRequest>,
) -> Result<Response> {
    let credentials = numeric::<u64>(body.team_id.as_ref())
        .zip(numeric::<u32>(body.team_password.as_ref()));
    let Some((team_id, team_password)) = credentials else {
        return Err(ApiError::bad_request("Invalid Team ID or Team Password"));
    };
    let registration = app
        .store
        .join_team(&user.id, team_id, team_password)
        .await?;
    app.wallet_metrics().inc_team_join();
    tracing::info!(
        user_id = %user.id,
        team_id = registration.team_id,
        "team joined"
    );
    Ok(ok(serde_json::json!({}), "Team joined successfully"))
}
