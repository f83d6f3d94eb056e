use super::*;
use apnasquad_types::{
    api::Page, wallet::WalletError, AccountPatch, Mode, OrderStatus, PrizeRank, ProfilePatch,
    TournamentPatch, User, WithdrawalMethod, WithdrawalStatus, REFERRAL_BONUS,
};
use chrono::Duration;

fn first_page() -> Page {
    Page { page: 1, limit: 10 }
}

async fn player(store: &Store, email: &str, balance: i64, bonus: i64) -> User {
    let user = store
        .create_user(NewUser {
            name: "Player".to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            referred_by: None,
            referral_bonus: REFERRAL_BONUS,
        })
        .await
        .unwrap()
        .unwrap();
    store
        .update_account(
            &user.id,
            AccountPatch {
                profile: ProfilePatch {
                    bgmi_id: Some("5123456789".to_string()),
                    phone: Some("9876543210".to_string()),
                    team_name: Some("Night Owls".to_string()),
                    ..Default::default()
                },
                balance: Some(Amount::from_rupees(balance)),
                bonus: Some(Amount::from_rupees(bonus)),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap()
}

async fn tournament(store: &Store, mode: Mode, entry_fee: i64, total_spots: u32) -> String {
    store
        .insert_tournament(NewTournament {
            title: "Sunday Scrims".to_string(),
            mode,
            entry_fee: Amount::from_rupees(entry_fee),
            prize_pool: Amount::from_rupees(300),
            total_spots,
            match_time: Utc::now() + Duration::days(1),
            map: "Erangel".to_string(),
            room_id: "room-1".to_string(),
            password: "secret".to_string(),
            prize_distribution: vec![
                PrizeRank {
                    rank: 1,
                    prize: Amount::from_rupees(200),
                },
                PrizeRank {
                    rank: 2,
                    prize: Amount::from_rupees(100),
                },
            ],
            created_by: None,
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_referral_credits_referrer() {
    let store = Store::open_in_memory().unwrap();
    let referrer = player(&store, "ref@example.com", 0, 0).await;
    let user = store
        .create_user(NewUser {
            name: "New".to_string(),
            email: "new@example.com".to_string(),
            password_hash: "hash".to_string(),
            referred_by: Some(referrer.id.clone()),
            referral_bonus: REFERRAL_BONUS,
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.referred_by.as_deref(), Some(referrer.id.as_str()));
    let referrer = store.find_user(&referrer.id).await.unwrap().unwrap();
    assert_eq!(referrer.bonus, REFERRAL_BONUS);

    let duplicate = store
        .create_user(NewUser {
            name: "Again".to_string(),
            email: "new@example.com".to_string(),
            password_hash: "hash".to_string(),
            referred_by: None,
            referral_bonus: REFERRAL_BONUS,
        })
        .await
        .unwrap();
    assert!(duplicate.is_none());
}

#[tokio::test]
async fn test_join_charges_bonus_then_balance() {
    let store = Store::open_in_memory().unwrap();
    let user = player(&store, "a@example.com", 100, 50).await;
    let id = tournament(&store, Mode::Squad, 100, 4).await;

    let registration = store.join_tournament(&user.id, &id).await.unwrap();
    assert_eq!(registration.slot, 1);
    assert_eq!(registration.players.len(), 1);
    assert!(registration.players[0].is_captain);

    let user = store.find_user(&user.id).await.unwrap().unwrap();
    assert_eq!(user.balance, Amount::from_rupees(5));
    assert_eq!(user.bonus, Amount::from_rupees(45));

    let (entries, total) = store
        .transactions_for_user(&user.id, first_page())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(entries[0].amount, Amount::from_rupees(100));
    assert_eq!(entries[0].bonus_used, Amount::from_rupees(5));

    assert!(matches!(
        store.join_tournament(&user.id, &id).await,
        Err(JoinError::AlreadyRegistered)
    ));
}

#[tokio::test]
async fn test_join_insufficient_balance_writes_nothing() {
    let store = Store::open_in_memory().unwrap();
    let user = player(&store, "poor@example.com", 90, 100).await;
    let id = tournament(&store, Mode::Solo, 100, 4).await;

    let err = store.join_tournament(&user.id, &id).await.unwrap_err();
    assert!(matches!(
        err,
        JoinError::Wallet(WalletError::InsufficientBalance { .. })
    ));
    let user = store.find_user(&user.id).await.unwrap().unwrap();
    assert_eq!(user.balance, Amount::from_rupees(90));
    assert_eq!(user.bonus, Amount::from_rupees(100));
    let tournament = store.find_tournament(&id).await.unwrap().unwrap();
    assert_eq!(tournament.joined_spots, 0);
}

#[tokio::test]
async fn test_join_requires_player_details() {
    let store = Store::open_in_memory().unwrap();
    let user = store
        .create_user(NewUser {
            name: "Bare".to_string(),
            email: "bare@example.com".to_string(),
            password_hash: "hash".to_string(),
            referred_by: None,
            referral_bonus: REFERRAL_BONUS,
        })
        .await
        .unwrap()
        .unwrap();
    let id = tournament(&store, Mode::Solo, 0, 4).await;
    assert!(matches!(
        store.join_tournament(&user.id, &id).await,
        Err(JoinError::MissingDetails("BGMI ID missing please update your profile"))
    ));
}

#[tokio::test]
async fn test_concurrent_joins_never_overfill() {
    let store = Store::open_in_memory().unwrap();
    let id = tournament(&store, Mode::Solo, 10, 3).await;
    let mut users = Vec::new();
    for i in 0..8 {
        users.push(player(&store, &format!("p{i}@example.com"), 100, 0).await);
    }

    let mut handles = Vec::new();
    for user in users {
        let store = store.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            store.join_tournament(&user.id, &id).await
        }));
    }
    let mut joined = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => joined += 1,
            Err(JoinError::Full) => {}
            Err(err) => panic!("unexpected join error: {err}"),
        }
    }
    assert_eq!(joined, 3);
    let tournament = store.find_tournament(&id).await.unwrap().unwrap();
    assert_eq!(tournament.joined_spots, 3);
}

#[tokio::test]
async fn test_team_capacity() {
    let store = Store::open_in_memory().unwrap();
    let captain = player(&store, "captain@example.com", 100, 0).await;
    let mate = player(&store, "mate@example.com", 0, 0).await;
    let extra = player(&store, "extra@example.com", 0, 0).await;
    let id = tournament(&store, Mode::Duo, 10, 4).await;

    let registration = store.join_tournament(&captain.id, &id).await.unwrap();
    assert!(matches!(
        store.join_team(&mate.id, registration.team_id, registration.team_password + 1).await,
        Err(JoinTeamError::InvalidCredentials)
    ));
    let team = store
        .join_team(&mate.id, registration.team_id, registration.team_password)
        .await
        .unwrap();
    assert_eq!(team.players.len(), 2);
    assert!(matches!(
        store.join_team(&mate.id, registration.team_id, registration.team_password).await,
        Err(JoinTeamError::AlreadyInTeam)
    ));
    let err = store
        .join_team(&extra.id, registration.team_id, registration.team_password)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Team is full. A duo team can only have 2 players."
    );

    let teams = store.teams_for_tournament(&id).await.unwrap();
    assert_eq!(teams.len(), 1);
    assert_eq!(teams[0].members.len(), 2);
    assert_eq!(teams[0].members[1].name, "Player");
}

#[tokio::test]
async fn test_webhook_settlement_is_applied_once() {
    let store = Store::open_in_memory().unwrap();
    let user = player(&store, "payer@example.com", 0, 0).await;
    store
        .record_deposit_order(&user.id, "order_abc", "ref", Amount::from_rupees(250))
        .await
        .unwrap();

    let first = store
        .settle_deposit("order_abc", DepositOutcome::Paid)
        .await
        .unwrap();
    assert!(matches!(first, Settlement::Applied(ref order) if order.status == OrderStatus::Paid));
    let replay = store
        .settle_deposit("order_abc", DepositOutcome::Paid)
        .await
        .unwrap();
    assert!(matches!(replay, Settlement::AlreadyProcessed(_)));
    let late_failure = store
        .settle_deposit(
            "order_abc",
            DepositOutcome::Failed {
                reason: "bank declined".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(matches!(late_failure, Settlement::AlreadyProcessed(_)));

    let user = store.find_user(&user.id).await.unwrap().unwrap();
    assert_eq!(user.balance, Amount::from_rupees(250));
    let (entries, _) = store
        .transactions_for_user(&user.id, first_page())
        .await
        .unwrap();
    assert_eq!(entries[0].status, apnasquad_types::TransactionStatus::Success);

    assert!(matches!(
        store.settle_deposit("order_missing", DepositOutcome::Paid).await,
        Err(LedgerError::OrderNotFound)
    ));
}

#[tokio::test]
async fn test_withdrawal_lifecycle() {
    let store = Store::open_in_memory().unwrap();
    let user = player(&store, "payee@example.com", 1000, 0).await;

    assert!(matches!(
        store
            .request_withdrawal(&user.id, Amount::from_rupees(1001), WithdrawalMethod::Upi)
            .await,
        Err(LedgerError::Wallet(WalletError::InsufficientForWithdrawal { .. }))
    ));

    let withdrawal = store
        .request_withdrawal(&user.id, Amount::from_rupees(400), WithdrawalMethod::Upi)
        .await
        .unwrap();
    assert_eq!(withdrawal.status, WithdrawalStatus::Pending);
    let balance = store.find_user(&user.id).await.unwrap().unwrap().balance;
    assert_eq!(balance, Amount::from_rupees(600));

    let failed = store
        .update_withdrawal_status(WithdrawalUpdate {
            id: withdrawal.id.clone(),
            transaction_id: withdrawal.transaction_id.clone(),
            status: WithdrawalStatus::Failed,
        })
        .await
        .unwrap();
    assert_eq!(failed.status, WithdrawalStatus::Failed);
    let balance = store.find_user(&user.id).await.unwrap().unwrap().balance;
    assert_eq!(balance, Amount::from_rupees(1000));

    assert!(matches!(
        store
            .update_withdrawal_status(WithdrawalUpdate {
                id: withdrawal.id.clone(),
                transaction_id: withdrawal.transaction_id.clone(),
                status: WithdrawalStatus::Success,
            })
            .await,
        Err(LedgerError::WithdrawalFinalized)
    ));

    let second = store
        .request_withdrawal(&user.id, Amount::from_rupees(100), WithdrawalMethod::Bank)
        .await
        .unwrap();
    let paid = store
        .update_withdrawal_status(WithdrawalUpdate {
            id: second.id.clone(),
            transaction_id: second.transaction_id.clone(),
            status: WithdrawalStatus::Success,
        })
        .await
        .unwrap();
    assert_eq!(paid.status, WithdrawalStatus::Success);
    let balance = store.find_user(&user.id).await.unwrap().unwrap().balance;
    assert_eq!(balance, Amount::from_rupees(900));

    let (listed, total) = store
        .list_withdrawals(
            WithdrawalFilter {
                status: Some(WithdrawalStatus::Success),
                ..Default::default()
            },
            first_page(),
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(
        listed[0].user.as_ref().map(|user| user.email.as_str()),
        Some("payee@example.com")
    );
}

#[tokio::test]
async fn test_tournament_patch_rejects_spots_below_joined() {
    let store = Store::open_in_memory().unwrap();
    let user = player(&store, "solo@example.com", 100, 0).await;
    let id = tournament(&store, Mode::Solo, 10, 4).await;
    store.join_tournament(&user.id, &id).await.unwrap();
    store
        .join_tournament(&player(&store, "solo2@example.com", 100, 0).await.id, &id)
        .await
        .unwrap();

    let outcome = store
        .update_tournament(
            &id,
            TournamentPatch {
                total_spots: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(matches!(outcome, PatchOutcome::Invalid(_)));

    let outcome = store
        .update_tournament(
            &id,
            TournamentPatch {
                title: Some("Renamed".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(matches!(outcome, PatchOutcome::Updated(ref t) if t.title == "Renamed"));

    assert!(store.delete_tournament(&id).await.unwrap().is_some());
    assert!(store.teams_for_tournament(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_open_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("apnasquad.db");
    {
        let store = Store::open(&path).unwrap();
        player(&store, "disk@example.com", 10, 0).await;
    }
    let store = Store::open(&path).unwrap();
    let user = store
        .find_user_by_email("disk@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.balance, Amount::from_rupees(10));
}

#[tokio::test]
async fn test_dashboard_counts() {
    let store = Store::open_in_memory().unwrap();
    let user = player(&store, "dash@example.com", 100, 0).await;
    let id = tournament(&store, Mode::Solo, 20, 4).await;
    store.join_tournament(&user.id, &id).await.unwrap();

    let snapshot = store.dashboard().await.unwrap();
    assert_eq!(snapshot.total_tournaments, 1);
    assert_eq!(snapshot.tournaments_this_month, 1);
    assert_eq!(snapshot.live_matches, 1);
    assert_eq!(snapshot.total_players, 1);
    assert_eq!(snapshot.total_earnings, Amount::from_rupees(20));
    assert_eq!(snapshot.monthly_revenue.len(), 7);
    assert_eq!(
        snapshot.monthly_revenue.last().map(|month| month.revenue),
        Some(Amount::from_rupees(20))
    );
    assert_eq!(snapshot.upcoming_tournaments, 1);
    assert_eq!(snapshot.recent[0].joined_spots, 1);
}

#[tokio::test]
async fn test_ledger_rejects_sub_rupee_withdrawal() {
    let store = Store::open_in_memory().unwrap();
    let user = player(&store, "cents@example.com", 10, 0).await;

    assert!(matches!(
        store
            .request_withdrawal(&user.id, Amount::from_paise(50), WithdrawalMethod::Upi)
            .await,
        Err(LedgerError::Wallet(WalletError::BelowMinimum { .. }))
    ));

    // Nothing moved
    let user = store.find_user(&user.id).await.unwrap().unwrap();
    assert_eq!(user.balance, Amount::from_rupees(10));
    let (entries, total) = store
        .transactions_for_user(&user.id, first_page())
        .await
        .unwrap();
    assert_eq!(total, 0);
    assert!(entries.is_empty());
    let (withdrawals, _) = store
        .withdrawals_for_user(&user.id, first_page())
        .await
        .unwrap();
    assert!(withdrawals.is_empty());
}

#[tokio::test]
async fn test_delete_user_releases_team_spots() {
    let store = Store::open_in_memory().unwrap();
    let captain = player(&store, "captain@example.com", 100, 0).await;
    let mate = player(&store, "mate@example.com", 0, 0).await;
    let solo = player(&store, "solo@example.com", 100, 0).await;
    let duo_id = tournament(&store, Mode::Duo, 10, 4).await;
    let solo_id = tournament(&store, Mode::Solo, 10, 4).await;

    // Captain and mate share a duo team, captain also plays solo
    let team = store.join_tournament(&captain.id, &duo_id).await.unwrap();
    store
        .join_team(&mate.id, team.team_id, team.team_password)
        .await
        .unwrap();
    store.join_tournament(&captain.id, &solo_id).await.unwrap();
    let kept = store.join_tournament(&solo.id, &solo_id).await.unwrap();
    assert_eq!(kept.slot, 2);

    assert!(store.delete_user(&captain.id).await.unwrap());
    assert!(store.find_user(&captain.id).await.unwrap().is_none());

    // The duo team survives under the mate
    let duo = store.find_tournament(&duo_id).await.unwrap().unwrap();
    assert_eq!(duo.joined_spots, 1);
    let teams = store.teams_for_tournament(&duo_id).await.unwrap();
    assert_eq!(teams.len(), 1);
    assert_eq!(teams[0].members.len(), 1);
    assert_eq!(teams[0].members[0].user_id, mate.id);
    assert!(teams[0].members[0].is_captain);

    // The emptied solo entry gives its spot back, and its slot is reused
    let solo_tournament = store.find_tournament(&solo_id).await.unwrap().unwrap();
    assert_eq!(solo_tournament.joined_spots, 1);
    let newcomer = player(&store, "newcomer@example.com", 100, 0).await;
    let joined = store.join_tournament(&newcomer.id, &solo_id).await.unwrap();
    assert_eq!(joined.slot, 1);

    // Ledger history outlives the account
    let (entries, total) = store
        .transactions_for_user(&captain.id, first_page())
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert!(entries
        .iter()
        .all(|entry| entry.kind == apnasquad_types::TransactionKind::Join));

    assert!(!store.delete_user(&captain.id).await.unwrap());
}
