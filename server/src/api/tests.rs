use apnasquad_types::{AccountPatch, Amount, ProfilePatch, Role};
use axum::{
    extract::{Multipart, Path, State},
    routing::{delete, post},
    Json, Router,
};
use reqwest::{header, multipart, Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use super::Api;
use crate::auth::TokenKeys;
use crate::cache::OtpCache;
use crate::config::ServerConfig;
use crate::gateway::{self, GatewayConfig, PaymentGateway, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::images::{ImageHost, ImageKitConfig};
use crate::mailer::Mailer;
use crate::otp::OtpStore;
use crate::store::Store;
use crate::App;

const WEBHOOK_SECRET: &str = "test-webhook-secret";
const PASSWORD: &str = "hunter2hunter2";

/// Stands in for the gateway's order endpoint, echoing the order id back.
async fn mock_orders(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({
        "order_id": body["order_id"],
        "order_amount": body["order_amount"],
        "order_status": "ACTIVE",
        "payment_session_id": "session_test",
    }))
}

/// Stands in for the image host's upload endpoint.
async fn mock_upload(mut multipart: Multipart) -> Json<Value> {
    let mut file_name = String::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() == Some("fileName") {
            file_name = field.text().await.unwrap();
        }
    }
    Json(json!({
        "url": format!("https://images.example/{file_name}"),
        "fileId": format!("file-{file_name}"),
    }))
}

async fn mock_delete_image(
    State(deleted): State<Arc<Mutex<Vec<String>>>>,
    Path(file_id): Path<String>,
) -> Json<Value> {
    deleted.lock().unwrap().push(file_id);
    Json(json!({}))
}

/// Value of the `name` cookie set by a response.
fn set_cookie(response: &Response, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookie| cookie.strip_prefix(prefix.as_str()).map(str::to_string))
        .and_then(|cookie| cookie.split(';').next().map(str::to_string))
}

/// Full `Set-Cookie` line for the `name` cookie.
fn set_cookie_line(response: &Response, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|cookie| cookie.starts_with(prefix.as_str()))
        .map(str::to_string)
}

async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

struct TestContext {
    app: Arc<App>,
    base: String,
    client: Client,
    deleted_images: Arc<Mutex<Vec<String>>>,
}

struct Session {
    user_id: String,
    token: String,
}

impl TestContext {
    async fn new() -> Self {
        let deleted_images = Arc::new(Mutex::new(Vec::new()));
        let collaborators = Router::new()
            .route("/orders", post(mock_orders))
            .route("/files/upload", post(mock_upload))
            .route("/files/:file_id", delete(mock_delete_image))
            .with_state(deleted_images.clone());
        let collaborators_addr = spawn(collaborators).await;
        let gateway = PaymentGateway::new(GatewayConfig {
            base_url: format!("http://{collaborators_addr}"),
            app_id: "test-app".to_string(),
            secret_key: WEBHOOK_SECRET.to_string(),
            client_url: "http://localhost:5173".to_string(),
        })
        .unwrap();
        let config = ServerConfig::default();
        let otps = OtpStore::new(
            OtpCache::memory("test".to_string()),
            config.otp_length,
            config.otp_max_attempts,
        );
        let tokens = TokenKeys::new(
            "access-secret",
            "refresh-secret",
            Duration::from_secs(600),
            Duration::from_secs(1200),
        );
        let app = Arc::new(App::new(
            config,
            Store::open_in_memory().unwrap(),
            otps,
            tokens,
            gateway,
            Mailer::Outbox(Mutex::new(Vec::new())),
            ImageHost::imagekit(ImageKitConfig {
                private_key: "test-image-key".to_string(),
                upload_url: format!("http://{collaborators_addr}/files/upload"),
                api_url: format!("http://{collaborators_addr}"),
            })
            .unwrap(),
        ));
        let addr = spawn(Api::new(app.clone()).router()).await;
        Self {
            app,
            base: format!("http://{addr}/api/v1"),
            client: Client::new(),
            deleted_images,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn send(request: RequestBuilder, token: Option<&str>) -> (StatusCode, Value) {
        let request = match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn post(&self, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        Self::send(self.client.post(self.url(path)).json(&body), token).await
    }

    async fn get(&self, path: &str, token: Option<&str>) -> (StatusCode, Value) {
        Self::send(self.client.get(self.url(path)), token).await
    }

    async fn patch(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        Self::send(self.client.patch(self.url(path)).json(&body), Some(token)).await
    }

    async fn delete(&self, path: &str, token: &str) -> (StatusCode, Value) {
        Self::send(self.client.delete(self.url(path)), Some(token)).await
    }

    /// Signs up, confirms the mailed code and logs in.
    async fn register(&self, name: &str, email: &str) -> Session {
        let (status, _) = self
            .post(
                "/auth/sign-up",
                None,
                json!({ "name": name, "email": email, "password": PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let otp = self.app.mailer.last_value(email, "otp").unwrap();
        let (status, body) = self
            .post("/auth/verify-otp", None, json!({ "email": email, "otp": otp }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let user_id = body["data"]["_id"].as_str().unwrap().to_string();
        let token = self.login(email).await;
        Session { user_id, token }
    }

    async fn login_with(&self, email: &str, password: &str) -> Response {
        self.client
            .post(self.url("/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .unwrap()
    }

    async fn login(&self, email: &str) -> String {
        let response = self.login_with(email, PASSWORD).await;
        assert_eq!(response.status(), StatusCode::OK);
        set_cookie(&response, "accessToken").unwrap()
    }

    async fn admin(&self) -> Session {
        let session = self.register("Admin", "admin@example.com").await;
        self.app
            .store
            .update_account(
                &session.user_id,
                AccountPatch {
                    role: Some(Role::Admin),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        session
    }

    async fn player(&self, name: &str, email: &str, balance: Amount) -> Session {
        let session = self.register(name, email).await;
        self.app
            .store
            .update_account(
                &session.user_id,
                AccountPatch {
                    profile: ProfilePatch {
                        bgmi_id: Some(format!("bgmi-{name}")),
                        phone: Some("9876543210".to_string()),
                        ..Default::default()
                    },
                    balance: Some(balance),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        session
    }

    async fn balance(&self, user_id: &str) -> Amount {
        self.app.store.find_user(user_id).await.unwrap().unwrap().balance
    }

    async fn create_tournament(&self, admin: &Session, entry_fee: i64) -> String {
        let match_time = chrono::Utc::now() + chrono::Duration::hours(3);
        let (status, body) = self
            .post(
                "/tournament/create",
                Some(&admin.token),
                json!({
                    "title": "Night Squad Cup",
                    "mode": "squad",
                    "entryFee": entry_fee,
                    "prizePool": 1000,
                    "totalSpots": 2,
                    "matchTime": match_time.to_rfc3339(),
                    "map": "Erangel",
                    "roomId": "room-42",
                    "password": "secret",
                    "prizeDistribution": [
                        { "rank": 1, "prize": 700 },
                        { "rank": 2, "prize": 300 }
                    ]
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["_id"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn test_health_echoes_request_id() {
    let ctx = TestContext::new().await;
    let response = ctx
        .client
        .get(ctx.url("/health"))
        .header("x-request-id", "req-1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "req-1");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "everything is fine");
}

#[tokio::test]
async fn test_signup_login_and_me() {
    let ctx = TestContext::new().await;

    // Wrong code is rejected and the signup stays pending
    let (status, _) = ctx
        .post(
            "/auth/sign-up",
            None,
            json!({ "name": "Ravi", "email": "Ravi@Example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = ctx
        .post(
            "/auth/verify-otp",
            None,
            json!({ "email": "ravi@example.com", "otp": "not-it" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid OTP. Please enter the correct OTP.");

    let otp = ctx.app.mailer.last_value("ravi@example.com", "otp").unwrap();
    let (status, body) = ctx
        .post(
            "/auth/verify-otp",
            None,
            json!({ "email": "ravi@example.com", "otp": otp }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["email"], "ravi@example.com");

    // Duplicate signups conflict
    let (status, _) = ctx
        .post(
            "/auth/sign-up",
            None,
            json!({ "name": "Ravi", "email": "ravi@example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let token = ctx.login("ravi@example.com").await;
    let (status, body) = ctx.get("/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Ravi");
    assert!(body["data"].get("passwordHash").is_none());

    let (status, body) = ctx.get("/auth/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Unauthorized request. Token not found.");
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_join_checks_profile_and_balance() {
    let ctx = TestContext::new().await;
    let admin = ctx.admin().await;
    let tournament_id = ctx.create_tournament(&admin, 50).await;

    // Missing game id
    let bare = ctx.register("Bare", "bare@example.com").await;
    let (status, body) = ctx
        .post(
            &format!("/tournament/join?tournamentId={tournament_id}"),
            Some(&bare.token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "BGMI ID missing please update your profile");

    let broke = ctx
        .player("Broke", "broke@example.com", Amount::from_rupees(10))
        .await;
    let (status, body) = ctx
        .post(
            &format!("/tournament/join?tournamentId={tournament_id}"),
            Some(&broke.token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Insufficient balance.");

    let captain = ctx
        .player("Captain", "captain@example.com", Amount::from_rupees(100))
        .await;
    let (status, body) = ctx
        .post(
            &format!("/tournament/join?tournamentId={tournament_id}"),
            Some(&captain.token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Tournament joined successfully");
    assert_eq!(ctx.balance(&captain.user_id).await, Amount::from_rupees(50));
    let team_id = body["data"]["teamId"].clone();
    let team_password = body["data"]["teamPassword"].clone();

    // A second entry by the same player is refused
    let (status, body) = ctx
        .post(
            &format!("/tournament/join?tournamentId={tournament_id}"),
            Some(&captain.token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "You are already registered in this tournament.");

    // Teammates join with the team credentials
    let mate = ctx
        .player("Mate", "mate@example.com", Amount::ZERO)
        .await;
    let (status, _) = ctx
        .post(
            "/tournament/join-team",
            Some(&mate.token),
            json!({ "teamId": team_id, "teamPassword": "000000" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = ctx
        .post(
            "/tournament/join-team",
            Some(&mate.token),
            json!({ "teamId": team_id, "teamPassword": team_password }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Team joined successfully");

    // Members see room details; outsiders do not
    let (status, body) = ctx
        .get(
            &format!("/tournament/get-details?tournamentId={tournament_id}"),
            Some(&mate.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isJoined"], true);
    assert_eq!(body["data"]["tournament"]["roomId"], "room-42");
    assert_eq!(body["data"]["teams"][0]["players"].as_array().unwrap().len(), 2);
    assert!(body["data"]["teams"][0].get("teamPassword").is_none());
    assert!(body["data"]["teams"][0]["players"][0]["user"].get("phone").is_none());

    let (_, body) = ctx
        .get(
            &format!("/tournament/get-details?tournamentId={tournament_id}"),
            Some(&broke.token),
        )
        .await;
    assert_eq!(body["data"]["isJoined"], false);
    assert!(body["data"]["tournament"].get("roomId").is_none());

    let (status, body) = ctx.get("/tournament/get-my-tournaments", Some(&captain.token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["liveTournaments"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["pagination"]["totalDocs"], 1);

    let (status, body) = ctx.get("/tournament/get?limit=1", Some(&broke.token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pagination"]["totalResults"], 1);
    assert!(body["data"]["tournaments"][0].get("password").is_none());
}

#[tokio::test]
async fn test_deposit_webhook_settles_once() {
    let ctx = TestContext::new().await;
    let player = ctx
        .player("Payer", "payer@example.com", Amount::ZERO)
        .await;

    let (status, body) = ctx
        .post("/payment/create-order", Some(&player.token), json!({ "amount": 0 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Amount must be a positive number.");

    let (status, body) = ctx
        .post("/payment/create-order", Some(&player.token), json!({ "amount": 200 }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["payment_session_id"], "session_test");
    let order_id = body["data"]["order_id"].as_str().unwrap().to_string();

    let webhook = |payload: Vec<u8>, signature: Option<String>| {
        let mut request = ctx
            .client
            .post(format!("{}/payment/webhook/cashfree", ctx.base))
            .header(TIMESTAMP_HEADER, "1700000000")
            .body(payload);
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        request.send()
    };
    let payload = serde_json::to_vec(&json!({
        "data": {
            "order": { "order_id": order_id },
            "payment": { "payment_status": "SUCCESS", "payment_amount": 200 }
        }
    }))
    .unwrap();
    let signature = gateway::sign(WEBHOOK_SECRET, "1700000000", &payload).unwrap();

    // Unsigned and forged deliveries are refused
    let response = webhook(payload.clone(), None).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.text().await.unwrap(),
        "Signature or timestamp header missing"
    );
    let forged = gateway::sign("wrong-secret", "1700000000", &payload).unwrap();
    let response = webhook(payload.clone(), Some(forged)).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "Invalid signature");
    assert_eq!(ctx.balance(&player.user_id).await, Amount::ZERO);

    let response = webhook(payload.clone(), Some(signature.clone())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");
    assert_eq!(ctx.balance(&player.user_id).await, Amount::from_rupees(200));

    // Replays do not credit twice
    let response = webhook(payload, Some(signature)).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "Already processed");
    assert_eq!(ctx.balance(&player.user_id).await, Amount::from_rupees(200));

    let (status, body) = ctx
        .get(
            &format!("/payment/order-status?orderId={order_id}"),
            Some(&player.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "PAID");

    let (_, body) = ctx.get("/user/get-transaction", Some(&player.token)).await;
    assert_eq!(body["data"]["transactions"][0]["status"], "success");

    let wallet = ctx.app.wallet_metrics_snapshot();
    assert_eq!(wallet.deposits_paid, 1);
    assert_eq!(wallet.webhook_replays, 1);
    assert_eq!(wallet.webhook_rejected, 2);
}

#[tokio::test]
async fn test_withdrawal_limits_and_refund() {
    let ctx = TestContext::new().await;
    let admin = ctx.admin().await;
    let player = ctx
        .player("Saver", "saver@example.com", Amount::from_rupees(6_000))
        .await;

    let (status, body) = ctx
        .post(
            "/money/withdraw",
            Some(&player.token),
            json!({ "amount": 6000, "withdrawalMethod": "upi" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Maximum Withdraw amount is ₹5000");

    let (status, body) = ctx
        .post("/money/withdraw", Some(&player.token), json!({ "amount": 100 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "Please provide all required fields: amount, and withdrawalMethod."
    );

    let (status, body) = ctx
        .post(
            "/money/withdraw",
            Some(&player.token),
            json!({ "amount": 1000, "withdrawalMethod": "upi" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ctx.balance(&player.user_id).await, Amount::from_rupees(5_000));
    let withdrawal = body["data"]["newWithdrawal"].clone();
    assert_eq!(withdrawal["status"], "pending");

    let (status, body) = ctx
        .get("/admin/get-withdrawals?status=pending", Some(&admin.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalWithdrawals"], 1);
    assert_eq!(
        body["data"]["withdrawals"][0]["userId"]["email"],
        "saver@example.com"
    );

    let (status, body) = ctx
        .post(
            "/admin/update-withdraw",
            Some(&admin.token),
            json!({ "status": "paid", "_id": withdrawal["_id"], "transactionId": withdrawal["transactionId"] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid status provided.");

    // A failed payout returns the money
    let (status, _) = ctx
        .post(
            "/admin/update-withdraw",
            Some(&admin.token),
            json!({ "status": "failed", "_id": withdrawal["_id"], "transactionId": withdrawal["transactionId"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ctx.balance(&player.user_id).await, Amount::from_rupees(6_000));

    let (status, body) = ctx
        .post(
            "/admin/update-withdraw",
            Some(&admin.token),
            json!({ "status": "success", "_id": withdrawal["_id"], "transactionId": withdrawal["transactionId"] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Cannot update a finalized withdrawal status");

    let (_, body) = ctx.get("/money/withdrawals", Some(&player.token)).await;
    assert_eq!(body["data"]["userWithdrawals"][0]["status"], "failed");
}

#[tokio::test]
async fn test_admin_routes_require_admin() {
    let ctx = TestContext::new().await;
    let admin = ctx.admin().await;
    let player = ctx
        .player("Player", "player@example.com", Amount::ZERO)
        .await;

    let (status, body) = ctx.get("/admin/dashboard", Some(&player.token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Access denied. Admins only.");

    let tournament_id = ctx.create_tournament(&admin, 0).await;
    let (status, body) = ctx.get("/admin/dashboard", Some(&admin.token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["stats"].as_array().unwrap().len(), 4);
    assert_eq!(body["data"]["stats"][0]["value"], 1);
    assert_eq!(body["data"]["recentTournaments"][0]["status"], "Live");

    let response = ctx
        .client
        .patch(ctx.url(&format!("/admin/update/{tournament_id}")))
        .bearer_auth(&admin.token)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "What you want to update");

    let (status, body) = ctx.get("/admin/users?role=user", Some(&admin.token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalUsers"], 1);

    let response = ctx
        .client
        .delete(ctx.url(&format!("/admin/delete/{tournament_id}")))
        .bearer_auth(&admin.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = ctx
        .client
        .delete(ctx.url(&format!("/admin/delete/{tournament_id}")))
        .bearer_auth(&admin.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_signup_otp_cannot_be_replayed() {
    let ctx = TestContext::new().await;
    let (status, _) = ctx
        .post(
            "/auth/sign-up",
            None,
            json!({ "name": "Meera", "email": "meera@example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let otp = ctx.app.mailer.last_value("meera@example.com", "otp").unwrap();
    let (status, _) = ctx
        .post(
            "/auth/verify-otp",
            None,
            json!({ "email": "meera@example.com", "otp": otp }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // The code is gone once the account exists
    let (status, body) = ctx
        .post(
            "/auth/verify-otp",
            None,
            json!({ "email": "meera@example.com", "otp": otp }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "OTP expired or invalid. Please request a new OTP."
    );
}

#[tokio::test]
async fn test_password_reset_flow() {
    let ctx = TestContext::new().await;
    ctx.register("Kiran", "kiran@example.com").await;
    let new_password = "correct-horse-battery";

    let (status, body) = ctx
        .post(
            "/auth/request-otp",
            None,
            json!({ "email": "nobody@example.com" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body["message"],
        "User not found with this email. Please enter a registered email."
    );

    let (status, _) = ctx
        .post("/auth/request-otp", None, json!({ "email": "kiran@example.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let otp = ctx.app.mailer.last_value("kiran@example.com", "otp").unwrap();

    // Resetting before verifying the code is refused
    let (status, body) = ctx
        .post(
            "/auth/reset-password",
            None,
            json!({ "email": "kiran@example.com", "password": new_password }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "OTP not verified. Please verify the OTP first.");

    let (status, body) = ctx
        .post(
            "/auth/verify-otp-for-reset-password",
            None,
            json!({ "email": "kiran@example.com", "otp": "0000x" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid OTP. Please check and try again.");

    let (status, _) = ctx
        .post(
            "/auth/verify-otp-for-reset-password",
            None,
            json!({ "email": "kiran@example.com", "otp": otp }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = ctx
        .post(
            "/auth/reset-password",
            None,
            json!({ "email": "kiran@example.com", "password": new_password }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // The verified session is single use
    let (status, body) = ctx
        .post(
            "/auth/reset-password",
            None,
            json!({ "email": "kiran@example.com", "password": "another-password" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "OTP session expired or invalid. Please try the reset flow again."
    );
    let (status, _) = ctx
        .post(
            "/auth/verify-otp-for-reset-password",
            None,
            json!({ "email": "kiran@example.com", "otp": otp }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let response = ctx.login_with("kiran@example.com", PASSWORD).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = ctx.login_with("kiran@example.com", new_password).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_refresh_rotation_and_logout() {
    let ctx = TestContext::new().await;
    ctx.register("Arjun", "arjun@example.com").await;
    let response = ctx.login_with("arjun@example.com", PASSWORD).await;
    let first_refresh = set_cookie(&response, "refreshToken").unwrap();

    let response = ctx
        .client
        .post(ctx.url("/auth/refresh-token"))
        .json(&json!({ "refreshToken": first_refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let access = set_cookie(&response, "accessToken").unwrap();
    let second_refresh = set_cookie(&response, "refreshToken").unwrap();
    assert_ne!(first_refresh, second_refresh);

    // The rotated-out token no longer works
    let (status, body) = ctx
        .post(
            "/auth/refresh-token",
            None,
            json!({ "refreshToken": first_refresh }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Refresh token is expired or used");

    let (status, body) = ctx.get("/auth/me", Some(&access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "arjun@example.com");

    let response = ctx
        .client
        .post(ctx.url("/auth/logout"))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    for name in ["accessToken", "refreshToken"] {
        let line = set_cookie_line(&response, name).unwrap();
        assert!(line.starts_with(&format!("{name}=;")), "{line}");
        assert!(line.contains("Max-Age=0"), "{line}");
    }

    // Logging out revokes the stored refresh token
    let (status, _) = ctx
        .post(
            "/auth/refresh-token",
            None,
            json!({ "refreshToken": second_refresh }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_profile_update_json_and_multipart() {
    let ctx = TestContext::new().await;
    let session = ctx.register("Priya", "priya@example.com").await;

    let (status, body) = ctx
        .patch("/user/update", &session.token, json!({ "name": "P" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "Name must be between 2 and 55 characters long"
    );

    // Wallet and role fields are ignored
    let (status, body) = ctx
        .patch(
            "/user/update",
            &session.token,
            json!({
                "name": "Priya S",
                "bgmiId": " 5123456789 ",
                "upiId": "priya@upi",
                "balance": 100000,
                "role": "admin"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Priya S");
    assert_eq!(body["data"]["bgmiId"], "5123456789");
    assert_eq!(body["data"]["upiId"], "priya@upi");
    assert_eq!(body["data"]["balance"], 0);
    assert_eq!(body["data"]["role"], "user");

    let upload = |file_name: &str, mime: &str| {
        let form = multipart::Form::new().text("teamName", "Night Owls").part(
            "profileImage",
            multipart::Part::bytes(vec![0x89, b'P', b'N', b'G'])
                .file_name(file_name.to_string())
                .mime_str(mime)
                .unwrap(),
        );
        ctx.client
            .patch(ctx.url("/user/update"))
            .multipart(form)
    };

    let (status, body) =
        TestContext::send(upload("notes.txt", "text/plain"), Some(&session.token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Profile image must be an image file");

    let (status, body) =
        TestContext::send(upload("avatar.png", "image/png"), Some(&session.token)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["teamName"], "Night Owls");
    assert_eq!(body["data"]["avatar"], "https://images.example/avatar.png");
    assert!(ctx.deleted_images.lock().unwrap().is_empty());

    // A new picture replaces the old one on the image host
    let (status, body) =
        TestContext::send(upload("second.png", "image/png"), Some(&session.token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["avatar"], "https://images.example/second.png");
    assert_eq!(
        *ctx.deleted_images.lock().unwrap(),
        vec!["file-avatar.png".to_string()]
    );
}

#[tokio::test]
async fn test_admin_manages_users() {
    let ctx = TestContext::new().await;
    let admin = ctx.admin().await;
    let player = ctx
        .player("Player", "player@example.com", Amount::from_rupees(40))
        .await;

    let (status, body) = ctx
        .patch(&format!("/admin/update-user/{}", player.user_id), &admin.token, json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "What you want to update");

    let (status, body) = ctx
        .patch(
            &format!("/admin/update-user/{}", player.user_id),
            &admin.token,
            json!({ "balance": -5 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Balance cannot be negative.");

    let (status, body) = ctx
        .patch(
            &format!("/admin/update-user/{}", player.user_id),
            &admin.token,
            json!({ "balance": 250, "bonus": 15, "role": "manager", "teamName": "Wolves" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["balance"], 250);
    assert_eq!(body["data"]["bonus"], 15);
    assert_eq!(body["data"]["role"], "manager");
    assert_eq!(body["data"]["teamName"], "Wolves");

    // Managers do not pass the admin gate
    let (status, _) = ctx.get("/admin/dashboard", Some(&player.token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = ctx
        .patch("/admin/update-user/missing", &admin.token, json!({ "bonus": 1 }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "user not found");

    let (status, _) = ctx
        .delete(&format!("/admin/delete-user/{}", player.user_id), &admin.token)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = ctx
        .delete(&format!("/admin/delete-user/{}", player.user_id), &admin.token)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "user not found");

    // The deleted account's token stops working
    let (status, _) = ctx.get("/auth/me", Some(&player.token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sub_rupee_amounts_rejected() {
    let ctx = TestContext::new().await;
    let admin = ctx.admin().await;
    let player = ctx
        .player("Saver", "saver@example.com", Amount::from_rupees(10))
        .await;

    let (status, body) = ctx
        .post(
            "/money/withdraw",
            Some(&player.token),
            json!({ "amount": 0.5, "withdrawalMethod": "upi" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Amount must be at least ₹1.");
    assert_eq!(ctx.balance(&player.user_id).await, Amount::from_rupees(10));

    let match_time = chrono::Utc::now() + chrono::Duration::hours(3);
    let (status, body) = ctx
        .post(
            "/tournament/create",
            Some(&admin.token),
            json!({
                "title": "Penny Cup",
                "mode": "solo",
                "entryFee": 0.5,
                "prizePool": 100,
                "totalSpots": 2,
                "matchTime": match_time.to_rfc3339(),
                "map": "Erangel",
                "prizeDistribution": [{ "rank": 1, "prize": 100 }]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Entry fee must be 0 or at least ₹1.");
}
