use apnasquad_types::{
    Amount, MAX_NAME_LENGTH, MIN_NAME_LENGTH, MIN_PASSWORD_LENGTH, REFERRAL_BONUS,
};
use axum::{extract::State as AxumState, http::StatusCode, response::Response};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::{ok, present, reply, ApiJson};
use crate::auth::{self, AuthUser, TokenError, REFRESH_COOKIE};
use crate::error::{ApiError, Result};
use crate::mailer::Template;
use crate::otp::{self, OtpCheck};
use crate::store::NewUser;
use crate::App;

/// Signup details held in the OTP cache until the code is confirmed.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct PendingSignup {
    name: String,
    email: String,
    password_hash: String,
    referred_by: Option<String>,
    referral_bonus: Amount,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SignUpRequest {
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
    referral_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct OtpRequest {
    email: Option<String>,
    otp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct CredentialsRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct EmailRequest {
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RefreshRequest {
    refresh_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatedAccount {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    email: String,
    referral_code: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, rest)| !host.is_empty() && !rest.is_empty())
        && !domain.ends_with('.')
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters long"
        )));
    }
    Ok(())
}

pub(super) async fn sign_up(
    AxumState(app): AxumState<Arc<App>>,
    ApiJson(body): ApiJson<SignUpRequest>,
) -> Result<Response> {
    let name = present(body.name)
        .ok_or_else(|| ApiError::bad_request("Name is required and cannot be empty"))?;
    let name_length = name.chars().count();
    if !(MIN_NAME_LENGTH..=MAX_NAME_LENGTH).contains(&name_length) {
        return Err(ApiError::bad_request(format!(
            "Name must be between {MIN_NAME_LENGTH} and {MAX_NAME_LENGTH} characters long"
        )));
    }
    let email = present(body.email)
        .ok_or_else(|| ApiError::bad_request("Email is required and cannot be empty"))?;
    if !is_valid_email(&email) {
        return Err(ApiError::bad_request("Please provide a valid email address"));
    }
    let email = normalize_email(&email);
    let password = body
        .password
        .filter(|password| !password.is_empty())
        .ok_or_else(|| ApiError::bad_request("Password is required"))?;
    check_password(&password)?;

    if app.store.find_user_by_email(&email).await?.is_some() {
        return Err(ApiError::conflict(
            "Email already exists. Please use a different email or login.",
        ));
    }

    let (referred_by, referral_bonus) = match present(body.referral_code) {
        Some(code) => {
            let referrer = app
                .store
                .find_user_by_referral_code(&code)
                .await?
                .ok_or_else(|| ApiError::bad_request("Invalid referral code"))?;
            (Some(referrer.id), REFERRAL_BONUS)
        }
        None => (None, Amount::ZERO),
    };

    let pending = PendingSignup {
        name: name.clone(),
        email: email.clone(),
        password_hash: auth::hash_password(password).await?,
        referred_by,
        referral_bonus,
    };
    let key = otp::signup_key(&email);
    let entry = app
        .otps
        .issue(&key, pending, app.config.signup_otp_ttl())
        .await?;

    let values = HashMap::from([("name", name), ("otp", entry.code)]);
    if let Err(err) = app.mailer.send(&email, Template::SignupOtp, values).await {
        tracing::warn!(error = %err, "failed to send signup otp");
        app.otps.discard(&key).await?;
        return Err(ApiError::internal("Failed to send OTP. Please try again.", err));
    }

    Ok(ok(
        serde_json::json!({ "email": email }),
        "OTP has been sent to your email. Please verify within 10 minutes.",
    ))
}

pub(super) async fn verify_signup(
    AxumState(app): AxumState<Arc<App>>,
    ApiJson(body): ApiJson<OtpRequest>,
) -> Result<Response> {
    let email = present(body.email).ok_or_else(|| ApiError::bad_request("Email is required"))?;
    let code = present(body.otp).ok_or_else(|| ApiError::bad_request("OTP is required"))?;
    let email = normalize_email(&email);
    let key = otp::signup_key(&email);

    let entry = match app.otps.check::<PendingSignup>(&key, &code).await? {
        OtpCheck::Valid(entry) => entry,
        OtpCheck::Missing => {
            return Err(ApiError::bad_request(
                "OTP expired or invalid. Please request a new OTP.",
            ))
        }
        OtpCheck::Expired => {
            return Err(ApiError::bad_request(
                "OTP has expired. Please request a new OTP.",
            ))
        }
        OtpCheck::Mismatch { .. } => {
            return Err(ApiError::bad_request(
                "Invalid OTP. Please enter the correct OTP.",
            ))
        }
        OtpCheck::Locked => {
            return Err(ApiError::bad_request(
                "Too many invalid attempts. Please request a new OTP.",
            ))
        }
    };

    let pending = entry.payload;
    let created = app
        .store
        .create_user(NewUser {
            name: pending.name,
            email: pending.email,
            password_hash: pending.password_hash,
            referred_by: pending.referred_by,
            referral_bonus: pending.referral_bonus,
        })
        .await?;
    app.otps.discard(&key).await?;
    let user = created.ok_or_else(|| {
        ApiError::conflict("Email already exists. Please use a different email or login.")
    })?;
    tracing::info!(user_id = %user.id, referred = user.referred_by.is_some(), "account created");

    Ok(reply(
        StatusCode::CREATED,
        CreatedAccount {
            id: user.id,
            name: user.name,
            email: user.email,
            referral_code: user.referral_code,
            created_at: user.created_at,
        },
        "Account created successfully!",
    ))
}

pub(super) async fn login(
    AxumState(app): AxumState<Arc<App>>,
    jar: CookieJar,
    ApiJson(body): ApiJson<CredentialsRequest>,
) -> Result<(CookieJar, Response)> {
    let email = present(body.email).ok_or_else(|| ApiError::bad_request("Email is required"))?;
    if !is_valid_email(&email) {
        return Err(ApiError::bad_request("Please provide a valid email address"));
    }
    let password = body
        .password
        .filter(|password| !password.is_empty())
        .ok_or_else(|| ApiError::bad_request("Password is required"))?;

    let user = app
        .store
        .find_user_by_email(&normalize_email(&email))
        .await?
        .ok_or_else(|| ApiError::not_found("Invalid Email or Password"))?;
    if !auth::verify_password(password, user.password_hash.clone()).await? {
        return Err(ApiError::unauthorized("Invalid Email or Password"));
    }

    let pair = app
        .tokens
        .issue(&user)
        .map_err(|err| ApiError::internal("Failed to create session.", err))?;
    app.store
        .set_refresh_token(&user.id, Some(pair.refresh.clone()))
        .await?;
    tracing::info!(user_id = %user.id, "login");

    let jar = auth::with_session(jar, &app.tokens, pair);
    Ok((jar, ok(serde_json::json!({ "user": user }), "login successfull")))
}

pub(super) async fn me(AuthUser(user): AuthUser) -> Response {
    ok(user, "Fetched logged in user")
}

pub(super) async fn logout(
    AxumState(app): AxumState<Arc<App>>,
    AuthUser(user): AuthUser,
    jar: CookieJar,
) -> Result<(CookieJar, Response)> {
    app.store.set_refresh_token(&user.id, None).await?;
    Ok((
        auth::without_session(jar),
        ok(serde_json::json!({}), "User logged out successfully"),
    ))
}

/// Rotates the session when the presented refresh token is the one on record.
pub(super) async fn refresh_token(
    AxumState(app): AxumState<Arc<App>>,
    jar: CookieJar,
    body: Option<ApiJson<RefreshRequest>>,
) -> Result<(CookieJar, Response)> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
        .or_else(|| body.and_then(|ApiJson(body)| present(body.refresh_token)))
        .ok_or_else(|| ApiError::unauthorized("Unauthorized request. Refresh token not found."))?;

    let claims = app.tokens.verify_refresh(&token).map_err(|err| match err {
        TokenError::Expired => {
            ApiError::unauthorized("Refresh token has expired. Please login again.")
        }
        _ => ApiError::unauthorized("Invalid refresh token"),
    })?;
    let user = app
        .store
        .find_user(&claims.id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid refresh token"))?;
    if user.refresh_token.as_deref() != Some(token.as_str()) {
        return Err(ApiError::unauthorized("Refresh token is expired or used"));
    }

    let pair = app
        .tokens
        .issue(&user)
        .map_err(|err| ApiError::internal("Failed to create session.", err))?;
    app.store
        .set_refresh_token(&user.id, Some(pair.refresh.clone()))
        .await?;

    let jar = auth::with_session(jar, &app.tokens, pair);
    Ok((jar, ok(serde_json::json!({ "user": user }), "Access token refreshed")))
}

pub(super) async fn request_reset(
    AxumState(app): AxumState<Arc<App>>,
    ApiJson(body): ApiJson<EmailRequest>,
) -> Result<Response> {
    let email = present(body.email).ok_or_else(|| ApiError::bad_request("Please enter email"))?;
    let email = normalize_email(&email);
    let user = app.store.find_user_by_email(&email).await?.ok_or_else(|| {
        ApiError::not_found("User not found with this email. Please enter a registered email.")
    })?;

    let key = otp::reset_key(&user.email);
    let entry = app
        .otps
        .issue(&key, user.email.clone(), app.config.reset_otp_ttl())
        .await?;
    let values = HashMap::from([("otp", entry.code)]);
    if let Err(err) = app
        .mailer
        .send(&user.email, Template::ResetPassword, values)
        .await
    {
        tracing::warn!(error = %err, "failed to send reset otp");
        app.otps.discard(&key).await?;
        return Err(ApiError::internal(
            "Failed to send OTP email. Please try again.",
            err,
        ));
    }

    Ok(ok(
        serde_json::json!({}),
        "OTP for password reset sent successfully.",
    ))
}

pub(super) async fn verify_reset(
    AxumState(app): AxumState<Arc<App>>,
    ApiJson(body): ApiJson<OtpRequest>,
) -> Result<Response> {
    let email = present(body.email)
        .ok_or_else(|| ApiError::bad_request("Email is missing. Please try again."))?;
    let code = present(body.otp).ok_or_else(|| ApiError::bad_request("Please enter the OTP."))?;
    let key = otp::reset_key(&normalize_email(&email));

    match app.otps.check::<String>(&key, &code).await? {
        OtpCheck::Valid(entry) => {
            app.otps
                .mark_verified(&key, entry, app.config.reset_session_ttl())
                .await?;
            Ok(ok(
                serde_json::json!({}),
                "OTP verified successfully. You can now reset your password.",
            ))
        }
        OtpCheck::Missing | OtpCheck::Expired => Err(ApiError::bad_request(
            "OTP has expired. Please send again.",
        )),
        OtpCheck::Mismatch { .. } => Err(ApiError::bad_request(
            "Invalid OTP. Please check and try again.",
        )),
        OtpCheck::Locked => Err(ApiError::bad_request(
            "Too many invalid attempts. Please request a new OTP.",
        )),
    }
}

pub(super) async fn reset_password(
    AxumState(app): AxumState<Arc<App>>,
    ApiJson(body): ApiJson<CredentialsRequest>,
) -> Result<Response> {
    let email = present(body.email).ok_or_else(|| ApiError::bad_request("Please enter email"))?;
    let password = body
        .password
        .filter(|password| !password.is_empty())
        .ok_or_else(|| ApiError::bad_request("Please enter a new password"))?;
    check_password(&password)?;
    let email = normalize_email(&email);
    let key = otp::reset_key(&email);

    let entry = app.otps.load::<String>(&key).await?.ok_or_else(|| {
        ApiError::bad_request("OTP session expired or invalid. Please try the reset flow again.")
    })?;
    if !entry.verified {
        return Err(ApiError::bad_request(
            "OTP not verified. Please verify the OTP first.",
        ));
    }

    let hash = auth::hash_password(password).await?;
    if !app.store.set_password(&email, hash).await? {
        return Err(ApiError::not_found("User not found."));
    }
    app.otps.discard(&key).await?;
    tracing::info!(email = %email, "password reset");

    Ok(ok(
        serde_json::json!({}),
        "Password has been reset successfully.",
    ))
}
