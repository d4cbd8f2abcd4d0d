use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{Duration, Utc};
use md5::{Digest, Md5};
use rand::RngCore;
use tracing::{debug, error, info};
use uuid::Uuid;
use validator::ValidateEmail;

use markshare_db::{NewUser, Registration, TokenRedemption, UserRow};
use markshare_types::api::{
    ForgotPasswordRequest, LoginRequest, LoginResponse, MessageResponse, RegisterRequest,
    ResetPasswordRequest, UserProfile, VerifyEmailRequest,
};

use crate::error::ApiError;
use crate::extract::Payload;
use crate::middleware::{Viewer, create_token};
use crate::password::{hash_password, validate_password, verify_password};
use crate::{AppState, run_db};

pub const VERIFICATION_TTL_HOURS: i64 = 24;
pub const RESET_TTL_HOURS: i64 = 1;

/// Random bytes behind every verification and reset token (256 bits).
const TOKEN_BYTES: usize = 32;

const REGISTERED: &str =
    "User created successfully. Please check your email to verify your account.";
const RESET_REQUESTED: &str =
    "If an account exists with this email, a password reset link has been sent.";
const INVALID_CREDENTIALS: &str = "Invalid email or password";

pub async fn register(
    State(state): State<AppState>,
    Payload(req): Payload<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    let name = req.name.trim().to_string();
    if email.is_empty() || req.password.is_empty() || name.is_empty() {
        return Err(ApiError::validation("Missing required fields"));
    }
    if !email.validate_email() {
        return Err(ApiError::validation("Invalid email address"));
    }
    validate_password(&req.password)?;

    let token = generate_token();
    let image = avatar_url(&email);
    let now = Utc::now();
    let expires_at = now + Duration::hours(VERIFICATION_TTL_HOURS);

    let registration = {
        let email = email.clone();
        let token = token.clone();
        let password = req.password;
        run_db(&state, move |db| {
            let hash = hash_password(&password)?;
            db.register_user(
                &NewUser {
                    email: &email,
                    name: &name,
                    password_hash: &hash,
                    image: Some(&image),
                },
                &token,
                expires_at,
                now,
            )
        })
        .await?
    };

    match registration {
        Registration::AlreadyVerified => {
            return Err(ApiError::Conflict("Email already registered".into()));
        }
        Registration::Created { user_id } => info!(%user_id, "user registered"),
        Registration::Refreshed { user_id } => info!(%user_id, "pending registration refreshed"),
    }

    state.mail.send_verification(&email, &token).await?;

    Ok((StatusCode::CREATED, Json(MessageResponse::new(REGISTERED))))
}

pub async fn verify_email(
    State(state): State<AppState>,
    Payload(req): Payload<VerifyEmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let token = req.token.trim().to_string();
    if token.is_empty() {
        return Err(ApiError::validation("Token is required"));
    }

    match run_db(&state, move |db| db.consume_email_verification(&token, Utc::now())).await? {
        TokenRedemption::Consumed { user_id } => {
            info!(%user_id, "email verified");
            Ok(Json(MessageResponse::new("Email verified successfully")))
        }
        TokenRedemption::NotFound => Err(ApiError::InvalidToken(
            "Invalid verification token".into(),
        )),
        TokenRedemption::Expired => Err(ApiError::Expired(
            "Verification token has expired".into(),
        )),
    }
}

/// Always answers with the same message so callers cannot tell which emails
/// have accounts.
pub async fn forgot_password(
    State(state): State<AppState>,
    Payload(req): Payload<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = normalize_email(&req.email);
    if email.is_empty() {
        return Err(ApiError::validation("Email is required"));
    }

    let user = run_db(&state, move |db| db.get_user_by_email(&email)).await?;
    let Some(user) = user else {
        debug!("password reset requested for unknown email");
        return Ok(Json(MessageResponse::new(RESET_REQUESTED)));
    };

    let token = generate_token();
    let expires_at = Utc::now() + Duration::hours(RESET_TTL_HOURS);
    {
        let user_id = user.id.clone();
        let token = token.clone();
        run_db(&state, move |db| db.create_password_reset(&user_id, &token, expires_at)).await?;
    }

    // a delivery failure must not change the answer
    match state.mail.send_password_reset(&user.email, &token).await {
        Ok(()) => info!(user_id = %user.id, "password reset issued"),
        Err(err) => error!(user_id = %user.id, error = ?err, "password reset mail not delivered"),
    }

    Ok(Json(MessageResponse::new(RESET_REQUESTED)))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Payload(req): Payload<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let token = req.token.trim().to_string();
    if token.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("Missing required fields"));
    }
    validate_password(&req.password)?;

    let password = req.password;
    let outcome = run_db(&state, move |db| {
        let hash = hash_password(&password)?;
        db.consume_password_reset(&token, &hash, Utc::now())
    })
    .await?;

    match outcome {
        TokenRedemption::Consumed { user_id } => {
            info!(%user_id, "password reset");
            Ok(Json(MessageResponse::new("Password has been reset successfully")))
        }
        TokenRedemption::NotFound => Err(ApiError::InvalidToken("Invalid reset token".into())),
        TokenRedemption::Expired => Err(ApiError::Expired("Reset token has expired".into())),
    }
}

pub async fn login(
    State(state): State<AppState>,
    Payload(req): Payload<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let email = normalize_email(&req.email);
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("Email and password required"));
    }

    let password = req.password;
    let user = run_db(&state, move |db| {
        let Some(user) = db.get_user_by_email(&email)? else {
            return Ok(None);
        };
        // accounts from an external identity provider have no password
        let Some(hash) = user.password.as_deref() else {
            return Ok(None);
        };
        let matches = verify_password(&password, hash)?;
        Ok(matches.then_some(user))
    })
    .await?
    .ok_or_else(|| ApiError::Unauthorized(INVALID_CREDENTIALS.into()))?;

    if !user.is_verified() {
        return Err(ApiError::Unauthorized(
            "Please verify your email before logging in".into(),
        ));
    }

    let profile = profile(user)?;
    let token = create_token(&state.jwt_secret, profile.id, &profile.email, state.session_days)?;
    info!(user_id = %profile.id, "user signed in");

    Ok(Json(LoginResponse {
        token,
        user: profile,
    }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
) -> Result<Json<UserProfile>, ApiError> {
    let user_id = viewer.require()?.sub.to_string();

    let user = run_db(&state, move |db| db.get_user_by_id(&user_id))
        .await?
        .ok_or_else(ApiError::unauthorized)?;

    Ok(Json(profile(user)?))
}

fn profile(user: UserRow) -> Result<UserProfile, ApiError> {
    let id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt user id '{}': {e}", user.id))?;

    Ok(UserProfile {
        id,
        email: user.email,
        name: user.name,
        image: user.image,
    })
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Hex-encoded token from the thread-local CSPRNG.
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Deterministic avatar: the same email always gets the same picture.
fn avatar_url(email: &str) -> String {
    let seed = hex::encode(Md5::digest(email.to_lowercase().as_bytes()));
    format!("https://api.dicebear.com/7.x/micah/svg?seed={seed}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::{MailManager, Outbox};
    use crate::testing::{PASSWORD, TestApp};
    use axum::http::Method;
    use serde_json::json;

    #[test]
    fn tokens_are_256_bit_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn avatar_ignores_email_case() {
        assert_eq!(avatar_url("Ada@Example.com"), avatar_url("ada@example.com"));
        assert!(avatar_url("ada@example.com").starts_with("https://api.dicebear.com/7.x/micah/svg?seed="));
    }

    #[tokio::test]
    async fn register_verify_login_flow() {
        let app = TestApp::new();
        let register = json!({ "email": "Ada@Example.com", "password": PASSWORD, "name": "Ada" });

        let (status, body) = app
            .request(Method::POST, "/api/auth/register", None, Some(register))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], REGISTERED);

        let login = json!({ "email": "ada@example.com", "password": PASSWORD });
        let (status, body) = app
            .request(Method::POST, "/api/auth/login", None, Some(login.clone()))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Please verify your email before logging in");

        let token = app.last_token_for("ada@example.com");
        let verify = json!({ "token": token });
        let (status, _) = app
            .request(Method::POST, "/api/auth/verify-email", None, Some(verify.clone()))
            .await;
        assert_eq!(status, StatusCode::OK);

        // single use
        let (status, body) = app
            .request(Method::POST, "/api/auth/verify-email", None, Some(verify))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid verification token");

        let (status, body) = app
            .request(Method::POST, "/api/auth/login", None, Some(login))
            .await;
        assert_eq!(status, StatusCode::OK);
        let session = body["token"].as_str().unwrap().to_string();
        assert_eq!(body["user"]["name"], "Ada");

        let (status, body) = app
            .request(Method::GET, "/api/auth/me", Some(&session), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "ada@example.com");
        assert!(body["image"].as_str().unwrap().contains("dicebear"));
    }

    #[tokio::test]
    async fn register_validates_input() {
        let app = TestApp::new();

        let cases = [
            (json!({ "email": "ada@example.com", "password": PASSWORD }), "Missing required fields"),
            (json!({ "email": "not-an-email", "password": PASSWORD, "name": "Ada" }), "Invalid email address"),
            (
                json!({ "email": "ada@example.com", "password": "weakpass1", "name": "Ada" }),
                "Password must contain at least one uppercase letter",
            ),
        ];
        for (body, message) in cases {
            let (status, response) = app
                .request(Method::POST, "/api/auth/register", None, Some(body))
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(response["error"], message);
        }

        let (status, _) = app
            .request(Method::POST, "/api/auth/register", None, Some(json!("garbage")))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(app.outbox.messages().is_empty());
    }

    #[tokio::test]
    async fn verified_email_cannot_register_again() {
        let app = TestApp::new();
        app.signed_in("ada@example.com").await;

        let (status, body) = app
            .request(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "email": "ada@example.com", "password": PASSWORD, "name": "Eve" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Email already registered");
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let app = TestApp::new();
        app.signed_in("ada@example.com").await;

        let (status, body) = app
            .request(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": "ada@example.com", "password": "Wr0ngPassword" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], INVALID_CREDENTIALS);

        let (status, _) = app
            .request(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": "nobody@example.com", "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn forgot_password_does_not_reveal_accounts() {
        let app = TestApp::new();
        app.signed_in("ada@example.com").await;
        let sent_before = app.outbox.messages().len();

        let (status, body) = app
            .request(
                Method::POST,
                "/api/auth/forgot-password",
                None,
                Some(json!({ "email": "nobody@example.com" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], RESET_REQUESTED);
        assert_eq!(app.outbox.messages().len(), sent_before);

        let (status, body) = app
            .request(
                Method::POST,
                "/api/auth/forgot-password",
                None,
                Some(json!({ "email": "ada@example.com" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], RESET_REQUESTED);
        assert_eq!(app.outbox.messages().len(), sent_before + 1);

        let (status, _) = app
            .request(Method::POST, "/api/auth/forgot-password", None, Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn forgot_password_answers_the_same_when_mail_fails() {
        let mail = MailManager::relay("no-reply@markshare.test", "http://app.test", "http://127.0.0.1:1/send");
        let app = TestApp::with_mail(mail, Outbox::default());

        // the account row is committed before the verification mail fails
        let (status, _) = app
            .request(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "email": "ada@example.com", "password": PASSWORD, "name": "Ada" })),
            )
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(app.state.db.get_user_by_email("ada@example.com").unwrap().is_some());

        for email in ["ada@example.com", "nobody@example.com"] {
            let (status, body) = app
                .request(
                    Method::POST,
                    "/api/auth/forgot-password",
                    None,
                    Some(json!({ "email": email })),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{email}");
            assert_eq!(body["message"], RESET_REQUESTED);
        }
    }

    #[tokio::test]
    async fn reset_password_flow() {
        let app = TestApp::new();
        app.signed_in("ada@example.com").await;
        app.request(
            Method::POST,
            "/api/auth/forgot-password",
            None,
            Some(json!({ "email": "ada@example.com" })),
        )
        .await;
        let token = app.last_token_for("ada@example.com");

        // policy is checked before the token is touched
        let (status, body) = app
            .request(
                Method::POST,
                "/api/auth/reset-password",
                None,
                Some(json!({ "token": token, "password": "short" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Password must be at least 8 characters long");

        let (status, _) = app
            .request(
                Method::POST,
                "/api/auth/reset-password",
                None,
                Some(json!({ "token": token, "password": "N3wPassword" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app
            .request(
                Method::POST,
                "/api/auth/reset-password",
                None,
                Some(json!({ "token": token, "password": "N3wPassword" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid reset token");

        let (status, _) = app
            .request(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": "ada@example.com", "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .request(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": "ada@example.com", "password": "N3wPassword" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn expired_reset_token_is_reported() {
        let app = TestApp::new();
        app.signed_in("ada@example.com").await;
        let user = app.state.db.get_user_by_email("ada@example.com").unwrap().unwrap();
        app.state
            .db
            .create_password_reset(&user.id, "deadbeef", Utc::now() - Duration::minutes(5))
            .unwrap();

        let (status, body) = app
            .request(
                Method::POST,
                "/api/auth/reset-password",
                None,
                Some(json!({ "token": "deadbeef", "password": "N3wPassword" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Reset token has expired");
    }

    #[tokio::test]
    async fn me_requires_a_session() {
        let app = TestApp::new();
        let (status, _) = app.request(Method::GET, "/api/auth/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .request(Method::GET, "/api/auth/me", Some("not-a-jwt"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
