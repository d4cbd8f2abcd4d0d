use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use markshare_types::api::Claims;

use crate::AppState;
use crate::error::ApiError;

/// The session attached to a request, if any.
#[derive(Debug, Clone)]
pub struct Viewer(pub Option<Claims>);

impl Viewer {
    /// Claims of a signed-in viewer, `Unauthorized` otherwise.
    pub fn require(&self) -> Result<&Claims, ApiError> {
        self.0.as_ref().ok_or_else(ApiError::unauthorized)
    }

    pub fn user_id(&self) -> Option<String> {
        self.0.as_ref().map(|claims| claims.sub.to_string())
    }
}

/// Validates an optional `Authorization: Bearer` JWT and attaches a [`Viewer`].
///
/// A missing or invalid token yields an anonymous viewer; routes that need a
/// session reject it through [`Viewer::require`].
pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let claims = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|token| match decode_token(&state.jwt_secret, token) {
            Ok(claims) => Some(claims),
            Err(err) => {
                tracing::debug!(error = %err, "ignoring invalid session token");
                None
            }
        });

    req.extensions_mut().insert(Viewer(claims));
    next.run(req).await
}

pub fn create_token(secret: &str, user_id: Uuid, email: &str, days: i64) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp: usize::try_from((chrono::Utc::now() + chrono::Duration::days(days)).timestamp())?,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub fn decode_token(secret: &str, token: &str) -> jsonwebtoken::errors::Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_with_the_same_secret() {
        let id = Uuid::new_v4();
        let token = create_token("s3cret", id, "ada@example.com", 1).unwrap();

        let claims = decode_token("s3cret", &token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.email, "ada@example.com");

        assert!(decode_token("other", &token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = create_token("s3cret", Uuid::new_v4(), "ada@example.com", -1).unwrap();
        assert!(decode_token("s3cret", &token).is_err());
    }

    #[test]
    fn expiry_before_the_epoch_is_an_error() {
        assert!(create_token("s3cret", Uuid::new_v4(), "ada@example.com", -40_000).is_err());
    }

    #[test]
    fn anonymous_viewer_is_unauthorized() {
        let viewer = Viewer(None);
        assert!(matches!(viewer.require(), Err(ApiError::Unauthorized(_))));
        assert!(viewer.user_id().is_none());
    }
}
