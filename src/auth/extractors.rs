use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use crate::auth::claims::TokenKind;
use crate::auth::jwt::JwtKeys;
use crate::auth::repo_types::User;
use crate::error::AuthError;
use crate::state::AppState;

/// Resolves the bearer access token into a loaded, active user. Identity is
/// established here; role checks compose on top via
/// [`crate::auth::services::require_role`].
#[derive(Debug)]
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(AuthError::Unauthenticated)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .or_else(|| auth_header.strip_prefix("bearer "))
            .ok_or(AuthError::Unauthenticated)?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify(token).map_err(|e| {
            warn!(error = %e, "bearer token failed verification");
            AuthError::InvalidToken
        })?;

        // A refresh token is not a request credential.
        if claims.kind != TokenKind::Access {
            return Err(AuthError::InvalidToken);
        }

        let user = User::find_by_id(&state.db, claims.sub)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !user.is_active {
            return Err(AuthError::AccountInactive);
        }

        Ok(CurrentUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::AUTHORIZATION, Request};
    use uuid::Uuid;

    async fn extract(state: &AppState, auth_header: Option<&str>) -> Result<CurrentUser, AuthError> {
        let mut builder = Request::builder().uri("/auth/me");
        if let Some(value) = auth_header {
            builder = builder.header(AUTHORIZATION, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        CurrentUser::from_request_parts(&mut parts, state).await
    }

    #[tokio::test]
    async fn missing_header_is_unauthenticated() {
        let state = AppState::fake();
        let err = extract(&state, None).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn non_bearer_scheme_is_unauthenticated() {
        let state = AppState::fake();
        let err = extract(&state, Some("Basic dXNlcjpwYXNz")).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn garbage_token_is_invalid() {
        let state = AppState::fake();
        let err = extract(&state, Some("Bearer not-a-jwt")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn refresh_token_is_not_a_request_credential() {
        let state = AppState::fake();
        let keys = JwtKeys::from_ref(&state);
        let token = keys.sign_refresh(Uuid::new_v4()).expect("sign refresh");
        let err = extract(&state, Some(&format!("Bearer {token}")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }
}
