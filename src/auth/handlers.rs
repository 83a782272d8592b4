use std::sync::Arc;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum::extract::State;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{LoginRequest, MessageResponse, RefreshRequest, SignupRequest, TokenResponse, UserOut},
        extractors::CurrentUser,
        password::hash_password,
        repo::is_unique_violation,
        repo_types::User,
        services::{self, is_valid_email},
    },
    error::AuthError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    // 5 logins per minute per peer IP: one permit back every 12 seconds.
    let login_limiter = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(12)
            .burst_size(5)
            .finish()
            .unwrap(),
    );
    let login_route = Router::new()
        .route("/auth/login", post(login))
        .route_layer(GovernorLayer {
            config: login_limiter,
        });

    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/refresh", post(refresh))
        .route("/auth/me", get(me))
        .route("/auth/logout", post(logout))
        .route("/auth/revoke-all-tokens", post(revoke_all_tokens))
        .merge(login_route)
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<UserOut>), AuthError> {
    if !is_valid_email(&payload.email) {
        warn!("signup with invalid email shape");
        return Err(AuthError::Validation("Invalid email".into()));
    }
    if payload.password.len() < 8 {
        warn!("signup password too short");
        return Err(AuthError::Validation("Password too short".into()));
    }

    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "signup email already registered");
        return Err(AuthError::Validation("Email already registered".into()));
    }

    let password_hash = hash_password(&payload.password)?;
    let user = match User::create(
        &state.db,
        &payload.email,
        &password_hash,
        payload.first_name.as_deref(),
        payload.last_name.as_deref(),
    )
    .await
    {
        Ok(user) => user,
        // A concurrent signup can slip past the pre-check; the unique
        // constraint reports it, and it is still a duplicate, not a fault.
        Err(e) if is_unique_violation(&e) => {
            warn!(email = %payload.email, "signup email already registered");
            return Err(AuthError::Validation("Email already registered".into()));
        }
        Err(e) => {
            error!(error = %e, "failed to create user");
            return Err(AuthError::StoreFault(e));
        }
    };

    info!(user_id = %user.id, email = %user.email, "new user registered");
    Ok((StatusCode::CREATED, Json(UserOut::from(user))))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    let issued = services::login(&state, &payload.username, &payload.password)
        .await
        .map_err(|e| {
            warn!(error = %e, "login failed");
            e
        })?;
    Ok(Json(TokenResponse {
        access_token: issued.access_token,
        token_type: "bearer".into(),
        refresh_token: Some(issued.refresh_token),
        expires_in: issued.expires_in,
    }))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    // Every failure collapses into 401 here; the typed reason stays in the
    // logs only.
    let (access_token, expires_in) = services::refresh(&state, &payload.refresh_token)
        .await
        .map_err(|e| {
            warn!(error = %e, "token refresh failed");
            AuthError::InvalidToken
        })?;
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".into(),
        refresh_token: None,
        expires_in,
    }))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn me(CurrentUser(user): CurrentUser) -> Json<UserOut> {
    Json(UserOut::from(user))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn logout(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Json<MessageResponse> {
    services::logout(&state, user.id, &payload.refresh_token).await;
    Json(MessageResponse::ok("Successfully logged out"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn revoke_all_tokens(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<MessageResponse>, AuthError> {
    services::revoke_all(&state, user.id).await.map_err(|e| {
        error!(error = %e, "revoke-all failed");
        e
    })?;
    Ok(Json(MessageResponse::ok("All tokens revoked successfully")))
}
