use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::claims::TokenKind;
use crate::auth::jwt::JwtKeys;
use crate::auth::password::verify_password;
use crate::auth::repo_types::{RefreshSession, User};
use crate::error::AuthError;
use crate::state::AppState;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

// Verified against when the email is unknown, so unknown-email and
// wrong-password share a timing shape. Precomputed with the same Argon2id
// parameters `hash_password` uses, so the compare can never panic and costs
// the same as a real one.
const PHANTOM_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$VE0e3g7DalWHgDwou3nuRA$uC6TER156UQpk0lNQ5+jHM0l5poVjPA1he8TZbuGcKA";

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Tokens handed out by a successful login.
#[derive(Debug)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// Verify credentials and open a session. The session row is persisted
/// best-effort: a down session store degrades refresh, it must not lock
/// users out of login.
pub async fn login(state: &AppState, email: &str, password: &str) -> Result<IssuedTokens, AuthError> {
    let keys = JwtKeys::from_ref(state);
    let user = User::find_by_email(&state.db, email).await?;

    let password_ok = match &user {
        Some(user) => verify_password(password, &user.password_hash),
        None => {
            verify_password(password, PHANTOM_HASH);
            false
        }
    };
    let Some(user) = user else {
        return Err(AuthError::InvalidCredentials);
    };
    if !password_ok {
        return Err(AuthError::InvalidCredentials);
    }
    // Only checked after the credential is confirmed, so the active flag
    // is never observable for an unauthenticated caller.
    if !user.is_active {
        return Err(AuthError::AccountInactive);
    }

    let access_token = keys.sign_access(user.id)?;
    let refresh_token = keys.sign_refresh(user.id)?;

    let expires_at =
        OffsetDateTime::now_utc() + TimeDuration::seconds(keys.refresh_ttl.as_secs() as i64);
    if let Err(e) = RefreshSession::insert(&state.db, user.id, &refresh_token, expires_at).await {
        warn!(error = %e, user_id = %user.id, "failed to store refresh session, continuing");
    }

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(IssuedTokens {
        access_token,
        refresh_token,
        expires_in: keys.access_ttl_seconds(),
    })
}

/// Exchange a live refresh token for a new access token. Refresh tokens are
/// not rotated; the presented token stays valid until revoked or expired.
pub async fn refresh(state: &AppState, refresh_token: &str) -> Result<(String, i64), AuthError> {
    let keys = JwtKeys::from_ref(state);
    let claims = keys
        .verify(refresh_token)
        .map_err(|e| {
            debug!(error = %e, "refresh token failed verification");
            AuthError::InvalidToken
        })?;
    if claims.kind != TokenKind::Refresh {
        return Err(AuthError::InvalidToken);
    }

    // One lookup covers unknown, revoked and expired sessions; the caller
    // cannot tell which it was.
    let session = RefreshSession::find_active(&state.db, refresh_token, claims.sub)
        .await?
        .ok_or(AuthError::InvalidToken)?;

    let user = User::find_by_id(&state.db, session.user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or(AuthError::AccountInactive)?;

    let access_token = keys.sign_access(user.id)?;
    debug!(user_id = %user.id, "access token refreshed");
    Ok((access_token, keys.access_ttl_seconds()))
}

/// Revoke the caller's session for the given token. Best-effort and
/// idempotent; a missing or already-revoked token is not an error, and a
/// store fault is swallowed.
pub async fn logout(state: &AppState, user_id: Uuid, refresh_token: &str) {
    match RefreshSession::revoke(&state.db, refresh_token, user_id).await {
        Ok(revoked) => info!(user_id = %user_id, revoked, "user logged out"),
        Err(e) => warn!(error = %e, user_id = %user_id, "logout revoke failed, reporting success"),
    }
}

/// Revoke every active session for the caller. Unlike logout this is a
/// security-sensitive bulk action, so a store fault surfaces.
pub async fn revoke_all(state: &AppState, user_id: Uuid) -> Result<u64, AuthError> {
    let revoked = RefreshSession::revoke_all_for_user(&state.db, user_id).await?;
    info!(user_id = %user_id, revoked, "all refresh tokens revoked");
    Ok(revoked)
}

/// Role check on an already-authenticated user. Membership only; role
/// hierarchy is not modelled.
pub fn require_role(user: &User, allowed: &[&str]) -> Result<(), AuthError> {
    if allowed.iter().any(|role| *role == user.role) {
        Ok(())
    } else {
        warn!(user_id = %user.id, role = %user.role, "role check failed");
        Err(AuthError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn make_user(role: &str) -> User {
        User {
            id: Uuid::new_v4(),
            email: "a@x.com".into(),
            password_hash: "hash".into(),
            is_active: true,
            role: role.into(),
            first_name: None,
            last_name: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn require_role_accepts_member() {
        let admin = make_user("admin");
        assert!(require_role(&admin, &["admin"]).is_ok());
        assert!(require_role(&admin, &["admin", "moderator"]).is_ok());
    }

    #[test]
    fn require_role_rejects_non_member_with_forbidden() {
        let user = make_user("user");
        let err = require_role(&user, &["admin"]).unwrap_err();
        assert!(matches!(err, AuthError::Forbidden));
    }

    #[test]
    fn phantom_hash_is_a_valid_digest() {
        // A digest that failed to parse would short-circuit the compare and
        // reopen the timing oracle.
        assert!(argon2::password_hash::PasswordHash::new(PHANTOM_HASH).is_ok());
    }

    #[test]
    fn phantom_hash_rejects_any_password() {
        assert!(!verify_password("password1", PHANTOM_HASH));
        assert!(!verify_password("", PHANTOM_HASH));
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("first.last@sub.example.org"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a @x.com"));
        assert!(!is_valid_email("a@x"));
    }
}
