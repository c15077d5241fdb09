use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    access::{AccessScope, ScopeSummary},
    auth::{password, AuthenticatedUser},
    error::{AppError, AppResult},
    models::{NewRefreshToken, Principal, RefreshToken},
    schema::{principals, refresh_tokens},
    state::AppState,
};

const REFRESH_COOKIE_NAME: &str = "refresh_token";

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub is_platform_admin: bool,
    pub scope: ScopeSummary,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let mut conn = state.db()?;

    let principal: Principal = principals::table
        .filter(principals::email.eq(payload.email.trim().to_lowercase()))
        .filter(principals::disabled_at.is_null())
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    let valid = password::verify_password(&payload.password, &principal.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        warn!(target: "access", principal_id = %principal.id, "rejected login with invalid password");
        return Err(AppError::unauthorized());
    }

    info!(target: "access", principal_id = %principal.id, "principal signed in");
    issue_session(&state, &mut conn, &principal)
}

/// Rotates the refresh token carried in the cookie: the presented token is
/// revoked and a fresh pair is issued.
pub async fn refresh(
    State(state): State<AppState>,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let TypedHeader(cookies) = jar.ok_or_else(AppError::unauthorized)?;
    let presented = cookies
        .get(REFRESH_COOKIE_NAME)
        .ok_or_else(AppError::unauthorized)?;

    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    let principal = conn.transaction::<Principal, AppError, _>(|conn| {
        let token: RefreshToken = refresh_tokens::table
            .filter(refresh_tokens::token_hash.eq(hash_refresh_token(presented)))
            .filter(refresh_tokens::revoked_at.is_null())
            .filter(refresh_tokens::expires_at.gt(now))
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(AppError::unauthorized)?;

        diesel::update(refresh_tokens::table.find(token.id))
            .set((
                refresh_tokens::revoked_at.eq(now),
                refresh_tokens::updated_at.eq(now),
            ))
            .execute(conn)?;

        principals::table
            .find(token.principal_id)
            .filter(principals::disabled_at.is_null())
            .first(conn)
            .optional()?
            .ok_or_else(AppError::unauthorized)
    })?;

    issue_session(&state, &mut conn, &principal)
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, StatusCode)> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let active = refresh_tokens::table
        .filter(refresh_tokens::principal_id.eq(user.principal_id))
        .filter(refresh_tokens::revoked_at.is_null());

    // Revoke only the presented session when we can tell which one it is.
    let presented = jar
        .as_ref()
        .and_then(|TypedHeader(cookies)| cookies.get(REFRESH_COOKIE_NAME))
        .map(hash_refresh_token);
    let revoked = match presented {
        Some(hash) => diesel::update(active.filter(refresh_tokens::token_hash.eq(hash)))
            .set((
                refresh_tokens::revoked_at.eq(now),
                refresh_tokens::updated_at.eq(now),
            ))
            .execute(&mut conn)?,
        None => 0,
    };
    if revoked == 0 {
        diesel::update(active)
            .set((
                refresh_tokens::revoked_at.eq(now),
                refresh_tokens::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
    }

    info!(target: "access", principal_id = %user.principal_id, "principal signed out");

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, refresh_cookie(&state, "", None)?);
    Ok((headers, StatusCode::NO_CONTENT))
}

pub async fn me(State(state): State<AppState>, scope: AccessScope) -> AppResult<Json<MeResponse>> {
    let mut conn = state.db()?;
    let principal: Principal = principals::table
        .find(scope.principal_id())
        .first(&mut conn)?;

    Ok(Json(MeResponse {
        id: principal.id,
        email: principal.email,
        display_name: principal.display_name,
        is_platform_admin: principal.is_platform_admin,
        scope: scope.summary(),
    }))
}

fn issue_session(
    state: &AppState,
    conn: &mut PgConnection,
    principal: &Principal,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let access_token = state.jwt.issue_access_token(principal)?;

    let now = Utc::now();
    let refresh_value = generate_refresh_token();
    let expires_at = now + ChronoDuration::days(state.config.refresh_token_expiry_days);

    diesel::insert_into(refresh_tokens::table)
        .values(&NewRefreshToken {
            id: Uuid::new_v4(),
            principal_id: principal.id,
            token_hash: hash_refresh_token(&refresh_value),
            issued_at: now.naive_utc(),
            expires_at: expires_at.naive_utc(),
        })
        .execute(conn)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        refresh_cookie(state, &refresh_value, Some(expires_at))?,
    );

    Ok((
        headers,
        Json(LoginResponse {
            access_token,
            token_type: "Bearer",
            expires_in: state.jwt.expires_in_seconds(),
        }),
    ))
}

fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Builds the refresh cookie. Without an expiry the cookie clears the session.
fn refresh_cookie(
    state: &AppState,
    value: &str,
    expires_at: Option<DateTime<Utc>>,
) -> AppResult<HeaderValue> {
    let mut parts = vec![
        format!("{REFRESH_COOKIE_NAME}={value}"),
        "Path=/api/auth".to_string(),
        "HttpOnly".to_string(),
        "SameSite=Strict".to_string(),
    ];
    match expires_at {
        Some(expires_at) => {
            let max_age =
                ChronoDuration::days(state.config.refresh_token_expiry_days).num_seconds();
            parts.push(format!("Max-Age={max_age}"));
            parts.push(format!("Expires={}", expires_at.to_rfc2822()));
        }
        None => {
            parts.push("Max-Age=0".to_string());
            parts.push("Expires=Thu, 01 Jan 1970 00:00:00 GMT".to_string());
        }
    }
    if state.config.refresh_cookie_secure {
        parts.push("Secure".to_string());
    }
    if let Some(domain) = &state.config.refresh_cookie_domain {
        parts.push(format!("Domain={domain}"));
    }

    HeaderValue::from_str(&parts.join("; "))
        .map_err(|err| AppError::internal(format!("invalid refresh cookie: {err}")))
}
