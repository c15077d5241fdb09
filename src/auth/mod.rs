pub mod jwt;
pub mod password;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use tracing::debug;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

/// A caller whose bearer token verified. Says nothing about what the caller
/// may reach; see [`crate::access::AccessScope`] for that.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub principal_id: Uuid,
    pub email: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state.jwt.verify_token(bearer.token()).map_err(|err| {
            debug!(error = %err, "rejected bearer token");
            AppError::unauthorized()
        })?;

        Ok(AuthenticatedUser {
            principal_id: claims.sub,
            email: claims.email,
        })
    }
}
