use axum::{extract::State, http::StatusCode, response::Json};
use diesel::connection::SimpleConnection;
use serde_json::{json, Value};
use tracing::warn;

use crate::state::AppState;

/// Liveness plus a database round trip. Reports 503 while the pool cannot
/// hand out a working connection.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database = tokio::task::spawn_blocking(move || {
        let mut conn = state.pool.get().map_err(|err| err.to_string())?;
        conn.batch_execute("SELECT 1").map_err(|err| err.to_string())
    })
    .await
    .unwrap_or_else(|err| Err(err.to_string()));

    match database {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "database": "ok" })),
        ),
        Err(error) => {
            warn!(%error, "health check could not reach the database");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "database": "unavailable" })),
            )
        }
    }
}
