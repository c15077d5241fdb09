use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    db::PgPool,
    effects::{Collaborators, EmailDispatcher, NotificationSink, SummaryGenerator},
    error::{AppError, AppResult},
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub jwt: JwtService,
    pub notifier: Arc<dyn NotificationSink>,
    pub summarizer: Arc<dyn SummaryGenerator>,
    pub mailer: Arc<dyn EmailDispatcher>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        jwt: JwtService,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            jwt,
            notifier: collaborators.notifier,
            summarizer: collaborators.summarizer,
            mailer: collaborators.mailer,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }

    pub fn acknowledgment_validity(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.config.procedure_ack_validity_minutes.max(0))
    }
}
