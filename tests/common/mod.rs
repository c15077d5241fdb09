use std::collections::HashSet;
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use supportdesk::auth::jwt::JwtService;
use supportdesk::auth::password::hash_password;
use supportdesk::config::AppConfig;
use supportdesk::db::{self, PgPool};
use supportdesk::effects::{
    Collaborators, EmailDispatcher, Notification, NotificationSink, OutgoingEmail,
    SummaryGenerator, TicketDigest,
};
use supportdesk::models::{
    Job, NewHardware, NewLocation, NewLocationAssignment, NewMembership, NewOrganization,
    NewPrincipal, NewProcedure, NewProcedureHardware, Ticket, TicketEvent,
};
use supportdesk::routes;
use supportdesk::schema;
use supportdesk::state::AppState;
use supportdesk::{default_handlers, Worker};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const PASSWORD: &str = "s3cret-passw0rd";

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}

impl RecordingNotifier {
    #[allow(dead_code)]
    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl EmailDispatcher for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        self.sent.lock().await.push(email.clone());
        Ok(())
    }
}

impl RecordingMailer {
    #[allow(dead_code)]
    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().await.clone()
    }
}

/// Produces a predictable summary and fails for tickets registered as failing.
#[derive(Default)]
pub struct FakeSummarizer {
    failing: Mutex<HashSet<Uuid>>,
    calls: AtomicUsize,
}

#[async_trait]
impl SummaryGenerator for FakeSummarizer {
    async fn summarize(&self, digest: &TicketDigest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().await.contains(&digest.ticket_id) {
            bail!("generator unavailable for {}", digest.ticket_number);
        }
        Ok(format!("Summary of {}: {}", digest.ticket_number, digest.title))
    }
}

impl FakeSummarizer {
    #[allow(dead_code)]
    pub async fn fail_for(&self, ticket_id: Uuid) {
        self.failing.lock().await.insert(ticket_id);
    }

    #[allow(dead_code)]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    notifier: Arc<RecordingNotifier>,
    mailer: Arc<RecordingMailer>,
    summarizer: Arc<FakeSummarizer>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            refresh_token_expiry_days: 30,
            refresh_cookie_secure: false,
            refresh_cookie_domain: None,
            cors_allowed_origin: None,
            summary_endpoint: None,
            summary_api_key: None,
            summary_timeout_seconds: 5,
            summary_concurrency: 3,
            notification_webhook_url: None,
            email_webhook_url: None,
            email_from: "support@test.local".to_string(),
            procedure_ack_validity_minutes: 120,
            procedure_scroll_threshold_px: 10,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let notifier = Arc::new(RecordingNotifier::default());
        let mailer = Arc::new(RecordingMailer::default());
        let summarizer = Arc::new(FakeSummarizer::default());
        let collaborators = Collaborators {
            notifier: notifier.clone(),
            summarizer: summarizer.clone(),
            mailer: mailer.clone(),
        };

        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool.clone(), config, jwt, collaborators);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            notifier,
            mailer,
            summarizer,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn notifier(&self) -> Arc<RecordingNotifier> {
        self.notifier.clone()
    }

    #[allow(dead_code)]
    pub fn mailer(&self) -> Arc<RecordingMailer> {
        self.mailer.clone()
    }

    #[allow(dead_code)]
    pub fn summarizer(&self) -> Arc<FakeSummarizer> {
        self.summarizer.clone()
    }

    /// Runs the job worker until the queue has nothing ready.
    #[allow(dead_code)]
    pub async fn run_jobs(&self) -> Result<usize> {
        let worker = Worker::new(
            Arc::new(self.state.clone()),
            default_handlers(),
            Duration::from_millis(10),
        );
        worker.drain().await.map_err(|err| anyhow!("worker failed: {err}"))
    }

    pub async fn insert_principal(&self, email: &str, admin_tier: Option<&str>) -> Result<Uuid> {
        let email = email.to_string();
        let admin_tier = admin_tier.map(str::to_string);
        self.with_conn(move |conn| {
            let principal = NewPrincipal {
                id: Uuid::new_v4(),
                display_name: email.split('@').next().unwrap_or("user").to_string(),
                email,
                password_hash: hash_password(PASSWORD)?,
                is_platform_admin: admin_tier.is_some(),
                admin_tier,
            };
            diesel::insert_into(schema::principals::table)
                .values(&principal)
                .execute(conn)
                .context("failed to insert principal")?;
            Ok(principal.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_organization(&self, name: &str, prefix: &str) -> Result<Uuid> {
        let name = name.to_string();
        let prefix = prefix.to_string();
        self.with_conn(move |conn| {
            let org = NewOrganization {
                id: Uuid::new_v4(),
                name,
                ticket_prefix: prefix,
                contact_email: None,
            };
            diesel::insert_into(schema::organizations::table)
                .values(&org)
                .execute(conn)
                .context("failed to insert organization")?;
            Ok(org.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn add_membership(&self, principal_id: Uuid, org_id: Uuid, role: &str) -> Result<()> {
        let role = role.to_string();
        self.with_conn(move |conn| {
            diesel::insert_into(schema::memberships::table)
                .values(&NewMembership {
                    principal_id,
                    organization_id: org_id,
                    role,
                })
                .execute(conn)
                .context("failed to insert membership")?;
            Ok(())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_location(&self, org_id: Uuid, name: &str) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let location = NewLocation {
                id: Uuid::new_v4(),
                organization_id: org_id,
                name,
                address: None,
            };
            diesel::insert_into(schema::locations::table)
                .values(&location)
                .execute(conn)
                .context("failed to insert location")?;
            Ok(location.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn assign_location(&self, principal_id: Uuid, location_id: Uuid) -> Result<()> {
        self.with_conn(move |conn| {
            diesel::insert_into(schema::location_assignments::table)
                .values(&NewLocationAssignment {
                    principal_id,
                    location_id,
                })
                .execute(conn)
                .context("failed to insert location assignment")?;
            Ok(())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_hardware(&self, location_id: Uuid, name: &str) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let item = NewHardware {
                id: Uuid::new_v4(),
                location_id,
                name,
                hardware_type: None,
                manufacturer: None,
                model_number: None,
                serial_number: None,
                status: "active".to_string(),
                installation_date: None,
                warranty_expiration: None,
                internal_notes: None,
            };
            diesel::insert_into(schema::hardware::table)
                .values(&item)
                .execute(conn)
                .context("failed to insert hardware")?;
            Ok(item.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_procedure(&self, org_id: Uuid, title: &str, hardware_id: Uuid) -> Result<Uuid> {
        let title = title.to_string();
        self.with_conn(move |conn| {
            let procedure = NewProcedure {
                id: Uuid::new_v4(),
                organization_id: org_id,
                title,
                body: "Disconnect power before opening the service panel.".to_string(),
            };
            diesel::insert_into(schema::procedures::table)
                .values(&procedure)
                .execute(conn)
                .context("failed to insert procedure")?;
            diesel::insert_into(schema::procedure_hardware::table)
                .values(&NewProcedureHardware {
                    procedure_id: procedure.id,
                    hardware_id,
                })
                .execute(conn)
                .context("failed to link procedure")?;
            Ok(procedure.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn set_summary(&self, ticket_id: Uuid, summary: &str) -> Result<()> {
        let summary = summary.to_string();
        self.with_conn(move |conn| {
            use schema::tickets::dsl;
            diesel::update(dsl::tickets.find(ticket_id))
                .set(dsl::closed_summary.eq(Some(summary)))
                .execute(conn)
                .context("failed to set summary")?;
            Ok(())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn load_ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>> {
        self.with_conn(move |conn| {
            schema::tickets::table
                .find(ticket_id)
                .first::<Ticket>(conn)
                .optional()
                .context("failed to load ticket")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn load_events(&self, ticket_id: Uuid) -> Result<Vec<TicketEvent>> {
        self.with_conn(move |conn| {
            use schema::ticket_events::dsl;
            dsl::ticket_events
                .filter(dsl::ticket_id.eq(ticket_id))
                .order(dsl::created_at.asc())
                .load::<TicketEvent>(conn)
                .context("failed to load events")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn jobs_by_type(&self, ty: &str) -> Result<Vec<Job>> {
        let ty = ty.to_string();
        self.with_conn(move |conn| {
            use schema::jobs::dsl::{job_type as job_type_col, jobs as jobs_table};
            let rows = jobs_table
                .filter(job_type_col.eq(&ty))
                .load::<Job>(conn)
                .context("failed to load jobs")?;
            Ok(rows)
        })
        .await
    }

    pub async fn login_token(&self, email: &str) -> Result<String> {
        let response = self
            .post_json(
                "/api/auth/login",
                &json!({ "email": email, "password": PASSWORD }),
                None,
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_to_vec(response.into_body()).await?;
        #[derive(serde::Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = serde_json::from_slice(&body)?;
        Ok(parsed.access_token)
    }

    /// Creates a ticket through the API and returns its JSON representation.
    #[allow(dead_code)]
    pub async fn create_ticket(&self, token: &str, location_id: Uuid, title: &str) -> Result<Value> {
        let response = self
            .post_json(
                "/api/tickets",
                &json!({
                    "location_id": location_id,
                    "title": title,
                    "description": "The unit stopped working this morning.",
                    "priority": "high",
                }),
                Some(token),
            )
            .await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "ticket creation failed with status {}",
            response.status()
        );
        read_json(response).await
    }

    /// Moves a ticket to `status` through the API.
    #[allow(dead_code)]
    pub async fn set_status(&self, token: &str, ticket_id: Uuid, status: &str) -> Result<StatusCode> {
        let response = self
            .post_json(
                &format!("/api/tickets/{ticket_id}/status"),
                &json!({ "status": status }),
                Some(token),
            )
            .await?;
        Ok(response.status())
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    /// Sends an empty POST carrying `cookie` verbatim, plus an optional bearer token.
    #[allow(dead_code)]
    pub async fn post_with_cookie(
        &self,
        path: &str,
        cookie: &str,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("cookie", cookie);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn read_json<T: DeserializeOwned>(response: hyper::Response<Body>) -> Result<T> {
    let body = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&body).context("response body is not the expected JSON")
}

#[allow(dead_code)]
pub fn id_of(value: &Value) -> Result<Uuid> {
    let raw = value
        .get("id")
        .and_then(Value::as_str)
        .context("missing id field")?;
    Ok(raw.parse()?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        db::run_migrations(&mut conn)?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE ticket_comments, ticket_events, tickets, procedure_acknowledgments, \
         procedure_hardware, procedures, hardware, location_assignments, locations, \
         memberships, organizations, refresh_tokens, jobs, principals RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
