use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod hardware;
pub mod health;
pub mod organizations;
pub mod tickets;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return None;
                }
                match trimmed.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = %trimmed, "ignoring invalid CORS allowed origin");
                        None
                    }
                }
            })
            .collect();

        let allow_origin = AllowOrigin::list(headers);

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let ticket_routes = Router::new()
        .route("/", get(tickets::list_tickets).post(tickets::create_ticket))
        .route(
            "/generate-all-summaries",
            get(tickets::generate_all_summaries),
        )
        .route(
            "/:id",
            get(tickets::get_ticket)
                .put(tickets::update_ticket)
                .delete(tickets::delete_ticket),
        )
        .route("/:id/acknowledge", post(tickets::acknowledge_ticket))
        .route("/:id/assign", post(tickets::assign_ticket))
        .route("/:id/status", post(tickets::change_status))
        .route(
            "/:id/comments",
            get(tickets::list_comments).post(tickets::add_comment),
        )
        .route("/:id/events", get(tickets::list_events))
        .route("/:id/satisfaction", post(tickets::rate_ticket))
        .route("/:id/summary", post(tickets::summarize_ticket));

    let organization_routes = Router::new()
        .route(
            "/",
            get(organizations::list_organizations).post(organizations::create_organization),
        )
        .route("/:id/members", post(organizations::add_member))
        .route(
            "/:id/locations",
            get(organizations::list_locations).post(organizations::create_location),
        )
        .route("/:id/hardware", get(organizations::list_hardware))
        .route("/:id/procedures", post(organizations::create_procedure));

    let location_routes = Router::new()
        .route("/:id/assignments", post(organizations::assign_location))
        .route("/:id/hardware", post(organizations::create_hardware));

    let procedure_routes = Router::new()
        .route("/:id", put(organizations::update_procedure))
        .route(
            "/:id/hardware",
            put(organizations::replace_procedure_hardware),
        );

    let hardware_routes = Router::new()
        .route("/csv-template", get(hardware::csv_template))
        .route("/:id/procedures", get(hardware::list_procedures))
        .route("/:id/acknowledgments", post(hardware::acknowledge_procedures));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/tickets", ticket_routes)
        .nest("/api/organizations", organization_routes)
        .nest("/api/locations", location_routes)
        .nest("/api/procedures", procedure_routes)
        .nest("/api/hardware", hardware_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024))
}
