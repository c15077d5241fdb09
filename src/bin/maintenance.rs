use std::env;

use anyhow::{bail, Context, Result};
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use supportdesk::{
    access::AdminTier,
    auth::{jwt::JwtService, password::hash_password},
    config::AppConfig,
    db,
    effects::Collaborators,
    lifecycle::generate_all_summaries,
    models::NewPrincipal,
    schema::principals,
    state::AppState,
};

const USAGE: &str = "Usage:
  maintenance migrate
  maintenance create-principal <email> <display-name> <password> [super_admin|technician|read_only]
  maintenance hash-password <password>
  maintenance generate-summaries";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("migrate") => migrate()?,
        Some("create-principal") => create_principal(&args[1..])?,
        Some("hash-password") => {
            let password = args.get(1).context(USAGE)?;
            println!("{}", hash_password(password)?);
        }
        Some("generate-summaries") => generate_summaries().await?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn load_config() -> Result<AppConfig> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );
    Ok(config)
}

fn migrate() -> Result<()> {
    let config = load_config()?;
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let applied = db::run_migrations(&mut conn)?;
    println!("Applied {applied} migration(s).");
    Ok(())
}

fn create_principal(args: &[String]) -> Result<()> {
    let [email, display_name, password, rest @ ..] = args else {
        bail!("{USAGE}");
    };
    let admin_tier = match rest.first() {
        Some(raw) => Some(
            AdminTier::parse(raw).with_context(|| format!("unknown admin tier: {raw}"))?,
        ),
        None => None,
    };

    let config = load_config()?;
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let principal = NewPrincipal {
        id: Uuid::new_v4(),
        email: email.trim().to_lowercase(),
        display_name: display_name.trim().to_string(),
        password_hash: hash_password(password)?,
        is_platform_admin: admin_tier.is_some(),
        admin_tier: admin_tier.map(|tier| tier.as_str().to_string()),
    };

    diesel::insert_into(principals::table)
        .values(&principal)
        .execute(&mut conn)
        .context("failed to insert principal")?;

    tracing::info!(
        target: "access",
        principal_id = %principal.id,
        email = %principal.email,
        admin_tier = ?principal.admin_tier,
        "principal created from maintenance command"
    );
    println!("{}", principal.id);
    Ok(())
}

async fn generate_summaries() -> Result<()> {
    let config = load_config()?;
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let jwt = JwtService::from_config(&config)?;
    let collaborators = Collaborators::from_config(&config)?;
    let state = AppState::new(pool, config, jwt, collaborators);

    let report = generate_all_summaries(&state).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
