use anyhow::Context;
use config::Config;
use serde::Deserialize;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct MigrationSettings {
    database: Database,
}

#[derive(Debug, Deserialize)]
struct Database {
    host: String,
    port: String,
    user: String,
    dbname: String,
}

// DATABASE_URL wins; otherwise the same config.{ENV}.yaml the service reads.
fn database_url() -> anyhow::Result<String> {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        return Ok(url);
    }
    let env = std::env::var("ENV").unwrap_or_else(|_| "local".to_string());
    let file = format!("config.{}.yaml", env);
    let settings: MigrationSettings = Config::builder()
        .add_source(config::File::with_name(&file))
        .build()
        .and_then(|c| c.try_deserialize())
        .with_context(|| format!("Failed to read database settings from {}", file))?;
    let passwd = std::env::var("DB_PASSWD").unwrap_or_default();
    let db = settings.database;
    Ok(format!(
        "postgres://{}:{}@{}:{}/{}",
        db.user, passwd, db.host, db.port, db.dbname
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url()?)
        .await?;

    let migrator = Migrator::new(Path::new("./db/migrations")).await?;
    migrator.run(&pool).await?;
    info!("Migrations applied");

    Ok(())
}
