use anyhow::Context;
use clap::Parser;
use clap_derive::Parser;
use common::snowflake::configure_generator;
use configs::settings::SETTINGS;
use job::start_jobs;
use route::router;
use state::new_application_state;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

mod batch;
mod client;
mod common;
mod configs;
mod domain;
mod idempotency;
mod job;
mod ledger;
mod outbox;
mod repository;
mod route;
mod scheduled;
mod service;
mod state;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// server, worker or drain_once
    #[arg(short, long, default_value = "server")]
    mode: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let settings = &*SETTINGS;
    settings.validate()?;
    configure_generator(settings.node.machine_id, settings.node.node_id);

    match args.mode.as_str() {
        "server" => {
            let state = new_application_state(settings).await?;
            let mut sched = start_jobs(&state, settings).await?;

            let router = router(state)
                .layer(CompressionLayer::new())
                .layer(TraceLayer::new_for_http());
            let listener = TcpListener::bind(&settings.server.listen_addr)
                .await
                .with_context(|| format!("Failed to bind {}", settings.server.listen_addr))?;
            info!("Server running on: {}", listener.local_addr()?);
            axum::serve(listener, router.into_make_service()).await?;
            sched.shutdown().await?;
        }
        "worker" => {
            let state = new_application_state(settings).await?;
            let mut sched = start_jobs(&state, settings).await?;
            info!("Worker running, waiting for ctrl-c");
            tokio::signal::ctrl_c().await?;
            sched.shutdown().await?;
        }
        "drain_once" => {
            let state = new_application_state(settings).await?;
            let drained = state.publisher.drain_once().await?;
            let ticked = state.scheduler.tick().await?;
            info!(
                "Drained outbox: {:?}, scheduled tick: {:?}",
                drained, ticked
            );
        }
        other => anyhow::bail!("unknown mode: {}", other),
    }

    Ok(())
}
