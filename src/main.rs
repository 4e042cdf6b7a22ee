mod api;
mod config;
mod database;
mod logging;
mod scheduler;
mod sync;
#[cfg(test)]
mod test_support;
mod util;

use tracing::info;

use crate::database::database_access;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

#[tokio::main]
async fn main() -> Result<(), Error> {
    if std::env::var("RUST_BACKTRACE").is_err() {
        std::env::set_var("RUST_BACKTRACE", "1");
    }

    let cfg = config::load_config()?;

    logging::init(&cfg.log)?;
    info!("Logging Initialised. Initialising oowsync");

    let pool = database_access::init_database(&cfg.database_path).await?;
    database_access::log_store_summary(&pool).await?;

    let scheduler = scheduler::spawn_scheduler(&cfg, &pool)?;

    info!("Setup complete. Waiting for scheduled runs, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    pool.close().await;

    info!("oowsync stopped");
    Ok(())
}
