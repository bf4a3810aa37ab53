use std::sync::Arc;

use anyhow::{Context, Result};
use dotenv::dotenv;
use tracing::{error, info, warn};

use greencredit::auth::bootstrap_admin;
use greencredit::config::Settings;
use greencredit::ledger::{AlloyLedger, CreditLedger, MemoryLedger};
use greencredit::scoring::{EsgScorer, HttpScorer};
use greencredit::users::{MemoryUserStore, MongoUserStore, UserStore};
use greencredit::{api, logging, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let settings = Settings::from_env().context("Invalid configuration")?;
    let _log_guard = logging::init(settings.log_dir.as_deref());

    info!("GreenCredit backend starting");

    let users: Arc<dyn UserStore> = match &settings.mongodb_uri {
        Some(uri) => Arc::new(
            MongoUserStore::connect(uri, &settings.mongodb_database)
                .await
                .context("Failed to connect to MongoDB")?,
        ),
        None => {
            warn!("MONGODB_URI not set, users are kept in memory");
            Arc::new(MemoryUserStore::new())
        }
    };
    bootstrap_admin(users.as_ref(), &settings.admin).await?;

    let ledger: Arc<dyn CreditLedger> = if settings.chain.contract_address.is_some() {
        Arc::new(AlloyLedger::connect(&settings.chain)?)
    } else {
        warn!("CONTRACT_ADDRESS not set, using an in-memory ledger");
        let account = settings.chain.account.or(settings.admin.wallet).unwrap_or_default();
        Arc::new(MemoryLedger::new(account))
    };
    match ledger.record_count().await {
        Ok(count) => info!("Contract reachable, {} record(s)", count),
        Err(e) => error!("Contract not reachable yet: {:#}", e),
    }

    let scorer: Arc<dyn EsgScorer> = Arc::new(HttpScorer::new(&settings.ai_service_url)?);
    info!("Scoring service at {}", settings.ai_service_url);

    let addr = settings.bind_addr;
    let state = AppState::new(settings, users, ledger, scorer);
    api::serve(state, addr, shutdown_signal()).await?;

    info!("GreenCredit backend stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        futures::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
