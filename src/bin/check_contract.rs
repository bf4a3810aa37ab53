//! Prints the deployed contract's token metadata and first record.

use anyhow::{Context, Result};
use dotenv::dotenv;
use tracing::info;

use greencredit::config::Settings;
use greencredit::ledger::{AlloyLedger, CreditLedger};
use greencredit::logging;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let settings = Settings::from_env().context("Invalid configuration")?;
    let _log_guard = logging::init(None);

    let ledger = AlloyLedger::connect(&settings.chain)?;
    info!("Checking contract {} via {}", ledger.contract_address(), settings.chain.rpc_url);

    let token = ledger.token_info().await?;
    info!("Name: {}", token.name);
    info!("Symbol: {}", token.symbol);
    info!("Decimals: {}", token.decimals);
    info!("Owner: {}", token.owner);
    info!("Total supply: {}", token.total_supply);
    if let Some(account) = ledger.service_account() {
        info!("Service account: {} (owner: {})", account, account == token.owner);
    }

    let count = ledger.record_count().await?;
    info!("Record count: {}", count);
    if count > 0 {
        let first = ledger.record(0).await?;
        info!("First record: {:#?}", first);
    }
    Ok(())
}
