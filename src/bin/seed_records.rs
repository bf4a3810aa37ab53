//! Submits a fixed set of sample credit records to a running backend.
//!
//! `API_BASE` (default `http://localhost:3001`) selects the server; the
//! admin credentials come from the same variables the server reads.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use dotenv::dotenv;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use greencredit::config::Settings;
use greencredit::lending::group_thousands;
use greencredit::logging;

struct Sample {
    esg_score: u64,
    credit_amount: u64,
    project_description: &'static str,
    loan_amount: u64,
}

const SAMPLES: &[Sample] = &[
    Sample {
        esg_score: 85,
        credit_amount: 1_000_000_000,
        project_description: "Solar Energy Project - Phase 1",
        loan_amount: 500_000_000,
    },
    Sample {
        esg_score: 92,
        credit_amount: 2_000_000_000,
        project_description: "Wind Power Installation",
        loan_amount: 1_000_000_000,
    },
    Sample {
        esg_score: 78,
        credit_amount: 800_000_000,
        project_description: "Waste Management System",
        loan_amount: 400_000_000,
    },
    Sample {
        esg_score: 88,
        credit_amount: 1_500_000_000,
        project_description: "Green Building Construction",
        loan_amount: 750_000_000,
    },
    Sample {
        esg_score: 95,
        credit_amount: 3_000_000_000,
        project_description: "Carbon Capture Technology",
        loan_amount: 1_500_000_000,
    },
    Sample {
        esg_score: 82,
        credit_amount: 1_200_000_000,
        project_description: "Water Treatment Plant",
        loan_amount: 600_000_000,
    },
    Sample {
        esg_score: 90,
        credit_amount: 2_500_000_000,
        project_description: "Electric Vehicle Charging Network",
        loan_amount: 1_250_000_000,
    },
    Sample {
        esg_score: 87,
        credit_amount: 1_800_000_000,
        project_description: "Sustainable Agriculture Initiative",
        loan_amount: 900_000_000,
    },
    Sample {
        esg_score: 93,
        credit_amount: 2_200_000_000,
        project_description: "Ocean Cleanup Project",
        loan_amount: 1_100_000_000,
    },
    Sample {
        esg_score: 89,
        credit_amount: 1_600_000_000,
        project_description: "Forest Conservation Program",
        loan_amount: 800_000_000,
    },
];

/// Pause between submissions so consecutive writes land in separate blocks.
const SUBMIT_PAUSE: Duration = Duration::from_secs(2);

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    record_id: Option<u64>,
    tx_hash: String,
}

async fn login(client: &Client, base: &str, email: &str, password: &str) -> Result<Option<String>> {
    let resp = client
        .post(format!("{base}/login"))
        .json(&json!({ "email": email, "password": password }))
        .send()
        .await
        .context("login request failed")?;
    if resp.status() == StatusCode::UNAUTHORIZED {
        return Ok(None);
    }
    if !resp.status().is_success() {
        bail!("login returned {}: {}", resp.status(), resp.text().await.unwrap_or_default());
    }
    Ok(Some(resp.json::<TokenResponse>().await?.token))
}

async fn admin_token(client: &Client, base: &str, settings: &Settings) -> Result<String> {
    let admin = &settings.admin;
    let password = admin.password.expose_secret();
    if let Some(token) = login(client, base, &admin.email, password).await? {
        info!("Logged in as {}", admin.email);
        return Ok(token);
    }

    warn!("Admin login failed, registering {}", admin.username);
    let resp = client
        .post(format!("{base}/register"))
        .json(&json!({ "username": admin.username, "email": admin.email, "password": password }))
        .send()
        .await
        .context("register request failed")?;
    if !resp.status().is_success() {
        bail!("register returned {}: {}", resp.status(), resp.text().await.unwrap_or_default());
    }
    Ok(resp.json::<TokenResponse>().await?.token)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let _log_guard = logging::init(None);
    let settings = Settings::from_env().context("Invalid configuration")?;
    let base = std::env::var("API_BASE").unwrap_or_else(|_| "http://localhost:3001".into());
    let base = base.trim_end_matches('/');

    let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
    let token = admin_token(&client, base, &settings).await?;

    let (mut ok, mut failed) = (0usize, 0usize);
    for (i, sample) in SAMPLES.iter().enumerate() {
        info!(
            "[{}/{}] {} (ESG {}, credit {} VND)",
            i + 1,
            SAMPLES.len(),
            sample.project_description,
            sample.esg_score,
            group_thousands(sample.credit_amount)
        );
        let result = client
            .post(format!("{base}/create-record"))
            .bearer_auth(&token)
            .json(&json!({
                "esgScore": sample.esg_score,
                "creditAmount": sample.credit_amount,
                "projectDescription": sample.project_description,
                "loanAmount": sample.loan_amount,
            }))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<CreateResponse>().await {
                Ok(created) => {
                    info!("  record {:?}, tx {}", created.record_id, created.tx_hash);
                    ok += 1;
                }
                Err(e) => {
                    error!("  unreadable response: {}", e);
                    failed += 1;
                }
            },
            Ok(resp) => {
                let status = resp.status();
                error!("  failed ({}): {}", status, resp.text().await.unwrap_or_default());
                failed += 1;
            }
            Err(e) => {
                error!("  request error: {}", e);
                failed += 1;
            }
        }
        if i + 1 < SAMPLES.len() {
            tokio::time::sleep(SUBMIT_PAUSE).await;
        }
    }

    info!("Done: {} created, {} failed", ok, failed);
    if failed > 0 {
        bail!("{failed} record(s) failed");
    }
    Ok(())
}
