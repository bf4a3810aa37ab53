//! Environment-driven settings.
//!
//! Every value has a default so the service can start against a local
//! stack; `Settings::from_env` overrides them from the process environment
//! (after `.env` has been loaded by the binary).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{anyhow, bail, Context, Result};
use secrecy::SecretString;
use url::Url;

pub const DEFAULT_ADMIN_WALLET: &str = "0xD55420276e2C9E6000f922fA658D222b34E989f5";
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

#[derive(Debug)]
pub struct Settings {
    pub bind_addr: SocketAddr,

    pub mongodb_uri: Option<String>,
    pub mongodb_database: String,

    pub jwt_secret: SecretString,
    pub jwt_ttl: Duration,

    pub chain: ChainSettings,

    /// Base URL of the ESG scoring service.
    pub ai_service_url: Url,
    pub usd_to_vnd_rate: f64,

    /// `*` allows any origin.
    pub cors_origins: Vec<String>,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    /// Rate-limit on `X-Forwarded-For` rather than the socket peer.
    pub trust_proxy: bool,

    pub admin: AdminSettings,

    pub confirmation_poll: Duration,
    pub confirmation_max_attempts: u32,

    pub webhook_secret: Option<SecretString>,
    pub log_dir: Option<String>,
}

#[derive(Debug)]
pub struct ChainSettings {
    pub rpc_url: Url,
    pub contract_address: Option<Address>,
    pub private_key: Option<SecretString>,
    /// Service account; when unset it is derived from the private key.
    pub account: Option<Address>,
    pub chain_id: u64,
    pub gas_price_multiplier: f64,
}

#[derive(Debug)]
pub struct AdminSettings {
    pub username: String,
    pub email: String,
    pub password: SecretString,
    pub wallet: Option<Address>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3001),
            mongodb_uri: None,
            mongodb_database: "greencredit".into(),
            jwt_secret: SecretString::from("greencreditsecret"),
            jwt_ttl: Duration::from_secs(3600),
            chain: ChainSettings::default(),
            ai_service_url: Url::parse("http://ai:5000").expect("static url"),
            usd_to_vnd_rate: 26_315.7895,
            cors_origins: vec![
                "http://localhost:3000".into(),
                "http://127.0.0.1:3000".into(),
            ],
            rate_limit_max: 100,
            rate_limit_window: Duration::from_secs(15 * 60),
            trust_proxy: false,
            admin: AdminSettings::default(),
            confirmation_poll: Duration::from_millis(3000),
            confirmation_max_attempts: 20,
            webhook_secret: None,
            log_dir: None,
        }
    }
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            rpc_url: Url::parse("https://rpc.sepolia.org").expect("static url"),
            contract_address: None,
            private_key: None,
            account: None,
            chain_id: SEPOLIA_CHAIN_ID,
            gas_price_multiplier: 1.2,
        }
    }
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            username: "admin".into(),
            email: "admin@greencredit.ai".into(),
            password: SecretString::from("admin123"),
            wallet: Address::from_str(DEFAULT_ADMIN_WALLET).ok(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let mut s = Self::default();

        let port: u16 = env_parse("PORT")?.unwrap_or(s.bind_addr.port());
        let ip: IpAddr = env_parse("BIND_ADDR")?.unwrap_or(s.bind_addr.ip());
        s.bind_addr = SocketAddr::new(ip, port);

        s.mongodb_uri = env_string("MONGODB_URI");
        if let Some(db) = env_string("MONGODB_DATABASE") {
            s.mongodb_database = db;
        }

        if let Some(v) = env_string("JWT_SECRET") {
            s.jwt_secret = SecretString::from(v);
        }
        if let Some(v) = env_string("JWT_EXPIRES_IN") {
            s.jwt_ttl = parse_duration(&v).context("JWT_EXPIRES_IN")?;
        }

        if let Some(v) = env_parse("RPC_URL")? {
            s.chain.rpc_url = v;
        }
        s.chain.contract_address = env_parse("CONTRACT_ADDRESS")?;
        s.chain.private_key = env_string("PRIVATE_KEY").map(SecretString::from);
        s.chain.account = env_parse("ACCOUNT")?;
        if let Some(v) = env_parse("CHAIN_ID")? {
            s.chain.chain_id = v;
        }
        if let Some(v) = env_parse::<f64>("GAS_PRICE_MULTIPLIER")? {
            if !(v.is_finite() && v >= 1.0) {
                bail!("GAS_PRICE_MULTIPLIER must be >= 1.0, got {v}");
            }
            s.chain.gas_price_multiplier = v;
        }

        if let Some(v) = env_parse("AI_SERVICE_URL")? {
            s.ai_service_url = v;
        }
        if let Some(v) = env_parse::<f64>("USD_TO_VND_RATE")? {
            if v <= 0.0 {
                bail!("USD_TO_VND_RATE must be positive, got {v}");
            }
            s.usd_to_vnd_rate = v;
        }

        if let Some(v) = env_string("CORS_ORIGINS") {
            s.cors_origins = v
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = env_parse("RATE_LIMIT_MAX")? {
            s.rate_limit_max = v;
        }
        if let Some(v) = env_parse("RATE_LIMIT_WINDOW_SECS")? {
            s.rate_limit_window = Duration::from_secs(v);
        }
        if let Some(v) = env_parse("TRUST_PROXY")? {
            s.trust_proxy = v;
        }

        if let Some(v) = env_string("ADMIN_USERNAME") {
            s.admin.username = v;
        }
        if let Some(v) = env_string("ADMIN_EMAIL") {
            s.admin.email = v;
        }
        if let Some(v) = env_string("ADMIN_PASSWORD") {
            s.admin.password = SecretString::from(v);
        }
        if let Some(v) = env_parse("ADMIN_WALLET")? {
            s.admin.wallet = Some(v);
        }

        if let Some(v) = env_parse("CONFIRMATION_POLL_MS")? {
            s.confirmation_poll = Duration::from_millis(v);
        }
        if let Some(v) = env_parse("CONFIRMATION_MAX_ATTEMPTS")? {
            s.confirmation_max_attempts = v;
        }

        s.webhook_secret = env_string("WEBHOOK_SECRET").map(SecretString::from);
        s.log_dir = env_string("LOG_DIR");

        Ok(s)
    }
}

/// Parse a lifetime such as `1h`, `30m`, `45s`, `7d` or bare seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("empty duration");
    }
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| anyhow!("invalid duration '{raw}'"))?;
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86_400,
        other => bail!("unknown duration unit '{other}' in '{raw}'"),
    };
    Ok(Duration::from_secs(secs))
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid value for {key}: {e}")),
        None => Ok(None),
    }
}
