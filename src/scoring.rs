//! Client for the external ESG scoring service.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::{ApiError, ApiResult};

pub const PREDICT_PATH: &str = "predict/esg_overall";

pub const INDUSTRIES: &[&str] = &[
    "Retail",
    "Transportation",
    "Technology",
    "Finance",
    "Healthcare",
    "Energy",
    "Consumer Goods",
    "Utilities",
    "Manufacturing",
];

pub const REGIONS: &[&str] = &[
    "Latin America",
    "Asia",
    "Africa",
    "Middle East",
    "Oceania",
    "Europe",
    "North America",
];

/// Metrics submitted by a company. Only revenue (VND) and emissions are
/// mandatory; the rest fall back to the model's reference values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EsgInput {
    pub revenue: Option<f64>,
    pub emissions: Option<f64>,
    pub industry: Option<String>,
    pub region: Option<String>,
    pub year: Option<i32>,
    pub profit_margin: Option<f64>,
    pub market_cap: Option<f64>,
    pub growth_rate: Option<f64>,
    pub water_usage: Option<f64>,
    pub energy_consumption: Option<f64>,
}

/// Feature vector in the scoring service's own field names.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Features {
    pub industry: String,
    pub region: String,
    pub year: i32,
    pub revenue: f64,
    pub profit_margin: f64,
    pub market_cap: f64,
    pub growth_rate: f64,
    pub carbon_emissions: f64,
    pub water_usage: f64,
    pub energy_consumption: f64,
}

impl EsgInput {
    pub fn into_features(self, usd_to_vnd_rate: f64) -> ApiResult<Features> {
        let (Some(revenue), Some(emissions)) = (self.revenue, self.emissions) else {
            return Err(ApiError::bad_request(
                "Missing required fields: revenue and emissions",
            ));
        };
        if usd_to_vnd_rate <= 0.0 {
            return Err(ApiError::Internal(anyhow::anyhow!(
                "USD_TO_VND_RATE must be positive"
            )));
        }

        let industry = self.industry.unwrap_or_else(|| "Technology".into());
        if !INDUSTRIES.contains(&industry.as_str()) {
            return Err(ApiError::bad_request(format!("Unsupported industry: {industry}")));
        }
        let region = self.region.unwrap_or_else(|| "Asia".into());
        if !REGIONS.contains(&region.as_str()) {
            return Err(ApiError::bad_request(format!("Unsupported region: {region}")));
        }

        Ok(Features {
            industry,
            region,
            year: self.year.unwrap_or_else(|| Utc::now().year()),
            revenue: revenue / usd_to_vnd_rate,
            profit_margin: self.profit_margin.unwrap_or(12.5),
            market_cap: self.market_cap.unwrap_or(20_000_000.0),
            growth_rate: self.growth_rate.unwrap_or(5.0),
            carbon_emissions: emissions,
            water_usage: self.water_usage.unwrap_or(300.0),
            energy_consumption: self.energy_consumption.unwrap_or(1500.0),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    success: Option<bool>,
    prediction: Option<f64>,
    error: Option<String>,
}

#[async_trait]
pub trait EsgScorer: Send + Sync {
    async fn score(&self, features: &Features) -> ApiResult<f64>;
}

pub struct HttpScorer {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpScorer {
    pub fn new(base: &Url) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: predict_url(base)?,
        })
    }
}

/// `base` joined with the prediction path, tolerating a trailing slash.
pub fn predict_url(base: &Url) -> anyhow::Result<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(PREDICT_PATH)
        .with_context(|| format!("Invalid scoring service URL: {base}"))
}

#[async_trait]
impl EsgScorer for HttpScorer {
    async fn score(&self, features: &Features) -> ApiResult<f64> {
        debug!("Scoring request: {:?}", features);
        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(features)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("Scoring service unreachable: {e}")))?;

        let status = resp.status();
        let body: PredictResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Upstream(format!("Invalid scoring service response: {e}")))?;
        let prediction = interpret(status.is_success(), body)?;
        info!("ESG score prediction: {}", prediction);
        Ok(prediction)
    }
}

fn interpret(status_ok: bool, body: PredictResponse) -> ApiResult<f64> {
    let failed = !status_ok || body.success == Some(false);
    match (failed, body.prediction) {
        (false, Some(p)) => Ok(p),
        _ => Err(ApiError::Upstream(
            body.error
                .unwrap_or_else(|| "Scoring service returned no prediction".into()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(revenue: f64, emissions: f64) -> EsgInput {
        EsgInput {
            revenue: Some(revenue),
            emissions: Some(emissions),
            ..Default::default()
        }
    }

    #[test]
    fn test_features_defaults_and_conversion() {
        let f = input(26_315_789.5, 120.0).into_features(26_315.7895).unwrap();
        assert_eq!(f.industry, "Technology");
        assert_eq!(f.region, "Asia");
        assert!((f.revenue - 1000.0).abs() < 1e-6);
        assert_eq!(f.carbon_emissions, 120.0);
        assert_eq!(f.profit_margin, 12.5);
        assert_eq!(f.market_cap, 20_000_000.0);
        assert_eq!(f.water_usage, 300.0);
        assert_eq!(f.energy_consumption, 1500.0);
    }

    #[test]
    fn test_features_serialize_with_model_names() {
        let f = input(1.0, 2.0).into_features(1.0).unwrap();
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["Industry"], "Technology");
        assert_eq!(v["CarbonEmissions"], 2.0);
        assert!(v.get("EnergyConsumption").is_some());
        assert!(v.get("ProfitMargin").is_some());
    }

    #[test]
    fn test_missing_required_fields() {
        let err = EsgInput { revenue: Some(1.0), ..Default::default() }
            .into_features(1.0)
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required fields: revenue and emissions");
    }

    #[test]
    fn test_unknown_industry_and_region_rejected() {
        let mut i = input(1.0, 1.0);
        i.industry = Some("Mining".into());
        assert!(matches!(i.into_features(1.0), Err(ApiError::BadRequest(_))));

        let mut i = input(1.0, 1.0);
        i.region = Some("Antarctica".into());
        assert!(matches!(i.into_features(1.0), Err(ApiError::BadRequest(_))));

        let mut i = input(1.0, 1.0);
        i.industry = Some("Consumer Goods".into());
        i.region = Some("Middle East".into());
        assert!(i.into_features(1.0).is_ok());
    }

    #[test]
    fn test_predict_url() {
        let u = predict_url(&Url::parse("http://ai:5000").unwrap()).unwrap();
        assert_eq!(u.as_str(), "http://ai:5000/predict/esg_overall");
        let u = predict_url(&Url::parse("http://ai:5000/v1/").unwrap()).unwrap();
        assert_eq!(u.as_str(), "http://ai:5000/v1/predict/esg_overall");
        let u = predict_url(&Url::parse("http://ai:5000/v1").unwrap()).unwrap();
        assert_eq!(u.as_str(), "http://ai:5000/v1/predict/esg_overall");
    }

    #[test]
    fn test_interpret_response() {
        let ok = PredictResponse { success: Some(true), prediction: Some(71.5), error: None };
        assert_eq!(interpret(true, ok).unwrap(), 71.5);

        let legacy = PredictResponse { success: None, prediction: Some(40.0), error: None };
        assert_eq!(interpret(true, legacy).unwrap(), 40.0);

        let failed = PredictResponse {
            success: Some(false),
            prediction: None,
            error: Some("model not loaded".into()),
        };
        let err = interpret(true, failed).unwrap_err();
        assert!(matches!(err, ApiError::Upstream(ref m) if m == "model not loaded"));

        let http_err = PredictResponse { success: None, prediction: Some(1.0), error: None };
        assert!(interpret(false, http_err).is_err());
    }
}
