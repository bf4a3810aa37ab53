//! Aggregations over credit records for the progress and analytics views.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::CreditRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sector {
    Agriculture,
    Energy,
    Manufacturing,
    Transportation,
    Construction,
    Other,
}

impl Sector {
    pub fn as_str(self) -> &'static str {
        match self {
            Sector::Agriculture => "Agriculture",
            Sector::Energy => "Energy",
            Sector::Manufacturing => "Manufacturing",
            Sector::Transportation => "Transportation",
            Sector::Construction => "Construction",
            Sector::Other => "Other",
        }
    }
}

const SECTOR_KEYWORDS: &[(Sector, &[&str])] = &[
    (Sector::Agriculture, &["agriculture", "farming", "irrigation"]),
    (Sector::Energy, &["energy", "solar", "wind"]),
    (Sector::Manufacturing, &["manufacturing", "production"]),
    (Sector::Transportation, &["transport", "logistics"]),
    (Sector::Construction, &["construction", "building"]),
];

/// First keyword group that matches wins.
pub fn determine_sector(description: &str) -> Sector {
    let desc = description.to_lowercase();
    SECTOR_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| desc.contains(w)))
        .map(|(sector, _)| *sector)
        .unwrap_or(Sector::Other)
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Sum clamped at `u64::MAX`; contract values are already clamped to u64
/// and several of them can exceed it together.
pub fn saturating_total(values: impl IntoIterator<Item = u64>) -> u64 {
    values.into_iter().fold(0u64, u64::saturating_add)
}

fn mean(total: u128, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        round2(total as f64 / count as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordView {
    pub id: u64,
    pub esg_score: u64,
    pub credit_amount: u64,
    pub timestamp: i64,
    pub project_description: String,
    pub loan_amount: u64,
    pub approved: bool,
    pub sector: Sector,
}

impl RecordView {
    /// A zero timestamp is replaced by `now` so the record still lands in
    /// the current period.
    pub fn from_record(r: &CreditRecord, now: i64) -> Self {
        Self {
            id: r.id,
            esg_score: r.esg_score,
            credit_amount: r.credit_amount,
            timestamp: if r.timestamp > 0 { r.timestamp } else { now },
            project_description: r.project_description.clone(),
            loan_amount: r.loan_amount,
            approved: r.approved,
            sector: determine_sector(&r.project_description),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsQuery {
    pub sector: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub min_score: Option<String>,
    pub max_score: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyticsFilter {
    pub sector: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
}

/// Blank or non-numeric bounds are ignored rather than rejected.
fn score_bound(raw: &Option<String>) -> Option<f64> {
    raw.as_deref()
        .map(str::trim)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// `YYYY-MM-DD` (midnight UTC) or RFC 3339, as unix seconds.
pub fn parse_date(s: &str) -> Result<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| anyhow!("Invalid date: {s}"))?;
    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| anyhow!("Invalid date: {s}"))?;
    Ok(Utc.from_utc_datetime(&midnight).timestamp())
}

impl AnalyticsFilter {
    pub fn from_query(q: &AnalyticsQuery) -> Result<Self> {
        let non_empty =
            |s: &Option<String>| s.as_deref().filter(|v| !v.is_empty()).map(str::to_owned);
        Ok(Self {
            sector: non_empty(&q.sector).filter(|s| s != "all"),
            start: non_empty(&q.start_date).map(|s| parse_date(&s)).transpose()?,
            end: non_empty(&q.end_date).map(|s| parse_date(&s)).transpose()?,
            min_score: score_bound(&q.min_score),
            max_score: score_bound(&q.max_score),
        })
    }

    pub fn matches(&self, r: &RecordView) -> bool {
        self.sector.as_deref().map_or(true, |s| r.sector.as_str() == s)
            && self.min_score.map_or(true, |m| r.esg_score as f64 >= m)
            && self.max_score.map_or(true, |m| r.esg_score as f64 <= m)
            && self.start.map_or(true, |t| r.timestamp >= t)
            && self.end.map_or(true, |t| r.timestamp <= t)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorSummary {
    pub count: usize,
    #[serde(rename = "totalESG")]
    pub total_esg: u64,
    pub total_credit: u64,
    #[serde(rename = "averageESG")]
    pub average_esg: f64,
    pub average_credit: f64,
    pub records: Vec<RecordView>,
}

pub fn sector_analytics(records: &[RecordView]) -> BTreeMap<&'static str, SectorSummary> {
    let mut groups: BTreeMap<&'static str, Vec<&RecordView>> = BTreeMap::new();
    for r in records {
        groups.entry(r.sector.as_str()).or_default().push(r);
    }
    groups
        .into_iter()
        .map(|(sector, members)| {
            let esg_sum: u128 = members.iter().map(|r| r.esg_score as u128).sum();
            let credit_sum: u128 = members.iter().map(|r| r.credit_amount as u128).sum();
            let summary = SectorSummary {
                count: members.len(),
                total_esg: saturating_total(members.iter().map(|r| r.esg_score)),
                total_credit: saturating_total(members.iter().map(|r| r.credit_amount)),
                average_esg: mean(esg_sum, members.len()),
                average_credit: mean(credit_sum, members.len()),
                records: members.into_iter().cloned().collect(),
            };
            (sector, summary)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthBucket {
    pub month: String,
    pub count: usize,
    #[serde(rename = "averageESG")]
    pub average_esg: f64,
    pub average_credit: f64,
}

/// Monthly (`YYYY-MM`, UTC) buckets, oldest first.
pub fn time_series(records: &[RecordView]) -> Vec<MonthBucket> {
    let mut months: BTreeMap<String, (usize, u128, u128)> = BTreeMap::new();
    for r in records {
        let Some(dt) = DateTime::<Utc>::from_timestamp(r.timestamp, 0) else {
            continue;
        };
        let entry = months.entry(dt.format("%Y-%m").to_string()).or_default();
        entry.0 += 1;
        entry.1 += r.esg_score as u128;
        entry.2 += r.credit_amount as u128;
    }
    months
        .into_iter()
        .map(|(month, (count, esg, credit))| MonthBucket {
            month,
            count,
            average_esg: mean(esg, count),
            average_credit: mean(credit, count),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    /// `YYYY-MM-DD`
    pub x: String,
    pub y: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trends {
    pub esg_improvement: f64,
    pub carbon_reduction: f64,
    pub sustainability_score: f64,
    pub trend_direction: TrendDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<ChartPoint>>,
}

/// `records` must already be sorted by timestamp.
pub fn trends(records: &[RecordView]) -> Trends {
    let (Some(first), Some(last)) = (records.first(), records.last()) else {
        return Trends::flat();
    };
    if records.len() < 2 {
        return Trends::flat();
    }

    let improvement = last.esg_score as f64 - first.esg_score as f64;
    let direction = if improvement > 5.0 {
        TrendDirection::Improving
    } else if improvement < -5.0 {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    };
    let points = records
        .iter()
        .map(|r| ChartPoint {
            x: DateTime::<Utc>::from_timestamp(r.timestamp, 0)
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            y: r.esg_score,
        })
        .collect();

    Trends {
        esg_improvement: round2(improvement),
        carbon_reduction: round2((improvement * 0.1).max(0.0)),
        sustainability_score: round2((last.esg_score as f64 + improvement * 0.5).clamp(0.0, 100.0)),
        trend_direction: direction,
        records: Some(points),
    }
}

impl Trends {
    fn flat() -> Self {
        Self {
            esg_improvement: 0.0,
            carbon_reduction: 0.0,
            sustainability_score: 0.0,
            trend_direction: TrendDirection::Stable,
            records: None,
        }
    }
}

/// Average ESG score of `records`, two decimals.
pub fn average_esg(records: &[RecordView]) -> f64 {
    mean(records.iter().map(|r| r.esg_score as u128).sum(), records.len())
}

pub fn average_credit(records: &[RecordView]) -> f64 {
    mean(records.iter().map(|r| r.credit_amount as u128).sum(), records.len())
}
