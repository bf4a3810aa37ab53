//! Loan quotes offered when a user redeems tokens.
//!
//! All arithmetic is done in `Decimal` so the rendered amounts and rates
//! match the advertised tiers exactly.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

pub const DEFAULT_ESG: u64 = 70;
pub const DEFAULT_LOAN_VND: u64 = 500_000_000;
pub const MAX_LOAN_VND: u64 = 1_000_000_000;
pub const QUOTE_VALIDITY_DAYS: i64 = 30;

const MIN_RATE: Decimal = dec!(4.5);
const MAX_TOKEN_DISCOUNT: Decimal = dec!(3);
const MAX_DISCOUNT_PCT: u64 = 15;

/// Base annual rate (percent) for an ESG score.
pub fn interest_rate(esg: u64) -> Decimal {
    match esg {
        90.. => dec!(6.5),
        80..=89 => dec!(7.0),
        70..=79 => dec!(7.5),
        60..=69 => dec!(8.0),
        _ => dec!(8.5),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QuoteInput {
    pub tokens: u64,
    /// Zero or absent means the default loan.
    pub requested_loan: Option<u64>,
    /// Zero or absent means the default score.
    pub esg: Option<u64>,
    /// Wallet token balance; `None` leaves the balance multiplier neutral.
    pub balance: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanQuote {
    pub discount_pct: u64,
    pub loan_amount: u64,
    pub interest_rate: Decimal,
    pub esg_multiplier: Decimal,
    pub balance_multiplier: Decimal,
    pub token_multiplier: Decimal,
    pub valid_until: DateTime<Utc>,
}

/// Display form returned to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteView {
    pub discount: String,
    pub loan_amount: String,
    pub interest_rate: String,
    pub valid_until: DateTime<Utc>,
    pub esg_multiplier: String,
    pub balance_multiplier: String,
    pub token_multiplier: String,
}

fn clamp(v: Decimal, lo: Decimal, hi: Decimal) -> Decimal {
    v.max(lo).min(hi)
}

pub fn quote(input: QuoteInput) -> LoanQuote {
    quote_at(input, Utc::now())
}

pub fn quote_at(input: QuoteInput, now: DateTime<Utc>) -> LoanQuote {
    let esg = input.esg.filter(|&e| e > 0).unwrap_or(DEFAULT_ESG);
    let base = input
        .requested_loan
        .filter(|&l| l > 0)
        .unwrap_or(DEFAULT_LOAN_VND)
        .min(MAX_LOAN_VND);
    let tokens = Decimal::from(input.tokens);

    let esg_multiplier = clamp(Decimal::from(esg) / dec!(100), dec!(0.5), dec!(1.5));
    let balance_multiplier = match input.balance {
        Some(b) => clamp(Decimal::from(b) / dec!(10000), dec!(0.8), dec!(1.2)),
        None => Decimal::ONE,
    };
    let token_multiplier = clamp(tokens / dec!(1000), dec!(0.9), dec!(1.3));

    let loan =
        (Decimal::from(base) * esg_multiplier * balance_multiplier * token_multiplier).floor();

    let hundreds = input.tokens / 100;
    let token_discount = (Decimal::from(hundreds) * dec!(0.5)).min(MAX_TOKEN_DISCOUNT);
    let rate = (interest_rate(esg) - token_discount).max(MIN_RATE);

    LoanQuote {
        discount_pct: (hundreds + esg / 10).min(MAX_DISCOUNT_PCT),
        loan_amount: loan.to_u64().unwrap_or(u64::MAX),
        interest_rate: rate,
        esg_multiplier,
        balance_multiplier,
        token_multiplier,
        valid_until: now + Duration::days(QUOTE_VALIDITY_DAYS),
    }
}

impl LoanQuote {
    pub fn view(&self) -> QuoteView {
        QuoteView {
            discount: format!("{}% interest reduction", self.discount_pct),
            loan_amount: format!("{} VND", group_thousands(self.loan_amount)),
            interest_rate: format!("{}%", self.interest_rate.round_dp(1).to_string_fixed(1)),
            valid_until: self.valid_until,
            esg_multiplier: self.esg_multiplier.round_dp(2).to_string_fixed(2),
            balance_multiplier: self.balance_multiplier.round_dp(2).to_string_fixed(2),
            token_multiplier: self.token_multiplier.round_dp(2).to_string_fixed(2),
        }
    }
}

trait FixedScale {
    fn to_string_fixed(self, dp: u32) -> String;
}

impl FixedScale for Decimal {
    /// Render with exactly `dp` fractional digits ("7" → "7.0").
    fn to_string_fixed(mut self, dp: u32) -> String {
        self.rescale(dp);
        self.to_string()
    }
}

/// `1234567` → `"1,234,567"`.
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Mock partner-bank offer keyed on the redeemed token amount.
pub fn bank_discount(tokens: u64) -> &'static str {
    match tokens {
        1000.. => "15% interest reduction on 500M VND loan",
        500..=999 => "10% interest reduction on 500M VND loan",
        100..=499 => "5% interest reduction on 500M VND loan",
        _ => "2% interest reduction",
    }
}
