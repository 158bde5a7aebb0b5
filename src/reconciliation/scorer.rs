//! Deterministic similarity scoring between an invoice and a bank transaction
//!
//! The total score is the sum of four bounded sub-scores:
//!
//! | Factor   | Range | Bands |
//! |----------|-------|-------|
//! | Amount   | 0-40  | exact 40, 1% 35, 5% 25, 10% 15, then linear to 0 at the ceiling |
//! | Date     | 0-30  | same day 30, 1 day 25, 3 days 20, 7 days 10, 30 days 5, then decays |
//! | Text     | 0-20  | vendor name 15, shared keywords up to 10, invoice number 5, cap 20 |
//! | Currency | 0-10  | same code 10, otherwise 0 |

use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::ScoringConfig;
use crate::types::*;

pub const AMOUNT_WEIGHT: f64 = 40.0;
pub const DATE_WEIGHT: f64 = 30.0;
pub const TEXT_WEIGHT: f64 = 20.0;
pub const CURRENCY_WEIGHT: f64 = 10.0;
pub const MAX_SCORE: f64 = 100.0;

const VENDOR_NAME_POINTS: f64 = 15.0;
const KEYWORD_POINTS: f64 = 10.0;
const INVOICE_NUMBER_POINTS: f64 = 5.0;

/// Which text channels fired for a pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSignals {
    /// Vendor name appears in the transaction description
    pub vendor_name: bool,
    /// Number of keyword tokens shared by the two descriptions
    pub shared_keywords: usize,
    /// Invoice number appears literally in the transaction description
    pub invoice_number: bool,
}

/// Per-factor contributions to a pair's score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub amount: f64,
    pub date: f64,
    pub text: f64,
    pub currency: f64,
    /// Absolute calendar-day distance between invoice date and posting date
    pub days_apart: i64,
    pub signals: TextSignals,
}

impl ScoreBreakdown {
    /// Sum of the sub-scores, clamped to 0..=100 and rounded to two decimals
    pub fn total(&self) -> f64 {
        let sum = self.amount + self.date + self.text + self.currency;
        round2(sum.clamp(0.0, MAX_SCORE))
    }

    /// Total as the fixed-point value persisted on a match
    pub fn total_decimal(&self) -> BigDecimal {
        score_to_decimal(self.total())
    }
}

/// Convert a score to a two-decimal fixed-point value
pub fn score_to_decimal(score: f64) -> BigDecimal {
    BigDecimal::from_f64(score).unwrap_or_default().round(2)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn fraction(numerator: u32, denominator: u32) -> BigDecimal {
    BigDecimal::from(numerator) / BigDecimal::from(denominator)
}

/// Pure scoring function over an invoice and a transaction
#[derive(Debug, Clone, Default)]
pub struct SimilarityScorer {
    config: ScoringConfig,
}

impl SimilarityScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Score a pair. Never fails and never yields NaN.
    pub fn score(&self, invoice: &Invoice, transaction: &BankTransaction) -> ScoreBreakdown {
        let days_apart = (invoice.invoice_date - transaction.posted_date())
            .num_days()
            .abs();
        let (text, signals) = score_text(invoice, transaction);

        ScoreBreakdown {
            amount: self.score_amount(&invoice.amount, &transaction.amount),
            date: self.score_date(days_apart),
            text,
            currency: score_currency(&invoice.currency, &transaction.currency),
            days_apart,
            signals,
        }
    }

    fn score_amount(&self, invoice_amount: &BigDecimal, transaction_amount: &BigDecimal) -> f64 {
        let diff = (invoice_amount - transaction_amount).abs();
        if diff.is_zero() {
            return AMOUNT_WEIGHT;
        }

        // A zero invoice has no scale to be relative to; use the raw difference.
        let ratio = if invoice_amount.is_zero() {
            diff
        } else {
            diff / invoice_amount.abs()
        };

        if ratio <= fraction(1, 100) {
            35.0
        } else if ratio <= fraction(5, 100) {
            25.0
        } else if ratio <= fraction(10, 100) {
            15.0
        } else {
            let ratio = ratio.to_f64().unwrap_or(f64::MAX);
            let ceiling = self.config.amount_ceiling;
            if ceiling <= 0.10 || ratio >= ceiling {
                return 0.0;
            }
            round2(15.0 * (ceiling - ratio) / (ceiling - 0.10))
        }
    }

    fn score_date(&self, days_apart: i64) -> f64 {
        match days_apart {
            0 => DATE_WEIGHT,
            1 => 25.0,
            2..=3 => 20.0,
            4..=7 => 10.0,
            8..=30 => 5.0,
            _ => {
                let decayed = 5.0 - (days_apart - 30) as f64 * self.config.date_decay_per_day;
                round2(decayed.max(0.0))
            }
        }
    }
}

fn score_currency(invoice_currency: &str, transaction_currency: &str) -> f64 {
    let (expected, actual) = (invoice_currency.trim(), transaction_currency.trim());
    if expected.eq_ignore_ascii_case(actual) {
        CURRENCY_WEIGHT
    } else {
        0.0
    }
}

fn score_text(invoice: &Invoice, transaction: &BankTransaction) -> (f64, TextSignals) {
    let mut signals = TextSignals::default();

    let description = match transaction.description.as_deref().map(str::trim) {
        Some(d) if !d.is_empty() => d.to_lowercase(),
        _ => return (0.0, signals),
    };

    let mut score = 0.0;

    if let Some(vendor) = non_blank_lowercase(invoice.vendor_name.as_deref()) {
        if description.contains(&vendor) {
            score += VENDOR_NAME_POINTS;
            signals.vendor_name = true;
        }
    }

    if let Some(invoice_description) = non_blank_lowercase(invoice.description.as_deref()) {
        let invoice_tokens = tokenize(&invoice_description);
        let transaction_tokens = tokenize(&description);
        let shared = invoice_tokens.intersection(&transaction_tokens).count();
        if shared > 0 {
            let ratio = shared as f64 / invoice_tokens.len().max(transaction_tokens.len()) as f64;
            score += (ratio * KEYWORD_POINTS).min(KEYWORD_POINTS);
            signals.shared_keywords = shared;
        }
    }

    if let Some(number) = non_blank_lowercase(invoice.invoice_number.as_deref()) {
        if description.contains(&number) {
            score += INVOICE_NUMBER_POINTS;
            signals.invoice_number = true;
        }
    }

    (round2(score.min(TEXT_WEIGHT)), signals)
}

fn non_blank_lowercase(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Split lowercase text into keyword tokens. Dashes and underscores stay inside
/// tokens so identifiers like `inv-001` survive intact.
fn tokenize(text: &str) -> BTreeSet<&str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
        .map(|t| t.trim_matches(|c| c == '-' || c == '_'))
        .filter(|t| !t.is_empty())
        .collect()
}
