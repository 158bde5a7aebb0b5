//! Core types and data structures for the reconciliation system

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an isolated customer account.
///
/// Every storage call takes one of these as its first argument, so a value
/// of this type is the only way to reach tenant-owned rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TenantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// An isolated customer account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(id: TenantId, name: String) -> Self {
        Self {
            id,
            name,
            created_at: Utc::now(),
        }
    }
}

/// Invoice status. `Open` invoices take part in reconciliation runs,
/// `Matched` invoices are claimed by a confirmed match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Open,
    Matched,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Open => "open",
            InvoiceStatus::Matched => "matched",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields supplied by an operator when creating an invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInvoice {
    /// Caller-chosen identifier, unique within the tenant
    pub id: String,
    pub vendor_name: Option<String>,
    pub invoice_number: Option<String>,
    pub amount: BigDecimal,
    /// ISO 4217 code; empty means `USD`
    pub currency: String,
    pub invoice_date: NaiveDate,
    pub description: Option<String>,
}

impl NewInvoice {
    /// Minimal invoice with no vendor, number or description
    pub fn new(
        id: impl Into<String>,
        amount: BigDecimal,
        currency: &str,
        invoice_date: NaiveDate,
    ) -> Self {
        Self {
            id: id.into(),
            vendor_name: None,
            invoice_number: None,
            amount,
            currency: currency.to_string(),
            invoice_date,
            description: None,
        }
    }

    pub fn vendor(mut self, vendor_name: &str) -> Self {
        self.vendor_name = Some(vendor_name.to_string());
        self
    }

    pub fn number(mut self, invoice_number: &str) -> Self {
        self.invoice_number = Some(invoice_number.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// An amount owed to or by the tenant, waiting to be matched against a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub tenant_id: TenantId,
    pub vendor_name: Option<String>,
    pub invoice_number: Option<String>,
    /// Non-negative, at most two decimal places
    pub amount: BigDecimal,
    pub currency: String,
    pub invoice_date: NaiveDate,
    pub description: Option<String>,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    /// Build an open invoice from operator input. The currency must already be normalized.
    pub fn new(tenant_id: TenantId, params: NewInvoice) -> Self {
        Self {
            id: params.id,
            tenant_id,
            vendor_name: params.vendor_name,
            invoice_number: params.invoice_number,
            amount: params.amount,
            currency: params.currency,
            invoice_date: params.invoice_date,
            description: params.description,
            status: InvoiceStatus::Open,
            created_at: Utc::now(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == InvoiceStatus::Open
    }
}

/// One line of a bulk bank statement import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBankTransaction {
    /// Identifier assigned by the bank or the exporting system
    #[serde(default)]
    pub external_id: Option<String>,
    pub amount: BigDecimal,
    /// ISO 4217 code; missing or empty means `USD`
    #[serde(default)]
    pub currency: Option<String>,
    pub posted_at: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewBankTransaction {
    pub fn new(amount: BigDecimal, currency: &str, posted_at: DateTime<Utc>) -> Self {
        Self {
            external_id: None,
            amount,
            currency: Some(currency.to_string()),
            posted_at,
            description: None,
        }
    }

    pub fn external_id(mut self, external_id: &str) -> Self {
        self.external_id = Some(external_id.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// An imported bank statement line. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: String,
    pub tenant_id: TenantId,
    pub external_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub posted_at: DateTime<Utc>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BankTransaction {
    /// Build a transaction with a fresh identifier. The currency must already be normalized.
    pub fn new(tenant_id: TenantId, line: NewBankTransaction, currency: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id,
            external_id: line.external_id,
            amount: line.amount,
            currency,
            posted_at: line.posted_at,
            description: line.description,
            created_at: Utc::now(),
        }
    }

    /// Calendar day the transaction was posted on (UTC)
    pub fn posted_date(&self) -> NaiveDate {
        self.posted_at.date_naive()
    }
}

/// Match status. `Proposed` moves to `Confirmed` and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Proposed,
    Confirmed,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Proposed => "proposed",
            MatchStatus::Confirmed => "confirmed",
        }
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step
    pub fn can_transition_to(&self, next: MatchStatus) -> bool {
        *self == MatchStatus::Proposed && next == MatchStatus::Confirmed
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pairing of one invoice with one bank transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    pub tenant_id: TenantId,
    pub invoice_id: String,
    pub transaction_id: String,
    /// Total similarity score, 0 to 100 with two decimal places
    pub score: BigDecimal,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Match {
    /// Create a new proposal
    pub fn proposed(
        tenant_id: TenantId,
        invoice_id: String,
        transaction_id: String,
        score: BigDecimal,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id,
            invoice_id,
            transaction_id,
            score,
            status: MatchStatus::Proposed,
            created_at: Utc::now(),
            confirmed_at: None,
        }
    }

    /// Apply the proposed -> confirmed transition
    pub fn confirm(&mut self, at: DateTime<Utc>) -> ReconResult<()> {
        if !self.status.can_transition_to(MatchStatus::Confirmed) {
            return Err(ReconError::InvalidState(format!(
                "Match {} is already {}",
                self.id, self.status
            )));
        }
        self.status = MatchStatus::Confirmed;
        self.confirmed_at = Some(at);
        Ok(())
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == MatchStatus::Confirmed
    }
}

/// Stored outcome of a keyed import. Read-only once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub tenant_id: TenantId,
    pub key: String,
    /// Hex SHA-256 of the canonical request payload
    pub request_hash: String,
    /// Serialized response returned on first use
    pub response: String,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn new(tenant_id: TenantId, key: String, request_hash: String, response: String) -> Self {
        Self {
            tenant_id,
            key,
            request_hash,
            response,
            created_at: Utc::now(),
        }
    }
}

/// Response body of a bulk import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub count: usize,
    pub transaction_ids: Vec<String>,
}

impl ImportResult {
    pub fn from_transactions(transactions: &[BankTransaction]) -> Self {
        Self {
            count: transactions.len(),
            transaction_ids: transactions.iter().map(|t| t.id.clone()).collect(),
        }
    }
}

/// Invoice query filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceFilter {
    pub status: Option<InvoiceStatus>,
    pub vendor_name: Option<String>,
    pub min_amount: Option<BigDecimal>,
    pub max_amount: Option<BigDecimal>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl InvoiceFilter {
    pub fn open() -> Self {
        Self {
            status: Some(InvoiceStatus::Open),
            ..Default::default()
        }
    }

    pub fn matches(&self, invoice: &Invoice) -> bool {
        if self.status.is_some_and(|s| s != invoice.status) {
            return false;
        }
        if let Some(ref vendor) = self.vendor_name {
            let same_vendor = invoice
                .vendor_name
                .as_deref()
                .is_some_and(|v| v.eq_ignore_ascii_case(vendor));
            if !same_vendor {
                return false;
            }
        }
        let amount = &invoice.amount;
        if self.min_amount.as_ref().is_some_and(|min| amount < min) {
            return false;
        }
        if self.max_amount.as_ref().is_some_and(|max| amount > max) {
            return false;
        }
        let day = invoice.invoice_date;
        if self.start_date.is_some_and(|start| day < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| day > end) {
            return false;
        }
        true
    }
}

/// Bank transaction query filter. Dates compare against the posted day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub min_amount: Option<BigDecimal>,
    pub max_amount: Option<BigDecimal>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub currency: Option<String>,
}

impl TransactionFilter {
    pub fn matches(&self, transaction: &BankTransaction) -> bool {
        let amount = &transaction.amount;
        if self.min_amount.as_ref().is_some_and(|min| amount < min) {
            return false;
        }
        if self.max_amount.as_ref().is_some_and(|max| amount > max) {
            return false;
        }
        let day = transaction.posted_date();
        if self.start_date.is_some_and(|start| day < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| day > end) {
            return false;
        }
        if let Some(ref currency) = self.currency {
            if !transaction.currency.eq_ignore_ascii_case(currency) {
                return false;
            }
        }
        true
    }
}

/// Match query filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchFilter {
    pub status: Option<MatchStatus>,
    pub invoice_id: Option<String>,
    pub transaction_id: Option<String>,
    pub min_score: Option<BigDecimal>,
}

impl MatchFilter {
    pub fn status(status: MatchStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn matches(&self, m: &Match) -> bool {
        self.status.is_none_or(|s| s == m.status)
            && self
                .invoice_id
                .as_deref()
                .is_none_or(|id| id == m.invoice_id)
            && self
                .transaction_id
                .as_deref()
                .is_none_or(|id| id == m.transaction_id)
            && self.min_score.as_ref().is_none_or(|min| m.score >= *min)
    }
}

/// Errors that can occur in the reconciliation system
#[derive(Debug, thiserror::Error)]
pub enum ReconError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),
    #[error("Bank transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Match not found: {0}")]
    MatchNotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl ReconError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ReconError::TenantNotFound(_)
                | ReconError::InvoiceNotFound(_)
                | ReconError::TransactionNotFound(_)
                | ReconError::MatchNotFound(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconError::Conflict(_))
    }
}

/// Result type for reconciliation operations
pub type ReconResult<T> = Result<T, ReconError>;

/// Failures of the best-effort text generation collaborator.
/// These never escape the explanation annotator.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("text generation is disabled")]
    Disabled,
    #[error("text generation credentials are not configured")]
    MissingCredentials,
    #[error("text generation timed out after {0} ms")]
    Timeout(u64),
    #[error("text generation request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed text generation response: {0}")]
    Malformed(String),
}
