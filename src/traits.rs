//! Traits for storage abstraction and extensibility

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::*;
use crate::utils::validation;

/// Tenant-scoped storage abstraction for the reconciliation engine
///
/// Every method takes the tenant as its first argument and must only ever
/// see rows owned by that tenant. Methods documented as atomic either apply
/// all of their writes or none of them; implementations backed by a database
/// should run them inside a single transaction and rely on unique constraints
/// (tenant + idempotency key, tenant + invoice + transaction for active
/// matches) so that concurrent writers from separate processes fail instead
/// of double-claiming.
#[async_trait]
pub trait ReconciliationStorage: Send + Sync {
    /// Register a tenant. Fails with `Conflict` if the id is taken.
    async fn save_tenant(&self, tenant: &Tenant) -> ReconResult<()>;

    /// Get a tenant by ID
    async fn get_tenant(&self, tenant_id: &TenantId) -> ReconResult<Option<Tenant>>;

    /// Save a new invoice. Fails with `Conflict` if the id is taken.
    async fn save_invoice(&self, tenant_id: &TenantId, invoice: &Invoice) -> ReconResult<()>;

    /// Get an invoice by ID
    async fn get_invoice(&self, tenant_id: &TenantId, invoice_id: &str)
        -> ReconResult<Option<Invoice>>;

    /// List invoices matching the filter, ordered by id
    async fn list_invoices(
        &self,
        tenant_id: &TenantId,
        filter: &InvoiceFilter,
    ) -> ReconResult<Vec<Invoice>>;

    /// Delete an open invoice together with its proposed matches.
    /// Fails with `InvalidState` if the invoice is matched.
    async fn delete_invoice(&self, tenant_id: &TenantId, invoice_id: &str) -> ReconResult<()>;

    /// Atomically insert a batch of transactions. Duplicate ids or external ids,
    /// within the batch or against stored rows, fail the whole batch with `Conflict`.
    async fn insert_transactions(
        &self,
        tenant_id: &TenantId,
        transactions: &[BankTransaction],
    ) -> ReconResult<()>;

    /// Get a bank transaction by ID
    async fn get_transaction(
        &self,
        tenant_id: &TenantId,
        transaction_id: &str,
    ) -> ReconResult<Option<BankTransaction>>;

    /// List transactions matching the filter, ordered by id
    async fn list_transactions(
        &self,
        tenant_id: &TenantId,
        filter: &TransactionFilter,
    ) -> ReconResult<Vec<BankTransaction>>;

    /// List transactions not referenced by any confirmed match
    async fn list_unmatched_transactions(
        &self,
        tenant_id: &TenantId,
    ) -> ReconResult<Vec<BankTransaction>>;

    /// Delete a transaction together with its proposed matches.
    /// Fails with `InvalidState` if a confirmed match references it.
    async fn delete_transaction(&self, tenant_id: &TenantId, transaction_id: &str)
        -> ReconResult<()>;

    /// Atomically create a batch of proposed matches.
    ///
    /// The whole batch fails when any match references a missing or non-open
    /// invoice, a missing transaction, an invoice or transaction already claimed
    /// by a confirmed match, a pair that already has an active match, or when
    /// the batch itself claims an invoice or transaction twice.
    async fn create_proposed_matches(
        &self,
        tenant_id: &TenantId,
        matches: &[Match],
    ) -> ReconResult<()>;

    /// Atomically confirm a proposed match and flip its invoice to `matched`.
    /// Returns the updated match and invoice.
    async fn confirm_match(
        &self,
        tenant_id: &TenantId,
        match_id: &str,
        confirmed_at: DateTime<Utc>,
    ) -> ReconResult<(Match, Invoice)>;

    /// Get a match by ID
    async fn get_match(&self, tenant_id: &TenantId, match_id: &str) -> ReconResult<Option<Match>>;

    /// List matches matching the filter, highest score first
    async fn list_matches(&self, tenant_id: &TenantId, filter: &MatchFilter)
        -> ReconResult<Vec<Match>>;

    /// Atomically delete proposed matches. Confirmed matches cannot be deleted.
    async fn delete_proposed_matches(
        &self,
        tenant_id: &TenantId,
        match_ids: &[String],
    ) -> ReconResult<usize>;

    /// Get the idempotency record stored under a key
    async fn get_idempotency_record(
        &self,
        tenant_id: &TenantId,
        key: &str,
    ) -> ReconResult<Option<IdempotencyRecord>>;

    /// Atomically insert the imported transactions and the idempotency record.
    /// Fails with `Conflict`, writing nothing, if the key is already recorded.
    async fn commit_guarded_import(
        &self,
        tenant_id: &TenantId,
        record: &IdempotencyRecord,
        transactions: &[BankTransaction],
    ) -> ReconResult<()>;
}

/// Best-effort text generation collaborator used for match explanations
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produce free text for a prompt. May fail or hang; callers bound it with a timeout.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Trait for implementing custom invoice validation rules
pub trait InvoiceValidator: Send + Sync {
    /// Validate an invoice before saving
    fn validate_invoice(&self, invoice: &Invoice) -> ReconResult<()>;
}

/// Trait for implementing custom bank transaction validation rules
pub trait TransactionValidator: Send + Sync {
    /// Validate a transaction before it is imported
    fn validate_transaction(&self, transaction: &BankTransaction) -> ReconResult<()>;
}

/// Default invoice validator: id format, non-negative two-decimal amount,
/// ISO currency code and bounded free text
pub struct DefaultInvoiceValidator;

impl InvoiceValidator for DefaultInvoiceValidator {
    fn validate_invoice(&self, invoice: &Invoice) -> ReconResult<()> {
        validation::validate_entity_id(&invoice.id, "Invoice ID")?;
        validation::validate_amount(&invoice.amount)?;
        validation::validate_currency_code(&invoice.currency)?;
        if let Some(ref description) = invoice.description {
            validation::validate_free_text(description, "Invoice description")?;
        }
        if let Some(ref vendor) = invoice.vendor_name {
            validation::validate_free_text(vendor, "Vendor name")?;
        }
        if let Some(ref number) = invoice.invoice_number {
            validation::validate_free_text(number, "Invoice number")?;
        }
        Ok(())
    }
}

/// Default transaction validator
pub struct DefaultTransactionValidator;

impl TransactionValidator for DefaultTransactionValidator {
    fn validate_transaction(&self, transaction: &BankTransaction) -> ReconResult<()> {
        validation::validate_amount(&transaction.amount)?;
        validation::validate_currency_code(&transaction.currency)?;
        if let Some(ref external_id) = transaction.external_id {
            validation::validate_free_text(external_id, "External ID")?;
        }
        if let Some(ref description) = transaction.description {
            validation::validate_free_text(description, "Transaction description")?;
        }
        Ok(())
    }
}
