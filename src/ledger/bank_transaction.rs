//! Bank transaction import and querying

use std::collections::HashSet;

use crate::traits::*;
use crate::types::*;
use crate::utils::validation::normalize_currency;

/// Bank transaction manager. Transactions are only ever created in bulk.
pub struct BankTransactionManager<S: ReconciliationStorage> {
    storage: S,
    validator: Box<dyn TransactionValidator>,
}

impl<S: ReconciliationStorage> BankTransactionManager<S> {
    /// Create a new transaction manager
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultTransactionValidator),
        }
    }

    /// Create a new transaction manager with custom validator
    pub fn with_validator(storage: S, validator: Box<dyn TransactionValidator>) -> Self {
        Self { storage, validator }
    }

    /// Turn import lines into validated transactions without touching storage.
    ///
    /// An empty batch, any invalid line, or two lines sharing an external id
    /// rejects the whole batch.
    pub fn build_transactions(
        &self,
        tenant_id: &TenantId,
        lines: &[NewBankTransaction],
    ) -> ReconResult<Vec<BankTransaction>> {
        if lines.is_empty() {
            return Err(ReconError::Validation(
                "Import must contain at least one transaction".to_string(),
            ));
        }

        let mut external_ids = HashSet::new();
        let mut transactions = Vec::with_capacity(lines.len());

        for (index, line) in lines.iter().enumerate() {
            let currency = normalize_currency(line.currency.as_deref())
                .map_err(|e| line_error(index, e))?;
            let transaction = BankTransaction::new(tenant_id.clone(), line.clone(), currency);
            self.validator
                .validate_transaction(&transaction)
                .map_err(|e| line_error(index, e))?;

            if let Some(ref external_id) = transaction.external_id {
                if !external_ids.insert(external_id.clone()) {
                    return Err(ReconError::Validation(format!(
                        "Line {}: external ID '{}' appears more than once in the batch",
                        index, external_id
                    )));
                }
            }

            transactions.push(transaction);
        }

        Ok(transactions)
    }

    /// Validate and atomically store a batch of transactions
    pub async fn import(
        &self,
        tenant_id: &TenantId,
        lines: &[NewBankTransaction],
    ) -> ReconResult<ImportResult> {
        let transactions = self.build_transactions(tenant_id, lines)?;
        self.storage
            .insert_transactions(tenant_id, &transactions)
            .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            count = transactions.len(),
            "bank transactions imported"
        );
        Ok(ImportResult::from_transactions(&transactions))
    }

    /// Get a transaction by ID, returning an error if not found
    pub async fn get_transaction_required(
        &self,
        tenant_id: &TenantId,
        transaction_id: &str,
    ) -> ReconResult<BankTransaction> {
        self.storage
            .get_transaction(tenant_id, transaction_id)
            .await?
            .ok_or_else(|| ReconError::TransactionNotFound(transaction_id.to_string()))
    }

    pub async fn list_transactions(
        &self,
        tenant_id: &TenantId,
        filter: &TransactionFilter,
    ) -> ReconResult<Vec<BankTransaction>> {
        self.storage.list_transactions(tenant_id, filter).await
    }

    /// Transactions not yet claimed by a confirmed match
    pub async fn list_unmatched(&self, tenant_id: &TenantId) -> ReconResult<Vec<BankTransaction>> {
        self.storage.list_unmatched_transactions(tenant_id).await
    }

    /// Delete a transaction that no confirmed match references
    pub async fn delete_transaction(
        &self,
        tenant_id: &TenantId,
        transaction_id: &str,
    ) -> ReconResult<()> {
        self.get_transaction_required(tenant_id, transaction_id)
            .await?;
        self.storage
            .delete_transaction(tenant_id, transaction_id)
            .await?;
        tracing::info!(tenant_id = %tenant_id, transaction_id, "bank transaction deleted");
        Ok(())
    }
}

fn line_error(index: usize, err: ReconError) -> ReconError {
    match err {
        ReconError::Validation(message) => {
            ReconError::Validation(format!("Line {}: {}", index, message))
        }
        other => other,
    }
}
