//! Invoice management

use crate::traits::*;
use crate::types::*;
use crate::utils::validation::normalize_currency;

/// Invoice manager for creating, querying and deleting invoices
pub struct InvoiceManager<S: ReconciliationStorage> {
    storage: S,
    validator: Box<dyn InvoiceValidator>,
}

impl<S: ReconciliationStorage> InvoiceManager<S> {
    /// Create a new invoice manager
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultInvoiceValidator),
        }
    }

    /// Create a new invoice manager with custom validator
    pub fn with_validator(storage: S, validator: Box<dyn InvoiceValidator>) -> Self {
        Self { storage, validator }
    }

    /// Create a new open invoice
    pub async fn create_invoice(
        &self,
        tenant_id: &TenantId,
        mut params: NewInvoice,
    ) -> ReconResult<Invoice> {
        params.currency = normalize_currency(Some(params.currency.as_str()))?;
        let invoice = Invoice::new(tenant_id.clone(), params);

        self.validator.validate_invoice(&invoice)?;

        let existing = self.storage.get_invoice(tenant_id, &invoice.id).await?;
        if existing.is_some() {
            return Err(ReconError::Conflict(format!(
                "Invoice with ID '{}' already exists",
                invoice.id
            )));
        }

        self.storage.save_invoice(tenant_id, &invoice).await?;
        tracing::info!(
            tenant_id = %tenant_id,
            invoice_id = %invoice.id,
            amount = %invoice.amount,
            "invoice created"
        );

        Ok(invoice)
    }

    /// Get an invoice by ID
    pub async fn get_invoice(
        &self,
        tenant_id: &TenantId,
        invoice_id: &str,
    ) -> ReconResult<Option<Invoice>> {
        self.storage.get_invoice(tenant_id, invoice_id).await
    }

    /// Get an invoice by ID, returning an error if not found
    pub async fn get_invoice_required(
        &self,
        tenant_id: &TenantId,
        invoice_id: &str,
    ) -> ReconResult<Invoice> {
        self.storage
            .get_invoice(tenant_id, invoice_id)
            .await?
            .ok_or_else(|| ReconError::InvoiceNotFound(invoice_id.to_string()))
    }

    /// List invoices matching a filter
    pub async fn list_invoices(
        &self,
        tenant_id: &TenantId,
        filter: &InvoiceFilter,
    ) -> ReconResult<Vec<Invoice>> {
        self.storage.list_invoices(tenant_id, filter).await
    }

    /// List invoices still waiting for a payment
    pub async fn list_open_invoices(&self, tenant_id: &TenantId) -> ReconResult<Vec<Invoice>> {
        self.storage
            .list_invoices(tenant_id, &InvoiceFilter::open())
            .await
    }

    /// Delete an open invoice. Matched invoices are kept for the audit trail.
    pub async fn delete_invoice(&self, tenant_id: &TenantId, invoice_id: &str) -> ReconResult<()> {
        let invoice = self.get_invoice_required(tenant_id, invoice_id).await?;
        if !invoice.is_open() {
            return Err(ReconError::InvalidState(format!(
                "Invoice {} is {} and cannot be deleted",
                invoice_id, invoice.status
            )));
        }

        self.storage.delete_invoice(tenant_id, invoice_id).await?;
        tracing::info!(tenant_id = %tenant_id, invoice_id, "invoice deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::MemoryStorage;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;
    use std::str::FromStr;

    async fn manager() -> (InvoiceManager<MemoryStorage>, TenantId) {
        let storage = MemoryStorage::new();
        let tenant = TenantId::new("t1");
        storage
            .save_tenant(&Tenant::new(tenant.clone(), "Tenant One".to_string()))
            .await
            .unwrap();
        (InvoiceManager::new(storage), tenant)
    }

    fn params(id: &str, amount: &str) -> NewInvoice {
        NewInvoice::new(
            id,
            BigDecimal::from_str(amount).unwrap(),
            "",
            NaiveDate::from_ymd_opt(2024, 1, 20).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_create_invoice_defaults_currency() {
        let (manager, tenant) = manager().await;
        let invoice = manager
            .create_invoice(&tenant, params("inv-1", "1000.00").vendor("Acme"))
            .await
            .unwrap();

        assert_eq!(invoice.currency, "USD");
        assert_eq!(invoice.status, InvoiceStatus::Open);
        assert_eq!(
            manager
                .get_invoice_required(&tenant, "inv-1")
                .await
                .unwrap(),
            invoice
        );
    }

    #[tokio::test]
    async fn test_invalid_invoices_rejected() {
        let (manager, tenant) = manager().await;

        for bad in [
            params("inv-1", "-5.00"),
            params("inv-1", "10.001"),
            params("", "10.00"),
        ] {
            assert!(matches!(
                manager.create_invoice(&tenant, bad).await,
                Err(ReconError::Validation(_))
            ));
        }

        let mut bad_currency = params("inv-1", "10.00");
        bad_currency.currency = "dollars".to_string();
        assert!(manager.create_invoice(&tenant, bad_currency).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_id_conflicts() {
        let (manager, tenant) = manager().await;
        manager
            .create_invoice(&tenant, params("inv-1", "1.00"))
            .await
            .unwrap();
        let err = manager
            .create_invoice(&tenant, params("inv-1", "2.00"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_unknown_tenant_rejected() {
        let (manager, _) = manager().await;
        let err = manager
            .create_invoice(&TenantId::new("ghost"), params("inv-1", "1.00"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::TenantNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_invoice() {
        let (manager, tenant) = manager().await;
        assert!(matches!(
            manager.delete_invoice(&tenant, "nope").await,
            Err(ReconError::InvoiceNotFound(_))
        ));
    }
}
