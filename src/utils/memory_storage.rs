//! In-memory storage implementation for testing

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::traits::*;
use crate::types::*;

/// Everything owned by one tenant
#[derive(Debug, Clone)]
struct TenantBook {
    tenant: Tenant,
    invoices: BTreeMap<String, Invoice>,
    transactions: BTreeMap<String, BankTransaction>,
    matches: BTreeMap<String, Match>,
    idempotency: HashMap<String, IdempotencyRecord>,
}

impl TenantBook {
    fn new(tenant: Tenant) -> Self {
        Self {
            tenant,
            invoices: BTreeMap::new(),
            transactions: BTreeMap::new(),
            matches: BTreeMap::new(),
            idempotency: HashMap::new(),
        }
    }

    fn confirmed(&self) -> impl Iterator<Item = &Match> {
        self.matches.values().filter(|m| m.is_confirmed())
    }

    fn invoice_claimed(&self, invoice_id: &str) -> bool {
        self.confirmed().any(|m| m.invoice_id == invoice_id)
    }

    fn transaction_claimed(&self, transaction_id: &str) -> bool {
        self.confirmed().any(|m| m.transaction_id == transaction_id)
    }

    /// Check a batch of new transactions against the stored rows and itself
    fn check_new_transactions(
        &self,
        tenant_id: &TenantId,
        transactions: &[BankTransaction],
    ) -> ReconResult<()> {
        let stored_external: HashSet<&str> = self
            .transactions
            .values()
            .filter_map(|t| t.external_id.as_deref())
            .collect();
        let mut batch_ids = HashSet::new();
        let mut batch_external = HashSet::new();

        for transaction in transactions {
            ensure_owner(
                tenant_id,
                &transaction.tenant_id,
                "Transaction",
                &transaction.id,
            )?;

            if self.transactions.contains_key(&transaction.id)
                || !batch_ids.insert(&transaction.id)
            {
                return Err(ReconError::Conflict(format!(
                    "Transaction with ID '{}' already exists",
                    transaction.id
                )));
            }

            if let Some(ref external_id) = transaction.external_id {
                if stored_external.contains(external_id.as_str())
                    || !batch_external.insert(external_id.as_str())
                {
                    return Err(ReconError::Conflict(format!(
                        "Transaction with external ID '{}' already exists",
                        external_id
                    )));
                }
            }
        }

        Ok(())
    }

    fn remove_proposals_where(&mut self, predicate: impl Fn(&Match) -> bool) -> usize {
        let before = self.matches.len();
        self.matches
            .retain(|_, m| m.is_confirmed() || !predicate(m));
        before - self.matches.len()
    }
}

fn ensure_owner(expected: &TenantId, actual: &TenantId, kind: &str, id: &str) -> ReconResult<()> {
    if expected != actual {
        return Err(ReconError::Validation(format!(
            "{} {} belongs to tenant {}, not {}",
            kind, id, actual, expected
        )));
    }
    Ok(())
}

/// In-memory storage implementation for testing and development.
///
/// Clones share the same data. Every multi-row write validates the whole
/// batch and then applies it under one write lock, which gives the same
/// all-or-nothing behavior a database transaction would.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    books: Arc<RwLock<HashMap<TenantId, TenantBook>>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> ReconResult<RwLockReadGuard<'_, HashMap<TenantId, TenantBook>>> {
        self.books
            .read()
            .map_err(|_| ReconError::Storage("storage lock poisoned".to_string()))
    }

    fn write(&self) -> ReconResult<RwLockWriteGuard<'_, HashMap<TenantId, TenantBook>>> {
        self.books
            .write()
            .map_err(|_| ReconError::Storage("storage lock poisoned".to_string()))
    }

    fn with_book<T>(
        &self,
        tenant_id: &TenantId,
        f: impl FnOnce(&TenantBook) -> ReconResult<T>,
    ) -> ReconResult<T> {
        let books = self.read()?;
        let book = books
            .get(tenant_id)
            .ok_or_else(|| ReconError::TenantNotFound(tenant_id.to_string()))?;
        f(book)
    }

    fn with_book_mut<T>(
        &self,
        tenant_id: &TenantId,
        f: impl FnOnce(&mut TenantBook) -> ReconResult<T>,
    ) -> ReconResult<T> {
        let mut books = self.write()?;
        let book = books
            .get_mut(tenant_id)
            .ok_or_else(|| ReconError::TenantNotFound(tenant_id.to_string()))?;
        f(book)
    }
}

#[async_trait]
impl ReconciliationStorage for MemoryStorage {
    async fn save_tenant(&self, tenant: &Tenant) -> ReconResult<()> {
        let mut books = self.write()?;
        if books.contains_key(&tenant.id) {
            return Err(ReconError::Conflict(format!(
                "Tenant with ID '{}' already exists",
                tenant.id
            )));
        }
        books.insert(tenant.id.clone(), TenantBook::new(tenant.clone()));
        Ok(())
    }

    async fn get_tenant(&self, tenant_id: &TenantId) -> ReconResult<Option<Tenant>> {
        Ok(self.read()?.get(tenant_id).map(|b| b.tenant.clone()))
    }

    async fn save_invoice(&self, tenant_id: &TenantId, invoice: &Invoice) -> ReconResult<()> {
        self.with_book_mut(tenant_id, |book| {
            ensure_owner(tenant_id, &invoice.tenant_id, "Invoice", &invoice.id)?;
            if book.invoices.contains_key(&invoice.id) {
                return Err(ReconError::Conflict(format!(
                    "Invoice with ID '{}' already exists",
                    invoice.id
                )));
            }
            book.invoices.insert(invoice.id.clone(), invoice.clone());
            Ok(())
        })
    }

    async fn get_invoice(
        &self,
        tenant_id: &TenantId,
        invoice_id: &str,
    ) -> ReconResult<Option<Invoice>> {
        self.with_book(tenant_id, |book| Ok(book.invoices.get(invoice_id).cloned()))
    }

    async fn list_invoices(
        &self,
        tenant_id: &TenantId,
        filter: &InvoiceFilter,
    ) -> ReconResult<Vec<Invoice>> {
        self.with_book(tenant_id, |book| {
            Ok(book
                .invoices
                .values()
                .filter(|invoice| filter.matches(invoice))
                .cloned()
                .collect())
        })
    }

    async fn delete_invoice(&self, tenant_id: &TenantId, invoice_id: &str) -> ReconResult<()> {
        self.with_book_mut(tenant_id, |book| {
            let invoice = book
                .invoices
                .get(invoice_id)
                .ok_or_else(|| ReconError::InvoiceNotFound(invoice_id.to_string()))?;
            if !invoice.is_open() || book.invoice_claimed(invoice_id) {
                return Err(ReconError::InvalidState(format!(
                    "Invoice {} is matched and cannot be deleted",
                    invoice_id
                )));
            }

            book.remove_proposals_where(|m| m.invoice_id == invoice_id);
            book.invoices.remove(invoice_id);
            Ok(())
        })
    }

    async fn insert_transactions(
        &self,
        tenant_id: &TenantId,
        transactions: &[BankTransaction],
    ) -> ReconResult<()> {
        self.with_book_mut(tenant_id, |book| {
            book.check_new_transactions(tenant_id, transactions)?;
            for transaction in transactions {
                book.transactions
                    .insert(transaction.id.clone(), transaction.clone());
            }
            Ok(())
        })
    }

    async fn get_transaction(
        &self,
        tenant_id: &TenantId,
        transaction_id: &str,
    ) -> ReconResult<Option<BankTransaction>> {
        self.with_book(tenant_id, |book| {
            Ok(book.transactions.get(transaction_id).cloned())
        })
    }

    async fn list_transactions(
        &self,
        tenant_id: &TenantId,
        filter: &TransactionFilter,
    ) -> ReconResult<Vec<BankTransaction>> {
        self.with_book(tenant_id, |book| {
            Ok(book
                .transactions
                .values()
                .filter(|transaction| filter.matches(transaction))
                .cloned()
                .collect())
        })
    }

    async fn list_unmatched_transactions(
        &self,
        tenant_id: &TenantId,
    ) -> ReconResult<Vec<BankTransaction>> {
        self.with_book(tenant_id, |book| {
            let claimed: HashSet<&str> = book
                .confirmed()
                .map(|m| m.transaction_id.as_str())
                .collect();
            Ok(book
                .transactions
                .values()
                .filter(|t| !claimed.contains(t.id.as_str()))
                .cloned()
                .collect())
        })
    }

    async fn delete_transaction(
        &self,
        tenant_id: &TenantId,
        transaction_id: &str,
    ) -> ReconResult<()> {
        self.with_book_mut(tenant_id, |book| {
            if !book.transactions.contains_key(transaction_id) {
                return Err(ReconError::TransactionNotFound(transaction_id.to_string()));
            }
            if book.transaction_claimed(transaction_id) {
                return Err(ReconError::InvalidState(format!(
                    "Transaction {} is claimed by a confirmed match and cannot be deleted",
                    transaction_id
                )));
            }

            book.remove_proposals_where(|m| m.transaction_id == transaction_id);
            book.transactions.remove(transaction_id);
            Ok(())
        })
    }

    async fn create_proposed_matches(
        &self,
        tenant_id: &TenantId,
        matches: &[Match],
    ) -> ReconResult<()> {
        self.with_book_mut(tenant_id, |book| {
            let active_pairs: HashSet<(&str, &str)> = book
                .matches
                .values()
                .map(|m| (m.invoice_id.as_str(), m.transaction_id.as_str()))
                .collect();
            let mut batch_invoices = HashSet::new();
            let mut batch_transactions = HashSet::new();

            for proposal in matches {
                ensure_owner(tenant_id, &proposal.tenant_id, "Match", &proposal.id)?;
                let invoice_id = proposal.invoice_id.as_str();
                let transaction_id = proposal.transaction_id.as_str();
                if proposal.status != MatchStatus::Proposed {
                    return Err(ReconError::InvalidState(format!(
                        "Match {} must be created as proposed",
                        proposal.id
                    )));
                }
                if book.matches.contains_key(&proposal.id) {
                    return Err(ReconError::Conflict(format!(
                        "Match with ID '{}' already exists",
                        proposal.id
                    )));
                }

                let invoice = book
                    .invoices
                    .get(invoice_id)
                    .ok_or_else(|| ReconError::InvoiceNotFound(invoice_id.to_string()))?;
                if !book.transactions.contains_key(transaction_id) {
                    return Err(ReconError::TransactionNotFound(transaction_id.to_string()));
                }

                if !invoice.is_open()
                    || book.invoice_claimed(invoice_id)
                    || book.transaction_claimed(transaction_id)
                {
                    return Err(ReconError::Conflict(format!(
                        "Invoice {} or transaction {} is already claimed by a confirmed match",
                        invoice_id, transaction_id
                    )));
                }

                if active_pairs.contains(&(invoice_id, transaction_id)) {
                    return Err(ReconError::Conflict(format!(
                        "Invoice {} and transaction {} already have an active match",
                        invoice_id, transaction_id
                    )));
                }

                if !batch_invoices.insert(invoice_id)
                    || !batch_transactions.insert(transaction_id)
                {
                    return Err(ReconError::Conflict(format!(
                        "Batch claims invoice {} or transaction {} twice",
                        invoice_id, transaction_id
                    )));
                }
            }

            for proposal in matches {
                book.matches.insert(proposal.id.clone(), proposal.clone());
            }
            Ok(())
        })
    }

    async fn confirm_match(
        &self,
        tenant_id: &TenantId,
        match_id: &str,
        confirmed_at: DateTime<Utc>,
    ) -> ReconResult<(Match, Invoice)> {
        self.with_book_mut(tenant_id, |book| {
            let mut confirmed = book
                .matches
                .get(match_id)
                .cloned()
                .ok_or_else(|| ReconError::MatchNotFound(match_id.to_string()))?;
            confirmed.confirm(confirmed_at)?;

            let mut invoice = book
                .invoices
                .get(&confirmed.invoice_id)
                .cloned()
                .ok_or_else(|| ReconError::InvoiceNotFound(confirmed.invoice_id.clone()))?;
            if !invoice.is_open() || book.invoice_claimed(&invoice.id) {
                return Err(ReconError::InvalidState(format!(
                    "Invoice {} is already matched",
                    invoice.id
                )));
            }
            if book.transaction_claimed(&confirmed.transaction_id) {
                return Err(ReconError::Conflict(format!(
                    "Transaction {} is already claimed by a confirmed match",
                    confirmed.transaction_id
                )));
            }

            invoice.status = InvoiceStatus::Matched;
            book.invoices.insert(invoice.id.clone(), invoice.clone());
            book.matches.insert(confirmed.id.clone(), confirmed.clone());
            Ok((confirmed, invoice))
        })
    }

    async fn get_match(&self, tenant_id: &TenantId, match_id: &str) -> ReconResult<Option<Match>> {
        self.with_book(tenant_id, |book| Ok(book.matches.get(match_id).cloned()))
    }

    async fn list_matches(
        &self,
        tenant_id: &TenantId,
        filter: &MatchFilter,
    ) -> ReconResult<Vec<Match>> {
        self.with_book(tenant_id, |book| {
            let mut matches: Vec<Match> = book
                .matches
                .values()
                .filter(|m| filter.matches(m))
                .cloned()
                .collect();
            matches.sort_by(|a, b| {
                b.score
                    .cmp(&a.score)
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            });
            Ok(matches)
        })
    }

    async fn delete_proposed_matches(
        &self,
        tenant_id: &TenantId,
        match_ids: &[String],
    ) -> ReconResult<usize> {
        self.with_book_mut(tenant_id, |book| {
            for match_id in match_ids {
                let existing = book
                    .matches
                    .get(match_id)
                    .ok_or_else(|| ReconError::MatchNotFound(match_id.clone()))?;
                if existing.is_confirmed() {
                    return Err(ReconError::InvalidState(format!(
                        "Match {} is confirmed and cannot be deleted",
                        match_id
                    )));
                }
            }

            Ok(match_ids
                .iter()
                .filter(|id| book.matches.remove(id.as_str()).is_some())
                .count())
        })
    }

    async fn get_idempotency_record(
        &self,
        tenant_id: &TenantId,
        key: &str,
    ) -> ReconResult<Option<IdempotencyRecord>> {
        self.with_book(tenant_id, |book| Ok(book.idempotency.get(key).cloned()))
    }

    async fn commit_guarded_import(
        &self,
        tenant_id: &TenantId,
        record: &IdempotencyRecord,
        transactions: &[BankTransaction],
    ) -> ReconResult<()> {
        self.with_book_mut(tenant_id, |book| {
            ensure_owner(
                tenant_id,
                &record.tenant_id,
                "Idempotency record",
                &record.key,
            )?;
            if book.idempotency.contains_key(&record.key) {
                return Err(ReconError::Conflict(format!(
                    "Idempotency key '{}' already recorded",
                    record.key
                )));
            }
            book.check_new_transactions(tenant_id, transactions)?;

            for transaction in transactions {
                book.transactions
                    .insert(transaction.id.clone(), transaction.clone());
            }
            book.idempotency.insert(record.key.clone(), record.clone());
            Ok(())
        })
    }
}
