//! Match lifecycle: persisting proposals and confirming them

use chrono::Utc;
use std::collections::{HashMap, HashSet};

use crate::reconciliation::assignment::Candidate;
use crate::traits::*;
use crate::types::*;

/// Outcome of persisting one assignment run
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalOutcome {
    /// Matches created by this run
    pub proposed: Vec<Match>,
    /// Existing proposals for pairs the run selected again
    pub already_proposed: Vec<Match>,
}

/// Result of a successful confirmation
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub confirmed: Match,
    pub invoice: Invoice,
}

/// Owns every write to matches and the invoice status flip on confirmation
pub struct MatchLifecycleManager<S: ReconciliationStorage> {
    storage: S,
}

impl<S: ReconciliationStorage> MatchLifecycleManager<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Persist accepted candidates as `proposed` matches in one atomic batch.
    ///
    /// Pairs that already carry a proposal are reported, not duplicated.
    /// Everything else is written together or not at all; a concurrent run
    /// that claimed the same pair first makes this batch fail with `Conflict`.
    pub async fn propose(
        &self,
        tenant_id: &TenantId,
        candidates: &[Candidate],
    ) -> ReconResult<ProposalOutcome> {
        let existing: HashMap<(String, String), Match> = self
            .storage
            .list_matches(tenant_id, &MatchFilter::status(MatchStatus::Proposed))
            .await?
            .into_iter()
            .map(|m| ((m.invoice_id.clone(), m.transaction_id.clone()), m))
            .collect();

        let mut proposed = Vec::new();
        let mut already_proposed = Vec::new();

        for candidate in candidates {
            if candidate.invoice.tenant_id != *tenant_id
                || candidate.transaction.tenant_id != *tenant_id
            {
                return Err(ReconError::Validation(format!(
                    "Candidate {}/{} does not belong to tenant {}",
                    candidate.invoice.id, candidate.transaction.id, tenant_id
                )));
            }

            let pair = (
                candidate.invoice.id.clone(),
                candidate.transaction.id.clone(),
            );
            match existing.get(&pair) {
                Some(current) => already_proposed.push(current.clone()),
                None => proposed.push(Match::proposed(
                    tenant_id.clone(),
                    pair.0,
                    pair.1,
                    candidate.breakdown.total_decimal(),
                )),
            }
        }

        if !proposed.is_empty() {
            self.storage
                .create_proposed_matches(tenant_id, &proposed)
                .await?;
        }

        tracing::info!(
            tenant_id = %tenant_id,
            proposed = proposed.len(),
            already_proposed = already_proposed.len(),
            "match proposals persisted"
        );

        Ok(ProposalOutcome {
            proposed,
            already_proposed,
        })
    }

    /// Confirm a proposed match and mark its invoice `matched`, atomically
    pub async fn confirm(&self, tenant_id: &TenantId, match_id: &str) -> ReconResult<Confirmation> {
        let (confirmed, invoice) = self
            .storage
            .confirm_match(tenant_id, match_id, Utc::now())
            .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            match_id,
            invoice_id = %invoice.id,
            transaction_id = %confirmed.transaction_id,
            "match confirmed"
        );

        Ok(Confirmation { confirmed, invoice })
    }

    /// Get a match by ID, returning an error if not found
    pub async fn get_match(&self, tenant_id: &TenantId, match_id: &str) -> ReconResult<Match> {
        self.storage
            .get_match(tenant_id, match_id)
            .await?
            .ok_or_else(|| ReconError::MatchNotFound(match_id.to_string()))
    }

    /// List matches, highest score first
    pub async fn list_matches(
        &self,
        tenant_id: &TenantId,
        filter: &MatchFilter,
    ) -> ReconResult<Vec<Match>> {
        self.storage.list_matches(tenant_id, filter).await
    }

    /// Proposed matches for an invoice, highest score first
    pub async fn candidates_for_invoice(
        &self,
        tenant_id: &TenantId,
        invoice_id: &str,
        limit: usize,
    ) -> ReconResult<Vec<Match>> {
        let filter = MatchFilter {
            status: Some(MatchStatus::Proposed),
            invoice_id: Some(invoice_id.to_string()),
            ..Default::default()
        };
        let mut matches = self.storage.list_matches(tenant_id, &filter).await?;
        matches.truncate(limit);
        Ok(matches)
    }

    /// Proposed matches for a bank transaction, highest score first
    pub async fn candidates_for_transaction(
        &self,
        tenant_id: &TenantId,
        transaction_id: &str,
        limit: usize,
    ) -> ReconResult<Vec<Match>> {
        let filter = MatchFilter {
            status: Some(MatchStatus::Proposed),
            transaction_id: Some(transaction_id.to_string()),
            ..Default::default()
        };
        let mut matches = self.storage.list_matches(tenant_id, &filter).await?;
        matches.truncate(limit);
        Ok(matches)
    }

    /// Delete proposals that can no longer be confirmed: their invoice is not
    /// open any more, or either side is claimed by a confirmed match.
    /// Only runs when a caller asks for it; reconciliation never prunes.
    pub async fn prune_stale_proposals(&self, tenant_id: &TenantId) -> ReconResult<usize> {
        let confirmed = self
            .storage
            .list_matches(tenant_id, &MatchFilter::status(MatchStatus::Confirmed))
            .await?;
        let claimed_invoices: HashSet<&str> =
            confirmed.iter().map(|m| m.invoice_id.as_str()).collect();
        let claimed_transactions: HashSet<&str> = confirmed
            .iter()
            .map(|m| m.transaction_id.as_str())
            .collect();

        let open_invoices: HashSet<String> = self
            .storage
            .list_invoices(tenant_id, &InvoiceFilter::open())
            .await?
            .into_iter()
            .map(|i| i.id)
            .collect();

        let stale: Vec<String> = self
            .storage
            .list_matches(tenant_id, &MatchFilter::status(MatchStatus::Proposed))
            .await?
            .into_iter()
            .filter(|m| {
                !open_invoices.contains(&m.invoice_id)
                    || claimed_invoices.contains(m.invoice_id.as_str())
                    || claimed_transactions.contains(m.transaction_id.as_str())
            })
            .map(|m| m.id)
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        let removed = self
            .storage
            .delete_proposed_matches(tenant_id, &stale)
            .await?;
        tracing::info!(tenant_id = %tenant_id, removed, "stale proposals pruned");
        Ok(removed)
    }
}
