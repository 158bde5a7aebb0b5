//! Reconciliation engine that coordinates imports, matching and confirmation

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::ledger::{BankTransactionManager, InvoiceManager};
use crate::reconciliation::assignment::{Assigner, AssignmentEngine, Candidate};
use crate::reconciliation::explanation::{
    Explanation, ExplanationAnnotator, HttpTextGenerator, MatchContext,
};
use crate::reconciliation::idempotency::{IdempotencyGuard, ImportOutcome};
use crate::reconciliation::lifecycle::{Confirmation, MatchLifecycleManager};
use crate::reconciliation::scorer::{ScoreBreakdown, SimilarityScorer};
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{validate_entity_id, validate_min_score, validate_tenant_name};

/// Outcome of one reconciliation run
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationRun {
    /// Matches created by this run
    pub proposed: Vec<Match>,
    /// Pairs selected again that already had a proposal
    pub already_proposed: Vec<Match>,
    /// Every pair the assignment accepted, with its breakdown
    pub candidates: Vec<Candidate>,
}

impl ReconciliationRun {
    /// Number of newly proposed matches
    pub fn count(&self) -> usize {
        self.proposed.len()
    }
}

/// A match together with its score breakdown and rationale
#[derive(Debug, Clone, PartialEq)]
pub struct MatchExplanation {
    pub matched: Match,
    pub breakdown: ScoreBreakdown,
    pub explanation: Explanation,
}

/// Main reconciliation system that orchestrates all engine operations
pub struct ReconciliationEngine<S: ReconciliationStorage + Clone> {
    storage: S,
    config: EngineConfig,
    invoice_manager: InvoiceManager<S>,
    transaction_manager: BankTransactionManager<S>,
    assignment: AssignmentEngine,
    lifecycle: MatchLifecycleManager<S>,
    idempotency: IdempotencyGuard<S>,
    annotator: ExplanationAnnotator,
}

impl<S: ReconciliationStorage + Clone> ReconciliationEngine<S> {
    /// Create an engine with default configuration
    pub fn new(storage: S) -> Self {
        Self::build(storage, EngineConfig::default())
    }

    /// Create an engine with the given configuration.
    /// When explanations are enabled an HTTP text generator is attached.
    pub fn with_config(storage: S, config: EngineConfig) -> ReconResult<Self> {
        config.validate()?;
        Ok(Self::build(storage, config))
    }

    /// Create an engine with custom validators
    pub fn with_validators(
        storage: S,
        config: EngineConfig,
        invoice_validator: Box<dyn InvoiceValidator>,
        transaction_validator: Box<dyn TransactionValidator>,
    ) -> ReconResult<Self> {
        let mut engine = Self::with_config(storage, config)?;
        engine.invoice_manager =
            InvoiceManager::with_validator(engine.storage.clone(), invoice_validator);
        engine.transaction_manager =
            BankTransactionManager::with_validator(engine.storage.clone(), transaction_validator);
        Ok(engine)
    }

    fn build(storage: S, config: EngineConfig) -> Self {
        let annotator = if config.explanation.enabled {
            ExplanationAnnotator::with_generator(
                config.explanation.clone(),
                Arc::new(HttpTextGenerator::new(&config.explanation)),
            )
        } else {
            ExplanationAnnotator::new(config.explanation.clone())
        };

        Self {
            invoice_manager: InvoiceManager::new(storage.clone()),
            transaction_manager: BankTransactionManager::new(storage.clone()),
            assignment: AssignmentEngine::new(SimilarityScorer::new(config.scoring.clone())),
            lifecycle: MatchLifecycleManager::new(storage.clone()),
            idempotency: IdempotencyGuard::new(storage.clone()),
            annotator,
            storage,
            config,
        }
    }

    /// Replace the text generator used for explanations
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.annotator =
            ExplanationAnnotator::with_generator(self.config.explanation.clone(), generator);
        self
    }

    /// Replace the assignment strategy
    pub fn with_assigner(mut self, assigner: Box<dyn Assigner>) -> Self {
        self.assignment = AssignmentEngine::with_assigner(
            SimilarityScorer::new(self.config.scoring.clone()),
            assigner,
        );
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // Tenant operations
    /// Register a new tenant
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id))]
    pub async fn create_tenant(&self, tenant_id: TenantId, name: &str) -> ReconResult<Tenant> {
        validate_entity_id(tenant_id.as_str(), "Tenant ID")?;
        validate_tenant_name(name)?;

        let tenant = Tenant::new(tenant_id, name.trim().to_string());
        self.storage.save_tenant(&tenant).await?;
        tracing::info!("tenant created");
        Ok(tenant)
    }

    /// Get a tenant by ID, returning an error if not found
    pub async fn get_tenant(&self, tenant_id: &TenantId) -> ReconResult<Tenant> {
        self.storage
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| ReconError::TenantNotFound(tenant_id.to_string()))
    }

    // Invoice operations
    /// Create a new open invoice
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, invoice_id = %params.id))]
    pub async fn create_invoice(
        &self,
        tenant_id: &TenantId,
        params: NewInvoice,
    ) -> ReconResult<Invoice> {
        self.get_tenant(tenant_id).await?;
        self.invoice_manager.create_invoice(tenant_id, params).await
    }

    /// Get an invoice by ID
    pub async fn get_invoice(
        &self,
        tenant_id: &TenantId,
        invoice_id: &str,
    ) -> ReconResult<Invoice> {
        self.get_tenant(tenant_id).await?;
        self.invoice_manager
            .get_invoice_required(tenant_id, invoice_id)
            .await
    }

    /// List invoices matching a filter
    pub async fn list_invoices(
        &self,
        tenant_id: &TenantId,
        filter: &InvoiceFilter,
    ) -> ReconResult<Vec<Invoice>> {
        self.get_tenant(tenant_id).await?;
        self.invoice_manager.list_invoices(tenant_id, filter).await
    }

    /// Delete an invoice while it is still open
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn delete_invoice(&self, tenant_id: &TenantId, invoice_id: &str) -> ReconResult<()> {
        self.get_tenant(tenant_id).await?;
        self.invoice_manager
            .delete_invoice(tenant_id, invoice_id)
            .await
    }

    // Bank transaction operations
    /// Import a batch of bank transactions.
    ///
    /// With a key the import is idempotent: replaying the same key and
    /// payload returns the first response unchanged, a different payload
    /// under the same key fails with `Conflict`. Without a key the batch is
    /// imported atomically every time. An empty batch is rejected before the
    /// key is looked at, so it never claims the key.
    #[tracing::instrument(
        skip_all,
        fields(tenant_id = %tenant_id, key = ?key, lines = lines.len())
    )]
    pub async fn import_transactions(
        &self,
        tenant_id: &TenantId,
        key: Option<&str>,
        lines: &[NewBankTransaction],
    ) -> ReconResult<ImportOutcome> {
        self.get_tenant(tenant_id).await?;
        if lines.is_empty() {
            return Err(ReconError::Validation(
                "Import must contain at least one transaction".to_string(),
            ));
        }

        match key {
            Some(key) => {
                self.idempotency
                    .guarded_import(tenant_id, key, lines, |payload| {
                        self.transaction_manager
                            .build_transactions(tenant_id, payload)
                    })
                    .await
            }
            None => {
                let result = self.transaction_manager.import(tenant_id, lines).await?;
                let response = serde_json::to_string(&result)?;
                Ok(ImportOutcome {
                    result,
                    response,
                    replayed: false,
                })
            }
        }
    }

    /// Get a bank transaction by ID
    pub async fn get_transaction(
        &self,
        tenant_id: &TenantId,
        transaction_id: &str,
    ) -> ReconResult<BankTransaction> {
        self.get_tenant(tenant_id).await?;
        self.transaction_manager
            .get_transaction_required(tenant_id, transaction_id)
            .await
    }

    pub async fn list_transactions(
        &self,
        tenant_id: &TenantId,
        filter: &TransactionFilter,
    ) -> ReconResult<Vec<BankTransaction>> {
        self.get_tenant(tenant_id).await?;
        self.transaction_manager
            .list_transactions(tenant_id, filter)
            .await
    }

    /// Transactions not claimed by a confirmed match
    pub async fn list_unmatched_transactions(
        &self,
        tenant_id: &TenantId,
    ) -> ReconResult<Vec<BankTransaction>> {
        self.get_tenant(tenant_id).await?;
        self.transaction_manager.list_unmatched(tenant_id).await
    }

    #[tracing::instrument(
        skip_all,
        fields(tenant_id = %tenant_id, transaction_id = %transaction_id)
    )]
    pub async fn delete_transaction(
        &self,
        tenant_id: &TenantId,
        transaction_id: &str,
    ) -> ReconResult<()> {
        self.get_tenant(tenant_id).await?;
        self.transaction_manager
            .delete_transaction(tenant_id, transaction_id)
            .await
    }

    // Matching operations
    /// Score open invoices against unmatched transactions and persist the
    /// accepted pairs as proposals. `min_score` defaults to the configured
    /// threshold.
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, min_score = ?min_score))]
    pub async fn reconcile(
        &self,
        tenant_id: &TenantId,
        min_score: Option<f64>,
    ) -> ReconResult<ReconciliationRun> {
        self.get_tenant(tenant_id).await?;
        let min_score = min_score.unwrap_or(self.config.min_score);
        validate_min_score(min_score)?;

        let invoices = self.invoice_manager.list_open_invoices(tenant_id).await?;
        let transactions = self.transaction_manager.list_unmatched(tenant_id).await?;
        let candidates = self.assignment.assign(&invoices, &transactions, min_score)?;
        let outcome = self.lifecycle.propose(tenant_id, &candidates).await?;

        tracing::info!(
            invoices = invoices.len(),
            transactions = transactions.len(),
            proposed = outcome.proposed.len(),
            already_proposed = outcome.already_proposed.len(),
            "reconciliation run complete"
        );

        Ok(ReconciliationRun {
            proposed: outcome.proposed,
            already_proposed: outcome.already_proposed,
            candidates,
        })
    }

    /// Confirm a proposed match and mark its invoice matched
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, match_id = %match_id))]
    pub async fn confirm_match(
        &self,
        tenant_id: &TenantId,
        match_id: &str,
    ) -> ReconResult<Confirmation> {
        self.get_tenant(tenant_id).await?;
        self.lifecycle.confirm(tenant_id, match_id).await
    }

    /// Score breakdown and rationale for an existing match.
    /// Never fails because of the text generator.
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, match_id = %match_id))]
    pub async fn explain_match(
        &self,
        tenant_id: &TenantId,
        match_id: &str,
    ) -> ReconResult<MatchExplanation> {
        self.get_tenant(tenant_id).await?;
        let matched = self.lifecycle.get_match(tenant_id, match_id).await?;
        let invoice = self
            .invoice_manager
            .get_invoice_required(tenant_id, &matched.invoice_id)
            .await?;
        let transaction = self
            .transaction_manager
            .get_transaction_required(tenant_id, &matched.transaction_id)
            .await?;

        let breakdown = self.assignment.scorer().score(&invoice, &transaction);
        let explanation = self
            .annotator
            .explain(
                &breakdown,
                MatchContext {
                    invoice: &invoice,
                    transaction: &transaction,
                },
            )
            .await;

        Ok(MatchExplanation {
            matched,
            breakdown,
            explanation,
        })
    }

    /// Get a match by ID
    pub async fn get_match(&self, tenant_id: &TenantId, match_id: &str) -> ReconResult<Match> {
        self.get_tenant(tenant_id).await?;
        self.lifecycle.get_match(tenant_id, match_id).await
    }

    /// List matches, highest score first
    pub async fn list_matches(
        &self,
        tenant_id: &TenantId,
        filter: &MatchFilter,
    ) -> ReconResult<Vec<Match>> {
        self.get_tenant(tenant_id).await?;
        self.lifecycle.list_matches(tenant_id, filter).await
    }

    /// Top proposals for an invoice
    pub async fn candidates_for_invoice(
        &self,
        tenant_id: &TenantId,
        invoice_id: &str,
        limit: usize,
    ) -> ReconResult<Vec<Match>> {
        self.get_tenant(tenant_id).await?;
        self.invoice_manager
            .get_invoice_required(tenant_id, invoice_id)
            .await?;
        self.lifecycle
            .candidates_for_invoice(tenant_id, invoice_id, limit)
            .await
    }

    /// Top proposals for a bank transaction
    pub async fn candidates_for_transaction(
        &self,
        tenant_id: &TenantId,
        transaction_id: &str,
        limit: usize,
    ) -> ReconResult<Vec<Match>> {
        self.get_tenant(tenant_id).await?;
        self.transaction_manager
            .get_transaction_required(tenant_id, transaction_id)
            .await?;
        self.lifecycle
            .candidates_for_transaction(tenant_id, transaction_id, limit)
            .await
    }

    /// Delete proposals that can no longer be confirmed
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id))]
    pub async fn prune_stale_proposals(&self, tenant_id: &TenantId) -> ReconResult<usize> {
        self.get_tenant(tenant_id).await?;
        self.lifecycle.prune_stale_proposals(tenant_id).await
    }
}
