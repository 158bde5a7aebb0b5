//! One-to-one assignment of invoices to bank transactions
//!
//! The [`AssignmentEngine`] scores every invoice x transaction pair, drops
//! pairs under the threshold and hands the rest to an [`Assigner`], which
//! picks a conflict-free subset. [`GreedyAssigner`] is the default; any
//! other strategy (for example an optimal bipartite assignment) can be
//! plugged in without touching the scorer or the lifecycle manager.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::reconciliation::scorer::{ScoreBreakdown, SimilarityScorer};
use crate::types::*;
use crate::utils::validation::validate_min_score;

/// A scored pair, addressed by position in the engine's input slices
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPair {
    pub invoice_index: usize,
    pub transaction_index: usize,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// An accepted invoice/transaction pairing produced by an assignment run
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub invoice: Invoice,
    pub transaction: BankTransaction,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Strategy that selects a disjoint subset of scored pairs
pub trait Assigner: Send + Sync {
    /// Return accepted pairs. No invoice and no transaction may appear twice.
    fn select(
        &self,
        pairs: Vec<ScoredPair>,
        invoices: &[Invoice],
        transactions: &[BankTransaction],
    ) -> Vec<ScoredPair>;
}

/// Greedy descending-score assignment.
///
/// Pairs are visited from the highest score down; ties go to the earlier
/// invoice date, then the lower invoice id, then the lower transaction id.
/// A pair is accepted when neither side has been claimed yet. Not globally
/// optimal.
pub struct GreedyAssigner;

impl GreedyAssigner {
    fn compare(
        a: &ScoredPair,
        b: &ScoredPair,
        invoices: &[Invoice],
        transactions: &[BankTransaction],
    ) -> Ordering {
        let (inv_a, inv_b) = (&invoices[a.invoice_index], &invoices[b.invoice_index]);
        let (tx_a, tx_b) = (
            &transactions[a.transaction_index],
            &transactions[b.transaction_index],
        );

        b.score
            .total_cmp(&a.score)
            .then_with(|| inv_a.invoice_date.cmp(&inv_b.invoice_date))
            .then_with(|| inv_a.id.cmp(&inv_b.id))
            .then_with(|| tx_a.id.cmp(&tx_b.id))
    }
}

impl Assigner for GreedyAssigner {
    fn select(
        &self,
        mut pairs: Vec<ScoredPair>,
        invoices: &[Invoice],
        transactions: &[BankTransaction],
    ) -> Vec<ScoredPair> {
        pairs.sort_by(|a, b| Self::compare(a, b, invoices, transactions));

        let mut claimed_invoices: HashSet<&str> = HashSet::new();
        let mut claimed_transactions: HashSet<&str> = HashSet::new();
        let mut accepted = Vec::new();

        for pair in pairs {
            let invoice_id = invoices[pair.invoice_index].id.as_str();
            let transaction_id = transactions[pair.transaction_index].id.as_str();

            if claimed_invoices.contains(invoice_id)
                || claimed_transactions.contains(transaction_id)
            {
                tracing::trace!(
                    invoice_id,
                    transaction_id,
                    score = pair.score,
                    "pair skipped, side already claimed"
                );
                continue;
            }

            claimed_invoices.insert(invoice_id);
            claimed_transactions.insert(transaction_id);
            tracing::debug!(
                invoice_id,
                transaction_id,
                score = pair.score,
                "pair accepted"
            );
            accepted.push(pair);
        }

        accepted
    }
}

/// Scores pairs and delegates selection to an [`Assigner`]. Has no side effects.
pub struct AssignmentEngine {
    scorer: SimilarityScorer,
    assigner: Box<dyn Assigner>,
}

impl AssignmentEngine {
    /// Create an engine using greedy assignment
    pub fn new(scorer: SimilarityScorer) -> Self {
        Self {
            scorer,
            assigner: Box::new(GreedyAssigner),
        }
    }

    /// Create an engine with a custom assignment strategy
    pub fn with_assigner(scorer: SimilarityScorer, assigner: Box<dyn Assigner>) -> Self {
        Self { scorer, assigner }
    }

    pub fn scorer(&self) -> &SimilarityScorer {
        &self.scorer
    }

    /// Compute a conflict-free set of candidates scoring at least `min_score`.
    ///
    /// Costs O(n*m log(n*m)); callers with large books should narrow the
    /// inputs (for example by date window) first.
    pub fn assign(
        &self,
        invoices: &[Invoice],
        transactions: &[BankTransaction],
        min_score: f64,
    ) -> ReconResult<Vec<Candidate>> {
        validate_min_score(min_score)?;

        let mut pairs = Vec::new();
        for (invoice_index, invoice) in invoices.iter().enumerate() {
            for (transaction_index, transaction) in transactions.iter().enumerate() {
                let breakdown = self.scorer.score(invoice, transaction);
                let score = breakdown.total();
                if score >= min_score {
                    pairs.push(ScoredPair {
                        invoice_index,
                        transaction_index,
                        score,
                        breakdown,
                    });
                }
            }
        }

        let qualifying = pairs.len();
        let accepted = self.assigner.select(pairs, invoices, transactions);
        tracing::debug!(
            invoices = invoices.len(),
            transactions = transactions.len(),
            qualifying,
            accepted = accepted.len(),
            "assignment complete"
        );

        Ok(accepted
            .into_iter()
            .map(|pair| Candidate {
                invoice: invoices[pair.invoice_index].clone(),
                transaction: transactions[pair.transaction_index].clone(),
                score: pair.score,
                breakdown: pair.breakdown,
            })
            .collect())
    }
}

impl Default for AssignmentEngine {
    fn default() -> Self {
        Self::new(SimilarityScorer::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::collections::HashSet;

    fn tenant() -> TenantId {
        TenantId::new("acme")
    }

    fn invoice(id: &str, amount: i64, day: u32) -> Invoice {
        Invoice::new(
            tenant(),
            NewInvoice::new(
                id,
                BigDecimal::from(amount),
                "USD",
                NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            ),
        )
    }

    fn transaction(id: &str, amount: i64, day: u32) -> BankTransaction {
        let mut tx = BankTransaction::new(
            tenant(),
            NewBankTransaction::new(
                BigDecimal::from(amount),
                "USD",
                Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap(),
            ),
            "USD".to_string(),
        );
        tx.id = id.to_string();
        tx
    }

    fn ids(candidates: &[Candidate]) -> Vec<(String, String)> {
        candidates
            .iter()
            .map(|c| (c.invoice.id.clone(), c.transaction.id.clone()))
            .collect()
    }

    fn assert_disjoint(candidates: &[Candidate]) {
        let mut invoices = HashSet::new();
        let mut transactions = HashSet::new();
        for c in candidates {
            assert!(
                invoices.insert(c.invoice.id.clone()),
                "invoice claimed twice"
            );
            assert!(
                transactions.insert(c.transaction.id.clone()),
                "transaction claimed twice"
            );
        }
    }

    #[test]
    fn test_best_pair_wins_contested_transaction() {
        let invoices = vec![invoice("inv-a", 1000, 10), invoice("inv-b", 1000, 14)];
        let transactions = vec![transaction("tx-1", 1000, 10)];

        let result = AssignmentEngine::default()
            .assign(&invoices, &transactions, 50.0)
            .unwrap();

        assert_eq!(
            ids(&result),
            vec![("inv-a".to_string(), "tx-1".to_string())]
        );
        assert_eq!(result[0].score, 80.0);
    }

    #[test]
    fn test_greedy_is_not_globally_optimal_but_deterministic() {
        // inv-a/tx-1 is the single best pair, which leaves inv-b with tx-2 only.
        let invoices = vec![invoice("inv-a", 1000, 10), invoice("inv-b", 1000, 11)];
        let transactions = vec![transaction("tx-1", 1000, 10), transaction("tx-2", 990, 11)];

        let first = AssignmentEngine::default()
            .assign(&invoices, &transactions, 0.0)
            .unwrap();
        let second = AssignmentEngine::default()
            .assign(&invoices, &transactions, 0.0)
            .unwrap();

        assert_eq!(ids(&first), ids(&second));
        assert_eq!(
            ids(&first),
            vec![
                ("inv-a".to_string(), "tx-1".to_string()),
                ("inv-b".to_string(), "tx-2".to_string()),
            ]
        );
        assert_disjoint(&first);
    }

    #[test]
    fn test_ties_break_on_invoice_date_then_ids() {
        // Same score for every pair: the earliest invoice and lowest ids win.
        let invoices = vec![invoice("inv-z", 500, 12), invoice("inv-y", 500, 12)];
        let transactions = vec![transaction("tx-9", 500, 12), transaction("tx-1", 500, 12)];

        let result = AssignmentEngine::default()
            .assign(&invoices, &transactions, 50.0)
            .unwrap();

        assert_eq!(
            ids(&result),
            vec![
                ("inv-y".to_string(), "tx-1".to_string()),
                ("inv-z".to_string(), "tx-9".to_string()),
            ]
        );
    }

    #[test]
    fn test_threshold_excludes_weak_pairs() {
        let invoices = vec![invoice("inv-a", 1000, 1)];
        let transactions = vec![transaction("tx-1", 950, 6)];

        let engine = AssignmentEngine::default();
        let strict = engine.assign(&invoices, &transactions, 50.0).unwrap();
        assert!(strict.is_empty());
        let relaxed = engine.assign(&invoices, &transactions, 45.0).unwrap();
        assert_eq!(relaxed.len(), 1);
    }

    #[test]
    fn test_lowering_threshold_keeps_accepted_pairs() {
        let invoices: Vec<Invoice> = (0..6)
            .map(|i| invoice(&format!("inv-{}", i), 100 + i * 7, 1 + i as u32 * 3))
            .collect();
        let transactions: Vec<BankTransaction> = (0..6)
            .map(|i| transaction(&format!("tx-{}", i), 100 + i * 9, 2 + i as u32 * 2))
            .collect();

        let engine = AssignmentEngine::default();
        let mut previous: Vec<(String, String)> = Vec::new();
        for threshold in [90.0, 80.0, 70.0, 60.0, 50.0, 40.0, 30.0, 0.0] {
            let result = engine.assign(&invoices, &transactions, threshold).unwrap();
            assert_disjoint(&result);
            let current = ids(&result);
            for pair in &previous {
                assert!(
                    current.contains(pair),
                    "pair {:?} dropped at {}",
                    pair, threshold
                );
            }
            previous = current;
        }
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let engine = AssignmentEngine::default();
        assert!(matches!(
            engine.assign(&[], &[], 101.0),
            Err(ReconError::Validation(_))
        ));
    }

    #[test]
    fn test_custom_assigner_is_used() {
        struct RejectAll;
        impl Assigner for RejectAll {
            fn select(
                &self,
                _pairs: Vec<ScoredPair>,
                _invoices: &[Invoice],
                _transactions: &[BankTransaction],
            ) -> Vec<ScoredPair> {
                Vec::new()
            }
        }

        let engine = AssignmentEngine::with_assigner(
            SimilarityScorer::default(),
            Box::new(RejectAll),
        );
        let invoices = [invoice("inv-a", 10, 1)];
        let transactions = [transaction("tx-1", 10, 1)];
        let result = engine.assign(&invoices, &transactions, 0.0).unwrap();
        assert!(result.is_empty());
    }
}
