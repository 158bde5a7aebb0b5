//! # Reconciliation Core
//!
//! A multi-tenant library that reconciles open invoices against imported
//! bank transactions.
//!
//! ## Features
//!
//! - **Deterministic scoring**: amount, date, text and currency sub-scores summing to 0-100
//! - **One-to-one assignment**: greedy descending-score matching above a threshold
//! - **Match lifecycle**: `proposed` to `confirmed`, flipping the invoice to `matched` atomically
//! - **Idempotent imports**: replaying a keyed import returns the stored response
//! - **Explanations**: optional text generation with a deterministic fallback
//! - **Storage abstraction**: database-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust
//! use reconciliation_core::{MemoryStorage, NewInvoice, ReconciliationEngine, TenantId};
//! use bigdecimal::BigDecimal;
//! use chrono::NaiveDate;
//!
//! # async fn run() -> reconciliation_core::ReconResult<()> {
//! let engine = ReconciliationEngine::new(MemoryStorage::new());
//! let tenant = TenantId::new("acme");
//! engine.create_tenant(tenant.clone(), "Acme Ltd").await?;
//! let due = NaiveDate::from_ymd_opt(2024, 1, 20).unwrap();
//! let invoice = NewInvoice::new("INV-001", BigDecimal::from(1000), "USD", due);
//! engine.create_invoice(&tenant, invoice).await?;
//! let run = engine.reconcile(&tenant, None).await?;
//! assert_eq!(run.count(), 0);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod ledger;
pub mod reconciliation;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use crate::config::*;
pub use ledger::*;
pub use reconciliation::*;
pub use traits::*;
pub use types::*;
pub use utils::MemoryStorage;
