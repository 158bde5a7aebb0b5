//! End-to-end reconciliation walkthrough using the in-memory backend
//!
//! Run with `RUST_LOG=reconciliation_core=debug` to see per-pair decisions.

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, TimeZone, Utc};
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use reconciliation_core::{
    MemoryStorage, NewBankTransaction, NewInvoice, ReconError, ReconciliationEngine, TenantId,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Reconciliation Demo ===\n");

    let engine = ReconciliationEngine::new(MemoryStorage::new());
    let tenant = TenantId::new("acme");
    engine.create_tenant(tenant.clone(), "Acme Ltd").await?;

    // 1. Invoices
    println!("1. Creating invoices...");
    let invoices = [
        NewInvoice::new(
            "INV-001",
            BigDecimal::from_str("1000.00")?,
            "USD",
            NaiveDate::from_ymd_opt(2024, 1, 20).ok_or("bad date")?,
        )
        .number("INV-001")
        .description("Monthly subscription INV-001"),
        NewInvoice::new(
            "INV-002",
            BigDecimal::from_str("420.00")?,
            "USD",
            NaiveDate::from_ymd_opt(2024, 1, 15).ok_or("bad date")?,
        )
        .vendor("Globex")
        .description("Globex consulting January"),
    ];
    for invoice in invoices {
        let created = engine.create_invoice(&tenant, invoice).await?;
        println!("   {} {} {}", created.id, created.amount, created.currency);
    }

    // 2. Bank statement, imported twice under one key
    println!("\n2. Importing bank statement...");
    let statement = vec![
        NewBankTransaction::new(
            BigDecimal::from_str("1000.00")?,
            "USD",
            Utc.with_ymd_and_hms(2024, 1, 20, 10, 0, 0)
                .single()
                .ok_or("bad time")?,
        )
        .external_id("bank-7781")
        .description("Payment received INV-001"),
        NewBankTransaction::new(
            BigDecimal::from_str("420.00")?,
            "USD",
            Utc.with_ymd_and_hms(2024, 1, 16, 9, 30, 0)
                .single()
                .ok_or("bad time")?,
        )
        .external_id("bank-7782")
        .description("GLOBEX consulting"),
    ];

    let first = engine
        .import_transactions(&tenant, Some("statement-2024-01"), &statement)
        .await?;
    println!(
        "   first import:  {} (replayed: {})",
        first.response, first.replayed
    );
    let second = engine
        .import_transactions(&tenant, Some("statement-2024-01"), &statement)
        .await?;
    println!(
        "   second import: {} (replayed: {})",
        second.response, second.replayed
    );

    match engine
        .import_transactions(&tenant, Some("statement-2024-01"), &statement[..1])
        .await
    {
        Err(ReconError::Conflict(message)) => println!("   changed payload rejected: {}", message),
        other => println!("   unexpected result: {:?}", other),
    }

    // 3. Reconcile
    println!("\n3. Running reconciliation...");
    let run = engine.reconcile(&tenant, None).await?;
    for candidate in &run.candidates {
        let b = &candidate.breakdown;
        println!(
            "   {} <-> {}: {:.2} (amount {:.2}, date {:.2}, text {:.2}, currency {:.2})",
            candidate.invoice.id,
            candidate.transaction.external_id.as_deref().unwrap_or("-"),
            candidate.score,
            b.amount,
            b.date,
            b.text,
            b.currency
        );
    }
    println!("   {} match(es) proposed", run.count());

    // 4. Explain and confirm the best proposal
    let Some(best) = run.proposed.first() else {
        println!("\nNo proposals to confirm.");
        return Ok(());
    };

    println!("\n4. Explaining match {}...", best.id);
    let explained = engine.explain_match(&tenant, &best.id).await?;
    println!(
        "   [{} confidence] {}",
        explained.explanation.confidence, explained.explanation.text
    );

    println!("\n5. Confirming match...");
    let confirmation = engine.confirm_match(&tenant, &best.id).await?;
    println!(
        "   match {} is {}, invoice {} is {}",
        confirmation.confirmed.id,
        confirmation.confirmed.status,
        confirmation.invoice.id,
        confirmation.invoice.status
    );

    let unmatched = engine.list_unmatched_transactions(&tenant).await?;
    println!("   {} transaction(s) still unmatched", unmatched.len());

    println!("\n=== Demo Complete ===");
    Ok(())
}
