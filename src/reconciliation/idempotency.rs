//! Idempotent bulk imports
//!
//! A keyed import runs at most once per tenant. Replaying the same key with
//! the same payload returns the stored response byte for byte; the same key
//! with a different payload is a `Conflict`. The check-then-write sequence is
//! made safe against concurrent callers by the storage layer's unique
//! (tenant, key) constraint, not by a lock held here.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_idempotency_key;

/// Result of a guarded import
#[derive(Debug, Clone, PartialEq)]
pub struct ImportOutcome {
    pub result: ImportResult,
    /// Serialized response, identical across replays
    pub response: String,
    /// True when the stored response was returned without importing
    pub replayed: bool,
}

/// Hex SHA-256 of the canonical JSON form of a payload.
///
/// Going through `serde_json::Value` sorts object keys, so field order in
/// the caller's structs does not affect the hash.
pub fn payload_hash<P: Serialize + ?Sized>(payload: &P) -> ReconResult<String> {
    let canonical = serde_json::to_value(payload)?;
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

pub struct IdempotencyGuard<S: ReconciliationStorage> {
    storage: S,
}

impl<S: ReconciliationStorage> IdempotencyGuard<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Run `import_fn` at most once for `(tenant_id, key)`.
    ///
    /// `import_fn` only builds the transactions; they are written together
    /// with the idempotency record in a single atomic storage call.
    pub async fn guarded_import<P, F>(
        &self,
        tenant_id: &TenantId,
        key: &str,
        payload: &P,
        import_fn: F,
    ) -> ReconResult<ImportOutcome>
    where
        P: Serialize + ?Sized + Sync,
        F: FnOnce(&P) -> ReconResult<Vec<BankTransaction>> + Send,
    {
        validate_idempotency_key(key)?;
        let request_hash = payload_hash(payload)?;

        if let Some(record) = self.storage.get_idempotency_record(tenant_id, key).await? {
            return replay(record, &request_hash);
        }

        let transactions = import_fn(payload)?;
        let result = ImportResult::from_transactions(&transactions);
        let response = serde_json::to_string(&result)?;
        let record = IdempotencyRecord::new(
            tenant_id.clone(),
            key.to_string(),
            request_hash.clone(),
            response.clone(),
        );

        match self
            .storage
            .commit_guarded_import(tenant_id, &record, &transactions)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    tenant_id = %tenant_id,
                    key,
                    count = result.count,
                    "guarded import committed"
                );
                Ok(ImportOutcome {
                    result,
                    response,
                    replayed: false,
                })
            }
            Err(err) if err.is_conflict() => {
                // Lost a race on the key, or hit a duplicate external id.
                match self.storage.get_idempotency_record(tenant_id, key).await? {
                    Some(record) => replay(record, &request_hash),
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }
}

fn replay(record: IdempotencyRecord, request_hash: &str) -> ReconResult<ImportOutcome> {
    if record.request_hash != request_hash {
        return Err(ReconError::Conflict(format!(
            "Idempotency key '{}' already used with a different payload",
            record.key
        )));
    }

    tracing::warn!(
        tenant_id = %record.tenant_id,
        key = %record.key,
        "idempotent replay, returning stored response"
    );
    let result: ImportResult = serde_json::from_str(&record.response)?;
    Ok(ImportOutcome {
        result,
        response: record.response,
        replayed: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::MemoryStorage;
    use bigdecimal::BigDecimal;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn line(amount: i64, description: &str) -> NewBankTransaction {
        NewBankTransaction::new(
            BigDecimal::from(amount),
            "USD",
            Utc.with_ymd_and_hms(2024, 1, 20, 10, 0, 0).unwrap(),
        )
        .description(description)
    }

    fn build(
        tenant_id: &TenantId,
        payload: &[NewBankTransaction],
    ) -> ReconResult<Vec<BankTransaction>> {
        Ok(payload
            .iter()
            .cloned()
            .map(|l| BankTransaction::new(tenant_id.clone(), l, "USD".to_string()))
            .collect())
    }

    async fn storage_with_tenant(id: &str) -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage
            .save_tenant(&Tenant::new(TenantId::new(id), id.to_string()))
            .await
            .unwrap();
        storage
    }

    #[test]
    fn test_hash_is_stable_and_content_sensitive() {
        let a = vec![line(100, "rent")];
        let b = vec![line(100, "rent")];
        let c = vec![line(101, "rent")];
        assert_eq!(payload_hash(&a).unwrap(), payload_hash(&b).unwrap());
        assert_ne!(payload_hash(&a).unwrap(), payload_hash(&c).unwrap());
        assert_eq!(payload_hash(&a).unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_replay_skips_import_fn() {
        let storage = storage_with_tenant("t1").await;
        let guard = IdempotencyGuard::new(storage.clone());
        let tenant = TenantId::new("t1");
        let payload = vec![line(100, "rent"), line(250, "utilities")];
        let calls = AtomicUsize::new(0);

        let first = guard
            .guarded_import(&tenant, "key-1", payload.as_slice(), |p| {
                calls.fetch_add(1, Ordering::SeqCst);
                build(&tenant, p)
            })
            .await
            .unwrap();
        let second = guard
            .guarded_import(&tenant, "key-1", payload.as_slice(), |p| {
                calls.fetch_add(1, Ordering::SeqCst);
                build(&tenant, p)
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.response, second.response);
        assert_eq!(first.result.count, 2);
        let stored = storage
            .list_transactions(&tenant, &TransactionFilter::default())
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_different_payload_conflicts_without_running() {
        let storage = storage_with_tenant("t1").await;
        let guard = IdempotencyGuard::new(storage.clone());
        let tenant = TenantId::new("t1");

        let payload = [line(100, "rent")];
        guard
            .guarded_import(&tenant, "key-1", payload.as_slice(), |p| build(&tenant, p))
            .await
            .unwrap();

        let changed = [line(999, "rent")];
        let err = guard
            .guarded_import(&tenant, "key-1", changed.as_slice(), |_| {
                panic!("import must not run on a conflicting key")
            })
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_failed_import_leaves_no_record() {
        let storage = storage_with_tenant("t1").await;
        let guard = IdempotencyGuard::new(storage.clone());
        let tenant = TenantId::new("t1");
        let payload = [line(100, "rent")];

        let err = guard
            .guarded_import(&tenant, "key-1", payload.as_slice(), |_| {
                Err(ReconError::Validation("bad line".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::Validation(_)));
        assert!(storage
            .get_idempotency_record(&tenant, "key-1")
            .await
            .unwrap()
            .is_none());

        let retried = guard
            .guarded_import(&tenant, "key-1", payload.as_slice(), |p| build(&tenant, p))
            .await
            .unwrap();
        assert!(!retried.replayed);
    }
}
