//! Validation utilities

use bigdecimal::{BigDecimal, Signed};

use crate::types::*;

/// Currency assumed when an invoice or import line leaves it blank
pub const DEFAULT_CURRENCY: &str = "USD";

const MAX_ID_LEN: usize = 64;
const MAX_TEXT_LEN: usize = 1000;
const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Validate that an amount is non-negative with at most two decimal places
pub fn validate_amount(amount: &BigDecimal) -> ReconResult<()> {
    if amount.is_negative() {
        return Err(ReconError::Validation(format!(
            "Amount must not be negative, got {}",
            amount
        )));
    }

    let (_, scale) = amount.normalized().as_bigint_and_exponent();
    if scale > 2 {
        return Err(ReconError::Validation(format!(
            "Amount {} has more than two decimal places",
            amount
        )));
    }

    Ok(())
}

/// Validate a three-letter uppercase ISO 4217 code
pub fn validate_currency_code(code: &str) -> ReconResult<()> {
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ReconError::Validation(format!(
            "Currency '{}' is not a three-letter ISO code",
            code
        )));
    }
    Ok(())
}

/// Trim and uppercase a currency code, defaulting blanks to `USD`
pub fn normalize_currency(code: Option<&str>) -> ReconResult<String> {
    let code = code.map(str::trim).unwrap_or_default();
    if code.is_empty() {
        return Ok(DEFAULT_CURRENCY.to_string());
    }

    let normalized = code.to_ascii_uppercase();
    validate_currency_code(&normalized)?;
    Ok(normalized)
}

/// Validate a caller-chosen identifier
pub fn validate_entity_id(id: &str, field: &str) -> ReconResult<()> {
    if id.trim().is_empty() {
        return Err(ReconError::Validation(format!("{} cannot be empty", field)));
    }

    if id.len() > MAX_ID_LEN {
        return Err(ReconError::Validation(format!(
            "{} cannot exceed {} characters",
            field, MAX_ID_LEN
        )));
    }

    if !id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ReconError::Validation(format!(
            "{} can only contain alphanumeric characters, dashes, and underscores",
            field
        )));
    }

    Ok(())
}

/// Validate a free-text field such as a description or vendor name
pub fn validate_free_text(text: &str, field: &str) -> ReconResult<()> {
    if text.len() > MAX_TEXT_LEN {
        return Err(ReconError::Validation(format!(
            "{} cannot exceed {} characters",
            field, MAX_TEXT_LEN
        )));
    }
    Ok(())
}

/// Validate a tenant display name
pub fn validate_tenant_name(name: &str) -> ReconResult<()> {
    if name.trim().is_empty() {
        return Err(ReconError::Validation(
            "Tenant name cannot be empty".to_string(),
        ));
    }
    validate_free_text(name, "Tenant name")
}

/// Validate a caller-supplied idempotency key
pub fn validate_idempotency_key(key: &str) -> ReconResult<()> {
    if key.trim().is_empty() {
        return Err(ReconError::Validation(
            "Idempotency key cannot be empty".to_string(),
        ));
    }

    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ReconError::Validation(format!(
            "Idempotency key cannot exceed {} characters",
            MAX_IDEMPOTENCY_KEY_LEN
        )));
    }

    Ok(())
}

/// Validate a minimum score threshold
pub fn validate_min_score(min_score: f64) -> ReconResult<()> {
    if !min_score.is_finite() || !(0.0..=100.0).contains(&min_score) {
        return Err(ReconError::Validation(format!(
            "Minimum score must be between 0 and 100, got {}",
            min_score
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_amount_rules() {
        let amount = |s: &str| BigDecimal::from_str(s).unwrap();

        assert!(validate_amount(&BigDecimal::from(0)).is_ok());
        assert!(validate_amount(&amount("1000.50")).is_ok());
        assert!(validate_amount(&amount("12.3400")).is_ok());
        assert!(validate_amount(&amount("-1.00")).is_err());
        assert!(validate_amount(&amount("1.005")).is_err());
    }

    #[test]
    fn test_currency_normalization() {
        assert_eq!(normalize_currency(None).unwrap(), "USD");
        assert_eq!(normalize_currency(Some("  ")).unwrap(), "USD");
        assert_eq!(normalize_currency(Some(" eur ")).unwrap(), "EUR");
        assert!(normalize_currency(Some("EURO")).is_err());
        assert!(normalize_currency(Some("U$D")).is_err());
    }

    #[test]
    fn test_entity_id_rules() {
        assert!(validate_entity_id("inv-001", "Invoice ID").is_ok());
        assert!(validate_entity_id("", "Invoice ID").is_err());
        assert!(validate_entity_id("inv 001", "Invoice ID").is_err());
        assert!(validate_entity_id(&"x".repeat(65), "Invoice ID").is_err());
    }

    #[test]
    fn test_min_score_bounds() {
        assert!(validate_min_score(0.0).is_ok());
        assert!(validate_min_score(100.0).is_ok());
        assert!(validate_min_score(-0.5).is_err());
        assert!(validate_min_score(100.5).is_err());
        assert!(validate_min_score(f64::NAN).is_err());
    }

    #[test]
    fn test_idempotency_key_rules() {
        assert!(validate_idempotency_key("import-2024-01").is_ok());
        assert!(validate_idempotency_key(" ").is_err());
        assert!(validate_idempotency_key(&"k".repeat(256)).is_err());
    }
}
