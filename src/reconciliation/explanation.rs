//! Human-readable rationale for a match
//!
//! The annotator first asks an external [`TextGenerator`], bounded by a
//! timeout. Any failure (disabled, no credentials, error, timeout, empty or
//! malformed reply) drops to a deterministic template built only from the
//! score breakdown. [`ExplanationAnnotator::explain`] cannot fail.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::ExplanationConfig;
use crate::reconciliation::scorer::{ScoreBreakdown, AMOUNT_WEIGHT, DATE_WEIGHT};
use crate::traits::TextGenerator;
use crate::types::*;

const SYSTEM_PROMPT: &str = "You are a financial reconciliation assistant. Return only valid JSON.";

/// Confidence label derived from a total score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    /// >= 80 is high, >= 50 is medium, anything else is low
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            ConfidenceBand::High
        } else if score >= 50.0 {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceBand::High => "high",
            ConfidenceBand::Medium => "medium",
            ConfidenceBand::Low => "low",
        }
    }
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplanationSource {
    Generated,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub text: String,
    pub confidence: ConfidenceBand,
    pub source: ExplanationSource,
}

/// The pair being explained
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub invoice: &'a Invoice,
    pub transaction: &'a BankTransaction,
}

pub struct ExplanationAnnotator {
    config: ExplanationConfig,
    generator: Option<Arc<dyn TextGenerator>>,
}

impl ExplanationAnnotator {
    /// Annotator without an external generator; always uses the template
    pub fn new(config: ExplanationConfig) -> Self {
        Self {
            config,
            generator: None,
        }
    }

    pub fn with_generator(config: ExplanationConfig, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            config,
            generator: Some(generator),
        }
    }

    pub fn config(&self) -> &ExplanationConfig {
        &self.config
    }

    /// Explain a pair. Confidence always comes from the total score.
    pub async fn explain(
        &self,
        breakdown: &ScoreBreakdown,
        context: MatchContext<'_>,
    ) -> Explanation {
        let confidence = ConfidenceBand::from_score(breakdown.total());

        match self.generate(breakdown, context).await {
            Ok(text) => Explanation {
                text,
                confidence,
                source: ExplanationSource::Generated,
            },
            Err(err) => {
                match err {
                    GenerationError::Disabled => {
                        tracing::debug!("text generation disabled, using template explanation")
                    }
                    _ => tracing::warn!(
                        error = %err,
                        "text generation failed, using template explanation"
                    ),
                }
                Explanation {
                    text: fallback_explanation(breakdown),
                    confidence,
                    source: ExplanationSource::Fallback,
                }
            }
        }
    }

    async fn generate(
        &self,
        breakdown: &ScoreBreakdown,
        context: MatchContext<'_>,
    ) -> Result<String, GenerationError> {
        if !self.config.enabled {
            return Err(GenerationError::Disabled);
        }
        let generator = self.generator.as_ref().ok_or(GenerationError::Disabled)?;

        let prompt = build_prompt(breakdown, context);
        let raw = tokio::time::timeout(self.config.timeout(), generator.generate(&prompt))
            .await
            .map_err(|_| GenerationError::Timeout(self.config.timeout_ms))??;

        extract_explanation(&raw)
    }
}

/// Deterministic explanation built only from the breakdown
pub fn fallback_explanation(breakdown: &ScoreBreakdown) -> String {
    let mut reasons: Vec<String> = Vec::new();

    reasons.push(
        match breakdown.amount {
            a if a >= AMOUNT_WEIGHT => "amounts matched exactly",
            a if a >= 35.0 => "amounts within 1%",
            a if a >= 25.0 => "amounts within 5%",
            a if a >= 15.0 => "amounts within 10%",
            a if a > 0.0 => "amounts differ by more than 10%",
            _ => "amounts differ significantly",
        }
        .to_string(),
    );

    reasons.push(match breakdown.days_apart {
        _ if breakdown.date >= DATE_WEIGHT => "dates on the same day".to_string(),
        1 => "dates within 1 day".to_string(),
        d if d <= 30 => format!("dates within {} days", d),
        d => format!("dates {} days apart", d),
    });

    let signals = &breakdown.signals;
    if signals.vendor_name {
        reasons.push("vendor name found in description".to_string());
    }
    if signals.invoice_number {
        reasons.push("invoice number found in description".to_string());
    }
    if signals.shared_keywords > 0 {
        let count = signals.shared_keywords;
        let noun = if count == 1 { "keyword" } else { "keywords" };
        reasons.push(format!("{} shared description {}", count, noun));
    }
    if breakdown.text == 0.0 {
        reasons.push("no matching text".to_string());
    }

    reasons.push(if breakdown.currency > 0.0 {
        "same currency".to_string()
    } else {
        "different currencies".to_string()
    });

    let total = breakdown.total();
    format!(
        "This match has a score of {:.2}/100 ({} confidence). Key factors: {}.",
        total,
        ConfidenceBand::from_score(total),
        reasons.join(", ")
    )
}

fn build_prompt(breakdown: &ScoreBreakdown, context: MatchContext<'_>) -> String {
    let invoice = context.invoice;
    let transaction = context.transaction;
    let or_unknown = |v: Option<&str>| v.unwrap_or("Not specified").to_string();

    format!(
        "You are analyzing a potential match between an invoice and a bank transaction.\n\n\
         Invoice:\n\
         - Amount: {} {}\n\
         - Date: {}\n\
         - Invoice Number: {}\n\
         - Vendor: {}\n\
         - Description: {}\n\n\
         Bank Transaction:\n\
         - Amount: {} {}\n\
         - Posted Date: {}\n\
         - Description: {}\n\n\
         Match Score: {:.2}/100 (amount {:.2}, date {:.2}, text {:.2}, currency {:.2})\n\n\
         Provide a concise explanation (2-6 sentences) of why this is or isn't a good match, \
         covering amount, date proximity, matching identifiers and overall confidence. \
         Return a JSON object with an 'explanation' string.",
        invoice.amount,
        invoice.currency,
        invoice.invoice_date,
        or_unknown(invoice.invoice_number.as_deref()),
        or_unknown(invoice.vendor_name.as_deref()),
        or_unknown(invoice.description.as_deref()),
        transaction.amount,
        transaction.currency,
        transaction.posted_at.to_rfc3339(),
        or_unknown(transaction.description.as_deref()),
        breakdown.total(),
        breakdown.amount,
        breakdown.date,
        breakdown.text,
        breakdown.currency,
    )
}

/// Accept either `{"explanation": "..."}` or plain text
fn extract_explanation(raw: &str) -> Result<String, GenerationError> {
    #[derive(Deserialize)]
    struct Reply {
        explanation: String,
    }

    let raw = raw.trim();
    let text = match serde_json::from_str::<Reply>(raw) {
        Ok(reply) => reply.explanation.trim().to_string(),
        Err(_) => raw.to_string(),
    };

    if text.is_empty() {
        return Err(GenerationError::Malformed("empty explanation".to_string()));
    }
    Ok(text)
}

/// OpenAI-compatible chat completions client
pub struct HttpTextGenerator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl HttpTextGenerator {
    pub fn new(config: &ExplanationConfig) -> Self {
        Self {
            client: Client::new(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
        }
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(GenerationError::MissingCredentials)?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.3,
            max_tokens: 300,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::Malformed("response has no choices".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::scorer::TextSignals;
    use bigdecimal::BigDecimal;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::time::Duration;

    struct FixedGenerator(Result<&'static str, ()>);

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            self.0
                .map(str::to_string)
                .map_err(|_| GenerationError::Malformed("boom".to_string()))
        }
    }

    struct SlowGenerator;

    #[async_trait]
    impl TextGenerator for SlowGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("too late".to_string())
        }
    }

    fn pair() -> (Invoice, BankTransaction) {
        let tenant = TenantId::new("t1");
        let invoice = Invoice::new(
            tenant.clone(),
            NewInvoice::new(
                "inv-1",
                BigDecimal::from(1000),
                "USD",
                NaiveDate::from_ymd_opt(2024, 1, 20).unwrap(),
            ),
        );
        let transaction = BankTransaction::new(
            tenant,
            NewBankTransaction::new(
                BigDecimal::from(1000),
                "USD",
                Utc.with_ymd_and_hms(2024, 1, 20, 10, 0, 0).unwrap(),
            ),
            "USD".to_string(),
        );
        (invoice, transaction)
    }

    fn strong_breakdown() -> ScoreBreakdown {
        ScoreBreakdown {
            amount: 40.0,
            date: 30.0,
            text: 15.0,
            currency: 10.0,
            days_apart: 0,
            signals: TextSignals {
                vendor_name: true,
                ..Default::default()
            },
        }
    }

    fn context<'a>(invoice: &'a Invoice, transaction: &'a BankTransaction) -> MatchContext<'a> {
        MatchContext {
            invoice,
            transaction,
        }
    }

    fn enabled(timeout_ms: u64) -> ExplanationConfig {
        ExplanationConfig {
            enabled: true,
            timeout_ms,
            ..Default::default()
        }
    }

    #[test]
    fn test_confidence_bands() {
        assert_eq!(ConfidenceBand::from_score(100.0), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_score(80.0), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_score(79.99), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_score(50.0), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_score(49.99), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_score(0.0), ConfidenceBand::Low);
    }

    #[test]
    fn test_fallback_lists_contributing_factors() {
        let text = fallback_explanation(&strong_breakdown());
        assert!(text.contains("95.00/100"));
        assert!(text.contains("high confidence"));
        assert!(text.contains("amounts matched exactly"));
        assert!(text.contains("dates on the same day"));
        assert!(text.contains("vendor name found in description"));
        assert!(text.contains("same currency"));
    }

    #[test]
    fn test_fallback_for_weak_pair() {
        let breakdown = ScoreBreakdown {
            amount: 25.0,
            date: 10.0,
            text: 0.0,
            currency: 0.0,
            days_apart: 5,
            signals: TextSignals::default(),
        };
        let text = fallback_explanation(&breakdown);
        assert!(text.contains("amounts within 5%"));
        assert!(text.contains("dates within 5 days"));
        assert!(text.contains("no matching text"));
        assert!(text.contains("different currencies"));
        assert!(text.contains("low confidence"));
    }

    #[tokio::test]
    async fn test_disabled_config_uses_fallback() {
        let (invoice, transaction) = pair();
        let annotator = ExplanationAnnotator::with_generator(
            ExplanationConfig::default(),
            Arc::new(FixedGenerator(Ok("generated"))),
        );
        let explanation = annotator
            .explain(&strong_breakdown(), context(&invoice, &transaction))
            .await;
        assert_eq!(explanation.source, ExplanationSource::Fallback);
        assert_eq!(explanation.confidence, ConfidenceBand::High);
    }

    #[tokio::test]
    async fn test_generated_json_reply_is_unwrapped() {
        let (invoice, transaction) = pair();
        let reply = r#"{"explanation": "Exact amount on the same day.", "confidence": "low"}"#;
        let annotator = ExplanationAnnotator::with_generator(
            enabled(1_000),
            Arc::new(FixedGenerator(Ok(reply))),
        );
        let explanation = annotator
            .explain(&strong_breakdown(), context(&invoice, &transaction))
            .await;
        assert_eq!(explanation.source, ExplanationSource::Generated);
        assert_eq!(explanation.text, "Exact amount on the same day.");
        // The generator's own confidence is ignored.
        assert_eq!(explanation.confidence, ConfidenceBand::High);
    }

    #[tokio::test]
    async fn test_failing_generator_falls_back() {
        let (invoice, transaction) = pair();
        let annotator =
            ExplanationAnnotator::with_generator(enabled(1_000), Arc::new(FixedGenerator(Err(()))));
        let explanation = annotator
            .explain(&strong_breakdown(), context(&invoice, &transaction))
            .await;
        assert_eq!(explanation.source, ExplanationSource::Fallback);
        assert!(!explanation.text.is_empty());
    }

    #[tokio::test]
    async fn test_blank_reply_falls_back() {
        let (invoice, transaction) = pair();
        let annotator = ExplanationAnnotator::with_generator(
            enabled(1_000),
            Arc::new(FixedGenerator(Ok("   "))),
        );
        let explanation = annotator
            .explain(&strong_breakdown(), context(&invoice, &transaction))
            .await;
        assert_eq!(explanation.source, ExplanationSource::Fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_generator_is_abandoned_at_timeout() {
        let (invoice, transaction) = pair();
        let annotator = ExplanationAnnotator::with_generator(enabled(50), Arc::new(SlowGenerator));
        let explanation = annotator
            .explain(&strong_breakdown(), context(&invoice, &transaction))
            .await;
        assert_eq!(explanation.source, ExplanationSource::Fallback);
    }

    #[tokio::test]
    async fn test_http_generator_without_key_makes_no_call() {
        let config = ExplanationConfig {
            enabled: true,
            endpoint: "http://127.0.0.1:9/unreachable".to_string(),
            api_key: Some("  ".to_string()),
            ..Default::default()
        };
        let generator = HttpTextGenerator::new(&config);
        let err = generator.generate("prompt").await.unwrap_err();
        assert!(matches!(err, GenerationError::MissingCredentials));
    }

    #[test]
    fn test_prompt_mentions_both_sides() {
        let (invoice, transaction) = pair();
        let prompt = build_prompt(
            &strong_breakdown(),
            context(&invoice, &transaction),
        );
        assert!(prompt.contains("Amount: 1000 USD"));
        assert!(prompt.contains("2024-01-20"));
        assert!(prompt.contains("95.00/100"));
    }
}
