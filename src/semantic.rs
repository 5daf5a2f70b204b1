//! Semantic-enrichment provider: LLM-backed descriptions for code entities.
//!
//! A structured prompt instructs the model to return strict JSON with
//! `{semantic_description, purpose, patterns[], architectural_role,
//! complexity}`. Model output is treated as hostile: the response text is
//! scanned for the first balanced JSON object ([`extract_json_object`])
//! and parsed defensively. Every failure path — non-JSON output, parse
//! error, missing API key — yields an empty [`Enrichment`] upstream
//! rather than failing the stage.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::SemanticConfig;
use crate::models::{Enrichment, ParsedEntity};

/// Entity content is capped before it goes into the prompt.
const PROMPT_CONTENT_MAX_CHARS: usize = 4000;

#[async_trait]
pub trait SemanticProvider: Send + Sync {
    /// Describe one code-like entity. Errors are per-item recoverable:
    /// the caller degrades to an empty enrichment.
    async fn describe(&self, entity: &ParsedEntity) -> Result<Enrichment>;
}

/// Used when no semantic provider is configured. Returns an empty
/// enrichment so entities pass through unannotated instead of failing.
pub struct DisabledSemantics;

#[async_trait]
impl SemanticProvider for DisabledSemantics {
    async fn describe(&self, _entity: &ParsedEntity) -> Result<Enrichment> {
        Ok(Enrichment::default())
    }
}

/// Chat-completion provider against the OpenAI API.
pub struct OpenAiSemantics {
    model: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiSemantics {
    pub fn new(config: &SemanticConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("semantic.model required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl SemanticProvider for OpenAiSemantics {
    async fn describe(&self, entity: &ParsedEntity) -> Result<Enrichment> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let prompt = build_prompt(entity);
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let content = json
                            .pointer("/choices/0/message/content")
                            .and_then(|c| c.as_str())
                            .ok_or_else(|| {
                                anyhow::anyhow!("Invalid chat response: missing content")
                            })?;
                        return parse_enrichment(content);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "OpenAI API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Semantic call failed after retries")))
    }
}

const SYSTEM_PROMPT: &str = "You are a code analyst. Respond with a single JSON object and \
nothing else. Fields: semantic_description (string, one paragraph), purpose (string, one \
sentence), patterns (array of design-pattern names), architectural_role (string), \
complexity (integer 1-10).";

fn build_prompt(entity: &ParsedEntity) -> String {
    let content = entity.content.as_deref().unwrap_or("");
    format!(
        "Analyze this {} named `{}` from `{}`:\n\n```\n{}\n```",
        entity.kind,
        entity.name,
        entity.path,
        crate::models::preview(content, PROMPT_CONTENT_MAX_CHARS),
    )
}

/// Parse model output into an [`Enrichment`], tolerating leading/trailing
/// prose and clamping `complexity` to 1–10.
fn parse_enrichment(content: &str) -> Result<Enrichment> {
    let object = extract_json_object(content)
        .ok_or_else(|| anyhow::anyhow!("No JSON object in model response"))?;
    let mut enrichment: Enrichment = serde_json::from_str(object)?;
    if let Some(c) = enrichment.complexity {
        enrichment.complexity = Some(c.clamp(1, 10));
    }
    Ok(enrichment)
}

/// Locate the first balanced JSON object in `text`.
///
/// Scans from the first `{` and tracks brace depth, ignoring braces inside
/// string literals (with backslash escapes). Returns the exact `{...}`
/// slice, or `None` if no balanced object exists.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Create the appropriate [`SemanticProvider`] based on configuration.
pub fn create_provider(config: &SemanticConfig) -> Result<Box<dyn SemanticProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledSemantics)),
        "openai" => Ok(Box::new(OpenAiSemantics::new(config)?)),
        other => bail!("Unknown semantic provider: {}", other),
    }
}
