//! Sentiment classifier: provider abstraction + response parsing.
//!
//! One completion request per article. The classifier never errors past its
//! boundary: transport/API failures become an `unclear` result with the cause
//! embedded in `reasoning`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;

/// Closed sentiment vocabulary. Serialized lowercase everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    Unclear,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
            Sentiment::Unclear => "unclear",
        }
    }

    fn from_keyword(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Some(Sentiment::Positive),
            "negative" => Some(Sentiment::Negative),
            "neutral" => Some(Sentiment::Neutral),
            "unclear" => Some(Sentiment::Unclear),
            _ => None,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying one article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub sentiment: Sentiment,
    pub reasoning: String,
}

/// Low-level provider: does the *real* remote completion call. Separated so
/// the same classifier wraps production and test providers.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
    fn name(&self) -> &'static str;
}

pub type DynProvider = Arc<dyn CompletionProvider>;

/// OpenAI provider (Chat Completions API). Reads `OPENAI_API_KEY` via config.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiProvider {
    pub fn from_config(cfg: &ClassifierConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("solar-sentiment-analyzer/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key: cfg.resolve_api_key(),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        if self.api_key.is_empty() {
            anyhow::bail!("missing OpenAI API key");
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            // Deterministic sampling: same article, same verdict.
            temperature: 0.0,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("completion endpoint returned {}", resp.status());
        }
        let body: Resp = resp.json().await?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();
        Ok(content)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Deterministic provider for tests/local runs.
pub struct MockProvider {
    reply: Result<String, String>,
}

impl MockProvider {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
        }
    }

    pub fn failing(cause: &str) -> Self {
        Self {
            reply: Err(cause.to_string()),
        }
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        match &self.reply {
            Ok(s) => Ok(s.clone()),
            Err(e) => Err(anyhow::anyhow!("{e}")),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

const SYSTEM_PROMPT: &str = "You are an expert sentiment analyst for the solar energy industry.";

pub struct SentimentClassifier {
    provider: DynProvider,
    max_content_chars: usize,
}

impl SentimentClassifier {
    pub fn new(provider: DynProvider, max_content_chars: usize) -> Self {
        Self {
            provider,
            max_content_chars,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Classify extracted article text. Blank input short-circuits without a
    /// network call.
    pub async fn classify(&self, text: &str) -> Classification {
        if text.trim().is_empty() {
            return Classification {
                sentiment: Sentiment::Unclear,
                reasoning: "content unavailable".to_string(),
            };
        }

        let excerpt: String = text.chars().take(self.max_content_chars).collect();
        let user = format!(
            "Here is an article:\n\n{excerpt}\n\nPlease classify the sentiment of this article \
             toward the solar energy industry as positive, negative, or neutral. Provide reasoning."
        );

        match self.provider.complete(SYSTEM_PROMPT, &user).await {
            Ok(raw) if !raw.trim().is_empty() => parse_response(&raw),
            Ok(_) => {
                counter!("classify_errors_total").increment(1);
                Classification {
                    sentiment: Sentiment::Unclear,
                    reasoning: "Analysis failed: empty completion".to_string(),
                }
            }
            Err(e) => {
                counter!("classify_errors_total").increment(1);
                tracing::warn!(error = ?e, provider = self.provider.name(), "completion call failed");
                Classification {
                    sentiment: Sentiment::Unclear,
                    reasoning: format!("Analysis failed: {e}"),
                }
            }
        }
    }
}

/// Strict structured parse first; keyword scan of the first sentence as the
/// documented fallback. The fallback keeps the full raw response as reasoning.
fn parse_response(raw: &str) -> Classification {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw.trim()) {
        if value.is_object() {
            let sentiment = value
                .get("sentiment")
                .and_then(|v| v.as_str())
                .and_then(Sentiment::from_keyword)
                .unwrap_or(Sentiment::Unclear);
            let reasoning = value
                .get("reasoning")
                .and_then(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(raw)
                .to_string();
            return Classification {
                sentiment,
                reasoning,
            };
        }
    }

    // Heuristic path: only the first sentence decides, first keyword wins.
    let first_sentence = raw
        .split(['.', '!', '?'])
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    let sentiment = if first_sentence.contains("positive") {
        Sentiment::Positive
    } else if first_sentence.contains("negative") {
        Sentiment::Negative
    } else if first_sentence.contains("neutral") {
        Sentiment::Neutral
    } else {
        Sentiment::Unclear
    };

    Classification {
        sentiment,
        reasoning: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_response_is_parsed_strictly() {
        let c = parse_response(r#"{"sentiment":"negative","reasoning":"market downturn"}"#);
        assert_eq!(c.sentiment, Sentiment::Negative);
        assert_eq!(c.reasoning, "market downturn");
    }

    #[test]
    fn structured_response_with_missing_fields_defaults_to_unclear() {
        let raw = r#"{"reasoning":"no verdict given"}"#;
        let c = parse_response(raw);
        assert_eq!(c.sentiment, Sentiment::Unclear);
        assert_eq!(c.reasoning, "no verdict given");

        let raw = r#"{"sentiment":"positive"}"#;
        let c = parse_response(raw);
        assert_eq!(c.sentiment, Sentiment::Positive);
        assert_eq!(c.reasoning, raw, "raw text kept when reasoning absent");
    }

    #[test]
    fn fallback_scans_only_the_first_sentence() {
        let raw = "This is positive news for the sector. Some would call it negative.";
        let c = parse_response(raw);
        assert_eq!(c.sentiment, Sentiment::Positive);
        assert_eq!(c.reasoning, raw, "fallback keeps the full raw response");

        let raw = "Hard to say. The negative parts are offset by positives.";
        let c = parse_response(raw);
        assert_eq!(c.sentiment, Sentiment::Unclear);
    }

    #[test]
    fn fallback_without_keywords_is_unclear() {
        let c = parse_response("The article discusses tariffs at length");
        assert_eq!(c.sentiment, Sentiment::Unclear);
    }
}
