// src/config.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

use crate::store::ResultPolicy;

fn default_request_timeout() -> u64 {
    10
}
fn default_connect_timeout() -> u64 {
    4
}
fn default_user_agent() -> String {
    // Synthetic desktop UA; plenty of news sites serve bots a stub page.
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36"
        .to_string()
}
fn default_window_width() -> u32 {
    1366
}
fn default_window_height() -> u32 {
    900
}
fn default_settle_delay_ms() -> u64 {
    2500
}
fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_max_content_chars() -> usize {
    2000
}
fn default_max_tokens() -> u32 {
    500
}
fn default_classify_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub result_policy: ResultPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub browser: BrowserFallbackConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            user_agent: default_user_agent(),
            browser: BrowserFallbackConfig::default(),
        }
    }
}

/// Headless-browser execution target. `remote_ws_url` wins when set;
/// otherwise a local binary is launched (`binary_path` or whatever
/// chromiumoxide autodetects).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserFallbackConfig {
    #[serde(default)]
    pub remote_ws_url: Option<String>,
    #[serde(default)]
    pub binary_path: Option<String>,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    /// Fixed delay after navigation before reading the DOM, so client-side
    /// rendering and consent dialogs have settled.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for BrowserFallbackConfig {
    fn default() -> Self {
        Self {
            remote_ws_url: None,
            binary_path: None,
            window_width: default_window_width(),
            window_height: default_window_height(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from OPENAI_API_KEY.
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Article prefix sent to the model; the rest is dropped to bound cost.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_classify_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: default_api_key(),
            max_content_chars: default_max_content_chars(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_classify_timeout(),
        }
    }
}

impl ClassifierConfig {
    /// Resolve the literal key, or the env var when configured as "ENV".
    /// Missing keys resolve to empty; the provider degrades to `unclear`
    /// results instead of refusing to start.
    pub fn resolve_api_key(&self) -> String {
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            env::var("OPENAI_API_KEY").unwrap_or_default()
        } else {
            self.api_key.clone()
        }
    }
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: AppConfig = serde_json::from_str(&data)?;
        Ok(cfg)
    }

    /// Load config, falling back to defaults when the file is absent or
    /// unparsable (logged, not fatal).
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load_from_file(path.as_ref()) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = ?e, path = %path.as_ref().display(), "using default config");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let cfg: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.classifier.model, "gpt-3.5-turbo");
        assert_eq!(cfg.classifier.max_content_chars, 2000);
        assert_eq!(cfg.classifier.max_tokens, 500);
        assert_eq!(cfg.fetch.browser.settle_delay_ms, 2500);
        assert_eq!(cfg.result_policy, ResultPolicy::ReplaceLatest);
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{"classifier":{"model":"gpt-4o-mini"},"result_policy":"append_history"}"#,
        )
        .unwrap();
        assert_eq!(cfg.classifier.model, "gpt-4o-mini");
        assert_eq!(cfg.classifier.max_tokens, 500);
        assert_eq!(cfg.result_policy, ResultPolicy::AppendHistory);
    }

    #[test]
    fn literal_api_key_is_passed_through() {
        let cfg = ClassifierConfig {
            api_key: "sk-test-123".into(),
            ..ClassifierConfig::default()
        };
        assert_eq!(cfg.resolve_api_key(), "sk-test-123");
    }
}
