// src/config/analysis.rs
use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{PipelineError, Result};

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_language() -> String {
    "Japanese".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// "gemini" | "openai" | "fixture" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// "ENV" means: read from GEMINI_API_KEY / OPENAI_API_KEY (by provider)
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Language of `summary_local`.
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Override of the provider's API root; mostly for tests against a local stub.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_key: default_api_key(),
            language: default_language(),
            timeout_secs: default_timeout_secs(),
            base_url: None,
        }
    }
}

impl AnalysisSettings {
    pub fn key_env_var(provider: &str) -> Option<&'static str> {
        match provider {
            "gemini" => Some("GEMINI_API_KEY"),
            "openai" => Some("OPENAI_API_KEY"),
            _ => None,
        }
    }

    /// Normalise the provider name and resolve `api_key = "ENV"`.
    pub fn resolve(mut self) -> Result<Self> {
        self.provider = self.provider.trim().to_lowercase();

        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = match Self::key_env_var(&self.provider) {
                Some(var) => env::var(var).map_err(|_| {
                    PipelineError::Configuration(format!("Missing {var} env var"))
                })?,
                // offline providers need no key
                None => String::new(),
            };
        }

        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        Ok(self)
    }
}
