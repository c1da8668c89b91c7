//! Google Gemini `generateContent` provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{http_client, parse::parse_analysis, prompt, AnalysisEngine, AnalysisResult};
use crate::config::analysis::AnalysisSettings;
use crate::error::{PipelineError, Result};

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiEngine {
    http: reqwest::Client,
    api_key: String,
    model: String,
    language: String,
    base_url: String,
}

impl GeminiEngine {
    pub fn new(settings: &AnalysisSettings) -> Result<Self> {
        let api_key = settings.api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(PipelineError::Configuration(
                "gemini provider needs an API key (GEMINI_API_KEY)".into(),
            ));
        }
        Ok(Self {
            http: http_client(settings.timeout_secs)?,
            api_key,
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            language: settings.language.clone(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| API_BASE.to_string()),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        )
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}
#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
}
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Req<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    candidates: Vec<Candidate>,
}
#[derive(Deserialize)]
struct Candidate {
    content: Option<RespContent>,
}
#[derive(Deserialize)]
struct RespContent {
    #[serde(default)]
    parts: Vec<RespPart>,
}
#[derive(Deserialize)]
struct RespPart {
    text: Option<String>,
}

/// First text part of the first candidate.
fn first_text(resp: Resp) -> Option<String> {
    resp.candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .find_map(|p| p.text)
}

#[async_trait]
impl AnalysisEngine for GeminiEngine {
    async fn analyze(&self, title: &str, body: &str) -> Result<AnalysisResult> {
        let t0 = Instant::now();
        let user = prompt::analysis_prompt(title, body, &self.language);
        let req = Req {
            system_instruction: Content {
                parts: vec![Part {
                    text: prompt::SYSTEM_PROMPT,
                }],
            },
            contents: vec![Content {
                parts: vec![Part { text: &user }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                response_mime_type: "application/json",
            },
        };

        let resp = self.http.post(self.endpoint()).json(&req).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::from_status("gemini", status, &text));
        }
        let body: Resp = resp.json().await?;
        let text = first_text(body)
            .ok_or_else(|| PipelineError::Structural("gemini response has no candidates".into()))?;
        parse_analysis(&text, t0.elapsed().as_millis() as u64)
    }

    fn provider_name(&self) -> &'static str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_configuration_error() {
        let s = AnalysisSettings {
            provider: "gemini".into(),
            api_key: String::new(),
            ..AnalysisSettings::default()
        };
        assert!(matches!(
            GeminiEngine::new(&s),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn candidate_text_is_extracted() {
        let resp: Resp = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"a\":1}"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(first_text(resp).as_deref(), Some("{\"a\":1}"));

        let empty: Resp = serde_json::from_str(r#"{"promptFeedback":{}}"#).unwrap();
        assert!(first_text(empty).is_none());
    }
}
