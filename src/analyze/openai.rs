//! OpenAI Chat Completions provider (JSON mode).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{http_client, parse::parse_analysis, prompt, AnalysisEngine, AnalysisResult};
use crate::config::analysis::AnalysisSettings;
use crate::error::{PipelineError, Result};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAiEngine {
    http: reqwest::Client,
    api_key: String,
    model: String,
    language: String,
    base_url: String,
}

impl OpenAiEngine {
    pub fn new(settings: &AnalysisSettings) -> Result<Self> {
        let api_key = settings.api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(PipelineError::Configuration(
                "openai provider needs an API key (OPENAI_API_KEY)".into(),
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
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}
#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}
#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
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
    content: Option<String>,
}

#[async_trait]
impl AnalysisEngine for OpenAiEngine {
    async fn analyze(&self, title: &str, body: &str) -> Result<AnalysisResult> {
        let t0 = Instant::now();
        let user = prompt::analysis_prompt(title, body, &self.language);
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: prompt::SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.2,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::from_status("openai", status, &text));
        }
        let body: Resp = resp.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PipelineError::Structural("openai response has no content".into()))?;
        parse_analysis(&content, t0.elapsed().as_millis() as u64)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}
