use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::ExtractError;
use crate::models::{Extracted, RawEntry};

const EXTRACTION_INSTRUCTION: &str = "You receive a list of student grades pasted by a teacher. \
Each line holds a student enrollment number (matricula) and a numeric grade. \
Separators between them may be ':', spaces or tabs, and grades may use '.' or ',' as the decimal separator. \
Copy both values exactly as written, without converting or rounding the grade. \
Skip blank lines and lines where you cannot find both values. \
Answer only with a JSON object of the form {\"entries\":[{\"matricula\":\"...\",\"grade\":\"...\"}]}.";

#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, text: &str) -> Result<Vec<Extracted>, ExtractError>;
}

/// Deterministic splitter used when no primary extractor is available, or it
/// fails, times out or comes back empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineSplitter;

impl LineSplitter {
    pub fn split(&self, text: &str) -> Vec<Extracted> {
        non_blank_lines(text)
            .map(|line| {
                let mut tokens = line
                    .split(|c: char| c.is_whitespace() || c == ':')
                    .filter(|token| !token.is_empty());
                let first = tokens.next();
                let rest: Vec<&str> = tokens.collect();

                match first {
                    Some(matricula) if !rest.is_empty() => Extracted::Entry(RawEntry {
                        matricula: matricula.to_string(),
                        grade_raw: rest.join(" "),
                        original_line: Some(line.to_string()),
                    }),
                    _ => Extracted::Unreadable {
                        line: line.to_string(),
                    },
                }
            })
            .collect()
    }
}

#[async_trait]
impl Extractor for LineSplitter {
    fn name(&self) -> &'static str {
        "line-splitter"
    }

    async fn extract(&self, text: &str) -> Result<Vec<Extracted>, ExtractError> {
        Ok(self.split(text))
    }
}

pub fn non_blank_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|line| !line.is_empty())
}

/// Makes the single primary extraction call and falls back to the line
/// splitter on an error, an empty result, or when `budget` runs out.
pub async fn extract_entries(
    text: &str,
    primary: Option<&dyn Extractor>,
    budget: Duration,
) -> Vec<Extracted> {
    if let Some(extractor) = primary {
        let outcome = tokio::time::timeout(budget, extractor.extract(text))
            .await
            .unwrap_or_else(|_| Err(ExtractError::TimedOut(budget)));

        match outcome {
            Ok(entries) if !entries.is_empty() => {
                debug!(extractor = extractor.name(), count = entries.len(), "extracted entries");
                return entries;
            }
            Ok(_) => {
                warn!(extractor = extractor.name(), "extractor returned no entries, splitting lines");
            }
            Err(err) => {
                warn!(extractor = extractor.name(), error = %err, "extractor failed, splitting lines");
            }
        }
    }

    let fallback: &dyn Extractor = &LineSplitter;
    // splitting never fails
    fallback.extract(text).await.unwrap_or_default()
}

/// Extractor backed by an OpenAI-compatible chat completions endpoint.
pub struct LlmExtractor {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmExtractor {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn extract(&self, text: &str) -> Result<Vec<Extracted>, ExtractError> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        let body = json!({
            "model": self.config.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": EXTRACTION_INSTRUCTION },
                { "role": "user", "content": text },
            ],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletion = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ExtractError::Malformed("completion had no content".to_string()))?;

        parse_completion_content(&content)
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ExtractionPayload {
    #[serde(default)]
    entries: Vec<ExtractionItem>,
}

#[derive(Deserialize)]
struct ExtractionItem {
    #[serde(default)]
    matricula: Option<GradeToken>,
    #[serde(default, alias = "nota")]
    grade: Option<GradeToken>,
}

/// Models sometimes answer with bare numbers instead of strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum GradeToken {
    Text(String),
    Number(serde_json::Number),
}

impl GradeToken {
    fn into_string(self) -> String {
        match self {
            GradeToken::Text(text) => text.trim().to_string(),
            GradeToken::Number(number) => number.to_string(),
        }
    }
}

pub fn parse_completion_content(content: &str) -> Result<Vec<Extracted>, ExtractError> {
    let json = strip_code_fence(content);
    let payload: ExtractionPayload =
        serde_json::from_str(json).map_err(|err| ExtractError::Malformed(err.to_string()))?;

    Ok(payload
        .entries
        .into_iter()
        .filter_map(|item| {
            let matricula = item.matricula?.into_string();
            let grade_raw = item.grade?.into_string();
            if matricula.is_empty() || grade_raw.is_empty() {
                return None;
            }
            Some(Extracted::Entry(RawEntry {
                matricula,
                grade_raw,
                original_line: None,
            }))
        })
        .collect())
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
