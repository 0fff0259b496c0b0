use std::time::Duration;

use anyhow::Context;

const DEFAULT_LOOKUP_CONCURRENCY: usize = 8;
const DEFAULT_EXTRACTION_TIMEOUT_SECS: u64 = 30;

/// Credentials for the OpenAI-compatible extraction endpoint.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    /// Budget for the single extraction call before falling back to splitting.
    pub timeout: Duration,
}

impl LlmConfig {
    /// Returns `None` unless endpoint, key and model are all set.
    pub fn from_env() -> Option<Self> {
        let api_base = non_empty_var("OPENAI_ENDPOINT")?;
        let api_key = non_empty_var("OPENAI_API_KEY")?;
        let model = non_empty_var("OPENAI_MODEL")?;
        let timeout_secs = non_empty_var("OPENAI_TIMEOUT_SECS")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_EXTRACTION_TIMEOUT_SECS);
        Some(Self {
            api_base,
            api_key,
            model,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Keeps the extraction budget at most half of the caller's deadline so
    /// the splitter still has time to run.
    pub fn timeout_within(&self, caller_timeout: Duration) -> Duration {
        self.timeout.min(caller_timeout / 2)
    }

    pub fn http_client(&self, timeout: Duration) -> anyhow::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build the extraction HTTP client")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub llm: Option<LlmConfig>,
    pub lookup_concurrency: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let lookup_concurrency = match non_empty_var("ROSTER_LOOKUP_CONCURRENCY") {
            Some(value) => value
                .parse::<usize>()
                .with_context(|| format!("ROSTER_LOOKUP_CONCURRENCY must be a number, got {value}"))?
                .max(1),
            None => DEFAULT_LOOKUP_CONCURRENCY,
        };

        Ok(Self {
            database_url: non_empty_var("DATABASE_URL"),
            llm: LlmConfig::from_env(),
            lookup_concurrency,
        })
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm(timeout_secs: u64) -> LlmConfig {
        LlmConfig {
            api_base: "http://localhost".to_string(),
            api_key: "key".to_string(),
            model: "model".to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    #[test]
    fn extraction_budget_stays_under_caller_deadline() {
        assert_eq!(
            llm(30).timeout_within(Duration::from_secs(120)),
            Duration::from_secs(30)
        );
        assert_eq!(
            llm(30).timeout_within(Duration::from_secs(20)),
            Duration::from_secs(10)
        );
    }
}
