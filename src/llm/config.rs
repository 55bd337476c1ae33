use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_AZURE_API_VERSION: &str = "2024-12-01-preview";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureConfig {
    pub key: String,
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
}

impl AzureConfig {
    pub fn completions_url(&self) -> String {
        let separator = if self.endpoint.ends_with('/') { "" } else { "/" };
        format!(
            "{}{}openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, separator, self.deployment, self.api_version
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub key: String,
    pub model: String,
}

/// Credentials for every provider that is configured. Azure wins over
/// OpenAI; with neither present the mock provider answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub azure: Option<AzureConfig>,
    pub openai: Option<OpenAiConfig>,
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            azure: None,
            openai: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let azure = match (
            var("AZURE_OPENAI_KEY"),
            var("AZURE_OPENAI_ENDPOINT"),
            var("AZURE_OPENAI_DEPLOYMENT"),
        ) {
            (Some(key), Some(endpoint), Some(deployment)) => Some(AzureConfig {
                key,
                endpoint,
                deployment,
                api_version: var("AZURE_OPENAI_API_VERSION")
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            }),
            _ => None,
        };

        let openai = var("OPENAI_API_KEY").map(|key| OpenAiConfig {
            key,
            model: var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
        });

        Self {
            azure,
            openai,
            ..Default::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
