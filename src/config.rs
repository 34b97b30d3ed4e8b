//! Configuration loading and validation.
//!
//! Everything comes from environment-style key/value pairs, validated once at
//! startup. Loading is factored over an injectable lookup function so the
//! validation logic is testable without touching process environment.

use crate::error::ConfigError;
use std::path::PathBuf;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_SYSTEM_INSTRUCTION_PATH: &str = "system_instruction.txt";
const DEFAULT_PORT: u16 = 8080;

/// Gembot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub slack: SlackConfig,
    pub gemini: GeminiConfig,
    pub server: ServerConfig,
}

/// Slack credentials.
#[derive(Debug, Clone)]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`) for Web API calls and file downloads.
    pub bot_token: String,

    /// App-level token (`xapp-...`). Only Socket Mode needs it.
    pub app_token: Option<String>,

    /// Request-signing secret for the Events API receiver.
    pub signing_secret: String,
}

/// Gemini provider configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,

    /// Preferred model name.
    pub model: String,

    /// Models to try, in order, when the preferred one fails transiently.
    pub fallback_models: Vec<String>,

    pub api_base: String,

    /// Text file holding the fixed system instruction.
    pub system_instruction_path: PathBuf,
}

/// HTTP service settings for the receiver/processor pair.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,

    /// Where the receiver's queue should deliver enqueued mention events.
    pub task_target_url: Option<String>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let slack = SlackConfig {
            bot_token: require(&lookup, "SLACK_BOT_TOKEN")?,
            app_token: optional(&lookup, "SLACK_APP_TOKEN"),
            signing_secret: require(&lookup, "SLACK_SIGNING_SECRET")?,
        };

        let gemini = GeminiConfig {
            api_key: require(&lookup, "GEMINI_API_KEY")?,
            model: optional(&lookup, "GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            fallback_models: parse_model_list(
                optional(&lookup, "GEMINI_FALLBACK_MODELS")
                    .as_deref()
                    .unwrap_or(""),
            ),
            api_base: optional(&lookup, "GEMINI_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            system_instruction_path: optional(&lookup, "SYSTEM_INSTRUCTION_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSTEM_INSTRUCTION_PATH)),
        };

        let port = match optional(&lookup, "PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                ConfigError::Invalid(format!("PORT must be a number between 1 and 65535, got {raw:?}"))
            })?,
            None => DEFAULT_PORT,
        };

        let server = ServerConfig {
            port,
            task_target_url: optional(&lookup, "TASK_TARGET_URL"),
        };

        Ok(Self {
            slack,
            gemini,
            server,
        })
    }
}

impl SlackConfig {
    /// Socket mode needs the app-level token; the HTTP pair does not.
    pub fn require_app_token(&self) -> Result<&str, ConfigError> {
        self.app_token
            .as_deref()
            .ok_or(ConfigError::MissingKey("SLACK_APP_TOKEN"))
    }
}

impl ServerConfig {
    /// The receiver must know where the queue delivers its tasks.
    pub fn require_task_target_url(&self) -> Result<&str, ConfigError> {
        self.task_target_url
            .as_deref()
            .ok_or(ConfigError::MissingKey("TASK_TARGET_URL"))
    }
}

fn require(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<String, ConfigError> {
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingKey(key)),
    }
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|value| !value.trim().is_empty())
}

fn parse_model_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|model| !model.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("SLACK_BOT_TOKEN", "xoxb-test"),
            ("SLACK_SIGNING_SECRET", "sssh"),
            ("GEMINI_API_KEY", "key"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env.get(key).map(|value| value.to_string()))
    }

    #[test]
    fn loads_with_defaults() {
        let config = load(&base_env()).expect("config loads");
        assert_eq!(config.gemini.model, DEFAULT_MODEL);
        assert_eq!(config.gemini.api_base, DEFAULT_API_BASE);
        assert!(config.gemini.fallback_models.is_empty());
        assert_eq!(config.server.port, 8080);
        assert!(config.slack.app_token.is_none());
    }

    #[test]
    fn missing_bot_token_is_fatal() {
        let mut env = base_env();
        env.remove("SLACK_BOT_TOKEN");
        let error = load(&env).expect_err("must fail");
        assert!(matches!(error, ConfigError::MissingKey("SLACK_BOT_TOKEN")));
    }

    #[test]
    fn blank_value_counts_as_missing() {
        let mut env = base_env();
        env.insert("GEMINI_API_KEY", "   ");
        let error = load(&env).expect_err("must fail");
        assert!(matches!(error, ConfigError::MissingKey("GEMINI_API_KEY")));
    }

    #[test]
    fn parses_fallback_model_list() {
        let mut env = base_env();
        env.insert("GEMINI_FALLBACK_MODELS", "model-b, model-c,,  ");
        let config = load(&env).expect("config loads");
        assert_eq!(config.gemini.fallback_models, vec!["model-b", "model-c"]);
    }

    #[test]
    fn rejects_unparseable_port() {
        let mut env = base_env();
        env.insert("PORT", "not-a-port");
        let error = load(&env).expect_err("must fail");
        assert!(matches!(error, ConfigError::Invalid(_)));
    }

    #[test]
    fn app_token_required_only_on_demand() {
        let config = load(&base_env()).expect("config loads");
        assert!(matches!(
            config.slack.require_app_token(),
            Err(ConfigError::MissingKey("SLACK_APP_TOKEN"))
        ));

        let mut env = base_env();
        env.insert("SLACK_APP_TOKEN", "xapp-test");
        let config = load(&env).expect("config loads");
        assert_eq!(config.slack.require_app_token().expect("present"), "xapp-test");
    }

    #[test]
    fn task_target_url_required_only_on_demand() {
        let config = load(&base_env()).expect("config loads");
        assert!(config.server.require_task_target_url().is_err());

        let mut env = base_env();
        env.insert("TASK_TARGET_URL", "http://localhost:8081/tasks/mention");
        let config = load(&env).expect("config loads");
        assert_eq!(
            config.server.require_task_target_url().expect("present"),
            "http://localhost:8081/tasks/mention"
        );
    }
}
