use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const API_KEY_VARS: &[&str] = &["OPENAI_API_KEY"];
const API_BASE_VARS: &[&str] = &["OPENAI_API_BASE", "OPENAI_BASE_URL"];

/// Service credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub api_base: String,
    pub credential: Option<Credential>,
    pub timeout: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let credential = first_non_empty(&lookup, API_KEY_VARS).map(Credential::new);
        let api_base = first_non_empty(&lookup, API_BASE_VARS)
            .map(|raw| normalize_api_base(&raw))
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self {
            api_base,
            credential,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_base(mut self, raw: &str) -> Self {
        self.api_base = normalize_api_base(raw);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }
}

/// Loads `~/.env` into the process environment. Variables already set keep
/// their values. Call once, before any thread or client exists.
pub fn load_home_dotenv() -> Option<PathBuf> {
    let path = dirs::home_dir()?.join(".env");
    if !path.is_file() {
        return None;
    }
    match dotenvy::from_path(&path) {
        Ok(()) => Some(path),
        Err(err) => {
            tracing::warn!("ignoring unreadable {}: {err}", path.display());
            None
        }
    }
}

fn first_non_empty(lookup: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn normalize_api_base(raw: &str) -> String {
    let mut base = raw.trim().trim_end_matches('/').to_string();
    if base.is_empty() {
        return DEFAULT_API_BASE.to_string();
    }
    if let Ok(parsed) = reqwest::Url::parse(&base) {
        if parsed.path().trim().is_empty() || parsed.path() == "/" {
            base = format!("{base}/v1");
        }
    }
    base
}
