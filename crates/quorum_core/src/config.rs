use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::info;

/// File name of the routing statistics log inside the base directory.
const DEFAULT_STATS_FILE: &str = "parallel_route_stats.txt";

// ---------------------------------------------------------------------------
// Catalog entries
// ---------------------------------------------------------------------------

/// One backend declared in the configuration. Declaration order doubles as
/// the priority order used to break routing ties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Short catalog key, e.g. `"gpt-4o"`.
    pub id: String,
    /// Provider name; must match a key of [`QuorumConfig::providers`].
    pub provider: String,
    /// Provider-native model identifier.
    pub model_id: String,
    pub display_name: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    /// Blended (input + output) / 2 price in USD per 1k tokens.
    pub cost_per_1k_tokens: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl ModelEntry {
    fn new(
        id: &str,
        provider: &str,
        model_id: &str,
        display_name: &str,
        strengths: &[&str],
        cost_per_1k_tokens: f64,
    ) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            model_id: model_id.into(),
            display_name: display_name.into(),
            strengths: strengths.iter().map(|s| (*s).to_owned()).collect(),
            cost_per_1k_tokens,
            enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Wire protocol spoken by a provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiStyle {
    /// `/chat/completions` (OpenAI, xAI, Gemini's compatibility endpoint).
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic Messages API.
    #[serde(rename = "anthropic")]
    Anthropic,
}

/// Connection settings for one provider. The API key itself is read from the
/// environment variable named by `api_key_env` and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_style: ApiStyle,
    pub api_key_env: String,
}

impl ProviderEndpoint {
    fn new(base_url: &str, api_style: ApiStyle, api_key_env: &str) -> Self {
        Self {
            base_url: base_url.into(),
            api_style,
            api_key_env: api_key_env.into(),
        }
    }
}

/// How prompts are classified before routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierMode {
    /// Ask the router model for a category.
    #[default]
    Judge,
    /// Local keyword rules, no network call.
    Heuristic,
}

// ---------------------------------------------------------------------------
// QuorumConfig
// ---------------------------------------------------------------------------

/// Application configuration stored at `~/.quorum/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumConfig {
    // Catalog
    pub models: Vec<ModelEntry>,
    pub providers: BTreeMap<String, ProviderEndpoint>,

    // Designated backends (qualified `provider:model` ids)
    pub router_model: String,
    pub judge_model: String,
    pub synthesis_model: String,

    // Orchestration
    pub classifier_mode: ClassifierMode,
    pub per_call_timeout_secs: u64,
    /// Restricts fan-out to these catalog ids; `None` means every enabled model.
    pub parallel_targets: Option<Vec<String>>,

    // Statistics
    pub stats_enabled: bool,
    pub stats_file: Option<PathBuf>,

    // General
    pub log_level: String,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            "openai".to_owned(),
            ProviderEndpoint::new("https://api.openai.com/v1", ApiStyle::OpenAi, "OPENAI_API_KEY"),
        );
        providers.insert(
            "anthropic".to_owned(),
            ProviderEndpoint::new(
                "https://api.anthropic.com/v1",
                ApiStyle::Anthropic,
                "ANTHROPIC_API_KEY",
            ),
        );
        providers.insert(
            "google".to_owned(),
            ProviderEndpoint::new(
                "https://generativelanguage.googleapis.com/v1beta/openai",
                ApiStyle::OpenAi,
                "GOOGLE_API_KEY",
            ),
        );
        providers.insert(
            "xai".to_owned(),
            ProviderEndpoint::new("https://api.x.ai/v1", ApiStyle::OpenAi, "XAI_API_KEY"),
        );

        Self {
            models: default_models(),
            providers,
            router_model: "openai:gpt-4o".into(),
            judge_model: "openai:gpt-4o".into(),
            synthesis_model: "openai:gpt-4o".into(),
            classifier_mode: ClassifierMode::Judge,
            per_call_timeout_secs: 120,
            parallel_targets: None,
            stats_enabled: true,
            stats_file: None,
            log_level: "info".into(),
        }
    }
}

/// The stock catalog. Costs are `(input + output) / 2` per 1k tokens.
fn default_models() -> Vec<ModelEntry> {
    vec![
        ModelEntry::new(
            "gpt-4o",
            "openai",
            "gpt-4o",
            "GPT-4o",
            &[
                "general knowledge",
                "reasoning",
                "data analysis",
                "structured output",
                "vision capabilities",
                "fast response time",
            ],
            0.00375,
        ),
        ModelEntry::new(
            "claude-opus",
            "anthropic",
            "claude-opus-4-20250514",
            "Claude Opus 4",
            &[
                "code generation",
                "debugging",
                "software engineering",
                "complex reasoning",
                "creative writing",
                "long-form content",
                "detailed explanations",
            ],
            0.045,
        ),
        ModelEntry::new(
            "o3",
            "openai",
            "o3",
            "O3",
            &[
                "reasoning",
                "complex reasoning",
                "mathematics",
                "data analysis",
                "research",
            ],
            0.005,
        ),
        ModelEntry::new(
            "gpt-4o-mini",
            "openai",
            "gpt-4o-mini",
            "GPT-4o-mini",
            &[
                "fast response time",
                "simple queries",
                "low cost",
                "general knowledge",
            ],
            0.000375,
        ),
        ModelEntry::new(
            "gemini-pro",
            "google",
            "gemini-2.5-pro",
            "Gemini 2.5 Pro",
            &[
                "long-form content",
                "research",
                "data analysis",
                "general knowledge",
                "code generation",
            ],
            0.005625,
        ),
        ModelEntry::new(
            "grok",
            "xai",
            "grok-3",
            "Grok 3",
            &[
                "conversation",
                "creative writing",
                "storytelling",
                "general knowledge",
            ],
            0.009,
        ),
    ]
}

impl QuorumConfig {
    /// Returns the base config directory: `~/.quorum/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".quorum"))
    }

    /// Returns the config file path: `~/.quorum/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.quorum/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Ensures all required directories exist.
    pub fn ensure_dirs() -> Result<()> {
        for dir in [Self::base_dir()?, Self::logs_dir()?] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            }
        }
        Ok(())
    }

    /// Loads config from the default location, or creates it if missing.
    pub fn load() -> Result<Self> {
        Self::ensure_dirs()?;
        let path = Self::config_path()?;
        Self::load_from_path(&path)
    }

    /// Load config from a specific file path, writing defaults there if the
    /// file does not exist yet.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: Self = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to_path(path)?;
            info!("Created default config at {}", path.display());
            Ok(config)
        }
    }

    /// Save config to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Where routing statistics are appended. Falls back to
    /// `~/.quorum/parallel_route_stats.txt`.
    pub fn stats_path(&self) -> Result<PathBuf> {
        match self.stats_file {
            Some(ref path) => Ok(path.clone()),
            None => Ok(Self::base_dir()?.join(DEFAULT_STATS_FILE)),
        }
    }

    /// Read the API key for `provider` from the environment.
    pub fn api_key(&self, provider: &str) -> Option<String> {
        self.api_key_with(provider, |name| std::env::var(name).ok())
    }

    /// Like [`api_key`](Self::api_key) but with an injectable variable lookup.
    pub fn api_key_with(
        &self,
        provider: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        let endpoint = self.providers.get(provider)?;
        lookup(&endpoint.api_key_env).filter(|key| !key.trim().is_empty())
    }

    /// Check the configuration for problems. An empty vector means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.models.is_empty() {
            issues.push("models: catalog is empty".to_owned());
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if model.id.trim().is_empty() {
                issues.push("models: entry with empty id".to_owned());
            }
            if !seen.insert(model.id.as_str()) {
                issues.push(format!("models: duplicate id '{}'", model.id));
            }
            if model.id.contains(',') {
                issues.push(format!("models: id '{}' must not contain ','", model.id));
            }
            if !model.cost_per_1k_tokens.is_finite() || model.cost_per_1k_tokens < 0.0 {
                issues.push(format!("models: '{}' has an invalid cost", model.id));
            }
            if !self.providers.contains_key(&model.provider) {
                issues.push(format!(
                    "models: '{}' references unknown provider '{}'",
                    model.id, model.provider
                ));
            }
        }

        for (field, qualified) in [
            ("router_model", &self.router_model),
            ("judge_model", &self.judge_model),
            ("synthesis_model", &self.synthesis_model),
        ] {
            match qualified.split_once(':') {
                Some((provider, model)) if !model.is_empty() => {
                    if !self.providers.contains_key(provider) {
                        issues.push(format!("{field}: unknown provider '{provider}'"));
                    }
                }
                _ => issues.push(format!("{field}: expected 'provider:model', got '{qualified}'")),
            }
        }

        if self.per_call_timeout_secs == 0 {
            issues.push("per_call_timeout_secs: must be greater than zero".to_owned());
        }

        if let Some(ref targets) = self.parallel_targets {
            let mut seen = HashSet::new();
            for target in targets {
                if !self.models.iter().any(|m| &m.id == target) {
                    issues.push(format!("parallel_targets: unknown model '{target}'"));
                }
                if !seen.insert(target.as_str()) {
                    issues.push(format!("parallel_targets: duplicate model '{target}'"));
                }
            }
        }

        issues
    }

    /// Fails on the problems that would make every request fail. Other
    /// [`validate`](Self::validate) issues are warnings.
    pub fn ensure_runnable(&self) -> Result<()> {
        if self.models.is_empty() {
            bail!("No models configured: the `models` catalog is empty");
        }
        if self.per_call_timeout_secs == 0 {
            bail!("per_call_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
