//! Configuration for dailyforge.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DAILYFORGE_HOME, plus the secret variables
//!    named by `generation.api_key_env` and `store.token_env`)
//! 2. Config file (.dailyforge/config.yaml)
//! 3. Defaults (~/.dailyforge)
//!
//! Config file discovery:
//! - An explicit `--config` path wins
//! - Otherwise searches the current directory and parents for
//!   .dailyforge/config.yaml
//! - `paths.home` is relative to the .dailyforge/ directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::limits::StageLimits;
use crate::core::pipeline::stages;
use crate::core::selector::SelectionRules;

const CONFIG_DIR: &str = ".dailyforge";
const HOME_ENV: &str = "DAILYFORGE_HOME";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Source type -> feed URL
    #[serde(default)]
    pub feeds: HashMap<String, String>,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub limits: StageLimits,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory for caches and run journals
    pub home: Option<String>,
}

/// Item selection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub recency_hours: i64,
    pub max_items: usize,
    pub allow_keywords: Vec<String>,
    pub block_keywords: Vec<String>,
    /// Source types loaded into the pool
    pub source_types: Vec<String>,
    /// Rejections logged at info before dropping to debug
    pub log_limit: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            recency_hours: 48,
            max_items: 30,
            allow_keywords: to_strings(&[
                "Gemini", "Antigravity", "NotebookLM", "Nano Banana", "ChatGPT", "Veo", "Wan",
                "kimi", "Sora", "Codex", "Notion app", "Doubao", "OpenAI", "GPT-Image", "Kling",
                "Vibe Coding", "qwen", "千问", "Home Assistant", "豆包",
            ]),
            block_keywords: to_strings(&[
                "pixel", "price", "discount", "wrapped", "game", "apparel", "fashion",
                "shopping", "virtual try", "try on", "try-on", "play store", "app store",
                "price cut", "spotify", "融资", "亿美元", "市值", "股价", "收购", "财报", "营收",
                "投资", "股权", "markets", "stock", "funding", "billion", "revenue", "IPO",
                "聘请", "高管", "离职", "加入", "掌舵", "ex-", "former", "hired", "resigns",
                "预测市场", "赌注", "betting", "policy",
            ]),
            source_types: vec!["news".to_string()],
            log_limit: 20,
        }
    }
}

impl SelectionConfig {
    pub fn rules(&self) -> SelectionRules {
        SelectionRules {
            recency_hours: self.recency_hours,
            max_items: self.max_items,
            allow_keywords: self.allow_keywords.clone(),
            block_keywords: self.block_keywords.clone(),
            log_limit: self.log_limit,
        }
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Generation service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub temperature: Option<f32>,
    /// Shorthand for `limits.stage_timeout_seconds`; wins when both are set
    pub stage_timeout_seconds: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: None,
            stage_timeout_seconds: None,
        }
    }
}

impl GenerationConfig {
    pub fn api_key(&self) -> Result<String> {
        read_secret(&self.api_key_env)
    }
}

/// Versioned store settings (GitHub repository contents)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    /// Name of the environment variable holding the access token
    pub token_env: String,
    pub api_base: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            branch: "main".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            api_base: "https://api.github.com".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn token(&self) -> Result<String> {
        read_secret(&self.token_env)
    }

    pub fn is_configured(&self) -> bool {
        !self.owner.is_empty() && !self.repo.is_empty()
    }
}

/// Document layout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub daily_title: String,
    pub daily_subtitle: String,
    pub podcast_title: String,
    /// Heading placed above the condensed summary block
    pub highlight_heading: String,
    pub insert_ad: bool,
    pub ad_text: String,
    pub insert_foot: bool,
    pub foot_text: String,
    /// Convert straight double quotes to curly quotes in published text
    pub convert_quotes: bool,
    /// chrono format for the date in paths and titles
    pub date_format: String,
    /// chrono format for the date in document headings; unset shows it as in paths
    pub heading_date_format: Option<String>,
    /// Offset from UTC used to decide what "today" is
    pub utc_offset_hours: i32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            daily_title: "AI Daily".to_string(),
            daily_subtitle: "Curated AI news, summarized".to_string(),
            podcast_title: "AI Daily Podcast".to_string(),
            highlight_heading: "**今日摘要**".to_string(),
            insert_ad: false,
            ad_text: String::new(),
            insert_foot: false,
            foot_text: String::new(),
            convert_quotes: false,
            date_format: "%Y-%m-%d".to_string(),
            heading_date_format: None,
            utc_offset_hours: 8,
        }
    }
}

/// System instructions per stage name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptConfig {
    pub instructions: HashMap<String, String>,
}

impl PromptConfig {
    /// Configured instruction for `stage`, or a built-in placeholder
    pub fn instruction_for(&self, stage: &str) -> String {
        if let Some(instruction) = self.instructions.get(stage).filter(|s| !s.trim().is_empty()) {
            return instruction.clone();
        }
        default_instruction(stage).to_string()
    }
}

fn default_instruction(stage: &str) -> &'static str {
    match stage {
        stages::SUMMARIZE => "Summarize each item below in a few sentences of markdown, keeping its link.",
        stages::HIGHLIGHT => "Condense the following daily summary into a short list of key points.",
        stages::PODCAST_FULL => "Rewrite the following digest as a conversational podcast script.",
        stages::PODCAST_SHORT => "Rewrite the following digest as a one-minute podcast script.",
        stages::ANALYSIS => "Analyze the trends and implications in the following content.",
        _ => "Process the following content.",
    }
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct Settings {
    /// Absolute path to the state directory
    pub home: PathBuf,
    /// Config file in use (if found)
    pub config_file: Option<PathBuf>,
    pub selection: SelectionConfig,
    pub generation: GenerationConfig,
    pub store: StoreConfig,
    pub feeds: HashMap<String, String>,
    pub output: OutputConfig,
    pub prompts: PromptConfig,
    pub limits: StageLimits,
}

impl Settings {
    /// Load from an explicit file, or discover one from the current directory
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_file = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::current_dir().ok().and_then(|dir| find_config_file(&dir)),
        };

        let file = match config_file {
            Some(ref path) => load_config_file(path)?,
            None => ConfigFile::default(),
        };

        let env_home = std::env::var(HOME_ENV).ok().filter(|s| !s.is_empty());
        Self::resolve(file, config_file, env_home)
    }

    fn resolve(file: ConfigFile, config_file: Option<PathBuf>, env_home: Option<String>) -> Result<Self> {
        let home = if let Some(env_home) = env_home {
            PathBuf::from(env_home)
        } else if let (Some(home), Some(path)) = (file.paths.home.as_deref(), config_file.as_deref()) {
            let config_dir = path.parent().unwrap_or(Path::new("."));
            resolve_path(config_dir, home)
        } else {
            dirs::home_dir()
                .context("Failed to determine home directory")?
                .join(CONFIG_DIR)
        };

        if file.selection.recency_hours < 0 {
            anyhow::bail!(
                "selection.recency_hours must not be negative (got {})",
                file.selection.recency_hours
            );
        }

        let mut limits = file.limits;
        if let Some(seconds) = file.generation.stage_timeout_seconds {
            limits.stage_timeout_seconds = seconds;
        }

        Ok(Self {
            home,
            config_file,
            selection: file.selection,
            generation: file.generation,
            store: file.store,
            feeds: file.feeds,
            output: file.output,
            prompts: file.prompts,
            limits,
        })
    }

    /// Settings rooted at `home` with every other value defaulted
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            config_file: None,
            selection: SelectionConfig::default(),
            generation: GenerationConfig::default(),
            store: StoreConfig::default(),
            feeds: HashMap::new(),
            output: OutputConfig::default(),
            prompts: PromptConfig::default(),
            limits: StageLimits::default(),
        }
    }

    /// Run journals ($DAILYFORGE_HOME/runs)
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    /// Item cache ($DAILYFORGE_HOME/cache)
    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(&path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn read_secret(var: &str) -> Result<String> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("Environment variable {} is not set", var))
}
