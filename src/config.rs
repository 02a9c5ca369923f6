use anyhow::{Context, Result, bail};
use reqwest::Url;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_OPENAI_TIMEOUT_SECONDS: u64 = 20;
const DEFAULT_ARCHIVE_DIR: &str = "chats";
const DEFAULT_MAX_MESSAGES: usize = 750;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub mimic: MimicConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OpenAiConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_openai_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MimicConfig {
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

impl Default for MimicConfig {
    fn default() -> Self {
        Self {
            archive_dir: default_archive_dir(),
            max_messages: default_max_messages(),
        }
    }
}

fn default_openai_timeout_seconds() -> u64 {
    DEFAULT_OPENAI_TIMEOUT_SECONDS
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ARCHIVE_DIR)
}

fn default_max_messages() -> usize {
    DEFAULT_MAX_MESSAGES
}

pub fn load_config(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_and_validate_config(&raw)
}

fn parse_and_validate_config(raw: &str) -> Result<Config> {
    let config: Config = toml::from_str(raw).context("failed to parse config.toml as TOML")?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    validate_openai_config(&config.openai)?;
    validate_mimic_config(&config.mimic)?;
    Ok(())
}

fn validate_openai_config(config: &OpenAiConfig) -> Result<()> {
    let url = config.api_url.trim();
    if url.is_empty() {
        bail!("openai.api_url must not be empty");
    }
    Url::parse(url).context("openai.api_url must be a valid URL string")?;
    if config.api_key.trim().is_empty() {
        bail!("openai.api_key must not be empty");
    }
    if config.model.trim().is_empty() {
        bail!("openai.model must not be empty");
    }
    Ok(())
}

fn validate_mimic_config(config: &MimicConfig) -> Result<()> {
    if config.archive_dir.as_os_str().is_empty() {
        bail!("mimic.archive_dir must not be empty");
    }
    if config.max_messages == 0 {
        bail!("mimic.max_messages must be at least 1");
    }
    Ok(())
}
