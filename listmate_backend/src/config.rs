use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Voice-call provider parameters sent with every check-in call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    #[serde(default = "default_call_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_call_model")]
    pub model: String,
    #[serde(default = "default_call_language")]
    pub language: String,
    #[serde(default = "default_call_voice")]
    pub voice: String,
    /// Minutes
    #[serde(default = "default_call_max_duration")]
    pub max_duration: u32,
    #[serde(default)]
    pub wait_for_greeting: bool,
    #[serde(default)]
    pub record: bool,
    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_call_api_url() -> String {
    "https://us.api.bland.ai/v1/calls".to_string()
}

fn default_call_model() -> String {
    "enhanced".to_string()
}

fn default_call_language() -> String {
    "en".to_string()
}

fn default_call_voice() -> String {
    "nat".to_string()
}

fn default_call_max_duration() -> u32 {
    12
}

fn default_call_timeout_secs() -> u64 {
    30
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            api_url: default_call_api_url(),
            api_key: None,
            model: default_call_model(),
            language: default_call_language(),
            voice: default_call_voice(),
            max_duration: default_call_max_duration(),
            wait_for_greeting: false,
            record: false,
            timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl CallConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// A configured, non-blank provider key.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    // Text generator
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_llm_temperature")]
    pub llm_temperature: f32,
    #[serde(default = "default_llm_max_tokens")]
    pub llm_max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    // Assistant instruction prepended to every conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    // Storage
    #[serde(default = "default_database_path")]
    pub database_path: String,

    // Check-ins
    #[serde(default = "default_enable_check_ins")]
    pub enable_check_ins: bool,
    #[serde(default = "default_check_in_interval_secs")]
    pub check_in_interval_secs: u64,
    #[serde(default)]
    pub call: CallConfig,
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_temperature() -> f32 {
    0.3
}

fn default_llm_max_tokens() -> u32 {
    2000
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_database_path() -> String {
    "listmate.db".to_string()
}

fn default_enable_check_ins() -> bool {
    true
}

fn default_check_in_interval_secs() -> u64 {
    15
}

pub fn default_system_prompt() -> String {
    r#"You help people keep their todo lists in order.
When someone says they want or need something, treat it as a request to add it to the list.
Whenever you change the list in any way, reply with the whole updated list inside a single block shaped exactly like this:
<todo-list>
  <name>List Name</name>
  <isCompleted>false</isCompleted>
  <items>
    <item>
      <name>Task name</name>
      <notes>Optional notes</notes>
      <deadline>2025-12-31</deadline>
      <isCompleted>false</isCompleted>
      <subItems>
        <subItem>
          <name>Step name</name>
          <isCompleted>false</isCompleted>
        </subItem>
      </subItems>
    </item>
  </items>
</todo-list>
Keep every item the user did not mention, and keep existing completion states unless asked to change them.
Put your conversational reply outside the block and keep it short."#
        .to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            llm_temperature: default_llm_temperature(),
            llm_max_tokens: default_llm_max_tokens(),
            llm_timeout_secs: default_llm_timeout_secs(),
            system_prompt: default_system_prompt(),
            database_path: default_database_path(),
            enable_check_ins: default_enable_check_ins(),
            check_in_interval_secs: default_check_in_interval_secs(),
            call: CallConfig::default(),
        }
    }
}

impl BackendConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("listmate_config.toml")
    }

    /// Load config from listmate_config.toml (next to executable), falling back to env vars
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if let Ok(contents) = fs::read_to_string(path) {
            match toml::from_str::<BackendConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    /// Save config to file (next to executable)
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("LLM_API_URL") {
            config.llm_api_url = url;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            config.llm_model = model;
        }

        if let Ok(key) = env::var("LLM_API_KEY") {
            config.llm_api_key = Some(key);
        }

        if let Ok(path) = env::var("LISTMATE_DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = path;
            }
        }

        if let Ok(interval) = env::var("LISTMATE_CHECK_IN_INTERVAL_SECS") {
            if let Ok(seconds) = interval.parse() {
                config.check_in_interval_secs = seconds;
            }
        }

        if let Ok(enabled) = env::var("LISTMATE_ENABLE_CHECK_INS") {
            config.enable_check_ins = parse_flag(&enabled);
        }

        if let Ok(url) = env::var("CALL_API_URL") {
            config.call.api_url = url;
        }

        if let Ok(key) = env::var("CALL_API_KEY") {
            config.call.api_key = Some(key);
        }

        config
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs.max(1))
    }

    pub fn check_in_interval(&self) -> Duration {
        Duration::from_secs(self.check_in_interval_secs.max(1))
    }
}

fn parse_flag(raw: &str) -> bool {
    let raw = raw.trim();
    raw.eq_ignore_ascii_case("1") || raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("yes")
}
