use std::sync::Arc;

use anyhow::{Context, Result};

use crate::check_in::{CheckInCaller, PhoneCallClient};
use crate::config::BackendConfig;
use crate::conversation::ConversationLoop;
use crate::database::TodoDatabase;
use crate::llm_client::{LlmClient, TextGenerator};
use crate::scheduler::CheckInScheduler;

pub struct BackendRuntime {
    pub config: BackendConfig,
    pub db: Arc<TodoDatabase>,
    pub conversation: Arc<ConversationLoop>,
    /// Absent when check-ins are disabled or no call provider is configured.
    pub scheduler: Option<Arc<CheckInScheduler>>,
}

pub struct BackendRuntimeBuilder {
    config: BackendConfig,
    generator: Option<Arc<dyn TextGenerator>>,
    caller: Option<Arc<dyn CheckInCaller>>,
}

impl BackendRuntimeBuilder {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            generator: None,
            caller: None,
        }
    }

    /// Use this generator instead of the configured LLM endpoint.
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Use this caller instead of the configured call provider.
    pub fn with_caller(mut self, caller: Arc<dyn CheckInCaller>) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn build(self) -> Result<BackendRuntime> {
        let config = self.config;

        let db = Arc::new(
            TodoDatabase::new(&config.database_path)
                .with_context(|| format!("Failed to open database {:?}", config.database_path))?,
        );

        let generator = match self.generator {
            Some(generator) => generator,
            None => {
                let client = LlmClient::new(
                    config.llm_api_url.clone(),
                    config.llm_api_key.clone().unwrap_or_default(),
                    config.llm_model.clone(),
                    config.llm_temperature,
                    config.llm_max_tokens,
                    config.llm_timeout(),
                )
                .context("Failed to build LLM client")?;
                tracing::info!("Text generator: {} ({})", config.llm_api_url, config.llm_model);
                Arc::new(client) as Arc<dyn TextGenerator>
            }
        };

        let conversation = Arc::new(ConversationLoop::new(
            db.clone(),
            generator,
            config.system_prompt.clone(),
        ));

        let scheduler = build_scheduler(&config, db.clone(), self.caller)?;

        Ok(BackendRuntime {
            config,
            db,
            conversation,
            scheduler,
        })
    }
}

impl BackendRuntime {
    pub fn bootstrap(config: BackendConfig) -> Result<Self> {
        BackendRuntimeBuilder::new(config).build()
    }
}

fn build_scheduler(
    config: &BackendConfig,
    db: Arc<TodoDatabase>,
    caller: Option<Arc<dyn CheckInCaller>>,
) -> Result<Option<Arc<CheckInScheduler>>> {
    if !config.enable_check_ins {
        tracing::info!("Check-ins disabled by config");
        return Ok(None);
    }

    let caller = match caller {
        Some(caller) => caller,
        None => match PhoneCallClient::from_config(&config.call)? {
            Some(client) => Arc::new(client) as Arc<dyn CheckInCaller>,
            None => {
                tracing::warn!("No call API key configured; check-in scheduler will not run");
                return Ok(None);
            }
        },
    };

    Ok(Some(Arc::new(CheckInScheduler::new(
        db,
        caller,
        config.check_in_interval(),
    ))))
}
