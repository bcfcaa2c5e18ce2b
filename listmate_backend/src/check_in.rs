use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::config::CallConfig;
use crate::http_client::build_http_client;
use crate::model::DueCheckIn;

/// Places one outbound check-in call. A single attempt, no retries.
#[async_trait]
pub trait CheckInCaller: Send + Sync {
    async fn place_call(&self, phone_number: &str, task: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct CallRequest<'a> {
    phone_number: &'a str,
    task: &'a str,
    model: &'a str,
    language: &'a str,
    voice: &'a str,
    max_duration: u32,
    wait_for_greeting: bool,
    record: bool,
}

pub struct PhoneCallClient {
    config: CallConfig,
    api_key: String,
    client: reqwest::Client,
}

impl PhoneCallClient {
    /// Returns `None` when no provider key is configured.
    pub fn from_config(config: &CallConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key() else {
            return Ok(None);
        };
        Ok(Some(Self {
            api_key: api_key.to_string(),
            client: build_http_client(config.timeout())?,
            config: config.clone(),
        }))
    }
}

#[async_trait]
impl CheckInCaller for PhoneCallClient {
    async fn place_call(&self, phone_number: &str, task: &str) -> Result<()> {
        let request = CallRequest {
            phone_number,
            task,
            model: &self.config.model,
            language: &self.config.language,
            voice: &self.config.voice,
            max_duration: self.config.max_duration,
            wait_for_greeting: self.config.wait_for_greeting,
            record: self.config.record,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .header("Authorization", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send call request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("Call API returned error {}: {}", status, body);
        }
        Ok(())
    }
}

/// Script for the voice agent: who it is calling, which task, and how to
/// react to done versus not done.
pub fn build_task_description(check_in: &DueCheckIn) -> String {
    let mut task = format!(
        "You are an accountability assistant calling {name} to find out whether a task is done. \
         If it is, congratulate {name} and wish them a good day. \
         If it is not, ask what got in the way, offer whatever help you can, \
         and encourage {name} to get back on track with a concrete next step.\n\n\
         Example:\n\
         Person: Hello?\n\
         You: Hi, this is your accountability assistant. Did you get your task done?\n\
         Person: Not yet.\n\
         You: No worries. What's holding you up, and could you start on it now?\n\n\
         Task: {item}.",
        name = non_blank(check_in.first_name.as_deref()).unwrap_or("the owner of this list"),
        item = check_in.item_name.trim(),
    );

    if let Some(notes) = non_blank(check_in.item_notes.as_deref()) {
        task.push_str(&format!(" Task notes: {}.", notes));
    }
    if let Some(notes) = non_blank(check_in.notes.as_deref()) {
        task.push_str(&format!(" Notes: {}", notes));
    }
    task.push_str(&format!(
        " This task is part of the todo list: {}.",
        check_in.list_name.trim()
    ));
    task
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
