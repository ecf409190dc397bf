//! Webhook notifiers (spec.md §6 Notifier: "transparent failover from
//! primary to secondary channel"). Grounded on the teacher's
//! `HttpClientFactory` retry policy; `FailoverNotifier` itself lives in
//! `domain::ports` and is wired here from `NotifierEnvConfig`.

use crate::config::NotifierEnvConfig;
use crate::domain::ports::{FailoverNotifier, Notifier};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde_json::json;
use std::time::Duration;

fn build_client() -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
    let client = Client::builder()
        .pool_max_idle_per_host(5)
        .timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_else(|_| Client::new());
    ClientBuilder::new(client).with(RetryTransientMiddleware::new_with_policy(retry_policy)).build()
}

pub struct SlackNotifier {
    client: ClientWithMiddleware,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self { client: build_client(), webhook_url: webhook_url.into() }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&json!({ "text": message }))
            .send()
            .await
            .context("slack webhook request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("slack webhook returned {}", response.status());
        }
        Ok(())
    }
}

pub struct DiscordNotifier {
    client: ClientWithMiddleware,
    webhook_url: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self { client: build_client(), webhook_url: webhook_url.into() }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&json!({ "content": message }))
            .send()
            .await
            .context("discord webhook request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("discord webhook returned {}", response.status());
        }
        Ok(())
    }
}

/// Build a notifier from configured webhooks, if any. Slack is primary,
/// Discord is the failover channel, matching the order they're documented
/// in spec.md §6.
pub fn from_config(config: &NotifierEnvConfig) -> Option<FailoverNotifier> {
    let primary: Box<dyn Notifier> = match &config.slack_webhook_url {
        Some(url) => Box::new(SlackNotifier::new(url.clone())),
        None => match &config.discord_webhook_url {
            Some(url) => Box::new(DiscordNotifier::new(url.clone())),
            None => return None,
        },
    };
    let secondary: Option<Box<dyn Notifier>> = if config.slack_webhook_url.is_some() {
        config.discord_webhook_url.as_ref().map(|url| Box::new(DiscordNotifier::new(url.clone())) as Box<dyn Notifier>)
    } else {
        None
    };
    Some(FailoverNotifier::new(primary, secondary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_webhooks_configured_yields_no_notifier() {
        let config = NotifierEnvConfig { slack_webhook_url: None, discord_webhook_url: None };
        assert!(from_config(&config).is_none());
    }

    #[test]
    fn slack_only_yields_a_notifier_with_no_failover() {
        let config = NotifierEnvConfig {
            slack_webhook_url: Some("https://hooks.slack.test/x".into()),
            discord_webhook_url: None,
        };
        assert!(from_config(&config).is_some());
    }
}
