use crate::config::SlackConfig;
use anyhow::Context;
use reqwest::Client;

pub const COLOUR_GOOD: &str = "good";
pub const COLOUR_DANGER: &str = "danger";

/// Slack observability channel — posts a titled, coloured attachment at run
/// start and end. Failure to post is always non-fatal; callers log and move
/// on.
pub struct SlackNotifier {
    bot_token: String,
    channel: String,
    mentions: String,
    base_url: String,
    client: Client,
}

impl SlackNotifier {
    /// `None` when no bot token is configured: posting silently disabled.
    pub fn from_config(config: &SlackConfig) -> Option<Self> {
        let bot_token = config.bot_token.clone()?;
        Some(Self {
            bot_token,
            channel: config.channel.clone(),
            mentions: config.mentions.clone(),
            base_url: "https://slack.com".to_string(),
            client: Client::new(),
        })
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub async fn post(&self, title: &str, text: &str, colour: &str) -> anyhow::Result<()> {
        let title = if self.mentions.is_empty() {
            title.to_string()
        } else {
            format!("{title} {}", self.mentions)
        };
        let body = serde_json::json!({
            "channel": self.channel,
            "attachments": [{
                "title": title,
                "color": colour,
                "text": text,
            }]
        });

        let response = self
            .client
            .post(format!("{}/api/chat.postMessage", self.base_url))
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await
            .context("send Slack chat.postMessage request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));

        if !status.is_success() {
            anyhow::bail!("Slack chat.postMessage failed ({status}): {body}");
        }

        // Slack returns 200 for most app-level errors; check JSON "ok" field
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
        if parsed.get("ok") == Some(&serde_json::Value::Bool(false)) {
            let err = parsed
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown");
            anyhow::bail!("Slack chat.postMessage failed: {err}");
        }

        Ok(())
    }
}
