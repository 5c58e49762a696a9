use tracing::info;

/// Human-readable run summary: every line is logged as it is recorded and
/// the full list is posted to the notification channel at the end of the
/// run.
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    messages: Vec<String>,
}

impl RunReport {
    pub fn push(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.messages.push(message);
    }

    /// Fold another report's lines in without re-logging them.
    pub fn absorb(&mut self, other: RunReport) {
        self.messages.extend(other.messages);
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn summary(&self) -> String {
        self.messages.join("\n")
    }
}
