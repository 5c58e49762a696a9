use crate::error::TemplateError;
use serde::Serialize;
use tera::Tera;

const WARNING_TEMPLATE: &str = include_str!("../templates/warning.html");
const DELETION_TEMPLATE: &str = include_str!("../templates/deletion.html");

/// One history row as rendered into an email, fields pre-formatted.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRow {
    pub id: String,
    pub name: String,
    /// `YYYY-MM-DD` last-update date
    pub update_time: String,
    /// Projected deletion date, warning emails only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_date: Option<String>,
    /// Human-formatted size
    pub size: String,
}

/// Tera-backed renderer for the warning and deletion emails.
pub struct MailTemplates {
    tera: Tera,
}

impl MailTemplates {
    pub fn new() -> Result<Self, TemplateError> {
        let mut tera = Tera::default();
        tera.add_raw_template("warning", WARNING_TEMPLATE)?;
        tera.add_raw_template("deletion", DELETION_TEMPLATE)?;
        Ok(Self { tera })
    }

    pub fn render_warning(
        &self,
        username: &str,
        histories: &[HistoryRow],
        warn_weeks: i64,
        delete_weeks: i64,
        warn_period: i64,
        hist_view_base: &str,
    ) -> Result<String, TemplateError> {
        let mut context = tera::Context::new();
        context.insert("username", username);
        context.insert("histories", histories);
        context.insert("warn_weeks", &warn_weeks);
        context.insert("delete_weeks", &delete_weeks);
        context.insert("warn_period", &warn_period);
        context.insert("hist_view_base", hist_view_base);
        Ok(self.tera.render("warning", &context)?)
    }

    pub fn render_deletion(
        &self,
        username: &str,
        histories: &[HistoryRow],
        delete_weeks: i64,
        hist_view_base: &str,
    ) -> Result<String, TemplateError> {
        let mut context = tera::Context::new();
        context.insert("username", username);
        context.insert("histories", histories);
        context.insert("delete_weeks", &delete_weeks);
        context.insert("hist_view_base", hist_view_base);
        Ok(self.tera.render("deletion", &context)?)
    }
}
