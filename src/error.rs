use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `histwarden`.
///
/// Each external collaborator gets its own variant. Callers match on these
/// to decide whether a failure aborts the run (listing operations) or is
/// counted and skipped (per-item sends and deletes); glue code continues to
/// use `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("directory: {0}")]
    Directory(#[from] DirectoryError),

    #[error("mail: {0}")]
    Mail(#[from] MailError),

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("template: {0}")]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Directory API errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("request did not return ok: {status} {reason}: {body}")]
    Http {
        status: u16,
        reason: String,
        body: String,
    },

    #[error("transport: {0}")]
    Transport(String),

    #[error("decode: {0}")]
    Decode(String),
}

// ─── Mail API errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MailError {
    #[error("no recipient address specified")]
    NoRecipient,

    #[error("empty message body")]
    EmptyBody,

    #[error("transport: {0}")]
    Transport(String),
}

// ─── Ledger errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("sqlx: {0}")]
    Sqlx(String),

    #[error("write contention not resolved after {attempts} attempts")]
    ContentionExhausted { attempts: u32 },

    #[error("schema migration failed: {0}")]
    Migration(String),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

// ─── Template errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template render failed: {0}")]
    Render(String),
}

impl From<tera::Error> for TemplateError {
    fn from(err: tera::Error) -> Self {
        Self::Render(err.to_string())
    }
}
