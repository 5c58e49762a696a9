#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

pub mod app;
pub mod cli;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod filter;
pub mod ledger;
pub mod mailer;
pub mod model;
pub mod notify;
pub mod reconciler;
pub mod report;
pub mod sweeper;
pub mod templates;
