//! Freezer
//!
//! Forensic acquisition of web pages: network and screen recordings, one-shot
//! network probes, a screenshot and a saved copy of the page, all collected
//! into a per-case folder, hashed into a manifest and summarised in a report.

pub mod capture;
pub mod case;
pub mod cli;
pub mod config;
pub mod errors;
pub mod journal;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod probes;
pub mod task;
pub mod ui;
pub mod utils;

pub use config::Configuration;
pub use errors::{FreezerError, FreezerResult};
pub use orchestrator::{AcquisitionPhase, Orchestrator};
