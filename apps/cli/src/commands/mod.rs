//! Command implementations for the Kiln CLI.

pub mod analyze;
pub mod models;
pub mod report;
pub mod run;
