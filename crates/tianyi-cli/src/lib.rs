//! # tianyi-cli
//!
//! Command-line interface for the Tianyi memory subsystem.
//!
//! ## Commands
//!
//! - `tianyi remember` / `tianyi recall`: Write a turn, build context for a query
//! - `tianyi entity` / `tianyi relation`: Edit the knowledge graph
//! - `tianyi neighbors` / `tianyi path`: Inspect the knowledge graph
//! - `tianyi import-graph`: Bulk-load a knowledge graph JSON file
//! - `tianyi forget`: Delete vector records or entities
//! - `tianyi stats` / `tianyi config` / `tianyi doctor`: Inspect state and configuration

pub mod commands;

pub use commands::Cli;
