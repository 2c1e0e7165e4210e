//! Derrick Core
//!
//! Core types shared across the derrick workspace.
//!
//! This crate contains:
//! - Pipeline configuration: the parsed `derrick.yaml` description
//! - Domain types: artifacts, build results, watch events
//! - Runtime options passed down from the CLI
//!
//! Note: all behaviour (building, deploying, watching) lives in
//! `derrick-runner`; this crate is structure only.

pub mod build;
pub mod config;
pub mod events;
pub mod options;
