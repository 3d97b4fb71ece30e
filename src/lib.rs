//! HERMES — Heuristic Evaluation and Routed Market Execution System
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod error;
pub mod types;
pub mod events;
pub mod collab;
pub mod strategy;
pub mod engine;
pub mod storage;
pub mod dashboard;
