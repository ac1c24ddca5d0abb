//! # Hailstorm
//!
//! **Input and output safety gates for AI agents.**
//!
//! Hailstorm sits between callers and an external agent execution engine.
//! Every prompt crosses an input gate before the agent runs, and every
//! response crosses an output gate before the caller sees it. Each gate runs
//! an ordered list of checks configured in `hailstorm.json`; the first check
//! that denies stops the gate.
//!
//! ## Architecture
//!
//! - **[`gateway`]**: input gate → executor → output gate, with hot-swappable gates
//! - **[`gate`]**: sequential check runner producing a [`gate::GateReport`]
//! - **[`check`]**: RBAC, content policy, token limits, misuse, privacy and scored checks
//! - **[`classifier`]**: heuristic and HTTP-backed scorers for the output checks
//! - **[`config`]**: JSON/TOML configuration, validation and hot reload
//! - **[`policy`]**: first-match-wins content rules
//! - **[`dlp`]**: secret and PII detection with masking
//! - **[`executor`]**: the agent engine seam (HTTP, closure, route demo)
//! - **[`audit`]**: SQLite audit log with live broadcast and JSON/CSV export
//! - **[`ask`]**: human approval for `ask` policy rules
//! - **[`notification`]**: fire-and-forget alerts (Telegram)
//! - **[`web`]**: axum HTTP API
//! - **[`sim`]**: weighted-graph route demo
//!
//! ## Quick Start
//!
//! ```bash
//! # Create hailstorm.json and the audit database
//! hailstorm init
//!
//! # Dry-run the input gate
//! hailstorm check --agent Agent1 "Find a route from node 1 to node 4"
//!
//! # Serve the HTTP API
//! hailstorm serve
//! ```

pub mod ask;
pub mod audit;
pub mod check;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod dlp;
pub mod error;
pub mod executor;
pub mod gate;
pub mod gateway;
pub mod knowledge;
pub mod memory;
pub mod notification;
pub mod policy;
pub mod sim;
pub mod usage;
pub mod web;
