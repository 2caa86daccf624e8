//! Skein Core — transport-agnostic domain logic for the Skein pipeline.
//!
//! Skein turns a planning conversation into an implementation spec and then
//! applies that spec inside a sandbox, tracked as a Job. This crate carries
//! the durable machinery that makes the pipeline safe under crashes and
//! reconnects:
//!
//! - [`workflow`] — checkpointed steps, resumable runs, replayable output
//!   streams
//! - [`agent`] — the model + tool-call loop expressed over workflow steps
//! - [`models`] / [`store`] — Thread / Spec / Job rows and their SQLite stores
//! - [`tools`] — the closed tool registry the planner and worker agents use
//!
//! It has **no HTTP framework dependency** by default, making it suitable for
//! HTTP servers (via `skein-server`), CLI tools, or embedding.
//!
//! # Feature Flags
//!
//! - `axum` — Enables `IntoResponse` impl on `ServerError` for axum handlers.

pub mod agent;
pub mod config;
pub mod db;
pub mod error;
pub mod inference;
pub mod models;
pub mod sandbox;
pub mod state;
pub mod store;
pub mod tools;
pub mod workflow;
pub mod workflows;

// Convenience re-exports
pub use db::Database;
pub use error::ServerError;
pub use state::{AppState, AppStateInner, WorkflowDeps};
