//! codescout — repository ingestion and code retrieval service.
//!
//! Clones a git repository, walks and filters its tree, splits source
//! files into structure-aware chunks, embeds each chunk through a hosted
//! model, and persists everything for vector retrieval — streaming live
//! progress to subscribers throughout.
//!
//! # Modules
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`config`] | TOML configuration with validation |
//! | [`models`] | Jobs, files, chunks, progress events |
//! | [`walker`] | Filtered recursive directory walk |
//! | [`chunker`] | Structural and windowed file chunking |
//! | [`retry`] | Reusable retry policy with backoff |
//! | [`embedding`] | Embedding provider client and vector math |
//! | [`progress`] | Per-job publish/subscribe progress bus |
//! | [`fetch`] | Repository cloning |
//! | [`probe`] | Pre-flight repository size estimation |
//! | [`store`] | Storage trait, SQLite and in-memory backends |
//! | [`ingest`] | The pipeline orchestrator |
//! | [`server`] | HTTP API and SSE progress streaming |

pub mod chunker;
pub mod config;
pub mod embedding;
pub mod fetch;
pub mod ingest;
pub mod models;
pub mod probe;
pub mod progress;
pub mod retry;
pub mod server;
pub mod store;
pub mod walker;
