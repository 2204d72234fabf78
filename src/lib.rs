//! # Doc Refinery
//!
//! A content-addressed document ingestion cache with a similarity-gated
//! rewrite pipeline.
//!
//! Uploaded documents are keyed by the SHA-256 of their bytes and of the
//! parsing model's identity. A submission whose key already has a live
//! record is answered from the store without parsing; concurrent
//! submissions of the same content converge on a single stored record via
//! the store's uniqueness constraint. Separately, the rewrite engine embeds
//! a list of text items, rewrites those that fall below a similarity
//! threshold against a target, and streams progress followed by a JSON
//! patch.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────────┐   ┌──────────┐
//! │  upload  │──▶│ IngestionCache │──▶│  SQLite  │
//! │ CLI/HTTP │   │ hash + lookup  │   │ UNIQUE   │
//! └──────────┘   └────────────────┘   └──────────┘
//!
//! ┌──────────┐   ┌────────────────┐   ┌──────────┐
//! │ improve  │──▶│ RewriteEngine  │──▶│   SSE    │
//! │ CLI/HTTP │   │ embed + gate   │   │ frames   │
//! └──────────┘   └───────┬────────┘   └──────────┘
//!                        ▼
//!                ┌────────────────┐
//!                │ ModelProvider  │  openai / ollama / local
//!                └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! refinery init                       # create database
//! refinery ingest ./cv.pdf            # parse and store (or reuse)
//! refinery list
//! refinery improve --target "Senior Rust engineer" --items-file bullets.txt
//! refinery serve                      # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite artifact store |
//! | [`clock`] | Injectable time source |
//! | [`cache`] | Content-addressed ingestion cache |
//! | [`extract`] | PDF / OOXML / text parsing |
//! | [`providers`] | Model provider backends and selection |
//! | [`rewrite`] | Similarity-gated rewrite engine |
//! | [`sse`] | Event stream wire format |
//! | [`artifacts`] | Artifact CRUD |
//! | [`server`] | HTTP server |
//! | [`commands`] | CLI command implementations |

pub mod artifacts;
pub mod cache;
pub mod clock;
pub mod commands;
pub mod config;
pub mod db;
pub mod extract;
pub mod logging;
pub mod migrate;
pub mod providers;
pub mod rewrite;
pub mod server;
pub mod sqlite_store;
pub mod sse;
