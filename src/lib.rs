//! # Convo Harness
//!
//! A local-first index, search engine, and analysis pipeline for AI
//! conversation transcripts.
//!
//! Transcripts are append-only JSONL files, one per session, grouped in
//! per-project directories. Convo Harness parses them into typed messages,
//! keeps an incrementally synced SQLite/FTS5 index, and answers open-ended
//! questions by splitting the relevant sessions into token-bounded chunks that
//! are analyzed in parallel and synthesized into one result.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────┐   ┌──────────────┐
//! │ Transcripts │──▶│  Parser  │──▶│   Indexer    │
//! │  *.jsonl    │   │          │   │ SQLite+FTS5  │
//! └─────────────┘   └──────────┘   └──────┬───────┘
//!                                         │
//!                       ┌─────────────────┤
//!                       ▼                 ▼
//!                 ┌──────────┐      ┌───────────┐     ┌─────────────┐
//!                 │  Search  │─────▶│  Chunker  │────▶│  Analyzer   │
//!                 └──────────┘      └───────────┘     │ (reasoning) │
//!                                                     └──────┬──────┘
//!                                                            ▼
//!                                                     ┌─────────────┐
//!                                                     │ Persistence │
//!                                                     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! convo init                          # create database
//! convo sync                          # index transcripts
//! convo search "connection pool" --project 'api-*'
//! convo extract 3f2a9c1e --code --lang rust
//! convo analyze "how did the auth design evolve?" --project api
//! convo analyses list
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Sessions, messages, records, value objects |
//! | [`parser`] | JSONL transcript decoding |
//! | [`indexer`] | Incremental, transactional sync |
//! | [`search`] | Full-text search and listings |
//! | [`pattern`] | Project pattern compiler |
//! | [`get`] | Full session retrieval |
//! | [`extract`] | Code, written files and tool calls from one session |
//! | [`chunk`] | Message-aligned chunking |
//! | [`reasoning`] | Reasoning service trait and client |
//! | [`analysis`] | Analysis orchestration |
//! | [`persistence`] | Saved analysis results |
//! | [`stats`] | Index statistics |
//! | [`progress`] | Progress reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analysis;
pub mod chunk;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod get;
pub mod indexer;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod pattern;
pub mod persistence;
pub mod progress;
pub mod reasoning;
pub mod search;
pub mod stats;

pub use error::{Error, Result};
