//! # Rapid Review
//!
//! Retrieve-then-generate question answering over a corpus of research
//! articles. Articles come from PDF/DOCX text extraction or from
//! reference-manager exports; every query is answered from the chunks that
//! best match it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────┐   ┌──────────────┐   ┌───────────┐
//! │ extract/refs │──▶│  corpus   │──▶│ chunk+embed  │──▶│  store    │
//! │ PDF/DOCX/CSV │   │ JSON files│   │ token budget │   │ SQLite/mem│
//! └──────────────┘   └───────────┘   └──────────────┘   └─────┬─────┘
//!                                                             │
//!                        ┌──────────┐   ┌───────────┐         │
//!                        │generator │◀──│  prompt   │◀── retriever
//!                        └──────────┘   └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Articles, chunks, answers |
//! | [`tokenize`] | Token counting (approximate or Hugging Face) |
//! | [`budget`] | Context size and chunk size arithmetic |
//! | [`corpus`] | Loading article JSON files |
//! | [`chunk`] | Token-window chunking |
//! | [`extract`] | PDF/DOCX text extraction |
//! | [`refs`] | Zotero CSV and CSL-JSON import |
//! | [`embedding`] | Embedding providers and vector utilities |
//! | [`store`] | Vector index backends |
//! | [`retriever`] | Dense, keyword, and hybrid retrieval |
//! | [`prompt`] | Prompt templates and answer parsing |
//! | [`generator`] | Answer generation backends |
//! | [`session`] | The end-to-end query pipeline |
//! | [`commands`] | `rrc` subcommand implementations |

pub mod budget;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generator;
mod http;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod prompt;
pub mod refs;
pub mod retriever;
pub mod session;
pub mod store;
pub mod tokenize;
