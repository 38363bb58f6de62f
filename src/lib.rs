//! # zipsweep
//!
//! Searches password-protected ZIP archives stored in an S3 bucket for a list
//! of identifiers and reports every occurrence.
//!
//! A search runs as a background job: it walks the bucket one folder level
//! below a prefix, downloads each archive, decrypts it in memory, scans the
//! text-like entries for whole-token, case-insensitive identifier matches and
//! merges the hits into a result set that callers poll while the job runs.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────────────────────┐
//! │ CLI/HTTP │──▶│ JobRegistry  │──▶│ Orchestrator (1 task / job) │
//! └──────────┘   └──────┬───────┘   └──────┬──────────────────────┘
//!       ▲   poll        │ snapshot         │ list / get
//!       └───────────────┘                  ▼
//!                                   ┌──────────────┐   ┌──────────────┐
//!                                   │ ObjectStore  │   │ ArchiveDecoder│
//!                                   │ (S3, memory) │   │ (zip + AES)   │
//!                                   └──────────────┘   └──────┬───────┘
//!                                                             ▼
//!                                                     Scanner + Matcher
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export AWS_ACCESS_KEY_ID=... AWS_SECRET_ACCESS_KEY=...
//! zipsweep buckets
//! zipsweep search --bucket exports --prefix 2024/ --identifiers ids.txt --output hits.csv
//! zipsweep serve --bind 127.0.0.1:7340
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed errors at library seams |
//! | [`identifiers`] | Identifier list loading (line / CSV) |
//! | [`matcher`] | Whole-token identifier matching |
//! | [`archive`] | Encrypted ZIP decoding |
//! | [`scanner`] | Entry filtering and scanning |
//! | [`storage`] | Object store abstraction, S3 and in-memory backends |
//! | [`enumerate`] | Folder and archive enumeration |
//! | [`orchestrator`] | Per-job search driver |
//! | [`jobs`] | Job registry and polling contract |
//! | [`report`] | CSV export |
//! | [`progress`] | CLI progress reporting |
//! | [`server`] | HTTP server |

pub mod archive;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod identifiers;
pub mod jobs;
pub mod matcher;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod report;
pub mod scanner;
pub mod server;
pub mod storage;
