//! cloudmirror Core - Domain types and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `LocalResourceState`, `TagState`, `EnumerationRequest`, cycle outcomes
//! - **Port definitions** - Traits for adapters: `IRemoteSource`, `IResourceStore`, `ICompletionSink`
//! - **Configuration** - YAML-backed `Config` with validation and a builder
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure data types with no I/O.
//! Ports define trait interfaces that adapter crates implement; the
//! reconciliation engine in `cloudmirror-sync` drives them.

pub mod config;
pub mod domain;
pub mod ports;
