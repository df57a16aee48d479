//! # logpilot-core
//!
//! Reconciliation engine for a log-shipping sidecar: watches the Docker
//! daemon's container lifecycle, derives each container's declared
//! log-collection intent from its labels and environment, renders
//! per-container configuration fragments for an embedded shipper
//! (filebeat or fluentd) and coordinates debounced shipper reloads.
//!
//! The library is organized into:
//! - [`engine`]: the reconciliation loop (initial sweep + event dispatch)
//! - [`label_tree`]: compiles `<prefix>.logs.*` labels into an intent tree
//! - [`log_config`]: turns one intent branch into a validated [`log_config::LogConfig`]
//! - [`mount`]: resolves in-container paths to host paths via the mount table
//! - [`descriptor`]: projects container identity for the operator template
//! - [`render`]: expands the operator-supplied handlebars template
//! - [`symlink`]: maintains the per-container volume symlink tree
//! - [`shipper`]: controls the shipper subprocess (two variants)
//! - [`reload`]: single-slot debounced reload coordination
//! - [`runtime`]: narrow interface around the container runtime

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![deny(unused_extern_crates)]
#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::implicit_hasher)]

pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod label_tree;
pub mod log_config;
pub mod mount;
pub mod reload;
pub mod render;
pub mod runtime;
pub mod shipper;
pub mod symlink;

pub use config::{Settings, ShipperKind};
pub use engine::Pilot;
pub use error::{PilotError, Result};
