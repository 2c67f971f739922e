//! The cartload synthetic load injector.
//!
//! This library supports the cartload binaries found elsewhere in this
//! project: a generator that synthesizes shopping-cart order metrics and
//! pushes them at a Graphite backend, and a small client for tidying up a
//! hosted metrics account afterwards.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod exporter;
pub mod metrics_api;
