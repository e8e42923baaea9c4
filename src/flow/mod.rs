// SPDX-License-Identifier: MIT

//! Flow definitions and their compilation into runnable graphs
//!
//! - `definition` - YAML schema types
//! - `loader` - file loading and parsing
//! - `registry` - named step bodies
//! - `builder` - definition + registry -> validated `Flow`
//! - `transactions` - the built-in transactions flow

pub mod builder;
pub mod definition;
pub mod loader;
pub mod registry;
pub mod transactions;

pub use builder::{Flow, FlowBuilder};
pub use definition::{FlowDefinition, ReportDefinition, StepDefinition, Successors};
pub use loader::FlowLoader;
pub use registry::StepRegistry;
