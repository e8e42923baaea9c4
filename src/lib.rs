// SPDX-License-Identifier: MIT

pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod flow;
