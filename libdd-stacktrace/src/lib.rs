// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! In-process stack trace symbolication.
//!
//! Return addresses of the running process are resolved into [`StackFrame`]s through a
//! [`SymbolSource`] (the process' own debug information, via `backtrace` or blazesym),
//! assembled innermost first into a [`StackTrace`], and can then be trimmed, rendered
//! or persisted.
//!
//! ```no_run
//! use libdd_stacktrace::{capture_current, TraceConfiguration};
//!
//! let trace = capture_current(&TraceConfiguration::default(), None);
//! println!("{trace}");
//! ```

mod configuration;
mod definition;
mod error;
mod frame;
mod render;
pub mod resolver;
mod test_utils;
mod trace;

pub use configuration::*;
pub use definition::*;
pub use error::*;
pub use frame::*;
pub use resolver::{RawFrame, Resolver, SymbolInfo, SymbolSource};
pub use trace::*;
