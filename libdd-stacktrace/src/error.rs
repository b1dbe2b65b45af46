// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceError {
    /// No frame matched the trim target; the trace was left untouched.
    #[error("No frame named {names:?} found in the stack trace")]
    TrimTargetNotFound { names: Vec<String> },
}
