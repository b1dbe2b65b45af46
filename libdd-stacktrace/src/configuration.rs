// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::resolver::DEFAULT_MAX_INLINE_DEPTH;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_FRAMES: usize = 256;

/// Where debug information for the current process is read from.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SymbolSourceKind {
    /// Uses `backtrace::resolve` on the in-process debug information. Available on
    /// every platform `backtrace` supports.
    #[default]
    InProcess,
    /// Uses blazesym on the process' own memory maps. Unix only; other platforms fall
    /// back to `InProcess`.
    Blazesym,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceConfiguration {
    // Keep frames from outside managed (Rust) code
    include_foreign: bool,
    // Whether to demangle symbol names in stack traces
    demangle_names: bool,
    max_frames: usize,
    max_inline_depth: usize,
    source: SymbolSourceKind,
}

impl TraceConfiguration {
    pub fn new(
        include_foreign: bool,
        demangle_names: bool,
        max_frames: Option<usize>,
        max_inline_depth: Option<usize>,
        source: SymbolSourceKind,
    ) -> anyhow::Result<Self> {
        let max_frames = max_frames.unwrap_or(DEFAULT_MAX_FRAMES);
        let max_inline_depth = max_inline_depth.unwrap_or(DEFAULT_MAX_INLINE_DEPTH);
        anyhow::ensure!(max_frames > 0, "max_frames must be non-zero");
        anyhow::ensure!(max_inline_depth > 0, "max_inline_depth must be non-zero");
        Ok(Self {
            include_foreign,
            demangle_names,
            max_frames,
            max_inline_depth,
            source,
        })
    }

    pub fn include_foreign(&self) -> bool {
        self.include_foreign
    }

    pub fn demangle_names(&self) -> bool {
        self.demangle_names
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn max_inline_depth(&self) -> usize {
        self.max_inline_depth
    }

    pub fn source(&self) -> SymbolSourceKind {
        self.source
    }

    pub fn set_include_foreign(&mut self, include_foreign: bool) {
        self.include_foreign = include_foreign;
    }
}

impl Default for TraceConfiguration {
    fn default() -> Self {
        Self {
            include_foreign: false,
            demangle_names: true,
            max_frames: DEFAULT_MAX_FRAMES,
            max_inline_depth: DEFAULT_MAX_INLINE_DEPTH,
            source: SymbolSourceKind::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TraceConfiguration::new(false, true, None, None, SymbolSourceKind::InProcess)
            .unwrap();
        assert_eq!(config, TraceConfiguration::default());
        assert_eq!(config.max_frames(), DEFAULT_MAX_FRAMES);
        assert_eq!(config.max_inline_depth(), DEFAULT_MAX_INLINE_DEPTH);
    }

    #[test]
    fn test_rejects_zero_limits() {
        let err = TraceConfiguration::new(false, true, Some(0), None, SymbolSourceKind::InProcess)
            .unwrap_err();
        assert!(err.to_string().contains("max_frames"));
        let err = TraceConfiguration::new(false, true, None, Some(0), SymbolSourceKind::Blazesym)
            .unwrap_err();
        assert!(err.to_string().contains("max_inline_depth"));
    }

    #[test]
    fn test_serde() {
        let mut config =
            TraceConfiguration::new(true, false, Some(8), Some(2), SymbolSourceKind::Blazesym)
                .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: TraceConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);

        config.set_include_foreign(false);
        assert!(!config.include_foreign());
        assert_eq!(config.source(), SymbolSourceKind::Blazesym);
    }
}
