// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::{SymbolInfo, SymbolSource};
use std::ffi::c_void;

/// Resolves addresses against the debug information of the current process, using
/// `backtrace::resolve`.
///
/// `backtrace` reports the frames of one address innermost first, inlined callees
/// before the function that physically contains the address, so every reported
/// symbol but the last one is inlined.
///
/// SIGNAL SAFETY:
///     Resolving symbols takes a global lock and allocates; it is not safe to call
///     from a signal handler. https://github.com/rust-lang/backtrace-rs/issues/414
#[derive(Debug, Default, Clone, Copy)]
pub struct BacktraceSource;

impl BacktraceSource {
    pub fn new() -> Self {
        Self
    }
}

impl SymbolSource for BacktraceSource {
    fn lookup(&self, address: u64, out: &mut Vec<SymbolInfo>) {
        let start = out.len();
        backtrace::resolve(address as usize as *mut c_void, |symbol| {
            let name = symbol.name().map(|name| match name.as_str() {
                Some(raw) => raw.to_owned(),
                None => String::from_utf8_lossy(name.as_bytes()).into_owned(),
            });
            out.push(SymbolInfo {
                name,
                file: symbol.filename().map(|f| f.to_path_buf()),
                line: symbol.lineno(),
                is_inlined: true,
            });
        });
        if let Some(physical) = out[start..].last_mut() {
            physical.is_inlined = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn marker_function() -> u64 {
        let marker: fn() -> u64 = marker_function;
        marker as usize as u64
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_resolves_own_function() {
        let mut out = Vec::new();
        // Look up an address inside the function body, not the entry itself.
        BacktraceSource::new().lookup(marker_function() + 1, &mut out);

        let Some(physical) = out.last() else {
            // No symbols available in this build; nothing to check.
            return;
        };
        assert!(!physical.is_inlined);
        let name = physical.name.as_deref().unwrap_or_default();
        assert!(name.contains("marker_function"), "{name}");
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_unknown_address() {
        let mut out = Vec::new();
        BacktraceSource::new().lookup(0x10, &mut out);
        assert!(out.is_empty());
    }
}
