// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns one raw address into the logical frames it stands for.
//!
//! The resolver adjusts every return address by one before querying the
//! [`SymbolSource`], so that the lookup lands inside the call instruction rather than
//! on the instruction after it. Callers hand in return addresses unmodified.

mod backtrace_source;
#[cfg(unix)]
mod blazesym_source;
mod symbol_map;

pub use backtrace_source::BacktraceSource;
#[cfg(unix)]
pub use blazesym_source::BlazesymSource;
pub use symbol_map::SymbolMap;

use crate::definition::DefinitionRegistry;
use crate::frame::{StackFrame, Symbol, UNKNOWN_LINE};
use std::path::{Path, PathBuf};
use symbolic_common::{Language, Name};
use symbolic_demangle::{Demangle, DemangleOptions};

pub const DEFAULT_MAX_INLINE_DEPTH: usize = 64;

/// One logical frame as reported by the host debug information.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolInfo {
    /// Raw, possibly mangled, symbol name.
    pub name: Option<String>,
    pub file: Option<PathBuf>,
    pub line: Option<u32>,
    pub is_inlined: bool,
}

impl SymbolInfo {
    pub fn new(name: impl Into<String>, file: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            name: Some(name.into()),
            file: Some(file.into()),
            line: Some(line),
            is_inlined: false,
        }
    }

    pub fn inlined(mut self) -> Self {
        self.is_inlined = true;
        self
    }
}

/// Host debug-information lookup.
///
/// Implementations append every logical frame for the physical `address`,
/// innermost first: any inlined frames, then exactly one non-inlined frame last.
/// Appending nothing means the address is unknown. Lookups must be read-only so
/// that concurrent resolutions don't interfere.
pub trait SymbolSource {
    fn lookup(&self, address: u64, out: &mut Vec<SymbolInfo>);
}

impl<S: SymbolSource + ?Sized> SymbolSource for &S {
    fn lookup(&self, address: u64, out: &mut Vec<SymbolInfo>) {
        (**self).lookup(address, out)
    }
}

impl<S: SymbolSource + ?Sized> SymbolSource for Box<S> {
    fn lookup(&self, address: u64, out: &mut Vec<SymbolInfo>) {
        (**self).lookup(address, out)
    }
}

/// An entry handed to the trace builder: either a raw address, or something that
/// was already resolved and resolves to itself.
#[derive(Debug, Clone)]
pub enum RawFrame {
    Address(u64),
    Resolved(StackFrame),
    /// A resolved frame carrying an extra tag, e.g. a repetition count.
    Tagged(StackFrame, usize),
}

impl From<u64> for RawFrame {
    fn from(address: u64) -> Self {
        RawFrame::Address(address)
    }
}

impl From<StackFrame> for RawFrame {
    fn from(frame: StackFrame) -> Self {
        RawFrame::Resolved(frame)
    }
}

impl From<(StackFrame, usize)> for RawFrame {
    fn from((frame, tag): (StackFrame, usize)) -> Self {
        RawFrame::Tagged(frame, tag)
    }
}

pub struct Resolver<'a> {
    source: &'a dyn SymbolSource,
    definitions: Option<&'a DefinitionRegistry>,
    demangle_names: bool,
    max_inline_depth: usize,
}

impl<'a> Resolver<'a> {
    pub fn new(source: &'a dyn SymbolSource) -> Self {
        Self {
            source,
            definitions: None,
            demangle_names: true,
            max_inline_depth: DEFAULT_MAX_INLINE_DEPTH,
        }
    }

    pub fn with_definitions(mut self, definitions: &'a DefinitionRegistry) -> Self {
        self.definitions = Some(definitions);
        self
    }

    pub fn with_demangle_names(mut self, demangle_names: bool) -> Self {
        self.demangle_names = demangle_names;
        self
    }

    /// Bounds how many logical frames one address may expand to. Must be non-zero.
    pub fn with_max_inline_depth(mut self, max_inline_depth: usize) -> Self {
        self.max_inline_depth = max_inline_depth.max(1);
        self
    }

    pub fn resolve(&self, address: u64) -> Vec<StackFrame> {
        let mut frames = Vec::with_capacity(1);
        self.resolve_into(address, &mut frames);
        frames
    }

    pub fn resolve_raw(&self, entry: RawFrame) -> Vec<StackFrame> {
        let mut frames = Vec::with_capacity(1);
        self.resolve_raw_into(entry, &mut frames);
        frames
    }

    pub fn resolve_raw_into(&self, entry: RawFrame, out: &mut Vec<StackFrame>) {
        match entry {
            RawFrame::Address(address) => self.resolve_into(address, out),
            RawFrame::Resolved(frame) | RawFrame::Tagged(frame, _) => out.push(frame),
        }
    }

    /// Appends the logical frames of `address` to `out`, innermost first.
    ///
    /// Never fails: an address without debug information yields one unresolved
    /// frame carrying the address.
    pub fn resolve_into(&self, address: u64, out: &mut Vec<StackFrame>) {
        let mut infos = Vec::new();
        self.source.lookup(lookup_address(address), &mut infos);

        if infos.is_empty() {
            tracing::debug!("No debug information for ip {address:#x}");
            out.push(StackFrame::unresolved(address));
            return;
        }
        check_shape(address, &infos);

        if infos.len() > self.max_inline_depth {
            // Keep the innermost inlined frames and the physical frame.
            let dropped = infos.len() - self.max_inline_depth;
            tracing::debug!("Dropping {dropped} inlined frames at ip {address:#x}");
            let physical = infos.len() - 1;
            infos.drain(self.max_inline_depth - 1..physical);
        }

        out.reserve(infos.len());
        out.extend(infos.into_iter().map(|info| self.to_frame(address, info)));
    }

    fn to_frame(&self, address: u64, info: SymbolInfo) -> StackFrame {
        let raw_name = info.name.as_deref().filter(|n| !n.is_empty());
        let function_name = match raw_name {
            Some(raw) if self.demangle_names => demangle(raw),
            Some(raw) => raw.to_owned(),
            None => String::new(),
        };

        let definition = self
            .definitions
            .and_then(|registry| registry.get(&function_name))
            .cloned();
        let is_foreign = definition.is_none() && is_foreign(raw_name, info.file.as_deref());

        let source_file = info
            .file
            .map(|f| Symbol::from(f.to_string_lossy().into_owned()))
            .unwrap_or_default();
        let line_number = info
            .line
            .and_then(|l| i32::try_from(l).ok())
            .unwrap_or(UNKNOWN_LINE);

        StackFrame::new(Symbol::from(function_name), source_file, line_number)
            .with_definition(definition)
            .with_foreign(is_foreign)
            .with_inlined(info.is_inlined)
            .with_raw_address(address)
    }
}

/// The address actually looked up for a return address.
pub fn lookup_address(address: u64) -> u64 {
    address.saturating_sub(1)
}

fn check_shape(address: u64, infos: &[SymbolInfo]) {
    let Some((physical, inlined)) = infos.split_last() else {
        return;
    };
    assert!(
        !physical.is_inlined && inlined.iter().all(|i| i.is_inlined),
        "invariant violated: symbol source returned a malformed frame sequence for ip {address:#x}: \
         expected inlined frames followed by exactly one physical frame, got {infos:?}"
    );
}

fn demangle(raw: &str) -> String {
    match Name::from(raw).demangle(DemangleOptions::name_only()) {
        Some(demangled) => demangled,
        None => raw.to_owned(),
    }
}

/// Managed code is Rust code. A known source file decides; otherwise the mangling
/// scheme of the raw name does; with neither the frame is foreign.
fn is_foreign(raw_name: Option<&str>, file: Option<&Path>) -> bool {
    if let Some(file) = file {
        return file.extension().is_none_or(|ext| ext != "rs");
    }
    match raw_name {
        Some(raw) => Name::from(raw).detect_language() != Language::Rust,
        None => true,
    }
}
