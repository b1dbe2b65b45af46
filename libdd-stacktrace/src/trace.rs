// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::configuration::{SymbolSourceKind, TraceConfiguration};
use crate::definition::{DefinitionRegistry, Module};
use crate::error::TraceError;
use crate::frame::StackFrame;
use crate::resolver::{BacktraceSource, RawFrame, Resolver, SymbolSource};
use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fs::File;
use std::hash::Hash;
use std::path::Path;

const FORMAT_STRING: &str = "Datadog Stacktrace 1.0";

/// Names of the capture routines, as they appear in resolved frames. A captured trace
/// starts right below the outermost of them.
pub const CAPTURE_ENTRY_NAMES: [&str; 2] = [
    concat!(module_path!(), "::capture"),
    concat!(module_path!(), "::capture_current"),
];

/// An ordered list of frames, innermost (most recently called) first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StackTrace {
    format: String,
    frames: Vec<StackFrame>,
    incomplete: bool,
}

impl StackTrace {
    pub fn empty() -> Self {
        Self::from_frames(vec![], false)
    }

    pub fn from_frames(frames: Vec<StackFrame>, incomplete: bool) -> Self {
        Self {
            format: FORMAT_STRING.to_string(),
            frames,
            incomplete,
        }
    }

    /// Resolves `entries` (innermost first) into a trace.
    ///
    /// Foreign frames are dropped unless `include_foreign` is set. If the entries come
    /// from one of the capture routines, everything up to and including that routine
    /// is removed, so the trace starts at the caller. A compiler shim left at the top
    /// is dropped as well.
    pub fn build<I>(resolver: &Resolver<'_>, entries: I, include_foreign: bool) -> Self
    where
        I: IntoIterator,
        I::Item: Into<RawFrame>,
    {
        let entries = entries.into_iter();
        let mut frames = Vec::with_capacity(entries.size_hint().0);
        for entry in entries {
            resolver.resolve_raw_into(entry.into(), &mut frames);
        }
        if !include_foreign {
            frames.retain(|f| !f.is_foreign());
        }

        let mut trace = Self::from_frames(frames, false);
        trace.remove_through(|f| CAPTURE_ENTRY_NAMES.contains(&f.function_name().as_str()));
        trace.drop_leading_shim();
        trace
    }

    // Calling a closure or fn pointer through `dyn Fn*` interposes a compiler-generated
    // shim frame between the capture routine and its caller. It is not user code.
    fn drop_leading_shim(&mut self) {
        if self
            .frames
            .first()
            .is_some_and(|f| is_shim_thunk(f.function_name().as_str()))
        {
            tracing::debug!("Dropping leading shim frame {}", self.frames[0]);
            self.frames.remove(0);
        }
    }

    /// Removes every frame up to and including the last one matching `pred`.
    fn remove_through(&mut self, pred: impl Fn(&StackFrame) -> bool) -> bool {
        match self.frames.iter().rposition(pred) {
            Some(idx) => {
                self.frames.drain(..=idx);
                true
            }
            None => false,
        }
    }

    /// Removes the last frame named `name` and every frame before it.
    ///
    /// Errors with [`TraceError::TrimTargetNotFound`], leaving the trace unchanged,
    /// if no frame has that name.
    pub fn trim_to(&mut self, name: &str) -> Result<(), TraceError> {
        if self.remove_through(|f| f.function_name() == name) {
            Ok(())
        } else {
            Err(TraceError::TrimTargetNotFound {
                names: vec![name.to_owned()],
            })
        }
    }

    /// Like [`StackTrace::trim_to`], matching any of `names`.
    pub fn trim_to_any<S>(&mut self, names: &HashSet<S>) -> Result<(), TraceError>
    where
        S: Borrow<str> + Hash + Eq,
    {
        if self.remove_through(|f| names.contains(f.function_name().as_str())) {
            return Ok(());
        }
        let mut names: Vec<String> = names
            .iter()
            .map(|n| Borrow::<str>::borrow(n).to_owned())
            .collect();
        names.sort();
        Err(TraceError::TrimTargetNotFound { names })
    }

    /// Removes every frame belonging to `module`, wherever it is in the trace.
    pub fn trim_module(&mut self, module: &Module) {
        let before = self.frames.len();
        self.frames.retain(|f| !f.belongs_to_module(module));
        tracing::debug!(
            "Removed {} frames of module {}",
            before - self.frames.len(),
            module.name()
        );
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<StackFrame> {
        self.frames
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StackFrame> {
        self.frames.iter()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// True when capture stopped at the frame limit before reaching the stack bottom.
    pub fn is_incomplete(&self) -> bool {
        self.incomplete
    }

    /// Writes the trace as json to `path`. Definition references are not persisted.
    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        let file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, self)
            .with_context(|| format!("Failed to write json to {}", path.display()))?;
        Ok(())
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let trace: Self = serde_json::from_reader(file)
            .with_context(|| format!("Failed to parse json from {}", path.display()))?;
        anyhow::ensure!(
            trace.format == FORMAT_STRING,
            "Unsupported stack trace format {:?}",
            trace.format
        );
        Ok(trace)
    }
}

impl Default for StackTrace {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a> IntoIterator for &'a StackTrace {
    type Item = &'a StackFrame;
    type IntoIter = std::slice::Iter<'a, StackFrame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

impl IntoIterator for StackTrace {
    type Item = StackFrame;
    type IntoIter = std::vec::IntoIter<StackFrame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

fn is_shim_thunk(name: &str) -> bool {
    name.ends_with("{{vtable.shim}}")
        || name.ends_with("{{reify.shim}}")
        || name.contains("{shim:")
}

/// Captures the current stack and resolves it with `resolver`.
///
/// The returned trace starts at the caller of this function. At most `max_frames`
/// return addresses below the capture routines are collected; the trace is marked
/// incomplete if the stack was deeper.
///
/// SIGNAL SAFETY:
///     Walking the stack is reasonably safe, resolving it is not: this allocates and
///     takes the `backtrace` lock. Don't call it from a signal handler.
#[inline(never)]
pub fn capture(resolver: &Resolver<'_>, include_foreign: bool, max_frames: usize) -> StackTrace {
    let mut walk = StackWalk::new(capture_entry_points(), max_frames);
    backtrace::trace(|frame| walk.visit(frame.ip() as usize, frame.symbol_address() as usize));

    let incomplete = walk.incomplete;
    let mut trace = StackTrace::build(resolver, walk.into_addresses(), include_foreign);
    trace.incomplete = incomplete;
    trace
}

fn capture_entry_points() -> [usize; 2] {
    let capture: fn(&Resolver<'_>, bool, usize) -> StackTrace = capture;
    let capture_current: fn(&TraceConfiguration, Option<&DefinitionRegistry>) -> StackTrace =
        capture_current;
    [capture as usize, capture_current as usize]
}

/// Frames the walker may visit before reaching a capture routine: the unwinder's own
/// frames.
const MAX_UNWINDER_FRAMES: usize = 16;

/// Collects return addresses, skipping the unwinder and the capture routines by
/// their entry address. Names are not needed, so this works without full debug info.
struct StackWalk {
    entry_points: [usize; 2],
    max_frames: usize,
    addresses: Vec<u64>,
    /// Number of leading addresses that belong to the capture machinery.
    skip: Option<usize>,
    incomplete: bool,
}

impl StackWalk {
    fn new(entry_points: [usize; 2], max_frames: usize) -> Self {
        Self {
            entry_points,
            max_frames,
            addresses: Vec::with_capacity(max_frames.min(128)),
            skip: None,
            incomplete: false,
        }
    }

    /// Returns whether the walk should go on to the next frame.
    fn visit(&mut self, ip: usize, symbol_address: usize) -> bool {
        let is_entry = self.entry_points.contains(&symbol_address);
        let collected = match self.skip {
            Some(skip) => self.addresses.len() - skip,
            // Entry points not found (yet): leave room for the unwinder's frames.
            None => self.addresses.len().saturating_sub(MAX_UNWINDER_FRAMES),
        };
        if !is_entry && collected >= self.max_frames {
            self.incomplete = true;
            return false;
        }
        self.addresses.push(ip as u64);
        if is_entry {
            self.skip = Some(self.addresses.len());
        }
        true
    }

    /// Addresses below the outermost capture routine. If none was recognized, all of
    /// them; the name based trim in [`StackTrace::build`] takes over.
    fn into_addresses(mut self) -> Vec<u64> {
        match self.skip {
            Some(skip) => {
                self.addresses.drain(..skip);
            }
            None => tracing::debug!("Capture routine not found by address, trimming by name"),
        }
        self.addresses
    }
}

/// Captures the current stack using the source and limits from `config`.
#[inline(never)]
pub fn capture_current(
    config: &TraceConfiguration,
    definitions: Option<&DefinitionRegistry>,
) -> StackTrace {
    let source = make_source(config.source());
    let mut resolver = Resolver::new(source.as_ref())
        .with_demangle_names(config.demangle_names())
        .with_max_inline_depth(config.max_inline_depth());
    if let Some(definitions) = definitions {
        resolver = resolver.with_definitions(definitions);
    }
    capture(&resolver, config.include_foreign(), config.max_frames())
}

fn make_source(kind: SymbolSourceKind) -> Box<dyn SymbolSource> {
    match kind {
        SymbolSourceKind::InProcess => Box::new(BacktraceSource::new()),
        #[cfg(unix)]
        SymbolSourceKind::Blazesym => Box::new(crate::resolver::BlazesymSource::new()),
        #[cfg(not(unix))]
        SymbolSourceKind::Blazesym => {
            tracing::warn!("blazesym is not available on this platform, using in-process symbols");
            Box::new(BacktraceSource::new())
        }
    }
}

#[cfg(test)]
impl crate::test_utils::TestInstance for StackTrace {
    fn test_instance(_seed: u64) -> Self {
        let frames = (0..10).map(StackFrame::test_instance).collect();
        Self::from_frames(frames, false)
    }
}
