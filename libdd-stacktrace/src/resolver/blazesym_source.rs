// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::{SymbolInfo, SymbolSource};
use blazesym::symbolize::{
    source::{Process, Source},
    CodeInfo, Input, Symbolized, Symbolizer,
};
use std::path::PathBuf;

/// Resolves addresses of the current process through blazesym.
///
/// blazesym reports inlined functions outermost first, attached to the symbol that
/// physically contains the address; they are reversed here to get innermost first.
/// Names are left mangled so the resolver demangles every source the same way.
pub struct BlazesymSource {
    src: Source<'static>,
    symbolizer: Symbolizer,
}

impl BlazesymSource {
    pub fn new() -> Self {
        let mut process = Process::new(std::process::id().into());
        // Reading /proc/<pid>/map_files requires privileges we don't want to rely on.
        process.map_files = false;
        let symbolizer = Symbolizer::builder().enable_demangling(false).build();
        Self {
            src: Source::Process(process),
            symbolizer,
        }
    }
}

impl Default for BlazesymSource {
    fn default() -> Self {
        Self::new()
    }
}

fn location(code_info: &CodeInfo<'_>) -> (Option<PathBuf>, Option<u32>) {
    (Some(code_info.to_path().into_owned()), code_info.line)
}

fn symbol_info(
    name: &str,
    (file, line): (Option<PathBuf>, Option<u32>),
    is_inlined: bool,
) -> SymbolInfo {
    SymbolInfo {
        name: Some(name.to_owned()),
        file,
        line,
        is_inlined,
    }
}

impl SymbolSource for BlazesymSource {
    fn lookup(&self, address: u64, out: &mut Vec<SymbolInfo>) {
        match self
            .symbolizer
            .symbolize_single(&self.src, Input::AbsAddr(address))
        {
            Ok(Symbolized::Sym(sym)) => {
                for inlined in sym.inlined.iter().rev() {
                    let loc = match &inlined.code_info {
                        Some(c) => location(c),
                        None => (None, None),
                    };
                    out.push(symbol_info(&inlined.name, loc, true));
                }
                let loc = match &sym.code_info {
                    Some(c) => location(c),
                    None => (None, None),
                };
                out.push(symbol_info(&sym.name, loc, false));
            }
            Ok(Symbolized::Unknown(reason)) => {
                tracing::debug!("Couldn't symbolize {address:#x}: {reason}");
            }
            Err(e) => {
                tracing::debug!("Symbolization of {address:#x} failed: {e:#}");
            }
        }
    }
}
