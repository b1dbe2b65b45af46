// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::{SymbolInfo, SymbolSource};
use std::collections::BTreeMap;
use std::ops::Range;

/// In-memory table of address ranges and the logical frames each range maps to.
///
/// Useful for replaying symbol tables captured elsewhere and for deterministic tests.
/// Ranges are half-open and must not overlap; a later insert replaces an earlier range
/// with the same start.
#[derive(Debug, Default, Clone)]
pub struct SymbolMap {
    ranges: BTreeMap<u64, (u64, Vec<SymbolInfo>)>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// `frames` are innermost first, ending with the physical frame.
    pub fn insert(&mut self, range: Range<u64>, frames: Vec<SymbolInfo>) {
        self.ranges.insert(range.start, (range.end, frames));
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl SymbolSource for SymbolMap {
    fn lookup(&self, address: u64, out: &mut Vec<SymbolInfo>) {
        if let Some((_, (end, frames))) = self.ranges.range(..=address).next_back() {
            if address < *end {
                out.extend(frames.iter().cloned());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_ranges() {
        let mut map = SymbolMap::new();
        map.insert(0x100..0x200, vec![SymbolInfo::new("a", "a.rs", 1)]);
        map.insert(0x300..0x400, vec![SymbolInfo::new("b", "b.rs", 2)]);
        assert_eq!(map.len(), 2);

        let lookup = |address| {
            let mut out = Vec::new();
            map.lookup(address, &mut out);
            out.into_iter().filter_map(|i| i.name).collect::<Vec<_>>()
        };
        assert_eq!(lookup(0x100), ["a"]);
        assert_eq!(lookup(0x1ff), ["a"]);
        assert!(lookup(0x200).is_empty());
        assert!(lookup(0x50).is_empty());
        assert_eq!(lookup(0x3ff), ["b"]);
        assert!(lookup(0x400).is_empty());
    }
}
