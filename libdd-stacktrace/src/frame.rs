// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::definition::{Definition, DefinitionRef, Module};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Seed folded into every frame hash before any field, so that equal frames hash
/// equal no matter how they were constructed.
pub const FRAME_HASH_SEED: u64 = 0xf486_d19c_c65e_db3f;

/// Line number used when the debug information doesn't provide one.
pub const UNKNOWN_LINE: i32 = -1;

/// Placeholder used when nothing at all is known about a frame.
pub static UNKNOWN_FRAME: StackFrame = StackFrame {
    function_name: Symbol::EMPTY,
    source_file: Symbol::EMPTY,
    line_number: UNKNOWN_LINE,
    definition: None,
    is_foreign: true,
    is_inlined: false,
    raw_address: 0,
};

/// Cheaply clonable identifier for function and file names.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct Symbol(Cow<'static, str>);

impl Symbol {
    pub const EMPTY: Symbol = Symbol(Cow::Borrowed(""));

    pub fn new(value: impl Into<Cow<'static, str>>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&'static str> for Symbol {
    fn from(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

impl PartialEq<str> for Symbol {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for Symbol {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical frame of a stack trace.
///
/// Frames are values: once resolved they are never modified. Equality and hashing
/// ignore `raw_address` and the definition reference, since the same logical frame
/// can be reached through different addresses or be reloaded without its definition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StackFrame {
    #[serde(rename = "function", default)]
    function_name: Symbol,
    #[serde(rename = "file", default)]
    source_file: Symbol,
    #[serde(rename = "line", default = "unknown_line")]
    line_number: i32,
    // Points into process-local metadata, meaningless on any other host.
    #[serde(skip)]
    definition: Option<DefinitionRef>,
    #[serde(default)]
    is_foreign: bool,
    #[serde(default)]
    is_inlined: bool,
    #[serde(
        rename = "ip",
        default,
        serialize_with = "hex_address::serialize",
        deserialize_with = "hex_address::deserialize"
    )]
    #[schemars(with = "String")]
    raw_address: u64,
}

fn unknown_line() -> i32 {
    UNKNOWN_LINE
}

impl StackFrame {
    pub fn new(
        function_name: impl Into<Symbol>,
        source_file: impl Into<Symbol>,
        line_number: i32,
    ) -> Self {
        Self {
            function_name: function_name.into(),
            source_file: source_file.into(),
            line_number,
            definition: None,
            is_foreign: false,
            is_inlined: false,
            raw_address: 0,
        }
    }

    /// The shape returned for an address the debug information knows nothing about.
    pub fn unresolved(raw_address: u64) -> Self {
        Self {
            raw_address,
            ..UNKNOWN_FRAME.clone()
        }
    }

    pub fn with_definition(mut self, definition: Option<DefinitionRef>) -> Self {
        self.definition = definition;
        self
    }

    pub fn with_foreign(mut self, is_foreign: bool) -> Self {
        self.is_foreign = is_foreign;
        self
    }

    pub fn with_inlined(mut self, is_inlined: bool) -> Self {
        self.is_inlined = is_inlined;
        self
    }

    pub fn with_raw_address(mut self, raw_address: u64) -> Self {
        self.raw_address = raw_address;
        self
    }

    pub fn function_name(&self) -> &Symbol {
        &self.function_name
    }

    pub fn source_file(&self) -> &Symbol {
        &self.source_file
    }

    pub fn line_number(&self) -> i32 {
        self.line_number
    }

    pub fn has_known_line(&self) -> bool {
        self.line_number >= 0
    }

    pub fn definition(&self) -> Option<&Definition> {
        self.definition.as_deref()
    }

    pub fn definition_ref(&self) -> Option<&DefinitionRef> {
        self.definition.as_ref()
    }

    pub fn is_foreign(&self) -> bool {
        self.is_foreign
    }

    pub fn is_inlined(&self) -> bool {
        self.is_inlined
    }

    pub fn raw_address(&self) -> u64 {
        self.raw_address
    }

    /// True iff this frame was resolved to a method defined in `module`.
    pub fn belongs_to_module(&self, module: &Module) -> bool {
        match self.definition() {
            Some(Definition::Method(method)) => method.module().id() == module.id(),
            _ => false,
        }
    }
}

impl PartialEq for StackFrame {
    fn eq(&self, other: &Self) -> bool {
        self.line_number == other.line_number
            && self.is_foreign == other.is_foreign
            && self.function_name == other.function_name
            && self.source_file == other.source_file
            && self.is_inlined == other.is_inlined
    }
}

impl Eq for StackFrame {}

impl Hash for StackFrame {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(FRAME_HASH_SEED);
        self.line_number.hash(state);
        self.source_file.hash(state);
        self.function_name.hash(state);
        self.is_foreign.hash(state);
        self.is_inlined.hash(state);
    }
}

/// Addresses travel as `0x`-prefixed hex strings, like the crash tracker's `ip` fields.
mod hex_address {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(address: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{address:#x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        let digits = s.trim_start_matches("0x");
        u64::from_str_radix(digits, 16).map_err(D::Error::custom)
    }
}

#[cfg(test)]
impl crate::test_utils::TestInstance for StackFrame {
    fn test_instance(seed: u64) -> Self {
        StackFrame::new(
            format!("Bar::baz{seed}"),
            format!("/src/banana{seed}.rs"),
            (2 * seed + 1) as i32,
        )
        .with_foreign(seed % 3 == 0)
        .with_inlined(seed % 2 == 0)
        .with_raw_address(0x1000 + seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::DefinitionRegistry;
    use crate::test_utils::TestInstance;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;

    fn hash_of(frame: &StackFrame) -> u64 {
        let mut hasher = DefaultHasher::new();
        frame.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_new_defaults() {
        let frame = StackFrame::new("foo", "bar.rs", 42);
        assert_eq!(frame.function_name(), "foo");
        assert_eq!(frame.source_file(), "bar.rs");
        assert_eq!(frame.line_number(), 42);
        assert!(frame.definition().is_none());
        assert!(!frame.is_foreign());
        assert!(!frame.is_inlined());
        assert_eq!(frame.raw_address(), 0);
    }

    #[test]
    fn test_unknown_frame() {
        assert!(UNKNOWN_FRAME.function_name().is_empty());
        assert!(UNKNOWN_FRAME.source_file().is_empty());
        assert_eq!(UNKNOWN_FRAME.line_number(), -1);
        assert!(UNKNOWN_FRAME.is_foreign());
        assert!(!UNKNOWN_FRAME.is_inlined());
        assert!(UNKNOWN_FRAME.definition().is_none());
    }

    #[test]
    fn test_unresolved_keeps_address() {
        let frame = StackFrame::unresolved(0xdead_beef);
        assert_eq!(frame.raw_address(), 0xdead_beef);
        assert_eq!(frame, UNKNOWN_FRAME);
    }

    #[test]
    fn test_equality_ignores_address_and_definition() {
        let mut registry = DefinitionRegistry::new();
        let module = registry.define_module("Main");
        let definition = registry.register_method(&module, "foo", ["u32"]);

        let a = StackFrame::new("foo", "bar.rs", 42).with_raw_address(1);
        let b = StackFrame::new("foo", "bar.rs", 42)
            .with_raw_address(2)
            .with_definition(Some(definition));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_equality_distinguishes_flags() {
        let base = StackFrame::new("foo", "bar.rs", 42);
        assert_ne!(base, base.clone().with_inlined(true));
        assert_ne!(base, base.clone().with_foreign(true));
        assert_ne!(base, StackFrame::new("foo", "bar.rs", 43));
        assert_ne!(base, StackFrame::new("foo", "baz.rs", 42));
        assert_ne!(base, StackFrame::new("fob", "bar.rs", 42));
    }

    #[test]
    fn test_equality_property() {
        bolero::check!()
            .with_type::<(String, String, i32, bool, bool, u64, u64)>()
            .for_each(|(function, file, line, foreign, inlined, addr_a, addr_b)| {
                let a = StackFrame::new(function.clone(), file.clone(), *line)
                    .with_foreign(*foreign)
                    .with_inlined(*inlined)
                    .with_raw_address(*addr_a);
                let b = a.clone().with_raw_address(*addr_b);
                assert_eq!(a, b);
                assert_eq!(hash_of(&a), hash_of(&b));
            });
    }

    #[test]
    fn test_belongs_to_module() {
        let mut registry = DefinitionRegistry::new();
        let main = registry.define_module("Main");
        let other = registry.define_module("Other");
        let method = registry.register_method(&main, "foo", Vec::<String>::new());
        let toplevel = registry.register_other("top-level scope", "top-level scope");

        let frame = StackFrame::new("foo", "bar.rs", 1).with_definition(Some(method));
        assert!(frame.belongs_to_module(&main));
        assert!(!frame.belongs_to_module(&other));

        let toplevel_frame = StackFrame::new("top", "bar.rs", 1).with_definition(Some(toplevel));
        assert!(!toplevel_frame.belongs_to_module(&main));

        assert!(!StackFrame::new("foo", "bar.rs", 1).belongs_to_module(&main));
    }

    #[test]
    fn test_wire_round_trip_drops_definition() {
        let mut registry = DefinitionRegistry::new();
        let module = registry.define_module("Main");
        let definition = registry.register_method(&module, "Bar::baz7", ["i64"]);
        let frame = StackFrame::test_instance(7).with_definition(Some(definition));

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["function"], "Bar::baz7");
        assert_eq!(json["file"], "/src/banana7.rs");
        assert_eq!(json["line"], 15);
        assert_eq!(json["ip"], "0x1007");
        assert_eq!(json.as_object().unwrap().len(), 6);

        let decoded: StackFrame = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.raw_address(), frame.raw_address());
        assert!(decoded.definition().is_none());
    }

    #[test]
    fn test_decode_missing_fields() {
        let decoded: StackFrame = serde_json::from_str(r#"{"ip": "0xff"}"#).unwrap();
        assert_eq!(decoded, UNKNOWN_FRAME.clone().with_foreign(false));
        assert_eq!(decoded.raw_address(), 0xff);
        assert!(!decoded.has_known_line());
    }
}
