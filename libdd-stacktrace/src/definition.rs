// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metadata about the code a frame was resolved to.
//!
//! Definitions are owned by a [`DefinitionRegistry`], which the embedding runtime fills
//! in for the functions it manages. Frames only hold shared handles
//! ([`DefinitionRef`]) into it.

use crate::frame::Symbol;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type DefinitionRef = Arc<Definition>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u64);

impl ModuleId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A logical module owning methods. Identity is the [`ModuleId`], not the name.
#[derive(Debug, PartialEq, Eq)]
pub struct Module {
    id: ModuleId,
    name: Symbol,
}

impl Module {
    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &Symbol {
        &self.name
    }
}

#[derive(Debug)]
pub struct MethodDefinition {
    name: Symbol,
    module: Arc<Module>,
    arg_types: Vec<Symbol>,
}

impl MethodDefinition {
    pub fn name(&self) -> &Symbol {
        &self.name
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn arg_types(&self) -> &[Symbol] {
        &self.arg_types
    }
}

/// What a resolved frame can point at.
#[derive(Debug)]
pub enum Definition {
    Method(MethodDefinition),
    /// Anything that isn't a method, e.g. top-level code. Rendered with its label.
    Other { name: Symbol, label: Symbol },
}

impl Definition {
    pub fn as_method(&self) -> Option<&MethodDefinition> {
        match self {
            Definition::Method(method) => Some(method),
            Definition::Other { .. } => None,
        }
    }
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Definition::Method(method) => {
                write!(f, "{}(", method.name)?;
                for (i, arg) in method.arg_types.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Definition::Other { label, .. } => write!(f, "{label}"),
        }
    }
}

/// Owns the definitions that frames may refer to, keyed by demangled function name.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    next_module_id: u64,
    by_name: HashMap<String, DefinitionRef>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a module with a fresh identity. Two modules with the same name are
    /// still distinct modules.
    pub fn define_module(&mut self, name: impl Into<Symbol>) -> Arc<Module> {
        self.next_module_id += 1;
        Arc::new(Module {
            id: ModuleId(self.next_module_id),
            name: name.into(),
        })
    }

    pub fn register_method<I, S>(
        &mut self,
        module: &Arc<Module>,
        name: impl Into<Symbol>,
        arg_types: I,
    ) -> DefinitionRef
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        let name = name.into();
        let definition = Arc::new(Definition::Method(MethodDefinition {
            name: name.clone(),
            module: Arc::clone(module),
            arg_types: arg_types.into_iter().map(Into::into).collect(),
        }));
        self.insert(name, definition)
    }

    pub fn register_other(
        &mut self,
        name: impl Into<Symbol>,
        label: impl Into<Symbol>,
    ) -> DefinitionRef {
        let name = name.into();
        let definition = Arc::new(Definition::Other {
            name: name.clone(),
            label: label.into(),
        });
        self.insert(name, definition)
    }

    fn insert(&mut self, name: Symbol, definition: DefinitionRef) -> DefinitionRef {
        if self
            .by_name
            .insert(name.as_str().to_owned(), Arc::clone(&definition))
            .is_some()
        {
            tracing::debug!(name = name.as_str(), "Replaced an existing definition");
        }
        definition
    }

    pub fn get(&self, name: &str) -> Option<&DefinitionRef> {
        self.by_name.get(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
