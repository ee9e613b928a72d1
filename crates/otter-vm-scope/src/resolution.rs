//! Resolver output consumed by the code generator

use std::collections::BTreeMap;

use otter_vm_bytecode::ArgumentsPolicy;
use serde::{Deserialize, Serialize};

use crate::ast::{NodeId, VariableKind};
use crate::scope::DeclarationMode;

/// Where a declaration lives at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Storage {
    /// Virtual register of the owning activation
    Register(u16),
    /// Slot in the owning scope's environment block
    Cell {
        /// Cell index inside the block
        slot: u16,
    },
    /// Global object property or global lexical binding
    Global,
}

impl Storage {
    /// Whether the declaration lives in an environment cell
    pub fn is_cell(self) -> bool {
        matches!(self, Self::Cell { .. })
    }
}

/// How a reference site reaches its binding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceTarget {
    /// Register of the current activation
    Register(u16),
    /// Environment cell `depth` blocks outward (0 = innermost block)
    Cell {
        /// Blocks to walk outward
        depth: u16,
        /// Cell index inside the block
        slot: u16,
    },
    /// Global lookup by name
    Global(String),
}

/// Resolved declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationInfo {
    /// Bound name
    pub name: String,
    /// Binding kind
    pub kind: VariableKind,
    /// Declaration mode
    pub mode: DeclarationMode,
    /// Storage location
    pub storage: Storage,
}

/// Environment requirements of a block-like scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScopeLayout {
    /// The scope must push an environment block on entry
    pub needs_environment: bool,
    /// Number of cells in that block
    pub cell_count: u16,
}

/// Frame layout of a function (or the program)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionLayout {
    /// Register file size, reserved registers included
    pub register_count: u16,
    /// Cells in the function-level environment block
    pub cell_count: u16,
    /// The function body must push an environment block on entry
    pub needs_environment: bool,
    /// Formal parameter count (excluding rest)
    pub param_count: u16,
    /// Has a rest parameter
    pub has_rest: bool,
    /// Arguments object policy
    pub arguments: ArgumentsPolicy,
    /// Storage of the synthesized `arguments` binding
    pub arguments_storage: Option<Storage>,
    /// Storage of the receiver, if `this` is used
    pub receiver: Option<Storage>,
    /// Storage of `new.target`, if used
    pub new_target: Option<Storage>,
    /// Direct `eval` occurs in this function or a nested scope
    pub contains_direct_eval: bool,
    /// Strict mode code
    pub strict: bool,
    /// Self-binding scope of a named function expression
    pub name_scope: Option<ScopeLayout>,
}

/// Complete output of one resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub(crate) program: FunctionLayout,
    pub(crate) declarations: BTreeMap<NodeId, DeclarationInfo>,
    pub(crate) references: BTreeMap<NodeId, ReferenceTarget>,
    pub(crate) this_references: BTreeMap<NodeId, ReferenceTarget>,
    pub(crate) new_target_references: BTreeMap<NodeId, ReferenceTarget>,
    pub(crate) functions: BTreeMap<NodeId, FunctionLayout>,
    pub(crate) scopes: BTreeMap<NodeId, ScopeLayout>,
}

impl Resolution {
    /// Layout of the program's top level
    pub fn program(&self) -> &FunctionLayout {
        &self.program
    }

    /// Declaration bound by the identifier `node`
    pub fn declaration(&self, node: NodeId) -> Option<&DeclarationInfo> {
        self.declarations.get(&node)
    }

    /// Target of the identifier reference `node`
    pub fn reference(&self, node: NodeId) -> Option<&ReferenceTarget> {
        self.references.get(&node)
    }

    /// Target of the `this` expression `node`
    pub fn this_reference(&self, node: NodeId) -> Option<&ReferenceTarget> {
        self.this_references.get(&node)
    }

    /// Target of the `new.target` expression `node`
    pub fn new_target_reference(&self, node: NodeId) -> Option<&ReferenceTarget> {
        self.new_target_references.get(&node)
    }

    /// Layout of the function `node`
    pub fn function(&self, node: NodeId) -> Option<&FunctionLayout> {
        self.functions.get(&node)
    }

    /// Layout of the block-like scope introduced by `node`
    pub fn scope(&self, node: NodeId) -> Option<&ScopeLayout> {
        self.scopes.get(&node)
    }

    /// All declarations keyed by identifier node
    pub fn declarations(&self) -> impl Iterator<Item = (NodeId, &DeclarationInfo)> {
        self.declarations.iter().map(|(k, v)| (*k, v))
    }

    /// All references keyed by identifier node
    pub fn references(&self) -> impl Iterator<Item = (NodeId, &ReferenceTarget)> {
        self.references.iter().map(|(k, v)| (*k, v))
    }
}
