//! Scope tree built by the resolver
//!
//! Scopes, declarations and references live in arenas owned by
//! [`ScopeTree`] and refer to each other by index. The tree is a build-time
//! structure: once storage has been allocated the interesting parts are
//! copied into a [`Resolution`](crate::Resolution).

use otter_vm_bytecode::ArgumentsPolicy;
use rustc_hash::FxHashMap;

use crate::ast::{FunctionKind, NodeId, Span, VariableKind};
use crate::resolution::Storage;

/// Index of a scope in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

/// Index of a declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(pub u32);

/// Index of a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefId(pub u32);

/// Scopes that borrow allocation counters from their hoisting scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlainScopeKind {
    /// `{ ... }`
    Block,
    /// `catch (e) { ... }`
    Catch,
    /// `for (let ...)` head
    ForHead,
    /// `switch` case block
    Switch,
    /// Class body (binds the class name)
    Class,
    /// Self-binding of a named function expression
    FunctionName,
    /// Body of a function with parameter expressions. Owns the body's
    /// var-scoped bindings so that parameter defaults cannot see them.
    FunctionBody,
}

/// What kind of code a hoisting scope belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoistingKind {
    /// Script top level
    Program,
    /// Function body
    Function(FunctionKind),
}

impl HoistingKind {
    /// Arrow functions do not own `this`, `new.target` or `arguments`
    pub fn is_arrow(self) -> bool {
        matches!(self, Self::Function(kind) if kind.is_arrow())
    }

    /// Non-arrow function bodies
    pub fn is_ordinary_function(self) -> bool {
        matches!(self, Self::Function(kind) if !kind.is_arrow())
    }
}

/// Data owned by function bodies and the program
#[derive(Debug, Clone)]
pub struct HoistingScope {
    /// Program or function flavor
    pub kind: HoistingKind,
    /// No defaults, no destructuring, no rest
    pub simple_parameter_list: bool,
    /// Some parameter has a default value or a computed key. The body
    /// then gets its own [`PlainScopeKind::FunctionBody`] scope and the
    /// `arguments` object is kept out of registers.
    pub has_parameter_expressions: bool,
    /// Declaration bound directly to each formal parameter position
    pub params: Vec<Option<DeclId>>,
    /// Formal parameter count (excluding rest)
    pub param_count: u16,
    /// Has a rest parameter
    pub has_rest: bool,
    /// Receiver record, created on first `this`
    pub receiver: Option<DeclId>,
    /// `new.target` record, created on first use
    pub new_target: Option<DeclId>,
    /// Synthesized `arguments` binding
    pub arguments_decl: Option<DeclId>,
    /// Arguments object policy
    pub arguments: ArgumentsPolicy,
    /// This function or a nested scope calls direct `eval`
    pub contains_direct_eval: bool,
    /// Registers allocated (including reserved ones)
    pub register_count: u16,
}

impl HoistingScope {
    /// Fresh hoisting scope
    pub fn new(kind: HoistingKind) -> Self {
        Self {
            kind,
            simple_parameter_list: true,
            has_parameter_expressions: false,
            params: Vec::new(),
            param_count: 0,
            has_rest: false,
            receiver: None,
            new_target: None,
            arguments_decl: None,
            arguments: ArgumentsPolicy::None,
            contains_direct_eval: false,
            register_count: 0,
        }
    }
}

/// Plain or hoisting
#[derive(Debug, Clone)]
pub enum ScopeKind {
    /// Block-like scope
    Plain(PlainScopeKind),
    /// Function body or program
    Hoisting(Box<HoistingScope>),
}

/// A node of the scope tree
#[derive(Debug, Clone)]
pub struct Scope {
    /// Enclosing scope (`None` only for the root)
    pub parent: Option<ScopeId>,
    /// Nested scopes in source order
    pub children: Vec<ScopeId>,
    /// Scope flavor
    pub kind: ScopeKind,
    /// Strict mode code
    pub strict: bool,
    /// AST node that introduced the scope
    pub node: Option<NodeId>,
    /// Names visible at this level
    pub bindings: FxHashMap<String, DeclId>,
    /// Declarations whose storage belongs to this scope, in creation order
    pub declarations: Vec<DeclId>,
    /// References parked here until a matching declaration arrives
    pub pending: FxHashMap<String, Vec<RefId>>,
    /// A direct `eval` call occurs directly in this scope
    pub direct_eval: bool,
    /// Environment cells allocated in this scope
    pub cell_count: u16,
}

impl Scope {
    /// Whether this is a function body or the program
    pub fn is_hoisting(&self) -> bool {
        matches!(self.kind, ScopeKind::Hoisting(_))
    }

    /// Hoisting data, for hoisting scopes
    pub fn hoisting(&self) -> Option<&HoistingScope> {
        match &self.kind {
            ScopeKind::Hoisting(h) => Some(h),
            ScopeKind::Plain(_) => None,
        }
    }

    /// Mutable hoisting data, for hoisting scopes
    pub fn hoisting_mut(&mut self) -> Option<&mut HoistingScope> {
        match &mut self.kind {
            ScopeKind::Hoisting(h) => Some(h),
            ScopeKind::Plain(_) => None,
        }
    }

    /// Scope that receives `var` declarations written inside it
    pub fn is_var_scope(&self) -> bool {
        matches!(
            self.kind,
            ScopeKind::Hoisting(_) | ScopeKind::Plain(PlainScopeKind::FunctionBody)
        )
    }

    /// Needs a runtime environment block
    pub fn needs_environment(&self) -> bool {
        self.cell_count > 0 || self.hoisting().is_some_and(|h| h.contains_direct_eval)
    }
}

/// How a declaration came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclarationOrigin {
    /// `var`/`let`/`const` binding
    Variable,
    /// Function declaration
    Function,
    /// Generator function declaration
    GeneratorFunction,
    /// Class declaration or class-name binding
    Class,
    /// Catch clause parameter
    CatchParameter,
    /// Formal parameter
    Parameter,
    /// Synthesized `arguments` object
    Arguments,
    /// Self-binding of a named function expression
    FunctionName,
    /// Receiver (`this`) record
    Receiver,
    /// `new.target` record
    NewTarget,
}

impl DeclarationOrigin {
    /// Function declarations of either flavor
    pub fn is_function(self) -> bool {
        matches!(self, Self::Function | Self::GeneratorFunction)
    }
}

/// Declaration mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DeclarationMode {
    /// Declared where it is written
    Ordinary,
    /// Formal parameter
    Parameter,
    /// Property of the global object or global lexical binding
    Global,
    /// Written in a nested block, owned by the hoisting scope
    Hoisted,
}

/// One binding
#[derive(Debug, Clone)]
pub struct Declaration {
    /// Bound name
    pub name: String,
    /// Binding kind
    pub kind: VariableKind,
    /// Declaration mode
    pub mode: DeclarationMode,
    /// Origin
    pub origin: DeclarationOrigin,
    /// Can live in a register. Only ever flips from true to false.
    pub inlineable: bool,
    /// Assigned after the walk
    pub storage: Option<Storage>,
    /// Scope where the first declaring site is written
    pub scope: ScopeId,
    /// Scope whose activation owns the storage
    pub storage_scope: ScopeId,
    /// Identifier node of the first declaring site
    pub node: Option<NodeId>,
    /// Source position of the first declaring site
    pub span: Span,
}

/// One syntactic declaration of a name; several sites may share a
/// declaration (`var x; var x;`)
#[derive(Debug, Clone)]
pub struct DeclarationSite {
    /// Bound name
    pub name: String,
    /// Binding kind written at the site
    pub kind: VariableKind,
    /// Origin of the site
    pub origin: DeclarationOrigin,
    /// Scope the site is written in
    pub scope: ScopeId,
    /// Declaration the site binds
    pub decl: DeclId,
    /// Identifier node
    pub node: Option<NodeId>,
    /// Source position
    pub span: Span,
}

impl DeclarationSite {
    /// `let`, `const` and class declarations
    pub fn is_lexical(&self) -> bool {
        matches!(self.kind, VariableKind::Let | VariableKind::Const)
    }
}

/// Resolution progress of a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceState {
    /// Waiting on a pending list
    Unresolved,
    /// Connected to a declaration
    Resolved(DeclId),
    /// No declaration exists; implicit global
    Global,
}

/// One use of an identifier
#[derive(Debug, Clone)]
pub struct Reference {
    /// Referenced name
    pub name: String,
    /// Scope of the use
    pub scope: ScopeId,
    /// Resolution progress
    pub state: ReferenceState,
    /// Identifier node
    pub node: NodeId,
    /// Source position
    pub span: Span,
}

/// Arena of scopes, declarations, sites and references
#[derive(Debug, Clone, Default)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    declarations: Vec<Declaration>,
    sites: Vec<DeclarationSite>,
    references: Vec<Reference>,
}

impl ScopeTree {
    /// Empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scope under `parent` (or the root when `None`)
    pub fn add_scope(
        &mut self,
        parent: Option<ScopeId>,
        kind: ScopeKind,
        strict: bool,
        node: Option<NodeId>,
    ) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent,
            children: Vec::new(),
            kind,
            strict,
            node,
            bindings: FxHashMap::default(),
            declarations: Vec::new(),
            pending: FxHashMap::default(),
            direct_eval: false,
            cell_count: 0,
        });
        if let Some(parent) = parent {
            self.scopes[parent.0 as usize].children.push(id);
        }
        id
    }

    /// Root scope (the program)
    pub fn root(&self) -> Option<ScopeId> {
        (!self.scopes.is_empty()).then_some(ScopeId(0))
    }

    /// Scope by id
    #[inline]
    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    /// Mutable scope by id
    #[inline]
    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    /// All scopes with their ids
    pub fn scopes(&self) -> impl Iterator<Item = (ScopeId, &Scope)> {
        self.scopes
            .iter()
            .enumerate()
            .map(|(i, s)| (ScopeId(i as u32), s))
    }

    /// Declaration by id
    #[inline]
    pub fn declaration(&self, id: DeclId) -> &Declaration {
        &self.declarations[id.0 as usize]
    }

    /// Mutable declaration by id
    #[inline]
    pub fn declaration_mut(&mut self, id: DeclId) -> &mut Declaration {
        &mut self.declarations[id.0 as usize]
    }

    /// All declarations with their ids
    pub fn declarations(&self) -> impl Iterator<Item = (DeclId, &Declaration)> {
        self.declarations
            .iter()
            .enumerate()
            .map(|(i, d)| (DeclId(i as u32), d))
    }

    /// All declaration sites in source order
    pub fn sites(&self) -> &[DeclarationSite] {
        &self.sites
    }

    /// Reference by id
    #[inline]
    pub fn reference(&self, id: RefId) -> &Reference {
        &self.references[id.0 as usize]
    }

    /// Mutable reference by id
    #[inline]
    pub fn reference_mut(&mut self, id: RefId) -> &mut Reference {
        &mut self.references[id.0 as usize]
    }

    /// All references with their ids
    pub fn references(&self) -> impl Iterator<Item = (RefId, &Reference)> {
        self.references
            .iter()
            .enumerate()
            .map(|(i, r)| (RefId(i as u32), r))
    }

    /// Append a declaration (not yet bound to any name in any scope)
    pub fn push_declaration(&mut self, declaration: Declaration) -> DeclId {
        let id = DeclId(self.declarations.len() as u32);
        let storage_scope = declaration.storage_scope;
        self.declarations.push(declaration);
        self.scope_mut(storage_scope).declarations.push(id);
        id
    }

    /// Append a declaration site
    pub fn push_site(&mut self, site: DeclarationSite) {
        self.sites.push(site);
    }

    /// Append a reference
    pub fn push_reference(&mut self, reference: Reference) -> RefId {
        let id = RefId(self.references.len() as u32);
        self.references.push(reference);
        id
    }

    /// Nearest hoisting scope at or above `id`
    pub fn nearest_hoisting(&self, mut id: ScopeId) -> ScopeId {
        loop {
            let scope = self.scope(id);
            match scope.parent {
                Some(parent) if !scope.is_hoisting() => id = parent,
                _ => return id,
            }
        }
    }

    /// Nearest scope at or above `id` that receives `var` declarations
    pub fn nearest_var_scope(&self, mut id: ScopeId) -> ScopeId {
        loop {
            let scope = self.scope(id);
            match scope.parent {
                Some(parent) if !scope.is_var_scope() => id = parent,
                _ => return id,
            }
        }
    }

    /// Scope whose activation stores declarations bound in `id`. A
    /// function body scope stores into its function.
    pub fn storage_owner(&self, id: ScopeId) -> ScopeId {
        let scope = self.scope(id);
        match (&scope.kind, scope.parent) {
            (ScopeKind::Plain(PlainScopeKind::FunctionBody), Some(parent)) => parent,
            _ => id,
        }
    }

    /// Nearest hoisting scope that owns its receiver (skips arrows)
    pub fn receiver_scope(&self, id: ScopeId) -> ScopeId {
        let mut current = self.nearest_hoisting(id);
        loop {
            let scope = self.scope(current);
            let is_arrow = scope.hoisting().is_some_and(|h| h.kind.is_arrow());
            match scope.parent {
                Some(parent) if is_arrow => current = self.nearest_hoisting(parent),
                _ => return current,
            }
        }
    }

    /// Scopes from `id` up to the root, inclusive
    pub fn ancestors(&self, id: ScopeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: Some(id),
        }
    }

    /// Whether `ancestor` is `id` or one of its ancestors
    pub fn is_ancestor(&self, ancestor: ScopeId, id: ScopeId) -> bool {
        self.ancestors(id).any(|s| s == ancestor)
    }

    /// First declaration visible from `scope` under `name`
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<DeclId> {
        self.ancestors(scope)
            .find_map(|s| self.scope(s).bindings.get(name).copied())
    }

    /// Number of scopes
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Check if the tree has no scopes
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

/// Iterator over a scope and its ancestors
pub struct Ancestors<'a> {
    tree: &'a ScopeTree,
    next: Option<ScopeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = ScopeId;

    fn next(&mut self) -> Option<ScopeId> {
        let current = self.next?;
        self.next = self.tree.scope(current).parent;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(tree: &mut ScopeTree, parent: ScopeId) -> ScopeId {
        tree.add_scope(
            Some(parent),
            ScopeKind::Plain(PlainScopeKind::Block),
            false,
            None,
        )
    }

    #[test]
    fn test_nearest_hoisting_and_receiver_scope() {
        let mut tree = ScopeTree::new();
        let root = tree.add_scope(
            None,
            ScopeKind::Hoisting(Box::new(HoistingScope::new(HoistingKind::Program))),
            false,
            None,
        );
        let b = block(&mut tree, root);
        let arrow = tree.add_scope(
            Some(b),
            ScopeKind::Hoisting(Box::new(HoistingScope::new(HoistingKind::Function(
                FunctionKind::Arrow,
            )))),
            false,
            None,
        );
        let inner = block(&mut tree, arrow);

        assert_eq!(tree.nearest_hoisting(b), root);
        assert_eq!(tree.nearest_hoisting(inner), arrow);
        assert_eq!(tree.receiver_scope(inner), root);
        assert!(tree.is_ancestor(root, inner));
        assert!(!tree.is_ancestor(inner, root));
        assert_eq!(tree.ancestors(inner).count(), 4);
    }

    #[test]
    fn test_function_body_owns_vars_but_not_storage() {
        let mut tree = ScopeTree::new();
        let root = tree.add_scope(
            None,
            ScopeKind::Hoisting(Box::new(HoistingScope::new(HoistingKind::Program))),
            false,
            None,
        );
        let function = tree.add_scope(
            Some(root),
            ScopeKind::Hoisting(Box::new(HoistingScope::new(HoistingKind::Function(
                FunctionKind::Normal,
            )))),
            false,
            None,
        );
        let body = tree.add_scope(
            Some(function),
            ScopeKind::Plain(PlainScopeKind::FunctionBody),
            false,
            None,
        );
        let inner = block(&mut tree, body);

        assert_eq!(tree.nearest_var_scope(inner), body);
        assert_eq!(tree.nearest_var_scope(function), function);
        assert_eq!(tree.nearest_hoisting(inner), function);
        assert_eq!(tree.storage_owner(body), function);
        assert_eq!(tree.storage_owner(inner), inner);
    }

    #[test]
    fn test_lookup_walks_outward() {
        let mut tree = ScopeTree::new();
        let root = tree.add_scope(
            None,
            ScopeKind::Hoisting(Box::new(HoistingScope::new(HoistingKind::Program))),
            false,
            None,
        );
        let b = block(&mut tree, root);
        let decl = tree.push_declaration(Declaration {
            name: "x".into(),
            kind: VariableKind::Let,
            mode: DeclarationMode::Ordinary,
            origin: DeclarationOrigin::Variable,
            inlineable: true,
            storage: None,
            scope: root,
            storage_scope: root,
            node: None,
            span: Span::default(),
        });
        tree.scope_mut(root).bindings.insert("x".into(), decl);

        assert_eq!(tree.lookup(b, "x"), Some(decl));
        assert_eq!(tree.lookup(b, "y"), None);
        assert_eq!(tree.scope(root).declarations, vec![decl]);
    }
}
