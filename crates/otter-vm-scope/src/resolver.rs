//! Scope resolver
//!
//! One depth-first walk over the program builds the [`ScopeTree`],
//! connects references to declarations and tracks which declarations are
//! observed across a function boundary. Storage is assigned after the
//! walk, once every capture is known.
//!
//! Forward references are handled with explicit pending lists: a reference
//! that finds no declaration yet is parked on its own scope, and every new
//! declaration sweeps the pending lists of its declaring scope and the
//! descendants it is visible in.

use otter_vm_bytecode::{
    ArgumentsPolicy, NEW_TARGET_REGISTER, RECEIVER_REGISTER, RESERVED_REGISTERS,
};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, debug_span, trace};

use crate::ast::{
    ClassNode, Expression, ForBinding, ForInit, FunctionBody, FunctionKind, FunctionNode,
    Identifier, MemberProperty, NodeId, ObjectMember, Pattern, Program, PropertyKey, Span,
    Statement, VariableDeclaration, VariableKind,
};
use crate::early_errors;
use crate::error::{CompileError, CompileResult};
use crate::resolution::{
    DeclarationInfo, FunctionLayout, ReferenceTarget, Resolution, ScopeLayout, Storage,
};
use crate::scope::{
    DeclId, Declaration, DeclarationMode, DeclarationOrigin, DeclarationSite, HoistingKind,
    HoistingScope, PlainScopeKind, RefId, Reference, ReferenceState, ScopeId, ScopeKind,
    ScopeTree,
};

/// Resolver configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Top-level `var`/function/`let`/`const` of the program are global
    /// bindings instead of registers or cells
    pub global_top_level: bool,
    /// Treat the whole program as strict mode code
    pub strict: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            global_top_level: true,
            strict: false,
        }
    }
}

impl ResolverConfig {
    /// Configuration for strict mode code
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }
}

/// Position of the walk. Passed by value; the resolver keeps no implicit
/// "current scope".
#[derive(Debug, Clone, Copy)]
struct Cursor {
    scope: ScopeId,
}

/// How a function node appears in its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionContext {
    Declaration,
    Expression,
    Method,
}

/// Outcome of searching the scope chain
enum Search {
    Found(DeclId),
    Park,
}

/// Use of `this` or `new.target`, kept until storage is known
struct ReceiverUse {
    node: NodeId,
    scope: ScopeId,
    decl: DeclId,
}

/// Scope resolver
#[derive(Default)]
pub struct Resolver {
    config: ResolverConfig,
    tree: ScopeTree,
    eval_scopes: Vec<ScopeId>,
    this_uses: Vec<ReceiverUse>,
    new_target_uses: Vec<ReceiverUse>,
    name_scopes: FxHashMap<NodeId, ScopeId>,
    /// Names each var scope's body will declare, known before the walk
    /// reaches the declarations
    var_names: FxHashMap<ScopeId, FxHashSet<String>>,
    annex_b_names: FxHashMap<ScopeId, FxHashSet<String>>,
}

impl Resolver {
    /// Create a resolver
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Configuration in use
    pub fn config(&self) -> ResolverConfig {
        self.config
    }

    /// Scope tree of the last resolution
    pub fn scope_tree(&self) -> &ScopeTree {
        &self.tree
    }

    /// Clear all state left by a previous resolution
    pub fn reset(&mut self) {
        self.tree = ScopeTree::new();
        self.eval_scopes.clear();
        self.this_uses.clear();
        self.new_target_uses.clear();
        self.name_scopes.clear();
        self.var_names.clear();
        self.annex_b_names.clear();
    }

    /// Resolve a whole program
    pub fn resolve(&mut self, program: &Program) -> CompileResult<Resolution> {
        let _span = debug_span!("resolve", program = program.node.0).entered();
        self.reset();

        let strict = self.config.strict || program.strict;
        let hoisting = HoistingScope::new(HoistingKind::Program);
        let mut var_names = FxHashSet::default();
        let mut annex_b = FxHashSet::default();
        collect_var_names(&program.body, strict, &mut var_names, &mut annex_b);
        let root = self.tree.add_scope(
            None,
            ScopeKind::Hoisting(Box::new(hoisting)),
            strict,
            Some(program.node),
        );
        self.var_names.insert(root, var_names);
        self.annex_b_names.insert(root, annex_b);

        let cur = Cursor { scope: root };
        self.prescan_functions(cur, &program.body);
        self.prescan_lexical(cur, &program.body, true);
        for statement in &program.body {
            self.visit_statement(cur, statement)?;
        }

        self.finish_unresolved();
        self.apply_eval_poisoning();
        early_errors::validate(&self.tree)?;
        self.allocate_storage()?;
        Ok(self.build_resolution())
    }

    // ==================== Declarations ====================

    fn declaration_mode(&self, target: ScopeId, written: ScopeId, kind: VariableKind) -> DeclarationMode {
        let is_program = self
            .tree
            .scope(target)
            .hoisting()
            .is_some_and(|h| h.kind == HoistingKind::Program);
        if is_program && self.config.global_top_level && kind == VariableKind::Var {
            DeclarationMode::Global
        } else if target != written {
            DeclarationMode::Hoisted
        } else {
            DeclarationMode::Ordinary
        }
    }

    /// Declare `id` in the current scope (or the var scope for `var`)
    fn declare(
        &mut self,
        cur: Cursor,
        id: &Identifier,
        kind: VariableKind,
        origin: DeclarationOrigin,
    ) -> DeclId {
        let (target, existing) = if kind == VariableKind::Var {
            let target = self.tree.nearest_var_scope(cur.scope);
            (target, self.var_binding(target, &id.name))
        } else {
            let existing = self.tree.scope(cur.scope).bindings.get(&id.name).copied();
            (cur.scope, existing)
        };

        if let Some(existing) = existing {
            self.tree.push_site(DeclarationSite {
                name: id.name.clone(),
                kind,
                origin,
                scope: cur.scope,
                decl: existing,
                node: Some(id.node),
                span: id.span,
            });
            return existing;
        }

        let mode = if origin == DeclarationOrigin::Parameter {
            DeclarationMode::Parameter
        } else {
            self.declaration_mode(target, cur.scope, kind)
        };
        let decl = self.tree.push_declaration(Declaration {
            name: id.name.clone(),
            kind,
            mode,
            origin,
            inlineable: true,
            storage: None,
            scope: cur.scope,
            storage_scope: self.tree.storage_owner(target),
            node: Some(id.node),
            span: id.span,
        });
        self.tree.push_site(DeclarationSite {
            name: id.name.clone(),
            kind,
            origin,
            scope: cur.scope,
            decl,
            node: Some(id.node),
            span: id.span,
        });
        self.tree
            .scope_mut(target)
            .bindings
            .insert(id.name.clone(), decl);
        self.resolve_pending(target, &id.name, decl);
        decl
    }

    /// Existing var-scoped binding of `name` in `scope`. A function body
    /// scope shares the parameters of its function, so `var a` in the body
    /// keeps the value of parameter `a`.
    fn var_binding(&self, scope: ScopeId, name: &str) -> Option<DeclId> {
        let s = self.tree.scope(scope);
        if let Some(decl) = s.bindings.get(name) {
            return Some(*decl);
        }
        match (&s.kind, s.parent) {
            (ScopeKind::Plain(PlainScopeKind::FunctionBody), Some(function)) => self
                .tree
                .scope(function)
                .bindings
                .get(name)
                .copied()
                .filter(|d| self.tree.declaration(*d).origin == DeclarationOrigin::Parameter),
            _ => None,
        }
    }

    /// Declare every name bound by `pattern`
    fn declare_pattern(
        &mut self,
        cur: Cursor,
        pattern: &Pattern,
        kind: VariableKind,
        origin: DeclarationOrigin,
    ) {
        let mut names = Vec::new();
        pattern.bound_names(&mut names);
        for id in names {
            self.declare(cur, id, kind, origin);
        }
    }

    /// Function-level declaration of function statements at the top of a
    /// function body or the program
    fn prescan_functions(&mut self, cur: Cursor, body: &[Statement]) {
        for statement in body {
            if let Statement::Function(function) = statement {
                if let Some(id) = &function.id {
                    self.declare(cur, id, VariableKind::Var, function_origin(function.kind));
                }
            }
        }
    }

    /// Pre-declare lexical declarations of a scope so that earlier
    /// statements of the same scope resolve to them
    fn prescan_lexical<'a>(
        &mut self,
        cur: Cursor,
        body: impl IntoIterator<Item = &'a Statement>,
        function_top: bool,
    ) {
        for statement in body {
            match statement {
                Statement::Variable(decl) if decl.kind != VariableKind::Var => {
                    for declarator in &decl.declarators {
                        self.declare_pattern(
                            cur,
                            &declarator.target,
                            decl.kind,
                            DeclarationOrigin::Variable,
                        );
                    }
                }
                Statement::Class(class) => {
                    if let Some(id) = &class.id {
                        self.declare(cur, id, VariableKind::Let, DeclarationOrigin::Class);
                    }
                }
                Statement::Function(function) if !function_top => {
                    if let Some(id) = &function.id {
                        self.declare(cur, id, VariableKind::Let, function_origin(function.kind));
                        if !self.tree.scope(cur.scope).strict && function.kind == FunctionKind::Normal
                        {
                            self.hoist_block_function(cur, id);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Sloppy-mode block function: also bind the name as a `var` of the
    /// hoisting scope unless a lexical binding in between would clash
    fn hoist_block_function(&mut self, cur: Cursor, id: &Identifier) {
        let hoisting = self.tree.nearest_var_scope(cur.scope);
        let mut blocked = false;
        let mut scope = self.tree.scope(cur.scope).parent;
        while let Some(s) = scope {
            if s == hoisting {
                break;
            }
            if self.tree.scope(s).bindings.contains_key(&id.name) {
                blocked = true;
                break;
            }
            scope = self.tree.scope(s).parent;
        }
        if !blocked {
            if let Some(existing) = self.var_binding(hoisting, &id.name) {
                let existing = self.tree.declaration(existing);
                blocked = existing.kind != VariableKind::Var
                    || existing.origin == DeclarationOrigin::Parameter;
                if !blocked {
                    return;
                }
            }
        }

        if blocked {
            trace!(name = %id.name, "block function not hoisted");
            let var_declared = self
                .var_names
                .get(&hoisting)
                .is_some_and(|names| names.contains(&id.name));
            if !var_declared {
                if let Some(names) = self.annex_b_names.get_mut(&hoisting) {
                    names.remove(&id.name);
                }
                self.release_pending(hoisting, &id.name);
            }
            return;
        }

        let mode = self.declaration_mode(hoisting, cur.scope, VariableKind::Var);
        let decl = self.tree.push_declaration(Declaration {
            name: id.name.clone(),
            kind: VariableKind::Var,
            mode,
            origin: DeclarationOrigin::Function,
            inlineable: true,
            storage: None,
            scope: cur.scope,
            storage_scope: self.tree.storage_owner(hoisting),
            node: None,
            span: id.span,
        });
        self.tree
            .scope_mut(hoisting)
            .bindings
            .insert(id.name.clone(), decl);
        self.resolve_pending(hoisting, &id.name, decl);
    }

    // ==================== References ====================

    /// Search outward for `name`. Stops early at a var scope that is
    /// known to declare the name later in its body.
    fn search(&self, from: ScopeId, name: &str) -> Search {
        for s in self.tree.ancestors(from) {
            let scope = self.tree.scope(s);
            if let Some(decl) = scope.bindings.get(name) {
                return Search::Found(*decl);
            }
            let declared_later = [&self.var_names, &self.annex_b_names]
                .iter()
                .any(|names| names.get(&s).is_some_and(|names| names.contains(name)));
            let own_arguments = name == "arguments"
                && scope.hoisting().is_some_and(|h| h.kind.is_ordinary_function());
            if declared_later || own_arguments {
                return Search::Park;
            }
        }
        Search::Park
    }

    fn reference(&mut self, cur: Cursor, id: &Identifier) {
        let reference = self.tree.push_reference(Reference {
            name: id.name.clone(),
            scope: cur.scope,
            state: ReferenceState::Unresolved,
            node: id.node,
            span: id.span,
        });
        self.lookup_or_park(reference);
    }

    fn lookup_or_park(&mut self, reference: RefId) {
        let (scope, name) = {
            let r = self.tree.reference(reference);
            (r.scope, r.name.clone())
        };
        match self.search(scope, &name) {
            Search::Found(decl) => self.connect(reference, decl),
            Search::Park => {
                self.tree
                    .scope_mut(scope)
                    .pending
                    .entry(name)
                    .or_default()
                    .push(reference);
            }
        }
    }

    fn connect(&mut self, reference: RefId, decl: DeclId) {
        let ref_scope = self.tree.reference(reference).scope;
        self.tree.reference_mut(reference).state = ReferenceState::Resolved(decl);

        let storage_scope = self.tree.declaration(decl).storage_scope;
        if self.tree.nearest_hoisting(ref_scope) != self.tree.nearest_hoisting(storage_scope) {
            let declaration = self.tree.declaration_mut(decl);
            if declaration.inlineable {
                trace!(name = %declaration.name, "captured across function boundary");
            }
            declaration.inlineable = false;
        }
    }

    /// Scopes under `root` (inclusive) where `name` still means `decl`
    fn visible_subtree(&self, root: ScopeId, name: &str, decl: Option<DeclId>) -> Vec<ScopeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(s) = stack.pop() {
            let scope = self.tree.scope(s);
            if s != root {
                if let Some(other) = scope.bindings.get(name) {
                    if Some(*other) != decl {
                        continue;
                    }
                }
            }
            out.push(s);
            stack.extend(scope.children.iter().rev().copied());
        }
        out
    }

    /// Connect references to `name` parked under `scope` to `decl`
    fn resolve_pending(&mut self, scope: ScopeId, name: &str, decl: DeclId) {
        for s in self.visible_subtree(scope, name, Some(decl)) {
            if let Some(parked) = self.tree.scope_mut(s).pending.remove(name) {
                for reference in parked {
                    self.connect(reference, decl);
                }
            }
        }
    }

    /// Re-run the search for references to `name` parked under `scope`
    fn release_pending(&mut self, scope: ScopeId, name: &str) {
        for s in self.visible_subtree(scope, name, None) {
            if let Some(parked) = self.tree.scope_mut(s).pending.remove(name) {
                for reference in parked {
                    self.lookup_or_park(reference);
                }
            }
        }
    }

    fn use_receiver(&mut self, cur: Cursor, node: NodeId, span: Span) {
        let owner = self.tree.receiver_scope(cur.scope);
        let decl = match self.tree.scope(owner).hoisting().and_then(|h| h.receiver) {
            Some(decl) => decl,
            None => {
                let decl = self.synthesize(owner, "this", DeclarationOrigin::Receiver, span);
                if let Some(h) = self.tree.scope_mut(owner).hoisting_mut() {
                    h.receiver = Some(decl);
                }
                decl
            }
        };
        self.mark_escape(cur.scope, decl);
        self.this_uses.push(ReceiverUse {
            node,
            scope: cur.scope,
            decl,
        });
    }

    fn use_new_target(&mut self, cur: Cursor, node: NodeId, span: Span) {
        let owner = self.tree.receiver_scope(cur.scope);
        let decl = match self.tree.scope(owner).hoisting().and_then(|h| h.new_target) {
            Some(decl) => decl,
            None => {
                let decl =
                    self.synthesize(owner, "new.target", DeclarationOrigin::NewTarget, span);
                if let Some(h) = self.tree.scope_mut(owner).hoisting_mut() {
                    h.new_target = Some(decl);
                }
                decl
            }
        };
        self.mark_escape(cur.scope, decl);
        self.new_target_uses.push(ReceiverUse {
            node,
            scope: cur.scope,
            decl,
        });
    }

    /// Declaration created by the resolver rather than written in source
    fn synthesize(
        &mut self,
        owner: ScopeId,
        name: &str,
        origin: DeclarationOrigin,
        span: Span,
    ) -> DeclId {
        let kind = if origin == DeclarationOrigin::Arguments {
            VariableKind::Var
        } else {
            VariableKind::Const
        };
        self.tree.push_declaration(Declaration {
            name: name.to_string(),
            kind,
            mode: DeclarationMode::Ordinary,
            origin,
            inlineable: true,
            storage: None,
            scope: owner,
            storage_scope: owner,
            node: None,
            span,
        })
    }

    fn mark_escape(&mut self, from: ScopeId, decl: DeclId) {
        let owner = self.tree.declaration(decl).storage_scope;
        if self.tree.nearest_hoisting(from) != self.tree.nearest_hoisting(owner) {
            self.tree.declaration_mut(decl).inlineable = false;
        }
    }

    // ==================== Scopes ====================

    fn enter_plain(&mut self, cur: Cursor, kind: PlainScopeKind, node: Option<NodeId>) -> Cursor {
        let strict = self.tree.scope(cur.scope).strict || kind == PlainScopeKind::Class;
        let scope = self
            .tree
            .add_scope(Some(cur.scope), ScopeKind::Plain(kind), strict, node);
        Cursor { scope }
    }

    fn visit_block(&mut self, cur: Cursor, body: &[Statement], node: Option<NodeId>) -> CompileResult<()> {
        let inner = self.enter_plain(cur, PlainScopeKind::Block, node);
        self.prescan_lexical(inner, body, false);
        for statement in body {
            self.visit_statement(inner, statement)?;
        }
        Ok(())
    }

    /// Sub-statement of `if`, loops and labels. Declarations get an
    /// implicit block so they do not leak into the enclosing scope.
    fn visit_body_statement(&mut self, cur: Cursor, statement: &Statement) -> CompileResult<()> {
        let declares = match statement {
            Statement::Function(_) | Statement::Class(_) => true,
            Statement::Variable(decl) => decl.kind != VariableKind::Var,
            _ => false,
        };
        if declares {
            self.visit_block(cur, std::slice::from_ref(statement), None)
        } else {
            self.visit_statement(cur, statement)
        }
    }

    // ==================== Statements ====================

    fn visit_statement(&mut self, cur: Cursor, statement: &Statement) -> CompileResult<()> {
        match statement {
            Statement::Expression(expr) => self.visit_expression(cur, expr),
            Statement::Variable(decl) => self.visit_variable_declaration(cur, decl),
            Statement::Function(function) => {
                self.visit_function(cur, function, FunctionContext::Declaration)
            }
            Statement::Class(class) => self.visit_class(cur, class),
            Statement::Block(block) => self.visit_block(cur, &block.body, Some(block.node)),
            Statement::If {
                test,
                consequent,
                alternate,
            } => {
                self.visit_expression(cur, test)?;
                self.visit_body_statement(cur, consequent)?;
                if let Some(alternate) = alternate {
                    self.visit_body_statement(cur, alternate)?;
                }
                Ok(())
            }
            Statement::For {
                init,
                test,
                update,
                body,
                node,
            } => {
                let head = match init {
                    Some(ForInit::Declaration(decl)) if decl.kind != VariableKind::Var => {
                        let head = self.enter_plain(cur, PlainScopeKind::ForHead, Some(*node));
                        for declarator in &decl.declarators {
                            self.declare_pattern(
                                head,
                                &declarator.target,
                                decl.kind,
                                DeclarationOrigin::Variable,
                            );
                        }
                        head
                    }
                    _ => cur,
                };
                match init {
                    Some(ForInit::Declaration(decl)) => {
                        self.visit_variable_declaration(head, decl)?
                    }
                    Some(ForInit::Expression(expr)) => self.visit_expression(head, expr)?,
                    None => {}
                }
                if let Some(test) = test {
                    self.visit_expression(head, test)?;
                }
                if let Some(update) = update {
                    self.visit_expression(head, update)?;
                }
                self.visit_body_statement(head, body)
            }
            Statement::ForInOf {
                left,
                right,
                body,
                node,
                ..
            } => match left {
                ForBinding::Declaration { kind, target } if *kind != VariableKind::Var => {
                    let head = self.enter_plain(cur, PlainScopeKind::ForHead, Some(*node));
                    self.declare_pattern(head, target, *kind, DeclarationOrigin::Variable);
                    self.visit_expression(head, right)?;
                    self.visit_pattern_expressions(head, target)?;
                    self.visit_body_statement(head, body)
                }
                ForBinding::Declaration { kind, target } => {
                    self.declare_pattern(cur, target, *kind, DeclarationOrigin::Variable);
                    self.visit_expression(cur, right)?;
                    self.visit_pattern_expressions(cur, target)?;
                    self.visit_body_statement(cur, body)
                }
                ForBinding::Target(target) => {
                    self.visit_expression(cur, right)?;
                    self.visit_assignment_target(cur, target)?;
                    self.visit_body_statement(cur, body)
                }
            },
            Statement::While { test, body } => {
                self.visit_expression(cur, test)?;
                self.visit_body_statement(cur, body)
            }
            Statement::DoWhile { body, test } => {
                self.visit_body_statement(cur, body)?;
                self.visit_expression(cur, test)
            }
            Statement::Return(arg) => match arg {
                Some(expr) => self.visit_expression(cur, expr),
                None => Ok(()),
            },
            Statement::Throw(expr) => self.visit_expression(cur, expr),
            Statement::Try {
                block,
                handler,
                finalizer,
            } => {
                self.visit_block(cur, &block.body, Some(block.node))?;
                if let Some(handler) = handler {
                    let catch = self.enter_plain(cur, PlainScopeKind::Catch, Some(handler.node));
                    if let Some(param) = &handler.param {
                        self.declare_pattern(
                            catch,
                            param,
                            VariableKind::Let,
                            DeclarationOrigin::CatchParameter,
                        );
                    }
                    self.prescan_lexical(catch, &handler.body, false);
                    if let Some(param) = &handler.param {
                        self.visit_pattern_expressions(catch, param)?;
                    }
                    for statement in &handler.body {
                        self.visit_statement(catch, statement)?;
                    }
                }
                if let Some(finalizer) = finalizer {
                    self.visit_block(cur, &finalizer.body, Some(finalizer.node))?;
                }
                Ok(())
            }
            Statement::Switch {
                discriminant,
                cases,
                node,
            } => {
                self.visit_expression(cur, discriminant)?;
                let inner = self.enter_plain(cur, PlainScopeKind::Switch, Some(*node));
                self.prescan_lexical(inner, cases.iter().flat_map(|c| c.body.iter()), false);
                for case in cases {
                    if let Some(test) = &case.test {
                        self.visit_expression(inner, test)?;
                    }
                    for statement in &case.body {
                        self.visit_statement(inner, statement)?;
                    }
                }
                Ok(())
            }
            Statement::Labeled { body, .. } => self.visit_body_statement(cur, body),
            Statement::Break(_)
            | Statement::Continue(_)
            | Statement::Empty
            | Statement::Debugger => Ok(()),
        }
    }

    fn visit_variable_declaration(
        &mut self,
        cur: Cursor,
        decl: &VariableDeclaration,
    ) -> CompileResult<()> {
        for declarator in &decl.declarators {
            // Lexical names were declared when their scope was entered
            if decl.kind == VariableKind::Var {
                self.declare_pattern(cur, &declarator.target, decl.kind, DeclarationOrigin::Variable);
            }
            self.visit_pattern_expressions(cur, &declarator.target)?;
            if let Some(init) = &declarator.init {
                self.visit_expression(cur, init)?;
            }
        }
        Ok(())
    }

    // ==================== Functions and classes ====================

    fn visit_function(
        &mut self,
        cur: Cursor,
        function: &FunctionNode,
        context: FunctionContext,
    ) -> CompileResult<()> {
        let outer = match (&function.id, context) {
            (Some(id), FunctionContext::Expression) if !function.kind.is_arrow() => {
                let scope = self.enter_plain(cur, PlainScopeKind::FunctionName, None);
                self.name_scopes.insert(function.node, scope.scope);
                self.declare(scope, id, VariableKind::Const, DeclarationOrigin::FunctionName);
                scope
            }
            _ => cur,
        };

        let strict = self.tree.scope(outer.scope).strict || function.strict;
        let mut hoisting = HoistingScope::new(HoistingKind::Function(function.kind));
        hoisting.simple_parameter_list = function.has_simple_parameter_list();
        hoisting.has_parameter_expressions = function.has_parameter_expressions();
        hoisting.param_count = u16::try_from(function.params.len())
            .map_err(|_| CompileError::TooManyRegisters)?;
        hoisting.has_rest = function.rest.is_some();
        let separate_body = hoisting.has_parameter_expressions
            && matches!(function.body, FunctionBody::Block(_));
        let scope = self.tree.add_scope(
            Some(outer.scope),
            ScopeKind::Hoisting(Box::new(hoisting)),
            strict,
            Some(function.node),
        );
        let inner = Cursor { scope };

        let mut positional = Vec::with_capacity(function.params.len() + 1);
        for param in function.params.iter().chain(function.rest.iter()) {
            self.declare_pattern(inner, param, VariableKind::Var, DeclarationOrigin::Parameter);
            positional.push(
                param
                    .simple_identifier()
                    .and_then(|id| self.tree.scope(scope).bindings.get(&id.name).copied()),
            );
        }
        if let Some(h) = self.tree.scope_mut(scope).hoisting_mut() {
            h.params = positional;
        }
        for param in function.params.iter().chain(function.rest.iter()) {
            self.visit_pattern_expressions(inner, param)?;
        }

        let body = match &function.body {
            FunctionBody::Block(body) => body,
            FunctionBody::Expression(expr) => {
                self.visit_expression(inner, expr)?;
                return self.exit_function(scope);
            }
        };

        let mut var_names = FxHashSet::default();
        let mut annex_b = FxHashSet::default();
        collect_var_names(body, strict, &mut var_names, &mut annex_b);
        let body_cur = if separate_body {
            // Body vars named like a parameter share the parameter binding
            let params = &self.tree.scope(scope).bindings;
            var_names.retain(|name| !params.contains_key(name));
            self.enter_plain(inner, PlainScopeKind::FunctionBody, None)
        } else {
            inner
        };
        self.var_names.insert(body_cur.scope, var_names);
        self.annex_b_names.insert(body_cur.scope, annex_b);

        self.prescan_functions(body_cur, body);
        self.prescan_lexical(body_cur, body, true);
        for statement in body {
            self.visit_statement(body_cur, statement)?;
        }
        self.exit_function(scope)
    }

    /// Decide the `arguments` policy once the whole body has been seen
    fn exit_function(&mut self, scope: ScopeId) -> CompileResult<()> {
        let Some(h) = self.tree.scope(scope).hoisting() else {
            return Err(CompileError::internal(format!(
                "scope {} closed as a function is not a hoisting scope",
                scope.0
            )));
        };
        let (ordinary, parameter_expressions, simple, eval) = (
            h.kind.is_ordinary_function(),
            h.has_parameter_expressions,
            h.simple_parameter_list,
            h.contains_direct_eval,
        );
        if ordinary {
            // A plain `var arguments` receives the object; parameters,
            // functions and lexical declarations replace it
            let existing = self.tree.scope(scope).bindings.get("arguments").copied();
            let var_arguments = existing.filter(|d| {
                let d = self.tree.declaration(*d);
                d.origin == DeclarationOrigin::Variable && d.kind == VariableKind::Var
            });
            let shadowed = existing.is_some() && var_arguments.is_none();
            let referenced = self
                .visible_subtree(scope, "arguments", None)
                .iter()
                .any(|s| self.tree.scope(*s).pending.contains_key("arguments"));
            let needed = !shadowed && (var_arguments.is_some() || referenced || eval);
            if needed {
                let policy = if self.tree.scope(scope).strict || !simple {
                    ArgumentsPolicy::Unmapped
                } else {
                    ArgumentsPolicy::Mapped
                };
                let decl = match var_arguments {
                    Some(decl) => decl,
                    None => {
                        let decl = self.synthesize(
                            scope,
                            "arguments",
                            DeclarationOrigin::Arguments,
                            Span::default(),
                        );
                        self.tree
                            .scope_mut(scope)
                            .bindings
                            .insert("arguments".to_string(), decl);
                        decl
                    }
                };
                if parameter_expressions {
                    // No dedicated register once parameters run code
                    self.tree.declaration_mut(decl).inlineable = false;
                }
                if let Some(h) = self.tree.scope_mut(scope).hoisting_mut() {
                    h.arguments = policy;
                    h.arguments_decl = Some(decl);
                }
                self.resolve_pending(scope, "arguments", decl);
            }
        }

        if let Some(h) = self.tree.scope(scope).hoisting() {
            debug!(
                scope = scope.0,
                declarations = self.tree.scope(scope).declarations.len(),
                arguments = ?h.arguments,
                receiver = h.receiver.is_some(),
                "exit function scope"
            );
        }
        Ok(())
    }

    fn visit_class(&mut self, cur: Cursor, class: &ClassNode) -> CompileResult<()> {
        if let Some(superclass) = &class.superclass {
            self.visit_expression(cur, superclass)?;
        }
        let inner = self.enter_plain(cur, PlainScopeKind::Class, Some(class.node));
        if let Some(id) = &class.id {
            self.declare(inner, id, VariableKind::Const, DeclarationOrigin::Class);
        }
        for member in &class.members {
            if let PropertyKey::Computed(key) = &member.key {
                self.visit_expression(inner, key)?;
            }
            self.visit_function(inner, &member.value, FunctionContext::Method)?;
        }
        Ok(())
    }

    // ==================== Expressions ====================

    fn visit_expression(&mut self, cur: Cursor, expr: &Expression) -> CompileResult<()> {
        match expr {
            Expression::Identifier(id) => {
                self.reference(cur, id);
                Ok(())
            }
            Expression::Literal(_) => Ok(()),
            Expression::This { node, span } => {
                self.use_receiver(cur, *node, *span);
                Ok(())
            }
            Expression::NewTarget { node, span } => {
                self.use_new_target(cur, *node, *span);
                Ok(())
            }
            Expression::Array(elements) => {
                for element in elements.iter().flatten() {
                    self.visit_expression(cur, element)?;
                }
                Ok(())
            }
            Expression::Object(members) => {
                for member in members {
                    match member {
                        ObjectMember::Property { key, value } => {
                            if let PropertyKey::Computed(key) = key {
                                self.visit_expression(cur, key)?;
                            }
                            match value {
                                Expression::Function(f) if f.kind == FunctionKind::Method => {
                                    self.visit_function(cur, f, FunctionContext::Method)?
                                }
                                _ => self.visit_expression(cur, value)?,
                            }
                        }
                        ObjectMember::Spread(expr) => self.visit_expression(cur, expr)?,
                    }
                }
                Ok(())
            }
            Expression::Function(function) => {
                self.visit_function(cur, function, FunctionContext::Expression)
            }
            Expression::Class(class) => self.visit_class(cur, class),
            Expression::Unary { argument, .. }
            | Expression::Update { argument, .. }
            | Expression::Spread(argument) => self.visit_expression(cur, argument),
            Expression::Binary { left, right, .. } | Expression::Logical { left, right, .. } => {
                self.visit_expression(cur, left)?;
                self.visit_expression(cur, right)
            }
            Expression::Assignment { target, value, .. } => {
                self.visit_assignment_target(cur, target)?;
                self.visit_expression(cur, value)
            }
            Expression::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.visit_expression(cur, test)?;
                self.visit_expression(cur, consequent)?;
                self.visit_expression(cur, alternate)
            }
            Expression::Call { callee, arguments } => {
                if self.is_direct_eval(cur, callee) {
                    self.record_direct_eval(cur);
                }
                self.visit_expression(cur, callee)?;
                for argument in arguments {
                    self.visit_expression(cur, argument)?;
                }
                Ok(())
            }
            Expression::New { callee, arguments } => {
                self.visit_expression(cur, callee)?;
                for argument in arguments {
                    self.visit_expression(cur, argument)?;
                }
                Ok(())
            }
            Expression::Member { object, property } => {
                self.visit_expression(cur, object)?;
                if let MemberProperty::Computed(key) = property {
                    self.visit_expression(cur, key)?;
                }
                Ok(())
            }
            Expression::Sequence(exprs) => {
                for expr in exprs {
                    self.visit_expression(cur, expr)?;
                }
                Ok(())
            }
            Expression::Yield(argument) => match argument {
                Some(argument) => self.visit_expression(cur, argument),
                None => Ok(()),
            },
        }
    }

    /// References written as assignment targets
    fn visit_assignment_target(&mut self, cur: Cursor, target: &Pattern) -> CompileResult<()> {
        match target {
            Pattern::Identifier(id) => {
                self.reference(cur, id);
                Ok(())
            }
            Pattern::Object { properties, rest } => {
                for property in properties {
                    if let PropertyKey::Computed(key) = &property.key {
                        self.visit_expression(cur, key)?;
                    }
                    self.visit_assignment_target(cur, &property.value)?;
                }
                match rest {
                    Some(rest) => self.visit_assignment_target(cur, rest),
                    None => Ok(()),
                }
            }
            Pattern::Array { elements, rest } => {
                for element in elements.iter().flatten() {
                    self.visit_assignment_target(cur, element)?;
                }
                match rest {
                    Some(rest) => self.visit_assignment_target(cur, rest),
                    None => Ok(()),
                }
            }
            Pattern::Default { target, default } => {
                self.visit_assignment_target(cur, target)?;
                self.visit_expression(cur, default)
            }
            Pattern::Expression(expr) => self.visit_expression(cur, expr),
        }
    }

    /// Defaults and computed keys inside a binding pattern
    fn visit_pattern_expressions(&mut self, cur: Cursor, pattern: &Pattern) -> CompileResult<()> {
        match pattern {
            Pattern::Identifier(_) => Ok(()),
            Pattern::Object { properties, rest } => {
                for property in properties {
                    if let PropertyKey::Computed(key) = &property.key {
                        self.visit_expression(cur, key)?;
                    }
                    self.visit_pattern_expressions(cur, &property.value)?;
                }
                match rest {
                    Some(rest) => self.visit_pattern_expressions(cur, rest),
                    None => Ok(()),
                }
            }
            Pattern::Array { elements, rest } => {
                for element in elements.iter().flatten() {
                    self.visit_pattern_expressions(cur, element)?;
                }
                match rest {
                    Some(rest) => self.visit_pattern_expressions(cur, rest),
                    None => Ok(()),
                }
            }
            Pattern::Default { target, default } => {
                self.visit_pattern_expressions(cur, target)?;
                self.visit_expression(cur, default)
            }
            Pattern::Expression(expr) => self.visit_expression(cur, expr),
        }
    }

    // ==================== Direct eval ====================

    fn is_direct_eval(&self, cur: Cursor, callee: &Expression) -> bool {
        match callee {
            Expression::Identifier(id) if id.name == "eval" => {
                matches!(self.search(cur.scope, "eval"), Search::Park)
            }
            _ => false,
        }
    }

    fn record_direct_eval(&mut self, cur: Cursor) {
        trace!(scope = cur.scope.0, "direct eval");
        self.tree.scope_mut(cur.scope).direct_eval = true;
        self.eval_scopes.push(cur.scope);
        let ancestors: Vec<ScopeId> = self.tree.ancestors(cur.scope).collect();
        for s in ancestors {
            if let Some(h) = self.tree.scope_mut(s).hoisting_mut() {
                h.contains_direct_eval = true;
            }
        }
    }

    /// Everything visible from a direct eval must live in cells
    fn apply_eval_poisoning(&mut self) {
        for eval_scope in std::mem::take(&mut self.eval_scopes) {
            let chain: Vec<ScopeId> = self.tree.ancestors(eval_scope).collect();
            for s in chain {
                let visible: Vec<DeclId> = self.tree.scope(s).bindings.values().copied().collect();
                let receiver = self.tree.scope(s).hoisting().and_then(|h| h.receiver);
                for decl in visible.into_iter().chain(receiver) {
                    self.tree.declaration_mut(decl).inlineable = false;
                }
            }
        }
    }

    // ==================== Finishing ====================

    fn finish_unresolved(&mut self) {
        let scopes: Vec<ScopeId> = self.tree.scopes().map(|(id, _)| id).collect();
        let mut globals = 0usize;
        for s in scopes {
            let pending = std::mem::take(&mut self.tree.scope_mut(s).pending);
            for reference in pending.into_values().flatten() {
                self.tree.reference_mut(reference).state = ReferenceState::Global;
                globals += 1;
            }
        }
        debug!(globals, "unresolved references defaulted to global");
    }

    /// Assign registers and cells, one hoisting scope at a time
    fn allocate_storage(&mut self) -> CompileResult<()> {
        let hoisting_scopes: Vec<ScopeId> = self
            .tree
            .scopes()
            .filter(|(_, s)| s.is_hoisting())
            .map(|(id, _)| id)
            .collect();

        for h_id in hoisting_scopes {
            let Some(h) = self.tree.scope(h_id).hoisting() else {
                return Err(CompileError::internal(format!(
                    "scope {} lost its hoisting data",
                    h_id.0
                )));
            };
            let program_globals = h.kind == HoistingKind::Program && self.config.global_top_level;
            let params = h.params.clone();
            let fixed = u32::from(RESERVED_REGISTERS) + params.len() as u32;
            let mut next_register =
                u16::try_from(fixed).map_err(|_| CompileError::TooManyRegisters)?;

            // Repeated sloppy parameters share one declaration; the last
            // position holding it provides the value
            for (i, param) in params.iter().enumerate().rev() {
                let Some(decl) = param else { continue };
                let declaration = self.tree.declaration_mut(*decl);
                if declaration.inlineable && declaration.storage.is_none() {
                    declaration.storage = Some(Storage::Register(RESERVED_REGISTERS + i as u16));
                }
            }

            let domain = self.allocation_domain(h_id);
            let mut decls: Vec<DeclId> = domain
                .iter()
                .flat_map(|s| self.tree.scope(*s).declarations.iter().copied())
                .collect();
            decls.sort();

            for decl in decls {
                let declaration = self.tree.declaration(decl);
                if declaration.storage.is_some() {
                    continue;
                }
                let (origin, inlineable, storage_scope) = (
                    declaration.origin,
                    declaration.inlineable,
                    declaration.storage_scope,
                );
                let storage = match origin {
                    DeclarationOrigin::Receiver if inlineable => {
                        Storage::Register(RECEIVER_REGISTER.0)
                    }
                    DeclarationOrigin::NewTarget if inlineable => {
                        Storage::Register(NEW_TARGET_REGISTER.0)
                    }
                    DeclarationOrigin::Receiver | DeclarationOrigin::NewTarget => {
                        self.next_cell(storage_scope)?
                    }
                    _ if program_globals && storage_scope == h_id => Storage::Global,
                    _ if inlineable => {
                        let register = next_register;
                        next_register = next_register
                            .checked_add(1)
                            .ok_or(CompileError::TooManyRegisters)?;
                        Storage::Register(register)
                    }
                    _ => self.next_cell(storage_scope)?,
                };
                self.tree.declaration_mut(decl).storage = Some(storage);
            }

            if let Some(h) = self.tree.scope_mut(h_id).hoisting_mut() {
                h.register_count = next_register;
            }
            debug!(
                scope = h_id.0,
                registers = next_register,
                cells = self.tree.scope(h_id).cell_count,
                "allocated storage"
            );
        }
        Ok(())
    }

    fn next_cell(&mut self, scope: ScopeId) -> CompileResult<Storage> {
        let scope = self.tree.scope_mut(scope);
        let slot = scope.cell_count;
        scope.cell_count = slot.checked_add(1).ok_or(CompileError::TooManyCells)?;
        Ok(Storage::Cell { slot })
    }

    /// A hoisting scope and the plain scopes that borrow its counters
    fn allocation_domain(&self, root: ScopeId) -> Vec<ScopeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(s) = stack.pop() {
            out.push(s);
            for child in self.tree.scope(s).children.iter().rev() {
                if !self.tree.scope(*child).is_hoisting() {
                    stack.push(*child);
                }
            }
        }
        out
    }

    /// Environment blocks between `from` and the block of `owner`
    fn cell_depth(&self, from: ScopeId, owner: ScopeId) -> u16 {
        let mut depth = 0u16;
        for s in self.tree.ancestors(from) {
            if s == owner {
                break;
            }
            if self.tree.scope(s).needs_environment() {
                depth += 1;
            }
        }
        depth
    }

    fn target_for(&self, from: ScopeId, decl: DeclId) -> ReferenceTarget {
        let declaration = self.tree.declaration(decl);
        match declaration.storage {
            Some(Storage::Register(r)) => ReferenceTarget::Register(r),
            Some(Storage::Cell { slot }) => ReferenceTarget::Cell {
                depth: self.cell_depth(from, declaration.storage_scope),
                slot,
            },
            Some(Storage::Global) | None => ReferenceTarget::Global(declaration.name.clone()),
        }
    }

    fn scope_layout(&self, scope: ScopeId) -> ScopeLayout {
        let s = self.tree.scope(scope);
        ScopeLayout {
            needs_environment: s.needs_environment(),
            cell_count: s.cell_count,
        }
    }

    fn function_layout(&self, scope: ScopeId, h: &HoistingScope) -> FunctionLayout {
        let s = self.tree.scope(scope);
        let storage_of = |decl: Option<DeclId>| {
            decl.and_then(|d| self.tree.declaration(d).storage)
        };
        FunctionLayout {
            register_count: h.register_count,
            cell_count: s.cell_count,
            needs_environment: s.needs_environment(),
            param_count: h.param_count,
            has_rest: h.has_rest,
            arguments: h.arguments,
            arguments_storage: storage_of(h.arguments_decl),
            receiver: storage_of(h.receiver),
            new_target: storage_of(h.new_target),
            contains_direct_eval: h.contains_direct_eval,
            strict: s.strict,
            name_scope: None,
        }
    }

    fn build_resolution(&self) -> Resolution {
        let mut resolution = Resolution {
            program: FunctionLayout {
                register_count: RESERVED_REGISTERS,
                cell_count: 0,
                needs_environment: false,
                param_count: 0,
                has_rest: false,
                arguments: ArgumentsPolicy::None,
                arguments_storage: None,
                receiver: None,
                new_target: None,
                contains_direct_eval: false,
                strict: false,
                name_scope: None,
            },
            declarations: Default::default(),
            references: Default::default(),
            this_references: Default::default(),
            new_target_references: Default::default(),
            functions: Default::default(),
            scopes: Default::default(),
        };

        for (id, scope) in self.tree.scopes() {
            match (&scope.kind, scope.node) {
                (ScopeKind::Hoisting(h), node) => {
                    let layout = self.function_layout(id, h);
                    if h.kind == HoistingKind::Program {
                        resolution.program = layout;
                    } else if let Some(node) = node {
                        resolution.functions.insert(node, layout);
                    }
                }
                (ScopeKind::Plain(_), Some(node)) => {
                    resolution.scopes.insert(node, self.scope_layout(id));
                }
                (ScopeKind::Plain(_), None) => {}
            }
        }
        for (function, scope) in &self.name_scopes {
            let layout = self.scope_layout(*scope);
            if let Some(f) = resolution.functions.get_mut(function) {
                f.name_scope = Some(layout);
            }
        }

        for site in self.tree.sites() {
            let Some(node) = site.node else { continue };
            let declaration = self.tree.declaration(site.decl);
            let storage = declaration.storage.unwrap_or(Storage::Global);
            resolution.declarations.insert(
                node,
                DeclarationInfo {
                    name: declaration.name.clone(),
                    kind: declaration.kind,
                    mode: declaration.mode,
                    storage,
                },
            );
        }

        for (_, reference) in self.tree.references() {
            let target = match reference.state {
                ReferenceState::Resolved(decl) => self.target_for(reference.scope, decl),
                ReferenceState::Global | ReferenceState::Unresolved => {
                    ReferenceTarget::Global(reference.name.clone())
                }
            };
            resolution.references.insert(reference.node, target);
        }
        for use_ in &self.this_uses {
            resolution
                .this_references
                .insert(use_.node, self.target_for(use_.scope, use_.decl));
        }
        for use_ in &self.new_target_uses {
            resolution
                .new_target_references
                .insert(use_.node, self.target_for(use_.scope, use_.decl));
        }
        resolution
    }
}

fn function_origin(kind: FunctionKind) -> DeclarationOrigin {
    if kind == FunctionKind::Generator {
        DeclarationOrigin::GeneratorFunction
    } else {
        DeclarationOrigin::Function
    }
}

/// Names introduced by var-scoped declarations of a function body: `var`
/// bindings anywhere outside nested functions plus top-level functions.
/// Sloppy block functions are collected separately since their hoisting
/// can still be cancelled by a clashing lexical binding.
fn collect_var_names(
    body: &[Statement],
    strict: bool,
    vars: &mut FxHashSet<String>,
    annex_b: &mut FxHashSet<String>,
) {
    fn add_pattern(pattern: &Pattern, vars: &mut FxHashSet<String>) {
        let mut names = Vec::new();
        pattern.bound_names(&mut names);
        vars.extend(names.into_iter().map(|id| id.name.clone()));
    }

    fn walk(
        statement: &Statement,
        top: bool,
        strict: bool,
        vars: &mut FxHashSet<String>,
        annex_b: &mut FxHashSet<String>,
    ) {
        match statement {
            Statement::Variable(decl) if decl.kind == VariableKind::Var => {
                for declarator in &decl.declarators {
                    add_pattern(&declarator.target, vars);
                }
            }
            Statement::Function(function) => {
                if let Some(id) = &function.id {
                    if top {
                        vars.insert(id.name.clone());
                    } else if !strict && function.kind == FunctionKind::Normal {
                        annex_b.insert(id.name.clone());
                    }
                }
            }
            Statement::Block(block) => {
                for s in &block.body {
                    walk(s, false, strict, vars, annex_b);
                }
            }
            Statement::If {
                consequent,
                alternate,
                ..
            } => {
                walk(consequent, false, strict, vars, annex_b);
                if let Some(alternate) = alternate {
                    walk(alternate, false, strict, vars, annex_b);
                }
            }
            Statement::For { init, body, .. } => {
                if let Some(ForInit::Declaration(decl)) = init {
                    if decl.kind == VariableKind::Var {
                        for declarator in &decl.declarators {
                            add_pattern(&declarator.target, vars);
                        }
                    }
                }
                walk(body, false, strict, vars, annex_b);
            }
            Statement::ForInOf { left, body, .. } => {
                if let ForBinding::Declaration {
                    kind: VariableKind::Var,
                    target,
                } = left
                {
                    add_pattern(target, vars);
                }
                walk(body, false, strict, vars, annex_b);
            }
            Statement::While { body, .. }
            | Statement::DoWhile { body, .. }
            | Statement::Labeled { body, .. } => walk(body, false, strict, vars, annex_b),
            Statement::Try {
                block,
                handler,
                finalizer,
            } => {
                for s in &block.body {
                    walk(s, false, strict, vars, annex_b);
                }
                if let Some(handler) = handler {
                    for s in &handler.body {
                        walk(s, false, strict, vars, annex_b);
                    }
                }
                if let Some(finalizer) = finalizer {
                    for s in &finalizer.body {
                        walk(s, false, strict, vars, annex_b);
                    }
                }
            }
            Statement::Switch { cases, .. } => {
                for case in cases {
                    for s in &case.body {
                        walk(s, false, strict, vars, annex_b);
                    }
                }
            }
            _ => {}
        }
    }

    for statement in body {
        walk(statement, true, strict, vars, annex_b);
    }
}
