//! Early-error validation over a finished scope tree
//!
//! Runs after the walk, before storage allocation. The first offending
//! site in source order is reported.

use rustc_hash::FxHashMap;

use crate::ast::{FunctionKind, VariableKind};
use crate::error::{CompileError, CompileResult};
use crate::scope::{DeclarationOrigin, DeclarationSite, HoistingKind, ScopeId, ScopeTree};

type SiteMap<'a> = FxHashMap<(ScopeId, &'a str), Vec<usize>>;

/// Check redeclaration rules on every declaration site
pub fn validate(tree: &ScopeTree) -> CompileResult<()> {
    let sites = tree.sites();
    let mut lexical: SiteMap<'_> = FxHashMap::default();
    let mut params: SiteMap<'_> = FxHashMap::default();
    for (i, site) in sites.iter().enumerate() {
        let key = (site.scope, site.name.as_str());
        if site.is_lexical() {
            lexical.entry(key).or_default().push(i);
        } else if site.origin == DeclarationOrigin::Parameter {
            params.entry(key).or_default().push(i);
        }
    }

    for (i, site) in sites.iter().enumerate() {
        let key = (site.scope, site.name.as_str());
        if site.is_lexical() {
            check_lexical(tree, sites, &lexical, &params, i, site, key)?;
        } else if site.origin == DeclarationOrigin::Parameter {
            check_parameter(tree, &params, i, site, key)?;
        } else if site.kind == VariableKind::Var {
            check_var(tree, sites, &lexical, site)?;
        }
    }
    Ok(())
}

fn already_declared(site: &DeclarationSite) -> CompileError {
    CompileError::early_error_at(
        format!("Identifier '{}' has already been declared", site.name),
        site.span,
    )
}

fn check_lexical(
    tree: &ScopeTree,
    sites: &[DeclarationSite],
    lexical: &SiteMap<'_>,
    params: &SiteMap<'_>,
    index: usize,
    site: &DeclarationSite,
    key: (ScopeId, &str),
) -> CompileResult<()> {
    if let Some(same) = lexical.get(&key) {
        let first = same.first().copied();
        // Sloppy mode tolerates repeated plain function declarations in a block
        let tolerated = !tree.scope(site.scope).strict
            && same
                .iter()
                .all(|j| sites[*j].origin == DeclarationOrigin::Function);
        if first != Some(index) && !tolerated {
            return Err(already_declared(site));
        }
    }
    // Parameters of a function with a separate body scope live one level up
    let param_key = (tree.storage_owner(site.scope), site.name.as_str());
    if params.contains_key(&param_key) {
        return Err(already_declared(site));
    }
    Ok(())
}

fn check_var(
    tree: &ScopeTree,
    sites: &[DeclarationSite],
    lexical: &SiteMap<'_>,
    site: &DeclarationSite,
) -> CompileResult<()> {
    let hoisting = tree.nearest_hoisting(site.scope);
    for scope in tree.ancestors(site.scope) {
        if let Some(clashes) = lexical.get(&(scope, site.name.as_str())) {
            let only_catch_param = clashes
                .iter()
                .all(|j| sites[*j].origin == DeclarationOrigin::CatchParameter);
            if !only_catch_param {
                return Err(already_declared(site));
            }
        }
        if scope == hoisting {
            break;
        }
    }
    Ok(())
}

fn check_parameter(
    tree: &ScopeTree,
    params: &SiteMap<'_>,
    index: usize,
    site: &DeclarationSite,
    key: (ScopeId, &str),
) -> CompileResult<()> {
    let Some(same) = params.get(&key) else {
        return Ok(());
    };
    if same.first().copied() == Some(index) {
        return Ok(());
    }
    let scope = tree.scope(site.scope);
    let strict_list = scope.strict
        || scope.hoisting().is_some_and(|h| {
            !h.simple_parameter_list
                || matches!(
                    h.kind,
                    HoistingKind::Function(
                        FunctionKind::Arrow | FunctionKind::Method | FunctionKind::Constructor
                    )
                )
        });
    if strict_list {
        return Err(CompileError::early_error_at(
            "Duplicate parameter name not allowed in this context",
            site.span,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::ast::{AstBuilder, ClassNode, FunctionKind, Pattern, Span, Statement, VariableKind};
    use crate::error::CompileError;
    use crate::resolver::{Resolver, ResolverConfig};

    fn early_error(program: &crate::ast::Program) -> Option<String> {
        match Resolver::new(ResolverConfig::default()).resolve(program) {
            Err(CompileError::EarlyError { message, .. }) => Some(message),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => None,
        }
    }

    #[test]
    fn test_duplicate_lexical() {
        let mut b = AstBuilder::new();
        let body = vec![
            b.declare(VariableKind::Let, "x", None),
            b.declare(VariableKind::Const, "x", None),
        ];
        let program = b.program(body);
        assert_eq!(
            early_error(&program).as_deref(),
            Some("Identifier 'x' has already been declared")
        );
    }

    fn class_declaration(b: &mut AstBuilder, name: &str) -> Statement {
        Statement::Class(Box::new(ClassNode {
            node: b.node(),
            id: Some(b.ident(name)),
            superclass: None,
            members: Vec::new(),
            span: Span::default(),
        }))
    }

    #[test]
    fn test_class_then_let() {
        // class x {} let x;
        let mut b = AstBuilder::new();
        let body = vec![
            class_declaration(&mut b, "x"),
            b.declare(VariableKind::Let, "x", None),
        ];
        let program = b.program(body);
        assert_eq!(
            early_error(&program).as_deref(),
            Some("Identifier 'x' has already been declared")
        );
    }

    #[test]
    fn test_const_then_let() {
        // const x = 1; let x;
        let mut b = AstBuilder::new();
        let one = b.number(1.0);
        let body = vec![
            b.declare(VariableKind::Const, "x", Some(one)),
            b.declare(VariableKind::Let, "x", None),
        ];
        let program = b.program(body);
        assert!(early_error(&program).is_some());
    }

    #[test]
    fn test_duplicate_lexical_in_nested_block() {
        // { { let x; class x {} } }
        let mut b = AstBuilder::new();
        let inner = vec![
            b.declare(VariableKind::Let, "x", None),
            class_declaration(&mut b, "x"),
        ];
        let inner = b.block(inner);
        let outer = b.block(vec![inner]);
        let program = b.program(vec![outer]);
        assert!(early_error(&program).is_some());
    }

    #[test]
    fn test_duplicate_lexical_in_function_body() {
        // function f() { let x; const x = 1; }
        let mut b = AstBuilder::new();
        let one = b.number(1.0);
        let body = vec![
            b.declare(VariableKind::Let, "x", None),
            b.declare(VariableKind::Const, "x", Some(one)),
        ];
        let f = b.function_declaration("f", &[], body);
        let program = b.program(vec![f]);
        assert!(early_error(&program).is_some());
    }

    #[test]
    fn test_sibling_blocks_may_reuse_names() {
        // { let x; } { const x = 1; } { class x {} } function f() { let x; } let x;
        let mut b = AstBuilder::new();
        let one = b.number(1.0);
        let first = vec![b.declare(VariableKind::Let, "x", None)];
        let second = vec![b.declare(VariableKind::Const, "x", Some(one))];
        let third = vec![class_declaration(&mut b, "x")];
        let f_body = vec![b.declare(VariableKind::Let, "x", None)];
        let body = vec![
            b.block(first),
            b.block(second),
            b.block(third),
            b.function_declaration("f", &[], f_body),
            b.declare(VariableKind::Let, "x", None),
        ];
        let program = b.program(body);
        assert_eq!(early_error(&program), None);
    }

    #[test]
    fn test_lexical_clashes_with_parameter_that_has_default() {
        // function f(a = 1) { let a; }
        let mut b = AstBuilder::new();
        let body = vec![b.declare(VariableKind::Let, "a", None)];
        let mut f = b.function(FunctionKind::Normal, Some("f"), &["a"], body);
        let one = b.number(1.0);
        let a = f.params.remove(0);
        f.params.push(Pattern::Default {
            target: Box::new(a),
            default: Box::new(one),
        });
        let program = b.program(vec![Statement::Function(Box::new(f))]);
        assert!(early_error(&program).is_some());
    }

    #[test]
    fn test_var_lexical_collision_through_block() {
        // let x; { var x; }
        let mut b = AstBuilder::new();
        let inner = vec![b.declare(VariableKind::Var, "x", None)];
        let body = vec![b.declare(VariableKind::Let, "x", None), b.block(inner)];
        let program = b.program(body);
        assert!(early_error(&program).is_some());
    }

    #[test]
    fn test_var_in_nested_block_of_lexical_scope() {
        // { let x; { var x; } }
        let mut b = AstBuilder::new();
        let innermost = vec![b.declare(VariableKind::Var, "x", None)];
        let inner_block = b.block(innermost);
        let outer = vec![b.declare(VariableKind::Let, "x", None), inner_block];
        let block = b.block(outer);
        let program = b.program(vec![block]);
        assert!(early_error(&program).is_some());
    }

    #[test]
    fn test_shadowing_in_nested_block_is_fine() {
        // let x; { let x; }
        let mut b = AstBuilder::new();
        let inner = vec![b.declare(VariableKind::Let, "x", None)];
        let body = vec![b.declare(VariableKind::Let, "x", None), b.block(inner)];
        let program = b.program(body);
        assert_eq!(early_error(&program), None);
    }

    #[test]
    fn test_lexical_clashes_with_parameter() {
        // function f(a) { let a; }
        let mut b = AstBuilder::new();
        let body = vec![b.declare(VariableKind::Let, "a", None)];
        let f = b.function_declaration("f", &["a"], body);
        let program = b.program(vec![f]);
        assert!(early_error(&program).is_some());
    }

    #[test]
    fn test_var_may_repeat_parameter() {
        // function f(a) { var a; }
        let mut b = AstBuilder::new();
        let body = vec![b.declare(VariableKind::Var, "a", None)];
        let f = b.function_declaration("f", &["a"], body);
        let program = b.program(vec![f]);
        assert_eq!(early_error(&program), None);
    }

    #[test]
    fn test_block_function_redeclaration() {
        // { function g() {} function g() {} }
        let mut b = AstBuilder::new();
        let g1 = b.function_declaration("g", &[], vec![]);
        let g2 = b.function_declaration("g", &[], vec![]);
        let block = b.block(vec![g1, g2]);

        let mut sloppy = b.program(vec![block]);
        assert_eq!(early_error(&sloppy), None);

        sloppy.strict = true;
        assert!(early_error(&sloppy).is_some());
    }

    #[test]
    fn test_duplicate_arrow_parameters() {
        let mut b = AstBuilder::new();
        let arrow = b.function(FunctionKind::Arrow, None, &["a", "a"], vec![]);
        let program = b.program(vec![Statement::Expression(
            crate::ast::Expression::Function(Box::new(arrow)),
        )]);
        assert_eq!(
            early_error(&program).as_deref(),
            Some("Duplicate parameter name not allowed in this context")
        );

        let f = b.function_declaration("f", &["a", "a"], vec![]);
        let program = b.program(vec![f]);
        assert_eq!(early_error(&program), None);
    }
}
