//! Syntax tree consumed by the resolver
//!
//! The parser hands over a closed tree of statements, expressions and
//! patterns. Every identifier, `this`, `new.target`, function and
//! scope-introducing node carries a [`NodeId`]; the resolver reports its
//! decisions keyed by those ids.

use serde::{Deserialize, Serialize};

/// Identity of an AST node, unique within one program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Source position of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset of the first character
    pub start: u32,
    /// Byte offset past the last character
    pub end: u32,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
}

/// An identifier occurrence (binding or reference)
#[derive(Debug, Clone, PartialEq)]
pub struct Identifier {
    /// Identifier text
    pub name: String,
    /// Node id
    pub node: NodeId,
    /// Source position
    pub span: Span,
}

/// A whole script
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Top-level statements
    pub body: Vec<Statement>,
    /// Starts with a `"use strict"` directive
    pub strict: bool,
    /// Node id of the program (keys its layout)
    pub node: NodeId,
}

/// `var`, `let` or `const`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    /// `var`
    Var,
    /// `let`
    Let,
    /// `const`
    Const,
}

/// One `pattern = init` entry of a variable declaration
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclarator {
    /// Binding target
    pub target: Pattern,
    /// Initializer
    pub init: Option<Expression>,
}

/// `var`/`let`/`const` declaration
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclaration {
    /// Declaration keyword
    pub kind: VariableKind,
    /// Declarators
    pub declarators: Vec<VariableDeclarator>,
}

/// `{ ... }` block with its own scope
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Statements
    pub body: Vec<Statement>,
    /// Node id (keys the block's scope layout)
    pub node: NodeId,
}

/// Initializer clause of a `for (init; test; update)` loop
#[derive(Debug, Clone, PartialEq)]
pub enum ForInit {
    /// `for (var/let/const ...;`
    Declaration(VariableDeclaration),
    /// `for (expr;`
    Expression(Expression),
}

/// Left side of `for-in`/`for-of`
#[derive(Debug, Clone, PartialEq)]
pub enum ForBinding {
    /// `for (let x of ...)`
    Declaration {
        /// Declaration keyword
        kind: VariableKind,
        /// Binding target
        target: Pattern,
    },
    /// `for (x of ...)` with an existing assignment target
    Target(Pattern),
}

/// `in` or `of`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForIteration {
    /// `for (k in obj)`
    In,
    /// `for (v of iterable)`
    Of,
}

/// `case test:` or `default:` clause
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// `None` for `default`
    pub test: Option<Expression>,
    /// Clause statements
    pub body: Vec<Statement>,
}

/// `catch (param) { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    /// Catch parameter (optional catch binding when `None`)
    pub param: Option<Pattern>,
    /// Handler body; shares the catch scope with the parameter
    pub body: Vec<Statement>,
    /// Node id (keys the catch scope layout)
    pub node: NodeId,
}

/// Statements
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Expression statement
    Expression(Expression),
    /// `var`/`let`/`const`
    Variable(VariableDeclaration),
    /// `function f() {}` / `function* g() {}`
    Function(Box<FunctionNode>),
    /// `class C {}`
    Class(Box<ClassNode>),
    /// `{ ... }`
    Block(Block),
    /// `if (test) consequent else alternate`
    If {
        /// Condition
        test: Expression,
        /// Then branch
        consequent: Box<Statement>,
        /// Else branch
        alternate: Option<Box<Statement>>,
    },
    /// `for (init; test; update) body`
    For {
        /// Initializer
        init: Option<ForInit>,
        /// Condition
        test: Option<Expression>,
        /// Update expression
        update: Option<Expression>,
        /// Loop body
        body: Box<Statement>,
        /// Node id (keys the loop head scope)
        node: NodeId,
    },
    /// `for (left in/of right) body`
    ForInOf {
        /// `in` or `of`
        iteration: ForIteration,
        /// Loop binding
        left: ForBinding,
        /// Iterated expression
        right: Expression,
        /// Loop body
        body: Box<Statement>,
        /// Node id (keys the loop head scope)
        node: NodeId,
    },
    /// `while (test) body`
    While {
        /// Condition
        test: Expression,
        /// Loop body
        body: Box<Statement>,
    },
    /// `do body while (test)`
    DoWhile {
        /// Loop body
        body: Box<Statement>,
        /// Condition
        test: Expression,
    },
    /// `return arg`
    Return(Option<Expression>),
    /// `throw arg`
    Throw(Expression),
    /// `try {} catch {} finally {}`
    Try {
        /// Protected block
        block: Block,
        /// Catch clause
        handler: Option<CatchClause>,
        /// Finally block
        finalizer: Option<Block>,
    },
    /// `switch (d) { cases }`; all cases share one block scope
    Switch {
        /// Discriminant
        discriminant: Expression,
        /// Case clauses
        cases: Vec<SwitchCase>,
        /// Node id (keys the case block scope)
        node: NodeId,
    },
    /// `label: body`
    Labeled {
        /// Label text
        label: String,
        /// Labeled statement
        body: Box<Statement>,
    },
    /// `break label`
    Break(Option<String>),
    /// `continue label`
    Continue(Option<String>),
    /// `;`
    Empty,
    /// `debugger`
    Debugger,
}

/// Literal values
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Number literal
    Number(f64),
    /// String literal
    String(String),
    /// BigInt literal (decimal digits)
    BigInt(String),
    /// `true` / `false`
    Boolean(bool),
    /// `null`
    Null,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// `-`
    Minus,
    /// `+`
    Plus,
    /// `!`
    Not,
    /// `~`
    BitNot,
    /// `typeof`
    TypeOf,
    /// `void`
    Void,
    /// `delete`
    Delete,
}

/// `++` / `--`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOperator {
    /// `++`
    Increment,
    /// `--`
    Decrement,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `**`
    Exp,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `>>>`
    Ushr,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `===`
    StrictEq,
    /// `!==`
    StrictNotEq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `instanceof`
    InstanceOf,
    /// `in`
    In,
}

/// Short-circuit operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    /// `&&`
    And,
    /// `||`
    Or,
    /// `??`
    Coalesce,
}

/// Assignment operators (`None` binary operator means plain `=`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentOperator {
    /// `=`
    Assign,
    /// `op=`
    Compound(BinaryOperator),
    /// `&&=`, `||=`, `??=`
    Logical(LogicalOperator),
}

/// Property key in object literals, patterns and classes
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKey {
    /// `name:` / `"name":` / `1:`
    Static(String),
    /// `[expr]:`
    Computed(Box<Expression>),
}

/// Object literal member
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectMember {
    /// `key: value` (shorthand `x` is `x: x` with a reference value)
    Property {
        /// Key
        key: PropertyKey,
        /// Value
        value: Expression,
    },
    /// `...expr`
    Spread(Expression),
}

/// Member access property
#[derive(Debug, Clone, PartialEq)]
pub enum MemberProperty {
    /// `obj.name`
    Named(String),
    /// `obj[expr]`
    Computed(Box<Expression>),
}

/// Expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Identifier reference
    Identifier(Identifier),
    /// Literal
    Literal(Literal),
    /// `this`
    This {
        /// Node id
        node: NodeId,
        /// Source position
        span: Span,
    },
    /// `new.target`
    NewTarget {
        /// Node id
        node: NodeId,
        /// Source position
        span: Span,
    },
    /// `[a, , ...b]` (`None` is an elision)
    Array(Vec<Option<Expression>>),
    /// `{ ... }`
    Object(Vec<ObjectMember>),
    /// Function expression, arrow function or method
    Function(Box<FunctionNode>),
    /// Class expression
    Class(Box<ClassNode>),
    /// `op argument`
    Unary {
        /// Operator
        operator: UnaryOperator,
        /// Operand
        argument: Box<Expression>,
    },
    /// `++x` / `x--`
    Update {
        /// Operator
        operator: UpdateOperator,
        /// Prefix form
        prefix: bool,
        /// Target
        argument: Box<Expression>,
    },
    /// `left op right`
    Binary {
        /// Operator
        operator: BinaryOperator,
        /// Left operand
        left: Box<Expression>,
        /// Right operand
        right: Box<Expression>,
    },
    /// `left && right` etc.
    Logical {
        /// Operator
        operator: LogicalOperator,
        /// Left operand
        left: Box<Expression>,
        /// Right operand
        right: Box<Expression>,
    },
    /// `target op= value`
    Assignment {
        /// Operator
        operator: AssignmentOperator,
        /// Target
        target: Box<Pattern>,
        /// Value
        value: Box<Expression>,
    },
    /// `test ? consequent : alternate`
    Conditional {
        /// Condition
        test: Box<Expression>,
        /// Then value
        consequent: Box<Expression>,
        /// Else value
        alternate: Box<Expression>,
    },
    /// `callee(arguments)`
    Call {
        /// Callee
        callee: Box<Expression>,
        /// Arguments
        arguments: Vec<Expression>,
    },
    /// `new callee(arguments)`
    New {
        /// Constructor
        callee: Box<Expression>,
        /// Arguments
        arguments: Vec<Expression>,
    },
    /// `object.property` / `object[property]`
    Member {
        /// Object
        object: Box<Expression>,
        /// Property
        property: MemberProperty,
    },
    /// `a, b, c`
    Sequence(Vec<Expression>),
    /// `...argument` in array literals and argument lists
    Spread(Box<Expression>),
    /// `yield argument`
    Yield(Option<Box<Expression>>),
}

/// Binding and assignment targets
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// `x`
    Identifier(Identifier),
    /// `{ a, b: c, ...rest }`
    Object {
        /// Properties
        properties: Vec<PatternProperty>,
        /// Rest element
        rest: Option<Box<Pattern>>,
    },
    /// `[a, , b, ...rest]`
    Array {
        /// Elements (`None` is an elision)
        elements: Vec<Option<Pattern>>,
        /// Rest element
        rest: Option<Box<Pattern>>,
    },
    /// `target = default`
    Default {
        /// Target
        target: Box<Pattern>,
        /// Default value
        default: Box<Expression>,
    },
    /// `obj.prop` / `obj[key]` (assignment targets only)
    Expression(Box<Expression>),
}

/// `key: value` entry of an object pattern
#[derive(Debug, Clone, PartialEq)]
pub struct PatternProperty {
    /// Key
    pub key: PropertyKey,
    /// Target
    pub value: Pattern,
}

impl Pattern {
    /// Whether this is a plain identifier (optionally with a default)
    pub fn simple_identifier(&self) -> Option<&Identifier> {
        match self {
            Self::Identifier(id) => Some(id),
            Self::Default { target, .. } => match target.as_ref() {
                Self::Identifier(id) => Some(id),
                _ => None,
            },
            _ => None,
        }
    }

    /// Collect bound identifiers in source order
    pub fn bound_names<'a>(&'a self, out: &mut Vec<&'a Identifier>) {
        match self {
            Self::Identifier(id) => out.push(id),
            Self::Object { properties, rest } => {
                for prop in properties {
                    prop.value.bound_names(out);
                }
                if let Some(rest) = rest {
                    rest.bound_names(out);
                }
            }
            Self::Array { elements, rest } => {
                for element in elements.iter().flatten() {
                    element.bound_names(out);
                }
                if let Some(rest) = rest {
                    rest.bound_names(out);
                }
            }
            Self::Default { target, .. } => target.bound_names(out),
            Self::Expression(_) => {}
        }
    }

    /// Contains a default value or a computed key that runs while binding
    pub fn contains_expression(&self) -> bool {
        match self {
            Self::Identifier(_) | Self::Expression(_) => false,
            Self::Default { .. } => true,
            Self::Object { properties, rest } => {
                properties.iter().any(|p| {
                    matches!(p.key, PropertyKey::Computed(_)) || p.value.contains_expression()
                }) || rest.as_ref().is_some_and(|r| r.contains_expression())
            }
            Self::Array { elements, rest } => {
                elements.iter().flatten().any(Pattern::contains_expression)
                    || rest.as_ref().is_some_and(|r| r.contains_expression())
            }
        }
    }
}

/// Function flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    /// `function f() {}`
    Normal,
    /// `() => {}`
    Arrow,
    /// `{ m() {} }` / class method
    Method,
    /// `function* g() {}`
    Generator,
    /// Class constructor
    Constructor,
}

impl FunctionKind {
    /// Arrow functions take `this`, `new.target` and `arguments` from the
    /// enclosing function
    pub fn is_arrow(self) -> bool {
        matches!(self, Self::Arrow)
    }
}

/// Function body
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    /// `{ statements }`
    Block(Vec<Statement>),
    /// Concise arrow body
    Expression(Box<Expression>),
}

/// Any function: declaration, expression, arrow or method
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionNode {
    /// Node id (keys the function layout)
    pub node: NodeId,
    /// Name (binding for declarations, self-binding for named expressions)
    pub id: Option<Identifier>,
    /// Flavor
    pub kind: FunctionKind,
    /// Formal parameters
    pub params: Vec<Pattern>,
    /// Rest parameter
    pub rest: Option<Pattern>,
    /// Body
    pub body: FunctionBody,
    /// Body starts with a `"use strict"` directive
    pub strict: bool,
    /// Source position
    pub span: Span,
}

impl FunctionNode {
    /// No defaults, no destructuring, no rest parameter
    pub fn has_simple_parameter_list(&self) -> bool {
        self.rest.is_none() && self.params.iter().all(|p| matches!(p, Pattern::Identifier(_)))
    }

    /// Some parameter evaluates an expression while binding
    pub fn has_parameter_expressions(&self) -> bool {
        self.params
            .iter()
            .chain(self.rest.iter())
            .any(Pattern::contains_expression)
    }
}

/// Class member
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMember {
    /// Member key
    pub key: PropertyKey,
    /// Method body
    pub value: FunctionNode,
    /// `static` member
    pub is_static: bool,
}

/// Class declaration or expression
#[derive(Debug, Clone, PartialEq)]
pub struct ClassNode {
    /// Node id (keys the class scope layout)
    pub node: NodeId,
    /// Class name
    pub id: Option<Identifier>,
    /// `extends` clause
    pub superclass: Option<Expression>,
    /// Methods, including the constructor
    pub members: Vec<ClassMember>,
    /// Source position
    pub span: Span,
}

/// Hands out fresh node ids while building trees by hand
#[derive(Debug, Default)]
pub struct AstBuilder {
    next: u32,
}

impl AstBuilder {
    /// New builder starting at node id 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh node id
    pub fn node(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }

    /// Identifier with a fresh node id
    pub fn ident(&mut self, name: &str) -> Identifier {
        Identifier {
            name: name.to_string(),
            node: self.node(),
            span: Span::default(),
        }
    }

    /// Identifier reference expression
    pub fn reference(&mut self, name: &str) -> Expression {
        Expression::Identifier(self.ident(name))
    }

    /// `this`
    pub fn this(&mut self) -> Expression {
        Expression::This {
            node: self.node(),
            span: Span::default(),
        }
    }

    /// `new.target`
    pub fn new_target(&mut self) -> Expression {
        Expression::NewTarget {
            node: self.node(),
            span: Span::default(),
        }
    }

    /// Number literal
    pub fn number(&mut self, n: f64) -> Expression {
        Expression::Literal(Literal::Number(n))
    }

    /// `kind name = init;`
    pub fn declare(
        &mut self,
        kind: VariableKind,
        name: &str,
        init: Option<Expression>,
    ) -> Statement {
        Statement::Variable(VariableDeclaration {
            kind,
            declarators: vec![VariableDeclarator {
                target: Pattern::Identifier(self.ident(name)),
                init,
            }],
        })
    }

    /// `target = value;`
    pub fn assign(&mut self, name: &str, value: Expression) -> Statement {
        let target = Pattern::Identifier(self.ident(name));
        Statement::Expression(Expression::Assignment {
            operator: AssignmentOperator::Assign,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    /// `callee(args)`
    pub fn call(&mut self, callee: Expression, arguments: Vec<Expression>) -> Expression {
        Expression::Call {
            callee: Box::new(callee),
            arguments,
        }
    }

    /// `{ body }`
    pub fn block(&mut self, body: Vec<Statement>) -> Statement {
        Statement::Block(Block {
            body,
            node: self.node(),
        })
    }

    /// Function node with identifier parameters and a block body
    pub fn function(
        &mut self,
        kind: FunctionKind,
        name: Option<&str>,
        params: &[&str],
        body: Vec<Statement>,
    ) -> FunctionNode {
        let id = name.map(|n| self.ident(n));
        let params = params
            .iter()
            .map(|p| Pattern::Identifier(self.ident(p)))
            .collect();
        FunctionNode {
            node: self.node(),
            id,
            kind,
            params,
            rest: None,
            body: FunctionBody::Block(body),
            strict: false,
            span: Span::default(),
        }
    }

    /// `function name(params) { body }` statement
    pub fn function_declaration(
        &mut self,
        name: &str,
        params: &[&str],
        body: Vec<Statement>,
    ) -> Statement {
        Statement::Function(Box::new(self.function(
            FunctionKind::Normal,
            Some(name),
            params,
            body,
        )))
    }

    /// `(params) => { body }` expression
    pub fn arrow(&mut self, params: &[&str], body: Vec<Statement>) -> Expression {
        Expression::Function(Box::new(self.function(FunctionKind::Arrow, None, params, body)))
    }

    /// Program with a fresh node id
    pub fn program(&mut self, body: Vec<Statement>) -> Program {
        Program {
            body,
            strict: false,
            node: self.node(),
        }
    }
}
