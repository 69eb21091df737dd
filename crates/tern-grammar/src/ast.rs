//! Representation of the Tern abstract syntax tree.
//!
//! Expressions are allocated in a single arena per parse; every node has a
//! stable id assigned in allocation order. Downstream phases attach types,
//! resolved references, and diagnostics to nodes through side tables keyed
//! by id, so the tree itself never changes after parsing.

use std::collections::HashMap;
use std::fmt;

use id_arena::Arena;
use id_arena::Id;

use crate::Span;

/// Represents an identifier of an expression node.
pub type ExprId = Id<Expr>;

/// Represents a literal value in an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// A literal `null`.
    Null,
    /// A literal boolean.
    Bool(bool),
    /// A literal signed integer.
    Int(i64),
    /// A literal unsigned integer.
    Uint(u64),
    /// A literal double.
    Double(f64),
    /// A literal string.
    String(String),
    /// A literal bytes value.
    Bytes(Vec<u8>),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}u"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Bytes(v) => write!(f, "b{v:?}"),
        }
    }
}

/// Represents a unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// The logical `!` operator.
    Not,
    /// The arithmetic `-` operator.
    Negate,
}

impl UnaryOp {
    /// Gets the display symbol of the operator.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Not => "!",
            Self::Negate => "-",
        }
    }
}

/// Represents a binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// The logical `||` operator.
    Or,
    /// The logical `&&` operator.
    And,
    /// The `==` operator.
    Equal,
    /// The `!=` operator.
    NotEqual,
    /// The `<` operator.
    Less,
    /// The `<=` operator.
    LessEqual,
    /// The `>` operator.
    Greater,
    /// The `>=` operator.
    GreaterEqual,
    /// The membership `in` operator.
    In,
    /// The `+` operator.
    Add,
    /// The `-` operator.
    Subtract,
    /// The `*` operator.
    Multiply,
    /// The `/` operator.
    Divide,
    /// The `%` operator.
    Remainder,
}

impl BinaryOp {
    /// Gets the display symbol of the operator.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Or => "||",
            Self::And => "&&",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::In => "in",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Remainder => "%",
        }
    }
}

/// Represents an entry in a map literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    /// The key expression.
    pub key: ExprId,
    /// The value expression.
    pub value: ExprId,
}

/// Represents a field initializer in a message literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInit {
    /// The field name.
    pub name: String,
    /// The span of the field name.
    pub name_span: Span,
    /// The value expression.
    pub value: ExprId,
}

/// Represents a comprehension over a finite range.
///
/// Comprehensions are produced by macro expansion in the parser; there is no
/// surface syntax for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comprehension {
    /// The name of the iteration variable.
    pub iter_var: String,
    /// The expression producing the range to iterate.
    pub range: ExprId,
    /// The name of the accumulator variable.
    pub accu_var: String,
    /// The expression producing the initial accumulator value.
    pub init: ExprId,
    /// The loop condition expression; iteration stops when it is not `true`.
    pub condition: ExprId,
    /// The loop step expression; its value rebinds the accumulator.
    pub step: ExprId,
    /// The result expression, evaluated after the loop exits.
    pub result: ExprId,
}

/// Represents the kind of an expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// A literal value.
    Literal(Literal),
    /// An identifier.
    ///
    /// A leading `.` marks the name as absolute: it is resolved without
    /// applying the container namespace.
    Ident(String),
    /// A field selection (`e.f`, `e.?f`, or the expansion of `has(e.f)`).
    Select {
        /// The operand being selected from.
        operand: ExprId,
        /// The name of the selected field.
        field: String,
        /// Whether the selection uses the presence-safe `.?` form.
        optional: bool,
        /// Whether the selection is a presence test produced by `has`.
        test: bool,
    },
    /// An index operation (`e[i]` or `e[?i]`).
    Index {
        /// The operand being indexed.
        operand: ExprId,
        /// The index expression.
        index: ExprId,
        /// Whether the index uses the presence-safe `[?]` form.
        optional: bool,
    },
    /// A function call, either global (`f(...)`) or receiver-style
    /// (`e.f(...)`).
    Call {
        /// The receiver of the call, if receiver-style.
        target: Option<ExprId>,
        /// The name of the called function.
        ///
        /// Global call names may carry a leading `.` for absolute resolution.
        function: String,
        /// The argument expressions.
        args: Vec<ExprId>,
    },
    /// A unary operation.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: ExprId,
    },
    /// A binary operation.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// The left operand.
        lhs: ExprId,
        /// The right operand.
        rhs: ExprId,
    },
    /// A ternary conditional (`c ? a : b`).
    Ternary {
        /// The condition expression.
        condition: ExprId,
        /// The expression evaluated when the condition is true.
        truthy: ExprId,
        /// The expression evaluated when the condition is false.
        falsy: ExprId,
    },
    /// A list literal.
    List {
        /// The element expressions.
        elements: Vec<ExprId>,
    },
    /// A map literal.
    Map {
        /// The entries of the map.
        entries: Vec<MapEntry>,
    },
    /// A message literal (`some.Message{field: value}`).
    Message {
        /// The possibly-qualified message type name.
        type_name: String,
        /// The field initializers.
        fields: Vec<FieldInit>,
    },
    /// A comprehension produced by macro expansion.
    Comprehension(Box<Comprehension>),
    /// A placeholder for source that failed to parse.
    Invalid,
}

/// Represents an expression node.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// The kind of the expression.
    pub kind: ExprKind,
    /// The source span of the expression.
    pub span: Span,
}

/// Represents a parsed expression tree.
///
/// The tree owns the node arena and the macro-origin side table. It is
/// immutable once parsing completes.
#[derive(Debug, Clone, Default)]
pub struct Ast {
    /// The expression arena.
    arena: Arena<Expr>,
    /// The root expression, if parsing produced one.
    root: Option<ExprId>,
    /// Maps nodes produced by macro expansion to the macro's name.
    macro_origins: HashMap<ExprId, &'static str>,
}

impl Ast {
    /// Creates a new, empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new expression node, returning its id.
    pub fn alloc(&mut self, kind: ExprKind, span: Span) -> ExprId {
        self.arena.alloc(Expr { kind, span })
    }

    /// Gets an expression by id.
    ///
    /// # Panics
    ///
    /// Panics if the id does not belong to this tree.
    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.arena[id]
    }

    /// Gets the kind of an expression by id.
    pub fn kind(&self, id: ExprId) -> &ExprKind {
        &self.arena[id].kind
    }

    /// Gets the source span of an expression by id.
    pub fn span(&self, id: ExprId) -> Span {
        self.arena[id].span
    }

    /// Gets the number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Determines if the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.arena.len() == 0
    }

    /// Gets the root expression of the tree.
    ///
    /// The root is `None` only when parsing failed before producing any
    /// expression.
    pub fn root(&self) -> Option<ExprId> {
        self.root
    }

    /// Sets the root expression of the tree.
    pub(crate) fn set_root(&mut self, root: ExprId) {
        self.root = Some(root);
    }

    /// Converts a field selection into a presence test.
    ///
    /// This is used by `has` macro expansion; the node is otherwise
    /// unchanged.
    pub(crate) fn make_test_select(&mut self, id: ExprId) {
        if let ExprKind::Select { test, .. } = &mut self.arena[id].kind {
            *test = true;
        }
    }

    /// Records that a node was produced by expanding the named macro.
    pub(crate) fn set_macro_origin(&mut self, id: ExprId, name: &'static str) {
        self.macro_origins.insert(id, name);
    }

    /// Gets the name of the macro that produced the given node, if any.
    pub fn macro_origin(&self, id: ExprId) -> Option<&'static str> {
        self.macro_origins.get(&id).copied()
    }

    /// Iterates over all node ids in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = ExprId> + '_ {
        self.arena.iter().map(|(id, _)| id)
    }
}
