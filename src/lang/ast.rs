//! The score-language AST.
//!
//! The host-side parser (out of scope here) builds this tree; the
//! interpreter walks it. Every node carries the source line and include
//! file it came from so diagnostics can name the user's position.

use std::rc::Rc;

use super::value::{BinOp, RelOp, UnOp, ValueType};

/// Compound-assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Plus,
    Minus,
    Mul,
    Div,
    Increment,
    Decrement,
}

impl AssignOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            AssignOp::Plus => "+=",
            AssignOp::Minus => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
            AssignOp::Increment => "++",
            AssignOp::Decrement => "--",
        }
    }
}

/// One declared argument of a user-defined function.
#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: Rc<str>,
    pub ty: ValueType,
    /// Struct type name when `ty` is [`ValueType::Struct`].
    pub struct_type: Option<Rc<str>>,
}

/// One declared member of a struct type.
#[derive(Debug, Clone)]
pub struct MemberDecl {
    pub name: Rc<str>,
    pub ty: ValueType,
    /// Struct type name when `ty` is [`ValueType::Struct`].
    pub subtype: Option<Rc<str>>,
}

/// A function bound to a symbol: argument declarations plus body.
///
/// This is the payload of a `Function` value; cloning the value aliases
/// the same definition.
#[derive(Debug)]
pub struct FunctionValue {
    pub name: Rc<str>,
    pub params: Vec<ParamDecl>,
    pub body: Rc<Node>,
    pub is_method: bool,
}

/// An AST node: a kind plus its source position.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub line: u32,
    pub file: Option<Rc<str>>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Node {
        Node { kind, line: 0, file: None }
    }

    /// Attach a source position.
    pub fn at(mut self, line: u32, file: &str) -> Node {
        self.line = line;
        self.file = Some(Rc::from(file));
        self
    }
}

/// The node set executed by the interpreter.
///
/// Child lists that the original system represented as cons-style element
/// chains (`ListElem`, `ArgListElem`) are plain vectors here.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Noop,

    // Literals and loads
    Constf(f64),
    String(Rc<str>),
    /// Load a symbol's value; undeclared is fatal.
    LoadSym(Rc<str>),
    /// Load a symbol's value, declaring it in the current scope if absent.
    AutoDeclLoadSym(Rc<str>),
    /// Load a function symbol; if absent the bare name is kept as a string
    /// so a builtin can still be dispatched by name at call time.
    LoadFuncSym(Rc<str>),

    /// List literal.
    List(Vec<Node>),

    // Subscripts
    SubscriptRead {
        target: Box<Node>,
        index: Box<Node>,
    },
    SubscriptWrite {
        target: Box<Node>,
        index: Box<Node>,
        value: Box<Node>,
    },

    /// Struct member or method access.
    MemberAccess {
        target: Box<Node>,
        member: Rc<str>,
    },

    // Assignment
    Store {
        lhs: Box<Node>,
        rhs: Box<Node>,
        /// `true`: assigning a differently-typed value warns and
        /// overwrites; `false`: it is fatal.
        allow_type_overwrite: bool,
    },
    OpAssign {
        target: Box<Node>,
        value: Box<Node>,
        op: AssignOp,
    },

    // Arithmetic and boolean
    Operator {
        lhs: Box<Node>,
        rhs: Box<Node>,
        op: BinOp,
    },
    UnaryOperator {
        operand: Box<Node>,
        op: UnOp,
    },
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
    Relation {
        lhs: Box<Node>,
        rhs: Box<Node>,
        op: RelOp,
    },

    // Control flow
    If {
        cond: Box<Node>,
        then: Box<Node>,
    },
    IfElse {
        cond: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
    While {
        cond: Box<Node>,
        body: Box<Node>,
    },
    For {
        init: Box<Node>,
        cond: Box<Node>,
        step: Box<Node>,
        body: Box<Node>,
    },
    /// Braced block: runs its child in a fresh scope.
    Block(Box<Node>),
    /// Two children in order; the second's value is the result.
    Seq(Box<Node>, Box<Node>),
    /// Function body followed by its return statement.
    FuncBodySeq {
        body: Box<Node>,
        ret: Box<Node>,
    },

    // Declarations
    Decl {
        name: Rc<str>,
        ty: ValueType,
    },
    StructDecl {
        type_name: Rc<str>,
        name: Rc<str>,
        /// Optional initializer list (a `List` node) copied element-wise
        /// into members.
        init: Option<Box<Node>>,
    },
    FuncDecl(Rc<str>),
    MethodDecl {
        struct_name: Rc<str>,
        name: Rc<str>,
    },

    // Function machinery
    FuncDef {
        decl: Box<Node>,
        params: Vec<ParamDecl>,
        body: Rc<Node>,
        is_method: bool,
    },
    /// Evaluate the expression and transfer control out of the current
    /// call. Terminal.
    Ret(Box<Node>),
    Call {
        target: Box<Node>,
        args: Vec<Node>,
    },

    // Struct machinery
    StructDef {
        name: Rc<str>,
        members: Vec<MemberDecl>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_attachment() {
        let node = Node::new(NodeKind::Constf(1.0)).at(12, "score.sco");
        assert_eq!(node.line, 12);
        assert_eq!(node.file.as_deref(), Some("score.sco"));
    }

    #[test]
    fn test_nodes_clone() {
        let node = Node::new(NodeKind::Operator {
            lhs: Box::new(Node::new(NodeKind::Constf(1.0))),
            rhs: Box::new(Node::new(NodeKind::Constf(2.0))),
            op: BinOp::Plus,
        });
        let copy = node.clone();
        assert!(matches!(copy.kind, NodeKind::Operator { .. }));
    }
}
