//! Control-flow automaton: program locations connected by edges.
//!
//! Expressions and edges are closed sum types; every consumer matches them
//! exhaustively.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};

/// Program location.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Var(String),
    Const(i64),
    /// Unknown value, e.g. an external input.
    Nondet,
    /// Pointer dereference `*e`.
    Deref(Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn constant(value: i64) -> Self {
        Expr::Const(value)
    }

    pub fn unary(op: UnaryOp, e: Expr) -> Self {
        Expr::Unary(op, Box::new(e))
    }

    pub fn binary(op: BinaryOp, a: Expr, b: Expr) -> Self {
        Expr::Binary(op, Box::new(a), Box::new(b))
    }

    pub fn deref(e: Expr) -> Self {
        Expr::Deref(Box::new(e))
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Const(c) => write!(f, "{}", c),
            Expr::Nondet => write!(f, "nondet()"),
            Expr::Deref(e) => write!(f, "*{}", e),
            Expr::Unary(UnaryOp::Neg, e) => write!(f, "-{}", e),
            Expr::Unary(UnaryOp::Not, e) => write!(f, "!{}", e),
            Expr::Unary(UnaryOp::BitNot, e) => write!(f, "~{}", e),
            Expr::Binary(op, a, b) => write!(f, "({} {} {})", a, op.symbol(), b),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Blank,
    Declaration {
        variable: String,
        initializer: Option<Expr>,
    },
    Assign {
        lhs: Expr,
        rhs: Expr,
    },
    Assume {
        condition: Expr,
        truth: bool,
    },
    /// Jump from `call_site` into the entry of `function`, binding
    /// `parameters` to `arguments`.
    FunctionCall {
        function: String,
        arguments: Vec<Expr>,
        parameters: Vec<String>,
        call_site: NodeId,
    },
    /// Jump from the exit of `function` back to the caller, optionally storing
    /// the return value into `assigned`.
    FunctionReturn {
        function: String,
        call_site: NodeId,
        assigned: Option<Expr>,
    },
    /// `return value;` inside `function`.
    Return {
        function: String,
        value: Option<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CfaEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
}

impl CfaEdge {
    pub fn new(from: NodeId, to: NodeId, kind: EdgeKind) -> Self {
        Self { from, to, kind }
    }
}

impl Display for CfaEdge {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: ", self.from, self.to)?;
        match &self.kind {
            EdgeKind::Blank => write!(f, "skip"),
            EdgeKind::Declaration {
                variable,
                initializer: Some(init),
            } => write!(f, "int {} = {}", variable, init),
            EdgeKind::Declaration {
                variable,
                initializer: None,
            } => write!(f, "int {}", variable),
            EdgeKind::Assign { lhs, rhs } => write!(f, "{} = {}", lhs, rhs),
            EdgeKind::Assume { condition, truth } => {
                if *truth {
                    write!(f, "[{}]", condition)
                } else {
                    write!(f, "[!{}]", condition)
                }
            }
            EdgeKind::FunctionCall {
                function, arguments, ..
            } => {
                write!(f, "{}(", function)?;
                for (i, arg) in arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            EdgeKind::FunctionReturn {
                function,
                assigned: Some(lhs),
                ..
            } => write!(f, "{} = return from {}", lhs, function),
            EdgeKind::FunctionReturn { function, .. } => write!(f, "return from {}", function),
            EdgeKind::Return { value: Some(v), .. } => write!(f, "return {}", v),
            EdgeKind::Return { value: None, .. } => write!(f, "return"),
        }
    }
}

/// Name of the variable that carries the return value of `function`.
pub fn return_variable(function: &str) -> String {
    format!("{}::__retval__", function)
}

#[derive(Debug, Clone)]
pub struct Cfa {
    num_nodes: usize,
    edges: Vec<CfaEdge>,
    outgoing: Vec<Vec<usize>>,
    function_entries: BTreeMap<String, NodeId>,
    loop_heads: BTreeSet<NodeId>,
    entry: NodeId,
}

impl Cfa {
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn edges(&self) -> &[CfaEdge] {
        &self.edges
    }

    pub fn leaving_edges(&self, node: NodeId) -> impl Iterator<Item = &CfaEdge> + '_ {
        self.outgoing
            .get(node.0)
            .into_iter()
            .flatten()
            .map(move |&i| &self.edges[i])
    }

    pub fn function_entry(&self, function: &str) -> Option<NodeId> {
        self.function_entries.get(function).copied()
    }

    pub fn is_function_entry(&self, node: NodeId) -> bool {
        self.function_entries.values().any(|&n| n == node)
    }

    pub fn is_loop_head(&self, node: NodeId) -> bool {
        self.loop_heads.contains(&node)
    }
}

/// Incremental construction of a [`Cfa`].
#[derive(Debug)]
pub struct CfaBuilder {
    num_nodes: usize,
    edges: Vec<CfaEdge>,
    function_entries: BTreeMap<String, NodeId>,
    loop_heads: BTreeSet<NodeId>,
    entry: NodeId,
}

impl CfaBuilder {
    /// Start a CFA whose entry is the entry node of `main`.
    pub fn new(main: &str) -> Self {
        let mut builder = Self {
            num_nodes: 0,
            edges: Vec::new(),
            function_entries: BTreeMap::new(),
            loop_heads: BTreeSet::new(),
            entry: NodeId(0),
        };
        builder.entry = builder.function(main);
        builder
    }

    pub fn node(&mut self) -> NodeId {
        let id = NodeId(self.num_nodes);
        self.num_nodes += 1;
        id
    }

    /// Declare a function and return its entry node.
    pub fn function(&mut self, name: &str) -> NodeId {
        if let Some(&entry) = self.function_entries.get(name) {
            return entry;
        }
        let entry = self.node();
        self.function_entries.insert(name.to_string(), entry);
        entry
    }

    pub fn loop_head(&mut self, node: NodeId) -> &mut Self {
        self.loop_heads.insert(node);
        self
    }

    pub fn edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) -> &mut Self {
        assert!(
            from.0 < self.num_nodes && to.0 < self.num_nodes,
            "Edge {} -> {} refers to an unknown node",
            from,
            to
        );
        self.edges.push(CfaEdge::new(from, to, kind));
        self
    }

    pub fn assign(&mut self, from: NodeId, to: NodeId, variable: &str, rhs: Expr) -> &mut Self {
        self.edge(
            from,
            to,
            EdgeKind::Assign {
                lhs: Expr::var(variable),
                rhs,
            },
        )
    }

    /// Both branches of `if (condition)`.
    pub fn branch(&mut self, from: NodeId, then: NodeId, otherwise: NodeId, condition: Expr) -> &mut Self {
        self.edge(
            from,
            then,
            EdgeKind::Assume {
                condition: condition.clone(),
                truth: true,
            },
        );
        self.edge(
            from,
            otherwise,
            EdgeKind::Assume {
                condition,
                truth: false,
            },
        )
    }

    pub fn build(&self) -> Cfa {
        let mut outgoing = vec![Vec::new(); self.num_nodes];
        for (i, edge) in self.edges.iter().enumerate() {
            outgoing[edge.from.0].push(i);
        }
        Cfa {
            num_nodes: self.num_nodes,
            edges: self.edges.clone(),
            outgoing,
            function_entries: self.function_entries.clone(),
            loop_heads: self.loop_heads.clone(),
            entry: self.entry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let mut builder = CfaBuilder::new("main");
        let entry = builder.function("main");
        let n1 = builder.node();
        let n2 = builder.node();
        let n3 = builder.node();
        builder
            .assign(entry, n1, "x", Expr::constant(5))
            .branch(n1, n2, n3, Expr::binary(BinaryOp::Gt, Expr::var("x"), Expr::constant(0)))
            .loop_head(n1);
        let cfa = builder.build();

        assert_eq!(cfa.entry(), entry);
        assert_eq!(cfa.num_nodes(), 4);
        assert_eq!(cfa.leaving_edges(entry).count(), 1);
        assert_eq!(cfa.leaving_edges(n1).count(), 2);
        assert_eq!(cfa.leaving_edges(n3).count(), 0);
        assert!(cfa.is_loop_head(n1));
        assert!(cfa.is_function_entry(entry));
        assert!(!cfa.is_function_entry(n1));
    }

    #[test]
    fn test_display() {
        let edge = CfaEdge::new(
            NodeId(1),
            NodeId(2),
            EdgeKind::Assume {
                condition: Expr::binary(BinaryOp::Lt, Expr::var("x"), Expr::constant(3)),
                truth: false,
            },
        );
        assert_eq!(edge.to_string(), "N1 -> N2: [!(x < 3)]");
        assert_eq!(return_variable("f"), "f::__retval__");
    }
}
