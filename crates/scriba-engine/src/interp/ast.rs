use crate::Value;

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    /// `name := expr` — declare in the current scope.
    Declare { name: String, value: Expr },
    /// `name = expr` — assign an existing local or global.
    Assign { name: String, value: Expr },
    If {
        cond: Expr,
        then_block: Vec<Stmt>,
        else_block: Vec<Stmt>,
    },
    While { cond: Expr, body: Vec<Stmt> },
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    ArrayLit(Vec<Expr>),
    MapLit(Vec<(String, Expr)>),
    Ident(String),
    Member { object: Box<Expr>, field: String },
    Index { object: Box<Expr>, index: Box<Expr> },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}
