//! Recursive-descent parser over the lexed token stream.

use super::ast::{BinaryOp, Expr, Stmt, UnaryOp};
use super::lexer::{Spanned, Token};
use crate::{CompileError, Value};

pub fn parse(tokens: Vec<Spanned>) -> Result<Vec<Stmt>, CompileError> {
    let mut parser = Parser { tokens, pos: 0 };
    let stmts = parser.block_body(None)?;
    Ok(stmts)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| s.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|s| s.token.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, want: &Token) -> bool {
        if self.peek() == Some(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, want: Token, what: &str) -> Result<(), CompileError> {
        if self.eat(&want) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(message, self.line())
    }

    fn skip_separators(&mut self) {
        while self.eat(&Token::Semi) {}
    }

    /// Parse statements until `end` (or end of input when `end` is `None`).
    fn block_body(&mut self, end: Option<&Token>) -> Result<Vec<Stmt>, CompileError> {
        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            match self.peek() {
                None => {
                    if let Some(end) = end {
                        return Err(self.error(format!("unexpected end of input, expected {end:?}")));
                    }
                    return Ok(stmts);
                }
                Some(tok) if Some(tok) == end => {
                    self.pos += 1;
                    return Ok(stmts);
                }
                _ => stmts.push(self.statement()?),
            }
        }
    }

    fn statement(&mut self) -> Result<Stmt, CompileError> {
        match self.peek() {
            Some(Token::If) => self.if_statement(),
            Some(Token::While) => {
                self.pos += 1;
                let cond = self.expression()?;
                self.expect(Token::LBrace, "'{' after while condition")?;
                let body = self.block_body(Some(&Token::RBrace))?;
                Ok(Stmt::While { cond, body })
            }
            Some(Token::Ident(_)) => {
                // Lookahead for `ident :=` / `ident =` without committing.
                let name = match self.tokens[self.pos].token.clone() {
                    Token::Ident(name) => name,
                    _ => unreachable!(),
                };
                match self.tokens.get(self.pos + 1).map(|s| &s.token) {
                    Some(Token::Declare) => {
                        self.pos += 2;
                        let value = self.expression()?;
                        Ok(Stmt::Declare { name, value })
                    }
                    Some(Token::Assign) => {
                        self.pos += 2;
                        let value = self.expression()?;
                        Ok(Stmt::Assign { name, value })
                    }
                    _ => Ok(Stmt::Expr(self.expression()?)),
                }
            }
            _ => Ok(Stmt::Expr(self.expression()?)),
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, CompileError> {
        self.expect(Token::If, "'if'")?;
        let cond = self.expression()?;
        self.expect(Token::LBrace, "'{' after if condition")?;
        let then_block = self.block_body(Some(&Token::RBrace))?;

        // Allow `}` and `else` on separate lines.
        let mark = self.pos;
        self.skip_separators();
        let else_block = if self.eat(&Token::Else) {
            if self.peek() == Some(&Token::If) {
                vec![self.if_statement()?]
            } else {
                self.expect(Token::LBrace, "'{' after else")?;
                self.block_body(Some(&Token::RBrace))?
            }
        } else {
            self.pos = mark;
            Vec::new()
        };

        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
        })
    }

    fn expression(&mut self) -> Result<Expr, CompileError> {
        self.equality()
    }

    fn equality(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.comparison()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn comparison(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn factor(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, CompileError> {
        let op = match self.peek() {
            Some(Token::Minus) => Some(UnaryOp::Neg),
            Some(Token::Bang) => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let field = match self.advance() {
                        Some(Token::Ident(name)) => name,
                        _ => return Err(self.error("expected field name after '.'")),
                    };
                    expr = Expr::Member {
                        object: Box::new(expr),
                        field,
                    };
                }
                Some(Token::LParen) => {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if !self.eat(&Token::RParen) {
                        loop {
                            args.push(self.expression()?);
                            if self.eat(&Token::Comma) {
                                continue;
                            }
                            self.expect(Token::RParen, "')' after call arguments")?;
                            break;
                        }
                    }
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.expression()?;
                    self.expect(Token::RBracket, "']' after index")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, CompileError> {
        match self.advance() {
            Some(Token::Int(n)) => Ok(Expr::Literal(Value::Int(n))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Value::Float(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::Bytes(b)) => Ok(Expr::Literal(Value::Bytes(b))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Ident(name)) => Ok(Expr::Ident(name)),
            Some(Token::LParen) => {
                let expr = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(expr)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                loop {
                    if self.eat(&Token::RBracket) {
                        return Ok(Expr::ArrayLit(items));
                    }
                    items.push(self.expression()?);
                    if self.eat(&Token::Comma) {
                        continue;
                    }
                    self.expect(Token::RBracket, "']' after array items")?;
                    return Ok(Expr::ArrayLit(items));
                }
            }
            Some(Token::LBrace) => {
                // Map literal. Newlines inside braces are ordinary statement
                // separators to the lexer, so skip them around entries.
                let mut entries = Vec::new();
                loop {
                    self.skip_separators();
                    if self.eat(&Token::RBrace) {
                        return Ok(Expr::MapLit(entries));
                    }
                    let key = match self.advance() {
                        Some(Token::Ident(name)) => name,
                        Some(Token::Str(name)) => name,
                        _ => return Err(self.error("expected map key")),
                    };
                    self.expect(Token::Colon, "':' after map key")?;
                    let value = self.expression()?;
                    entries.push((key, value));
                    self.skip_separators();
                    if self.eat(&Token::Comma) {
                        continue;
                    }
                    self.skip_separators();
                    self.expect(Token::RBrace, "'}' after map entries")?;
                    return Ok(Expr::MapLit(entries));
                }
            }
            Some(other) => Err(self.error(format!("unexpected token {other:?}"))),
            None => Err(self.error("unexpected end of input")),
        }
    }
}
