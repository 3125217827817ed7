//! Tree-walking executor.
//!
//! Globals live in the instance's binding table; locals live in a scope stack
//! created fresh for every run, so repeated runs of the same instance start
//! from a clean slate apart from the bound globals.

use super::ast::{BinaryOp, Expr, Stmt, UnaryOp};
use crate::{ExecError, Value};
use std::collections::HashMap;

pub fn run(stmts: &[Stmt], globals: &mut HashMap<String, Value>) -> Result<(), ExecError> {
    let mut env = Env {
        globals,
        scopes: vec![HashMap::new()],
    };
    env.exec_block(stmts)
}

struct Env<'a> {
    globals: &'a mut HashMap<String, Value>,
    scopes: Vec<HashMap<String, Value>>,
}

impl Env<'_> {
    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<(), ExecError> {
        for stmt in stmts {
            self.exec(stmt)?;
        }
        Ok(())
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<(), ExecError> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(())
            }
            Stmt::Declare { name, value } => {
                let value = self.eval(value)?;
                self.scopes
                    .last_mut()
                    .expect("scope stack is never empty")
                    .insert(name.clone(), value);
                Ok(())
            }
            Stmt::Assign { name, value } => {
                let value = self.eval(value)?;
                for scope in self.scopes.iter_mut().rev() {
                    if let Some(slot) = scope.get_mut(name) {
                        *slot = value;
                        return Ok(());
                    }
                }
                if let Some(slot) = self.globals.get_mut(name) {
                    *slot = value;
                    return Ok(());
                }
                Err(ExecError::runtime(format!(
                    "assignment to undefined variable '{name}'"
                )))
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                let branch = if self.eval(cond)?.is_truthy() {
                    then_block
                } else {
                    else_block
                };
                self.scopes.push(HashMap::new());
                let result = self.exec_block(branch);
                self.scopes.pop();
                result
            }
            Stmt::While { cond, body } => {
                while self.eval(cond)?.is_truthy() {
                    self.scopes.push(HashMap::new());
                    let result = self.exec_block(body);
                    self.scopes.pop();
                    result?;
                }
                Ok(())
            }
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ExecError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::ArrayLit(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                Ok(Value::Array(out))
            }
            Expr::MapLit(entries) => {
                let mut out = HashMap::with_capacity(entries.len());
                for (key, value) in entries {
                    out.insert(key.clone(), self.eval(value)?);
                }
                Ok(Value::Map(out))
            }
            Expr::Ident(name) => {
                for scope in self.scopes.iter().rev() {
                    if let Some(value) = scope.get(name) {
                        return Ok(value.clone());
                    }
                }
                self.globals
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ExecError::runtime(format!("undefined symbol '{name}'")))
            }
            Expr::Member { object, field } => match self.eval(object)? {
                Value::Map(map) => Ok(map.get(field).cloned().unwrap_or(Value::Null)),
                other => Err(ExecError::runtime(format!(
                    "cannot access field '{field}' on {}",
                    other.type_name()
                ))),
            },
            Expr::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                match (object, index) {
                    (Value::Array(items), Value::Int(i)) => {
                        let i = usize::try_from(i).map_err(|_| {
                            ExecError::runtime(format!("negative array index {i}"))
                        })?;
                        items.get(i).cloned().ok_or_else(|| {
                            ExecError::runtime(format!(
                                "array index {i} out of range (len {})",
                                items.len()
                            ))
                        })
                    }
                    (Value::Map(map), Value::Str(key)) => {
                        Ok(map.get(&key).cloned().unwrap_or(Value::Null))
                    }
                    (object, index) => Err(ExecError::runtime(format!(
                        "cannot index {} with {}",
                        object.type_name(),
                        index.type_name()
                    ))),
                }
            }
            Expr::Call { callee, args } => {
                let callee = self.eval(callee)?;
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval(arg)?);
                }
                match callee {
                    Value::Native(f) => f(&evaluated),
                    other => Err(ExecError::runtime(format!(
                        "value of type {} is not callable",
                        other.type_name()
                    ))),
                }
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                match (op, operand) {
                    (UnaryOp::Neg, Value::Int(n)) => Ok(Value::Int(-n)),
                    (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                    (UnaryOp::Neg, other) => Err(ExecError::runtime(format!(
                        "cannot negate {}",
                        other.type_name()
                    ))),
                    (UnaryOp::Not, operand) => Ok(Value::Bool(!operand.is_truthy())),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                binary(*op, lhs, rhs)
            }
        }
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, ExecError> {
    use BinaryOp::*;
    match op {
        Eq => return Ok(Value::Bool(lhs == rhs)),
        Ne => return Ok(Value::Bool(lhs != rhs)),
        _ => {}
    }
    match (op, lhs, rhs) {
        (Add, Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(b))),
        (Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
        (Add, Value::Bytes(mut a), Value::Bytes(b)) => {
            a.extend_from_slice(&b);
            Ok(Value::Bytes(a))
        }
        (Sub, Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_sub(b))),
        (Mul, Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_mul(b))),
        (Div, Value::Int(a), Value::Int(b)) => {
            if b == 0 {
                Err(ExecError::runtime("division by zero"))
            } else {
                Ok(Value::Int(a.wrapping_div(b)))
            }
        }
        (Rem, Value::Int(a), Value::Int(b)) => {
            if b == 0 {
                Err(ExecError::runtime("division by zero"))
            } else {
                Ok(Value::Int(a.wrapping_rem(b)))
            }
        }
        (Lt, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a < b)),
        (Le, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a <= b)),
        (Gt, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a > b)),
        (Ge, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a >= b)),
        // Numeric paths, promoting through f64 when either side is a float.
        (op, lhs, rhs) => {
            let (a, b) = match (&lhs, &rhs) {
                (Value::Int(a), Value::Float(b)) => (*a as f64, *b),
                (Value::Float(a), Value::Int(b)) => (*a, *b as f64),
                (Value::Float(a), Value::Float(b)) => (*a, *b),
                (Value::Int(a), Value::Int(b)) => (*a as f64, *b as f64),
                _ => {
                    return Err(ExecError::runtime(format!(
                        "unsupported operand types {} and {}",
                        lhs.type_name(),
                        rhs.type_name()
                    )))
                }
            };
            match op {
                Add => Ok(Value::Float(a + b)),
                Sub => Ok(Value::Float(a - b)),
                Mul => Ok(Value::Float(a * b)),
                Div => {
                    if b == 0.0 {
                        Err(ExecError::runtime("division by zero"))
                    } else {
                        Ok(Value::Float(a / b))
                    }
                }
                Rem => {
                    if b == 0.0 {
                        Err(ExecError::runtime("division by zero"))
                    } else {
                        Ok(Value::Float(a % b))
                    }
                }
                Lt => Ok(Value::Bool(a < b)),
                Le => Ok(Value::Bool(a <= b)),
                Gt => Ok(Value::Bool(a > b)),
                Ge => Ok(Value::Bool(a >= b)),
                Eq | Ne => unreachable!("handled above"),
            }
        }
    }
}
