//! Built-in interpreter backend.
//!
//! A deliberately small statement language: enough for transpiled template
//! documents and the host-bound capability surface, nothing more. Compilation
//! is lex + parse; execution walks the tree. The split between an immutable
//! [`Program`] and per-request [`Instance`]s mirrors the engine boundary:
//! compile once, instantiate per request, execute with mutable globals.

mod ast;
mod eval;
mod lexer;
mod parser;

#[cfg(test)]
mod tests;

use crate::{BindError, Compiler, CompileError, ExecError, Instance, Program, ScriptEngine, Value};
use ast::Stmt;
use std::collections::HashMap;
use std::sync::Arc;

/// The built-in script engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreter;

impl Interpreter {
    pub fn new() -> Self {
        Self
    }
}

impl ScriptEngine for Interpreter {
    fn compiler(&self) -> Box<dyn Compiler> {
        Box::new(InterpCompiler {
            declared: Vec::new(),
        })
    }
}

struct InterpCompiler {
    declared: Vec<String>,
}

impl Compiler for InterpCompiler {
    fn declare_global(&mut self, name: &str) {
        if !self.declared.iter().any(|n| n == name) {
            self.declared.push(name.to_string());
        }
    }

    fn compile(self: Box<Self>, source: &[u8]) -> Result<Arc<dyn Program>, CompileError> {
        let tokens = lexer::lex(source)?;
        let stmts = parser::parse(tokens)?;
        Ok(Arc::new(InterpProgram {
            stmts: Arc::new(stmts),
            declared: self.declared.into(),
        }))
    }
}

struct InterpProgram {
    stmts: Arc<Vec<Stmt>>,
    declared: Arc<[String]>,
}

impl Program for InterpProgram {
    fn new_instance(&self) -> Box<dyn Instance> {
        let globals = self
            .declared
            .iter()
            .map(|name| (name.clone(), Value::Null))
            .collect();
        Box::new(InterpInstance {
            stmts: Arc::clone(&self.stmts),
            globals,
        })
    }
}

struct InterpInstance {
    stmts: Arc<Vec<Stmt>>,
    /// One slot per declared global. Presence of the key is the declaration
    /// check for `bind_global`; unbound slots read as null.
    globals: HashMap<String, Value>,
}

impl Instance for InterpInstance {
    fn bind_global(&mut self, name: &str, value: Value) -> Result<(), BindError> {
        match self.globals.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(BindError {
                name: name.to_string(),
            }),
        }
    }

    fn run(&mut self) -> Result<(), ExecError> {
        eval::run(&self.stmts, &mut self.globals)
    }

    fn reset(&mut self) {
        for slot in self.globals.values_mut() {
            *slot = Value::Null;
        }
    }
}
