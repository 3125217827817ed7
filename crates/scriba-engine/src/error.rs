use thiserror::Error;

/// Source could not be compiled.
#[derive(Error, Debug, Clone)]
#[error("compile error at line {line}: {message}")]
pub struct CompileError {
    pub message: String,
    /// 1-based source line the error was detected on.
    pub line: u32,
}

impl CompileError {
    pub fn new(message: impl Into<String>, line: u32) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

/// A value was bound to a global name the program never declared.
#[derive(Error, Debug, Clone)]
#[error("global '{name}' was not declared at compile time")]
pub struct BindError {
    pub name: String,
}

/// Program execution stopped.
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Deliberate in-script short-circuit. Not a failure: output and status
    /// accumulated so far remain valid.
    #[error("execution aborted by script")]
    Aborted,

    /// Anything else that stopped the program.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl ExecError {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }
}
