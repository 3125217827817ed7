use thiserror::Error;

/// A script region was opened but never closed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed template: script region opened at byte {offset} has no closing marker")]
pub struct MalformedTemplate {
    /// Byte offset of the unmatched start marker in the document.
    pub offset: usize,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    MalformedTemplate(#[from] MalformedTemplate),

    #[error(transparent)]
    Compile(#[from] scriba_engine::CompileError),

    #[error(transparent)]
    Bind(#[from] scriba_engine::BindError),

    #[error("extension '{name}' failed to initialize: {source}")]
    ExtensionInit {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("extension '{name}' hook failed: {source}")]
    ExtensionHook {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("execution error: {0}")]
    Execution(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
