//! scriba server core.
//!
//! Serves documents from a directory tree. Documents may embed script
//! regions between `<!?` and `?!>` markers; on each request the document is
//! transpiled into pure script source, compiled (or fetched from the
//! content-addressed program cache), instantiated from the entry's clone
//! pool, bound with the per-request global surface, and executed.
//!
//! The crate is organized around the one-request data flow:
//!
//! path resolve → [`transpile`] → [`cache`] fetch/compile → bind
//! ([`globals`]) → extension hooks ([`extension`]) → execute → respond
//! ([`server`]).
//!
//! The scripting runtime itself sits behind the traits in `scriba-engine`;
//! this crate never assumes a concrete backend.

pub mod buffer;
pub mod cache;
pub mod error;
pub mod extension;
pub mod extensions;
pub mod globals;
pub mod request;
pub mod server;
pub mod transpile;

pub use cache::{Lease, ProgramCache};
pub use error::{Error, MalformedTemplate, Result};
pub use extension::Extension;
pub use request::{Cookie, RequestContext};
pub use server::{Server, ServerConfig, ServerHandle};
pub use transpile::transpile;
