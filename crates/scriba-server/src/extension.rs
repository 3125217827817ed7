//! Extension contract.
//!
//! Extensions add script-visible capabilities (a global or a namespace of
//! them) without the core knowing anything about what they do. The contract
//! is deliberately narrow:
//!
//! - [`Extension::declared_globals`] is consumed once, before any program is
//!   compiled: the cache must declare every name an extension might bind,
//!   because names cannot be added to an already-compiled program.
//! - [`Extension::init`] runs once before serving begins; a failure aborts
//!   startup.
//! - [`Extension::hook`] runs once per request, in registration order, and
//!   binds exactly the declared names onto the borrowed instance.
//! - [`Extension::shutdown`] runs once during teardown; failures are
//!   collected and logged, never fatal.
//!
//! Declared names share one global namespace with the core surface and the
//! other extensions. Collisions are not resolved: the first registration
//! wins and a warning is logged at startup.

use crate::request::RequestContext;
use scriba_engine::Instance;

pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    /// Global names this extension will bind in its hook.
    fn declared_globals(&self) -> Vec<String>;

    /// Called once before the server starts accepting requests.
    fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once per request before execution, in registration order.
    fn hook(&self, instance: &mut dyn Instance, ctx: &RequestContext) -> anyhow::Result<()>;

    /// Called once during server teardown.
    fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
