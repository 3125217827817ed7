//! Typed extension registry.
//!
//! Maps a configuration tag to a statically typed constructor. Each
//! constructor deserializes its own config struct, so a bad extension config
//! fails at startup with a serde error instead of surfacing mid-request.

use anyhow::{anyhow, Context, Result};
use scriba_server::extensions::RequestIdExtension;
use scriba_server::Extension;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds one extension from its JSON config (null when the config file
/// omits it).
pub type Constructor = fn(serde_json::Value) -> Result<Arc<dyn Extension>>;

pub struct ExtensionRegistry {
    ctors: HashMap<&'static str, Constructor>,
}

impl ExtensionRegistry {
    pub fn empty() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    /// The registry with every extension this binary ships.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("request_id", build_request_id);
        registry
    }

    pub fn register(&mut self, tag: &'static str, ctor: Constructor) {
        self.ctors.insert(tag, ctor);
    }

    pub fn build(&self, tag: &str, config: serde_json::Value) -> Result<Arc<dyn Extension>> {
        let ctor = self
            .ctors
            .get(tag)
            .ok_or_else(|| anyhow!("unknown extension '{tag}'"))?;
        ctor(config).with_context(|| format!("building extension '{tag}'"))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RequestIdConfig {
    #[serde(default)]
    prefix: Option<String>,
}

fn build_request_id(config: serde_json::Value) -> Result<Arc<dyn Extension>> {
    let config: RequestIdConfig = if config.is_null() {
        RequestIdConfig::default()
    } else {
        serde_json::from_value(config)?
    };
    Ok(Arc::new(RequestIdExtension::new(config.prefix)))
}
