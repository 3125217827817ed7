//! Per-request correlation ids.
//!
//! Binds a `request_id` global carrying an id that is unique for the life of
//! the process, useful for correlating script output with server logs.

use crate::extension::Extension;
use crate::request::RequestContext;
use scriba_engine::{Instance, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct RequestIdExtension {
    prefix: String,
    counter: AtomicU64,
}

impl RequestIdExtension {
    pub fn new(prefix: Option<String>) -> Self {
        let prefix = prefix.unwrap_or_else(|| {
            // Process-unique default so ids from restarts don't collide.
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.subsec_nanos())
                .unwrap_or(0);
            format!("{nanos:08x}")
        });
        Self {
            prefix,
            counter: AtomicU64::new(0),
        }
    }
}

impl Extension for RequestIdExtension {
    fn name(&self) -> &str {
        "request_id"
    }

    fn declared_globals(&self) -> Vec<String> {
        vec!["request_id".to_string()]
    }

    fn hook(&self, instance: &mut dyn Instance, _ctx: &RequestContext) -> anyhow::Result<()> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        instance.bind_global("request_id", Value::Str(format!("{}-{n}", self.prefix)))?;
        Ok(())
    }
}
