//! # scriba entry point
//!
//! Starts the document server from a JSON configuration file:
//!
//! ```bash
//! scriba --config ./config.json
//! ```
//!
//! ```json
//! {
//!   "bind_address": "127.0.0.1:8080",
//!   "public_dir": "./public",
//!   "expose_errors": false,
//!   "extensions": [
//!     { "tag": "request_id", "config": { "prefix": "web1" } }
//!   ]
//! }
//! ```
//!
//! Extensions are listed in hook order; each `tag` must exist in the typed
//! extension registry. `RUST_LOG` controls log filtering.

mod registry;

use anyhow::{Context, Result};
use argh::FromArgs;
use registry::ExtensionRegistry;
use scriba_engine::Interpreter;
use scriba_server::{Server, ServerConfig};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// scriba - serves documents with embedded script regions
#[derive(FromArgs)]
struct Cli {
    /// path to the JSON config file
    #[argh(option, short = 'c', default = "\"./config.json\".to_string()")]
    config: String,
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    /// Address the HTTP listener binds to.
    bind_address: String,
    /// Directory tree the documents are served from.
    public_dir: PathBuf,
    /// Expose literal error text in responses instead of generic messages.
    #[serde(default)]
    expose_errors: bool,
    /// Maximum number of cached compiled programs.
    #[serde(default = "default_cache_capacity")]
    cache_capacity: usize,
    /// How long shutdown waits for in-flight connections, in milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    shutdown_grace_ms: u64,
    /// Extensions to load, in hook order.
    #[serde(default)]
    extensions: Vec<ExtensionEntry>,
}

#[derive(Debug, Deserialize)]
struct ExtensionEntry {
    tag: String,
    #[serde(default)]
    config: serde_json::Value,
}

fn default_cache_capacity() -> usize {
    1024
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Default to INFO, overridable through RUST_LOG.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let data = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("reading config file '{}'", cli.config))?;
    let conf: FileConfig =
        serde_json::from_str(&data).with_context(|| format!("parsing '{}'", cli.config))?;

    let addr: SocketAddr = conf
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address '{}'", conf.bind_address))?;

    let mut server_conf = ServerConfig::new(&conf.public_dir);
    server_conf.expose_errors = conf.expose_errors;
    server_conf.cache_capacity = conf.cache_capacity;
    server_conf.shutdown_grace = Duration::from_millis(conf.shutdown_grace_ms);

    let mut server = Server::new(server_conf, Arc::new(Interpreter::new()));

    let registry = ExtensionRegistry::builtin();
    for entry in &conf.extensions {
        let extension = registry.build(&entry.tag, entry.config.clone())?;
        tracing::info!(extension = %entry.tag, "extension registered");
        server.add_extension(extension);
    }

    tracing::info!(
        "serving {} on {}",
        conf.public_dir.display(),
        conf.bind_address
    );
    let handle = server.start(addr).await?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;
    tracing::info!("interrupt received, shutting down");
    handle.shutdown().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_to_local_config() {
        let cli: Cli = Cli::from_args(&["scriba"], &[]).unwrap();
        assert_eq!(cli.config, "./config.json");
    }

    #[test]
    fn cli_accepts_config_flag() {
        let cli: Cli = Cli::from_args(&["scriba"], &["-c", "/etc/scriba.json"]).unwrap();
        assert_eq!(cli.config, "/etc/scriba.json");

        let cli: Cli = Cli::from_args(&["scriba"], &["--config", "other.json"]).unwrap();
        assert_eq!(cli.config, "other.json");
    }

    #[test]
    fn config_parses_with_defaults() {
        let conf: FileConfig = serde_json::from_str(
            r#"{"bind_address": "127.0.0.1:8080", "public_dir": "./public"}"#,
        )
        .unwrap();
        assert_eq!(conf.bind_address, "127.0.0.1:8080");
        assert_eq!(conf.public_dir, PathBuf::from("./public"));
        assert!(!conf.expose_errors);
        assert_eq!(conf.cache_capacity, 1024);
        assert_eq!(conf.shutdown_grace_ms, 5000);
        assert!(conf.extensions.is_empty());
    }

    #[test]
    fn config_parses_extension_entries_in_order() {
        let conf: FileConfig = serde_json::from_str(
            r#"{
                "bind_address": "0.0.0.0:80",
                "public_dir": "/srv/docs",
                "expose_errors": true,
                "extensions": [
                    { "tag": "request_id", "config": { "prefix": "a" } },
                    { "tag": "request_id" }
                ]
            }"#,
        )
        .unwrap();
        assert!(conf.expose_errors);
        assert_eq!(conf.extensions.len(), 2);
        assert_eq!(conf.extensions[0].tag, "request_id");
        assert!(conf.extensions[1].config.is_null());
    }

    #[test]
    fn config_rejects_missing_required_fields() {
        assert!(serde_json::from_str::<FileConfig>(r#"{"public_dir": "x"}"#).is_err());
    }
}
