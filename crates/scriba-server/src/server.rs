//! HTTP serving and the per-request pipeline.
//!
//! One catch-all route. Each request moves through: path resolve → static or
//! script branch → transpile → cache acquire → bind core globals → extension
//! hooks → execute → respond. From the moment an instance is acquired it is
//! held by a drop-guard lease, so it returns to its pool on every exit path.
//!
//! The accept loop follows the usual hyper http1 shape: one tokio task per
//! connection, `service_fn` per request. Shutdown stops accepting, waits up
//! to a bounded grace period for in-flight connections, then runs every
//! extension's shutdown hook, collecting failures without halting.

use crate::buffer::BufferPool;
use crate::cache::ProgramCache;
use crate::error::{Error, Result};
use crate::extension::Extension;
use crate::globals::{self, CORE_GLOBALS};
use crate::request::RequestContext;
use crate::transpile;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, Version};
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use scriba_engine::{ExecError, ScriptEngine};
use std::convert::Infallible;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// File extension of script documents; extensionless request paths default
/// to it.
pub const SCRIPT_EXT: &str = "scriba";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory tree the documents are served from.
    pub public_dir: PathBuf,
    /// Expose literal error text in responses instead of generic messages.
    /// One flag for the whole deployment, never a mix.
    pub expose_errors: bool,
    /// Maximum number of cached compiled programs.
    pub cache_capacity: usize,
    /// How long shutdown waits for in-flight connections.
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    pub fn new(public_dir: impl Into<PathBuf>) -> Self {
        Self {
            public_dir: public_dir.into(),
            expose_errors: false,
            cache_capacity: 1024,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// A configured but not yet running server.
pub struct Server {
    conf: ServerConfig,
    engine: Arc<dyn ScriptEngine>,
    extensions: Vec<Arc<dyn Extension>>,
}

impl Server {
    pub fn new(conf: ServerConfig, engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            conf,
            engine,
            extensions: Vec::new(),
        }
    }

    /// Register an extension. Hooks run in registration order.
    pub fn add_extension(&mut self, extension: Arc<dyn Extension>) {
        self.extensions.push(extension);
    }

    /// Initialize extensions, build the program cache, bind the listener and
    /// start serving.
    pub async fn start(self, addr: SocketAddr) -> Result<ServerHandle> {
        for extension in &self.extensions {
            extension
                .init()
                .map_err(|source| Error::ExtensionInit {
                    name: extension.name().to_string(),
                    source,
                })?;
            tracing::info!(extension = extension.name(), "extension initialized");
        }

        // The complete global-name set is fixed here, before the first
        // compilation: core names plus every extension's declared names.
        // Collisions are first-registered-wins.
        let mut declared: Vec<String> = CORE_GLOBALS.iter().map(|s| s.to_string()).collect();
        for extension in &self.extensions {
            for name in extension.declared_globals() {
                if declared.contains(&name) {
                    tracing::warn!(
                        extension = extension.name(),
                        global = %name,
                        "global name already declared; first registration wins"
                    );
                } else {
                    declared.push(name);
                }
            }
        }

        let cache = ProgramCache::new(
            Arc::clone(&self.engine),
            declared,
            self.conf.cache_capacity,
        );

        let grace = self.conf.shutdown_grace;
        let pipeline = Arc::new(Pipeline {
            conf: self.conf,
            cache,
            extensions: self.extensions.clone(),
            buffers: BufferPool::new(),
        });

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("listening on {local_addr}");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&pipeline),
            shutdown_rx,
            grace,
        ));

        Ok(ServerHandle {
            local_addr,
            shutdown_tx,
            accept_task,
            extensions: self.extensions,
        })
    }
}

/// A running server. Dropping the handle without calling
/// [`ServerHandle::shutdown`] leaves the accept loop running detached.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: tokio::task::JoinHandle<()>,
    extensions: Vec<Arc<dyn Extension>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, drain in-flight connections up to the grace period,
    /// then shut every extension down. Extension failures are logged and
    /// counted, never fatal.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.accept_task.await {
            tracing::error!("accept loop ended abnormally: {err}");
        }

        let mut failures = 0usize;
        for extension in &self.extensions {
            if let Err(err) = extension.shutdown() {
                failures += 1;
                tracing::error!(
                    extension = extension.name(),
                    "extension shutdown failed: {err:#}"
                );
            }
        }
        if failures > 0 {
            tracing::warn!("{failures} extension(s) failed to shut down cleanly");
        }
        tracing::info!("server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    pipeline: Arc<Pipeline>,
    mut shutdown_rx: watch::Receiver<bool>,
    grace: Duration,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            // Reap finished connection tasks so the set doesn't grow forever.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::error!("failed to accept connection: {err}");
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let pipeline = Arc::clone(&pipeline);
                connections.spawn(async move {
                    let conn_pipeline = Arc::clone(&pipeline);
                    let service = service_fn(move |req| {
                        let pipeline = Arc::clone(&conn_pipeline);
                        async move {
                            Ok::<_, Infallible>(pipeline.handle(req, remote).await)
                        }
                    });
                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        tracing::debug!("connection closed with error: {err}");
                    }
                });
            }
        }
    }

    tracing::info!("draining in-flight connections");
    let drain = async {
        while connections.join_next().await.is_some() {}
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        tracing::warn!("grace period elapsed; aborting remaining connections");
        connections.shutdown().await;
    }
}

struct Pipeline {
    conf: ServerConfig,
    cache: ProgramCache,
    extensions: Vec<Arc<dyn Extension>>,
    buffers: BufferPool,
}

impl Pipeline {
    async fn handle(&self, req: Request<Incoming>, remote: SocketAddr) -> Response<Full<Bytes>> {
        match self.serve(req, remote).await {
            Ok(response) => response,
            Err(err) => self.error_response(&err),
        }
    }

    async fn serve(
        &self,
        req: Request<Incoming>,
        remote: SocketAddr,
    ) -> Result<Response<Full<Bytes>>> {
        let resolved = match resolve_path(&self.conf.public_dir, req.uri().path()) {
            Ok(resolved) => resolved,
            Err(PathRejected) => {
                tracing::debug!(path = req.uri().path(), "rejected traversal path");
                return Ok(plain_response(StatusCode::BAD_REQUEST, "invalid path"));
            }
        };

        if !resolved.is_script {
            let bytes = tokio::fs::read(&resolved.full_path).await?;
            return Ok(Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::from(bytes)))
                .expect("static response"));
        }

        let method = req.method().to_string();
        let full_uri = req.uri().to_string();
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or("").to_string();
        let scheme = req.uri().scheme_str().unwrap_or("").to_string();
        let host = req
            .uri()
            .host()
            .map(str::to_string)
            .or_else(|| {
                req.headers()
                    .get(hyper::header::HOST)
                    .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            })
            .unwrap_or_default();
        let proto = proto_string(req.version()).to_string();
        let headers: Vec<(String, String)> = req
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let document = tokio::fs::read(&resolved.full_path).await?;
        let source = transpile::transpile(&document)?;

        let body = req
            .into_body()
            .collect()
            .await
            .map_err(|err| std::io::Error::new(ErrorKind::Other, err))?
            .to_bytes();

        let ctx = RequestContext::new(
            method,
            full_uri,
            path,
            scheme,
            host,
            remote.to_string(),
            proto,
            headers,
            &query,
            body.to_vec(),
            self.buffers.get(),
        );

        // Scoped borrow: the lease returns the instance to its pool when it
        // drops, on every path out of this function.
        let mut lease = self.cache.acquire(&source)?;

        let doc_root = self.conf.public_dir.to_string_lossy();
        globals::bind_core_globals(&mut *lease, &ctx, &doc_root)?;

        for extension in &self.extensions {
            extension
                .hook(&mut *lease, &ctx)
                .map_err(|source| Error::ExtensionHook {
                    name: extension.name().to_string(),
                    source,
                })?;
        }

        match lease.run() {
            // A raised abort is a deliberate short-circuit: respond with
            // whatever status and output the script accumulated.
            Ok(()) | Err(ExecError::Aborted) => {}
            Err(ExecError::Runtime(message)) => return Err(Error::Execution(message)),
        }

        Ok(self.respond(&ctx))
    }

    fn respond(&self, ctx: &RequestContext) -> Response<Full<Bytes>> {
        let output = ctx.take_output();
        let body = Bytes::copy_from_slice(&output);
        self.buffers.put(output);

        let mut builder = Response::builder().status(ctx.status());
        for (name, value) in ctx.take_response_headers() {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(name), Ok(value)) => {
                    builder = builder.header(name, value);
                }
                _ => tracing::warn!(header = %name, "skipping invalid response header"),
            }
        }

        builder.body(Full::new(body)).unwrap_or_else(|err| {
            tracing::error!("failed to build response: {err}");
            plain_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        })
    }

    fn error_response(&self, err: &Error) -> Response<Full<Bytes>> {
        let status = match err {
            Error::MalformedTemplate(_) => StatusCode::BAD_REQUEST,
            Error::Io(io) if io.kind() == ErrorKind::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::NOT_FOUND {
            tracing::debug!("request failed: {err}");
        } else {
            tracing::error!("request failed: {err}");
        }

        let message = if self.conf.expose_errors {
            err.to_string()
        } else {
            match status {
                StatusCode::BAD_REQUEST => "bad request".to_string(),
                StatusCode::NOT_FOUND => "not found".to_string(),
                _ => "internal server error".to_string(),
            }
        };
        plain_response(status, &message)
    }
}

fn plain_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::copy_from_slice(message.as_bytes())))
        .expect("plain response")
}

fn proto_string(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/?",
    }
}

struct Resolved {
    full_path: PathBuf,
    is_script: bool,
}

struct PathRejected;

/// Resolve a request path against the document root.
///
/// The path is percent-decoded first, then rejected if any segment is a
/// parent-directory reference; nothing is opened before this check.
/// Extensionless paths default to the script-document extension, and the
/// bare root maps to `index.scriba`.
fn resolve_path(public_dir: &Path, raw_path: &str) -> std::result::Result<Resolved, PathRejected> {
    let decoded = percent_decode_str(raw_path).decode_utf8_lossy();
    if decoded
        .split(['/', '\\'])
        .any(|segment| segment == "..")
    {
        return Err(PathRejected);
    }

    let mut rel = decoded.trim_start_matches('/').to_string();
    if rel.is_empty() {
        rel = "index".to_string();
    }
    if Path::new(&rel).extension().is_none() {
        rel.push('.');
        rel.push_str(SCRIPT_EXT);
    }

    let is_script = Path::new(&rel)
        .extension()
        .is_some_and(|ext| ext == SCRIPT_EXT);

    Ok(Resolved {
        full_path: public_dir.join(&rel),
        is_script,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(raw: &str) -> std::result::Result<(PathBuf, bool), ()> {
        resolve_path(Path::new("/srv/docs"), raw)
            .map(|r| (r.full_path, r.is_script))
            .map_err(|_| ())
    }

    #[test]
    fn plain_paths_resolve_under_the_document_root() {
        let (path, is_script) = resolve("/about.scriba").unwrap();
        assert_eq!(path, Path::new("/srv/docs/about.scriba"));
        assert!(is_script);
    }

    #[test]
    fn extensionless_paths_default_to_the_script_extension() {
        let (path, is_script) = resolve("/about").unwrap();
        assert_eq!(path, Path::new("/srv/docs/about.scriba"));
        assert!(is_script);
    }

    #[test]
    fn root_maps_to_index() {
        let (path, is_script) = resolve("/").unwrap();
        assert_eq!(path, Path::new("/srv/docs/index.scriba"));
        assert!(is_script);
    }

    #[test]
    fn other_extensions_are_static() {
        let (path, is_script) = resolve("/logo.png").unwrap();
        assert_eq!(path, Path::new("/srv/docs/logo.png"));
        assert!(!is_script);
    }

    #[test]
    fn traversal_is_rejected() {
        assert!(resolve("/../etc/passwd").is_err());
        assert!(resolve("/a/../../b").is_err());
        assert!(resolve("/..").is_err());
        assert!(resolve("/a/..\\b").is_err());
    }

    #[test]
    fn encoded_traversal_is_rejected() {
        assert!(resolve("/%2e%2e/secret").is_err());
        assert!(resolve("/a/%2E%2E/b").is_err());
    }

    #[test]
    fn dotted_names_are_not_traversal() {
        let (path, _) = resolve("/files/notes..txt").unwrap();
        assert_eq!(path, Path::new("/srv/docs/files/notes..txt"));
        let (path, _) = resolve("/.well-known/thing.txt").unwrap();
        assert_eq!(path, Path::new("/srv/docs/.well-known/thing.txt"));
    }
}
