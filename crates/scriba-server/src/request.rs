//! Per-request state.
//!
//! A [`RequestContext`] owns everything one request needs: the parsed request
//! facts, the mutable output buffer and status cell the script writes into,
//! and the response-header accumulator. The mutable cells are `Arc`-shared so
//! host closures bound onto an execution instance can reach them; nothing in
//! here is shared across requests.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use url::form_urlencoded;

/// One HTTP cookie, either parsed from a `Cookie` header or assembled by a
/// script for `Set-Cookie`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub domain: String,
    /// Lifetime in seconds.
    pub max_age: Option<i64>,
    /// Preformatted HTTP-date, passed through verbatim.
    pub expires: Option<String>,
}

impl Cookie {
    /// Parse a `Cookie` request header (`name=value; other=thing`).
    ///
    /// Malformed pairs are skipped; request cookies only carry name/value.
    pub fn parse_header(header: &str) -> Vec<Cookie> {
        header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some(Cookie {
                    name: name.to_string(),
                    value: value.trim().to_string(),
                    ..Cookie::default()
                })
            })
            .collect()
    }

    /// Render a `Set-Cookie` header value.
    pub fn to_set_cookie(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if !self.path.is_empty() {
            out.push_str("; Path=");
            out.push_str(&self.path);
        }
        if !self.domain.is_empty() {
            out.push_str("; Domain=");
            out.push_str(&self.domain);
        }
        if let Some(max_age) = self.max_age {
            out.push_str("; Max-Age=");
            out.push_str(&max_age.to_string());
        }
        if let Some(expires) = &self.expires {
            out.push_str("; Expires=");
            out.push_str(expires);
        }
        out
    }
}

/// Everything the pipeline knows about one request, plus the mutable
/// response state scripts and extensions write into.
pub struct RequestContext {
    pub method: String,
    pub full_uri: String,
    pub path: String,
    pub scheme: String,
    pub host: String,
    pub remote_addr: String,
    pub proto: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub cookies: Vec<Cookie>,

    body: Arc<Mutex<Option<Vec<u8>>>>,
    output: Arc<Mutex<Vec<u8>>>,
    status: Arc<AtomicU16>,
    response_headers: Arc<Mutex<Vec<(String, String)>>>,
}

impl RequestContext {
    /// Assemble a context from already-collected request parts.
    ///
    /// `output` is the request's output buffer (typically drawn from the
    /// process-wide buffer pool). Query, form and cookie maps are parsed
    /// here so the script-facing accessors are valid from the first bind.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        method: String,
        full_uri: String,
        path: String,
        scheme: String,
        host: String,
        remote_addr: String,
        proto: String,
        headers: Vec<(String, String)>,
        query_string: &str,
        body: Vec<u8>,
        output: Vec<u8>,
    ) -> Self {
        let query = parse_urlencoded(query_string.as_bytes());

        let content_type = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
            .unwrap_or("");
        let form = if content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .eq_ignore_ascii_case("application/x-www-form-urlencoded")
        {
            parse_urlencoded(&body)
        } else {
            Vec::new()
        };

        let cookies = headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("cookie"))
            .flat_map(|(_, value)| Cookie::parse_header(value))
            .collect();

        Self {
            method,
            full_uri,
            path,
            scheme,
            host,
            remote_addr,
            proto,
            headers,
            query,
            form,
            cookies,
            body: Arc::new(Mutex::new(Some(body))),
            output: Arc::new(Mutex::new(output)),
            status: Arc::new(AtomicU16::new(200)),
            response_headers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// First value for a request header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The response status set so far (defaults to 200).
    pub fn status(&self) -> u16 {
        self.status.load(Ordering::Relaxed)
    }

    /// Move the accumulated output out, leaving the buffer empty so it can
    /// go back to the pool.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut *self.output.lock().expect("output lock poisoned"))
    }

    /// Response headers accumulated by the script (`HEADER.set`,
    /// `COOKIES.set`).
    pub fn take_response_headers(&self) -> Vec<(String, String)> {
        std::mem::take(
            &mut *self
                .response_headers
                .lock()
                .expect("response header lock poisoned"),
        )
    }

    pub(crate) fn body_cell(&self) -> Arc<Mutex<Option<Vec<u8>>>> {
        Arc::clone(&self.body)
    }

    pub(crate) fn output_cell(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.output)
    }

    pub(crate) fn status_cell(&self) -> Arc<AtomicU16> {
        Arc::clone(&self.status)
    }

    pub(crate) fn response_header_cell(&self) -> Arc<Mutex<Vec<(String, String)>>> {
        Arc::clone(&self.response_headers)
    }
}

fn parse_urlencoded(input: &[u8]) -> Vec<(String, String)> {
    form_urlencoded::parse(input)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}
