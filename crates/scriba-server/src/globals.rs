//! The core script-visible global surface.
//!
//! Everything a script can see or touch enters through here: request
//! metadata, the output writer, the HTML escaper, status and abort controls,
//! and the GET/POST/HEADER/COOKIES namespaces. Each global is bound per
//! request onto a borrowed execution instance; the closures capture shared
//! cells from the [`RequestContext`], never the context itself.

use crate::request::{Cookie, RequestContext};
use scriba_engine::{BindError, ExecError, Instance, Value};
use std::collections::HashMap;

/// Every global the core binds. The cache declares these (plus extension
/// names) on each compile context before compiling anything.
pub const CORE_GLOBALS: &[&str] = &[
    "method",
    "full_uri",
    "path",
    "scheme",
    "host",
    "remote_addr",
    "proto",
    "doc_root",
    "write",
    "overwrite",
    "escape",
    "body",
    "status_code",
    "die",
    "GET",
    "POST",
    "HEADER",
    "COOKIES",
];

/// Bind the full core surface onto `instance`.
pub fn bind_core_globals(
    instance: &mut dyn Instance,
    ctx: &RequestContext,
    doc_root: &str,
) -> Result<(), BindError> {
    instance.bind_global("method", Value::from(ctx.method.as_str()))?;
    instance.bind_global("full_uri", Value::from(ctx.full_uri.as_str()))?;
    instance.bind_global("path", Value::from(ctx.path.as_str()))?;
    instance.bind_global("scheme", Value::from(ctx.scheme.as_str()))?;
    instance.bind_global("host", Value::from(ctx.host.as_str()))?;
    instance.bind_global("remote_addr", Value::from(ctx.remote_addr.as_str()))?;
    instance.bind_global("proto", Value::from(ctx.proto.as_str()))?;
    instance.bind_global("doc_root", Value::from(doc_root))?;

    let out = ctx.output_cell();
    instance.bind_global(
        "write",
        Value::native(move |args| {
            if args.is_empty() {
                return Err(ExecError::runtime("write expects at least one argument"));
            }
            let mut buf = out.lock().expect("output lock poisoned");
            for arg in args {
                buf.extend_from_slice(&arg.display_bytes());
            }
            Ok(Value::Null)
        }),
    )?;

    let out = ctx.output_cell();
    instance.bind_global(
        "overwrite",
        Value::native(move |args| {
            if args.is_empty() {
                return Err(ExecError::runtime(
                    "overwrite expects at least one argument",
                ));
            }
            let mut buf = out.lock().expect("output lock poisoned");
            buf.clear();
            for arg in args {
                buf.extend_from_slice(&arg.display_bytes());
            }
            Ok(Value::Null)
        }),
    )?;

    instance.bind_global(
        "escape",
        Value::native(|args| {
            if args.is_empty() {
                return Err(ExecError::runtime("escape expects at least one argument"));
            }
            let mut escaped = String::new();
            for arg in args {
                escaped.push_str(&escape_html(&arg.display_string()));
            }
            Ok(Value::Str(escaped))
        }),
    )?;

    let body = ctx.body_cell();
    instance.bind_global(
        "body",
        Value::native(move |args| {
            if !args.is_empty() {
                return Err(ExecError::runtime("body expects no arguments"));
            }
            let taken = body
                .lock()
                .expect("body lock poisoned")
                .take()
                .unwrap_or_default();
            Ok(Value::Bytes(taken))
        }),
    )?;

    let status = ctx.status_cell();
    instance.bind_global(
        "status_code",
        Value::native(move |args| match args {
            [Value::Int(code)] => {
                let code = u16::try_from(*code)
                    .ok()
                    .filter(|c| (100..=999).contains(c))
                    .ok_or_else(|| {
                        ExecError::runtime(format!("invalid status code {code}"))
                    })?;
                status.store(code, std::sync::atomic::Ordering::Relaxed);
                Ok(Value::Null)
            }
            [_] => Err(ExecError::runtime("status_code expects an int")),
            _ => Err(ExecError::runtime("status_code expects one argument")),
        }),
    )?;

    instance.bind_global("die", Value::native(|_| Err(ExecError::Aborted)))?;

    instance.bind_global("GET", pairs_namespace(ctx.query.clone()))?;
    instance.bind_global("POST", pairs_namespace(ctx.form.clone()))?;
    instance.bind_global("HEADER", header_namespace(ctx))?;
    instance.bind_global("COOKIES", cookies_namespace(ctx))?;

    Ok(())
}

/// HTML-escape the five characters Go's `html.EscapeString` escapes.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// A `keys()`/`param(name)` namespace over parsed key/value pairs.
fn pairs_namespace(pairs: Vec<(String, String)>) -> Value {
    let mut ns = HashMap::new();

    let for_keys = pairs.clone();
    ns.insert(
        "keys".to_string(),
        Value::native(move |args| {
            if !args.is_empty() {
                return Err(ExecError::runtime("keys expects no arguments"));
            }
            let mut seen = Vec::new();
            for (key, _) in &for_keys {
                if !seen.iter().any(|s: &Value| matches!(s, Value::Str(k) if k == key)) {
                    seen.push(Value::Str(key.clone()));
                }
            }
            Ok(Value::Array(seen))
        }),
    );

    ns.insert(
        "param".to_string(),
        Value::native(move |args| match args {
            [Value::Str(name)] => {
                let value = pairs
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| value.clone())
                    .unwrap_or_default();
                Ok(Value::Str(value))
            }
            _ => Err(ExecError::runtime("param expects one string argument")),
        }),
    );

    Value::Map(ns)
}

fn header_namespace(ctx: &RequestContext) -> Value {
    let mut ns = HashMap::new();

    let headers = ctx.headers.clone();
    ns.insert(
        "keys".to_string(),
        Value::native(move |args| {
            if !args.is_empty() {
                return Err(ExecError::runtime("keys expects no arguments"));
            }
            Ok(Value::Array(
                headers
                    .iter()
                    .map(|(name, _)| Value::Str(name.clone()))
                    .collect(),
            ))
        }),
    );

    let headers = ctx.headers.clone();
    ns.insert(
        "param".to_string(),
        Value::native(move |args| match args {
            [Value::Str(name)] => {
                let value = headers
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                Ok(Value::Str(value))
            }
            _ => Err(ExecError::runtime("param expects one string argument")),
        }),
    );

    let response_headers = ctx.response_header_cell();
    ns.insert(
        "set".to_string(),
        Value::native(move |args| match args {
            [Value::Str(name), value] => {
                response_headers
                    .lock()
                    .expect("response header lock poisoned")
                    .push((name.clone(), value.display_string()));
                Ok(Value::Null)
            }
            [_, _] => Err(ExecError::runtime("set expects a string header name")),
            _ => Err(ExecError::runtime("set expects two arguments")),
        }),
    );

    Value::Map(ns)
}

fn cookies_namespace(ctx: &RequestContext) -> Value {
    let mut ns = HashMap::new();

    let cookies = ctx.cookies.clone();
    ns.insert(
        "all".to_string(),
        Value::native(move |args| {
            if !args.is_empty() {
                return Err(ExecError::runtime("all expects no arguments"));
            }
            Ok(Value::Array(cookies.iter().map(cookie_to_value).collect()))
        }),
    );

    let cookies = ctx.cookies.clone();
    ns.insert(
        "param".to_string(),
        Value::native(move |args| match args {
            [Value::Str(name)] => Ok(cookies
                .iter()
                .find(|cookie| &cookie.name == name)
                .map(cookie_to_value)
                .unwrap_or(Value::Null)),
            _ => Err(ExecError::runtime("param expects one string argument")),
        }),
    );

    let response_headers = ctx.response_header_cell();
    ns.insert(
        "set".to_string(),
        Value::native(move |args| match args {
            [Value::Map(map)] => {
                let cookie = value_to_cookie(map)?;
                response_headers
                    .lock()
                    .expect("response header lock poisoned")
                    .push(("Set-Cookie".to_string(), cookie.to_set_cookie()));
                Ok(Value::Null)
            }
            [_] => Err(ExecError::runtime("set expects a cookie map")),
            _ => Err(ExecError::runtime("set expects one argument")),
        }),
    );

    Value::Map(ns)
}

fn cookie_to_value(cookie: &Cookie) -> Value {
    let mut map = HashMap::new();
    map.insert("name".to_string(), Value::Str(cookie.name.clone()));
    map.insert("value".to_string(), Value::Str(cookie.value.clone()));
    map.insert("path".to_string(), Value::Str(cookie.path.clone()));
    map.insert("domain".to_string(), Value::Str(cookie.domain.clone()));
    map.insert(
        "max_age".to_string(),
        cookie.max_age.map(Value::Int).unwrap_or(Value::Null),
    );
    map.insert(
        "expires".to_string(),
        cookie
            .expires
            .clone()
            .map(Value::Str)
            .unwrap_or(Value::Null),
    );
    Value::Map(map)
}

fn value_to_cookie(map: &HashMap<String, Value>) -> Result<Cookie, ExecError> {
    let field = |name: &str| -> Option<&Value> {
        map.get(name).filter(|v| !matches!(v, Value::Null))
    };

    let Some(Value::Str(name)) = field("name") else {
        return Err(ExecError::runtime("cookie map needs a string 'name'"));
    };

    let mut cookie = Cookie {
        name: name.clone(),
        ..Cookie::default()
    };
    if let Some(Value::Str(value)) = field("value") {
        cookie.value = value.clone();
    }
    if let Some(Value::Str(path)) = field("path") {
        cookie.path = path.clone();
    }
    if let Some(Value::Str(domain)) = field("domain") {
        cookie.domain = domain.clone();
    }
    if let Some(Value::Int(max_age)) = field("max_age") {
        cookie.max_age = Some(*max_age);
    }
    if let Some(Value::Str(expires)) = field("expires") {
        cookie.expires = Some(expires.clone());
    }
    Ok(cookie)
}
