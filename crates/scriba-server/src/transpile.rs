//! Template → script transpiler.
//!
//! A document is literal text interleaved with script regions delimited by
//! `<!?` and `?!>`. Literal runs become `write(b"...")` statements; script
//! runs are copied through verbatim. The output of this function is the byte
//! sequence that gets fingerprinted and compiled, so it must be a pure,
//! deterministic function of the input.

use crate::MalformedTemplate;

/// Opens a script region.
pub const OPEN_MARKER: &[u8] = b"<!?";
/// Closes a script region.
pub const CLOSE_MARKER: &[u8] = b"?!>";

/// Convert a marker-delimited document into pure script source.
///
/// A start marker with no matching end marker fails; nothing is returned in
/// that case, not even the output accumulated so far. An empty document
/// yields an empty, valid program.
pub fn transpile(document: &[u8]) -> Result<Vec<u8>, MalformedTemplate> {
    let mut out = Vec::with_capacity(document.len() + 64);
    let mut rest = document;
    let mut consumed = 0usize;

    loop {
        match find(rest, OPEN_MARKER) {
            None => {
                emit_literal(&mut out, rest);
                return Ok(out);
            }
            Some(open) => {
                emit_literal(&mut out, &rest[..open]);
                let script_start = open + OPEN_MARKER.len();
                let after = &rest[script_start..];
                let Some(close) = find(after, CLOSE_MARKER) else {
                    return Err(MalformedTemplate {
                        offset: consumed + open,
                    });
                };
                out.extend_from_slice(&after[..close]);
                // Terminate the region so adjacent statements stay separated.
                out.push(b'\n');
                let advanced = script_start + close + CLOSE_MARKER.len();
                rest = &rest[advanced..];
                consumed += advanced;
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Emit a literal run as a `write` statement over a bytes literal.
///
/// The escaping is byte-exact: every input byte sequence round-trips through
/// the emitted literal unchanged, including the script language's own quote
/// and escape characters.
fn emit_literal(out: &mut Vec<u8>, literal: &[u8]) {
    if literal.is_empty() {
        return;
    }
    out.extend_from_slice(b"write(b\"");
    for &byte in literal {
        match byte {
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            0x20..=0x7e => out.push(byte),
            _ => {
                out.extend_from_slice(format!("\\x{byte:02x}").as_bytes());
            }
        }
    }
    out.extend_from_slice(b"\");\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriba_engine::{ExecError, Interpreter, ScriptEngine, Value};
    use std::sync::{Arc, Mutex};

    /// Transpile, compile and run `document`, returning what it wrote.
    fn render(document: &[u8]) -> Vec<u8> {
        let source = transpile(document).unwrap();
        let engine = Interpreter::new();
        let mut compiler = engine.compiler();
        compiler.declare_global("write");
        let program = compiler.compile(&source).unwrap();

        let mut instance = program.new_instance();
        let out = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&out);
        instance
            .bind_global(
                "write",
                Value::native(move |args| {
                    let mut buf = sink.lock().unwrap();
                    for arg in args {
                        buf.extend_from_slice(&arg.display_bytes());
                    }
                    Ok(Value::Null)
                }),
            )
            .unwrap();
        instance.run().unwrap();
        let rendered = out.lock().unwrap().clone();
        rendered
    }

    #[test]
    fn empty_document_yields_empty_program() {
        assert_eq!(transpile(b"").unwrap(), b"");
    }

    #[test]
    fn literal_only_document() {
        let source = transpile(b"X").unwrap();
        assert_eq!(source, b"write(b\"X\");\n");
        assert_eq!(render(b"X"), b"X");
    }

    #[test]
    fn script_only_document() {
        let source = transpile(b"<!? write(\"hi\") ?!>").unwrap();
        assert_eq!(source, b" write(\"hi\") \n");
    }

    #[test]
    fn alternating_regions() {
        let doc = b"a<!? write(\"b\") ?!>c<!? write(\"d\") ?!>";
        assert_eq!(render(doc), b"abcd");
    }

    #[test]
    fn trailing_literal_after_last_region() {
        let doc = b"<!? write(\"x\") ?!>tail";
        assert_eq!(render(doc), b"xtail");
    }

    #[test]
    fn transpile_is_deterministic() {
        let doc = b"a<!? write(1) ?!>b";
        let first = transpile(doc).unwrap();
        for _ in 0..5 {
            assert_eq!(transpile(doc).unwrap(), first);
        }
    }

    #[test]
    fn unterminated_region_fails_without_output() {
        let err = transpile(b"before<!? write(1)").unwrap_err();
        assert_eq!(err.offset, 6);
    }

    #[test]
    fn unterminated_second_region_reports_its_offset() {
        let err = transpile(b"<!? a() ?!>xy<!?").unwrap_err();
        assert_eq!(err.offset, 13);
    }

    #[test]
    fn literal_quotes_and_escapes_round_trip() {
        let doc = br#"she said "hi\there" and left"#;
        assert_eq!(render(doc), doc.as_slice());
    }

    #[test]
    fn literal_with_every_byte_value_round_trips() {
        let mut doc: Vec<u8> = (0u8..=255).collect();
        // Keep the marker bytes from forming an actual marker sequence.
        doc.retain(|&b| b != b'<');
        assert_eq!(render(&doc), doc);
    }

    #[test]
    fn newlines_and_tabs_round_trip() {
        let doc = b"line one\n\tline two\r\n";
        assert_eq!(render(doc), doc.as_slice());
    }

    #[test]
    fn die_stops_template_mid_document() {
        let source = transpile(b"kept<!? die() ?!>dropped").unwrap();
        let engine = Interpreter::new();
        let mut compiler = engine.compiler();
        compiler.declare_global("write");
        compiler.declare_global("die");
        let program = compiler.compile(&source).unwrap();

        let mut instance = program.new_instance();
        let out = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&out);
        instance
            .bind_global(
                "write",
                Value::native(move |args| {
                    let mut buf = sink.lock().unwrap();
                    for arg in args {
                        buf.extend_from_slice(&arg.display_bytes());
                    }
                    Ok(Value::Null)
                }),
            )
            .unwrap();
        instance
            .bind_global("die", Value::native(|_| Err(ExecError::Aborted)))
            .unwrap();

        assert!(matches!(instance.run(), Err(ExecError::Aborted)));
        assert_eq!(&*out.lock().unwrap(), b"kept");
    }
}
