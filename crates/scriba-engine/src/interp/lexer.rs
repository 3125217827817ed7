//! Byte-level lexer.
//!
//! Statement separators are `;` and newline; a newline inside an open `(` or
//! `[` pair is plain whitespace so call arguments can wrap freely. String
//! literals must be valid UTF-8; bytes literals (`b"..."`) accept any byte via
//! `\xNN` escapes, which is what lets transpiled documents round-trip
//! arbitrary input exactly.

use crate::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    True,
    False,
    Null,
    If,
    Else,
    While,
    Declare, // :=
    Assign,  // =
    Eq,      // ==
    Ne,      // !=
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    /// `;` or a separator-position newline.
    Semi,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub line: u32,
}

pub fn lex(source: &[u8]) -> Result<Vec<Spanned>, CompileError> {
    Lexer {
        src: source,
        pos: 0,
        line: 1,
        bracket_depth: 0,
    }
    .run()
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    /// Open `(` and `[` pairs; newlines are not separators inside them.
    bracket_depth: u32,
}

impl<'a> Lexer<'a> {
    fn run(mut self) -> Result<Vec<Spanned>, CompileError> {
        let mut out = Vec::new();
        while let Some(&b) = self.src.get(self.pos) {
            match b {
                b' ' | b'\t' | b'\r' => {
                    self.pos += 1;
                }
                b'\n' => {
                    if self.bracket_depth == 0 {
                        out.push(self.spanned(Token::Semi));
                    }
                    self.pos += 1;
                    self.line += 1;
                }
                b'/' if self.peek(1) == Some(b'/') => {
                    while let Some(&c) = self.src.get(self.pos) {
                        if c == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                b';' => {
                    out.push(self.spanned(Token::Semi));
                    self.pos += 1;
                }
                b'"' => {
                    let tok = self.string_literal()?;
                    out.push(tok);
                }
                b'b' if self.peek(1) == Some(b'"') => {
                    self.pos += 1;
                    let line = self.line;
                    let bytes = self.quoted_bytes()?;
                    out.push(Spanned {
                        token: Token::Bytes(bytes),
                        line,
                    });
                }
                b'0'..=b'9' => {
                    let tok = self.number()?;
                    out.push(tok);
                }
                b'A'..=b'Z' | b'a'..=b'z' | b'_' => {
                    let tok = self.ident();
                    out.push(tok);
                }
                _ => {
                    let tok = self.operator()?;
                    out.push(tok);
                }
            }
        }
        Ok(out)
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.src.get(self.pos + ahead).copied()
    }

    fn spanned(&self, token: Token) -> Spanned {
        Spanned {
            token,
            line: self.line,
        }
    }

    fn operator(&mut self) -> Result<Spanned, CompileError> {
        let line = self.line;
        let b = self.src[self.pos];
        let (token, len) = match (b, self.peek(1)) {
            (b':', Some(b'=')) => (Token::Declare, 2),
            (b':', _) => (Token::Colon, 1),
            (b'=', Some(b'=')) => (Token::Eq, 2),
            (b'!', Some(b'=')) => (Token::Ne, 2),
            (b'<', Some(b'=')) => (Token::Le, 2),
            (b'>', Some(b'=')) => (Token::Ge, 2),
            (b'=', _) => (Token::Assign, 1),
            (b'<', _) => (Token::Lt, 1),
            (b'>', _) => (Token::Gt, 1),
            (b'!', _) => (Token::Bang, 1),
            (b'+', _) => (Token::Plus, 1),
            (b'-', _) => (Token::Minus, 1),
            (b'*', _) => (Token::Star, 1),
            (b'/', _) => (Token::Slash, 1),
            (b'%', _) => (Token::Percent, 1),
            (b'(', _) => {
                self.bracket_depth += 1;
                (Token::LParen, 1)
            }
            (b')', _) => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                (Token::RParen, 1)
            }
            (b'[', _) => {
                self.bracket_depth += 1;
                (Token::LBracket, 1)
            }
            (b']', _) => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                (Token::RBracket, 1)
            }
            (b'{', _) => (Token::LBrace, 1),
            (b'}', _) => (Token::RBrace, 1),
            (b',', _) => (Token::Comma, 1),
            (b'.', _) => (Token::Dot, 1),
            _ => {
                return Err(CompileError::new(
                    format!("unexpected byte 0x{b:02x}"),
                    line,
                ))
            }
        };
        self.pos += len;
        Ok(Spanned { token, line })
    }

    fn ident(&mut self) -> Spanned {
        let line = self.line;
        let start = self.pos;
        while let Some(&b) = self.src.get(self.pos) {
            if b.is_ascii_alphanumeric() || b == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        // Identifier bytes are ASCII by construction.
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let token = match text {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            "if" => Token::If,
            "else" => Token::Else,
            "while" => Token::While,
            _ => Token::Ident(text.to_string()),
        };
        Spanned { token, line }
    }

    fn number(&mut self) -> Result<Spanned, CompileError> {
        let line = self.line;
        let start = self.pos;
        while matches!(self.src.get(self.pos), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.src.get(self.pos) == Some(&b'.')
            && matches!(self.peek(1), Some(b'0'..=b'9'))
        {
            is_float = true;
            self.pos += 1;
            while matches!(self.src.get(self.pos), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let token = if is_float {
            Token::Float(
                text.parse()
                    .map_err(|_| CompileError::new(format!("bad float literal '{text}'"), line))?,
            )
        } else {
            Token::Int(
                text.parse()
                    .map_err(|_| CompileError::new(format!("bad int literal '{text}'"), line))?,
            )
        };
        Ok(Spanned { token, line })
    }

    fn string_literal(&mut self) -> Result<Spanned, CompileError> {
        let line = self.line;
        let bytes = self.quoted_bytes()?;
        let text = String::from_utf8(bytes)
            .map_err(|_| CompileError::new("string literal is not valid UTF-8", line))?;
        Ok(Spanned {
            token: Token::Str(text),
            line,
        })
    }

    /// Consume a `"..."` run starting at the opening quote, decoding escapes
    /// into raw bytes.
    fn quoted_bytes(&mut self) -> Result<Vec<u8>, CompileError> {
        let open_line = self.line;
        self.pos += 1; // opening quote
        let mut out = Vec::new();
        loop {
            let Some(&b) = self.src.get(self.pos) else {
                return Err(CompileError::new("unterminated string literal", open_line));
            };
            self.pos += 1;
            match b {
                b'"' => return Ok(out),
                b'\n' => {
                    return Err(CompileError::new(
                        "newline in string literal",
                        open_line,
                    ))
                }
                b'\\' => {
                    let Some(&esc) = self.src.get(self.pos) else {
                        return Err(CompileError::new("unterminated escape", self.line));
                    };
                    self.pos += 1;
                    match esc {
                        b'\\' => out.push(b'\\'),
                        b'"' => out.push(b'"'),
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'0' => out.push(0),
                        b'x' => {
                            let hi = self.hex_digit()?;
                            let lo = self.hex_digit()?;
                            out.push(hi * 16 + lo);
                        }
                        _ => {
                            return Err(CompileError::new(
                                format!("unknown escape '\\{}'", esc as char),
                                self.line,
                            ))
                        }
                    }
                }
                _ => out.push(b),
            }
        }
    }

    fn hex_digit(&mut self) -> Result<u8, CompileError> {
        let Some(&b) = self.src.get(self.pos) else {
            return Err(CompileError::new("truncated \\x escape", self.line));
        };
        self.pos += 1;
        match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'a'..=b'f' => Ok(b - b'a' + 10),
            b'A'..=b'F' => Ok(b - b'A' + 10),
            _ => Err(CompileError::new(
                format!("bad hex digit '{}' in \\x escape", b as char),
                self.line,
            )),
        }
    }
}
