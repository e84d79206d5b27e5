//! Lexing of filter expressions
//!
//! A cursor over the expression string yielding one raw token at a time.
//! Value lexemes (numbers, quoted strings, field references) are returned
//! as string slices and bound to the schema later; operators are resolved
//! immediately. Rule order matters and is part of the language: numeric
//! literals win over identifiers only when their terminator is not
//! alphanumeric, and the `%MAX(`/`%MIN(`/`%AVG(` openings consume the
//! function name but leave the parenthesis for the next call.

use crate::errors::ParseError;

use super::token::{FuncKind, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum RawToken<'a> {
    Value(&'a str),
    Func(FuncKind),
    Op(TokenKind),
}

pub(crate) struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

const FUNC_NAMES: [(&str, FuncKind); 3] = [
    ("%MAX(", FuncKind::Max),
    ("%MIN(", FuncKind::Min),
    ("%AVG(", FuncKind::Avg),
];

// characters that end an identifier run
fn is_ident_break(b: u8) -> bool {
    b.is_ascii_whitespace()
        || matches!(
            b,
            b'"' | b'\''
                | b'<'
                | b'>'
                | b'='
                | b'!'
                | b'&'
                | b'|'
                | b'('
                | b')'
                | b'+'
                | b'-'
                | b'*'
                | b'/'
        )
}

/// Length of a leading floating-point literal, accepted only when the
/// terminator is end-of-input or a non-alphanumeric byte.
fn float_lexeme(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut end = 0;
    let mut has_digits = false;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
        has_digits = true;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
            has_digits = true;
        }
    }
    if !has_digits {
        return None;
    }
    // exponent, only when digits follow
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        let digits_at = exp;
        while exp < bytes.len() && bytes[exp].is_ascii_digit() {
            exp += 1;
        }
        if exp > digits_at {
            end = exp;
        }
    }
    match bytes.get(end) {
        None => Some(end),
        Some(b) if !b.is_ascii_alphanumeric() => Some(end),
        _ => None,
    }
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    pub(crate) fn next_token(&mut self) -> Result<Option<RawToken<'a>>, ParseError> {
        let rest = &self.src[self.pos..];
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
        let rest = trimmed;
        if rest.is_empty() {
            return Ok(None);
        }
        let bytes = rest.as_bytes();

        if bytes[0].is_ascii_digit() || bytes[0] == b'.' {
            if let Some(len) = float_lexeme(rest) {
                self.pos += len;
                return Ok(Some(RawToken::Value(&rest[..len])));
            }
        }

        for (name, func) in FUNC_NAMES {
            if rest.starts_with(name) {
                // leave the parenthesis in place
                self.pos += name.len() - 1;
                return Ok(Some(RawToken::Func(func)));
            }
        }

        // identifier run; a namespace prefix is part of the lexeme but
        // its '/' must not end the scan
        let skip = ["INFO/", "FORMAT/", "FMT/"]
            .iter()
            .find(|p| rest.starts_with(*p))
            .map_or(0, |p| p.len());
        let mut end = skip;
        while end < bytes.len() && !is_ident_break(bytes[end]) {
            end += 1;
        }
        if end > 0 {
            self.pos += end;
            return Ok(Some(RawToken::Value(&rest[..end])));
        }

        if bytes[0] == b'"' || bytes[0] == b'\'' {
            let quote = bytes[0] as char;
            return match rest[1..].find(quote) {
                Some(n) => {
                    let len = n + 2;
                    self.pos += len;
                    Ok(Some(RawToken::Value(&rest[..len])))
                }
                None => Err(ParseError::UnterminatedString {
                    expression: self.src.to_string(),
                }),
            };
        }

        let (kind, len) = if rest.starts_with("!=") {
            (TokenKind::Ne, 2)
        } else if rest.starts_with("<=") {
            (TokenKind::Le, 2)
        } else if rest.starts_with('<') {
            (TokenKind::Lt, 1)
        } else if rest.starts_with(">=") {
            (TokenKind::Ge, 2)
        } else if rest.starts_with('>') {
            (TokenKind::Gt, 1)
        } else if rest.starts_with("==") {
            (TokenKind::Eq, 2)
        } else if rest.starts_with('=') {
            // single '=' is accepted as equality
            (TokenKind::Eq, 1)
        } else if rest.starts_with('(') {
            (TokenKind::LeftParen, 1)
        } else if rest.starts_with(')') {
            (TokenKind::RightParen, 1)
        } else if rest.starts_with("&&") {
            (TokenKind::AndVec, 2)
        } else if rest.starts_with("||") {
            (TokenKind::OrVec, 2)
        } else if rest.starts_with('&') {
            (TokenKind::And, 1)
        } else if rest.starts_with('|') {
            (TokenKind::Or, 1)
        } else if rest.starts_with('+') {
            (TokenKind::Add, 1)
        } else if rest.starts_with('-') {
            (TokenKind::Sub, 1)
        } else if rest.starts_with('*') {
            (TokenKind::Mult, 1)
        } else if rest.starts_with('/') {
            (TokenKind::Div, 1)
        } else {
            // leftover run; the binder rejects it if it means nothing
            let mut end = 0;
            while end < bytes.len() {
                let b = bytes[end];
                if b.is_ascii_whitespace()
                    || matches!(
                        b,
                        b'<' | b'>' | b'=' | b'&' | b'|' | b'(' | b')' | b'+' | b'-' | b'*' | b'/'
                    )
                {
                    break;
                }
                end += 1;
            }
            self.pos += end;
            return Ok(Some(RawToken::Value(&rest[..end])));
        };
        self.pos += len;
        Ok(Some(RawToken::Op(kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<RawToken<'_>> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        while let Some(tok) = lexer.next_token().unwrap() {
            out.push(tok);
        }
        out
    }

    #[test]
    fn test_lex_comparison() {
        assert_eq!(
            lex("DP>10"),
            vec![
                RawToken::Value("DP"),
                RawToken::Op(TokenKind::Gt),
                RawToken::Value("10"),
            ]
        );
    }

    #[test]
    fn test_lex_two_char_operators() {
        assert_eq!(
            lex("a<=b >=c ==d !=e &&f ||g"),
            vec![
                RawToken::Value("a"),
                RawToken::Op(TokenKind::Le),
                RawToken::Value("b"),
                RawToken::Op(TokenKind::Ge),
                RawToken::Value("c"),
                RawToken::Op(TokenKind::Eq),
                RawToken::Value("d"),
                RawToken::Op(TokenKind::Ne),
                RawToken::Value("e"),
                RawToken::Op(TokenKind::AndVec),
                RawToken::Value("f"),
                RawToken::Op(TokenKind::OrVec),
                RawToken::Value("g"),
            ]
        );
    }

    #[test]
    fn test_single_equals_is_equality() {
        assert_eq!(
            lex("A=B"),
            vec![
                RawToken::Value("A"),
                RawToken::Op(TokenKind::Eq),
                RawToken::Value("B"),
            ]
        );
    }

    #[test]
    fn test_lex_numbers() {
        assert_eq!(lex("1.5e-3"), vec![RawToken::Value("1.5e-3")]);
        assert_eq!(lex(".5"), vec![RawToken::Value(".5")]);
        // an alphanumeric terminator demotes the literal to an identifier
        assert_eq!(lex("10x"), vec![RawToken::Value("10x")]);
        assert_eq!(lex("1e"), vec![RawToken::Value("1e")]);
    }

    #[test]
    fn test_lex_function_leaves_paren() {
        assert_eq!(
            lex("%MAX(DV)"),
            vec![
                RawToken::Func(FuncKind::Max),
                RawToken::Op(TokenKind::LeftParen),
                RawToken::Value("DV"),
                RawToken::Op(TokenKind::RightParen),
            ]
        );
    }

    #[test]
    fn test_lex_prefixed_identifiers() {
        assert_eq!(lex("INFO/DP"), vec![RawToken::Value("INFO/DP")]);
        assert_eq!(lex("FORMAT/GQ"), vec![RawToken::Value("FORMAT/GQ")]);
        assert_eq!(
            lex("FMT/DV>5"),
            vec![
                RawToken::Value("FMT/DV"),
                RawToken::Op(TokenKind::Gt),
                RawToken::Value("5"),
            ]
        );
    }

    #[test]
    fn test_lex_subscript_stays_in_lexeme() {
        assert_eq!(
            lex("DP4[0]+DP4[1]"),
            vec![
                RawToken::Value("DP4[0]"),
                RawToken::Op(TokenKind::Add),
                RawToken::Value("DP4[1]"),
            ]
        );
    }

    #[test]
    fn test_lex_quoted_strings() {
        assert_eq!(lex("\"PASS\""), vec![RawToken::Value("\"PASS\"")]);
        assert_eq!(lex("'q 10'"), vec![RawToken::Value("'q 10'")]);
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        let mut lexer = Lexer::new("%FILTER=\"PASS");
        lexer.next_token().unwrap();
        lexer.next_token().unwrap();
        assert!(matches!(
            lexer.next_token(),
            Err(ParseError::UnterminatedString { .. })
        ));
    }

    #[test]
    fn test_single_char_logicals() {
        assert_eq!(
            lex("a|b&c"),
            vec![
                RawToken::Value("a"),
                RawToken::Op(TokenKind::Or),
                RawToken::Value("b"),
                RawToken::Op(TokenKind::And),
                RawToken::Value("c"),
            ]
        );
    }
}
