//! Lexer for the query language.
//!
//! Walks the input one `char` at a time and yields tokens with byte spans.
//! Lexing stops at the first error; `tokenize` collects the whole stream and
//! appends an `Eof` token positioned at the end of the input.

use std::borrow::Cow;

use crate::error::QueryError;
use crate::token::{Span, Token, TokenKind};

pub struct Lexer<'a> {
    input: &'a str,
    /// Current byte offset into `input`.
    position: usize,
    failed: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input,
            position: 0,
            failed: false,
        }
    }

    /// Returns the character at the current position without consuming it.
    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    /// Returns the character after the current one without consuming anything.
    fn peek_next(&self) -> Option<char> {
        self.input[self.position..].chars().nth(1)
    }

    /// Consumes one character and returns it.
    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn token(&self, kind: TokenKind<'a>, start: usize) -> Token<'a> {
        Token {
            kind,
            span: Span::new(start, self.position),
        }
    }

    /// Reads digits with at most one decimal point. A `.` only belongs to the
    /// number when a digit follows it.
    fn read_number(&mut self, start: usize) -> Result<Token<'a>, QueryError> {
        self.eat_digits();
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            self.eat_digits();
        }

        let text = &self.input[start..self.position];
        let in_range = if text.contains('.') {
            text.parse::<f64>().is_ok_and(f64::is_finite)
        } else {
            text.parse::<i64>().is_ok()
        };
        if !in_range {
            return Err(QueryError::Lex {
                position: start,
                message: format!("number literal {text} is out of range"),
            });
        }
        Ok(self.token(TokenKind::Number(text), start))
    }

    fn eat_digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
    }

    /// Reads a double-quoted string. The opening quote has already been
    /// consumed; `start` points at it.
    fn read_string(&mut self, start: usize) -> Result<Token<'a>, QueryError> {
        let content_start = self.position;
        // Only allocate once an escape shows up.
        let mut owned: Option<String> = None;

        loop {
            let at = self.position;
            match self.bump() {
                None => {
                    return Err(QueryError::Lex {
                        position: start,
                        message: "unterminated string literal".to_string(),
                    })
                }
                Some('"') => {
                    let content = match owned {
                        Some(s) => Cow::Owned(s),
                        None => Cow::Borrowed(&self.input[content_start..at]),
                    };
                    return Ok(self.token(TokenKind::String(content), start));
                }
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some(c @ ('"' | '\\')) => c,
                        Some(other) => {
                            return Err(QueryError::Lex {
                                position: at,
                                message: format!("invalid escape sequence `\\{other}`"),
                            })
                        }
                        None => {
                            return Err(QueryError::Lex {
                                position: start,
                                message: "unterminated string literal".to_string(),
                            })
                        }
                    };
                    owned
                        .get_or_insert_with(|| self.input[content_start..at].to_string())
                        .push(escaped);
                }
                Some(c) => {
                    if let Some(s) = owned.as_mut() {
                        s.push(c);
                    }
                }
            }
        }
    }

    /// Reads an identifier or keyword. Identifiers are `[A-Za-z_][A-Za-z0-9_]*`.
    fn read_identifier(&mut self, start: usize) -> Token<'a> {
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.bump();
        }
        let literal = &self.input[start..self.position];
        self.token(match_keyword(literal), start)
    }

    fn next_token(&mut self) -> Option<Result<Token<'a>, QueryError>> {
        self.skip_whitespace();
        let start = self.position;
        let c = self.bump()?;

        let token = match c {
            '=' => self.token(TokenKind::Eq, start),
            '(' => self.token(TokenKind::LParen, start),
            ')' => self.token(TokenKind::RParen, start),
            '<' => {
                if self.peek() == Some('=') {
                    self.bump();
                    self.token(TokenKind::Lte, start)
                } else {
                    self.token(TokenKind::Lt, start)
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.bump();
                    self.token(TokenKind::Gte, start)
                } else {
                    self.token(TokenKind::Gt, start)
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    self.token(TokenKind::NotEq, start)
                } else {
                    return Some(Err(QueryError::Lex {
                        position: start,
                        message: "expected `=` after `!`".to_string(),
                    }));
                }
            }
            '"' => return Some(self.read_string(start)),
            c if c.is_ascii_digit() => return Some(self.read_number(start)),
            c if c.is_ascii_alphabetic() || c == '_' => self.read_identifier(start),
            other => {
                return Some(Err(QueryError::Lex {
                    position: start,
                    message: format!("unexpected character `{other}`"),
                }))
            }
        };
        Some(Ok(token))
    }
}

fn match_keyword(s: &str) -> TokenKind<'_> {
    if s.eq_ignore_ascii_case("and") {
        TokenKind::And
    } else if s.eq_ignore_ascii_case("or") {
        TokenKind::Or
    } else if s.eq_ignore_ascii_case("not") {
        TokenKind::Not
    } else {
        TokenKind::Identifier(s)
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token<'a>, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.next_token();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

/// Lexes the whole input, appending an `Eof` token at `input.len()`.
pub fn tokenize(input: &str) -> Result<Vec<Token<'_>>, QueryError> {
    let mut tokens = Lexer::new(input).collect::<Result<Vec<_>, _>>()?;
    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span::new(input.len(), input.len()),
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind<'_>> {
        Lexer::new(input).map(|t| t.unwrap().kind).collect()
    }

    #[test]
    fn test_simple_condition() {
        let input = r#"status = "failed""#;
        let mut lexer = Lexer::new(input);

        assert_eq!(lexer.next().unwrap().unwrap().kind, TokenKind::Identifier("status"));
        assert_eq!(lexer.next().unwrap().unwrap().kind, TokenKind::Eq);
        assert_eq!(
            lexer.next().unwrap().unwrap().kind,
            TokenKind::String(Cow::Borrowed("failed"))
        );
        assert!(lexer.next().is_none());
    }

    #[test]
    fn test_all_operators_and_punctuation() {
        assert_eq!(
            kinds("!= = > < >= <= ( )"),
            vec![
                TokenKind::NotEq,
                TokenKind::Eq,
                TokenKind::Gt,
                TokenKind::Lt,
                TokenKind::Gte,
                TokenKind::Lte,
                TokenKind::LParen,
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn test_keywords_are_case_insensitive_identifiers_are_not() {
        assert_eq!(
            kinds("AND or nOt Status status _tmp1"),
            vec![
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Not,
                TokenKind::Identifier("Status"),
                TokenKind::Identifier("status"),
                TokenKind::Identifier("_tmp1"),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("42 3.14 7"),
            vec![
                TokenKind::Number("42"),
                TokenKind::Number("3.14"),
                TokenKind::Number("7"),
            ]
        );
    }

    #[test]
    fn test_second_decimal_point_is_rejected() {
        let err = tokenize("1.2.3").unwrap_err();
        assert_eq!(err.position(), Some(3));
    }

    #[test]
    fn test_integer_overflow_is_rejected() {
        let err = tokenize("x = 99999999999999999999").unwrap_err();
        assert_eq!(err.position(), Some(4));
    }

    #[test]
    fn test_float_overflow_is_rejected() {
        let huge = format!("duration > {}.5", "9".repeat(400));
        let err = tokenize(&huge).unwrap_err();
        assert!(matches!(err, QueryError::Lex { position: 11, .. }));

        let largest = format!("duration > {:.1}", f64::MAX);
        assert!(tokenize(&largest).is_ok());
    }

    #[test]
    fn test_spans_are_byte_offsets() {
        let tokens = tokenize(r#"name != "é" AND x<=1"#).unwrap();
        let spans: Vec<_> = tokens.iter().map(|t| (t.span.start, t.span.end)).collect();
        assert_eq!(
            spans,
            vec![(0, 4), (5, 7), (8, 12), (13, 16), (17, 18), (18, 20), (20, 21), (21, 21)]
        );
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn test_string_escapes() {
        let tokens = tokenize(r#""say \"hi\" \\ there""#).unwrap();
        assert_eq!(
            tokens[0].kind,
            TokenKind::String(Cow::Owned(r#"say "hi" \ there"#.to_string()))
        );
    }

    #[test]
    fn test_invalid_escape_points_at_backslash() {
        let err = tokenize(r#"name = "a\nb""#).unwrap_err();
        assert_eq!(err.position(), Some(9));
    }

    #[test]
    fn test_unterminated_string_points_at_opening_quote() {
        let err = tokenize(r#"name = "abc"#).unwrap_err();
        assert!(matches!(err, QueryError::Lex { position: 7, .. }));
    }

    #[test]
    fn test_unknown_character() {
        let err = tokenize("name = 'abc'").unwrap_err();
        assert_eq!(err.position(), Some(7));

        let err = tokenize("a ! b").unwrap_err();
        assert_eq!(err.position(), Some(2));
    }

    #[test]
    fn test_lexer_stops_after_error() {
        let mut lexer = Lexer::new("a # b");
        assert!(lexer.next().unwrap().is_ok());
        assert!(lexer.next().unwrap().is_err());
        assert!(lexer.next().is_none());
    }

    #[test]
    fn test_empty_input_is_just_eof() {
        let tokens = tokenize("   ").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].span, Span::new(3, 3));
    }
}
