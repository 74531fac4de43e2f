//! Michelson text parser producing Micheline
//!
//! Handles literals, sequences, parenthesised applications, annotations and
//! both comment styles. Macros are not expanded; they surface as unknown
//! primitives when the result is encoded.

use super::micheline::{sort_script_sections, Micheline};
use super::EncodingError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LBrace,
    RBrace,
    LParen,
    RParen,
    Semi,
    Int(String),
    Str(String),
    Bytes(String),
    Ident(String),
    Annot(String),
}

fn parse_error(offset: usize, reason: impl Into<String>) -> EncodingError {
    EncodingError::Parse {
        offset,
        reason: reason.into(),
    }
}

fn tokenize(text: &str) -> Result<Vec<(Token, usize)>, EncodingError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        let start = pos;
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => pos += 1,
            b'#' => {
                while pos < bytes.len() && bytes[pos] != b'\n' {
                    pos += 1;
                }
            }
            b'/' if bytes.get(pos + 1) == Some(&b'*') => {
                let end = text[pos + 2..]
                    .find("*/")
                    .ok_or_else(|| parse_error(start, "unterminated comment"))?;
                pos += 2 + end + 2;
            }
            b'{' | b'}' | b'(' | b')' | b';' => {
                let token = match c {
                    b'{' => Token::LBrace,
                    b'}' => Token::RBrace,
                    b'(' => Token::LParen,
                    b')' => Token::RParen,
                    _ => Token::Semi,
                };
                tokens.push((token, start));
                pos += 1;
            }
            b'"' => {
                pos += 1;
                let mut value = String::new();
                loop {
                    let ch = text[pos..]
                        .chars()
                        .next()
                        .ok_or_else(|| parse_error(start, "unterminated string"))?;
                    pos += ch.len_utf8();
                    match ch {
                        '"' => break,
                        '\n' => return Err(parse_error(pos, "newline in string literal")),
                        '\\' => {
                            let escaped = text[pos..]
                                .chars()
                                .next()
                                .ok_or_else(|| parse_error(start, "unterminated string"))?;
                            pos += escaped.len_utf8();
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                'b' => '\u{8}',
                                '"' => '"',
                                '\\' => '\\',
                                other => {
                                    return Err(parse_error(pos, format!("unknown escape \\{}", other)))
                                }
                            });
                        }
                        other => value.push(other),
                    }
                }
                tokens.push((Token::Str(value), start));
            }
            b'0' if bytes.get(pos + 1) == Some(&b'x') => {
                pos += 2;
                while pos < bytes.len() && bytes[pos].is_ascii_hexdigit() {
                    pos += 1;
                }
                let digits = &text[start + 2..pos];
                if digits.len() % 2 != 0 {
                    return Err(parse_error(start, "odd number of hex digits"));
                }
                tokens.push((Token::Bytes(digits.to_ascii_lowercase()), start));
            }
            b'-' | b'0'..=b'9' => {
                pos += 1;
                while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                    pos += 1;
                }
                let literal = &text[start..pos];
                if literal == "-" {
                    return Err(parse_error(start, "expected digits after '-'"));
                }
                tokens.push((Token::Int(literal.to_string()), start));
            }
            b'@' | b'%' | b':' => {
                pos += 1;
                while pos < bytes.len()
                    && (bytes[pos].is_ascii_alphanumeric() || matches!(bytes[pos], b'_' | b'.' | b'%' | b'@'))
                {
                    pos += 1;
                }
                tokens.push((Token::Annot(text[start..pos].to_string()), start));
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
                    pos += 1;
                }
                tokens.push((Token::Ident(text[start..pos].to_string()), start));
            }
            _ => {
                let ch = text[pos..].chars().next().unwrap_or('?');
                return Err(parse_error(start, format!("unexpected character '{}'", ch)));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn new(text: &str) -> Result<Self, EncodingError> {
        Ok(Self {
            tokens: tokenize(text)?,
            pos: 0,
            end: text.len(),
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, o)| *o).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), EncodingError> {
        let offset = self.offset();
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(parse_error(offset, format!("expected {:?}, found {:?}", expected, t))),
            None => Err(parse_error(offset, format!("expected {:?}, found end of input", expected))),
        }
    }

    fn annotations(&mut self) -> Vec<String> {
        let mut annots = Vec::new();
        while let Some(Token::Annot(a)) = self.peek() {
            annots.push(a.clone());
            self.pos += 1;
        }
        annots
    }

    /// Expression in a position where a primitive may take arguments
    fn expression(&mut self) -> Result<Micheline, EncodingError> {
        if let Some(Token::Ident(name)) = self.peek() {
            let prim = name.clone();
            self.pos += 1;
            let annots = self.annotations();
            let mut args = Vec::new();
            while matches!(
                self.peek(),
                Some(Token::Int(_) | Token::Str(_) | Token::Bytes(_) | Token::Ident(_) | Token::LBrace | Token::LParen)
            ) {
                args.push(self.term()?);
            }
            return Ok(Micheline::Prim { prim, args, annots });
        }
        self.term()
    }

    /// Argument position: literals, sequences, bare primitives or a parenthesised expression
    fn term(&mut self) -> Result<Micheline, EncodingError> {
        let offset = self.offset();
        match self.next() {
            Some(Token::Int(int)) => Ok(Micheline::Int { int }),
            Some(Token::Str(string)) => Ok(Micheline::String { string }),
            Some(Token::Bytes(bytes)) => Ok(Micheline::Bytes { bytes }),
            Some(Token::Ident(prim)) => {
                let annots = self.annotations();
                Ok(Micheline::Prim {
                    prim,
                    args: Vec::new(),
                    annots,
                })
            }
            Some(Token::LBrace) => {
                let items = self.sequence_body(true)?;
                self.expect(Token::RBrace)?;
                Ok(Micheline::Seq(items))
            }
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(t) => Err(parse_error(offset, format!("unexpected {:?}", t))),
            None => Err(parse_error(offset, "unexpected end of input")),
        }
    }

    /// `expr ; expr ; ...` with an optional trailing separator
    fn sequence_body(&mut self, braced: bool) -> Result<Vec<Micheline>, EncodingError> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None => break,
                Some(Token::RBrace) if braced => break,
                _ => {}
            }
            items.push(self.expression()?);
            match self.peek() {
                Some(Token::Semi) => self.pos += 1,
                Some(Token::RBrace) if braced => break,
                None => break,
                Some(t) => {
                    return Err(parse_error(self.offset(), format!("expected ';', found {:?}", t)));
                }
            }
        }
        Ok(items)
    }

    fn finish(&self) -> Result<(), EncodingError> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(parse_error(self.offset(), format!("trailing {:?}", t))),
        }
    }
}

/// Parse a single Michelson expression, e.g. `Pair 1 "foo"` or `{ Elt 1 2 }`
pub fn parse_expression(text: &str) -> Result<Micheline, EncodingError> {
    let mut parser = Parser::new(text)?;
    if parser.peek().is_none() {
        return Err(parse_error(0, "empty expression"));
    }
    let value = parser.expression()?;
    parser.finish()?;
    Ok(value)
}

/// Parse a contract script into its top-level sections, ordered as
/// `parameter`, `storage`, `code`
pub fn parse_script(text: &str) -> Result<Vec<Micheline>, EncodingError> {
    let mut parser = Parser::new(text)?;
    let sections = if parser.peek() == Some(&Token::LBrace) {
        parser.pos += 1;
        let items = parser.sequence_body(true)?;
        parser.expect(Token::RBrace)?;
        items
    } else {
        parser.sequence_body(false)?
    };
    parser.finish()?;

    for section in &sections {
        match section.prim_name() {
            Some("parameter" | "storage" | "code" | "view") => {}
            _ => {
                return Err(EncodingError::InvalidExpression(format!(
                    "unexpected script section {:?}",
                    section
                )))
            }
        }
    }
    for required in ["parameter", "storage", "code"] {
        if !sections.iter().any(|s| s.prim_name() == Some(required)) {
            return Err(EncodingError::InvalidExpression(format!(
                "the {} section is missing from the script",
                required
            )));
        }
    }

    Ok(sort_script_sections(sections))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair_expression() {
        let value = parse_expression(r#"Pair 42 "hello" 0xCAFE"#).unwrap();
        assert_eq!(
            value,
            Micheline::prim(
                "Pair",
                vec![Micheline::int(42), Micheline::string("hello"), Micheline::bytes(&[0xca, 0xfe])]
            )
        );
    }

    #[test]
    fn test_parse_nested_parens_and_negative_int() {
        let value = parse_expression("(Pair (Some -7) None)").unwrap();
        assert_eq!(
            value,
            Micheline::prim(
                "Pair",
                vec![
                    Micheline::prim("Some", vec![Micheline::int(-7)]),
                    Micheline::prim("None", vec![]),
                ]
            )
        );
    }

    #[test]
    fn test_parse_map_literal() {
        let value = parse_expression(r#"{ Elt "a" 1 ; Elt "b" 2 }"#).unwrap();
        let Micheline::Seq(items) = value else {
            panic!("expected a sequence");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].args()[0], Micheline::string("b"));
    }

    #[test]
    fn test_parse_script_with_comments_and_annotations() {
        let script = r#"
            # a counter contract
            storage (int %counter);
            parameter (or (int %increment) (int %decrement));
            /* entry logic */
            code { UNPAIR ;
                   IF_LEFT { ADD } { SWAP ; SUB } ;
                   NIL operation ;
                   PAIR } ;
        "#;
        let sections = parse_script(script).unwrap();
        let names: Vec<_> = sections.iter().filter_map(|s| s.prim_name()).collect();
        assert_eq!(names, vec!["parameter", "storage", "code"]);

        match &sections[1].args()[0] {
            Micheline::Prim { prim, annots, .. } => {
                assert_eq!(prim, "int");
                assert_eq!(annots, &vec!["%counter".to_string()]);
            }
            other => panic!("unexpected storage type {:?}", other),
        }
        // the whole script encodes: every name is a real primitive
        for section in &sections {
            section.to_bytes().unwrap();
        }
    }

    #[test]
    fn test_parse_braced_script() {
        let sections = parse_script("{ parameter unit ; storage unit ; code { CDR ; NIL operation ; PAIR } }").unwrap();
        assert_eq!(sections.len(), 3);
    }

    #[test]
    fn test_missing_storage_section() {
        let err = parse_script("parameter unit; code { CDR ; NIL operation ; PAIR }").unwrap_err();
        assert!(err.to_string().contains("storage"));
    }

    #[test]
    fn test_string_escapes() {
        let value = parse_expression(r#""line\n\"quoted\"""#).unwrap();
        assert_eq!(value, Micheline::string("line\n\"quoted\""));
    }

    #[test]
    fn test_parse_errors_report_offset() {
        match parse_expression("Pair 1 ]").unwrap_err() {
            EncodingError::Parse { offset, .. } => assert_eq!(offset, 7),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(parse_expression("{ 1 ; 2").is_err());
        assert!(parse_expression("\"open").is_err());
        assert!(parse_expression("").is_err());
    }
}
