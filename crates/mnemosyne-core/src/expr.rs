//! Parser for Milvus-style boolean filter expressions.
//!
//! Supported grammar:
//!
//! ```text
//! expr       := and_expr (("or" | "||") and_expr)*
//! and_expr   := unary (("and" | "&&") unary)*
//! unary      := ("not" | "!") unary | primary
//! primary    := "(" expr ")" | "true" | "false" | comparison
//! comparison := IDENT ("==" | "!=" | ">" | ">=" | "<" | "<=") literal
//!             | IDENT ["not"] "in" "[" literal ("," literal)* "]"
//!             | IDENT "like" STRING
//! ```
//!
//! Keywords are case-insensitive. Strings may use single or double quotes.

use serde_json::Value;

use crate::error::{MnemosyneError, MnemosyneResult};
use crate::types::Filter;

/// Parse an expression. Blank input yields `None`, meaning "match every row".
pub fn parse(input: &str) -> MnemosyneResult<Option<Filter>> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Ok(None);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
    };
    let filter = parser.parse_or()?;
    if let Some(tok) = parser.peek() {
        return Err(MnemosyneError::parse(
            format!("unexpected {}", tok.kind.describe()),
            tok.offset,
        ));
    }
    Ok(Some(filter))
}

/// Parse an optional expression, treating `None` like blank input.
pub fn parse_opt(input: Option<&str>) -> MnemosyneResult<Option<Filter>> {
    match input {
        Some(s) => parse(s),
        None => Ok(None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Cmp(CmpOp),
    And,
    Or,
    Not,
    In,
    Like,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

impl TokenKind {
    fn describe(&self) -> String {
        match self {
            TokenKind::Ident(s) => format!("identifier '{}'", s),
            TokenKind::Str(s) => format!("string \"{}\"", s),
            TokenKind::Int(i) => format!("number {}", i),
            TokenKind::Float(f) => format!("number {}", f),
            TokenKind::Bool(b) => format!("'{}'", b),
            TokenKind::Cmp(op) => format!("operator {:?}", op),
            TokenKind::And => "'and'".to_string(),
            TokenKind::Or => "'or'".to_string(),
            TokenKind::Not => "'not'".to_string(),
            TokenKind::In => "'in'".to_string(),
            TokenKind::Like => "'like'".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::LBracket => "'['".to_string(),
            TokenKind::RBracket => "']'".to_string(),
            TokenKind::Comma => "','".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(input: &str) -> MnemosyneResult<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let two = if i + 1 < bytes.len() {
            Some((c, bytes[i + 1]))
        } else {
            None
        };

        let kind = match (c, two) {
            (_, Some((b'=', b'='))) => {
                i += 2;
                TokenKind::Cmp(CmpOp::Eq)
            }
            (_, Some((b'!', b'='))) => {
                i += 2;
                TokenKind::Cmp(CmpOp::Ne)
            }
            (_, Some((b'>', b'='))) => {
                i += 2;
                TokenKind::Cmp(CmpOp::Gte)
            }
            (_, Some((b'<', b'='))) => {
                i += 2;
                TokenKind::Cmp(CmpOp::Lte)
            }
            (_, Some((b'&', b'&'))) => {
                i += 2;
                TokenKind::And
            }
            (_, Some((b'|', b'|'))) => {
                i += 2;
                TokenKind::Or
            }
            (b'>', _) => {
                i += 1;
                TokenKind::Cmp(CmpOp::Gt)
            }
            (b'<', _) => {
                i += 1;
                TokenKind::Cmp(CmpOp::Lt)
            }
            (b'!', _) => {
                i += 1;
                TokenKind::Not
            }
            (b'(', _) => {
                i += 1;
                TokenKind::LParen
            }
            (b')', _) => {
                i += 1;
                TokenKind::RParen
            }
            (b'[', _) => {
                i += 1;
                TokenKind::LBracket
            }
            (b']', _) => {
                i += 1;
                TokenKind::RBracket
            }
            (b',', _) => {
                i += 1;
                TokenKind::Comma
            }
            (b'"' | b'\'', _) => {
                let (s, next) = read_string(input, i)?;
                i = next;
                TokenKind::Str(s)
            }
            (b'0'..=b'9' | b'-' | b'.', _) => {
                let (kind, next) = read_number(input, i)?;
                i = next;
                kind
            }
            (c, _) if c.is_ascii_alphabetic() || c == b'_' || c == b'$' => {
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
                {
                    i += 1;
                }
                let word = &input[start..i];
                match word.to_ascii_lowercase().as_str() {
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "not" => TokenKind::Not,
                    "in" => TokenKind::In,
                    "like" => TokenKind::Like,
                    "true" => TokenKind::Bool(true),
                    "false" => TokenKind::Bool(false),
                    _ => TokenKind::Ident(word.to_string()),
                }
            }
            _ => {
                let ch = input[start..].chars().next().unwrap_or('?');
                return Err(MnemosyneError::parse(
                    format!("unexpected character '{}'", ch),
                    start,
                ));
            }
        };

        tokens.push(Token {
            kind,
            offset: start,
        });
    }

    Ok(tokens)
}

fn read_string(input: &str, start: usize) -> MnemosyneResult<(String, usize)> {
    let mut chars = input[start..].char_indices();
    let (_, quote) = chars
        .next()
        .ok_or_else(|| MnemosyneError::parse("expected string", start))?;
    let mut out = String::new();

    while let Some((idx, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c if c == quote => return Ok((out, start + idx + c.len_utf8())),
            c => out.push(c),
        }
    }

    Err(MnemosyneError::parse("unterminated string literal", start))
}

fn read_number(input: &str, start: usize) -> MnemosyneResult<(TokenKind, usize)> {
    let bytes = input.as_bytes();
    let mut i = start;
    if bytes[i] == b'-' {
        i += 1;
    }
    let mut is_float = false;
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' => i += 1,
            b'.' | b'e' | b'E' => {
                is_float = true;
                i += 1;
            }
            b'+' | b'-' if matches!(bytes[i - 1], b'e' | b'E') => i += 1,
            _ => break,
        }
    }

    let text = &input[start..i];
    let kind = if is_float {
        text.parse::<f64>().map(TokenKind::Float).ok()
    } else {
        text.parse::<i64>().map(TokenKind::Int).ok()
    };
    kind.map(|k| (k, i))
        .ok_or_else(|| MnemosyneError::parse(format!("invalid number '{}'", text), start))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn next(&mut self) -> MnemosyneResult<Token> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| MnemosyneError::parse("unexpected end of expression", self.end))?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, kind: TokenKind) -> MnemosyneResult<()> {
        let tok = self.next()?;
        if tok.kind == kind {
            Ok(())
        } else {
            Err(MnemosyneError::parse(
                format!("expected {}, found {}", kind.describe(), tok.kind.describe()),
                tok.offset,
            ))
        }
    }

    fn parse_or(&mut self) -> MnemosyneResult<Filter> {
        let mut items = vec![self.parse_and()?];
        while self.peek_kind() == Some(&TokenKind::Or) {
            self.pos += 1;
            items.push(self.parse_and()?);
        }
        Ok(collapse(items, Filter::Or))
    }

    fn parse_and(&mut self) -> MnemosyneResult<Filter> {
        let mut items = vec![self.parse_unary()?];
        while self.peek_kind() == Some(&TokenKind::And) {
            self.pos += 1;
            items.push(self.parse_unary()?);
        }
        Ok(collapse(items, Filter::And))
    }

    fn parse_unary(&mut self) -> MnemosyneResult<Filter> {
        if self.peek_kind() == Some(&TokenKind::Not) {
            self.pos += 1;
            return Ok(Filter::not(self.parse_unary()?));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> MnemosyneResult<Filter> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Bool(true) => Ok(Filter::and(vec![])),
            TokenKind::Bool(false) => Ok(Filter::not(Filter::and(vec![]))),
            TokenKind::Ident(field) => self.parse_comparison(field),
            other => Err(MnemosyneError::parse(
                format!("expected field name, found {}", other.describe()),
                tok.offset,
            )),
        }
    }

    fn parse_comparison(&mut self, field: String) -> MnemosyneResult<Filter> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::Cmp(op) => {
                let value = self.parse_literal()?;
                Ok(match op {
                    CmpOp::Eq => Filter::eq(field, value),
                    CmpOp::Ne => Filter::ne(field, value),
                    CmpOp::Gt => Filter::gt(field, value),
                    CmpOp::Gte => Filter::gte(field, value),
                    CmpOp::Lt => Filter::lt(field, value),
                    CmpOp::Lte => Filter::lte(field, value),
                })
            }
            TokenKind::In => Ok(Filter::in_list(field, self.parse_list()?)),
            TokenKind::Not => {
                self.expect(TokenKind::In)?;
                Ok(Filter::not_in(field, self.parse_list()?))
            }
            TokenKind::Like => {
                let pat = self.next()?;
                match pat.kind {
                    TokenKind::Str(s) => Ok(Filter::like(field, s)),
                    other => Err(MnemosyneError::parse(
                        format!("like expects a string, found {}", other.describe()),
                        pat.offset,
                    )),
                }
            }
            other => Err(MnemosyneError::parse(
                format!("expected operator after '{}', found {}", field, other.describe()),
                tok.offset,
            )),
        }
    }

    fn parse_list(&mut self) -> MnemosyneResult<Vec<Value>> {
        self.expect(TokenKind::LBracket)?;
        let mut values = Vec::new();
        if self.peek_kind() == Some(&TokenKind::RBracket) {
            self.pos += 1;
            return Ok(values);
        }
        loop {
            values.push(self.parse_literal()?);
            let tok = self.next()?;
            match tok.kind {
                TokenKind::Comma => continue,
                TokenKind::RBracket => break,
                other => {
                    return Err(MnemosyneError::parse(
                        format!("expected ',' or ']', found {}", other.describe()),
                        tok.offset,
                    ))
                }
            }
        }
        Ok(values)
    }

    fn parse_literal(&mut self) -> MnemosyneResult<Value> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::Str(s) => Ok(Value::String(s)),
            TokenKind::Int(i) => Ok(Value::from(i)),
            TokenKind::Float(f) => Ok(Value::from(f)),
            TokenKind::Bool(b) => Ok(Value::Bool(b)),
            other => Err(MnemosyneError::parse(
                format!("expected literal, found {}", other.describe()),
                tok.offset,
            )),
        }
    }
}

fn collapse(mut items: Vec<Filter>, wrap: fn(Vec<Filter>) -> Filter) -> Filter {
    if items.len() == 1 {
        items.remove(0)
    } else {
        wrap(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Entity;
    use serde_json::json;

    #[test]
    fn test_blank_is_none() {
        assert!(parse("").unwrap().is_none());
        assert!(parse("   ").unwrap().is_none());
        assert!(parse_opt(None).unwrap().is_none());
    }

    #[test]
    fn test_simple_comparison() {
        assert_eq!(
            parse(r#"session_id == "abc""#).unwrap(),
            Some(Filter::eq("session_id", "abc"))
        );
        assert_eq!(
            parse("create_time >= -5").unwrap(),
            Some(Filter::gte("create_time", -5))
        );
        assert_eq!(parse("score < 0.5").unwrap(), Some(Filter::lt("score", 0.5)));
        assert_eq!(
            parse("name == 'single'").unwrap(),
            Some(Filter::eq("name", "single"))
        );
    }

    #[test]
    fn test_precedence() {
        let parsed = parse(r#"a == 1 or b == 2 and not c == 3"#).unwrap().unwrap();
        assert_eq!(
            parsed,
            Filter::or(vec![
                Filter::eq("a", 1),
                Filter::and(vec![Filter::eq("b", 2), Filter::not(Filter::eq("c", 3))]),
            ])
        );
    }

    #[test]
    fn test_lists_and_like() {
        assert_eq!(
            parse(r#"id in [1, 2, 3]"#).unwrap(),
            Some(Filter::in_list("id", vec![json!(1), json!(2), json!(3)]))
        );
        assert_eq!(
            parse(r#"id NOT IN ["x"]"#).unwrap(),
            Some(Filter::not_in("id", vec![json!("x")]))
        );
        assert_eq!(
            parse(r#"content like "tea%""#).unwrap(),
            Some(Filter::like("content", "tea%"))
        );
    }

    #[test]
    fn test_symbolic_operators() {
        let parsed = parse(r#"(a == 1 || a == 2) && !(b != "x")"#).unwrap().unwrap();
        let mut e = Entity::new();
        e.insert("a".into(), json!(2));
        e.insert("b".into(), json!("x"));
        assert!(parsed.matches(&e));
        e.insert("b".into(), json!("y"));
        assert!(!parsed.matches(&e));
    }

    #[test]
    fn test_rendered_filter_parses_back() {
        let filter = Filter::and(vec![
            Filter::eq("personality_id", "al\"ice"),
            Filter::or(vec![
                Filter::eq("session_id", "s-1"),
                Filter::gt("create_time", 10),
            ]),
            Filter::not(Filter::in_list("memory_id", vec![json!(4)])),
        ]);
        assert_eq!(parse(&filter.to_expr()).unwrap(), Some(filter));
    }

    #[test]
    fn test_rendering_preserves_selection() {
        let rows: Vec<Entity> = [(1, "s-1"), (2, "s-2"), (3, "s-1")]
            .iter()
            .map(|(a, session)| {
                let mut e = Entity::new();
                e.insert("a".into(), json!(a));
                e.insert("session_id".into(), json!(session));
                e
            })
            .collect();

        let sources = [
            "not (a == 1 or true)",
            "a == 1 or true",
            "a > 1 and (session_id == 's-1' or true)",
            "not (a == 2) or false",
            "not (not (a == 3 or false))",
            "a in [1, 2] and not (true or session_id == 's-2')",
            "(a == 1 or session_id == 's-2') and true",
        ];
        for source in sources {
            let filter = parse(source).unwrap().unwrap();
            let rendered = filter.to_expr();
            let reparsed = parse(&rendered).unwrap();
            for row in &rows {
                let again = reparsed.as_ref().map_or(true, |f| f.matches(row));
                assert_eq!(
                    filter.matches(row),
                    again,
                    "{} rendered as {:?} selects differently",
                    source,
                    rendered
                );
            }
        }
    }

    #[test]
    fn test_boolean_constants() {
        let e = Entity::new();
        assert!(parse("true").unwrap().unwrap().matches(&e));
        assert!(!parse("false").unwrap().unwrap().matches(&e));
    }

    #[test]
    fn test_errors_report_offset() {
        match parse("a == ") {
            Err(MnemosyneError::Parse { offset, .. }) => assert_eq!(offset, 5),
            other => panic!("expected parse error, got {:?}", other),
        }
        match parse("a == 1 b") {
            Err(MnemosyneError::Parse { offset, .. }) => assert_eq!(offset, 7),
            other => panic!("expected parse error, got {:?}", other),
        }
        assert!(parse("a == \"open").is_err());
        assert!(parse("a # 1").is_err());
        assert!(parse("(a == 1").is_err());
        assert!(parse("a in [1 2]").is_err());
    }
}
