// SPDX-License-Identifier: AGPL-3.0-or-later

//! Syntax checker for the document store's projection query language.
//!
//! This is a recognizer, not an evaluator: it accepts the expression grammar
//! (filters, projections, dereferences, pipes, function calls, ranges,
//! conditional `=>` pairs) and reports the first syntax error with its byte
//! offset.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct QueryParseError {
    pub message: String,
    pub offset: usize,
}

impl QueryParseError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Param,
    Number,
    Str,
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    offset: usize,
}

const PUNCTS: &[&str] = &[
    "...", "..", "->", "=>", "==", "!=", "<=", ">=", "&&", "||", "**", "::", "*", "^", "@", ".", ",",
    ":", "|", "(", ")", "[", "]", "{", "}", "<", ">", "!", "+", "-", "/", "%",
];

fn tokenize(input: &str) -> Result<Vec<Token>, QueryParseError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if input[i..].starts_with("//") {
            i = input[i..].find('\n').map(|n| i + n).unwrap_or(bytes.len());
            continue;
        }
        let start = i;
        if c == b'"' || c == b'\'' {
            i += 1;
            loop {
                match bytes.get(i) {
                    None => return Err(QueryParseError::new("unterminated string", start)),
                    Some(b'\\') => i += 2,
                    Some(&b) if b == c => {
                        i += 1;
                        break;
                    }
                    Some(_) => i += 1,
                }
            }
            tokens.push(Token { tok: Tok::Str, offset: start });
            continue;
        }
        if c.is_ascii_digit() {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }
            if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                i += 1;
                if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
                    i += 1;
                }
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }
            tokens.push(Token { tok: Tok::Number, offset: start });
            continue;
        }
        if c == b'$' {
            i += 1;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            if i == start + 1 {
                return Err(QueryParseError::new("expected parameter name after '$'", start));
            }
            tokens.push(Token { tok: Tok::Param, offset: start });
            continue;
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(Token {
                tok: Tok::Ident(input[start..i].to_string()),
                offset: start,
            });
            continue;
        }
        match PUNCTS.iter().find(|p| input[i..].starts_with(**p)) {
            Some(p) => {
                i += p.len();
                tokens.push(Token { tok: Tok::Punct(p), offset: start });
            }
            None => {
                let ch = input[i..].chars().next().unwrap_or('?');
                return Err(QueryParseError::new(format!("unexpected character '{}'", ch), start));
            }
        }
    }

    tokens.push(Token { tok: Tok::Eof, offset: input.len() });
    Ok(tokens)
}

/// Deepest expression nesting accepted before the query is rejected
const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

type ParseResult = Result<(), QueryParseError>;

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn peek_at(&self, ahead: usize) -> &Tok {
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx].tok
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].offset
    }

    fn bump(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Tok::Punct(q) if *q == p)
    }

    fn is_ident(&self, name: &str) -> bool {
        matches!(self.peek(), Tok::Ident(n) if n == name)
    }

    fn eat(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, p: &str) -> ParseResult {
        if self.eat(p) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected '{}'", p)))
        }
    }

    fn unexpected(&self, context: &str) -> QueryParseError {
        let found = match self.peek() {
            Tok::Ident(n) => format!("identifier '{}'", n),
            Tok::Param => "parameter".to_string(),
            Tok::Number => "number".to_string(),
            Tok::Str => "string".to_string(),
            Tok::Punct(p) => format!("'{}'", p),
            Tok::Eof => "end of query".to_string(),
        };
        QueryParseError::new(format!("{}, found {}", context, found), self.offset())
    }

    fn nested(&mut self, inner: impl FnOnce(&mut Self) -> ParseResult) -> ParseResult {
        if self.depth >= MAX_NESTING {
            return Err(QueryParseError::new(
                format!("query nests deeper than {} levels", MAX_NESTING),
                self.offset(),
            ));
        }
        self.depth += 1;
        let result = inner(self);
        self.depth -= 1;
        result
    }

    fn query(&mut self) -> ParseResult {
        if matches!(self.peek(), Tok::Eof) {
            return Err(QueryParseError::new("empty query", self.offset()));
        }
        self.expr()?;
        if !matches!(self.peek(), Tok::Eof) {
            return Err(self.unexpected("expected end of query"));
        }
        Ok(())
    }

    fn expr(&mut self) -> ParseResult {
        self.nested(|p| {
            p.or()?;
            while p.eat("|") {
                p.or()?;
            }
            Ok(())
        })
    }

    fn or(&mut self) -> ParseResult {
        self.and()?;
        while self.eat("||") {
            self.and()?;
        }
        Ok(())
    }

    fn and(&mut self) -> ParseResult {
        self.comparison()?;
        while self.eat("&&") {
            self.comparison()?;
        }
        Ok(())
    }

    fn comparison(&mut self) -> ParseResult {
        self.range()?;
        let is_operator = ["==", "!=", "<", ">", "<=", ">="].iter().any(|p| self.is_punct(p))
            || self.is_ident("in")
            || self.is_ident("match");
        if is_operator {
            self.bump();
            self.range()?;
        }
        Ok(())
    }

    fn range(&mut self) -> ParseResult {
        self.additive()?;
        if self.eat("..") || self.eat("...") {
            self.additive()?;
        }
        Ok(())
    }

    fn additive(&mut self) -> ParseResult {
        self.multiplicative()?;
        while self.eat("+") || self.eat("-") {
            self.multiplicative()?;
        }
        Ok(())
    }

    fn multiplicative(&mut self) -> ParseResult {
        self.power()?;
        while self.eat("*") || self.eat("/") || self.eat("%") {
            self.power()?;
        }
        Ok(())
    }

    fn power(&mut self) -> ParseResult {
        self.unary()?;
        if self.eat("**") {
            self.nested(Self::power)?;
        }
        Ok(())
    }

    fn unary(&mut self) -> ParseResult {
        if self.eat("!") || self.eat("-") || self.eat("+") {
            return self.nested(Self::unary);
        }
        self.primary()?;
        self.traversals()
    }

    fn primary(&mut self) -> ParseResult {
        match self.peek().clone() {
            Tok::Number | Tok::Str | Tok::Param => {
                self.bump();
                Ok(())
            }
            Tok::Ident(_) => {
                self.bump();
                if self.eat("::") {
                    match self.peek() {
                        Tok::Ident(_) => self.bump(),
                        _ => return Err(self.unexpected("expected function name after '::'")),
                    }
                    return self.call_arguments();
                }
                if self.is_punct("(") {
                    return self.call_arguments();
                }
                Ok(())
            }
            Tok::Punct("*") | Tok::Punct("^") | Tok::Punct("@") => {
                self.bump();
                Ok(())
            }
            Tok::Punct("(") => {
                self.bump();
                self.expr()?;
                self.expect(")")
            }
            Tok::Punct("[") => {
                self.bump();
                self.array_items()
            }
            Tok::Punct("{") => {
                self.bump();
                self.projection_body()
            }
            _ => Err(self.unexpected("expected expression")),
        }
    }

    fn call_arguments(&mut self) -> ParseResult {
        self.expect("(")?;
        if self.eat(")") {
            return Ok(());
        }
        loop {
            self.pair_or_expr()?;
            if self.is_ident("asc") || self.is_ident("desc") {
                self.bump();
            }
            if self.eat(",") {
                if self.is_punct(")") {
                    break;
                }
                continue;
            }
            break;
        }
        self.expect(")")
    }

    fn pair_or_expr(&mut self) -> ParseResult {
        self.expr()?;
        if self.eat("=>") {
            self.expr()?;
        }
        Ok(())
    }

    fn array_items(&mut self) -> ParseResult {
        while !self.is_punct("]") {
            if self.eat("...") {
                self.expr()?;
            } else {
                self.expr()?;
            }
            if !self.eat(",") {
                break;
            }
        }
        self.expect("]")
    }

    /// Body of `{ ... }` after the opening brace, object literal or projection alike
    fn projection_body(&mut self) -> ParseResult {
        while !self.is_punct("}") {
            if self.eat("...") {
                if !self.is_punct(",") && !self.is_punct("}") {
                    self.expr()?;
                }
            } else {
                self.expr()?;
                if self.eat(":") || self.eat("=>") {
                    self.expr()?;
                }
            }
            if !self.eat(",") {
                break;
            }
        }
        self.expect("}")
    }

    fn traversals(&mut self) -> ParseResult {
        loop {
            if self.eat(".") {
                match self.peek() {
                    Tok::Ident(_) => self.bump(),
                    _ => return Err(self.unexpected("expected attribute name after '.'")),
                }
            } else if self.eat("->") {
                if let Tok::Ident(_) = self.peek() {
                    if !matches!(self.peek_at(1), Tok::Punct("(")) {
                        self.bump();
                    }
                }
            } else if self.eat("[") {
                if !self.eat("]") {
                    self.expr()?;
                    self.expect("]")?;
                }
            } else if self.eat("{") {
                self.projection_body()?;
            } else {
                return Ok(());
            }
        }
    }
}

/// Check a query for syntactic validity
pub fn parse(query: &str) -> Result<(), QueryParseError> {
    let tokens = tokenize(query)?;
    Parser { tokens, pos: 0, depth: 0 }.query()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_common_queries() {
        let queries = [
            r#"*[_type == "order"]{status, totalAmount}"#,
            r#"*[_type == "order" && status in ["paid", "shipped"]] | order(_createdAt desc)[0...10]{_id, "customer": customer->name, items[]{sku, qty}}"#,
            r#"count(*[_type == "product" && defined(slug.current)])"#,
            r#"*[_type == "product" && slug.current == $slug][0]{..., "image": mainImage.asset->url}"#,
            r#"{"orders": *[_type == "order"]{_id}, "total": count(*[_type == "order"])}"#,
            r#"*[_type == "post"]{title, _type == "post" => {body}, "score": select(rating > 3 => "high", "low")}"#,
            r#"*[title match "shoe*"] | score(boost(title match "red", 2))"#,
            r#"*[_type == "page"]{content[]{..., _type == "block" => {"text": pt::text(@)}}}"#,
            r#"*[references(^._id)]"#,
        ];
        for query in queries {
            assert!(parse(query).is_ok(), "should parse: {} -> {:?}", query, parse(query));
        }
    }

    #[test]
    fn test_rejects_broken_queries() {
        assert!(parse(r#"*[_type == "order"]{status,"#).is_err());
        assert!(parse(r#"*[_type == "order"{status}"#).is_err());
        assert!(parse(r#"*[_type == "order]"#).is_err());
        assert!(parse("").is_err());
        assert!(parse("*[_type == 'x'] #").is_err());
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let deep = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        let err = parse(&deep).unwrap_err();
        assert!(err.message.contains("nests deeper"));
        assert_eq!(err.offset, MAX_NESTING);

        assert!(parse(&"!".repeat(10_000)).is_err());
        assert!(parse(&vec!["2"; 5_000].join(" ** ")).is_err());

        let shallow = format!("{}1{}", "(".repeat(20), ")".repeat(20));
        assert!(parse(&shallow).is_ok());
    }

    #[test]
    fn test_error_carries_offset() {
        let err = parse(r#"*[_type == "order"]{status total}"#).unwrap_err();
        assert_eq!(err.offset, 27);
        assert!(err.to_string().contains("at offset 27"));
    }
}
