//! In-process query engine that evaluates statements over a [`KvBackend`] scan.
//!
//! Understands the subset of N1QL the bundled applications issue:
//!
//! ```text
//! SELECT COUNT(*) [AS alias] | * | path [AS alias], ...
//! FROM bucket
//! [WHERE path = literal [AND path = literal ...]]
//! [LIMIT n]
//! ```
//!
//! Paths may be qualified with the bucket name (`` `beer-sample`.name ``).
//! Documents that are not JSON objects are skipped.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::QueryError;
use crate::kv::KvBackend;

use super::compiler::CompiledQuery;
use super::engine::{QueryEngine, QueryRows};

pub struct MemoryQueryEngine {
    store: Arc<dyn KvBackend>,
}

impl fmt::Debug for MemoryQueryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryQueryEngine")
            .field("store", &"KvBackend")
            .finish()
    }
}

impl MemoryQueryEngine {
    pub fn new(store: Arc<dyn KvBackend>) -> Self {
        Self { store }
    }

    async fn evaluate(&self, statement: &Statement) -> Result<Vec<Value>, QueryError> {
        let documents = self
            .store
            .scan(&statement.bucket)
            .await
            .map_err(|err| QueryError::Unavailable(err.to_string()))?;

        let matching = documents
            .into_iter()
            .filter_map(|(_, bytes)| serde_json::from_slice::<Value>(&bytes).ok())
            .filter(|doc| doc.is_object())
            .filter(|doc| {
                statement
                    .predicates
                    .iter()
                    .all(|(path, expected)| literal_eq(lookup(doc, path), expected))
            });

        let rows: Vec<Value> = match &statement.projection {
            Projection::Count { alias } => {
                let count = matching.count();
                let mut row = Map::new();
                row.insert(alias.clone(), Value::from(count as u64));
                vec![Value::Object(row)]
            }
            Projection::All => matching.collect(),
            Projection::Fields(fields) => matching
                .map(|doc| {
                    let mut row = Map::new();
                    for field in fields {
                        if let Some(value) = lookup(&doc, &field.path) {
                            row.insert(field.output_name().to_string(), value.clone());
                        }
                    }
                    Value::Object(row)
                })
                .collect(),
        };

        Ok(match statement.limit {
            Some(limit) => rows.into_iter().take(limit).collect(),
            None => rows,
        })
    }
}

#[async_trait]
impl QueryEngine for MemoryQueryEngine {
    async fn execute(&self, query: &CompiledQuery) -> Result<QueryRows, QueryError> {
        let statement = Statement::parse(query.as_str())?;
        let rows = self.evaluate(&statement).await?;
        Ok(Box::pin(futures::stream::iter(rows.into_iter().map(Ok))))
    }
}

fn lookup<'a>(doc: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(doc, |current, segment| current.get(segment))
}

fn literal_eq(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (Some(Value::Number(a)), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Some(actual), expected) => actual == expected,
        (None, _) => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Field {
    path: Vec<String>,
    alias: Option<String>,
}

impl Field {
    fn output_name(&self) -> &str {
        self.alias
            .as_deref()
            .or_else(|| self.path.last().map(String::as_str))
            .unwrap_or("$1")
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Projection {
    Count { alias: String },
    All,
    Fields(Vec<Field>),
}

#[derive(Debug, Clone, PartialEq)]
struct Statement {
    projection: Projection,
    bucket: String,
    predicates: Vec<(Vec<String>, Value)>,
    limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Str(String),
    Number(f64),
    Symbol(char),
}

fn tokenize(input: &str) -> Result<Vec<Token>, QueryError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '`' || c == '"' || c == '\'' {
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    Some(ch) if ch == c => break,
                    Some(ch) => text.push(ch),
                    None => return Err(QueryError::Rejected("unterminated quote".into())),
                }
            }
            tokens.push(if c == '`' {
                Token::Quoted(text)
            } else {
                Token::Str(text)
            });
        } else if c.is_ascii_digit() || (c == '-' && tokens_allow_number(&tokens)) {
            let mut text = String::new();
            text.push(c);
            chars.next();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    text.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let number = text
                .parse::<f64>()
                .map_err(|_| QueryError::Rejected(format!("bad number `{text}`")))?;
            tokens.push(Token::Number(number));
        } else if c.is_alphanumeric() || c == '_' || c == '$' {
            let mut text = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' || d == '$' {
                    text.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Word(text));
        } else if "*(),.=".contains(c) {
            tokens.push(Token::Symbol(c));
            chars.next();
        } else {
            return Err(QueryError::Rejected(format!("unexpected character `{c}`")));
        }
    }

    Ok(tokens)
}

fn tokens_allow_number(tokens: &[Token]) -> bool {
    matches!(tokens.last(), Some(Token::Symbol('=')))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), QueryError> {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            Ok(())
        } else {
            Err(QueryError::Rejected(format!("expected {keyword}")))
        }
    }

    fn eat_symbol(&mut self, symbol: char) -> bool {
        if self.peek() == Some(&Token::Symbol(symbol)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<(), QueryError> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(QueryError::Rejected(format!("expected `{symbol}`")))
        }
    }

    fn identifier(&mut self) -> Result<String, QueryError> {
        match self.next() {
            Some(Token::Word(word)) | Some(Token::Quoted(word)) => Ok(word),
            other => Err(QueryError::Rejected(format!(
                "expected identifier, found {other:?}"
            ))),
        }
    }

    fn path(&mut self) -> Result<Vec<String>, QueryError> {
        let mut path = vec![self.identifier()?];
        while self.eat_symbol('.') {
            path.push(self.identifier()?);
        }
        Ok(path)
    }

    fn alias(&mut self) -> Result<Option<String>, QueryError> {
        if self.peek_keyword("AS") {
            self.pos += 1;
            return self.identifier().map(Some);
        }
        Ok(None)
    }

    fn projection(&mut self) -> Result<Projection, QueryError> {
        if self.eat_symbol('*') {
            return Ok(Projection::All);
        }
        if self.peek_keyword("COUNT") {
            self.pos += 1;
            self.expect_symbol('(')?;
            self.expect_symbol('*')?;
            self.expect_symbol(')')?;
            let alias = self.alias()?.unwrap_or_else(|| "$1".to_string());
            return Ok(Projection::Count { alias });
        }

        let mut fields = Vec::new();
        loop {
            let path = self.path()?;
            let alias = self.alias()?;
            fields.push(Field { path, alias });
            if !self.eat_symbol(',') {
                break;
            }
        }
        Ok(Projection::Fields(fields))
    }

    fn literal(&mut self) -> Result<Value, QueryError> {
        match self.next() {
            Some(Token::Str(text)) => Ok(Value::String(text)),
            Some(Token::Number(number)) => serde_json::Number::from_f64(number)
                .map(Value::Number)
                .ok_or_else(|| QueryError::Rejected("non-finite number".into())),
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("false") => {
                Ok(Value::Bool(false))
            }
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("null") => Ok(Value::Null),
            other => Err(QueryError::Rejected(format!(
                "expected literal, found {other:?}"
            ))),
        }
    }
}

impl Statement {
    fn parse(text: &str) -> Result<Self, QueryError> {
        let mut parser = Parser {
            tokens: tokenize(text)?,
            pos: 0,
        };

        parser.expect_keyword("SELECT")?;
        let projection = parser.projection()?;
        parser.expect_keyword("FROM")?;
        let bucket = parser.identifier()?;

        let mut predicates = Vec::new();
        if parser.peek_keyword("WHERE") {
            parser.pos += 1;
            loop {
                let path = parser.path()?;
                parser.expect_symbol('=')?;
                parser.eat_symbol('=');
                let value = parser.literal()?;
                predicates.push((strip_bucket(&bucket, path), value));
                if !parser.peek_keyword("AND") {
                    break;
                }
                parser.pos += 1;
            }
        }

        let mut limit = None;
        if parser.peek_keyword("LIMIT") {
            parser.pos += 1;
            match parser.next() {
                Some(Token::Number(n)) if n >= 0.0 => limit = Some(n as usize),
                other => {
                    return Err(QueryError::Rejected(format!(
                        "expected limit, found {other:?}"
                    )));
                }
            }
        }

        if let Some(token) = parser.peek() {
            return Err(QueryError::Rejected(format!("unexpected trailing {token:?}")));
        }

        let projection = match projection {
            Projection::Fields(fields) => Projection::Fields(
                fields
                    .into_iter()
                    .map(|field| Field {
                        path: strip_bucket(&bucket, field.path),
                        alias: field.alias,
                    })
                    .collect(),
            ),
            other => other,
        };

        Ok(Self {
            projection,
            bucket,
            predicates,
            limit,
        })
    }
}

fn strip_bucket(bucket: &str, mut path: Vec<String>) -> Vec<String> {
    if path.len() > 1 && path[0] == bucket {
        path.remove(0);
    }
    path
}
