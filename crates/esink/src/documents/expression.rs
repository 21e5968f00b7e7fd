//! 🔑 Id expressions -- a pocket-sized language for "where does the document id come from?"
//!
//! ```text
//! headers['order-id']            header lookup
//! headers.tenant                 same thing, for well-behaved names
//! payload                        the whole text payload
//! payload.user.id                JSON navigation (text payloads are parsed first)
//! payload['items'][0]['sku']     bracket navigation, array indexes included
//! 'order-' + payload.id          literals and concatenation
//! ```
//!
//! Parsed once at startup. Evaluated per message. An evaluation failure is fatal
//! for that message -- unlike the rolling suffix, nobody swallows this one.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::common::{Message, Payload};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },
    #[error("header '{0}' is not present")]
    MissingHeader(String),
    #[error("payload has no value at '{0}'")]
    MissingField(String),
    #[error("payload value at '{0}' is not a scalar")]
    NotScalar(String),
    #[error("payload is not valid JSON: {0}")]
    NotJson(String),
    #[error("payload type cannot be navigated")]
    UnsupportedPayload,
}

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Literal(String),
    Header(String),
    Payload(Vec<Step>),
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Field(String),
    Index(usize),
}

/// 🔑 A compiled id expression.
#[derive(Debug, Clone, PartialEq)]
pub struct IdExpression {
    source: String,
    terms: Vec<Term>,
}

impl IdExpression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let terms = Parser::new(source).parse()?;
        Ok(Self {
            source: source.to_string(),
            terms,
        })
    }

    /// 🎯 Evaluate against one message and render the result as text.
    pub fn evaluate(&self, message: &Message) -> Result<String, ExpressionError> {
        // -- 🧠 parse the payload at most once, however many terms want it
        let mut parsed: Option<Value> = None;
        let mut rendered = String::new();

        for term in &self.terms {
            match term {
                Term::Literal(text) => rendered.push_str(text),
                Term::Header(name) => rendered.push_str(
                    message
                        .header(name)
                        .ok_or_else(|| ExpressionError::MissingHeader(name.clone()))?,
                ),
                Term::Payload(steps) if steps.is_empty() => match &message.payload {
                    Payload::Text(text) => rendered.push_str(text),
                    Payload::Map(_) => return Err(ExpressionError::NotScalar("payload".into())),
                    Payload::Bytes(_) => return Err(ExpressionError::UnsupportedPayload),
                },
                Term::Payload(steps) => {
                    if parsed.is_none() {
                        parsed = Some(payload_value(&message.payload)?);
                    }
                    if let Some(root) = &parsed {
                        rendered.push_str(&navigate(root, steps)?);
                    }
                }
            }
        }

        Ok(rendered)
    }
}

impl fmt::Display for IdExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn payload_value(payload: &Payload) -> Result<Value, ExpressionError> {
    match payload {
        Payload::Text(text) => {
            serde_json::from_str(text).map_err(|e| ExpressionError::NotJson(e.to_string()))
        }
        Payload::Map(fields) => Ok(Value::Object(fields.clone())),
        Payload::Bytes(_) => Err(ExpressionError::UnsupportedPayload),
    }
}

fn navigate(root: &Value, steps: &[Step]) -> Result<String, ExpressionError> {
    let mut path = String::from("payload");
    let mut current = root;

    for step in steps {
        let next = match step {
            Step::Field(name) => {
                path.push('.');
                path.push_str(name);
                current.get(name.as_str())
            }
            Step::Index(index) => {
                path.push_str(&format!("[{index}]"));
                current.get(*index)
            }
        };
        current = next.ok_or_else(|| ExpressionError::MissingField(path.clone()))?;
    }

    match current {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Null => Err(ExpressionError::MissingField(path)),
        Value::Array(_) | Value::Object(_) => Err(ExpressionError::NotScalar(path)),
    }
}

// ===== 🧩 the parser: recursive descent, minus the recursion =====

struct Parser<'a> {
    chars: Vec<char>,
    position: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().collect(),
            position: 0,
            source,
        }
    }

    fn parse(mut self) -> Result<Vec<Term>, ExpressionError> {
        if self.source.trim().is_empty() {
            return Err(self.error("expression is empty"));
        }
        let mut terms = vec![self.term()?];
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Ok(terms),
                Some('+') => {
                    self.position += 1;
                    terms.push(self.term()?);
                }
                Some(other) => return Err(self.error(&format!("unexpected '{other}'"))),
            }
        }
    }

    fn term(&mut self) -> Result<Term, ExpressionError> {
        self.skip_whitespace();
        match self.peek() {
            Some('\'') => Ok(Term::Literal(self.string_literal()?)),
            Some(c) if is_ident_start(c) => {
                let start = self.position;
                match self.identifier().as_str() {
                    "headers" => self.header(),
                    "payload" => Ok(Term::Payload(self.steps()?)),
                    other => Err(ExpressionError::Syntax {
                        position: start,
                        message: format!("unknown root '{other}', expected headers or payload"),
                    }),
                }
            }
            Some(other) => Err(self.error(&format!("unexpected '{other}'"))),
            None => Err(self.error("expected a term")),
        }
    }

    fn header(&mut self) -> Result<Term, ExpressionError> {
        let mut steps = self.steps()?;
        match (steps.pop(), steps.is_empty()) {
            (Some(Step::Field(name)), true) => Ok(Term::Header(name)),
            _ => Err(self.error("headers takes exactly one name, e.g. headers['id']")),
        }
    }

    fn steps(&mut self) -> Result<Vec<Step>, ExpressionError> {
        let mut steps = Vec::new();
        loop {
            match self.peek() {
                Some('.') => {
                    self.position += 1;
                    match self.peek() {
                        Some(c) if is_ident_start(c) => steps.push(Step::Field(self.identifier())),
                        _ => return Err(self.error("expected a field name after '.'")),
                    }
                }
                Some('[') => {
                    self.position += 1;
                    self.skip_whitespace();
                    let step = match self.peek() {
                        Some('\'') => Step::Field(self.string_literal()?),
                        Some(c) if c.is_ascii_digit() => Step::Index(self.integer()?),
                        _ => return Err(self.error("expected 'name' or an index inside [...]")),
                    };
                    self.skip_whitespace();
                    if self.peek() != Some(']') {
                        return Err(self.error("expected ']'"));
                    }
                    self.position += 1;
                    steps.push(step);
                }
                _ => return Ok(steps),
            }
        }
    }

    fn string_literal(&mut self) -> Result<String, ExpressionError> {
        // -- opening quote
        self.position += 1;
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string literal")),
                Some('\'') if self.chars.get(self.position + 1) == Some(&'\'') => {
                    text.push('\'');
                    self.position += 2;
                }
                Some('\'') => {
                    self.position += 1;
                    return Ok(text);
                }
                Some(c) => {
                    text.push(c);
                    self.position += 1;
                }
            }
        }
    }

    fn identifier(&mut self) -> String {
        let start = self.position;
        while self.peek().is_some_and(is_ident_part) {
            self.position += 1;
        }
        self.chars[start..self.position].iter().collect()
    }

    fn integer(&mut self) -> Result<usize, ExpressionError> {
        let start = self.position;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.position += 1;
        }
        let digits: String = self.chars[start..self.position].iter().collect();
        digits
            .parse()
            .map_err(|_| self.error(&format!("index '{digits}' is out of range")))
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.position += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn error(&self, message: &str) -> ExpressionError {
        ExpressionError::Syntax {
            position: self.position,
            message: message.to_string(),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_part(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_message() -> Message {
        Message::text(r#"{"user":{"id":42,"name":"ada"},"items":[{"sku":"A-1"}],"gone":null}"#)
            .with_header("tenant", "acme")
            .with_header("order-id", "o-9")
    }

    fn eval(expression: &str, message: &Message) -> Result<String, ExpressionError> {
        IdExpression::parse(expression)?.evaluate(message)
    }

    #[test]
    fn the_one_where_headers_are_read_both_ways() {
        let message = order_message();
        assert_eq!(eval("headers.tenant", &message).unwrap(), "acme");
        assert_eq!(eval("headers['order-id']", &message).unwrap(), "o-9");
    }

    #[test]
    fn the_one_where_the_payload_is_navigated_like_a_map_with_a_compass() {
        let message = order_message();
        assert_eq!(eval("payload.user.id", &message).unwrap(), "42");
        assert_eq!(eval("payload['user']['name']", &message).unwrap(), "ada");
        assert_eq!(eval("payload.items[0].sku", &message).unwrap(), "A-1");
    }

    #[test]
    fn the_one_where_literals_and_concatenation_build_an_id() {
        let message = order_message();
        assert_eq!(
            eval("headers.tenant + '-' + payload.user.id", &message).unwrap(),
            "acme-42"
        );
        assert_eq!(eval("'it''s'", &message).unwrap(), "it's");
    }

    #[test]
    fn the_one_where_map_payloads_are_navigated_without_parsing() {
        let mut fields = serde_json::Map::new();
        fields.insert("id".into(), json!("m-1"));
        let message = Message::new(Payload::Map(fields));
        assert_eq!(eval("payload.id", &message).unwrap(), "m-1");
        assert_eq!(
            eval("payload", &message),
            Err(ExpressionError::NotScalar("payload".into()))
        );
    }

    #[test]
    fn the_one_where_the_whole_text_payload_is_the_id() {
        let message = Message::text("plain-old-id");
        assert_eq!(eval("payload", &message).unwrap(), "plain-old-id");
    }

    #[test]
    fn the_one_where_evaluation_failures_are_named_and_shamed() {
        let message = order_message();
        assert_eq!(
            eval("headers.missing", &message),
            Err(ExpressionError::MissingHeader("missing".into()))
        );
        assert_eq!(
            eval("payload.user.email", &message),
            Err(ExpressionError::MissingField("payload.user.email".into()))
        );
        assert_eq!(
            eval("payload.gone", &message),
            Err(ExpressionError::MissingField("payload.gone".into()))
        );
        assert_eq!(
            eval("payload.user", &message),
            Err(ExpressionError::NotScalar("payload.user".into()))
        );
        assert!(matches!(
            eval("payload.id", &Message::text("not json")),
            Err(ExpressionError::NotJson(_))
        ));
        assert_eq!(
            eval("payload.id", &Message::new(Payload::Bytes(vec![1, 2]))),
            Err(ExpressionError::UnsupportedPayload)
        );
    }

    #[test]
    fn the_one_where_syntax_errors_are_caught_at_startup() {
        for broken in ["", "headers", "headers.a.b", "payload.", "body.id", "'open", "payload[x]", "payload.a +", "payload.a b"] {
            assert!(
                matches!(IdExpression::parse(broken), Err(ExpressionError::Syntax { .. })),
                "expected a syntax error for {broken:?}"
            );
        }
    }
}
