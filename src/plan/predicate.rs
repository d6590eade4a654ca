//! Branch conditions.
//!
//! Conditions are a small closed expression language rather than host callbacks,
//! so a plan stays serializable and every value a condition reads is a checked
//! [`Reference`]:
//!
//! ```text
//! steps.analyze_code_quality.issues_found > 10 || steps.analyze_code_quality.complexity_score > 7.0
//! steps.analyze_ticket.escalation_needed == true
//! !(steps.search_kb contains "SSO")
//! ```

use crate::plan::reference::Reference;
use crate::shared::serde_ext::parse_via_string;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

impl CompareOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Contains => "contains",
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Reference(Reference),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Truthy(Operand),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    Not(Box<Predicate>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Truthy(operand) => push_operand(operand, out),
            Self::Compare { left, right, .. } => {
                push_operand(left, out);
                push_operand(right, out);
            }
            Self::Not(inner) => inner.collect_references(out),
            Self::All(items) | Self::Any(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
        }
    }
}

fn push_operand<'a>(operand: &'a Operand, out: &mut Vec<&'a Reference>) {
    if let Operand::Reference(reference) = operand {
        out.push(reference);
    }
}

/// A parsed condition together with the text it was written as.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    predicate: Predicate,
}

impl Condition {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let tokens = tokenize(raw)?;
        if tokens.is_empty() {
            return Err("condition must be non-empty".to_string());
        }
        let mut parser = Parser {
            tokens,
            cursor: 0,
            depth: 0,
        };
        let predicate = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(format!("unexpected `{}` after end of condition", token.describe()));
        }
        Ok(Self {
            source: raw.trim().to_string(),
            predicate,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn references(&self) -> Vec<&Reference> {
        self.predicate.references()
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for Condition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        parse_via_string(deserializer, "condition", Self::parse)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Not,
    And,
    Or,
    Op(CompareOp),
    Literal(Value),
    Word(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::LParen => "(".to_string(),
            Self::RParen => ")".to_string(),
            Self::Not => "!".to_string(),
            Self::And => "&&".to_string(),
            Self::Or => "||".to_string(),
            Self::Op(op) => op.to_string(),
            Self::Literal(value) => value.to_string(),
            Self::Word(word) => word.clone(),
        }
    }
}

fn tokenize(raw: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = raw.chars().collect();
    let mut tokens = Vec::new();
    let mut idx = 0;

    while idx < chars.len() {
        let ch = chars[idx];
        let next = chars.get(idx + 1).copied();
        match ch {
            c if c.is_whitespace() => idx += 1,
            '(' => {
                tokens.push(Token::LParen);
                idx += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                idx += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                idx += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                idx += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Ne));
                idx += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                idx += 1;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Eq));
                idx += 2;
            }
            '>' | '<' => {
                let inclusive = next == Some('=');
                let op = match (ch, inclusive) {
                    ('>', true) => CompareOp::Ge,
                    ('>', false) => CompareOp::Gt,
                    ('<', true) => CompareOp::Le,
                    _ => CompareOp::Lt,
                };
                tokens.push(Token::Op(op));
                idx += if inclusive { 2 } else { 1 };
            }
            '"' | '\'' => {
                let (text, consumed) = read_quoted(&chars[idx..], ch)?;
                tokens.push(Token::Literal(Value::String(text)));
                idx += consumed;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = idx;
                idx += 1;
                while idx < chars.len()
                    && (chars[idx].is_ascii_digit() || matches!(chars[idx], '.' | 'e' | 'E'))
                {
                    idx += 1;
                }
                let text: String = chars[start..idx].iter().collect();
                let number: serde_json::Number = text
                    .parse()
                    .map_err(|_| format!("invalid number literal `{text}`"))?;
                tokens.push(Token::Literal(Value::Number(number)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = idx;
                while idx < chars.len()
                    && (chars[idx].is_ascii_alphanumeric() || matches!(chars[idx], '_' | '-' | '.'))
                {
                    idx += 1;
                }
                let word: String = chars[start..idx].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "null" => Token::Literal(Value::Null),
                    "contains" => Token::Op(CompareOp::Contains),
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Word(word),
                });
            }
            other => return Err(format!("unexpected character `{other}`")),
        }
    }

    Ok(tokens)
}

fn read_quoted(chars: &[char], quote: char) -> Result<(String, usize), String> {
    let mut text = String::new();
    let mut idx = 1;
    while idx < chars.len() {
        match chars[idx] {
            '\\' => {
                let escaped = chars
                    .get(idx + 1)
                    .ok_or_else(|| "unterminated escape in string literal".to_string())?;
                text.push(*escaped);
                idx += 2;
            }
            c if c == quote => return Ok((text, idx + 1)),
            c => {
                text.push(c);
                idx += 1;
            }
        }
    }
    Err("unterminated string literal".to_string())
}

/// Groups and negations nested deeper than this are rejected.
const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
    depth: usize,
}

impl Parser {
    fn descend(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(format!("condition nests deeper than {MAX_NESTING} levels"));
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).cloned();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Predicate, String> {
        let mut items = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.cursor += 1;
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Predicate::Any(items)
        })
    }

    fn parse_and(&mut self) -> Result<Predicate, String> {
        let mut items = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.cursor += 1;
            items.push(self.parse_unary()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Predicate::All(items)
        })
    }

    fn parse_unary(&mut self) -> Result<Predicate, String> {
        match self.peek() {
            Some(Token::Not) => {
                self.cursor += 1;
                self.descend()?;
                let inner = self.parse_unary()?;
                self.depth -= 1;
                Ok(Predicate::Not(Box::new(inner)))
            }
            Some(Token::LParen) => {
                self.cursor += 1;
                self.descend()?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("missing `)`".to_string()),
                }
            }
            _ => self.parse_comparison(),
        }
    }

    fn parse_comparison(&mut self) -> Result<Predicate, String> {
        let left = self.parse_operand()?;
        let Some(Token::Op(op)) = self.peek().cloned() else {
            return Ok(Predicate::Truthy(left));
        };
        self.cursor += 1;
        let right = self.parse_operand()?;
        Ok(Predicate::Compare { left, op, right })
    }

    fn parse_operand(&mut self) -> Result<Operand, String> {
        match self.next() {
            Some(Token::Literal(value)) => Ok(Operand::Literal(value)),
            Some(Token::Word(word)) => Reference::parse(&word).map(Operand::Reference),
            Some(other) => Err(format!("expected a value, found `{}`", other.describe())),
            None => Err("condition ends where a value was expected".to_string()),
        }
    }
}
