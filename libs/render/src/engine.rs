//! Template parsing and evaluation.
//!
//! Text outside `{{ }}` is copied verbatim. Inside, an action is a pipeline
//! of commands separated by `|`; the result of each command is appended as
//! the last argument of the next. A command is either a single operand or a
//! function name followed by argument operands. Operands are the data
//! (`.`), field paths (`.a.b`), string/number/bool literals, and
//! parenthesised pipelines. `{{- ` and ` -}}` trim adjacent whitespace,
//! `{{/* ... */}}` is a comment.

use serde_json::Value;

use crate::functions;
use crate::{RenderError, Renderer};

static NULL: Value = Value::Null;

/// Default [`Renderer`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateEngine;

impl TemplateEngine {
    /// Create an engine.
    pub fn new() -> Self {
        Self
    }
}

impl Renderer for TemplateEngine {
    fn render(&self, template: &str, data: &Value) -> Result<String, RenderError> {
        Template::parse(template)?.execute(data)
    }
}

// =============================================================================
// AST
// =============================================================================

/// A parsed template.
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
enum Segment {
    Text(String),
    Action(Pipeline),
}

#[derive(Debug, Clone)]
struct Pipeline {
    commands: Vec<Command>,
}

#[derive(Debug, Clone)]
struct Command {
    operands: Vec<Operand>,
}

#[derive(Debug, Clone)]
enum Operand {
    Field(Vec<String>),
    Literal(Value),
    Function(String),
    Group(Pipeline),
}

// =============================================================================
// Parsing
// =============================================================================

impl Template {
    /// Parse template text.
    pub fn parse(source: &str) -> Result<Self, RenderError> {
        let mut segments = Vec::new();
        let mut rest = 0;
        let mut trim_next_text = false;

        while let Some(found) = source[rest..].find("{{") {
            let open = rest + found;
            let close = source[open + 2..]
                .find("}}")
                .map(|i| open + 2 + i)
                .ok_or_else(|| RenderError::syntax(open, "unclosed action"))?;

            let mut body = &source[open + 2..close];
            let mut body_offset = open + 2;

            let trim_left = body.starts_with("- ") || body == "-";
            if trim_left {
                body = &body[1..];
                body_offset += 1;
            }
            let trim_right = body.ends_with(" -");
            if trim_right {
                body = &body[..body.len() - 1];
            }

            let mut text = &source[rest..open];
            if trim_next_text {
                text = text.trim_start();
            }
            if trim_left {
                text = text.trim_end();
            }
            if !text.is_empty() {
                segments.push(Segment::Text(text.to_string()));
            }

            let trimmed = body.trim();
            if !(trimmed.starts_with("/*") && trimmed.ends_with("*/")) {
                let tokens = lex(body, body_offset)?;
                if tokens.is_empty() {
                    return Err(RenderError::syntax(open, "empty action"));
                }
                let mut parser = Parser {
                    tokens: &tokens,
                    pos: 0,
                    end_offset: close,
                };
                let pipeline = parser.pipeline(false)?;
                segments.push(Segment::Action(pipeline));
            }

            trim_next_text = trim_right;
            rest = close + 2;
        }

        let mut tail = &source[rest..];
        if trim_next_text {
            tail = tail.trim_start();
        }
        if !tail.is_empty() {
            segments.push(Segment::Text(tail.to_string()));
        }

        Ok(Self { segments })
    }

    /// Execute the template against `data`.
    pub fn execute(&self, data: &Value) -> Result<String, RenderError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Action(pipeline) => {
                    let value = eval_pipeline(pipeline, data)?;
                    out.push_str(&functions::format_value(&value));
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(Vec<String>),
    Ident(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    Pipe,
}

#[derive(Debug, Clone)]
struct Lexed {
    token: Token,
    offset: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lex(body: &str, base: usize) -> Result<Vec<Lexed>, RenderError> {
    let chars: Vec<(usize, char)> = body.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let read_ident = |mut j: usize| -> (String, usize) {
        let mut ident = String::new();
        while j < chars.len() && is_ident_char(chars[j].1) {
            ident.push(chars[j].1);
            j += 1;
        }
        (ident, j)
    };

    while i < chars.len() {
        let (at, c) = chars[i];
        let offset = base + at;

        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '(' => {
                i += 1;
                Token::LParen
            }
            ')' => {
                i += 1;
                Token::RParen
            }
            '|' => {
                i += 1;
                Token::Pipe
            }
            '.' => {
                let mut path = Vec::new();
                let mut j = i;
                while j < chars.len() && chars[j].1 == '.' {
                    if j + 1 < chars.len() && is_ident_start(chars[j + 1].1) {
                        let (ident, next) = read_ident(j + 1);
                        path.push(ident);
                        j = next;
                    } else if path.is_empty() {
                        j += 1;
                        break;
                    } else {
                        return Err(RenderError::syntax(base + chars[j].0, "dangling '.' in field path"));
                    }
                }
                i = j;
                Token::Field(path)
            }
            '"' => {
                let mut s = String::new();
                let mut j = i + 1;
                loop {
                    let Some(&(_, ch)) = chars.get(j) else {
                        return Err(RenderError::syntax(offset, "unterminated string"));
                    };
                    match ch {
                        '"' => break,
                        '\\' => {
                            let escaped = chars
                                .get(j + 1)
                                .map(|&(_, e)| e)
                                .ok_or_else(|| RenderError::syntax(offset, "unterminated string"))?;
                            s.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                            j += 2;
                        }
                        other => {
                            s.push(other);
                            j += 1;
                        }
                    }
                }
                i = j + 1;
                Token::Str(s)
            }
            '`' => {
                let start = i + 1;
                let end = (start..chars.len())
                    .find(|&j| chars[j].1 == '`')
                    .ok_or_else(|| RenderError::syntax(offset, "unterminated raw string"))?;
                i = end + 1;
                Token::Str(chars[start..end].iter().map(|&(_, ch)| ch).collect())
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|&(_, d)| d.is_ascii_digit())) =>
            {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].1.is_ascii_digit() || chars[j].1 == '.') {
                    j += 1;
                }
                let text: String = chars[i..j].iter().map(|&(_, ch)| ch).collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| RenderError::syntax(offset, format!("bad number '{text}'")))?;
                i = j;
                Token::Num(n)
            }
            c if is_ident_start(c) => {
                let (ident, next) = read_ident(i);
                i = next;
                Token::Ident(ident)
            }
            other => {
                return Err(RenderError::syntax(
                    offset,
                    format!("unexpected character '{other}'"),
                ));
            }
        };

        tokens.push(Lexed { token, offset });
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Lexed],
    pos: usize,
    end_offset: usize,
}

impl Parser<'_> {
    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.offset)
            .unwrap_or(self.end_offset)
    }

    fn pipeline(&mut self, in_group: bool) -> Result<Pipeline, RenderError> {
        let mut commands = vec![self.command()?];

        loop {
            match self.tokens.get(self.pos).map(|t| &t.token) {
                Some(Token::Pipe) => {
                    self.pos += 1;
                    commands.push(self.command()?);
                }
                Some(Token::RParen) if in_group => {
                    self.pos += 1;
                    return Ok(Pipeline { commands });
                }
                Some(Token::RParen) => {
                    return Err(RenderError::syntax(self.offset(), "unexpected ')'"));
                }
                None if in_group => {
                    return Err(RenderError::syntax(self.end_offset, "unclosed '('"));
                }
                None => return Ok(Pipeline { commands }),
                Some(_) => {
                    return Err(RenderError::syntax(self.offset(), "unexpected token"));
                }
            }
        }
    }

    fn command(&mut self) -> Result<Command, RenderError> {
        let mut operands = Vec::new();

        while let Some(lexed) = self.tokens.get(self.pos) {
            let operand = match &lexed.token {
                Token::Pipe | Token::RParen => break,
                Token::Field(path) => Operand::Field(path.clone()),
                Token::Str(s) => Operand::Literal(Value::String(s.clone())),
                Token::Num(n) => Operand::Literal(functions::number(*n)),
                Token::Ident(name) => match name.as_str() {
                    "true" => Operand::Literal(Value::Bool(true)),
                    "false" => Operand::Literal(Value::Bool(false)),
                    "nil" => Operand::Literal(Value::Null),
                    _ => Operand::Function(name.clone()),
                },
                Token::LParen => {
                    self.pos += 1;
                    operands.push(Operand::Group(self.pipeline(true)?));
                    continue;
                }
            };
            self.pos += 1;
            operands.push(operand);
        }

        if operands.is_empty() {
            return Err(RenderError::syntax(self.offset(), "missing command"));
        }

        Ok(Command { operands })
    }
}

// =============================================================================
// Evaluation
// =============================================================================

fn eval_pipeline(pipeline: &Pipeline, dot: &Value) -> Result<Value, RenderError> {
    let mut piped = None;
    for command in &pipeline.commands {
        piped = Some(eval_command(command, dot, piped.take())?);
    }
    Ok(piped.unwrap_or(Value::Null))
}

fn eval_command(command: &Command, dot: &Value, piped: Option<Value>) -> Result<Value, RenderError> {
    let (first, rest) = command
        .operands
        .split_first()
        .ok_or_else(|| RenderError::eval("empty command"))?;

    match first {
        Operand::Function(name) => {
            let mut args = rest
                .iter()
                .map(|operand| eval_operand(operand, dot))
                .collect::<Result<Vec<_>, _>>()?;
            args.extend(piped);
            functions::call(name, args)
        }
        operand => {
            if !rest.is_empty() {
                return Err(RenderError::eval("can't give arguments to a non-function"));
            }
            if piped.is_some() {
                return Err(RenderError::eval("can't pipe into a non-function"));
            }
            eval_operand(operand, dot)
        }
    }
}

fn eval_operand(operand: &Operand, dot: &Value) -> Result<Value, RenderError> {
    match operand {
        Operand::Field(path) => lookup(dot, path),
        Operand::Literal(value) => Ok(value.clone()),
        Operand::Function(name) => functions::call(name, Vec::new()),
        Operand::Group(pipeline) => eval_pipeline(pipeline, dot),
    }
}

fn lookup(dot: &Value, path: &[String]) -> Result<Value, RenderError> {
    let mut current = dot;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment).unwrap_or(&NULL),
            Value::Null => return Ok(Value::Null),
            other => {
                return Err(RenderError::eval(format!(
                    "can't evaluate field {segment} in {}",
                    functions::kind(other)
                )));
            }
        };
    }
    Ok(current.clone())
}
