//! Tokens, statements, and the expression tree.
//!
//! A chunk is lexed once, cut into statements at top-level newlines and
//! semicolons, and each statement is parsed on its own so that one bad
//! statement does not hide the others.

use std::fmt;
use std::ops::Range;

use crate::value::format_num;

// ---------------------------------------------------------------------------
// Expression tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
    Range,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "^",
            Self::Mod => "%%",
            Self::Range => ":",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::And => "&",
            Self::Or => "|",
        }
    }

    fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "^" => Self::Pow,
            "%%" => Self::Mod,
            ":" => Self::Range,
            "==" => Self::Eq,
            "!=" => Self::Ne,
            "<" => Self::Lt,
            ">" => Self::Gt,
            "<=" => Self::Le,
            ">=" => Self::Ge,
            "&" => Self::And,
            "|" => Self::Or,
            _ => return None,
        })
    }

    /// Left and right binding power.
    fn binding_power(self) -> (u8, u8) {
        match self {
            Self::Or => (1, 2),
            Self::And => (3, 4),
            Self::Eq | Self::Ne | Self::Lt | Self::Gt | Self::Le | Self::Ge => (7, 8),
            Self::Add | Self::Sub => (9, 10),
            Self::Mul | Self::Div | Self::Mod => (11, 12),
            Self::Range => (13, 14),
            Self::Pow => (18, 17),
        }
    }
}

const NOT_POWER: u8 = 6;
const NEG_POWER: u8 = 15;

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
    Var(String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Arg>,
    },
    Assign {
        name: String,
        value: Box<Expr>,
    },
}

impl Expr {
    /// Name of the called function, for calls.
    pub fn call_name(&self) -> Option<&str> {
        match self {
            Self::Call { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Deparsed form, used for `Error in <call>` messages.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{}", format_num(*n)),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Bool(true) => write!(f, "TRUE"),
            Self::Bool(false) => write!(f, "FALSE"),
            Self::Null => write!(f, "NULL"),
            Self::Var(name) => write!(f, "{name}"),
            Self::Neg(inner) => write!(f, "-{inner}"),
            Self::Not(inner) => write!(f, "!{inner}"),
            Self::Binary { op, lhs, rhs } => match op {
                BinOp::Range | BinOp::Pow => write!(f, "{lhs}{}{rhs}", op.symbol()),
                _ => write!(f, "{lhs} {} {rhs}", op.symbol()),
            },
            Self::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if let Some(name) = &arg.name {
                        write!(f, "{name} = ")?;
                    }
                    write!(f, "{}", arg.value)?;
                }
                write!(f, ")")
            }
            Self::Assign { name, value } => write!(f, "{name} <- {value}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Sym(&'static str),
    Newline,
}

#[derive(Debug, Clone, PartialEq)]
struct Lexeme {
    token: Token,
    span: Range<usize>,
}

const SYMBOLS: &[&str] = &[
    "<-", "<=", ">=", "==", "!=", "%%", "+", "-", "*", "/", "^", "<", ">", "!", "&", "|", "=",
    ":", "(", ")", ",", ";",
];

fn lex(code: &str) -> Result<Vec<Lexeme>, String> {
    let bytes = code.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        match c {
            b' ' | b'\t' | b'\r' => i += 1,
            b'\n' => {
                out.push(Lexeme {
                    token: Token::Newline,
                    span: start..start + 1,
                });
                i += 1;
            }
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'"' | b'\'' => {
                let (text, end) = lex_string(code, i)?;
                out.push(Lexeme {
                    token: Token::Str(text),
                    span: start..end,
                });
                i = end;
            }
            b'0'..=b'9' => {
                let end = number_end(bytes, i);
                out.push(Lexeme {
                    token: Token::Num(parse_number(&code[start..end])?),
                    span: start..end,
                });
                i = end;
            }
            b'.' if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                let end = number_end(bytes, i);
                out.push(Lexeme {
                    token: Token::Num(parse_number(&code[start..end])?),
                    span: start..end,
                });
                i = end;
            }
            c if c.is_ascii_alphabetic() || c == b'.' || c == b'_' => {
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.' || bytes[i] == b'_')
                {
                    i += 1;
                }
                out.push(Lexeme {
                    token: Token::Ident(code[start..i].to_string()),
                    span: start..i,
                });
            }
            _ => {
                let symbol = SYMBOLS
                    .iter()
                    .find(|s| code[i..].starts_with(**s))
                    .ok_or_else(|| {
                        let ch = code[i..].chars().next().unwrap_or('?');
                        format!("unexpected input '{ch}'")
                    })?;
                i += symbol.len();
                out.push(Lexeme {
                    token: Token::Sym(symbol),
                    span: start..i,
                });
            }
        }
    }
    Ok(out)
}

fn number_end(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    i
}

fn parse_number(text: &str) -> Result<f64, String> {
    text.parse().map_err(|_| format!("malformed number '{text}'"))
}

/// Returns the unescaped text and the byte offset after the closing quote.
fn lex_string(code: &str, start: usize) -> Result<(String, usize), String> {
    let mut chars = code[start..].char_indices();
    let quote = chars.next().map(|(_, c)| c).unwrap_or('"');
    let mut text = String::new();
    while let Some((offset, c)) = chars.next() {
        match c {
            c if c == quote => return Ok((text, start + offset + 1)),
            '\\' => match chars.next().map(|(_, c)| c) {
                Some('n') => text.push('\n'),
                Some('t') => text.push('\t'),
                Some(other) => text.push(other),
                None => break,
            },
            c => text.push(c),
        }
    }
    Err("unterminated string".into())
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// One top-level statement and the source text it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Source text including preceding comments and the trailing comment.
    pub source: String,
    /// `None` for comment-only text after the last statement.
    pub parsed: Option<Result<Expr, String>>,
}

/// Split a chunk into statements.
pub fn statements(code: &str) -> Result<Vec<Statement>, String> {
    let lexemes = lex(code)?;
    let mut groups: Vec<Vec<Lexeme>> = Vec::new();
    let mut current: Vec<Lexeme> = Vec::new();
    let mut depth = 0usize;

    for lexeme in lexemes {
        match &lexeme.token {
            Token::Sym("(") => depth += 1,
            Token::Sym(")") => depth = depth.saturating_sub(1),
            Token::Sym(";") if depth == 0 => {
                if !current.is_empty() {
                    groups.push(std::mem::take(&mut current));
                }
                continue;
            }
            Token::Newline => {
                let continues = depth > 0
                    || current
                        .last()
                        .is_some_and(|last| matches!(last.token, Token::Sym(s) if s != ")"));
                if !continues && !current.is_empty() {
                    groups.push(std::mem::take(&mut current));
                }
                continue;
            }
            _ => {}
        }
        current.push(lexeme);
    }
    if !current.is_empty() {
        groups.push(current);
    }

    let mut out = Vec::with_capacity(groups.len());
    let mut cursor = 0;
    for (i, group) in groups.iter().enumerate() {
        let first = group.first().map_or(cursor, |l| l.span.start);
        let last = group.last().map_or(cursor, |l| l.span.end);
        let line_end = code[last..].find('\n').map_or(code.len(), |n| last + n);
        let shares_line = groups
            .get(i + 1)
            .and_then(|next| next.first())
            .is_some_and(|next| next.span.start < line_end);
        let end = if shares_line { last } else { line_end };

        let start = if code[cursor..first].contains('\n') || cursor == 0 {
            cursor
        } else {
            first
        };
        let source = code[start..end].trim_start_matches(['\n', '\r', ';']);
        out.push(Statement {
            source: source.to_string(),
            parsed: Some(Parser::new(group).statement()),
        });
        cursor = end;
    }

    let rest = code[cursor..].trim_matches(['\n', '\r', ';', ' ']);
    if !rest.is_empty() {
        out.push(Statement {
            source: rest.to_string(),
            parsed: None,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'t> {
    lexemes: &'t [Lexeme],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(lexemes: &'t [Lexeme]) -> Self {
        Self { lexemes, pos: 0 }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.lexemes.get(self.pos).map(|l| &l.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&'t Token> {
        self.lexemes.get(self.pos + offset).map(|l| &l.token)
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn expect(&mut self, symbol: &str) -> Result<(), String> {
        match self.next() {
            Some(Token::Sym(s)) if *s == symbol => Ok(()),
            Some(other) => Err(format!("expected '{symbol}', found {}", describe(other))),
            None => Err(format!("expected '{symbol}' before end of input")),
        }
    }

    fn statement(mut self) -> Result<Expr, String> {
        let expr = match (self.peek(), self.peek_at(1)) {
            (Some(Token::Ident(name)), Some(Token::Sym("=" | "<-"))) => {
                self.pos += 2;
                Expr::Assign {
                    name: name.clone(),
                    value: Box::new(self.expr(0)?),
                }
            }
            _ => self.expr(0)?,
        };
        match self.peek() {
            None => Ok(expr),
            Some(token) => Err(format!("unexpected {}", describe(token))),
        }
    }

    fn expr(&mut self, min_power: u8) -> Result<Expr, String> {
        let mut lhs = self.prefix()?;
        loop {
            let op = match self.peek() {
                Some(Token::Sym(s)) => match BinOp::from_symbol(s) {
                    Some(op) => op,
                    None => break,
                },
                _ => break,
            };
            let (left, right) = op.binding_power();
            if left < min_power {
                break;
            }
            self.pos += 1;
            let rhs = self.expr(right)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Num(*n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s.clone())),
            Some(Token::Sym("-")) => Ok(Expr::Neg(Box::new(self.expr(NEG_POWER)?))),
            Some(Token::Sym("+")) => self.expr(NEG_POWER),
            Some(Token::Sym("!")) => Ok(Expr::Not(Box::new(self.expr(NOT_POWER)?))),
            Some(Token::Sym("(")) => {
                let inner = self.expr(0)?;
                self.expect(")")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "TRUE" => Ok(Expr::Bool(true)),
                "FALSE" => Ok(Expr::Bool(false)),
                "NULL" => Ok(Expr::Null),
                "Inf" => Ok(Expr::Num(f64::INFINITY)),
                _ if self.peek() == Some(&Token::Sym("(")) => {
                    self.pos += 1;
                    Ok(Expr::Call {
                        name: name.clone(),
                        args: self.args()?,
                    })
                }
                _ => Ok(Expr::Var(name.clone())),
            },
            Some(other) => Err(format!("unexpected {}", describe(other))),
            None => Err("unexpected end of input".into()),
        }
    }

    /// Arguments after the opening parenthesis, through the closing one.
    fn args(&mut self) -> Result<Vec<Arg>, String> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::Sym(")")) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            let name = match (self.peek(), self.peek_at(1)) {
                (Some(Token::Ident(name) | Token::Str(name)), Some(Token::Sym("="))) => {
                    self.pos += 2;
                    Some(name.clone())
                }
                _ => None,
            };
            args.push(Arg {
                name,
                value: self.expr(0)?,
            });
            match self.next() {
                Some(Token::Sym(",")) => continue,
                Some(Token::Sym(")")) => return Ok(args),
                Some(other) => return Err(format!("unexpected {} in call", describe(other))),
                None => return Err("unterminated call".into()),
            }
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Num(n) => format!("numeric constant {}", format_num(*n)),
        Token::Str(s) => format!("string constant {s:?}"),
        Token::Ident(name) => format!("symbol '{name}'"),
        Token::Sym(s) => format!("'{s}'"),
        Token::Newline => "end of line".into(),
    }
}
