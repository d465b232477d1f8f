// Recursive-descent parser for the dplyr-flavoured surface syntax.
//
// Supports:
//   - Identifiers, including dotted names (`.data`, `na.rm`) and `backticked names`
//   - Numeric literals (integer and float), string literals ('...' or "...")
//   - TRUE, FALSE, NULL, NA, Inf, NaN
//   - Calls with optional argument names: f(x, na.rm = TRUE)
//   - Postfix access: pkg::f, .data$x, .env[["x"]]
//   - Operators: ~ | || & && ! == != > >= < <= + - * / %op% : ^
//   - Lambdas: \(x) body and function(x) body

use fpl_types::{NullKind, Scalar};
use thiserror::Error;

use crate::{Arg, Expr, Value};

const MAX_PARSE_DEPTH: usize = 256;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unterminated backtick name")]
    UnterminatedBacktick,
    #[error("invalid number literal: {0}")]
    InvalidNumber(String),
    #[error("unexpected token at position {pos}: {token}")]
    UnexpectedToken { pos: usize, token: String },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("expected {expected} at position {pos}")]
    Expected { expected: &'static str, pos: usize },
    #[error("expression nesting exceeds {0} levels")]
    TooDeep(usize),
}

/// Parse a single expression.
///
/// Syntax, lowest precedence first:
///   formula    → "~" or_expr | or_expr ( "~" or_expr )?
///   or_expr    → and_expr ( ("|" | "||") and_expr )*
///   and_expr   → not_expr ( ("&" | "&&") not_expr )*
///   not_expr   → "!" not_expr | comparison
///   comparison → add_expr ( ("==" | "!=" | ">" | ">=" | "<" | "<=") add_expr )?
///   add_expr   → mul_expr ( ("+" | "-") mul_expr )*
///   mul_expr   → special ( ("*" | "/") special )*
///   special    → range ( "%op%" range )*
///   range      → unary ( ":" unary )*
///   unary      → ("-" | "+") unary | power
///   power      → postfix ( "^" unary )?
///   postfix    → atom ( "(" args ")" | "$" name | "[[" expr "]]" | "::" name )*
///   atom       → NUMBER | STRING | CONSTANT | IDENT | "(" formula ")" | lambda
pub fn parse_expr(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(&tokens);
    let expr = parser.parse_formula()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse a comma-separated argument list such as `a = x, across(b, f)`.
pub fn parse_args(input: &str) -> Result<Vec<Arg>, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(&tokens);
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    let mut args = vec![parser.parse_arg()?];
    while parser.eat(&Token::Comma) {
        args.push(parser.parse_arg()?);
    }
    parser.expect_end()?;
    Ok(args)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Constant(Scalar),
    Null,
    Function,
    Backslash,
    // Comparison
    EqEq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Special(String),
    Colon,
    // Logical
    Amp,
    AmpAmp,
    Pipe,
    PipePipe,
    Bang,
    Tilde,
    // Access
    Dollar,
    ColonColon,
    LDoubleBracket,
    RDoubleBracket,
    // Grouping
    LParen,
    RParen,
    Comma,
    Assign,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Ident(name) => name.clone(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Str(v) => format!("{v:?}"),
            Self::Constant(v) => v.to_string(),
            Self::Special(op) => op.clone(),
            other => format!("{other:?}"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let peek = |at: usize| chars.get(at).copied();
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let (token, width) = match c {
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '*' => (Token::Star, 1),
            '/' => (Token::Slash, 1),
            '^' => (Token::Caret, 1),
            '~' => (Token::Tilde, 1),
            '$' => (Token::Dollar, 1),
            '\\' => (Token::Backslash, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            ',' => (Token::Comma, 1),
            '=' if peek(i + 1) == Some('=') => (Token::EqEq, 2),
            '=' => (Token::Assign, 1),
            '!' if peek(i + 1) == Some('=') => (Token::NotEq, 2),
            '!' => (Token::Bang, 1),
            '>' if peek(i + 1) == Some('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            '<' if peek(i + 1) == Some('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '&' if peek(i + 1) == Some('&') => (Token::AmpAmp, 2),
            '&' => (Token::Amp, 1),
            '|' if peek(i + 1) == Some('|') => (Token::PipePipe, 2),
            '|' => (Token::Pipe, 1),
            ':' if peek(i + 1) == Some(':') => (Token::ColonColon, 2),
            ':' => (Token::Colon, 1),
            '[' if peek(i + 1) == Some('[') => (Token::LDoubleBracket, 2),
            ']' if peek(i + 1) == Some(']') => (Token::RDoubleBracket, 2),
            '%' => {
                let end = (i + 1..chars.len())
                    .find(|&j| chars[j] == '%')
                    .ok_or(ParseError::UnexpectedChar { ch: c, offset: i })?;
                let op: String = chars[i..=end].iter().collect();
                (Token::Special(op), end + 1 - i)
            }
            '\'' | '"' => {
                let (text, width) = scan_string(&chars[i..], c)?;
                (Token::Str(text), width)
            }
            '`' => {
                let end = (i + 1..chars.len())
                    .find(|&j| chars[j] == '`')
                    .ok_or(ParseError::UnterminatedBacktick)?;
                let name: String = chars[i + 1..end].iter().collect();
                (Token::Ident(name), end + 1 - i)
            }
            _ if c.is_ascii_digit()
                || (c == '.' && peek(i + 1).is_some_and(|next| next.is_ascii_digit())) =>
            {
                let start = i;
                let mut end = i;
                while end < chars.len() && (chars[end].is_ascii_digit() || chars[end] == '.') {
                    end += 1;
                }
                // exponent: 1e5, 2.5E-3
                if end < chars.len()
                    && matches!(chars[end], 'e' | 'E')
                    && chars
                        .get(end + 1)
                        .is_some_and(|next| next.is_ascii_digit() || *next == '-' || *next == '+')
                {
                    end += 2;
                    while end < chars.len() && chars[end].is_ascii_digit() {
                        end += 1;
                    }
                }
                let num_str: String = chars[start..end].iter().collect();
                let mut width = end - start;
                // R integer suffix
                if chars.get(end) == Some(&'L') {
                    width += 1;
                }
                (number_token(&num_str)?, width)
            }
            _ if c.is_alphabetic() || c == '.' || c == '_' => {
                let start = i;
                let mut end = i;
                while end < chars.len()
                    && (chars[end].is_alphanumeric() || chars[end] == '.' || chars[end] == '_')
                {
                    end += 1;
                }
                let word: String = chars[start..end].iter().collect();
                let token = match word.as_str() {
                    "TRUE" => Token::Constant(Scalar::Bool(true)),
                    "FALSE" => Token::Constant(Scalar::Bool(false)),
                    "NA" => Token::Constant(Scalar::Null(NullKind::Na)),
                    "NaN" => Token::Constant(Scalar::Null(NullKind::NaN)),
                    "Inf" => Token::Constant(Scalar::Float64(f64::INFINITY)),
                    "NULL" => Token::Null,
                    "function" => Token::Function,
                    _ => Token::Ident(word),
                };
                (token, end - start)
            }
            _ => return Err(ParseError::UnexpectedChar { ch: c, offset: i }),
        };
        tokens.push(token);
        i += width;
    }
    Ok(tokens)
}

fn number_token(num_str: &str) -> Result<Token, ParseError> {
    if num_str.contains(['.', 'e', 'E']) {
        num_str
            .parse::<f64>()
            .map(Token::Float)
            .map_err(|_| ParseError::InvalidNumber(num_str.to_owned()))
    } else {
        num_str
            .parse::<i64>()
            .map(Token::Int)
            .map_err(|_| ParseError::InvalidNumber(num_str.to_owned()))
    }
}

/// Scan a quoted string starting at `chars[0]`; returns the text and the
/// number of characters consumed including both quotes.
fn scan_string(chars: &[char], quote: char) -> Result<(String, usize), ParseError> {
    let mut out = String::new();
    let mut i = 1;
    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((out, i + 1)),
            '\\' => {
                let escaped = *chars.get(i + 1).ok_or(ParseError::UnterminatedString)?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(ParseError::UnterminatedString)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, expected: &'static str) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(ParseError::Expected {
                expected,
                pos: self.pos,
            })
        }
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(ParseError::UnexpectedToken {
                pos: self.pos,
                token: token.describe(),
            }),
        }
    }

    fn binary(op: &str, left: Expr, right: Expr) -> Expr {
        Expr::call(op, vec![left, right])
    }

    fn parse_formula(&mut self) -> Result<Expr, ParseError> {
        self.depth += 1;
        if self.depth > MAX_PARSE_DEPTH {
            return Err(ParseError::TooDeep(MAX_PARSE_DEPTH));
        }
        let result = if self.eat(&Token::Tilde) {
            self.parse_or().map(|rhs| Expr::call("~", vec![rhs]))
        } else {
            self.parse_or().and_then(|lhs| {
                if self.eat(&Token::Tilde) {
                    let rhs = self.parse_or()?;
                    Ok(Self::binary("~", lhs, rhs))
                } else {
                    Ok(lhs)
                }
            })
        };
        self.depth -= 1;
        result
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        loop {
            let op = match self.peek() {
                Some(Token::Pipe) => "|",
                Some(Token::PipePipe) => "||",
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_and()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not()?;
        loop {
            let op = match self.peek() {
                Some(Token::Amp) => "&",
                Some(Token::AmpAmp) => "&&",
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_not()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        let mut negations = 0;
        while self.eat(&Token::Bang) {
            negations += 1;
        }
        let mut expr = self.parse_comparison()?;
        for _ in 0..negations {
            expr = Expr::call("!", vec![expr]);
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::EqEq) => "==",
            Some(Token::NotEq) => "!=",
            Some(Token::Gt) => ">",
            Some(Token::Ge) => ">=",
            Some(Token::Lt) => "<",
            Some(Token::Le) => "<=",
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_add()?;
        Ok(Self::binary(op, left, right))
    }

    fn parse_add(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => "+",
                Some(Token::Minus) => "-",
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_mul()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_special()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => "*",
                Some(Token::Slash) => "/",
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_special()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_special(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_range()?;
        while let Some(Token::Special(op)) = self.peek() {
            self.pos += 1;
            let right = self.parse_range()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_range(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        while self.eat(&Token::Colon) {
            let right = self.parse_unary()?;
            left = Self::binary(":", left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let mut ops = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Minus) => ops.push("-"),
                Some(Token::Plus) => ops.push("+"),
                _ => break,
            }
            self.pos += 1;
        }
        let mut expr = self.parse_power()?;
        for op in ops.into_iter().rev() {
            // fold negative numeric literals
            expr = match (op, expr) {
                ("-", Expr::Literal { value: Value::Scalar(Scalar::Int64(v)) }) => {
                    Expr::literal(Scalar::Int64(-v))
                }
                ("-", Expr::Literal { value: Value::Scalar(Scalar::Float64(v)) }) => {
                    Expr::literal(Scalar::Float64(-v))
                }
                (op, operand) => Expr::call(op, vec![operand]),
            };
        }
        Ok(expr)
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_postfix()?;
        if self.eat(&Token::Caret) {
            let exponent = self.parse_unary()?;
            return Ok(Self::binary("^", base, exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    self.pos += 1;
                    let args = self.parse_call_args()?;
                    expr = Expr::call_with(expr, args);
                }
                Some(Token::Dollar) => {
                    self.pos += 1;
                    let field = self.parse_name("field name after '$'")?;
                    expr = Self::binary("$", expr, Expr::symbol(field));
                }
                Some(Token::ColonColon) => {
                    self.pos += 1;
                    let name = self.parse_name("name after '::'")?;
                    expr = Self::binary("::", expr, Expr::symbol(name));
                }
                Some(Token::LDoubleBracket) => {
                    self.pos += 1;
                    let key = self.parse_formula()?;
                    self.expect(&Token::RDoubleBracket, "closing ']]'")?;
                    expr = Self::binary("[[", expr, key);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_name(&mut self, expected: &'static str) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Ident(name) | Token::Str(name)) => {
                self.pos += 1;
                Ok(name.clone())
            }
            _ => Err(ParseError::Expected {
                expected,
                pos: self.pos,
            }),
        }
    }

    /// Arguments after an opening paren, through the closing paren.
    fn parse_call_args(&mut self) -> Result<Vec<Arg>, ParseError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_arg()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen, "',' or ')'")?;
            return Ok(args);
        }
    }

    fn parse_arg(&mut self) -> Result<Arg, ParseError> {
        if let (Some(Token::Ident(name) | Token::Str(name)), Some(Token::Assign)) =
            (self.tokens.get(self.pos), self.tokens.get(self.pos + 1))
        {
            self.pos += 2;
            let value = self.parse_formula()?;
            return Ok(Arg::named(name.clone(), value));
        }
        Ok(Arg::positional(self.parse_formula()?))
    }

    fn parse_lambda(&mut self) -> Result<Expr, ParseError> {
        self.expect(&Token::LParen, "'(' after function keyword")?;
        let mut params = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                params.push(self.parse_name("parameter name")?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(&Token::RParen, "',' or ')' in parameter list")?;
                break;
            }
        }
        let body = self.parse_formula()?;
        Ok(Expr::call(
            "function",
            vec![Expr::literal(Value::strings(params)), body],
        ))
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        let Some(token) = self.peek() else {
            return Err(ParseError::UnexpectedEnd);
        };
        self.pos += 1;
        match token {
            Token::Int(n) => Ok(Expr::literal(Scalar::Int64(*n))),
            Token::Float(f) => Ok(Expr::literal(Scalar::Float64(*f))),
            Token::Str(s) => Ok(Expr::literal(Scalar::Utf8(s.clone()))),
            Token::Constant(value) => Ok(Expr::literal(value.clone())),
            Token::Null => Ok(Expr::literal(Value::Null)),
            Token::Ident(name) => Ok(Expr::symbol(name.clone())),
            Token::Function | Token::Backslash => self.parse_lambda(),
            Token::LParen => {
                let inner = self.parse_formula()?;
                self.expect(&Token::RParen, "closing ')'")?;
                Ok(inner)
            }
            other => Err(ParseError::UnexpectedToken {
                pos: self.pos - 1,
                token: other.describe(),
            }),
        }
    }
}
