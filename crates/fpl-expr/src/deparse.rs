use std::fmt;

use crate::{Arg, Expr, Function, Value};

/// Binding strength of an infix operator; higher binds tighter.
#[must_use]
pub fn binary_precedence(op: &str) -> Option<u8> {
    let precedence = match op {
        "~" => 1,
        "|" | "||" => 2,
        "&" | "&&" => 3,
        "==" | "!=" | ">" | ">=" | "<" | "<=" => 5,
        "+" | "-" => 6,
        "*" | "/" => 7,
        ":" => 9,
        "^" => 11,
        _ if op.len() >= 2 && op.starts_with('%') && op.ends_with('%') => 8,
        _ => return None,
    };
    Some(precedence)
}

const UNARY_PRECEDENCE: u8 = 10;
const NOT_PRECEDENCE: u8 = 4;

const RESERVED: [&str; 9] = [
    "TRUE", "FALSE", "NULL", "NA", "NaN", "Inf", "function", "if", "else",
];

/// True when `name` can be written without backticks.
#[must_use]
pub fn is_syntactic_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let starts_ok = first.is_alphabetic()
        || (first == '.' && !name[1..].starts_with(|c: char| c.is_ascii_digit()));
    starts_ok
        && chars.all(|c| c.is_alphanumeric() || c == '.' || c == '_')
        && !RESERVED.contains(&name)
}

fn write_name(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if is_syntactic_name(name) {
        f.write_str(name)
    } else {
        write!(f, "`{name}`")
    }
}

/// Precedence of `expr` when printed, `None` for atoms and prefix calls.
fn printed_precedence(expr: &Expr) -> Option<u8> {
    let (func, args) = expr.as_call()?;
    let op = func.as_symbol()?;
    match (op, args.len()) {
        ("-" | "+", 1) => Some(UNARY_PRECEDENCE),
        ("!", 1) => Some(NOT_PRECEDENCE),
        ("~", 1) => Some(1),
        (_, 2) if args.iter().all(|arg| arg.name.is_none()) => binary_precedence(op),
        _ => None,
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, min: u8) -> fmt::Result {
    match printed_precedence(expr) {
        Some(precedence) if precedence < min => write!(f, "({expr})"),
        _ => write!(f, "{expr}"),
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Arg]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        if let Some(name) = &arg.name {
            write_name(f, name)?;
            f.write_str(" = ")?;
        }
        write!(f, "{}", arg.value)?;
    }
    Ok(())
}

fn write_call(f: &mut fmt::Formatter<'_>, func: &Expr, args: &[Arg]) -> fmt::Result {
    let positional = args.iter().all(|arg| arg.name.is_none());
    if let (Some(op), true) = (func.as_symbol(), positional) {
        match (op, args) {
            ("$" | "::", [lhs, rhs]) => {
                write_operand(f, &lhs.value, u8::MAX)?;
                f.write_str(op)?;
                return match rhs.value.as_symbol() {
                    Some(name) => write_name(f, name),
                    None => write!(f, "{}", rhs.value),
                };
            }
            ("[[", [lhs, key]) => {
                write_operand(f, &lhs.value, u8::MAX)?;
                return write!(f, "[[{}]]", key.value);
            }
            ("function", [params, body]) => {
                if let Expr::Literal { value } = &params.value {
                    let names: Vec<String> = value
                        .elements()
                        .unwrap_or_default()
                        .iter()
                        .map(fpl_types::Scalar::to_text)
                        .collect();
                    return write!(f, "\\({}) {}", names.join(", "), body.value);
                }
            }
            ("-" | "+", [operand]) => {
                f.write_str(op)?;
                return write_operand(f, &operand.value, UNARY_PRECEDENCE);
            }
            ("!", [operand]) => {
                f.write_str("!")?;
                return write_operand(f, &operand.value, NOT_PRECEDENCE);
            }
            ("~", [operand]) => {
                f.write_str("~")?;
                return write_operand(f, &operand.value, 2);
            }
            (_, [lhs, rhs]) => {
                if let Some(precedence) = binary_precedence(op) {
                    // `^` is right associative; everything else is left associative
                    let (left_min, right_min) = if op == "^" {
                        (precedence + 1, precedence)
                    } else {
                        (precedence, precedence + 1)
                    };
                    write_operand(f, &lhs.value, left_min)?;
                    if matches!(op, "^" | ":") {
                        f.write_str(op)?;
                    } else {
                        write!(f, " {op} ")?;
                    }
                    return write_operand(f, &rhs.value, right_min);
                }
            }
            _ => {}
        }
    }

    match func {
        Expr::Symbol { name } => write_name(f, name)?,
        Expr::Call { .. } if func.is_call_to("::") || func.is_call_to("$") => write!(f, "{func}")?,
        Expr::Literal {
            value: Value::Function(Function::Builtin(builtin)),
        } => write_name(f, builtin.name())?,
        other => write!(f, "({other})")?,
    }
    f.write_str("(")?;
    write_args(f, args)?;
    f.write_str(")")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal { value } => write!(f, "{value}"),
            Self::Symbol { name } => write_name(f, name),
            Self::Call { func, args } => write_call(f, func, args),
            Self::Quoted(quosure) => write!(f, "{}", quosure.expr()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Scalar(value) => write!(f, "{value}"),
            Self::Vector(values) => {
                f.write_str("c(")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str(")")
            }
            Self::Function(function) => f.write_str(&function.label()),
        }
    }
}
