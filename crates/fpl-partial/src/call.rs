// Shape predicates over call nodes.

use fpl_expr::{Arg, Expr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pronoun {
    Data,
    Env,
}

impl Pronoun {
    fn from_symbol(name: &str) -> Option<Self> {
        match name {
            ".data" => Some(Self::Data),
            ".env" => Some(Self::Env),
            _ => None,
        }
    }
}

/// `.data$x`, `.data[[k]]`, `.env$x` or `.env[[k]]`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PronounAccess<'e> {
    pub pronoun: Pronoun,
    pub op: &'e str,
    pub field: &'e Expr,
}

pub(crate) fn pronoun_access<'e>(func: &'e Expr, args: &'e [Arg]) -> Option<PronounAccess<'e>> {
    let op = func.as_symbol().filter(|op| matches!(*op, "$" | "[["))?;
    let [target, field] = args else {
        return None;
    };
    let pronoun = Pronoun::from_symbol(target.value.as_symbol()?)?;
    Some(PronounAccess {
        pronoun,
        op,
        field: &field.value,
    })
}

/// True when `expr` is itself a pronoun access, e.g. the head of `.data$f(x)`.
pub(crate) fn is_pronoun_access(expr: &Expr) -> bool {
    expr.as_call()
        .is_some_and(|(func, args)| pronoun_access(func, args).is_some())
}

/// `(namespace, name)` of an `ns::name` node.
pub(crate) fn namespaced(expr: &Expr) -> Option<(&str, &str)> {
    let (func, args) = expr.as_call()?;
    if func.as_symbol() != Some("::") {
        return None;
    }
    match args {
        [ns, name] => Some((ns.value.as_symbol()?, name.value.as_symbol()?)),
        _ => None,
    }
}

/// Operand of a unary `-x` or `!x`.
pub(crate) fn negated(expr: &Expr) -> Option<&Expr> {
    let (func, args) = expr.as_call()?;
    match (func.as_symbol()?, args) {
        ("-" | "!", [operand]) => Some(&operand.value),
        _ => None,
    }
}

/// Symbol head of a call, looking through quosures.
pub(crate) fn head_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Quoted(quosure) => head_name(quosure.expr()),
        _ => expr.as_call().and_then(|(func, _)| func.as_symbol()),
    }
}

#[cfg(test)]
mod tests {
    use fpl_expr::parse_expr;

    use super::{Pronoun, head_name, is_pronoun_access, namespaced, negated, pronoun_access};

    #[test]
    fn recognises_pronoun_access() {
        let expr = parse_expr(".data[[\"id\"]]").expect("parse");
        let (func, args) = expr.as_call().expect("call");
        let access = pronoun_access(func, args).expect("pronoun");
        assert_eq!(access.pronoun, Pronoun::Data);
        assert_eq!(access.op, "[[");

        let expr = parse_expr("other$id").expect("parse");
        let (func, args) = expr.as_call().expect("call");
        assert!(pronoun_access(func, args).is_none());

        let call = parse_expr(".env$f(1)").expect("parse");
        let (head, _) = call.as_call().expect("call");
        assert!(is_pronoun_access(head));
    }

    #[test]
    fn recognises_namespaces_and_negation() {
        let expr = parse_expr("dplyr::n").expect("parse");
        assert_eq!(namespaced(&expr), Some(("dplyr", "n")));
        assert!(negated(&parse_expr("-a").expect("parse")).is_some());
        assert!(negated(&parse_expr("a - b").expect("parse")).is_none());
        assert_eq!(head_name(&parse_expr("f(x)").expect("parse")), Some("f"));
    }
}
