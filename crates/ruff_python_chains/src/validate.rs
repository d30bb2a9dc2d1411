//! Rejects syntactic misuse that would otherwise corrupt the def-use
//! graph for an annotation-like or comprehension-iterable expression:
//! constructs that can appear in the grammar but have no sensible
//! meaning where they were found.
//!
//! Each validator reports the *first* violation it finds (there is no
//! value in enumerating every one - the caller downgrades to a single
//! warning diagnostic and skips further analysis of the offending
//! subtree, the producing `Def` still gets registered so chains stay
//! total).

use rustpython_ast::{self as ast, Expr};

/// Why a subtree was rejected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationError {
    /// A walrus (`:=`) where one is never meaningful: a comprehension's
    /// `iter` expression, or rebinding one of the comprehension's own
    /// iteration variables.
    Walrus,
    Yield,
    YieldFrom,
    Await,
    /// A nested scope-introducing expression inside a class-scope
    /// annotation body (list/set/dict comprehension, generator
    /// expression, lambda) - these would need their own enclosing-scope
    /// bookkeeping that a bare annotation body was never meant to carry.
    NestedScope,
}

/// Rejects a walrus anywhere in any generator's `iter` expression, and a
/// walrus whose target coincides with any of the comprehension's own
/// iteration variables (across all its generators, not just the one the
/// walrus appears in).
pub fn validate_comprehension(generators: &[ast::Comprehension]) -> Result<(), ValidationError> {
    for generator in generators {
        if contains_walrus(&generator.iter) {
            return Err(ValidationError::Walrus);
        }
    }

    let mut iteration_targets = Vec::new();
    for generator in generators {
        collect_store_names(&generator.target, &mut iteration_targets);
    }

    for generator in generators {
        if walrus_rebinds_any(&generator.iter, &iteration_targets) {
            return Err(ValidationError::Walrus);
        }
        for if_clause in &generator.ifs {
            if walrus_rebinds_any(if_clause, &iteration_targets) {
                return Err(ValidationError::Walrus);
            }
        }
    }

    Ok(())
}

/// Rejects walrus, `yield`, `yield from`, and `await` anywhere in an
/// annotation expression's subtree.
pub fn validate_annotation_body(expr: &Expr) -> Result<(), ValidationError> {
    walk_for(expr, &mut |e| match e {
        Expr::NamedExpr(_) => Some(ValidationError::Walrus),
        Expr::Yield(_) => Some(ValidationError::Yield),
        Expr::YieldFrom(_) => Some(ValidationError::YieldFrom),
        Expr::Await(_) => Some(ValidationError::Await),
        _ => None,
    })
}

/// As [`validate_annotation_body`], plus rejects nested scope-
/// introducing expressions: a class body's annotations cannot carry a
/// comprehension or lambda without its own enclosing-scope wiring, which
/// this analyzer does not build for class-scope annotations.
pub fn validate_annotation_body_within_class_scope(expr: &Expr) -> Result<(), ValidationError> {
    walk_for(expr, &mut |e| match e {
        Expr::NamedExpr(_) => Some(ValidationError::Walrus),
        Expr::Yield(_) => Some(ValidationError::Yield),
        Expr::YieldFrom(_) => Some(ValidationError::YieldFrom),
        Expr::Await(_) => Some(ValidationError::Await),
        Expr::ListComp(_) | Expr::SetComp(_) | Expr::DictComp(_) | Expr::GeneratorExp(_) | Expr::Lambda(_) => {
            Some(ValidationError::NestedScope)
        }
        _ => None,
    })
}

fn contains_walrus(expr: &Expr) -> bool {
    walk_for(expr, &mut |e| matches!(e, Expr::NamedExpr(_)).then_some(ValidationError::Walrus)).is_err()
}

fn walrus_rebinds_any(expr: &Expr, targets: &[String]) -> bool {
    let mut found = false;
    let _ = walk_for(expr, &mut |e| {
        if let Expr::NamedExpr(named) = e {
            if let Expr::Name(target) = &*named.target {
                if targets.iter().any(|t| t == target.id.as_str()) {
                    found = true;
                }
            }
        }
        None
    });
    found
}

fn collect_store_names(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Name(e) => out.push(e.id.as_str().to_owned()),
        Expr::Tuple(e) => {
            for elt in &e.elts {
                collect_store_names(elt, out);
            }
        }
        Expr::List(e) => {
            for elt in &e.elts {
                collect_store_names(elt, out);
            }
        }
        Expr::Starred(e) => collect_store_names(&e.value, out),
        _ => {}
    }
}

/// Generic pre-order subtree walk that stops at the first expression for
/// which `check` returns `Some`, surfacing it as an `Err`.
fn walk_for(
    expr: &Expr,
    check: &mut impl FnMut(&Expr) -> Option<ValidationError>,
) -> Result<(), ValidationError> {
    if let Some(error) = check(expr) {
        return Err(error);
    }
    match expr {
        Expr::BoolOp(e) => e.values.iter().try_for_each(|v| walk_for(v, check)),
        Expr::NamedExpr(e) => {
            walk_for(&e.target, check)?;
            walk_for(&e.value, check)
        }
        Expr::BinOp(e) => {
            walk_for(&e.left, check)?;
            walk_for(&e.right, check)
        }
        Expr::UnaryOp(e) => walk_for(&e.operand, check),
        Expr::Lambda(e) => walk_for(&e.body, check),
        Expr::IfExp(e) => {
            walk_for(&e.test, check)?;
            walk_for(&e.body, check)?;
            walk_for(&e.orelse, check)
        }
        Expr::Dict(e) => {
            e.keys.iter().flatten().try_for_each(|k| walk_for(k, check))?;
            e.values.iter().try_for_each(|v| walk_for(v, check))
        }
        Expr::Set(e) => e.elts.iter().try_for_each(|v| walk_for(v, check)),
        Expr::ListComp(e) => {
            walk_for(&e.elt, check)?;
            walk_comprehensions(&e.generators, check)
        }
        Expr::SetComp(e) => {
            walk_for(&e.elt, check)?;
            walk_comprehensions(&e.generators, check)
        }
        Expr::DictComp(e) => {
            walk_for(&e.key, check)?;
            walk_for(&e.value, check)?;
            walk_comprehensions(&e.generators, check)
        }
        Expr::GeneratorExp(e) => {
            walk_for(&e.elt, check)?;
            walk_comprehensions(&e.generators, check)
        }
        Expr::Await(e) => walk_for(&e.value, check),
        Expr::Yield(e) => e.value.as_deref().map_or(Ok(()), |v| walk_for(v, check)),
        Expr::YieldFrom(e) => walk_for(&e.value, check),
        Expr::Compare(e) => {
            walk_for(&e.left, check)?;
            e.comparators.iter().try_for_each(|v| walk_for(v, check))
        }
        Expr::Call(e) => {
            walk_for(&e.func, check)?;
            e.args.iter().try_for_each(|v| walk_for(v, check))?;
            e.keywords.iter().try_for_each(|kw| walk_for(&kw.value, check))
        }
        Expr::FormattedValue(e) => walk_for(&e.value, check),
        Expr::JoinedStr(e) => e.values.iter().try_for_each(|v| walk_for(v, check)),
        Expr::Attribute(e) => walk_for(&e.value, check),
        Expr::Subscript(e) => {
            walk_for(&e.value, check)?;
            walk_for(&e.slice, check)
        }
        Expr::Starred(e) => walk_for(&e.value, check),
        Expr::List(e) => e.elts.iter().try_for_each(|v| walk_for(v, check)),
        Expr::Tuple(e) => e.elts.iter().try_for_each(|v| walk_for(v, check)),
        Expr::Slice(e) => {
            e.lower.as_deref().map_or(Ok(()), |v| walk_for(v, check))?;
            e.upper.as_deref().map_or(Ok(()), |v| walk_for(v, check))?;
            e.step.as_deref().map_or(Ok(()), |v| walk_for(v, check))
        }
        Expr::Name(_) | Expr::Constant(_) => Ok(()),
        _ => Ok(()),
    }
}

fn walk_comprehensions(
    generators: &[ast::Comprehension],
    check: &mut impl FnMut(&Expr) -> Option<ValidationError>,
) -> Result<(), ValidationError> {
    for generator in generators {
        walk_for(&generator.iter, check)?;
        for if_clause in &generator.ifs {
            walk_for(if_clause, check)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_expr(source: &str) -> Expr {
        let parsed = rustpython_parser::parse(source, rustpython_parser::Mode::Expression, "<test>")
            .expect("valid expression");
        let ast::Mod::Expression(expression) = parsed.into_syntax() else {
            panic!("expected an expression");
        };
        *expression.body
    }

    #[test]
    fn walrus_rebinding_an_iteration_variable_is_rejected() {
        let Expr::ListComp(list_comp) = parse_expr("[y for x in (y := range(3))]") else {
            panic!("expected a list comprehension");
        };
        assert_eq!(
            validate_comprehension(&list_comp.generators),
            Err(ValidationError::Walrus)
        );
    }

    #[test]
    fn ordinary_comprehension_is_accepted() {
        let Expr::ListComp(list_comp) = parse_expr("[x for x in range(3) if x > 0]") else {
            panic!("expected a list comprehension");
        };
        assert_eq!(validate_comprehension(&list_comp.generators), Ok(()));
    }
}
