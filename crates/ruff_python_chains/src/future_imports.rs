//! Detects deferred-annotation mode by scanning the module prologue for
//! `from __future__ import ...` statements.

use rustc_hash::FxHashSet;
use rustpython_ast::{self as ast, Constant, Expr, Stmt};

/// Scans `module`'s body from the top, stopping at the first statement
/// that is neither a leading string-literal expression (a docstring or a
/// stray string constant) nor a `from __future__ import ...`.
///
/// Returns the set of names imported from `__future__`; the caller
/// enables deferred-annotation mode when `"annotations"` is among them.
pub fn collect_future_imports(module: &ast::ModModule) -> FxHashSet<String> {
    let mut names = FxHashSet::default();
    for stmt in &module.body {
        match stmt {
            Stmt::ImportFrom(import) => {
                let is_future = import.level.unwrap_or(0) == 0
                    && import.module.as_deref().map(|m| m.as_str()) == Some("__future__");
                if !is_future {
                    break;
                }
                for alias in &import.names {
                    names.insert(alias.name.as_str().to_owned());
                }
            }
            Stmt::Expr(expr_stmt) => {
                let is_string_constant = matches!(
                    &*expr_stmt.value,
                    Expr::Constant(c) if matches!(c.value, Constant::Str(_))
                );
                if !is_string_constant {
                    break;
                }
            }
            _ => break,
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn future_names(source: &str) -> FxHashSet<String> {
        let parsed = rustpython_parser::parse(
            source,
            rustpython_parser::Mode::Module,
            "<test>",
        )
        .expect("valid module source");
        let ast::Mod::Module(module) = parsed.into_syntax() else {
            panic!("expected a module");
        };
        collect_future_imports(&module)
    }

    #[test]
    fn finds_annotations_after_a_docstring() {
        let names = future_names("\"\"\"doc\"\"\"\nfrom __future__ import annotations\nx = 1\n");
        assert!(names.contains("annotations"));
    }

    #[test]
    fn stops_at_the_first_non_prologue_statement() {
        let names = future_names("x = 1\nfrom __future__ import annotations\n");
        assert!(!names.contains("annotations"));
    }
}
