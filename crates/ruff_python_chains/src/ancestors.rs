//! Maps each node reachable from a module root to its ordered list of
//! enclosing nodes, root first.
//!
//! This is a thin, standalone pre-pass - not something the main walker
//! (`builder.rs`) consults, since the walker already carries its own
//! scope stack as it goes. `Ancestors` exists for callers that need a
//! general parent/ancestor query over the tree (for instance to rebuild a
//! scope-head list for `crate::annotation_lookup::lookup_annotation_name_defs`
//! from an arbitrary node without having re-run the analyzer), mirroring
//! the original's standalone `Ancestors` visitor.

use rustc_hash::FxHashMap;
use rustpython_ast::{self as ast, Expr, Stmt};

use crate::node_key::{node_key, NodeKey};

/// Ancestor chains for every statement/expression node visited from a
/// module root.
#[derive(Default)]
pub struct Ancestors {
    parents: FxHashMap<NodeKey, Vec<NodeKey>>,
}

impl Ancestors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visit_module(&mut self, module: &ast::ModModule) {
        let mut current = Vec::new();
        for stmt in &module.body {
            self.visit_stmt(stmt, &mut current);
        }
    }

    /// The immediate parent of `node`, if it was visited.
    pub fn parent(&self, node: NodeKey) -> Option<NodeKey> {
        self.parents.get(&node).and_then(|p| p.last().copied())
    }

    /// The full ancestor chain of `node`, root first, if it was visited.
    pub fn parents(&self, node: NodeKey) -> Option<&[NodeKey]> {
        self.parents.get(&node).map(Vec::as_slice)
    }

    fn record<T>(&mut self, node: &T, current: &mut Vec<NodeKey>) -> NodeKey {
        let key = node_key(node);
        self.parents.insert(key, current.clone());
        key
    }

    fn visit_stmt(&mut self, stmt: &Stmt, current: &mut Vec<NodeKey>) {
        let key = self.record(stmt, current);
        current.push(key);
        match stmt {
            Stmt::FunctionDef(s) => {
                self.visit_body(&s.body, current);
            }
            Stmt::AsyncFunctionDef(s) => {
                self.visit_body(&s.body, current);
            }
            Stmt::ClassDef(s) => {
                for base in &s.bases {
                    self.visit_expr(base, current);
                }
                self.visit_body(&s.body, current);
            }
            Stmt::Return(s) => {
                if let Some(value) = &s.value {
                    self.visit_expr(value, current);
                }
            }
            Stmt::Assign(s) => {
                self.visit_expr(&s.value, current);
                for target in &s.targets {
                    self.visit_expr(target, current);
                }
            }
            Stmt::AugAssign(s) => {
                self.visit_expr(&s.target, current);
                self.visit_expr(&s.value, current);
            }
            Stmt::AnnAssign(s) => {
                self.visit_expr(&s.target, current);
                self.visit_expr(&s.annotation, current);
                if let Some(value) = &s.value {
                    self.visit_expr(value, current);
                }
            }
            Stmt::For(s) => {
                self.visit_expr(&s.target, current);
                self.visit_expr(&s.iter, current);
                self.visit_body(&s.body, current);
                self.visit_body(&s.orelse, current);
            }
            Stmt::AsyncFor(s) => {
                self.visit_expr(&s.target, current);
                self.visit_expr(&s.iter, current);
                self.visit_body(&s.body, current);
                self.visit_body(&s.orelse, current);
            }
            Stmt::While(s) => {
                self.visit_expr(&s.test, current);
                self.visit_body(&s.body, current);
                self.visit_body(&s.orelse, current);
            }
            Stmt::If(s) => {
                self.visit_expr(&s.test, current);
                self.visit_body(&s.body, current);
                for clause in &s.elif_else_clauses {
                    if let Some(test) = &clause.test {
                        self.visit_expr(test, current);
                    }
                    self.visit_body(&clause.body, current);
                }
            }
            Stmt::With(s) => {
                for item in &s.items {
                    self.visit_expr(&item.context_expr, current);
                    if let Some(vars) = &item.optional_vars {
                        self.visit_expr(vars, current);
                    }
                }
                self.visit_body(&s.body, current);
            }
            Stmt::AsyncWith(s) => {
                for item in &s.items {
                    self.visit_expr(&item.context_expr, current);
                    if let Some(vars) = &item.optional_vars {
                        self.visit_expr(vars, current);
                    }
                }
                self.visit_body(&s.body, current);
            }
            Stmt::Raise(s) => {
                if let Some(exc) = &s.exc {
                    self.visit_expr(exc, current);
                }
                if let Some(cause) = &s.cause {
                    self.visit_expr(cause, current);
                }
            }
            Stmt::Try(s) | Stmt::TryStar(s) => {
                self.visit_body(&s.body, current);
                for handler in &s.handlers {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    if let Some(ty) = &handler.type_ {
                        self.visit_expr(ty, current);
                    }
                    self.visit_body(&handler.body, current);
                }
                self.visit_body(&s.orelse, current);
                self.visit_body(&s.finalbody, current);
            }
            Stmt::Assert(s) => {
                self.visit_expr(&s.test, current);
                if let Some(msg) = &s.msg {
                    self.visit_expr(msg, current);
                }
            }
            Stmt::Expr(s) => {
                self.visit_expr(&s.value, current);
            }
            Stmt::Delete(s) => {
                for target in &s.targets {
                    self.visit_expr(target, current);
                }
            }
            _ => {}
        }
        current.pop();
    }

    fn visit_body(&mut self, body: &[Stmt], current: &mut Vec<NodeKey>) {
        for stmt in body {
            self.visit_stmt(stmt, current);
        }
    }

    fn visit_expr(&mut self, expr: &Expr, current: &mut Vec<NodeKey>) {
        let key = self.record(expr, current);
        current.push(key);
        match expr {
            Expr::BoolOp(e) => {
                for value in &e.values {
                    self.visit_expr(value, current);
                }
            }
            Expr::NamedExpr(e) => {
                self.visit_expr(&e.target, current);
                self.visit_expr(&e.value, current);
            }
            Expr::BinOp(e) => {
                self.visit_expr(&e.left, current);
                self.visit_expr(&e.right, current);
            }
            Expr::UnaryOp(e) => self.visit_expr(&e.operand, current),
            Expr::IfExp(e) => {
                self.visit_expr(&e.test, current);
                self.visit_expr(&e.body, current);
                self.visit_expr(&e.orelse, current);
            }
            Expr::Dict(e) => {
                for key in e.keys.iter().flatten() {
                    self.visit_expr(key, current);
                }
                for value in &e.values {
                    self.visit_expr(value, current);
                }
            }
            Expr::Set(e) => {
                for elt in &e.elts {
                    self.visit_expr(elt, current);
                }
            }
            Expr::Compare(e) => {
                self.visit_expr(&e.left, current);
                for comparator in &e.comparators {
                    self.visit_expr(comparator, current);
                }
            }
            Expr::Call(e) => {
                self.visit_expr(&e.func, current);
                for arg in &e.args {
                    self.visit_expr(arg, current);
                }
                for kw in &e.keywords {
                    self.visit_expr(&kw.value, current);
                }
            }
            Expr::Attribute(e) => self.visit_expr(&e.value, current),
            Expr::Subscript(e) => {
                self.visit_expr(&e.value, current);
                self.visit_expr(&e.slice, current);
            }
            Expr::Starred(e) => self.visit_expr(&e.value, current),
            Expr::List(e) => {
                for elt in &e.elts {
                    self.visit_expr(elt, current);
                }
            }
            Expr::Tuple(e) => {
                for elt in &e.elts {
                    self.visit_expr(elt, current);
                }
            }
            Expr::Slice(e) => {
                if let Some(lower) = &e.lower {
                    self.visit_expr(lower, current);
                }
                if let Some(upper) = &e.upper {
                    self.visit_expr(upper, current);
                }
                if let Some(step) = &e.step {
                    self.visit_expr(step, current);
                }
            }
            _ => {}
        }
        current.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_module_has_no_ancestors() {
        let ancestors = Ancestors::new();
        assert!(ancestors.parents.is_empty());
    }
}
