//! Pre-scans a scope node for every name that will be bound *somewhere*
//! in it, ignoring nested scopes (functions/classes/lambdas/
//! comprehensions carry their own locals). Used for read-before-assign
//! detection: a read that finds no definition yet is only suspicious if
//! the name is slated to be bound later in the same scope.

use rustc_hash::FxHashSet;
use rustpython_ast::{self as ast, Expr, ExprContext, Stmt};

/// The set of names a scope will bind, plus the set declared `nonlocal`
/// within it (which are excluded from "local" status - they alias an
/// enclosing scope's binding instead).
#[derive(Default)]
struct Collector {
    locals: FxHashSet<String>,
    nonlocals: FxHashSet<String>,
}

impl Collector {
    fn bind(&mut self, name: &str) {
        if !self.nonlocals.contains(name) {
            self.locals.insert(name.to_owned());
        }
    }

    /// Walks `body`'s statements without descending into nested
    /// scope-introducing constructs, mirroring the non-recursive
    /// `generic_visit` pass the original performs over a scope's direct
    /// body.
    fn visit_body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::FunctionDef(s) => self.bind(s.name.as_str()),
            Stmt::AsyncFunctionDef(s) => self.bind(s.name.as_str()),
            Stmt::ClassDef(s) => self.bind(s.name.as_str()),
            Stmt::Global(s) => {
                self.nonlocals.extend(s.names.iter().map(|n| n.as_str().to_owned()));
            }
            Stmt::Nonlocal(s) => {
                self.nonlocals.extend(s.names.iter().map(|n| n.as_str().to_owned()));
            }
            Stmt::Import(s) => {
                for alias in &s.names {
                    let bound = alias.asname.as_ref().map_or_else(
                        || {
                            alias
                                .name
                                .as_str()
                                .split_once('.')
                                .map_or(alias.name.as_str(), |(head, _)| head)
                                .to_owned()
                        },
                        |asname| asname.as_str().to_owned(),
                    );
                    self.bind(&bound);
                }
            }
            Stmt::ImportFrom(s) => {
                for alias in &s.names {
                    let bound = alias
                        .asname
                        .as_ref()
                        .map_or_else(|| alias.name.as_str().to_owned(), |n| n.as_str().to_owned());
                    self.bind(&bound);
                }
            }
            Stmt::Assign(s) => {
                self.visit_expr(&s.value);
                for target in &s.targets {
                    self.visit_expr(target);
                }
            }
            Stmt::AugAssign(s) => {
                self.visit_expr(&s.target);
                self.visit_expr(&s.value);
            }
            Stmt::AnnAssign(s) => {
                self.visit_expr(&s.target);
                self.visit_expr(&s.annotation);
                if let Some(value) = &s.value {
                    self.visit_expr(value);
                }
            }
            Stmt::TypeAlias(s) => self.visit_expr(&s.name),
            Stmt::For(s) => {
                self.visit_expr(&s.target);
                self.visit_expr(&s.iter);
                self.visit_body(&s.body);
                self.visit_body(&s.orelse);
            }
            Stmt::AsyncFor(s) => {
                self.visit_expr(&s.target);
                self.visit_expr(&s.iter);
                self.visit_body(&s.body);
                self.visit_body(&s.orelse);
            }
            Stmt::While(s) => {
                self.visit_expr(&s.test);
                self.visit_body(&s.body);
                self.visit_body(&s.orelse);
            }
            Stmt::If(s) => {
                self.visit_expr(&s.test);
                self.visit_body(&s.body);
                for clause in &s.elif_else_clauses {
                    if let Some(test) = &clause.test {
                        self.visit_expr(test);
                    }
                    self.visit_body(&clause.body);
                }
            }
            Stmt::With(s) => {
                for item in &s.items {
                    self.visit_expr(&item.context_expr);
                    if let Some(vars) = &item.optional_vars {
                        self.visit_expr(vars);
                    }
                }
                self.visit_body(&s.body);
            }
            Stmt::AsyncWith(s) => {
                for item in &s.items {
                    self.visit_expr(&item.context_expr);
                    if let Some(vars) = &item.optional_vars {
                        self.visit_expr(vars);
                    }
                }
                self.visit_body(&s.body);
            }
            Stmt::Try(s) | Stmt::TryStar(s) => {
                self.visit_body(&s.body);
                for handler in &s.handlers {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    if let Some(ty) = &handler.type_ {
                        self.visit_expr(ty);
                    }
                    self.visit_body(&handler.body);
                }
                self.visit_body(&s.orelse);
                self.visit_body(&s.finalbody);
            }
            Stmt::Match(s) => {
                self.visit_expr(&s.subject);
                for case in &s.cases {
                    self.bind_pattern(&case.pattern);
                    if let Some(guard) = &case.guard {
                        self.visit_expr(guard);
                    }
                    self.visit_body(&case.body);
                }
            }
            Stmt::Raise(s) => {
                if let Some(exc) = &s.exc {
                    self.visit_expr(exc);
                }
                if let Some(cause) = &s.cause {
                    self.visit_expr(cause);
                }
            }
            Stmt::Assert(s) => {
                self.visit_expr(&s.test);
                if let Some(msg) = &s.msg {
                    self.visit_expr(msg);
                }
            }
            Stmt::Expr(s) => self.visit_expr(&s.value),
            Stmt::Delete(s) => {
                for target in &s.targets {
                    self.visit_expr(target);
                }
            }
            Stmt::Return(s) => {
                if let Some(value) = &s.value {
                    self.visit_expr(value);
                }
            }
            Stmt::Pass(_) | Stmt::Break(_) | Stmt::Continue(_) => {}
        }
    }

    /// Descends into an expression only as far as `Name` targets in
    /// `Store` context; comprehensions and lambdas carry their own
    /// scopes and must not contribute their internals as locals of the
    /// enclosing scope.
    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Name(e) => {
                if matches!(e.ctx, ExprContext::Store) {
                    self.bind(e.id.as_str());
                }
            }
            Expr::NamedExpr(e) => {
                // The walrus target itself is hoisted by the builder to
                // the first non-comprehension enclosing scope; from the
                // point of view of *this* pre-scan (run once per scope,
                // before hoisting is known) we still record it here so a
                // module/function-level walrus is recognized as a local.
                self.visit_expr(&e.target);
                self.visit_expr(&e.value);
            }
            Expr::Starred(e) => self.visit_expr(&e.value),
            Expr::List(e) => {
                for elt in &e.elts {
                    self.visit_expr(elt);
                }
            }
            Expr::Tuple(e) => {
                for elt in &e.elts {
                    self.visit_expr(elt);
                }
            }
            Expr::BoolOp(e) => {
                for value in &e.values {
                    self.visit_expr(value);
                }
            }
            Expr::BinOp(e) => {
                self.visit_expr(&e.left);
                self.visit_expr(&e.right);
            }
            Expr::UnaryOp(e) => self.visit_expr(&e.operand),
            Expr::IfExp(e) => {
                self.visit_expr(&e.test);
                self.visit_expr(&e.body);
                self.visit_expr(&e.orelse);
            }
            Expr::Dict(e) => {
                for key in e.keys.iter().flatten() {
                    self.visit_expr(key);
                }
                for value in &e.values {
                    self.visit_expr(value);
                }
            }
            Expr::Set(e) => {
                for elt in &e.elts {
                    self.visit_expr(elt);
                }
            }
            Expr::Compare(e) => {
                self.visit_expr(&e.left);
                for comparator in &e.comparators {
                    self.visit_expr(comparator);
                }
            }
            Expr::Call(e) => {
                self.visit_expr(&e.func);
                for arg in &e.args {
                    self.visit_expr(arg);
                }
                for kw in &e.keywords {
                    self.visit_expr(&kw.value);
                }
            }
            Expr::Attribute(e) => self.visit_expr(&e.value),
            Expr::Subscript(e) => {
                self.visit_expr(&e.value);
                self.visit_expr(&e.slice);
            }
            Expr::Slice(e) => {
                if let Some(lower) = &e.lower {
                    self.visit_expr(lower);
                }
                if let Some(upper) = &e.upper {
                    self.visit_expr(upper);
                }
                if let Some(step) = &e.step {
                    self.visit_expr(step);
                }
            }
            // Lambda bodies and comprehension internals carry their own
            // scope; do not descend (this is the whole point of the
            // "ignoring nested functions/classes/lambdas/comprehensions"
            // rule).
            Expr::Lambda(_)
            | Expr::ListComp(_)
            | Expr::SetComp(_)
            | Expr::DictComp(_)
            | Expr::GeneratorExp(_) => {}
            _ => {}
        }
    }

    fn bind_pattern(&mut self, pattern: &ast::Pattern) {
        match pattern {
            ast::Pattern::MatchValue(_) | ast::Pattern::MatchSingleton(_) => {}
            ast::Pattern::MatchSequence(p) => {
                for pat in &p.patterns {
                    self.bind_pattern(pat);
                }
            }
            ast::Pattern::MatchMapping(p) => {
                for pat in &p.patterns {
                    self.bind_pattern(pat);
                }
                if let Some(rest) = &p.rest {
                    self.bind(rest.as_str());
                }
            }
            ast::Pattern::MatchClass(p) => {
                for pat in &p.patterns {
                    self.bind_pattern(pat);
                }
                for pat in &p.kwd_patterns {
                    self.bind_pattern(pat);
                }
            }
            ast::Pattern::MatchStar(p) => {
                if let Some(name) = &p.name {
                    self.bind(name.as_str());
                }
            }
            ast::Pattern::MatchAs(p) => {
                if let Some(pat) = &p.pattern {
                    self.bind_pattern(pat);
                }
                if let Some(name) = &p.name {
                    self.bind(name.as_str());
                }
            }
            ast::Pattern::MatchOr(p) => {
                for pat in &p.patterns {
                    self.bind_pattern(pat);
                }
            }
        }
    }
}

/// Computes the set of identifiers local to a scope's direct body,
/// emulating what a call to `locals()` at the end of that scope would
/// see.
pub fn collect_locals(body: &[Stmt]) -> FxHashSet<String> {
    let mut collector = Collector::default();
    collector.visit_body(body);
    collector.locals
}

/// As [`collect_locals`], but for a synthetic type-parameter wrapper
/// scope: the type parameters themselves (`TypeVar`/`ParamSpec`/
/// `TypeVarTuple`) also introduce locals, on top of anything an ordinary
/// scope body would.
pub fn collect_locals_for_type_params(type_params: &[ast::TypeParam]) -> FxHashSet<String> {
    type_params
        .iter()
        .map(|param| {
            match param {
                ast::TypeParam::TypeVar(p) => p.name.as_str(),
                ast::TypeParam::ParamSpec(p) => p.name.as_str(),
                ast::TypeParam::TypeVarTuple(p) => p.name.as_str(),
            }
            .to_owned()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonlocal_declaration_excludes_the_name_from_locals() {
        let collector_locals = {
            let mut c = Collector::default();
            c.nonlocals.insert("x".to_owned());
            c.bind("x");
            c.locals
        };
        assert!(collector_locals.is_empty());
    }
}
