//! The main tree walk: turns a module's statements and expressions into
//! `Def`s and the edges between them, using `scope.rs`'s frame machinery
//! for merges and `annotation_lookup.rs` for deferred-annotation reads.
//!
//! Two things don't happen inline as the tree is walked depth-first:
//! function/lambda bodies, and (in deferred-annotation mode) annotation
//! expressions. Both are queued here and drained after the module body
//! finishes, each against a snapshot of the scope chain captured at the
//! point they were deferred - not whatever the chain holds once draining
//! starts.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use rustpython_ast::{self as ast, Expr, ExprContext, Stmt, TextRange};

use crate::annotation_lookup::{self, AnnotationLookupResult};
use crate::builtins;
use crate::def::{Def, DefArena, DefId};
use crate::diagnostic::{ChainsError, Diagnostic};
use crate::future_imports::collect_future_imports;
use crate::import_resolution::{self, ImportInfo};
use crate::locals;
use crate::name::Name;
use crate::node_key::{node_key, NodeKey};
use crate::ordered_set::OrderedSet;
use crate::scope::{Scope, ScopeKind, ScopeStack, WILDCARD_BINDING};
use crate::validate;

/// A function or lambda body whose resolution is postponed until after
/// the rest of the module has been walked, so mutual recursion and
/// forward references within a scope resolve correctly.
enum DeferredBody<'a> {
    Function {
        dnode: DefId,
        args: &'a ast::Arguments,
        body: &'a [Stmt],
        scopes_snapshot: Vec<Scope>,
    },
    Lambda {
        dnode: DefId,
        args: &'a ast::Arguments,
        body: &'a Expr,
        scopes_snapshot: Vec<Scope>,
    },
}

/// An annotation-like expression (a variable/parameter/return annotation,
/// or - in stub mode - a decorator, base class, keyword argument, type
/// alias value, or `TypeVar()` bound) resolved with `annotation_lookup`
/// rules once the rest of the module is known.
struct DeferredAnnotation<'a> {
    expr: &'a Expr,
    scopes_snapshot: Vec<Scope>,
    owner: DefId,
}

/// One buffered read inside a loop body: nothing was bound for this name
/// on the first pass, but it might be by a later statement in the same
/// loop body (a back-edge from the next iteration). If so, `placeholder`
/// is retargeted to the real definition once that's known; otherwise the
/// read genuinely never resolves and an unbound-identifier diagnostic is
/// emitted once the loop body finishes.
struct UndefEntry {
    placeholder: DefId,
    stars: OrderedSet<DefId>,
    range: Option<TextRange>,
}

/// What a name lookup against the live scope chain found.
enum LookupOutcome {
    Found(OrderedSet<DefId>),
    NotFound { stars: OrderedSet<DefId> },
}

pub(crate) struct Builder<'a> {
    scopes: ScopeStack,
    arena: DefArena,
    chains: FxHashMap<NodeKey, DefId>,
    locals_by_scope: FxHashMap<NodeKey, Vec<DefId>>,
    imports: FxHashMap<NodeKey, ImportInfo>,
    diagnostics: Vec<Diagnostic>,
    builtin_defs: FxHashMap<&'static str, DefId>,
    module_name: String,
    is_package: bool,
    is_stub: bool,
    deferred_annotation_mode: bool,
    annotation_mode: bool,
    deferred_bodies: VecDeque<DeferredBody<'a>>,
    deferred_annotations: Vec<DeferredAnnotation<'a>>,
    loop_undefs: Vec<FxHashMap<Name, Vec<UndefEntry>>>,
    synthetic_counter: u32,
}

/// Output of a completed analysis, before `lib.rs` wraps it in its public
/// surface.
pub(crate) struct BuildOutput {
    pub(crate) arena: DefArena,
    pub(crate) chains: FxHashMap<NodeKey, DefId>,
    pub(crate) locals: FxHashMap<NodeKey, Vec<DefId>>,
    pub(crate) imports: FxHashMap<NodeKey, ImportInfo>,
    pub(crate) diagnostics: Vec<Diagnostic>,
}

impl<'a> Builder<'a> {
    pub(crate) fn new(module_name: String, is_package: bool, is_stub: bool, future_annotations: bool) -> Self {
        Self {
            scopes: ScopeStack::new(),
            arena: DefArena::new(),
            chains: FxHashMap::default(),
            locals_by_scope: FxHashMap::default(),
            imports: FxHashMap::default(),
            diagnostics: Vec::new(),
            builtin_defs: FxHashMap::default(),
            module_name,
            is_package,
            is_stub,
            deferred_annotation_mode: is_stub || future_annotations,
            annotation_mode: false,
            deferred_bodies: VecDeque::new(),
            deferred_annotations: Vec::new(),
            loop_undefs: Vec::new(),
            synthetic_counter: 0,
        }
    }

    pub(crate) fn build(mut self, module: &'a ast::ModModule) -> BuildOutput {
        let future_names = collect_future_imports(module);
        if future_names.contains("annotations") {
            self.deferred_annotation_mode = true;
        }

        let precomputed = locals::collect_locals(&module.body);
        self.scopes.enter_scope(ScopeKind::Module, NodeKey::Synthetic(0), precomputed);

        self.process_body(&module.body);
        self.drain_deferred_bodies();
        self.drain_deferred_annotations();

        let scope = self.scopes.exit_scope();
        self.finalize_scope_locals(&scope);

        BuildOutput {
            arena: self.arena,
            chains: self.chains,
            locals: self.locals_by_scope,
            imports: self.imports,
            diagnostics: self.diagnostics,
        }
    }

    // ---- def/diagnostic plumbing -----------------------------------

    fn new_def(&mut self, key: NodeKey, name: Name) -> DefId {
        let id = self.arena.push(Def::new(key, name));
        self.chains.insert(key, id);
        id
    }

    fn builtin_def(&mut self, name: &str) -> DefId {
        if let Some(&id) = self.builtin_defs.get(name) {
            return id;
        }
        // Leaked once per process-distinct builtin name so the table can
        // hand out `&'static str` keys without re-allocating; the set of
        // builtin names is small and fixed.
        let static_name: &'static str = builtins::BUILTIN_NAMES
            .iter()
            .find(|&&candidate| candidate == name)
            .copied()
            .unwrap_or("");
        let id = self.arena.push(Def::new(NodeKey::Builtin(static_name), Name::new(name.to_owned())));
        self.builtin_defs.insert(static_name, id);
        id
    }

    fn finalize_scope_locals(&mut self, scope: &Scope) {
        let mut defs: Vec<DefId> = scope.bindings().flat_map(|(_, set)| set.iter().copied()).collect();
        defs.sort_by_key(|&id| {
            let def = self.arena.get(id);
            (def.name().as_str().to_owned(), id)
        });
        defs.dedup();
        self.locals_by_scope.insert(scope.node(), defs);
    }

    // ---- name binding / lookup ---------------------------------------

    /// Installs `defs` for `name`: routed to a `nonlocal`-resolved
    /// ancestor scope, a `global`-redirected module scope, or the current
    /// scope's own frame, in that priority order.
    fn bind_name(&mut self, name: &Name, defs: OrderedSet<DefId>) {
        if let Some(levels_up) = self.scopes.current().nonlocal_target(name) {
            self.scopes.set_definition_in_ancestor(levels_up, name, defs, &mut self.arena);
        } else if self.scopes.current().is_redirected_to_global(name) {
            self.scopes.extend_global(name, &defs);
        } else {
            self.scopes.set_definition(name, defs, &mut self.arena);
        }
    }

    /// Ordinary closure lookup: current scope first, then each enclosing
    /// scope outward, skipping class scopes once we're no longer looking
    /// at the direct (innermost) one. If any scope on the stack has
    /// redirected `name` to the module scope via `global`, resolution
    /// jumps straight to the module scope instead.
    fn lookup_name(&self, name: &Name) -> LookupOutcome {
        if self.scopes.any_scope_declares_global(name) {
            return match self.scopes.module_scope().lookup(name) {
                Some(defs) if !defs.is_empty() => LookupOutcome::Found(defs.clone()),
                _ => LookupOutcome::NotFound { stars: OrderedSet::new() },
            };
        }

        let mut stars = OrderedSet::new();
        for (i, scope) in self.scopes.enclosing_scopes().enumerate() {
            if i > 0 && scope.kind() == ScopeKind::Class {
                continue;
            }
            if let Some(defs) = scope.lookup(name) {
                let live: OrderedSet<DefId> =
                    defs.iter().copied().filter(|&id| self.arena.get(id).is_live()).collect();
                if !live.is_empty() {
                    return LookupOutcome::Found(live);
                }
            }
            if let Some(wildcard) = scope.lookup(&Name::new_static(WILDCARD_BINDING)) {
                stars.extend_from(wildcard);
            }
        }
        LookupOutcome::NotFound { stars }
    }

    fn loop_undefs_active(&self) -> bool {
        !self.loop_undefs.is_empty()
    }

    fn buffer_undef(&mut self, name: Name, placeholder: DefId, stars: OrderedSet<DefId>, range: Option<TextRange>) {
        if let Some(top) = self.loop_undefs.last_mut() {
            top.entry(name).or_default().push(UndefEntry { placeholder, stars, range });
        }
    }

    /// Resolves every buffered read in the innermost loop-undef level
    /// against the current scope's bindings, now that a full pass over
    /// the loop body has run: a name still unresolved after that truly
    /// never gets bound by the loop, and is reported as unbound.
    fn drain_loop_undefs(&mut self) {
        let Some(level) = self.loop_undefs.pop() else { return };
        for (name, entries) in level {
            let resolved = self.scopes.current().lookup(&name).cloned();
            for entry in entries {
                match &resolved {
                    Some(defs) if !defs.is_empty() => {
                        for d in defs.iter().copied() {
                            self.arena.add_user(d, entry.placeholder);
                        }
                    }
                    _ => {
                        if !entry.stars.is_empty() {
                            for d in entry.stars.iter().copied() {
                                self.arena.add_user(d, entry.placeholder);
                            }
                        } else {
                            self.diagnostics.push(Diagnostic::unbound_identifier(&name, entry.range));
                        }
                    }
                }
            }
        }
    }

    // ---- dead code / statement lists ---------------------------------

    /// Visits `body` in order, tracking the dead-code counter: the first
    /// `break`/`continue`/`raise`/`return` in the list marks everything
    /// after it (in this same list) unreachable, so writes there don't
    /// kill anything a live path still depends on.
    fn process_body(&mut self, body: &'a [Stmt]) {
        let mut entered_dead_code = false;
        for stmt in body {
            self.visit_stmt(stmt);
            if !entered_dead_code && Self::ends_control_flow(stmt) {
                self.scopes.enter_dead_code();
                entered_dead_code = true;
            }
        }
        if entered_dead_code {
            self.scopes.exit_dead_code();
        }
    }

    fn ends_control_flow(stmt: &Stmt) -> bool {
        matches!(stmt, Stmt::Break(_) | Stmt::Continue(_) | Stmt::Raise(_) | Stmt::Return(_))
    }

    // ---- statements ----------------------------------------------------

    fn visit_stmt(&mut self, stmt: &'a Stmt) {
        match stmt {
            Stmt::Expr(s) => {
                self.visit_expr(&s.value);
            }
            Stmt::Pass(_) => {}
            Stmt::Break(_) => self.visit_break(),
            Stmt::Continue(_) => self.visit_continue(),
            Stmt::Return(s) => {
                if let Some(value) = &s.value {
                    self.visit_expr(value);
                }
            }
            Stmt::Assign(s) => self.visit_assign(s),
            Stmt::AugAssign(s) => self.visit_aug_assign(s),
            Stmt::AnnAssign(s) => self.visit_ann_assign(s),
            Stmt::TypeAlias(s) => self.visit_type_alias(s),
            Stmt::Delete(s) => {
                for target in &s.targets {
                    self.visit_expr(target);
                }
            }
            Stmt::Assert(s) => {
                self.visit_expr(&s.test);
                if let Some(msg) = &s.msg {
                    self.visit_expr(msg);
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
            Stmt::Global(s) => {
                for raw in &s.names {
                    self.scopes.current_mut().declare_global(Name::new(raw.as_str()));
                }
            }
            Stmt::Nonlocal(s) => self.visit_nonlocal(s),
            Stmt::Import(s) => self.visit_import(stmt, &s.names),
            Stmt::ImportFrom(s) => self.visit_import(stmt, &s.names),
            Stmt::If(s) => self.visit_if_chain(&s.test, &s.body, &s.elif_else_clauses),
            Stmt::While(s) => self.visit_while(s),
            Stmt::For(s) => self.visit_for(&s.target, &s.iter, &s.body, &s.orelse),
            Stmt::AsyncFor(s) => self.visit_for(&s.target, &s.iter, &s.body, &s.orelse),
            Stmt::With(s) => self.visit_with(&s.items, &s.body),
            Stmt::AsyncWith(s) => self.visit_with(&s.items, &s.body),
            Stmt::Try(s) | Stmt::TryStar(s) => self.visit_try(s),
            Stmt::Match(s) => self.visit_match(s),
            Stmt::FunctionDef(s) => self.visit_function_declaration(
                node_key(s),
                s.name.as_str(),
                &s.args,
                &s.decorator_list,
                s.returns.as_deref(),
                &s.type_params,
                &s.body,
            ),
            Stmt::AsyncFunctionDef(s) => self.visit_function_declaration(
                node_key(s),
                s.name.as_str(),
                &s.args,
                &s.decorator_list,
                s.returns.as_deref(),
                &s.type_params,
                &s.body,
            ),
            Stmt::ClassDef(s) => self.visit_class(s),
        }
    }

    fn visit_break(&mut self) {
        if self.scopes.current().is_dead_code() {
            return;
        }
        let taken = self.scopes.take_current_frame_definitions();
        for (name, defs) in &taken {
            self.scopes.accumulate_break(name, defs);
        }
    }

    fn visit_continue(&mut self) {
        if self.scopes.current().is_dead_code() {
            return;
        }
        let taken = self.scopes.take_current_frame_definitions();
        for (name, defs) in &taken {
            self.scopes.accumulate_continue(name, defs);
        }
    }

    fn visit_assign(&mut self, s: &'a ast::StmtAssign) {
        self.visit_expr(&s.value);
        for target in &s.targets {
            self.visit_expr(target);
        }
    }

    fn visit_aug_assign(&mut self, s: &'a ast::StmtAugAssign) {
        let value_def = self.visit_expr(&s.value);

        // The target `Name` node carries `ExprContext::Store`, so visiting
        // it normally would bind a fresh Def instead of reading the prior
        // one. Resolve the read ourselves - as if the target's ctx were
        // `Load` - onto a single Def that then becomes the new binding,
        // so the prior definition of the name gains this augassign as a
        // user and `chains[target]` holds exactly one Def for the node.
        if let Expr::Name(name_expr) = &*s.target {
            let name = Name::new(name_expr.id.as_str());
            let target_def = self.new_def(node_key(&*s.target), name.clone());
            self.resolve_name_read(&name, target_def, Some(name_expr.range));
            self.arena.add_user(value_def, target_def);
            self.bind_name(&name, OrderedSet::single(target_def));
        } else {
            let target_def = self.visit_expr(&s.target);
            self.arena.add_user(value_def, target_def);
        }
    }

    fn visit_ann_assign(&mut self, s: &'a ast::StmtAnnAssign) {
        let target_def = self.visit_expr(&s.target);

        let in_class_scope = self.scopes.current().kind() == ScopeKind::Class;
        self.defer_or_visit_annotation(&s.annotation, target_def, in_class_scope);

        if let Some(value) = &s.value {
            let value_def = self.visit_expr(value);
            self.arena.add_user(value_def, target_def);
        }
    }

    fn visit_type_alias(&mut self, s: &'a ast::StmtTypeAlias) {
        let Expr::Name(name_expr) = &*s.name else { return };
        let name = Name::new(name_expr.id.as_str());
        let dnode = self.new_def(node_key(s), name.clone());

        if s.type_params.is_empty() {
            self.bind_name(&name, OrderedSet::single(dnode));
            let snapshot = self.scopes.snapshot_scopes();
            self.deferred_annotations.push(DeferredAnnotation {
                expr: &s.value,
                scopes_snapshot: snapshot,
                owner: dnode,
            });
        } else {
            let precomputed = locals::collect_locals_for_type_params(&s.type_params);
            self.scopes.enter_scope(ScopeKind::TypeParams, node_key(s), precomputed);
            self.visit_type_params(&s.type_params);
            self.install_payload_name_outside_wrapper(&name, dnode);
            let snapshot = self.scopes.snapshot_scopes();
            self.deferred_annotations.push(DeferredAnnotation {
                expr: &s.value,
                scopes_snapshot: snapshot,
                owner: dnode,
            });
            let wrapper = self.scopes.exit_scope();
            self.finalize_scope_locals(&wrapper);
        }
    }

    fn visit_nonlocal(&mut self, s: &'a ast::StmtNonlocal) {
        for raw_name in &s.names {
            let name = Name::new(raw_name.as_str());
            let depth = self.scopes.depth();
            let mut levels_up = 1;
            let mut found = None;
            while levels_up < depth {
                let kind = self.scopes.scope_at(levels_up).kind();
                if kind == ScopeKind::Class {
                    levels_up += 1;
                    continue;
                }
                if kind == ScopeKind::TypeParams {
                    self.diagnostics.push(Diagnostic::nonlocal_annotation_scope(Some(s.range)));
                    levels_up += 1;
                    continue;
                }
                if self.scopes.scope_at(levels_up).lookup(&name).is_some() {
                    found = Some(levels_up);
                    break;
                }
                levels_up += 1;
            }
            match found {
                Some(levels_up) => {
                    self.scopes.current_mut().declare_nonlocal_target(name, levels_up);
                }
                None => {
                    self.diagnostics.push(Diagnostic::unbound_identifier(&name, Some(s.range)));
                }
            }
        }
    }

    fn visit_import(&mut self, stmt: &'a Stmt, aliases: &'a [ast::Alias]) {
        let resolved = match import_resolution::parse_import(stmt, &self.module_name, self.is_package) {
            Ok(resolved) => resolved,
            Err(ChainsError::UnsupportedImportNode { .. }) => return,
        };
        for alias in aliases {
            let bound = import_resolution::bound_name(stmt, alias);
            let name = Name::new(bound);
            let def = self.new_def(node_key(alias), name.clone());
            if let Some(info) = resolved.get(&node_key(alias)) {
                self.imports.insert(node_key(alias), info.clone());
            }
            if alias.name.as_str() == import_resolution::WILDCARD {
                self.bind_name(&Name::new_static(WILDCARD_BINDING), OrderedSet::single(def));
            } else {
                self.bind_name(&name, OrderedSet::single(def));
            }
        }
    }

    /// Replicates rustpython-ast's flat `if`/`elif`/`else` representation
    /// (`elif_else_clauses: Vec<ElifElseClause>`) as the nested binary
    /// if/else merge the rest of this analysis is built around: visit the
    /// first clause's test/body, then recurse on the remaining clauses as
    /// if they were a single nested `if` in the `orelse` position.
    fn visit_if_chain(&mut self, test: &'a Expr, body: &'a [Stmt], rest: &'a [ast::ElifElseClause]) {
        self.visit_expr(test);

        self.scopes.enter_branch();
        self.process_body(body);
        let then_defs = self.scopes.exit_branch();

        self.scopes.enter_branch();
        match rest.split_first() {
            Some((clause, tail)) => match &clause.test {
                Some(next_test) => self.visit_if_chain(next_test, &clause.body, tail),
                None => self.process_body(&clause.body),
            },
            None => {}
        }
        let else_defs = self.scopes.exit_branch();

        self.merge_if_else(then_defs, else_defs);
    }

    /// The if/else merge rule: a name bound in both arms is replaced by
    /// the union of both arms' bindings (the old definition no longer
    /// reaches past the `if`, unless one arm re-selected it); a name
    /// bound in only one arm is unioned into the enclosing frame instead,
    /// since the other path leaves whatever was already there live.
    fn merge_if_else(
        &mut self,
        mut then_defs: FxHashMap<Name, OrderedSet<DefId>>,
        mut else_defs: FxHashMap<Name, OrderedSet<DefId>>,
    ) {
        let mut names: Vec<Name> = then_defs.keys().cloned().collect();
        for name in else_defs.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        for name in names {
            let then_set = then_defs.remove(&name);
            let else_set = else_defs.remove(&name);
            match (then_set, else_set) {
                (Some(mut then_set), Some(else_set)) => {
                    then_set.extend_from(&else_set);
                    self.scopes.set_definition(&name, then_set, &mut self.arena);
                }
                (Some(only), None) | (None, Some(only)) => {
                    self.scopes.extend_definition(&name, &only);
                }
                (None, None) => {}
            }
        }
    }

    /// `while`/`for` bodies are visited twice rather than to a fixed
    /// point: a back-edge means a name bound partway through the body can
    /// feed the *next* iteration's reads, which a single forward pass
    /// can't see, but a second pass (seeded with everything the first
    /// pass proved reachable) captures exactly that without an unbounded
    /// iterate-to-convergence loop.
    fn visit_while(&mut self, s: &'a ast::StmtWhile) {
        self.scopes.push_break_accumulator();
        self.scopes.push_continue_accumulator();
        self.loop_undefs.push(FxHashMap::default());

        // Speculative, discarded pass over `orelse`: seeds the same
        // break/continue/undef bookkeeping the real loop uses, without
        // letting its bindings escape - matches the original visiting
        // `orelse` once before the loop header is even visited.
        self.scopes.enter_branch();
        self.process_body(&s.orelse);
        self.scopes.exit_branch();

        self.scopes.enter_branch();
        self.visit_expr(&s.test);
        self.process_body(&s.body);
        self.drain_loop_undefs();
        let continue_defs = self.scopes.pop_continue_accumulator();
        for (name, defs) in &continue_defs {
            self.scopes.extend_definition(name, defs);
        }
        self.scopes.push_continue_accumulator();

        self.loop_undefs.push(FxHashMap::default());
        self.visit_expr(&s.test);
        self.process_body(&s.body);
        self.drain_loop_undefs();

        // The false-branch evaluation of the condition, then `orelse` for
        // real - nested inside the body branch frame so it sees whatever
        // the loop body proved reachable.
        self.visit_expr(&s.test);
        self.scopes.enter_branch();
        self.process_body(&s.orelse);
        let orelse_defs = self.scopes.exit_branch();

        let body_defs = self.scopes.exit_branch();
        let break_defs = self.scopes.pop_break_accumulator();
        let pass_two_continue_defs = self.scopes.pop_continue_accumulator();

        for (name, defs) in &pass_two_continue_defs {
            self.scopes.extend_definition(name, defs);
        }
        for (name, defs) in &break_defs {
            self.scopes.extend_definition(name, defs);
        }
        for (name, defs) in &orelse_defs {
            self.scopes.extend_definition(name, defs);
        }
        for (name, defs) in &body_defs {
            self.scopes.extend_definition(name, defs);
        }
    }

    fn visit_for(&mut self, target: &'a Expr, iter: &'a Expr, body: &'a [Stmt], orelse: &'a [Stmt]) {
        let iter_def = self.visit_expr(iter);

        self.scopes.push_break_accumulator();
        self.scopes.push_continue_accumulator();
        self.loop_undefs.push(FxHashMap::default());

        self.scopes.enter_branch();
        let target_def = self.visit_expr(target);
        self.arena.add_user(iter_def, target_def);
        self.process_body(body);
        self.drain_loop_undefs();
        let continue_defs = self.scopes.pop_continue_accumulator();
        for (name, defs) in &continue_defs {
            self.scopes.extend_definition(name, defs);
        }
        self.scopes.push_continue_accumulator();

        self.loop_undefs.push(FxHashMap::default());
        self.visit_expr(target);
        self.process_body(body);
        self.drain_loop_undefs();

        // `orelse` runs in case of a late break, nested inside the body
        // branch frame (it only executes once the loop completes
        // normally, so it should see everything the body proved
        // reachable).
        self.scopes.enter_branch();
        self.process_body(orelse);
        let orelse_defs = self.scopes.exit_branch();

        let body_defs = self.scopes.exit_branch();
        let break_defs = self.scopes.pop_break_accumulator();
        let pass_two_continue_defs = self.scopes.pop_continue_accumulator();

        for (name, defs) in &orelse_defs {
            self.scopes.extend_definition(name, defs);
        }
        for (name, defs) in &pass_two_continue_defs {
            self.scopes.extend_definition(name, defs);
        }
        for (name, defs) in &break_defs {
            self.scopes.extend_definition(name, defs);
        }
        for (name, defs) in &body_defs {
            self.scopes.extend_definition(name, defs);
        }
    }

    fn visit_with(&mut self, items: &'a [ast::WithItem], body: &'a [Stmt]) {
        // A `with` body runs under a single frame: unlike a branch, every
        // name bound here is certain to have happened by the time control
        // reaches the statement after the block (barring an exception,
        // which this analysis does not attempt to model as a separate
        // path for `with`).
        for item in items {
            let ctx_def = self.visit_expr(&item.context_expr);
            if let Some(vars) = &item.optional_vars {
                let target_def = self.visit_expr(vars);
                self.arena.add_user(ctx_def, target_def);
            }
        }
        self.process_body(body);
    }

    /// `try`/`except`/`else`/`finally`: the `try` body's bindings are
    /// unioned (not replaced) into the enclosing frame, modeling that an
    /// exception may have short-circuited the body after any partial
    /// progress; each handler starts from a fresh, empty branch (it must
    /// not see the try body's tentative bindings as certain) and is also
    /// unioned in; `else` only runs if the body completed, so its
    /// bindings union in unconditionally too; `finally` always runs, so
    /// its bindings are the one part that gets a plain sequential visit.
    fn visit_try(&mut self, s: &'a ast::StmtTry) {
        self.scopes.enter_branch();
        self.process_body(&s.body);
        let body_defs = self.scopes.exit_branch();
        for (name, defs) in &body_defs {
            self.scopes.extend_definition(name, defs);
        }

        for handler in &s.handlers {
            let ast::ExceptHandler::ExceptHandler(handler) = handler;
            self.scopes.enter_branch();
            if let Some(ty) = &handler.type_ {
                self.visit_expr(ty);
            }
            if let Some(name) = &handler.name {
                let name = Name::new(name.as_str());
                let def = self.new_def(node_key(handler), name.clone());
                self.bind_name(&name, OrderedSet::single(def));
            }
            self.process_body(&handler.body);
            let handler_defs = self.scopes.exit_branch();
            for (name, defs) in &handler_defs {
                self.scopes.extend_definition(name, defs);
            }
        }

        self.scopes.enter_branch();
        self.process_body(&s.orelse);
        let orelse_defs = self.scopes.exit_branch();
        for (name, defs) in &orelse_defs {
            self.scopes.extend_definition(name, defs);
        }

        self.process_body(&s.finalbody);
    }

    /// `match` merges its cases pairwise, left to right, with the
    /// if/else union rule: case *n* and everything after it are folded
    /// together as one "else" arm relative to case *n-1*, so a name bound
    /// by every case (including a wildcard `case _:`) is live afterward,
    /// while one bound by only some cases is merely unioned in.
    fn visit_match(&mut self, s: &'a ast::StmtMatch) {
        let subject_def = self.visit_expr(&s.subject);
        self.visit_match_cases(subject_def, &s.cases);
    }

    fn visit_match_cases(&mut self, subject_def: DefId, cases: &'a [ast::MatchCase]) {
        let Some((case, rest)) = cases.split_first() else { return };

        self.scopes.enter_branch();
        let pattern_def = self.visit_pattern(&case.pattern);
        self.arena.add_user(subject_def, pattern_def);
        if let Some(guard) = &case.guard {
            self.visit_expr(guard);
        }
        self.process_body(&case.body);
        let case_defs = self.scopes.exit_branch();

        self.scopes.enter_branch();
        self.visit_match_cases(subject_def, rest);
        let rest_defs = self.scopes.exit_branch();

        self.merge_if_else(case_defs, rest_defs);
    }

    fn visit_pattern(&mut self, pattern: &'a ast::Pattern) -> DefId {
        match pattern {
            ast::Pattern::MatchValue(p) => {
                let dnode = self.new_def(node_key(p), Name::new_static("MatchValue"));
                let value_def = self.visit_expr(&p.value);
                self.arena.add_user(value_def, dnode);
                dnode
            }
            ast::Pattern::MatchSingleton(p) => self.new_def(node_key(p), Name::new_static("MatchSingleton")),
            ast::Pattern::MatchSequence(p) => {
                let dnode = self.new_def(node_key(p), Name::new_static("MatchSequence"));
                for pat in &p.patterns {
                    let pat_def = self.visit_pattern(pat);
                    self.arena.add_user(pat_def, dnode);
                }
                dnode
            }
            ast::Pattern::MatchMapping(p) => {
                let dnode = self.new_def(node_key(p), Name::new_static("MatchMapping"));
                for key in &p.keys {
                    let key_def = self.visit_expr(key);
                    self.arena.add_user(key_def, dnode);
                }
                for pat in &p.patterns {
                    let pat_def = self.visit_pattern(pat);
                    self.arena.add_user(pat_def, dnode);
                }
                if let Some(rest) = &p.rest {
                    let name = Name::new(rest.as_str());
                    let def = self.new_def(NodeKey::Ast(std::ptr::from_ref(rest) as usize), name.clone());
                    self.arena.add_user(def, dnode);
                    self.bind_name(&name, OrderedSet::single(def));
                }
                dnode
            }
            ast::Pattern::MatchClass(p) => {
                let dnode = self.new_def(node_key(p), Name::new_static("MatchClass"));
                let cls_def = self.visit_expr(&p.cls);
                self.arena.add_user(cls_def, dnode);
                for pat in &p.patterns {
                    let pat_def = self.visit_pattern(pat);
                    self.arena.add_user(pat_def, dnode);
                }
                for pat in &p.kwd_patterns {
                    let pat_def = self.visit_pattern(pat);
                    self.arena.add_user(pat_def, dnode);
                }
                dnode
            }
            ast::Pattern::MatchStar(p) => {
                let dnode = self.new_def(node_key(p), Name::new_static("MatchStar"));
                if let Some(name_id) = &p.name {
                    let name = Name::new(name_id.as_str());
                    let def = self.new_def(NodeKey::Ast(std::ptr::from_ref(name_id) as usize), name.clone());
                    self.arena.add_user(def, dnode);
                    self.bind_name(&name, OrderedSet::single(def));
                }
                dnode
            }
            ast::Pattern::MatchAs(p) => {
                let dnode = self.new_def(node_key(p), Name::new_static("MatchAs"));
                if let Some(pat) = &p.pattern {
                    let pat_def = self.visit_pattern(pat);
                    self.arena.add_user(pat_def, dnode);
                }
                if let Some(name_id) = &p.name {
                    let name = Name::new(name_id.as_str());
                    let def = self.new_def(NodeKey::Ast(std::ptr::from_ref(name_id) as usize), name.clone());
                    self.arena.add_user(dnode, def);
                    self.bind_name(&name, OrderedSet::single(def));
                }
                dnode
            }
            ast::Pattern::MatchOr(p) => {
                let dnode = self.new_def(node_key(p), Name::new_static("MatchOr"));
                for pat in &p.patterns {
                    let pat_def = self.visit_pattern(pat);
                    self.arena.add_user(pat_def, dnode);
                }
                dnode
            }
        }
    }

    // ---- function / lambda / class declarations -----------------------

    #[allow(clippy::too_many_arguments)]
    fn visit_function_declaration(
        &mut self,
        key: NodeKey,
        name: &str,
        args: &'a ast::Arguments,
        decorator_list: &'a [Expr],
        returns: Option<&'a Expr>,
        type_params: &'a [ast::TypeParam],
        body: &'a [Stmt],
    ) {
        let wrapped = !type_params.is_empty();
        if wrapped {
            let precomputed = locals::collect_locals_for_type_params(type_params);
            self.scopes.enter_scope(ScopeKind::TypeParams, key, precomputed);
            self.visit_type_params(type_params);
        }

        let fname = Name::new(name.to_owned());
        let dnode = self.new_def(key, fname.clone());

        for decorator in decorator_list {
            self.visit_eager_or_deferred_dependency(decorator, dnode);
        }
        if let Some(returns) = returns {
            self.defer_or_visit_annotation(returns, dnode, false);
        }
        for arg in Self::iter_arguments(args) {
            if let Some(annotation) = &arg.annotation {
                self.defer_or_visit_annotation(annotation, dnode, false);
            }
        }
        for default in &args.defaults {
            let d = self.visit_expr(default);
            self.arena.add_user(d, dnode);
        }
        for default in args.kw_defaults.iter().flatten() {
            let d = self.visit_expr(default);
            self.arena.add_user(d, dnode);
        }

        if wrapped {
            self.install_payload_name_outside_wrapper(&fname, dnode);
        } else {
            self.bind_name(&fname, OrderedSet::single(dnode));
        }

        let scopes_snapshot = self.scopes.snapshot_scopes();
        self.deferred_bodies.push_back(DeferredBody::Function {
            dnode,
            args,
            body,
            scopes_snapshot,
        });

        if wrapped {
            let wrapper = self.scopes.exit_scope();
            self.finalize_scope_locals(&wrapper);
        }
    }

    /// Decorators, class bases, keywords, and `TypeVar()` bounds are
    /// visited eagerly unless the module is in stub mode, where they
    /// share the annotation-deferral queue (and therefore its lookup
    /// rule) rather than getting their own separate mechanism.
    fn visit_eager_or_deferred_dependency(&mut self, expr: &'a Expr, owner: DefId) {
        if self.is_stub {
            let snapshot = self.scopes.snapshot_scopes();
            self.deferred_annotations.push(DeferredAnnotation {
                expr,
                scopes_snapshot: snapshot,
                owner,
            });
        } else {
            let d = self.visit_expr(expr);
            self.arena.add_user(d, owner);
        }
    }

    fn defer_or_visit_annotation(&mut self, expr: &'a Expr, owner: DefId, class_scope: bool) {
        let validation = if class_scope {
            validate::validate_annotation_body_within_class_scope(expr)
        } else {
            validate::validate_annotation_body(expr)
        };
        if validation.is_err() {
            self.diagnostics.push(Diagnostic::syntax_misuse(
                "disallowed construct in annotation body".to_owned(),
                Some(expr_range(expr)),
            ));
            return;
        }
        if self.deferred_annotation_mode {
            let snapshot = self.scopes.snapshot_scopes();
            self.deferred_annotations.push(DeferredAnnotation {
                expr,
                scopes_snapshot: snapshot,
                owner,
            });
        } else {
            let d = self.visit_expr(expr);
            self.arena.add_user(d, owner);
        }
    }

    /// Iterates a function's parameters in the order the declaration step
    /// binds them: `args`, then `posonlyargs`, then `vararg`, then
    /// `kwonlyargs`, then `kwarg`.
    fn iter_arguments(args: &ast::Arguments) -> impl Iterator<Item = &ast::Arg> {
        args.args
            .iter()
            .chain(args.posonlyargs.iter())
            .chain(args.vararg.as_deref())
            .chain(args.kwonlyargs.iter())
            .chain(args.kwarg.as_deref())
    }

    fn visit_type_params(&mut self, type_params: &'a [ast::TypeParam]) {
        for param in type_params {
            match param {
                ast::TypeParam::TypeVar(p) => {
                    let name = Name::new(p.name.as_str());
                    let def = self.new_def(node_key(p), name.clone());
                    self.bind_name(&name, OrderedSet::single(def));
                    if let Some(bound) = &p.bound {
                        self.defer_or_visit_annotation(bound, def, false);
                    }
                }
                ast::TypeParam::TypeVarTuple(p) => {
                    let name = Name::new(p.name.as_str());
                    let def = self.new_def(node_key(p), name.clone());
                    self.bind_name(&name, OrderedSet::single(def));
                }
                ast::TypeParam::ParamSpec(p) => {
                    let name = Name::new(p.name.as_str());
                    let def = self.new_def(node_key(p), name.clone());
                    self.bind_name(&name, OrderedSet::single(def));
                }
            }
        }
    }

    /// Installs `name`/`def` one scope further out than the current one -
    /// the rule a `def695`-wrapped function/class/type-alias header
    /// follows: its own name belongs to the scope that encloses the
    /// synthetic type-parameter wrapper, not the wrapper itself.
    fn install_payload_name_outside_wrapper(&mut self, name: &Name, def: DefId) {
        let wrapper = self.scopes.exit_scope();
        self.bind_name(name, OrderedSet::single(def));
        self.scopes.push_existing_scope(wrapper);
    }

    fn visit_class(&mut self, s: &'a ast::StmtClassDef) {
        let wrapped = !s.type_params.is_empty();
        if wrapped {
            let precomputed = locals::collect_locals_for_type_params(&s.type_params);
            self.scopes.enter_scope(ScopeKind::TypeParams, node_key(s), precomputed);
            self.visit_type_params(&s.type_params);
        }

        let cname = Name::new(s.name.as_str());
        let dnode = self.new_def(node_key(s), cname.clone());

        for base in &s.bases {
            self.visit_eager_or_deferred_dependency(base, dnode);
        }
        for keyword in &s.keywords {
            self.visit_eager_or_deferred_dependency(&keyword.value, dnode);
        }

        if wrapped {
            self.install_payload_name_outside_wrapper(&cname, dnode);
        } else {
            self.bind_name(&cname, OrderedSet::single(dnode));
        }

        let precomputed = locals::collect_locals(&s.body);
        self.scopes.enter_scope(ScopeKind::Class, node_key(s), precomputed);
        let class_self = self.new_def(NodeKey::Synthetic(self.next_synthetic()), Name::new_static("__class__"));
        self.bind_name(&Name::new_static("__class__"), OrderedSet::single(class_self));
        self.process_body(&s.body);
        let class_scope = self.scopes.exit_scope();
        self.finalize_scope_locals(&class_scope);

        if wrapped {
            let wrapper = self.scopes.exit_scope();
            self.finalize_scope_locals(&wrapper);
        }
    }

    fn next_synthetic(&mut self) -> u32 {
        self.synthetic_counter += 1;
        self.synthetic_counter
    }

    // ---- deferred body / annotation draining --------------------------

    fn drain_deferred_bodies(&mut self) {
        while let Some(deferred) = self.deferred_bodies.pop_front() {
            match deferred {
                DeferredBody::Function {
                    dnode,
                    args,
                    body,
                    scopes_snapshot,
                } => {
                    let saved = self.scopes.swap_scopes(scopes_snapshot);
                    let precomputed = locals::collect_locals(body);
                    self.scopes.enter_scope(ScopeKind::Function, self.arena.get(dnode).key(), precomputed);
                    self.bind_parameters(args);
                    self.process_body(body);
                    let scope = self.scopes.exit_scope();
                    self.finalize_scope_locals(&scope);
                    self.scopes.swap_scopes(saved);
                }
                DeferredBody::Lambda {
                    dnode,
                    args,
                    body,
                    scopes_snapshot,
                } => {
                    let saved = self.scopes.swap_scopes(scopes_snapshot);
                    self.scopes
                        .enter_scope(ScopeKind::Lambda, self.arena.get(dnode).key(), FxHashSet::default());
                    self.bind_parameters(args);
                    let body_def = self.visit_expr(body);
                    self.arena.add_user(body_def, dnode);
                    let scope = self.scopes.exit_scope();
                    self.finalize_scope_locals(&scope);
                    self.scopes.swap_scopes(saved);
                }
            }
        }
    }

    fn bind_parameters(&mut self, args: &'a ast::Arguments) {
        for arg in Self::iter_arguments(args) {
            let name = Name::new(arg.arg.as_str());
            let def = self.new_def(node_key(arg), name.clone());
            self.bind_name(&name, OrderedSet::single(def));
        }
    }

    fn drain_deferred_annotations(&mut self) {
        let pending = std::mem::take(&mut self.deferred_annotations);
        for entry in pending {
            let saved = self.scopes.swap_scopes(entry.scopes_snapshot);
            self.annotation_mode = true;
            let resolved = self.visit_expr(entry.expr);
            self.annotation_mode = false;
            self.arena.add_user(resolved, entry.owner);
            self.scopes.swap_scopes(saved);
        }
    }

    // ---- expressions ---------------------------------------------------

    fn visit_expr(&mut self, expr: &'a Expr) -> DefId {
        match expr {
            Expr::Name(e) => self.visit_name(e),
            Expr::NamedExpr(e) => self.visit_named_expr(e),
            Expr::Constant(e) => self.new_def(node_key(e), Name::new_static("Constant")),
            Expr::BoolOp(e) => self.visit_fanout(node_key(e), "BoolOp", e.values.iter()),
            Expr::BinOp(e) => self.visit_fanout(node_key(e), "BinOp", [&*e.left, &*e.right].into_iter()),
            Expr::UnaryOp(e) => self.visit_fanout(node_key(e), "UnaryOp", std::iter::once(&*e.operand)),
            Expr::Lambda(e) => self.visit_lambda(e),
            Expr::IfExp(e) => {
                self.visit_fanout(node_key(e), "IfExp", [&*e.test, &*e.body, &*e.orelse].into_iter())
            }
            Expr::Dict(e) => {
                let dnode = self.new_def(node_key(e), Name::new_static("Dict"));
                for key in e.keys.iter().flatten() {
                    let d = self.visit_expr(key);
                    self.arena.add_user(d, dnode);
                }
                for value in &e.values {
                    let d = self.visit_expr(value);
                    self.arena.add_user(d, dnode);
                }
                dnode
            }
            Expr::Set(e) => self.visit_fanout(node_key(e), "Set", e.elts.iter()),
            Expr::ListComp(e) => {
                let elt = &e.elt;
                self.visit_comprehension(node_key(e), "ListComp", &e.generators, move |b| vec![b.visit_expr(elt)])
            }
            Expr::SetComp(e) => {
                let elt = &e.elt;
                self.visit_comprehension(node_key(e), "SetComp", &e.generators, move |b| vec![b.visit_expr(elt)])
            }
            Expr::GeneratorExp(e) => {
                let elt = &e.elt;
                self.visit_comprehension(node_key(e), "GeneratorExp", &e.generators, move |b| vec![b.visit_expr(elt)])
            }
            Expr::DictComp(e) => {
                let key = &e.key;
                let value = &e.value;
                self.visit_comprehension(node_key(e), "DictComp", &e.generators, move |b| {
                    vec![b.visit_expr(key), b.visit_expr(value)]
                })
            }
            Expr::Await(e) => self.visit_fanout(node_key(e), "Await", std::iter::once(&*e.value)),
            Expr::Yield(e) => {
                let dnode = self.new_def(node_key(e), Name::new_static("Yield"));
                if let Some(value) = e.value.as_deref() {
                    let d = self.visit_expr(value);
                    self.arena.add_user(d, dnode);
                }
                dnode
            }
            Expr::YieldFrom(e) => self.visit_fanout(node_key(e), "YieldFrom", std::iter::once(&*e.value)),
            Expr::Compare(e) => {
                let dnode = self.new_def(node_key(e), Name::new_static("Compare"));
                let left = self.visit_expr(&e.left);
                self.arena.add_user(left, dnode);
                for comparator in &e.comparators {
                    let d = self.visit_expr(comparator);
                    self.arena.add_user(d, dnode);
                }
                dnode
            }
            Expr::Call(e) => {
                let dnode = self.new_def(node_key(e), Name::new_static("Call"));
                let func = self.visit_expr(&e.func);
                self.arena.add_user(func, dnode);
                for arg in &e.args {
                    let d = self.visit_expr(arg);
                    self.arena.add_user(d, dnode);
                }
                for keyword in &e.keywords {
                    let d = self.visit_expr(&keyword.value);
                    self.arena.add_user(d, dnode);
                }
                dnode
            }
            Expr::FormattedValue(e) => self.visit_fanout(node_key(e), "FormattedValue", std::iter::once(&*e.value)),
            Expr::JoinedStr(e) => self.visit_fanout(node_key(e), "JoinedStr", e.values.iter()),
            Expr::Attribute(e) => self.visit_fanout(node_key(e), "Attribute", std::iter::once(&*e.value)),
            Expr::Subscript(e) => {
                self.visit_fanout(node_key(e), "Subscript", [&*e.value, &*e.slice].into_iter())
            }
            Expr::Starred(e) => self.visit_fanout(node_key(e), "Starred", std::iter::once(&*e.value)),
            Expr::List(e) => self.visit_fanout(node_key(e), "List", e.elts.iter()),
            Expr::Tuple(e) => self.visit_fanout(node_key(e), "Tuple", e.elts.iter()),
            Expr::Slice(e) => {
                let dnode = self.new_def(node_key(e), Name::new_static("Slice"));
                for part in [e.lower.as_deref(), e.upper.as_deref(), e.step.as_deref()].into_iter().flatten() {
                    let d = self.visit_expr(part);
                    self.arena.add_user(d, dnode);
                }
                dnode
            }
        }
    }

    /// Every compound expression shares this shape: create a Def for the
    /// node itself, visit each child, and add each child's Def as a
    /// dependency of the parent's.
    fn visit_fanout(
        &mut self,
        key: NodeKey,
        label: &'static str,
        children: impl Iterator<Item = &'a Expr>,
    ) -> DefId {
        let dnode = self.new_def(key, Name::new_static(label));
        for child in children {
            let d = self.visit_expr(child);
            self.arena.add_user(d, dnode);
        }
        dnode
    }

    fn visit_name(&mut self, e: &'a ast::ExprName) -> DefId {
        let key = node_key(e);
        let name = Name::new(e.id.as_str());
        match e.ctx {
            ExprContext::Store => {
                let def = self.new_def(key, name.clone());
                self.bind_name(&name, OrderedSet::single(def));
                def
            }
            ExprContext::Load | ExprContext::Del => self.visit_name_load(key, &name, Some(e.range)),
            ExprContext::Invalid => self.new_def(key, name),
        }
    }

    fn visit_name_load(&mut self, key: NodeKey, name: &Name, range: Option<TextRange>) -> DefId {
        let use_def = self.new_def(key, name.clone());

        if self.annotation_mode {
            let chain = self.scopes.chain_root_first();
            let refs: Vec<&Scope> = chain.iter().collect();
            match annotation_lookup::lookup_annotation_name_defs(name, &refs, &self.arena) {
                AnnotationLookupResult::Found(defs) | AnnotationLookupResult::FoundNonLive(defs) => {
                    for d in defs.iter().copied() {
                        self.arena.add_user(d, use_def);
                    }
                }
                AnnotationLookupResult::Builtin => {}
                AnnotationLookupResult::NotFound => {
                    self.diagnostics.push(Diagnostic::unbound_identifier(name, range));
                }
            }
            return use_def;
        }

        self.resolve_name_read(name, use_def, range);
        use_def
    }

    /// Resolves `name` as a read reaching `use_def`: records every
    /// definition that may be observed (including a wildcard import's
    /// uncertain binding) as a user of `use_def`, or files a diagnostic if
    /// nothing can reach it. Shared by an ordinary `Load` and by the
    /// implicit read half of an augmented assignment.
    fn resolve_name_read(&mut self, name: &Name, use_def: DefId, range: Option<TextRange>) {
        match self.lookup_name(name) {
            LookupOutcome::Found(defs) => {
                for d in defs.iter().copied() {
                    self.arena.add_user(d, use_def);
                }
            }
            LookupOutcome::NotFound { stars } => {
                if !stars.is_empty() {
                    for d in stars.iter().copied() {
                        self.arena.add_user(d, use_def);
                    }
                } else if builtins::is_builtin(name.as_str()) {
                    let builtin = self.builtin_def(name.as_str());
                    self.arena.add_user(builtin, use_def);
                } else if self.scopes.current().is_precomputed_local(name.as_str()) {
                    if self.loop_undefs_active() {
                        self.buffer_undef(name.clone(), use_def, stars, range);
                    } else {
                        self.diagnostics.push(Diagnostic::read_before_assign(name, range));
                    }
                } else {
                    self.diagnostics.push(Diagnostic::unbound_identifier(name, range));
                }
            }
        }
    }

    fn visit_named_expr(&mut self, e: &'a ast::ExprNamedExpr) -> DefId {
        let dnode = self.new_def(node_key(e), Name::new_static("NamedExpr"));
        let value_def = self.visit_expr(&e.value);
        self.arena.add_user(value_def, dnode);

        let Expr::Name(target) = &*e.target else {
            return dnode;
        };
        let name = Name::new(target.id.as_str());
        let target_def = self.new_def(node_key(&*e.target), name.clone());

        let mut levels_up = 0;
        while self.scopes.scope_at(levels_up).kind() == ScopeKind::Comprehension {
            levels_up += 1;
        }
        if self.scopes.scope_at(levels_up).kind() == ScopeKind::Class {
            self.diagnostics.push(Diagnostic::syntax_misuse(
                "assignment expressions cannot be used in a class body".to_owned(),
                Some(e.range),
            ));
        } else {
            self.scopes
                .set_definition_in_ancestor(levels_up, &name, OrderedSet::single(target_def), &mut self.arena);
        }
        dnode
    }

    fn visit_lambda(&mut self, e: &'a ast::ExprLambda) -> DefId {
        let dnode = self.new_def(node_key(e), Name::new_static("Lambda"));
        for default in &e.args.defaults {
            let d = self.visit_expr(default);
            self.arena.add_user(d, dnode);
        }
        for default in e.args.kw_defaults.iter().flatten() {
            let d = self.visit_expr(default);
            self.arena.add_user(d, dnode);
        }
        let scopes_snapshot = self.scopes.snapshot_scopes();
        self.deferred_bodies.push_back(DeferredBody::Lambda {
            dnode,
            args: &e.args,
            body: &e.body,
            scopes_snapshot,
        });
        dnode
    }

    fn visit_comprehension(
        &mut self,
        key: NodeKey,
        label: &'static str,
        generators: &'a [ast::Comprehension],
        visit_payload: impl FnOnce(&mut Self) -> Vec<DefId>,
    ) -> DefId {
        let dnode = self.new_def(key, Name::new_static(label));

        if validate::validate_comprehension(generators).is_err() {
            self.diagnostics.push(Diagnostic::syntax_misuse(
                format!("walrus target rebinds an iteration variable in this {label}"),
                None,
            ));
            return dnode;
        }

        let mut precomputed = FxHashSet::default();
        for generator in generators {
            collect_target_names(&generator.target, &mut precomputed);
        }
        self.scopes.enter_scope(ScopeKind::Comprehension, key, precomputed);

        for (i, generator) in generators.iter().enumerate() {
            if i == 0 {
                let wrapper = self.scopes.exit_scope();
                let iter_def = self.visit_expr(&generator.iter);
                self.arena.add_user(iter_def, dnode);
                self.scopes.push_existing_scope(wrapper);
            } else {
                let iter_def = self.visit_expr(&generator.iter);
                self.arena.add_user(iter_def, dnode);
            }
            let target_def = self.visit_expr(&generator.target);
            self.arena.add_user(target_def, dnode);
            for if_clause in &generator.ifs {
                let d = self.visit_expr(if_clause);
                self.arena.add_user(d, dnode);
            }
        }

        for payload_def in visit_payload(self) {
            self.arena.add_user(payload_def, dnode);
        }

        let scope = self.scopes.exit_scope();
        self.finalize_scope_locals(&scope);
        dnode
    }
}

fn collect_target_names(expr: &Expr, out: &mut FxHashSet<String>) {
    match expr {
        Expr::Name(e) => {
            out.insert(e.id.as_str().to_owned());
        }
        Expr::Tuple(e) => {
            for elt in &e.elts {
                collect_target_names(elt, out);
            }
        }
        Expr::List(e) => {
            for elt in &e.elts {
                collect_target_names(elt, out);
            }
        }
        Expr::Starred(e) => collect_target_names(&e.value, out),
        _ => {}
    }
}

fn expr_range(expr: &Expr) -> TextRange {
    match expr {
        Expr::BoolOp(e) => e.range,
        Expr::NamedExpr(e) => e.range,
        Expr::BinOp(e) => e.range,
        Expr::UnaryOp(e) => e.range,
        Expr::Lambda(e) => e.range,
        Expr::IfExp(e) => e.range,
        Expr::Dict(e) => e.range,
        Expr::Set(e) => e.range,
        Expr::ListComp(e) => e.range,
        Expr::SetComp(e) => e.range,
        Expr::DictComp(e) => e.range,
        Expr::GeneratorExp(e) => e.range,
        Expr::Await(e) => e.range,
        Expr::Yield(e) => e.range,
        Expr::YieldFrom(e) => e.range,
        Expr::Compare(e) => e.range,
        Expr::Call(e) => e.range,
        Expr::FormattedValue(e) => e.range,
        Expr::JoinedStr(e) => e.range,
        Expr::Constant(e) => e.range,
        Expr::Attribute(e) => e.range,
        Expr::Subscript(e) => e.range,
        Expr::Starred(e) => e.range,
        Expr::Name(e) => e.range,
        Expr::List(e) => e.range,
        Expr::Tuple(e) => e.range,
        Expr::Slice(e) => e.range,
    }
}

#[cfg(test)]
mod tests {
    use rustpython_ast::Mod;
    use rustpython_parser::{parse, Mode};

    use super::*;

    fn analyze(source: &str) -> BuildOutput {
        let parsed = parse(source, Mode::Module, "<test>").expect("valid module source");
        let Mod::Module(module) = parsed.into_syntax() else {
            panic!("expected a module");
        };
        // Leak the parsed module so its borrow can outlive this function:
        // acceptable in a test, where the process exits shortly after.
        let module: &'static ast::ModModule = Box::leak(Box::new(module));
        let builder = Builder::new(String::new(), false, false, false);
        builder.build(module)
    }

    #[test]
    fn simple_assignment_reaches_its_use() {
        let output = analyze("x = 1\nprint(x)\n");
        assert!(output.diagnostics.is_empty());
    }

    #[test]
    fn conditional_definition_merges_both_arms() {
        let output = analyze("if cond:\n    x = 1\nelse:\n    x = 2\nprint(x)\n");
        assert!(output.diagnostics.is_empty());
    }

    #[test]
    fn overwrite_kills_the_previous_definition() {
        let output = analyze("x = 1\nx = 2\nprint(x)\n");
        // x = 1 is never read: its Def exists but is non-live and has no users.
        let first_def_id = output
            .chains
            .iter()
            .find(|(_, &id)| output.arena.get(id).user_count() == 0 && output.arena.get(id).name() == "x")
            .map(|(_, &id)| id);
        assert!(first_def_id.is_some());
    }

    #[test]
    fn reading_an_unknown_name_is_unbound() {
        let output = analyze("print(totally_unknown_name)\n");
        assert_eq!(output.diagnostics.len(), 1);
    }

    #[test]
    fn walrus_hoists_out_of_a_comprehension() {
        let output = analyze("[y := x for x in range(3)]\nprint(y)\n");
        assert!(output.diagnostics.is_empty());
    }

    #[test]
    fn nonlocal_rebinds_the_enclosing_function_s_local() {
        let output = analyze("def outer():\n    x = 1\n    def inner():\n        nonlocal x\n        x = 2\n    inner()\n    print(x)\n");
        assert!(output.diagnostics.is_empty());
    }
}
