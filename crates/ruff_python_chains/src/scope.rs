//! The engine room: a stack of scopes, each carrying its own stack of
//! branch frames, plus the auxiliary accumulators that loops and
//! exception handlers drain into.
//!
//! This purposely stays below the level of "what does an `if` statement
//! do" - that lives in `builder.rs`, which composes these primitives.
//! What lives here is the bookkeeping `builder.rs` would otherwise have
//! to reinvent at every call site: branch frames that can be opened,
//! extended and closed without losing track of what was visible before
//! the branch started, and the exact liveness-kill rule a rebinding
//! triggers.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::def::{DefArena, DefId};
use crate::name::Name;
use crate::node_key::NodeKey;
use crate::ordered_set::OrderedSet;

/// What kind of node opened a scope; callers (`builder.rs`,
/// `annotation_lookup.rs`) use this to decide things this module doesn't
/// need to know about, like "class scopes are invisible to nested
/// functions' ordinary name lookup".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScopeKind {
    Module,
    Function,
    Lambda,
    Class,
    Comprehension,
    /// The synthetic wrapper scope introduced by a type-parameter list
    /// (PEP-695-style `def f[T](...)`/`class C[T]`).
    TypeParams,
}

/// One set of name -> definitions bindings, local to a branch.
///
/// A scope's frame stack is never a stack of *copies*: a new frame
/// starts empty, and a read searches the whole stack top-to-bottom.
/// That's what lets an `except` handler see nothing the `try` body
/// tentatively bound, while a second statement in the same frame still
/// sees the first.
#[derive(Clone, Debug, Default)]
struct Frame {
    definitions: FxHashMap<Name, OrderedSet<DefId>>,
}

/// One lexical scope's full state: its frame stack, the names it has
/// redirected to an enclosing/module scope via `global`/`nonlocal`, its
/// precomputed local names (from `locals.rs`), and its dead-code depth.
///
/// Cloning a `Scope` is how a deferred function/lambda body gets the
/// enclosing-scope chain it closed over: `builder.rs` snapshots the whole
/// scope stack at declaration time and swaps the snapshot back in when
/// the body is finally walked, so free-variable lookups see exactly what
/// was visible at the `def`, not whatever the stack holds by then.
#[derive(Clone)]
pub struct Scope {
    kind: ScopeKind,
    node: NodeKey,
    frames: Vec<Frame>,
    globals: FxHashSet<Name>,
    /// `nonlocal x` resolved, at declaration time, to an ancestor scope
    /// `usize` levels up from this one; writes to `x` in this scope are
    /// routed there instead of installed locally. Populated once per
    /// name, when the `nonlocal` statement is visited.
    nonlocal_targets: FxHashMap<Name, usize>,
    precomputed_locals: FxHashSet<String>,
    /// Non-zero while the statements currently being visited are
    /// unreachable (after a `break`/`continue`/`return`/`raise` in the
    /// same statement list). Writes under dead code are no-ops; this is
    /// a depth rather than a flag so a dead nested block doesn't
    /// resurrect the enclosing list's aliveness when it exits.
    dead_code: u32,
}

impl Scope {
    fn new(kind: ScopeKind, node: NodeKey, precomputed_locals: FxHashSet<String>) -> Self {
        Self {
            kind,
            node,
            frames: vec![Frame::default()],
            globals: FxHashSet::default(),
            nonlocal_targets: FxHashMap::default(),
            precomputed_locals,
            dead_code: 0,
        }
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn node(&self) -> NodeKey {
        self.node
    }

    pub fn is_precomputed_local(&self, name: &str) -> bool {
        self.precomputed_locals.contains(name)
    }

    pub fn is_redirected_to_global(&self, name: &Name) -> bool {
        self.globals.contains(name)
    }

    pub fn declare_global(&mut self, name: Name) {
        self.globals.insert(name);
    }

    /// Records that `nonlocal name` in this scope resolved to the scope
    /// `levels_up` enclosing scopes away. Only ever set once per name -
    /// `nonlocal` may not be redeclared for the same name in one scope.
    pub fn declare_nonlocal_target(&mut self, name: Name, levels_up: usize) {
        self.nonlocal_targets.insert(name, levels_up);
    }

    pub fn nonlocal_target(&self, name: &Name) -> Option<usize> {
        self.nonlocal_targets.get(name).copied()
    }

    pub fn is_dead_code(&self) -> bool {
        self.dead_code > 0
    }

    /// Searches this scope's frame stack top-to-bottom for a binding of
    /// `name`, returning the first one found (the most recent branch
    /// that bound it, which is exactly what a sequential read should
    /// see).
    pub fn lookup(&self, name: &Name) -> Option<&OrderedSet<DefId>> {
        self.frames.iter().rev().find_map(|frame| frame.definitions.get(name))
    }

    /// All names bound anywhere in the scope's frame stack, used when a
    /// scope closes to report its final `locals` map.
    pub fn bindings(&self) -> impl Iterator<Item = (&Name, &OrderedSet<DefId>)> {
        self.frames.iter().flat_map(|frame| frame.definitions.iter())
    }
}

/// Marker name `builder.rs` uses for the "some wildcard import might have
/// bound this" bucket a scope's frames can hold under `"*"`.
pub const WILDCARD_BINDING: &str = "*";

/// The full def-use engine state: one [`Scope`] per lexically enclosing
/// scope (module first), plus loop/try accumulators that outlive any
/// single branch frame.
#[derive(Default)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
    breaks: Vec<FxHashMap<Name, OrderedSet<DefId>>>,
    continues: Vec<FxHashMap<Name, OrderedSet<DefId>>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_scope(&mut self, kind: ScopeKind, node: NodeKey, precomputed_locals: FxHashSet<String>) {
        self.scopes.push(Scope::new(kind, node, precomputed_locals));
    }

    /// Pushes back a [`Scope`] that was previously popped off this stack
    /// (by [`ScopeStack::exit_scope`] or [`ScopeStack::swap_scopes`]),
    /// without constructing a fresh one. Used for the "evaluate a
    /// comprehension's outermost iterable one scope up" rule, where the
    /// comprehension's own scope is briefly set aside and then resumed.
    pub fn push_existing_scope(&mut self, scope: Scope) {
        self.scopes.push(scope);
    }

    /// Closes the innermost scope and returns it so the caller can read
    /// off its final bindings (for the `locals` output map) before it's
    /// dropped.
    ///
    /// # Panics
    /// If the scope's frame stack has more than one frame left open -
    /// every branch a builder opens with [`ScopeStack::enter_branch`]
    /// must be closed with [`ScopeStack::exit_branch`] before the scope
    /// itself closes.
    pub fn exit_scope(&mut self) -> Scope {
        let scope = self.scopes.pop().expect("exit_scope with no open scope");
        assert_eq!(scope.frames.len(), 1, "scope closed with unmerged branch frames");
        scope
    }

    /// Replaces the whole scope chain with `scopes`, returning what was
    /// there before. This is the "scope switch" a deferred function or
    /// lambda body runs under: the live chain (module scope down through
    /// whatever is currently being visited) is swapped out for the
    /// snapshot taken when the body was deferred, the body is walked
    /// against that snapshot, and the caller swaps the live chain back in
    /// once it returns.
    pub fn swap_scopes(&mut self, scopes: Vec<Scope>) -> Vec<Scope> {
        std::mem::replace(&mut self.scopes, scopes)
    }

    /// A clone of the current scope chain, suitable for later restoring
    /// via [`ScopeStack::swap_scopes`].
    pub fn snapshot_scopes(&self) -> Vec<Scope> {
        self.scopes.clone()
    }

    pub fn current(&self) -> &Scope {
        self.scopes.last().expect("no open scope")
    }

    pub fn current_mut(&mut self) -> &mut Scope {
        self.scopes.last_mut().expect("no open scope")
    }

    pub fn module_scope(&self) -> &Scope {
        self.scopes.first().expect("no module scope")
    }

    pub fn module_scope_mut(&mut self) -> &mut Scope {
        self.scopes.first_mut().expect("no module scope")
    }

    /// The scope `levels_up` enclosing scopes away from the current one
    /// (0 = current). Used by `nonlocal` resolution and walrus hoisting,
    /// both of which need to inspect or target a specific ancestor scope
    /// rather than only ever the current or module scope.
    pub fn scope_at(&self, levels_up: usize) -> &Scope {
        &self.scopes[self.scopes.len() - 1 - levels_up]
    }

    /// The enclosing-scope chain, innermost first - what ordinary closure
    /// lookup walks.
    pub fn enclosing_scopes(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.iter().rev()
    }

    /// The same chain, module first - the order
    /// `annotation_lookup::lookup_annotation_name_defs` expects.
    pub fn chain_root_first(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Opens a fresh, empty branch frame (an `if`/`else` arm, a `try`
    /// body, an `except` handler, ...). Deliberately empty rather than a
    /// copy of the current top frame: reads still see through to outer
    /// frames via [`Scope::lookup`], but a handler must not appear to
    /// have inherited the try body's tentative bindings as if they were
    /// certain.
    pub fn enter_branch(&mut self) {
        self.current_mut().frames.push(Frame::default());
    }

    /// Closes the innermost branch frame and returns its bindings, for
    /// the caller to fold into the enclosing frame via
    /// [`ScopeStack::set_definition`] (replacement) or
    /// [`ScopeStack::extend_definition`] (union), whichever the
    /// surrounding construct calls for.
    pub fn exit_branch(&mut self) -> FxHashMap<Name, OrderedSet<DefId>> {
        let frame = self.current_mut().frames.pop().expect("exit_branch with no open branch");
        frame.definitions
    }

    pub fn enter_dead_code(&mut self) {
        self.current_mut().dead_code += 1;
    }

    pub fn exit_dead_code(&mut self) {
        let scope = self.current_mut();
        scope.dead_code = scope.dead_code.saturating_sub(1);
    }

    /// Installs `defs` as the binding for `name` in the current scope's
    /// innermost frame, replacing whatever was there and applying the
    /// liveness-kill rule to the replaced definitions: a replaced `Def`
    /// is marked non-live unless it also appears in `defs` itself (the
    /// same definition reappearing, e.g. a branch union that re-selects
    /// it) or in some frame below the innermost one in this scope's
    /// stack (meaning another, already-closed branch can still reach the
    /// end of the scope through it). No-op under dead code.
    pub fn set_definition(&mut self, name: &Name, defs: OrderedSet<DefId>, arena: &mut DefArena) {
        let scope = self.current_mut();
        if scope.dead_code > 0 {
            return;
        }
        let top = scope.frames.len() - 1;
        let previous = scope.frames[top].definitions.insert(name.clone(), defs.clone());
        if let Some(previous) = previous {
            for old_def in previous.iter().copied() {
                if defs.contains(&old_def) {
                    continue;
                }
                let reachable_below = scope.frames[..top]
                    .iter()
                    .any(|frame| frame.definitions.get(name).is_some_and(|set| set.contains(&old_def)));
                if !reachable_below {
                    arena.get_mut(old_def).set_live(false);
                }
            }
        }
    }

    /// Unions `defs` into the current scope's innermost frame's existing
    /// binding for `name`, without killing anything: used wherever a
    /// construct models "this binding may or may not have happened"
    /// (a try body, a loop body, an `orelse`/`except` merge). No-op
    /// under dead code.
    pub fn extend_definition(&mut self, name: &Name, defs: &OrderedSet<DefId>) {
        let scope = self.current_mut();
        if scope.dead_code > 0 {
            return;
        }
        let top = scope.frames.len() - 1;
        scope.frames[top]
            .definitions
            .entry(name.clone())
            .or_default()
            .extend_from(defs);
    }

    /// As [`ScopeStack::extend_definition`], but always targets the
    /// module scope's base frame regardless of which scope is current -
    /// the effect of an assignment to a name declared `global` in a
    /// nested scope. No-op if the *current* scope is in dead code, for
    /// consistency with every other write entry point.
    pub fn extend_global(&mut self, name: &Name, defs: &OrderedSet<DefId>) {
        if self.current().dead_code > 0 {
            return;
        }
        let module = self.module_scope_mut();
        module.frames[0].definitions.entry(name.clone()).or_default().extend_from(defs);
    }

    /// As [`ScopeStack::set_definition`], but targets the top frame of
    /// the scope `levels_up` enclosing scopes away instead of always the
    /// current one. The walrus-hoisting primitive: a `:=` target binds in
    /// the first enclosing non-comprehension scope, which may be several
    /// scopes further out than the one the walrus expression textually
    /// appears in.
    pub fn set_definition_in_ancestor(
        &mut self,
        levels_up: usize,
        name: &Name,
        defs: OrderedSet<DefId>,
        arena: &mut DefArena,
    ) {
        let index = self.scopes.len() - 1 - levels_up;
        let scope = &mut self.scopes[index];
        if scope.dead_code > 0 {
            return;
        }
        let top = scope.frames.len() - 1;
        let previous = scope.frames[top].definitions.insert(name.clone(), defs.clone());
        if let Some(previous) = previous {
            for old_def in previous.iter().copied() {
                if defs.contains(&old_def) {
                    continue;
                }
                let reachable_below = scope.frames[..top]
                    .iter()
                    .any(|frame| frame.definitions.get(name).is_some_and(|set| set.contains(&old_def)));
                if !reachable_below {
                    arena.get_mut(old_def).set_live(false);
                }
            }
        }
    }

    /// Whether any scope on the stack - not just the current one - has
    /// redirected `name` to the module scope via `global`. A nested
    /// function that declares `global x` makes that redirection visible
    /// to everything lexically inside it too, including a closure two
    /// levels deeper that never itself wrote `global x`.
    pub fn any_scope_declares_global(&self, name: &Name) -> bool {
        self.scopes.iter().any(|scope| scope.is_redirected_to_global(name))
    }

    /// Takes ownership of the current scope's innermost frame's bindings,
    /// leaving it empty, and returns what it held. `break`/`continue`
    /// divert whatever the current frame had accumulated so far into
    /// their respective accumulators and leave the frame itself empty,
    /// since no code after them in the same list can still run.
    pub fn take_current_frame_definitions(&mut self) -> FxHashMap<Name, OrderedSet<DefId>> {
        let scope = self.current_mut();
        let top = scope.frames.len() - 1;
        std::mem::take(&mut scope.frames[top].definitions)
    }

    pub fn push_break_accumulator(&mut self) {
        self.breaks.push(FxHashMap::default());
    }

    pub fn pop_break_accumulator(&mut self) -> FxHashMap<Name, OrderedSet<DefId>> {
        self.breaks.pop().expect("pop_break_accumulator with none open")
    }

    pub fn accumulate_break(&mut self, name: &Name, defs: &OrderedSet<DefId>) {
        if let Some(top) = self.breaks.last_mut() {
            top.entry(name.clone()).or_default().extend_from(defs);
        }
    }

    pub fn push_continue_accumulator(&mut self) {
        self.continues.push(FxHashMap::default());
    }

    pub fn pop_continue_accumulator(&mut self) -> FxHashMap<Name, OrderedSet<DefId>> {
        self.continues.pop().expect("pop_continue_accumulator with none open")
    }

    pub fn accumulate_continue(&mut self, name: &Name, defs: &OrderedSet<DefId>) {
        if let Some(top) = self.continues.last_mut() {
            top.entry(name.clone()).or_default().extend_from(defs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        Name::new(s.to_owned())
    }

    #[test]
    fn branch_frames_are_empty_not_copies() {
        let mut stack = ScopeStack::new();
        stack.enter_scope(ScopeKind::Module, NodeKey::Synthetic(0), FxHashSet::default());
        let mut arena = DefArena::new();
        let def = arena.push(crate::def::Def::new(NodeKey::Synthetic(1), name("x")));
        stack.set_definition(&name("x"), OrderedSet::single(def), &mut arena);
        stack.enter_branch();
        assert!(stack.current().lookup(&name("x")).is_some());
        assert!(stack.current().frames.last().unwrap().definitions.is_empty());
    }

    #[test]
    fn rebinding_kills_the_previous_definition_unless_reselected() {
        let mut stack = ScopeStack::new();
        stack.enter_scope(ScopeKind::Module, NodeKey::Synthetic(0), FxHashSet::default());
        let mut arena = DefArena::new();
        let first = arena.push(crate::def::Def::new(NodeKey::Synthetic(1), name("x")));
        let second = arena.push(crate::def::Def::new(NodeKey::Synthetic(2), name("x")));
        stack.set_definition(&name("x"), OrderedSet::single(first), &mut arena);
        stack.set_definition(&name("x"), OrderedSet::single(second), &mut arena);
        assert!(!arena.get(first).is_live());
        assert!(arena.get(second).is_live());
    }

    #[test]
    fn rebinding_to_the_same_def_does_not_kill_it() {
        let mut stack = ScopeStack::new();
        stack.enter_scope(ScopeKind::Module, NodeKey::Synthetic(0), FxHashSet::default());
        let mut arena = DefArena::new();
        let def = arena.push(crate::def::Def::new(NodeKey::Synthetic(1), name("x")));
        stack.set_definition(&name("x"), OrderedSet::single(def), &mut arena);
        stack.set_definition(&name("x"), OrderedSet::single(def), &mut arena);
        assert!(arena.get(def).is_live());
    }

    #[test]
    fn writes_under_dead_code_are_no_ops() {
        let mut stack = ScopeStack::new();
        stack.enter_scope(ScopeKind::Module, NodeKey::Synthetic(0), FxHashSet::default());
        let mut arena = DefArena::new();
        let def = arena.push(crate::def::Def::new(NodeKey::Synthetic(1), name("x")));
        stack.enter_dead_code();
        stack.set_definition(&name("x"), OrderedSet::single(def), &mut arena);
        assert!(stack.current().lookup(&name("x")).is_none());
    }
}
