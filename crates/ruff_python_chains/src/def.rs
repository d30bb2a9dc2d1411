use std::fmt;

use crate::name::Name;
use crate::node_key::NodeKey;
use crate::ordered_set::OrderedSet;

/// Index into the analyzer's `Def` arena.
///
/// Defs reference each other (a def's users are themselves defs) purely
/// through this handle. Mutual recursion and self-reference make that
/// graph cyclic; modeling edges as arena indices rather than `Rc`/`&`
/// sidesteps the need for any cycle-collecting container at all.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct DefId(u32);

impl DefId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("more than u32::MAX defs in one module"))
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A single binding site, or a placeholder standing in for a read that
/// found no definition.
///
/// One `Def` exists per binding-producing node (assignment target,
/// parameter, import alias, class/function header, type parameter,
/// pattern capture, walrus target, exception capture, ...) and one exists
/// per identifier read, whose "users" are in turn the Defs that
/// syntactically depend on reading it (an attribute access, a call, ...).
#[derive(Debug)]
pub struct Def {
    key: NodeKey,
    name: Name,
    users: OrderedSet<DefId>,
    live: bool,
}

impl Def {
    pub(crate) fn new(key: NodeKey, name: Name) -> Self {
        Self {
            key,
            name,
            users: OrderedSet::new(),
            live: true,
        }
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }

    /// A human name derived once from the node kind that produced this
    /// Def: the identifier for name/arg/alias/except-name/match-capture
    /// nodes, the declared name for class/function/type-parameter nodes,
    /// the node's kind label otherwise (e.g. `"Call"`, `"BinOp"`).
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Whether this definition may reach the end of its scope along at
    /// least one control-flow path. `false` means some later, same-name
    /// definition in the same scope dominates every path to the scope's
    /// end, so this Def could safely be ignored for, say, an attribute
    /// access performed after the scope finishes executing.
    pub fn is_live(&self) -> bool {
        self.live
    }

    pub(crate) fn set_live(&mut self, live: bool) {
        self.live = live;
    }

    pub fn users(&self) -> impl Iterator<Item = DefId> + '_ {
        self.users.iter().copied()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub(crate) fn add_user(&mut self, user: DefId) {
        self.users.insert(user);
    }
}

/// Append-only storage for every `Def` produced while analyzing a module.
///
/// Kept as a plain `Vec` rather than anything fancier: Defs are never
/// removed, only appended and mutated in place (to flip liveness or add a
/// user), so a vector indexed by `DefId` is both the simplest and the
/// fastest representation.
#[derive(Debug, Default)]
pub struct DefArena {
    defs: Vec<Def>,
}

impl DefArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, def: Def) -> DefId {
        let id = DefId::from_index(self.defs.len());
        self.defs.push(def);
        id
    }

    pub fn get(&self, id: DefId) -> &Def {
        &self.defs[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: DefId) -> &mut Def {
        &mut self.defs[id.index()]
    }

    pub(crate) fn add_user(&mut self, def: DefId, user: DefId) {
        self.get_mut(def).add_user(user);
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = DefId> + '_ {
        (0..self.defs.len()).map(DefId::from_index)
    }

    /// Renders `def` and its transitive users as `name -> (user, user,
    /// ...)`, cutting cycles by numbering previously-seen defs `(#k)`, the
    /// same contract as the dump surface a reader would reach for when
    /// writing a test fixture.
    pub fn display_chain(&self, def: DefId) -> ChainDisplay<'_> {
        ChainDisplay { arena: self, def }
    }
}

pub struct ChainDisplay<'a> {
    arena: &'a DefArena,
    def: DefId,
}

impl fmt::Display for ChainDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut seen = Vec::new();
        fmt_chain(self.arena, self.def, &mut seen, f)
    }
}

fn fmt_chain(
    arena: &DefArena,
    def: DefId,
    seen: &mut Vec<DefId>,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    if let Some(index) = seen.iter().position(|&d| d == def) {
        return write!(f, "(#{index})");
    }
    seen.push(def);
    let node = arena.get(def);
    write!(f, "{} -> (", node.name())?;
    let mut first = true;
    for user in node.users() {
        if !first {
            write!(f, ", ")?;
        }
        first = false;
        // Each sibling restarts from this branch point (a copy of the
        // seen-set): a def can appear as `(#k)` once per sibling branch,
        // not just once globally.
        let mut branch = seen.clone();
        fmt_chain(arena, user, &mut branch, f)?;
    }
    write!(f, ")")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_cuts_self_reference_cycles() {
        let mut arena = DefArena::new();
        let a = arena.push(Def::new(NodeKey::Synthetic(0), Name::new_static("a")));
        arena.add_user(a, a);
        assert_eq!(arena.display_chain(a).to_string(), "a -> ((#0))");
    }

    #[test]
    fn dump_renders_a_simple_fan_out() {
        let mut arena = DefArena::new();
        let c = arena.push(Def::new(NodeKey::Synthetic(0), Name::new_static("c")));
        let call_func = arena.push(Def::new(NodeKey::Synthetic(1), Name::new_static("c")));
        let call = arena.push(Def::new(NodeKey::Synthetic(2), Name::new_static("Call")));
        arena.add_user(c, call_func);
        arena.add_user(call_func, call);
        assert_eq!(
            arena.display_chain(c).to_string(),
            "c -> (c -> (Call -> ()))"
        );
    }
}
