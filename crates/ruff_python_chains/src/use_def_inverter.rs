//! Inverts the def -> use graph the builder produces into a use -> defs
//! view: for a given read, which definitions could it be reading?
//!
//! The builder only ever records edges in one direction (a `Def` knows
//! its users, never the other way around) because that's the direction
//! analysis naturally produces them in - a read's defining scope is
//! known at the moment the read is visited, while a definition's future
//! readers are not. Most consumers want the opposite view, so this
//! module builds it once, after the fact, rather than maintaining a
//! second live index throughout the walk.

use rustc_hash::FxHashMap;

use crate::def::{DefArena, DefId};
use crate::node_key::NodeKey;

/// Node-keyed view of "which Defs is this node a user of".
///
/// Every node passed to [`invert`] via `use_sites` gets an entry, even an
/// empty one - a read that resolved to nothing still belongs in the
/// inverse map, rather than silently falling out of it.
#[derive(Default)]
pub struct UseDefChains {
    defs_by_use: FxHashMap<NodeKey, Vec<DefId>>,
}

impl UseDefChains {
    /// The definitions `node` is a use of, if any were recorded for it.
    pub fn defs_for(&self, node: NodeKey) -> &[DefId] {
        self.defs_by_use.get(&node).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.defs_by_use.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs_by_use.is_empty()
    }
}

/// Builds the use -> defs view from `arena`'s completed def -> use edges.
///
/// `use_sites` should enumerate every node the caller considers a
/// potential use (ordinarily every `Name` node in `Load` context) so
/// that reads with no resolved definition still get a (empty) entry,
/// keeping the map total over reads rather than only over successful
/// ones. Builtin `Def`s live in the same arena as everything else, so a
/// single pass over `arena.ids()` already picks up their user edges; the
/// separate `builtins` parameter only guards against a caller-supplied
/// `use_sites`/arena pairing where that invariant doesn't hold, and is
/// therefore deduplicated against the main pass rather than appended
/// unconditionally.
pub fn invert(
    arena: &DefArena,
    use_sites: impl IntoIterator<Item = NodeKey>,
    builtins: impl IntoIterator<Item = DefId>,
) -> UseDefChains {
    let mut defs_by_use: FxHashMap<NodeKey, Vec<DefId>> = FxHashMap::default();

    for key in use_sites {
        defs_by_use.entry(key).or_default();
    }

    let mut record = |def_id: DefId, defs_by_use: &mut FxHashMap<NodeKey, Vec<DefId>>| {
        for user in arena.get(def_id).users() {
            let user_key = arena.get(user).key();
            let entry = defs_by_use.entry(user_key).or_default();
            if !entry.contains(&def_id) {
                entry.push(def_id);
            }
        }
    };

    for def_id in arena.ids() {
        record(def_id, &mut defs_by_use);
    }
    for builtin_id in builtins {
        record(builtin_id, &mut defs_by_use);
    }

    UseDefChains { defs_by_use }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::Def;
    use crate::name::Name;

    #[test]
    fn a_use_with_no_resolved_definition_still_gets_an_entry() {
        let arena = DefArena::new();
        let read_site = NodeKey::Synthetic(0);
        let chains = invert(&arena, [read_site], []);
        assert!(chains.defs_for(read_site).is_empty());
        assert_eq!(chains.len(), 1);
    }

    #[test]
    fn a_def_s_user_becomes_the_use_s_def() {
        let mut arena = DefArena::new();
        let def = arena.push(Def::new(NodeKey::Synthetic(0), Name::new_static("x")));
        let use_def = arena.push(Def::new(NodeKey::Synthetic(1), Name::new_static("x")));
        arena.add_user(def, use_def);
        let chains = invert(&arena, [NodeKey::Synthetic(1)], []);
        assert_eq!(chains.defs_for(NodeKey::Synthetic(1)), &[def]);
    }
}
