/// Identity handle for a node participating in the def-use graph.
///
/// The analyzer needs to key maps (`chains`, `locals`, `imports`) by AST
/// node identity, not by structural equality: two syntactically identical
/// `Name` nodes at different source locations must never collapse into one
/// entry. Pointer identity into the borrowed AST does this in O(1) without
/// needing every node to carry an explicit id field.
///
/// `Builtin` and `Synthetic` variants cover the handful of Defs that have
/// no backing AST node at all (the built-in table, the `__class__` marker
/// installed in every class body, and the `def695` type-parameter wrapper
/// scopes synthesized during traversal).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum NodeKey {
    Ast(usize),
    Builtin(&'static str),
    Synthetic(u32),
}

/// Returns a stable identity key for a node reachable through a shared
/// reference into the analyzed module's AST.
///
/// # Safety / validity
/// The key is only meaningful for the lifetime of the borrow it was taken
/// from: the analyzer never moves or reallocates the AST it was handed, so
/// the pointer stays valid (and distinct from any other live node's
/// pointer) for the whole analysis.
pub fn node_key<T>(node: &T) -> NodeKey {
    NodeKey::Ast(std::ptr::from_ref(node) as usize)
}
