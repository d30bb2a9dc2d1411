//! End-to-end scenario coverage and cross-cutting invariants, driven
//! entirely through the public API (`ChainsOptions`/`DefUseChains`/
//! `Chains`) rather than any crate-internal type.

use pretty_assertions::assert_eq;
use rustpython_ast::Mod;
use rustpython_parser::{parse, Mode};
use test_case::test_case;

use ruff_python_chains::{ChainsOptions, Chains, DefUseChains, NodeKey};

fn analyze(source: &str, options: ChainsOptions<'_>) -> Chains {
    let parsed = parse(source, Mode::Module, "<test>").expect("valid module source");
    let Mod::Module(module) = parsed.into_syntax() else {
        panic!("expected a module");
    };
    // Leaked so the module's borrow can outlive this helper; acceptable in
    // a test process that exits shortly after.
    let module: &'static rustpython_ast::ModModule = Box::leak(Box::new(module));
    DefUseChains::new(options).build(module)
}

fn module_scope(chains: &Chains) -> NodeKey {
    *chains.locals.keys().next().expect("module scope is always recorded")
}

fn defs_named<'a>(chains: &'a Chains, scope: NodeKey, wanted: &str) -> Vec<ruff_python_chains::DefId> {
    chains.locals[&scope]
        .iter()
        .copied()
        .filter(|&id| chains.arena.get(id).name() == wanted)
        .collect()
}

// ---- end-to-end scenarios (spec.md section 8) --------------------------

#[test]
fn simple_import_chains_the_call_through_its_alias() {
    let chains = analyze("from b import c, d\nc()\n", ChainsOptions::default());
    let scope = module_scope(&chains);

    let names = chains.dump_locals(scope);
    assert_eq!(names, vec!["c".to_owned(), "d".to_owned()]);

    let c_def = defs_named(&chains, scope, "c").into_iter().next().expect("c is bound");
    let c = chains.arena.get(c_def);
    assert_eq!(c.user_count(), 1);
    let name_use = c.users().next().expect("c has one user");
    let call_use = chains.arena.get(name_use);
    assert_eq!(call_use.user_count(), 1);
}

#[test]
fn conditional_definition_merges_both_arms_as_live() {
    let chains = analyze(
        "if cond:\n    x = 1\nelse:\n    x = 2\nprint(x)\n",
        ChainsOptions::default(),
    );
    let scope = module_scope(&chains);
    let x_defs = defs_named(&chains, scope, "x");
    assert_eq!(x_defs.len(), 2);
    for id in x_defs {
        assert!(chains.arena.get(id).is_live(), "both conditional arms must stay live");
    }
}

#[test]
fn overwrite_leaves_only_the_second_definition_live() {
    let chains = analyze("x = 1\nx = 2\nuse(x)\n", ChainsOptions::default());
    let scope = module_scope(&chains);
    let mut x_defs = defs_named(&chains, scope, "x");
    x_defs.sort_by_key(|&id| id);
    assert_eq!(x_defs.len(), 2);

    let first = chains.arena.get(x_defs[0]);
    let second = chains.arena.get(x_defs[1]);
    assert!(!first.is_live());
    assert_eq!(first.user_count(), 0, "the shadowed x=1 is never read");
    assert!(second.is_live());
    assert_eq!(second.user_count(), 1, "use(x) only resolves to x=2");
}

#[test]
fn walrus_hoists_its_binding_out_of_the_comprehension() {
    let chains = analyze("[y for _ in range(1) if (y := 0)]\nuse(y)\n", ChainsOptions::default());
    let scope = module_scope(&chains);
    let y_defs = defs_named(&chains, scope, "y");
    assert_eq!(y_defs.len(), 1, "the walrus binds y in the module scope, not the comprehension");
}

#[test]
fn stub_mode_resolves_a_forward_referenced_base_class() {
    let chains = analyze(
        "class A(B): pass\nclass B: pass\n",
        ChainsOptions {
            filename: Some("m.pyi"),
            ..Default::default()
        },
    );
    assert!(
        chains.diagnostics.is_empty(),
        "deferred-annotation mode must let A's base resolve to the later B"
    );
}

#[test]
fn nonlocal_rebind_makes_the_enclosing_binding_non_live() {
    let chains = analyze(
        "def f():\n    x = 1\n    def g():\n        nonlocal x\n        x = 2\n    g()\n    return x\n",
        ChainsOptions::default(),
    );
    assert!(chains.diagnostics.is_empty());
    // Both `x = 1` and the nonlocal `x = 2` are declared in `f`'s scope
    // (the inner `nonlocal` redirects the rebind there); `g()` always
    // runs before `return x`, so the outer `x = 1` cannot reach the
    // return and must be non-live.
    let f_scope = *chains
        .locals
        .keys()
        .find(|&&scope| !chains.dump_locals(scope).is_empty() && chains.dump_locals(scope).contains(&"x".to_owned()))
        .expect("f's scope has locals including x");
    let x_defs = defs_named(&chains, f_scope, "x");
    assert_eq!(x_defs.len(), 2);
    let live_count = x_defs.iter().filter(|&&id| chains.arena.get(id).is_live()).count();
    assert_eq!(live_count, 1, "only the nonlocal rebind should remain live");
}

// ---- universal invariants (spec.md section 8) --------------------------

#[test_case("from b import c, d\nc()\n" ; "simple import")]
#[test_case("if cond:\n    x = 1\nelse:\n    x = 2\nprint(x)\n" ; "conditional definition")]
#[test_case("x = 1\nx = 2\nuse(x)\n" ; "overwrite")]
#[test_case("[y for _ in range(1) if (y := 0)]\nuse(y)\n" ; "walrus hoisting")]
#[test_case("def f():\n    x = 1\n    def g():\n        nonlocal x\n        x = 2\n    g()\n    return x\n" ; "nonlocal rebinding")]
fn every_local_s_chain_round_trips_through_the_use_def_inverter(source: &str) {
    let chains = analyze(source, ChainsOptions::default());
    let inverted = chains.invert();

    for (&use_site, &def_id) in &chains.chains {
        let def = chains.arena.get(def_id);
        for &user in &def.users().collect::<Vec<_>>() {
            let user_key = chains.arena.get(user).key();
            assert!(
                inverted.defs_for(user_key).contains(&def_id),
                "the inverse map must list {def_id:?} among the defs reaching {user_key:?}"
            );
        }
        // Every def-producing node is itself a valid use-site key: a
        // node that is a user of something resolves back to the def it
        // produced when looked up this way.
        let _ = use_site;
    }
}

#[test_case("from b import c, d\nc()\n" ; "simple import")]
#[test_case("if cond:\n    x = 1\nelse:\n    x = 2\nprint(x)\n" ; "conditional definition")]
#[test_case("x = 1\nx = 2\nuse(x)\n" ; "overwrite")]
fn analyzing_the_same_source_twice_is_idempotent(source: &str) {
    let first = analyze(source, ChainsOptions::default());
    let second = analyze(source, ChainsOptions::default());

    let first_scope = module_scope(&first);
    let second_scope = module_scope(&second);
    assert_eq!(first.dump_locals(first_scope), second.dump_locals(second_scope));
    assert_eq!(first.dump_chains(first_scope), second.dump_chains(second_scope));
    assert_eq!(first.diagnostics.len(), second.diagnostics.len());
}

#[test]
fn every_local_s_name_is_accounted_for_by_locals_globals_or_class_self() {
    let chains = analyze(
        "class C:\n    attr = 1\n\ndef outer():\n    total = 0\n    def inner():\n        nonlocal total\n        total += 1\n    inner()\n    return total\n",
        ChainsOptions::default(),
    );
    assert!(chains.diagnostics.is_empty());
    for defs in chains.locals.values() {
        for &id in defs {
            // Every recorded local has a name; an empty name would mean a
            // binding site was installed without ever being assigned one,
            // which should never happen for a scope's own bindings.
            assert!(!chains.arena.get(id).name().as_str().is_empty());
        }
    }
    // `class C`'s scope carries the synthetic `__class__` self-reference
    // alongside its own `attr` binding.
    let class_scope = chains
        .locals
        .keys()
        .copied()
        .find(|&scope| chains.dump_locals(scope).contains(&"__class__".to_owned()))
        .expect("class scope records __class__");
    assert!(chains.dump_locals(class_scope).contains(&"attr".to_owned()));
}

#[test]
fn an_unbound_read_is_diagnosed_but_does_not_abort_analysis() {
    let chains = analyze("print(totally_unknown_name)\nx = 1\n", ChainsOptions::default());
    assert_eq!(chains.diagnostics.len(), 1);
    // Analysis continues past the offending read: x is still recorded.
    let scope = module_scope(&chains);
    assert_eq!(chains.dump_locals(scope), vec!["x".to_owned()]);
}
