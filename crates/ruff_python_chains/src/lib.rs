//! Static def-use chain analysis for a single Python-like module AST.
//!
//! [`DefUseChains`] drives a single depth-first traversal of a module
//! (`builder.rs`) that produces, for every binding site, the set of uses
//! that may observe it, and for every use, the set of definitions that may
//! reach it - together with a per-scope locals table and a resolved import
//! table. One instance analyzes exactly one module; it is not reusable
//! afterwards.
//!
//! ```
//! use ruff_python_chains::{ChainsOptions, DefUseChains};
//! use rustpython_ast::Mod;
//!
//! let parsed = rustpython_parser::parse(
//!     "from b import c, d\nc()\n",
//!     rustpython_parser::Mode::Module,
//!     "<test>",
//! )
//! .unwrap();
//! let Mod::Module(module) = parsed.into_syntax() else {
//!     unreachable!()
//! };
//! let chains = DefUseChains::new(ChainsOptions::default()).build(&module);
//! assert!(chains.diagnostics.is_empty());
//! ```

mod ancestors;
mod annotation_lookup;
mod builder;
mod builtins;
mod def;
mod diagnostic;
mod future_imports;
mod import_resolution;
mod locals;
mod name;
mod node_key;
mod ordered_set;
mod scope;
mod use_def_inverter;
mod validate;

pub use ancestors::Ancestors;
pub use def::{ChainDisplay, Def, DefArena, DefId};
pub use diagnostic::{ChainsError, Diagnostic, DiagnosticKind};
pub use import_resolution::{ImportInfo, WILDCARD};
pub use name::Name;
pub use node_key::{node_key, NodeKey};
pub use ordered_set::OrderedSet;
pub use use_def_inverter::{invert, UseDefChains};

use rustc_hash::FxHashMap;
use rustpython_ast as ast;

use builder::Builder;

/// Constructor parameters for [`DefUseChains::new`], mirroring the
/// original `DefUseChains.__init__` keyword parameters as an explicit
/// struct rather than stringly-typed kwargs.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChainsOptions<'a> {
    /// POSIX-style path to the source file. Used both for the `.pyi` stub
    /// heuristic and, when `module_name` is absent, to derive candidate
    /// module names via [`import_resolution::potential_module_names`].
    pub filename: Option<&'a str>,
    /// Fully qualified dotted name of the module being analyzed. A
    /// trailing `.__init__` marks the module as a package for relative-
    /// import arithmetic.
    pub module_name: Option<&'a str>,
    /// Forces deferred-annotation (PEP 563) mode. Also implied by
    /// `is_stub` and by a detected `from __future__ import annotations`.
    pub future_annotations: bool,
    /// Stub-module semantics: implies `future_annotations` and additionally
    /// defers decorators, class bases/keywords, `TypeAlias` values, and
    /// `TypeVar()` bounds. Also implied by a `.pyi` filename.
    pub is_stub: bool,
}

/// One analyzer instance, configured but not yet run.
///
/// Call [`DefUseChains::build`] exactly once; the instance is consumed by
/// the call since its configuration only makes sense for the one module it
/// was built for.
pub struct DefUseChains<'a> {
    options: ChainsOptions<'a>,
}

impl<'a> DefUseChains<'a> {
    pub fn new(options: ChainsOptions<'a>) -> Self {
        Self { options }
    }

    /// Analyzes `module`, producing the complete set of chains, locals,
    /// imports, and diagnostics.
    pub fn build(self, module: &ast::ModModule) -> Chains {
        let ChainsOptions {
            filename,
            module_name,
            future_annotations,
            is_stub,
        } = self.options;

        let _span = tracing::trace_span!("ruff_python_chains::build").entered();

        let is_stub = is_stub || filename.is_some_and(|name| name.ends_with(".pyi"));

        let filename_is_init = filename.is_some_and(|name| {
            let parts = import_resolution::split_posix_path(name);
            let last = parts.last().copied().unwrap_or(name);
            last.split('.').next().unwrap_or(last) == "__init__"
        });

        let (resolved_module_name, is_package) = match module_name {
            Some(name) => match name.strip_suffix(".__init__") {
                Some(stripped) => (stripped.to_owned(), true),
                None => (name.to_owned(), filename_is_init),
            },
            None => {
                let name = filename
                    .map(|f| import_resolution::potential_module_names(f))
                    .and_then(|mut names| if names.is_empty() { None } else { Some(names.remove(0)) })
                    .unwrap_or_default();
                (name, filename_is_init)
            }
        };

        tracing::debug!(
            module = %resolved_module_name,
            is_package,
            is_stub,
            future_annotations,
            "analyzing module"
        );

        let builder = Builder::new(resolved_module_name, is_package, is_stub, future_annotations);
        let output = builder.build(module);

        Chains {
            arena: output.arena,
            chains: output.chains,
            locals: output.locals,
            imports: output.imports,
            diagnostics: output.diagnostics,
        }
    }
}

/// The complete output of analyzing one module.
pub struct Chains {
    /// Every `Def` produced while analyzing the module.
    pub arena: DefArena,
    /// Maps every binding-producing or read node to the `Def` it produced.
    pub chains: FxHashMap<NodeKey, DefId>,
    /// Maps every scope node to the `Def`s it declares, sorted by name for
    /// deterministic iteration.
    pub locals: FxHashMap<NodeKey, Vec<DefId>>,
    /// Maps every import alias node to its resolved origin.
    pub imports: FxHashMap<NodeKey, ImportInfo>,
    /// Recoverable findings surfaced alongside the chains (unbound names,
    /// read-before-assign, syntactic misuse); the analyzer never aborts
    /// for any of these, it only records them.
    pub diagnostics: Vec<Diagnostic>,
}

impl Chains {
    /// Sorted, deduplicated names of the `Def`s declared directly in
    /// `scope`, suitable as a deterministic test fixture (the counterpart
    /// to the original's `dump_definitions`).
    pub fn dump_locals(&self, scope: NodeKey) -> Vec<String> {
        let Some(defs) = self.locals.get(&scope) else {
            return Vec::new();
        };
        let mut names: Vec<String> = defs.iter().map(|&id| self.arena.get(id).name().to_string()).collect();
        names.sort();
        names.dedup();
        names
    }

    /// The chain dump (see [`DefArena::display_chain`]) of every `Def`
    /// declared directly in `scope`, in the same order as
    /// `self.locals[scope]` - the counterpart to the original's
    /// `dump_chains`.
    pub fn dump_chains(&self, scope: NodeKey) -> Vec<String> {
        let Some(defs) = self.locals.get(&scope) else {
            return Vec::new();
        };
        defs.iter().map(|&id| self.arena.display_chain(id).to_string()).collect()
    }

    /// Builds the use-def (inverse) view over every `Name` node load site
    /// this analysis recorded a `Def` for, so a caller never has to
    /// maintain that mapping itself.
    pub fn invert(&self) -> UseDefChains {
        let use_sites = self.chains.keys().copied();
        let builtins = self.arena.ids().filter(|&id| matches!(self.arena.get(id).key(), NodeKey::Builtin(_)));
        use_def_inverter::invert(&self.arena, use_sites, builtins)
    }
}

#[cfg(test)]
mod tests {
    use rustpython_ast::Mod;
    use rustpython_parser::{parse, Mode};

    use super::*;

    fn build(source: &str, options: ChainsOptions<'_>) -> Chains {
        let parsed = parse(source, Mode::Module, "<test>").expect("valid module source");
        let Mod::Module(module) = parsed.into_syntax() else {
            panic!("expected a module");
        };
        DefUseChains::new(options).build(&module)
    }

    #[test]
    fn module_init_suffix_marks_the_module_as_a_package() {
        let chains = build(
            "from . import x\n",
            ChainsOptions {
                module_name: Some("pkg.__init__"),
                ..Default::default()
            },
        );
        let info = chains.imports.values().next().expect("one import");
        assert_eq!(info.origin_module, "pkg");
    }

    #[test]
    fn filename_alone_derives_a_module_name() {
        let chains = build(
            "x = 1\n",
            ChainsOptions {
                filename: Some("pkg/mod.py"),
                ..Default::default()
            },
        );
        assert!(chains.diagnostics.is_empty());
    }

    #[test]
    fn pyi_extension_enables_stub_mode_forward_references() {
        let chains = build(
            "class A(B): pass\nclass B: pass\n",
            ChainsOptions {
                filename: Some("m.pyi"),
                ..Default::default()
            },
        );
        assert!(chains.diagnostics.is_empty());
    }

    #[test]
    fn dump_locals_and_chains_match_the_module_scope() {
        let chains = build("from b import c, d\nc()\n", ChainsOptions::default());
        let module_key = *chains.locals.keys().next().expect("module scope recorded");
        let names = chains.dump_locals(module_key);
        assert_eq!(names, vec!["c".to_owned(), "d".to_owned()]);
        let dumped = chains.dump_chains(module_key);
        assert_eq!(dumped.len(), 2);
    }
}
