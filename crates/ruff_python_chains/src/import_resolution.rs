//! Resolves `import`/`from ... import ...` statements into
//! `(origin module, imported name)` pairs, keyed by the bound alias node.
//!
//! This crate has no module-resolution database to consult, so relative
//! imports are resolved by dotted-string arithmetic alone: it only
//! records what the source *says* the origin is.

use rustc_hash::FxHashMap;
use rustpython_ast::{self as ast, Stmt};

use crate::diagnostic::ChainsError;
use crate::node_key::{node_key, NodeKey};

/// A wildcard (`*`) imported name, recorded verbatim; the analyzer treats
/// it as an opaque source of bindings for all otherwise-unresolved names
/// in the importing scope.
pub const WILDCARD: &str = "*";

/// One resolved import: where a bound name came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImportInfo {
    /// Dotted origin module path, e.g. `"a.b"`.
    pub origin_module: String,
    /// The imported symbol's name within `origin_module`, or `None` for a
    /// plain `import a.b.c` form that binds the module itself.
    pub imported_name: Option<String>,
}

impl ImportInfo {
    /// The fully qualified name of the imported symbol, e.g. `"a.b.c"` or
    /// (no imported name) just `"a"`.
    pub fn target(&self) -> String {
        match &self.imported_name {
            Some(name) => format!("{}.{name}", self.origin_module),
            None => self.origin_module.clone(),
        }
    }
}

/// Parses one `import`/`from ... import ...` statement into a mapping
/// from each bound alias node to its resolved [`ImportInfo`].
///
/// `module_name` is the dotted name of the module being analyzed;
/// `is_package` marks it as a package for relative-import arithmetic
/// (a `.__init__` module resolves relative imports as if its own path
/// were the package's path, not a submodule's).
pub fn parse_import(
    stmt: &Stmt,
    module_name: &str,
    is_package: bool,
) -> Result<FxHashMap<NodeKey, ImportInfo>, ChainsError> {
    let mut result = FxHashMap::default();
    match stmt {
        Stmt::Import(import) => {
            for alias in &import.names {
                let info = if alias.asname.is_some() {
                    ImportInfo {
                        origin_module: alias.name.as_str().to_owned(),
                        imported_name: None,
                    }
                } else {
                    // Only the first dotted component is bound by a plain
                    // `import a.b.c`; we are mapping bound names, not
                    // dependencies, so the rest of the path is dropped.
                    let first_component = alias
                        .name
                        .as_str()
                        .split_once('.')
                        .map_or(alias.name.as_str(), |(head, _)| head);
                    ImportInfo {
                        origin_module: first_component.to_owned(),
                        imported_name: None,
                    }
                };
                result.insert(node_key(alias), info);
            }
        }
        Stmt::ImportFrom(import_from) => {
            let current_module: Vec<&str> = if module_name.is_empty() {
                Vec::new()
            } else {
                module_name.split('.').collect()
            };
            let module_components: Vec<&str> = import_from
                .module
                .as_ref()
                .map(|name| name.as_str().split('.').collect())
                .unwrap_or_default();

            let source_module = match import_from.level {
                None | Some(0) => module_components.clone(),
                Some(level) => {
                    let level = level as usize;
                    let mut relative = if is_package {
                        truncate_from_end(&current_module, level.saturating_sub(1))
                    } else {
                        truncate_from_end(&current_module, level)
                    };
                    if relative.is_empty() {
                        // Don't error on a relative import that makes no
                        // sense; pad the name with dots instead.
                        relative = vec![""; level];
                    }
                    relative.into_iter().chain(module_components.clone()).collect()
                }
            };
            let origin_module = source_module.join(".");

            for alias in &import_from.names {
                let imported_name = alias.name.as_str();
                result.insert(
                    node_key(alias),
                    ImportInfo {
                        origin_module: origin_module.clone(),
                        imported_name: Some(imported_name.to_owned()),
                    },
                );
            }
        }
        other => {
            return Err(ChainsError::UnsupportedImportNode {
                kind: stmt_kind_name(other),
            });
        }
    }
    Ok(result)
}

fn truncate_from_end<'a>(components: &[&'a str], drop: usize) -> Vec<&'a str> {
    let keep = components.len().saturating_sub(drop);
    components[..keep].to_vec()
}

fn stmt_kind_name(stmt: &Stmt) -> &'static str {
    match stmt {
        Stmt::Import(_) => "Import",
        Stmt::ImportFrom(_) => "ImportFrom",
        _ => "Stmt",
    }
}

/// Splits a POSIX-style filename into non-empty parts, dropping any
/// leading/trailing separators.
///
/// ```text
/// split_posix_path("typing.pyi") == ["typing.pyi"]
/// split_posix_path("/var/lib/config.ini") == ["var", "lib", "config.ini"]
/// split_posix_path("/var/lib/config/") == ["var", "lib", "config"]
/// ```
///
/// Out of scope per spec.md §1 ("a thin helper"): no Windows path handling.
pub fn split_posix_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

/// Deduces the candidate dotted module names a filename could correspond
/// to, most-qualified first: every suffix of the path's components (an
/// `__init__` filename drops its own component rather than contributing a
/// `.__init__` suffix), skipping any suffix that isn't entirely made of
/// valid identifier components.
///
/// ```text
/// potential_module_names("/var/lib/config.py")
///     == ["var.lib.config", "lib.config", "config"]
/// potential_module_names("git-repos/pydoctor/pydoctor/__init__.py")
///     == ["pydoctor.pydoctor", "pydoctor"]
/// ```
///
/// Falls back to `[""]` when nothing in the path yields a usable name.
pub fn potential_module_names(filename: &str) -> Vec<String> {
    let mut parts = split_posix_path(filename);
    let Some(last) = parts.pop() else {
        return vec![String::new()];
    };
    let stem = last.split('.').next().unwrap_or(last);
    if stem != "__init__" {
        parts.push(stem);
    }

    let mut names = Vec::new();
    for start in 0..parts.len() {
        let suffix = &parts[start..];
        if suffix.is_empty() || !suffix.iter().all(|part| is_dotted_identifier(part)) {
            continue;
        }
        names.push(suffix.join("."));
    }
    if names.is_empty() {
        names.push(String::new());
    }
    names
}

fn is_dotted_identifier(component: &str) -> bool {
    component.split('.').all(is_identifier)
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_alphanumeric())
}

/// For a single `import`/`from import` alias, the name it binds locally:
/// the `asname` if present, otherwise the first dotted component of a
/// plain import's target, or the plain imported name for a `from`
/// import.
pub fn bound_name(stmt: &Stmt, alias: &ast::Alias) -> String {
    if let Some(asname) = &alias.asname {
        return asname.as_str().to_owned();
    }
    match stmt {
        Stmt::Import(_) => alias
            .name
            .as_str()
            .split_once('.')
            .map_or(alias.name.as_str(), |(head, _)| head)
            .to_owned(),
        _ => alias.name.as_str().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_relative_import_keeps_one_more_component() {
        // `from . import x` inside package `a.b` (is_package=true, level=1)
        // should resolve to `a.b`, not `a`.
        let current = vec!["a", "b"];
        let relative = truncate_from_end(&current, 0); // level 1, package: drop level-1=0
        assert_eq!(relative, vec!["a", "b"]);
    }

    #[test]
    fn non_package_relative_import_drops_its_own_module() {
        // `from . import x` inside module `a.b` (is_package=false, level=1)
        // should resolve to `a`.
        let current = vec!["a", "b"];
        let relative = truncate_from_end(&current, 1);
        assert_eq!(relative, vec!["a"]);
    }

    #[test]
    fn empty_result_pads_with_dots_rather_than_erroring() {
        let current: Vec<&str> = vec!["a"];
        let relative = truncate_from_end(&current, 1);
        assert!(relative.is_empty());
    }

    #[test]
    fn split_posix_path_drops_leading_and_trailing_separators() {
        assert_eq!(split_posix_path("typing.pyi"), vec!["typing.pyi"]);
        assert_eq!(split_posix_path("/var/lib/config.ini"), vec!["var", "lib", "config.ini"]);
        assert_eq!(split_posix_path("/var/lib/config/"), vec!["var", "lib", "config"]);
    }

    #[test]
    fn potential_module_names_yields_every_importable_suffix() {
        assert_eq!(
            potential_module_names("/var/lib/config.py"),
            vec!["var.lib.config", "lib.config", "config"]
        );
        assert_eq!(
            potential_module_names("git-repos/pydoctor/pydoctor/driver.py"),
            vec!["pydoctor.pydoctor.driver", "pydoctor.driver", "driver"]
        );
    }

    #[test]
    fn potential_module_names_drops_init_itself_as_a_component() {
        assert_eq!(
            potential_module_names("git-repos/pydoctor/pydoctor/__init__.py"),
            vec!["pydoctor.pydoctor", "pydoctor"]
        );
    }
}
