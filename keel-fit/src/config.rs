//! Configuration Resolver
//!
//! A payload may carry several configurations, each naming a kernel, a
//! device tree and optionally a ramdisk, plus the platforms it supports:
//!
//! ```text
//! /configurations
//!     default { compatible = "board,x"; kernel = "kernel-1"; fdt = "fdt-1"; }
//!     legacy  { compatible = "board,y", "board,generic"; ... }
//! ```
//!
//! Selection is first-match in declaration order: a configuration matches when
//! any of its compatible strings equals any platform string. Payload authors
//! list the most specific configurations first.

use crate::component::Role;
use crate::error::{Error, Result};
use crate::tree::{Node, Tree};

/// Path of the configurations subtree.
pub const CONFIGURATIONS_PATH: &str = "/configurations";

/// A configuration node selected from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration<'a> {
    node: Node,
    name: &'a str,
}

impl<'a> Configuration<'a> {
    #[inline]
    #[must_use]
    pub fn node(&self) -> Node {
        self.node
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Name of the image referenced for `role`, if the configuration has one.
    pub fn component_name(&self, tree: &Tree<'a>, role: Role) -> Result<Option<&'a str>> {
        match tree.property(self.node, role.property())? {
            Some(prop) => prop.as_str().map(Some),
            None => Ok(None),
        }
    }
}

/// Whether any compatible string of `config` is in `platform`.
fn is_compatible(tree: &Tree<'_>, config: Node, platform: &[&str]) -> Result<bool> {
    let Some(compatible) = tree.property(config, "compatible")? else {
        return Ok(false);
    };
    for candidate in compatible.strings() {
        let candidate = candidate?;
        if platform.contains(&candidate) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Select the first configuration compatible with the platform.
///
/// # Arguments
///
/// * `tree` - The payload
/// * `platform` - Compatible strings of the running platform
///
/// # Returns
///
/// The first matching configuration in declaration order, or
/// [`Error::NoMatch`]. Configurations without a `compatible` property never
/// match.
pub fn select_best_configuration<'a>(
    tree: &Tree<'a>,
    platform: &[&str],
) -> Result<Configuration<'a>> {
    let configurations = tree.resolve(CONFIGURATIONS_PATH)?;

    for node in tree.children(configurations)? {
        let node = node?;
        let name = tree.name(node)?;
        if is_compatible(tree, node, platform)? {
            if let Some(desc) = tree.property(node, "description")? {
                log::info!("Configuration '{}': {}", name, desc.as_str().unwrap_or("?"));
            } else {
                log::info!("Configuration '{}'", name);
            }
            return Ok(Configuration { node, name });
        }
        log::debug!("Skipping configuration '{}': not compatible", name);
    }

    log::error!("No configuration matches platform {:?}", platform);
    Err(Error::NoMatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TreeBuilder;
    use alloc::vec::Vec;

    fn payload(configs: &[(&str, &[&str])]) -> Vec<u8> {
        let mut b = TreeBuilder::new();
        b.begin_node("").begin_node("configurations");
        for (name, compat) in configs {
            b.begin_node(name);
            if !compat.is_empty() {
                b.prop_strings("compatible", compat);
            }
            b.prop_str("kernel", "kernel-1").prop_str("fdt", "fdt-1").end_node();
        }
        b.end_node().end_node();
        b.finish()
    }

    #[test]
    fn test_selects_matching_configuration() {
        let blob = payload(&[("default", &["board,x"][..])]);
        let tree = Tree::new(&blob).unwrap();
        let config = select_best_configuration(&tree, &["board,x", "board,generic"]).unwrap();
        assert_eq!(config.name(), "default");
        assert_eq!(config.component_name(&tree, Role::Kernel), Ok(Some("kernel-1")));
        assert_eq!(config.component_name(&tree, Role::Ramdisk), Ok(None));
    }

    #[test]
    fn test_first_declared_match_wins() {
        let blob = payload(&[
            ("other", &["board,z"][..]),
            ("generic", &["board,generic"][..]),
            ("specific", &["board,x"][..]),
        ]);
        let tree = Tree::new(&blob).unwrap();
        // "specific" matches the first platform string, but "generic" is declared first
        for _ in 0..3 {
            let config = select_best_configuration(&tree, &["board,x", "board,generic"]).unwrap();
            assert_eq!(config.name(), "generic");
        }
    }

    #[test]
    fn test_any_compatible_entry_matches() {
        let blob = payload(&[("multi", &["board,a", "board,b", "board,x"][..])]);
        let tree = Tree::new(&blob).unwrap();
        assert_eq!(select_best_configuration(&tree, &["board,x"]).unwrap().name(), "multi");
    }

    #[test]
    fn test_no_match() {
        let blob = payload(&[("default", &["board,x"][..]), ("bare", &[][..])]);
        let tree = Tree::new(&blob).unwrap();
        assert_eq!(select_best_configuration(&tree, &["board,y"]), Err(Error::NoMatch));
        assert_eq!(select_best_configuration(&tree, &[]), Err(Error::NoMatch));
    }

    #[test]
    fn test_missing_configurations_node() {
        let mut b = TreeBuilder::new();
        b.begin_node("").begin_node("images").end_node().end_node();
        let blob = b.finish();
        let tree = Tree::new(&blob).unwrap();
        assert_eq!(select_best_configuration(&tree, &["board,x"]), Err(Error::NotFound));
    }
}
