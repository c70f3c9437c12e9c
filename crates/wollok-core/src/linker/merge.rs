//! Bottom-up package merge, ahead of id assignment.
//!
//! Operates directly on the parser's owned [`ParsedPackage`] trees, before anything is
//! placed in the linked [`crate::node::Environment`] arena. This keeps "does this name
//! already exist at this nesting level" a simple map lookup instead of an arena walk.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    linker::LinkError,
    parsed::{ParsedImport, ParsedNode, ParsedPackage},
};

/// A package after same-name siblings at every nesting level have been merged.
///
/// Nested packages are merged recursively and kept separate from flat members so the
/// arena builder can walk `nested` before `members` without re-discovering which
/// members were packages.
#[derive(Debug)]
pub(crate) struct MergedPackage {
    pub name: String,
    pub imports: Vec<ParsedImport>,
    pub nested: IndexMap<String, MergedPackage>,
    pub members: Vec<ParsedNode>,
}

/// Merges a flat list of top-level packages (as handed to [`crate::linker::link`]) into
/// one [`MergedPackage`] per distinct top-level name, in first-seen order.
pub(crate) fn merge_top_level(packages: Vec<ParsedPackage>) -> Result<Vec<MergedPackage>, LinkError> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: AHashMap<String, Vec<ParsedPackage>> = AHashMap::new();
    for package in packages {
        if !groups.contains_key(&package.name) {
            order.push(package.name.clone());
        }
        groups.entry(package.name.clone()).or_default().push(package);
    }
    order
        .into_iter()
        .map(|name| merge_group(groups.remove(&name).expect("grouped by the same key above")))
        .collect()
}

fn merge_group(group: Vec<ParsedPackage>) -> Result<MergedPackage, LinkError> {
    let name = group[0].name.clone();
    let mut imports = Vec::new();
    let mut nested_order: Vec<String> = Vec::new();
    let mut nested_groups: AHashMap<String, Vec<ParsedPackage>> = AHashMap::new();

    // name -> (kind tag, member), in first-seen order; later members with the same
    // name replace the value but keep the original position.
    let mut member_order: Vec<String> = Vec::new();
    let mut members: AHashMap<String, (&'static str, ParsedNode)> = AHashMap::new();
    let mut anon_counter: u32 = 0;

    for package in group {
        imports.extend(package.imports);
        for member in package.members {
            if let ParsedNode::Package(nested) = member {
                if !nested_groups.contains_key(&nested.name) {
                    nested_order.push(nested.name.clone());
                }
                nested_groups.entry(nested.name.clone()).or_default().push(*nested);
                continue;
            }
            let kind = member_kind_tag(&member);
            let key = member_name(&member).map_or_else(
                || {
                    anon_counter += 1;
                    format!("<anonymous#{anon_counter}>")
                },
                str::to_owned,
            );
            if let Some((existing_kind, _)) = members.get(&key) {
                if *existing_kind != kind {
                    return Err(LinkError::MergeConflict {
                        name: key,
                        first_kind: (*existing_kind).to_owned(),
                        second_kind: kind.to_owned(),
                    });
                }
            } else {
                member_order.push(key.clone());
            }
            members.insert(key, (kind, member));
        }
    }

    let mut nested = IndexMap::new();
    for nested_name in nested_order {
        let group = nested_groups.remove(&nested_name).expect("grouped by the same key above");
        nested.insert(nested_name, merge_group(group)?);
    }

    let members = member_order
        .into_iter()
        .map(|key| members.remove(&key).expect("inserted above").1)
        .collect();

    Ok(MergedPackage {
        name,
        imports,
        nested,
        members,
    })
}

fn member_kind_tag(node: &ParsedNode) -> &'static str {
    match node {
        ParsedNode::Package(_) => "package",
        ParsedNode::Class { .. } => "class",
        ParsedNode::Mixin { .. } => "mixin",
        ParsedNode::Singleton { .. } => "singleton",
        ParsedNode::Closure { .. } => "closure",
        ParsedNode::Program { .. } => "program",
        ParsedNode::Test { .. } => "test",
        ParsedNode::Describe { .. } => "describe",
        _ => "expression",
    }
}

fn member_name(node: &ParsedNode) -> Option<&str> {
    match node {
        ParsedNode::Class { name, .. }
        | ParsedNode::Mixin { name, .. }
        | ParsedNode::Program { name, .. }
        | ParsedNode::Test { name, .. }
        | ParsedNode::Describe { name, .. } => Some(name),
        ParsedNode::Singleton { name, .. } => name.as_deref(),
        _ => None,
    }
}
