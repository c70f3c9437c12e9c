//! Reference resolution: the scope chain walk described in the specification's data
//! model, plus module linearization for mixin-aware member lookup.

use ahash::AHashSet;

use crate::{
    linker::LinkError,
    node::{Body, Environment, Module, ModuleKind, Node, NodeId},
};

/// Resolves every `Reference`, superclass/mixin name, `New` target, catch exception
/// type, and parameterized-type name in `env`, in place.
pub(crate) fn resolve_all(env: &mut Environment) -> Result<(), LinkError> {
    resolve_module_hierarchies(env)?;
    let ids: Vec<NodeId> = env.ids().collect();
    for id in ids {
        resolve_node(env, id)?;
    }
    Ok(())
}

/// First pass: resolve every `superclass_name`/`mixin_names` to node ids, so
/// linearization (used by every other lookup) has something to walk.
fn resolve_module_hierarchies(env: &mut Environment) -> Result<(), LinkError> {
    let ids: Vec<NodeId> = env.ids().collect();
    for id in ids {
        let Node::Module(_, module) = env.node(id) else { continue };
        let superclass_name = module.superclass_name.clone();
        let mixin_names = module.mixin_names.clone();
        let superclass = superclass_name
            .as_deref()
            .map(|name| {
                resolve_type_name(env, id, name)
                    .ok_or_else(|| LinkError::UnresolvedReference {
                        name: name.to_owned(),
                        site: id,
                    })
            })
            .transpose()?;
        let mut mixins = Vec::with_capacity(mixin_names.len());
        for name in &mixin_names {
            mixins.push(
                resolve_type_name(env, id, name).ok_or_else(|| LinkError::UnresolvedReference {
                    name: name.clone(),
                    site: id,
                })?,
            );
        }
        if let Node::Module(_, module) = env.node_mut(id) {
            module.superclass = superclass;
            module.mixins = mixins;
        }
    }
    Ok(())
}

fn resolve_node(env: &mut Environment, id: NodeId) -> Result<(), LinkError> {
    match env.node(id).clone() {
        Node::Reference(reference) => {
            if reference.name.is_empty() {
                return Err(LinkError::MalformedTree {
                    site: id,
                    reason: "declaration found where an expression was expected".to_owned(),
                });
            }
            let target = resolve_reference(env, id, &reference.name).ok_or_else(|| LinkError::UnresolvedReference {
                name: reference.name.clone(),
                site: id,
            })?;
            if let Node::Reference(r) = env.node_mut(id) {
                r.target = Some(target);
            }
        }
        Node::New(new_node) => {
            let target = resolve_type_name(env, id, &new_node.instantiated_name).ok_or_else(|| {
                LinkError::UnresolvedReference {
                    name: new_node.instantiated_name.clone(),
                    site: id,
                }
            })?;
            if let Node::New(n) = env.node_mut(id) {
                n.instantiated = Some(target);
            }
        }
        Node::Catch(catch) => {
            let target = resolve_type_name(env, id, &catch.exception_type_name).ok_or_else(|| {
                LinkError::UnresolvedReference {
                    name: catch.exception_type_name.clone(),
                    site: id,
                }
            })?;
            if let Node::Catch(c) = env.node_mut(id) {
                c.exception_type = Some(target);
            }
        }
        Node::ParameterizedType(pt) => {
            let target = resolve_type_name(env, id, &pt.name).ok_or_else(|| LinkError::UnresolvedReference {
                name: pt.name.clone(),
                site: id,
            })?;
            if let Node::ParameterizedType(p) = env.node_mut(id) {
                p.target = Some(target);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Resolves a general (non-type) name using the scope chain: local block, enclosing
/// method/closure parameters, enclosing module's linearized members, enclosing
/// package, imports, root.
pub(crate) fn resolve_reference(env: &Environment, site: NodeId, name: &str) -> Option<NodeId> {
    let mut current = Some(site);
    let mut prev: Option<NodeId> = None;
    let mut module_checked = false;
    while let Some(id) = current {
        match env.node(id) {
            Node::Body(body) => {
                if let Some(child) = prev {
                    if let Some(found) = local_in_body(env, body, child, name) {
                        return Some(found);
                    }
                }
            }
            Node::Method(method) => {
                if let Some(found) = method.parameters.iter().copied().find(|&p| env.node(p).simple_name() == Some(name)) {
                    return Some(found);
                }
            }
            Node::Constructor(ctor) => {
                if let Some(found) = ctor.parameters.iter().copied().find(|&p| env.node(p).simple_name() == Some(name)) {
                    return Some(found);
                }
            }
            Node::Module(..) => {
                if !module_checked {
                    module_checked = true;
                    if let Some(found) = lookup_member_in_linearization(env, id, name) {
                        return Some(found);
                    }
                }
            }
            Node::Package(pkg) => {
                if let Some(found) = pkg.members.iter().copied().find(|&m| env.node(m).simple_name() == Some(name)) {
                    return Some(found);
                }
                if let Some(found) = resolve_via_imports(env, id, name) {
                    return Some(found);
                }
            }
            _ => {}
        }
        prev = Some(id);
        current = env.parent(id);
    }
    None
}

/// Variables visible at `child`'s position within `body`: every `Variable` declared in
/// a statement up to and including `child`'s own statement. A variable is in scope from
/// its own declaration, so `var x = x` resolves `x` to itself (the reference reads an
/// as-yet-unassigned local, which is a runtime concern, not a linking one).
fn local_in_body(env: &Environment, body: &Body, child: NodeId, name: &str) -> Option<NodeId> {
    let index = body.statements.iter().position(|&s| s == child)?;
    body.statements[..=index]
        .iter()
        .rev()
        .copied()
        .find(|&stmt| matches!(env.node(stmt), Node::Variable(v) if v.name == name))
}

/// Resolves a type name (superclass, mixin, `New` target, catch exception type,
/// parameterized type): always a package member, found by walking up to enclosing
/// packages (skipping local/parameter/module-member scopes) and their imports, or, for
/// a dotted name, by a direct path walk from the environment root.
pub(crate) fn resolve_type_name(env: &Environment, from: NodeId, name: &str) -> Option<NodeId> {
    if name.contains('.') {
        return resolve_fqn(env, name);
    }
    let mut current = env.parent(from);
    while let Some(id) = current {
        if let Node::Package(pkg) = env.node(id) {
            if let Some(found) = pkg.members.iter().copied().find(|&m| env.node(m).simple_name() == Some(name)) {
                return Some(found);
            }
            if let Some(found) = resolve_via_imports(env, id, name) {
                return Some(found);
            }
        }
        current = env.parent(id);
    }
    None
}

pub(crate) fn resolve_fqn(env: &Environment, fqn: &str) -> Option<NodeId> {
    let mut current = env.root_package;
    for part in fqn.split('.') {
        current = env.members_of(current).iter().copied().find(|&m| env.node(m).simple_name() == Some(part))?;
    }
    Some(current)
}

fn resolve_via_imports(env: &Environment, pkg_id: NodeId, name: &str) -> Option<NodeId> {
    let Node::Package(pkg) = env.node(pkg_id) else { return None };
    for import in &pkg.imports {
        match &import.entity {
            Some(entity) if entity == name => {
                if let Some(target) = resolve_fqn(env, &format!("{}.{entity}", import.path)) {
                    return Some(target);
                }
            }
            Some(_) => {}
            None => {
                if let Some(pkg_node) = resolve_fqn(env, &import.path) {
                    if let Some(found) = env.members_of(pkg_node).iter().copied().find(|&m| env.node(m).simple_name() == Some(name)) {
                        return Some(found);
                    }
                }
            }
        }
    }
    None
}

/// The module linearization order: `[self, Mn, .., M1, superclass, ...]`, duplicates
/// removed keeping the leftmost (so a name found via `self` or an earlier mixin always
/// wins over one found later). The `seen` guard makes this terminate on
/// self-inheritance and inheritance/mixin cycles, which are tolerated in the linked
/// tree (diagnosing them is the validator's job).
pub(crate) fn linearize(env: &Environment, module: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut seen = AHashSet::new();
    linearize_into(env, module, &mut out, &mut seen);
    out
}

fn linearize_into(env: &Environment, id: NodeId, out: &mut Vec<NodeId>, seen: &mut AHashSet<NodeId>) {
    if !seen.insert(id) {
        return;
    }
    out.push(id);
    let Node::Module(_, Module { mixins, superclass, .. }) = env.node(id) else {
        return;
    };
    for &mixin in mixins.iter().rev() {
        linearize_into(env, mixin, out, seen);
    }
    if let Some(superclass) = superclass {
        linearize_into(env, *superclass, out, seen);
    }
}

fn lookup_member_in_linearization(env: &Environment, module: NodeId, name: &str) -> Option<NodeId> {
    for ancestor in linearize(env, module) {
        if let Some(found) = env.members_of(ancestor).iter().copied().find(|&m| env.node(m).simple_name() == Some(name)) {
            return Some(found);
        }
    }
    None
}

/// Looks up a method along `module`'s linearization by name and arity (fixed arity
/// match, or a variadic method whose fixed-parameter count is `<= arity`). Used by the
/// compiler/VM for `CALL`/`INIT` dispatch, not by the linker itself.
///
/// `start_at`, when given, names a module already present in the chain and the search
/// begins strictly *after* it — this is how `super` dispatch skips the overriding
/// method's own home module and continues into the superclass/mixin chain. Ordinary
/// dispatch passes `None` and searches the whole chain from the receiver's own module.
pub fn lookup_method(env: &Environment, module: NodeId, start_at: Option<NodeId>, name: &str, arity: usize) -> Option<NodeId> {
    let chain = linearize(env, module);
    let skip = start_at.map_or(0, |marker| chain.iter().position(|&m| m == marker).map_or(0, |p| p + 1));
    for &ancestor in &chain[skip..] {
        for &member in env.members_of(ancestor) {
            if let Node::Method(method) = env.node(member) {
                if method.name != name {
                    continue;
                }
                let fixed = method.parameters.len() - usize::from(method.variadic);
                let matches = if method.variadic { arity >= fixed } else { arity == fixed };
                if matches {
                    return Some(member);
                }
            }
        }
    }
    None
}

/// Looks up the most specific `ModuleKind` of `module`, for `INHERITS`/error messages.
pub fn module_kind(env: &Environment, module: NodeId) -> Option<ModuleKind> {
    match env.node(module) {
        Node::Module(kind, _) => Some(*kind),
        _ => None,
    }
}

/// Looks up a constructor along `module`'s linearization by arity (fixed arity match, or
/// a variadic constructor whose fixed-parameter count is `<= arity`). `INIT` searches
/// only `module` itself (`lookupStart` is always a single module, never a chain start
/// marker the way `CALL`'s is), since a constructor call never dispatches virtually.
pub fn lookup_constructor(env: &Environment, module: NodeId, arity: usize) -> Option<NodeId> {
    for &member in env.members_of(module) {
        if let Node::Constructor(ctor) = env.node(member) {
            let fixed = ctor.parameters.len() - usize::from(ctor.variadic);
            let matches = if ctor.variadic { arity >= fixed } else { arity == fixed };
            if matches {
                return Some(member);
            }
        }
    }
    None
}
