//! Converts a merged, pre-id tree into the arena-addressed [`Environment`].
//!
//! Ids are assigned by reservation: a slot is reserved for a node before its children
//! are built (so the children can record the right parent), then filled in once the
//! children's ids are known. `Closure` nodes are desugared here into a `Singleton`
//! (superclass `wollok.lang.Closure`) with a single `apply` method, per the
//! specification's note that `Closure` is pure sugar over `Singleton`.

use crate::{
    linker::{LinkError, merge::MergedPackage},
    node::{
        Assignment, Body, Catch, Constructor, Describe, Environment, Field, If, Import, LiteralValue, Method,
        Module, ModuleKind, NamedArgument, New, Node, NodeId, NodeMeta, Package, Parameter, ParameterizedType,
        Program, Reference, Return, Send, SuperCall, Test, Throw, Try, Variable,
    },
    parsed::{ParsedBaseCall, ParsedCatch, ParsedMember, ParsedNamedArgument, ParsedNode, ParsedParameter},
};

pub(crate) struct Builder {
    nodes: Vec<Node>,
    meta: Vec<NodeMeta>,
    root: NodeId,
}

impl Builder {
    pub(crate) fn from_base(base: Environment) -> Self {
        Self {
            nodes: base.nodes,
            meta: base.meta,
            root: base.root_package,
        }
    }

    fn reserve(&mut self) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("node arena overflowed u32"));
        self.nodes.push(Node::Body(Body { statements: Vec::new() }));
        self.meta.push(NodeMeta::default());
        id
    }

    fn fill(&mut self, id: NodeId, node: Node, parent: Option<NodeId>) {
        self.nodes[id.index()] = node;
        self.meta[id.index()].parent = parent;
    }

    pub(crate) fn finish(self) -> Environment {
        Environment {
            nodes: self.nodes,
            meta: self.meta,
            root_package: self.root,
        }
    }
}

/// Appends the merged top-level packages as new members of `builder`'s root package.
///
/// Fails with [`LinkError::MergeConflict`] if a top-level name collides with an
/// existing root member (expected only for pathological base environments, since the
/// base's own root member is the `wollok` standard library package).
pub(crate) fn attach_top_level(builder: &mut Builder, merged: Vec<MergedPackage>) -> Result<(), LinkError> {
    let mut new_ids = Vec::with_capacity(merged.len());
    for package in merged {
        if let Node::Package(root_pkg) = &builder.nodes[builder.root.index()] {
            if let Some(&existing_id) = root_pkg
                .members
                .iter()
                .find(|&&m| builder.nodes[m.index()].simple_name() == Some(package.name.as_str()))
            {
                return Err(LinkError::MergeConflict {
                    name: package.name,
                    first_kind: builder.nodes[existing_id.index()].kind_tag().to_owned(),
                    second_kind: "package".to_owned(),
                });
            }
        }
        new_ids.push(build_package(builder, package, Some(builder.root)));
    }
    if let Node::Package(root_pkg) = &mut builder.nodes[builder.root.index()] {
        root_pkg.members.extend(new_ids);
    }
    Ok(())
}

fn build_package(builder: &mut Builder, merged: MergedPackage, parent: Option<NodeId>) -> NodeId {
    let id = builder.reserve();
    let mut members = Vec::with_capacity(merged.nested.len() + merged.members.len());
    for (_, nested) in merged.nested {
        members.push(build_package(builder, nested, Some(id)));
    }
    for member in merged.members {
        members.push(build_member(builder, member, id));
    }
    let imports = merged
        .imports
        .into_iter()
        .map(|import| Import {
            path: import.path,
            entity: import.entity,
        })
        .collect();
    builder.fill(
        id,
        Node::Package(Package {
            name: merged.name,
            members,
            imports,
        }),
        parent,
    );
    id
}

fn build_member(builder: &mut Builder, parsed: ParsedNode, parent: NodeId) -> NodeId {
    match parsed {
        ParsedNode::Class {
            name,
            superclass,
            mixins,
            members,
        } => build_module(builder, ModuleKind::Class, Some(name), superclass, mixins, Vec::new(), members, parent),
        ParsedNode::Mixin { name, members } => {
            build_module(builder, ModuleKind::Mixin, Some(name), None, Vec::new(), Vec::new(), members, parent)
        }
        ParsedNode::Singleton {
            name,
            superclass,
            mixins,
            supercall_args,
            members,
        } => build_singleton(builder, name, superclass, mixins, supercall_args, members, parent),
        ParsedNode::Closure { parameters, body } => build_closure(builder, parameters, body, parent),
        ParsedNode::Program { name, body } => {
            let id = builder.reserve();
            let body_id = build_body(builder, body, id);
            builder.fill(id, Node::Program(Program { name, body: body_id }), Some(parent));
            id
        }
        ParsedNode::Test { name, body } => {
            let id = builder.reserve();
            let body_id = build_body(builder, body, id);
            builder.fill(id, Node::Test(Test { name, body: body_id }), Some(parent));
            id
        }
        ParsedNode::Describe { name, members } => {
            let id = builder.reserve();
            let members = members.into_iter().map(|m| build_member(builder, m, id)).collect();
            builder.fill(id, Node::Describe(Describe { name, members }), Some(parent));
            id
        }
        other => build_expr(builder, other, parent),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_module(
    builder: &mut Builder,
    kind: ModuleKind,
    name: Option<String>,
    superclass_name: Option<String>,
    mixin_names: Vec<String>,
    supercall_args: Vec<ParsedNode>,
    members: Vec<ParsedMember>,
    parent: NodeId,
) -> NodeId {
    let id = builder.reserve();
    let supercall_args = supercall_args.into_iter().map(|a| build_expr(builder, a, id)).collect();
    let members = members.into_iter().map(|m| build_module_member(builder, m, id)).collect();
    builder.fill(
        id,
        Node::Module(
            kind,
            Module {
                name,
                superclass_name,
                superclass: None,
                mixin_names,
                mixins: Vec::new(),
                members,
                supercall_args,
            },
        ),
        Some(parent),
    );
    id
}

fn build_singleton(
    builder: &mut Builder,
    name: Option<String>,
    superclass_name: Option<String>,
    mixin_names: Vec<String>,
    supercall_args: Vec<ParsedNode>,
    members: Vec<ParsedMember>,
    parent: NodeId,
) -> NodeId {
    build_module(
        builder,
        ModuleKind::Singleton,
        name,
        superclass_name,
        mixin_names,
        supercall_args,
        members,
        parent,
    )
}

/// Desugars a closure literal into an anonymous `Singleton extends wollok.lang.Closure`
/// with one `apply` method whose parameters and body are the closure's.
fn build_closure(builder: &mut Builder, parameters: Vec<ParsedParameter>, body: Vec<ParsedNode>, parent: NodeId) -> NodeId {
    let singleton_id = builder.reserve();
    let method_id = builder.reserve();
    let parameter_ids = build_parameters(builder, &parameters, method_id);
    let variadic = parameters.last().is_some_and(|p| p.variadic);
    let body_id = build_body(builder, body, method_id);
    builder.fill(
        method_id,
        Node::Method(Method {
            name: "apply".to_owned(),
            parameters: parameter_ids,
            variadic,
            is_native: false,
            body: Some(body_id),
        }),
        Some(singleton_id),
    );
    builder.fill(
        singleton_id,
        Node::Module(
            ModuleKind::Singleton,
            Module {
                name: None,
                superclass_name: Some("wollok.lang.Closure".to_owned()),
                superclass: None,
                mixin_names: Vec::new(),
                mixins: Vec::new(),
                members: vec![method_id],
                supercall_args: Vec::new(),
            },
        ),
        Some(parent),
    );
    singleton_id
}

fn build_module_member(builder: &mut Builder, member: ParsedMember, parent: NodeId) -> NodeId {
    match member {
        ParsedMember::Field {
            name,
            initializer,
            writable,
        } => {
            let id = builder.reserve();
            let initializer = initializer.map(|e| build_expr(builder, e, id));
            builder.fill(id, Node::Field(Field { name, initializer, writable }), Some(parent));
            id
        }
        ParsedMember::Method {
            name,
            parameters,
            body,
            is_native,
        } => {
            let id = builder.reserve();
            let parameter_ids = build_parameters(builder, &parameters, id);
            let variadic = parameters.last().is_some_and(|p| p.variadic);
            let body = body.map(|stmts| build_body(builder, stmts, id));
            builder.fill(
                id,
                Node::Method(Method {
                    name,
                    parameters: parameter_ids,
                    variadic,
                    is_native,
                    body,
                }),
                Some(parent),
            );
            id
        }
        ParsedMember::Constructor {
            parameters,
            base_call,
            body,
        } => {
            let id = builder.reserve();
            let parameter_ids = build_parameters(builder, &parameters, id);
            let variadic = parameters.last().is_some_and(|p| p.variadic);
            let (has_base_call, delegates_to_self, base_args) = match base_call {
                Some(ParsedBaseCall {
                    delegates_to_self,
                    args,
                    named_args,
                }) => {
                    let mut base_args: Vec<NodeId> = args.into_iter().map(|a| build_expr(builder, a, id)).collect();
                    base_args.extend(named_args.into_iter().map(|na| build_named_argument(builder, na, id)));
                    (true, delegates_to_self, base_args)
                }
                None => (false, false, Vec::new()),
            };
            let body_id = build_body(builder, body, id);
            builder.fill(
                id,
                Node::Constructor(Constructor {
                    parameters: parameter_ids,
                    variadic,
                    delegates_to_self,
                    base_args,
                    has_base_call,
                    body: body_id,
                }),
                Some(parent),
            );
            id
        }
    }
}

fn build_parameters(builder: &mut Builder, parameters: &[ParsedParameter], parent: NodeId) -> Vec<NodeId> {
    parameters
        .iter()
        .map(|p| {
            let id = builder.reserve();
            builder.fill(
                id,
                Node::Parameter(Parameter {
                    name: p.name.clone(),
                    variadic: p.variadic,
                }),
                Some(parent),
            );
            id
        })
        .collect()
}

fn build_body(builder: &mut Builder, statements: Vec<ParsedNode>, parent: NodeId) -> NodeId {
    let id = builder.reserve();
    let statements = statements.into_iter().map(|s| build_expr(builder, s, id)).collect();
    builder.fill(id, Node::Body(Body { statements }), Some(parent));
    id
}

fn build_named_argument(builder: &mut Builder, named: ParsedNamedArgument, parent: NodeId) -> NodeId {
    let id = builder.reserve();
    let value = build_expr(builder, *named.value, id);
    builder.fill(id, Node::NamedArgument(NamedArgument { name: named.name, value }), Some(parent));
    id
}

fn build_expr(builder: &mut Builder, parsed: ParsedNode, parent: NodeId) -> NodeId {
    match parsed {
        ParsedNode::Variable {
            name,
            initializer,
            writable,
        } => {
            let id = builder.reserve();
            let initializer = initializer.map(|e| build_expr(builder, *e, id));
            builder.fill(id, Node::Variable(Variable { name, initializer, writable }), Some(parent));
            id
        }
        ParsedNode::Reference { name } => {
            let id = builder.reserve();
            builder.fill(id, Node::Reference(Reference { name, target: None }), Some(parent));
            id
        }
        ParsedNode::LiteralNull => leaf(builder, Node::Literal(LiteralValue::Null), parent),
        ParsedNode::LiteralBool(b) => leaf(builder, Node::Literal(LiteralValue::Bool(b)), parent),
        ParsedNode::LiteralNumber(n) => leaf(builder, Node::Literal(LiteralValue::Number(n)), parent),
        ParsedNode::LiteralString(s) => leaf(builder, Node::Literal(LiteralValue::String(s)), parent),
        ParsedNode::Singleton { .. } | ParsedNode::Closure { .. } => {
            let id = builder.reserve();
            let singleton_id = build_member(builder, parsed, id);
            builder.fill(id, Node::Literal(LiteralValue::Singleton(singleton_id)), Some(parent));
            id
        }
        ParsedNode::Send { receiver, message, args } => {
            let id = builder.reserve();
            let receiver = build_expr(builder, *receiver, id);
            let args = args.into_iter().map(|a| build_expr(builder, a, id)).collect();
            builder.fill(id, Node::Send(Send { receiver, message, args }), Some(parent));
            id
        }
        ParsedNode::Super { args } => {
            let id = builder.reserve();
            let args = args.into_iter().map(|a| build_expr(builder, a, id)).collect();
            builder.fill(id, Node::Super(SuperCall { args }), Some(parent));
            id
        }
        ParsedNode::SelfExpr => leaf(builder, Node::SelfExpr, parent),
        ParsedNode::New {
            instantiated,
            args,
            named_args,
        } => {
            let id = builder.reserve();
            let args = args.into_iter().map(|a| build_expr(builder, a, id)).collect();
            let named_args = named_args.into_iter().map(|na| build_named_argument(builder, na, id)).collect();
            builder.fill(
                id,
                Node::New(New {
                    instantiated_name: instantiated,
                    instantiated: None,
                    args,
                    named_args,
                }),
                Some(parent),
            );
            id
        }
        ParsedNode::Assignment { reference, value } => {
            let id = builder.reserve();
            let reference_id = builder.reserve();
            builder.fill(reference_id, Node::Reference(Reference { name: reference, target: None }), Some(id));
            let value = build_expr(builder, *value, id);
            builder.fill(id, Node::Assignment(Assignment { reference: reference_id, value }), Some(parent));
            id
        }
        ParsedNode::Return(value) => {
            let id = builder.reserve();
            let value = value.map(|v| build_expr(builder, *v, id));
            builder.fill(id, Node::Return(Return { value }), Some(parent));
            id
        }
        ParsedNode::If {
            condition,
            then_body,
            else_body,
        } => {
            let id = builder.reserve();
            let condition = build_expr(builder, *condition, id);
            let then_body = build_body(builder, then_body, id);
            let else_body = if else_body.is_empty() {
                None
            } else {
                Some(build_body(builder, else_body, id))
            };
            builder.fill(id, Node::If(If { condition, then_body, else_body }), Some(parent));
            id
        }
        ParsedNode::Try { body, catches, always } => {
            let id = builder.reserve();
            let body_id = build_body(builder, body, id);
            let catches = catches.into_iter().map(|c| build_catch(builder, c, id)).collect();
            let always = if always.is_empty() { None } else { Some(build_body(builder, always, id)) };
            builder.fill(id, Node::Try(Try { body: body_id, catches, always }), Some(parent));
            id
        }
        ParsedNode::Throw(expr) => {
            let id = builder.reserve();
            let exception = build_expr(builder, *expr, id);
            builder.fill(id, Node::Throw(Throw { exception }), Some(parent));
            id
        }
        ParsedNode::ParameterizedType { name, args } => {
            let id = builder.reserve();
            let args = args.into_iter().map(|a| build_expr(builder, a, id)).collect();
            builder.fill(id, Node::ParameterizedType(ParameterizedType { name, target: None, args }), Some(parent));
            id
        }
        ParsedNode::Package(_) | ParsedNode::Class { .. } | ParsedNode::Mixin { .. } | ParsedNode::Program { .. }
        | ParsedNode::Test { .. } | ParsedNode::Describe { .. } => {
            // Malformed input: a declaration-shaped node where an expression was expected.
            // Represented as an unresolvable self-reference so linking reports it uniformly
            // as an `UnresolvedReference` rather than panicking on a parser contract violation.
            let id = builder.reserve();
            builder.fill(id, Node::Reference(Reference { name: String::new(), target: None }), Some(parent));
            id
        }
    }
}

fn build_catch(builder: &mut Builder, catch: ParsedCatch, parent: NodeId) -> NodeId {
    let id = builder.reserve();
    let parameter_id = builder.reserve();
    builder.fill(
        parameter_id,
        Node::Parameter(Parameter {
            name: catch.parameter_name,
            variadic: false,
        }),
        Some(id),
    );
    let body = build_body(builder, catch.body, id);
    builder.fill(
        id,
        Node::Catch(Catch {
            parameter: parameter_id,
            exception_type_name: catch.exception_type,
            exception_type: None,
            body,
        }),
        Some(parent),
    );
    id
}

fn leaf(builder: &mut Builder, node: Node, parent: NodeId) -> NodeId {
    let id = builder.reserve();
    builder.fill(id, node, Some(parent));
    id
}
