//! Lowers a method/constructor/program/test body into a flat [`Instruction`] sequence.
//!
//! `compile_callable` is the only public entry point; everything else is a private
//! recursive descent over the linked tree, one function per node shape. The memoizing
//! cache itself lives on `Evaluation`, not here — this module is a pure function of the
//! `Environment`.

use std::fmt;

use crate::{
    bytecode::{
        builder::CodeBuilder,
        op::{InstantiateInner, Instruction},
    },
    linker::resolve_fqn,
    node::{Environment, LiteralValue, Module, New, Node, NodeId},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A callable (method/constructor/program/test) was asked for but `id` doesn't name
    /// one, or an expression-shaped node turned up somewhere a statement/body was
    /// structurally required.
    UnsupportedNode { site: NodeId, kind: &'static str },
    /// An abstract method (no body) was sent to the compiler; dispatching to it is a
    /// runtime error, not a compile-time one, but it has nothing to lower.
    AbstractMethod { site: NodeId, name: String },
    /// A well-known `wollok.lang` class the compiler needs for literal lowering (e.g.
    /// `Boolean`) is missing from the environment.
    MissingPrimitive { name: &'static str },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedNode { kind, .. } => write!(f, "cannot compile node of kind `{kind}`"),
            Self::AbstractMethod { name, .. } => write!(f, "method `{name}` is abstract and has no body to compile"),
            Self::MissingPrimitive { name } => write!(f, "missing well-known class wollok.lang.{name}"),
        }
    }
}

impl std::error::Error for CompileError {}

fn unsupported(site: NodeId, kind: &'static str) -> CompileError {
    CompileError::UnsupportedNode { site, kind }
}

fn primitive_fqn(env: &Environment, name: &'static str) -> Result<NodeId, CompileError> {
    resolve_fqn(env, &format!("wollok.lang.{name}")).ok_or(CompileError::MissingPrimitive { name })
}

/// Compiles the body of a `Method`, `Constructor`, `Program`, or `Test` into a flat
/// instruction sequence that always ends in `RETURN` — if the body falls through
/// without an explicit `Return` statement, a trailing `PUSH undef; RETURN` is appended
/// so every callable frame terminates the same way regardless of which branch it took.
pub(crate) fn compile_callable(env: &Environment, id: NodeId) -> Result<Vec<Instruction>, CompileError> {
    let mut builder = CodeBuilder::new();
    let is_constructor = matches!(env.node(id), Node::Constructor(_));
    match env.node(id) {
        Node::Method(method) => {
            let body_id = method.body.ok_or_else(|| CompileError::AbstractMethod {
                site: id,
                name: method.name.clone(),
            })?;
            builder.extend(compile_body_statements(env, body_id, false)?);
        }
        Node::Constructor(ctor) => {
            let owner = env.parent(id).ok_or_else(|| unsupported(id, "constructor"))?;
            builder.extend(compile_constructor_prologue(env, id, owner)?);
            let body_id = ctor.body;
            builder.extend(compile_body_statements(env, body_id, false)?);
        }
        Node::Program(program) => builder.extend(compile_body_statements(env, program.body, false)?),
        Node::Test(test) => builder.extend(compile_body_statements(env, test.body, false)?),
        other => return Err(unsupported(id, other.kind_tag())),
    }
    // A constructor's frame delivers `self` to its caller (the INIT that invoked it),
    // not undef, so INIT's "push the receiver back" holds without INIT itself needing
    // to know anything about the constructor body that just ran.
    if is_constructor {
        builder.emit(Instruction::Load { name: "self".to_owned() });
    } else {
        builder.emit(Instruction::Push { id: None });
    }
    builder.emit(Instruction::Return);
    Ok(builder.finish())
}

/// A constructor's implicit base-call delegation: `this(args)`/`super(args)` if written,
/// otherwise an optional (no-op if absent) zero-arg chain to the superclass.
fn compile_constructor_prologue(env: &Environment, ctor_id: NodeId, owner: NodeId) -> Result<Vec<Instruction>, CompileError> {
    let Node::Constructor(ctor) = env.node(ctor_id) else {
        return Err(unsupported(ctor_id, "constructor"));
    };
    let base_args = ctor.base_args.clone();
    let delegates_to_self = ctor.delegates_to_self;
    let has_base_call = ctor.has_base_call;
    let superclass = match env.node(owner) {
        Node::Module(_, Module { superclass, .. }) => *superclass,
        _ => None,
    };
    let lookup_start = if delegates_to_self { Some(owner) } else { superclass };
    // A root class (no superclass, no `this(...)`) has nothing above it to delegate
    // to; emitting `Init` against itself here would recurse into its own constructor.
    let Some(lookup_start) = lookup_start else {
        return Ok(Vec::new());
    };
    let mut out = vec![Instruction::Load { name: "self".to_owned() }];
    for &arg in &base_args {
        out.extend(compile_expr(env, arg)?);
    }
    out.push(Instruction::Init {
        arity: base_args.len(),
        lookup_start,
        optional: !has_base_call,
    });
    Ok(out)
}

fn compile_body_statements(env: &Environment, body_id: NodeId, as_expression: bool) -> Result<Vec<Instruction>, CompileError> {
    let Node::Body(body) = env.node(body_id) else {
        return Err(unsupported(body_id, "body"));
    };
    let statements = body.statements.clone();
    compile_statements(env, &statements, as_expression)
}

/// Compiles a statement sequence. In expression-clause position the last statement's
/// value is left on the stack (an empty body pushes `undef`); otherwise every
/// statement's value is popped, since each lowering rule below nets exactly one pushed
/// value per statement.
fn compile_statements(env: &Environment, statements: &[NodeId], as_expression: bool) -> Result<Vec<Instruction>, CompileError> {
    let mut out = Vec::new();
    if statements.is_empty() {
        if as_expression {
            out.push(Instruction::Instantiate {
                fqn: primitive_fqn(env, "Object")?,
                inner: Some(InstantiateInner::Null),
            });
        }
        return Ok(out);
    }
    let last = statements.len() - 1;
    for (i, &statement) in statements.iter().enumerate() {
        out.extend(compile_expr(env, statement)?);
        if !(as_expression && i == last) {
            out.push(Instruction::Pop);
        }
    }
    Ok(out)
}

fn is_package_level_variable(env: &Environment, target: NodeId) -> bool {
    matches!(env.node(target), Node::Variable(_)) && matches!(env.parent(target).map(|p| env.node(p)), Some(Node::Package(_)))
}

fn enclosing_method_name_and_module(env: &Environment, site: NodeId) -> Option<(String, NodeId)> {
    let mut current = env.parent(site);
    let mut method_name = None;
    while let Some(id) = current {
        if method_name.is_none() {
            if let Node::Method(method) = env.node(id) {
                method_name = Some(method.name.clone());
            }
        }
        if matches!(env.node(id), Node::Module(..)) {
            return method_name.map(|name| (name, id));
        }
        current = env.parent(id);
    }
    None
}

/// `Instantiate` always runs first so the receiver is on the stack for `InitNamed`/
/// `Init` to consume; each of those pops its own arguments plus the receiver beneath
/// them and pushes the receiver back, so the instance is the expression's final value.
fn compile_new(env: &Environment, new: &New) -> Result<Vec<Instruction>, CompileError> {
    let target = new.instantiated.expect("New target resolved by the linker before compilation");
    let mut out = vec![Instruction::Instantiate { fqn: target, inner: None }];
    if !new.named_args.is_empty() {
        let mut names = Vec::with_capacity(new.named_args.len());
        for &named_id in &new.named_args {
            let Node::NamedArgument(named) = env.node(named_id) else {
                continue;
            };
            let value = named.value;
            let name = named.name.clone();
            out.extend(compile_expr(env, value)?);
            names.push(name);
        }
        out.push(Instruction::InitNamed { names });
    }
    for &arg in &new.args {
        out.extend(compile_expr(env, arg)?);
    }
    out.push(Instruction::Init {
        arity: new.args.len(),
        lookup_start: target,
        optional: false,
    });
    Ok(out)
}

fn compile_literal_singleton(env: &Environment, module_id: NodeId) -> Result<Vec<Instruction>, CompileError> {
    let Node::Module(_, module) = env.node(module_id) else {
        return Err(unsupported(module_id, "singleton"));
    };
    let supercall_args = module.supercall_args.clone();
    let superclass = module.superclass;
    let mut out = vec![Instruction::Instantiate { fqn: module_id, inner: None }, Instruction::InitNamed { names: Vec::new() }];
    // A singleton with no superclass (only `wollok.lang.Object` itself, in practice) has
    // no constructor chain to run; `Init`-ing against itself here would recurse forever.
    if let Some(superclass) = superclass {
        for &arg in &supercall_args {
            out.extend(compile_expr(env, arg)?);
        }
        out.push(Instruction::Init {
            arity: supercall_args.len(),
            lookup_start: superclass,
            optional: false,
        });
    }
    Ok(out)
}

fn compile_if(env: &Environment, if_id: NodeId) -> Result<Vec<Instruction>, CompileError> {
    let Node::If(if_node) = env.node(if_id) else {
        return Err(unsupported(if_id, "if"));
    };
    let condition = if_node.condition;
    let then_body = if_node.then_body;
    let else_body = if_node.else_body;

    let mut builder = CodeBuilder::new();
    builder.extend(compile_expr(env, condition)?);
    builder.emit(Instruction::PushContext { handler: None });
    let cond_jump_at = builder.emit(Instruction::ConditionalJump { offset: 0 });
    match else_body {
        Some(body) => builder.extend(compile_body_statements(env, body, true)?),
        None => builder.extend(compile_statements(env, &[], true)?),
    }
    let jump_over_then_at = builder.emit(Instruction::Jump { offset: 0 });
    builder.patch_jump_to_here(cond_jump_at);
    builder.extend(compile_body_statements(env, then_body, true)?);
    builder.patch_jump_to_here(jump_over_then_at);
    builder.emit(Instruction::PopContext);
    Ok(builder.finish())
}

pub(crate) const TRY_EXCEPTION_LOCAL: &str = "<exception>";
pub(crate) const TRY_RESULT_LOCAL: &str = "<result>";

fn compile_try(env: &Environment, try_id: NodeId) -> Result<Vec<Instruction>, CompileError> {
    let Node::Try(try_node) = env.node(try_id) else {
        return Err(unsupported(try_id, "try"));
    };
    let body_id = try_node.body;
    let catches = try_node.catches.clone();
    let always = try_node.always;

    let bool_fqn = primitive_fqn(env, "Boolean")?;
    let mut builder = CodeBuilder::new();

    builder.emit(Instruction::Instantiate {
        fqn: bool_fqn,
        inner: Some(InstantiateInner::Bool(false)),
    });
    builder.emit(Instruction::Store {
        name: TRY_EXCEPTION_LOCAL.to_owned(),
        lookup: false,
    });
    builder.extend(compile_statements(env, &[], true)?);
    builder.emit(Instruction::Store {
        name: TRY_RESULT_LOCAL.to_owned(),
        lookup: false,
    });

    let push_ctx_at = builder.emit(Instruction::PushContext { handler: None });
    builder.extend(compile_body_statements(env, body_id, true)?);
    builder.emit(Instruction::Store {
        name: TRY_RESULT_LOCAL.to_owned(),
        lookup: true,
    });
    builder.emit(Instruction::PopContext);
    let body_done_jump = builder.emit(Instruction::Jump { offset: 0 });

    builder.patch_handler_to_here(push_ctx_at);

    let mut test_jumps = Vec::with_capacity(catches.len());
    for &catch_id in &catches {
        let Node::Catch(catch) = env.node(catch_id) else { continue };
        let exception_type = catch.exception_type.expect("catch type resolved by the linker before compilation");
        builder.emit(Instruction::Load {
            name: TRY_EXCEPTION_LOCAL.to_owned(),
        });
        builder.emit(Instruction::Dup);
        builder.emit(Instruction::Inherits { fqn: exception_type });
        test_jumps.push(builder.emit(Instruction::ConditionalJump { offset: 0 }));
        builder.emit(Instruction::Pop);
    }
    let none_matched_jump = builder.emit(Instruction::Jump { offset: 0 });

    let mut body_end_jumps = Vec::with_capacity(catches.len());
    for (&catch_id, &test_at) in catches.iter().zip(&test_jumps) {
        let Node::Catch(catch) = env.node(catch_id) else { continue };
        let parameter = catch.parameter;
        let catch_body = catch.body;
        let Node::Parameter(param) = env.node(parameter) else { continue };
        let param_name = param.name.clone();
        builder.patch_jump_to_here(test_at);
        builder.emit(Instruction::Store { name: param_name, lookup: false });
        builder.extend(compile_body_statements(env, catch_body, true)?);
        builder.emit(Instruction::Store {
            name: TRY_RESULT_LOCAL.to_owned(),
            lookup: true,
        });
        builder.emit(Instruction::Instantiate {
            fqn: bool_fqn,
            inner: Some(InstantiateInner::Bool(false)),
        });
        builder.emit(Instruction::Store {
            name: TRY_EXCEPTION_LOCAL.to_owned(),
            lookup: true,
        });
        body_end_jumps.push(builder.emit(Instruction::Jump { offset: 0 }));
    }

    builder.patch_jump_to_here(none_matched_jump);
    for at in body_end_jumps {
        builder.patch_jump_to_here(at);
    }
    builder.patch_jump_to_here(body_done_jump);

    if let Some(always_body) = always {
        builder.extend(compile_body_statements(env, always_body, false)?);
    }

    builder.emit(Instruction::Load {
        name: TRY_EXCEPTION_LOCAL.to_owned(),
    });
    let reraise_jump = builder.emit(Instruction::ConditionalJump { offset: 0 });
    builder.emit(Instruction::Load {
        name: TRY_RESULT_LOCAL.to_owned(),
    });
    let end_jump = builder.emit(Instruction::Jump { offset: 0 });
    builder.patch_jump_to_here(reraise_jump);
    builder.emit(Instruction::Load {
        name: TRY_EXCEPTION_LOCAL.to_owned(),
    });
    builder.emit(Instruction::Interrupt);
    builder.patch_jump_to_here(end_jump);

    Ok(builder.finish())
}

/// Lowers a single field initializer (or any other bare expression) for the VM to run in
/// a throwaway frame, used for `INIT_NAMED`'s non-named fields.
pub(crate) fn compile_standalone_expr(env: &Environment, id: NodeId) -> Result<Vec<Instruction>, CompileError> {
    compile_expr(env, id)
}

/// Lowers a single expression-shaped node. Declaration-shaped nodes that can appear as
/// statements (`Variable`, `Return`, `Assignment`, `If`, `Try`, `Throw`) are handled here
/// too, since the tree has no separate statement type — every [`Node::Body`] entry is
/// one of these.
fn compile_expr(env: &Environment, id: NodeId) -> Result<Vec<Instruction>, CompileError> {
    match env.node(id) {
        Node::SelfExpr => Ok(vec![Instruction::Load { name: "self".to_owned() }]),
        Node::Reference(reference) => {
            let target = reference.target.expect("reference resolved by the linker before compilation");
            let name = if matches!(env.node(target), Node::Module(..)) || is_package_level_variable(env, target) {
                env.fqn_of(target)
            } else {
                reference.name.clone()
            };
            Ok(vec![Instruction::Load { name }])
        }
        Node::Literal(literal) => match literal.clone() {
            LiteralValue::Null => Ok(vec![Instruction::Instantiate {
                fqn: primitive_fqn(env, "Object")?,
                inner: Some(InstantiateInner::Null),
            }]),
            LiteralValue::Bool(value) => Ok(vec![Instruction::Instantiate {
                fqn: primitive_fqn(env, "Boolean")?,
                inner: Some(InstantiateInner::Bool(value)),
            }]),
            LiteralValue::Number(value) => Ok(vec![Instruction::Instantiate {
                fqn: primitive_fqn(env, "Number")?,
                inner: Some(InstantiateInner::Number(value.to_string())),
            }]),
            LiteralValue::String(value) => Ok(vec![Instruction::Instantiate {
                fqn: primitive_fqn(env, "String")?,
                inner: Some(InstantiateInner::String(value)),
            }]),
            LiteralValue::Singleton(target) => compile_literal_singleton(env, target),
        },
        Node::Send(send) => {
            let receiver = send.receiver;
            let message = send.message.clone();
            let args = send.args.clone();
            let mut out = compile_expr(env, receiver)?;
            for &arg in &args {
                out.extend(compile_expr(env, arg)?);
            }
            out.push(Instruction::Call {
                message,
                arity: args.len(),
                lookup_start: None,
                skip_receiver: false,
            });
            Ok(out)
        }
        Node::Super(super_call) => {
            let args = super_call.args.clone();
            let (method_name, enclosing_module) = enclosing_method_name_and_module(env, id).ok_or_else(|| unsupported(id, "super"))?;
            // `skip_receiver` calls fetch `self` from the current context directly, not
            // from the operand stack, so only the arguments are pushed here.
            let mut out = Vec::new();
            for &arg in &args {
                out.extend(compile_expr(env, arg)?);
            }
            out.push(Instruction::Call {
                message: method_name,
                arity: args.len(),
                lookup_start: Some(enclosing_module),
                skip_receiver: true,
            });
            Ok(out)
        }
        Node::New(new) => compile_new(env, new),
        Node::Assignment(assignment) => {
            let reference = assignment.reference;
            let value = assignment.value;
            let Node::Reference(r) = env.node(reference) else {
                return Err(unsupported(id, "assignment"));
            };
            let name = r.name.clone();
            let mut out = compile_expr(env, value)?;
            out.push(Instruction::Store { name, lookup: true });
            out.push(Instruction::Push { id: None });
            Ok(out)
        }
        Node::Variable(variable) => {
            let initializer = variable.initializer;
            let name = variable.name.clone();
            let mut out = match initializer {
                Some(init) => compile_expr(env, init)?,
                None => vec![Instruction::Instantiate {
                    fqn: primitive_fqn(env, "Object")?,
                    inner: Some(InstantiateInner::Null),
                }],
            };
            out.push(Instruction::Store { name, lookup: false });
            out.push(Instruction::Push { id: None });
            Ok(out)
        }
        Node::Return(ret) => {
            let mut out = match ret.value {
                Some(value) => compile_expr(env, value)?,
                None => vec![Instruction::Instantiate {
                    fqn: primitive_fqn(env, "Object")?,
                    inner: Some(InstantiateInner::Null),
                }],
            };
            out.push(Instruction::Return);
            Ok(out)
        }
        Node::Throw(throw) => {
            let exception = throw.exception;
            let mut out = compile_expr(env, exception)?;
            out.push(Instruction::Interrupt);
            Ok(out)
        }
        Node::If(_) => compile_if(env, id),
        Node::Try(_) => compile_try(env, id),
        other => Err(unsupported(id, other.kind_tag())),
    }
}
