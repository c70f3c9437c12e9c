//! The stack machine: frames of compiled [`Instruction`]s running against an
//! [`Evaluation`]'s instance/context tables.
//!
//! [`Evaluation::of`] boots a fresh evaluation from a linked [`Environment`];
//! [`Evaluation::step`]/[`Evaluation::step_all`] drive it one instruction or to
//! completion; [`Evaluation::send_message`] is the embedder-facing entry point for
//! invoking a method on an existing instance from the outside.

mod exceptions;
mod gc;

use std::{fmt, rc::Rc};

use ahash::AHashMap;

use crate::{
    bytecode::{self, CompileError, Instruction, InstantiateInner},
    linker::{linearize, lookup_constructor, lookup_method, resolve_fqn},
    natives::NativeTable,
    node::{Environment, ModuleKind, Node, NodeId},
    runtime::{ContextId, ContextTable, Inner, Instance, InstanceId, InstanceTable},
    tracer::VmTracer,
    Config,
};

pub use gc::collect_garbage;

/// A fatal, structural failure: something the dispatch loop cannot make sense of
/// regardless of what Wollok-level code is running. Never raised to Wollok catch
/// clauses — see [`RunError::Raised`] for the user-catchable counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// A corrupted-frame-stack-style invariant: popping an empty operand stack, jumping
    /// out of bounds, a missing well-known class. Always a bug, either in the compiler
    /// or in an embedder-supplied `Environment`/`NativeTable`.
    Fatal(String),
    /// An exception instance is unwinding. Callers of [`Evaluation::step_all`] that see
    /// this with an empty frame stack are looking at an uncaught exception; the
    /// `InstanceId` is still valid until the `Evaluation` is dropped.
    Raised(InstanceId),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal(message) => write!(f, "fatal VM error: {message}"),
            Self::Raised(id) => write!(f, "uncaught exception (instance {id:?})"),
        }
    }
}

impl std::error::Error for RunError {}

/// `Result<T, RunError>`, mirroring the reference ecosystem's host-fatal/user-catchable
/// split rather than a single flattened error enum.
pub type RunResult<T> = Result<T, RunError>;

#[derive(Debug, Clone)]
struct Frame {
    instructions: Rc<[Instruction]>,
    pc: usize,
    operand_stack: Vec<InstanceId>,
    /// The context this frame must never pop past (`POP_CONTEXT` on it is a bug).
    base_context: ContextId,
    current_context: ContextId,
}

/// A running (or ready-to-run) instance of the virtual machine: the linked program plus
/// every mutable table the stack machine touches.
#[derive(Debug, Clone)]
pub struct Evaluation {
    environment: Rc<Environment>,
    contexts: ContextTable,
    instances: InstanceTable,
    root_context: ContextId,
    frames: Vec<Frame>,
    code_cache: AHashMap<NodeId, Rc<[Instruction]>>,
    /// Every named module (singleton or otherwise) bound to its one pre-created
    /// instance, looked up by `PUSH id`.
    singleton_instances: AHashMap<NodeId, InstanceId>,
    natives: NativeTable,
    config: Config,
    null_id: InstanceId,
    true_id: InstanceId,
    false_id: InstanceId,
    object_fqn: NodeId,
    boolean_fqn: NodeId,
    list_fqn: NodeId,
    set_fqn: NodeId,
    evaluation_error_fqn: NodeId,
    stack_overflow_fqn: NodeId,
}

fn well_known(env: &Environment, name: &'static str) -> Result<NodeId, CompileError> {
    resolve_fqn(env, &format!("wollok.lang.{name}")).ok_or(CompileError::MissingPrimitive { name })
}

impl Evaluation {
    /// Builds a fresh `Evaluation` from a linked `Environment`: primes the root context
    /// with `null`/`true`/`false`, a pre-created instance for every named module, a lazy
    /// initializer for every package-level constant, then runs every named module's
    /// `INIT`/`INIT_NAMED` sequence via a bootstrap frame so the Evaluation comes back
    /// "ready" (every singleton self-initialized, every constant still lazy until first
    /// `LOAD`).
    ///
    /// # Errors
    /// Returns [`CompileError::MissingPrimitive`] if a well-known `wollok.lang` class is
    /// missing from `environment`, or any other `CompileError` raised while compiling a
    /// named module's initializer sequence.
    pub fn of(environment: Environment, natives: NativeTable, config: Config) -> Result<Self, CompileError> {
        let environment = Rc::new(environment);
        let mut contexts = ContextTable::default();
        let root_context = contexts.push(None);
        let mut instances = InstanceTable::default();

        let object_fqn = well_known(&environment, "Object")?;
        let boolean_fqn = well_known(&environment, "Boolean")?;
        let list_fqn = well_known(&environment, "List")?;
        let set_fqn = well_known(&environment, "Set")?;
        let evaluation_error_fqn = well_known(&environment, "EvaluationError")?;
        let stack_overflow_fqn = well_known(&environment, "StackOverflowException")?;

        let null_id = instances.allocate(Instance::plain(object_fqn, root_context));
        // `true`/`false` carry no `Inner` payload: their identity alone encodes truth,
        // and giving them an `Inner::String` would make `string_value` mistake a
        // Boolean for a String in any native that expects one.
        let true_id = instances.allocate(Instance::plain(boolean_fqn, root_context));
        let false_id = instances.allocate(Instance::plain(boolean_fqn, root_context));
        contexts.get_mut(root_context).locals.insert("null".to_owned(), null_id);
        contexts.get_mut(root_context).locals.insert("true".to_owned(), true_id);
        contexts.get_mut(root_context).locals.insert("false".to_owned(), false_id);

        let mut singleton_instances = AHashMap::new();
        let mut named_modules = Vec::new();
        for id in environment.ids() {
            match environment.node(id) {
                Node::Module(ModuleKind::Singleton, module) if module.name.is_some() => {
                    let fields_context = contexts.push(Some(root_context));
                    let instance = instances.allocate(Instance::plain(id, fields_context));
                    singleton_instances.insert(id, instance);
                    contexts.get_mut(root_context).locals.insert(environment.fqn_of(id), instance);
                    named_modules.push(id);
                }
                Node::Variable(variable) if environment.parent(id).is_some_and(|p| matches!(environment.node(p), Node::Package(_))) => {
                    let constant = instances.allocate(Instance {
                        module: object_fqn,
                        context: root_context,
                        inner: None,
                        lazy_initializer: variable.initializer,
                    });
                    contexts.get_mut(root_context).locals.insert(environment.fqn_of(id), constant);
                }
                _ => {}
            }
        }

        let mut code_cache = AHashMap::new();
        let mut bootstrap = Vec::new();
        for module_id in named_modules {
            bootstrap.push(Instruction::Push { id: Some(module_id) });
            bootstrap.push(Instruction::InitNamed { names: Vec::new() });
            let (supercall_args, superclass) = match environment.node(module_id) {
                Node::Module(_, m) => (m.supercall_args.clone(), m.superclass),
                _ => (Vec::new(), None),
            };
            // A singleton with no superclass has no constructor chain above it to run.
            if let Some(superclass) = superclass {
                for &arg in &supercall_args {
                    bootstrap.extend(bytecode::compile_standalone_expr(&environment, arg)?);
                }
                bootstrap.push(Instruction::Init {
                    arity: supercall_args.len(),
                    lookup_start: superclass,
                    optional: false,
                });
            }
            bootstrap.push(Instruction::Pop);
        }
        bootstrap.push(Instruction::Push { id: None });
        bootstrap.push(Instruction::Return);

        let mut eval = Self {
            environment,
            contexts,
            instances,
            root_context,
            frames: Vec::new(),
            code_cache,
            singleton_instances,
            natives,
            config,
            null_id,
            true_id,
            false_id,
            object_fqn,
            boolean_fqn,
            list_fqn,
            set_fqn,
            evaluation_error_fqn,
            stack_overflow_fqn,
        };
        eval.push_frame(bootstrap, root_context)?;
        let mut tracer = crate::tracer::NoopTracer;
        eval.step_all(&mut tracer)?;
        Ok(eval)
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    #[must_use]
    pub fn instances(&self) -> &InstanceTable {
        &self.instances
    }

    pub fn instances_mut(&mut self) -> &mut InstanceTable {
        &mut self.instances
    }

    /// Looks up a named singleton or package-level constant by its fully-qualified
    /// name, e.g. `"wollok.game.game"` or `"p.MyConstant"`. This is an embedder's entry
    /// point into a fresh `Evaluation`: with no running frame yet, this is the only way
    /// to obtain an initial receiver to `send_message` against.
    #[must_use]
    pub fn lookup_global(&self, fqn: &str) -> Option<InstanceId> {
        self.contexts.lookup(self.root_context, fqn)
    }

    /// Reads `name` from `receiver`'s own fields context. Used by natives that back
    /// fields declared in Wollok (as opposed to an instance's `inner` payload).
    #[must_use]
    pub fn get_field(&self, receiver: InstanceId, name: &str) -> Option<InstanceId> {
        let ctx = self.instances.get(receiver).context;
        self.contexts.lookup(ctx, name)
    }

    pub fn set_field(&mut self, receiver: InstanceId, name: &str, value: InstanceId) {
        let ctx = self.instances.get(receiver).context;
        self.contexts.get_mut(ctx).locals.insert(name.to_owned(), value);
    }

    #[must_use]
    pub fn null_id(&self) -> InstanceId {
        self.null_id
    }

    #[must_use]
    pub fn bool_id(&self, value: bool) -> InstanceId {
        if value { self.true_id } else { self.false_id }
    }

    /// Reads a boolean instance's truth value. Fatal if `id` is not `true`/`false`.
    pub fn as_bool(&self, id: InstanceId) -> RunResult<bool> {
        if id == self.true_id {
            Ok(true)
        } else if id == self.false_id {
            Ok(false)
        } else {
            Err(RunError::Fatal("expected a boolean instance".to_owned()))
        }
    }

    pub fn intern_string(&mut self, value: &str) -> InstanceId {
        let fqn = self.environment.clone();
        let module = resolve_fqn(&fqn, "wollok.lang.String").unwrap_or(self.object_fqn);
        self.instances.intern_string(module, self.root_context, value)
    }

    pub fn intern_number(&mut self, raw: &str) -> InstanceId {
        let fqn = self.environment.clone();
        let module = resolve_fqn(&fqn, "wollok.lang.Number").unwrap_or(self.object_fqn);
        self.instances.intern_number(module, self.root_context, raw, self.config.decimal_precision)
    }

    pub fn allocate_list(&mut self, elements: Vec<InstanceId>) -> InstanceId {
        let context = self.contexts.push(Some(self.root_context));
        let mut instance = Instance::plain(self.list_fqn, context);
        instance.inner = Some(Inner::List(elements));
        self.instances.allocate(instance)
    }

    pub fn allocate_set(&mut self, elements: Vec<InstanceId>) -> InstanceId {
        let context = self.contexts.push(Some(self.root_context));
        let mut instance = Instance::plain(self.set_fqn, context);
        instance.inner = Some(Inner::Set(elements));
        self.instances.allocate(instance)
    }

    /// Wraps `exception` for propagation by `?` through a native's `RunResult`.
    #[must_use]
    pub fn raise(exception: InstanceId) -> RunError {
        RunError::Raised(exception)
    }

    /// Allocates an `EvaluationError` carrying `message` and wraps it for propagation.
    pub fn raise_evaluation_error(&mut self, message: impl Into<String>) -> RunError {
        let context = self.contexts.push(Some(self.root_context));
        let mut instance = Instance::plain(self.evaluation_error_fqn, context);
        instance.inner = Some(Inner::String(message.into()));
        RunError::Raised(self.instances.allocate(instance))
    }

    fn raise_stack_overflow(&mut self) -> RunError {
        let context = self.contexts.push(Some(self.root_context));
        let instance = Instance::plain(self.stack_overflow_fqn, context);
        RunError::Raised(self.instances.allocate(instance))
    }

    /// Pushes `value` onto the currently-running frame's operand stack. Used by natives,
    /// which run with the caller's frame still current.
    ///
    /// # Panics
    /// Panics if no frame is running; natives are only ever called from inside `CALL`.
    pub fn push_current(&mut self, value: InstanceId) {
        self.frames.last_mut().expect("no running frame").operand_stack.push(value);
    }

    fn code_for(&mut self, id: NodeId) -> Result<Rc<[Instruction]>, CompileError> {
        if let Some(code) = self.code_cache.get(&id) {
            return Ok(code.clone());
        }
        let compiled: Rc<[Instruction]> = bytecode::compile_callable(&self.environment, id)?.into();
        self.code_cache.insert(id, compiled.clone());
        Ok(compiled)
    }

    fn push_frame(&mut self, instructions: Vec<Instruction>, base_context: ContextId) -> RunResult<()> {
        self.push_compiled_frame(instructions.into(), base_context)
    }

    fn push_compiled_frame(&mut self, instructions: Rc<[Instruction]>, base_context: ContextId) -> RunResult<()> {
        if self.frames.len() >= self.config.max_frame_stack_size {
            let exception = self.raise_stack_overflow();
            return Err(exception);
        }
        self.frames.push(Frame {
            instructions,
            pc: 0,
            operand_stack: Vec::new(),
            base_context,
            current_context: base_context,
        });
        Ok(())
    }

    fn current_operand_push(&mut self, value: InstanceId) -> RunResult<()> {
        let frame = self.frames.last_mut().ok_or_else(|| RunError::Fatal("no running frame".to_owned()))?;
        if frame.operand_stack.len() >= self.config.max_operand_stack_size {
            return Err(self.raise_stack_overflow());
        }
        frame.operand_stack.push(value);
        Ok(())
    }

    fn current_operand_pop(&mut self) -> RunResult<InstanceId> {
        self.frames
            .last_mut()
            .ok_or_else(|| RunError::Fatal("no running frame".to_owned()))?
            .operand_stack
            .pop()
            .ok_or_else(|| RunError::Fatal("popped an empty operand stack".to_owned()))
    }

    /// Binds `name` in the nearest context (starting at `from`) that already binds it,
    /// falling back to binding it fresh at `from` if nothing does.
    fn bind(&mut self, from: ContextId, name: &str, value: InstanceId) {
        let binder = self.contexts.nearest_binder(from, name).unwrap_or(from);
        self.contexts.get_mut(binder).locals.insert(name.to_owned(), value);
    }

    fn pop_frame_delivering<T: VmTracer>(&mut self, value: InstanceId, tracer: &mut T) {
        self.frames.pop();
        tracer.on_return(self.frames.len());
        if let Some(caller) = self.frames.last_mut() {
            caller.operand_stack.push(value);
        }
    }

    /// Runs `instructions` in a throwaway frame (rooted at `base_context`) to completion,
    /// driven entirely within this call — used where an opcode must itself produce a
    /// value rather than asynchronously handing control back to the dispatch loop (field
    /// initializers inside `INIT_NAMED`).
    fn run_to_completion<T: VmTracer>(&mut self, instructions: Vec<Instruction>, base_context: ContextId, tracer: &mut T) -> RunResult<InstanceId> {
        let depth_before = self.frames.len();
        self.push_frame(instructions, base_context)?;
        while self.frames.len() > depth_before {
            self.step(tracer)?;
        }
        if self.frames.len() != depth_before {
            return Err(RunError::Fatal("frame stack corrupted during nested evaluation".to_owned()));
        }
        self.frames
            .last_mut()
            .and_then(|f| f.operand_stack.pop())
            .ok_or_else(|| RunError::Fatal("nested evaluation left no value".to_owned()))
    }

    /// Advances the evaluation by one instruction. Returns `Ok(true)` while there is
    /// still a frame to run, `Ok(false)` once the frame stack is empty.
    ///
    /// # Errors
    /// Returns `Err` only for a fatal error or an exception that unwound past an empty
    /// frame stack; a caught exception is resolved internally and `Ok(true)` is returned.
    pub fn step<T: VmTracer>(&mut self, tracer: &mut T) -> RunResult<bool> {
        let Some(idx) = self.frames.len().checked_sub(1) else {
            return Ok(false);
        };
        let at = self.frames[idx].pc;
        if at >= self.frames[idx].instructions.len() {
            let value = self.frames[idx].operand_stack.pop().unwrap_or(self.null_id);
            self.pop_frame_delivering(value, tracer);
            return Ok(!self.frames.is_empty());
        }
        let instruction = self.frames[idx].instructions[at].clone();
        tracer.on_instruction(at, &instruction, self.frames.len());
        self.frames[idx].pc = at + 1;
        match self.dispatch(idx, at, instruction, tracer) {
            Ok(()) => Ok(!self.frames.is_empty()),
            Err(RunError::Raised(exception)) => {
                exceptions::unwind(self, exception, tracer)?;
                Ok(!self.frames.is_empty())
            }
            Err(fatal) => Err(fatal),
        }
    }

    /// Runs `step` until the frame stack empties.
    ///
    /// # Errors
    /// See [`Evaluation::step`].
    pub fn step_all<T: VmTracer>(&mut self, tracer: &mut T) -> RunResult<()> {
        while self.step(tracer)? {}
        Ok(())
    }

    /// Invokes `message` on `receiver` with `args` from outside the VM: pushes a
    /// synthesized frame that pushes the receiver and args and `CALL`s, runs until that
    /// frame is alone back on top with its result on its operand stack, then pops it and
    /// returns that result directly.
    ///
    /// # Errors
    /// See [`Evaluation::step`].
    pub fn send_message<T: VmTracer>(&mut self, message: &str, receiver: InstanceId, args: &[InstanceId], tracer: &mut T) -> RunResult<InstanceId> {
        let instructions = vec![Instruction::Call {
            message: message.to_owned(),
            arity: args.len(),
            lookup_start: None,
            skip_receiver: false,
        }];
        let depth_before = self.frames.len();
        self.push_frame(instructions, self.root_context)?;
        let pushed_idx = self.frames.len() - 1;
        self.frames[pushed_idx].operand_stack.push(receiver);
        self.frames[pushed_idx].operand_stack.extend_from_slice(args);
        // Stop as soon as the synthesized frame is back on top of its own call, rather
        // than draining it too: once it finishes naturally, `step` delivers its result to
        // whatever frame sits beneath it (`None` at depth_before == 0), not back to us.
        while self.frames.len() > depth_before + 1 {
            self.step(tracer)?;
        }
        self.frames
            .pop()
            .and_then(|mut frame| frame.operand_stack.pop())
            .ok_or_else(|| RunError::Fatal("sendMessage left no result".to_owned()))
    }

    /// Deep-copies the entire mutable state of this evaluation. Since every runtime edge
    /// (context parent, instance field values, frame operand stacks) is an integer id
    /// into one of these tables rather than a pointer, a structural clone of the tables
    /// is inherently cycle-safe and needs no special-cased graph walk.
    #[must_use]
    pub fn copy(&self) -> Self {
        self.clone()
    }

    fn bind_parameters(
        &mut self,
        new_ctx: ContextId,
        parameters: &[NodeId],
        variadic: bool,
        args: &[InstanceId],
    ) -> RunResult<()> {
        let fixed = parameters.len() - usize::from(variadic);
        for (&param, &value) in parameters.iter().take(fixed).zip(args) {
            let Node::Parameter(p) = self.environment.node(param) else {
                return Err(RunError::Fatal("non-parameter node in parameter list".to_owned()));
            };
            self.contexts.get_mut(new_ctx).locals.insert(p.name.clone(), value);
        }
        if variadic {
            let rest = args.get(fixed..).unwrap_or(&[]).to_vec();
            let list = self.allocate_list(rest);
            let Some(&last_param) = parameters.last() else {
                return Err(RunError::Fatal("variadic method has no parameters".to_owned()));
            };
            let Node::Parameter(p) = self.environment.node(last_param) else {
                return Err(RunError::Fatal("non-parameter node in parameter list".to_owned()));
            };
            self.contexts.get_mut(new_ctx).locals.insert(p.name.clone(), list);
        }
        Ok(())
    }

    fn dispatch_call<T: VmTracer>(
        &mut self,
        message: &str,
        receiver: InstanceId,
        args: &[InstanceId],
        lookup_start: Option<NodeId>,
        tracer: &mut T,
    ) -> RunResult<()> {
        let module = self.instances.get(receiver).module;
        let Some(method_id) = lookup_method(&self.environment, module, lookup_start, message, args.len()) else {
            return self.dispatch_message_not_understood(receiver, message, args, tracer);
        };
        let (is_native, parameters, variadic) = match self.environment.node(method_id) {
            Node::Method(m) => (m.is_native, m.parameters.clone(), m.variadic),
            _ => return Err(RunError::Fatal("lookup_method returned a non-method node".to_owned())),
        };
        tracer.on_call(message, self.frames.len());
        if is_native {
            let owner = self.environment.parent(method_id).ok_or_else(|| RunError::Fatal("native method has no owning module".to_owned()))?;
            let owner_fqn = self.environment.fqn_of(owner);
            let native = self
                .natives
                .lookup(&owner_fqn, message)
                .ok_or_else(|| RunError::Fatal(format!("no native registered for {owner_fqn}.{message}")))?;
            native(self, receiver, args)
        } else {
            let new_ctx = self.contexts.push(Some(self.instances.get(receiver).context));
            self.contexts.get_mut(new_ctx).locals.insert("self".to_owned(), receiver);
            self.bind_parameters(new_ctx, &parameters, variadic, args)?;
            let code = self.code_for(method_id).map_err(|e| RunError::Fatal(e.to_string()))?;
            self.push_compiled_frame(code, new_ctx)
        }
    }

    fn dispatch_message_not_understood<T: VmTracer>(&mut self, receiver: InstanceId, message: &str, args: &[InstanceId], tracer: &mut T) -> RunResult<()> {
        let module = self.instances.get(receiver).module;
        if lookup_method(&self.environment, module, None, "messageNotUnderstood", 2).is_none() {
            return Err(self.raise_evaluation_error(format!("{message} not understood by an instance of {}", self.environment.fqn_of(module))));
        }
        let message_instance = self.intern_string(message);
        let args_list = self.allocate_list(args.to_vec());
        self.dispatch_call("messageNotUnderstood", receiver, &[message_instance, args_list], None, tracer)
    }

    fn dispatch<T: VmTracer>(&mut self, idx: usize, at: usize, instruction: Instruction, tracer: &mut T) -> RunResult<()> {
        match instruction {
            Instruction::Load { name } => {
                let ctx = self.frames[idx].current_context;
                let Some(value) = self.contexts.lookup(ctx, &name) else {
                    return Err(RunError::Fatal(format!("unbound name `{name}`")));
                };
                match self.instances.get(value).lazy_initializer {
                    Some(init_expr) => {
                        let mut instructions = bytecode::compile_standalone_expr(&self.environment, init_expr).map_err(|e| RunError::Fatal(e.to_string()))?;
                        instructions.push(Instruction::Dup);
                        instructions.push(Instruction::Store { name, lookup: true });
                        instructions.push(Instruction::Return);
                        self.push_frame(instructions, ctx)
                    }
                    None => self.current_operand_push(value),
                }
            }
            Instruction::Store { name, lookup } => {
                let value = self.current_operand_pop()?;
                let ctx = self.frames[idx].current_context;
                if lookup {
                    self.bind(ctx, &name, value);
                } else {
                    self.contexts.get_mut(ctx).locals.insert(name, value);
                }
                Ok(())
            }
            Instruction::Push { id } => {
                let value = match id {
                    Some(node_id) => *self
                        .singleton_instances
                        .get(&node_id)
                        .ok_or_else(|| RunError::Fatal("PUSH of an id naming no known singleton".to_owned()))?,
                    None => self.null_id,
                };
                self.current_operand_push(value)
            }
            Instruction::Instantiate { fqn, inner } => match inner {
                None => {
                    let context = self.contexts.push(Some(self.root_context));
                    // Every declared field starts bound to null in the instance's own
                    // fields context, not left unbound, so a constructor's `self.field = x`
                    // (compiled as a lookup-and-rebind `STORE`) finds it here rather than
                    // falling through to bind a same-named local in the caller's frame.
                    for ancestor in linearize(&self.environment, fqn) {
                        for &member in self.environment.members_of(ancestor).to_vec() {
                            if let Node::Field(field) = self.environment.node(member) {
                                self.contexts.get_mut(context).locals.insert(field.name.clone(), self.null_id);
                            }
                        }
                    }
                    let id = self.instances.allocate(Instance::plain(fqn, context));
                    self.current_operand_push(id)
                }
                Some(InstantiateInner::Null) => self.current_operand_push(self.null_id),
                Some(InstantiateInner::Bool(value)) => self.current_operand_push(if value { self.true_id } else { self.false_id }),
                Some(InstantiateInner::Number(raw)) => {
                    let id = self.instances.intern_number(fqn, self.root_context, &raw, self.config.decimal_precision);
                    self.current_operand_push(id)
                }
                Some(InstantiateInner::String(value)) => {
                    let id = self.instances.intern_string(fqn, self.root_context, &value);
                    self.current_operand_push(id)
                }
                Some(InstantiateInner::EmptyList) => {
                    let context = self.contexts.push(Some(self.root_context));
                    let mut instance = Instance::plain(fqn, context);
                    instance.inner = Some(Inner::List(Vec::new()));
                    let id = self.instances.allocate(instance);
                    self.current_operand_push(id)
                }
                Some(InstantiateInner::EmptySet) => {
                    let context = self.contexts.push(Some(self.root_context));
                    let mut instance = Instance::plain(fqn, context);
                    instance.inner = Some(Inner::Set(Vec::new()));
                    let id = self.instances.allocate(instance);
                    self.current_operand_push(id)
                }
            },
            Instruction::Pop => self.current_operand_pop().map(|_| ()),
            Instruction::Dup => {
                let value = *self.frames[idx].operand_stack.last().ok_or_else(|| RunError::Fatal("DUP on an empty operand stack".to_owned()))?;
                self.current_operand_push(value)
            }
            Instruction::Swap { depth } => {
                let stack = &mut self.frames[idx].operand_stack;
                let len = stack.len();
                let top = len.checked_sub(1).ok_or_else(|| RunError::Fatal("SWAP on an empty operand stack".to_owned()))?;
                let other = len.checked_sub(2 + depth).ok_or_else(|| RunError::Fatal("SWAP depth out of range".to_owned()))?;
                stack.swap(top, other);
                Ok(())
            }
            Instruction::PushContext { handler } => {
                let parent = self.frames[idx].current_context;
                let new_ctx = self.contexts.push(Some(parent));
                if let Some(target) = handler {
                    self.contexts.get_mut(new_ctx).exception_handler = Some(target);
                }
                self.frames[idx].current_context = new_ctx;
                Ok(())
            }
            Instruction::PopContext => {
                let ctx = self.frames[idx].current_context;
                if ctx == self.frames[idx].base_context {
                    return Err(RunError::Fatal("POP_CONTEXT on a frame's base context".to_owned()));
                }
                let parent = self.contexts.get(ctx).parent.ok_or_else(|| RunError::Fatal("context has no parent to pop to".to_owned()))?;
                self.frames[idx].current_context = parent;
                Ok(())
            }
            Instruction::Inherits { fqn } => {
                let receiver = self.current_operand_pop()?;
                let module = self.instances.get(receiver).module;
                let is_subtype = linearize(&self.environment, module).contains(&fqn);
                self.current_operand_push(if is_subtype { self.true_id } else { self.false_id })
            }
            Instruction::Jump { offset } => {
                self.frames[idx].pc = (at as isize + offset) as usize;
                Ok(())
            }
            Instruction::ConditionalJump { offset } => {
                let value = self.current_operand_pop()?;
                if value != self.true_id && value != self.false_id {
                    return Err(self.raise_evaluation_error("non-boolean condition"));
                }
                if value == self.true_id {
                    self.frames[idx].pc = (at as isize + offset) as usize;
                }
                Ok(())
            }
            Instruction::Call {
                message,
                arity,
                lookup_start,
                skip_receiver,
            } => {
                let mut args = Vec::with_capacity(arity);
                for _ in 0..arity {
                    args.push(self.current_operand_pop()?);
                }
                args.reverse();
                let receiver = if skip_receiver {
                    self.contexts.lookup(self.frames[idx].current_context, "self").ok_or_else(|| RunError::Fatal("no `self` bound for a skip-receiver call".to_owned()))?
                } else {
                    self.current_operand_pop()?
                };
                self.dispatch_call(&message, receiver, &args, lookup_start, tracer)
            }
            Instruction::Init { arity, lookup_start, optional } => {
                let mut args = Vec::with_capacity(arity);
                for _ in 0..arity {
                    args.push(self.current_operand_pop()?);
                }
                args.reverse();
                let receiver = self.current_operand_pop()?;
                match lookup_constructor(&self.environment, lookup_start, arity) {
                    Some(ctor_id) => {
                        let (parameters, variadic) = match self.environment.node(ctor_id) {
                            Node::Constructor(c) => (c.parameters.clone(), c.variadic),
                            _ => return Err(RunError::Fatal("lookup_constructor returned a non-constructor node".to_owned())),
                        };
                        let new_ctx = self.contexts.push(Some(self.instances.get(receiver).context));
                        self.contexts.get_mut(new_ctx).locals.insert("self".to_owned(), receiver);
                        self.bind_parameters(new_ctx, &parameters, variadic, &args)?;
                        let code = self.code_for(ctor_id).map_err(|e| RunError::Fatal(e.to_string()))?;
                        // The pushed frame's trailing `Load self; Return` delivers `receiver`
                        // back onto this frame's stack once it completes; nothing to push here.
                        self.push_compiled_frame(code, new_ctx)
                    }
                    None if optional => self.current_operand_push(receiver),
                    None => Err(RunError::Fatal("no constructor of the required arity and no optional fallback".to_owned())),
                }
            }
            Instruction::InitNamed { names } => {
                let mut values = Vec::with_capacity(names.len());
                for _ in 0..names.len() {
                    values.push(self.current_operand_pop()?);
                }
                values.reverse();
                let receiver = self.current_operand_pop()?;
                let module = self.instances.get(receiver).module;
                let receiver_ctx = self.instances.get(receiver).context;
                for ancestor in linearize(&self.environment, module) {
                    for &member in self.environment.members_of(ancestor).to_vec() {
                        if let Node::Field(field) = self.environment.node(member) {
                            self.contexts.get_mut(receiver_ctx).locals.insert(field.name.clone(), self.null_id);
                        }
                    }
                }
                for (name, value) in names.iter().zip(values) {
                    self.contexts.get_mut(receiver_ctx).locals.insert(name.clone(), value);
                }
                for ancestor in linearize(&self.environment, module) {
                    for &member in self.environment.members_of(ancestor).to_vec() {
                        let Node::Field(field) = self.environment.node(member) else { continue };
                        if names.contains(&field.name) {
                            continue;
                        }
                        let Some(init_expr) = field.initializer else { continue };
                        let field_name = field.name.clone();
                        let instructions = bytecode::compile_standalone_expr(&self.environment, init_expr).map_err(|e| RunError::Fatal(e.to_string()))?;
                        let value = self.run_to_completion(instructions, receiver_ctx, tracer)?;
                        self.contexts.get_mut(receiver_ctx).locals.insert(field_name, value);
                    }
                }
                self.current_operand_push(receiver)
            }
            Instruction::Interrupt => {
                let exception = self.current_operand_pop()?;
                Err(RunError::Raised(exception))
            }
            Instruction::Return => {
                let value = self.current_operand_pop()?;
                self.pop_frame_delivering(value, tracer);
                Ok(())
            }
        }
    }
}
