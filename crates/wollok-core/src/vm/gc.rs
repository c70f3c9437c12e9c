//! Mark-and-sweep over the instance table. Roots are the root context, every running
//! frame's current context and operand stack, and any singleton instance a frame's own
//! instructions could still `PUSH`. Tracing follows a context's parent and locals, and
//! (for list/set instances) each element id.

use ahash::AHashSet;

use crate::{
    bytecode::Instruction,
    runtime::{ContextId, Inner, InstanceId},
    vm::Evaluation,
};

/// Runs one collection pass, reclaiming every unreachable instance. Only safe to call
/// between instructions: mid-instruction, an opcode may have already popped operands it
/// hasn't finished using.
pub fn collect_garbage(eval: &mut Evaluation) {
    let mut live_instances: AHashSet<InstanceId> = AHashSet::new();
    let mut live_contexts: AHashSet<ContextId> = AHashSet::new();
    let mut context_queue = vec![eval.root_context];
    let mut instance_queue = Vec::new();

    for frame in &eval.frames {
        context_queue.push(frame.current_context);
        instance_queue.extend(frame.operand_stack.iter().copied());
        for instruction in frame.instructions.iter() {
            if let Instruction::Push { id: Some(node_id) } = instruction {
                if let Some(&instance_id) = eval.singleton_instances.get(node_id) {
                    instance_queue.push(instance_id);
                }
            }
        }
    }

    loop {
        let mut progressed = false;
        while let Some(ctx_id) = context_queue.pop() {
            if live_contexts.insert(ctx_id) {
                progressed = true;
                let ctx = eval.contexts.get(ctx_id);
                if let Some(parent) = ctx.parent {
                    context_queue.push(parent);
                }
                instance_queue.extend(ctx.locals.values().copied());
            }
        }
        while let Some(id) = instance_queue.pop() {
            if live_instances.insert(id) {
                progressed = true;
                let instance = eval.instances.get(id);
                context_queue.push(instance.context);
                if let Some(Inner::List(items) | Inner::Set(items)) = &instance.inner {
                    instance_queue.extend(items.iter().copied());
                }
            }
        }
        if !progressed {
            break;
        }
    }

    eval.instances.sweep(&live_instances);
}
