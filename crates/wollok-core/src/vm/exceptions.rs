//! Stack unwinding: walks nested contexts for an exception handler, popping whole
//! frames when a frame has none, and propagating fatally once the frame stack empties.

use crate::{
    bytecode::TRY_EXCEPTION_LOCAL,
    runtime::InstanceId,
    tracer::VmTracer,
    vm::{Evaluation, RunError, RunResult},
};

/// Resolves a raised `exception` against `eval`'s frame stack.
///
/// On success the top frame's `pc` now points at the matching `try`'s catch-dispatch
/// chain and `<exception>` is bound to `exception` in the now-current context; execution
/// should simply resume from there. Returns `Err(RunError::Raised(exception))` if no
/// handler exists anywhere on the frame stack.
pub(crate) fn unwind<T: VmTracer>(eval: &mut Evaluation, exception: InstanceId, tracer: &mut T) -> RunResult<()> {
    tracer.on_raise(eval.frames.len());
    loop {
        let Some(frame) = eval.frames.last() else {
            return Err(RunError::Raised(exception));
        };
        let mut search = Some(frame.current_context);
        let mut handler = None;
        while let Some(ctx_id) = search {
            let ctx = eval.contexts.get(ctx_id);
            if let Some(target) = ctx.exception_handler {
                handler = Some((ctx_id, target));
                break;
            }
            search = ctx.parent;
        }
        match handler {
            Some((ctx_id, target)) => {
                let parent = eval.contexts.get(ctx_id).parent;
                let binding_context = parent.unwrap_or(frame.current_context);
                eval.bind(binding_context, TRY_EXCEPTION_LOCAL, exception);
                let frame = eval.frames.last_mut().expect("checked at the top of the loop");
                frame.current_context = binding_context;
                frame.pc = target;
                return Ok(());
            }
            None => {
                eval.frames.pop();
            }
        }
    }
}
