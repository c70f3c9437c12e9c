//! A tiny instruction-emitting helper so the compiler's lowering rules read as
//! `builder.emit(...)` instead of manually pushing into a `Vec` and hand-computing
//! relative jump offsets.

use crate::bytecode::op::Instruction;

pub(crate) struct CodeBuilder {
    instructions: Vec<Instruction>,
}

impl CodeBuilder {
    pub(crate) fn new() -> Self {
        Self { instructions: Vec::new() }
    }

    pub(crate) fn emit(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    pub(crate) fn position(&self) -> usize {
        self.instructions.len()
    }

    pub(crate) fn extend(&mut self, other: Vec<Instruction>) {
        self.instructions.extend(other);
    }

    /// Patches the `Jump`/`ConditionalJump` emitted at `at` so it jumps to the
    /// builder's current position.
    pub(crate) fn patch_jump_to_here(&mut self, at: usize) {
        let target = self.position();
        let offset = isize::try_from(target).expect("program too large") - isize::try_from(at).expect("program too large");
        match &mut self.instructions[at] {
            Instruction::Jump { offset: o } | Instruction::ConditionalJump { offset: o } => *o = offset,
            other => unreachable!("patch_jump_to_here called on {other:?}, not a jump"),
        }
    }

    /// Patches the `PushContext` emitted at `at` so its handler points at the
    /// builder's current position.
    pub(crate) fn patch_handler_to_here(&mut self, at: usize) {
        let target = self.position();
        match &mut self.instructions[at] {
            Instruction::PushContext { handler } => *handler = Some(target),
            other => unreachable!("patch_handler_to_here called on {other:?}, not a PushContext"),
        }
    }

    pub(crate) fn finish(self) -> Vec<Instruction> {
        self.instructions
    }
}
