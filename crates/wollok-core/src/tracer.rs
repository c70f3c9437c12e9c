//! VM execution tracing.
//!
//! [`VmTracer`] hooks the dispatch loop at instruction, call, and frame-return
//! boundaries. All methods default to no-ops, so [`NoopTracer`] costs nothing:
//! the VM carries its tracer as a type parameter, so the compiler monomorphizes and
//! inlines every hook away in the production path.

use crate::bytecode::Instruction;

/// One recorded execution event, used by [`RecordingTracer`] for post-mortem
/// inspection or deterministic-replay comparison between two runs.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    Instruction { pc: usize, instruction: Instruction, frame_depth: usize },
    Call { message: String, frame_depth: usize },
    Return { frame_depth: usize },
    Raise { frame_depth: usize },
}

pub trait VmTracer: std::fmt::Debug {
    #[inline(always)]
    fn on_instruction(&mut self, _pc: usize, _instruction: &Instruction, _frame_depth: usize) {}

    #[inline(always)]
    fn on_call(&mut self, _message: &str, _frame_depth: usize) {}

    #[inline(always)]
    fn on_return(&mut self, _frame_depth: usize) {}

    #[inline(always)]
    fn on_raise(&mut self, _frame_depth: usize) {}
}

/// Zero-cost production default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Prints each event to stderr as it happens.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, pc: usize, instruction: &Instruction, frame_depth: usize) {
        eprintln!("[{pc:>5}] {instruction:?}  frames={frame_depth}");
    }

    fn on_call(&mut self, message: &str, frame_depth: usize) {
        eprintln!("  >>> CALL {message} depth={frame_depth}");
    }

    fn on_return(&mut self, frame_depth: usize) {
        eprintln!("  <<< RETURN depth={frame_depth}");
    }

    fn on_raise(&mut self, frame_depth: usize) {
        eprintln!("  !!! RAISE depth={frame_depth}");
    }
}

/// Records every event for later inspection. The most expensive tracer — allocates per
/// event — so reserve it for debugging a specific failure, not routine runs.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

impl VmTracer for RecordingTracer {
    fn on_instruction(&mut self, pc: usize, instruction: &Instruction, frame_depth: usize) {
        self.events.push(TraceEvent::Instruction {
            pc,
            instruction: instruction.clone(),
            frame_depth,
        });
    }

    fn on_call(&mut self, message: &str, frame_depth: usize) {
        self.events.push(TraceEvent::Call {
            message: message.to_owned(),
            frame_depth,
        });
    }

    fn on_return(&mut self, frame_depth: usize) {
        self.events.push(TraceEvent::Return { frame_depth });
    }

    fn on_raise(&mut self, frame_depth: usize) {
        self.events.push(TraceEvent::Raise { frame_depth });
    }
}
