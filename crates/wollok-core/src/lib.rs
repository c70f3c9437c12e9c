//! Linker, compiler, and virtual machine core for a small class-based scripting
//! language: turns parsed source trees into a linked [`node::Environment`], lowers
//! method/constructor/program/test bodies into [`bytecode::Instruction`] sequences, and
//! runs them on a stack-based [`vm::Evaluation`].
//!
//! This crate has no parser of its own; [`parsed::ParsedPackage`] is the tree shape an
//! external parser is expected to hand to [`linker::link`].

mod bytecode;
mod config;
mod linker;
mod natives;
mod node;
mod parsed;
mod runtime;
mod stdlib;
mod tracer;
mod vm;

pub use bytecode::{CompileError, Instruction, InstantiateInner};
pub use config::Config;
pub use linker::{LinkError, ParsedBaseCall, ParsedCatch, ParsedImport, ParsedMember, ParsedNamedArgument, ParsedNode, ParsedPackage, ParsedParameter, link};
pub use natives::{NativeFn, NativeTable};
pub use node::{Environment, Node, NodeId};
pub use parsed::{Position, SourceMap};
pub use runtime::{Context, ContextId, ContextTable, Inner, Instance, InstanceId, InstanceTable, NativeHandle};
pub use stdlib::{base_environment, native_table};
pub use tracer::{NoopTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer};
pub use vm::{Evaluation, RunError, RunResult, collect_garbage};
