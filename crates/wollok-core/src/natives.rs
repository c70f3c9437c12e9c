//! The native-function dispatch table: the embedder-supplied escape hatch for methods
//! whose body is the "native" sentinel (no Wollok-level body to compile).

use ahash::AHashMap;

use crate::{
    runtime::InstanceId,
    vm::{Evaluation, RunResult},
};

/// A native receives the receiver, the already-evaluated arguments, and a handle to the
/// evaluation, and must leave exactly one value on the current frame's operand stack
/// (or raise via [`Evaluation::raise`]).
pub type NativeFn = fn(&mut Evaluation, InstanceId, &[InstanceId]) -> RunResult<()>;

/// Keyed by `"<module fqn>.<method name>"`, e.g. `"wollok.lang.Number.+"`.
#[derive(Default)]
pub struct NativeTable(AHashMap<String, NativeFn>);

impl NativeTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module_fqn: &str, message: &str, native: NativeFn) {
        self.0.insert(format!("{module_fqn}.{message}"), native);
    }

    pub(crate) fn lookup(&self, module_fqn: &str, message: &str) -> Option<NativeFn> {
        self.0.get(&format!("{module_fqn}.{message}")).copied()
    }
}

impl std::fmt::Debug for NativeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeTable").field("len", &self.0.len()).finish()
    }
}
