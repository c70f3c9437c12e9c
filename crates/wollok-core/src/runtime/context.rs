//! Nested lexical contexts: the local-variable/field scope chain a frame walks for
//! `LOAD`/`STORE`.

use ahash::AHashMap;

use crate::runtime::value::InstanceId;

/// Stable-within-one-Evaluation identifier for a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub(crate) u32);

impl ContextId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct Context {
    pub parent: Option<ContextId>,
    pub locals: AHashMap<String, InstanceId>,
    /// Instruction index this frame should jump to if an exception unwinds through
    /// this context. Only ever set on a `PushContext` for a `try` body.
    pub exception_handler: Option<usize>,
}

/// The arena every [`Context`] lives in. Never shrinks (contexts are cheap and their
/// lifetime tracking is left to garbage collection, not RAII).
#[derive(Debug, Clone, Default)]
pub struct ContextTable {
    contexts: Vec<Context>,
}

impl ContextTable {
    pub fn push(&mut self, parent: Option<ContextId>) -> ContextId {
        let id = ContextId(u32::try_from(self.contexts.len()).expect("context arena overflowed u32"));
        self.contexts.push(Context {
            parent,
            locals: AHashMap::new(),
            exception_handler: None,
        });
        id
    }

    pub fn get(&self, id: ContextId) -> &Context {
        &self.contexts[id.index()]
    }

    pub fn get_mut(&mut self, id: ContextId) -> &mut Context {
        &mut self.contexts[id.index()]
    }

    /// Looks up `name` starting at `from`, walking parent contexts until found.
    pub fn lookup(&self, from: ContextId, name: &str) -> Option<InstanceId> {
        let mut current = Some(from);
        while let Some(id) = current {
            let ctx = self.get(id);
            if let Some(&value) = ctx.locals.get(name) {
                return Some(value);
            }
            current = ctx.parent;
        }
        None
    }

    /// The nearest context starting at `from` (inclusive) that already binds `name`.
    pub fn nearest_binder(&self, from: ContextId, name: &str) -> Option<ContextId> {
        let mut current = Some(from);
        while let Some(id) = current {
            if self.get(id).locals.contains_key(name) {
                return Some(id);
            }
            current = self.get(id).parent;
        }
        None
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }
}
