//! Runtime values: instances and the opaque handles native functions stash on them.

use std::{fmt, rc::Rc};

use crate::{node::NodeId, runtime::context::ContextId};

/// Stable-within-one-Evaluation identifier for an [`Instance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub(crate) u32);

impl InstanceId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A native's private payload, opaque to the interpreter loop. Natives downcast it
/// themselves; the core never inspects it.
#[derive(Clone)]
pub struct NativeHandle(pub Rc<dyn std::any::Any>);

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<native handle>")
    }
}

/// The inner value of a non-plain-object instance: the data a primitive or
/// native-backed instance carries alongside its fields context.
#[derive(Debug, Clone)]
pub enum Inner {
    String(String),
    /// Stored in its already-rounded string form, the interning key.
    Number(String),
    List(Vec<InstanceId>),
    Set(Vec<InstanceId>),
    Native(NativeHandle),
}

/// A runtime object: a fields context plus its module and, for primitives and
/// native-backed instances, an inner payload.
#[derive(Debug, Clone)]
pub struct Instance {
    pub module: NodeId,
    /// The context holding this instance's own fields. Its parent is the lexically
    /// enclosing context at the point the instance was created (relevant for closures
    /// and literal singletons capturing their surrounding scope).
    pub context: ContextId,
    pub inner: Option<Inner>,
    /// Set only for package-level constants and lazily-evaluated singleton fields;
    /// `LOAD` replaces this with the evaluated value on first read.
    pub lazy_initializer: Option<NodeId>,
}

impl Instance {
    pub(crate) fn plain(module: NodeId, context: ContextId) -> Self {
        Self {
            module,
            context,
            inner: None,
            lazy_initializer: None,
        }
    }
}
