//! The runtime value model: instances, their lexical contexts, and the table both live
//! in.

pub mod context;
pub mod instance_table;
pub mod value;

pub use context::{Context, ContextId, ContextTable};
pub use instance_table::InstanceTable;
pub use value::{Inner, Instance, InstanceId, NativeHandle};
