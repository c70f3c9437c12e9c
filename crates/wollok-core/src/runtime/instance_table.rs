//! The id-keyed instance table, with content-based interning for primitives.

use ahash::AHashMap;

use crate::{
    node::NodeId,
    runtime::{
        context::ContextId,
        value::{Inner, Instance, InstanceId},
    },
};

/// Rounds `raw` (a decimal literal's textual form) to `precision` fractional digits,
/// trimming trailing zeros so two numbers that round to the same value also intern to
/// the same string key.
pub(crate) fn round_decimal(raw: &str, precision: u32) -> String {
    let value: f64 = raw.parse().unwrap_or(0.0);
    let factor = 10f64.powi(i32::try_from(precision).unwrap_or(5));
    let rounded = (value * factor).round() / factor;
    let formatted = format!("{rounded:.*}", precision as usize);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" { "0".to_owned() } else { trimmed.to_owned() }
}

/// Instances live in a `Vec<Option<Instance>>` so garbage collection can tombstone a
/// slot in place and the freed index gets reused by the next allocation.
#[derive(Debug, Clone, Default)]
pub struct InstanceTable {
    instances: Vec<Option<Instance>>,
    free: Vec<u32>,
    numbers: AHashMap<String, InstanceId>,
    strings: AHashMap<String, InstanceId>,
}

impl InstanceTable {
    pub fn allocate(&mut self, instance: Instance) -> InstanceId {
        if let Some(index) = self.free.pop() {
            self.instances[index as usize] = Some(instance);
            InstanceId(index)
        } else {
            let id = InstanceId(u32::try_from(self.instances.len()).expect("instance table overflowed u32"));
            self.instances.push(Some(instance));
            id
        }
    }

    pub fn get(&self, id: InstanceId) -> &Instance {
        self.instances[id.index()].as_ref().expect("use of a garbage-collected instance id")
    }

    pub fn get_mut(&mut self, id: InstanceId) -> &mut Instance {
        self.instances[id.index()].as_mut().expect("use of a garbage-collected instance id")
    }

    /// Interns a number by its precision-rounded string form, allocating fresh only on
    /// first sight of that form.
    pub fn intern_number(&mut self, module: NodeId, context: ContextId, raw: &str, precision: u32) -> InstanceId {
        let key = round_decimal(raw, precision);
        if let Some(&id) = self.numbers.get(&key) {
            return id;
        }
        let mut instance = Instance::plain(module, context);
        instance.inner = Some(Inner::Number(key.clone()));
        let id = self.allocate(instance);
        self.numbers.insert(key, id);
        id
    }

    pub fn intern_string(&mut self, module: NodeId, context: ContextId, value: &str) -> InstanceId {
        if let Some(&id) = self.strings.get(value) {
            return id;
        }
        let mut instance = Instance::plain(module, context);
        instance.inner = Some(Inner::String(value.to_owned()));
        let id = self.allocate(instance);
        self.strings.insert(value.to_owned(), id);
        id
    }

    /// Marks every id in `live` as reachable and frees everything else, pushing freed
    /// indices onto the reuse list. Interning tables are pruned to match.
    pub fn sweep(&mut self, live: &ahash::AHashSet<InstanceId>) {
        for (index, slot) in self.instances.iter_mut().enumerate() {
            let id = InstanceId(u32::try_from(index).expect("instance table overflowed u32"));
            if slot.is_some() && !live.contains(&id) {
                *slot = None;
                self.free.push(id.0);
            }
        }
        self.numbers.retain(|_, id| live.contains(id));
        self.strings.retain(|_, id| live.contains(id));
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }
}
