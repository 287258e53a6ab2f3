//! Per-transaction variable storage.

use super::collection::{CollectionRef, MultiMap, Scalar, Union};
use super::variable::{Shape, Variable};

#[derive(Debug, Clone)]
enum Slot {
    Scalar(Scalar),
    Map(MultiMap),
    Union {
        members: &'static [Variable],
        keys_only: bool,
    },
}

/// Every variable of a transaction, one collection per slot.
///
/// The store is built once and reused across pooled transactions; `reset`
/// clears values but keeps the slot allocations.
#[derive(Debug, Clone)]
pub struct VariableStore {
    slots: Vec<Slot>,
}

impl VariableStore {
    /// Build a store with an empty collection for every variable.
    pub fn new() -> Self {
        let slots = Variable::ALL
            .iter()
            .map(|&v| match v.shape() {
                Shape::Scalar => Slot::Scalar(Scalar::new(v)),
                Shape::Map(case) => Slot::Map(MultiMap::new(v, case)),
                Shape::Union { members, keys_only } => Slot::Union { members, keys_only },
            })
            .collect();
        Self { slots }
    }

    /// A store with no slots. Only valid as a placeholder that is never read.
    pub(crate) fn detached() -> Self {
        Self { slots: Vec::new() }
    }

    /// Borrow the collection of a variable. Unions are resolved here.
    pub fn collection(&self, variable: Variable) -> CollectionRef<'_> {
        match &self.slots[variable.index()] {
            Slot::Scalar(s) => CollectionRef::Scalar(s),
            Slot::Map(m) => CollectionRef::Map(m),
            Slot::Union { members, keys_only } => {
                let maps = members.iter().filter_map(|&m| self.map(m)).collect();
                CollectionRef::Union(Union::new(variable, maps, *keys_only))
            }
        }
    }

    /// Value of a scalar variable; empty for keyed variables.
    pub fn scalar(&self, variable: Variable) -> &str {
        match &self.slots[variable.index()] {
            Slot::Scalar(s) => s.value(),
            _ => "",
        }
    }

    /// Set a scalar variable. Keyed variables are left untouched.
    pub fn set_scalar(&mut self, variable: Variable, value: impl Into<String>) {
        if let Slot::Scalar(s) = &mut self.slots[variable.index()] {
            s.set(value);
        }
    }

    /// Borrow a stored map.
    pub fn map(&self, variable: Variable) -> Option<&MultiMap> {
        match &self.slots[variable.index()] {
            Slot::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Mutably borrow a stored map. Unions are read-only and yield `None`.
    pub fn map_mut(&mut self, variable: Variable) -> Option<&mut MultiMap> {
        match &mut self.slots[variable.index()] {
            Slot::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Append a value to a stored map.
    pub fn add(&mut self, variable: Variable, key: &str, value: impl Into<String>) {
        if let Some(m) = self.map_mut(variable) {
            m.add(key, value);
        }
    }

    /// Clear every collection.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            match slot {
                Slot::Scalar(s) => s.reset(),
                Slot::Map(m) => m.reset(),
                Slot::Union { .. } => {}
            }
        }
    }
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new()
    }
}
