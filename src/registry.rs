use std::collections::hash_map::Entry;
use rustc_hash::FxHashMap;
use crate::addr_tuple::AddrTuple;
use crate::events::MachineId;
use crate::tid::Tid;

pub trait Machine {
    fn handle(&self) -> MachineId;
    fn addr(&self) -> AddrTuple;
    fn tid(&self) -> Tid;
}

/// What a machine set does with a machine after it handled an event
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Lifecycle {
    Alive,
    /// the machine is back in its initial state and is destroyed
    Finished,
}

/// The live machines of one machine set, reachable both by (address tuple, tid) for network
///  events and by handle for application primitives and timers.
///
/// A registry is owned by its machine set's worker, so there is no locking.
pub struct MachineRegistry<M: Machine> {
    by_handle: FxHashMap<MachineId, M>,
    by_key: FxHashMap<(AddrTuple, Tid), MachineId>,
}

impl<M: Machine> MachineRegistry<M> {
    pub fn new() -> MachineRegistry<M> {
        MachineRegistry {
            by_handle: FxHashMap::default(),
            by_key: FxHashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    /// Registers a machine, handing it back if its handle or key is already taken
    pub fn insert(&mut self, machine: M) -> Result<MachineId, M> {
        let handle = machine.handle();
        let key = (machine.addr(), machine.tid());

        if self.by_handle.contains_key(&handle) {
            return Err(machine);
        }
        match self.by_key.entry(key) {
            Entry::Occupied(_) => Err(machine),
            Entry::Vacant(e) => {
                e.insert(handle);
                self.by_handle.insert(handle, machine);
                Ok(handle)
            }
        }
    }

    pub fn handle_for(&self, addr: &AddrTuple, tid: Tid) -> Option<MachineId> {
        self.by_key.get(&(*addr, tid))
            .copied()
    }

    pub fn get(&self, handle: MachineId) -> Option<&M> {
        self.by_handle.get(&handle)
    }

    pub fn get_mut(&mut self, handle: MachineId) -> Option<&mut M> {
        self.by_handle.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: MachineId) -> Option<M> {
        let machine = self.by_handle.remove(&handle)?;
        self.by_key.remove(&(machine.addr(), machine.tid()));
        Some(machine)
    }

    pub fn handles(&self) -> Vec<MachineId> {
        self.by_handle.keys()
            .copied()
            .collect()
    }
}

impl<M: Machine> Default for MachineRegistry<M> {
    fn default() -> Self {
        MachineRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::addr::test_addr_tuple;

    struct DummyMachine {
        handle: MachineId,
        addr: AddrTuple,
        tid: Tid,
    }

    impl Machine for DummyMachine {
        fn handle(&self) -> MachineId { self.handle }
        fn addr(&self) -> AddrTuple { self.addr }
        fn tid(&self) -> Tid { self.tid }
    }

    fn dummy(handle: u64, addr: u16, tid: u16) -> DummyMachine {
        DummyMachine {
            handle: MachineId::from_raw(handle),
            addr: test_addr_tuple(addr),
            tid: Tid::from_raw(tid),
        }
    }

    #[test]
    fn test_lookup_by_key_and_handle() {
        let mut registry = MachineRegistry::new();
        assert!(registry.insert(dummy(1, 1, 10)).is_ok());
        assert!(registry.insert(dummy(2, 1, 11)).is_ok());
        assert!(registry.insert(dummy(3, 2, 10)).is_ok());

        assert_eq!(registry.handle_for(&test_addr_tuple(1), Tid::from_raw(11)), Some(MachineId::from_raw(2)));
        assert_eq!(registry.handle_for(&test_addr_tuple(2), Tid::from_raw(10)), Some(MachineId::from_raw(3)));
        assert_eq!(registry.handle_for(&test_addr_tuple(2), Tid::from_raw(11)), None);
        assert_eq!(registry.get(MachineId::from_raw(1)).map(|m| m.tid), Some(Tid::from_raw(10)));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let mut registry = MachineRegistry::new();
        assert!(registry.insert(dummy(1, 1, 10)).is_ok());
        assert!(registry.insert(dummy(1, 2, 20)).is_err());
        assert!(registry.insert(dummy(2, 1, 10)).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut registry = MachineRegistry::new();
        let _ = registry.insert(dummy(1, 1, 10));

        assert!(registry.remove(MachineId::from_raw(1)).is_some());
        assert!(registry.remove(MachineId::from_raw(1)).is_none());
        assert_eq!(registry.handle_for(&test_addr_tuple(1), Tid::from_raw(10)), None);
        assert!(registry.is_empty());

        assert!(registry.insert(dummy(2, 1, 10)).is_ok());
    }
}
