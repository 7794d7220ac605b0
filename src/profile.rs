use crate::hooks::Binding;
use crate::instance::{ArpCapability, Instance};
use crate::log::{EventLog, LogKind, LogLevel, DEFAULT_LOG_CAPACITY};
use crate::{DriverError, Protocol, ARP_ADDRESS, ARP_SLOT, MAX_INSTANCES};

/// Per-adapter aggregate: the instance arena plus everything shared across
/// instances. All cross-instance references are plain slot indices.
pub struct Profile<'h, const LOG_CAP: usize = DEFAULT_LOG_CAPACITY> {
    pub(crate) instances: [Option<Instance<'h>>; MAX_INSTANCES],
    /// Instance currently owning an outbound controller transaction.
    pub(crate) controller_in_play: Option<usize>,
    /// Instance currently addressed as a target.
    pub(crate) active_target: Option<usize>,
    next_xid: u32,
    pub(crate) initiated: [u32; Protocol::COUNT],
    pub(crate) completed: [u32; Protocol::COUNT],
    pub(crate) log: EventLog<LOG_CAP>,
    pub(crate) log_level: LogLevel,
    pub(crate) ticks: Option<fn() -> u32>,
}

impl<'h, const LOG_CAP: usize> Profile<'h, LOG_CAP> {
    pub fn new(log_level: LogLevel, ticks: Option<fn() -> u32>) -> Self {
        Self {
            instances: core::array::from_fn(|_| None),
            controller_in_play: None,
            active_target: None,
            next_xid: 1,
            initiated: [0; Protocol::COUNT],
            completed: [0; Protocol::COUNT],
            log: EventLog::new(),
            log_level,
            ticks,
        }
    }

    pub fn instance(&self, idx: usize) -> Option<&Instance<'h>> {
        self.instances.get(idx).and_then(|s| s.as_ref())
    }

    pub(crate) fn instance_mut(&mut self, idx: usize) -> Option<&mut Instance<'h>> {
        self.instances.get_mut(idx).and_then(|s| s.as_mut())
    }

    pub fn controller_in_play(&self) -> Option<usize> {
        self.controller_in_play
    }

    pub fn active_target(&self) -> Option<usize> {
        self.active_target
    }

    pub fn initiated_count(&self, protocol: Protocol) -> u32 {
        self.initiated[protocol.index()]
    }

    pub fn completed_count(&self, protocol: Protocol) -> u32 {
        self.completed[protocol.index()]
    }

    pub(crate) fn note_initiated(&mut self, protocol: Protocol) {
        self.initiated[protocol.index()] = self.initiated[protocol.index()].wrapping_add(1);
    }

    pub(crate) fn note_completed(&mut self, protocol: Protocol) {
        self.completed[protocol.index()] = self.completed[protocol.index()].wrapping_add(1);
    }

    pub(crate) fn assign_xid(&mut self) -> u32 {
        let xid = self.next_xid;
        self.next_xid = self.next_xid.wrapping_add(1).max(1);
        xid
    }

    pub(crate) fn normal_count(&self) -> usize {
        self.instances[..ARP_SLOT].iter().filter(|s| s.is_some()).count()
    }

    /// Places an instance in the first free normal slot. The reserved ARP
    /// instance is materialized alongside the first normal instance.
    pub(crate) fn allocate(
        &mut self,
        address: u8,
        udid: [u8; 16],
        capability: ArpCapability,
        hooks: Binding<'h>,
        simple: bool,
    ) -> Result<usize, DriverError> {
        let slot = self.instances[..ARP_SLOT]
            .iter()
            .position(|s| s.is_none())
            .ok_or(DriverError::NoFreeSlot)?;

        self.instances[slot] = Some(Instance::new(address, udid, capability, hooks, simple));

        if self.instances[ARP_SLOT].is_none() {
            self.instances[ARP_SLOT] = Some(Instance::new(
                ARP_ADDRESS,
                [0; 16],
                ArpCapability::NotCapable,
                Binding::Arp,
                false,
            ));
        }

        Ok(slot)
    }

    /// Removes the instance in `slot`. Returns the removed instance; the
    /// ARP instance goes with the last normal one.
    pub(crate) fn remove(&mut self, slot: usize) -> Option<Instance<'h>> {
        if slot >= ARP_SLOT {
            return None;
        }

        let removed = self.instances[slot].take()?;

        if self.controller_in_play == Some(slot) {
            self.controller_in_play = None;
        }
        if self.active_target == Some(slot) {
            self.active_target = None;
        }
        if self.normal_count() == 0 {
            self.instances[ARP_SLOT] = None;
            if self.active_target == Some(ARP_SLOT) {
                self.active_target = None;
            }
        }

        Some(removed)
    }

    pub(crate) fn log_entry(&mut self, kind: LogKind, instance: usize, arg0: u32, arg1: u32) {
        if kind.level() > self.log_level {
            return;
        }
        let ticks = self.ticks.map_or(0, |f| f());
        self.log.append(ticks, kind, instance as u8, arg0, arg1);
    }

    pub fn render_log(&self, out: &mut [u8]) -> usize {
        self.log.render(out)
    }

    pub fn reset_log(&mut self) {
        self.log.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile<'static, 16> {
        Profile::new(LogLevel::Debug, None)
    }

    fn allocate(p: &mut Profile<'static, 16>, addr: u8) -> Result<usize, DriverError> {
        p.allocate(addr, [0; 16], ArpCapability::NotCapable, Binding::Arp, false)
    }

    #[test]
    fn arp_instance_exists_iff_a_normal_instance_does() {
        let mut p = profile();
        assert!(p.instance(ARP_SLOT).is_none());

        let a = allocate(&mut p, 0x20).unwrap();
        assert!(p.instance(ARP_SLOT).is_some());
        assert_eq!(p.instance(ARP_SLOT).unwrap().address(), ARP_ADDRESS);

        let b = allocate(&mut p, 0x21).unwrap();
        p.remove(a);
        assert!(p.instance(ARP_SLOT).is_some());

        p.remove(b);
        assert!(p.instance(ARP_SLOT).is_none());
    }

    #[test]
    fn allocation_takes_first_free_slot_and_overflows_explicitly() {
        let mut p = profile();
        for i in 0..ARP_SLOT {
            assert_eq!(allocate(&mut p, 0x20 + i as u8), Ok(i));
        }
        assert_eq!(allocate(&mut p, 0x50), Err(DriverError::NoFreeSlot));

        p.remove(3);
        assert_eq!(allocate(&mut p, 0x50), Ok(3));
    }

    #[test]
    fn xids_are_monotonic_and_nonzero() {
        let mut p = profile();
        let a = p.assign_xid();
        let b = p.assign_xid();
        assert!(b > a);
        assert_ne!(a, 0);
    }
}
