use bitflags::bitflags;

use crate::buffer::{ReceiveBuffer, SendBuffer};
use crate::hooks::Binding;
use crate::state_holder::StateHolder;
use crate::{Event, Protocol, State, MAX_BLOCK_SIZE};

const STATE_HISTORY: usize = 8;

/// How far a retried TX-empty in `AwaitingDone` is tolerated before the
/// engine gives up and NACKs.
pub(crate) const DONE_RETRY_LIMIT: u8 = 3;

/// ARP address-assignment class of an instance's UDID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArpCapability {
    /// Does not take part in address resolution.
    NotCapable,
    /// Fixed address, discoverable through ARP.
    FixedDiscoverable,
    /// Dynamic address retained across power loss.
    DynamicPersistent,
    /// Dynamic address lost on reset.
    DynamicVolatile,
}

impl ArpCapability {
    pub(crate) fn arp_capable(self) -> bool {
        !matches!(self, ArpCapability::NotCapable)
    }

    pub(crate) fn is_dynamic(self) -> bool {
        matches!(
            self,
            ArpCapability::DynamicPersistent | ArpCapability::DynamicVolatile
        )
    }
}

bitflags! {
    /// Internal events the action layer has queued for the current
    /// `advance` pass.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct RaisedActions: u8 {
        const SEND_NEXT_BYTE = 1 << 0;
        const PEC_DECISION   = 1 << 1;
    }
}

/// One logical SMBus/I2C address the driver answers to or controls.
pub struct Instance<'h> {
    pub(crate) holder: StateHolder<STATE_HISTORY>,
    pub(crate) protocol: Option<Protocol>,
    pub(crate) command: u8,
    pub(crate) send: SendBuffer<MAX_BLOCK_SIZE>,
    pub(crate) recv: ReceiveBuffer<MAX_BLOCK_SIZE>,
    /// Total bytes the current transaction expects to receive. Fixed for
    /// the transaction except block protocols, where the size byte sets it.
    pub(crate) expected: usize,
    /// Partial count last announced to the FIFO threshold register.
    pub(crate) announced: usize,
    pub(crate) nack_sent: bool,
    pub(crate) pec_sent: bool,
    pub(crate) pec_required: bool,
    pub(crate) address_valid: bool,
    pub(crate) address_resolved: bool,
    pub(crate) done_retries: u8,
    pub(crate) raised: RaisedActions,
    /// Identifier of the in-flight controller transaction.
    pub(crate) xid: u32,
    /// Destination address when this instance acts as controller.
    pub(crate) peer_address: u8,
    pub(crate) capability: ArpCapability,
    pub(crate) udid: [u8; 16],
    pub(crate) address: u8,
    pub(crate) hooks: Binding<'h>,
    pub(crate) simple: bool,
}

impl<'h> Instance<'h> {
    pub(crate) fn new(
        address: u8,
        udid: [u8; 16],
        capability: ArpCapability,
        hooks: Binding<'h>,
        simple: bool,
    ) -> Self {
        Self {
            holder: StateHolder::new(),
            protocol: None,
            command: 0,
            send: SendBuffer::new(),
            recv: ReceiveBuffer::new(),
            expected: 0,
            announced: 0,
            nack_sent: false,
            pec_sent: false,
            pec_required: false,
            // Fixed addresses are valid from the start; dynamic ones become
            // valid once ARP assigns them.
            address_valid: !capability.is_dynamic(),
            address_resolved: false,
            done_retries: 0,
            raised: RaisedActions::empty(),
            xid: 0,
            peer_address: 0,
            capability,
            udid,
            address,
            hooks,
            simple,
        }
    }

    /// Clears every per-transaction field back to its default. ARP flags,
    /// identity and binding survive; they belong to the instance, not the
    /// transaction.
    pub(crate) fn reset_transaction(&mut self) {
        self.protocol = None;
        self.command = 0;
        self.send.reset();
        self.recv.reset();
        self.expected = 0;
        self.announced = 0;
        self.nack_sent = false;
        self.pec_sent = false;
        self.pec_required = false;
        self.done_retries = 0;
        self.raised = RaisedActions::empty();
    }

    /// Pops the highest-priority internal event raised during the last
    /// handler run.
    pub(crate) fn take_raised_event(&mut self) -> Option<Event> {
        if self.raised.contains(RaisedActions::SEND_NEXT_BYTE) {
            self.raised.remove(RaisedActions::SEND_NEXT_BYTE);
            Some(Event::SendNextByte)
        } else if self.raised.contains(RaisedActions::PEC_DECISION) {
            self.raised.remove(RaisedActions::PEC_DECISION);
            Some(Event::PecDecision)
        } else {
            None
        }
    }

    pub fn state(&self) -> State {
        self.holder.current()
    }

    pub fn previous_state(&self) -> State {
        self.holder.previous()
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn udid(&self) -> &[u8; 16] {
        &self.udid
    }

    pub fn capability(&self) -> ArpCapability {
        self.capability
    }

    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    pub fn address_valid(&self) -> bool {
        self.address_valid
    }

    pub fn address_resolved(&self) -> bool {
        self.address_resolved
    }

    pub fn is_simple(&self) -> bool {
        self.simple
    }

    pub(crate) fn is_arp_instance(&self) -> bool {
        matches!(self.hooks, Binding::Arp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy() -> Instance<'static> {
        Instance::new(0x22, [0; 16], ArpCapability::NotCapable, Binding::Arp, false)
    }

    #[test]
    fn reset_returns_every_transaction_field_to_default() {
        let mut inst = dummy();
        inst.protocol = Some(Protocol::BlockWrite);
        inst.command = 0x15;
        inst.send.load(&[1, 2, 3]).unwrap();
        inst.recv.push(9).unwrap();
        inst.expected = 3;
        inst.announced = 2;
        inst.nack_sent = true;
        inst.pec_sent = true;
        inst.pec_required = true;
        inst.done_retries = 2;
        inst.raised = RaisedActions::PEC_DECISION;

        inst.reset_transaction();

        assert_eq!(inst.protocol, None);
        assert_eq!(inst.command, 0);
        assert!(inst.send.is_empty());
        assert!(inst.recv.is_empty());
        assert_eq!(inst.expected, 0);
        assert_eq!(inst.announced, 0);
        assert!(!inst.nack_sent);
        assert!(!inst.pec_sent);
        assert!(!inst.pec_required);
        assert_eq!(inst.done_retries, 0);
        assert!(inst.raised.is_empty());
    }

    #[test]
    fn dynamic_devices_start_without_a_valid_address() {
        let fixed = Instance::new(
            0x30,
            [0; 16],
            ArpCapability::FixedDiscoverable,
            Binding::Arp,
            false,
        );
        let dynamic = Instance::new(
            0x31,
            [0; 16],
            ArpCapability::DynamicVolatile,
            Binding::Arp,
            false,
        );
        assert!(fixed.address_valid());
        assert!(!dynamic.address_valid());
    }

    #[test]
    fn raised_events_pop_in_priority_order() {
        let mut inst = dummy();
        inst.raised = RaisedActions::SEND_NEXT_BYTE | RaisedActions::PEC_DECISION;
        assert_eq!(inst.take_raised_event(), Some(Event::SendNextByte));
        assert_eq!(inst.take_raised_event(), Some(Event::PecDecision));
        assert_eq!(inst.take_raised_event(), None);
    }
}
