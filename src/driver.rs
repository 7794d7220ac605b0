//! Public driver surface: lifecycle, instance management, transaction
//! initiation and the event entry point the interrupt dispatcher calls.

use crate::fsm;
use crate::hooks::Binding;
use crate::instance::ArpCapability;
use crate::log::LogKind;
use crate::port::{BusSpeed, HardwarePort, InterruptMask};
use crate::profile::Profile;
use crate::protocol::WriteLen;
use crate::{
    DriverError, Event, LogLevel, Protocol, ARP_ADDRESS, ARP_SLOT, DEFAULT_LOG_CAPACITY,
    MAX_BLOCK_SIZE,
};

/// Driver release, queryable at run time by management software.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

pub const VERSION: Version = Version {
    major: 1,
    minor: 0,
    patch: 0,
};

/// Opaque reference to a live application instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InstanceHandle(usize);

impl InstanceHandle {
    /// Arena slot, matching the hardware address-match slot.
    pub fn slot(self) -> usize {
        self.0
    }
}

/// Adapter-wide settings fixed at initialization.
#[derive(Clone, Copy)]
pub struct DriverConfig {
    pub speed: BusSpeed,
    pub log_level: LogLevel,
    /// Timestamp source for log entries; `None` logs zero ticks.
    pub ticks: Option<fn() -> u32>,
}

/// Everything that defines one application instance at creation time.
#[derive(Clone, Copy)]
pub struct InstanceConfig<'h> {
    /// 7-bit target address. For dynamic ARP capabilities this is the
    /// preferred address and stays off the bus until ARP validates it.
    pub address: u8,
    pub udid: [u8; 16],
    pub capability: ArpCapability,
    pub hooks: Binding<'h>,
    /// Simple devices answer Send-Byte/Receive-Byte only, with no command
    /// resolution phase.
    pub simple: bool,
}

/// One controller-role transaction request.
#[derive(Clone, Copy)]
pub struct TransactionRequest<'d> {
    /// 7-bit address of the peer target.
    pub peer: u8,
    pub command: u8,
    pub protocol: Protocol,
    /// Write-direction payload. Must match the protocol's mandated length.
    pub data: &'d [u8],
    pub pec: bool,
    /// Bytes to read for `I2cRead`; ignored by every other protocol.
    pub read_len: usize,
}

/// The driver proper: one per hardware adapter.
pub struct Driver<'h, P: HardwarePort, const LOG_CAP: usize = DEFAULT_LOG_CAPACITY> {
    profile: Profile<'h, LOG_CAP>,
    port: P,
}

impl<'h, P: HardwarePort, const LOG_CAP: usize> Driver<'h, P, LOG_CAP> {
    /// Brings the adapter up: bus timing, both roles enabled, interrupts
    /// unmasked. No addresses answer until an instance is created.
    pub fn new(mut port: P, config: DriverConfig) -> Self {
        port.set_bus_speed(config.speed);
        port.flush_target_fifos();
        port.flush_controller_fifos();
        port.enable_target(true);
        port.enable_controller(true);
        port.clear_interrupts(InterruptMask::all());
        port.enable_interrupts(InterruptMask::all());

        Self {
            profile: Profile::new(config.log_level, config.ticks),
            port,
        }
    }

    /// Quiesces the adapter and returns the port. Instances are dropped;
    /// in-flight transactions are abandoned without notification.
    pub fn deinit(mut self) -> P {
        self.port.disable_interrupts(InterruptMask::all());
        self.port.enable_target(false);
        self.port.enable_controller(false);
        self.port.flush_target_fifos();
        self.port.flush_controller_fifos();
        self.port
    }

    pub fn version(&self) -> Version {
        VERSION
    }

    /// Creates an application instance in the first free slot. Creating the
    /// first one also brings the reserved ARP target onto the bus.
    pub fn create_instance(
        &mut self,
        config: InstanceConfig<'h>,
    ) -> Result<InstanceHandle, DriverError> {
        if config.address > 0x7f {
            return Err(DriverError::BadAddress);
        }

        let had_arp = self.profile.instance(ARP_SLOT).is_some();
        let slot = self.profile.allocate(
            config.address,
            config.udid,
            config.capability,
            config.hooks,
            config.simple,
        )?;

        if !had_arp && self.profile.instance(ARP_SLOT).is_some() {
            self.port.set_target_address(ARP_SLOT, ARP_ADDRESS, true);
        }

        // Dynamic instances join the bus only once ARP assigns an address.
        let live = self
            .profile
            .instance(slot)
            .is_some_and(|i| i.address_valid);
        self.port.set_target_address(slot, config.address, live);

        self.profile
            .log_entry(LogKind::InstanceCreated, slot, config.address as u32, 0);
        Ok(InstanceHandle(slot))
    }

    /// Destroys an instance, detaching its address. The ARP target leaves
    /// the bus with the last application instance.
    pub fn destroy_instance(&mut self, handle: InstanceHandle) -> Result<(), DriverError> {
        let slot = handle.0;
        let address = self
            .profile
            .instance(slot)
            .map(|i| i.address)
            .ok_or(DriverError::NoSuchInstance)?;

        if self.profile.controller_in_play() == Some(slot) {
            self.port.flush_controller_fifos();
        }
        if self.profile.active_target() == Some(slot) {
            self.port.flush_target_fifos();
        }

        self.port.set_target_address(slot, address, false);
        self.profile.remove(slot);

        if self.profile.instance(ARP_SLOT).is_none() {
            self.port.set_target_address(ARP_SLOT, ARP_ADDRESS, false);
        }

        self.profile
            .log_entry(LogKind::InstanceDestroyed, slot, address as u32, 0);
        Ok(())
    }

    /// Starts a controller-role transaction and returns its identifier,
    /// which the completion callbacks echo back.
    ///
    /// Only one controller transaction may be in flight per adapter.
    pub fn start_transaction(
        &mut self,
        handle: InstanceHandle,
        request: TransactionRequest<'_>,
    ) -> Result<u32, DriverError> {
        let slot = handle.0;
        if self.profile.instance(slot).is_none() {
            return Err(DriverError::NoSuchInstance);
        }
        if self.profile.controller_in_play().is_some() {
            return Err(DriverError::ControllerBusy);
        }
        if request.peer > 0x7f {
            return Err(DriverError::BadAddress);
        }

        let protocol = request.protocol;
        let binding = self.profile.instance(slot).map(|i| i.hooks);
        let supported = match binding {
            Some(Binding::I2c(_)) => protocol.is_i2c(),
            Some(Binding::Smbus(_)) => !protocol.is_i2c() && !protocol.is_arp(),
            _ => false,
        };
        if !supported {
            return Err(DriverError::NotSupported);
        }

        let read_len = match protocol {
            Protocol::I2cRead => {
                if request.read_len == 0 || request.read_len > MAX_BLOCK_SIZE {
                    return Err(DriverError::PayloadTooLarge);
                }
                request.read_len
            }
            Protocol::ReceiveByte => 1,
            _ => 0,
        };

        let data_ok = match protocol.target_write_len() {
            Some(WriteLen::Fixed(_)) if protocol == Protocol::I2cWrite => {
                (1..=MAX_BLOCK_SIZE).contains(&request.data.len())
            }
            Some(WriteLen::Fixed(n)) => request.data.len() == n,
            Some(WriteLen::Block) => (1..=u8::MAX as usize).contains(&request.data.len()),
            None => request.data.is_empty(),
        };
        if !data_ok {
            return Err(DriverError::PayloadTooLarge);
        }

        let xid = self.profile.assign_xid();
        let pec = request.pec && !protocol.is_i2c();
        {
            // Existence checked above.
            let inst = self.profile.instance_mut(slot).ok_or(DriverError::NoSuchInstance)?;
            inst.reset_transaction();
            inst.protocol = Some(protocol);
            inst.command = request.command;
            inst.peer_address = request.peer;
            inst.pec_required = pec;
            inst.expected = read_len;
            inst.xid = xid;
            inst.send
                .load(request.data)
                .map_err(|_| DriverError::PayloadTooLarge)?;
        }

        self.profile.controller_in_play = Some(slot);
        self.profile.note_initiated(protocol);
        self.profile
            .log_entry(LogKind::TransactionStarted, slot, protocol as u32, xid);

        fsm::advance(&mut self.profile, &mut self.port, slot, Event::SendNextByte);
        Ok(xid)
    }

    /// Feeds one classified event to an instance's state machine. The
    /// interrupt dispatcher calls this after demultiplexing status flags.
    pub fn dispatch(&mut self, handle: InstanceHandle, event: Event) {
        fsm::advance(&mut self.profile, &mut self.port, handle.0, event);
    }

    /// Raw-slot variant of [`dispatch`](Self::dispatch) for demux layers
    /// that work in hardware match-slot indices, including the ARP slot.
    pub fn dispatch_slot(&mut self, slot: usize, event: Event) {
        fsm::advance(&mut self.profile, &mut self.port, slot, event);
    }

    pub fn enable_interrupts(&mut self, mask: InterruptMask) {
        self.port.enable_interrupts(mask);
    }

    pub fn disable_interrupts(&mut self, mask: InterruptMask) {
        self.port.disable_interrupts(mask);
    }

    pub fn clear_interrupts(&mut self, mask: InterruptMask) {
        self.port.clear_interrupts(mask);
    }

    /// Renders the in-memory event log as text into `out`, returning the
    /// bytes written. Entries that do not fit are dropped whole.
    pub fn render_log(&self, out: &mut [u8]) -> usize {
        self.profile.render_log(out)
    }

    pub fn reset_log(&mut self) {
        self.profile.reset_log();
    }

    pub fn profile(&self) -> &Profile<'h, LOG_CAP> {
        &self.profile
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }
}
