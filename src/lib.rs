#![no_std]

#[cfg(test)]
extern crate std;

mod actions;
mod arp;
mod buffer;
mod driver;
mod fsm;
mod hooks;
mod instance;
mod log;
mod port;
mod profile;
mod protocol;
mod state_holder;

pub use driver::{
    Driver, DriverConfig, InstanceConfig, InstanceHandle, TransactionRequest, Version, VERSION,
};
pub use hooks::{Binding, I2cHooks, SmbusHooks, TransferStatus};
pub use instance::{ArpCapability, Instance};
pub use log::{EventLog, LogKind, LogLevel, DEFAULT_LOG_CAPACITY};
pub use port::{BusSpeed, Descriptor, HardwarePort, InterruptMask};
pub use profile::Profile;
pub use protocol::Protocol;

/// Largest SMBus 3.x block payload the engine will buffer.
pub const MAX_BLOCK_SIZE: usize = 256;

/// Seven application instances plus the reserved ARP instance.
pub const MAX_INSTANCES: usize = 8;

/// Slot reserved for the ARP target instance.
pub const ARP_SLOT: usize = MAX_INSTANCES - 1;

/// 7-bit address the ARP target answers to (0xC2 on the wire).
pub const ARP_ADDRESS: u8 = 0x61;

#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum State {
    Initial = 0,
    AwaitingCommandByte,
    AwaitingBlockSize,
    AwaitingData,
    AwaitingRead,
    ReadyToSendByte,
    CheckIfPecRequired,
    AwaitingDone,
    ControllerSendCommand,
    ControllerWriteByte,
    ControllerSendReadStart,
    ControllerReadBlockSize,
    ControllerReadByte,
    ControllerReadPec,
    ControllerReadDone,
}

/// One discrete event, as classified by the external interrupt dispatcher.
///
/// Raw interrupt codes map onto the discriminants, so a dispatcher can use
/// `Event::try_from(code)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Event {
    // Target role.
    TargetWrite = 0,
    TargetRead,
    TargetRxFill,
    TargetTxEmpty,
    TargetDone,

    // Controller role.
    ControllerTxEmpty,
    ControllerRxFill,
    ControllerDone,

    // Raised internally by the action layer, never by hardware.
    SendNextByte,
    PecDecision,

    // Warnings: reported, transaction continues.
    ClockLowExtendWarning,
    DataLowExtendWarning,

    // Bus errors: reported, transaction aborted.
    LostArbitration,
    PecMismatch,
    TargetRxOverflow,
    TargetRxUnderflow,
    TargetRxError,
    TargetDescOverflow,
    TargetDescUnderflow,
    TargetDescError,
    ControllerRxOverflow,
    ControllerRxUnderflow,
    ControllerRxError,
    ControllerDescOverflow,
    ControllerDescUnderflow,
    ControllerDescError,
    BusFault,
    ClockLowTimeout,
    DataLowTimeout,
    ControllerTimeout,
    TargetTimeout,
    BusIdleTimeout,
}

impl Event {
    pub fn bus_error(self) -> Option<BusError> {
        Some(match self {
            Event::LostArbitration => BusError::LostArbitration,
            Event::PecMismatch => BusError::PecMismatch,
            Event::TargetRxOverflow => BusError::TargetRxOverflow,
            Event::TargetRxUnderflow => BusError::TargetRxUnderflow,
            Event::TargetRxError => BusError::TargetRxError,
            Event::TargetDescOverflow => BusError::TargetDescOverflow,
            Event::TargetDescUnderflow => BusError::TargetDescUnderflow,
            Event::TargetDescError => BusError::TargetDescError,
            Event::ControllerRxOverflow => BusError::ControllerRxOverflow,
            Event::ControllerRxUnderflow => BusError::ControllerRxUnderflow,
            Event::ControllerRxError => BusError::ControllerRxError,
            Event::ControllerDescOverflow => BusError::ControllerDescOverflow,
            Event::ControllerDescUnderflow => BusError::ControllerDescUnderflow,
            Event::ControllerDescError => BusError::ControllerDescError,
            Event::BusFault => BusError::BusFault,
            Event::ClockLowTimeout => BusError::ClockLowTimeout,
            Event::DataLowTimeout => BusError::DataLowTimeout,
            Event::ControllerTimeout => BusError::ControllerTimeout,
            Event::TargetTimeout => BusError::TargetTimeout,
            Event::BusIdleTimeout => BusError::BusIdleTimeout,
            _ => return None,
        })
    }

    pub fn bus_warning(self) -> Option<BusWarning> {
        match self {
            Event::ClockLowExtendWarning => Some(BusWarning::ClockLowWhileExtending),
            Event::DataLowExtendWarning => Some(BusWarning::DataLowWhileExtending),
            _ => None,
        }
    }
}

/// Bus and hardware error conditions reported through the error hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    LostArbitration,
    PecMismatch,
    TargetRxOverflow,
    TargetRxUnderflow,
    TargetRxError,
    TargetDescOverflow,
    TargetDescUnderflow,
    TargetDescError,
    ControllerRxOverflow,
    ControllerRxUnderflow,
    ControllerRxError,
    ControllerDescOverflow,
    ControllerDescUnderflow,
    ControllerDescError,
    BusFault,
    ClockLowTimeout,
    DataLowTimeout,
    ControllerTimeout,
    TargetTimeout,
    BusIdleTimeout,
}

/// Conditions reported through the warning hook without aborting the
/// transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusWarning {
    ClockLowWhileExtending,
    DataLowWhileExtending,
}

/// Failures surfaced by the driver-level API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverError {
    /// All seven application instance slots are occupied.
    NoFreeSlot,
    /// The handle does not name a live instance.
    NoSuchInstance,
    /// Another instance already owns an outbound transaction.
    ControllerBusy,
    /// Payload exceeds `MAX_BLOCK_SIZE` or the protocol-mandated size.
    PayloadTooLarge,
    /// Address is not a usable 7-bit target address.
    BadAddress,
    /// The instance's binding cannot service the requested protocol.
    NotSupported,
}
