use crate::{BusError, BusWarning, Protocol};

/// Outcome announced to the application when a transaction leaves the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferStatus {
    Success,
    Failed(BusError),
}

/// Application callbacks for an SMBus-mode instance.
///
/// The first four capabilities are required for non-simple instances; the
/// rest default to no-ops, which preserves the "call only if bound"
/// semantics of an optional callback.
pub trait SmbusHooks {
    /// Classifies a received command byte. `None` means the command is not
    /// recognized and will be NACKed.
    fn protocol_for_command(&self, command: u8) -> Option<Protocol>;

    /// Fills `buf` with response data for a read-direction protocol and
    /// returns the byte count. Fixed-size protocols have the returned count
    /// overridden with the mandated size.
    fn get_data(&self, command: u8, protocol: Protocol, buf: &mut [u8]) -> usize;

    /// Delivers received write-direction data. `xid` is present only when
    /// this instance is the active controller.
    fn write_data(&self, command: u8, protocol: Protocol, data: &[u8], xid: Option<u32>);

    fn announce_result(&self, xid: Option<u32>, status: TransferStatus);

    /// Whether the response owes a trailing PEC byte. ARP traffic ignores
    /// this and always carries PEC.
    fn pec_required(&self, _command: u8, _protocol: Protocol) -> bool {
        false
    }

    fn address_changed(&self, _address: u8) {}

    fn bus_error(&self, _error: BusError) {}

    fn bus_warning(&self, _warning: BusWarning) {}
}

/// Application callbacks for a reduced-I2C instance: raw get/write/announce
/// with no command or protocol framing.
pub trait I2cHooks {
    fn get(&self, buf: &mut [u8]) -> usize;

    fn write(&self, data: &[u8], xid: Option<u32>);

    fn announce_result(&self, xid: Option<u32>, status: TransferStatus);

    fn bus_error(&self, _error: BusError) {}

    fn bus_warning(&self, _warning: BusWarning) {}
}

/// Per-instance callback binding, fixed at creation.
#[derive(Clone, Copy)]
pub enum Binding<'h> {
    Smbus(&'h dyn SmbusHooks),
    I2c(&'h dyn I2cHooks),
    /// The reserved ARP instance is serviced entirely inside the engine.
    Arp,
}

impl<'h> Binding<'h> {
    pub(crate) fn bus_error(&self, error: BusError) {
        match self {
            Binding::Smbus(h) => h.bus_error(error),
            Binding::I2c(h) => h.bus_error(error),
            Binding::Arp => {}
        }
    }

    pub(crate) fn bus_warning(&self, warning: BusWarning) {
        match self {
            Binding::Smbus(h) => h.bus_warning(warning),
            Binding::I2c(h) => h.bus_warning(warning),
            Binding::Arp => {}
        }
    }

    pub(crate) fn announce_result(&self, xid: Option<u32>, status: TransferStatus) {
        match self {
            Binding::Smbus(h) => h.announce_result(xid, status),
            Binding::I2c(h) => h.announce_result(xid, status),
            Binding::Arp => {}
        }
    }
}
