use bitflags::bitflags;

/// Bus frequency classes the adapter can be initialized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusSpeed {
    Standard100k,
    Fast400k,
    FastPlus1M,
}

/// One hardware-level bus command enqueued to the descriptor FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Descriptor {
    Ack,
    Nack,
    /// Ask the engine to compute (TX) or check (RX) the trailing PEC byte.
    RequestPec,
    Stop,
    Start { address: u8, read: bool },
    RepeatedStart { address: u8, read: bool },
}

bitflags! {
    /// Interrupt groups the driver can gate at the hardware.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct InterruptMask: u32 {
        const TARGET_RX    = 1 << 0;
        const TARGET_TX    = 1 << 1;
        const TARGET_DONE  = 1 << 2;
        const CTRL_RX      = 1 << 3;
        const CTRL_TX      = 1 << 4;
        const CTRL_DONE    = 1 << 5;
        const BUS_ERROR    = 1 << 6;
        const TIMEOUTS     = 1 << 7;
    }
}

/// Register-level access the protocol engine is built on top of.
///
/// Implementations own the memory-mapped adapter; the engine never touches
/// registers directly. All methods are infallible by contract: hardware
/// faults surface later as error interrupts, not as return codes.
pub trait HardwarePort {
    /// Programs the bus timing for one of the supported frequency classes.
    fn set_bus_speed(&mut self, speed: BusSpeed);

    /// Drains the target-role RX FIFO into `buf`, returning bytes read.
    fn read_target_fifo(&mut self, buf: &mut [u8]) -> usize;

    fn write_target_fifo(&mut self, byte: u8);

    /// RX-fill interrupt fires once this many bytes are pending.
    fn set_target_rx_threshold(&mut self, n: u8);

    fn write_target_descriptor(&mut self, descriptor: Descriptor);

    fn flush_target_fifos(&mut self);

    fn read_controller_fifo(&mut self, buf: &mut [u8]) -> usize;

    fn write_controller_fifo(&mut self, byte: u8);

    fn set_controller_rx_threshold(&mut self, n: u8);

    fn write_controller_descriptor(&mut self, descriptor: Descriptor);

    fn flush_controller_fifos(&mut self);

    /// Binds (or unbinds) a 7-bit address to a hardware match slot.
    fn set_target_address(&mut self, slot: usize, address: u8, enable: bool);

    fn enable_controller(&mut self, enable: bool);

    fn enable_target(&mut self, enable: bool);

    fn enable_interrupts(&mut self, mask: InterruptMask);

    fn disable_interrupts(&mut self, mask: InterruptMask);

    fn clear_interrupts(&mut self, mask: InterruptMask);

    /// Raw debug state register, recorded in the log on recovery.
    fn debug_state(&self) -> u32;
}
