/// Payload shape following the command byte of a write-direction phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteLen {
    /// Exactly this many data bytes.
    Fixed(usize),
    /// A count byte announces the length.
    Block,
}

/// SMBus 3.x transfer protocols plus the reduced-I2C pair and the fixed ARP
/// command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Protocol {
    QuickCommand = 0,
    SendByte,
    ReceiveByte,
    WriteByte,
    WriteWord,
    Write32,
    Write64,
    ReadByte,
    ReadWord,
    Read32,
    Read64,
    ProcessCall,
    BlockWrite,
    BlockRead,
    BlockProcessCall,
    I2cWrite,
    I2cRead,
    PrepareToArp,
    ResetDevice,
    ResetDeviceDirected,
    GetUdid,
    GetUdidDirected,
    AssignAddress,
}

impl Protocol {
    pub(crate) const COUNT: usize = Protocol::AssignAddress as usize + 1;

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Write-phase payload after the command byte, from the target's point
    /// of view. `None` means the protocol has no write phase beyond the
    /// command byte itself.
    pub(crate) fn target_write_len(self) -> Option<WriteLen> {
        match self {
            Protocol::WriteByte => Some(WriteLen::Fixed(1)),
            Protocol::WriteWord | Protocol::ProcessCall => Some(WriteLen::Fixed(2)),
            Protocol::Write32 => Some(WriteLen::Fixed(4)),
            Protocol::Write64 => Some(WriteLen::Fixed(8)),
            Protocol::BlockWrite | Protocol::BlockProcessCall | Protocol::AssignAddress => {
                Some(WriteLen::Block)
            }
            Protocol::I2cWrite => Some(WriteLen::Fixed(crate::MAX_BLOCK_SIZE)),
            _ => None,
        }
    }

    /// Whether a read phase follows (immediately, or after the write phase
    /// for the process-call family).
    pub(crate) fn reads_back(self) -> bool {
        matches!(
            self,
            Protocol::ReceiveByte
                | Protocol::ReadByte
                | Protocol::ReadWord
                | Protocol::Read32
                | Protocol::Read64
                | Protocol::ProcessCall
                | Protocol::BlockRead
                | Protocol::BlockProcessCall
                | Protocol::I2cRead
                | Protocol::GetUdid
                | Protocol::GetUdidDirected
        )
    }

    /// Read-phase length when the protocol mandates one; `None` for block
    /// reads, which announce it in a count byte.
    pub(crate) fn fixed_read_len(self) -> Option<usize> {
        match self {
            Protocol::ReceiveByte | Protocol::ReadByte => Some(1),
            Protocol::ReadWord | Protocol::ProcessCall => Some(2),
            Protocol::Read32 => Some(4),
            Protocol::Read64 => Some(8),
            _ => None,
        }
    }

    /// Mandated response size that overrides whatever count the application
    /// hook returns (1/2/4/8-byte protocols).
    pub(crate) fn fixed_response_len(self) -> Option<usize> {
        self.fixed_read_len()
    }

    /// Block-read responses carry a leading count byte.
    pub(crate) fn response_has_count(self) -> bool {
        matches!(
            self,
            Protocol::BlockRead
                | Protocol::BlockProcessCall
                | Protocol::GetUdid
                | Protocol::GetUdidDirected
        )
    }

    pub(crate) fn is_arp(self) -> bool {
        matches!(
            self,
            Protocol::PrepareToArp
                | Protocol::ResetDevice
                | Protocol::ResetDeviceDirected
                | Protocol::GetUdid
                | Protocol::GetUdidDirected
                | Protocol::AssignAddress
        )
    }

    pub(crate) fn is_i2c(self) -> bool {
        matches!(self, Protocol::I2cWrite | Protocol::I2cRead)
    }

    /// Write-direction protocols whose received payload is delivered to the
    /// application on completion.
    pub(crate) fn delivers_on_done(self) -> bool {
        matches!(
            self,
            Protocol::QuickCommand
                | Protocol::SendByte
                | Protocol::WriteByte
                | Protocol::WriteWord
                | Protocol::Write32
                | Protocol::Write64
                | Protocol::BlockWrite
                | Protocol::I2cWrite
        )
    }

    /// Protocols a simple (Send-Byte/Receive-Byte only) instance may carry.
    pub(crate) fn allowed_for_simple(self) -> bool {
        matches!(self, Protocol::SendByte | Protocol::ReceiveByte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_write_sizes_match_mandate() {
        assert_eq!(Protocol::WriteByte.target_write_len(), Some(WriteLen::Fixed(1)));
        assert_eq!(Protocol::WriteWord.target_write_len(), Some(WriteLen::Fixed(2)));
        assert_eq!(Protocol::Write32.target_write_len(), Some(WriteLen::Fixed(4)));
        assert_eq!(Protocol::Write64.target_write_len(), Some(WriteLen::Fixed(8)));
        assert_eq!(Protocol::BlockWrite.target_write_len(), Some(WriteLen::Block));
        assert_eq!(Protocol::ReadWord.target_write_len(), None);
    }

    #[test]
    fn process_call_writes_then_reads() {
        assert_eq!(Protocol::ProcessCall.target_write_len(), Some(WriteLen::Fixed(2)));
        assert!(Protocol::ProcessCall.reads_back());
        assert_eq!(Protocol::ProcessCall.fixed_read_len(), Some(2));
    }

    #[test]
    fn arp_classification() {
        assert!(Protocol::AssignAddress.is_arp());
        assert!(Protocol::GetUdid.response_has_count());
        assert!(!Protocol::BlockWrite.is_arp());
    }
}
