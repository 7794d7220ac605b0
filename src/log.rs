use core::fmt::{self, Write};

use crate::{Event, Protocol, State};

/// Log capacity the driver facade uses unless overridden.
pub const DEFAULT_LOG_CAPACITY: usize = 5000;

/// Severity threshold; entries above the profile's level are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LogLevel {
    Off = 0,
    Error,
    Warning,
    Info,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LogKind {
    /// arg0 = current state, arg1 = event.
    FsmTransition,
    /// arg0 = current state, arg1 = event.
    UnexpectedEvent,
    /// arg0 = event carrying the error, arg1 = hardware debug state.
    BusErrorReport,
    /// arg0 = event carrying the warning.
    BusWarningReport,
    /// arg0 = command byte, arg1 = protocol.
    ProtocolResolved,
    /// arg0 = command byte.
    ProtocolRejected,
    /// arg0 = protocol, arg1 = transaction id.
    TransactionStarted,
    /// arg0 = protocol, arg1 = transaction id (0 for target role).
    TransactionCompleted,
    /// arg0 = 7-bit address.
    InstanceCreated,
    /// arg0 = 7-bit address.
    InstanceDestroyed,
    /// arg0 = requested size or slot count.
    ResourceError,
}

impl LogKind {
    pub(crate) fn level(self) -> LogLevel {
        match self {
            LogKind::FsmTransition => LogLevel::Debug,
            LogKind::UnexpectedEvent
            | LogKind::BusErrorReport
            | LogKind::ResourceError => LogLevel::Error,
            LogKind::BusWarningReport => LogLevel::Warning,
            _ => LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LogEntry {
    pub ticks: u32,
    pub kind: LogKind,
    pub instance: u8,
    pub arg0: u32,
    pub arg1: u32,
    pub occupied: bool,
}

impl LogEntry {
    const EMPTY: LogEntry = LogEntry {
        ticks: 0,
        kind: LogKind::FsmTransition,
        instance: 0,
        arg0: 0,
        arg1: 0,
        occupied: false,
    };
}

/// Fixed-capacity diagnostic log. Once full, the newest entry overwrites the
/// final slot instead of wrapping, so the oldest context survives a flood.
pub struct EventLog<const CAP: usize> {
    entries: [LogEntry; CAP],
    len: usize,
}

impl<const CAP: usize> EventLog<CAP> {
    pub const fn new() -> Self {
        Self {
            entries: [LogEntry::EMPTY; CAP],
            len: 0,
        }
    }

    pub fn append(&mut self, ticks: u32, kind: LogKind, instance: u8, arg0: u32, arg1: u32) {
        let entry = LogEntry {
            ticks,
            kind,
            instance,
            arg0,
            arg1,
            occupied: true,
        };

        if self.len == CAP {
            self.entries[CAP - 1] = entry;
        } else {
            self.entries[self.len] = entry;
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries[..self.len]
    }

    pub fn reset(&mut self) {
        for e in &mut self.entries[..self.len] {
            *e = LogEntry::EMPTY;
        }
        self.len = 0;
    }

    /// Renders entries in append order as newline-delimited text (no NUL
    /// terminator). Returns bytes written; entries that do not fit are
    /// dropped whole.
    pub fn render(&self, out: &mut [u8]) -> usize {
        let mut w = SliceWriter { buf: out, pos: 0 };

        for entry in self.entries() {
            let mark = w.pos;
            if render_entry(&mut w, entry).is_err() {
                w.pos = mark;
                break;
            }
        }

        w.pos
    }
}

struct SliceWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl fmt::Write for SliceWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        if self.pos + bytes.len() > self.buf.len() {
            return Err(fmt::Error);
        }
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }
}

fn render_entry(w: &mut SliceWriter<'_>, e: &LogEntry) -> fmt::Result {
    write!(w, "[{}] i{} ", e.ticks, e.instance)?;

    match e.kind {
        LogKind::FsmTransition => {
            write!(w, "fsm ")?;
            write_state(w, e.arg0)?;
            write!(w, " <- ")?;
            write_event(w, e.arg1)?;
        }
        LogKind::UnexpectedEvent => {
            write!(w, "unexpected ")?;
            write_event(w, e.arg1)?;
            write!(w, " in ")?;
            write_state(w, e.arg0)?;
        }
        LogKind::BusErrorReport => {
            write!(w, "bus error ")?;
            write_event(w, e.arg0)?;
            write!(w, " hw={:#x}", e.arg1)?;
        }
        LogKind::BusWarningReport => {
            write!(w, "bus warning ")?;
            write_event(w, e.arg0)?;
        }
        LogKind::ProtocolResolved => {
            write!(w, "command {:#04x} -> ", e.arg0)?;
            write_protocol(w, e.arg1)?;
        }
        LogKind::ProtocolRejected => {
            write!(w, "command {:#04x} rejected", e.arg0)?;
        }
        LogKind::TransactionStarted => {
            write!(w, "start ")?;
            write_protocol(w, e.arg0)?;
            write!(w, " xid={}", e.arg1)?;
        }
        LogKind::TransactionCompleted => {
            write!(w, "done ")?;
            write_protocol(w, e.arg0)?;
            write!(w, " xid={}", e.arg1)?;
        }
        LogKind::InstanceCreated => {
            write!(w, "instance created addr={:#04x}", e.arg0)?;
        }
        LogKind::InstanceDestroyed => {
            write!(w, "instance destroyed addr={:#04x}", e.arg0)?;
        }
        LogKind::ResourceError => {
            write!(w, "resource error arg={}", e.arg0)?;
        }
    }

    w.write_str("\n")
}

fn write_state(w: &mut SliceWriter<'_>, raw: u32) -> fmt::Result {
    match u8::try_from(raw).ok().and_then(|v| State::try_from(v).ok()) {
        Some(s) => write!(w, "{:?}", s),
        None => write!(w, "state#{}", raw),
    }
}

fn write_event(w: &mut SliceWriter<'_>, raw: u32) -> fmt::Result {
    match u8::try_from(raw).ok().and_then(|v| Event::try_from(v).ok()) {
        Some(e) => write!(w, "{:?}", e),
        None => write!(w, "event#{}", raw),
    }
}

fn write_protocol(w: &mut SliceWriter<'_>, raw: u32) -> fmt::Result {
    match u8::try_from(raw).ok().and_then(|v| Protocol::try_from(v).ok()) {
        Some(p) => write!(w, "{:?}", p),
        None => write!(w, "protocol#{}", raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str;

    #[test]
    fn full_log_overwrites_last_slot() {
        let mut log: EventLog<2> = EventLog::new();
        log.append(1, LogKind::InstanceCreated, 0, 0x20, 0);
        log.append(2, LogKind::InstanceCreated, 1, 0x21, 0);
        log.append(3, LogKind::InstanceCreated, 2, 0x22, 0);

        assert_eq!(log.len(), 2);
        // First entry survives, newest clobbers the last slot.
        assert_eq!(log.entries()[0].ticks, 1);
        assert_eq!(log.entries()[1].ticks, 3);
    }

    #[test]
    fn renders_symbolic_names_in_order() {
        let mut log: EventLog<8> = EventLog::new();
        log.append(
            7,
            LogKind::FsmTransition,
            3,
            State::AwaitingData as u32,
            Event::TargetRxFill as u32,
        );
        log.append(8, LogKind::BusErrorReport, 3, Event::PecMismatch as u32, 0xab);

        let mut buf = [0u8; 256];
        let n = log.render(&mut buf);
        let text = str::from_utf8(&buf[..n]).unwrap();

        let lines: std::vec::Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "[7] i3 fsm AwaitingData <- TargetRxFill");
        assert_eq!(lines[1], "[8] i3 bus error PecMismatch hw=0xab");
        assert!(!text.ends_with('\0'));
    }

    #[test]
    fn render_drops_entries_that_do_not_fit() {
        let mut log: EventLog<4> = EventLog::new();
        log.append(1, LogKind::ProtocolRejected, 0, 0x40, 0);
        log.append(2, LogKind::ProtocolRejected, 0, 0x41, 0);

        let mut small = [0u8; 32];
        let n = log.render(&mut small);
        let text = str::from_utf8(&small[..n]).unwrap();
        assert_eq!(text, "[1] i0 command 0x40 rejected\n");
    }

    #[test]
    fn reset_clears_entries() {
        let mut log: EventLog<4> = EventLog::new();
        log.append(1, LogKind::ResourceError, 0, 9, 0);
        log.reset();
        assert!(log.is_empty());
        let mut buf = [0u8; 64];
        assert_eq!(log.render(&mut buf), 0);
    }
}
