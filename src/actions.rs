//! Action layer: stateless helpers the state machine calls to move data
//! between hardware, instance and application. Every helper is a no-op when
//! the instance or the relevant hook is absent.

use crate::hooks::{Binding, TransferStatus};
use crate::instance::RaisedActions;
use crate::log::LogKind;
use crate::port::HardwarePort;
use crate::profile::Profile;
use crate::{arp, BusError, BusWarning, Event, Protocol, MAX_BLOCK_SIZE};

pub(crate) fn raise_send_next<const C: usize>(profile: &mut Profile<'_, C>, idx: usize) {
    if let Some(inst) = profile.instance_mut(idx) {
        inst.raised.insert(RaisedActions::SEND_NEXT_BYTE);
    }
}

pub(crate) fn raise_pec_decision<const C: usize>(profile: &mut Profile<'_, C>, idx: usize) {
    if let Some(inst) = profile.instance_mut(idx) {
        inst.raised.insert(RaisedActions::PEC_DECISION);
    }
}

/// Resets every per-transaction instance field and flushes the FIFOs of the
/// role the instance currently plays.
pub(crate) fn reset_all_data<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
) {
    if profile.instance(idx).is_none() {
        return;
    }

    if profile.controller_in_play() == Some(idx) {
        port.flush_controller_fifos();
    } else {
        port.flush_target_fifos();
    }

    if let Some(inst) = profile.instance_mut(idx) {
        inst.reset_transaction();
    }
}

/// Resolves a command byte to a protocol: through the application hook for
/// ordinary instances, through the fixed command table for the ARP one.
/// `None` is the undetermined result and leads to a NACK.
pub(crate) fn resolve_protocol<const C: usize>(
    profile: &Profile<'_, C>,
    idx: usize,
    command: u8,
) -> Option<Protocol> {
    let inst = profile.instance(idx)?;
    match inst.hooks {
        Binding::Smbus(h) => {
            let p = h.protocol_for_command(command)?;
            // The ARP and raw-I2C protocol groups are not reachable through
            // command resolution.
            if p.is_arp() || p.is_i2c() || p == Protocol::QuickCommand {
                None
            } else if inst.simple && !p.allowed_for_simple() {
                None
            } else {
                Some(p)
            }
        }
        Binding::I2c(_) => None,
        Binding::Arp => arp::protocol_for_command(command),
    }
}

/// Fetches response data from the application into the send buffer,
/// prefixing block responses with their count byte. Fixed-length protocols
/// override the hook-returned size with the mandated one. Returns the
/// staged payload length (count byte excluded).
pub(crate) fn fetch_app_data<const C: usize>(
    profile: &mut Profile<'_, C>,
    idx: usize,
) -> Result<usize, ()> {
    let inst = profile.instance(idx).ok_or(())?;
    let protocol = inst.protocol.ok_or(())?;
    let command = inst.command;
    let hooks = inst.hooks;

    let mut tmp = [0u8; MAX_BLOCK_SIZE];
    let mut n = match hooks {
        Binding::Smbus(h) => h.get_data(command, protocol, &mut tmp),
        Binding::I2c(h) => h.get(&mut tmp),
        // ARP responses are built from UDIDs, never fetched.
        Binding::Arp => return Err(()),
    };

    n = n.min(MAX_BLOCK_SIZE);
    if let Some(fixed) = protocol.fixed_response_len() {
        n = fixed;
    }
    if n == 0 || (protocol.response_has_count() && n > u8::MAX as usize) {
        return Err(());
    }

    let inst = profile.instance_mut(idx).ok_or(())?;
    inst.send.reset();
    if protocol.response_has_count() {
        inst.send.push(n as u8).map_err(drop)?;
    }
    inst.send.extend(&tmp[..n]).map_err(drop)?;
    Ok(n)
}

/// Delivers received write-direction data to the application. The
/// transaction identifier is suppressed unless the instance is the active
/// controller.
pub(crate) fn deliver_received<const C: usize>(profile: &Profile<'_, C>, idx: usize) {
    let Some(inst) = profile.instance(idx) else {
        return;
    };
    let Some(protocol) = inst.protocol else {
        return;
    };
    let xid = (profile.controller_in_play() == Some(idx)).then_some(inst.xid);

    match inst.hooks {
        Binding::Smbus(h) => {
            // A Send-Byte resolved through the command table carries its
            // datum in the command byte itself.
            if protocol == Protocol::SendByte && inst.recv.is_empty() && !inst.simple {
                h.write_data(inst.command, protocol, core::slice::from_ref(&inst.command), xid);
            } else {
                h.write_data(inst.command, protocol, inst.recv.as_slice(), xid);
            }
        }
        Binding::I2c(h) => h.write(inst.recv.as_slice(), xid),
        Binding::Arp => {}
    }
}

/// Announces a transaction result to the application.
pub(crate) fn announce<const C: usize>(
    profile: &Profile<'_, C>,
    idx: usize,
    status: TransferStatus,
) {
    let Some(inst) = profile.instance(idx) else {
        return;
    };
    let xid = (profile.controller_in_play() == Some(idx)).then_some(inst.xid);
    inst.hooks.announce_result(xid, status);
}

pub(crate) fn notify_address_change<const C: usize>(
    profile: &Profile<'_, C>,
    idx: usize,
    address: u8,
) {
    if let Some(inst) = profile.instance(idx) {
        if let Binding::Smbus(h) = inst.hooks {
            h.address_changed(address);
        }
    }
}

pub(crate) fn report_bus_error<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &P,
    idx: usize,
    event: Event,
    error: BusError,
) {
    profile.log_entry(LogKind::BusErrorReport, idx, event as u32, port.debug_state());
    if let Some(inst) = profile.instance(idx) {
        inst.hooks.bus_error(error);
    }
}

pub(crate) fn report_bus_warning<const C: usize>(
    profile: &mut Profile<'_, C>,
    idx: usize,
    event: Event,
    warning: BusWarning,
) {
    profile.log_entry(LogKind::BusWarningReport, idx, event as u32, 0);
    if let Some(inst) = profile.instance(idx) {
        inst.hooks.bus_warning(warning);
    }
}
