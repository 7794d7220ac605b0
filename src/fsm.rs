//! The protocol engine: one handler per state, driven exclusively through
//! [`advance`]. No other entry point mutates FSM state.

use crate::actions;
use crate::arp;
use crate::hooks::{Binding, TransferStatus};
use crate::instance::{RaisedActions, DONE_RETRY_LIMIT};
use crate::log::LogKind;
use crate::port::{Descriptor, HardwarePort};
use crate::profile::Profile;
use crate::protocol::WriteLen;
use crate::{BusError, Event, Protocol, State, ARP_SLOT, MAX_BLOCK_SIZE};

/// Largest byte count announced to a FIFO fill threshold in one step.
const FIFO_CHUNK: usize = 16;

/// Feeds one dispatcher-classified event into the state machine, then
/// drains any internal events the handlers raised.
///
/// Must be called with events serialized; the engine holds no locks.
pub(crate) fn advance<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
) {
    let mut event = event;
    loop {
        let Some(inst) = profile.instance_mut(idx) else {
            return;
        };
        inst.raised = RaisedActions::empty();
        let state = inst.holder.current();

        profile.log_entry(LogKind::FsmTransition, idx, state as u32, event as u32);

        if let Some(warning) = event.bus_warning() {
            // Reported, never aborts.
            actions::report_bus_warning(profile, idx, event, warning);
        } else if let Some(error) = event.bus_error() {
            bus_error_abort(profile, port, idx, event, error);
        } else {
            match state {
                State::Initial => initial(profile, port, idx, event),
                State::AwaitingCommandByte => awaiting_command_byte(profile, port, idx, event),
                State::AwaitingBlockSize => awaiting_block_size(profile, port, idx, event),
                State::AwaitingData => awaiting_data(profile, port, idx, event),
                State::AwaitingRead => awaiting_read(profile, port, idx, event),
                State::ReadyToSendByte => ready_to_send_byte(profile, port, idx, event),
                State::CheckIfPecRequired => check_if_pec_required(profile, port, idx, event),
                State::AwaitingDone => awaiting_done(profile, port, idx, event),
                State::ControllerSendCommand => {
                    controller_send_command(profile, port, idx, event)
                }
                State::ControllerWriteByte => controller_write_byte(profile, port, idx, event),
                State::ControllerSendReadStart => {
                    controller_send_read_start(profile, port, idx, event)
                }
                State::ControllerReadBlockSize => {
                    controller_read_block_size(profile, port, idx, event)
                }
                State::ControllerReadByte => controller_read_byte(profile, port, idx, event),
                State::ControllerReadPec => controller_read_pec(profile, port, idx, event),
                State::ControllerReadDone => controller_read_done(profile, port, idx, event),
            }
        }

        match profile.instance_mut(idx).and_then(|i| i.take_raised_event()) {
            Some(raised) => event = raised,
            None => return,
        }
    }
}

fn set_state<const C: usize>(profile: &mut Profile<'_, C>, idx: usize, state: State) {
    if let Some(inst) = profile.instance_mut(idx) {
        inst.holder.transition(state);
    }
}

/// Universal recovery: log, optional NACK, full reset, back to `Initial`.
fn unexpected<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
    nack: bool,
) {
    let state = profile
        .instance(idx)
        .map_or(State::Initial, |i| i.holder.current());
    profile.log_entry(LogKind::UnexpectedEvent, idx, state as u32, event as u32);

    if nack {
        port.write_target_descriptor(Descriptor::Nack);
    }

    actions::reset_all_data(profile, port, idx);
    if profile.controller_in_play == Some(idx) {
        profile.controller_in_play = None;
    }
    if profile.active_target == Some(idx) {
        profile.active_target = None;
    }
    set_state(profile, idx, State::Initial);
}

/// Uniform abort for the bus-error interrupt class.
fn bus_error_abort<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
    error: BusError,
) {
    actions::report_bus_error(profile, &*port, idx, event, error);

    let was_controller = profile.controller_in_play == Some(idx);
    if was_controller {
        // Controller aborts carry the in-flight transaction id.
        actions::announce(profile, idx, TransferStatus::Failed(error));
    }

    actions::reset_all_data(profile, port, idx);
    if was_controller {
        profile.controller_in_play = None;
    }
    if profile.active_target == Some(idx) {
        profile.active_target = None;
    }
    set_state(profile, idx, State::Initial);
}

// ---------------------------------------------------------------------------
// Target role
// ---------------------------------------------------------------------------

fn initial<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
) {
    match event {
        Event::TargetWrite => {
            let (simple, is_i2c) = match profile.instance_mut(idx) {
                Some(inst) => {
                    inst.reset_transaction();
                    (inst.simple, matches!(inst.hooks, Binding::I2c(_)))
                }
                None => return,
            };
            profile.active_target = Some(idx);

            if is_i2c {
                if let Some(inst) = profile.instance_mut(idx) {
                    inst.protocol = Some(Protocol::I2cWrite);
                    inst.expected = MAX_BLOCK_SIZE;
                    inst.announced = 1;
                }
                profile.note_initiated(Protocol::I2cWrite);
                port.set_target_rx_threshold(1);
                set_state(profile, idx, State::AwaitingData);
            } else if simple {
                // Simple devices skip command resolution entirely.
                if let Some(inst) = profile.instance_mut(idx) {
                    inst.protocol = Some(Protocol::SendByte);
                    inst.expected = 1;
                    inst.announced = 1;
                }
                profile.note_initiated(Protocol::SendByte);
                port.set_target_rx_threshold(1);
                set_state(profile, idx, State::AwaitingData);
            } else {
                port.set_target_rx_threshold(1);
                set_state(profile, idx, State::AwaitingCommandByte);
            }
        }
        Event::TargetRead => {
            let is_i2c = match profile.instance_mut(idx) {
                Some(inst) => {
                    inst.reset_transaction();
                    matches!(inst.hooks, Binding::I2c(_))
                }
                None => return,
            };
            profile.active_target = Some(idx);

            let protocol = if is_i2c {
                Protocol::I2cRead
            } else {
                Protocol::ReceiveByte
            };
            if let Some(inst) = profile.instance_mut(idx) {
                inst.protocol = Some(protocol);
            }
            profile.note_initiated(protocol);

            match actions::fetch_app_data(profile, idx) {
                Ok(_) => {
                    stage_first_response_byte(profile, port, idx);
                    set_state(profile, idx, State::ReadyToSendByte);
                }
                Err(()) => nack_to_done(profile, port, idx),
            }
        }
        Event::SendNextByte => controller_start(profile, port, idx),
        _ => unexpected(profile, port, idx, event, false),
    }
}

fn awaiting_command_byte<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
) {
    match event {
        Event::TargetRxFill => {
            let mut byte = [0u8; 1];
            if port.read_target_fifo(&mut byte) == 0 {
                unexpected(profile, port, idx, event, false);
                return;
            }
            let command = byte[0];
            if let Some(inst) = profile.instance_mut(idx) {
                inst.command = command;
            }

            let Some(protocol) = actions::resolve_protocol(profile, idx, command) else {
                profile.log_entry(LogKind::ProtocolRejected, idx, command as u32, 0);
                nack_to_done(profile, port, idx);
                return;
            };

            profile.log_entry(LogKind::ProtocolResolved, idx, command as u32, protocol as u32);
            profile.note_initiated(protocol);

            let pec = if protocol.is_arp() {
                true
            } else {
                match profile.instance(idx).map(|i| i.hooks) {
                    Some(Binding::Smbus(h)) => h.pec_required(command, protocol),
                    _ => false,
                }
            };
            if let Some(inst) = profile.instance_mut(idx) {
                inst.protocol = Some(protocol);
                inst.pec_required = pec;
            }

            dispatch_after_command(profile, port, idx, protocol);
        }
        // Stop straight after the address phase: a quick command.
        Event::TargetDone => {
            if let Some(inst) = profile.instance_mut(idx) {
                inst.protocol = Some(Protocol::QuickCommand);
            }
            profile.note_initiated(Protocol::QuickCommand);
            target_complete(profile, port, idx);
        }
        _ => unexpected(profile, port, idx, event, false),
    }
}

/// Routes a freshly resolved protocol to its next state.
fn dispatch_after_command<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    protocol: Protocol,
) {
    match protocol.target_write_len() {
        Some(WriteLen::Block) => {
            port.set_target_rx_threshold(1);
            set_state(profile, idx, State::AwaitingBlockSize);
        }
        Some(WriteLen::Fixed(n)) => {
            let announced = n.min(FIFO_CHUNK);
            if let Some(inst) = profile.instance_mut(idx) {
                inst.expected = n;
                inst.announced = announced;
            }
            port.set_target_rx_threshold(announced as u8);
            set_state(profile, idx, State::AwaitingData);
        }
        None => match protocol {
            Protocol::GetUdid => match arp::arbitrate(profile) {
                Some(winner) => stage_udid_response(profile, port, idx, winner),
                None => nack_to_done(profile, port, idx),
            },
            Protocol::GetUdidDirected => {
                let command = profile.instance(idx).map_or(0, |i| i.command);
                let target = arp::find_by_address(profile, arp::directed_address(command));
                match target {
                    // The matched instance must hold a valid address.
                    Some(m)
                        if profile.instance(m).is_some_and(|i| i.address_valid)
                            && profile.controller_in_play != Some(m) =>
                    {
                        stage_udid_response(profile, port, idx, m)
                    }
                    _ => nack_to_done(profile, port, idx),
                }
            }
            // Flag fan-out happens at Done; nothing more is received.
            Protocol::PrepareToArp | Protocol::ResetDevice | Protocol::ResetDeviceDirected => {
                set_state(profile, idx, State::AwaitingDone);
            }
            p if p.reads_back() => match actions::fetch_app_data(profile, idx) {
                Ok(_) => set_state(profile, idx, State::AwaitingRead),
                Err(()) => nack_to_done(profile, port, idx),
            },
            // Send-Byte: the command byte was the datum.
            _ => set_state(profile, idx, State::AwaitingDone),
        },
    }
}

fn awaiting_block_size<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
) {
    match event {
        Event::TargetRxFill => {
            let mut byte = [0u8; 1];
            if port.read_target_fifo(&mut byte) == 0 {
                unexpected(profile, port, idx, event, false);
                return;
            }
            let size = byte[0] as usize;
            let protocol = profile.instance(idx).and_then(|i| i.protocol);

            let valid = match protocol {
                Some(Protocol::AssignAddress) => size == arp::UDID_PAYLOAD,
                _ => size >= 1,
            };
            if !valid {
                profile.log_entry(LogKind::ResourceError, idx, size as u32, 0);
                nack_to_done(profile, port, idx);
                return;
            }

            let announced = size.min(FIFO_CHUNK);
            if let Some(inst) = profile.instance_mut(idx) {
                inst.expected = size;
                inst.announced = announced;
            }
            port.set_target_rx_threshold(announced as u8);
            set_state(profile, idx, State::AwaitingData);
        }
        _ => unexpected(profile, port, idx, event, false),
    }
}

fn awaiting_data<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
) {
    let protocol = profile.instance(idx).and_then(|i| i.protocol);

    match event {
        Event::TargetRxFill => {
            let (expected, received) = match profile.instance(idx) {
                Some(i) => (i.expected, i.recv.len()),
                None => return,
            };
            let remaining = expected.saturating_sub(received);
            if remaining == 0 {
                // More bytes than the transaction may carry.
                profile.log_entry(LogKind::ResourceError, idx, expected as u32, 0);
                nack_to_done(profile, port, idx);
                return;
            }

            let drained = match profile.instance_mut(idx) {
                Some(inst) => {
                    let n = port.read_target_fifo(inst.recv.writable(remaining));
                    inst.recv.commit(n);
                    n
                }
                None => return,
            };

            if protocol == Some(Protocol::AssignAddress) {
                let mut prefix = [0u8; arp::UDID_PAYLOAD];
                let len = match profile.instance(idx) {
                    Some(inst) => {
                        let received = inst.recv.as_slice();
                        let n = received.len().min(arp::UDID_PAYLOAD);
                        prefix[..n].copy_from_slice(&received[..n]);
                        n
                    }
                    None => return,
                };
                if !arp::any_assign_match(profile, &prefix[..len]) {
                    nack_to_done(profile, port, idx);
                    return;
                }
            }

            let received = received + drained;
            if received >= expected && protocol != Some(Protocol::I2cWrite) {
                match protocol {
                    Some(p) if p.reads_back() => match actions::fetch_app_data(profile, idx) {
                        Ok(_) => set_state(profile, idx, State::AwaitingRead),
                        Err(()) => nack_to_done(profile, port, idx),
                    },
                    _ => set_state(profile, idx, State::AwaitingDone),
                }
            } else {
                let announced = (expected - received).min(FIFO_CHUNK).max(1);
                if let Some(inst) = profile.instance_mut(idx) {
                    inst.announced = announced;
                }
                port.set_target_rx_threshold(announced as u8);
            }
        }
        // Raw I2C writes have no announced length; stop is the terminator.
        Event::TargetDone if protocol == Some(Protocol::I2cWrite) => {
            target_complete(profile, port, idx);
        }
        _ => unexpected(profile, port, idx, event, true),
    }
}

fn awaiting_read<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
) {
    match event {
        Event::TargetRead => {
            stage_first_response_byte(profile, port, idx);
            set_state(profile, idx, State::ReadyToSendByte);
        }
        _ => unexpected(profile, port, idx, event, false),
    }
}

fn ready_to_send_byte<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
) {
    match event {
        Event::TargetTxEmpty => {
            let next = profile.instance_mut(idx).and_then(|i| i.send.next());
            match next {
                Some(byte) => port.write_target_fifo(byte),
                None => {
                    actions::raise_pec_decision(profile, idx);
                    set_state(profile, idx, State::CheckIfPecRequired);
                }
            }
        }
        // The controller may stop once it has read enough.
        Event::TargetDone => target_complete(profile, port, idx),
        _ => unexpected(profile, port, idx, event, false),
    }
}

fn check_if_pec_required<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
) {
    match event {
        Event::PecDecision => {
            let owes_pec = profile
                .instance(idx)
                .is_some_and(|i| i.pec_required && !i.pec_sent);
            if owes_pec {
                port.write_target_descriptor(Descriptor::RequestPec);
                if let Some(inst) = profile.instance_mut(idx) {
                    inst.pec_sent = true;
                }
            }
            set_state(profile, idx, State::AwaitingDone);
        }
        Event::TargetDone => target_complete(profile, port, idx),
        _ => unexpected(profile, port, idx, event, false),
    }
}

fn awaiting_done<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
) {
    match event {
        Event::TargetDone => target_complete(profile, port, idx),
        Event::ControllerDone => controller_write_complete(profile, port, idx),
        // Late read request: refuse it, but keep the transaction state.
        Event::TargetRead => {
            port.write_target_descriptor(Descriptor::Nack);
            if let Some(inst) = profile.instance_mut(idx) {
                inst.nack_sent = true;
            }
        }
        Event::TargetTxEmpty => {
            let retries = match profile.instance_mut(idx) {
                Some(inst) => {
                    inst.done_retries = inst.done_retries.saturating_add(1);
                    inst.done_retries
                }
                None => return,
            };
            if retries > DONE_RETRY_LIMIT {
                port.write_target_descriptor(Descriptor::Nack);
                if let Some(inst) = profile.instance_mut(idx) {
                    inst.nack_sent = true;
                }
            }
        }
        // The stop descriptor is queued; residual TX space is harmless.
        Event::ControllerTxEmpty => {}
        _ => unexpected(profile, port, idx, event, false),
    }
}

/// Per-protocol completion once the bus reports done for a target-role
/// transaction.
fn target_complete<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
) {
    let (protocol, nacked) = match profile.instance(idx) {
        Some(i) => (i.protocol, i.nack_sent),
        None => return,
    };

    if let Some(protocol) = protocol {
        if nacked {
            // Locally recovered protocol error: no application notification.
        } else {
            if protocol.delivers_on_done() {
                actions::deliver_received(profile, idx);
            }
            if protocol.is_arp() {
                arp_complete(profile, port, idx, protocol);
            }
            actions::announce(profile, idx, TransferStatus::Success);
            profile.note_completed(protocol);
            profile.log_entry(LogKind::TransactionCompleted, idx, protocol as u32, 0);
        }
    }

    actions::reset_all_data(profile, port, idx);
    if profile.active_target == Some(idx) {
        profile.active_target = None;
    }
    set_state(profile, idx, State::Initial);
}

/// ARP side effects applied at Done, per command.
fn arp_complete<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    protocol: Protocol,
) {
    match protocol {
        Protocol::PrepareToArp => {
            for target in 0..ARP_SLOT {
                if profile.controller_in_play == Some(target) {
                    continue;
                }
                if let Some(inst) = profile.instance_mut(target) {
                    if inst.capability.arp_capable() {
                        inst.address_resolved = false;
                    }
                }
            }
        }
        Protocol::ResetDevice => {
            for target in 0..ARP_SLOT {
                reset_device_flags(profile, port, target);
            }
        }
        Protocol::ResetDeviceDirected => {
            let command = profile.instance(idx).map_or(0, |i| i.command);
            if let Some(target) = arp::find_by_address(profile, arp::directed_address(command)) {
                reset_device_flags(profile, port, target);
            }
        }
        Protocol::AssignAddress => {
            let payload: heapless::Vec<u8, { arp::UDID_PAYLOAD }> = profile
                .instance(idx)
                .map(|i| heapless::Vec::from_slice(i.recv.as_slice()).unwrap_or_default())
                .unwrap_or_default();
            if payload.len() < arp::UDID_PAYLOAD {
                return;
            }
            if let Some(target) = arp::find_assign_match(profile, &payload) {
                let address = payload[16] >> 1;
                if let Some(inst) = profile.instance_mut(target) {
                    inst.address = address;
                    inst.address_valid = true;
                    inst.address_resolved = true;
                }
                port.set_target_address(target, address, true);
                actions::notify_address_change(profile, target, address);
            }
        }
        _ => {}
    }
}

/// Reset-Device flag policy: fixed-and-discoverable devices end with the
/// address valid; dynamic devices lose it, detaching from the bus first if
/// the hardware address was live. The co-located controller instance is
/// never touched.
fn reset_device_flags<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    target: usize,
) {
    if profile.controller_in_play == Some(target) {
        return;
    }

    let (capable, dynamic, valid, address) = match profile.instance(target) {
        Some(i) => (
            i.capability.arp_capable(),
            i.capability.is_dynamic(),
            i.address_valid,
            i.address,
        ),
        None => return,
    };
    if !capable {
        return;
    }

    if dynamic && valid {
        port.set_target_address(target, address, false);
    }

    if let Some(inst) = profile.instance_mut(target) {
        inst.address_resolved = false;
        inst.address_valid = !dynamic;
    }
}

// ---------------------------------------------------------------------------
// Controller role
// ---------------------------------------------------------------------------

fn controller_start<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
) {
    if profile.controller_in_play != Some(idx) {
        unexpected(profile, port, idx, Event::SendNextByte, false);
        return;
    }
    let (protocol, peer, expected) = match profile.instance(idx) {
        Some(i) => match i.protocol {
            Some(p) => (p, i.peer_address, i.expected),
            None => {
                unexpected(profile, port, idx, Event::SendNextByte, false);
                return;
            }
        },
        None => return,
    };

    match protocol {
        Protocol::QuickCommand => {
            port.write_controller_descriptor(Descriptor::Start {
                address: peer,
                read: false,
            });
            port.write_controller_descriptor(Descriptor::Stop);
            set_state(profile, idx, State::AwaitingDone);
        }
        Protocol::ReceiveByte | Protocol::I2cRead => {
            port.write_controller_descriptor(Descriptor::Start {
                address: peer,
                read: true,
            });
            let announced = expected.min(FIFO_CHUNK).max(1);
            if let Some(inst) = profile.instance_mut(idx) {
                inst.announced = announced;
            }
            port.set_controller_rx_threshold(announced as u8);
            set_state(profile, idx, State::ControllerReadByte);
        }
        Protocol::I2cWrite => {
            port.write_controller_descriptor(Descriptor::Start {
                address: peer,
                read: false,
            });
            set_state(profile, idx, State::ControllerWriteByte);
        }
        _ => {
            port.write_controller_descriptor(Descriptor::Start {
                address: peer,
                read: false,
            });
            set_state(profile, idx, State::ControllerSendCommand);
        }
    }
}

fn controller_send_command<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
) {
    match event {
        Event::ControllerTxEmpty => {
            let (protocol, command, loaded) = match profile.instance(idx) {
                Some(i) => match i.protocol {
                    Some(p) => (p, i.command, i.send.loaded()),
                    None => return,
                },
                None => return,
            };

            port.write_controller_fifo(command);

            match protocol.target_write_len() {
                Some(WriteLen::Block) => {
                    port.write_controller_fifo(loaded as u8);
                    set_state(profile, idx, State::ControllerWriteByte);
                }
                Some(WriteLen::Fixed(_)) => {
                    set_state(profile, idx, State::ControllerWriteByte);
                }
                None if protocol.reads_back() => {
                    set_state(profile, idx, State::ControllerSendReadStart);
                    actions::raise_send_next(profile, idx);
                }
                None => finish_controller_write(profile, port, idx),
            }
        }
        _ => unexpected(profile, port, idx, event, false),
    }
}

fn controller_write_byte<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
) {
    match event {
        Event::ControllerTxEmpty => {
            let next = profile.instance_mut(idx).and_then(|i| i.send.next());
            match next {
                Some(byte) => port.write_controller_fifo(byte),
                None => {
                    let reads_back = profile
                        .instance(idx)
                        .and_then(|i| i.protocol)
                        .is_some_and(|p| p.reads_back());
                    if reads_back {
                        set_state(profile, idx, State::ControllerSendReadStart);
                        actions::raise_send_next(profile, idx);
                    } else {
                        finish_controller_write(profile, port, idx);
                    }
                }
            }
        }
        _ => unexpected(profile, port, idx, event, false),
    }
}

/// Terminates the write phase: optional PEC, stop, then wait for done.
fn finish_controller_write<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
) {
    let owes_pec = profile
        .instance(idx)
        .is_some_and(|i| i.pec_required && !i.pec_sent);
    if owes_pec {
        port.write_controller_descriptor(Descriptor::RequestPec);
        if let Some(inst) = profile.instance_mut(idx) {
            inst.pec_sent = true;
        }
    }
    port.write_controller_descriptor(Descriptor::Stop);
    set_state(profile, idx, State::AwaitingDone);
}

fn controller_send_read_start<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
) {
    match event {
        Event::SendNextByte | Event::ControllerTxEmpty => {
            let (protocol, peer) = match profile.instance(idx) {
                Some(i) => match i.protocol {
                    Some(p) => (p, i.peer_address),
                    None => return,
                },
                None => return,
            };

            port.write_controller_descriptor(Descriptor::RepeatedStart {
                address: peer,
                read: true,
            });

            match protocol.fixed_read_len() {
                Some(n) => {
                    let announced = n.min(FIFO_CHUNK);
                    if let Some(inst) = profile.instance_mut(idx) {
                        inst.expected = n;
                        inst.announced = announced;
                    }
                    port.set_controller_rx_threshold(announced as u8);
                    set_state(profile, idx, State::ControllerReadByte);
                }
                None => {
                    port.set_controller_rx_threshold(1);
                    set_state(profile, idx, State::ControllerReadBlockSize);
                }
            }
        }
        _ => unexpected(profile, port, idx, event, false),
    }
}

fn controller_read_block_size<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
) {
    match event {
        Event::ControllerRxFill => {
            let mut byte = [0u8; 1];
            if port.read_controller_fifo(&mut byte) == 0 {
                unexpected(profile, port, idx, event, false);
                return;
            }
            let size = byte[0] as usize;
            if size == 0 {
                // Malformed peer response: abandon with a failure report.
                profile.log_entry(LogKind::ResourceError, idx, size as u32, 0);
                actions::announce(
                    profile,
                    idx,
                    TransferStatus::Failed(BusError::ControllerRxError),
                );
                port.write_controller_descriptor(Descriptor::Stop);
                actions::reset_all_data(profile, port, idx);
                profile.controller_in_play = None;
                set_state(profile, idx, State::Initial);
                return;
            }

            let announced = size.min(FIFO_CHUNK);
            if let Some(inst) = profile.instance_mut(idx) {
                inst.expected = size;
                inst.announced = announced;
            }
            port.set_controller_rx_threshold(announced as u8);
            set_state(profile, idx, State::ControllerReadByte);
        }
        _ => unexpected(profile, port, idx, event, false),
    }
}

fn controller_read_byte<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
) {
    match event {
        Event::ControllerRxFill => {
            let (expected, received) = match profile.instance(idx) {
                Some(i) => (i.expected, i.recv.len()),
                None => return,
            };
            let remaining = expected.saturating_sub(received);
            let drained = match profile.instance_mut(idx) {
                Some(inst) => {
                    let n = port.read_controller_fifo(inst.recv.writable(remaining));
                    inst.recv.commit(n);
                    n
                }
                None => return,
            };

            if received + drained >= expected {
                let owes_pec = profile
                    .instance(idx)
                    .is_some_and(|i| i.pec_required && !i.pec_sent);
                if owes_pec {
                    port.write_controller_descriptor(Descriptor::RequestPec);
                    port.set_controller_rx_threshold(1);
                    if let Some(inst) = profile.instance_mut(idx) {
                        inst.pec_sent = true;
                    }
                    set_state(profile, idx, State::ControllerReadPec);
                } else {
                    port.write_controller_descriptor(Descriptor::Stop);
                    set_state(profile, idx, State::ControllerReadDone);
                }
            } else {
                let announced = (expected - received - drained).min(FIFO_CHUNK).max(1);
                if let Some(inst) = profile.instance_mut(idx) {
                    inst.announced = announced;
                }
                port.set_controller_rx_threshold(announced as u8);
            }
        }
        _ => unexpected(profile, port, idx, event, false),
    }
}

fn controller_read_pec<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
) {
    match event {
        Event::ControllerRxFill => {
            // The engine verified the PEC in hardware; a mismatch arrives as
            // its own error interrupt. The byte itself is discarded.
            let mut byte = [0u8; 1];
            let _ = port.read_controller_fifo(&mut byte);
            port.write_controller_descriptor(Descriptor::Stop);
            set_state(profile, idx, State::ControllerReadDone);
        }
        _ => unexpected(profile, port, idx, event, false),
    }
}

fn controller_read_done<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    event: Event,
) {
    match event {
        Event::ControllerDone => {
            actions::deliver_received(profile, idx);
            actions::announce(profile, idx, TransferStatus::Success);
            finish_controller_transaction(profile, port, idx);
        }
        Event::ControllerTxEmpty => {}
        _ => unexpected(profile, port, idx, event, false),
    }
}

fn controller_write_complete<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
) {
    if profile.controller_in_play != Some(idx) {
        unexpected(profile, port, idx, Event::ControllerDone, false);
        return;
    }
    actions::announce(profile, idx, TransferStatus::Success);
    finish_controller_transaction(profile, port, idx);
}

fn finish_controller_transaction<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
) {
    let (protocol, xid) = match profile.instance(idx) {
        Some(i) => (i.protocol, i.xid),
        None => return,
    };
    if let Some(protocol) = protocol {
        profile.note_completed(protocol);
        profile.log_entry(LogKind::TransactionCompleted, idx, protocol as u32, xid);
    }
    actions::reset_all_data(profile, port, idx);
    profile.controller_in_play = None;
    set_state(profile, idx, State::Initial);
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Preloads the first response byte so the hardware can answer the read
/// phase without stretching.
fn stage_first_response_byte<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
) {
    if let Some(byte) = profile.instance_mut(idx).and_then(|i| i.send.next()) {
        port.write_target_fifo(byte);
    }
}

/// Staging for GetUdid responses: count byte, wire-ordered UDID, device
/// target address. ARP responses always carry PEC.
fn stage_udid_response<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
    winner: usize,
) {
    let mut response = [0u8; arp::UDID_PAYLOAD + 1];
    match profile.instance(winner) {
        Some(inst) => arp::build_udid_response(inst, &mut response),
        None => {
            nack_to_done(profile, port, idx);
            return;
        }
    }

    if let Some(inst) = profile.instance_mut(idx) {
        inst.send.reset();
        // Cannot overflow: the response is far under the block cap.
        let _ = inst.send.extend(&response);
    }
    port.write_target_descriptor(Descriptor::Ack);
    set_state(profile, idx, State::AwaitingRead);
}

/// Protocol-error recovery: NACK the transfer and ride it out to done.
fn nack_to_done<P: HardwarePort, const C: usize>(
    profile: &mut Profile<'_, C>,
    port: &mut P,
    idx: usize,
) {
    port.write_target_descriptor(Descriptor::Nack);
    if let Some(inst) = profile.instance_mut(idx) {
        inst.nack_sent = true;
    }
    set_state(profile, idx, State::AwaitingDone);
}
