//! Address Resolution Protocol support: the fixed command table used by the
//! reserved ARP instance and the UDID arbitration run for broadcast
//! `GetUdid` contention.

use heapless::Vec;

use crate::instance::Instance;
use crate::profile::Profile;
use crate::{Protocol, ARP_SLOT, MAX_INSTANCES};

/// Byte count carried by GetUdid responses and AssignAddress payloads:
/// 16 UDID bytes plus the device target address.
pub(crate) const UDID_PAYLOAD: usize = 17;
pub(crate) const UDID_COUNT_BYTE: u8 = UDID_PAYLOAD as u8;

/// Fixed command-to-protocol table of the ARP target. Reserved codes map to
/// `None` and are NACKed by the caller.
pub(crate) fn protocol_for_command(command: u8) -> Option<Protocol> {
    match command {
        0x01 => Some(Protocol::PrepareToArp),
        0x02 => Some(Protocol::ResetDevice),
        0x03 => Some(Protocol::GetUdid),
        0x04 => Some(Protocol::AssignAddress),
        0x00 | 0x05..=0x0f => None,
        // Directed forms encode the target address in the command byte.
        c if c & 1 == 1 => Some(Protocol::GetUdidDirected),
        _ => Some(Protocol::ResetDeviceDirected),
    }
}

pub(crate) fn directed_address(command: u8) -> u8 {
    command >> 1
}

/// Device Target Address byte of a UDID response. Fixed-address devices
/// always encode their address; dynamic devices only once it is valid.
pub(crate) fn device_target_address(inst: &Instance<'_>) -> u8 {
    if !inst.capability.is_dynamic() || inst.address_valid {
        (inst.address << 1) | 1
    } else {
        0xff
    }
}

/// Writes the 18-byte GetUdid response: count, UDID in wire order (byte 15,
/// the capability byte, first), then the device target address.
pub(crate) fn build_udid_response(inst: &Instance<'_>, buf: &mut [u8; UDID_PAYLOAD + 1]) {
    buf[0] = UDID_COUNT_BYTE;
    for i in 0..16 {
        buf[1 + i] = inst.udid[15 - i];
    }
    buf[UDID_PAYLOAD] = device_target_address(inst);
}

fn colocated<const C: usize>(profile: &Profile<'_, C>, idx: usize) -> bool {
    profile.controller_in_play() == Some(idx)
}

/// Instances competing for a broadcast GetUdid: ARP-capable, not yet
/// resolved, and not co-located with the active ARP controller.
pub(crate) fn eligible<const C: usize>(profile: &Profile<'_, C>) -> Vec<usize, MAX_INSTANCES> {
    let mut out = Vec::new();
    for idx in 0..ARP_SLOT {
        if let Some(inst) = profile.instance(idx) {
            if inst.capability.arp_capable()
                && !inst.address_resolved
                && !colocated(profile, idx)
            {
                // Vec is sized for every slot.
                let _ = out.push(idx);
            }
        }
    }
    out
}

/// Arbitrates broadcast GetUdid contention. With one candidate there is no
/// sort; otherwise candidates are discarded byte position by byte position,
/// keeping the tied-minimum set, from the capability byte down to byte 0.
/// A tie surviving all 16 bytes falls to the first remaining slot; this is
/// mechanical, not a documented address-priority rule.
pub(crate) fn arbitrate<const C: usize>(profile: &Profile<'_, C>) -> Option<usize> {
    let mut set = eligible(profile);

    if set.len() <= 1 {
        return set.first().copied();
    }

    for pos in (0..16).rev() {
        let min = set
            .iter()
            .filter_map(|&i| profile.instance(i).map(|inst| inst.udid[pos]))
            .min()
            .unwrap_or(0);

        let mut keep = 0;
        for j in 0..set.len() {
            let idx = set[j];
            if profile.instance(idx).map(|inst| inst.udid[pos]) == Some(min) {
                set[keep] = idx;
                keep += 1;
            }
        }
        set.truncate(keep);

        if set.len() == 1 {
            break;
        }
    }

    set.first().copied()
}

/// Checks a partially received AssignAddress payload against an instance's
/// UDID. Wire byte `i` corresponds to `udid[15 - i]`; the mapping is kept
/// exactly as the receive cursor arithmetic defines it.
pub(crate) fn prefix_matches(inst: &Instance<'_>, received: &[u8]) -> bool {
    for (i, &byte) in received.iter().take(16).enumerate() {
        if inst.udid[15 - i] != byte {
            return false;
        }
    }
    true
}

/// True while at least one ARP-capable instance still matches the received
/// UDID prefix, so the transfer is worth ACKing further.
pub(crate) fn any_assign_match<const C: usize>(
    profile: &Profile<'_, C>,
    received: &[u8],
) -> bool {
    (0..ARP_SLOT).any(|idx| match profile.instance(idx) {
        Some(inst) => {
            inst.capability.arp_capable()
                && !colocated(profile, idx)
                && prefix_matches(inst, received)
        }
        None => false,
    })
}

/// Full-UDID match for AssignAddress completion.
pub(crate) fn find_assign_match<const C: usize>(
    profile: &Profile<'_, C>,
    received: &[u8],
) -> Option<usize> {
    if received.len() < 16 {
        return None;
    }
    (0..ARP_SLOT).find(|&idx| match profile.instance(idx) {
        Some(inst) => {
            inst.capability.arp_capable()
                && !colocated(profile, idx)
                && prefix_matches(inst, &received[..16])
        }
        None => false,
    })
}

/// Locates the ARP-capable instance bound to a directed command's address.
pub(crate) fn find_by_address<const C: usize>(
    profile: &Profile<'_, C>,
    address: u8,
) -> Option<usize> {
    (0..MAX_INSTANCES).find(|&idx| match profile.instance(idx) {
        Some(inst) => {
            idx != ARP_SLOT && inst.capability.arp_capable() && inst.address == address
        }
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::Binding;
    use crate::instance::ArpCapability;
    use crate::LogLevel;

    fn profile_with(udids: &[[u8; 16]]) -> Profile<'static, 16> {
        let mut p = Profile::new(LogLevel::Off, None);
        for (i, udid) in udids.iter().enumerate() {
            p.allocate(
                0x20 + i as u8,
                *udid,
                ArpCapability::DynamicVolatile,
                Binding::Arp,
                false,
            )
            .unwrap();
        }
        p
    }

    #[test]
    fn command_table_decodes_fixed_and_directed_codes() {
        assert_eq!(protocol_for_command(0x01), Some(Protocol::PrepareToArp));
        assert_eq!(protocol_for_command(0x02), Some(Protocol::ResetDevice));
        assert_eq!(protocol_for_command(0x03), Some(Protocol::GetUdid));
        assert_eq!(protocol_for_command(0x04), Some(Protocol::AssignAddress));
        assert_eq!(protocol_for_command(0x00), None);
        assert_eq!(protocol_for_command(0x07), None);
        assert_eq!(protocol_for_command(0x55), Some(Protocol::GetUdidDirected));
        assert_eq!(protocol_for_command(0x54), Some(Protocol::ResetDeviceDirected));
        assert_eq!(directed_address(0x55), 0x2a);
    }

    #[test]
    fn lower_capability_byte_wins_arbitration() {
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        a[15] = 0x40;
        b[15] = 0x20;
        let p = profile_with(&[a, b]);
        assert_eq!(arbitrate(&p), Some(1));
    }

    #[test]
    fn arbitration_descends_to_lower_bytes_on_ties() {
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        let mut c = [0u8; 16];
        // Tie on byte 15, split on byte 14; candidate c loses immediately.
        a[15] = 0x10;
        b[15] = 0x10;
        c[15] = 0x30;
        a[14] = 0x09;
        b[14] = 0x02;
        let p = profile_with(&[a, b, c]);
        assert_eq!(arbitrate(&p), Some(1));
    }

    #[test]
    fn arp_tiebreak_is_first_surviving_slot() {
        // Identical UDIDs through all 16 bytes: the compare exhausts and the
        // first slot of the surviving set wins. Implementation-defined.
        let udid = [0xabu8; 16];
        let p = profile_with(&[udid, udid, udid]);
        assert_eq!(arbitrate(&p), Some(0));
    }

    #[test]
    fn colocated_instance_is_not_eligible() {
        let udid = [1u8; 16];
        let mut p = profile_with(&[udid, udid]);
        p.controller_in_play = Some(0);
        assert_eq!(eligible(&p).as_slice(), &[1]);
        assert_eq!(arbitrate(&p), Some(1));
    }

    #[test]
    fn resolved_instances_drop_out() {
        let udid = [1u8; 16];
        let mut p = profile_with(&[udid, udid]);
        p.instance_mut(0).unwrap().address_resolved = true;
        assert_eq!(arbitrate(&p), Some(1));
    }

    #[test]
    fn udid_response_is_wire_ordered() {
        let mut udid = [0u8; 16];
        for (i, b) in udid.iter_mut().enumerate() {
            *b = i as u8;
        }
        let inst = Instance::new(
            0x2a,
            udid,
            ArpCapability::FixedDiscoverable,
            Binding::Arp,
            false,
        );

        let mut buf = [0u8; 18];
        build_udid_response(&inst, &mut buf);
        assert_eq!(buf[0], 0x11);
        assert_eq!(buf[1], 15); // capability byte (udid[15]) first
        assert_eq!(buf[16], 0); // udid[0] last
        assert_eq!(buf[17], (0x2a << 1) | 1);
    }

    #[test]
    fn dynamic_unassigned_target_address_is_all_ones() {
        let inst = Instance::new(
            0x2a,
            [0; 16],
            ArpCapability::DynamicVolatile,
            Binding::Arp,
            false,
        );
        assert_eq!(device_target_address(&inst), 0xff);
    }

    #[test]
    fn assign_prefix_match_uses_reversed_cursor() {
        let mut udid = [0u8; 16];
        for (i, b) in udid.iter_mut().enumerate() {
            *b = i as u8;
        }
        let p = profile_with(&[udid]);

        // Wire order starts at udid[15].
        assert!(any_assign_match(&p, &[15, 14, 13]));
        assert!(!any_assign_match(&p, &[15, 13]));

        let mut full = [0u8; 17];
        for i in 0..16 {
            full[i] = 15 - i as u8;
        }
        full[16] = 0x31 << 1;
        assert_eq!(find_assign_match(&p, &full), Some(0));
    }
}
