//! Per-PID reassembly of payload unit groups.
//!
//! A payload unit (one PSI table or one PES packet) is usually split
//! across several transport packets. The pool collects packets per PID and
//! hands a completed group back the moment the next unit-start packet
//! arrives on the same PID; a group therefore always runs from one
//! `payload_unit_start_indicator` to just before the next.

use super::{Packet, NULL_PID};
use log::warn;
use std::collections::{HashMap, VecDeque};
use std::mem;

/// Returns whether the continuity counter sequence of one PID is broken.
///
/// Counters only advance on packets that carry payload, an adaptation
/// field may declare the break intentional, and the null PID is exempt
/// altogether.
pub fn has_discontinuity(
    prev_cc: u8,
    next_cc: u8,
    has_payload: bool,
    has_af_discontinuity: bool,
    pid: u16,
) -> bool {
    has_payload && !has_af_discontinuity && pid != NULL_PID && next_cc != (prev_cc + 1) % 16
}

/// Returns whether `next` is a retransmission of `prev`.
///
/// A retransmission repeats the previous packet of its PID bit-for-bit,
/// continuity counter included.
pub fn is_retransmission(prev: &Packet, next: &Packet) -> bool {
    prev == next
}

/// Per-PID queue of packets forming the current payload unit group.
///
/// Not safe for concurrent mutation; callers serialize access.
#[derive(Default)]
pub struct PacketPool {
    groups: HashMap<u16, Vec<Packet>>,
    /// PIDs ordered by the arrival of their current group's first packet.
    order: VecDeque<u16>,
}

impl PacketPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a packet to its PID's group.
    ///
    /// Returns the previously accumulated group when this packet starts a
    /// new payload unit. Packets with the transport error indicator,
    /// without payload, on the null PID, or repeating the previous packet
    /// bit-for-bit are discarded. An unflagged continuity break is logged
    /// but the packet is kept.
    pub fn add(&mut self, packet: Packet) -> Option<Vec<Packet>> {
        let pid = packet.header.pid();
        if packet.header.tei() {
            warn!("Discarding corrupt packet on PID {:#x}", pid);
            return None;
        }
        if !packet.header.has_payload() || pid == NULL_PID {
            return None;
        }

        let group = self.groups.entry(pid).or_insert_with(Vec::new);
        if let Some(prev) = group.last() {
            if is_retransmission(prev, &packet) {
                warn!("Discarding retransmitted packet on PID {:#x}", pid);
                return None;
            }
            let af_discontinuity = packet
                .adaptation_field
                .as_ref()
                .map_or(false, |af| af.header.discontinuity());
            if has_discontinuity(
                prev.header.continuity_counter(),
                packet.header.continuity_counter(),
                packet.header.has_payload(),
                af_discontinuity,
                pid,
            ) {
                warn!("Continuity discontinuity on PID {:#x}", pid);
            }
        }

        let flushed = if packet.header.pusi() {
            // This packet starts a new unit; its group moves to the back
            // of the dump order.
            if let Some(at) = self.order.iter().position(|&p| p == pid) {
                self.order.remove(at);
            }
            mem::take(group)
        } else {
            Vec::new()
        };
        if group.is_empty() && !self.order.contains(&pid) {
            self.order.push_back(pid);
        }
        group.push(packet);

        if flushed.is_empty() {
            None
        } else {
            Some(flushed)
        }
    }

    /// Removes and returns the oldest remaining group, if any.
    ///
    /// Called repeatedly at end of stream to drain unit tails that never
    /// saw a following unit start.
    pub fn dump(&mut self) -> Option<Vec<Packet>> {
        while let Some(pid) = self.order.pop_front() {
            if let Some(group) = self.groups.remove(&pid) {
                if !group.is_empty() {
                    return Some(group);
                }
            }
        }
        None
    }

    /// Drops all accumulated state.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PacketHeader, TransportScramblingControl};

    /// Surfaces the pool's `warn!` output when tests run with RUST_LOG
    /// set.
    fn init_logging() {
        let _ = pretty_env_logger::try_init();
    }

    fn packet(pid: u16, pusi: bool, cc: u8, payload: Vec<u8>) -> Packet {
        Packet {
            header: PacketHeader::new()
                .with_pusi(pusi)
                .with_pid(pid)
                .with_tsc(TransportScramblingControl::NotScrambled)
                .with_has_payload(true)
                .with_continuity_counter(cc),
            adaptation_field: None,
            payload: Some(payload),
        }
    }

    #[test]
    fn discontinuity_rules() {
        assert!(has_discontinuity(3, 5, true, false, 0x100));
        assert!(!has_discontinuity(3, 4, true, false, 0x100));
        assert!(!has_discontinuity(15, 0, true, false, 0x100));
        assert!(!has_discontinuity(3, 5, false, false, 0x100));
        assert!(!has_discontinuity(3, 5, true, true, 0x100));
        assert!(!has_discontinuity(3, 5, true, false, NULL_PID));
    }

    #[test]
    fn groups_flush_on_unit_start() {
        let mut pool = PacketPool::new();
        assert!(pool.add(packet(1, true, 0, vec![1])).is_none());
        assert!(pool.add(packet(1, false, 1, vec![2])).is_none());
        assert!(pool.add(packet(2, true, 0, vec![3])).is_none());
        let flushed = pool.add(packet(1, true, 2, vec![4])).unwrap();
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].payload.as_deref(), Some(&[1][..]));
        assert_eq!(flushed[1].payload.as_deref(), Some(&[2][..]));

        // PID 2's group started before PID 1's new group, so it drains
        // first.
        let first = pool.dump().unwrap();
        assert_eq!(first[0].header.pid(), 2);
        let second = pool.dump().unwrap();
        assert_eq!(second[0].header.pid(), 1);
        assert_eq!(second[0].payload.as_deref(), Some(&[4][..]));
        assert!(pool.dump().is_none());
    }

    #[test]
    fn retransmissions_collapse() {
        init_logging();
        let mut pool = PacketPool::new();
        let p = packet(7, true, 4, vec![0xaa, 0xbb]);
        assert!(pool.add(p.clone()).is_none());
        assert!(pool.add(p.clone()).is_none());
        let flushed = pool.add(packet(7, true, 5, vec![0xcc])).unwrap();
        assert_eq!(flushed.len(), 1);
    }

    #[test]
    fn payloadless_and_null_packets_are_ignored() {
        let mut pool = PacketPool::new();
        let mut no_payload = packet(9, true, 0, vec![]);
        no_payload.header.set_has_payload(false);
        no_payload.payload = None;
        assert!(pool.add(no_payload).is_none());
        assert!(pool.add(packet(NULL_PID, true, 0, vec![0xff])).is_none());
        assert!(pool.dump().is_none());
    }
}
