use std::sync::Arc;

use crate::base::behavior::*;
use crate::base::port::{tie_off, tie_off_input, ChannelRef};
use crate::pipeline::packet_mgr::RequestPacketManager;
use crate::pipeline::types::*;
use crate::sim::config::PipelineConfig;

struct Rig {
    rpm: RequestPacketManager,
    cmds: ChannelRef<AcceptedCommand>,
    packets: ChannelRef<RequestPacket>,
    matches: ChannelRef<CompletionMatch>,
    credits: ChannelRef<RequestId>,
    pulses: Vec<Pulse>,
}

impl Rig {
    fn new(packet_depth: usize) -> Self {
        let mut rpm = RequestPacketManager::new(Arc::new(PipelineConfig::default()));
        let cmds = tie_off_input(&mut rpm.cmd_in, 8);
        let packets = tie_off(&mut rpm.packet_out, packet_depth);
        let matches = tie_off_input(&mut rpm.match_in, 8);
        let credits = tie_off(&mut rpm.retire_out, 8);
        Rig {
            rpm,
            cmds,
            packets,
            matches,
            credits,
            pulses: Vec::new(),
        }
    }

    fn cycle(&mut self) {
        self.rpm.tick_one();
        self.cmds.commit();
        self.packets.commit();
        self.matches.commit();
        self.credits.commit();
        self.rpm.commit();
        self.rpm.drain_pulses(&mut self.pulses);
    }

    fn accept(&mut self, request_id: RequestId, command: Command) {
        assert!(self.cmds.put_owned(AcceptedCommand {
            request_id,
            command,
        }));
        self.cmds.commit();
    }

    fn complete(&mut self, request_id: RequestId, status: RequestStatus) {
        assert!(self.matches.put_owned(CompletionMatch { request_id, status }));
        self.matches.commit();
    }
}

#[test]
fn builds_packet_in_four_cycles() {
    let mut rig = Rig::new(4);
    rig.accept(5, Command::write(0x2000, 4096, 0xab));
    for _ in 0..3 {
        rig.cycle();
    }
    assert!(rig.packets.is_empty());
    rig.cycle();

    let packet = rig.packets.get().expect("packet queued");
    let config = PipelineConfig::default();
    assert_eq!(5, packet.request_id);
    assert_eq!(OpKind::Write, packet.kind);
    assert_eq!(RequestStatus::InFlight, packet.status);
    assert_eq!(0x2000, packet.address);
    assert_eq!(config.buffer_base + (5u64 << 32), packet.buffer.handle);
    assert_eq!(4096, packet.buffer.length);
    assert_eq!(0xab, packet.buffer.pattern);
    assert_eq!(1, packet.stack_location);
    assert_eq!(Some(RequestStatus::InFlight), rig.rpm.status_of(5));
    assert!(rig.pulses.contains(&Pulse::PacketCreated { request_id: 5 }));
}

#[test]
fn held_packet_is_sent_exactly_once() {
    let mut rig = Rig::new(1);
    for id in 0..3 {
        rig.accept(id, Command::read(id as u64 * 512, 512));
    }
    for _ in 0..30 {
        rig.cycle();
    }
    assert_eq!(1, rig.packets.len());
    assert!(rig
        .pulses
        .iter()
        .any(|p| matches!(p, Pulse::Stall { reason: StallReason::Backpressure, .. })));

    let mut seen = Vec::new();
    for _ in 0..30 {
        if let Some(packet) = rig.packets.get() {
            seen.push(packet.request_id);
        }
        rig.cycle();
    }
    seen.extend(std::iter::from_fn(|| rig.packets.get()).map(|p| p.request_id));
    assert_eq!(vec![0, 1, 2], seen);
    assert_eq!(3, rig.rpm.packets_created());
}

#[test]
fn completion_retires_packet_and_returns_credit() {
    let mut rig = Rig::new(4);
    rig.accept(2, Command::read(0, 512));
    for _ in 0..4 {
        rig.cycle();
    }
    assert_eq!(1, rig.rpm.live_packets());

    rig.complete(2, RequestStatus::Error);
    rig.cycle();
    assert_eq!(Some(2), rig.credits.get());
    assert_eq!(0, rig.rpm.live_packets());
    assert_eq!(None, rig.rpm.status_of(2));
    assert_eq!(1, rig.rpm.packets_retired());
    assert_eq!(1, rig.rpm.packets_failed());
    assert!(rig.pulses.contains(&Pulse::PacketRetired {
        request_id: 2,
        status: RequestStatus::Error,
    }));
}

#[test]
fn retired_packets_are_counted_by_final_status() {
    let mut rig = Rig::new(4);
    rig.accept(1, Command::read(0, 512));
    rig.accept(3, Command::write(512, 512, 0x11));
    for _ in 0..10 {
        rig.cycle();
    }
    assert_eq!(2, rig.rpm.live_packets());

    rig.complete(1, RequestStatus::Complete);
    rig.complete(3, RequestStatus::Error);
    for _ in 0..2 {
        rig.cycle();
    }
    let retired: Vec<_> = rig
        .pulses
        .iter()
        .filter_map(|p| match p {
            Pulse::PacketRetired { request_id, status } => Some((*request_id, *status)),
            _ => None,
        })
        .collect();
    assert_eq!(
        vec![(1, RequestStatus::Complete), (3, RequestStatus::Error)],
        retired
    );
    assert_eq!(2, rig.rpm.packets_retired());
    assert_eq!(1, rig.rpm.packets_failed());
    assert_eq!(None, rig.rpm.status_of(1));
    assert_eq!(None, rig.rpm.status_of(3));
}

#[test]
fn match_without_live_packet_is_stale() {
    let mut rig = Rig::new(4);
    rig.complete(9, RequestStatus::Complete);
    rig.cycle();
    assert_eq!(1, rig.rpm.stale_matches());
    assert!(rig.credits.is_empty());
    assert!(rig.pulses.contains(&Pulse::StaleMatch { request_id: 9 }));
}
