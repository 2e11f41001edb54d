use std::sync::Arc;

use log::{debug, warn};

use crate::base::behavior::*;
use crate::base::module::{module, IsModule, ModuleBase};
use crate::base::port::{InputPort, OutputPort, Port};
use crate::builtin::id_map::{IdMap, IdMapError};
use crate::pipeline::types::*;
use crate::sim::config::PipelineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketFsm {
    #[default]
    Idle,
    Allocate(AcceptedCommand),
    Build(AcceptedCommand),
    Queue(RequestPacket),
    /// Downstream was full; the built packet is held and offered again every cycle.
    Wait(RequestPacket),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PacketSlot {
    kind: OpKind,
    status: RequestStatus,
}

/// Request-Packet Manager.
///
/// Owns the table of live request packets.  The build path turns accepted commands into packets
/// for block translation; the completion path retires packets as matches come back and returns
/// the request id to ingress.
pub struct RequestPacketManager {
    base: ModuleBase<PacketFsm, PipelineConfig>,
    table: IdMap<PacketSlot>,
    pub cmd_in: Port<InputPort, AcceptedCommand>,
    pub packet_out: Port<OutputPort, RequestPacket>,
    pub match_in: Port<InputPort, CompletionMatch>,
    pub retire_out: Port<OutputPort, RequestId>,
    pulses: PulseBuffer,
    created: u64,
    retired: u64,
    failed: u64,
    stale: u64,
}

module!(RequestPacketManager, PacketFsm, PipelineConfig);

/// Each request buffer gets its own 4 GiB window above `buffer_base`.
const BUFFER_WINDOW_SHIFT: u32 = 32;

impl RequestPacketManager {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        let mut me = RequestPacketManager {
            base: ModuleBase::default(),
            table: IdMap::new(config.request_id_bits),
            cmd_in: Port::new(),
            packet_out: Port::new(),
            match_in: Port::new(),
            retire_out: Port::new(),
            pulses: PulseBuffer::new(),
            created: 0,
            retired: 0,
            failed: 0,
            stale: 0,
        };
        me.init_conf(config);
        me
    }

    pub fn live_packets(&self) -> usize {
        self.table.live()
    }

    pub fn packets_created(&self) -> u64 {
        self.created
    }

    pub fn packets_retired(&self) -> u64 {
        self.retired
    }

    /// Retired packets whose final status was `Error`.
    pub fn packets_failed(&self) -> u64 {
        self.failed
    }

    pub fn stale_matches(&self) -> u64 {
        self.stale
    }

    /// Status of a live packet.  A retired packet's slot is freed for reuse, so this turns
    /// `None` once the final status has been reported through `PacketRetired`.
    pub fn status_of(&self, request_id: RequestId) -> Option<RequestStatus> {
        self.table.get(request_id).map(|slot| slot.status)
    }

    fn build_packet(&self, accepted: &AcceptedCommand) -> RequestPacket {
        let command = accepted.command;
        let handle = self
            .conf()
            .buffer_base
            .wrapping_add((accepted.request_id as u64) << BUFFER_WINDOW_SHIFT);
        RequestPacket {
            request_id: accepted.request_id,
            kind: command.kind,
            status: RequestStatus::Pending,
            address: command.address,
            buffer: BufferDescriptor {
                handle,
                length: command.length,
                pattern: command.pattern,
            },
            cancel: false,
            stack_location: 0,
        }
    }

    fn stall(&mut self, reason: StallReason) {
        self.pulses.push(Pulse::Stall {
            stage: StageId::PacketManager,
            reason,
        });
    }

    fn step(&mut self, current: PacketFsm) -> PacketFsm {
        match current {
            PacketFsm::Idle => {
                if self.cmd_in.is_empty() {
                    return PacketFsm::Idle;
                }
                if self.table.live() >= self.conf().max_inflight {
                    self.stall(StallReason::NoPacketSlot);
                    return PacketFsm::Idle;
                }
                match self.cmd_in.get() {
                    Some(accepted) => PacketFsm::Allocate(accepted),
                    None => PacketFsm::Idle,
                }
            }
            PacketFsm::Allocate(accepted) => {
                let slot = PacketSlot {
                    kind: accepted.command.kind,
                    status: RequestStatus::Pending,
                };
                match self.table.insert(accepted.request_id, slot) {
                    Ok(()) => PacketFsm::Build(accepted),
                    Err(IdMapError::Occupied(id)) => {
                        // never hand out a slot whose previous packet is still live
                        warn!("request id {} still live, holding allocation", id);
                        self.stall(StallReason::RequestIdBusy);
                        PacketFsm::Allocate(accepted)
                    }
                    Err(err) => {
                        warn!("cannot allocate packet: {}", err);
                        self.pulses.push(Pulse::InvariantViolation {
                            stage: StageId::PacketManager,
                            what: "request id outside id space",
                        });
                        PacketFsm::Allocate(accepted)
                    }
                }
            }
            PacketFsm::Build(accepted) => {
                let packet = self.build_packet(&accepted);
                self.created += 1;
                self.pulses.push(Pulse::PacketCreated {
                    request_id: packet.request_id,
                });
                PacketFsm::Queue(packet)
            }
            PacketFsm::Queue(packet) | PacketFsm::Wait(packet) => {
                let mut sent = packet.descend();
                sent.status = RequestStatus::InFlight;
                if !self.packet_out.put(&sent) {
                    self.stall(StallReason::Backpressure);
                    return PacketFsm::Wait(packet);
                }
                if let Some(slot) = self.table.get_mut(packet.request_id) {
                    slot.status = RequestStatus::InFlight;
                }
                debug!("packet {} queued for translation", packet.request_id);
                PacketFsm::Idle
            }
        }
    }

    /// Completion path, independent of the build FSM.  Retires at most one packet per cycle.
    fn retire_one(&mut self) {
        let Some(matched) = self.match_in.peek() else {
            return;
        };
        if self.retire_out.blocked() {
            return;
        }
        self.match_in.get();

        let in_flight = self
            .table
            .get(matched.request_id)
            .is_some_and(|slot| slot.status == RequestStatus::InFlight);
        if !in_flight {
            warn!(
                "completion match for request {} with no live packet",
                matched.request_id
            );
            self.stale += 1;
            self.pulses.push(Pulse::StaleMatch {
                request_id: matched.request_id,
            });
            return;
        }

        if let Some(slot) = self.table.get_mut(matched.request_id) {
            slot.status = matched.status;
        }
        let Some(slot) = self.table.remove(matched.request_id) else {
            return;
        };
        self.retired += 1;
        if slot.status == RequestStatus::Error {
            self.failed += 1;
        }
        let sent = self.retire_out.put(&matched.request_id);
        debug_assert!(sent);
        debug!(
            "packet {} ({}) retired with {:?}",
            matched.request_id,
            slot.kind.short(),
            slot.status
        );
        self.pulses.push(Pulse::PacketRetired {
            request_id: matched.request_id,
            status: slot.status,
        });
    }
}

impl ModuleBehaviors for RequestPacketManager {
    fn tick_one(&mut self) {
        self.retire_one();
        let next = self.step(*self.state());
        self.stage_next(next);
    }

    fn commit(&mut self) {
        self.base.commit();
    }

    fn reset(&mut self) {
        self.base.state = PacketFsm::Idle;
        self.base.next = None;
        self.table.clear();
        self.pulses.clear();
        self.created = 0;
        self.retired = 0;
        self.failed = 0;
        self.stale = 0;
    }
}

impl PulseSource for RequestPacketManager {
    fn drain_pulses(&mut self, out: &mut Vec<Pulse>) {
        out.extend(self.pulses.drain(..));
    }
}
