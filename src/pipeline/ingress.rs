use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, error};

use crate::base::behavior::*;
use crate::base::module::{module, IsModule, ModuleBase};
use crate::base::port::{InputPort, OutputPort, Port};
use crate::builtin::id_map::{IdAllocator, IdMap};
use crate::pipeline::types::*;
use crate::sim::config::PipelineConfig;

#[derive(Debug, Clone, Default)]
pub struct IngressState {
    next_id: IdAllocator,
    accepted: u64,
}

/// Command Ingress: takes at most one command per cycle off the command source and gives it a
/// request id.
///
/// A request id is handed out only once the packet that last used it has retired; retirements
/// come back from the request-packet manager as credits on `retire_in`.
pub struct CommandIngress {
    base: ModuleBase<IngressState, PipelineConfig>,
    source: VecDeque<Command>,
    live: IdMap<()>,
    pub cmd_out: Port<OutputPort, AcceptedCommand>,
    pub retire_in: Port<InputPort, RequestId>,
    pulses: PulseBuffer,
}

module!(CommandIngress, IngressState, PipelineConfig);

impl CommandIngress {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        let mut me = CommandIngress {
            base: ModuleBase::with_state(IngressState {
                next_id: IdAllocator::new(config.request_id_bits),
                accepted: 0,
            }),
            source: VecDeque::new(),
            live: IdMap::new(config.request_id_bits),
            cmd_out: Port::new(),
            retire_in: Port::new(),
            pulses: PulseBuffer::new(),
        };
        me.init_conf(config);
        me
    }

    /// Append already-validated commands to the source stream.
    pub fn feed<I: IntoIterator<Item = Command>>(&mut self, commands: I) {
        self.source.extend(commands);
    }

    pub fn pending(&self) -> usize {
        self.source.len()
    }

    pub fn accepted(&self) -> u64 {
        self.state().accepted
    }

    pub fn live_requests(&self) -> usize {
        self.live.live()
    }

    fn admission(&self, request_id: RequestId) -> Result<(), StallReason> {
        if self.cmd_out.blocked() {
            return Err(StallReason::Backpressure);
        }
        if self.live.live() >= self.conf().max_inflight {
            return Err(StallReason::InflightLimit);
        }
        if self.live.is_mapped(request_id) {
            return Err(StallReason::RequestIdBusy);
        }
        Ok(())
    }

    fn collect_credits(&mut self) {
        while let Some(request_id) = self.retire_in.get() {
            if self.live.remove(request_id).is_none() {
                error!("retire credit for request {} which is not live", request_id);
                self.pulses.push(Pulse::InvariantViolation {
                    stage: StageId::Ingress,
                    what: "retire credit for idle request id",
                });
            }
        }
    }
}

impl ModuleBehaviors for CommandIngress {
    fn tick_one(&mut self) {
        self.collect_credits();

        let mut next = self.state().clone();
        if let Some(command) = self.source.front().copied() {
            match self.admission(next.next_id.peek()) {
                Ok(()) => {
                    let request_id = next.next_id.advance();
                    let accepted = AcceptedCommand {
                        request_id,
                        command,
                    };
                    // admission checked the port and the id, neither can refuse here
                    let sent = self.cmd_out.put(&accepted);
                    debug_assert!(sent);
                    let fresh = self.live.insert(request_id, ()).is_ok();
                    debug_assert!(fresh);
                    self.source.pop_front();
                    next.accepted += 1;
                    debug!(
                        "ingress: request {} {} addr={:#x} len={}",
                        request_id,
                        command.kind.short(),
                        command.address,
                        command.length
                    );
                    self.pulses.push(Pulse::CommandAccepted {
                        request_id,
                        kind: command.kind,
                        bytes: command.length,
                    });
                }
                Err(reason) => self.pulses.push(Pulse::Stall {
                    stage: StageId::Ingress,
                    reason,
                }),
            }
        }
        self.stage_next(next);
    }

    fn commit(&mut self) {
        self.base.commit();
    }

    fn reset(&mut self) {
        self.base.state = IngressState {
            next_id: IdAllocator::new(self.conf().request_id_bits),
            accepted: 0,
        };
        self.base.next = None;
        self.source.clear();
        self.live.clear();
        self.pulses.clear();
    }
}

impl PulseSource for CommandIngress {
    fn drain_pulses(&mut self, out: &mut Vec<Pulse>) {
        out.extend(self.pulses.drain(..));
    }
}
