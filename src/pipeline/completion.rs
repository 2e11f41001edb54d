use std::sync::Arc;

use log::{debug, warn};

use crate::base::behavior::*;
use crate::base::module::{module, IsModule, ModuleBase};
use crate::base::port::{InputPort, OutputPort, Port};
use crate::pipeline::queue_pool::SharedPool;
use crate::pipeline::types::*;
use crate::sim::config::PipelineConfig;

#[derive(Debug, Clone, Copy, Default)]
pub struct MatcherState {
    pub matched: u64,
    pub protocol_errors: u64,
}

/// Completion Matcher: maps device completions back to requests through the operation-id map and
/// frees the queue slot they held.
pub struct CompletionMatcher {
    base: ModuleBase<MatcherState, PipelineConfig>,
    pool: SharedPool,
    pub completion_in: Port<InputPort, DeviceCompletion>,
    pub match_out: Port<OutputPort, CompletionMatch>,
    pulses: PulseBuffer,
}

module!(CompletionMatcher, MatcherState, PipelineConfig);

impl CompletionMatcher {
    pub fn new(config: Arc<PipelineConfig>, pool: SharedPool) -> Self {
        let mut me = CompletionMatcher {
            base: ModuleBase::default(),
            pool,
            completion_in: Port::new(),
            match_out: Port::new(),
            pulses: PulseBuffer::new(),
        };
        me.init_conf(config);
        me
    }

    pub fn matched(&self) -> u64 {
        self.state().matched
    }

    /// Completions whose operation id was not mapped.
    pub fn protocol_errors(&self) -> u64 {
        self.state().protocol_errors
    }
}

impl ModuleBehaviors for CompletionMatcher {
    fn tick_one(&mut self) {
        let mut next = *self.state();
        for _ in 0..self.conf().completions_per_cycle {
            if self.completion_in.peek().is_none() {
                break;
            }
            if self.match_out.blocked() {
                // leave the completion in the device FIFO until the manager drains
                self.pulses.push(Pulse::Stall {
                    stage: StageId::Completion,
                    reason: StallReason::Backpressure,
                });
                break;
            }
            let Some(completion) = self.completion_in.get() else {
                break;
            };

            let retired = self
                .pool
                .write()
                .expect("rw lock poisoned")
                .stage_retire(completion.op_id);
            match retired {
                Ok(mapping) => {
                    let matched = CompletionMatch {
                        request_id: mapping.request_id,
                        status: RequestStatus::from_device(completion.status),
                    };
                    let sent = self.match_out.put(&matched);
                    debug_assert!(sent);
                    next.matched += 1;
                    debug!(
                        "op {} completed on queue {} for request {} (status {:#x})",
                        completion.op_id, mapping.queue, mapping.request_id, completion.status
                    );
                    self.pulses.push(Pulse::CompletionMatched {
                        request_id: mapping.request_id,
                        op_id: completion.op_id,
                        queue: mapping.queue,
                        status: completion.status,
                    });
                }
                Err(err) => {
                    warn!("protocol error: {}", err);
                    next.protocol_errors += 1;
                    self.pulses.push(Pulse::UnmappedCompletion {
                        op_id: completion.op_id,
                    });
                }
            }
        }
        self.stage_next(next);
    }

    fn commit(&mut self) {
        self.base.commit();
    }

    fn reset(&mut self) {
        self.base.state = MatcherState::default();
        self.base.next = None;
        self.pulses.clear();
    }
}

impl PulseSource for CompletionMatcher {
    fn drain_pulses(&mut self, out: &mut Vec<Pulse>) {
        out.extend(self.pulses.drain(..));
    }
}
