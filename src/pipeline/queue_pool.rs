use std::sync::{Arc, RwLock};

use log::{error, warn};
use thiserror::Error;

use crate::builtin::id_map::IdMap;
use crate::builtin::queue::BoundedFifo;
use crate::pipeline::types::{DeviceQueueEntry, OpId, RequestId};

/// Where an in-flight operation came from and where it sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpMapping {
    pub request_id: RequestId,
    pub queue: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("no such device queue {0}")]
    BadQueue(usize),
    #[error("device queue {0} is full")]
    QueueFull(usize),
    #[error("operation id {0} is still mapped")]
    OpIdLive(OpId),
    #[error("operation id {0} is not mapped")]
    Unmapped(OpId),
    #[error("operation id {0} already completed this cycle")]
    AlreadyRetiring(OpId),
}

#[derive(Debug, Clone, Copy)]
struct StagedSubmit {
    queue: usize,
    request_id: RequestId,
    entry: DeviceQueueEntry,
}

/// The N device queues and the operation-id map.
///
/// Two stages share the pool: device submission appends, the completion matcher removes.  Both
/// only stage their writes during a cycle; `commit` applies removals, then appends.  Room checks
/// and lookups see the pool as it was at the start of the cycle.
#[derive(Debug)]
pub struct DeviceQueuePool {
    depth: usize,
    queues: Vec<BoundedFifo<DeviceQueueEntry>>,
    op_map: IdMap<OpMapping>,
    occupancy_at_start: Vec<usize>,
    staged_submits: Vec<StagedSubmit>,
    staged_retires: Vec<OpId>,
    submitted: Vec<u64>,
    max_depth: usize,
    out_of_order: u64,
}

pub type SharedPool = Arc<RwLock<DeviceQueuePool>>;

impl DeviceQueuePool {
    pub fn new(num_queues: usize, depth: usize, op_id_bits: u32) -> Self {
        assert!(num_queues > 0, "at least one device queue");
        Self {
            depth,
            queues: (0..num_queues).map(|_| BoundedFifo::new(depth)).collect(),
            op_map: IdMap::new(op_id_bits),
            occupancy_at_start: vec![0; num_queues],
            staged_submits: Vec::new(),
            staged_retires: Vec::new(),
            submitted: vec![0; num_queues],
            max_depth: 0,
            out_of_order: 0,
        }
    }

    pub fn shared(num_queues: usize, depth: usize, op_id_bits: u32) -> SharedPool {
        Arc::new(RwLock::new(Self::new(num_queues, depth, op_id_bits)))
    }

    pub fn num_queues(&self) -> usize {
        self.queues.len()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether queue `q` can take one more entry this cycle.
    pub fn has_room(&self, queue: usize) -> bool {
        let Some(&at_start) = self.occupancy_at_start.get(queue) else {
            return false;
        };
        let staged = self
            .staged_submits
            .iter()
            .filter(|s| s.queue == queue)
            .count();
        at_start + staged < self.depth
    }

    pub fn is_op_live(&self, op_id: OpId) -> bool {
        self.op_map.is_mapped(op_id as u32)
            || self.staged_submits.iter().any(|s| s.entry.op_id == op_id)
    }

    pub fn stage_submit(
        &mut self,
        queue: usize,
        request_id: RequestId,
        entry: DeviceQueueEntry,
    ) -> Result<(), PoolError> {
        if queue >= self.queues.len() {
            return Err(PoolError::BadQueue(queue));
        }
        if !self.has_room(queue) {
            return Err(PoolError::QueueFull(queue));
        }
        if self.is_op_live(entry.op_id) {
            return Err(PoolError::OpIdLive(entry.op_id));
        }
        self.staged_submits.push(StagedSubmit {
            queue,
            request_id,
            entry,
        });
        Ok(())
    }

    /// Mapping of a committed, not yet completing, operation.
    pub fn lookup(&self, op_id: OpId) -> Option<OpMapping> {
        if self.staged_retires.contains(&op_id) {
            return None;
        }
        self.op_map.get(op_id as u32).copied()
    }

    /// Stage the removal of a completed operation, returning where it came from.
    pub fn stage_retire(&mut self, op_id: OpId) -> Result<OpMapping, PoolError> {
        if self.staged_retires.contains(&op_id) {
            return Err(PoolError::AlreadyRetiring(op_id));
        }
        let mapping = self
            .op_map
            .get(op_id as u32)
            .copied()
            .ok_or(PoolError::Unmapped(op_id))?;
        self.staged_retires.push(op_id);
        Ok(mapping)
    }

    pub fn commit(&mut self) {
        for op_id in std::mem::take(&mut self.staged_retires) {
            let Some(mapping) = self.op_map.remove(op_id as u32) else {
                error!("retire of unmapped operation {} reached commit", op_id);
                continue;
            };
            let queue = &mut self.queues[mapping.queue];
            let at_head = queue.front().is_some_and(|e| e.op_id == op_id);
            if queue.remove_first(|e| e.op_id == op_id).is_none() {
                error!(
                    "operation {} mapped to queue {} but not present there",
                    op_id, mapping.queue
                );
            } else if !at_head {
                warn!(
                    "operation {} completed ahead of older entries on queue {}",
                    op_id, mapping.queue
                );
                self.out_of_order += 1;
            }
        }

        for staged in std::mem::take(&mut self.staged_submits) {
            let mapping = OpMapping {
                request_id: staged.request_id,
                queue: staged.queue,
            };
            if let Err(err) = self.op_map.insert(staged.entry.op_id as u32, mapping) {
                error!("dropping submission: {}", err);
                continue;
            }
            if self.queues[staged.queue].try_push(staged.entry).is_err() {
                // room was checked against start-of-cycle occupancy
                error!("device queue {} overflowed at commit", staged.queue);
                self.op_map.remove(staged.entry.op_id as u32);
                continue;
            }
            self.submitted[staged.queue] += 1;
        }

        for (slot, queue) in self.occupancy_at_start.iter_mut().zip(self.queues.iter()) {
            *slot = queue.len();
            self.max_depth = self.max_depth.max(*slot);
        }
    }

    pub fn occupancy(&self, queue: usize) -> usize {
        self.queues.get(queue).map_or(0, BoundedFifo::len)
    }

    pub fn inflight(&self) -> usize {
        self.op_map.live()
    }

    /// Operation ids on queue `q`, oldest first.
    pub fn queue_entries(&self, queue: usize) -> Vec<OpId> {
        self.queues
            .get(queue)
            .map(|q| q.iter().map(|e| e.op_id).collect())
            .unwrap_or_default()
    }

    /// Entries ever placed on each queue.
    pub fn submitted_per_queue(&self) -> &[u64] {
        &self.submitted
    }

    pub fn max_depth_reached(&self) -> usize {
        self.max_depth
    }

    pub fn out_of_order_completions(&self) -> u64 {
        self.out_of_order
    }

    /// Every queued entry has exactly one map entry pointing back at its queue, and nothing else
    /// is mapped.
    pub fn is_consistent(&self) -> bool {
        let queued: usize = self.queues.iter().map(BoundedFifo::len).sum();
        queued == self.op_map.live()
            && self.queues.iter().enumerate().all(|(idx, q)| {
                q.iter().all(|e| {
                    self.op_map
                        .get(e.op_id as u32)
                        .is_some_and(|m| m.queue == idx)
                })
            })
    }

    pub fn reset(&mut self) {
        self.queues.iter_mut().for_each(BoundedFifo::clear);
        self.op_map.clear();
        self.occupancy_at_start.iter_mut().for_each(|o| *o = 0);
        self.staged_submits.clear();
        self.staged_retires.clear();
        self.submitted.iter_mut().for_each(|s| *s = 0);
        self.max_depth = 0;
        self.out_of_order = 0;
    }
}
