use crate::pipeline::layout::DeviceCommand;
use crate::pipeline::queue_pool::{DeviceQueuePool, OpMapping, PoolError};
use crate::pipeline::types::*;

fn entry(op_id: OpId) -> DeviceQueueEntry {
    DeviceQueueEntry::encode(&DeviceCommand {
        kind: OpKind::Write,
        op_id,
        namespace: 1,
        prp1: 0,
        prp2: 0,
        slba: op_id as u64 * 8,
        blocks: 8,
    })
    .unwrap()
}

#[test]
fn room_check_counts_staged_submits() {
    let mut pool = DeviceQueuePool::new(2, 2, 16);
    assert!(pool.has_room(0));
    pool.stage_submit(0, 10, entry(0)).unwrap();
    pool.stage_submit(0, 11, entry(1)).unwrap();
    assert!(!pool.has_room(0));
    assert_eq!(Err(PoolError::QueueFull(0)), pool.stage_submit(0, 12, entry(2)));
    assert!(pool.has_room(1));
    assert_eq!(Err(PoolError::BadQueue(2)), pool.stage_submit(2, 12, entry(2)));

    // nothing is visible before commit
    assert_eq!(0, pool.occupancy(0));
    assert_eq!(None, pool.lookup(0));
    pool.commit();
    assert_eq!(2, pool.occupancy(0));
    assert_eq!(
        Some(OpMapping {
            request_id: 11,
            queue: 0
        }),
        pool.lookup(1)
    );
    assert_eq!(2, pool.max_depth_reached());
    assert!(pool.is_consistent());
}

#[test]
fn live_op_id_cannot_be_resubmitted() {
    let mut pool = DeviceQueuePool::new(2, 2, 16);
    pool.stage_submit(0, 1, entry(7)).unwrap();
    assert!(pool.is_op_live(7));
    assert_eq!(Err(PoolError::OpIdLive(7)), pool.stage_submit(1, 2, entry(7)));
    pool.commit();
    assert_eq!(Err(PoolError::OpIdLive(7)), pool.stage_submit(1, 2, entry(7)));
}

#[test]
fn retire_frees_slot_only_after_commit() {
    let mut pool = DeviceQueuePool::new(1, 1, 16);
    pool.stage_submit(0, 4, entry(0)).unwrap();
    pool.commit();
    assert!(!pool.has_room(0));

    let mapping = pool.stage_retire(0).unwrap();
    assert_eq!(4, mapping.request_id);
    assert_eq!(Err(PoolError::AlreadyRetiring(0)), pool.stage_retire(0));
    assert_eq!(None, pool.lookup(0));
    assert!(!pool.has_room(0));

    pool.commit();
    assert!(pool.has_room(0));
    assert_eq!(0, pool.inflight());
    assert!(!pool.is_op_live(0));
}

#[test]
fn unmapped_retire_changes_nothing() {
    let mut pool = DeviceQueuePool::new(2, 2, 16);
    pool.stage_submit(1, 3, entry(5)).unwrap();
    pool.commit();
    assert_eq!(Err(PoolError::Unmapped(99)), pool.stage_retire(99));
    pool.commit();
    assert_eq!(1, pool.occupancy(1));
    assert_eq!(1, pool.inflight());
}

#[test]
fn out_of_order_removal_keeps_queue_order() {
    let mut pool = DeviceQueuePool::new(1, 4, 16);
    for op in 0..3 {
        pool.stage_submit(0, op as RequestId, entry(op)).unwrap();
    }
    pool.commit();
    assert_eq!(vec![0, 1, 2], pool.queue_entries(0));

    pool.stage_retire(1).unwrap();
    pool.commit();
    assert_eq!(vec![0, 2], pool.queue_entries(0));
    assert_eq!(1, pool.out_of_order_completions());

    pool.stage_retire(0).unwrap();
    pool.commit();
    assert_eq!(1, pool.out_of_order_completions());
    assert!(pool.is_consistent());
}

#[test]
fn retire_and_submit_in_one_cycle() {
    let mut pool = DeviceQueuePool::new(1, 1, 16);
    pool.stage_submit(0, 0, entry(0)).unwrap();
    pool.commit();

    // the slot being freed this cycle is not yet available
    pool.stage_retire(0).unwrap();
    assert!(!pool.has_room(0));
    pool.commit();
    pool.stage_submit(0, 1, entry(1)).unwrap();
    pool.commit();
    assert_eq!(vec![1], pool.queue_entries(0));
    assert_eq!(&[2], pool.submitted_per_queue());
}
