//! Buffer pool behaviour under the pipeline's usage patterns.

use onair_core::{BufferPool, CancelToken, NativeMemoryBlock, Target};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const BLOCK_SIZE: usize = 960;

struct StereoBlock {
    left: NativeMemoryBlock<f32>,
    right: NativeMemoryBlock<f32>,
}

impl StereoBlock {
    fn new() -> Self {
        Self {
            left: NativeMemoryBlock::new(BLOCK_SIZE),
            right: NativeMemoryBlock::new(BLOCK_SIZE),
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn serves_capacity_without_growth(capacity in 1usize..24) {
        let token = CancelToken::new();
        let pool = BufferPool::new("prop", capacity, || NativeMemoryBlock::<u8>::new(8));

        let held: Vec<_> = (0..capacity)
            .map(|_| pool.wait_receive(&token).unwrap())
            .collect();
        prop_assert_eq!(held.len(), capacity);
        prop_assert_eq!(pool.grown(), 0);
        prop_assert_eq!(pool.idle(), 0);

        let mut addresses: Vec<usize> = held.iter().map(|b| b.address()).collect();
        addresses.sort_unstable();
        addresses.dedup();
        prop_assert_eq!(addresses.len(), capacity);
    }
}

#[test]
fn next_receive_blocks_until_post() {
    let token = CancelToken::new();
    let pool = Arc::new(BufferPool::new("block", 3, || NativeMemoryBlock::<f32>::new(4)));
    let mut held: Vec<_> = (0..3).map(|_| pool.wait_receive(&token).unwrap()).collect();

    let (tx, rx) = crossbeam_channel::bounded(1);
    let waiter_pool = pool.clone();
    let waiter_token = token.clone();
    let waiter = std::thread::spawn(move || {
        let block = waiter_pool.wait_receive(&waiter_token).unwrap();
        tx.send(block.address()).unwrap();
    });

    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    let returned = held.pop().unwrap();
    let addr = returned.address();
    pool.post(returned);

    let received = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(received, addr);
    waiter.join().unwrap();
    assert_eq!(pool.grown(), 0);
}

#[test]
fn stereo_cycles_do_not_grow() {
    let token = CancelToken::new();
    let pool = BufferPool::new("vst", 2, StereoBlock::new);

    for cycle in 0..5 {
        let mut block = pool.receive(&token).unwrap();
        block.left.fill(cycle as f32);
        block.right.fill(-(cycle as f32));
        assert_eq!(block.left.len(), BLOCK_SIZE);
        assert_eq!(block.right.len(), BLOCK_SIZE);
        pool.post(block);
    }

    assert_eq!(pool.allocated(), 2);
    assert_eq!(pool.grown(), 0);
    assert_eq!(pool.idle(), 2);
}

#[test]
fn concurrent_consumers_never_share_a_buffer() {
    let token = CancelToken::new();
    let pool = Arc::new(BufferPool::new("shared", 4, || NativeMemoryBlock::<u32>::new(1)));

    let workers: Vec<_> = (0..4u32)
        .map(|id| {
            let pool = pool.clone();
            let token = token.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let mut block = pool.wait_receive(&token).unwrap();
                    block.as_mut_slice()[0] = id;
                    std::thread::yield_now();
                    assert_eq!(block.as_slice()[0], id);
                    pool.post(block);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(pool.idle(), 4);
}
