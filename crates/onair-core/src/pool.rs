//! Pre-allocated buffer pools that double as pipeline queues.
//!
//! A pool owns the idle side of a set of buffers. A consumer takes a buffer
//! out (it is then "busy" and owned by that consumer alone) and gives it
//! back with [`Target::post`]. Once linked, posted buffers are forwarded to
//! the downstream input instead of going idle, which is how the first stage
//! of a chain is fed.

use crate::cancel::CancelToken;
use crate::{Error, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Something a stage can take work items from.
pub trait Source<T>: Send + Sync {
    /// Blocks until an item is available or the token is cancelled.
    fn take(&self, token: &CancelToken) -> Result<T>;
}

/// Something a stage can hand items to. Posting never blocks.
pub trait Target<T>: Send + Sync {
    fn post(&self, item: T);
}

type Allocator<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Fixed-capacity set of reusable buffers of one type.
pub struct BufferPool<T> {
    name: String,
    capacity: usize,
    idle_tx: Sender<T>,
    idle_rx: Receiver<T>,
    allocate: Allocator<T>,
    allocated: AtomicUsize,
    disposed: AtomicBool,
    link: RwLock<Option<Arc<dyn Target<T>>>>,
}

impl<T: Send + 'static> BufferPool<T> {
    /// Allocates `capacity` buffers up front.
    pub fn new<F>(name: impl Into<String>, capacity: usize, allocate: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let name = name.into();
        let (idle_tx, idle_rx) = crossbeam_channel::unbounded();
        for _ in 0..capacity {
            // Receiver is held by the pool, so this cannot fail.
            let _ = idle_tx.send(allocate());
        }
        info!(pool = %name, capacity, "Buffer pool allocated");

        Self {
            name,
            capacity,
            idle_tx,
            idle_rx,
            allocate: Box::new(allocate),
            allocated: AtomicUsize::new(capacity),
            disposed: AtomicBool::new(false),
            link: RwLock::new(None),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Buffers allocated at construction.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffers allocated in total, including on-demand growth.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Buffers allocated beyond the initial capacity.
    #[inline]
    pub fn grown(&self) -> usize {
        self.allocated().saturating_sub(self.capacity)
    }

    #[inline]
    pub fn idle(&self) -> usize {
        self.idle_rx.len()
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Pops an idle buffer, or allocates a new one when none is idle.
    ///
    /// Growth is logged as a warning: it means consumers are not returning
    /// buffers as fast as they are taken.
    pub fn receive(&self, token: &CancelToken) -> Result<T> {
        self.ensure_live()?;
        match self.idle_rx.try_recv() {
            Ok(buffer) => Ok(buffer),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                token.check()?;
                let total = self.allocated.fetch_add(1, Ordering::AcqRel) + 1;
                warn!(pool = %self.name, allocated = total, "Pool exhausted, growing");
                Ok((self.allocate)())
            }
        }
    }

    /// Pops an idle buffer, blocking until one is posted or the token is
    /// cancelled. Never grows the pool.
    pub fn wait_receive(&self, token: &CancelToken) -> Result<T> {
        self.ensure_live()?;
        token.check()?;
        if let Ok(buffer) = self.idle_rx.try_recv() {
            return Ok(buffer);
        }
        crossbeam_channel::select! {
            recv(self.idle_rx) -> buffer => buffer.map_err(|_| Error::Disposed(self.name.clone())),
            recv(token.signal()) -> _ => Err(Error::Cancelled),
        }
    }

    /// Forwards every later-posted buffer to `target`. Buffers idle right
    /// now are handed over immediately.
    pub fn link_to(&self, target: Arc<dyn Target<T>>) {
        let mut link = self.link.write();
        let mut handed = 0usize;
        while let Ok(buffer) = self.idle_rx.try_recv() {
            target.post(buffer);
            handed += 1;
        }
        *link = Some(target);
        debug!(pool = %self.name, handed, "Pool linked downstream");
    }

    /// Drops every idle buffer and refuses further receives. Buffers still
    /// held by consumers are dropped when they are posted back.
    pub fn dispose(&self) {
        // Flag and drain under the write lock so no post lands in between.
        let mut link = self.link.write();
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        link.take();
        let mut dropped = 0usize;
        while self.idle_rx.try_recv().is_ok() {
            dropped += 1;
        }
        drop(link);
        info!(
            pool = %self.name,
            dropped,
            allocated = self.allocated(),
            "Buffer pool disposed"
        );
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::Disposed(self.name.clone()))
        } else {
            Ok(())
        }
    }
}

impl<T: Send + 'static> Target<T> for BufferPool<T> {
    fn post(&self, buffer: T) {
        // Held until the buffer is queued, so `link_to` and `dispose` see it.
        let link = self.link.read();
        if self.is_disposed() {
            debug!(pool = %self.name, "Dropping buffer posted after dispose");
            return;
        }
        match link.as_ref() {
            Some(target) => target.post(buffer),
            None => {
                let _ = self.idle_tx.send(buffer);
            }
        }
    }
}

impl<T: Send + 'static> Source<T> for BufferPool<T> {
    fn take(&self, token: &CancelToken) -> Result<T> {
        self.wait_receive(token)
    }
}

impl<T> Drop for BufferPool<T> {
    fn drop(&mut self) {
        debug!(pool = %self.name, "Buffer pool dropped");
    }
}

/// Unbounded FIFO connecting two stages.
pub struct StageQueue<T> {
    name: String,
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T: Send + 'static> StageQueue<T> {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            name: name.into(),
            tx,
            rx,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T: Send + 'static> Target<T> for StageQueue<T> {
    fn post(&self, item: T) {
        let _ = self.tx.send(item);
    }
}

impl<T: Send + 'static> Source<T> for StageQueue<T> {
    fn take(&self, token: &CancelToken) -> Result<T> {
        token.check()?;
        if let Ok(item) = self.rx.try_recv() {
            return Ok(item);
        }
        crossbeam_channel::select! {
            recv(self.rx) -> item => item.map_err(|_| Error::Cancelled),
            recv(token.signal()) -> _ => Err(Error::Cancelled),
        }
    }
}

/// Drops whatever is posted to it.
pub struct Discard;

impl<T: Send> Target<T> for Discard {
    fn post(&self, _item: T) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::NativeMemoryBlock;
    use std::time::Duration;

    fn block_pool(capacity: usize, len: usize) -> BufferPool<NativeMemoryBlock<f32>> {
        BufferPool::new("test", capacity, move || NativeMemoryBlock::new(len))
    }

    #[test]
    fn test_round_trip_keeps_address() {
        let token = CancelToken::new();
        let pool = block_pool(1, 16);

        let block = pool.receive(&token).unwrap();
        let addr = block.address();
        pool.post(block);

        let again = pool.receive(&token).unwrap();
        assert_eq!(again.address(), addr);
        assert_eq!(pool.grown(), 0);
    }

    #[test]
    fn test_receive_grows_when_empty() {
        let token = CancelToken::new();
        let pool = block_pool(1, 4);
        let _a = pool.receive(&token).unwrap();
        let _b = pool.receive(&token).unwrap();
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.grown(), 1);
    }

    #[test]
    fn test_receive_cancelled_when_empty() {
        let token = CancelToken::new();
        let pool = block_pool(1, 4);
        let _a = pool.receive(&token).unwrap();
        token.cancel();
        assert!(pool.receive(&token).unwrap_err().is_cancelled());
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn test_receive_serves_idle_even_when_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let pool = block_pool(1, 4);
        assert!(pool.receive(&token).is_ok());
    }

    #[test]
    fn test_wait_receive_cancelled() {
        let token = CancelToken::new();
        let pool = block_pool(0, 4);
        let canceller = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            canceller.cancel();
        });
        assert!(pool.wait_receive(&token).unwrap_err().is_cancelled());
    }

    #[test]
    fn test_dispose_refuses_and_drops() {
        let token = CancelToken::new();
        let pool = block_pool(2, 4);
        let held = pool.receive(&token).unwrap();
        pool.dispose();

        assert_eq!(pool.idle(), 0);
        assert!(matches!(pool.receive(&token), Err(Error::Disposed(_))));
        pool.post(held);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_link_forwards_idle_and_posted() {
        let token = CancelToken::new();
        let pool = block_pool(2, 4);
        let queue = Arc::new(StageQueue::new("next"));
        let held = pool.receive(&token).unwrap();

        pool.link_to(queue.clone());
        assert_eq!(queue.len(), 1);
        assert_eq!(pool.idle(), 0);

        pool.post(held);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_link_during_posts_strands_nothing() {
        for _ in 0..20 {
            let pool = BufferPool::new("race", 0, || 0u32);
            let queue = Arc::new(StageQueue::new("next"));
            std::thread::scope(|s| {
                for t in 0..4u32 {
                    let pool = &pool;
                    s.spawn(move || {
                        for i in 0..250 {
                            pool.post(t * 1_000 + i);
                        }
                    });
                }
                pool.link_to(queue.clone());
            });
            assert_eq!(pool.idle(), 0);
            assert_eq!(queue.len(), 1_000);
        }
    }

    #[test]
    fn test_dispose_during_posts_leaves_nothing_idle() {
        for _ in 0..20 {
            let pool = BufferPool::new("race", 0, || 0u32);
            std::thread::scope(|s| {
                for t in 0..4u32 {
                    let pool = &pool;
                    s.spawn(move || {
                        for i in 0..250 {
                            pool.post(t * 1_000 + i);
                        }
                    });
                }
                pool.dispose();
            });
            assert_eq!(pool.idle(), 0);
        }
    }

    #[test]
    fn test_stage_queue_is_fifo() {
        let token = CancelToken::new();
        let queue = StageQueue::new("q");
        for i in 0..5 {
            queue.post(i);
        }
        let drained: Vec<i32> = (0..5).map(|_| queue.take(&token).unwrap()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }
}
