//! Pinned native memory and per-buffer diagnostic logs.

use smallvec::SmallVec;

/// One diagnostic marker: a label and the clock time (µs) it was stamped at.
pub type LogEntry = (&'static str, u64);

/// Ordered (label, time) markers carried with a buffer through the pipeline.
///
/// Inline storage covers a full chain without touching the allocator.
#[derive(Debug, Clone, Default)]
pub struct BufferLog {
    entries: SmallVec<[LogEntry; 12]>,
}

impl BufferLog {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add(&mut self, label: &'static str, time_us: u64) {
        self.entries.push((label, time_us));
    }

    #[inline]
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Replaces this log's contents with the source's entries.
    pub fn merge(&mut self, source: &BufferLog) {
        self.entries.clear();
        self.entries.extend_from_slice(&source.entries);
    }

    /// Time of the first marker, if any.
    pub fn first_time(&self) -> Option<u64> {
        self.entries.first().map(|&(_, t)| t)
    }

    /// Time between the first marker and the last one.
    pub fn spent_time(&self) -> u64 {
        match (self.entries.first(), self.entries.last()) {
            (Some(&(_, first)), Some(&(_, last))) => last.saturating_sub(first),
            _ => 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }
}

/// A fixed-length typed block whose backing memory never moves.
///
/// The storage is a boxed slice that is never resized, so `as_ptr()` stays
/// valid for the block's whole lifetime and may be handed to native code
/// while the block is held.
#[derive(Debug)]
pub struct NativeMemoryBlock<T: Copy + Default> {
    data: Box<[T]>,
    log: BufferLog,
}

impl<T: Copy + Default> NativeMemoryBlock<T> {
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![T::default(); len].into_boxed_slice(),
            log: BufferLog::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.data.as_ptr()
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.data.as_mut_ptr()
    }

    /// Address of the first element, for identity checks and logging.
    #[inline]
    pub fn address(&self) -> usize {
        self.data.as_ptr() as usize
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    #[inline]
    pub fn log(&self) -> &BufferLog {
        &self.log
    }

    #[inline]
    pub fn log_mut(&mut self) -> &mut BufferLog {
        &mut self.log
    }
}
