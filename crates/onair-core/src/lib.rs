//! # onair-core
//!
//! Real-time pipeline kernel for the onair engine.
//!
//! - [`MonotonicClock`] and [`IntervalPacer`] keep stages on a wall-clock cadence
//! - [`NativeMemoryBlock`] gives buffers a stable address for native calls
//! - [`BufferPool`] recycles buffers and doubles as a stage queue
//! - [`Stage`], [`Chain`] and [`Orchestrator`] run the dataflow with fail-fast cancellation
//!
//! ```ignore
//! use onair_core::*;
//! use std::sync::Arc;
//!
//! let pool = Arc::new(BufferPool::new("pcm", 2, || NativeMemoryBlock::<f32>::new(1920)));
//! let out = Arc::new(StageQueue::new("encoded"));
//! let chain = Chain::new("audio").stage(
//!     Stage::transform("gain", pool.clone(), pool.clone(), out.clone(), |buf, _| {
//!         buf.as_mut_slice().iter_mut().for_each(|s| *s *= 0.5);
//!         Ok(buf.len())
//!     })
//!     .paced(IntervalPacer::from_micros(20_000)),
//! );
//! let token = CancelToken::new();
//! let run = Orchestrator::new(MonotonicClock::new()).chain(chain).spawn(&token)?;
//! let report = run.stop();
//! ```

pub mod cancel;
pub mod clock;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod pacer;
pub mod pool;
pub mod stage;

pub use cancel::CancelToken;
pub use clock::MonotonicClock;
pub use error::{Error, PipelineFault, Result};
pub use memory::{BufferLog, LogEntry, NativeMemoryBlock};
pub use orchestrator::{Chain, Orchestrator, RunHandle, RunReport};
pub use pacer::{IntervalPacer, Pace};
pub use pool::{BufferPool, Discard, Source, StageQueue, Target};
pub use stage::{Stage, StageContext};
