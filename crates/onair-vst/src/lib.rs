//! # onair-vst
//!
//! VST 2.4 instrument hosting for the onair engine.
//!
//! - [`abi`]: `#[repr(C)]` descriptor, event and time records plus opcodes
//! - [`AudioMaster`]: the callback surface plugins call into, and the
//!   registry of loaded instances
//! - [`Effect`]: per-plugin lifecycle, block processing and MIDI injection
//!
//! ```ignore
//! use onair_vst::{AudioMaster, EffectOptions, VstBuffer};
//!
//! let host = AudioMaster::new(clock, 48_000.0, 960);
//! let synth = host.add_effect("/plugins/synth.so", EffectOptions::default())?;
//! let mut buffer = VstBuffer::<f32>::new(0, 2, 960);
//! {
//!     let mut effect = synth.lock();
//!     let now = clock.now_us();
//!     effect.process_events(now, &midi_in, Some(&midi_out))?;
//!     effect.process_replacing(now, &mut buffer)?;
//! }
//! host.remove_effect(&synth);
//! ```

pub mod abi;
pub mod buffer;
pub mod effect;
pub mod error;
pub mod events;
pub mod host;
pub mod module;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use abi::{Precision, ProcessLevel};
pub use buffer::{Sample, VstBuffer};
pub use effect::{Effect, EffectOptions, EffectState, PluginInfo};
pub use error::{LoadStage, Result, VstError};
pub use events::{delta_frames, EventList, EventScheduler, MAX_EVENTS_PER_BLOCK};
pub use host::{AudioMaster, EffectHandle, HostTimeBlock, HOST_VERSION};
pub use module::{LibraryModule, PluginModule};
