//! The engine runner: builds the plugin host, pools, pacers and chains from
//! an [`EngineConfig`] and drives them until stopped.
//!
//! Stream mode runs two chains:
//!
//! ```text
//! audio: [vst pool] -> vst -> [pcm] -> audio-encode -> [encoded] -> audio-egress
//! video: [canvas pool] -> render -> [frames] -> video-encode -> [encoded] -> video-egress
//! ```
//!
//! Local mode runs only `vst -> [pcm] -> record` into a WAV file.

use crate::config::{EngineConfig, Mode};
use crate::{Error, Result};
use onair_core::{
    BufferPool, CancelToken, Chain, IntervalPacer, MonotonicClock, Orchestrator, RunHandle,
    RunReport, Source, Stage, StageQueue, Target,
};
use onair_media::{
    send_units, Canvas, EncodedBuffer, Egress, Encoder, FileEgress, FrameRenderer, MediaType,
    PcmBuffer, RawPcmEncoder, RawVideoEncoder, ToPcm, VideoFrame, WavRecorder,
};
use onair_midi::{midi_channel, MidiOutput, MidiReceiver, MidiSender, NoteTracker};
use onair_vst::{
    AudioMaster, EffectHandle, EffectOptions, LibraryModule, PluginModule, Precision, Sample,
    VstBuffer,
};
use std::sync::Arc;
use tracing::{error, info, warn};

type ModuleFactory = Box<dyn Fn() -> Result<Box<dyn PluginModule>> + Send + Sync>;
type AudioEncoderFactory = Box<dyn Fn() -> Box<dyn Encoder<PcmBuffer>> + Send + Sync>;
type VideoEncoderFactory = Box<dyn Fn() -> Box<dyn Encoder<VideoFrame>> + Send + Sync>;

/// Pools are disposed only after every stage using them has exited.
trait Disposable: Send + Sync {
    fn dispose(&self);
}

impl<T: Send + 'static> Disposable for BufferPool<T> {
    fn dispose(&self) {
        BufferPool::dispose(self);
    }
}

/// Configures the collaborators an [`OnAirEngine`] runs with.
///
/// Anything not supplied falls back to the config: the plugin is loaded
/// from `effect_path`, the raw encoders are used, and stream output goes to
/// a [`FileEgress`] at `egress_path`.
pub struct OnAirEngineBuilder {
    config: EngineConfig,
    module_factory: Option<ModuleFactory>,
    audio_encoder: Option<AudioEncoderFactory>,
    video_encoder: Option<VideoEncoderFactory>,
    egress: Option<Arc<dyn Egress>>,
    renderer: FrameRenderer,
}

impl OnAirEngineBuilder {
    /// Supplies the plugin module instead of loading `effect_path`.
    pub fn plugin_module<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn PluginModule> + Send + Sync + 'static,
    {
        self.module_factory = Some(Box::new(move || Ok(factory())));
        self
    }

    pub fn audio_encoder<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Encoder<PcmBuffer>> + Send + Sync + 'static,
    {
        self.audio_encoder = Some(Box::new(factory));
        self
    }

    pub fn video_encoder<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Encoder<VideoFrame>> + Send + Sync + 'static,
    {
        self.video_encoder = Some(Box::new(factory));
        self
    }

    pub fn egress(mut self, egress: Arc<dyn Egress>) -> Self {
        self.egress = Some(egress);
        self
    }

    pub fn renderer(mut self, renderer: FrameRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn build(self) -> Result<OnAirEngine> {
        self.config.validate()?;
        let (midi_tx, midi_rx) = midi_channel();
        Ok(OnAirEngine {
            config: self.config,
            clock: MonotonicClock::new(),
            midi_tx,
            midi_rx,
            module_factory: self.module_factory,
            audio_encoder: self.audio_encoder,
            video_encoder: self.video_encoder,
            egress: self.egress,
            renderer: self.renderer,
            running: None,
        })
    }
}

struct Running {
    run: RunHandle,
    host: AudioMaster,
    effect: EffectHandle,
    pools: Vec<Arc<dyn Disposable>>,
    egress: Option<Arc<dyn Egress>>,
}

/// Shared inputs for building the chains of one run.
struct Wiring {
    effect: EffectHandle,
    midi_in: MidiReceiver,
    /// Consumed events, for the renderer. `None` in local mode.
    midi_out: Option<MidiSender>,
    pcm_pool: Arc<BufferPool<PcmBuffer>>,
    pcm_queue: Arc<StageQueue<PcmBuffer>>,
}

pub struct OnAirEngine {
    config: EngineConfig,
    clock: MonotonicClock,
    midi_tx: MidiSender,
    midi_rx: MidiReceiver,
    module_factory: Option<ModuleFactory>,
    audio_encoder: Option<AudioEncoderFactory>,
    video_encoder: Option<VideoEncoderFactory>,
    egress: Option<Arc<dyn Egress>>,
    renderer: FrameRenderer,
    running: Option<Running>,
}

impl OnAirEngine {
    pub fn builder(config: EngineConfig) -> OnAirEngineBuilder {
        OnAirEngineBuilder {
            config,
            module_factory: None,
            audio_encoder: None,
            video_encoder: None,
            egress: None,
            renderer: FrameRenderer::default(),
        }
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn clock(&self) -> MonotonicClock {
        self.clock
    }

    /// Where MIDI input goes. Events should be stamped with [`Self::clock`].
    pub fn midi_sender(&self) -> MidiSender {
        self.midi_tx.clone()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// True once a running pipeline has wound down on its own (after a
    /// fault in every chain).
    pub fn has_finished(&self) -> bool {
        self.running.as_ref().is_some_and(|r| r.run.is_finished())
    }

    /// The loaded plugin while running.
    pub fn effect(&self) -> Option<EffectHandle> {
        self.running.as_ref().map(|r| r.effect.clone())
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            warn!("Engine already started");
            return Err(Error::AlreadyStarted);
        }
        let config = &self.config;
        let block_size = config.block_size();

        let host = AudioMaster::new(self.clock, config.sampling_rate as f64, block_size);
        let module = match &self.module_factory {
            Some(factory) => factory()?,
            None => {
                let path = config.effect_path.as_ref().ok_or_else(|| {
                    onair_core::Error::InvalidConfig("effect_path is required".into())
                })?;
                Box::new(LibraryModule::open(path)?) as Box<dyn PluginModule>
            }
        };
        let options = EffectOptions {
            precision: config.precision.into(),
            require_instrument: config.require_instrument,
        };
        let effect = host.add_effect_module(module, options)?;
        let outputs = effect.lock().info().num_outputs;
        if outputs <= 0 {
            host.remove_effect(&effect);
            return Err(onair_core::Error::PluginProtocol(format!(
                "{} has no output channels",
                effect.label()
            ))
            .into());
        }

        let mut pools: Vec<Arc<dyn Disposable>> = Vec::new();
        let pcm_pool = Arc::new(BufferPool::new("pcm", config.buffer_count, {
            let (channels, frames) = (config.channels, block_size);
            move || PcmBuffer::new(channels, frames)
        }));
        pools.push(pcm_pool.clone());

        let (midi_out, midi_observed) = match config.mode {
            Mode::Stream => {
                let (tx, rx) = midi_channel();
                (Some(tx), Some(rx))
            }
            Mode::Local => (None, None),
        };
        let wiring = Wiring {
            effect: effect.clone(),
            midi_in: self.midi_rx.clone(),
            midi_out,
            pcm_pool,
            pcm_queue: Arc::new(StageQueue::new("pcm")),
        };

        let vst_stage = match options.precision {
            Precision::Single => self.vst_stage::<f32>(&wiring, &mut pools),
            Precision::Double => self.vst_stage::<f64>(&wiring, &mut pools),
        };
        let mut audio = Chain::new("audio").stage(vst_stage);

        let mut orchestrator = Orchestrator::new(self.clock).link_chains(config.link_chains);
        let egress = match config.mode {
            Mode::Local => {
                audio.push(self.record_stage(&wiring)?);
                None
            }
            Mode::Stream => {
                let egress = match &self.egress {
                    Some(egress) => egress.clone(),
                    None => Arc::new(FileEgress::create(&config.egress_path)?) as Arc<dyn Egress>,
                };
                for stage in self.audio_stream_stages(&wiring, &egress, &mut pools) {
                    audio.push(stage);
                }
                if let Some(observed) = midi_observed {
                    orchestrator = orchestrator.chain(self.video_chain(observed, &egress, &mut pools));
                }
                Some(egress)
            }
        };
        orchestrator = orchestrator.chain(audio);

        let run = orchestrator.spawn(&CancelToken::new())?;
        info!(
            mode = ?config.mode,
            plugin = %effect.label(),
            sample_rate = config.sampling_rate,
            block_size,
            "Engine started"
        );
        self.running = Some(Running {
            run,
            host,
            effect,
            pools,
            egress,
        });
        Ok(())
    }

    /// Cancels every chain, waits for the stages, then disposes pools and
    /// unloads the plugin. Returns what the run reported.
    pub fn stop(&mut self) -> Result<RunReport> {
        let Some(running) = self.running.take() else {
            warn!("Engine already stopped");
            return Err(Error::NotRunning);
        };
        let report = running.run.stop();
        for fault in &report.faults {
            error!(%fault, "Pipeline fault");
        }
        for pool in &running.pools {
            pool.dispose();
        }
        running.host.remove_effect(&running.effect);
        if let Some(egress) = &running.egress {
            if let Err(e) = egress.flush() {
                warn!(error = %e, "Egress flush failed");
            }
        }
        info!(stages = report.stages, faults = report.faults.len(), "Engine stopped");
        Ok(report)
    }

    fn vst_stage<S>(&self, wiring: &Wiring, pools: &mut Vec<Arc<dyn Disposable>>) -> Stage
    where
        S: Sample + Into<f64>,
    {
        let block_size = self.config.block_size();
        let (inputs, outputs) = {
            let effect = wiring.effect.lock();
            (effect.info().num_inputs.max(0) as usize, effect.info().num_outputs.max(0) as usize)
        };
        let vst_pool = Arc::new(BufferPool::new("vst", self.config.buffer_count, move || {
            VstBuffer::<S>::new(inputs, outputs, block_size)
        }));
        pools.push(vst_pool.clone());

        let effect = wiring.effect.clone();
        let midi_in = wiring.midi_in.clone();
        let midi_out = wiring.midi_out.clone();
        let pcm_pool = wiring.pcm_pool.clone();

        Stage::transform(
            "vst",
            vst_pool.clone() as Arc<dyn Source<VstBuffer<S>>>,
            vst_pool as Arc<dyn Target<VstBuffer<S>>>,
            wiring.pcm_queue.clone() as Arc<dyn Target<PcmBuffer>>,
            move |buffer: &mut VstBuffer<S>, ctx| {
                let now = ctx.now_us();
                buffer.log_mut().clear();
                buffer.log_mut().add("start", now);
                {
                    let mut effect = effect.lock();
                    effect.process_events(now, &midi_in, midi_out.as_ref().map(|m| m as &dyn MidiOutput))?;
                    effect.process_replacing(now, buffer)?;
                }

                let mut pcm = pcm_pool.receive(ctx.token)?;
                if let Err(e) = buffer.to_pcm(&mut pcm) {
                    pcm_pool.post(pcm);
                    return Err(e.into());
                }
                pcm.log_mut().add("pcm", ctx.now_us());
                Ok(pcm)
            },
        )
        .paced(IntervalPacer::new(self.config.audio_interval()))
    }

    fn audio_stream_stages(
        &self,
        wiring: &Wiring,
        egress: &Arc<dyn Egress>,
        pools: &mut Vec<Arc<dyn Disposable>>,
    ) -> [Stage; 2] {
        let encoded_pool = Arc::new(BufferPool::new("audio-encoded", self.config.buffer_count, {
            let capacity = self.config.audio_payload_capacity();
            move || EncodedBuffer::with_capacity(capacity)
        }));
        pools.push(encoded_pool.clone());
        let encoded_queue = Arc::new(StageQueue::<EncodedBuffer>::new("audio-encoded"));

        let mut encoder = match &self.audio_encoder {
            Some(factory) => factory(),
            None => Box::new(RawPcmEncoder) as Box<dyn Encoder<PcmBuffer>>,
        };
        info!(encoder = encoder.name(), bitrate = self.config.target_bitrate, "Audio encoder ready");

        let output_pool = encoded_pool.clone();
        let encode = Stage::transform(
            "audio-encode",
            wiring.pcm_queue.clone() as Arc<dyn Source<PcmBuffer>>,
            wiring.pcm_pool.clone() as Arc<dyn Target<PcmBuffer>>,
            encoded_queue.clone() as Arc<dyn Target<EncodedBuffer>>,
            move |pcm: &mut PcmBuffer, ctx| {
                let mut out = output_pool.receive(ctx.token)?;
                if let Err(e) = encoder.encode(pcm, &mut out) {
                    output_pool.post(out);
                    return Err(e.into());
                }
                out.set_timestamp_us(pcm.log().first_time().unwrap_or_else(|| ctx.now_us()));
                out.log_mut().add("encode", ctx.now_us());
                Ok(out)
            },
        );

        let egress = egress.clone();
        let send = Stage::sink(
            "audio-egress",
            encoded_queue as Arc<dyn Source<EncodedBuffer>>,
            encoded_pool as Arc<dyn Target<EncodedBuffer>>,
            move |buffer: &mut EncodedBuffer, _ctx| {
                send_units(&*egress, MediaType::Audio, buffer)?;
                Ok(())
            },
        );
        [encode, send]
    }

    fn record_stage(&self, wiring: &Wiring) -> Result<Stage> {
        let mut recorder = WavRecorder::create(
            &self.config.record_path,
            self.config.sampling_rate as f64,
            self.config.channels,
        )?;
        Ok(Stage::sink(
            "record",
            wiring.pcm_queue.clone() as Arc<dyn Source<PcmBuffer>>,
            wiring.pcm_pool.clone() as Arc<dyn Target<PcmBuffer>>,
            move |pcm: &mut PcmBuffer, _ctx| {
                recorder.write(pcm)?;
                Ok(())
            },
        ))
    }

    fn video_chain(
        &self,
        observed: MidiReceiver,
        egress: &Arc<dyn Egress>,
        pools: &mut Vec<Arc<dyn Disposable>>,
    ) -> Chain {
        let config = &self.config;
        let (width, height) = (config.width, config.height);

        // One canvas is enough: rendering finishes before the next tick.
        let canvas_pool = Arc::new(BufferPool::new("canvas", 1, move || Canvas::new(width, height)));
        let frame_pool = Arc::new(BufferPool::new("frame", config.buffer_count, move || {
            VideoFrame::new(width, height)
        }));
        let encoded_pool = Arc::new(BufferPool::new("video-encoded", config.buffer_count, {
            let capacity = config.video_payload_capacity();
            move || EncodedBuffer::with_capacity(capacity)
        }));
        pools.push(canvas_pool.clone());
        pools.push(frame_pool.clone());
        pools.push(encoded_pool.clone());
        let frame_queue = Arc::new(StageQueue::<VideoFrame>::new("frames"));
        let encoded_queue = Arc::new(StageQueue::<EncodedBuffer>::new("video-encoded"));

        let renderer = self.renderer.clone();
        let mut notes = NoteTracker::new();
        let output_frames = frame_pool.clone();
        let render = Stage::transform(
            "render",
            canvas_pool.clone() as Arc<dyn Source<Canvas>>,
            canvas_pool as Arc<dyn Target<Canvas>>,
            frame_queue.clone() as Arc<dyn Target<VideoFrame>>,
            move |canvas: &mut Canvas, ctx| {
                notes.drain(&observed);
                let now = ctx.now_us();
                canvas.log_mut().clear();
                canvas.log_mut().add("render", now);
                renderer.render(&notes, now, canvas);

                let mut frame = output_frames.receive(ctx.token)?;
                if let Err(e) = canvas.to_i420(&mut frame) {
                    output_frames.post(frame);
                    return Err(e.into());
                }
                frame.set_timestamp_us(now);
                Ok(frame)
            },
        )
        .paced(IntervalPacer::new(config.video_interval()));

        let mut encoder = match &self.video_encoder {
            Some(factory) => factory(),
            None => Box::new(RawVideoEncoder::new()) as Box<dyn Encoder<VideoFrame>>,
        };
        info!(encoder = encoder.name(), width, height, "Video encoder ready");

        let intra_interval = config.intra_frame_interval_us;
        let mut last_keyframe_us: Option<u64> = None;
        let output_pool = encoded_pool.clone();
        let encode = Stage::transform(
            "video-encode",
            frame_queue as Arc<dyn Source<VideoFrame>>,
            frame_pool as Arc<dyn Target<VideoFrame>>,
            encoded_queue.clone() as Arc<dyn Target<EncodedBuffer>>,
            move |frame: &mut VideoFrame, ctx| {
                let now = ctx.now_us();
                if last_keyframe_us.map_or(true, |last| now.saturating_sub(last) >= intra_interval) {
                    encoder.request_keyframe();
                    last_keyframe_us = Some(now);
                }
                let mut out = output_pool.receive(ctx.token)?;
                if let Err(e) = encoder.encode(frame, &mut out) {
                    output_pool.post(out);
                    return Err(e.into());
                }
                out.set_timestamp_us(frame.timestamp_us());
                out.log_mut().add("encode", ctx.now_us());
                Ok(out)
            },
        );

        let egress = egress.clone();
        let send = Stage::sink(
            "video-egress",
            encoded_queue as Arc<dyn Source<EncodedBuffer>>,
            encoded_pool as Arc<dyn Target<EncodedBuffer>>,
            move |buffer: &mut EncodedBuffer, _ctx| {
                send_units(&*egress, MediaType::Video, buffer)?;
                Ok(())
            },
        );

        Chain::new("video").stage(render).stage(encode).stage(send)
    }
}

impl Drop for OnAirEngine {
    fn drop(&mut self) {
        if self.running.is_some() {
            let _ = self.stop();
        }
    }
}
