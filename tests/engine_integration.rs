//! End-to-end engine runs against the in-process mock instrument.

use onair::prelude::*;
use onair_media::MemoryEgress;
use onair_vst::testing::{MockConfig, MockModule};
use onair_vst::PluginModule;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn small_config() -> EngineConfig {
    EngineConfig {
        sample_length: 0.01,
        width: 64,
        height: 36,
        max_frame_rate: 30.0,
        intra_frame_interval_us: 100_000,
        ..EngineConfig::default()
    }
}

fn mock(config: MockConfig) -> impl Fn() -> Box<dyn PluginModule> + Send + Sync + 'static {
    move || Box::new(MockModule::new(config.clone())) as Box<dyn PluginModule>
}

#[test]
fn test_stream_mode_delivers_audio_and_video() {
    let egress = Arc::new(MemoryEgress::new());
    let mut engine = OnAirEngine::builder(small_config())
        .plugin_module(mock(MockConfig::default()))
        .egress(egress.clone())
        .build()
        .unwrap();

    engine.start().unwrap();
    assert!(engine.is_running());
    engine
        .midi_sender()
        .send(MidiEvent::note_on(engine.clock().now_us(), 0, 64, 100))
        .unwrap();
    thread::sleep(Duration::from_millis(400));
    let report = engine.stop().unwrap();

    assert!(report.is_clean(), "faults: {:?}", report.faults);
    assert_eq!(report.stages, 6);
    assert!(!engine.is_running());

    let sent = egress.sent();
    let audio: Vec<_> = sent.iter().filter(|u| u.media == MediaType::Audio).collect();
    let video: Vec<_> = sent.iter().filter(|u| u.media == MediaType::Video).collect();
    assert!(audio.len() >= 5, "only {} audio units", audio.len());
    assert!(audio.iter().all(|u| u.data.len() == 480 * 2 * 4 && u.end_of_unit));
    assert!(audio
        .iter()
        .any(|u| u.data[..4] == 0.5f32.to_le_bytes()[..]));

    // Raw video sends Y, U and V as three units of one frame.
    assert!(video.len() >= 3);
    assert_eq!(video[0].data.len(), 64 * 36);
    assert_eq!(video[1].timestamp_us, video[0].timestamp_us + 1);
    assert!(video[2].end_of_unit && !video[0].end_of_unit);
}

#[test]
fn test_local_mode_records_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.wav");
    let config = EngineConfig {
        mode: Mode::Local,
        record_path: path.clone(),
        ..small_config()
    };
    let mut engine = OnAirEngine::builder(config)
        .plugin_module(mock(MockConfig::default()))
        .build()
        .unwrap();

    engine.start().unwrap();
    thread::sleep(Duration::from_millis(200));
    let report = engine.stop().unwrap();
    assert!(report.is_clean(), "faults: {:?}", report.faults);
    assert_eq!(report.stages, 2);

    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(reader.spec().sample_rate, 48_000);
    assert!(reader.duration() >= 480);
    assert_eq!(reader.duration() % 480, 0);
}

#[test]
fn test_plugin_fault_stops_only_its_chain() {
    let egress = Arc::new(MemoryEgress::new());
    let mut engine = OnAirEngine::builder(small_config())
        .plugin_module(mock(MockConfig {
            fault_in_process: true,
            ..MockConfig::default()
        }))
        .egress(egress.clone())
        .build()
        .unwrap();

    engine.start().unwrap();
    thread::sleep(Duration::from_millis(300));
    assert!(!engine.has_finished());
    let report = engine.stop().unwrap();

    assert_eq!(report.faults.len(), 1);
    let fault = &report.faults[0];
    assert_eq!((fault.chain.as_str(), fault.stage.as_str()), ("audio", "vst"));
    assert!(matches!(
        fault.error,
        onair::core::Error::PluginProcessing { .. }
    ));
    assert_eq!(egress.count(MediaType::Audio), 0);
    assert!(egress.count(MediaType::Video) >= 3);
}

#[test]
fn test_linked_chains_fail_together() {
    let config = EngineConfig {
        link_chains: true,
        ..small_config()
    };
    let mut engine = OnAirEngine::builder(config)
        .plugin_module(mock(MockConfig {
            fault_in_process: true,
            ..MockConfig::default()
        }))
        .egress(Arc::new(MemoryEgress::new()))
        .build()
        .unwrap();

    engine.start().unwrap();
    let mut waited = 0;
    while !engine.has_finished() && waited < 5_000 {
        thread::sleep(Duration::from_millis(10));
        waited += 10;
    }
    assert!(engine.has_finished());
    let report = engine.stop().unwrap();
    assert_eq!(report.faults.len(), 1);
}

#[test]
fn test_start_and_stop_report_state() {
    let mut engine = OnAirEngine::builder(small_config())
        .plugin_module(mock(MockConfig::default()))
        .egress(Arc::new(MemoryEgress::new()))
        .build()
        .unwrap();

    assert!(matches!(engine.stop(), Err(onair::Error::NotRunning)));
    engine.start().unwrap();
    assert!(engine.effect().is_some());
    assert!(matches!(engine.start(), Err(onair::Error::AlreadyStarted)));
    engine.stop().unwrap();
    assert!(engine.effect().is_none());
    assert!(matches!(engine.stop(), Err(onair::Error::NotRunning)));

    // A stopped engine can run again with a fresh plugin instance.
    engine.start().unwrap();
    engine.stop().unwrap();
}

#[test]
fn test_start_without_plugin_path_fails() {
    let mut engine = OnAirEngine::builder(small_config()).build().unwrap();
    let err = engine.start().unwrap_err();
    assert!(matches!(
        err,
        onair::Error::Core(onair::core::Error::InvalidConfig(_))
    ));
    assert!(!engine.is_running());
}

#[test]
fn test_non_instrument_rejected_at_start() {
    let mut engine = OnAirEngine::builder(small_config())
        .plugin_module(mock(MockConfig {
            is_synth: false,
            ..MockConfig::default()
        }))
        .egress(Arc::new(MemoryEgress::new()))
        .build()
        .unwrap();
    assert!(matches!(
        engine.start(),
        Err(onair::Error::Plugin(onair_vst::VstError::Protocol(_)))
    ));
}

#[test]
fn test_invalid_config_rejected_at_build() {
    let config = EngineConfig {
        sample_length: 0.03,
        ..EngineConfig::default()
    };
    assert!(OnAirEngine::builder(config).build().is_err());
}
