use pvrec::{
    sim::{FrameScript, SimCameraSpec, SimDriver},
    Camera, CameraSelector, CaptureSettings, DriverStatus, Error, FitsSink, FrameEvent,
    FrameSink, MemorySink, PixelFormat, PngSequenceSink, Recorder, RecorderOptions, Runtime,
    SinkOptions,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn runtime(spec: SimCameraSpec) -> Runtime<SimDriver> {
    Runtime::new(SimDriver::new(vec![spec])).unwrap()
}

fn options(num_buffers: usize) -> RecorderOptions {
    RecorderOptions::builder()
        .num_buffers(num_buffers)
        .wait_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[test]
fn test_threaded_camera_reports_drops_and_missing_data() {
    let script = FrameScript::new()
        .frame(1, DriverStatus::Success)
        .frame(2, DriverStatus::Success)
        .frame(4, DriverStatus::Success)
        .frame(5, DriverStatus::DataMissing)
        .frame(6, DriverStatus::Success);
    let runtime = runtime(SimCameraSpec::new(11, 32, 8).script(script));
    let mut camera = runtime.open_camera(CameraSelector::UniqueId(11)).unwrap();

    let mut sink = MemorySink::new();
    let mut recorder = Recorder::new(options(3));
    let report = recorder.record(&mut *camera, &mut sink, 6).unwrap();

    assert_eq!(report.written, vec![1, 2, 4, 6]);
    assert_eq!(report.dropped, vec![3]);
    assert_eq!(report.missing_data, vec![5]);
    assert_eq!(sink.indices(), vec![1, 2, 4, 5, 6]);

    // second half of an incomplete frame stays empty
    let partial = sink.frame(5).unwrap();
    assert!(partial[partial.len() / 2..].iter().all(|&b| b == 0));
}

#[test]
fn test_fault_completion_is_retried() {
    let script = FrameScript::new()
        .frame(1, DriverStatus::Success)
        .frame(1, DriverStatus::DataLost)
        .frame(2, DriverStatus::Success);
    let runtime = runtime(SimCameraSpec::new(1, 16, 4).script(script));
    let mut camera = runtime.open_camera(CameraSelector::First).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&events);
    let mut recorder = Recorder::new(options(2));
    recorder.on_frame_event(move |event| seen.lock().unwrap().push(event.clone()));

    let report = recorder.record(&mut *camera, &mut MemorySink::new(), 3).unwrap();

    assert_eq!(report.written, vec![1, 2, 3]);
    let events = events.lock().unwrap();
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, FrameEvent::Fault { .. }))
            .count(),
        1
    );
}

#[test]
fn test_record_into_fits_cube() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.fits");
    let runtime = runtime(SimCameraSpec::new(3, 8, 4).script(FrameScript::from_counters([1, 3])));
    let mut camera = runtime.open_camera(CameraSelector::First).unwrap();
    CaptureSettings::builder()
        .pixel_format(PixelFormat::Mono16)
        .build()
        .unwrap()
        .apply(&mut *camera)
        .unwrap();

    let mut sink = FitsSink::create(SinkOptions::for_camera(&*camera, &path, 3, false)).unwrap();
    let report = Recorder::new(options(2))
        .record(&mut *camera, &mut sink, 3)
        .unwrap();
    sink.close().unwrap();

    assert_eq!(report.dropped, vec![2]);
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len() % 2880, 0);
    let header = String::from_utf8_lossy(&bytes[..2880 * 2]);
    assert!(header.contains("BITPIX  =                   16"));
    assert!(header.contains("NAXIS3  =                    3"));
    assert!(header.contains("NDROP   =                    1"));
    assert!(header.contains("CREATOR = 'pvrec v"));
}

#[test]
fn test_record_into_png_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("frames");
    let runtime = runtime(SimCameraSpec::new(4, 6, 3));
    let mut camera = runtime.open_camera(CameraSelector::First).unwrap();

    let mut sink = PngSequenceSink::create(SinkOptions::for_camera(&*camera, &out, 2, false)).unwrap();
    Recorder::new(options(2))
        .record(&mut *camera, &mut sink, 2)
        .unwrap();
    sink.close().unwrap();

    assert!(out.join("frame_000001.png").is_file());
    assert!(out.join("frame_000002.png").is_file());
    let metadata = std::fs::read_to_string(out.join("metadata.txt")).unwrap();
    assert!(metadata.contains("NMISS = 0"));
}

#[test]
fn test_rejected_enqueue_aborts_before_any_frame() {
    let runtime = runtime(SimCameraSpec::new(5, 8, 8).reject_enqueue(1));
    let mut camera = runtime.open_camera(CameraSelector::First).unwrap();
    let mut sink = MemorySink::new();
    let mut recorder = Recorder::new(options(4));

    let err = recorder.record(&mut *camera, &mut sink, 5).unwrap_err();

    assert!(matches!(err, Error::Driver { .. }));
    assert!(sink.frames().is_empty());
    assert_eq!(camera.delivered(), 0);
}

#[test]
fn test_failed_session_output_can_be_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.fits");
    let runtime = runtime(SimCameraSpec::new(5, 8, 8).reject_enqueue(0));
    let mut camera = runtime.open_camera(CameraSelector::First).unwrap();
    let mut sink = FitsSink::create(SinkOptions::for_camera(&*camera, &path, 4, false)).unwrap();
    let mut recorder = Recorder::new(options(2));

    assert!(recorder.record(&mut *camera, &mut sink, 4).is_err());
    assert_eq!(recorder.report().stored(), 0);

    sink.discard().unwrap();
    assert!(!path.exists());
}

#[test]
fn test_wait_failure_tears_down_and_camera_is_reusable() {
    let runtime = runtime(SimCameraSpec::new(6, 8, 8).fail_wait(2));
    let mut camera = runtime.open_camera(CameraSelector::First).unwrap();
    let mut sink = MemorySink::new();
    let mut recorder = Recorder::new(options(2));

    assert!(recorder.record(&mut *camera, &mut sink, 5).is_err());
    assert_eq!(sink.indices(), vec![1, 2]);

    // capture was ended, so a new session can start on the same camera
    let report = recorder
        .record(&mut *camera, &mut MemorySink::new(), 2)
        .unwrap();
    assert_eq!(report.written, vec![1, 2]);
    assert!(report.dropped.is_empty());
}

#[test]
fn test_second_session_counts_from_one() {
    let runtime = runtime(SimCameraSpec::new(9, 8, 4));
    let mut camera = runtime.open_camera(CameraSelector::First).unwrap();
    let mut recorder = Recorder::new(options(2));

    for _ in 0..2 {
        let mut sink = MemorySink::new();
        let report = recorder.record(&mut *camera, &mut sink, 3).unwrap();
        assert_eq!(report.written, vec![1, 2, 3]);
        assert!(report.dropped.is_empty());
        assert_eq!(sink.indices(), vec![1, 2, 3]);
    }
}

#[test]
fn test_setup_failure_is_reported() {
    let runtime = runtime(SimCameraSpec::new(8, 8, 8).fail_attribute("exposure time"));
    let mut camera = runtime.open_camera(CameraSelector::First).unwrap();
    let err = CaptureSettings::default().apply(&mut *camera).unwrap_err();
    assert!(err.to_string().starts_with("Cannot set exposure time. Driver:"));
    assert_eq!(camera.settings().frame_rate, 20.0);
}
