//! Scenario tests for the recording loop.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use proptest::prelude::*;

use crate::{
    buffer::{FrameBuffer, SlotId},
    camera::{
        AccessMode, Attribute, Camera, CameraInfo, CameraSettings, InterfaceType, PixelFormat,
        Rejected, SensorGeometry, SensorType,
    },
    error::Error,
    recorder::{FrameEvent, Recorder, SessionState, CREATOR},
    sink::{MemorySink, MetadataValue},
    status::{DriverStatus, StatusCode},
    RecorderOptions,
};

const WIDTH: u32 = 4;
const HEIGHT: u32 = 2;

/// A camera that completes buffers synchronously, in queue order, from a
/// fixed list of `(frame_count, status)` entries. Every buffer is filled with
/// the low byte of its frame counter.
struct ScriptedCamera {
    info: CameraInfo,
    script: VecDeque<(u64, StatusCode)>,
    last_count: u64,
    queue: VecDeque<FrameBuffer>,
    queue_calls: usize,
    waits: usize,
    /// Queue length seen by every wait, before the buffer is taken out.
    queue_len_at_wait: Vec<usize>,
    reject_queue_call: Option<usize>,
    fail_wait: Option<usize>,
    fail_stop: Option<usize>,
    stop_calls: usize,
    capturing: bool,
    acquiring: bool,
    end_capture_calls: usize,
}

impl ScriptedCamera {
    fn new(script: impl IntoIterator<Item = (u64, StatusCode)>) -> Self {
        Self {
            info: CameraInfo {
                unique_id: 7,
                name: "Scripted".into(),
                model: "Scripted".into(),
                serial_number: "0".into(),
                firmware_version: "0".into(),
                permitted_access: AccessMode::Master,
                interface_type: InterfaceType::Unknown,
                interface_id: 0,
            },
            script: script.into_iter().collect(),
            last_count: 0,
            queue: VecDeque::new(),
            queue_calls: 0,
            waits: 0,
            queue_len_at_wait: Vec::new(),
            reject_queue_call: None,
            fail_wait: None,
            fail_stop: None,
            stop_calls: 0,
            capturing: false,
            acquiring: false,
            end_capture_calls: 0,
        }
    }

    fn ok(counters: impl IntoIterator<Item = u64>) -> Self {
        Self::new(counters.into_iter().map(|c| (c, StatusCode::SUCCESS)))
    }
}

impl Camera for ScriptedCamera {
    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn sensor(&self) -> SensorGeometry {
        SensorGeometry {
            width: WIDTH,
            height: HEIGHT,
            bits: 8,
            sensor_type: SensorType::Mono,
        }
    }

    fn ip_address(&self) -> Option<&str> {
        None
    }

    fn configure(&mut self, _attribute: Attribute) -> crate::Result<()> {
        Ok(())
    }

    fn settings(&self) -> CameraSettings {
        CameraSettings {
            frame_rate: 25.0,
            exposure_us: 12_500,
            pixel_format: PixelFormat::Mono8,
            packet_size: 8228,
            stream_bytes_per_second: 115_000_000,
        }
    }

    fn start_capture(&mut self) -> crate::Result<()> {
        self.capturing = true;
        Ok(())
    }

    fn end_capture(&mut self) -> crate::Result<()> {
        self.capturing = false;
        self.end_capture_calls += 1;
        Ok(())
    }

    fn queue_frame(&mut self, mut buffer: FrameBuffer) -> std::result::Result<(), Rejected> {
        let call = self.queue_calls;
        self.queue_calls += 1;
        if self.reject_queue_call == Some(call) {
            return Err(Rejected {
                buffer,
                error: Error::driver("Cannot enqueue frame.", DriverStatus::QueueFull),
            });
        }
        buffer.clear_completion();
        self.queue.push_back(buffer);
        Ok(())
    }

    fn wait_frame_done(
        &mut self,
        slot: SlotId,
        _timeout: Option<Duration>,
    ) -> crate::Result<FrameBuffer> {
        let call = self.waits;
        self.waits += 1;
        if self.fail_wait == Some(call) {
            return Err(Error::driver(
                "Waiting for frame failed.",
                DriverStatus::CameraFault,
            ));
        }
        assert!(self.acquiring, "wait before acquisition started");
        self.queue_len_at_wait.push(self.queue.len());

        let mut buffer = self.queue.pop_front().expect("wait on an empty queue");
        assert_eq!(buffer.slot(), slot, "buffers must be waited on in queue order");

        let (count, status) = self
            .script
            .pop_front()
            .unwrap_or((self.last_count + 1, StatusCode::SUCCESS));
        self.last_count = self.last_count.max(count);
        buffer.data_mut().fill(count as u8);
        buffer.complete(status, count);
        Ok(buffer)
    }

    fn start_acquisition(&mut self) -> crate::Result<()> {
        self.acquiring = true;
        Ok(())
    }

    fn stop_acquisition(&mut self) -> crate::Result<()> {
        let call = self.stop_calls;
        self.stop_calls += 1;
        if self.fail_stop == Some(call) {
            return Err(Error::driver(
                "Cannot stop acquisition.",
                DriverStatus::Unplugged,
            ));
        }
        self.acquiring = false;
        Ok(())
    }

    fn clear_queue(&mut self) -> crate::Result<Vec<FrameBuffer>> {
        Ok(self.queue.drain(..).collect())
    }
}

fn recorder(num_buffers: usize) -> Recorder {
    Recorder::new(
        RecorderOptions::builder()
            .num_buffers(num_buffers)
            .build()
            .unwrap(),
    )
}

fn with_events(recorder: &mut Recorder) -> Arc<Mutex<Vec<FrameEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    recorder.on_frame_event(move |event| sink.lock().unwrap().push(event.clone()));
    events
}

fn assert_ring_held(camera: &ScriptedCamera, num_buffers: usize) {
    assert!(camera
        .queue_len_at_wait
        .iter()
        .all(|&len| len == num_buffers));
}

#[test]
fn test_gap_is_reported_as_dropped() {
    let mut camera = ScriptedCamera::ok([1, 2, 4, 5]);
    let mut sink = MemorySink::new();
    let mut rec = recorder(3);

    let report = rec.record(&mut camera, &mut sink, 5).unwrap();

    assert_eq!(report.written, vec![1, 2, 4, 5]);
    assert_eq!(report.dropped, vec![3]);
    assert!(report.missing_data.is_empty());
    assert_eq!(sink.indices(), vec![1, 2, 4, 5]);
    // each index carries the data of the completion with the same counter
    assert_eq!(sink.frame(4).unwrap()[0], 4);
    assert_eq!(sink.frame(5).unwrap()[0], 5);
    assert_eq!(camera.waits, 4);
    assert_ring_held(&camera, 3);
}

#[test]
fn test_clean_run() {
    let mut camera = ScriptedCamera::ok([1, 2, 3]);
    let mut sink = MemorySink::new();
    let mut rec = recorder(2);

    let report = rec.record(&mut camera, &mut sink, 3).unwrap();

    assert_eq!(report.written, vec![1, 2, 3]);
    assert!(report.dropped.is_empty());
    assert!(report.missing_data.is_empty());
    assert_eq!(sink.indices(), vec![1, 2, 3]);
    assert_eq!(rec.state(), SessionState::Idle);
    assert_eq!(camera.end_capture_calls, 1);
    assert!(!camera.acquiring);
}

#[test]
fn test_last_completion_is_not_consumed() {
    let mut camera = ScriptedCamera::ok([1, 3, 4, 5]);
    let mut sink = MemorySink::new();
    let mut rec = recorder(2);

    let report = rec.record(&mut camera, &mut sink, 4).unwrap();

    assert_eq!(report.dropped, vec![2]);
    assert_eq!(report.written, vec![1, 3, 4]);
    assert_eq!(camera.waits, 3);
    assert_eq!(camera.script.front(), Some(&(5, StatusCode::SUCCESS)));
    assert_ring_held(&camera, 2);
}

#[test]
fn test_missing_data_is_still_written() {
    let mut camera = ScriptedCamera::new([
        (1, StatusCode::SUCCESS),
        (2, DriverStatus::DataMissing.into()),
        (3, StatusCode::SUCCESS),
    ]);
    let mut sink = MemorySink::new();
    let mut rec = recorder(2);
    let events = with_events(&mut rec);

    let report = rec.record(&mut camera, &mut sink, 3).unwrap();

    assert_eq!(report.missing_data, vec![2]);
    assert_eq!(report.written, vec![1, 3]);
    assert_eq!(sink.indices(), vec![1, 2, 3]);
    assert_eq!(sink.frame(2).unwrap()[0], 2);
    assert!(events
        .lock()
        .unwrap()
        .contains(&FrameEvent::MissingData { index: 2 }));
    assert_eq!(rec.missing_data_frames(), &[2]);
}

#[test]
fn test_fault_does_not_consume_an_index() {
    let lost: StatusCode = DriverStatus::DataLost.into();
    let mut camera = ScriptedCamera::new([
        (1, StatusCode::SUCCESS),
        (0, lost),
        (2, StatusCode::SUCCESS),
        (3, StatusCode::SUCCESS),
    ]);
    let mut sink = MemorySink::new();
    let mut rec = recorder(2);
    let events = with_events(&mut rec);

    let report = rec.record(&mut camera, &mut sink, 3).unwrap();

    assert_eq!(report.written, vec![1, 2, 3]);
    assert!(report.dropped.is_empty());
    assert_eq!(camera.waits, 4);
    assert_eq!(sink.frame(2).unwrap()[0], 2);
    assert!(events
        .lock()
        .unwrap()
        .contains(&FrameEvent::Fault { code: lost }));
    assert_ring_held(&camera, 2);
}

#[test]
fn test_stale_counter_is_an_anomaly() {
    let mut camera = ScriptedCamera::ok([1, 2, 1]);
    let mut sink = MemorySink::new();
    let mut rec = recorder(2);
    let events = with_events(&mut rec);

    let report = rec.record(&mut camera, &mut sink, 3).unwrap();

    assert_eq!(report.written, vec![1, 2, 3]);
    assert_eq!(sink.frame(3).unwrap()[0], 1);
    assert!(events.lock().unwrap().contains(&FrameEvent::CounterAnomaly {
        delivered: 1,
        requested: 3
    }));
}

#[test]
fn test_counter_jump_past_the_end() {
    let mut camera = ScriptedCamera::ok([1, 10]);
    let mut sink = MemorySink::new();
    let mut rec = recorder(2);

    let report = rec.record(&mut camera, &mut sink, 3).unwrap();

    assert_eq!(report.written, vec![1]);
    assert_eq!(report.dropped, vec![2, 3]);
    assert_eq!(sink.indices(), vec![1]);
    assert_eq!(sink.metadata_value("NDROP"), Some(&MetadataValue::Int(2)));
}

#[test]
fn test_write_failure_is_reported_after_the_session() {
    let mut camera = ScriptedCamera::ok([1, 2, 3]);
    let mut sink = MemorySink::new().fail_writes_of(2);
    let mut rec = recorder(2);

    let err = rec.record(&mut camera, &mut sink, 3).unwrap_err();

    assert!(matches!(err, Error::IncompleteRecording { failed: 1 }));
    assert_eq!(sink.indices(), vec![1, 3]);
    let report = rec.report();
    assert_eq!(report.written, vec![1, 2, 3]);
    assert_eq!(report.write_failures.len(), 1);
    assert_eq!(report.write_failures[0].index, 2);
    assert_eq!(report.stored(), 2);
    assert_eq!(camera.end_capture_calls, 1);
}

#[test]
fn test_priming_failure_writes_nothing() {
    let mut camera = ScriptedCamera::ok([1, 2, 3]);
    camera.reject_queue_call = Some(1);
    let mut sink = MemorySink::new();
    let mut rec = recorder(3);

    let err = rec.record(&mut camera, &mut sink, 3).unwrap_err();

    assert!(matches!(err, Error::Driver { .. }));
    assert!(sink.frames().is_empty());
    assert!(sink.metadata().is_empty());
    assert_eq!(rec.report().stored(), 0);
    assert_eq!(camera.waits, 0);
    assert!(camera.queue.is_empty());
    assert_eq!(camera.end_capture_calls, 1);
    assert_eq!(rec.state(), SessionState::Idle);
}

#[test]
fn test_wait_failure_keeps_written_frames() {
    let mut camera = ScriptedCamera::ok([1, 2, 3, 4]);
    camera.fail_wait = Some(2);
    let mut sink = MemorySink::new();
    let mut rec = recorder(2);

    let err = rec.record(&mut camera, &mut sink, 4).unwrap_err();

    assert!(matches!(err, Error::Driver { .. }));
    assert_eq!(sink.indices(), vec![1, 2]);
    assert_eq!(rec.report().written, vec![1, 2]);
    assert_eq!(rec.state(), SessionState::Idle);
    assert!(!camera.acquiring);
    assert!(camera.queue.is_empty());
    assert_eq!(camera.end_capture_calls, 1);

    // the pool was released, so the next session can allocate again
    let mut camera = ScriptedCamera::ok([1]);
    rec.record(&mut camera, &mut MemorySink::new(), 1).unwrap();
}

#[test]
fn test_failed_stop_is_retried_on_teardown() {
    let mut camera = ScriptedCamera::ok([1, 2]);
    camera.fail_stop = Some(0);
    let mut sink = MemorySink::new();
    let mut rec = recorder(2);

    let err = rec.record(&mut camera, &mut sink, 2).unwrap_err();

    assert!(matches!(err, Error::Driver { .. }));
    assert_eq!(sink.indices(), vec![1, 2]);
    assert_eq!(camera.stop_calls, 2);
    assert!(!camera.acquiring);
    assert_eq!(camera.end_capture_calls, 1);
    assert_eq!(rec.state(), SessionState::Idle);
}

#[test]
fn test_metadata_around_acquisition() {
    let mut camera = ScriptedCamera::new([
        (1, StatusCode::SUCCESS),
        (3, DriverStatus::DataMissing.into()),
    ]);
    let mut sink = MemorySink::new();
    recorder(2).record(&mut camera, &mut sink, 3).unwrap();

    let keys: Vec<&str> = sink.metadata().iter().map(|m| m.key.as_str()).collect();
    assert_eq!(keys, vec!["CREATOR", "EXPTIME", "MAXFPS", "NDROP", "NMISS"]);
    assert_eq!(
        sink.metadata_value("CREATOR"),
        Some(&MetadataValue::Text(CREATOR.into()))
    );
    assert_eq!(sink.metadata_value("EXPTIME"), Some(&MetadataValue::Real(12.5)));
    assert_eq!(sink.metadata_value("MAXFPS"), Some(&MetadataValue::Real(25.0)));
    assert_eq!(sink.metadata_value("NDROP"), Some(&MetadataValue::Int(1)));
    assert_eq!(sink.metadata_value("NMISS"), Some(&MetadataValue::Int(1)));
}

#[test]
fn test_metadata_failure_before_acquisition_is_fatal() {
    let mut camera = ScriptedCamera::ok([1]);
    let mut sink = MemorySink::new().fail_metadata();
    let mut rec = recorder(2);

    assert!(matches!(
        rec.record(&mut camera, &mut sink, 1),
        Err(Error::Sink(_))
    ));
    assert!(!camera.acquiring);
    assert_eq!(camera.waits, 0);
}

#[test]
fn test_report_is_cleared_between_sessions() {
    let mut rec = recorder(2);
    rec.record(&mut ScriptedCamera::ok([1, 3]), &mut MemorySink::new(), 3)
        .unwrap();
    assert_eq!(rec.dropped_frames(), &[2]);

    rec.record(&mut ScriptedCamera::ok([1, 2]), &mut MemorySink::new(), 2)
        .unwrap();
    assert!(rec.dropped_frames().is_empty());
    assert_eq!(rec.report().written, vec![1, 2]);
}

#[test]
fn test_zero_frames_is_rejected() {
    let mut camera = ScriptedCamera::ok(Vec::new());
    assert!(matches!(
        recorder(2).record(&mut camera, &mut MemorySink::new(), 0),
        Err(Error::InvalidConfiguration(_))
    ));
    assert!(!camera.capturing);
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Ok(u64),
    Missing(u64),
    Fault,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        6 => (1u64..=3).prop_map(Step::Ok),
        2 => (1u64..=3).prop_map(Step::Missing),
        1 => Just(Step::Fault),
    ]
}

fn script(steps: &[Step]) -> Vec<(u64, StatusCode)> {
    let mut count = 0;
    steps
        .iter()
        .map(|step| match *step {
            Step::Ok(advance) => {
                count += advance;
                (count, StatusCode::SUCCESS)
            }
            Step::Missing(advance) => {
                count += advance;
                (count, DriverStatus::DataMissing.into())
            }
            Step::Fault => (count, DriverStatus::DataLost.into()),
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_every_index_resolved_once(
        steps in prop::collection::vec(step(), 0..40),
        num_frames in 1u64..30,
        num_buffers in 1usize..6,
    ) {
        let mut camera = ScriptedCamera::new(script(&steps));
        let mut sink = MemorySink::new();
        let mut rec = recorder(num_buffers);
        let events = with_events(&mut rec);

        let report = rec.record(&mut camera, &mut sink, num_frames).unwrap();

        let mut all: Vec<u64> = report
            .written
            .iter()
            .chain(&report.dropped)
            .chain(&report.missing_data)
            .copied()
            .collect();
        all.sort_unstable();
        prop_assert_eq!(all, (1..=num_frames).collect::<Vec<_>>());

        let written = sink.indices();
        prop_assert!(written.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(report.dropped.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(report.missing_data.windows(2).all(|w| w[0] < w[1]));

        let resolutions = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(
                e,
                FrameEvent::Written { .. } | FrameEvent::Dropped { .. } | FrameEvent::MissingData { .. }
            ))
            .count();
        prop_assert_eq!(resolutions as u64, num_frames);
        prop_assert!(camera.queue_len_at_wait.iter().all(|&len| len == num_buffers));
        prop_assert_eq!(rec.state(), SessionState::Idle);
    }
}
