//! The capture loop: keeps a ring of buffers in flight and reconciles the
//! camera's frame counter against the requested output indices.

use std::{collections::VecDeque, fmt};

use crate::{
    buffer::{FrameBuffer, FramePool, SlotId},
    camera::Camera,
    config::RecorderOptions,
    sink::{FrameSink, MetadataValue},
    status::{FrameStatus, StatusCode},
    Error, Result,
};

/// Value written to the `CREATOR` metadata key.
pub const CREATOR: &str = concat!("pvrec v", env!("CARGO_PKG_VERSION"));

/// Lifecycle of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Buffers are being handed to the camera.
    Priming,
    Acquiring,
    /// Acquisition stopped, the camera queue is being cleared.
    Draining,
    /// A fatal error occurred and the session is being torn down.
    Faulted,
}

/// Something that happened to a frame during a recording.
///
/// Each requested index produces exactly one `Written`, `Dropped` or
/// `MissingData` event. The remaining variants report recoverable conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Written { index: u64 },
    Dropped { index: u64 },
    /// The frame arrived with incomplete data. Its data is still written.
    MissingData { index: u64 },
    /// A completion carried a fault status; the index is retried.
    Fault { code: StatusCode },
    /// The camera reported a frame counter behind the requested index.
    CounterAnomaly { delivered: u64, requested: u64 },
    WriteFailed { index: u64, message: String },
}

/// A frame the sink could not store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    pub index: u64,
    pub message: String,
}

/// What became of the requested frames of the last session.
///
/// Every index in `1..=num_frames` appears in exactly one of `written`,
/// `dropped` and `missing_data`. All three lists are ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeReport {
    pub written: Vec<u64>,
    pub dropped: Vec<u64>,
    pub missing_data: Vec<u64>,
    /// Indices whose write failed. These also appear in `written` or
    /// `missing_data`.
    pub write_failures: Vec<WriteFailure>,
}

impl OutcomeReport {
    /// Number of indices accounted for.
    pub fn resolved(&self) -> usize {
        self.written.len() + self.dropped.len() + self.missing_data.len()
    }

    /// Number of frames that actually reached the sink.
    pub fn stored(&self) -> usize {
        self.written.len() + self.missing_data.len() - self.write_failures.len()
    }
}

type Observer = Box<dyn FnMut(&FrameEvent) + Send>;

/// Records a fixed number of frames from a [`Camera`] into a [`FrameSink`].
///
/// The recorder owns the frame pool. During a session it keeps every buffer
/// either queued with the camera or in its own hands between completion and
/// re-queueing, and always waits for the buffer that has been in flight the
/// longest.
///
/// # Examples
///
/// ```
/// use pvrec::{
///     sim::{FrameScript, SimCameraSpec, SimDriver},
///     CameraSelector, MemorySink, Recorder, RecorderOptions, Runtime,
/// };
///
/// # fn main() -> Result<(), pvrec::Error> {
/// let spec = SimCameraSpec::new(1, 32, 16).script(FrameScript::from_counters([1, 2, 4, 5]));
/// let runtime = Runtime::new(SimDriver::new(vec![spec]))?;
/// let mut camera = runtime.open_camera(CameraSelector::First)?;
///
/// let mut sink = MemorySink::new();
/// let mut recorder = Recorder::new(RecorderOptions::builder().num_buffers(2).build()?);
/// let report = recorder.record(&mut *camera, &mut sink, 4)?;
///
/// assert_eq!(report.written, vec![1, 2, 4]);
/// assert_eq!(report.dropped, vec![3]);
/// # Ok(())
/// # }
/// ```
pub struct Recorder {
    options: RecorderOptions,
    pool: FramePool,
    ring: VecDeque<SlotId>,
    state: SessionState,
    report: OutcomeReport,
    observer: Option<Observer>,
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("options", &self.options)
            .field("pool", &self.pool)
            .field("ring", &self.ring)
            .field("state", &self.state)
            .field("report", &self.report)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// How far a session got, so teardown only undoes what was started.
#[derive(Debug, Default)]
struct Progress {
    capturing: bool,
    acquiring: bool,
}

impl Recorder {
    pub fn new(options: RecorderOptions) -> Self {
        Self {
            options,
            pool: FramePool::new(),
            ring: VecDeque::new(),
            state: SessionState::Idle,
            report: OutcomeReport::default(),
            observer: None,
        }
    }

    pub fn options(&self) -> &RecorderOptions {
        &self.options
    }

    /// Registers a callback receiving every [`FrameEvent`], replacing any
    /// previous one.
    pub fn on_frame_event<F>(&mut self, observer: F)
    where
        F: FnMut(&FrameEvent) + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Outcome of the last session, including a failed one.
    pub fn report(&self) -> &OutcomeReport {
        &self.report
    }

    pub fn dropped_frames(&self) -> &[u64] {
        &self.report.dropped
    }

    pub fn missing_data_frames(&self) -> &[u64] {
        &self.report.missing_data
    }

    /// Records `num_frames` frames into `sink`, indices `1..=num_frames`.
    ///
    /// The camera must be open and configured. Before acquisition starts the
    /// sink receives `CREATOR`, `EXPTIME` and `MAXFPS` metadata; afterwards
    /// `NDROP` and `NMISS`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfiguration`] if `num_frames` is zero
    /// - any camera error while starting, queueing, waiting or draining; the
    ///   session is torn down and frames already written stay in the sink
    /// - [`Error::IncompleteRecording`] if capture finished but some frames
    ///   could not be written; [`report`](Self::report) has the details
    pub fn record<C, S>(
        &mut self,
        camera: &mut C,
        sink: &mut S,
        num_frames: u64,
    ) -> Result<OutcomeReport>
    where
        C: Camera + ?Sized,
        S: FrameSink + ?Sized,
    {
        if num_frames == 0 {
            return Err(Error::InvalidConfiguration(
                "number of frames must be at least 1".into(),
            ));
        }
        if self.state != SessionState::Idle {
            return Err(Error::InvalidState(format!(
                "cannot start recording while {:?}",
                self.state
            )));
        }

        self.report = OutcomeReport::default();
        log::info!(
            "recording {num_frames} frame(s) from camera {} with {} buffer(s)",
            camera.info().unique_id,
            self.options.num_buffers
        );

        let mut progress = Progress::default();
        let result = self.run(camera, sink, num_frames, &mut progress);
        if let Err(e) = &result {
            log::error!("recording aborted: {e}");
            self.set_state(SessionState::Faulted);
            self.teardown(camera, &progress);
        }
        self.ring.clear();
        self.pool.release();
        self.set_state(SessionState::Idle);
        result?;

        log::info!(
            "recording finished: {} written, {} dropped, {} with missing data",
            self.report.written.len(),
            self.report.dropped.len(),
            self.report.missing_data.len()
        );
        if !self.report.write_failures.is_empty() {
            return Err(Error::IncompleteRecording {
                failed: self.report.write_failures.len(),
            });
        }
        Ok(self.report.clone())
    }

    fn run<C, S>(
        &mut self,
        camera: &mut C,
        sink: &mut S,
        num_frames: u64,
        progress: &mut Progress,
    ) -> Result<()>
    where
        C: Camera + ?Sized,
        S: FrameSink + ?Sized,
    {
        camera.start_capture()?;
        progress.capturing = true;

        let settings = camera.settings();
        let buffer_size = camera.sensor().frame_size(settings.pixel_format);
        self.pool.allocate(self.options.num_buffers, buffer_size)?;

        self.set_state(SessionState::Priming);
        let slots: Vec<SlotId> = self.pool.slot_ids().collect();
        for slot in slots {
            let buffer = self.checkout(slot)?;
            self.enqueue(camera, buffer)?;
        }

        sink.write_metadata(
            "CREATOR",
            CREATOR.into(),
            "program that created this file",
        )?;
        sink.write_metadata(
            "EXPTIME",
            settings.exposure_ms().into(),
            "exposure time [ms]",
        )?;
        sink.write_metadata(
            "MAXFPS",
            settings.frame_rate.into(),
            "maximum frame rate [Hz]",
        )?;

        camera.start_acquisition()?;
        progress.acquiring = true;
        self.set_state(SessionState::Acquiring);

        let mut requested: u64 = 1;
        while requested <= num_frames {
            let slot = self
                .ring
                .pop_front()
                .ok_or_else(|| Error::InvalidState("no frame buffer in flight".into()))?;
            let buffer = camera.wait_frame_done(slot, self.options.wait_timeout)?;
            requested = self.resolve(&buffer, sink, requested, num_frames);
            self.enqueue(camera, buffer)?;
        }

        self.set_state(SessionState::Draining);
        camera.stop_acquisition()?;
        progress.acquiring = false;
        for buffer in camera.clear_queue()? {
            self.pool.checkin(buffer);
        }
        self.ring.clear();

        let dropped = self.report.dropped.len();
        let missing = self.report.missing_data.len();
        if let Err(e) = sink.write_metadata("NDROP", dropped.into(), "number of dropped frames") {
            log::warn!("cannot write dropped frame count: {e}");
        }
        if let Err(e) = sink.write_metadata(
            "NMISS",
            missing.into(),
            "number of frames with missing data",
        ) {
            log::warn!("cannot write missing data count: {e}");
        }

        progress.capturing = false;
        camera.end_capture()?;
        Ok(())
    }

    /// Classifies one completed buffer and returns the next requested index.
    fn resolve<S: FrameSink + ?Sized>(
        &mut self,
        buffer: &FrameBuffer,
        sink: &mut S,
        mut requested: u64,
        num_frames: u64,
    ) -> u64 {
        let Some(completion) = buffer.completion() else {
            log::warn!("frame buffer {} came back without completion", buffer.slot());
            return requested;
        };

        if let FrameStatus::Fault(code) = completion.status {
            log::warn!("frame completed with {code}, retrying index {requested}");
            self.emit(FrameEvent::Fault { code });
            return requested;
        }

        let delivered = completion.frame_count;
        if delivered > requested {
            while requested < delivered && requested <= num_frames {
                self.report.dropped.push(requested);
                self.emit(FrameEvent::Dropped { index: requested });
                requested += 1;
            }
            requested = delivered;
        } else if delivered < requested {
            log::warn!("camera delivered frame {delivered} while expecting {requested}");
            self.emit(FrameEvent::CounterAnomaly {
                delivered,
                requested,
            });
        }

        if requested > num_frames {
            return requested;
        }

        let payload = buffer.payload().unwrap_or_default();
        if completion.status == FrameStatus::DataMissing {
            self.report.missing_data.push(requested);
            self.emit(FrameEvent::MissingData { index: requested });
        } else {
            self.report.written.push(requested);
            self.emit(FrameEvent::Written { index: requested });
        }
        if let Err(e) = sink.write_frame(requested, payload) {
            let message = e.to_string();
            log::warn!("cannot write frame {requested}: {message}");
            self.emit(FrameEvent::WriteFailed {
                index: requested,
                message: message.clone(),
            });
            self.report.write_failures.push(WriteFailure {
                index: requested,
                message,
            });
        }
        requested + 1
    }

    fn checkout(&mut self, slot: SlotId) -> Result<FrameBuffer> {
        self.pool
            .checkout(slot)
            .ok_or_else(|| Error::InvalidState(format!("frame buffer {slot} is not available")))
    }

    /// Queues `buffer` with the camera and appends it to the ring.
    fn enqueue<C: Camera + ?Sized>(&mut self, camera: &mut C, buffer: FrameBuffer) -> Result<()> {
        let slot = buffer.slot();
        match camera.queue_frame(buffer) {
            Ok(()) => {
                self.ring.push_back(slot);
                Ok(())
            }
            Err(rejected) => {
                self.pool.checkin(rejected.buffer);
                Err(rejected.error)
            }
        }
    }

    /// Best-effort cleanup after a fatal error. Failures are only logged.
    fn teardown<C: Camera + ?Sized>(&mut self, camera: &mut C, progress: &Progress) {
        if !progress.capturing {
            return;
        }
        if progress.acquiring {
            if let Err(e) = camera.stop_acquisition() {
                log::debug!("stopping acquisition during teardown failed: {e}");
            }
        }
        match camera.clear_queue() {
            Ok(buffers) => {
                for buffer in buffers {
                    self.pool.checkin(buffer);
                }
            }
            Err(e) => log::debug!("clearing capture queue during teardown failed: {e}"),
        }
        if let Err(e) = camera.end_capture() {
            log::debug!("ending capture during teardown failed: {e}");
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::debug!("session state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn emit(&mut self, event: FrameEvent) {
        if let Some(observer) = self.observer.as_mut() {
            observer(&event);
        }
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(RecorderOptions::default())
    }
}
