//! Simulated capture driver.
//!
//! [`SimDriver`] exposes one or more virtual monochrome GigE cameras. A
//! [`SimCamera`] runs a delivery thread while capturing: it takes queued
//! buffers in FIFO order, fills them with a test pattern and completes them
//! with the next entry of its [`FrameScript`]. Scripts make dropped frames,
//! partial frames and transfer faults reproducible.
//!
//! ```
//! use pvrec::sim::{FrameScript, SimCameraSpec, SimDriver};
//! use pvrec::{Camera, CameraSelector, Runtime};
//!
//! # fn main() -> Result<(), pvrec::Error> {
//! // Frame 3 never arrives.
//! let spec = SimCameraSpec::new(1, 64, 48).script(FrameScript::from_counters([1, 2, 4, 5]));
//! let runtime = Runtime::new(SimDriver::new(vec![spec]))?;
//! let camera = runtime.open_camera(CameraSelector::First)?;
//! assert_eq!(camera.info().unique_id, 1);
//! # Ok(())
//! # }
//! ```

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    buffer::{FrameBuffer, SlotId},
    camera::{
        AccessMode, Attribute, Camera, CameraInfo, CameraSettings, Driver, InterfaceType,
        PacketSize, PixelFormat, Rejected, SensorGeometry, SensorType,
    },
    completion::CompletionSignal,
    status::{DriverStatus, StatusCode},
    Error, Result,
};

/// One scripted completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedFrame {
    pub frame_count: u64,
    pub status: StatusCode,
}

/// The sequence of completions a simulated camera delivers.
///
/// Once the explicit entries are used up the camera keeps running freely:
/// every further frame completes successfully with the next counter value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameScript {
    frames: Vec<ScriptedFrame>,
}

impl FrameScript {
    /// An empty script: a free-running camera counting from 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one completion.
    pub fn frame(mut self, frame_count: u64, status: impl Into<StatusCode>) -> Self {
        self.frames.push(ScriptedFrame {
            frame_count,
            status: status.into(),
        });
        self
    }

    /// Successful completions with the given counters.
    pub fn from_counters(counters: impl IntoIterator<Item = u64>) -> Self {
        counters
            .into_iter()
            .fold(Self::new(), |script, count| {
                script.frame(count, DriverStatus::Success)
            })
    }

    /// `len` frames where every `drop_every`-th counter is skipped and every
    /// `missing_every`-th delivered frame is incomplete. Zero disables either.
    pub fn lossy(len: u64, drop_every: u64, missing_every: u64) -> Self {
        let mut script = Self::new();
        let mut delivered = 0u64;
        for count in 1..=len {
            if drop_every > 0 && count % drop_every == 0 {
                continue;
            }
            delivered += 1;
            let status = if missing_every > 0 && delivered % missing_every == 0 {
                DriverStatus::DataMissing
            } else {
                DriverStatus::Success
            };
            script = script.frame(count, status);
        }
        script
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn entry(&self, n: usize, last_count: u64) -> ScriptedFrame {
        self.frames.get(n).copied().unwrap_or(ScriptedFrame {
            frame_count: last_count + 1,
            status: StatusCode::SUCCESS,
        })
    }
}

/// Description of one simulated camera.
#[derive(Debug, Clone)]
pub struct SimCameraSpec {
    pub info: CameraInfo,
    pub sensor: SensorGeometry,
    pub ip_address: String,
    pub script: FrameScript,
    /// Pace deliveries at the configured frame rate instead of as fast as possible.
    pub realtime: bool,
    /// Reject the n-th (0-based) `queue_frame` call with a full-queue error.
    pub reject_enqueue: Option<usize>,
    /// Fail the n-th (0-based) `wait_frame_done` call with a camera fault.
    pub fail_wait: Option<usize>,
    /// Refuse to set the attribute with this name.
    pub fail_attribute: Option<&'static str>,
}

impl SimCameraSpec {
    /// A 12-bit monochrome GigE camera with the given id and resolution.
    pub fn new(unique_id: u64, width: u32, height: u32) -> Self {
        Self {
            info: CameraInfo {
                unique_id,
                name: format!("SimCam-{unique_id}"),
                model: "Simulated GigE Mono".into(),
                serial_number: format!("{:08}", unique_id),
                firmware_version: "1.0.0".into(),
                permitted_access: AccessMode::Master,
                interface_type: InterfaceType::GigE,
                interface_id: 1,
            },
            sensor: SensorGeometry {
                width,
                height,
                bits: 12,
                sensor_type: SensorType::Mono,
            },
            ip_address: format!("169.254.0.{}", unique_id % 254 + 1),
            script: FrameScript::new(),
            realtime: false,
            reject_enqueue: None,
            fail_wait: None,
            fail_attribute: None,
        }
    }

    pub fn script(mut self, script: FrameScript) -> Self {
        self.script = script;
        self
    }

    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn sensor_type(mut self, sensor_type: SensorType) -> Self {
        self.sensor.sensor_type = sensor_type;
        self
    }

    pub fn sensor_bits(mut self, bits: u32) -> Self {
        self.sensor.bits = bits;
        self
    }

    pub fn access(mut self, access: AccessMode) -> Self {
        self.info.permitted_access = access;
        self
    }

    pub fn reject_enqueue(mut self, call: usize) -> Self {
        self.reject_enqueue = Some(call);
        self
    }

    pub fn fail_wait(mut self, call: usize) -> Self {
        self.fail_wait = Some(call);
        self
    }

    pub fn fail_attribute(mut self, name: &'static str) -> Self {
        self.fail_attribute = Some(name);
        self
    }
}

/// Driver exposing simulated cameras.
#[derive(Debug)]
pub struct SimDriver {
    cameras: Vec<SimCameraSpec>,
    discovery_delay: Duration,
    initialized_at: Mutex<Option<Instant>>,
}

impl SimDriver {
    pub fn new(cameras: Vec<SimCameraSpec>) -> Self {
        Self {
            cameras,
            discovery_delay: Duration::ZERO,
            initialized_at: Mutex::new(None),
        }
    }

    /// A single free-running 1360x1024 camera with occasional dropped and
    /// incomplete frames, paced in real time.
    pub fn demo() -> Self {
        let spec = SimCameraSpec::new(100_001, 1360, 1024)
            .script(FrameScript::lossy(10_000, 97, 61))
            .realtime(true);
        Self::new(vec![spec])
    }

    /// Cameras become visible only this long after initialization.
    pub fn with_discovery_delay(mut self, delay: Duration) -> Self {
        self.discovery_delay = delay;
        self
    }

    fn initialized_at(&self) -> MutexGuard<'_, Option<Instant>> {
        self.initialized_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Driver for SimDriver {
    type Camera = SimCamera;

    fn initialize(&self) -> Result<()> {
        *self.initialized_at() = Some(Instant::now());
        Ok(())
    }

    fn uninitialize(&self) {
        *self.initialized_at() = None;
    }

    fn version(&self) -> String {
        "1.24 (simulated)".into()
    }

    fn camera_list(&self) -> Vec<CameraInfo> {
        match *self.initialized_at() {
            Some(at) if at.elapsed() >= self.discovery_delay => {
                self.cameras.iter().map(|c| c.info.clone()).collect()
            }
            _ => Vec::new(),
        }
    }

    fn open(&self, info: &CameraInfo) -> Result<SimCamera> {
        if self.initialized_at().is_none() {
            return Err(Error::driver(
                "Cannot open camera.",
                DriverStatus::BadSequence,
            ));
        }
        let spec = self
            .cameras
            .iter()
            .find(|c| c.info.unique_id == info.unique_id)
            .ok_or_else(|| Error::driver("Cannot open camera.", DriverStatus::NotFound))?;
        if spec.info.permitted_access != AccessMode::Master {
            return Err(Error::driver(
                "Cannot open camera.",
                DriverStatus::AccessDenied,
            ));
        }
        Ok(SimCamera::new(spec.clone()))
    }
}

struct Pending {
    buffer: FrameBuffer,
    signal: Arc<CompletionSignal<FrameBuffer>>,
}

#[derive(Default)]
struct DeliveryState {
    acquiring: bool,
    shutdown: bool,
    filling: bool,
    pending: VecDeque<Pending>,
    delivered: usize,
    /// Completions since capture started; position in the frame script.
    session: usize,
    last_count: u64,
}

struct Delivery {
    state: Mutex<DeliveryState>,
    cv: Condvar,
}

impl Delivery {
    fn lock(&self) -> MutexGuard<'_, DeliveryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, DeliveryState>) -> MutexGuard<'a, DeliveryState> {
        self.cv
            .wait(guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Body of the delivery thread.
    fn run(&self, script: &FrameScript, interval: Option<Duration>) {
        loop {
            let (mut pending, entry) = {
                let mut state = self.lock();
                let pending = loop {
                    if state.shutdown {
                        return;
                    }
                    if state.acquiring {
                        if let Some(pending) = state.pending.pop_front() {
                            break pending;
                        }
                    }
                    state = self.wait(state);
                };
                state.filling = true;
                let entry = script.entry(state.session, state.last_count);
                state.delivered += 1;
                state.session += 1;
                state.last_count = state.last_count.max(entry.frame_count);
                (pending, entry)
            };

            if let Some(interval) = interval {
                thread::sleep(interval);
            }

            fill_pattern(pending.buffer.data_mut(), &entry);
            pending.buffer.complete(entry.status, entry.frame_count);
            if let Err(buffer) = pending.signal.signal(pending.buffer) {
                log::warn!("slot {} completed twice, dropping buffer", buffer.slot());
            }

            let mut state = self.lock();
            state.filling = false;
            self.cv.notify_all();
        }
    }
}

/// Test image: a diagonal ramp shifted by the frame counter. Incomplete
/// frames only get their first half filled.
fn fill_pattern(data: &mut [u8], entry: &ScriptedFrame) {
    let filled = if entry.status == DriverStatus::DataMissing.into() {
        data.len() / 2
    } else {
        data.len()
    };
    let shift = entry.frame_count as usize;
    for (i, byte) in data[..filled].iter_mut().enumerate() {
        *byte = ((i + shift) % 251) as u8;
    }
    data[filled..].fill(0);
}

/// An open simulated camera.
pub struct SimCamera {
    spec: SimCameraSpec,
    settings: CameraSettings,
    capturing: bool,
    delivery: Arc<Delivery>,
    worker: Option<JoinHandle<()>>,
    signals: HashMap<SlotId, Arc<CompletionSignal<FrameBuffer>>>,
    enqueue_calls: usize,
    wait_calls: usize,
}

impl SimCamera {
    fn new(spec: SimCameraSpec) -> Self {
        Self {
            spec,
            settings: CameraSettings {
                frame_rate: 30.0,
                exposure_us: 10_000,
                pixel_format: PixelFormat::Mono8,
                packet_size: PacketSize::AUTO_MAX,
                stream_bytes_per_second: 115_000_000,
            },
            capturing: false,
            delivery: Arc::new(Delivery {
                state: Mutex::new(DeliveryState::default()),
                cv: Condvar::new(),
            }),
            worker: None,
            signals: HashMap::new(),
            enqueue_calls: 0,
            wait_calls: 0,
        }
    }

    /// Number of completions delivered since the camera was opened.
    pub fn delivered(&self) -> usize {
        self.delivery.lock().delivered
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            {
                let mut state = self.delivery.lock();
                state.shutdown = true;
                self.delivery.cv.notify_all();
            }
            if worker.join().is_err() {
                log::error!("simulated delivery thread panicked");
            }
            self.delivery.lock().shutdown = false;
        }
    }

    fn check_attribute(&self, attribute: &Attribute) -> std::result::Result<(), DriverStatus> {
        if self.spec.fail_attribute == Some(attribute.name()) {
            return Err(DriverStatus::InvalidSetup);
        }
        let in_range = match *attribute {
            Attribute::FrameRate(rate) => rate > 0.0 && rate <= 1000.0,
            Attribute::ExposureMicros(us) => us > 0,
            Attribute::PixelFormat(format) => format.bits() <= 8 || self.spec.sensor.bits > 8,
            Attribute::PacketSize(PacketSize::Fixed(bytes)) => {
                (500..=16_110).contains(&bytes)
            }
            Attribute::PacketSize(PacketSize::Auto) => true,
            Attribute::StreamBytesPerSecond(bps) => bps > 0,
        };
        if in_range {
            Ok(())
        } else {
            Err(DriverStatus::OutOfRange)
        }
    }
}

impl Camera for SimCamera {
    fn info(&self) -> &CameraInfo {
        &self.spec.info
    }

    fn sensor(&self) -> SensorGeometry {
        self.spec.sensor
    }

    fn ip_address(&self) -> Option<&str> {
        Some(&self.spec.ip_address)
    }

    fn configure(&mut self, attribute: Attribute) -> Result<()> {
        self.check_attribute(&attribute)
            .map_err(|status| Error::driver(format!("Cannot set {}.", attribute.name()), status))?;

        match attribute {
            Attribute::FrameRate(rate) => self.settings.frame_rate = rate,
            Attribute::ExposureMicros(us) => self.settings.exposure_us = us,
            Attribute::PixelFormat(format) => self.settings.pixel_format = format,
            Attribute::PacketSize(PacketSize::Fixed(bytes)) => self.settings.packet_size = bytes,
            Attribute::PacketSize(PacketSize::Auto) => {
                self.settings.packet_size = PacketSize::AUTO_MAX
            }
            Attribute::StreamBytesPerSecond(bps) => self.settings.stream_bytes_per_second = bps,
        }
        Ok(())
    }

    fn settings(&self) -> CameraSettings {
        self.settings
    }

    fn start_capture(&mut self) -> Result<()> {
        if self.capturing {
            return Err(Error::driver(
                "Cannot start capturing.",
                DriverStatus::BadSequence,
            ));
        }

        let interval = self
            .spec
            .realtime
            .then(|| Duration::from_secs_f32(1.0 / self.settings.frame_rate));
        {
            // the frame counter restarts with every capture session
            let mut state = self.delivery.lock();
            state.session = 0;
            state.last_count = 0;
        }
        let delivery = Arc::clone(&self.delivery);
        let script = self.spec.script.clone();
        let worker = thread::Builder::new()
            .name(format!("simcam-{}", self.spec.info.unique_id))
            .spawn(move || delivery.run(&script, interval))?;

        self.worker = Some(worker);
        self.capturing = true;
        Ok(())
    }

    fn end_capture(&mut self) -> Result<()> {
        self.delivery.lock().acquiring = false;
        self.stop_worker();
        self.capturing = false;
        Ok(())
    }

    fn queue_frame(&mut self, mut buffer: FrameBuffer) -> std::result::Result<(), Rejected> {
        let call = self.enqueue_calls;
        self.enqueue_calls += 1;

        let refused = if self.spec.reject_enqueue == Some(call) {
            Some(DriverStatus::QueueFull)
        } else if !self.capturing {
            Some(DriverStatus::BadSequence)
        } else if buffer.capacity() < self.spec.sensor.frame_size(self.settings.pixel_format) {
            Some(DriverStatus::BufferTooSmall)
        } else {
            None
        };
        if let Some(status) = refused {
            return Err(Rejected {
                buffer,
                error: Error::driver("Cannot enqueue frame.", status),
            });
        }

        buffer.clear_completion();
        let signal = Arc::clone(
            self.signals
                .entry(buffer.slot())
                .or_insert_with(|| Arc::new(CompletionSignal::new())),
        );
        let mut state = self.delivery.lock();
        state.pending.push_back(Pending { buffer, signal });
        self.delivery.cv.notify_all();
        Ok(())
    }

    fn wait_frame_done(&mut self, slot: SlotId, timeout: Option<Duration>) -> Result<FrameBuffer> {
        let call = self.wait_calls;
        self.wait_calls += 1;

        if self.spec.fail_wait == Some(call) {
            return Err(Error::driver(
                "Waiting for frame failed.",
                DriverStatus::CameraFault,
            ));
        }
        let signal = self
            .signals
            .get(&slot)
            .ok_or_else(|| Error::driver("Waiting for frame failed.", DriverStatus::BadParameter))?;
        if !self.delivery.lock().acquiring && !signal.is_complete() {
            return Err(Error::driver(
                "Waiting for frame failed.",
                DriverStatus::BadSequence,
            ));
        }

        signal
            .wait_for(timeout)
            .map_err(|_| Error::driver("Waiting for frame failed.", DriverStatus::Timeout))
    }

    fn start_acquisition(&mut self) -> Result<()> {
        if !self.capturing {
            return Err(Error::driver(
                "Cannot start acquisition.",
                DriverStatus::BadSequence,
            ));
        }
        let mut state = self.delivery.lock();
        state.acquiring = true;
        self.delivery.cv.notify_all();
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<()> {
        self.delivery.lock().acquiring = false;
        Ok(())
    }

    fn clear_queue(&mut self) -> Result<Vec<FrameBuffer>> {
        let mut state = self.delivery.lock();
        while state.filling {
            state = self.delivery.wait(state);
        }
        let mut buffers: Vec<FrameBuffer> = state.pending.drain(..).map(|p| p.buffer).collect();
        drop(state);

        buffers.extend(self.signals.values().filter_map(|signal| signal.take()));
        Ok(buffers)
    }
}

impl Drop for SimCamera {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
