//! Driver runtime management, camera discovery and opening.

use std::{
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crate::{
    camera::{
        AccessMode, Attribute, Camera, CameraInfo, CameraSelector, Driver, PacketSize,
        PixelFormat, SensorType,
    },
    Error, Result,
};

/// Interval between two looks at the driver's camera list during discovery.
pub const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Discovery budget used by [`Runtime::open_camera`].
pub const OPEN_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

struct Shared<D: Driver> {
    driver: D,
}

impl<D: Driver> Drop for Shared<D> {
    fn drop(&mut self) {
        // Last runtime handle is gone, tear the driver library down.
        self.driver.uninitialize();
        log::debug!("capture driver uninitialized");
    }
}

/// Manages the capture driver lifecycle.
///
/// The `Runtime` is the entry point for all camera operations. Creating it
/// initializes the driver library; clones share that initialization, and the
/// driver is uninitialized when the last clone is dropped. Cameras opened
/// through a runtime borrow it, so they cannot outlive the driver.
///
/// # Examples
///
/// ```
/// use pvrec::{sim::SimDriver, Runtime};
///
/// # fn main() -> Result<(), pvrec::Error> {
/// let runtime = Runtime::new(SimDriver::new(Vec::new()))?;
/// let runtime2 = runtime.clone(); // shares the same initialization
/// assert_eq!(runtime.version(), runtime2.version());
/// # Ok(())
/// # }
/// ```
pub struct Runtime<D: Driver> {
    shared: Arc<Shared<D>>,
}

impl<D: Driver> Clone for Runtime<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: Driver> fmt::Debug for Runtime<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("handles", &Arc::strong_count(&self.shared))
            .finish()
    }
}

impl<D: Driver> Runtime<D> {
    /// Initializes `driver` and wraps it in a runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InitializationFailed`] if the driver fails to initialize.
    pub fn new(driver: D) -> Result<Self> {
        driver.initialize().map_err(|e| match e {
            Error::InitializationFailed(_) => e,
            other => Error::InitializationFailed(other.to_string()),
        })?;
        log::debug!("capture driver {} initialized", driver.version());
        Ok(Self {
            shared: Arc::new(Shared { driver }),
        })
    }

    pub fn driver(&self) -> &D {
        &self.shared.driver
    }

    /// Version string of the driver library.
    pub fn version(&self) -> String {
        self.shared.driver.version()
    }

    /// Looks for cameras for at most `timeout`.
    ///
    /// Returns as soon as at least one camera is visible. An empty list means
    /// nothing showed up in time.
    pub fn available_cameras(&self, timeout: Duration) -> Vec<CameraInfo> {
        let start = Instant::now();
        loop {
            let cameras = self.shared.driver.camera_list();
            if !cameras.is_empty() {
                return cameras;
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return cameras;
            }
            thread::sleep(DISCOVERY_POLL_INTERVAL.min(timeout - elapsed));
        }
    }

    /// Opens the first camera matching `selector` that grants master access.
    ///
    /// The sensor must be monochrome. The camera is reset to [`PixelFormat::Mono8`]
    /// with automatic packet size before it is returned.
    ///
    /// # Errors
    ///
    /// - [`Error::NoCameraFound`] if discovery finds nothing
    /// - [`Error::OpenFailed`] if no matching camera can be opened
    /// - [`Error::UnsupportedSensor`] for colour sensors
    pub fn open_camera(&self, selector: CameraSelector) -> Result<CameraHandle<'_, D>> {
        let cameras = self.available_cameras(OPEN_DISCOVERY_TIMEOUT);
        if cameras.is_empty() {
            return Err(Error::NoCameraFound);
        }

        let mut last_error = None;
        let mut opened = None;
        for info in cameras.iter().filter(|info| selector.matches(info)) {
            if info.permitted_access != AccessMode::Master {
                continue;
            }
            match self.shared.driver.open(info) {
                Ok(camera) => {
                    opened = Some(camera);
                    break;
                }
                Err(e) => {
                    log::debug!("cannot open camera {}: {e}", info.unique_id);
                    last_error = Some(e);
                }
            }
        }

        let mut camera = opened.ok_or_else(|| {
            Error::OpenFailed(last_error.map_or_else(
                || format!("no camera with master access matches {selector:?}"),
                |e| e.to_string(),
            ))
        })?;

        let sensor = camera.sensor();
        if sensor.sensor_type != SensorType::Mono {
            return Err(Error::UnsupportedSensor(format!(
                "sensor type '{:?}' is not supported",
                sensor.sensor_type
            )));
        }

        camera.configure(Attribute::PixelFormat(PixelFormat::Mono8))?;
        camera.configure(Attribute::PacketSize(PacketSize::Auto))?;
        log::info!(
            "opened camera {} ({}), sensor {}",
            camera.info().unique_id,
            camera.info().name,
            sensor
        );

        Ok(CameraHandle {
            camera,
            _runtime: PhantomData,
        })
    }
}

/// An open camera tied to the runtime that opened it.
///
/// Dereferences to the driver's camera type, so it can be passed wherever a
/// [`Camera`] is expected.
pub struct CameraHandle<'rt, D: Driver> {
    camera: D::Camera,
    _runtime: PhantomData<&'rt Runtime<D>>,
}

impl<'rt, D: Driver> Deref for CameraHandle<'rt, D> {
    type Target = D::Camera;

    fn deref(&self) -> &Self::Target {
        &self.camera
    }
}

impl<'rt, D: Driver> DerefMut for CameraHandle<'rt, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.camera
    }
}
