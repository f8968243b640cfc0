//! Validated options for recordings and camera setup.

use std::time::Duration;

use crate::{
    camera::{Attribute, Camera, PacketSize, PixelFormat},
    Error, Result,
};

/// Default number of frame buffers kept in flight.
pub const DEFAULT_NUM_BUFFERS: usize = 10;
/// Default maximum frame rate in Hz.
pub const DEFAULT_FRAME_RATE: f32 = 20.0;
/// Default exposure time in milliseconds.
pub const DEFAULT_EXPOSURE_MS: f64 = 15.0;
/// Default stream bandwidth in MB/s.
pub const DEFAULT_BANDWIDTH_MB: f64 = 115.0;

/// Options for a [`crate::Recorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderOptions {
    /// Number of buffers cycling through the capture queue.
    pub num_buffers: usize,
    /// Bound on a single wait for a frame; `None` waits forever.
    pub wait_timeout: Option<Duration>,
}

impl RecorderOptions {
    pub fn builder() -> RecorderOptionsBuilder {
        RecorderOptionsBuilder::new()
    }
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            num_buffers: DEFAULT_NUM_BUFFERS,
            wait_timeout: None,
        }
    }
}

/// Builder for [`RecorderOptions`].
#[derive(Debug, Clone, Default)]
pub struct RecorderOptionsBuilder {
    num_buffers: Option<usize>,
    wait_timeout: Option<Duration>,
}

impl RecorderOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn num_buffers(mut self, count: usize) -> Self {
        self.num_buffers = Some(count);
        self
    }

    /// Bound every wait for a frame. Without this the recorder waits forever,
    /// which is fine as long as the camera keeps streaming.
    #[must_use]
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Build the `RecorderOptions`
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer count is zero or the timeout is zero.
    pub fn build(self) -> Result<RecorderOptions> {
        let num_buffers = self.num_buffers.unwrap_or(DEFAULT_NUM_BUFFERS);
        if num_buffers < 1 {
            return Err(Error::InvalidConfiguration(
                "number of buffers must be at least 1".into(),
            ));
        }
        if self.wait_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidConfiguration(
                "wait timeout must be greater than 0".into(),
            ));
        }

        Ok(RecorderOptions {
            num_buffers,
            wait_timeout: self.wait_timeout,
        })
    }
}

/// Camera attributes to apply before recording.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    /// Maximum frame rate in Hz.
    pub frame_rate: f32,
    /// Exposure time in milliseconds.
    pub exposure_ms: f64,
    pub pixel_format: PixelFormat,
    pub packet_size: PacketSize,
    /// Stream bandwidth in MB/s.
    pub bandwidth_mb: f64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            exposure_ms: DEFAULT_EXPOSURE_MS,
            pixel_format: PixelFormat::Mono8,
            packet_size: PacketSize::Auto,
            bandwidth_mb: DEFAULT_BANDWIDTH_MB,
        }
    }
}

impl CaptureSettings {
    pub fn builder() -> CaptureSettingsBuilder {
        CaptureSettingsBuilder::default()
    }

    /// The attributes in the order they are applied.
    pub fn attributes(&self) -> [Attribute; 5] {
        [
            Attribute::FrameRate(self.frame_rate),
            Attribute::exposure_ms(self.exposure_ms),
            Attribute::PixelFormat(self.pixel_format),
            Attribute::PacketSize(self.packet_size),
            Attribute::bandwidth_mb(self.bandwidth_mb),
        ]
    }

    /// Configures `camera`, stopping at the first attribute it refuses.
    pub fn apply<C: Camera + ?Sized>(&self, camera: &mut C) -> Result<()> {
        for attribute in self.attributes() {
            log::debug!("setting {}: {attribute:?}", attribute.name());
            camera.configure(attribute)?;
        }
        Ok(())
    }
}

/// Builder for [`CaptureSettings`].
#[derive(Debug, Clone, Default)]
pub struct CaptureSettingsBuilder {
    frame_rate: Option<f32>,
    exposure_ms: Option<f64>,
    pixel_format: Option<PixelFormat>,
    packet_size: Option<PacketSize>,
    bandwidth_mb: Option<f64>,
}

impl CaptureSettingsBuilder {
    #[must_use]
    pub fn frame_rate(mut self, hz: f32) -> Self {
        self.frame_rate = Some(hz);
        self
    }

    #[must_use]
    pub fn exposure_ms(mut self, ms: f64) -> Self {
        self.exposure_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = Some(format);
        self
    }

    #[must_use]
    pub fn packet_size(mut self, size: PacketSize) -> Self {
        self.packet_size = Some(size);
        self
    }

    #[must_use]
    pub fn bandwidth_mb(mut self, mb_per_s: f64) -> Self {
        self.bandwidth_mb = Some(mb_per_s);
        self
    }

    /// Build the `CaptureSettings`
    ///
    /// # Errors
    ///
    /// Returns an error if the frame rate, exposure time or bandwidth is not
    /// a positive number.
    pub fn build(self) -> Result<CaptureSettings> {
        let defaults = CaptureSettings::default();
        let settings = CaptureSettings {
            frame_rate: self.frame_rate.unwrap_or(defaults.frame_rate),
            exposure_ms: self.exposure_ms.unwrap_or(defaults.exposure_ms),
            pixel_format: self.pixel_format.unwrap_or(defaults.pixel_format),
            packet_size: self.packet_size.unwrap_or(defaults.packet_size),
            bandwidth_mb: self.bandwidth_mb.unwrap_or(defaults.bandwidth_mb),
        };

        // NaN fails these comparisons as well
        if !(settings.frame_rate > 0.0) {
            return Err(Error::InvalidConfiguration(
                "frame rate must be greater than 0".into(),
            ));
        }
        if !(settings.exposure_ms > 0.0) {
            return Err(Error::InvalidConfiguration(
                "exposure time must be greater than 0".into(),
            ));
        }
        if !(settings.bandwidth_mb > 0.0) {
            return Err(Error::InvalidConfiguration(
                "bandwidth must be greater than 0".into(),
            ));
        }

        Ok(settings)
    }
}
