//! Capture driver abstraction: cameras, their identity and their attributes.
//!
//! The recorder never talks to hardware directly. It drives a [`Camera`], which
//! accepts empty [`FrameBuffer`]s, fills them asynchronously and hands them
//! back with a completion record. A [`Driver`] is the library-level entry point
//! that lists and opens cameras.

use std::{fmt, str::FromStr, time::Duration};

use crate::{
    buffer::{FrameBuffer, SlotId},
    Error, Result,
};

/// Monochrome pixel formats the recorder can store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8 bits per pixel.
    #[default]
    Mono8,
    /// 16 bits per pixel, little-endian samples.
    Mono16,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Mono16 => 2,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            PixelFormat::Mono8 => 8,
            PixelFormat::Mono16 => 16,
        }
    }

    /// Maps a bit depth (8 or 16) to a pixel format.
    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            8 => Ok(PixelFormat::Mono8),
            16 => Ok(PixelFormat::Mono16),
            other => Err(Error::InvalidConfiguration(format!(
                "bit depth must be 8 or 16, got {other}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::Mono16 => "Mono16",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Mono8" => Ok(PixelFormat::Mono8),
            "Mono16" => Ok(PixelFormat::Mono16),
            other => Err(Error::InvalidConfiguration(format!(
                "unsupported pixel format '{other}'"
            ))),
        }
    }
}

/// Kind of image sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorType {
    Mono,
    Bayer,
}

/// Dimensions and depth of the camera sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorGeometry {
    pub width: u32,
    pub height: u32,
    /// Native bit depth of the sensor.
    pub bits: u32,
    pub sensor_type: SensorType,
}

impl SensorGeometry {
    /// Size in bytes of one full frame in the given pixel format.
    pub fn frame_size(&self, format: PixelFormat) -> usize {
        self.width as usize * self.height as usize * format.bytes_per_pixel()
    }
}

impl fmt::Display for SensorGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.bits)
    }
}

/// Access rights a client may be granted on a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Full control; required for recording.
    Master,
    /// Read-only observation of a camera controlled elsewhere.
    Monitor,
    None,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessMode::Master => "Master",
            AccessMode::Monitor => "Monitor",
            AccessMode::None => "None",
        })
    }
}

/// Physical interface a camera is attached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceType {
    GigE,
    Firewire,
    Unknown,
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InterfaceType::GigE => "GigE",
            InterfaceType::Firewire => "Firewire",
            InterfaceType::Unknown => "Unknown",
        })
    }
}

/// Identity of a camera as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub unique_id: u64,
    pub name: String,
    pub model: String,
    pub serial_number: String,
    pub firmware_version: String,
    pub permitted_access: AccessMode,
    pub interface_type: InterfaceType,
    pub interface_id: u64,
}

/// Which camera to open.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CameraSelector {
    /// The first camera that grants master access.
    #[default]
    First,
    /// The camera with this unique id.
    UniqueId(u64),
}

impl CameraSelector {
    /// Maps the conventional "0 means any camera" id to a selector.
    pub fn from_id(id: u64) -> Self {
        if id == 0 {
            CameraSelector::First
        } else {
            CameraSelector::UniqueId(id)
        }
    }

    pub fn matches(&self, info: &CameraInfo) -> bool {
        match self {
            CameraSelector::First => true,
            CameraSelector::UniqueId(id) => info.unique_id == *id,
        }
    }
}

/// Network packet size used for streaming.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PacketSize {
    /// Negotiate the largest size the network path supports.
    #[default]
    Auto,
    /// Fixed packet size in bytes.
    Fixed(u32),
}

impl PacketSize {
    /// Upper bound used when negotiating [`PacketSize::Auto`].
    pub const AUTO_MAX: u32 = 8228;

    /// Maps the conventional "0 means automatic" value to a packet size.
    pub fn from_bytes(bytes: u32) -> Self {
        if bytes == 0 {
            PacketSize::Auto
        } else {
            PacketSize::Fixed(bytes)
        }
    }
}

/// A configurable camera attribute together with its new value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Attribute {
    /// Maximum frame rate in Hz.
    FrameRate(f32),
    /// Exposure time in microseconds.
    ExposureMicros(u32),
    PixelFormat(PixelFormat),
    PacketSize(PacketSize),
    /// Stream bandwidth limit in bytes per second.
    StreamBytesPerSecond(u32),
}

impl Attribute {
    /// Exposure attribute from a time in milliseconds, rounded to whole microseconds.
    pub fn exposure_ms(ms: f64) -> Self {
        Attribute::ExposureMicros((ms * 1e3 + 0.5) as u32)
    }

    /// Bandwidth attribute from megabytes per second, rounded to whole bytes.
    pub fn bandwidth_mb(mb_per_s: f64) -> Self {
        Attribute::StreamBytesPerSecond((mb_per_s * 1e6 + 0.5) as u32)
    }

    /// Name of the attribute, for messages.
    pub fn name(&self) -> &'static str {
        match self {
            Attribute::FrameRate(_) => "frame rate",
            Attribute::ExposureMicros(_) => "exposure time",
            Attribute::PixelFormat(_) => "pixel format",
            Attribute::PacketSize(_) => "packet size",
            Attribute::StreamBytesPerSecond(_) => "bandwidth",
        }
    }
}

/// Current values of the camera attributes, as read back from the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSettings {
    pub frame_rate: f32,
    pub exposure_us: u32,
    pub pixel_format: PixelFormat,
    /// Effective packet size in bytes.
    pub packet_size: u32,
    pub stream_bytes_per_second: u32,
}

impl CameraSettings {
    pub fn exposure_ms(&self) -> f64 {
        f64::from(self.exposure_us) / 1e3
    }

    pub fn bandwidth_mb(&self) -> f64 {
        f64::from(self.stream_bytes_per_second) / 1e6
    }
}

/// A buffer the camera refused to queue, handed back with the reason.
#[derive(Debug)]
pub struct Rejected {
    pub buffer: FrameBuffer,
    pub error: Error,
}

/// An open camera: the capture queue the recorder feeds.
///
/// Buffers move into the camera with [`queue_frame`](Camera::queue_frame) and
/// come back, completed, from [`wait_frame_done`](Camera::wait_frame_done).
/// Dropping the camera closes it.
pub trait Camera {
    fn info(&self) -> &CameraInfo;

    fn sensor(&self) -> SensorGeometry;

    /// IP address of the device, if it is network attached.
    fn ip_address(&self) -> Option<&str>;

    /// Sets one attribute.
    fn configure(&mut self, attribute: Attribute) -> Result<()>;

    /// Reads back the current attribute values.
    fn settings(&self) -> CameraSettings;

    /// Prepares the host side of the capture stream.
    fn start_capture(&mut self) -> Result<()>;

    /// Tears down the host side of the capture stream.
    fn end_capture(&mut self) -> Result<()>;

    /// Hands a buffer to the camera for filling.
    ///
    /// Any previous completion record on the buffer is cleared.
    fn queue_frame(&mut self, buffer: FrameBuffer) -> std::result::Result<(), Rejected>;

    /// Blocks until the queued buffer `slot` completes and returns it.
    ///
    /// `timeout == None` waits without bound.
    fn wait_frame_done(&mut self, slot: SlotId, timeout: Option<Duration>) -> Result<FrameBuffer>;

    /// Starts exposing frames.
    fn start_acquisition(&mut self) -> Result<()>;

    fn stop_acquisition(&mut self) -> Result<()>;

    /// Cancels every queued buffer and returns all buffers the camera still holds.
    fn clear_queue(&mut self) -> Result<Vec<FrameBuffer>>;
}

impl<C: Camera + ?Sized> Camera for Box<C> {
    fn info(&self) -> &CameraInfo {
        (**self).info()
    }

    fn sensor(&self) -> SensorGeometry {
        (**self).sensor()
    }

    fn ip_address(&self) -> Option<&str> {
        (**self).ip_address()
    }

    fn configure(&mut self, attribute: Attribute) -> Result<()> {
        (**self).configure(attribute)
    }

    fn settings(&self) -> CameraSettings {
        (**self).settings()
    }

    fn start_capture(&mut self) -> Result<()> {
        (**self).start_capture()
    }

    fn end_capture(&mut self) -> Result<()> {
        (**self).end_capture()
    }

    fn queue_frame(&mut self, buffer: FrameBuffer) -> std::result::Result<(), Rejected> {
        (**self).queue_frame(buffer)
    }

    fn wait_frame_done(&mut self, slot: SlotId, timeout: Option<Duration>) -> Result<FrameBuffer> {
        (**self).wait_frame_done(slot, timeout)
    }

    fn start_acquisition(&mut self) -> Result<()> {
        (**self).start_acquisition()
    }

    fn stop_acquisition(&mut self) -> Result<()> {
        (**self).stop_acquisition()
    }

    fn clear_queue(&mut self) -> Result<Vec<FrameBuffer>> {
        (**self).clear_queue()
    }
}

/// A capture driver library.
///
/// Drivers are used through a [`crate::Runtime`], which brackets their use
/// with [`initialize`](Driver::initialize) and [`uninitialize`](Driver::uninitialize).
pub trait Driver: Send + Sync {
    type Camera: Camera;

    fn initialize(&self) -> Result<()>;

    fn uninitialize(&self);

    /// Version string of the driver library.
    fn version(&self) -> String;

    /// Cameras currently visible. May grow while discovery is in progress.
    fn camera_list(&self) -> Vec<CameraInfo>;

    /// Opens a camera with master access.
    fn open(&self, info: &CameraInfo) -> Result<Self::Camera>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_bits() {
        assert_eq!(PixelFormat::from_bits(8).unwrap(), PixelFormat::Mono8);
        assert_eq!(PixelFormat::from_bits(16).unwrap(), PixelFormat::Mono16);
        assert!(PixelFormat::from_bits(12).is_err());
    }

    #[test]
    fn test_pixel_format_parse() {
        assert_eq!("Mono16".parse::<PixelFormat>().unwrap(), PixelFormat::Mono16);
        assert!("Bayer8".parse::<PixelFormat>().is_err());
        assert_eq!(PixelFormat::Mono8.to_string(), "Mono8");
    }

    #[test]
    fn test_frame_size() {
        let sensor = SensorGeometry {
            width: 640,
            height: 480,
            bits: 12,
            sensor_type: SensorType::Mono,
        };
        assert_eq!(sensor.frame_size(PixelFormat::Mono8), 640 * 480);
        assert_eq!(sensor.frame_size(PixelFormat::Mono16), 640 * 480 * 2);
        assert_eq!(sensor.to_string(), "640x480@12");
    }

    #[test]
    fn test_unit_conversions_round() {
        assert_eq!(Attribute::exposure_ms(15.0), Attribute::ExposureMicros(15_000));
        assert_eq!(Attribute::exposure_ms(0.0004), Attribute::ExposureMicros(0));
        assert_eq!(Attribute::exposure_ms(0.0006), Attribute::ExposureMicros(1));
        assert_eq!(
            Attribute::bandwidth_mb(115.0),
            Attribute::StreamBytesPerSecond(115_000_000)
        );
    }

    #[test]
    fn test_selector() {
        let info = CameraInfo {
            unique_id: 42,
            name: "cam".into(),
            model: "model".into(),
            serial_number: "1".into(),
            firmware_version: "1.0".into(),
            permitted_access: AccessMode::Master,
            interface_type: InterfaceType::GigE,
            interface_id: 0,
        };
        assert_eq!(CameraSelector::from_id(0), CameraSelector::First);
        assert!(CameraSelector::First.matches(&info));
        assert!(CameraSelector::from_id(42).matches(&info));
        assert!(!CameraSelector::from_id(7).matches(&info));
    }

    #[test]
    fn test_packet_size_from_bytes() {
        assert_eq!(PacketSize::from_bytes(0), PacketSize::Auto);
        assert_eq!(PacketSize::from_bytes(1500), PacketSize::Fixed(1500));
    }
}
