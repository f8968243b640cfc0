//! Output sinks that store recorded frames.

use std::{
    collections::BTreeSet,
    fmt,
    path::{Path, PathBuf},
};

use crate::{
    camera::{Camera, PixelFormat},
    Error, Result,
};

/// Sample type of stored pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelDepth {
    /// Unsigned 8-bit samples.
    U8,
    /// Signed 16-bit samples.
    I16,
}

impl PixelDepth {
    pub fn bytes(self) -> usize {
        match self {
            PixelDepth::U8 => 1,
            PixelDepth::I16 => 2,
        }
    }
}

impl From<PixelFormat> for PixelDepth {
    fn from(format: PixelFormat) -> Self {
        match format {
            PixelFormat::Mono8 => PixelDepth::U8,
            PixelFormat::Mono16 => PixelDepth::I16,
        }
    }
}

/// A metadata value attached to a recording.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Text(String),
    Int(i64),
    Real(f64),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Text(s) => f.write_str(s),
            MetadataValue::Int(i) => write!(f, "{i}"),
            MetadataValue::Real(r) => write!(f, "{r}"),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_owned())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        MetadataValue::Int(value as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Real(value)
    }
}

impl From<f32> for MetadataValue {
    fn from(value: f32) -> Self {
        MetadataValue::Real(f64::from(value))
    }
}

/// Where and how a recording is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOptions {
    pub path: PathBuf,
    pub pixel_depth: PixelDepth,
    pub width: u32,
    pub height: u32,
    /// Number of frames the output holds.
    pub frame_count: u64,
    /// Replace an existing output.
    pub overwrite: bool,
}

impl SinkOptions {
    /// Options matching the current geometry and pixel format of `camera`.
    pub fn for_camera<C: Camera + ?Sized>(
        camera: &C,
        path: impl AsRef<Path>,
        frame_count: u64,
        overwrite: bool,
    ) -> Self {
        let sensor = camera.sensor();
        Self {
            path: path.as_ref().to_path_buf(),
            pixel_depth: camera.settings().pixel_format.into(),
            width: sensor.width,
            height: sensor.height,
            frame_count,
            overwrite,
        }
    }

    /// Size in bytes of one frame.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_depth.bytes()
    }

    /// Checks dimensions and count.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.frame_count == 0 {
            return Err(Error::Sink("Invalid width, height or count.".into()));
        }
        Ok(())
    }

    /// Checks the 1-based `index` and the payload length of a frame write.
    pub(crate) fn check_frame(&self, index: u64, data: &[u8]) -> Result<()> {
        if index < 1 || index > self.frame_count {
            return Err(Error::Sink(format!(
                "Frame index {index} out of bounds (1..={}).",
                self.frame_count
            )));
        }
        if data.len() < self.frame_bytes() {
            return Err(Error::Sink(format!(
                "Frame {index} has {} bytes, expected {}.",
                data.len(),
                self.frame_bytes()
            )));
        }
        Ok(())
    }
}

/// Persistent storage for recorded frames.
///
/// Frames are addressed by their 1-based index. Every write is committed
/// immediately, so frames written before a failure stay valid.
pub trait FrameSink {
    /// Stores the data of frame `index`.
    fn write_frame(&mut self, index: u64, data: &[u8]) -> Result<()>;

    /// Stores a key/value pair describing the recording.
    fn write_metadata(&mut self, key: &str, value: MetadataValue, comment: &str) -> Result<()>;

    /// Flushes and closes the output. Closing twice is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Closes the sink and removes the output it created.
    ///
    /// Used when a recording failed before any frame was stored.
    fn discard(&mut self) -> Result<()> {
        self.close()
    }
}

impl<S: FrameSink + ?Sized> FrameSink for &mut S {
    fn write_frame(&mut self, index: u64, data: &[u8]) -> Result<()> {
        (**self).write_frame(index, data)
    }

    fn write_metadata(&mut self, key: &str, value: MetadataValue, comment: &str) -> Result<()> {
        (**self).write_metadata(key, value, comment)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn discard(&mut self) -> Result<()> {
        (**self).discard()
    }
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn write_frame(&mut self, index: u64, data: &[u8]) -> Result<()> {
        (**self).write_frame(index, data)
    }

    fn write_metadata(&mut self, key: &str, value: MetadataValue, comment: &str) -> Result<()> {
        (**self).write_metadata(key, value, comment)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn discard(&mut self) -> Result<()> {
        (**self).discard()
    }
}

/// One metadata entry kept by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    pub key: String,
    pub value: MetadataValue,
    pub comment: String,
}

/// A sink that keeps everything in memory.
///
/// Useful for embedding and for tests: writes of selected indices can be made
/// to fail.
#[derive(Debug, Default)]
pub struct MemorySink {
    frames: Vec<(u64, Vec<u8>)>,
    metadata: Vec<MetadataEntry>,
    failing: BTreeSet<u64>,
    fail_metadata: bool,
    closed: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write of frame `index` fail.
    pub fn fail_writes_of(mut self, index: u64) -> Self {
        self.failing.insert(index);
        self
    }

    /// Makes every metadata write fail.
    pub fn fail_metadata(mut self) -> Self {
        self.fail_metadata = true;
        self
    }

    /// Frames in write order.
    pub fn frames(&self) -> &[(u64, Vec<u8>)] {
        &self.frames
    }

    /// Indices in write order.
    pub fn indices(&self) -> Vec<u64> {
        self.frames.iter().map(|(index, _)| *index).collect()
    }

    pub fn frame(&self, index: u64) -> Option<&[u8]> {
        self.frames
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, data)| data.as_slice())
    }

    pub fn metadata(&self) -> &[MetadataEntry] {
        &self.metadata
    }

    /// Latest value written for `key`.
    pub fn metadata_value(&self, key: &str) -> Option<&MetadataValue> {
        self.metadata
            .iter()
            .rev()
            .find(|entry| entry.key == key)
            .map(|entry| &entry.value)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, index: u64, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::Sink("Cannot write frame, sink closed.".into()));
        }
        if self.failing.contains(&index) {
            return Err(Error::Sink(format!("Cannot write frame {index}.")));
        }
        self.frames.push((index, data.to_vec()));
        Ok(())
    }

    fn write_metadata(&mut self, key: &str, value: MetadataValue, comment: &str) -> Result<()> {
        if self.closed || self.fail_metadata {
            return Err(Error::Sink("Cannot write header entry.".into()));
        }
        self.metadata.push(MetadataEntry {
            key: key.to_owned(),
            value,
            comment: comment.to_owned(),
        });
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn discard(&mut self) -> Result<()> {
        self.frames.clear();
        self.metadata.clear();
        self.close()
    }
}
