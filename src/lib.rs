//! Frame recorder for monochrome machine-vision cameras.
//!
//! This crate drives a camera's capture queue with a small ring of reusable
//! frame buffers, reconciles the camera's own frame counter against the
//! frames the caller asked for, and stores every good frame in an output sink
//! (a FITS data cube, a PNG sequence, or memory).
//!
//! # Quick Start
//!
//! ```
//! use pvrec::{
//!     sim::{FrameScript, SimCameraSpec, SimDriver},
//!     CameraSelector, CaptureSettings, MemorySink, Recorder, RecorderOptions, Runtime,
//! };
//!
//! # fn main() -> Result<(), pvrec::Error> {
//! // Initialize the driver runtime
//! let spec = SimCameraSpec::new(1, 320, 240).script(FrameScript::lossy(100, 7, 0));
//! let runtime = Runtime::new(SimDriver::new(vec![spec]))?;
//!
//! // Open and configure a camera
//! let mut camera = runtime.open_camera(CameraSelector::First)?;
//! CaptureSettings::builder()
//!     .frame_rate(30.0)
//!     .exposure_ms(5.0)
//!     .build()?
//!     .apply(&mut *camera)?;
//!
//! // Record 20 frames
//! let mut sink = MemorySink::new();
//! let mut recorder = Recorder::new(RecorderOptions::default());
//! let report = recorder.record(&mut *camera, &mut sink, 20)?;
//!
//! assert_eq!(report.dropped, vec![7, 14]);
//! assert_eq!(report.resolved(), 20);
//! # Ok(())
//! # }
//! ```
//!
//! # Core Concepts
//!
//! ## Runtime Management
//!
//! The [`Runtime`] owns the initialization of a capture [`Driver`]. It must be
//! created before any camera is opened and uninitializes the driver when the
//! last clone is dropped.
//!
//! ## Buffers
//!
//! A [`FramePool`] holds the session's [`FrameBuffer`]s. Buffers are moved,
//! never shared: into the camera when queued, back to the recorder when they
//! complete.
//!
//! ## Recording
//!
//! The [`Recorder`] keeps all buffers queued and waits for them in the order
//! they were queued. A frame the camera skipped is reported as dropped, a
//! frame with partial data as missing data; both are listed in the
//! [`OutcomeReport`]. Progress can be followed through [`FrameEvent`]s.
//!
//! ## Output
//!
//! Anything implementing [`FrameSink`] can store frames. [`FitsSink`] writes a
//! FITS cube, [`PngSequenceSink`] one PNG per frame.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

// Internal modules
mod error;

// Public modules
pub mod async_runtime;
pub mod buffer;
pub mod camera;
pub mod completion;
pub mod config;
pub mod fits;
pub mod png_sink;
pub mod recorder;
pub mod runtime;
pub mod sim;
pub mod sink;
pub mod status;

// Re-exports
#[cfg(feature = "tokio")]
pub use async_runtime::tokio;
pub use {
    buffer::{Completion, FrameBuffer, FramePool, SlotId},
    camera::{
        AccessMode, Attribute, Camera, CameraInfo, CameraSelector, CameraSettings, Driver,
        InterfaceType, PacketSize, PixelFormat, Rejected, SensorGeometry, SensorType,
    },
    config::{CaptureSettings, CaptureSettingsBuilder, RecorderOptions, RecorderOptionsBuilder},
    error::*,
    fits::FitsSink,
    png_sink::PngSequenceSink,
    recorder::{FrameEvent, OutcomeReport, Recorder, SessionState, WriteFailure},
    runtime::{CameraHandle, Runtime},
    sink::{FrameSink, MemorySink, MetadataValue, PixelDepth, SinkOptions},
    status::{DriverStatus, FrameStatus, StatusCode},
};

/// Alias for Result with our Error type
pub type Result<T> = std::result::Result<T, crate::error::Error>;

// Tests
#[cfg(test)]
#[path = "tests.rs"]
mod tests;
