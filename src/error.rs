//! Error types for the pvrec library.

use std::io;
use thiserror::Error;

use crate::status::StatusCode;

/// The main error type for recorder operations.
///
/// This enum represents all possible errors that can occur while discovering,
/// configuring and recording from a camera. Errors fall into the broad
/// [`ErrorCategory`] classes used to decide how a caller should react.
#[derive(Debug, Error)]
pub enum Error {
    /// The capture driver library failed to initialize.
    #[error("Failed to initialize the capture driver: {0}")]
    InitializationFailed(String),

    /// Discovery finished without seeing any camera.
    #[error("No camera found.")]
    NoCameraFound,

    /// A camera was found but could not be opened.
    #[error("Cannot open camera: {0}")]
    OpenFailed(String),

    /// The camera sensor cannot be recorded (e.g. a colour sensor).
    #[error("Unsupported sensor: {0}")]
    UnsupportedSensor(String),

    /// Configuration parameters are invalid.
    ///
    /// This can occur when builder validation fails or a recording is
    /// requested with impossible parameters.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A driver call returned a failure status.
    #[error("{context} Driver: {}. [{}]", .code.message(), .code.name())]
    Driver {
        /// What the recorder was doing when the call failed.
        context: String,
        /// The raw status code reported by the driver.
        code: StatusCode,
    },

    /// A frame pool was allocated while a previous one was still alive.
    #[error("Frame pool is already allocated")]
    AlreadyAllocated,

    /// An operation was issued in a state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The output sink could not be created or updated.
    #[error("Output error: {0}")]
    Sink(String),

    /// Capture finished but some frames could not be stored.
    ///
    /// The full outcome remains available from [`crate::Recorder::report`].
    #[error("Best-effort recording completed with {failed} frame write error(s)")]
    IncompleteRecording {
        /// Number of `write_frame` calls that failed.
        failed: usize,
    },

    /// I/O operation failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad arguments or options supplied by the caller.
    Usage,
    /// No camera, or the camera could not be opened.
    Open,
    /// Enumeration, configuration or output creation failed before acquisition.
    Setup,
    /// Failure while frames were being acquired or stored.
    Recording,
}

impl Error {
    /// Builds a [`Error::Driver`] from a context message and a status code.
    pub fn driver(context: impl Into<String>, code: impl Into<StatusCode>) -> Self {
        Error::Driver {
            context: context.into(),
            code: code.into(),
        }
    }

    /// Returns the category a caller should use to report this error.
    ///
    /// Driver failures are classified as recording failures; callers that hit
    /// one during setup should report it as [`ErrorCategory::Setup`] themselves.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidConfiguration(_) => ErrorCategory::Usage,
            Error::InitializationFailed(_)
            | Error::NoCameraFound
            | Error::OpenFailed(_)
            | Error::UnsupportedSensor(_) => ErrorCategory::Open,
            Error::Sink(_) => ErrorCategory::Setup,
            Error::Driver { .. }
            | Error::AlreadyAllocated
            | Error::InvalidState(_)
            | Error::IncompleteRecording { .. }
            | Error::Io(_) => ErrorCategory::Recording,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::DriverStatus;

    #[test]
    fn test_driver_error_message_names_status() {
        let err = Error::driver("Cannot enqueue frame.", DriverStatus::QueueFull);
        assert_eq!(
            err.to_string(),
            "Cannot enqueue frame. Driver: Too many frames on queue. [ePvErrQueueFull]"
        );
    }

    #[test]
    fn test_unknown_code_message() {
        let err = Error::driver("Waiting for frame failed.", StatusCode::from_raw(99));
        assert!(err.to_string().contains("Unknown error"));
    }

    #[test]
    fn test_categories() {
        assert_eq!(Error::NoCameraFound.category(), ErrorCategory::Open);
        assert_eq!(
            Error::InvalidConfiguration("x".into()).category(),
            ErrorCategory::Usage
        );
        assert_eq!(
            Error::IncompleteRecording { failed: 2 }.category(),
            ErrorCategory::Recording
        );
    }
}
