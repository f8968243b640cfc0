//! Driver status codes and per-frame completion status.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use std::fmt;

/// Status codes reported by the capture driver.
///
/// The same code space is used for the return value of driver calls and for
/// the status recorded on a completed frame buffer.
///
/// # Examples
///
/// ```
/// use pvrec::DriverStatus;
///
/// let status = DriverStatus::try_from(16u32).unwrap();
/// assert_eq!(status, DriverStatus::DataMissing);
/// assert_eq!(status.name(), "ePvErrDataMissing");
/// ```
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u32)]
pub enum DriverStatus {
    Success = 0,
    CameraFault = 1,
    InternalFault = 2,
    BadHandle = 3,
    BadParameter = 4,
    BadSequence = 5,
    NotFound = 6,
    AccessDenied = 7,
    Unplugged = 8,
    InvalidSetup = 9,
    Resources = 10,
    Bandwidth = 11,
    QueueFull = 12,
    BufferTooSmall = 13,
    Cancelled = 14,
    DataLost = 15,
    DataMissing = 16,
    Timeout = 17,
    OutOfRange = 18,
    WrongType = 19,
    Forbidden = 20,
    Unavailable = 21,
    Firewall = 22,
}

impl DriverStatus {
    /// Symbolic name of the status, as printed in driver diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            DriverStatus::Success => "ePvErrSuccess",
            DriverStatus::CameraFault => "ePvErrCameraFault",
            DriverStatus::InternalFault => "ePvErrInternalFault",
            DriverStatus::BadHandle => "ePvErrBadHandle",
            DriverStatus::BadParameter => "ePvErrBadParameter",
            DriverStatus::BadSequence => "ePvErrBadSequence",
            DriverStatus::NotFound => "ePvErrNotFound",
            DriverStatus::AccessDenied => "ePvErrAccessDenied",
            DriverStatus::Unplugged => "ePvErrUnplugged",
            DriverStatus::InvalidSetup => "ePvErrInvalidSetup",
            DriverStatus::Resources => "ePvErrResources",
            DriverStatus::Bandwidth => "ePvErrBandwidth",
            DriverStatus::QueueFull => "ePvErrQueueFull",
            DriverStatus::BufferTooSmall => "ePvErrBufferTooSmall",
            DriverStatus::Cancelled => "ePvErrCancelled",
            DriverStatus::DataLost => "ePvErrDataLost",
            DriverStatus::DataMissing => "ePvErrDataMissing",
            DriverStatus::Timeout => "ePvErrTimeout",
            DriverStatus::OutOfRange => "ePvErrOutOfRange",
            DriverStatus::WrongType => "ePvErrWrongType",
            DriverStatus::Forbidden => "ePvErrForbidden",
            DriverStatus::Unavailable => "ePvErrUnavailable",
            DriverStatus::Firewall => "ePvErrFirewall",
        }
    }

    /// Human readable description of the status.
    pub fn message(self) -> &'static str {
        match self {
            DriverStatus::Success => "No error",
            DriverStatus::CameraFault => "Unexpected camera fault",
            DriverStatus::InternalFault => "Unexpected fault in driver",
            DriverStatus::BadHandle => "Camera handle is invalid",
            DriverStatus::BadParameter => "Bad parameter to API call",
            DriverStatus::BadSequence => "Sequence of API calls is incorrect",
            DriverStatus::NotFound => "Camera or attribute not found",
            DriverStatus::AccessDenied => "Camera cannot be opened in the specified mode",
            DriverStatus::Unplugged => "Camera was unplugged",
            DriverStatus::InvalidSetup => "Setup is invalid (an attribute is invalid)",
            DriverStatus::Resources => "System/network resources or memory not available",
            DriverStatus::Bandwidth => "Bandwidth not available",
            DriverStatus::QueueFull => "Too many frames on queue",
            DriverStatus::BufferTooSmall => "Frame buffer is too small",
            DriverStatus::Cancelled => "Frame cancelled by user",
            DriverStatus::DataLost => "The data for the frame was lost",
            DriverStatus::DataMissing => "Some data in the frame is missing",
            DriverStatus::Timeout => "Timeout during wait",
            DriverStatus::OutOfRange => "Attribute value is out of the expected range",
            DriverStatus::WrongType => "Attribute is not this type (wrong access function)",
            DriverStatus::Forbidden => "Attribute write forbidden at this time",
            DriverStatus::Unavailable => "Attribute is not available at this time",
            DriverStatus::Firewall => "A firewall is blocking the traffic",
        }
    }
}

/// A raw status code as delivered by the driver.
///
/// Unlike [`DriverStatus`] this can hold codes the crate does not know about,
/// which still have to be reported faithfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(u32);

impl StatusCode {
    /// The success code.
    pub const SUCCESS: StatusCode = StatusCode(0);

    pub const fn from_raw(code: u32) -> Self {
        StatusCode(code)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns the known status for this code, if any.
    pub fn known(self) -> Option<DriverStatus> {
        DriverStatus::try_from(self.0).ok()
    }

    pub fn name(self) -> &'static str {
        self.known().map_or("", DriverStatus::name)
    }

    pub fn message(self) -> &'static str {
        self.known().map_or("Unknown error", DriverStatus::message)
    }
}

impl From<DriverStatus> for StatusCode {
    fn from(status: DriverStatus) -> Self {
        StatusCode(status.into())
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known() {
            Some(status) => write!(f, "{} [{}]", status.message(), status.name()),
            None => write!(f, "Unknown error [{}]", self.0),
        }
    }
}

/// Classification of a completed frame buffer.
///
/// Only [`FrameStatus::Ok`] and [`FrameStatus::DataMissing`] completions carry
/// image data that is mapped onto an output index; every other status is a
/// fault that leaves the requested index unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame arrived complete.
    Ok,
    /// The frame arrived but parts of its payload are invalid.
    DataMissing,
    /// The driver reported some other failure for this buffer.
    Fault(StatusCode),
}

impl FrameStatus {
    /// Returns `true` if the completion carries usable (possibly partial) data.
    pub fn carries_data(self) -> bool {
        matches!(self, FrameStatus::Ok | FrameStatus::DataMissing)
    }

    /// The raw status code behind this classification.
    pub fn code(self) -> StatusCode {
        match self {
            FrameStatus::Ok => StatusCode::SUCCESS,
            FrameStatus::DataMissing => DriverStatus::DataMissing.into(),
            FrameStatus::Fault(code) => code,
        }
    }
}

impl From<StatusCode> for FrameStatus {
    fn from(code: StatusCode) -> Self {
        match code.known() {
            Some(DriverStatus::Success) => FrameStatus::Ok,
            Some(DriverStatus::DataMissing) => FrameStatus::DataMissing,
            _ => FrameStatus::Fault(code),
        }
    }
}

impl From<DriverStatus> for FrameStatus {
    fn from(status: DriverStatus) -> Self {
        StatusCode::from(status).into()
    }
}
