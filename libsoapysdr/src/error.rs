//! Error types for the SoapySDR bindings.
//!
//! Two families are kept apart. [`ErrorKind`] covers status codes reported by
//! the driver layer (timeouts, overflows and so on); callers may decide to
//! retry on those. [`Fault`] covers misuse of the binding itself or malformed
//! data handed back by the driver; these are programmer errors and are never
//! mapped onto a status kind.

/// Status reported by a driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorKind {
    /// The call did not complete within the supplied timeout.
    #[error("timeout")]
    Timeout,
    /// Non-specific stream error.
    #[error("non-specific stream error")]
    TransportFault,
    /// A read saw malformed data, for example a bad packet.
    #[error("data corruption during read")]
    DataCorruption,
    /// An internal buffer filled up during a read.
    #[error("overflow during read")]
    Overflow,
    /// The requested operation or flag is not supported by the driver.
    #[error("operation or flag not supported by the driver")]
    UnsupportedOperation,
    /// A stream time was expired (late) or too early to process.
    #[error("stream time expired or too early")]
    TimingFault,
    /// A write starved a continuous stream.
    #[error("write caused an underflow")]
    Underflow,
    /// A code outside the known set. The raw code is kept.
    #[error("unknown status code {0}")]
    Unknown(i32),
}

impl ErrorKind {
    pub const TIMEOUT: i32 = -1;
    pub const STREAM_ERROR: i32 = -2;
    pub const CORRUPTION: i32 = -3;
    pub const OVERFLOW: i32 = -4;
    pub const NOT_SUPPORTED: i32 = -5;
    pub const TIME_ERROR: i32 = -6;
    pub const UNDERFLOW: i32 = -7;

    /// Map a driver status code. `0` means success and yields `None`.
    pub fn from_code(code: i32) -> Option<ErrorKind> {
        let kind = match code {
            0 => return None,
            Self::TIMEOUT => ErrorKind::Timeout,
            Self::STREAM_ERROR => ErrorKind::TransportFault,
            Self::CORRUPTION => ErrorKind::DataCorruption,
            Self::OVERFLOW => ErrorKind::Overflow,
            Self::NOT_SUPPORTED => ErrorKind::UnsupportedOperation,
            Self::TIME_ERROR => ErrorKind::TimingFault,
            Self::UNDERFLOW => ErrorKind::Underflow,
            other => ErrorKind::Unknown(other),
        };
        Some(kind)
    }

    /// The driver code this kind was built from.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Timeout => Self::TIMEOUT,
            ErrorKind::TransportFault => Self::STREAM_ERROR,
            ErrorKind::DataCorruption => Self::CORRUPTION,
            ErrorKind::Overflow => Self::OVERFLOW,
            ErrorKind::UnsupportedOperation => Self::NOT_SUPPORTED,
            ErrorKind::TimingFault => Self::TIME_ERROR,
            ErrorKind::Underflow => Self::UNDERFLOW,
            ErrorKind::Unknown(code) => code,
        }
    }
}


/// Misuse of the binding or malformed data from the driver layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("expected {expected} channel buffers, got {actual}")]
    ChannelCount { expected: usize, actual: usize },

    #[error("expected {expected} flag words, got {actual}")]
    FlagCount { expected: usize, actual: usize },

    #[error("buffer for channel {channel} holds {len} elements, {needed} requested")]
    BufferTooShort {
        channel: usize,
        len: usize,
        needed: usize,
    },

    #[error("null array with a reported length of {len}")]
    NullArray { len: usize },

    #[error("null string in a record")]
    NullString,

    #[error("string contains an interior NUL byte")]
    InteriorNul,

    #[error("unknown argument type tag {0}")]
    UnknownArgType(i32),

    #[error("key `{0}` appears more than once in a map record")]
    DuplicateKey(String),

    #[error("`{op}` is not permitted while the stream is {state}")]
    InvalidState {
        op: &'static str,
        state: crate::stream::StreamState,
    },

    #[error("a stream needs at least one channel")]
    EmptyChannels,

    #[error("bulk call returned a null device handle at index {0}")]
    NullHandle(usize),

    #[error("devices in one bulk release belong to different ABI tables")]
    MixedAbi,

    #[error("host allocation of {0} bytes failed")]
    OutOfMemory(usize),
}

/// The error type for all binding operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A status code returned by the driver layer.
    #[error("driver status: {0}")]
    Status(#[from] ErrorKind),

    /// A construct or setup call failed; carries the driver's last error.
    #[error("driver error: {0}")]
    Driver(String),

    /// Programmer error or malformed foreign data.
    #[error("fatal: {0}")]
    Fault(#[from] Fault),
}

impl Error {
    /// Marshalling defects are fatal and must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fault(_))
    }

    /// The status kind, if this error came from a driver status code.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Status(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Turn a status return into a `Result`.
pub(crate) fn check(code: i32) -> Result<()> {
    match ErrorKind::from_code(code) {
        None => Ok(()),
        Some(kind) => Err(Error::Status(kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_messages() {
        assert_eq!(ErrorKind::Timeout.to_string(), "timeout");
        assert_eq!(ErrorKind::Unknown(-12).to_string(), "unknown status code -12");
        let e = Error::Status(ErrorKind::Overflow);
        assert_eq!(e.to_string(), "driver status: overflow during read");
        let source = std::error::Error::source(&e).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("overflow during read"));
    }

    #[test]
    fn status_code_table() {
        let expected = [
            (0, None),
            (-1, Some(ErrorKind::Timeout)),
            (-2, Some(ErrorKind::TransportFault)),
            (-3, Some(ErrorKind::DataCorruption)),
            (-4, Some(ErrorKind::Overflow)),
            (-5, Some(ErrorKind::UnsupportedOperation)),
            (-6, Some(ErrorKind::TimingFault)),
            (-7, Some(ErrorKind::Underflow)),
            (-99, Some(ErrorKind::Unknown(-99))),
        ];
        for (code, kind) in expected {
            assert_eq!(ErrorKind::from_code(code), kind, "code {code}");
        }
    }

    #[test]
    fn unknown_keeps_raw_code() {
        let kind = ErrorKind::from_code(-42).unwrap();
        assert_eq!(kind.code(), -42);
        assert_eq!(ErrorKind::Overflow.code(), -4);
    }

    #[test]
    fn check_maps_codes() {
        assert!(check(0).is_ok());
        assert_eq!(check(-1), Err(Error::Status(ErrorKind::Timeout)));
    }

    #[test]
    fn faults_are_fatal() {
        let e: Error = Fault::ChannelCount {
            expected: 4,
            actual: 1,
        }
        .into();
        assert!(e.is_fatal());
        assert_eq!(e.kind(), None);
        assert_eq!(e.to_string(), "fatal: expected 4 channel buffers, got 1");

        let e: Error = ErrorKind::Timeout.into();
        assert!(!e.is_fatal());
        assert_eq!(e.kind(), Some(ErrorKind::Timeout));
    }

    #[test]
    fn error_display_driver() {
        let e = Error::Driver("no match".into());
        assert_eq!(e.to_string(), "driver error: no match");
    }
}
