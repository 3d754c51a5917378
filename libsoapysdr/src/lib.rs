//! Safe bindings to the SoapySDR C API.
//!
//! Every call into the driver layer goes through an [`Abi`] table: either
//! the system `libSoapySDR` (feature `system`) or the in-process [`mock`]
//! driver. Values crossing the boundary are converted to host types right
//! away and the foreign memory is released before the call returns.
//!
//! ```
//! use libsoapysdr::{mock, Complex, Device, Direction, Kwargs, StreamFlags};
//! use std::time::Duration;
//!
//! let dev = Device::make_str(mock::abi(), "driver=mock")?;
//! let mut rx = dev.setup_stream::<Complex<i8>>(Direction::Rx, &[0], &Kwargs::new())?;
//! rx.activate(StreamFlags::NONE, 0, 0)?;
//! let mut bufs = [vec![Complex::default(); 256]];
//! let mut flags = [StreamFlags::NONE];
//! let got = rx.read(&mut bufs, 256, &mut flags, Duration::from_millis(100))?;
//! assert!(got.elements > 0);
//! rx.deactivate(StreamFlags::NONE, 0)?;
//! rx.close()?;
//! # Ok::<(), libsoapysdr::Error>(())
//! ```

mod array;
mod channel;
mod device;
mod error;
pub mod ffi;
pub mod mock;
mod owned;
mod record;
mod settings;
mod stream;
mod time;
mod types;
mod view;

pub use device::Device;
pub use error::{Error, ErrorKind, Fault, Result};
pub use ffi::Abi;
pub use num_complex::Complex;
pub use owned::live_host_allocations;
pub use stream::{
    Format, ReadBuffer, Sample, Stream, StreamFlags, StreamState, StreamStatus, Transfer,
    WriteBuffer,
};
pub use time::{ticks_to_time_ns, time_ns_to_ticks};
pub use types::{ArgInfo, ArgType, ArgValue, Direction, Kwargs, Range};
