//! Per-channel properties: channel info, stream capabilities, antennas,
//! gains, frequency and sample rate.

use std::ffi::CString;

use libc::size_t;

use crate::array;
use crate::device::Device;
use crate::error::{Fault, Result};
use crate::record;
use crate::types::{ArgInfo, Direction, Kwargs, Range};

pub(crate) fn c_string(s: &str) -> std::result::Result<CString, Fault> {
    CString::new(s).map_err(|_| Fault::InteriorNul)
}

impl Device {
    pub fn num_channels(&self, dir: Direction) -> Result<usize> {
        let n = unsafe { (self.abi().get_num_channels)(self.raw(), dir.raw()) };
        self.outcome()?;
        Ok(n)
    }

    pub fn channel_info(&self, dir: Direction, channel: usize) -> Result<Kwargs> {
        let raw = unsafe { (self.abi().get_channel_info)(self.raw(), dir.raw(), channel) };
        self.take_kwargs(raw)
    }

    /// Whether the channel can stream in both directions at once.
    pub fn full_duplex(&self, dir: Direction, channel: usize) -> Result<bool> {
        let v = unsafe { (self.abi().get_full_duplex)(self.raw(), dir.raw(), channel) };
        self.outcome()?;
        Ok(v)
    }

    /// Format strings the channel can stream, e.g. `"CS16"`.
    pub fn stream_formats(&self, dir: Direction, channel: usize) -> Result<Vec<String>> {
        let mut len: size_t = 0;
        let ptr = unsafe { (self.abi().get_stream_formats)(self.raw(), dir.raw(), channel, &mut len) };
        self.take_strings(ptr, len)
    }

    /// The hardware's native format and its full-scale value.
    pub fn native_stream_format(&self, dir: Direction, channel: usize) -> Result<(String, f64)> {
        let mut full_scale = 0.0;
        let ptr = unsafe {
            (self.abi().get_native_stream_format)(self.raw(), dir.raw(), channel, &mut full_scale)
        };
        Ok((self.take_string(ptr)?, full_scale))
    }

    pub fn stream_args_info(&self, dir: Direction, channel: usize) -> Result<Vec<ArgInfo>> {
        let mut len: size_t = 0;
        let ptr = unsafe { (self.abi().get_stream_args_info)(self.raw(), dir.raw(), channel, &mut len) };
        self.take_arg_info_list(ptr, len)
    }

    pub fn list_antennas(&self, dir: Direction, channel: usize) -> Result<Vec<String>> {
        let mut len: size_t = 0;
        let ptr = unsafe { (self.abi().list_antennas)(self.raw(), dir.raw(), channel, &mut len) };
        self.take_strings(ptr, len)
    }

    pub fn set_antenna(&self, dir: Direction, channel: usize, name: &str) -> Result<()> {
        let name = c_string(name)?;
        let code = unsafe { (self.abi().set_antenna)(self.raw(), dir.raw(), channel, name.as_ptr()) };
        self.status(code)
    }

    pub fn antenna(&self, dir: Direction, channel: usize) -> Result<String> {
        let ptr = unsafe { (self.abi().get_antenna)(self.raw(), dir.raw(), channel) };
        self.take_string(ptr)
    }

    /// Names of the amplification elements in the chain, in order.
    pub fn list_gains(&self, dir: Direction, channel: usize) -> Result<Vec<String>> {
        let mut len: size_t = 0;
        let ptr = unsafe { (self.abi().list_gains)(self.raw(), dir.raw(), channel, &mut len) };
        self.take_strings(ptr, len)
    }

    /// Set the overall gain in dB.
    pub fn set_gain(&self, dir: Direction, channel: usize, db: f64) -> Result<()> {
        let code = unsafe { (self.abi().set_gain)(self.raw(), dir.raw(), channel, db) };
        self.status(code)
    }

    pub fn gain(&self, dir: Direction, channel: usize) -> Result<f64> {
        let v = unsafe { (self.abi().get_gain)(self.raw(), dir.raw(), channel) };
        self.outcome()?;
        Ok(v)
    }

    pub fn gain_range(&self, dir: Direction, channel: usize) -> Result<Range> {
        let raw = unsafe { (self.abi().get_gain_range)(self.raw(), dir.raw(), channel) };
        self.outcome()?;
        Ok(record::range_from_foreign(&raw))
    }

    /// Tune the channel to `hz`. `args` may carry tuning hints such as
    /// `OFFSET`.
    pub fn set_frequency(&self, dir: Direction, channel: usize, hz: f64, args: &Kwargs) -> Result<()> {
        let args = array::kwargs_to_foreign(args)?;
        let code = unsafe {
            (self.abi().set_frequency)(self.raw(), dir.raw(), channel, hz, args.as_ptr())
        };
        self.status(code)
    }

    pub fn frequency(&self, dir: Direction, channel: usize) -> Result<f64> {
        let v = unsafe { (self.abi().get_frequency)(self.raw(), dir.raw(), channel) };
        self.outcome()?;
        Ok(v)
    }

    pub fn frequency_range(&self, dir: Direction, channel: usize) -> Result<Vec<Range>> {
        let mut len: size_t = 0;
        let ptr = unsafe { (self.abi().get_frequency_range)(self.raw(), dir.raw(), channel, &mut len) };
        self.take_ranges(ptr, len)
    }

    pub fn set_sample_rate(&self, dir: Direction, channel: usize, rate: f64) -> Result<()> {
        let code = unsafe { (self.abi().set_sample_rate)(self.raw(), dir.raw(), channel, rate) };
        self.status(code)
    }

    pub fn sample_rate(&self, dir: Direction, channel: usize) -> Result<f64> {
        let v = unsafe { (self.abi().get_sample_rate)(self.raw(), dir.raw(), channel) };
        self.outcome()?;
        Ok(v)
    }

    pub fn sample_rate_range(&self, dir: Direction, channel: usize) -> Result<Vec<Range>> {
        let mut len: size_t = 0;
        let ptr =
            unsafe { (self.abi().get_sample_rate_range)(self.raw(), dir.raw(), channel, &mut len) };
        self.take_ranges(ptr, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::mock;

    fn open() -> Device {
        Device::make_str(mock::abi(), "driver=mock").unwrap()
    }

    #[test]
    fn channel_counts() {
        let dev = open();
        assert_eq!(dev.num_channels(Direction::Rx).unwrap(), mock::RX_CHANNELS);
        assert_eq!(dev.num_channels(Direction::Tx).unwrap(), mock::TX_CHANNELS);
        assert_eq!(dev.channel_info(Direction::Rx, 2).unwrap().get("name"), Some("RX2"));
        assert!(dev.full_duplex(Direction::Tx, 0).unwrap());
    }

    #[test]
    fn bad_channel_reports_driver_error() {
        let dev = open();
        let err = dev.list_antennas(Direction::Tx, 5).unwrap_err();
        assert_eq!(err, Error::Driver("no TX channel 5".into()));
        assert!(dev.gain(Direction::Rx, 9).is_err());
        assert!(dev.channel_info(Direction::Rx, 9).is_err());
    }

    #[test]
    fn antennas() {
        let dev = open();
        assert_eq!(dev.list_antennas(Direction::Rx, 0).unwrap(), vec!["RX1", "RX2"]);
        dev.set_antenna(Direction::Rx, 0, "RX2").unwrap();
        assert_eq!(dev.antenna(Direction::Rx, 0).unwrap(), "RX2");
        assert_eq!(dev.antenna(Direction::Rx, 1).unwrap(), "RX1");
        assert!(dev.set_antenna(Direction::Rx, 0, "TX").is_err());
        assert_eq!(
            dev.set_antenna(Direction::Rx, 0, "R\0X"),
            Err(Error::Fault(Fault::InteriorNul))
        );
    }

    #[test]
    fn gains() {
        let dev = open();
        assert_eq!(dev.list_gains(Direction::Rx, 0).unwrap(), vec!["LNA", "VGA"]);
        let range = dev.gain_range(Direction::Rx, 0).unwrap();
        assert_eq!(range, Range::new(0.0, 70.0, 1.0));
        dev.set_gain(Direction::Rx, 0, 32.0).unwrap();
        assert_eq!(dev.gain(Direction::Rx, 0).unwrap(), 32.0);
        assert!(dev.set_gain(Direction::Rx, 0, 99.0).is_err());
    }

    #[test]
    fn frequency_with_args() {
        let dev = open();
        dev.set_frequency(Direction::Rx, 1, 433.92e6, &Kwargs::new()).unwrap();
        assert_eq!(dev.frequency(Direction::Rx, 1).unwrap(), 433.92e6);
        let offset = Kwargs::new().with("OFFSET", "1e6");
        dev.set_frequency(Direction::Rx, 1, 100e6, &offset).unwrap();
        assert_eq!(dev.frequency(Direction::Rx, 1).unwrap(), 101e6);
        let ranges = dev.frequency_range(Direction::Rx, 1).unwrap();
        assert_eq!(ranges.len(), 1);
        assert!(ranges[0].is_continuous());
        assert!(dev.set_frequency(Direction::Rx, 1, 10e9, &Kwargs::new()).is_err());
    }

    #[test]
    fn sample_rates() {
        let dev = open();
        let ranges = dev.sample_rate_range(Direction::Tx, 0).unwrap();
        assert_eq!(ranges.len(), 2);
        dev.set_sample_rate(Direction::Tx, 0, 2e6).unwrap();
        assert_eq!(dev.sample_rate(Direction::Tx, 0).unwrap(), 2e6);
        let err = dev.set_sample_rate(Direction::Tx, 0, 500e3).unwrap_err();
        assert_eq!(err, Error::Driver("unsupported sample rate 500000".into()));
    }

    #[test]
    fn stream_capabilities() {
        let dev = open();
        let formats = dev.stream_formats(Direction::Rx, 0).unwrap();
        assert!(formats.iter().any(|f| f == "CS8"));
        let (native, full_scale) = dev.native_stream_format(Direction::Rx, 0).unwrap();
        assert_eq!(native, "CS8");
        assert_eq!(full_scale, 127.0);
        let args = dev.stream_args_info(Direction::Rx, 0).unwrap();
        assert_eq!(args[0].key, "buffers");
    }

    #[test]
    fn property_calls_release_foreign_memory() {
        let dev = open();
        let before = mock::live_allocations();
        dev.list_antennas(Direction::Rx, 0).unwrap();
        dev.stream_args_info(Direction::Rx, 0).unwrap();
        dev.sample_rate_range(Direction::Rx, 0).unwrap();
        dev.channel_info(Direction::Rx, 0).unwrap();
        let _ = dev.list_gains(Direction::Rx, 42);
        assert_eq!(mock::live_allocations(), before);
    }
}
