//! Device-wide settings and sensors.

use libc::size_t;

use crate::channel::c_string;
use crate::device::Device;
use crate::error::Result;
use crate::types::ArgInfo;

impl Device {
    /// Descriptions of the settings the driver understands.
    pub fn setting_info(&self) -> Result<Vec<ArgInfo>> {
        let mut len: size_t = 0;
        let ptr = unsafe { (self.abi().get_setting_info)(self.raw(), &mut len) };
        self.take_arg_info_list(ptr, len)
    }

    pub fn write_setting(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (c_string(key)?, c_string(value)?);
        let code = unsafe { (self.abi().write_setting)(self.raw(), key.as_ptr(), value.as_ptr()) };
        self.status(code)
    }

    /// Current value of a setting. Unknown keys read as an empty string.
    pub fn read_setting(&self, key: &str) -> Result<String> {
        let key = c_string(key)?;
        let ptr = unsafe { (self.abi().read_setting)(self.raw(), key.as_ptr()) };
        self.take_string(ptr)
    }

    pub fn list_sensors(&self) -> Result<Vec<String>> {
        let mut len: size_t = 0;
        let ptr = unsafe { (self.abi().list_sensors)(self.raw(), &mut len) };
        self.take_strings(ptr, len)
    }

    pub fn sensor_info(&self, key: &str) -> Result<ArgInfo> {
        let key = c_string(key)?;
        let raw = unsafe { (self.abi().get_sensor_info)(self.raw(), key.as_ptr()) };
        self.take_arg_info(raw)
    }

    /// A sensor reading in its string form; see [`ArgInfo::parse`].
    pub fn read_sensor(&self, key: &str) -> Result<String> {
        let key = c_string(key)?;
        let ptr = unsafe { (self.abi().read_sensor)(self.raw(), key.as_ptr()) };
        self.take_string(ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::mock;
    use crate::types::{ArgType, ArgValue};

    #[test]
    fn settings_round_trip() {
        let dev = Device::make_str(mock::abi(), "driver=mock").unwrap();
        let info = dev.setting_info().unwrap();
        let keys: Vec<&str> = info.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["loopback", "mode"]);
        let mode = &info[1];
        assert_eq!(
            mode.choices().collect::<Vec<_>>(),
            vec![("normal", "Normal"), ("test", "Test pattern")]
        );

        assert_eq!(dev.read_setting("mode").unwrap(), "normal");
        dev.write_setting("mode", "test").unwrap();
        assert_eq!(dev.read_setting("mode").unwrap(), "test");
        assert_eq!(dev.read_setting("nothing").unwrap(), "");
    }

    #[test]
    fn sensors() {
        let dev = Device::make_str(mock::abi(), "driver=mock").unwrap();
        assert_eq!(dev.list_sensors().unwrap(), vec!["temperature", "lo_locked"]);
        let info = dev.sensor_info("temperature").unwrap();
        assert_eq!(info.arg_type, ArgType::Float);
        assert_eq!(info.units, "C");
        let reading = dev.read_sensor("temperature").unwrap();
        assert_eq!(info.parse(&reading), Some(ArgValue::Float(36.6)));

        let err = dev.read_sensor("humidity").unwrap_err();
        assert_eq!(err, Error::Driver("unknown sensor humidity".into()));
        assert!(dev.sensor_info("humidity").is_err());
    }

    #[test]
    fn sensor_info_is_released() {
        let dev = Device::make_str(mock::abi(), "driver=mock").unwrap();
        let before = mock::live_allocations();
        dev.sensor_info("lo_locked").unwrap();
        let _ = dev.sensor_info("humidity");
        dev.setting_info().unwrap();
        assert_eq!(mock::live_allocations(), before);
    }
}
