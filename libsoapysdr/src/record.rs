//! Conversion of single foreign records to host values and back.

use std::ffi::CStr;

use libc::{c_char, c_int};

use crate::array;
use crate::error::Fault;
use crate::ffi::{
    SoapySDRArgInfo, SoapySDRKwargs, SoapySDRRange, SOAPY_SDR_ARG_INFO_BOOL,
    SOAPY_SDR_ARG_INFO_FLOAT, SOAPY_SDR_ARG_INFO_INT, SOAPY_SDR_ARG_INFO_STRING,
};
use crate::types::{ArgInfo, ArgType, Kwargs, Range};
use crate::view::ArrayView;

/// Copy a foreign C string into a host `String`.
///
/// Invalid UTF-8 is replaced rather than rejected; driver strings are
/// free-form text.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn string_from_foreign(ptr: *const c_char) -> Result<String, Fault> {
    if ptr.is_null() {
        return Err(Fault::NullString);
    }
    Ok(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

/// Like [`string_from_foreign`] but a null pointer reads as empty.
unsafe fn optional_string(ptr: *const c_char) -> String {
    string_from_foreign(ptr).unwrap_or_default()
}

pub(crate) fn range_from_foreign(raw: &SoapySDRRange) -> Range {
    Range {
        minimum: raw.minimum,
        maximum: raw.maximum,
        step: raw.step,
    }
}

pub(crate) fn range_to_foreign(range: &Range) -> SoapySDRRange {
    SoapySDRRange {
        minimum: range.minimum,
        maximum: range.maximum,
        step: range.step,
    }
}

/// # Safety
/// `raw.keys` and `raw.vals` must each be null or hold `raw.size` strings.
///
/// A key repeated within the record is a [`Fault::DuplicateKey`].
pub(crate) unsafe fn kwargs_from_foreign(raw: &SoapySDRKwargs) -> Result<Kwargs, Fault> {
    let keys = array::strings(ArrayView::new(raw.keys as *const *mut c_char, raw.size)?)?;
    let vals = array::strings(ArrayView::new(raw.vals as *const *mut c_char, raw.size)?)?;
    let mut out = Kwargs::new();
    for (key, val) in keys.into_iter().zip(vals) {
        if out.get(&key).is_some() {
            return Err(Fault::DuplicateKey(key));
        }
        out.insert(key, val);
    }
    Ok(out)
}

pub(crate) fn arg_type_from_foreign(tag: c_int) -> Result<ArgType, Fault> {
    match tag {
        SOAPY_SDR_ARG_INFO_BOOL => Ok(ArgType::Bool),
        SOAPY_SDR_ARG_INFO_INT => Ok(ArgType::Int),
        SOAPY_SDR_ARG_INFO_FLOAT => Ok(ArgType::Float),
        SOAPY_SDR_ARG_INFO_STRING => Ok(ArgType::String),
        other => Err(Fault::UnknownArgType(other)),
    }
}

pub(crate) fn arg_type_to_foreign(ty: ArgType) -> c_int {
    match ty {
        ArgType::Bool => SOAPY_SDR_ARG_INFO_BOOL,
        ArgType::Int => SOAPY_SDR_ARG_INFO_INT,
        ArgType::Float => SOAPY_SDR_ARG_INFO_FLOAT,
        ArgType::String => SOAPY_SDR_ARG_INFO_STRING,
    }
}

/// # Safety
/// All string fields must be null or NUL-terminated, and the option arrays
/// must each be null or hold `raw.num_options` strings.
pub(crate) unsafe fn arg_info_from_foreign(raw: &SoapySDRArgInfo) -> Result<ArgInfo, Fault> {
    let options = array::strings(ArrayView::new(
        raw.options as *const *mut c_char,
        raw.num_options,
    )?)?;
    let option_names = if raw.option_names.is_null() {
        // Drivers may omit display names; fall back to the option values.
        options.clone()
    } else {
        array::strings(ArrayView::new(
            raw.option_names as *const *mut c_char,
            raw.num_options,
        )?)?
    };
    Ok(ArgInfo {
        key: string_from_foreign(raw.key)?,
        value: optional_string(raw.value),
        name: optional_string(raw.name),
        description: optional_string(raw.description),
        units: optional_string(raw.units),
        arg_type: arg_type_from_foreign(raw.arg_type)?,
        range: range_from_foreign(&raw.range),
        options,
        option_names,
    })
}

/// Fill a zeroed foreign map record from `kwargs`.
///
/// On error the record is left owning nothing it did not own before.
pub(crate) fn fill_kwargs(kwargs: &Kwargs, out: &mut SoapySDRKwargs) -> Result<(), Fault> {
    let keys = array::strings_to_foreign(kwargs.keys())?;
    let vals = array::strings_to_foreign(kwargs.iter().map(|(_, v)| v))?;
    out.size = kwargs.len();
    out.keys = keys.into_raw();
    out.vals = vals.into_raw();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owned::{host_strdup, live_host_allocations, HostArray};

    #[test]
    fn null_string_is_a_fault() {
        assert_eq!(
            unsafe { string_from_foreign(std::ptr::null()) },
            Err(Fault::NullString)
        );
        assert_eq!(unsafe { string_from_foreign(c"RX".as_ptr()) }, Ok("RX".into()));
    }

    #[test]
    fn range_keeps_double_precision() {
        let raw = SoapySDRRange {
            minimum: 1.0e-12,
            maximum: 6.000000001e9,
            step: 0.1,
        };
        let r = range_from_foreign(&raw);
        assert_eq!(r, Range::new(1.0e-12, 6.000000001e9, 0.1));
        assert_eq!(range_to_foreign(&r), raw);
    }

    #[test]
    fn arg_type_tags() {
        for ty in [ArgType::Bool, ArgType::Int, ArgType::Float, ArgType::String] {
            assert_eq!(arg_type_from_foreign(arg_type_to_foreign(ty)), Ok(ty));
        }
        assert_eq!(arg_type_from_foreign(9), Err(Fault::UnknownArgType(9)));
    }

    #[test]
    fn kwargs_survive_the_foreign_form() {
        let sizes = [0usize, 1, 7];
        for n in sizes {
            // distinct keys, values that only differ in their suffix
            let args: Kwargs = (0..n).map(|i| (format!("key{i}"), format!("val{i}"))).collect();
            let mut rec = HostArray::<SoapySDRKwargs>::zeroed(1).unwrap();
            fill_kwargs(&args, &mut rec.as_mut_slice()[0]).unwrap();
            let back = unsafe { kwargs_from_foreign(&rec.as_mut_slice()[0]) }.unwrap();
            assert_eq!(back, args, "size {n}");
        }
    }

    #[test]
    fn repeated_key_is_a_fault() {
        let mut keys = HostArray::<*mut c_char>::zeroed(2).unwrap();
        keys.as_mut_slice()[0] = host_strdup("a").unwrap();
        keys.as_mut_slice()[1] = host_strdup("a").unwrap();
        let mut vals = HostArray::<*mut c_char>::zeroed(2).unwrap();
        vals.as_mut_slice()[0] = host_strdup("1").unwrap();
        vals.as_mut_slice()[1] = host_strdup("2").unwrap();
        let mut raw = SoapySDRKwargs::empty();
        raw.size = 2;
        raw.keys = keys.as_mut_ptr();
        raw.vals = vals.as_mut_ptr();
        assert_eq!(
            unsafe { kwargs_from_foreign(&raw) },
            Err(Fault::DuplicateKey("a".into()))
        );
    }

    #[test]
    fn fill_kwargs_failure_leaks_nothing() {
        let before = live_host_allocations();
        let args = Kwargs::new().with("ok", "1").with("bad\0key", "2");
        let mut rec = SoapySDRKwargs::empty();
        assert_eq!(fill_kwargs(&args, &mut rec), Err(Fault::InteriorNul));
        assert!(rec.keys.is_null());
        assert_eq!(live_host_allocations(), before);
    }

    #[test]
    fn arg_info_copies_nested_arrays() {
        let mut options = HostArray::<*mut c_char>::zeroed(2).unwrap();
        options.as_mut_slice()[0] = host_strdup("a").unwrap();
        options.as_mut_slice()[1] = host_strdup("b").unwrap();
        let mut raw = SoapySDRArgInfo::empty();
        raw.key = c"mode".as_ptr() as *mut c_char;
        raw.value = c"a".as_ptr() as *mut c_char;
        raw.num_options = 2;
        raw.options = options.as_mut_ptr();
        let info = unsafe { arg_info_from_foreign(&raw) }.unwrap();
        assert_eq!(info.key, "mode");
        assert_eq!(info.arg_type, ArgType::String);
        assert_eq!(info.options, vec!["a", "b"]);
        assert_eq!(info.option_names, info.options);
        assert_eq!(info.units, "");
    }

    #[test]
    fn arg_info_with_null_options_and_count_is_a_fault() {
        let mut raw = SoapySDRArgInfo::empty();
        raw.key = c"k".as_ptr() as *mut c_char;
        raw.num_options = 3;
        assert_eq!(
            unsafe { arg_info_from_foreign(&raw) },
            Err(Fault::NullArray { len: 3 })
        );
    }
}
