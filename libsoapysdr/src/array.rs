//! Conversion of foreign flat arrays to host sequences and back.
//!
//! Foreign to host goes through an [`ArrayView`], so traversal always
//! advances by the foreign record stride. Host to foreign makes one
//! [`HostArray`] per array; nested fields hang off its records and are
//! released by walking back through it.

use libc::{c_char, size_t};

use crate::error::Fault;
use crate::ffi::{SoapySDRArgInfo, SoapySDRDevice, SoapySDRKwargs, SoapySDRRange};
use crate::owned::{host_strdup, HostArray, HostRecord};
use crate::record;
use crate::types::{ArgInfo, Kwargs, Range};
use crate::view::ArrayView;

pub(crate) fn strings(view: ArrayView<'_, *mut c_char>) -> Result<Vec<String>, Fault> {
    view.map(|&p| unsafe { record::string_from_foreign(p) })
        .collect()
}

pub(crate) fn ranges(view: ArrayView<'_, SoapySDRRange>) -> Vec<Range> {
    view.map(record::range_from_foreign).collect()
}

pub(crate) fn kwargs_list(view: ArrayView<'_, SoapySDRKwargs>) -> Result<Vec<Kwargs>, Fault> {
    view.map(|rec| unsafe { record::kwargs_from_foreign(rec) })
        .collect()
}

pub(crate) fn arg_info_list(view: ArrayView<'_, SoapySDRArgInfo>) -> Result<Vec<ArgInfo>, Fault> {
    view.map(|rec| unsafe { record::arg_info_from_foreign(rec) })
        .collect()
}

/// Raw handles in order, nulls included.
pub(crate) fn handles(view: ArrayView<'_, *mut SoapySDRDevice>) -> Vec<*mut SoapySDRDevice> {
    view.copied().collect()
}

/// Allocate a zeroed array of `items.len()` records and fill slot `i` from
/// `items[i]`. A failing fill drops the array, releasing slots `[0, i)`.
fn build<T, S>(
    items: &[S],
    mut fill: impl FnMut(&S, &mut T) -> Result<(), Fault>,
) -> Result<HostArray<T>, Fault>
where
    T: HostRecord,
{
    let mut out = HostArray::<T>::zeroed(items.len())?;
    for (item, slot) in items.iter().zip(out.as_mut_slice()) {
        fill(item, slot)?;
    }
    Ok(out)
}

pub(crate) fn strings_to_foreign<I, S>(items: I) -> Result<HostArray<*mut c_char>, Fault>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let items: Vec<S> = items.into_iter().collect();
    build(&items, |s, slot| {
        *slot = host_strdup(s.as_ref())?;
        Ok(())
    })
}

pub(crate) fn sizes_to_foreign(items: &[usize]) -> Result<HostArray<size_t>, Fault> {
    build(items, |&n, slot| {
        *slot = n;
        Ok(())
    })
}

pub(crate) fn handles_to_foreign(
    items: &[*mut SoapySDRDevice],
) -> Result<HostArray<*mut SoapySDRDevice>, Fault> {
    build(items, |&h, slot| {
        *slot = h;
        Ok(())
    })
}

/// A single map, as a one-record array so it can be passed by pointer.
pub(crate) fn kwargs_to_foreign(kwargs: &Kwargs) -> Result<HostArray<SoapySDRKwargs>, Fault> {
    kwargs_list_to_foreign(std::slice::from_ref(kwargs))
}

pub(crate) fn kwargs_list_to_foreign(list: &[Kwargs]) -> Result<HostArray<SoapySDRKwargs>, Fault> {
    build(list, record::fill_kwargs)
}
