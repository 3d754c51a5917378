//! Stride-based traversal of foreign arrays.

use std::marker::PhantomData;
use std::mem;

use crate::error::Fault;

/// A read-only view over `count` records laid out `stride` bytes apart.
///
/// The stride is the size of the foreign record shape, so traversal never
/// depends on the layout of the host type a record is converted into.
pub struct ArrayView<'a, T> {
    base: *const u8,
    stride: usize,
    count: usize,
    index: usize,
    _marker: PhantomData<&'a T>,
}

impl<'a, T> ArrayView<'a, T> {
    /// View `count` records of `T` starting at `base`.
    ///
    /// A null base or a zero count gives an empty view. A null base with a
    /// positive count is a [`Fault::NullArray`].
    ///
    /// # Safety
    /// When `base` is non-null it must point to `count` initialised records
    /// that stay alive and unmodified for `'a`.
    pub unsafe fn new(base: *const T, count: usize) -> Result<Self, Fault> {
        Self::with_stride(base as *const u8, mem::size_of::<T>(), count)
    }

    /// Like [`ArrayView::new`] with an explicit record stride in bytes.
    ///
    /// # Safety
    /// Same as [`ArrayView::new`]; in addition `stride` must be at least
    /// `size_of::<T>()` and keep every record aligned.
    pub unsafe fn with_stride(base: *const u8, stride: usize, count: usize) -> Result<Self, Fault> {
        if base.is_null() && count > 0 {
            return Err(Fault::NullArray { len: count });
        }
        let count = if base.is_null() { 0 } else { count };
        debug_assert!(stride >= mem::size_of::<T>());
        debug_assert_eq!(base as usize % mem::align_of::<T>(), 0);
        Ok(ArrayView {
            base,
            stride,
            count,
            index: 0,
            _marker: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The record at `i`, if in range.
    pub fn get(&self, i: usize) -> Option<&'a T> {
        if i >= self.count {
            return None;
        }
        Some(unsafe { &*(self.base.add(i * self.stride) as *const T) })
    }
}

impl<'a, T> Iterator for ArrayView<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let item = self.get(self.index)?;
        self.index += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.count - self.index;
        (left, Some(left))
    }
}

impl<T> ExactSizeIterator for ArrayView<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_in_order() {
        let data = [1u32, 2, 3];
        let view = unsafe { ArrayView::new(data.as_ptr(), data.len()) }.unwrap();
        assert_eq!(view.len(), 3);
        assert_eq!(view.copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn honours_stride() {
        #[repr(C)]
        struct Padded {
            value: u16,
            _pad: [u8; 6],
        }
        let data = [
            Padded { value: 7, _pad: [0xff; 6] },
            Padded { value: 9, _pad: [0xff; 6] },
        ];
        let view = unsafe {
            ArrayView::<u16>::with_stride(data.as_ptr() as *const u8, mem::size_of::<Padded>(), 2)
        }
        .unwrap();
        assert_eq!(view.copied().collect::<Vec<_>>(), vec![7, 9]);
    }

    #[test]
    fn null_and_empty() {
        let view = unsafe { ArrayView::<u8>::new(std::ptr::null(), 0) }.unwrap();
        assert!(view.is_empty());
        let data = [5u8];
        let view = unsafe { ArrayView::new(data.as_ptr(), 0) }.unwrap();
        assert_eq!(view.count(), 0);
        let err = unsafe { ArrayView::<u8>::new(std::ptr::null(), 3) }.err();
        assert_eq!(err, Some(Fault::NullArray { len: 3 }));
    }

    #[test]
    fn get_out_of_range() {
        let data = [1i64, 2];
        let view = unsafe { ArrayView::new(data.as_ptr(), 2) }.unwrap();
        assert_eq!(view.get(1), Some(&2));
        assert_eq!(view.get(2), None);
    }
}
