use std::{
    alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout},
    ops::{Deref, DerefMut},
    ptr::NonNull,
    slice::{from_raw_parts, from_raw_parts_mut},
};

/// 主存上的一块字节存储，按 `usize` 对齐。
pub struct Blob {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for Blob {}
unsafe impl Sync for Blob {}

impl Blob {
    /// 分配 `size` 字节并清零。分配失败是致命错误。
    pub fn new(size: usize) -> Self {
        if size == 0 {
            return Self {
                ptr: NonNull::dangling(),
                len: 0,
            };
        }
        let layout = layout(size);
        let Some(ptr) = NonNull::new(unsafe { alloc_zeroed(layout) }) else {
            handle_alloc_error(layout)
        };
        Self { ptr, len: size }
    }

    /// 从主存数据复制出一块存储。
    pub fn from_slice<T: Copy>(data: &[T]) -> Self {
        let mut blob = Self::new(size_of_val(data));
        let bytes = unsafe { from_raw_parts(data.as_ptr().cast::<u8>(), blob.len) };
        blob.copy_from_slice(bytes);
        blob
    }
}

impl Drop for Blob {
    #[inline]
    fn drop(&mut self) {
        let &mut Blob { ptr, len } = self;
        if len != 0 {
            unsafe { dealloc(ptr.as_ptr(), layout(len)) }
        }
    }
}

#[inline(always)]
const fn layout(size: usize) -> Layout {
    unsafe { Layout::from_size_align_unchecked(size, align_of::<usize>()) }
}

impl Deref for Blob {
    type Target = [u8];
    #[inline]
    fn deref(&self) -> &[u8] {
        unsafe { from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for Blob {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

#[test]
fn test_blob() {
    let empty = Blob::new(0);
    assert!(empty.is_empty());

    let blob = Blob::from_slice(&[1.0f32, 2.0, 3.0]);
    assert_eq!(blob.len(), 12);
    assert_eq!(blob.as_ptr() as usize % align_of::<usize>(), 0);
    assert_eq!(&blob[..4], &1.0f32.to_ne_bytes());
}
