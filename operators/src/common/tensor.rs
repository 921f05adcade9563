use digit_layout::DigitLayout;
use ndarray_layout::ArrayLayout;
use std::ops::{Deref, DerefMut};

#[derive(Clone)]
pub struct TensorLayout {
    pub dt: DigitLayout,
    pub layout: ArrayLayout<4>,
}

impl TensorLayout {
    pub fn new(dt: DigitLayout, shape: &[usize], strides: &[isize]) -> Self {
        assert_eq!(shape.len(), strides.len());
        Self {
            dt,
            layout: ArrayLayout::new(shape, strides, 0),
        }
    }

    pub fn new_contiguous(dt: DigitLayout, shape: &[usize]) -> Self {
        let mut strides = shape
            .iter()
            .rev()
            .scan(dt.nbytes().unwrap() as isize, |mul, &d| {
                let stride = *mul;
                *mul *= d as isize;
                Some(stride)
            })
            .collect::<Vec<_>>();
        strides.reverse();
        Self::new(dt, shape, &strides)
    }

    #[inline]
    pub fn dt(&self) -> DigitLayout {
        self.dt
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.layout.ndim()
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    #[inline]
    pub fn strides(&self) -> &[isize] {
        self.layout.strides()
    }

    /// 元素总数。
    #[inline]
    pub fn num_elements(&self) -> usize {
        self.shape().iter().product()
    }

    /// 连续存储时占用的字节数。
    #[inline]
    pub fn nbytes(&self) -> usize {
        self.num_elements() * self.dt.nbytes().unwrap()
    }
}

/// 带有存储的张量。
///
/// 存储类型 `T` 可以是独占的内存块（[`Blob`](crate::Blob)、设备存储），也可以是借用的字节切片。
/// 张量总是行优先连续存储的。
#[derive(Clone)]
pub struct Tensor<T> {
    layout: TensorLayout,
    physical: T,
}

impl<T> Tensor<T> {
    /// 在 `physical` 上创建形状为 `shape` 的连续张量。
    pub fn new<B>(dt: DigitLayout, shape: &[usize], physical: T) -> Self
    where
        T: Deref<Target = [B]>,
    {
        let layout = TensorLayout::new_contiguous(dt, shape);
        assert_eq!(
            physical.len() * size_of::<B>(),
            layout.nbytes(),
            "storage does not match shape {shape:?} of {dt}",
        );
        Self { layout, physical }
    }

    #[inline]
    pub fn layout(&self) -> &TensorLayout {
        &self.layout
    }

    #[inline]
    pub fn dt(&self) -> DigitLayout {
        self.layout.dt
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    #[inline]
    pub fn physical(&self) -> &T {
        &self.physical
    }

    #[inline]
    pub fn take(self) -> T {
        self.physical
    }

    /// 借用存储，得到相同形状的张量。
    #[inline]
    pub fn as_deref<B>(&self) -> Tensor<&[B]>
    where
        T: Deref<Target = [B]>,
    {
        Tensor {
            layout: self.layout.clone(),
            physical: &*self.physical,
        }
    }

    #[inline]
    pub fn base<B>(&self) -> *const B
    where
        T: Deref<Target = [B]>,
    {
        self.physical.as_ptr()
    }

    #[inline]
    pub fn base_mut<B>(&mut self) -> *mut B
    where
        T: DerefMut<Target = [B]>,
    {
        self.physical.as_mut_ptr()
    }
}

#[cfg(test)]
mod test {
    use super::{Tensor, TensorLayout};
    use digit_layout::types as ty;

    #[test]
    fn test_contiguous() {
        let layout = TensorLayout::new_contiguous(ty::F16, &[4, 3, 8]);
        assert_eq!(layout.shape(), &[4, 3, 8]);
        assert_eq!(layout.strides(), &[48, 16, 2]);
        assert_eq!(layout.num_elements(), 96);
        assert_eq!(layout.nbytes(), 192);
    }

    #[test]
    fn test_tensor() {
        let data = vec![0u8; 2 * 3 * 4];
        let t = Tensor::new(ty::F32, &[2, 3], &data[..]);
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.dt(), ty::F32);
        assert_eq!(t.base(), data.as_ptr());
    }

    #[test]
    #[should_panic]
    fn test_size_mismatch() {
        let data = vec![0u8; 10];
        let _ = Tensor::new(ty::F32, &[2, 3], &data[..]);
    }
}
