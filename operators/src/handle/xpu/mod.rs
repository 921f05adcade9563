//! 昆仑类加速卡的硬件上下文。
//!
//! 设备存储由 [`DevByte`] 描述，主机不能直接读写，只能通过 [`Stream`] 上的拷贝接口交换数据。
//! 数值计算委托给 [`xdnn`] 库，在设备自己的计算簇上执行。

pub mod xdnn;

use crate::{execution_failed, Alloc, Blob, Hardware, LaunchError, QueueAlloc, QueueOf};
use log::info;
use std::{
    num::NonZeroUsize,
    ops::{Deref, DerefMut},
    slice::{from_raw_parts, from_raw_parts_mut},
    sync::Arc,
    thread::available_parallelism,
};

/// 设备存储单元。
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub struct DevByte(u8);

#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// 设备序号。
    pub id: usize,
    /// 参与计算的计算簇数量。
    pub clusters: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: 0,
            clusters: available_parallelism().map_or(1, NonZeroUsize::get),
        }
    }
}

#[derive(Clone)]
pub struct Device(Arc<Internal>);

struct Internal {
    id: usize,
    ctx: xdnn::Context,
}

impl Hardware for Device {
    type Byte = DevByte;
    type Queue<'ctx> = Stream;
}

impl Device {
    pub fn new(config: DeviceConfig) -> Result<Self, LaunchError> {
        let DeviceConfig { id, clusters } = config;
        if clusters == 0 {
            return Err(execution_failed(format!("xpu{id} has no compute cluster")));
        }
        let ctx = xdnn::Context::new(clusters)
            .map_err(|e| execution_failed(format!("failed to create context on xpu{id}: {e}")))?;
        info!("xpu{id} initialized with {clusters} clusters");
        Ok(Self(Arc::new(Internal { id, ctx })))
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.0.id
    }

    #[inline]
    pub fn clusters(&self) -> usize {
        self.0.ctx.clusters()
    }

    #[inline]
    pub fn stream(&self) -> Stream {
        Stream(self.clone())
    }
}

/// 设备上的任务队列。队列上的操作按提交顺序完成。
#[derive(Clone)]
pub struct Stream(Device);

impl Stream {
    #[inline]
    pub fn device(&self) -> &Device {
        &self.0
    }

    /// 数值库上下文。
    #[inline]
    pub fn x_context(&self) -> &xdnn::Context {
        &self.0 .0.ctx
    }

    #[inline]
    pub fn malloc<T: Copy>(&self, len: usize) -> DevMem {
        DevMem(Blob::new(len * size_of::<T>()))
    }

    /// 分配设备存储并从主机拷贝数据。
    pub fn from_host<T: Copy>(&self, data: &[T]) -> DevMem {
        DevMem(Blob::from_slice(data))
    }

    /// 从设备拷贝数据到主机。
    pub fn memcpy_d2h<T: Copy>(&self, dst: &mut [T], src: &[DevByte]) {
        let len = size_of_val(dst);
        assert_eq!(len, src.len());
        let dst = unsafe { from_raw_parts_mut(dst.as_mut_ptr().cast::<u8>(), len) };
        let src = unsafe { from_raw_parts(src.as_ptr().cast::<u8>(), len) };
        dst.copy_from_slice(src)
    }
}

/// 设备存储。
pub struct DevMem(Blob);

impl Deref for DevMem {
    type Target = [DevByte];
    #[inline]
    fn deref(&self) -> &[DevByte] {
        let len = self.0.len();
        unsafe { from_raw_parts(self.0.as_ptr().cast(), len) }
    }
}

impl DerefMut for DevMem {
    #[inline]
    fn deref_mut(&mut self) -> &mut [DevByte] {
        let len = self.0.len();
        unsafe { from_raw_parts_mut(self.0.as_mut_ptr().cast(), len) }
    }
}

impl Alloc<DevMem> for Stream {
    #[inline]
    fn alloc(&self, size: usize) -> DevMem {
        self.malloc::<u8>(size)
    }

    #[inline]
    fn free(&self, _mem: DevMem) {}
}

impl QueueAlloc for Stream {
    type Hardware = Device;
    type DevMem = DevMem;
    #[inline]
    fn queue(&self) -> &QueueOf<Self::Hardware> {
        self
    }
}
