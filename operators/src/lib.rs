// #![deny(warnings)]

mod between_f32;
mod common;
mod handle;

pub mod registry;
pub mod rms_norm;

pub use between_f32::BetweenF32;
pub use common::*;

#[cfg(any(use_cpu, test))]
pub use handle::common_cpu;

#[cfg(use_xpu)]
pub use handle::xpu;

use std::ops::DerefMut;

/// 算力硬件抽象。
///
/// 约定硬件如何存储和运行。
/// 这个特质应该由管理硬件的基本单元的映射类型实现，通常是**硬件上下文**。
pub trait Hardware {
    /// 硬件的存储单元类型。
    type Byte;
    /// 硬件的任务队列类型。
    type Queue<'ctx>;
}

pub type ByteOf<H> = <H as Hardware>::Byte;
pub type QueueOf<'ctx, H> = <H as Hardware>::Queue<'ctx>;
pub(crate) type MutPtr<H> = *mut <H as Hardware>::Byte;
pub(crate) type ConstPtr<H> = *const <H as Hardware>::Byte;

pub trait Alloc<M> {
    fn alloc(&self, size: usize) -> M;
    fn free(&self, mem: M);
}

/// 绑定到队列的分配器。
pub trait QueueAlloc: Alloc<Self::DevMem> {
    /// 队列分配器对应的硬件。
    type Hardware: Hardware;
    /// 分配器分配和回收的对象，表示对某块存储区域的所有权。
    type DevMem: DerefMut<Target = [ByteOf<Self::Hardware>]>;
    /// 分配器对应的队列。
    fn queue(&self) -> &QueueOf<Self::Hardware>;
}

/// 算子。
pub trait Operator {
    /// 执行算子的硬件。
    type Hardware: Hardware;
    /// 算子的参数类型。
    type Args;

    /// 在指定硬件上创建算子实例。
    fn new(node: &Self::Hardware) -> Self;

    /// 规划执行方案。
    ///
    /// 检查参数并返回执行需要的工作空间大小，返回值保证不大于 `max_workspace_size`。
    fn scheme(
        &mut self,
        args: &Self::Args,
        max_workspace_size: usize,
    ) -> Result<usize, SchemeError>;

    /// 发射算子到任务队列。
    ///
    /// 返回时计算已完成，或已按序排入队列。
    fn launch<QA>(
        &self,
        args: &Self::Args,
        workspace: &mut [ByteOf<Self::Hardware>],
        queue_alloc: &QA,
    ) -> Result<(), LaunchError>
    where
        QA: QueueAlloc<Hardware = Self::Hardware>;
}

macro_rules! op_trait {
    ($name:ident $($body:item)*) => {
        pub trait $name<H: $crate::Hardware>:
            $crate::Operator<
            Hardware = H,
            Args = Args<H>,
        >{$($body)*}
    };
}

pub(crate) use op_trait;
