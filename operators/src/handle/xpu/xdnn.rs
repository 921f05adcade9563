//! 加速卡数值库。
//!
//! 接口约定与厂商库一致：裸指针传参，返回状态码。

use crate::BetweenF32;
use rayon::{
    iter::{IntoParallelIterator, ParallelIterator},
    ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder,
};
use std::slice::{from_raw_parts, from_raw_parts_mut};

pub const SUCCESS: i32 = 0;
pub const INVALID_PARAM: i32 = -1;
pub const NULL_POINTER: i32 = -2;

/// 状态码的名字，用于报错。
pub fn status_name(r: i32) -> &'static str {
    match r {
        SUCCESS => "SUCCESS",
        INVALID_PARAM => "INVALID_PARAM",
        NULL_POINTER => "NULL_POINTER",
        _ => "UNKNOWN",
    }
}

/// 数值库上下文，持有设备的计算簇。
pub struct Context {
    clusters: ThreadPool,
}

impl Context {
    pub(super) fn new(clusters: usize) -> Result<Self, ThreadPoolBuildError> {
        ThreadPoolBuilder::new()
            .num_threads(clusters)
            .thread_name(|i| format!("xpu-cluster-{i}"))
            .build()
            .map(|clusters| Self { clusters })
    }

    #[inline]
    pub fn clusters(&self) -> usize {
        self.clusters.current_num_threads()
    }
}

/// 对 `m` 行 `n` 列的 `x` 逐行做 rms 归一化，结果写入 `y`。
///
/// `beta` 可以为空；`rstd` 非空时写入每行的统计量，`is_rstd` 为真时写 `1/sqrt(mean(x^2) + eps)`，否则写 `mean(x^2)`。
///
/// # Safety
///
/// `x`、`y` 指向 `m * n` 个连续元素，`gamma` 和非空的 `beta` 指向 `n` 个元素，非空的 `rstd` 指向 `m` 个元素。
/// `y` 和 `rstd` 不能与其他参数重叠。
#[allow(clippy::too_many_arguments)]
pub unsafe fn rms_layer_norm<T: BetweenF32>(
    ctx: &Context,
    x: *const T,
    y: *mut T,
    m: i64,
    n: i64,
    eps: f32,
    gamma: *const T,
    beta: *const T,
    rstd: *mut f32,
    is_rstd: bool,
) -> i32 {
    if m < 0 || n <= 0 {
        return INVALID_PARAM;
    }
    if x.is_null() || y.is_null() || gamma.is_null() {
        return NULL_POINTER;
    }
    let kernel = RmsLayerNorm {
        m: m as _,
        n: n as _,
        eps,
        x,
        y,
        gamma,
        beta,
        rstd,
        is_rstd,
    };
    ctx.clusters
        .install(|| (0..kernel.m).into_par_iter().for_each(|i| kernel.row(i)));
    SUCCESS
}

struct RmsLayerNorm<T> {
    m: usize,
    n: usize,
    eps: f32,
    x: *const T,
    y: *mut T,
    gamma: *const T,
    beta: *const T,
    rstd: *mut f32,
    is_rstd: bool,
}

unsafe impl<T> Send for RmsLayerNorm<T> {}
unsafe impl<T> Sync for RmsLayerNorm<T> {}

impl<T: BetweenF32> RmsLayerNorm<T> {
    fn row(&self, i: usize) {
        let n = self.n;
        let x = unsafe { from_raw_parts(self.x.add(i * n), n) };
        let y = unsafe { from_raw_parts_mut(self.y.add(i * n), n) };
        let gamma = unsafe { from_raw_parts(self.gamma, n) };
        let beta = (!self.beta.is_null()).then(|| unsafe { from_raw_parts(self.beta, n) });

        let mean_sq = x.iter().map(|x| x.f32().powi(2)).sum::<f32>() / n as f32;
        let k = (mean_sq + self.eps).sqrt().recip();

        match beta {
            Some(beta) => {
                for (((y, x), g), b) in y.iter_mut().zip(x).zip(gamma).zip(beta) {
                    *y = T::cast(x.f32() * k * g.f32() + b.f32())
                }
            }
            None => {
                for ((y, x), g) in y.iter_mut().zip(x).zip(gamma) {
                    *y = T::cast(x.f32() * k * g.f32())
                }
            }
        }

        if !self.rstd.is_null() {
            unsafe { *self.rstd.add(i) = if self.is_rstd { k } else { mean_sq } }
        }
    }
}
