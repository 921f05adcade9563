//! y = x * w / sqrt(mean(x^2) + epsilon) + b

#[cfg(any(use_cpu, test))]
pub mod common_cpu;
#[cfg(use_xpu)]
pub mod xpu;

mod args;
pub use args::Args;

crate::op_trait!(RmsNorm);

use crate::{
    flatten_to_2d, invalid_argument,
    registry::{DeviceKind, KernelRegistry},
    unimplemented, ByteOf, LaunchError, QueueAlloc, Tensor, TensorLayout,
};
use digit_layout::{types as ty, DigitLayout};
use log::debug;
use std::{
    ops::Deref,
    ptr::{null, null_mut},
};

/// 注册名。
pub const NAME: &str = "rms_norm";
/// 注册的数据类型。
pub const DTYPES: &[DigitLayout] = &[ty::F32, ty::F16, ty::BF16];

/// 融合量化参数。`scale > 0` 表示启用量化。
#[derive(Clone, Copy, Default, Debug)]
pub struct Quantization {
    pub scale: f32,
    pub round_type: i32,
    pub max_bound: f32,
    pub min_bound: f32,
}

pub struct Request<'a, T> {
    pub x: &'a Tensor<T>,
    /// 融合的偏置加，尚未支持。
    pub bias: Option<&'a Tensor<T>>,
    /// 融合的残差加，尚未支持。
    pub residual: Option<&'a Tensor<T>>,
    pub norm_weight: &'a Tensor<T>,
    pub norm_bias: Option<&'a Tensor<T>>,
    pub epsilon: f32,
    /// `x` 的形状在这一维之前展平为行，之后展平为列。
    pub begin_norm_axis: usize,
    pub quant: Quantization,
    /// 是否输出每行的 `1/rms`。
    pub with_inv_var: bool,
}

impl<'a, T> Request<'a, T> {
    pub fn new(
        x: &'a Tensor<T>,
        norm_weight: &'a Tensor<T>,
        epsilon: f32,
        begin_norm_axis: usize,
    ) -> Self {
        Self {
            x,
            bias: None,
            residual: None,
            norm_weight,
            norm_bias: None,
            epsilon,
            begin_norm_axis,
            quant: Quantization::default(),
            with_inv_var: false,
        }
    }
}

pub struct Output<M> {
    /// 与 `x` 同形状同类型。
    pub out: Tensor<M>,
    /// 残差输出，尚未支持，总是空。
    pub residual_out: Option<Tensor<M>>,
    /// 形状为 `[rows]` 的 f32 张量。
    pub inv_var: Option<Tensor<M>>,
}

/// 检查请求、分配输出并在 `queue_alloc` 的队列上执行 `op`。
///
/// 所有检查都在分配输出之前完成。
pub fn launch<Op, QA, T>(
    op: &Op,
    request: &Request<T>,
    queue_alloc: &QA,
) -> Result<Output<QA::DevMem>, LaunchError>
where
    Op: RmsNorm<QA::Hardware>,
    QA: QueueAlloc,
    T: Deref<Target = [ByteOf<QA::Hardware>]>,
{
    let &Request {
        x,
        bias,
        residual,
        norm_weight,
        norm_bias,
        epsilon,
        begin_norm_axis,
        quant,
        with_inv_var,
    } = request;

    if bias.is_some() || residual.is_some() {
        return Err(unimplemented(
            "bias or residual is not supported in rms_norm yet",
        ));
    }
    if quant.scale > 0. {
        return Err(unimplemented(
            "quantization is not supported in rms_norm yet",
        ));
    }

    let [rows, cols] = flatten_to_2d(x.shape(), begin_norm_axis)?;
    let &[dw] = norm_weight.shape() else {
        return Err(invalid_argument(format!(
            "norm_weight must be 1-D, got shape {:?}",
            norm_weight.shape(),
        )));
    };
    if cols != dw {
        return Err(invalid_argument(format!(
            "The product from begin_norm_axis to the last axis of input tensor x, \
             i.e., cols({cols}), must be equal to the norm_weight tensor's dimension({dw})."
        )));
    }
    if cols == 0 {
        return Err(invalid_argument("cannot normalize rows of 0 elements"));
    }
    if let Some(b) = norm_bias {
        if b.shape() != [cols] {
            return Err(invalid_argument(format!(
                "norm_bias must have shape [{cols}], got {:?}",
                b.shape(),
            )));
        }
    }

    let dt = x.dt();
    debug!("{NAME}: dt = {dt}, rows = {rows}, cols = {cols}, inv_var = {with_inv_var}");

    let mut out = Tensor::new(dt, x.shape(), queue_alloc.alloc(x.layout().nbytes()));
    let mut inv_var = with_inv_var.then(|| {
        let size = rows * ty::F32.nbytes().unwrap();
        Tensor::new(ty::F32, &[rows], queue_alloc.alloc(size))
    });

    let matrix = TensorLayout::new_contiguous(dt, &[rows, cols]);
    let args = Args {
        y_layout: matrix.clone(),
        y_base: out.base_mut(),
        x_layout: matrix,
        x_base: x.base(),
        w_layout: norm_weight.layout().clone(),
        w_base: norm_weight.base(),
        b_layout: norm_bias.map(|b| b.layout().clone()),
        b_base: norm_bias.map_or(null(), |b| b.base()),
        inv_var_layout: inv_var.as_ref().map(|t| t.layout().clone()),
        inv_var_base: inv_var.as_mut().map_or(null_mut(), |t| t.base_mut()),
        epsilon,
    };

    if let Err(e) = op.launch(&args, &mut [], queue_alloc) {
        queue_alloc.free(out.take());
        if let Some(inv_var) = inv_var {
            queue_alloc.free(inv_var.take())
        }
        return Err(e);
    }

    Ok(Output {
        out,
        residual_out: None,
        inv_var,
    })
}

/// 按设备区分的内核入口。
#[derive(Clone, Copy)]
pub enum Kernel {
    #[cfg(any(use_cpu, test))]
    Cpu(
        fn(
            &crate::common_cpu::ThisThread,
            &Request<&[u8]>,
        ) -> Result<Output<crate::Blob>, LaunchError>,
    ),
    #[cfg(use_xpu)]
    Xpu(
        fn(
            &crate::xpu::Stream,
            &Request<&[crate::xpu::DevByte]>,
        ) -> Result<Output<crate::xpu::DevMem>, LaunchError>,
    ),
}

/// 将 `rms_norm` 注册到所有已启用的设备。
pub fn register(registry: &mut KernelRegistry<Kernel>) {
    #[cfg(any(use_cpu, test))]
    registry.register(NAME, DeviceKind::Cpu, DTYPES, Kernel::Cpu(common_cpu::kernel));
    #[cfg(use_xpu)]
    registry.register(NAME, DeviceKind::Xpu, DTYPES, Kernel::Xpu(xpu::kernel));
}

pub fn registry() -> KernelRegistry<Kernel> {
    let mut registry = KernelRegistry::new();
    register(&mut registry);
    registry
}
