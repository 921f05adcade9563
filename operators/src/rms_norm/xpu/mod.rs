use super::{args::Meta, Args, Output, Request, RmsNorm};
use crate::{
    execution_failed, strides_not_support, type_not_support,
    xpu::{xdnn, DevByte, DevMem, Device, Stream},
    ByteOf, LaunchError, Operator as _, QueueAlloc, SchemeError, TensorLayout,
};
use digit_layout::types as ty;
use half::{bf16, f16};
use log::error;

pub struct Operator;

impl RmsNorm<Device> for Operator {}

/// 加速卡上的 `rms_norm` 内核，计算委托给 `xdnn::rms_layer_norm`。
pub fn kernel(
    stream: &Stream,
    request: &Request<&[DevByte]>,
) -> Result<Output<DevMem>, LaunchError> {
    super::launch(&Operator::new(stream.device()), request, stream)
}

impl crate::Operator for Operator {
    type Hardware = Device;
    type Args = Args<Device>;

    #[inline]
    fn new(_node: &Self::Hardware) -> Self {
        Self
    }

    fn scheme(
        &mut self,
        args: &Self::Args,
        _max_workspace_size: usize,
    ) -> Result<usize, SchemeError> {
        check(args)?;
        Ok(0)
    }

    fn launch<QA>(
        &self,
        args: &Self::Args,
        _workspace: &mut [ByteOf<Self::Hardware>],
        queue_alloc: &QA,
    ) -> Result<(), LaunchError>
    where
        QA: QueueAlloc<Hardware = Self::Hardware>,
    {
        let Meta { dt, n, d } = check(args)?;
        let Args {
            y_base,
            x_base,
            w_base,
            b_base,
            inv_var_base,
            epsilon,
            ..
        } = args;
        let ctx = queue_alloc.queue().x_context();

        macro_rules! rms_layer_norm {
            ($ty:ty) => {
                unsafe {
                    xdnn::rms_layer_norm::<$ty>(
                        ctx,
                        x_base.cast(),
                        y_base.cast(),
                        n as _,
                        d as _,
                        *epsilon,
                        w_base.cast(),
                        b_base.cast(),
                        inv_var_base.cast(),
                        true,
                    )
                }
            };
        }

        let r = match dt {
            ty::F16 => rms_layer_norm!(f16),
            ty::BF16 => rms_layer_norm!(bf16),
            ty::F32 => rms_layer_norm!(f32),
            _ => unreachable!(),
        };
        if r != xdnn::SUCCESS {
            let name = xdnn::status_name(r);
            error!("xpu rms_layer_norm failed with {r} ({name}), n = {n}, d = {d}");
            return Err(execution_failed(format!(
                "XDNN error {r} ({name}) in rms_layer_norm"
            )));
        }
        Ok(())
    }
}

/// 厂商库只接受连续存储的张量。
fn check(args: &Args<Device>) -> Result<Meta, LaunchError> {
    let meta = args.meta()?;
    match meta.dt {
        ty::F16 | ty::BF16 | ty::F32 => {}
        dt => return Err(type_not_support(format!("{dt} not supported by xpu rms_norm"))),
    }

    fn contiguous(layout: &TensorLayout) -> bool {
        layout.strides() == TensorLayout::new_contiguous(layout.dt(), layout.shape()).strides()
    }

    let Args {
        y_layout,
        x_layout,
        w_layout,
        b_layout,
        inv_var_layout,
        ..
    } = args;
    if [y_layout, x_layout, w_layout]
        .into_iter()
        .chain(b_layout)
        .chain(inv_var_layout)
        .all(contiguous)
    {
        Ok(meta)
    } else {
        Err(strides_not_support("xpu rms_norm requires contiguous tensors"))
    }
}
