use crate::{
    invalid_argument, shape_mismatch, type_mismatch,
    utils::{dim_distinct, rank_error, type_distinct},
    ConstPtr, Hardware, MutPtr, SchemeError, TensorLayout,
};
use digit_layout::{types as ty, DigitLayout};
use std::ptr::{null, null_mut};

pub struct Args<H: Hardware> {
    pub y_layout: TensorLayout,
    pub y_base: MutPtr<H>,
    pub x_layout: TensorLayout,
    pub x_base: ConstPtr<H>,
    pub w_layout: TensorLayout,
    pub w_base: ConstPtr<H>,
    /// 可选的偏置，缺省时 `b_base` 为空。
    pub b_layout: Option<TensorLayout>,
    pub b_base: ConstPtr<H>,
    /// 可选的每行 `1/rms`，总是 f32。
    pub inv_var_layout: Option<TensorLayout>,
    pub inv_var_base: MutPtr<H>,
    pub epsilon: f32,
}

pub(super) struct Meta {
    pub dt: DigitLayout,
    pub n: usize,
    pub d: usize,
}

impl<H: Hardware> Args<H> {
    /// 构造不带偏置和 `inv_var` 的参数。
    pub fn new_null(
        y_layout: TensorLayout,
        x_layout: TensorLayout,
        w_layout: TensorLayout,
        epsilon: f32,
    ) -> Self {
        Self {
            y_layout,
            y_base: null_mut(),
            x_layout,
            x_base: null(),
            w_layout,
            w_base: null(),
            b_layout: None,
            b_base: null(),
            inv_var_layout: None,
            inv_var_base: null_mut(),
            epsilon,
        }
    }

    pub(super) fn meta(&self) -> Result<Meta, SchemeError> {
        let Self {
            y_layout: y,
            x_layout: x,
            w_layout: w,
            b_layout: b,
            inv_var_layout: inv_var,
            ..
        } = self;

        let &[ny, dy] = y.shape() else {
            return Err(rank_error("y", 2, y.ndim()));
        };
        let &[nx, dx] = x.shape() else {
            return Err(rank_error("x", 2, x.ndim()));
        };
        let &[dw] = w.shape() else {
            return Err(rank_error("w", 1, w.ndim()));
        };

        let mut dts = vec![y.dt(), x.dt(), w.dt()];
        let mut ns = vec![ny, nx];
        let mut ds = vec![dy, dx, dw];
        if let Some(b) = b {
            let &[db] = b.shape() else {
                return Err(rank_error("b", 1, b.ndim()));
            };
            dts.push(b.dt());
            ds.push(db);
        }
        if let Some(inv_var) = inv_var {
            let &[nv] = inv_var.shape() else {
                return Err(rank_error("inv_var", 1, inv_var.ndim()));
            };
            if inv_var.dt() != ty::F32 {
                return Err(type_mismatch(format!(
                    "inv_var must be {}, got {}",
                    ty::F32,
                    inv_var.dt(),
                )));
            }
            ns.push(nv);
        }

        let dt = type_distinct(&dts)?;
        let Some(n) = dim_distinct(&ns) else {
            return Err(shape_mismatch(format!("rows {ns:?} are not distinct")));
        };
        let Some(d) = dim_distinct(&ds) else {
            return Err(shape_mismatch(format!("cols {ds:?} are not distinct")));
        };
        if d == 0 {
            return Err(invalid_argument("cannot normalize rows of 0 elements"));
        }

        Ok(Meta { dt, n, d })
    }
}
