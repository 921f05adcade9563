use super::{args::Meta, Args, Output, Request, RmsNorm};
use crate::{
    common_cpu::{Cpu, ThisThread},
    strides_not_support, type_not_support, Blob, ByteOf, LaunchError, Operator as _, QueueAlloc,
    SchemeError, TensorLayout,
};
use digit_layout::{types as ty, DigitLayout};
use half::{bf16, f16};
use num_traits::{real::Real, NumCast, ToPrimitive};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::{
    ops::AddAssign,
    slice::{from_raw_parts, from_raw_parts_mut},
};

pub struct Operator;

impl RmsNorm<Cpu> for Operator {}

/// cpu 上的 `rms_norm` 内核，各行并行计算。
pub fn kernel(queue: &ThisThread, request: &Request<&[u8]>) -> Result<Output<Blob>, LaunchError> {
    super::launch(&Operator::new(&Cpu), request, queue)
}

impl crate::Operator for Operator {
    type Hardware = Cpu;
    type Args = Args<Cpu>;

    #[inline]
    fn new(_node: &Self::Hardware) -> Self {
        Self
    }

    fn scheme(
        &mut self,
        args: &Self::Args,
        _max_workspace_size: usize,
    ) -> Result<usize, SchemeError> {
        let meta = args.meta()?;
        check_type(meta.dt)?;
        check_strides(args, &meta)?;
        Ok(0)
    }

    fn launch<QA>(
        &self,
        args: &Self::Args,
        _workspace: &mut [ByteOf<Self::Hardware>],
        _queue_alloc: &QA,
    ) -> Result<(), LaunchError>
    where
        QA: QueueAlloc<Hardware = Self::Hardware>,
    {
        let meta = args.meta()?;
        check_type(meta.dt)?;
        let [nsy, nsx] = check_strides(args, &meta)?;

        let Meta { dt, n, d } = meta;
        let Args {
            y_base,
            x_base,
            w_base,
            b_base,
            inv_var_base,
            epsilon,
            ..
        } = args;

        macro_rules! calculate {
            ($eps:expr; $x:ty, $a:ty) => {
                Scheme::<$x, $a> {
                    n,
                    d,
                    nsy,
                    nsx,
                    epsilon: $eps,
                    y: y_base.cast(),
                    x: x_base.cast(),
                    w: w_base.cast(),
                    b: b_base.cast(),
                    inv_var: inv_var_base.cast(),
                }
                .calculate()
            };
        }

        match dt {
            ty::F16 => calculate!(*epsilon       ; f32, f16 ),
            ty::BF16 => calculate!(*epsilon      ; f32, bf16),
            ty::F32 => calculate!(*epsilon       ; f32, f32 ),
            ty::F64 => calculate!(*epsilon as f64; f64, f64 ),
            _ => unreachable!(),
        }
        Ok(())
    }
}

fn check_type(dt: DigitLayout) -> Result<(), LaunchError> {
    match dt {
        ty::F16 | ty::BF16 | ty::F32 | ty::F64 => Ok(()),
        _ => Err(type_not_support(format!("{dt} not supported by cpu rms_norm"))),
    }
}

/// 检查归一化维度连续且行之间不重叠，返回 y 和 x 的行步长。
fn check_strides(args: &Args<Cpu>, meta: &Meta) -> Result<[isize; 2], LaunchError> {
    let &Meta { dt, n, d } = meta;
    let unit = dt.nbytes().unwrap() as isize;

    fn last_stride(layout: &TensorLayout) -> isize {
        *layout.strides().last().unwrap_or(&0)
    }

    let &[nsy, dsy] = args.y_layout.strides() else {
        unreachable!()
    };
    let &[nsx, dsx] = args.x_layout.strides() else {
        unreachable!()
    };
    if dsy != unit
        || dsx != unit
        || last_stride(&args.w_layout) != unit
        || args.b_layout.as_ref().is_some_and(|b| last_stride(b) != unit)
    {
        return Err(strides_not_support("rms_norm requires unit stride along d"));
    }
    if args
        .inv_var_layout
        .as_ref()
        .is_some_and(|v| last_stride(v) != ty::F32.nbytes().unwrap() as isize)
    {
        return Err(strides_not_support("inv_var must be contiguous"));
    }
    if n > 1 && nsy.unsigned_abs() < d * unit as usize {
        return Err(strides_not_support("rows of y overlap"));
    }
    Ok([nsy, nsx])
}

struct Scheme<X, A> {
    n: usize,
    d: usize,
    nsy: isize,
    nsx: isize,
    epsilon: X,
    y: *mut A,
    x: *const A,
    w: *const A,
    b: *const A,
    inv_var: *mut f32,
}

unsafe impl<X, A> Send for Scheme<X, A> {}
unsafe impl<X, A> Sync for Scheme<X, A> {}

impl<X, A> Scheme<X, A>
where
    X: Real + AddAssign,
    A: Real,
{
    fn calculate(&self) {
        (0..self.n).into_par_iter().for_each(|i| self.row(i))
    }

    fn row(&self, i: usize) {
        let d = self.d;
        let y = unsafe { from_raw_parts_mut(self.y.byte_offset(i as isize * self.nsy), d) };
        let x = unsafe { from_raw_parts(self.x.byte_offset(i as isize * self.nsx), d) };
        let w = unsafe { from_raw_parts(self.w, d) };
        let b = (!self.b.is_null()).then(|| unsafe { from_raw_parts(self.b, d) });

        let mut sum2 = X::zero();
        for &x in x {
            let x: X = cast(x);
            sum2 += x * x;
        }
        let k = (sum2 / cast(d) + self.epsilon).sqrt().recip();

        for j in 0..d {
            let x: X = cast(x[j]);
            let w: X = cast(w[j]);
            let b: X = b.map_or(X::zero(), |b| cast(b[j]));
            y[j] = cast((x * k).mul_add(w, b));
        }

        if !self.inv_var.is_null() {
            unsafe { *self.inv_var.add(i) = cast(k) }
        }
    }
}

#[inline]
fn cast<T: NumCast, U: ToPrimitive>(u: U) -> T {
    T::from(u).unwrap()
}

#[cfg(test)]
mod test {
    use super::{Args, Cpu, Operator};
    use crate::{
        common_cpu::ThisThread,
        test_utils::{Diff, ErrorCollector},
        LaunchErrorKind, Operator as _, TensorLayout,
    };
    use digit_layout::{types as ty, DigitLayout};
    use half::{bf16, f16};
    use rand::Rng;

    fn args(dt: DigitLayout, n: usize, d: usize) -> Args<Cpu> {
        let layout = TensorLayout::new_contiguous(dt, &[n, d]);
        Args::new_null(
            layout.clone(),
            layout,
            TensorLayout::new_contiguous(dt, &[d]),
            1e-6,
        )
    }

    fn random(len: usize) -> Vec<f64> {
        let mut rng = rand::thread_rng();
        (0..len).map(|_| rng.gen_range(-2.0..2.0)).collect()
    }

    fn reference(x: &[f64], w: &[f64], n: usize, d: usize) -> (Vec<f64>, Vec<f32>) {
        let mut y = vec![0.; n * d];
        let mut inv_var = vec![0.0f32; n];
        let mut args = args(ty::F64, n, d);
        args.y_base = y.as_mut_ptr().cast();
        args.x_base = x.as_ptr().cast();
        args.w_base = w.as_ptr().cast();
        args.inv_var_layout = Some(TensorLayout::new_contiguous(ty::F32, &[n]));
        args.inv_var_base = inv_var.as_mut_ptr().cast();
        Operator::new(&Cpu)
            .launch(&args, &mut [], &ThisThread)
            .unwrap();
        (y, inv_var)
    }

    #[test]
    fn test_scenario() {
        let x = [1.0f32, 3.0];
        let w = [1.0f32, 1.0];
        let mut y = [0.0f32; 2];
        let mut inv_var = [0.0f32; 1];

        let mut args = args(ty::F32, 1, 2);
        args.y_base = y.as_mut_ptr().cast();
        args.x_base = x.as_ptr().cast();
        args.w_base = w.as_ptr().cast();
        args.inv_var_layout = Some(TensorLayout::new_contiguous(ty::F32, &[1]));
        args.inv_var_base = inv_var.as_mut_ptr().cast();

        let mut op = Operator::new(&Cpu);
        assert_eq!(op.scheme(&args, 0).unwrap(), 0);
        op.launch(&args, &mut [], &ThisThread).unwrap();

        let k = 5.000001f64.sqrt().recip();
        assert!((inv_var[0] as f64 - k).abs() < 1e-6);
        assert!((y[0] as f64 - k).abs() < 1e-6);
        assert!((y[1] as f64 - 3. * k).abs() < 1e-6);
    }

    #[test]
    fn test_bias() {
        let x = [2.0f32, -2.0, 2.0, -2.0];
        let w = [1.0f32, 0.5, 2.0, 1.0];
        let b = [0.25f32, 0.5, -1.0, 0.0];
        let mut y = [0.0f32; 4];

        let mut args = args(ty::F32, 1, 4);
        args.epsilon = 0.;
        args.y_base = y.as_mut_ptr().cast();
        args.x_base = x.as_ptr().cast();
        args.w_base = w.as_ptr().cast();
        args.b_layout = Some(TensorLayout::new_contiguous(ty::F32, &[4]));
        args.b_base = b.as_ptr().cast();
        Operator::new(&Cpu)
            .launch(&args, &mut [], &ThisThread)
            .unwrap();

        assert_eq!(y, [1.25, 0., 1.0, -1.0]);
    }

    #[test]
    fn test_strided_rows() {
        // 每行 2 个元素，行间隔 3 个元素
        let x = [3.0f32, 4.0, 99., 6.0, 8.0, 99.];
        let w = [1.0f32, 1.0];
        let mut y = [0.0f32; 4];

        let mut args = args(ty::F32, 2, 2);
        args.epsilon = 0.;
        args.x_layout = TensorLayout::new(ty::F32, &[2, 2], &[12, 4]);
        args.y_base = y.as_mut_ptr().cast();
        args.x_base = x.as_ptr().cast();
        args.w_base = w.as_ptr().cast();
        Operator::new(&Cpu)
            .launch(&args, &mut [], &ThisThread)
            .unwrap();

        let k = 12.5f32.sqrt();
        for (a, b) in y.iter().zip([3. / k, 4. / k, 6. / (2. * k), 8. / (2. * k)]) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_half() {
        let n = 7;
        let d = 1000;
        let x = random(n * d);
        let w = random(d);
        let (y_ref, inv_var_ref) = reference(&x, &w, n, d);

        macro_rules! check {
            ($ty:ty, $dt:expr) => {{
                let x_ = x.iter().map(|&x| <$ty>::from_f64(x)).collect::<Vec<_>>();
                let w_ = w.iter().map(|&w| <$ty>::from_f64(w)).collect::<Vec<_>>();
                let mut y = vec![<$ty>::ZERO; n * d];
                let mut inv_var = vec![0.0f32; n];

                let mut args = args($dt, n, d);
                args.y_base = y.as_mut_ptr().cast();
                args.x_base = x_.as_ptr().cast();
                args.w_base = w_.as_ptr().cast();
                args.inv_var_layout = Some(TensorLayout::new_contiguous(ty::F32, &[n]));
                args.inv_var_base = inv_var.as_mut_ptr().cast();
                Operator::new(&Cpu)
                    .launch(&args, &mut [], &ThisThread)
                    .unwrap();

                let mut ec = ErrorCollector::new(<$ty>::EPSILON.to_f64(), 1e-2);
                for (a, b) in y_ref.iter().zip(&y) {
                    ec.push(Diff::new(*a, b.to_f64()));
                }
                println!("{ec}");
                let (out, count) = ec.summary();
                assert!(out * 1000 <= count);

                for (a, b) in inv_var_ref.iter().zip(&inv_var) {
                    assert!(Diff::new(*a as f64, *b as f64).rel < 1e-3);
                }
            }};
        }

        check!(f16, ty::F16);
        check!(bf16, ty::BF16);
    }

    #[test]
    fn test_f32() {
        let n = 5;
        let d = 64;
        let x = random(n * d);
        let w = random(d);
        let (y_ref, inv_var_ref) = reference(&x, &w, n, d);

        let x_ = x.iter().map(|&x| x as f32).collect::<Vec<_>>();
        let w_ = w.iter().map(|&w| w as f32).collect::<Vec<_>>();
        let mut y = vec![0.0f32; n * d];
        let mut inv_var = vec![0.0f32; n];

        let mut args = args(ty::F32, n, d);
        args.y_base = y.as_mut_ptr().cast();
        args.x_base = x_.as_ptr().cast();
        args.w_base = w_.as_ptr().cast();
        args.inv_var_layout = Some(TensorLayout::new_contiguous(ty::F32, &[n]));
        args.inv_var_base = inv_var.as_mut_ptr().cast();
        Operator::new(&Cpu)
            .launch(&args, &mut [], &ThisThread)
            .unwrap();

        let mut ec = ErrorCollector::new(1e-6, 1e-5);
        for (a, b) in y_ref.iter().zip(&y) {
            ec.push(Diff::new(*a, *b as f64));
        }
        println!("{ec}");
        assert_eq!(ec.summary().0, 0);
        for (a, b) in inv_var_ref.iter().zip(&inv_var) {
            assert!(Diff::new(*a as f64, *b as f64).rel < 1e-6);
        }
    }

    #[test]
    fn test_unsupported() {
        let mut op = Operator::new(&Cpu);

        let e = op.scheme(&args(ty::U32, 2, 4), 0).unwrap_err();
        assert_eq!(e.kind, LaunchErrorKind::TypeNotSupport);

        let mut args = args(ty::F32, 2, 4);
        args.y_layout = TensorLayout::new(ty::F32, &[2, 4], &[0, 4]);
        let e = op.scheme(&args, 0).unwrap_err();
        assert_eq!(e.kind, LaunchErrorKind::StridesNotSupport);
    }
}
