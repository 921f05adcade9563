//! 内核注册表。
//!
//! 以 `(算子名, 设备, 数据类型)` 为键，在运行时选择内核实现。

use crate::{type_not_support, LaunchError};
use digit_layout::DigitLayout;
use log::warn;
use std::collections::HashMap;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DeviceKind {
    /// 通用处理器。
    Cpu,
    /// 加速卡。
    Xpu,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct KernelKey {
    pub name: &'static str,
    pub device: DeviceKind,
    pub dt: DigitLayout,
}

pub struct KernelRegistry<K> {
    kernels: HashMap<KernelKey, K>,
}

impl<K> Default for KernelRegistry<K> {
    #[inline]
    fn default() -> Self {
        Self {
            kernels: HashMap::new(),
        }
    }
}

impl<K: Clone> KernelRegistry<K> {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 为 `dts` 中的每种数据类型注册同一个内核。已存在的键会被替换。
    pub fn register(
        &mut self,
        name: &'static str,
        device: DeviceKind,
        dts: &[DigitLayout],
        kernel: K,
    ) {
        for &dt in dts {
            let key = KernelKey { name, device, dt };
            if self.kernels.insert(key, kernel.clone()).is_some() {
                warn!("kernel {name} for {device:?} {dt} is registered twice, the old one is replaced");
            }
        }
    }

    pub fn dispatch(
        &self,
        name: &'static str,
        device: DeviceKind,
        dt: DigitLayout,
    ) -> Result<&K, LaunchError> {
        self.kernels
            .get(&KernelKey { name, device, dt })
            .ok_or_else(|| type_not_support(format!("no {name} kernel for {device:?} {dt}")))
    }

    #[inline]
    pub fn contains(&self, name: &'static str, device: DeviceKind, dt: DigitLayout) -> bool {
        self.kernels.contains_key(&KernelKey { name, device, dt })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}
