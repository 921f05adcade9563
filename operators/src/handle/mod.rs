#[cfg(any(use_cpu, test))]
pub mod common_cpu;
#[cfg(use_xpu)]
pub mod xpu;
