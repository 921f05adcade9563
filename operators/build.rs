fn main() {
    use build_script_cfg::Cfg;

    let cpu = Cfg::new("use_cpu");
    let xpu = Cfg::new("use_xpu");
    if cfg!(feature = "common-cpu") {
        cpu.define();
    }
    if cfg!(feature = "xpu") {
        xpu.define();
    }
}
