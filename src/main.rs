fn main() {
    if let Err(e) = study_monitor_lib::run() {
        eprintln!("启动失败: {:#}", e);
        std::process::exit(1);
    }
}
