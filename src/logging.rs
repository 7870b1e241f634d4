use env_logger::Env;

pub fn init() {
    // stderr only; stdout carries gesture JSON lines
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
