pub mod filenamify;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

pub fn init_logger(log_level: &str) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new("%b %d %H:%M:%S".to_owned()))
        .with_filter(build_filter(log_level));

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .expect("初始化日志失败");
}

/// 压低依赖库的日志噪音
fn build_filter(base_level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::builder().parse_lossy(format!(
        "{},\
            hyper=warn,\
            reqwest=warn,\
            h2=warn",
        base_level
    ))
}
