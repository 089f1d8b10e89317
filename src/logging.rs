use anyhow::Result;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, EnvFilter};

/// 初始化日志 / Initialize tracing
///
/// 级别来自配置；时间戳用订阅器默认的RFC 3339格式，与队列载荷的ISO-8601
/// 时间戳同族，日志与线上数据可直接对照
/// Level comes from configuration; timestamps use the subscriber's default
/// RFC 3339 format, the same family as the queue payload's ISO-8601
/// timestamps, so logs line up with on-wire data
pub fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    LogTracer::init().ok();
    fmt::SubscriberBuilder::default()
        .with_env_filter(filter)
        .compact()
        .with_target(false)
        .try_init()
        .ok();
    Ok(())
}
