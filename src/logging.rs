use anyhow::{Context, Result};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::UtcOffset;
use tracing::dispatcher::DefaultGuard;
use tracing_subscriber::fmt::format::{Format, Full};
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install the global subscriber, e.g. `init("info")` or `init("mlf_tomo=debug")`.
pub fn init(log: impl AsRef<str>) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(log)?)
        .event_format(log_format())
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    Ok(())
}

/// Subscriber for the current thread only, routed through the test harness.
pub fn init_test() -> DefaultGuard {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new("debug"))
        .event_format(log_format())
        .with_test_writer()
        .finish();

    tracing::subscriber::set_default(subscriber)
}

fn log_filter(log: impl AsRef<str>) -> Result<EnvFilter> {
    let log = log.as_ref();
    EnvFilter::builder()
        .parse(log)
        .with_context(|| format!("Failed to parse log filter: {}", log))
}

fn log_format() -> Format<Full, OffsetTime<&'static [FormatItem<'static>]>> {
    let time_format = format_description!(
        version = 2,
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:4] [offset_hour sign:mandatory]:[offset_minute]"
    );

    let time_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    Format::default()
        .with_timer(OffsetTime::new(time_offset, time_format))
        .with_target(false)
}
