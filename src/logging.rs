// Logging setup: env-driven levels, pretty console output, optional JSON file output
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use eyre::{Result, WrapErr};
use tracing::{Id, Subscriber, debug, field::Field, field::Visit, span};
use tracing_subscriber::{
    EnvFilter,
    fmt,
    layer::{Context, Layer, SubscriberExt},
    util::SubscriberInitExt,
};

static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

const CRATE_TARGET: &str = "strategy_client";

pub fn init_logging(app_name: String) -> Result<()> {
    let console_log_level = env::var("CONSOLE_LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());
    let file_log_level = env::var("FILE_LOG_LEVEL").unwrap_or_else(|_| "DEBUG".to_string());
    let log_to_file = env::var("LOG_TO_FILE").map(|v| v == "true").unwrap_or(false);

    // Third-party crates stay at warn, our own target follows the configured level
    let console_filter = crate_filter(&console_log_level);
    let console_layer = fmt::Layer::new().pretty().with_filter(console_filter);

    if log_to_file {
        let log_dir = PathBuf::from(env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()));
        fs::create_dir_all(&log_dir)
            .wrap_err_with(|| format!("Failed to create log directory {}", log_dir.display()))?;
        let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let file_name = format!("{app_name}_{timestamp}.log");

        let file_appender = tracing_appender::rolling::never(&log_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        FILE_GUARD.set(guard).ok();

        let file_layer = fmt::Layer::new()
            .json()
            .with_writer(non_blocking)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_filter(crate_filter(&file_log_level));

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .with(SpanTimingLayer)
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    } else {
        tracing_subscriber::registry()
            .with(console_layer)
            .with(SpanTimingLayer)
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    }

    debug!(app = %app_name, log_to_file, "Logging initialized");
    Ok(())
}

fn crate_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(format!("warn,{CRATE_TARGET}={level}"))
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,{CRATE_TARGET}=info")))
}

// Reports busy/idle time for spans opened with `on_close = true`
struct SpanTimingLayer;

struct SpanTimes {
    started: Instant,
    last_transition: Instant,
    busy: Duration,
    idle: Duration,
}

struct OnCloseVisitor {
    on_close: bool,
}

impl Visit for OnCloseVisitor {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "on_close" {
            self.on_close = value;
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
}

impl<S> Layer<S> for SpanTimingLayer
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut visitor = OnCloseVisitor { on_close: false };
        attrs.record(&mut visitor);
        if visitor.on_close {
            let now = Instant::now();
            span.extensions_mut().insert(SpanTimes {
                started: now,
                last_transition: now,
                busy: Duration::ZERO,
                idle: Duration::ZERO,
            });
        }
    }

    fn on_enter(&self, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut exts = span.extensions_mut();
        if let Some(times) = exts.get_mut::<SpanTimes>() {
            times.idle += times.last_transition.elapsed();
            times.last_transition = Instant::now();
        }
    }

    fn on_exit(&self, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut exts = span.extensions_mut();
        if let Some(times) = exts.get_mut::<SpanTimes>() {
            times.busy += times.last_transition.elapsed();
            times.last_transition = Instant::now();
        }
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(&id) else { return };
        let mut exts = span.extensions_mut();
        if let Some(times) = exts.remove::<SpanTimes>() {
            debug!(
                span = span.name(),
                busy_time = ?times.busy,
                idle_time = ?times.idle,
                total_time = ?times.started.elapsed(),
                "span closed"
            );
        }
    }
}
