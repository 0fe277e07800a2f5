use std::{panic, thread};

use tracing::{error, level_filters::LevelFilter};
use tracing_appender::non_blocking::WorkerGuard;

use crate::CargoEnv;

/// keep these alive for the whole process: dropping the tracing guard loses
/// buffered log lines, dropping the sentry guard closes the reporting client
pub struct LoggerGuards {
    pub _tracing_guard: WorkerGuard,
    pub _sentry_guard: Option<sentry::ClientInitGuard>,
}

pub struct Logger {}

impl Logger {
    pub fn init(cargo_env: CargoEnv, sentry_dsn: Option<String>) -> LoggerGuards {
        // stdout while iterating locally, daily rolling file on a deployed box.
        // production gets DEBUG - when a provider misbehaves at 3am the relay
        // logs are all there is to go on
        let (max_level, (non_blocking, tracing_guard)) = match cargo_env {
            CargoEnv::Development => (
                LevelFilter::INFO,
                tracing_appender::non_blocking(std::io::stdout()),
            ),
            CargoEnv::Production => (
                LevelFilter::DEBUG,
                tracing_appender::non_blocking(tracing_appender::rolling::daily(
                    "logs",
                    "relay.log",
                )),
            ),
        };

        let sentry_guard = sentry_dsn.map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    environment: Some(match cargo_env {
                        CargoEnv::Development => "development".into(),
                        CargoEnv::Production => "production".into(),
                    }),
                    attach_stacktrace: true,
                    ..Default::default()
                },
            ))
        });

        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let fmt_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking);

        let registry = tracing_subscriber::registry()
            .with(max_level)
            .with(fmt_layer);

        if sentry_guard.is_some() {
            registry.with(sentry_tracing::layer()).init();
        } else {
            registry.init();
        }

        // route panics through the subscriber too, a crash that only hits
        // stderr never makes it into the rolling file
        panic::set_hook(Box::new(|info| {
            let thread = thread::current();
            let thread = thread.name().unwrap_or("unnamed");

            let msg = match info.payload().downcast_ref::<&'static str>() {
                Some(s) => *s,
                None => match info.payload().downcast_ref::<String>() {
                    Some(s) => s.as_str(),
                    None => "non-string panic payload",
                },
            };

            let backtrace = backtrace::Backtrace::new();

            match info.location() {
                Some(location) => error!(
                    target: "panic",
                    "thread '{}' panicked at '{}': {}:{}\n{:?}",
                    thread,
                    msg,
                    location.file(),
                    location.line(),
                    backtrace
                ),
                None => error!(
                    target: "panic",
                    "thread '{}' panicked at '{}'\n{:?}",
                    thread,
                    msg,
                    backtrace
                ),
            }
        }));

        LoggerGuards {
            _tracing_guard: tracing_guard,
            _sentry_guard: sentry_guard,
        }
    }
}
