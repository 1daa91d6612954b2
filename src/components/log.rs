use std::env;

use chrono::{Local, Timelike};
use fern::colors::{Color, ColoredLevelConfig};
use fern::{self, Dispatch};
use log::LevelFilter;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum Verbosity {
    Info,
    Debug,
    Trace,
}

impl Verbosity {
    fn level(self) -> LevelFilter {
        match self {
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
            Verbosity::Trace => LevelFilter::Trace,
        }
    }

    /// `ROA_LOG` overrides the configured verbosity.
    fn log_level(self) -> LevelFilter {
        if let Ok(s) = env::var("ROA_LOG") {
            match s.parse() {
                Ok(level) => return level,
                Err(err) => eprintln!("ROA_LOG is invalid: {}", err),
            }
        }
        self.level()
    }

    pub fn init_roa_log_system_with_verbosity(self) -> Result<(), fern::InitError> {
        let mut dispatch = Dispatch::new().level(self.log_level());

        if let Some(log_file_path) = env::var_os("ROA_LOG_FILE_PATH") {
            let file_dispatch = Dispatch::new()
                .filter(|metadata| metadata.target() == "ROA")
                .format(|callback, args, record| {
                    callback.finish(format_args!(
                        "{} |ROA OUTPUT-{:5}| {}",
                        Local::now().date_naive(),
                        record.level(),
                        args,
                    ))
                })
                .chain(fern::log_file(log_file_path)?);
            dispatch = dispatch.chain(file_dispatch);
        }

        let color_line = ColoredLevelConfig::new()
            .info(Color::White)
            .error(Color::Red)
            .warn(Color::Yellow)
            .debug(Color::White)
            .trace(Color::BrightBlack);

        let color_level = color_line.info(Color::Green);

        let stderr_dispatch = Dispatch::new()
            .format(move |callback, args, record| {
                let time_now = Local::now();
                callback.finish(format_args!(
                    "{}{}:{}|ROA|{}{}|: {}\x1B[0m",
                    format_args!("\x1B[{}m", color_line.get_color(&record.level()).to_fg_str()),
                    time_now.hour(),
                    time_now.minute(),
                    color_level.color(record.level()),
                    format_args!("\x1B[{}m", color_line.get_color(&record.level()).to_fg_str()),
                    args
                ))
            })
            .chain(std::io::stderr());

        // stdout is reserved for the report.
        dispatch.chain(stderr_dispatch).apply()?;
        Ok(())
    }
}

#[macro_export]
macro_rules! roa_trace {
    ($($arg:tt)+) => (
        ::log::trace!(target: "ROA", $($arg)+)
    );
}

#[macro_export]
macro_rules! roa_debug {
    ($($arg:tt)+) => (
        ::log::debug!(target: "ROA", $($arg)+)
    );
}

#[macro_export]
macro_rules! roa_info {
    ($($arg:tt)+) => (
        ::log::info!(target: "ROA", $($arg)+)
    );
}

#[macro_export]
macro_rules! roa_warn {
    ($($arg:tt)+) => (
        ::log::warn!(target: "ROA", $($arg)+)
    );
}

#[macro_export]
macro_rules! roa_error {
    ($($arg:tt)+) => (
        ::log::error!(target: "ROA", $($arg)+)
    );
}

pub fn roa_error_and_exit(msg: impl AsRef<str>) -> ! {
    roa_error!("{}", msg.as_ref());
    std::process::exit(1)
}
