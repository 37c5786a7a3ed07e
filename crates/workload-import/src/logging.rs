use std::{
    io::{Sink, sink},
    path::PathBuf,
};

use snafu::{ResultExt, Snafu};
use tracing_appender::rolling::{InitError, RollingFileAppender};
use tracing_subscriber::{
    EnvFilter, Registry,
    filter::ParseError,
    fmt::{
        MakeWriter,
        writer::{EitherWriter, MakeWriterExt as _},
    },
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

/// Number of rotated log files kept in the log directory.
const MAX_LOG_FILES: usize = 6;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to initialize default log filter"))]
    DefaultFilter { source: ParseError },

    #[snafu(display("failed to initialize rolling file appender in {directory:?}"))]
    FileAppender {
        source: InitError,
        directory: PathBuf,
    },

    #[snafu(display("failed to install global subscriber"))]
    InstallSubscriber { source: TryInitError },
}

/// Initializes `tracing` logging with the filter from the environment variable `env`.
///
/// Without the variable the maximum log level is INFO. Setting `{env}_DIRECTORY` to a directory
/// additionally writes the log into rotated files named after `app_name` in that directory.
pub fn initialize_logging(env: &str, app_name: &str) -> Result<(), Error> {
    let filter = match EnvFilter::try_from_env(env) {
        Ok(env_filter) => env_filter,
        Err(_) => {
            EnvFilter::try_new(tracing::Level::INFO.to_string()).context(DefaultFilterSnafu)?
        }
    };

    let file_appender_directory = std::env::var_os(format!("{env}_DIRECTORY")).map(PathBuf::from);
    let file_appender = match &file_appender_directory {
        Some(directory) => Some(
            RollingFileAppender::builder()
                .filename_suffix(format!("{app_name}.log"))
                .max_log_files(MAX_LOG_FILES)
                .build(directory)
                .context(FileAppenderSnafu { directory })?,
        ),
        None => None,
    };

    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr.and(OptionalMakeWriter::from(file_appender)));
    Registry::default()
        .with(filter)
        .with(fmt)
        .try_init()
        .context(InstallSubscriberSnafu)?;

    match file_appender_directory {
        Some(dir) => tracing::info!(directory = %dir.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, because no log directory set"),
    }
    Ok(())
}

/// Like [`EitherWriter`] but implements [`MakeWriter`] instead of [`std::io::Write`].
enum EitherMakeWriter<A, B> {
    A(A),
    B(B),
}

impl<'a, A, B> MakeWriter<'a> for EitherMakeWriter<A, B>
where
    A: MakeWriter<'a>,
    B: MakeWriter<'a>,
{
    type Writer = EitherWriter<A::Writer, B::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        match self {
            Self::A(a) => EitherWriter::A(a.make_writer()),
            Self::B(b) => EitherWriter::B(b.make_writer()),
        }
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        match self {
            Self::A(a) => EitherWriter::A(a.make_writer_for(meta)),
            Self::B(b) => EitherWriter::B(b.make_writer_for(meta)),
        }
    }
}

type OptionalMakeWriter<T> = EitherMakeWriter<T, fn() -> Sink>;

impl<T> From<Option<T>> for OptionalMakeWriter<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(t) => Self::A(t),
            None => Self::B(sink),
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing::{debug, error, info};

    // Only one global subscriber can be installed per process, so this is mostly a sanity check.
    // Run with `WORKLOAD_IMPORT_TEST_LOG=debug` to see every message.
    #[test]
    fn default_level_is_info() {
        super::initialize_logging("WORKLOAD_IMPORT_TEST_LOG", "test").unwrap();

        error!("ERROR level messages should be seen.");
        info!("INFO level messages should also be seen by default.");
        debug!("DEBUG level messages should only be seen with the env var set.");

        assert!(super::initialize_logging("WORKLOAD_IMPORT_TEST_LOG", "test").is_err());
    }
}
