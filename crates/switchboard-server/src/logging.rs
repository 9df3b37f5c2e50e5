use anyhow::{anyhow, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

use crate::configuration::LoggingSettings;

/// Install the global subscriber. Keep the returned guard alive to flush file output.
pub fn setup_logging(settings: &LoggingSettings) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .map_err(|e| anyhow!("invalid log filter {:?}: {}", settings.filter, e))?;

    let (writer, guard) = match &settings.directory {
        Some(directory) => {
            let file_appender =
                RollingFileAppender::new(Rotation::DAILY, directory, "switchboard.log");
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            (BoxMakeWriter::new(std::io::stderr.and(file_writer)), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let installed = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow!("failed to initialize logging: {}", e))?;

    Ok(guard)
}
