//! Colored log output for the long-running recorder
//!
//! Each line carries a colored prefix naming the subsystem that emitted it,
//! derived from the event target, so interleaved output from camera workers,
//! the storage guardian and the snapshot threads stays readable.

use owo_colors::{OwoColorize, Style};
use std::fmt;
use std::io;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{
    format::{FormatEvent, FormatFields, Writer},
    FmtContext,
};
use tracing_subscriber::registry::LookupSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Manager,
    Record,
    Storage,
    Snapshot,
    Capture,
    Encode,
}

impl Component {
    /// Map a tracing target (module path) to its subsystem
    pub fn from_target(target: &str) -> Self {
        if target.starts_with("camvault_core::recorder") {
            Component::Record
        } else if target.starts_with("camvault_core::storage") {
            Component::Storage
        } else if target.starts_with("camvault_core::snapshot") {
            Component::Snapshot
        } else if target.starts_with("camvault_capture") {
            Component::Capture
        } else if target.starts_with("camvault_processing") {
            Component::Encode
        } else {
            Component::Manager
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Manager => "MANAGER",
            Component::Record => "RECORD",
            Component::Storage => "STORAGE",
            Component::Snapshot => "SNAPSHOT",
            Component::Capture => "CAPTURE",
            Component::Encode => "ENCODE",
        }
    }

    pub fn color_style(&self) -> Style {
        match self {
            Component::Manager => Style::new().cyan().bold(),
            Component::Record => Style::new().green().bold(),
            Component::Storage => Style::new().yellow().bold(),
            Component::Snapshot => Style::new().magenta().bold(),
            Component::Capture => Style::new().blue().bold(),
            Component::Encode => Style::new().white().bold(),
        }
    }
}

/// Formatter writing `HH:MM:SS [COMPONENT] LEVEL message`
pub struct ColoredFormatter;

impl<S, N> FormatEvent<S, N> for ColoredFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let component = Component::from_target(metadata.target());

        let now = chrono::Local::now();
        write!(writer, "{} ", now.format("%H:%M:%S").dimmed())?;

        let prefix = format!("[{:8}]", component.as_str());
        write!(writer, "{} ", prefix.style(component.color_style()))?;

        match *metadata.level() {
            Level::ERROR => write!(writer, "{} ", "ERROR".red().bold())?,
            Level::WARN => write!(writer, "{} ", "WARN ".yellow().bold())?,
            Level::INFO => write!(writer, "{} ", "INFO ".green().bold())?,
            Level::DEBUG => write!(writer, "{} ", "DEBUG".blue().bold())?,
            Level::TRACE => write!(writer, "{} ", "TRACE".dimmed().bold())?,
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Install the colored subscriber. `RUST_LOG` directives still apply.
pub fn init_logger(verbose: bool) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .event_format(ColoredFormatter)
        .with_writer(io::stdout);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_from_target() {
        assert_eq!(Component::from_target("camvault_core::recorder"), Component::Record);
        assert_eq!(Component::from_target("camvault_core::storage"), Component::Storage);
        assert_eq!(Component::from_target("camvault_core::snapshot"), Component::Snapshot);
        assert_eq!(Component::from_target("camvault_capture::ffmpeg"), Component::Capture);
        assert_eq!(Component::from_target("camvault_processing::encoder"), Component::Encode);
        assert_eq!(Component::from_target("camvault_core::manager"), Component::Manager);
        assert_eq!(Component::from_target("camvault"), Component::Manager);
    }
}
