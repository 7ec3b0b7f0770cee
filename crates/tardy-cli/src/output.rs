//! Output layer: JSON event lines for `reconcile`, text/JSON rendering for
//! `show`.

use serde::Serialize;
use std::collections::BTreeSet;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};
use tardy_core::{Event, EventKind, EventSink};

/// Output modes supported by the inspection commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

impl OutputMode {
    pub const fn from_json_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Text }
    }
}

/// Render a serializable value: pretty JSON, or via `text_fn`.
pub fn render<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
    }
    Ok(())
}

#[derive(Serialize)]
struct EventLine<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant: Option<&'a str>,
    #[serde(flatten)]
    event: &'a Event,
}

/// Event sink writing one JSON object per delivered event.
///
/// Delivery cannot fail from the reconciler's point of view, so the first
/// write error is kept and surfaced by [`JsonLinesSink::finish`].
pub struct JsonLinesSink<W> {
    listening: BTreeSet<EventKind>,
    out: Mutex<Lines<W>>,
}

struct Lines<W> {
    writer: W,
    written: usize,
    error: Option<io::Error>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W, listening: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            listening: listening.into_iter().collect(),
            out: Mutex::new(Lines {
                writer,
                written: 0,
                error: None,
            }),
        }
    }

    /// Flush and hand back the writer with the number of lines written.
    ///
    /// # Errors
    ///
    /// The first write error seen during delivery, or a flush failure.
    pub fn finish(self) -> io::Result<(W, usize)> {
        let lines = self
            .out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(err) = lines.error {
            return Err(err);
        }
        let Lines {
            mut writer,
            written,
            ..
        } = lines;
        writer.flush()?;
        Ok((writer, written))
    }

    fn lock(&self) -> MutexGuard<'_, Lines<W>> {
        self.out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_line(&self, line: &EventLine<'_>) {
        let mut lines = self.lock();
        if lines.error.is_some() {
            return;
        }
        let result = serde_json::to_writer(&mut lines.writer, line)
            .map_err(io::Error::from)
            .and_then(|()| writeln!(lines.writer));
        match result {
            Ok(()) => lines.written += 1,
            Err(err) => {
                tracing::error!(error = %err, kind = %line.event.kind, "failed to write event");
                lines.error = Some(err);
            }
        }
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn is_listener_registered(&self, kind: EventKind) -> bool {
        self.listening.contains(&kind)
    }

    fn fire_session(&self, tenant: &str, event: Event) {
        self.write_line(&EventLine {
            tenant: Some(tenant),
            event: &event,
        });
    }

    fn fire_global(&self, event: Event) {
        self.write_line(&EventLine {
            tenant: None,
            event: &event,
        });
    }
}
