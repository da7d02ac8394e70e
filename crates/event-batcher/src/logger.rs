// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line formatter for processes embedding the batcher.
//!
//! Lines look like:
//!
//! ```text
//! EVENT_BATCHER | INFO | relay{source="stdin"}: Flushed 12 events (3 coalesced), 0 still queued
//! ```

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

use crate::constants::{DEFAULT_LOG_LEVEL, LOG_LEVELS};

/// Filter directive for a subscriber logging at `log_level`, with tokio's own spans silenced.
///
/// Unknown levels fall back to `info`. Passed through as is, a value like `loud` would parse as
/// a target name and hide every event outside that target.
#[must_use]
pub fn filter_directive(log_level: &str) -> String {
    let log_level = log_level.to_lowercase();
    let level = if LOG_LEVELS.contains(&log_level.as_str()) {
        log_level.as_str()
    } else {
        DEFAULT_LOG_LEVEL
    };
    format!("tokio=off,{level}")
}

/// Prefixes every line with `EVENT_BATCHER` and the level, then the active spans from the root.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "EVENT_BATCHER | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                // fields are stored in the span's extensions by the fmt layer
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}
