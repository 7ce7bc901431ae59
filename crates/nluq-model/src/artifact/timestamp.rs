use time::{
    OffsetDateTime, UtcOffset,
    format_description::{BorrowedFormatItem, well_known::Rfc3339},
    macros::format_description,
};

use crate::error::{ModelError, ModelResult};

/// ISO-8601 in UTC with millisecond precision, e.g. `2024-05-01T12:30:45.123Z`.
const ISO_MILLIS: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");

/// Truncate to whole milliseconds and move to UTC.
pub(crate) fn to_millis(dt: OffsetDateTime) -> ModelResult<OffsetDateTime> {
    dt.to_offset(UtcOffset::UTC)
        .replace_millisecond(dt.millisecond())
        .map_err(|e| ModelError::Artifact(format!("invalid timestamp: {e}")))
}

pub(crate) fn format_iso(dt: OffsetDateTime) -> ModelResult<String> {
    to_millis(dt)?
        .format(ISO_MILLIS)
        .map_err(|e| ModelError::Artifact(format!("cannot format timestamp: {e}")))
}

pub(crate) fn parse_iso(s: &str) -> ModelResult<OffsetDateTime> {
    let dt = OffsetDateTime::parse(s, &Rfc3339)
        .map_err(|e| ModelError::Artifact(format!("invalid timestamp '{s}': {e}")))?;
    to_millis(dt)
}
