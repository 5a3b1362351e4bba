use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Source of "now" for everything that buckets by time.
///
/// Filters and timelines never read the wall clock themselves; callers capture
/// one instant from a `Clock` and pass it down, so a single invocation sees a
/// single "now" and tests can pin it.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    offset: UtcOffset,
    fixed: Option<OffsetDateTime>,
}

impl Clock {
    pub fn system(offset: UtcOffset) -> Self {
        Self {
            offset,
            fixed: None,
        }
    }

    pub fn fixed(at: OffsetDateTime) -> Self {
        Self {
            offset: at.offset(),
            fixed: Some(at),
        }
    }

    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    pub fn now(&self) -> OffsetDateTime {
        match self.fixed {
            Some(at) => at,
            None => OffsetDateTime::now_utc().to_offset(self.offset),
        }
    }
}

/// Parses an instant as stored by the app: RFC 3339 first, then the
/// space-separated form Postgres emits (`2024-10-19 10:00:00.123+00`).
pub fn parse_instant(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(at) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(at);
    }
    let with_offset = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]][offset_hour sign:mandatory][optional [:[offset_minute]]]"
    );
    if let Ok(at) = OffsetDateTime::parse(raw, with_offset) {
        return Some(at);
    }
    // Naive timestamps are taken as UTC.
    let naive_t = format_description!("[year]-[month]-[day]T[hour]:[minute][optional [:[second]]]");
    let naive_space =
        format_description!("[year]-[month]-[day] [hour]:[minute][optional [:[second]]]");
    PrimitiveDateTime::parse(raw, naive_t)
        .or_else(|_| PrimitiveDateTime::parse(raw, naive_space))
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

pub fn format_instant(at: OffsetDateTime) -> String {
    at.to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

pub fn format_local(at: OffsetDateTime, offset: UtcOffset) -> String {
    at.to_offset(offset)
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .unwrap_or_else(|_| format_instant(at))
}

/// Accepts `+02:00`, `-05:30`, `Z` or `UTC`.
pub fn parse_offset(raw: &str) -> Option<UtcOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return Some(UtcOffset::UTC);
    }
    UtcOffset::parse(
        raw,
        format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
    )
    .ok()
}
