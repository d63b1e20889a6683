use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, Time};

pub const SECS_PER_DAY: i64 = 24 * 60 * 60;

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Next `generatedAt` stamp: the current time, unless the clock moved behind the
/// previous stamp.
pub fn next_generated_at(previous: Option<OffsetDateTime>, now: OffsetDateTime) -> OffsetDateTime {
    match previous {
        Some(prev) if prev > now => prev,
        _ => now,
    }
}

/// Saturates at the earliest representable instant instead of overflowing.
pub fn days_before(now: OffsetDateTime, days: u32) -> OffsetDateTime {
    now.checked_sub(Duration::seconds(i64::from(days) * SECS_PER_DAY))
        .unwrap_or_else(|| PrimitiveDateTime::new(Date::MIN, Time::MIDNIGHT).assume_utc())
}
