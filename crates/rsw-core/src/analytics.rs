//! Read-only aggregation over session history and the event log.
//!
//! Every function here is pure over the slices it is handed plus an
//! explicit `now`/`today`; nothing reads the clock or touches storage.
//! Day and hour bucketing follows the local timezone, since "how long
//! did I work on Tuesday" is a local-calendar question.

use chrono::{DateTime, Local, NaiveDate, Timelike, Utc};
use serde::Serialize;

use crate::event::{EventKind, SessionEvent};
use crate::role::Role;
use crate::session::Session;

/// Session length treated as a "full" focus block by the score.
const FOCUS_TARGET_MS: i64 = 30 * 60 * 1000;

/// How many sessions a report lists as longest.
pub const LONGEST_SESSIONS_LIMIT: usize = 5;

/// How many hours a report lists as most productive.
pub const PRODUCTIVE_HOURS_LIMIT: usize = 3;

/// Aggregate for one role within a range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBreakdown {
    pub role_id: String,
    pub role_name: String,
    pub total_duration_ms: i64,
    pub session_count: usize,
    pub average_session_ms: i64,
    /// Share of the range total, rounded to whole percent.
    pub percentage: u8,
}

/// Aggregate for one hour-of-day bucket (local time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyBreakdown {
    pub hour: u32,
    pub total_duration_ms: i64,
    pub session_count: usize,
}

/// Aggregates for a single local calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total_duration_ms: i64,
    pub session_count: usize,
    pub switch_count: usize,
    pub average_session_ms: i64,
    pub roles: Vec<RoleBreakdown>,
}

/// Consecutive-day usage summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakSummary {
    /// Consecutive days ending today or yesterday; 0 once a day is missed.
    pub current_days: u32,
    /// Longest consecutive run anywhere in history.
    pub longest_days: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_session_date: Option<NaiveDate>,
}

/// Full analytics report for a local date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub total_duration_ms: i64,
    pub session_count: usize,
    pub switch_count: usize,
    pub average_session_ms: i64,
    pub focus_score: u8,
    pub daily: Vec<DailyStats>,
    pub roles: Vec<RoleBreakdown>,
    pub hourly: Vec<HourlyBreakdown>,
    pub longest_sessions: Vec<Session>,
    /// Hours of day with the most recorded time, busiest first.
    pub most_productive_hours: Vec<u32>,
}

/// Sum of effective durations. Active sessions are measured against
/// `now`, closed ones use their stored duration.
#[must_use]
pub fn total_duration_ms(sessions: &[Session], now: DateTime<Utc>) -> i64 {
    sessions.iter().map(|s| s.effective_duration_ms(now)).sum()
}

/// Number of `switch` events in the slice.
#[must_use]
pub fn switch_count(events: &[SessionEvent]) -> usize {
    events.iter().filter(|e| e.kind == EventKind::Switch).count()
}

/// `value` as a whole percentage of `total`, rounded half-up; 0 when
/// `total` is 0.
#[must_use]
pub fn percentage(value: i64, total: i64) -> u8 {
    if total <= 0 {
        return 0;
    }
    let rounded = (value * 100 + total / 2) / total;
    u8::try_from(rounded.clamp(0, 100)).unwrap_or(100)
}

/// Integer average, 0 for an empty set.
#[expect(
    clippy::cast_possible_wrap,
    reason = "session counts are far below i64::MAX"
)]
fn average_ms(total: i64, count: usize) -> i64 {
    if count == 0 { 0 } else { total / count as i64 }
}

/// Groups sessions by role, busiest role first.
#[must_use]
pub fn role_breakdown(
    sessions: &[Session],
    roles: &[Role],
    now: DateTime<Utc>,
) -> Vec<RoleBreakdown> {
    let total = total_duration_ms(sessions, now);

    // Accumulate in first-seen order so equal durations sort stably.
    let mut groups: Vec<(String, i64, usize)> = Vec::new();
    for session in sessions {
        let duration = session.effective_duration_ms(now);
        match groups.iter_mut().find(|(id, _, _)| *id == session.role_id) {
            Some((_, group_total, count)) => {
                *group_total += duration;
                *count += 1;
            }
            None => groups.push((session.role_id.clone(), duration, 1)),
        }
    }

    let mut breakdown: Vec<RoleBreakdown> = groups
        .into_iter()
        .map(|(role_id, group_total, count)| {
            let role_name = roles
                .iter()
                .find(|r| r.id == role_id)
                .map_or_else(|| "Unknown role".to_string(), |r| r.name.clone());
            RoleBreakdown {
                role_name,
                total_duration_ms: group_total,
                session_count: count,
                average_session_ms: average_ms(group_total, count),
                percentage: percentage(group_total, total),
                role_id,
            }
        })
        .collect();
    breakdown.sort_by(|a, b| b.total_duration_ms.cmp(&a.total_duration_ms));
    breakdown
}

/// Buckets sessions by local start hour. All 24 buckets are always
/// present, busiest first.
#[must_use]
pub fn hourly_breakdown(sessions: &[Session], now: DateTime<Utc>) -> Vec<HourlyBreakdown> {
    let mut buckets: Vec<HourlyBreakdown> = (0..24)
        .map(|hour| HourlyBreakdown {
            hour,
            total_duration_ms: 0,
            session_count: 0,
        })
        .collect();
    for session in sessions {
        let hour = session.start_time.with_timezone(&Local).hour();
        if let Some(bucket) = buckets.iter_mut().find(|b| b.hour == hour) {
            bucket.total_duration_ms += session.effective_duration_ms(now);
            bucket.session_count += 1;
        }
    }
    buckets.sort_by(|a, b| b.total_duration_ms.cmp(&a.total_duration_ms));
    buckets
}

/// The busiest hours of day, at most [`PRODUCTIVE_HOURS_LIMIT`] of them,
/// skipping hours with no recorded time.
#[must_use]
pub fn most_productive_hours(sessions: &[Session], now: DateTime<Utc>) -> Vec<u32> {
    hourly_breakdown(sessions, now)
        .into_iter()
        .filter(|bucket| bucket.total_duration_ms > 0)
        .take(PRODUCTIVE_HOURS_LIMIT)
        .map(|bucket| bucket.hour)
        .collect()
}

/// The longest sessions in the slice, longest first, at most `limit`.
#[must_use]
pub fn longest_sessions(sessions: &[Session], now: DateTime<Utc>, limit: usize) -> Vec<Session> {
    let mut sorted: Vec<Session> = sessions.to_vec();
    sorted.sort_by_key(|s| std::cmp::Reverse(s.effective_duration_ms(now)));
    sorted.truncate(limit);
    sorted
}

/// Focus score in 0-100: long average sessions score up, frequent
/// switching scores down. 0 when there are no sessions.
#[expect(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "durations fit f64 exactly at this scale and the result is clamped to 0-100"
)]
#[must_use]
pub fn focus_score(sessions: &[Session], events: &[SessionEvent], now: DateTime<Utc>) -> u8 {
    if sessions.is_empty() {
        return 0;
    }
    let average = average_ms(total_duration_ms(sessions, now), sessions.len());
    let length_score = (average as f64 / FOCUS_TARGET_MS as f64 * 50.0).min(100.0);
    let switch_rate = switch_count(events) as f64 / sessions.len() as f64;
    let steadiness_score = (50.0 - switch_rate * 25.0).max(0.0);
    (length_score + steadiness_score).round().min(100.0) as u8
}

/// Consecutive-day streaks over the distinct local dates sessions
/// started on.
#[must_use]
pub fn streaks(sessions: &[Session], today: NaiveDate) -> StreakSummary {
    let mut dates: Vec<NaiveDate> = sessions
        .iter()
        .map(|s| s.start_time.with_timezone(&Local).date_naive())
        .collect();
    dates.sort_unstable();
    dates.dedup();

    let Some(&last) = dates.last() else {
        return StreakSummary {
            current_days: 0,
            longest_days: 0,
            last_session_date: None,
        };
    };

    let mut longest = 1u32;
    let mut run = 1u32;
    for pair in dates.windows(2) {
        if pair[1] - pair[0] == chrono::Duration::days(1) {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 1;
        }
    }

    // The current streak is alive only if it reaches today or yesterday.
    let current_days = if today - last <= chrono::Duration::days(1) {
        let mut count = 1u32;
        for pair in dates.windows(2).rev() {
            if pair[1] - pair[0] == chrono::Duration::days(1) {
                count += 1;
            } else {
                break;
            }
        }
        count
    } else {
        0
    };

    StreakSummary {
        current_days,
        longest_days: longest,
        last_session_date: Some(last),
    }
}

/// Aggregates for one local calendar day.
#[must_use]
pub fn daily_stats(
    sessions: &[Session],
    events: &[SessionEvent],
    roles: &[Role],
    date: NaiveDate,
    now: DateTime<Utc>,
) -> DailyStats {
    let day_sessions: Vec<Session> = sessions
        .iter()
        .filter(|s| s.start_time.with_timezone(&Local).date_naive() == date)
        .cloned()
        .collect();
    let day_switches = events
        .iter()
        .filter(|e| {
            e.kind == EventKind::Switch && e.at.with_timezone(&Local).date_naive() == date
        })
        .count();

    let total = total_duration_ms(&day_sessions, now);
    let count = day_sessions.len();
    DailyStats {
        date,
        total_duration_ms: total,
        session_count: count,
        switch_count: day_switches,
        average_session_ms: average_ms(total, count),
        roles: role_breakdown(&day_sessions, roles, now),
    }
}

/// Builds the full report for the local date range `from..=to`.
///
/// Sessions and events outside the range are ignored, so callers may
/// pass more history than the range needs.
#[must_use]
pub fn generate_report(
    sessions: &[Session],
    events: &[SessionEvent],
    roles: &[Role],
    from: NaiveDate,
    to: NaiveDate,
    now: DateTime<Utc>,
) -> Report {
    let in_range = |date: NaiveDate| date >= from && date <= to;
    let range_sessions: Vec<Session> = sessions
        .iter()
        .filter(|s| in_range(s.start_time.with_timezone(&Local).date_naive()))
        .cloned()
        .collect();
    let range_events: Vec<SessionEvent> = events
        .iter()
        .filter(|e| in_range(e.at.with_timezone(&Local).date_naive()))
        .cloned()
        .collect();

    let mut daily = Vec::new();
    let mut day = from;
    while day <= to {
        daily.push(daily_stats(&range_sessions, &range_events, roles, day, now));
        day += chrono::Duration::days(1);
    }

    let total = total_duration_ms(&range_sessions, now);
    let count = range_sessions.len();
    Report {
        from,
        to,
        total_duration_ms: total,
        session_count: count,
        switch_count: switch_count(&range_events),
        average_session_ms: average_ms(total, count),
        focus_score: focus_score(&range_sessions, &range_events, now),
        daily,
        roles: role_breakdown(&range_sessions, roles, now),
        hourly: hourly_breakdown(&range_sessions, now),
        longest_sessions: longest_sessions(&range_sessions, now, LONGEST_SESSIONS_LIMIT),
        most_productive_hours: most_productive_hours(&range_sessions, now),
    }
}
