//! Implementation of the `rsw report` command.
//!
//! Periods resolve against the local calendar: `today` is the current
//! local date, `week` the last 7 days, `month` the last 30, and
//! `--from`/`--to` an arbitrary inclusive range. Analytics itself lives
//! in `rsw_core::analytics`; this module only assembles inputs and
//! renders the result.

use std::io::Write;

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate, Utc};
use serde::Serialize;

use rsw_core::analytics::{self, Report, StreakSummary};
use rsw_core::{RoleLookup, Session};

use crate::App;
use crate::cli::PeriodArg;
use crate::commands::util::{format_duration, progress_bar};

/// Inclusive local date range for a named period.
pub fn period_range(period: PeriodArg, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    match period {
        PeriodArg::Today => (today, today),
        PeriodArg::Week => (today - chrono::Duration::days(6), today),
        PeriodArg::Month => (today - chrono::Duration::days(29), today),
    }
}

/// JSON shape: the report fields plus the streak summary.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportPayload<'a> {
    #[serde(flatten)]
    report: &'a Report,
    streaks: &'a StreakSummary,
}

pub async fn run<W: Write>(
    writer: &mut W,
    app: &App,
    period: PeriodArg,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    json: bool,
) -> Result<()> {
    let today = Local::now().date_naive();
    let (from, to) = match (from, to) {
        (Some(from), Some(to)) => {
            if from > to {
                bail!("--from {from} is after --to {to}");
            }
            (from, to)
        }
        _ => period_range(period, today),
    };

    let mut sessions: Vec<Session> = app
        .store()
        .sessions()
        .await
        .context("failed to load session history")?;
    // The active session counts toward today as time spent so far.
    if let Some(current) = app.engine().current_session().await {
        sessions.push(current);
    }
    let events = app
        .store()
        .events()
        .await
        .context("failed to load events")?;
    let roles = app.registry().roles();

    let report = analytics::generate_report(&sessions, &events, &roles, from, to, Utc::now());
    // Streaks always look at the whole history, not just the range.
    let streaks = analytics::streaks(&sessions, today);

    if json {
        let payload = ReportPayload {
            report: &report,
            streaks: &streaks,
        };
        serde_json::to_writer_pretty(&mut *writer, &payload)?;
        writeln!(writer)?;
        return Ok(());
    }
    write!(writer, "{}", format_report(&report, &streaks))?;
    Ok(())
}

/// Human-readable report.
#[allow(clippy::too_many_lines)]
pub fn format_report(report: &Report, streaks: &StreakSummary) -> String {
    use std::fmt::Write;

    let mut output = String::new();
    if report.from == report.to {
        writeln!(output, "REPORT: {}", report.from).unwrap();
    } else {
        writeln!(output, "REPORT: {} to {}", report.from, report.to).unwrap();
    }

    if report.session_count == 0 {
        writeln!(output).unwrap();
        writeln!(output, "No sessions in this range.").unwrap();
        writeln!(output, "Hint: 'rsw start <role>' begins tracking.").unwrap();
        return output;
    }

    writeln!(output).unwrap();
    writeln!(
        output,
        "Total time:  {}",
        format_duration(report.total_duration_ms)
    )
    .unwrap();
    writeln!(
        output,
        "Sessions:    {} (avg {})",
        report.session_count,
        format_duration(report.average_session_ms)
    )
    .unwrap();
    writeln!(output, "Switches:    {}", report.switch_count).unwrap();
    writeln!(output, "Focus score: {}/100", report.focus_score).unwrap();

    writeln!(output).unwrap();
    writeln!(output, "BY ROLE").unwrap();
    writeln!(output, "───────").unwrap();
    let max_role = report
        .roles
        .iter()
        .map(|r| r.total_duration_ms)
        .max()
        .unwrap_or(0);
    for role in &report.roles {
        writeln!(
            output,
            "{:<16} {:>7}  {}  {:>3}% ({})",
            role.role_name,
            format_duration(role.total_duration_ms),
            progress_bar(role.total_duration_ms, max_role),
            role.percentage,
            sessions_word(role.session_count),
        )
        .unwrap();
    }

    if report.from != report.to {
        writeln!(output).unwrap();
        writeln!(output, "DAILY").unwrap();
        writeln!(output, "─────").unwrap();
        for day in report.daily.iter().filter(|d| d.session_count > 0) {
            writeln!(
                output,
                "{}  {:>7}  ({})",
                day.date,
                format_duration(day.total_duration_ms),
                sessions_word(day.session_count),
            )
            .unwrap();
        }
    }

    if !report.most_productive_hours.is_empty() {
        let hours: Vec<String> = report
            .most_productive_hours
            .iter()
            .map(|hour| format!("{hour:02}:00"))
            .collect();
        writeln!(output).unwrap();
        writeln!(output, "Most productive hours: {}", hours.join(", ")).unwrap();
    }

    if !report.longest_sessions.is_empty() {
        writeln!(output).unwrap();
        writeln!(output, "LONGEST SESSIONS").unwrap();
        writeln!(output, "────────────────").unwrap();
        for (index, session) in report.longest_sessions.iter().enumerate() {
            let name = report
                .roles
                .iter()
                .find(|r| r.role_id == session.role_id)
                .map_or(session.role_id.as_str(), |r| r.role_name.as_str());
            writeln!(
                output,
                "{}. {name}  {}",
                index + 1,
                format_duration(session.duration_ms.unwrap_or(0)),
            )
            .unwrap();
        }
    }

    writeln!(output).unwrap();
    writeln!(
        output,
        "Current streak: {} (longest {})",
        days_word(streaks.current_days),
        days_word(streaks.longest_days),
    )
    .unwrap();
    output
}

fn sessions_word(count: usize) -> String {
    if count == 1 {
        "1 session".to_string()
    } else {
        format!("{count} sessions")
    }
}

fn days_word(count: u32) -> String {
    if count == 1 {
        "1 day".to_string()
    } else {
        format!("{count} days")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    use rsw_core::analytics::{RoleBreakdown, StreakSummary};

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn test_period_range_today() {
        let today = date(2025, 3, 15);
        assert_eq!(period_range(PeriodArg::Today, today), (today, today));
    }

    #[test]
    fn test_period_range_week_spans_seven_days() {
        let today = date(2025, 3, 15);
        assert_eq!(
            period_range(PeriodArg::Week, today),
            (date(2025, 3, 9), today)
        );
    }

    #[test]
    fn test_period_range_month_spans_thirty_days() {
        let today = date(2025, 3, 15);
        assert_eq!(
            period_range(PeriodArg::Month, today),
            (date(2025, 2, 14), today)
        );
    }

    #[test]
    fn test_format_report_empty_range() {
        let report = analytics::generate_report(
            &[],
            &[],
            &[],
            date(2025, 3, 1),
            date(2025, 3, 7),
            Utc::now(),
        );
        let streaks = analytics::streaks(&[], date(2025, 3, 7));

        let output = format_report(&report, &streaks);
        assert_eq!(
            output,
            "REPORT: 2025-03-01 to 2025-03-07\n\
             \n\
             No sessions in this range.\n\
             Hint: 'rsw start <role>' begins tracking.\n"
        );
    }

    #[test]
    fn test_format_report_sections() {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
        let session = Session {
            id: "s-1".to_string(),
            role_id: "r-dev".to_string(),
            start_time: start,
            end_time: Some(start + chrono::Duration::minutes(125)),
            duration_ms: Some(125 * 60_000),
            notes: Vec::new(),
            events: Vec::new(),
            is_active: false,
        };
        let report = Report {
            from: date(2025, 3, 1),
            to: date(2025, 3, 7),
            total_duration_ms: 7_500_000,
            session_count: 3,
            switch_count: 2,
            average_session_ms: 2_500_000,
            focus_score: 72,
            daily: Vec::new(),
            roles: vec![RoleBreakdown {
                role_id: "r-dev".to_string(),
                role_name: "Development".to_string(),
                total_duration_ms: 7_500_000,
                session_count: 3,
                average_session_ms: 2_500_000,
                percentage: 100,
            }],
            hourly: Vec::new(),
            longest_sessions: vec![session],
            most_productive_hours: vec![9, 14],
        };
        let streaks = StreakSummary {
            current_days: 3,
            longest_days: 5,
            last_session_date: Some(date(2025, 3, 7)),
        };

        let output = format_report(&report, &streaks);
        assert!(output.starts_with("REPORT: 2025-03-01 to 2025-03-07\n"));
        assert!(output.contains("Total time:  2h 5m"));
        assert!(output.contains("Sessions:    3 (avg 41m)"));
        assert!(output.contains("Focus score: 72/100"));
        assert!(output.contains("BY ROLE"));
        assert!(output.contains("Development"));
        assert!(output.contains("██████████"));
        assert!(output.contains("100% (3 sessions)"));
        assert!(output.contains("Most productive hours: 09:00, 14:00"));
        assert!(output.contains("1. Development  2h 5m"));
        assert!(output.contains("Current streak: 3 days (longest 5 days)"));
    }

    #[test]
    fn test_format_report_single_day_header() {
        let report = analytics::generate_report(
            &[],
            &[],
            &[],
            date(2025, 3, 5),
            date(2025, 3, 5),
            Utc::now(),
        );
        let streaks = analytics::streaks(&[], date(2025, 3, 5));
        let output = format_report(&report, &streaks);
        assert!(output.starts_with("REPORT: 2025-03-05\n"));
    }
}
