use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::Deserialize;

use crate::llm::LlmGateway;

/// A closed ISO date interval, the unit of every temporal filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatetimeRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DatetimeRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(DatetimeRange { start, end })
    }

    pub fn format(&self) -> String {
        format!("{}/{}", self.start.format("%Y-%m-%d"), self.end.format("%Y-%m-%d"))
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (a, b) = raw.split_once('/')?;
        let start = NaiveDate::parse_from_str(a.trim(), "%Y-%m-%d").ok()?;
        let end = NaiveDate::parse_from_str(b.trim(), "%Y-%m-%d").ok()?;
        DatetimeRange::new(start, end)
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days().max(1)
    }

    /// Double the window symmetrically, never growing past five years
    /// total. Used when a search comes back empty.
    pub fn widen(&self) -> DatetimeRange {
        const MAX_DAYS: i64 = 365 * 5;
        let span = self.days();
        let target = (span * 2).min(MAX_DAYS);
        let grow = (target - span).max(0) / 2;
        DatetimeRange {
            start: self.start - chrono::Duration::days(grow),
            end: self.end + chrono::Duration::days(grow),
        }
    }

    pub fn last_days(today: NaiveDate, days: i64) -> DatetimeRange {
        DatetimeRange {
            start: today - chrono::Duration::days(days),
            end: today,
        }
    }
}

/// What the temporal agent concluded about the query.
#[derive(Debug, Clone, PartialEq)]
pub enum DatetimeResult {
    NoneFound,
    Single(DatetimeRange),
    Comparison {
        before: DatetimeRange,
        after: DatetimeRange,
        needs_clarification: bool,
        suggestion: Option<String>,
    },
}

const SINGLE_SYSTEM: &str = "You convert natural-language time expressions to ISO-8601 date \
ranges. Reply with ONLY a JSON object {\"datetime_range\": \"YYYY-MM-DD/YYYY-MM-DD\" or \
\"none\", \"explanation\": \"...\"}.\n\
Conversion rules:\n\
- A bare year means the full year; month plus year means the full month.\n\
- \"recent\" / \"latest\" / \"current\" means the last 30 days ending today.\n\
- Quarters: Q1 = Jan-Mar, Q2 = Apr-Jun, Q3 = Jul-Sep, Q4 = Oct-Dec.\n\
- Seasons are three-month windows (spring = Mar-May, summer = Jun-Aug, fall = Sep-Nov, \
winter = Dec-Feb).\n\
- \"near <date>\" means 9 days either side of it.\n\
- An explicit single date means that one day.\n\
- If the query has no temporal expression at all, return \"none\".";

const COMPARISON_SYSTEM: &str = "The query compares two time periods. Reply with ONLY a JSON \
object {\"before\": \"YYYY-MM-DD/YYYY-MM-DD\", \"after\": \"YYYY-MM-DD/YYYY-MM-DD\", \
\"explanation\": \"...\", \"needs_clarification\": bool, \"suggestion\": \"...\" or null}. \
`before` is the earlier period, `after` the later. If the two periods are ambiguous, set \
needs_clarification true and return sensible full-year fallbacks.";

#[derive(Debug, Deserialize)]
struct SingleReply {
    datetime_range: String,
    #[allow(dead_code)]
    explanation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ComparisonReply {
    before: String,
    after: String,
    #[allow(dead_code)]
    explanation: Option<String>,
    #[serde(default)]
    needs_clarification: bool,
    #[serde(default)]
    suggestion: Option<String>,
}

/// Datetime translation agent: one LLM call in single or comparison mode,
/// regex fallback on failure.
pub struct DatetimeTranslator {
    gateway: Arc<LlmGateway>,
    deadline: Duration,
}

impl DatetimeTranslator {
    pub fn new(gateway: Arc<LlmGateway>, deadline: Duration) -> Self {
        DatetimeTranslator { gateway, deadline }
    }

    pub async fn translate(&self, query: &str, today: NaiveDate) -> DatetimeResult {
        if wants_comparison(query) {
            self.translate_comparison(query, today).await
        } else {
            self.translate_single(query, today).await
        }
    }

    async fn translate_single(&self, query: &str, today: NaiveDate) -> DatetimeResult {
        let user = format!("Current date: {}\nQuery: {query}", today.format("%Y-%m-%d"));
        let reply: Result<SingleReply, _> = self
            .gateway
            .complete_json(SINGLE_SYSTEM, &user, 250, self.deadline)
            .await;
        match reply {
            Ok(r) if r.datetime_range.eq_ignore_ascii_case("none") => DatetimeResult::NoneFound,
            Ok(r) => match DatetimeRange::parse(&r.datetime_range) {
                Some(range) => DatetimeResult::Single(range),
                None => {
                    tracing::warn!("datetime: unparseable range '{}', using rules", r.datetime_range);
                    fallback_single(query, today)
                }
            },
            Err(e) => {
                tracing::warn!("datetime: model call failed ({e}), using rules");
                fallback_single(query, today)
            }
        }
    }

    async fn translate_comparison(&self, query: &str, today: NaiveDate) -> DatetimeResult {
        let user = format!("Current date: {}\nQuery: {query}", today.format("%Y-%m-%d"));
        let reply: Result<ComparisonReply, _> = self
            .gateway
            .complete_json(COMPARISON_SYSTEM, &user, 300, self.deadline)
            .await;
        match reply {
            Ok(r) => {
                match (DatetimeRange::parse(&r.before), DatetimeRange::parse(&r.after)) {
                    (Some(before), Some(after)) => DatetimeResult::Comparison {
                        before,
                        after,
                        needs_clarification: r.needs_clarification,
                        suggestion: r.suggestion,
                    },
                    _ => {
                        tracing::warn!("datetime: bad comparison ranges, using rules");
                        fallback_comparison(query, today)
                    }
                }
            }
            Err(e) => {
                tracing::warn!("datetime: comparison call failed ({e}), using rules");
                fallback_comparison(query, today)
            }
        }
    }
}

const COMPARISON_MARKERS: &[&str] = &[
    "compare", "comparison", " vs ", " vs. ", "versus", "before and after", "change between",
    "difference between",
];

pub fn wants_comparison(query: &str) -> bool {
    let q = format!(" {} ", query.to_lowercase());
    COMPARISON_MARKERS.iter().any(|m| q.contains(m))
}

fn month_bounds(year: i32, month: u32) -> Option<DatetimeRange> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let end = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    }
    .pred_opt()?;
    DatetimeRange::new(start, end)
}

fn year_bounds(year: i32) -> Option<DatetimeRange> {
    DatetimeRange::new(
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    )
}

const MONTHS: &[(&str, u32)] = &[
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
];

fn find_year(q: &str) -> Option<i32> {
    let re = Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap();
    re.captures(q)?.get(1)?.as_str().parse().ok()
}

fn find_month(q: &str) -> Option<u32> {
    MONTHS.iter().find(|(name, _)| q.contains(name)).map(|(_, m)| *m)
}

fn find_iso_date(q: &str) -> Option<NaiveDate> {
    let re = Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap();
    let c = re.captures(q)?;
    NaiveDate::from_ymd_opt(
        c.get(1)?.as_str().parse().ok()?,
        c.get(2)?.as_str().parse().ok()?,
        c.get(3)?.as_str().parse().ok()?,
    )
}

/// Regex conversion of the same rules the prompt encodes. Deterministic
/// given `today`.
pub fn fallback_single(query: &str, today: NaiveDate) -> DatetimeResult {
    let q = query.to_lowercase();

    if ["last week", "past week", "this week"].iter().any(|m| q.contains(m)) {
        return DatetimeResult::Single(DatetimeRange::last_days(today, 7));
    }
    if ["last month", "past month", "this month"].iter().any(|m| q.contains(m)) {
        return DatetimeResult::Single(DatetimeRange::last_days(today, 30));
    }
    if ["last year", "past year"].iter().any(|m| q.contains(m)) {
        return DatetimeResult::Single(DatetimeRange::last_days(today, 365));
    }
    if ["recent", "latest", "current", "right now", "today"].iter().any(|m| q.contains(m)) {
        return DatetimeResult::Single(DatetimeRange::last_days(today, 30));
    }

    // "near <date>" gets a ±9 day window
    if let Some(date) = find_iso_date(&q) {
        let range = if q.contains("near") || q.contains("around") {
            DatetimeRange {
                start: date - chrono::Duration::days(9),
                end: date + chrono::Duration::days(9),
            }
        } else {
            DatetimeRange { start: date, end: date }
        };
        return DatetimeResult::Single(range);
    }

    let year = find_year(&q);
    let month = find_month(&q);

    // Quarters before seasons: "Q1 2024"
    if let Some(y) = year {
        let quarter = Regex::new(r"\bq([1-4])\b").unwrap();
        if let Some(c) = quarter.captures(&q) {
            let n: u32 = c[1].parse().unwrap();
            let start_month = (n - 1) * 3 + 1;
            let start = NaiveDate::from_ymd_opt(y, start_month, 1).unwrap();
            let end = month_bounds(y, start_month + 2).unwrap().end;
            return DatetimeResult::Single(DatetimeRange { start, end });
        }
    }

    let season_year = year.unwrap_or_else(|| today.year());
    for (season, start_month) in [("spring", 3u32), ("summer", 6), ("fall", 9), ("autumn", 9)] {
        if q.contains(season) {
            let start = NaiveDate::from_ymd_opt(season_year, start_month, 1).unwrap();
            let end = month_bounds(season_year, start_month + 2).unwrap().end;
            return DatetimeResult::Single(DatetimeRange { start, end });
        }
    }
    if q.contains("winter") {
        // Dec of the named year through Feb of the next
        let start = NaiveDate::from_ymd_opt(season_year, 12, 1).unwrap();
        let end = month_bounds(season_year + 1, 2).unwrap().end;
        return DatetimeResult::Single(DatetimeRange { start, end });
    }

    match (year, month) {
        (Some(y), Some(m)) => match month_bounds(y, m) {
            Some(r) => DatetimeResult::Single(r),
            None => DatetimeResult::NoneFound,
        },
        (Some(y), None) => match year_bounds(y) {
            Some(r) => DatetimeResult::Single(r),
            None => DatetimeResult::NoneFound,
        },
        _ => DatetimeResult::NoneFound,
    }
}

/// Comparison fallback: pull explicit day mentions out of the text and
/// bracket each with a one-day window. Ambiguous input degrades to
/// year-vs-year with a clarification flag.
pub fn fallback_comparison(query: &str, today: NaiveDate) -> DatetimeResult {
    let q = query.to_lowercase();
    let dates = extract_day_mentions(&q);

    if dates.len() >= 2 {
        let (a, b) = (dates[0].min(dates[1]), dates[0].max(dates[1]));
        return DatetimeResult::Comparison {
            before: DatetimeRange {
                start: a,
                end: a + chrono::Duration::days(1),
            },
            after: DatetimeRange {
                start: b,
                end: b + chrono::Duration::days(1),
            },
            needs_clarification: false,
            suggestion: None,
        };
    }

    // Two bare years ("2023 vs 2024")
    let year_re = Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap();
    let years: Vec<i32> = year_re
        .captures_iter(&q)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    if years.len() >= 2 {
        let (a, b) = (years[0].min(years[1]), years[0].max(years[1]));
        return DatetimeResult::Comparison {
            before: year_bounds(a).unwrap(),
            after: year_bounds(b).unwrap(),
            needs_clarification: false,
            suggestion: None,
        };
    }

    // Could not pin two periods down: last year vs this year, flagged
    let this_year = today.year();
    DatetimeResult::Comparison {
        before: year_bounds(this_year - 1).unwrap(),
        after: year_bounds(this_year).unwrap(),
        needs_clarification: true,
        suggestion: Some(
            "Specify the two periods to compare, e.g. \"June 2024 vs June 2025\".".to_string(),
        ),
    }
}

/// Day-level mentions: ISO dates plus "<month> <day>(st|nd|rd|th)" with an
/// optional shared trailing year.
fn extract_day_mentions(q: &str) -> Vec<NaiveDate> {
    let mut out = Vec::new();

    let iso = Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap();
    for c in iso.captures_iter(q) {
        if let (Ok(y), Ok(m), Ok(d)) = (c[1].parse(), c[2].parse(), c[3].parse()) {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                out.push(date);
            }
        }
    }

    let shared_year = find_year(q);
    let named = Regex::new(
        r"\b(january|february|march|april|may|june|july|august|september|october|november|december)\s+(\d{1,2})(?:st|nd|rd|th)?",
    )
    .unwrap();
    for c in named.captures_iter(q) {
        let month = MONTHS.iter().find(|(n, _)| *n == &c[1]).map(|(_, m)| *m);
        let day: Option<u32> = c[2].parse().ok();
        if let (Some(m), Some(d), Some(y)) = (month, day, shared_year) {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                out.push(date);
            }
        }
    }

    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 15).unwrap()
    }

    #[test]
    fn round_trip_parse_format() {
        for raw in ["2024-10-01/2024-10-31", "2020-01-01/2023-12-31", "2025-07-04/2025-07-04"] {
            let r = DatetimeRange::parse(raw).unwrap();
            assert_eq!(r.format(), raw);
            assert_eq!(DatetimeRange::parse(&r.format()), Some(r));
        }
    }

    #[test]
    fn parse_rejects_inverted_range() {
        assert!(DatetimeRange::parse("2024-12-31/2024-01-01").is_none());
    }

    #[test]
    fn year_only_becomes_full_year() {
        let r = fallback_single("wildfires in 2023", today());
        assert_eq!(
            r,
            DatetimeResult::Single(DatetimeRange::parse("2023-01-01/2023-12-31").unwrap())
        );
    }

    #[test]
    fn month_and_year_become_full_month() {
        let r = fallback_single("imagery from October 2024", today());
        assert_eq!(
            r,
            DatetimeResult::Single(DatetimeRange::parse("2024-10-01/2024-10-31").unwrap())
        );
    }

    #[test]
    fn recent_is_last_thirty_days() {
        let r = fallback_single("most recent imagery", today());
        let DatetimeResult::Single(range) = r else { panic!() };
        assert_eq!(range.end, today());
        assert_eq!(range.days(), 30);
    }

    #[test]
    fn last_month_is_thirty_days() {
        let DatetimeResult::Single(range) = fallback_single("flooding last month", today()) else {
            panic!()
        };
        assert_eq!(range.days(), 30);
    }

    #[test]
    fn quarter_expands_correctly() {
        let r = fallback_single("Q2 2024 vegetation", today());
        assert_eq!(
            r,
            DatetimeResult::Single(DatetimeRange::parse("2024-04-01/2024-06-30").unwrap())
        );
    }

    #[test]
    fn winter_crosses_year_boundary() {
        let r = fallback_single("winter 2023 snow", today());
        assert_eq!(
            r,
            DatetimeResult::Single(DatetimeRange::parse("2023-12-01/2024-02-29").unwrap())
        );
    }

    #[test]
    fn near_date_is_plus_minus_nine_days() {
        let r = fallback_single("imagery near 2025-03-20", today());
        assert_eq!(
            r,
            DatetimeResult::Single(DatetimeRange::parse("2025-03-11/2025-03-29").unwrap())
        );
    }

    #[test]
    fn no_temporal_expression_is_none() {
        assert_eq!(fallback_single("show me Seattle", today()), DatetimeResult::NoneFound);
    }

    #[test]
    fn comparison_detection() {
        assert!(wants_comparison("Compare wildfire activity between January and March"));
        assert!(wants_comparison("2023 vs 2024 vegetation"));
        assert!(!wants_comparison("show me Seattle"));
    }

    #[test]
    fn comparison_fallback_brackets_named_days() {
        let r = fallback_comparison(
            "Compare wildfire activity between January 1st and January 3rd, 2025",
            today(),
        );
        let DatetimeResult::Comparison { before, after, needs_clarification, .. } = r else {
            panic!()
        };
        assert_eq!(before.format(), "2025-01-01/2025-01-02");
        assert_eq!(after.format(), "2025-01-03/2025-01-04");
        assert!(!needs_clarification);
    }

    #[test]
    fn ambiguous_comparison_flags_clarification() {
        let r = fallback_comparison("compare the before and after", today());
        let DatetimeResult::Comparison { needs_clarification, suggestion, .. } = r else {
            panic!()
        };
        assert!(needs_clarification);
        assert!(suggestion.is_some());
    }

    #[test]
    fn widen_doubles_and_caps() {
        let r = DatetimeRange::parse("2025-06-01/2025-06-30").unwrap();
        let w = r.widen();
        assert!(w.start < r.start && w.end > r.end);
        assert!(w.days() >= 2 * r.days() - 2);

        // Already past the cap: widening is a no-op
        let huge = DatetimeRange::parse("2015-01-01/2024-12-31").unwrap();
        assert_eq!(huge.widen(), huge);

        // Near the cap: widening stops at five years
        let wide = DatetimeRange::parse("2021-01-01/2024-12-31").unwrap();
        assert!(wide.widen().days() <= 365 * 5);
    }

    #[tokio::test]
    async fn model_single_range_is_used() {
        let gw = Arc::new(testing::gateway_with(vec![
            r#"{"datetime_range": "2024-10-01/2024-10-31", "explanation": "October 2024"}"#,
        ]));
        let t = DatetimeTranslator::new(gw, Duration::from_secs(5));
        let r = t.translate("imagery from October 2024", today()).await;
        assert_eq!(
            r,
            DatetimeResult::Single(DatetimeRange::parse("2024-10-01/2024-10-31").unwrap())
        );
    }

    #[tokio::test]
    async fn model_none_is_none() {
        let gw = Arc::new(testing::gateway_with(vec![
            r#"{"datetime_range": "none", "explanation": "no temporal expression"}"#,
        ]));
        let t = DatetimeTranslator::new(gw, Duration::from_secs(5));
        assert_eq!(t.translate("show me Seattle", today()).await, DatetimeResult::NoneFound);
    }

    #[tokio::test]
    async fn comparison_mode_hits_comparison_prompt() {
        let gw = Arc::new(testing::gateway_with(vec![
            r#"{"before": "2025-01-01/2025-01-02", "after": "2025-01-03/2025-01-04", "explanation": "two days", "needs_clarification": false, "suggestion": null}"#,
        ]));
        let t = DatetimeTranslator::new(gw, Duration::from_secs(5));
        let r = t
            .translate("Compare fires between January 1st and January 3rd, 2025", today())
            .await;
        let DatetimeResult::Comparison { before, after, .. } = r else { panic!() };
        assert_eq!(before.format(), "2025-01-01/2025-01-02");
        assert_eq!(after.format(), "2025-01-03/2025-01-04");
    }
}
