//! Calendar event extraction from iCalendar (RFC 5545) attachments.
//!
//! Only the first `VEVENT` is read. Anything that prevents building a
//! `MeetingRecord` yields `None`: a message without a usable event is an
//! expected outcome, so failures are logged here and never propagated.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::pipeline::types::MeetingRecord;

const DEFAULT_TITLE: &str = "Meeting";
const DEFAULT_LOCATION: &str = "Unknown";
const DEFAULT_TIME_ZONE: &str = "UTC";

/// Why a payload produced no meeting.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
enum CalendarError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("payload is empty")]
    Empty,

    #[error("no VEVENT component")]
    NoEvent,

    #[error("VEVENT has no DTSTART")]
    MissingStart,

    #[error("unparseable date-time '{0}'")]
    BadDate(String),
}

/// One unfolded content line: `NAME;PARAM=VALUE:value`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Property {
    name: String,
    params: Vec<(String, String)>,
    value: String,
}

impl Property {
    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Extract the first event of a calendar payload.
///
/// Returns `None` when the payload holds no usable event.
pub fn extract(payload: &[u8]) -> Option<MeetingRecord> {
    match parse_first_event(payload) {
        Ok(record) => {
            debug!(
                title = %record.title,
                start = %record.start,
                attendees = record.attendees.len(),
                "Extracted calendar event"
            );
            Some(record)
        }
        Err(e) => {
            debug!(reason = %e, "No usable calendar event");
            None
        }
    }
}

fn parse_first_event(payload: &[u8]) -> Result<MeetingRecord, CalendarError> {
    let text = std::str::from_utf8(payload).map_err(|_| CalendarError::NotUtf8)?;
    let text = text.trim_start_matches('\u{feff}');
    if text.trim().is_empty() {
        return Err(CalendarError::Empty);
    }

    let props = first_event_properties(&unfold(text))?;
    let find = |name: &str| props.iter().find(|p| p.name == name);
    let text_of = |name: &str| {
        find(name)
            .map(|p| unescape_text(&p.value))
            .filter(|v| !v.trim().is_empty())
    };

    let dtstart = find("DTSTART").ok_or(CalendarError::MissingStart)?;
    let start = parse_date_time(dtstart)?;
    let end = match find("DTEND") {
        Some(dtend) => parse_date_time(dtend)?,
        None => start,
    };

    let time_zone = dtstart
        .param("TZID")
        .map(|tz| tz.trim_matches('"').to_string())
        .unwrap_or_else(|| DEFAULT_TIME_ZONE.to_string());

    let attendees: BTreeSet<String> = props
        .iter()
        .filter(|p| p.name == "ATTENDEE")
        .filter_map(|p| attendee_address(&p.value))
        .collect();

    Ok(MeetingRecord {
        title: text_of("SUMMARY").unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        description: text_of("DESCRIPTION").unwrap_or_default(),
        location: text_of("LOCATION").unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
        start,
        end,
        time_zone,
        attendees,
    })
}

/// Join folded lines: a line starting with a space or tab continues the previous one.
fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(rest) = line.strip_prefix([' ', '\t'])
            && let Some(last) = lines.last_mut()
        {
            last.push_str(rest);
            continue;
        }
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}

/// Properties of the first top-level `VEVENT`, skipping nested components
/// such as `VALARM`.
fn first_event_properties(lines: &[String]) -> Result<Vec<Property>, CalendarError> {
    let mut in_event = false;
    let mut nested = 0usize;
    let mut props = Vec::new();

    for line in lines {
        let Some(prop) = parse_line(line) else {
            continue;
        };
        let value = prop.value.trim().to_ascii_uppercase();

        match prop.name.as_str() {
            "BEGIN" if !in_event && value == "VEVENT" => in_event = true,
            "BEGIN" if in_event => nested += 1,
            "END" if in_event && nested > 0 => nested -= 1,
            "END" if in_event && value == "VEVENT" => return Ok(props),
            _ if in_event && nested == 0 => props.push(prop),
            _ => {}
        }
    }

    // An unterminated VEVENT still counts if it carried any properties.
    if in_event && !props.is_empty() {
        return Ok(props);
    }
    Err(CalendarError::NoEvent)
}

/// Split a content line into name, parameters and value.
///
/// The value starts at the first colon outside a quoted parameter value.
fn parse_line(line: &str) -> Option<Property> {
    let mut in_quotes = false;
    let mut colon = None;
    for (i, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                colon = Some(i);
                break;
            }
            _ => {}
        }
    }
    let colon = colon?;
    let (head, value) = (&line[..colon], &line[colon + 1..]);

    let mut segments = split_unquoted(head, ';').into_iter();
    let name = segments.next()?.trim().to_ascii_uppercase();
    if name.is_empty() {
        return None;
    }

    let params = segments
        .filter_map(|seg| {
            let (k, v) = seg.split_once('=')?;
            Some((
                k.trim().to_ascii_uppercase(),
                v.trim().trim_matches('"').to_string(),
            ))
        })
        .collect();

    Some(Property {
        name,
        params,
        value: value.to_string(),
    })
}

fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, ch) in s.char_indices() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if ch == sep && !in_quotes {
            out.push(&s[start..i]);
            start = i + ch.len_utf8();
        }
    }
    out.push(&s[start..]);
    out
}

/// Resolve a DTSTART/DTEND property to an absolute instant.
fn parse_date_time(prop: &Property) -> Result<DateTime<Utc>, CalendarError> {
    let value = prop.value.trim();
    let bad = || CalendarError::BadDate(value.to_string());

    let is_date = prop
        .param("VALUE")
        .is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
        || (value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()));
    if is_date {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").map_err(|_| bad())?;
        let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(bad)?;
        return Ok(midnight.and_utc());
    }

    if let Some(utc) = value.strip_suffix(['Z', 'z'])
        && let Ok(naive) = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
    {
        return Ok(naive.and_utc());
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S") {
        return Ok(match prop.param("TZID") {
            Some(tzid) => localize(naive, tzid),
            None => naive.and_utc(),
        });
    }

    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| bad())
}

/// Interpret a local wall-clock time in an IANA zone.
///
/// Unknown zone names (e.g. Windows display names) fall back to UTC; a
/// wall-clock time skipped by a DST transition is read one hour later.
fn localize(naive: NaiveDateTime, tzid: &str) -> DateTime<Utc> {
    let name = tzid.trim_matches('"').trim_start_matches('/');
    let Ok(tz) = name.parse::<Tz>() else {
        warn!(tzid = %tzid, "Unknown calendar time zone, reading time as UTC");
        return naive.and_utc();
    };

    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

fn attendee_address(value: &str) -> Option<String> {
    let value = value.trim();
    let address = match value.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("mailto:") => &value[7..],
        _ => value,
    };
    let address = address.trim();
    if address.is_empty() {
        None
    } else {
        Some(address.to_lowercase())
    }
}

/// Undo RFC 5545 TEXT escaping.
fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
