//! en-IN number and date formatting for slip cells, plus the permissive
//! numeric parser used for every amount typed into the form.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};

/// Remarks longer than this are clipped in the slip
pub const REMARKS_MAX_CHARS: usize = 200;

const PLAIN_FRACTION_DIGITS: usize = 3;
const COMPACT_FRACTION_DIGITS: usize = 2;

/// Compact units in en-IN notation, smallest first: (divisor, suffix)
const COMPACT_UNITS: [(f64, &str); 3] = [(1e3, "K"), (1e5, "L"), (1e7, "Cr")];

/// Format a number the way the slip displays it.
///
/// Plain form uses Indian digit grouping (`12,34,567.5`) with up to three
/// fraction digits. `compact` abbreviates thousands, lakhs and crores with at
/// most two fraction digits, falling back to the plain form when the value
/// has no compact representation.
pub fn format_number(value: f64, compact: bool) -> String {
    if compact {
        if let Some(text) = format_compact(value) {
            return text;
        }
    }
    format_grouped(value, 0, PLAIN_FRACTION_DIGITS)
}

/// Same as [`format_number`] for raw text: blank stays blank, anything that
/// is not a plain number counts as zero.
pub fn format_number_str(value: &str, compact: bool) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let number = trimmed.parse::<f64>().ok().filter(|n| n.is_finite()).unwrap_or(0.0);
    format_number(number, compact)
}

/// Grouped amount with exactly two decimals, e.g. `24,800.00`
pub fn format_amount(value: f64) -> String {
    format_grouped(value, 2, 2)
}

/// Parse user-entered text. Keeps digits, `.` and `-` only; anything that
/// does not then read as a finite number yields 0.
pub fn parse_input(value: &str) -> f64 {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    if cleaned.is_empty() {
        return 0.0;
    }

    match cleaned.parse::<f64>() {
        Ok(number) if number.is_finite() => number,
        _ => 0.0,
    }
}

/// `DD/MM/YYYY`, or empty when the text is not a recognizable date
pub fn format_date(value: &str) -> String {
    match parse_date(value) {
        Some(date) => date.format("%d/%m/%Y").to_string(),
        None => String::new(),
    }
}

/// ISO `YYYY-MM-DD` for a date read from a sheet cell. Spreadsheet serial
/// day numbers are accepted as well.
pub fn normalize_date(value: &str) -> Option<String> {
    parse_date(value)
        .or_else(|| parse_serial_date(value))
        .map(|date| date.format("%Y-%m-%d").to_string())
}

/// Escape text for literal insertion into markup
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Collapse whitespace runs, trim, and clip to [`REMARKS_MAX_CHARS`]
pub fn sanitize_remarks(value: &str) -> String {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > REMARKS_MAX_CHARS {
        let mut clipped: String = collapsed.chars().take(REMARKS_MAX_CHARS).collect();
        clipped.push('…');
        clipped
    } else {
        collapsed
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.date_naive());
    }

    for pattern in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, pattern) {
            return Some(dt.date());
        }
    }

    // Slip display form first so formatting an already formatted date is stable
    for pattern in [
        "%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d", "%d-%b-%Y", "%d %b %Y", "%b %d, %Y",
        "%d %B %Y", "%B %d, %Y",
    ] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, pattern) {
            return Some(date);
        }
    }

    None
}

fn parse_serial_date(value: &str) -> Option<NaiveDate> {
    let serial = value.trim().parse::<f64>().ok()?;
    // 1900-01-01 .. 9999-12-31 in spreadsheet day numbers
    if !(1.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.trunc() as i64))
}

fn format_compact(value: f64) -> Option<String> {
    if !value.is_finite() {
        return None;
    }

    let magnitude = value.abs();
    let sign = if value < 0.0 { "-" } else { "" };

    let mut unit = COMPACT_UNITS.iter().rposition(|(divisor, _)| magnitude >= *divisor);

    loop {
        match unit {
            None => {
                let rounded = round_to(magnitude, COMPACT_FRACTION_DIGITS);
                if rounded >= COMPACT_UNITS[0].0 {
                    unit = Some(0);
                    continue;
                }
                return Some(format_grouped(value, 0, COMPACT_FRACTION_DIGITS));
            }
            Some(index) => {
                let (divisor, suffix) = COMPACT_UNITS[index];
                let mantissa = round_to(magnitude / divisor, COMPACT_FRACTION_DIGITS);
                if let Some((next_divisor, _)) = COMPACT_UNITS.get(index + 1) {
                    if mantissa * divisor >= *next_divisor {
                        unit = Some(index + 1);
                        continue;
                    }
                }
                let body = format_grouped(mantissa, 0, COMPACT_FRACTION_DIGITS);
                return Some(format!("{}{}{}", sign, body, suffix));
            }
        }
    }
}

fn round_to(value: f64, digits: usize) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

fn format_grouped(value: f64, min_fraction: usize, max_fraction: usize) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "∞".to_string() } else { "-∞".to_string() };
    }

    let fixed = format!("{:.*}", max_fraction, value.abs());
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i.to_string(), f.to_string()),
        None => (fixed.clone(), String::new()),
    };

    let mut frac = frac_part;
    while frac.len() > min_fraction && frac.ends_with('0') {
        frac.pop();
    }

    let is_zero = int_part.chars().all(|c| c == '0') && frac.chars().all(|c| c == '0');
    let sign = if value < 0.0 && !is_zero { "-" } else { "" };

    let grouped = group_indian(&int_part);
    if frac.is_empty() {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{}.{}", sign, grouped, frac)
    }
}

/// `1234567` -> `12,34,567`
fn group_indian(digits: &str) -> String {
    if digits.len() <= 3 {
        return digits.to_string();
    }

    let (head, tail) = digits.split_at(digits.len() - 3);
    let mut groups: Vec<&str> = Vec::new();
    let mut end = head.len();
    while end > 0 {
        let start = end.saturating_sub(2);
        groups.push(&head[start..end]);
        end = start;
    }
    groups.reverse();

    format!("{},{}", groups.join(","), tail)
}
