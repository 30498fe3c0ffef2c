//! Human-friendly duration parsing for config values.
//!
//! Supports formats like `90s`, `10m`, `2h`, `1d`, `1h30m`.

use chrono::Duration;

/// Parse a duration string made of `<number><unit>` groups.
///
/// Units: `s`, `m`, `h`, `d`. Zero and unit-less values are rejected.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".into());
    }

    let mut total_secs: i64 = 0;
    let mut digits = String::new();

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        if digits.is_empty() {
            return Err(format!("unexpected '{ch}' without a preceding number"));
        }
        let n: i64 = digits
            .parse()
            .map_err(|_| format!("number too large: {digits}"))?;
        digits.clear();

        let unit = match ch {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86400,
            _ => return Err(format!("unknown unit '{ch}', expected s/m/h/d")),
        };
        total_secs = n
            .checked_mul(unit)
            .and_then(|secs| total_secs.checked_add(secs))
            .ok_or_else(|| format!("duration too large: {s}"))?;
    }

    if !digits.is_empty() {
        return Err(format!("trailing digits without unit: {digits}"));
    }
    if total_secs == 0 {
        return Err("duration must be greater than zero".into());
    }

    Duration::try_seconds(total_secs).ok_or_else(|| format!("duration too large: {s}"))
}

/// Render a duration in the largest whole units, e.g. `1h30m`.
pub fn format_duration(d: Duration) -> String {
    let mut secs = d.num_seconds();
    if secs <= 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    for (unit, size) in [('d', 86400), ('h', 3600), ('m', 60), ('s', 1)] {
        if secs >= size {
            out.push_str(&format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }
    out
}
