use std::str::FromStr;
use tokio::time::Duration;

/// Parses a duration string in the format "500ms", "30s", "10m", "5h", "3d".
///
/// Supported units:
/// - `ms` for milliseconds
/// - `s` for seconds
/// - `m` for minutes
/// - `h` for hours
/// - `d` for days
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    let (value_str, unit) = match s.strip_suffix("ms") {
        Some(value) => (value, "ms"),
        None => {
            let unit_start = s.len() - s.chars().last().map_or(0, char::len_utf8);
            (&s[..unit_start], &s[unit_start..])
        }
    };

    let value = match u64::from_str(value_str) {
        Ok(v) => v,
        Err(_) => {
            return Err(format!(
                "Invalid numeric value in duration: '{}'",
                value_str
            ))
        }
    };

    let secs_per_unit = match unit {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => {
            return Err(format!(
                "Unknown duration unit: '{}'. Use 'ms', 's', 'm', 'h', or 'd'.",
                unit
            ))
        }
    };

    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("Duration is too large: '{}'", s))
}

/// serde helper for duration fields written as `"500ms"`, `"30s"`, ...
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
    parse_duration_string(&raw).map_err(serde::de::Error::custom)
}

/// Parses a comma-separated header string with support for escaped commas.
///
/// Use `\,` to include a literal comma in a header value.
/// Example: "X-Trace:on,Accept:application/json\,text/plain"
pub fn parse_headers_with_escapes(headers_str: &str) -> Vec<String> {
    let mut headers = Vec::new();
    let mut current_header = String::new();
    let mut chars = headers_str.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if chars.peek() == Some(&',') {
                    current_header.push(',');
                    chars.next();
                } else {
                    current_header.push('\\');
                }
            }
            ',' => {
                if !current_header.trim().is_empty() {
                    headers.push(current_header.clone());
                }
                current_header.clear();
            }
            _ => {
                current_header.push(ch);
            }
        }
    }

    if !current_header.trim().is_empty() {
        headers.push(current_header);
    }

    headers
}
