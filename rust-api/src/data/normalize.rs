//! Scalar coercions from collaborator text to numbers
//!
//! Every function here is "parse or missing": unreadable input comes back as
//! `None` and is never silently replaced. Zero filling happens in exactly two
//! places, both visible at the call site: rate-like fields right after
//! normalization, and everything else in the final cleanup of the feature table.

/// Parse a trimmed decimal number, rejecting empty, NaN and infinite values
pub fn parse_numeric(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Pre-race readings (exhibition time, tilt) arrive padded with no-break spaces
pub fn parse_reading(text: &str) -> Option<f64> {
    parse_numeric(&text.replace('\u{a0}', ""))
}

/// Age is the leading two characters of the age cell ("35歳" -> 35)
pub fn parse_age(text: &str) -> Option<f64> {
    let head: String = text.chars().take(2).collect();
    parse_numeric(&head)
}

/// Weight cells may carry a slash separator left over from the page layout
pub fn parse_weight(text: &str) -> Option<f64> {
    parse_numeric(&text.replace('/', ""))
}

/// Mean start timing, where a lone "-" means the racer has no recorded starts
pub fn parse_mean_start_timing(text: &str) -> Option<f64> {
    if text.trim() == "-" {
        return None;
    }
    parse_numeric(text)
}

/// Foul-start count from text such as "F1"; no digits means no fouls
pub fn parse_foul_count(text: &str) -> u32 {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse::<u32>().unwrap_or(0)
}

/// Percentage-style rate ("45.12%", " 6.51 ")
pub fn parse_rate(text: &str) -> Option<f64> {
    parse_numeric(&text.replace(&['%', ' '][..], ""))
}

/// Class code to rank score; unknown codes rank 0
pub fn class_rank(code: &str) -> f64 {
    match code.trim() {
        "A1" => 4.0,
        "A2" => 3.0,
        "B1" => 2.0,
        "B2" => 1.0,
        _ => 0.0,
    }
}

/// Apply a parser to an optional field
pub fn opt<F>(field: &Option<String>, parse: F) -> Option<f64>
where
    F: Fn(&str) -> Option<f64>,
{
    field.as_deref().and_then(parse)
}
