use std::str::FromStr;

/// Parses a numeric attribute, `T::default()` when missing or unparsable.
pub fn parse_or_default<T: FromStr + Default>(s: Option<&str>) -> T {
    s.and_then(|s| s.trim().parse().ok()).unwrap_or_default()
}

/// Parses `"15%"`, `"0.15"` or `"15"` as a percentage in `0..=100`.
pub fn parse_percent(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Some(p) = s.strip_suffix('%') {
        return p.trim().parse().ok();
    }
    let v: f64 = s.parse().ok()?;
    // bare fractions are how PrusaSlicer writes densities in some versions
    if v > 0.0 && v <= 1.0 && s.contains('.') {
        Some(v * 100.)
    } else {
        Some(v)
    }
}

/// Multi-extruder values come as `"a,b"` or `"a;b"`; the first one wins.
pub fn first_list_value(s: &str) -> &str {
    s.split([',', ';']).next().unwrap_or(s).trim()
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match first_list_value(s).to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[allow(unused_macros)]
macro_rules! trace_matrix {
    ($label:expr, $m:expr) => {
        for row in $m.row_iter() {
            let xs: Vec<String> = row.iter().map(|x| format!("{: >8.3}", x)).collect();
            tracing::trace!("{}: {}", $label, xs.join(" "));
        }
    };
}
pub(crate) use trace_matrix;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_defaults() {
        assert_eq!(parse_or_default::<f32>(Some("1.5")), 1.5);
        assert_eq!(parse_or_default::<f32>(Some("abc")), 0.0);
        assert_eq!(parse_or_default::<u32>(None), 0);
        assert_eq!(parse_or_default::<u32>(Some(" 7 ")), 7);
    }

    #[test]
    fn percentages() {
        assert_eq!(parse_percent("15%"), Some(15.0));
        assert_eq!(parse_percent("0.2"), Some(20.0));
        assert_eq!(parse_percent("40"), Some(40.0));
        assert_eq!(parse_percent("lots"), None);
    }

    #[test]
    fn lists_and_bools() {
        assert_eq!(first_list_value("210,215"), "210");
        assert_eq!(first_list_value("PLA;PETG"), "PLA");
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("false"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
