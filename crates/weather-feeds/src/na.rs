//! Detection of upstream "not available" markers.

/// Display text substituted for unavailable values by the display layer.
pub const NA_TEXT: &str = "N/A";
/// Icon name substituted when a feed reports no icon.
pub const NA_ICON: &str = "unknown";

/// Returns `true` when the raw leaf text is one of the upstream NA markers:
/// absent, empty, `-`, any `-999` prefixed value, or `na`/`n/a`/`null` in
/// any letter case.
pub fn is_na(raw: Option<&str>) -> bool {
    let Some(value) = raw else {
        return true;
    };

    value.is_empty()
        || value == "-"
        || value.starts_with("-999")
        || value.eq_ignore_ascii_case("null")
        || value.eq_ignore_ascii_case("na")
        || value.eq_ignore_ascii_case("n/a")
}

/// Passes the value through unchanged unless it is an NA marker.
pub fn available(raw: &str) -> Option<&str> {
    if is_na(Some(raw)) { None } else { Some(raw) }
}

/// Substitutes `fallback` for NA markers.
pub fn or_marker<'a>(raw: Option<&'a str>, fallback: &'a str) -> &'a str {
    match raw {
        Some(value) if !is_na(Some(value)) => value,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn na_detection_covers_every_upstream_marker() {
        for marker in [
            "", "-", "NA", "na", "N/A", "n/a", "null", "NULL", "-999", "-9999.0", "-999.00",
        ] {
            assert!(is_na(Some(marker)), "expected NA: {marker:?}");
            assert_eq!(available(marker), None);
        }
        assert!(is_na(None));
    }

    #[test]
    fn na_detection_passes_regular_values_through_unchanged() {
        for value in ["0", "-5", "-99", "nah", "Sunny", " 12 ", "N/A/B", "-9"] {
            assert_eq!(available(value), Some(value));
        }
    }

    #[test]
    fn or_marker_substitutes_fallback() {
        assert_eq!(or_marker(Some("-999"), NA_ICON), "unknown");
        assert_eq!(or_marker(None, NA_TEXT), "N/A");
        assert_eq!(or_marker(Some("clear"), NA_ICON), "clear");
    }
}
