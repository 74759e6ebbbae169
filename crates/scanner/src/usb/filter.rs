//! VID:PID allow-list
//!
//! Filters use the form `0xVID:0xPID`, with `*` as a wildcard for either
//! half. An empty list allows everything.

use common::{Error, Result};

/// Scanner vendor ids
pub const SCANNER_VENDOR_IDS: [u16; 2] = [0x113F, 0x1FBA];

/// Known scanner product ids, valid under either vendor id
pub const SCANNER_PRODUCT_IDS: [(u16, &str); 19] = [
    (0x1004, "Curve"),
    (0x1005, "Watson"),
    (0x1006, "Watson rev1"),
    (0x1010, "Sherlock"),
    (0x1011, "Sherlock AUO"),
    (0x1020, "Watson Mini"),
    (0x1021, "Watson Mini rev1"),
    (0x1100, "Columbo"),
    (0x1101, "Columbo rev1"),
    (0x1200, "Holmes"),
    (0x1300, "Kojak"),
    (0x1301, "Kojak rev1"),
    (0x0036, "Kojak OEM"),
    (0x1500, "Five-0"),
    (0x1501, "Five-0 rev1"),
    (0x0034, "Five-0 OEM"),
    (0x1600, "Danno"),
    (0x1A00, "Kojak lock"),
    (0x7100, "Columbo Mini"),
];

/// Allow-list covering every known scanner
pub fn default_filters() -> Vec<String> {
    SCANNER_VENDOR_IDS
        .iter()
        .flat_map(|vid| {
            SCANNER_PRODUCT_IDS
                .iter()
                .map(move |(pid, _)| format!("0x{:04x}:0x{:04x}", vid, pid))
        })
        .collect()
}

/// Model name for a known product id
pub fn model_name(vendor_id: u16, product_id: u16) -> Option<&'static str> {
    if !SCANNER_VENDOR_IDS.contains(&vendor_id) {
        return None;
    }
    SCANNER_PRODUCT_IDS
        .iter()
        .find(|(pid, _)| *pid == product_id)
        .map(|(_, name)| *name)
}

/// Check a VID/PID pair against the filters
pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }

    filters.iter().any(|filter| {
        let Some((filter_vid, filter_pid)) = filter.split_once(':') else {
            return false;
        };
        matches_part(filter_vid, vid) && matches_part(filter_pid, pid)
    })
}

fn matches_part(pattern: &str, value: u16) -> bool {
    pattern == "*"
        || u16::from_str_radix(pattern.trim_start_matches("0x"), 16).is_ok_and(|v| v == value)
}

/// Validate filter syntax
pub fn validate_filter(filter: &str) -> Result<()> {
    let parts: Vec<&str> = filter.split(':').collect();
    if parts.len() != 2 {
        return Err(Error::Config(format!(
            "Invalid filter format '{}', expected VID:PID (e.g., '0x113f:0x1100' or '0x113f:*')",
            filter
        )));
    }

    for part in parts {
        if part == "*" {
            continue;
        }
        let hex = part.strip_prefix("0x").ok_or_else(|| {
            Error::Config(format!("Invalid filter '{}': '{}' must start with 0x", filter, part))
        })?;
        if hex.is_empty() || hex.len() > 4 || u16::from_str_radix(hex, 16).is_err() {
            return Err(Error::Config(format!(
                "Invalid filter '{}': '{}' is not a 16-bit hex id",
                filter, part
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_logic() {
        let filters = vec!["0x113f:0x1100".to_string(), "0x1fba:*".to_string()];

        assert!(check_filter(0x113F, 0x1100, &filters));
        assert!(check_filter(0x1FBA, 0x0034, &filters));
        assert!(check_filter(0x1FBA, 0x9999, &filters));

        assert!(!check_filter(0x113F, 0x1200, &filters));
        assert!(!check_filter(0x0000, 0x1100, &filters));

        // Empty filters = allow all
        assert!(check_filter(0x1234, 0x5678, &[]));
    }

    #[test]
    fn test_default_filters_cover_known_models() {
        let filters = default_filters();
        assert_eq!(filters.len(), 38);
        assert!(check_filter(0x113F, 0x7100, &filters));
        assert!(check_filter(0x1FBA, 0x0036, &filters));
        assert!(!check_filter(0x113F, 0x0001, &filters));
        assert!(filters.iter().all(|f| validate_filter(f).is_ok()));
    }

    #[test]
    fn test_model_name() {
        assert_eq!(model_name(0x113F, 0x1100), Some("Columbo"));
        assert_eq!(model_name(0x1FBA, 0x1500), Some("Five-0"));
        assert_eq!(model_name(0x046D, 0x1100), None);
    }

    #[test]
    fn test_validate_filter() {
        assert!(validate_filter("0x113f:0x1100").is_ok());
        assert!(validate_filter("0x113f:*").is_ok());
        assert!(validate_filter("*:*").is_ok());

        assert!(validate_filter("113f:1100").is_err());
        assert!(validate_filter("0x113f").is_err());
        assert!(validate_filter("0x113f:0x1100:0x1").is_err());
        assert!(validate_filter("0xGHIJ:0x1100").is_err());
        assert!(validate_filter("0x12345:0x1100").is_err());
    }
}
