// Model name resolution and normalization
//
// There is no single global model catalog to validate against in a
// multi-tenant deployment (each user's Kiro credentials may expose a
// different set); resolution here is reduced to pure normalization plus the
// static Pro+ membership test the allocator needs.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static STANDARD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(claude-(?:haiku|sonnet|opus)-\d+)-(\d{1,2})(?:-(?:\d{8}|latest|\d+))?$").unwrap()
});

static NO_MINOR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(claude-(?:haiku|sonnet|opus)-\d+)(?:-\d{8})?$").unwrap());

static LEGACY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(claude)-(\d+)-(\d+)-(haiku|sonnet|opus)(?:-(?:\d{8}|latest|\d+))?$").unwrap()
});

static DOT_WITH_DATE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(claude-(?:\d+\.\d+-)?(?:haiku|sonnet|opus)(?:-\d+\.\d+)?)-\d{8}$").unwrap()
});

/// Privileged model subset requiring an upgraded Kiro token (`opus_enabled`)
/// or an explicitly-bound custom account. Expressed in normalized form since
/// the allocator always compares against `normalize_model_name` output.
pub static PRO_PLUS_MODELS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "claude-opus-4",
        "claude-opus-4.1",
        "claude-opus-4.5",
        "claude-opus-4.6",
    ]
    .into_iter()
    .collect()
});

pub fn is_pro_plus_model(requested_model: &str) -> bool {
    PRO_PLUS_MODELS.contains(normalize_model_name(requested_model).as_str())
}

/// Normalize model name to Kiro format.
///
/// Transformations:
/// - claude-haiku-4-5 -> claude-haiku-4.5 (dash to dot for minor version)
/// - claude-haiku-4-5-20251001 -> claude-haiku-4.5 (strip date suffix)
/// - claude-haiku-4-5-latest -> claude-haiku-4.5 (strip 'latest' suffix)
/// - claude-sonnet-4-20250514 -> claude-sonnet-4 (strip date, no minor)
/// - claude-3-7-sonnet -> claude-3.7-sonnet (legacy format normalization)
/// - claude-3-7-sonnet-20250219 -> claude-3.7-sonnet (legacy + strip date)
pub fn normalize_model_name(name: &str) -> String {
    if name.is_empty() {
        return name.to_string();
    }

    let name_lower = name.to_lowercase();

    if let Some(caps) = STANDARD_PATTERN.captures(&name_lower) {
        let base = caps.get(1).unwrap().as_str();
        let minor = caps.get(2).unwrap().as_str();
        return format!("{}.{}", base, minor);
    }

    if let Some(caps) = NO_MINOR_PATTERN.captures(&name_lower) {
        return caps.get(1).unwrap().as_str().to_string();
    }

    if let Some(caps) = LEGACY_PATTERN.captures(&name_lower) {
        let prefix = caps.get(1).unwrap().as_str();
        let major = caps.get(2).unwrap().as_str();
        let minor = caps.get(3).unwrap().as_str();
        let family = caps.get(4).unwrap().as_str();
        return format!("{}-{}.{}-{}", prefix, major, minor, family);
    }

    if let Some(caps) = DOT_WITH_DATE_PATTERN.captures(&name_lower) {
        return caps.get(1).unwrap().as_str().to_string();
    }

    name.to_string()
}

/// Extract model family from model name.
pub fn extract_model_family(model_name: &str) -> Option<String> {
    let family_regex = Regex::new(r"(haiku|sonnet|opus)").unwrap();
    family_regex
        .find(&model_name.to_lowercase())
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_standard_and_legacy_forms() {
        assert_eq!(normalize_model_name("claude-haiku-4-5"), "claude-haiku-4.5");
        assert_eq!(normalize_model_name("claude-sonnet-4-5"), "claude-sonnet-4.5");
        assert_eq!(normalize_model_name("claude-opus-4-5"), "claude-opus-4.5");
        assert_eq!(
            normalize_model_name("claude-haiku-4-5-20251001"),
            "claude-haiku-4.5"
        );
        assert_eq!(
            normalize_model_name("claude-haiku-4-5-latest"),
            "claude-haiku-4.5"
        );
        assert_eq!(normalize_model_name("claude-sonnet-4"), "claude-sonnet-4");
        assert_eq!(
            normalize_model_name("claude-sonnet-4-20250514"),
            "claude-sonnet-4"
        );
        assert_eq!(normalize_model_name("claude-3-7-sonnet"), "claude-3.7-sonnet");
        assert_eq!(
            normalize_model_name("claude-3-7-sonnet-20250219"),
            "claude-3.7-sonnet"
        );
        assert_eq!(normalize_model_name("claude-haiku-4.5"), "claude-haiku-4.5");
        assert_eq!(
            normalize_model_name("claude-haiku-4.5-20251001"),
            "claude-haiku-4.5"
        );
        assert_eq!(normalize_model_name("auto"), "auto");
        assert_eq!(normalize_model_name("gpt-4"), "gpt-4");
    }

    #[test]
    fn extracts_family() {
        assert_eq!(extract_model_family("claude-haiku-4.5"), Some("haiku".to_string()));
        assert_eq!(extract_model_family("claude-sonnet-4-5"), Some("sonnet".to_string()));
        assert_eq!(extract_model_family("gpt-4"), None);
    }

    #[test]
    fn pro_plus_membership() {
        assert!(is_pro_plus_model("claude-opus-4-6"));
        assert!(is_pro_plus_model("claude-opus-4-6-20250514"));
        assert!(!is_pro_plus_model("claude-sonnet-4"));
        assert!(!is_pro_plus_model("gpt-4"));
    }
}
