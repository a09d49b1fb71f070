//! Canonical lookup keys for the geocoder and its cache.
//!
//! A key is the query string sent to the external geocoder, so two raw
//! (municipality, department) pairs that normalize identically must produce
//! byte-identical keys.

const COUNTRY: &str = "Colombia";

/// Builds the canonical `"<municipality>, <department>, Colombia"` key.
///
/// Absent parts are treated as empty, every part is trimmed, and empty
/// segments are dropped so the separator never doubles up. The country
/// segment is always present: a fully blank pair collapses to `"Colombia"`.
pub fn build_lookup_key(municipality: Option<&str>, department: Option<&str>) -> String {
    let municipality = municipality.unwrap_or_default().trim();
    let department = department.unwrap_or_default().trim();

    let mut parts = Vec::with_capacity(3);
    if !municipality.is_empty() {
        parts.push(municipality);
    }
    if !department.is_empty() {
        parts.push(department);
    }
    parts.push(COUNTRY);
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_municipality_department_and_country() {
        assert_eq!(
            build_lookup_key(Some("Tunja"), Some("Boyacá")),
            "Tunja, Boyacá, Colombia"
        );
    }

    #[test]
    fn collapses_blank_pair_to_country() {
        assert_eq!(build_lookup_key(Some(""), Some("")), "Colombia");
        assert_eq!(build_lookup_key(None, None), "Colombia");
        assert_eq!(build_lookup_key(Some("   "), Some("\t")), "Colombia");
    }

    #[test]
    fn drops_single_empty_segment() {
        assert_eq!(build_lookup_key(Some("Tunja"), Some("")), "Tunja, Colombia");
        assert_eq!(build_lookup_key(Some(""), Some("Boyacá")), "Boyacá, Colombia");
    }

    #[test]
    fn is_invariant_to_surrounding_whitespace_but_not_casing() {
        let canonical = build_lookup_key(Some("Tunja"), Some("Boyacá"));
        assert_eq!(
            build_lookup_key(Some("  Tunja "), Some("\tBoyacá  ")),
            canonical
        );
        assert_ne!(build_lookup_key(Some("TUNJA"), Some("Boyacá")), canonical);
    }
}
