use std::collections::HashMap;

use serde::Serialize;

use crate::ingestion::ProviderRecord;

/// Which of the three public services a registry row declares. The combined
/// "AAA" marker stands for all three at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceFlags {
    pub aqueduct: bool,
    pub sewerage: bool,
    pub waste: bool,
}

pub fn service_flags(service: Option<&str>) -> ServiceFlags {
    let Some(service) = service else {
        return ServiceFlags::default();
    };
    let upper = service.to_uppercase();
    let combined = upper.contains("AAA");
    ServiceFlags {
        aqueduct: combined || upper.contains("ACUEDUCTO"),
        sewerage: combined || upper.contains("ALCANTARILLADO"),
        waste: combined || upper.contains("ASEO"),
    }
}

pub fn classify(flags: ServiceFlags) -> &'static str {
    match (flags.aqueduct, flags.sewerage, flags.waste) {
        (true, true, true) => "AAA (Acueducto+Alcantarillado+Aseo)",
        (true, true, false) => "Acueducto + Alcantarillado",
        (true, false, true) => "Acueducto + Aseo",
        (false, true, true) => "Alcantarillado + Aseo",
        (true, false, false) => "Only Acueducto",
        (false, true, false) => "Only Alcantarillado",
        (false, false, true) => "Only Aseo",
        (false, false, false) => "No service",
    }
}

/// Per-department provider counts, overall and per service.
#[derive(Debug, Clone, Serialize)]
pub struct DepartmentCoverage {
    pub department: String,
    pub providers: u64,
    pub aqueduct: u64,
    pub sewerage: u64,
    pub waste: u64,
}

const UNSPECIFIED_DEPARTMENT: &str = "(sin departamento)";

/// Aggregates rows into department coverage, busiest departments first.
pub fn department_coverage(providers: &[ProviderRecord]) -> Vec<DepartmentCoverage> {
    let mut order: Vec<String> = Vec::new();
    let mut by_department: HashMap<String, DepartmentCoverage> = HashMap::new();

    for provider in providers {
        let department = provider
            .department
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(UNSPECIFIED_DEPARTMENT)
            .to_string();
        let flags = service_flags(provider.service.as_deref());

        let entry = by_department
            .entry(department.clone())
            .or_insert_with(|| {
                order.push(department.clone());
                DepartmentCoverage {
                    department,
                    providers: 0,
                    aqueduct: 0,
                    sewerage: 0,
                    waste: 0,
                }
            });
        entry.providers += 1;
        entry.aqueduct += u64::from(flags.aqueduct);
        entry.sewerage += u64::from(flags.sewerage);
        entry.waste += u64::from(flags.waste);
    }

    let mut coverage: Vec<DepartmentCoverage> = order
        .into_iter()
        .filter_map(|department| by_department.remove(&department))
        .collect();
    coverage.sort_by(|a, b| {
        b.providers
            .cmp(&a.providers)
            .then_with(|| a.department.cmp(&b.department))
    });
    coverage
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(department: Option<&str>, service: Option<&str>) -> ProviderRecord {
        ProviderRecord {
            nit: None,
            name: None,
            department: department.map(Into::into),
            municipality: Some("Tunja".into()),
            service: service.map(Into::into),
            status: Some("OPERATIVA".into()),
        }
    }

    #[test]
    fn aaa_marker_implies_all_three_services() {
        let flags = service_flags(Some("AAA"));
        assert!(flags.aqueduct && flags.sewerage && flags.waste);
        assert_eq!(classify(flags), "AAA (Acueducto+Alcantarillado+Aseo)");
    }

    #[test]
    fn individual_services_are_detected_case_insensitively() {
        assert_eq!(
            service_flags(Some("Acueducto y Alcantarillado")),
            ServiceFlags { aqueduct: true, sewerage: true, waste: false }
        );
        assert_eq!(
            service_flags(Some("aseo")),
            ServiceFlags { aqueduct: false, sewerage: false, waste: true }
        );
        assert_eq!(service_flags(None), ServiceFlags::default());
        assert_eq!(classify(service_flags(None)), "No service");
    }

    #[test]
    fn coverage_counts_match_flag_sums() {
        let rows = vec![
            provider(Some("Boyacá"), Some("ACUEDUCTO")),
            provider(Some("Boyacá"), Some("AAA")),
            provider(Some("Nariño"), Some("ASEO")),
            provider(None, Some("ALCANTARILLADO")),
        ];

        let coverage = department_coverage(&rows);
        assert_eq!(coverage.len(), 3);

        let boyaca = &coverage[0];
        assert_eq!(boyaca.department, "Boyacá");
        assert_eq!(boyaca.providers, 2);
        assert_eq!(boyaca.aqueduct, 2);
        assert_eq!(boyaca.sewerage, 1);
        assert_eq!(boyaca.waste, 1);

        let unspecified = coverage
            .iter()
            .find(|c| c.department == UNSPECIFIED_DEPARTMENT)
            .unwrap();
        assert_eq!(unspecified.sewerage, 1);
    }
}
