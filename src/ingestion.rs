use std::path::Path;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use csv::StringRecord;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::{AppError, AppResult};

/// One normalized registry row. Fields the source file leaves blank are
/// absent rather than empty strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub nit: Option<String>,
    pub name: Option<String>,
    pub department: Option<String>,
    pub municipality: Option<String>,
    pub service: Option<String>,
    pub status: Option<String>,
}

impl ProviderRecord {
    pub fn source_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let serialized =
            serde_json::to_string(self).expect("provider rows serialize deterministically");
        hasher.update(serialized.as_bytes());
        STANDARD_NO_PAD.encode(hasher.finalize())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Outcome of parsing the registry file: the usable rows plus the count of
/// rows dropped for carrying no service location at all.
#[derive(Debug)]
pub struct ParsedRegistry {
    pub rows: Vec<ProviderRecord>,
    pub skipped: usize,
}

struct RegistryColumns {
    nit: Option<usize>,
    name: Option<usize>,
    department: usize,
    municipality: usize,
    service: Option<usize>,
    status: Option<usize>,
}

impl RegistryColumns {
    fn detect(headers: &StringRecord) -> AppResult<Self> {
        let department = find_column(headers, "DEPARTAMENTO_PRESTACION").ok_or_else(|| {
            AppError::Config("registry file missing DEPARTAMENTO_PRESTACION column".into())
        })?;
        let municipality = find_column(headers, "MUNICIPIO_PRESTACION").ok_or_else(|| {
            AppError::Config("registry file missing MUNICIPIO_PRESTACION column".into())
        })?;
        Ok(Self {
            nit: find_column(headers, "NIT"),
            name: find_column(headers, "NOMBRE"),
            department,
            municipality,
            service: find_column(headers, "SERVICIO"),
            status: find_column(headers, "ESTADO"),
        })
    }

    fn to_record(&self, record: &StringRecord) -> ProviderRecord {
        ProviderRecord {
            nit: field(record, self.nit),
            name: field(record, self.name),
            department: field(record, Some(self.department)),
            municipality: field(record, Some(self.municipality)),
            service: field(record, self.service),
            status: field(record, self.status),
        }
    }
}

/// Parses the RUPS registry CSV. Rows whose department and municipality are
/// both blank are skipped: they cannot be placed on the map and carry no
/// location signal for the coverage reports either.
pub fn parse_registry<P: AsRef<Path>>(path: P) -> AppResult<ParsedRegistry> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path.as_ref())?;
    let headers = reader.headers()?.clone();
    let columns = RegistryColumns::detect(&headers)?;

    let mut rows = Vec::new();
    let mut skipped = 0_usize;
    for record in reader.records() {
        let record = record?;
        let row = columns.to_record(&record);
        if row.department.is_none() && row.municipality.is_none() {
            skipped += 1;
            continue;
        }
        rows.push(row);
    }
    debug!(rows = rows.len(), skipped, "registry file parsed");
    Ok(ParsedRegistry { rows, skipped })
}

/// Persists parsed rows in one transaction. The unique index on
/// `source_row_hash` makes re-ingesting the same file a no-op.
pub fn persist_rows(connection: &mut Connection, rows: &[ProviderRecord]) -> AppResult<ImportSummary> {
    let tx = connection.transaction()?;
    let mut inserted = 0_usize;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO providers
                (source_row_hash, nit, name, department, municipality, service, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for row in rows {
            inserted += stmt.execute(params![
                row.source_hash(),
                row.nit,
                row.name,
                row.department,
                row.municipality,
                row.service,
                row.status,
            ])?;
        }
    }
    tx.commit()?;

    Ok(ImportSummary {
        inserted,
        duplicates: rows.len() - inserted,
    })
}

fn find_column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|header| header.trim() == name)
}

fn field(record: &StringRecord, idx: Option<usize>) -> Option<String> {
    let value = record.get(idx?)?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::db::bootstrap;

    use super::*;

    const SAMPLE_REGISTRY: &str = "\
NIT,NOMBRE,DEPARTAMENTO_PRESTACION,MUNICIPIO_PRESTACION,SERVICIO,ESTADO
900100200,EMPRESA DE ACUEDUCTO DE TUNJA,Boyacá,Tunja,ACUEDUCTO,OPERATIVA
900100201,ASEO CAPITAL,Boyacá,Tunja,ASEO,OPERATIVA
900100202,SIN UBICACION S.A.,,,AAA,OPERATIVA
900100203,ALCANTARILLADO DEL SUR,Nariño,,ALCANTARILLADO,CANCELADO
";

    fn write_sample(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("registry.csv");
        std::fs::write(&path, SAMPLE_REGISTRY).unwrap();
        path
    }

    #[test]
    fn parses_rows_and_skips_unlocated_ones() {
        let dir = tempdir().unwrap();
        let parsed = parse_registry(write_sample(dir.path())).unwrap();

        assert_eq!(parsed.rows.len(), 3);
        assert_eq!(parsed.skipped, 1);
        let first = &parsed.rows[0];
        assert_eq!(first.municipality.as_deref(), Some("Tunja"));
        assert_eq!(first.department.as_deref(), Some("Boyacá"));
        // One-sided locations survive; the key builder handles them later.
        assert!(parsed.rows[2].municipality.is_none());
        assert_eq!(parsed.rows[2].department.as_deref(), Some("Nariño"));
    }

    #[test]
    fn rejects_file_without_location_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();

        assert!(parse_registry(&path).is_err());
    }

    #[test]
    fn persists_rows_once_across_reingests() {
        let dir = tempdir().unwrap();
        let ctx = bootstrap(dir.path().join("rups.db")).unwrap();
        let mut connection = ctx.connection;
        let parsed = parse_registry(write_sample(dir.path())).unwrap();

        let first = persist_rows(&mut connection, &parsed.rows).unwrap();
        assert_eq!(first.inserted, 3);
        assert_eq!(first.duplicates, 0);

        let second = persist_rows(&mut connection, &parsed.rows).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 3);

        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM providers", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 3);
    }
}
