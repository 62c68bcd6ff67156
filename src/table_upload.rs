//! Table Upload
//!
//! Loads a CSV into a polars frame, names the target table after the file
//! and syncs it into the persisted store once per source signature.

use crate::db::{SqlValue, SqliteStore};
use crate::error::{AssistantError, Result};
use crate::schema::{ColumnDef, SchemaDescriptor};
use crate::session::SessionContext;
use lazy_static::lazy_static;
use polars::prelude::*;
use regex::Regex;
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_TABLE_NAME: &str = "uploaded_data_tbl";

const INFER_SCHEMA_ROWS: usize = 1000;

lazy_static! {
    static ref DATE_SUFFIXES: Vec<Regex> = vec![
        Regex::new(r"_\d{4}_\d{2}_\d{2}$").unwrap(),
        Regex::new(r"_\d{4}-\d{2}-\d{2}$").unwrap(),
        Regex::new(r"_\d{8}$").unwrap(),
    ];
    static ref NON_IDENT: Regex = Regex::new(r"[^A-Za-z0-9_]+").unwrap();
    static ref UNDERSCORES: Regex = Regex::new(r"_+").unwrap();
}

/// A CSV loaded and preprocessed, not yet synced.
#[derive(Debug, Clone)]
pub struct UploadedTable {
    pub table_name: String,
    pub signature: String,
    pub frame: DataFrame,
}

/// Summary of one sync into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub table: String,
    pub created: bool,
    pub inserted: usize,
    pub skipped: bool,
}

/// Maps a file name to a stable table name so dated exports of the same
/// source land in one table: `{org1}_churn_src_2025_11_01.csv` becomes
/// `org1_churn_src_tbl`.
pub fn extract_table_name_from_filename(filename: &str) -> String {
    if filename.trim().is_empty() {
        return DEFAULT_TABLE_NAME.to_string();
    }
    let base = match filename.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => filename,
    };

    let mut base = base.to_string();
    for pattern in DATE_SUFFIXES.iter() {
        base = pattern.replace(&base, "").into_owned();
    }
    let base = base.replace(['{', '}'], "");
    let name = NON_IDENT.replace_all(&base, "_");
    let name = UNDERSCORES.replace_all(&name, "_");
    let name = name.trim_matches('_');

    if name.is_empty() || name == "tbl" {
        return DEFAULT_TABLE_NAME.to_string();
    }
    if name.ends_with("_tbl") {
        name.to_string()
    } else {
        format!("{}_tbl", name)
    }
}

/// `file:rows:col1,col2,...`
pub fn source_signature(filename: &str, frame: &DataFrame) -> String {
    let columns = frame.get_column_names().join(",");
    format!("{}:{}:{}", filename, frame.height(), columns)
}

/// Loads a CSV, trims column names and fills numeric nulls with the
/// column median. Text nulls are left null so presence checks still see
/// them.
pub fn load_csv(path: &Path) -> Result<DataFrame> {
    info!("Loading CSV {}", path.display());
    let mut df = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(Some(INFER_SCHEMA_ROWS))
        .finish()?
        .collect()?;
    preprocess(&mut df)?;
    info!("Loaded {} rows x {} columns", df.height(), df.width());
    Ok(df)
}

fn preprocess(df: &mut DataFrame) -> Result<()> {
    let trimmed: Vec<String> = df.get_column_names().iter().map(|c| c.trim().to_string()).collect();
    df.set_column_names(trimmed.as_slice())?;

    let fills: Vec<Expr> = df
        .get_columns()
        .iter()
        .filter(|s| s.dtype().is_numeric() && s.null_count() > 0)
        .map(|s| {
            debug!("Filling {} nulls in {} with the median", s.null_count(), s.name());
            col(s.name()).fill_null(col(s.name()).median())
        })
        .collect();
    if !fills.is_empty() {
        *df = df.clone().lazy().with_columns(fills).collect()?;
    }
    Ok(())
}

/// Loads a CSV and derives its table name and signature.
pub fn upload_csv(path: &Path) -> Result<UploadedTable> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let frame = load_csv(path)?;
    Ok(UploadedTable {
        table_name: extract_table_name_from_filename(&filename),
        signature: source_signature(&filename, &frame),
        frame,
    })
}

pub fn sqlite_type(dtype: &DataType) -> &'static str {
    if dtype.is_integer() || matches!(dtype, DataType::Boolean) {
        "INTEGER"
    } else if dtype.is_float() {
        "REAL"
    } else {
        "TEXT"
    }
}

/// Table definition derived from the frame's dtypes, columns in frame order.
pub fn schema_for_frame(table: &str, frame: &DataFrame) -> SchemaDescriptor {
    let columns = frame
        .get_columns()
        .iter()
        .map(|s| ColumnDef::new(s.name(), sqlite_type(s.dtype())))
        .collect();
    SchemaDescriptor::new(table, columns)
}

fn column_values(series: &Series) -> Result<Vec<SqlValue>> {
    let dtype = series.dtype();
    let values = if matches!(dtype, DataType::Boolean) {
        series
            .bool()?
            .into_iter()
            .map(|v| v.map_or(SqlValue::Null, |b| SqlValue::Integer(b as i64)))
            .collect()
    } else if dtype.is_integer() {
        series
            .cast(&DataType::Int64)?
            .i64()?
            .into_iter()
            .map(|v| v.map_or(SqlValue::Null, SqlValue::Integer))
            .collect()
    } else if dtype.is_float() {
        series
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(|v| match v {
                Some(f) if !f.is_nan() => SqlValue::Real(f),
                _ => SqlValue::Null,
            })
            .collect()
    } else {
        series
            .cast(&DataType::String)?
            .str()?
            .into_iter()
            .map(|v| v.map_or(SqlValue::Null, |s| SqlValue::Text(s.to_string())))
            .collect()
    };
    Ok(values)
}

/// Row-major store values for every row of the frame.
pub fn frame_rows(frame: &DataFrame) -> Result<Vec<Vec<SqlValue>>> {
    let columns = frame
        .get_columns()
        .iter()
        .map(column_values)
        .collect::<Result<Vec<_>>>()?;
    let rows = (0..frame.height())
        .map(|i| columns.iter().map(|c| c[i].clone()).collect())
        .collect();
    Ok(rows)
}

/// Writes the session's table into the store unless this signature was
/// already synced. Creation is idempotent; the insert runs once per
/// signature.
pub fn sync_to_store(session: &mut SessionContext, store: &SqliteStore) -> Result<SyncReport> {
    let table = session
        .current_table()
        .ok_or_else(|| AssistantError::Schema("no table has been uploaded".into()))?
        .to_string();
    if session.is_synced() {
        debug!("Table {} already synced for this upload", table);
        return Ok(SyncReport {
            table,
            created: false,
            inserted: 0,
            skipped: true,
        });
    }
    let frame = session
        .frame()
        .ok_or_else(|| AssistantError::Schema("no in-memory table to sync".into()))?;

    let schema = schema_for_frame(&table, frame);
    info!("Syncing {} ({} rows) into the store", table, frame.height());
    let created = store.create_table_if_needed(&schema)?;
    let columns: Vec<String> = schema.columns.iter().map(|c| c.name.clone()).collect();
    let rows = frame_rows(frame)?;
    let inserted = store.batch_insert(&table, &columns, &rows)?;

    session.mark_synced();
    Ok(SyncReport {
        table,
        created,
        inserted,
        skipped: false,
    })
}

/// Loads a CSV into the session and, when a store is available, syncs it.
pub fn ingest(session: &mut SessionContext, path: &Path, store: Option<&SqliteStore>) -> Result<Option<SyncReport>> {
    let upload = upload_csv(path)?;
    info!("Target table: {}", upload.table_name);
    session.attach_table(upload.table_name, upload.frame, upload.signature);
    match store {
        Some(store) => Ok(Some(sync_to_store(session, store)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_drops_date_suffixes() {
        assert_eq!(extract_table_name_from_filename("{org1}_churn_data_src_2025_11_01.csv"), "org1_churn_data_src_tbl");
        assert_eq!(extract_table_name_from_filename("{org1}_churn_data_src_2025-11-02.csv"), "org1_churn_data_src_tbl");
        assert_eq!(extract_table_name_from_filename("org2 churn data_20251101.csv"), "org2_churn_data_tbl");
    }

    #[test]
    fn test_table_name_defaults() {
        assert_eq!(extract_table_name_from_filename(""), DEFAULT_TABLE_NAME);
        assert_eq!(extract_table_name_from_filename("{}.csv"), DEFAULT_TABLE_NAME);
        assert_eq!(extract_table_name_from_filename("customers_tbl.csv"), "customers_tbl");
    }

    #[test]
    fn test_signature_lists_rows_and_columns() {
        let df = df!("Name" => &["Riya", "Amit"], "Age" => &[31, 45]).unwrap();
        assert_eq!(source_signature("c.csv", &df), "c.csv:2:Name,Age");
    }

    #[test]
    fn test_ddl_types_from_dtypes() {
        let df = df!(
            "Name" => &["Riya"],
            "Age" => &[31i64],
            "Spend" => &[10.5f64],
            "Active" => &[true]
        )
        .unwrap();
        let schema = schema_for_frame("customers_tbl", &df);
        let types: Vec<&str> = schema.columns.iter().map(|c| c.declared_type.as_str()).collect();
        assert_eq!(types, vec!["TEXT", "INTEGER", "REAL", "INTEGER"]);
        assert_eq!(schema_for_frame("customers_tbl", &df).ddl, schema.ddl);
    }

    #[test]
    fn test_preprocess_fills_numeric_nulls_only() {
        let mut df = df!(
            " Age " => &[Some(20i64), None, Some(40)],
            "Email" => &[Some("a@x.io"), None, Some("c@x.io")]
        )
        .unwrap();
        preprocess(&mut df).unwrap();
        assert_eq!(df.get_column_names(), vec!["Age", "Email"]);
        assert_eq!(df.column("Age").unwrap().null_count(), 0);
        assert_eq!(df.column("Age").unwrap().get(1).unwrap().extract::<f64>(), Some(30.0));
        assert_eq!(df.column("Email").unwrap().null_count(), 1);
    }

    #[test]
    fn test_frame_rows_convert_nulls() {
        let df = df!("Name" => &[Some("Riya"), None], "Age" => &[Some(31i64), None]).unwrap();
        let rows = frame_rows(&df).unwrap();
        assert_eq!(rows[0], vec![SqlValue::Text("Riya".into()), SqlValue::Integer(31)]);
        assert_eq!(rows[1], vec![SqlValue::Null, SqlValue::Null]);
    }
}
