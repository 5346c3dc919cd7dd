/// Baseline partitions: one Parquet file per state.
///
/// ```text
/// reference_stats/state=VT/data.parquet
/// site_id: utf8, month_day: utf8 ("MM-DD"), p05..p95: float64, count: uint32
/// ```
///
/// Rows are written sorted by (site_id, month_day) in a single uncompressed
/// row group, so rebuilding from unchanged history reproduces the file byte
/// for byte. Columns are located by name when reading. Rows whose values
/// break the baseline invariants are skipped with a warning.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{Array, ArrayRef, Float64Array, RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::reader::ChunkReader;

use crate::logging::{self, DataSource};
use crate::model::{GaugeSite, MonthDay, PercentileBaseline, StoreError, Thresholds};
use crate::store::write_atomic;

pub const PARTITION_FILE: &str = "data.parquet";
const PARTITION_PREFIX: &str = "state=";
const COLUMNS: [&str; 10] = [
    "site_id", "month_day", "p05", "p10", "p25", "p50", "p75", "p90", "p95", "count",
];

// ---------------------------------------------------------------------------
// In-memory partition
// ---------------------------------------------------------------------------

/// All baseline rows of one partition keyed by (site, calendar day).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaselineTable {
    rows: BTreeMap<(String, MonthDay), PercentileBaseline>,
}

impl BaselineTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows<I: IntoIterator<Item = PercentileBaseline>>(rows: I) -> Self {
        let mut table = Self::new();
        for row in rows {
            table.insert(row);
        }
        table
    }

    pub fn insert(&mut self, row: PercentileBaseline) {
        self.rows
            .insert((row.site_code.clone(), row.month_day), row);
    }

    /// Drop every row belonging to `site_code`.
    pub fn remove_site(&mut self, site_code: &str) {
        self.rows.retain(|(site, _), _| site != site_code);
    }

    pub fn get(&self, site_code: &str, month_day: MonthDay) -> Option<&PercentileBaseline> {
        self.rows.get(&(site_code.to_string(), month_day))
    }

    /// Rows in (site, month_day) order.
    pub fn rows(&self) -> impl Iterator<Item = &PercentileBaseline> {
        self.rows.values()
    }

    /// Distinct site codes, ascending.
    pub fn sites(&self) -> Vec<&str> {
        let mut sites: Vec<&str> = self.rows.keys().map(|(site, _)| site.as_str()).collect();
        sites.dedup();
        sites
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Parquet encoding
// ---------------------------------------------------------------------------

fn partition_schema() -> SchemaRef {
    let fields: Vec<Field> = COLUMNS
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let data_type = match i {
                0 | 1 => DataType::Utf8,
                9 => DataType::UInt32,
                _ => DataType::Float64,
            };
            Field::new(*name, data_type, false)
        })
        .collect();
    Arc::new(Schema::new(fields))
}

fn encode_err<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Encode(e.to_string())
}

/// Encode a partition as Parquet bytes.
pub fn encode_partition(table: &BaselineTable) -> Result<Vec<u8>, StoreError> {
    let rows: Vec<&PercentileBaseline> = table.rows().collect();

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(COLUMNS.len());
    columns.push(Arc::new(StringArray::from_iter_values(
        rows.iter().map(|r| r.site_code.as_str()),
    )));
    columns.push(Arc::new(StringArray::from_iter_values(
        rows.iter().map(|r| r.month_day.to_string()),
    )));
    for level in 0..7 {
        columns.push(Arc::new(Float64Array::from_iter_values(
            rows.iter().map(|r| r.thresholds.values()[level]),
        )));
    }
    columns.push(Arc::new(UInt32Array::from_iter_values(
        rows.iter().map(|r| r.sample_years),
    )));

    let batch = RecordBatch::try_new(partition_schema(), columns).map_err(encode_err)?;

    let mut buffer = Vec::new();
    let mut writer =
        ArrowWriter::try_new(&mut buffer, batch.schema(), None).map_err(encode_err)?;
    writer.write(&batch).map_err(encode_err)?;
    writer.close().map_err(encode_err)?;
    Ok(buffer)
}

fn column<'a, A: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a A, String> {
    batch
        .column_by_name(name)
        .ok_or_else(|| format!("missing column '{}'", name))?
        .as_any()
        .downcast_ref::<A>()
        .ok_or_else(|| format!("column '{}' has an unexpected type", name))
}

/// Typed view over the columns of one record batch.
struct PartitionColumns<'a> {
    sites: &'a StringArray,
    month_days: &'a StringArray,
    levels: Vec<&'a Float64Array>,
    counts: &'a UInt32Array,
}

impl<'a> PartitionColumns<'a> {
    fn from_batch(batch: &'a RecordBatch) -> Result<Self, String> {
        let levels = COLUMNS[2..9]
            .iter()
            .map(|name| column::<Float64Array>(batch, name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PartitionColumns {
            sites: column(batch, COLUMNS[0])?,
            month_days: column(batch, COLUMNS[1])?,
            levels,
            counts: column(batch, COLUMNS[9])?,
        })
    }

    fn has_null(&self, i: usize) -> bool {
        self.sites.is_null(i)
            || self.month_days.is_null(i)
            || self.counts.is_null(i)
            || self.levels.iter().any(|level| level.is_null(i))
    }

    fn row(&self, i: usize) -> Result<PercentileBaseline, String> {
        if self.has_null(i) {
            return Err("null value".to_string());
        }
        let month_day: MonthDay = self.month_days.value(i).parse()?;
        let mut values = [0.0; 7];
        for (value, level) in values.iter_mut().zip(&self.levels) {
            *value = level.value(i);
        }
        let baseline = PercentileBaseline {
            site_code: self.sites.value(i).to_string(),
            month_day,
            thresholds: Thresholds::from_values(values),
            sample_years: self.counts.value(i),
        };
        baseline.check()?;
        Ok(baseline)
    }
}

/// Read a Parquet partition. `origin` names the file in messages.
///
/// A file that cannot be read as a partition is a `StoreError::Decode`. A
/// single row with a bad calendar day, a zero count, or thresholds that are
/// negative, non-finite or decreasing is logged and left out.
pub fn decode_partition<R>(reader: R, origin: &str) -> Result<BaselineTable, StoreError>
where
    R: ChunkReader + 'static,
{
    let decode_err = |message: String| StoreError::Decode {
        path: origin.to_string(),
        message,
    };

    let batches = ParquetRecordBatchReaderBuilder::try_new(reader)
        .and_then(|builder| builder.build())
        .map_err(|e| decode_err(e.to_string()))?;

    let mut table = BaselineTable::new();
    let mut row_number = 0usize;
    for batch in batches {
        let batch = batch.map_err(|e| decode_err(e.to_string()))?;
        let columns = PartitionColumns::from_batch(&batch).map_err(decode_err)?;

        for i in 0..batch.num_rows() {
            row_number += 1;
            match columns.row(i) {
                Ok(baseline) => table.insert(baseline),
                Err(reason) => {
                    let site = (!columns.sites.is_null(i)).then(|| columns.sites.value(i));
                    logging::warn(
                        DataSource::Baselines,
                        site,
                        &format!("{} row {} skipped: {}", origin, row_number, reason),
                    );
                }
            }
        }
    }

    Ok(table)
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Partition directory rooted at `<data_dir>/reference_stats`.
#[derive(Debug, Clone)]
pub struct BaselineStore {
    root: PathBuf,
}

impl BaselineStore {
    pub fn new(data_dir: &Path) -> Self {
        BaselineStore {
            root: data_dir.join("reference_stats"),
        }
    }

    pub fn partition_path(&self, state: &str) -> PathBuf {
        self.root
            .join(format!("{}{}", PARTITION_PREFIX, state))
            .join(PARTITION_FILE)
    }

    /// Replace the whole partition for `state` in one atomic step.
    pub fn write_partition(&self, state: &str, table: &BaselineTable) -> Result<(), StoreError> {
        write_atomic(&self.partition_path(state), &encode_partition(table)?)
    }

    /// `None` when the state has no partition yet.
    pub fn load_partition(&self, state: &str) -> Result<Option<BaselineTable>, StoreError> {
        let path = self.partition_path(state);
        if !path.exists() {
            return Ok(None);
        }
        let file = fs::File::open(&path).map_err(|e| StoreError::io(&path, e))?;
        decode_partition(file, &path.display().to_string()).map(Some)
    }

    /// Baseline for one site on one calendar day.
    pub fn read(
        &self,
        site: &GaugeSite,
        month_day: MonthDay,
    ) -> Result<Option<PercentileBaseline>, StoreError> {
        Ok(self
            .load_partition(&site.state)?
            .and_then(|table| table.get(&site.site_code, month_day).cloned()))
    }

    /// States that currently have a partition file, ascending.
    pub fn list_available_states(&self) -> Result<Vec<String>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut states = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))? {
            let entry = entry.map_err(|e| StoreError::io(&self.root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(state) = name.strip_prefix(PARTITION_PREFIX) {
                if entry.path().join(PARTITION_FILE).is_file() {
                    states.push(state.to_string());
                }
            }
        }
        states.sort();
        Ok(states)
    }
}
