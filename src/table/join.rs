//! Hash joins and de-duplication over record batches
//!
//! Joins are inner joins that keep the left table's row order, which is what
//! keeps each track's steps in the order of its GeoJSON features.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arrow::array::{ArrayRef, UInt32Array};
use arrow::compute;
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;

use super::columns::{empty_batch, filter_rows, string_values};
use crate::{Error, Result};

/// One side of a join: the table and a name for error messages.
#[derive(Debug, Clone, Copy)]
pub struct JoinSide<'a> {
    /// Table rows
    pub batch: &'a RecordBatch,
    /// Table name used in errors
    pub name: &'a str,
    /// Suffix appended to non-key columns that also exist on the other side
    pub suffix: &'a str,
}

impl<'a> JoinSide<'a> {
    /// Describe a join input
    #[must_use]
    pub const fn new(batch: &'a RecordBatch, name: &'a str, suffix: &'a str) -> Self {
        Self {
            batch,
            name,
            suffix,
        }
    }
}

/// Inner join `left` and `right` on `key`.
///
/// Output rows follow `left` order; each left row repeats once per matching
/// right row. Null keys never match. The key column appears once, taken from
/// `left`. If either side is empty and lacks the key, the result is an empty
/// batch.
///
/// # Errors
/// Returns [`Error::MissingColumn`] if a non-empty side lacks `key`.
pub fn inner_join(left: JoinSide<'_>, right: JoinSide<'_>, key: &str) -> Result<RecordBatch> {
    let has_key = |side: &JoinSide<'_>| side.batch.column_by_name(key).is_some();
    if (left.batch.num_rows() == 0 && !has_key(&left))
        || (right.batch.num_rows() == 0 && !has_key(&right))
    {
        return Ok(empty_batch());
    }

    let left_keys = string_values(left.batch, key, left.name)?;
    let right_keys = string_values(right.batch, key, right.name)?;

    let mut index: HashMap<&str, Vec<u32>> = HashMap::new();
    for (row, k) in right_keys.iter().enumerate() {
        if let Some(k) = k {
            index.entry(k.as_str()).or_default().push(to_u32(row)?);
        }
    }

    let mut left_rows = Vec::new();
    let mut right_rows = Vec::new();
    for (row, k) in left_keys.iter().enumerate() {
        let Some(matches) = k.as_deref().and_then(|k| index.get(k)) else {
            continue;
        };
        for &r in matches {
            left_rows.push(to_u32(row)?);
            right_rows.push(r);
        }
    }
    let left_take = UInt32Array::from(left_rows);
    let right_take = UInt32Array::from(right_rows);

    let left_schema = left.batch.schema();
    let right_schema = right.batch.schema();
    let overlaps = |name: &str, other: &Schema| name != key && other.column_with_name(name).is_some();

    let mut fields = Vec::new();
    let mut columns: Vec<ArrayRef> = Vec::new();
    for (field, array) in left_schema.fields().iter().zip(left.batch.columns()) {
        let name = if overlaps(field.name(), right_schema.as_ref()) {
            format!("{}{}", field.name(), left.suffix)
        } else {
            field.name().clone()
        };
        fields.push(Field::new(name, field.data_type().clone(), true));
        columns.push(compute::take(array.as_ref(), &left_take, None)?);
    }
    for (field, array) in right_schema.fields().iter().zip(right.batch.columns()) {
        if field.name() == key {
            continue;
        }
        let name = if overlaps(field.name(), left_schema.as_ref()) {
            format!("{}{}", field.name(), right.suffix)
        } else {
            field.name().clone()
        };
        fields.push(Field::new(name, field.data_type().clone(), true));
        columns.push(compute::take(array.as_ref(), &right_take, None)?);
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Drop rows whose `key` was already seen, keeping the first occurrence.
///
/// # Errors
/// Returns [`Error::MissingColumn`] if a non-empty batch lacks `key`.
pub fn dedupe_on(batch: &RecordBatch, key: &str, table: &str) -> Result<RecordBatch> {
    if batch.num_rows() == 0 {
        return Ok(batch.clone());
    }
    let mut seen = HashSet::new();
    let mask = string_values(batch, key, table)?
        .into_iter()
        .map(|k| seen.insert(k))
        .collect();
    filter_rows(batch, mask)
}

fn to_u32(row: usize) -> Result<u32> {
    u32::try_from(row).map_err(|_| Error::StorageError(format!("Row index {row} exceeds u32")))
}
