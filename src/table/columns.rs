//! Column access and row selection over Arrow record batches

use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{new_null_array, Array, ArrayRef, BooleanArray, Float64Array, StringArray};
use arrow::compute;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use nalgebra::DMatrix;

use crate::{Error, Result};

/// Zero-row batch with no columns (what an empty file set loads as)
#[must_use]
pub fn empty_batch() -> RecordBatch {
    RecordBatch::new_empty(Arc::new(Schema::empty()))
}

/// Look up a column by name.
///
/// # Errors
/// Returns [`Error::MissingColumn`] if `batch` has no column `name`.
pub fn column<'a>(batch: &'a RecordBatch, name: &str, table: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::missing_column(name, table))
}

/// Column rendered as strings (numeric keys included), nulls as `None`.
///
/// # Errors
/// Returns error if the column is missing or cannot be cast to text.
pub fn string_values(batch: &RecordBatch, name: &str, table: &str) -> Result<Vec<Option<String>>> {
    let casted = compute::cast(column(batch, name, table)?, &DataType::Utf8)?;
    let array = casted
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::StorageError(format!("Failed to downcast {name} to StringArray")))?;
    Ok(array.iter().map(|v| v.map(str::to_string)).collect())
}

/// Column as `f64`, nulls read as `0.0`.
///
/// # Errors
/// Returns [`Error::MissingColumn`] if the column is missing and
/// [`Error::InvalidInput`] if it is not numeric.
pub fn float_values(batch: &RecordBatch, name: &str, table: &str) -> Result<Vec<f64>> {
    let array = column(batch, name, table)?;
    let data_type = array.data_type();
    if !(data_type.is_numeric() || *data_type == DataType::Null) {
        return Err(Error::InvalidInput(format!(
            "Column {name} in {table} is {data_type}, not numeric"
        )));
    }
    let casted = compute::cast(array, &DataType::Float64)?;
    let array = casted
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| Error::StorageError(format!("Failed to downcast {name} to Float64Array")))?;
    Ok(array.iter().map(|v| v.unwrap_or(0.0)).collect())
}

/// Gather `columns` into a rows × columns matrix.
///
/// # Errors
/// Returns error if any column is missing or not numeric.
pub fn feature_matrix(batch: &RecordBatch, columns: &[String], table: &str) -> Result<DMatrix<f64>> {
    let values = columns
        .iter()
        .map(|name| float_values(batch, name, table))
        .collect::<Result<Vec<_>>>()?;
    Ok(DMatrix::from_fn(batch.num_rows(), columns.len(), |r, c| {
        values[c][r]
    }))
}

/// Keep rows where `mask` is true.
///
/// # Errors
/// Returns error if the mask length does not match the batch.
pub fn filter_rows(batch: &RecordBatch, mask: Vec<bool>) -> Result<RecordBatch> {
    if mask.len() != batch.num_rows() {
        return Err(Error::InvalidInput(format!(
            "Row mask has {} entries for {} rows",
            mask.len(),
            batch.num_rows()
        )));
    }
    Ok(compute::filter_record_batch(batch, &BooleanArray::from(mask))?)
}

/// Rows whose `column` renders exactly as `value`. An empty batch stays empty.
///
/// # Errors
/// Returns error if a non-empty batch lacks `column`.
pub fn rows_equal(batch: &RecordBatch, name: &str, value: &str, table: &str) -> Result<RecordBatch> {
    if batch.num_rows() == 0 {
        return Ok(batch.clone());
    }
    let mask = string_values(batch, name, table)?
        .iter()
        .map(|v| v.as_deref() == Some(value))
        .collect();
    filter_rows(batch, mask)
}

/// Distinct non-null values in first-appearance order.
///
/// # Errors
/// Returns error if a non-empty batch lacks `column`.
pub fn unique_strings(batch: &RecordBatch, name: &str, table: &str) -> Result<Vec<String>> {
    if batch.num_rows() == 0 {
        return Ok(Vec::new());
    }
    let mut seen = HashSet::new();
    Ok(string_values(batch, name, table)?
        .into_iter()
        .flatten()
        .filter(|v| seen.insert(v.clone()))
        .collect())
}

/// Select `names` in the given order.
///
/// # Errors
/// Returns error if any column is missing.
pub fn project(batch: &RecordBatch, names: &[String], table: &str) -> Result<RecordBatch> {
    let schema = batch.schema();
    let indices = names
        .iter()
        .map(|name| {
            schema
                .index_of(name)
                .map_err(|_| Error::missing_column(name.as_str(), table))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(batch.project(&indices)?)
}

/// Cast numeric columns to `Float64` with nulls and non-finite values set to
/// zero. Text columns are kept. All fields become nullable.
///
/// # Errors
/// Returns error if a cast fails.
pub fn normalize(batch: &RecordBatch) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields = Vec::with_capacity(schema.fields().len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        let data_type = field.data_type();
        if data_type.is_numeric() || *data_type == DataType::Null {
            let casted = compute::cast(array, &DataType::Float64)?;
            let values = casted
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| {
                    Error::StorageError(format!("Failed to downcast {} to Float64Array", field.name()))
                })?;
            let filled: Float64Array = values
                .iter()
                .map(|v| Some(v.filter(|x| x.is_finite()).unwrap_or(0.0)))
                .collect();
            fields.push(Field::new(field.name(), DataType::Float64, true));
            columns.push(Arc::new(filled));
        } else {
            fields.push(Field::new(field.name(), data_type.clone(), true));
            columns.push(Arc::clone(array));
        }
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Reshape `batch` to `schema`: reorder, cast, and fill absent columns
/// (`0.0` for `Float64`, null otherwise).
///
/// # Errors
/// Returns error if a cast fails.
pub fn align_to_schema(batch: &RecordBatch, schema: &Arc<Schema>) -> Result<RecordBatch> {
    let rows = batch.num_rows();
    let columns = schema
        .fields()
        .iter()
        .map(|field| -> Result<ArrayRef> {
            match batch.column_by_name(field.name()) {
                Some(array) if array.data_type() == field.data_type() => Ok(Arc::clone(array)),
                Some(array) => Ok(compute::cast(array, field.data_type())?),
                None if *field.data_type() == DataType::Float64 => {
                    Ok(Arc::new(Float64Array::from(vec![0.0; rows])))
                }
                None => Ok(new_null_array(field.data_type(), rows)),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(RecordBatch::try_new(Arc::clone(schema), columns)?)
}

/// Concatenate same-kind tables under their merged schema.
///
/// # Errors
/// Returns error if two tables disagree on a column's type.
pub fn concat_tables(batches: &[RecordBatch]) -> Result<RecordBatch> {
    if batches.is_empty() {
        return Ok(empty_batch());
    }
    let merged = Arc::new(Schema::try_merge(
        batches.iter().map(|b| b.schema().as_ref().clone()),
    )?);
    let aligned = batches
        .iter()
        .map(|b| align_to_schema(b, &merged))
        .collect::<Result<Vec<_>>>()?;
    Ok(compute::concat_batches(&merged, &aligned)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("Track_ID", DataType::Utf8, true),
            Field::new("Hail_Size", DataType::Float64, true),
            Field::new("Count", DataType::Int64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![Some("t1"), Some("t2"), Some("t1")])),
                Arc::new(Float64Array::from(vec![Some(1.5), None, Some(f64::INFINITY)])),
                Arc::new(Int64Array::from(vec![Some(3), Some(4), None])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_normalize_fills_nulls_and_non_finite() {
        let normalized = normalize(&batch()).unwrap();
        assert_eq!(
            float_values(&normalized, "Hail_Size", "t").unwrap(),
            vec![1.5, 0.0, 0.0]
        );
        assert_eq!(
            normalized.schema().field_with_name("Count").unwrap().data_type(),
            &DataType::Float64
        );
        assert_eq!(float_values(&normalized, "Count", "t").unwrap(), vec![3.0, 4.0, 0.0]);
        assert_eq!(
            normalized.schema().field_with_name("Track_ID").unwrap().data_type(),
            &DataType::Utf8
        );
    }

    #[test]
    fn test_rows_equal_and_unique() {
        let b = batch();
        assert_eq!(rows_equal(&b, "Track_ID", "t1", "t").unwrap().num_rows(), 2);
        assert_eq!(unique_strings(&b, "Track_ID", "t").unwrap(), vec!["t1", "t2"]);
    }

    #[test]
    fn test_rows_equal_on_empty_batch_needs_no_column() {
        let out = rows_equal(&empty_batch(), "Microphysics", "A", "combo").unwrap();
        assert_eq!(out.num_rows(), 0);
    }

    #[test]
    fn test_missing_column_is_reported() {
        let err = float_values(&batch(), "Nope", "step").unwrap_err();
        assert!(matches!(err, Error::MissingColumn { .. }));
    }

    #[test]
    fn test_text_column_is_not_read_as_numbers() {
        let err = float_values(&batch(), "Track_ID", "combo").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(msg) if msg.contains("Track_ID")));
        let err = feature_matrix(&batch(), &["Track_ID".to_string()], "combo").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_feature_matrix_layout() {
        let b = normalize(&batch()).unwrap();
        let m = feature_matrix(&b, &["Hail_Size".to_string(), "Count".to_string()], "t").unwrap();
        assert_eq!(m.shape(), (3, 2));
        assert!((m[(0, 0)] - 1.5).abs() < f64::EPSILON);
        assert!((m[(1, 1)] - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concat_fills_absent_columns() {
        let a = normalize(&batch()).unwrap();
        let b = project(&a, &["Track_ID".to_string(), "Count".to_string()], "t").unwrap();
        let combined = concat_tables(&[a, b]).unwrap();
        assert_eq!(combined.num_rows(), 6);
        let sizes = float_values(&combined, "Hail_Size", "t").unwrap();
        assert_eq!(&sizes[3..], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_concat_of_nothing_is_empty() {
        assert_eq!(concat_tables(&[]).unwrap().num_rows(), 0);
    }
}
