use std::{fs::File, path::Path, sync::Arc};

use anyhow::{Context, Result};
use arrow::{
    array::{Array, ArrayRef, AsArray, ListArray, RecordBatch, StringArray},
    datatypes::{DataType, Float32Type, Float64Type, Int64Type, Schema},
};
use parquet::{
    arrow::{ArrowWriter, arrow_reader::ParquetRecordBatchReaderBuilder},
    basic::{Compression, ZstdLevel},
    file::properties::WriterProperties,
};
use tracing::debug;

use super::{error::DedupError, model::Record};

pub const ID_COLUMN: &str = "id";
pub const EMBEDDING_COLUMN: &str = "embedding";

/// Load every `{id, embedding}` row of a Parquet file, in file order.
///
/// Integer ids are turned into their decimal string. Float64 embeddings are
/// narrowed to f32. Other columns are ignored.
pub fn read_embedding_table(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet metadata of {}", path.display()))?;
    check_schema(builder.schema())?;
    let reader = builder.build().with_context(|| "read_embedding_table()")?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.with_context(|| format!("reading {}", path.display()))?;
        let offset = records.len();
        let ids = batch
            .column_by_name(ID_COLUMN)
            .ok_or(DedupError::MissingColumn(ID_COLUMN))?;
        let embeddings = batch
            .column_by_name(EMBEDDING_COLUMN)
            .ok_or(DedupError::MissingColumn(EMBEDDING_COLUMN))?;

        let ids = read_ids(ids, offset)?;
        let embeddings = read_embeddings(embeddings, offset)?;
        records.extend(
            ids.into_iter()
                .zip(embeddings)
                .map(|(id, embedding)| Record::new(id, embedding)),
        );
    }
    debug!("Loaded {} rows from {}", records.len(), path.display());
    Ok(records)
}

/// Write records as a two-column Parquet file, embeddings as a list of f32.
pub fn write_embedding_table(path: &Path, records: &[Record]) -> Result<()> {
    let ids = StringArray::from_iter_values(records.iter().map(|r| r.id.to_string()));
    let embeddings = ListArray::from_iter_primitive::<Float32Type, _, _>(
        records
            .iter()
            .map(|r| Some(r.embedding.iter().copied().map(Some).collect::<Vec<_>>())),
    );
    let batch = RecordBatch::try_from_iter([
        (ID_COLUMN, Arc::new(ids) as ArrayRef),
        (EMBEDDING_COLUMN, Arc::new(embeddings) as ArrayRef),
    ])?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::try_new(3)?))
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer
        .close()
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Both columns must exist with a supported type, even when there are no rows.
fn check_schema(schema: &Schema) -> Result<(), DedupError> {
    let column_type = move |name: &'static str| {
        schema
            .field_with_name(name)
            .map(|f| f.data_type())
            .map_err(|_| DedupError::MissingColumn(name))
    };

    let id_type = column_type(ID_COLUMN)?;
    if !matches!(id_type, DataType::Utf8 | DataType::LargeUtf8 | DataType::Int64) {
        return Err(unsupported(ID_COLUMN, id_type));
    }

    let embedding_type = column_type(EMBEDDING_COLUMN)?;
    let element = match embedding_type {
        DataType::List(field) | DataType::LargeList(field) | DataType::FixedSizeList(field, _) => {
            field.data_type()
        }
        other => return Err(unsupported(EMBEDDING_COLUMN, other)),
    };
    if !matches!(element, DataType::Float32 | DataType::Float64) {
        return Err(unsupported(EMBEDDING_COLUMN, embedding_type));
    }
    Ok(())
}

fn unsupported(column: &'static str, found: &DataType) -> DedupError {
    DedupError::UnsupportedColumnType {
        column,
        found: found.to_string(),
    }
}

fn read_ids(column: &ArrayRef, offset: usize) -> Result<Vec<String>, DedupError> {
    let values: Vec<Option<String>> = match column.data_type() {
        DataType::Utf8 => column
            .as_string::<i32>()
            .iter()
            .map(|v| v.map(str::to_owned))
            .collect(),
        DataType::LargeUtf8 => column
            .as_string::<i64>()
            .iter()
            .map(|v| v.map(str::to_owned))
            .collect(),
        DataType::Int64 => column
            .as_primitive::<Int64Type>()
            .iter()
            .map(|v| v.map(|n| n.to_string()))
            .collect(),
        other => return Err(unsupported(ID_COLUMN, other)),
    };
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            v.ok_or(DedupError::NullValue {
                column: ID_COLUMN,
                row: offset + i,
            })
        })
        .collect()
}

fn read_embeddings(column: &ArrayRef, offset: usize) -> Result<Vec<Vec<f32>>, DedupError> {
    let (element, rows): (&DataType, Vec<Option<ArrayRef>>) = match column.data_type() {
        DataType::List(field) => (field.data_type(), column.as_list::<i32>().iter().collect()),
        DataType::LargeList(field) => (field.data_type(), column.as_list::<i64>().iter().collect()),
        DataType::FixedSizeList(field, _) => (
            field.data_type(),
            column.as_fixed_size_list().iter().collect(),
        ),
        other => return Err(unsupported(EMBEDDING_COLUMN, other)),
    };
    if !matches!(element, DataType::Float32 | DataType::Float64) {
        return Err(unsupported(EMBEDDING_COLUMN, column.data_type()));
    }

    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            let null = DedupError::NullValue {
                column: EMBEDDING_COLUMN,
                row: offset + i,
            };
            match row {
                Some(values) if values.null_count() == 0 => Ok(to_f32(&values)),
                _ => Err(null),
            }
        })
        .collect()
}

fn to_f32(values: &ArrayRef) -> Vec<f32> {
    match values.data_type() {
        DataType::Float64 => values
            .as_primitive::<Float64Type>()
            .values()
            .iter()
            .map(|&v| v as f32)
            .collect(),
        _ => values.as_primitive::<Float32Type>().values().to_vec(),
    }
}
