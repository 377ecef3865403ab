// LanceDB vector database module
// Arrow layout of the published track table and similarity search over it


pub mod vector_store;

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, FixedSizeListArray, Float32Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;

use crate::RecsError;
use crate::pipeline::models::TrackRecord;

pub use vector_store::{IndexStatus, PublishReport, SearchHit, VectorStore};

/// Primary key field, holds the track id
pub const ID_FIELD: &str = "_id";
pub const EMBEDDING_FIELD: &str = "embeddings";
pub const TWO_D_FIELD: &str = "two_d_vectors";
pub const POPULARITY_FIELD: &str = "popularity";
pub const TRACK_NAME_FIELD: &str = "track_name";
pub const ARTIST_NAME_FIELD: &str = "artist_name";

fn vector_type(width: usize) -> DataType {
    DataType::FixedSizeList(
        Arc::new(Field::new("item", DataType::Float32, false)),
        width as i32,
    )
}

/// Schema of the one big table with the given embedding width
#[inline]
pub fn track_record_schema(dimensions: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new(ID_FIELD, DataType::Utf8, false),
        Field::new(EMBEDDING_FIELD, vector_type(dimensions), false),
        Field::new(TWO_D_FIELD, vector_type(2), false),
        Field::new(POPULARITY_FIELD, DataType::UInt64, false),
        Field::new(TRACK_NAME_FIELD, DataType::Utf8, false),
        Field::new(ARTIST_NAME_FIELD, DataType::Utf8, false),
    ]))
}

fn fixed_size_list(values: Vec<f32>, width: usize) -> Result<FixedSizeListArray, RecsError> {
    let field = Arc::new(Field::new("item", DataType::Float32, false));
    FixedSizeListArray::try_new(field, width as i32, Arc::new(Float32Array::from(values)), None)
        .map_err(|e| RecsError::Database(format!("Failed to create vector array: {}", e)))
}

/// Convert records to a RecordBatch, every embedding must have `dimensions` values
#[inline]
pub fn records_to_batch(
    records: &[TrackRecord],
    dimensions: usize,
) -> Result<RecordBatch, RecsError> {
    let len = records.len();

    let mut ids = Vec::with_capacity(len);
    let mut embeddings = Vec::with_capacity(len * dimensions);
    let mut coords = Vec::with_capacity(len * 2);
    let mut popularity = Vec::with_capacity(len);
    let mut track_names = Vec::with_capacity(len);
    let mut artist_names = Vec::with_capacity(len);

    for record in records {
        if record.embedding.len() != dimensions {
            return Err(RecsError::Database(format!(
                "Track {} has a {}-dimensional embedding, expected {}",
                record.track_id,
                record.embedding.len(),
                dimensions
            )));
        }
        ids.push(record.track_id.as_str());
        embeddings.extend_from_slice(&record.embedding);
        coords.extend_from_slice(&record.two_d_coords);
        popularity.push(record.popularity_count);
        track_names.push(record.track_name.as_str());
        artist_names.push(record.artist_name.as_str());
    }

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(fixed_size_list(embeddings, dimensions)?),
        Arc::new(fixed_size_list(coords, 2)?),
        Arc::new(UInt64Array::from(popularity)),
        Arc::new(StringArray::from(track_names)),
        Arc::new(StringArray::from(artist_names)),
    ];

    RecordBatch::try_new(track_record_schema(dimensions), arrays)
        .map_err(|e| RecsError::Database(format!("Failed to create record batch: {}", e)))
}

pub(crate) fn string_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a StringArray, RecsError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RecsError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RecsError::Database(format!("Invalid {} column type", name)))
}

pub(crate) fn vector_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<(&'a FixedSizeListArray, &'a Float32Array), RecsError> {
    let list = batch
        .column_by_name(name)
        .ok_or_else(|| RecsError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<FixedSizeListArray>()
        .ok_or_else(|| RecsError::Database(format!("Invalid {} column type", name)))?;
    let values = list
        .values()
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| RecsError::Database(format!("Invalid {} value type", name)))?;
    Ok((list, values))
}

pub(crate) fn vector_at(list: &FixedSizeListArray, values: &Float32Array, row: usize) -> Vec<f32> {
    let width = list.value_length() as usize;
    let start = list.value_offset(row) as usize;
    values.values()[start..start + width].to_vec()
}

/// Parse a batch with the one big table layout back into records
#[inline]
pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<TrackRecord>, RecsError> {
    let ids = string_column(batch, ID_FIELD)?;
    let (embeddings, embedding_values) = vector_column(batch, EMBEDDING_FIELD)?;
    let (coords, coord_values) = vector_column(batch, TWO_D_FIELD)?;
    let popularity = batch
        .column_by_name(POPULARITY_FIELD)
        .ok_or_else(|| RecsError::Database("Missing popularity column".to_string()))?
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| RecsError::Database("Invalid popularity column type".to_string()))?;
    let track_names = string_column(batch, TRACK_NAME_FIELD)?;
    let artist_names = string_column(batch, ARTIST_NAME_FIELD)?;

    let records = (0..batch.num_rows())
        .map(|row| {
            let xy = vector_at(coords, coord_values, row);
            TrackRecord {
                track_id: ids.value(row).to_string(),
                embedding: vector_at(embeddings, embedding_values, row),
                two_d_coords: [
                    xy.first().copied().unwrap_or_default(),
                    xy.get(1).copied().unwrap_or_default(),
                ],
                popularity_count: popularity.value(row),
                track_name: track_names.value(row).to_string(),
                artist_name: artist_names.value(row).to_string(),
            }
        })
        .collect();

    Ok(records)
}

/// Drain a LanceDB result stream
pub(crate) async fn collect_batches(
    stream: ::lancedb::arrow::SendableRecordBatchStream,
) -> Result<Vec<RecordBatch>, RecsError> {
    stream
        .try_collect::<Vec<_>>()
        .await
        .map_err(|e| RecsError::Database(format!("Failed to read result stream: {}", e)))
}

/// Quote a string literal for a LanceDB filter expression
pub(crate) fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
