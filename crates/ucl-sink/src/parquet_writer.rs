//! Columnar (Parquet/Snappy) fallback path (§4.5). Only primitive
//! physical types are supported: booleans as booleans, integers as
//! 64-bit, decimals/floats as doubles, everything else as length-prefixed
//! byte arrays (here: UTF-8 strings). Any failure propagates so the
//! caller can fall back to JSONL transparently.

use std::sync::Arc;

use arrow_array::{ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use ucl_core::RecordEnvelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhysicalType {
    Bool,
    Int,
    Float,
    Utf8,
}

fn physical_type(type_name: &str) -> PhysicalType {
    match type_name {
        "boolean" | "bool" => PhysicalType::Bool,
        "integer" | "int" | "long" => PhysicalType::Int,
        "number" | "float" | "double" | "decimal" => PhysicalType::Float,
        _ => PhysicalType::Utf8,
    }
}

fn parse_schema(schema: &serde_json::Value) -> anyhow::Result<Vec<(String, PhysicalType)>> {
    let fields = schema
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("schema must be a JSON object of field -> type"))?;
    Ok(fields
        .iter()
        .map(|(name, type_value)| {
            let type_name = type_value.as_str().unwrap_or("string");
            (name.clone(), physical_type(type_name))
        })
        .collect())
}

pub fn encode_parquet(envelopes: &[RecordEnvelope], schema: &serde_json::Value) -> anyhow::Result<Vec<u8>> {
    let fields = parse_schema(schema)?;
    if fields.is_empty() {
        anyhow::bail!("empty schema, nothing to encode columnar-ly");
    }

    let arrow_fields: Vec<Field> = fields
        .iter()
        .map(|(name, ty)| {
            let data_type = match ty {
                PhysicalType::Bool => DataType::Boolean,
                PhysicalType::Int => DataType::Int64,
                PhysicalType::Float => DataType::Float64,
                PhysicalType::Utf8 => DataType::Utf8,
            };
            Field::new(name, data_type, true)
        })
        .collect();
    let arrow_schema = Arc::new(Schema::new(arrow_fields));

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.len());
    for (name, ty) in &fields {
        let values: Vec<&serde_json::Value> = envelopes
            .iter()
            .map(|e| e.payload.get(name).unwrap_or(&serde_json::Value::Null))
            .collect();
        let array: ArrayRef = match ty {
            PhysicalType::Bool => Arc::new(BooleanArray::from(
                values.iter().map(|v| v.as_bool()).collect::<Vec<_>>(),
            )),
            PhysicalType::Int => Arc::new(Int64Array::from(
                values.iter().map(|v| v.as_i64()).collect::<Vec<_>>(),
            )),
            PhysicalType::Float => Arc::new(Float64Array::from(
                values.iter().map(|v| v.as_f64()).collect::<Vec<_>>(),
            )),
            PhysicalType::Utf8 => Arc::new(StringArray::from(
                values
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).or_else(|| (!v.is_null()).then(|| v.to_string())))
                    .collect::<Vec<_>>(),
            )),
        };
        columns.push(array);
    }

    let batch = RecordBatch::try_new(arrow_schema.clone(), columns)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, arrow_schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ucl_core::EnvelopeSource;

    fn envelope(i: i64) -> RecordEnvelope {
        RecordEnvelope {
            record_kind: "raw".to_string(),
            entity_kind: "test.item".to_string(),
            source: EnvelopeSource {
                endpoint_id: "ep".to_string(),
                source_family: "stub".to_string(),
                source_id: "ds".to_string(),
                url: None,
                external_id: Some(i.to_string()),
            },
            tenant_id: "tenant-1".to_string(),
            project_key: "TEST".to_string(),
            observed_at: Utc::now(),
            payload: serde_json::json!({"count": i, "label": format!("item-{i}"), "active": true}),
        }
    }

    #[test]
    fn encodes_mixed_primitive_schema_without_error() {
        let schema = serde_json::json!({"count": "integer", "label": "string", "active": "boolean"});
        let envelopes = vec![envelope(1), envelope(2)];
        let bytes = encode_parquet(&envelopes, &schema).unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn empty_schema_is_rejected_so_caller_falls_back() {
        let schema = serde_json::json!({});
        let err = encode_parquet(&[envelope(1)], &schema).unwrap_err();
        assert!(err.to_string().contains("empty schema"));
    }
}
