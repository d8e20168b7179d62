use arrow::array::{Array, AsArray};
use arrow::datatypes::{DataType, Float32Type, Float64Type, Int32Type, Int64Type, UInt64Type};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use common::Result;
use serde_json::{Map, Number, Value};

/// Converts query output into one JSON object per row, columns in schema order.
pub fn batches_to_rows(batches: &[RecordBatch]) -> Result<Vec<Map<String, Value>>> {
    let mut rows = Vec::new();

    for batch in batches {
        let schema = batch.schema();
        for row_idx in 0..batch.num_rows() {
            let mut row = Map::new();
            for (col_idx, field) in schema.fields().iter().enumerate() {
                let value = arrow_value_to_json(batch.column(col_idx).as_ref(), row_idx)?;
                row.insert(field.name().clone(), value);
            }
            rows.push(row);
        }
    }

    Ok(rows)
}

pub fn arrow_value_to_json(array: &dyn Array, index: usize) -> Result<Value> {
    if array.is_null(index) {
        return Ok(Value::Null);
    }

    Ok(match array.data_type() {
        DataType::Boolean => Value::Bool(array.as_boolean().value(index)),
        DataType::Int32 => Value::from(array.as_primitive::<Int32Type>().value(index)),
        DataType::Int64 => Value::from(array.as_primitive::<Int64Type>().value(index)),
        DataType::UInt64 => Value::from(array.as_primitive::<UInt64Type>().value(index)),
        DataType::Float32 => float(array.as_primitive::<Float32Type>().value(index) as f64),
        DataType::Float64 => float(array.as_primitive::<Float64Type>().value(index)),
        DataType::Utf8 => Value::String(array.as_string::<i32>().value(index).to_string()),
        DataType::LargeUtf8 => Value::String(array.as_string::<i64>().value(index).to_string()),
        DataType::Utf8View => Value::String(array.as_string_view().value(index).to_string()),
        DataType::Struct(fields) => {
            let array = array.as_struct();
            let mut object = Map::new();
            for (child, field) in array.columns().iter().zip(fields.iter()) {
                object.insert(field.name().clone(), arrow_value_to_json(child.as_ref(), index)?);
            }
            Value::Object(object)
        }
        _ => Value::String(array_value_to_string(array, index)?),
    })
}

// NaN and infinities have no JSON form.
fn float(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    #[test]
    fn rows_keep_column_order_and_nulls() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("city", DataType::Utf8, true),
            Field::new("lat", DataType::Float64, true),
            Field::new("startUTC", DataType::Int64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![Some("Perth"), Some("Darwin")])),
                Arc::new(Float64Array::from(vec![Some(-31.9522), None])),
                Arc::new(Int64Array::from(vec![Some(1618300000), None])),
            ],
        )
        .unwrap();

        let rows = batches_to_rows(&[batch]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].keys().collect::<Vec<_>>(), ["city", "lat", "startUTC"]);
        assert_eq!(rows[0]["lat"], -31.9522);
        assert_eq!(rows[1]["lat"], Value::Null);
        assert_eq!(rows[1]["startUTC"], Value::Null);
    }
}
