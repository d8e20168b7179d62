use arrow::datatypes::{DataType, Field, Fields, Schema, SchemaRef};
use ingest::model::Stream;
use once_cell::sync::Lazy;
use std::sync::Arc;

// Raw NDJSON schemas. Every column is nullable: a city without passes has no
// pass columns, and absent keys read as NULL.

pub fn raw_passes_schema() -> Schema {
    Schema::new(vec![
        Field::new("city", DataType::Utf8, true),
        Field::new("lat", DataType::Float64, true),
        Field::new("lon", DataType::Float64, true),
        Field::new("region", DataType::Utf8, true),
        Field::new("country", DataType::Utf8, true),
        Field::new("satid", DataType::Int64, true),
        Field::new("satname", DataType::Utf8, true),
        Field::new("transactionscount", DataType::Int64, true),
        Field::new("passescount", DataType::Int64, true),
        Field::new("startAz", DataType::Float64, true),
        Field::new("startAzCompass", DataType::Utf8, true),
        Field::new("startEl", DataType::Float64, true),
        Field::new("startUTC", DataType::Int64, true),
        Field::new("maxAz", DataType::Float64, true),
        Field::new("maxAzCompass", DataType::Utf8, true),
        Field::new("maxEl", DataType::Float64, true),
        Field::new("maxUTC", DataType::Int64, true),
        Field::new("endAz", DataType::Float64, true),
        Field::new("endAzCompass", DataType::Utf8, true),
        Field::new("endEl", DataType::Float64, true),
        Field::new("endUTC", DataType::Int64, true),
        Field::new("mag", DataType::Float64, true),
        Field::new("duration", DataType::Int64, true),
        Field::new("startVisibility", DataType::Int64, true),
    ])
}

fn one_hour_volume() -> DataType {
    DataType::Struct(Fields::from(vec![Field::new("1h", DataType::Float64, true)]))
}

pub fn raw_weather_schema() -> Schema {
    Schema::new(vec![
        Field::new("city", DataType::Utf8, true),
        Field::new("lat", DataType::Float64, true),
        Field::new("lon", DataType::Float64, true),
        Field::new("region", DataType::Utf8, true),
        Field::new("country", DataType::Utf8, true),
        Field::new("timezone", DataType::Utf8, true),
        Field::new("timezone_offset", DataType::Int64, true),
        Field::new("dt", DataType::Int64, true),
        Field::new("temp", DataType::Float64, true),
        Field::new("feels_like", DataType::Float64, true),
        Field::new("pressure", DataType::Int64, true),
        Field::new("humidity", DataType::Int64, true),
        Field::new("dew_point", DataType::Float64, true),
        Field::new("uvi", DataType::Float64, true),
        Field::new("clouds", DataType::Int64, true),
        Field::new("visibility", DataType::Int64, true),
        Field::new("wind_speed", DataType::Float64, true),
        Field::new("wind_deg", DataType::Int64, true),
        Field::new("wind_gust", DataType::Float64, true),
        Field::new("pop", DataType::Float64, true),
        Field::new("id", DataType::Int64, true),
        Field::new("main", DataType::Utf8, true),
        Field::new("description", DataType::Utf8, true),
        Field::new("icon", DataType::Utf8, true),
        Field::new("rain", one_hour_volume(), true),
        Field::new("snow", one_hour_volume(), true),
    ])
}

static RAW_PASSES_SCHEMA: Lazy<SchemaRef> = Lazy::new(|| Arc::new(raw_passes_schema()));
static RAW_WEATHER_SCHEMA: Lazy<SchemaRef> = Lazy::new(|| Arc::new(raw_weather_schema()));

pub fn raw_schema(stream: Stream) -> SchemaRef {
    match stream {
        Stream::Passes => Arc::clone(&RAW_PASSES_SCHEMA),
        Stream::Weather => Arc::clone(&RAW_WEATHER_SCHEMA),
    }
}

/// Columns that identify one record of the stream; two lines sharing all of
/// them are duplicates.
pub fn row_key_columns(stream: Stream) -> &'static [&'static str] {
    match stream {
        Stream::Passes => &["city", "region", "country", "startUTC"],
        Stream::Weather => &["city", "region", "country", "dt"],
    }
}

/// Columns that must never be NULL in the raw stream.
pub fn required_columns(stream: Stream) -> &'static [&'static str] {
    match stream {
        Stream::Passes => &["city", "lat", "lon", "region", "country", "satname"],
        // `dt` stays optional: a response without hourly data still yields one
        // record carrying only the item and call fields.
        Stream::Weather => &["city", "lat", "lon", "region", "country", "timezone"],
    }
}

/// Pass columns carried into the final table, in output order.
pub const FINAL_PASS_COLUMNS: &[&str] = &[
    "city", "region", "country", "lat", "lon", "satname", "startUTC", "maxUTC", "endUTC",
    "maxEl", "mag", "duration",
];

/// Weather columns joined onto each pass, from the hour the pass starts in.
pub const FINAL_WEATHER_COLUMNS: &[&str] = &[
    "temp", "feels_like", "humidity", "clouds", "visibility", "wind_speed", "main", "description",
];

/// A final row is one pass, so the pass key identifies it.
pub const FINAL_KEY_COLUMNS: &[&str] = &["city", "region", "country", "startUTC"];

/// Hour of the weather row joined onto a pass.
pub const FINAL_WEATHER_TIME: &str = "weather_dt";

fn pick(schema: &Schema, columns: &[&str]) -> Vec<Field> {
    columns
        .iter()
        .filter_map(|column| schema.field_with_name(column).ok())
        .map(|field| field.clone().with_nullable(true))
        .collect()
}

pub fn final_schema() -> Schema {
    let mut fields = pick(&raw_passes_schema(), FINAL_PASS_COLUMNS);
    fields.push(Field::new(FINAL_WEATHER_TIME, DataType::Int64, true));
    fields.extend(pick(&raw_weather_schema(), FINAL_WEATHER_COLUMNS));
    Schema::new(fields)
}

static FINAL_SCHEMA: Lazy<SchemaRef> = Lazy::new(|| Arc::new(final_schema()));

pub fn final_schema_ref() -> SchemaRef {
    Arc::clone(&FINAL_SCHEMA)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_and_required_columns_exist_in_schema() {
        for stream in [Stream::Passes, Stream::Weather] {
            let schema = raw_schema(stream);
            for column in row_key_columns(stream).iter().chain(required_columns(stream)) {
                assert!(schema.field_with_name(column).is_ok(), "{stream}: {column}");
            }
        }
    }

    #[test]
    fn final_schema_has_every_selected_column() {
        let schema = final_schema();
        assert_eq!(
            schema.fields().len(),
            FINAL_PASS_COLUMNS.len() + FINAL_WEATHER_COLUMNS.len() + 1
        );
        for column in FINAL_KEY_COLUMNS {
            assert!(schema.field_with_name(column).is_ok(), "{column}");
        }
        assert_eq!(schema.field_with_name("temp").unwrap().data_type(), &DataType::Float64);
        assert_eq!(schema.field_with_name(FINAL_WEATHER_TIME).unwrap().data_type(), &DataType::Int64);
    }

    #[test]
    fn weather_time_is_not_required() {
        assert!(!required_columns(Stream::Weather).contains(&"dt"));
        assert!(row_key_columns(Stream::Weather).contains(&"dt"));
    }

    #[test]
    fn coordinates_are_doubles() {
        for stream in [Stream::Passes, Stream::Weather] {
            let schema = raw_schema(stream);
            assert_eq!(schema.field_with_name("lat").unwrap().data_type(), &DataType::Float64);
            assert_eq!(schema.field_with_name("lon").unwrap().data_type(), &DataType::Float64);
        }
    }
}
