use crate::model::WorkItem;
use crate::storage::s3::ObjectStorage;
use common::{Error, Result};
use std::collections::HashMap;
use tracing::{error, info};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const MAX_LATITUDE: f64 = 90.0;
const MAX_LONGITUDE: f64 = 180.0;
const COLUMNS: [&str; 6] = ["city", "region", "country", "country_code", "latitude", "longitude"];

/// Loads the city list stored at `{source_prefix}/{source_name}`.
///
/// The file must be a CSV with a header row; columns are looked up by name so
/// their order does not matter and extra columns are ignored.
pub async fn enumerate_work_items(
    storage: &dyn ObjectStorage,
    source_prefix: &str,
    source_name: &str,
) -> Result<Vec<WorkItem>> {
    if !source_name.ends_with(".csv") {
        error!(source = %source_name, "Invalid file extension, expected .csv");
        return Err(Error::InputFormat(format!(
            "Invalid file extension for: {}, expected .csv",
            source_name
        )));
    }

    let key = format!("{}/{}", source_prefix.trim_end_matches('/'), source_name);
    if !storage.check_file_exists(&key).await? {
        error!(source = %key, bucket = %storage.bucket(), "Source file not found");
        return Err(Error::InvalidInput(format!(
            "Source file {} does not exist in {}",
            key,
            storage.bucket()
        )));
    }
    let body = storage.get_object(&key).await?;
    let items = parse_work_items(&body)?;

    info!(
        source = %key,
        count = items.len(),
        first = ?items.first().map(|item| &item.city),
        "Enumerated work items"
    );
    Ok(items)
}

pub fn parse_work_items(body: &[u8]) -> Result<Vec<WorkItem>> {
    let body = body.strip_prefix(UTF8_BOM).unwrap_or(body);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(body);

    let headers = reader
        .headers()
        .map_err(|e| Error::InputFormat(format!("Unreadable header row: {}", e)))?
        .clone();
    let index: HashMap<&str, usize> = headers.iter().enumerate().map(|(i, h)| (h, i)).collect();

    let mut positions = [0usize; COLUMNS.len()];
    for (slot, column) in positions.iter_mut().zip(COLUMNS) {
        *slot = *index
            .get(column)
            .ok_or_else(|| Error::InputFormat(format!("Missing column: {}", column)))?;
    }
    let [city, region, country, country_code, latitude, longitude] = positions;

    let mut items = Vec::new();
    for (row, record) in reader.records().enumerate() {
        // Header is line 1.
        let line = row + 2;
        let record = record.map_err(|e| Error::InputFormat(format!("Line {}: {}", line, e)))?;
        let field = |i: usize| record.get(i).unwrap_or_default().to_string();
        let coordinate = |i: usize, name: &str, limit: f64| -> Result<f64> {
            let raw = record.get(i).unwrap_or_default();
            let value = raw
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| {
                    Error::InputFormat(format!("Line {}: {} '{}' is not a number", line, name, raw))
                })?;
            if value.abs() > limit {
                return Err(Error::InputFormat(format!(
                    "Line {}: {} {} is outside [-{}, {}]",
                    line, name, value, limit, limit
                )));
            }
            Ok(value)
        };

        items.push(WorkItem {
            city: field(city),
            region: field(region),
            country: field(country),
            country_code: field(country_code),
            latitude: coordinate(latitude, "latitude", MAX_LATITUDE)?,
            longitude: coordinate(longitude, "longitude", MAX_LONGITUDE)?,
        });
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::s3::ObjectStoreStorage;
    use object_store::memory::InMemory;
    use std::sync::Arc;

    const CITIES: &str = "city,region,country,country_code,latitude,longitude\n\
        Perth,Western Australia,Australia,AUS,-31.9522,115.8589\n\
        Oslo,Oslo,Norway,NOR,59.9139,10.7522\n";

    #[test]
    fn parses_rows_in_file_order() {
        let items = parse_work_items(CITIES.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].city, "Perth");
        assert_eq!(items[0].region, "Western Australia");
        assert_eq!(items[0].latitude, -31.9522);
        assert_eq!(items[1].country_code, "NOR");
    }

    #[test]
    fn header_order_is_free_and_bom_is_stripped() {
        let body = "\u{feff}country_code,longitude,latitude,city,country,region,population\n\
            AUS,115.8589,-31.9522,Perth,Australia,Western Australia,2100000\n";
        let items = parse_work_items(body.as_bytes()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].city, "Perth");
        assert_eq!(items[0].longitude, 115.8589);
    }

    #[test]
    fn missing_column_is_an_input_format_error() {
        let body = "city,region,country,latitude,longitude\nPerth,WA,Australia,-31.9,115.8\n";
        let err = parse_work_items(body.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InputFormat(ref msg) if msg.contains("country_code")));
    }

    #[test]
    fn bad_coordinate_names_the_line() {
        let body = "city,region,country,country_code,latitude,longitude\nPerth,WA,Australia,AUS,south,115.8\n";
        let err = parse_work_items(body.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InputFormat(ref msg) if msg.contains("Line 2")));
    }

    #[test]
    fn non_finite_coordinates_are_rejected() {
        for (lat, lon) in [("NaN", "115.8589"), ("-31.9522", "inf"), ("-inf", "115.8589")] {
            let body = format!(
                "city,region,country,country_code,latitude,longitude\nPerth,WA,Australia,AUS,{},{}\n",
                lat, lon
            );
            let err = parse_work_items(body.as_bytes()).unwrap_err();
            assert!(
                matches!(err, Error::InputFormat(ref msg) if msg.contains("Line 2") && msg.contains("is not a number")),
                "{lat},{lon}: {err}"
            );
        }
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let body = "city,region,country,country_code,latitude,longitude\n\
            Perth,WA,Australia,AUS,-31.9522,115.8589\n\
            Nowhere,WA,Australia,AUS,-91.0,115.8589\n";
        let err = parse_work_items(body.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InputFormat(ref msg) if msg.contains("Line 3") && msg.contains("latitude")));

        let body = "city,region,country,country_code,latitude,longitude\nPerth,WA,Australia,AUS,-31.9,180.5\n";
        let err = parse_work_items(body.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InputFormat(ref msg) if msg.contains("longitude")));
    }

    #[tokio::test]
    async fn rejects_non_csv_source_before_reading() {
        let storage = ObjectStoreStorage::new(Arc::new(InMemory::new()), "input");
        let err = enumerate_work_items(&storage, "input_data", "cities.xlsx").await.unwrap_err();
        assert!(matches!(err, Error::InputFormat(_)));
    }

    #[tokio::test]
    async fn missing_source_names_the_key() {
        let storage = ObjectStoreStorage::new(Arc::new(InMemory::new()), "input");
        let err = enumerate_work_items(&storage, "input_data", "cities.csv").await.unwrap_err();
        assert!(
            matches!(err, Error::InvalidInput(ref msg) if msg.contains("input_data/cities.csv")),
            "{err}"
        );
    }

    #[tokio::test]
    async fn reads_source_from_prefix_and_name() {
        let storage = ObjectStoreStorage::new(Arc::new(InMemory::new()), "input");
        storage.put_object("input_data/cities.csv", CITIES.as_bytes()).await.unwrap();

        let items = enumerate_work_items(&storage, "input_data/", "cities.csv").await.unwrap();
        assert_eq!(items.len(), 2);
    }
}
