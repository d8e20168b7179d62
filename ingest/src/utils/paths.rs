use crate::model::{ItemIdentity, WorkItem};
use chrono::{Datelike, NaiveDate};
use common::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static PARTITION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"year=(?P<year>\d{4})/month=(?P<month>\d{2})/day=(?P<day>\d{2})/(?P<file>[^/]+)$")
        .expect("Invalid partition regex")
});

static FILE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<cc>[^-]+)-(?P<region>.*)-(?P<date>\d{4}_\d{2}_\d{2})-(?P<city>.*)-utc\.json$")
        .expect("Invalid raw file name regex")
});

/// Builds raw-object keys for one stream prefix and ingestion day.
pub struct PathBuilder {
    prefix: String,
    day: NaiveDate,
}

impl PathBuilder {
    pub fn new(prefix: &str, day: NaiveDate) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            day,
        }
    }

    /// `{prefix}/year=YYYY/month=MM/day=DD`, without a trailing slash.
    pub fn build_partition_prefix(&self) -> String {
        format!(
            "{}/year={}/month={:02}/day={:02}",
            self.prefix,
            self.day.year(),
            self.day.month(),
            self.day.day()
        )
    }

    pub fn build_file_name(&self, api_call: &str, item: &WorkItem) -> String {
        format!(
            "{}-{}-{}-{}-{}-utc.json",
            api_call,
            item.country_code,
            item.region,
            self.day.format("%Y_%m_%d"),
            item.city
        )
    }

    /// The key is a pure function of (api call, item identity, day); a rerun on
    /// the same day overwrites the earlier object.
    pub fn build_object_key(&self, api_call: &str, item: &WorkItem) -> String {
        format!(
            "{}/{}",
            self.build_partition_prefix(),
            self.build_file_name(api_call, item)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawKeyComponents {
    pub identity: ItemIdentity,
    pub day: NaiveDate,
}

/// Parses a raw-object key written by [`PathBuilder::build_object_key`] for
/// `api_call`. Keys from other api calls are rejected.
pub fn parse_raw_object_key(key: &str, api_call: &str) -> Result<RawKeyComponents> {
    let invalid = || Error::InvalidInput(format!("Failed to parse raw object key: {}", key));

    let caps = PARTITION_REGEX.captures(key).ok_or_else(invalid)?;
    let year = caps["year"].parse::<i32>().map_err(|_| invalid())?;
    let month = caps["month"].parse::<u32>().map_err(|_| invalid())?;
    let day = caps["day"].parse::<u32>().map_err(|_| invalid())?;
    let partition_day = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)?;

    let file = caps["file"]
        .strip_prefix(api_call)
        .and_then(|rest| rest.strip_prefix('-'))
        .ok_or_else(invalid)?;
    let file_caps = FILE_NAME_REGEX.captures(file).ok_or_else(invalid)?;

    let file_day =
        NaiveDate::parse_from_str(&file_caps["date"], "%Y_%m_%d").map_err(|_| invalid())?;
    if file_day != partition_day {
        return Err(Error::InvalidInput(format!(
            "Raw object key {} has date {} outside its partition {}",
            key, file_day, partition_day
        )));
    }

    Ok(RawKeyComponents {
        identity: ItemIdentity {
            city: file_caps["city"].to_string(),
            region: file_caps["region"].to_string(),
            country_code: file_caps["cc"].to_string(),
        },
        day: partition_day,
    })
}
