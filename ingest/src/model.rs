use common::config::Settings;
use common::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// One city to enrich. Travels through the queue as a JSON object with these
/// exact keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub city: String,
    pub region: String,
    pub country: String,
    pub country_code: String,
    #[serde(deserialize_with = "coordinate")]
    pub latitude: f64,
    #[serde(deserialize_with = "coordinate")]
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemIdentity {
    pub city: String,
    pub region: String,
    pub country_code: String,
}

impl fmt::Display for ItemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.country_code, self.region, self.city)
    }
}

impl WorkItem {
    pub fn identity(&self) -> ItemIdentity {
        ItemIdentity {
            city: self.city.clone(),
            region: self.region.clone(),
            country_code: self.country_code.clone(),
        }
    }
}

// Coordinates arrive as numbers from our own publisher but as strings from
// older producers that copied the CSV cells verbatim.
#[derive(Deserialize)]
#[serde(untagged)]
enum Coordinate {
    Number(f64),
    Text(String),
}

fn coordinate<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    match Coordinate::deserialize(deserializer)? {
        Coordinate::Number(value) => Ok(value),
        Coordinate::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// The two enrichment APIs; each writes its own raw stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Passes,
    Weather,
}

impl Stream {
    pub fn api_call_name(&self) -> &'static str {
        match self {
            Stream::Passes => "iss-passes",
            Stream::Weather => "iss-weather",
        }
    }

    pub fn raw_prefix<'a>(&self, settings: &'a Settings) -> &'a str {
        match self {
            Stream::Passes => &settings.passes.raw_prefix,
            Stream::Weather => &settings.weather.raw_prefix,
        }
    }

    pub fn secret_name<'a>(&self, settings: &'a Settings) -> &'a str {
        match self {
            Stream::Passes => &settings.passes.secret_name,
            Stream::Weather => &settings.weather.secret_name,
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Passes => write!(f, "passes"),
            Stream::Weather => write!(f, "weather"),
        }
    }
}

impl FromStr for Stream {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "passes" | "iss-passes" => Ok(Stream::Passes),
            "weather" | "iss-weather" => Ok(Stream::Weather),
            other => Err(Error::InvalidInput(format!("Unknown stream: {}", other))),
        }
    }
}
