//! CSV rows exchanged between extract and transform.

use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::ports::{StageError, WeatherReading};

pub const RAW_HEADER: [&str; 6] = [
    "City",
    "Temperature",
    "Description",
    "Humidity",
    "Wind Speed",
    "Visibility",
];

pub const TRANSFORMED_HEADER: [&str; 6] = [
    "City",
    "Temperature_F",
    "Description_Simplified",
    "Humidity_Normalized",
    "Wind Speed_km/h",
    "Visibility_km",
];

/// One city in a `raw/` file. Metric units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    #[serde(rename = "City")]
    pub city: String,
    #[serde(rename = "Temperature")]
    pub temperature_c: f64,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Humidity")]
    pub humidity_pct: f64,
    #[serde(rename = "Wind Speed")]
    pub wind_speed_ms: f64,
    #[serde(rename = "Visibility")]
    pub visibility_m: Option<f64>,
}

impl From<WeatherReading> for RawRow {
    fn from(r: WeatherReading) -> Self {
        Self {
            city: r.city,
            temperature_c: r.temperature_c,
            description: r.description,
            humidity_pct: r.humidity_pct,
            wind_speed_ms: r.wind_speed_ms,
            visibility_m: r.visibility_m,
        }
    }
}

/// One city in a `transformed/` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedRow {
    #[serde(rename = "City")]
    pub city: String,
    #[serde(rename = "Temperature_F")]
    pub temperature_f: f64,
    #[serde(rename = "Description_Simplified")]
    pub description_simplified: String,
    #[serde(rename = "Humidity_Normalized")]
    pub humidity_normalized: f64,
    #[serde(rename = "Wind Speed_km/h")]
    pub wind_speed_kmh: f64,
    #[serde(rename = "Visibility_km")]
    pub visibility_km: Option<f64>,
}

impl RawRow {
    pub fn transform(&self) -> TransformedRow {
        TransformedRow {
            city: self.city.clone(),
            temperature_f: self.temperature_c * 9.0 / 5.0 + 32.0,
            description_simplified: self
                .description
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string(),
            humidity_normalized: self.humidity_pct / 100.0,
            wind_speed_kmh: self.wind_speed_ms * 3.6,
            visibility_km: self.visibility_m.map(|m| m / 1000.0),
        }
    }
}

/// The header row is always written, even with no rows.
pub fn encode<T: Serialize>(header: &[&str], rows: &[T]) -> Result<Vec<u8>, StageError> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(header).map_err(codec)?;
    for row in rows {
        writer.serialize(row).map_err(codec)?;
    }
    writer
        .into_inner()
        .map_err(|e| StageError::Codec(e.to_string()))
}

pub fn decode_raw(data: &[u8]) -> Result<Vec<RawRow>, StageError> {
    let mut reader = ReaderBuilder::new().trim(csv::Trim::All).from_reader(data);
    reader
        .deserialize()
        .enumerate()
        .map(|(i, row)| row.map_err(|e| StageError::Codec(format!("row {}: {e}", i + 1))))
        .collect()
}

fn codec(e: csv::Error) -> StageError {
    StageError::Codec(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokyo() -> RawRow {
        RawRow {
            city: "Tokyo".to_string(),
            temperature_c: 20.0,
            description: "scattered clouds".to_string(),
            humidity_pct: 40.0,
            wind_speed_ms: 5.0,
            visibility_m: Some(10000.0),
        }
    }

    #[test]
    fn transform_converts_units() {
        let row = tokyo().transform();

        assert_eq!(row.temperature_f, 68.0);
        assert_eq!(row.description_simplified, "scattered");
        assert_eq!(row.humidity_normalized, 0.4);
        assert_eq!(row.wind_speed_kmh, 18.0);
        assert_eq!(row.visibility_km, Some(10.0));
    }

    #[test]
    fn missing_visibility_stays_missing() {
        let row = RawRow {
            visibility_m: None,
            ..tokyo()
        };
        assert_eq!(row.transform().visibility_km, None);
    }

    #[test]
    fn header_is_written_without_rows() {
        let data = encode::<RawRow>(&RAW_HEADER, &[]).unwrap();
        assert_eq!(
            String::from_utf8(data).unwrap(),
            "City,Temperature,Description,Humidity,Wind Speed,Visibility\n"
        );
    }

    #[test]
    fn raw_csv_decodes_with_empty_visibility() {
        let csv = "City,Temperature,Description,Humidity,Wind Speed,Visibility\n\
                   Tokyo,20.0,scattered clouds,40,5.0,10000\n\
                   London,8.5,mist,93,1.2,\n";
        let rows = decode_raw(csv.as_bytes()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], tokyo());
        assert_eq!(rows[1].visibility_m, None);
    }

    #[test]
    fn malformed_row_is_a_codec_error() {
        let csv = "City,Temperature,Description,Humidity,Wind Speed,Visibility\n\
                   Tokyo,warm,clear,40,5.0,10000\n";
        assert!(matches!(
            decode_raw(csv.as_bytes()),
            Err(StageError::Codec(_))
        ));
    }

    #[test]
    fn transformed_header_matches_the_row_layout() {
        let data = encode(&TRANSFORMED_HEADER, &[tokyo().transform()]).unwrap();
        let text = String::from_utf8(data).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next(),
            Some("City,Temperature_F,Description_Simplified,Humidity_Normalized,Wind Speed_km/h,Visibility_km")
        );
        assert_eq!(lines.next(), Some("Tokyo,68.0,scattered,0.4,18.0,10.0"));
    }
}
