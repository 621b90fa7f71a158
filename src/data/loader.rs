// ============================================================
// Layer 4 - Observation Loader
// ============================================================
// Reads the historical observation table from a CSV export.
//
// Expected header (order does not matter, `date`/`type` are
// accepted as aliases):
//
//   timestamp,emergency_type,severity,location_lat,location_long,
//   weather_temp,weather_humidity,weather_wind_speed
//
// Rows are validated one by one and then stable-sorted by
// timestamp, so the windower always receives a time-ordered
// table regardless of export order.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::domain::observation::Observation;
use crate::domain::traits::ObservationSource;

/// Loads observations from a single CSV file.
pub struct CsvObservationLoader {
    path: PathBuf,
}

impl CsvObservationLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ObservationSource for CsvObservationLoader {
    fn load_all(&self) -> Result<Vec<Observation>> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .with_context(|| format!("Cannot open observation table '{}'", self.path.display()))?;
        read_observations(reader)
            .with_context(|| format!("Cannot read observations from '{}'", self.path.display()))
    }
}

/// Deserialize, validate and time-sort every row of `reader`.
pub fn read_observations<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Vec<Observation>> {
    let mut rows = Vec::new();

    for (line, result) in reader.deserialize::<Observation>().enumerate() {
        // +2: one for the header, one for 1-based numbering
        let row = result.with_context(|| format!("Malformed row {}", line + 2))?;
        row.validate()
            .with_context(|| format!("Rejected row {}", line + 2))?;
        rows.push(row);
    }

    // sort_by_key is stable, so same-day rows keep their export order
    rows.sort_by_key(|o| o.timestamp);

    tracing::info!("Loaded {} observations", rows.len());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::observation::EmergencyType;

    fn reader(text: &str) -> csv::Reader<&[u8]> {
        csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes())
    }

    #[test]
    fn test_rows_are_sorted_by_timestamp() {
        let text = "\
date,type,severity,location_lat,location_long,weather_temp,weather_humidity,weather_wind_speed
2023-01-03,flood,0.5,10,20,70,80,5
2023-01-01,storm,0.2,10,20,65,60,25
2023-01-02,wildfire,0.9,10,20,95,10,15
";
        let rows = read_observations(reader(text)).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].emergency_type, EmergencyType::Storm);
        assert_eq!(rows[2].emergency_type, EmergencyType::Flood);
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        let text = "\
timestamp,emergency_type,severity,location_lat,location_long,weather_temp,weather_humidity,weather_wind_speed
2023-01-01,volcano,0.2,10,20,65,60,25
";
        assert!(read_observations(reader(text)).is_err());
    }

    #[test]
    fn test_out_of_range_severity_is_an_error() {
        let text = "\
timestamp,emergency_type,severity,location_lat,location_long,weather_temp,weather_humidity,weather_wind_speed
2023-01-01,flood,7,10,20,65,60,25
";
        let err = read_observations(reader(text)).unwrap_err();
        assert!(format!("{err:#}").contains("outside [0, 1]"));
    }
}
