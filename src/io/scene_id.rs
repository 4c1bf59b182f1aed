use crate::types::{BurnError, BurnResult, SceneMetadata};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::Regex;
use std::fmt;

/// Landsat sensor code (second letter of the identifier)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensor {
    /// OLI and TIRS combined
    OliTirs,
    OliOnly,
    TirsOnly,
    Etm,
    Tm,
    Mss,
}

impl Sensor {
    fn from_code(code: &str, satellite: u8) -> BurnResult<Self> {
        match code {
            "C" => Ok(Sensor::OliTirs),
            "O" => Ok(Sensor::OliOnly),
            "T" if satellite < 8 => Ok(Sensor::Tm),
            "T" => Ok(Sensor::TirsOnly),
            "E" => Ok(Sensor::Etm),
            "M" => Ok(Sensor::Mss),
            other => Err(BurnError::InvalidParameter(format!("Unknown Landsat sensor code: {}", other))),
        }
    }
}

/// Parsed Landsat scene identifier.
///
/// Accepts full Collection 1 product identifiers
/// (`LC08_L1TP_144040_20150412_20170410_01_T1`) and the short archive form
/// (`LC08_144040_20150412`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandsatProductId {
    pub sensor: Sensor,
    pub satellite: u8,
    /// Processing level, e.g. `L1TP` (absent in the short form)
    pub processing_level: Option<String>,
    pub wrs_path: u16,
    pub wrs_row: u16,
    pub acquired: NaiveDate,
    pub processed: Option<NaiveDate>,
    pub collection: Option<u8>,
    /// Collection tier, e.g. `T1` or `RT`
    pub tier: Option<String>,
}

fn parse_date(value: &str) -> BurnResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .map_err(|e| BurnError::InvalidParameter(format!("Invalid date '{}' in scene id: {}", value, e)))
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> BurnResult<T> {
    value
        .parse()
        .map_err(|_| BurnError::InvalidParameter(format!("Invalid {} '{}' in scene id", what, value)))
}

impl LandsatProductId {
    pub fn parse(id: &str) -> BurnResult<Self> {
        let full = Regex::new(
            r"^L([COTEM])(\d{2})_([A-Z0-9]{4})_(\d{3})(\d{3})_(\d{8})_(\d{8})_(\d{2})_(T1|T2|RT)$",
        )
        .map_err(|e| BurnError::Processing(format!("Regex error: {}", e)))?;
        let short = Regex::new(r"^L([COTEM])(\d{2})_(\d{3})(\d{3})_(\d{8})$")
            .map_err(|e| BurnError::Processing(format!("Regex error: {}", e)))?;

        if let Some(cap) = full.captures(id) {
            let satellite = parse_number(&cap[2], "satellite number")?;
            return Ok(Self {
                sensor: Sensor::from_code(&cap[1], satellite)?,
                satellite,
                processing_level: Some(cap[3].to_string()),
                wrs_path: parse_number(&cap[4], "WRS path")?,
                wrs_row: parse_number(&cap[5], "WRS row")?,
                acquired: parse_date(&cap[6])?,
                processed: Some(parse_date(&cap[7])?),
                collection: Some(parse_number(&cap[8], "collection number")?),
                tier: Some(cap[9].to_string()),
            });
        }

        if let Some(cap) = short.captures(id) {
            let satellite = parse_number(&cap[2], "satellite number")?;
            return Ok(Self {
                sensor: Sensor::from_code(&cap[1], satellite)?,
                satellite,
                processing_level: None,
                wrs_path: parse_number(&cap[3], "WRS path")?,
                wrs_row: parse_number(&cap[4], "WRS row")?,
                acquired: parse_date(&cap[5])?,
                processed: None,
                collection: None,
                tier: None,
            });
        }

        Err(BurnError::InvalidParameter(format!("Unrecognised Landsat scene id: {}", id)))
    }

    /// Acquisition date at midnight UTC
    pub fn acquired_utc(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.acquired.and_time(NaiveTime::default()))
    }

    /// Scene metadata with path/row and date taken from the identifier
    pub fn metadata(
        &self,
        scene_id: &str,
        solar_zenith_deg: f64,
        solar_azimuth_deg: f64,
        cloud_cover: f64,
    ) -> SceneMetadata {
        SceneMetadata {
            scene_id: scene_id.to_string(),
            acquired: self.acquired_utc(),
            solar_zenith_deg,
            solar_azimuth_deg,
            cloud_cover,
            wrs_path: self.wrs_path,
            wrs_row: self.wrs_row,
        }
    }
}

impl fmt::Display for LandsatProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self.sensor {
            Sensor::OliTirs => "C",
            Sensor::OliOnly => "O",
            Sensor::TirsOnly | Sensor::Tm => "T",
            Sensor::Etm => "E",
            Sensor::Mss => "M",
        };
        write!(
            f,
            "L{}{:02} path {:03} row {:03} {}",
            code,
            self.satellite,
            self.wrs_path,
            self.wrs_row,
            self.acquired.format("%Y-%m-%d")
        )
    }
}

/// Parse a scene id and build its metadata record
pub fn metadata_from_scene_id(
    scene_id: &str,
    solar_zenith_deg: f64,
    solar_azimuth_deg: f64,
    cloud_cover: f64,
) -> BurnResult<SceneMetadata> {
    let parsed = LandsatProductId::parse(scene_id)?;
    Ok(parsed.metadata(scene_id, solar_zenith_deg, solar_azimuth_deg, cloud_cover))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_full_product_id() {
        let id = LandsatProductId::parse("LC08_L1TP_144040_20150412_20170410_01_T1").unwrap();
        assert_eq!(id.sensor, Sensor::OliTirs);
        assert_eq!(id.satellite, 8);
        assert_eq!(id.processing_level.as_deref(), Some("L1TP"));
        assert_eq!((id.wrs_path, id.wrs_row), (144, 40));
        assert_eq!(id.acquired, NaiveDate::from_ymd_opt(2015, 4, 12).unwrap());
        assert_eq!(id.processed, NaiveDate::from_ymd_opt(2017, 4, 10));
        assert_eq!(id.collection, Some(1));
        assert_eq!(id.tier.as_deref(), Some("T1"));
    }

    #[test]
    fn test_short_id_to_metadata() {
        let meta = metadata_from_scene_id("LC08_144040_20160305", 38.2, 141.7, 12.5).unwrap();
        assert_eq!(meta.wrs_path, 144);
        assert_eq!(meta.wrs_row, 40);
        assert_eq!(meta.acquired.year(), 2016);
        assert_eq!(meta.acquired.month(), 3);
        assert_eq!(meta.solar_zenith_deg, 38.2);
    }

    #[test]
    fn test_invalid_ids() {
        assert!(LandsatProductId::parse("S2A_MSIL1C_20150412").is_err());
        assert!(LandsatProductId::parse("LC08_144040_20151332").is_err());
        assert!(LandsatProductId::parse("LX08_144040_20150412").is_err());
    }

    #[test]
    fn test_thematic_mapper_code() {
        let id = LandsatProductId::parse("LT05_141041_20090321").unwrap();
        assert_eq!(id.sensor, Sensor::Tm);
        assert_eq!(id.to_string(), "LT05 path 141 row 041 2009-03-21");
    }
}
