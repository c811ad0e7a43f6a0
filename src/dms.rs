//! Conversión de coordenadas en notación grados-minutos-segundos (DMS) a
//! grados decimales, p. ej. `35°52'59.9"N` → `35.883306`.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Ejemplo mostrado al cliente cuando el formato no es válido.
pub const DMS_EXAMPLE: &str = r#"35°52'59.9"N 76°30'48.4"E"#;

static DMS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(\d+)°(\d+)'(\d+(?:\.\d+)?)"([NSEW])$"#).expect("regex DMS válida")
});

#[derive(Debug, Error, PartialEq)]
pub enum DmsError {
    #[error("Invalid coordinate format: {0}")]
    InvalidFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    North,
    South,
    East,
    West,
}

impl Hemisphere {
    fn from_letter(letter: &str) -> Option<Self> {
        match letter {
            "N" => Some(Self::North),
            "S" => Some(Self::South),
            "E" => Some(Self::East),
            "W" => Some(Self::West),
            _ => None,
        }
    }

    fn is_latitude(self) -> bool {
        matches!(self, Self::North | Self::South)
    }

    fn max_degrees(self) -> f64 {
        if self.is_latitude() {
            90.0
        } else {
            180.0
        }
    }
}

/// Coordenada DMS ya validada.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DmsCoordinate {
    pub degrees: u32,
    pub minutes: u32,
    pub seconds: f64,
    pub hemisphere: Hemisphere,
}

impl DmsCoordinate {
    pub fn parse(raw: &str) -> Result<Self, DmsError> {
        let invalid = || DmsError::InvalidFormat(raw.to_string());
        let caps = DMS_PATTERN.captures(raw.trim()).ok_or_else(invalid)?;

        let degrees: u32 = caps[1].parse().map_err(|_| invalid())?;
        let minutes: u32 = caps[2].parse().map_err(|_| invalid())?;
        let seconds: f64 = caps[3].parse().map_err(|_| invalid())?;
        let hemisphere = Hemisphere::from_letter(&caps[4]).ok_or_else(invalid)?;

        if minutes >= 60 || seconds >= 60.0 {
            return Err(invalid());
        }
        let coordinate = Self { degrees, minutes, seconds, hemisphere };
        if coordinate.to_decimal().abs() > hemisphere.max_degrees() {
            return Err(invalid());
        }
        Ok(coordinate)
    }

    /// D + M/60 + S/3600, negativo al sur y al oeste.
    pub fn to_decimal(&self) -> f64 {
        let value = f64::from(self.degrees) + f64::from(self.minutes) / 60.0 + self.seconds / 3600.0;
        match self.hemisphere {
            Hemisphere::South | Hemisphere::West => -value,
            Hemisphere::North | Hemisphere::East => value,
        }
    }
}

/// Convierte una coordenada DMS suelta a grados decimales.
pub fn parse_dms(raw: &str) -> Result<f64, DmsError> {
    DmsCoordinate::parse(raw).map(|c| c.to_decimal())
}

/// Parsea un par "latitud longitud" separado por espacios. La latitud debe
/// llevar hemisferio N/S y la longitud E/W.
pub fn parse_dms_pair(raw: &str) -> Result<(f64, f64), DmsError> {
    let invalid = || DmsError::InvalidFormat(raw.to_string());
    let parts: Vec<&str> = raw.split_whitespace().collect();
    let [lat_raw, lon_raw] = parts.as_slice() else {
        return Err(invalid());
    };

    let lat = DmsCoordinate::parse(lat_raw)?;
    let lon = DmsCoordinate::parse(lon_raw)?;
    if !lat.hemisphere.is_latitude() || lon.hemisphere.is_latitude() {
        return Err(invalid());
    }
    Ok((lat.to_decimal(), lon.to_decimal()))
}
