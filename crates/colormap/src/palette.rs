//! Ordered class palettes.

use serde::{Deserialize, Serialize};

use fieldprod_core::{Error, Result};

/// Low to high productivity: red, orange, grey-green, sand, green, lime
pub const PRODUCTIVITY_HEX: [&str; 6] = [
    "#C1292E", "#FCAA67", "#92977E", "#E6E18F", "#16C172", "#89FC00",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB` (the `#` is optional).
    pub fn from_hex(hex: &str) -> Result<Self> {
        let digits = hex.trim().trim_start_matches('#');
        let invalid = || Error::InvalidParameter {
            name: "palette",
            value: hex.to_string(),
            reason: "expected a #RRGGBB colour".into(),
        };
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(invalid());
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| invalid());
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Colours for classes 1, 2, ... in order. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Palette {
    colors: Vec<Rgb>,
}

impl Palette {
    pub fn new(colors: Vec<Rgb>) -> Result<Self> {
        if colors.is_empty() {
            return Err(Error::InvalidParameter {
                name: "palette",
                value: "[]".into(),
                reason: "at least one colour is required".into(),
            });
        }
        Ok(Self { colors })
    }

    pub fn from_hex_list<S: AsRef<str>>(hex: &[S]) -> Result<Self> {
        Self::new(
            hex.iter()
                .map(|h| Rgb::from_hex(h.as_ref()))
                .collect::<Result<Vec<_>>>()?,
        )
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn colors(&self) -> &[Rgb] {
        &self.colors
    }

    /// Colour of a class (1-based). `None` for class 0.
    pub fn class_color(&self, class: u8) -> Option<Rgb> {
        let idx = usize::from(class.checked_sub(1)?);
        self.colors
            .get(idx)
            .or_else(|| self.colors.last())
            .copied()
    }
}

impl Default for Palette {
    fn default() -> Self {
        let colors = PRODUCTIVITY_HEX
            .iter()
            .filter_map(|h| Rgb::from_hex(h).ok())
            .collect();
        Self { colors }
    }
}

impl TryFrom<Vec<String>> for Palette {
    type Error = Error;

    fn try_from(hex: Vec<String>) -> Result<Self> {
        Self::from_hex_list(&hex)
    }
}

impl From<Palette> for Vec<String> {
    fn from(palette: Palette) -> Self {
        palette.colors.iter().map(Rgb::to_hex).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_parsing() {
        assert_eq!(Rgb::from_hex("#C1292E").unwrap(), Rgb::new(0xC1, 0x29, 0x2E));
        assert_eq!(Rgb::from_hex("89fc00").unwrap(), Rgb::new(0x89, 0xFC, 0x00));
        assert!(Rgb::from_hex("#C1292").is_err());
        assert!(Rgb::from_hex("#GG0000").is_err());
        assert!(Rgb::from_hex("#ÄÄ00").is_err());
    }

    #[test]
    fn test_default_palette() {
        let p = Palette::default();
        assert_eq!(p.len(), 6);
        assert_eq!(p.class_color(1).unwrap().to_hex(), "#C1292E");
        assert_eq!(p.class_color(6).unwrap().to_hex(), "#89FC00");
    }

    #[test]
    fn test_overflow_reuses_last() {
        let p = Palette::from_hex_list(&["#000000", "#FFFFFF"]).unwrap();
        assert_eq!(p.class_color(0), None);
        assert_eq!(p.class_color(2), Some(Rgb::new(255, 255, 255)));
        assert_eq!(p.class_color(9), Some(Rgb::new(255, 255, 255)));
    }

    #[test]
    fn test_empty_palette_rejected() {
        assert!(Palette::from_hex_list::<&str>(&[]).is_err());
    }

    #[test]
    fn test_serde_as_hex_list() {
        let p: Palette = serde_json::from_str(r##"["#010203", "#A0B0C0"]"##).unwrap();
        assert_eq!(p.colors()[1], Rgb::new(0xA0, 0xB0, 0xC0));
        assert_eq!(serde_json::to_string(&p).unwrap(), r##"["#010203","#A0B0C0"]"##);
        assert!(serde_json::from_str::<Palette>("[]").is_err());
    }
}
