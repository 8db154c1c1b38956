//! Predefined ArUco dictionaries.

use std::str::FromStr;

use opencv::objdetect::{self, Dictionary, PredefinedDictionaryType};
use serde::{Deserialize, Serialize};

/// One of the sixteen predefined 4x4..7x7 dictionaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerDictionary {
    #[default]
    #[serde(rename = "4x4_50")]
    Dict4x4_50,
    #[serde(rename = "4x4_100")]
    Dict4x4_100,
    #[serde(rename = "4x4_250")]
    Dict4x4_250,
    #[serde(rename = "4x4_1000")]
    Dict4x4_1000,
    #[serde(rename = "5x5_50")]
    Dict5x5_50,
    #[serde(rename = "5x5_100")]
    Dict5x5_100,
    #[serde(rename = "5x5_250")]
    Dict5x5_250,
    #[serde(rename = "5x5_1000")]
    Dict5x5_1000,
    #[serde(rename = "6x6_50")]
    Dict6x6_50,
    #[serde(rename = "6x6_100")]
    Dict6x6_100,
    #[serde(rename = "6x6_250")]
    Dict6x6_250,
    #[serde(rename = "6x6_1000")]
    Dict6x6_1000,
    #[serde(rename = "7x7_50")]
    Dict7x7_50,
    #[serde(rename = "7x7_100")]
    Dict7x7_100,
    #[serde(rename = "7x7_250")]
    Dict7x7_250,
    #[serde(rename = "7x7_1000")]
    Dict7x7_1000,
}

impl MarkerDictionary {
    pub const ALL: [MarkerDictionary; 16] = [
        MarkerDictionary::Dict4x4_50,
        MarkerDictionary::Dict4x4_100,
        MarkerDictionary::Dict4x4_250,
        MarkerDictionary::Dict4x4_1000,
        MarkerDictionary::Dict5x5_50,
        MarkerDictionary::Dict5x5_100,
        MarkerDictionary::Dict5x5_250,
        MarkerDictionary::Dict5x5_1000,
        MarkerDictionary::Dict6x6_50,
        MarkerDictionary::Dict6x6_100,
        MarkerDictionary::Dict6x6_250,
        MarkerDictionary::Dict6x6_1000,
        MarkerDictionary::Dict7x7_50,
        MarkerDictionary::Dict7x7_100,
        MarkerDictionary::Dict7x7_250,
        MarkerDictionary::Dict7x7_1000,
    ];

    fn index(&self) -> usize {
        *self as usize
    }

    /// Number of distinct markers (valid ids are `0..capacity`).
    pub fn capacity(&self) -> i32 {
        [50, 100, 250, 1000][self.index() % 4]
    }

    /// Data bits per marker side.
    pub fn marker_bits(&self) -> i32 {
        4 + (self.index() / 4) as i32
    }

    /// Short name, e.g. `4x4_50`.
    pub fn name(&self) -> String {
        let bits = self.marker_bits();
        format!("{}x{}_{}", bits, bits, self.capacity())
    }

    fn predefined(&self) -> PredefinedDictionaryType {
        use PredefinedDictionaryType::*;
        match self {
            MarkerDictionary::Dict4x4_50 => DICT_4X4_50,
            MarkerDictionary::Dict4x4_100 => DICT_4X4_100,
            MarkerDictionary::Dict4x4_250 => DICT_4X4_250,
            MarkerDictionary::Dict4x4_1000 => DICT_4X4_1000,
            MarkerDictionary::Dict5x5_50 => DICT_5X5_50,
            MarkerDictionary::Dict5x5_100 => DICT_5X5_100,
            MarkerDictionary::Dict5x5_250 => DICT_5X5_250,
            MarkerDictionary::Dict5x5_1000 => DICT_5X5_1000,
            MarkerDictionary::Dict6x6_50 => DICT_6X6_50,
            MarkerDictionary::Dict6x6_100 => DICT_6X6_100,
            MarkerDictionary::Dict6x6_250 => DICT_6X6_250,
            MarkerDictionary::Dict6x6_1000 => DICT_6X6_1000,
            MarkerDictionary::Dict7x7_50 => DICT_7X7_50,
            MarkerDictionary::Dict7x7_100 => DICT_7X7_100,
            MarkerDictionary::Dict7x7_250 => DICT_7X7_250,
            MarkerDictionary::Dict7x7_1000 => DICT_7X7_1000,
        }
    }

    /// Load the OpenCV dictionary.
    pub fn load(&self) -> opencv::Result<Dictionary> {
        objdetect::get_predefined_dictionary(self.predefined())
    }
}

impl std::fmt::Display for MarkerDictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for MarkerDictionary {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        let wanted = wanted.strip_prefix("dict_").unwrap_or(&wanted);
        MarkerDictionary::ALL
            .iter()
            .copied()
            .find(|d| d.name() == wanted)
            .ok_or_else(|| format!("unknown marker dictionary: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_and_capacity() {
        assert_eq!(MarkerDictionary::Dict4x4_50.name(), "4x4_50");
        assert_eq!(MarkerDictionary::Dict5x5_1000.name(), "5x5_1000");
        assert_eq!(MarkerDictionary::Dict7x7_250.capacity(), 250);
        assert_eq!(MarkerDictionary::Dict6x6_100.marker_bits(), 6);
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            "4x4_50".parse::<MarkerDictionary>().unwrap(),
            MarkerDictionary::Dict4x4_50
        );
        assert_eq!(
            "DICT_6X6_250".parse::<MarkerDictionary>().unwrap(),
            MarkerDictionary::Dict6x6_250
        );
        assert!("8x8_50".parse::<MarkerDictionary>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&MarkerDictionary::Dict5x5_100).unwrap();
        assert_eq!(json, "\"5x5_100\"");
        let parsed: MarkerDictionary = serde_json::from_str("\"7x7_1000\"").unwrap();
        assert_eq!(parsed, MarkerDictionary::Dict7x7_1000);
    }

    #[test]
    fn test_every_dictionary_loads() {
        for dictionary in MarkerDictionary::ALL {
            assert!(dictionary.load().is_ok(), "{}", dictionary);
        }
    }
}
