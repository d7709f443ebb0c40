use serde::{Deserialize, Deserializer, Serialize};

/// Width of an entity code: region(2) + province(3) + municipality(4) + section(4).
pub const CODE_LEN: usize = 13;

const REGION: std::ops::Range<usize> = 0..2;
const PROVINCE: std::ops::Range<usize> = 2..5;
const MUNICIPALITY: std::ops::Range<usize> = 5..9;
const SECTION: std::ops::Range<usize> = 9..13;

/// Positional coordinates decoded from a fixed-width entity code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityCode {
    pub region: String,
    pub province: String,
    pub municipality: String,
    pub section: String,
}

impl EntityCode {
    /// Split a 13-character code into its four coordinates.
    ///
    /// Only the length is checked: non-digit content passes through as-is.
    pub fn decode(code: &str) -> Option<Self> {
        if code.len() != CODE_LEN {
            return None;
        }
        Some(Self {
            region: code.get(REGION)?.to_string(),
            province: code.get(PROVINCE)?.to_string(),
            municipality: code.get(MUNICIPALITY)?.to_string(),
            section: code.get(SECTION)?.to_string(),
        })
    }

    pub fn encode(&self) -> String {
        format!(
            "{}{}{}{}",
            self.region, self.province, self.municipality, self.section
        )
    }
}

/// Entity kind tag as sent by the entity list endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum EntityKind {
    #[serde(rename = "RE")]
    Region,
    #[serde(rename = "PR")]
    Province,
    #[serde(rename = "CM")]
    Municipality,
    #[serde(rename = "SZ")]
    Section,
    #[default]
    #[serde(other)]
    Other,
}

/// One record of the flat, pre-ordered entity list.
///
/// Missing or null fields fall back to defaults; such records are skipped
/// later instead of failing the whole list.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntityRecord {
    #[serde(rename = "tipo", default, deserialize_with = "null_as_default")]
    pub kind: EntityKind,
    #[serde(rename = "desc", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "cod", default, deserialize_with = "null_as_default")]
    pub code: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityList {
    #[serde(rename = "enti", default)]
    pub entities: Vec<EntityRecord>,
}
