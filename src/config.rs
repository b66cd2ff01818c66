use crate::engine::instruction::MemKey;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

//
// Public Interface
//

/// Initial memory classification consumed once by `Device::load`: keys to
/// seed with fresh randomness, keys holding one mask share each, and keys
/// declared constant. The lists should be disjoint for a well-formed
/// layout; this is not enforced, later entries overwrite earlier ones.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Layout {
    #[serde(default)]
    pub random: Vec<MemKey>,
    #[serde(default)]
    pub masks: Vec<MaskEntry>,
    #[serde(default)]
    pub constants: Vec<MemKey>,
}

/// One `(cell, mask, share)` triple.
#[derive(Clone, Debug, Deserialize)]
pub struct MaskEntry {
    pub cell: MemKey,
    pub mask: String,
    pub share: u32,
}

pub fn load_layout(path: &Path) -> Result<Layout> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read layout file {}", path.display()))?;
    parse_layout(&text).with_context(|| format!("failed to parse layout file {}", path.display()))
}

pub fn parse_layout(text: &str) -> Result<Layout> {
    let layout = serde_json::from_str(text)?;
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_label_keys_deserialize() {
        let layout = parse_layout(
            r#"{
                "random": ["rand0", 96],
                "masks": [
                    {"cell": "in0", "mask": "a", "share": 0},
                    {"cell": 97, "mask": "a", "share": 1}
                ],
                "constants": ["lut"]
            }"#,
        )
        .unwrap();

        assert_eq!(
            layout.random,
            vec![MemKey::Label("rand0".to_string()), MemKey::Address(96)]
        );
        assert_eq!(layout.masks.len(), 2);
        assert_eq!(layout.masks[0].cell, MemKey::Label("in0".to_string()));
        assert_eq!(layout.masks[1].cell, MemKey::Address(97));
        assert_eq!(layout.constants, vec![MemKey::Label("lut".to_string())]);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let layout = parse_layout("{}").unwrap();
        assert!(layout.random.is_empty());
        assert!(layout.masks.is_empty());
        assert!(layout.constants.is_empty());
    }

    #[test]
    fn malformed_layouts_are_rejected() {
        assert!(parse_layout("{").is_err());
        assert!(parse_layout(r#"{"masks": [{"cell": "in0"}]}"#).is_err());
    }
}
