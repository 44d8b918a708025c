use serde::{Deserialize, Serialize};

/// Nominal edge length, in layout units, of a sticker drawn at `scale == 1.0`.
pub const BASE_STICKER_SIZE: f32 = 80.0;

/// One sticker placed on the album page, as reported by the UI layer.
///
/// The audio layer only ever reads these; `y` is carried along for parity with
/// the UI record but does not influence any audio parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StickerInstance {
    pub id: String,
    #[serde(rename = "type")]
    pub sticker_type: String,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub rotation: f32,
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default)]
    pub pitch: i32,
}

fn default_scale() -> f32 {
    1.0
}

impl StickerInstance {
    /// A sticker at `(x, y)` with neutral rotation, scale and pitch.
    pub fn new(id: impl Into<String>, sticker_type: impl Into<String>, x: f32, y: f32) -> Self {
        Self {
            id: id.into(),
            sticker_type: sticker_type.into(),
            x,
            y,
            rotation: 0.0,
            scale: 1.0,
            pitch: 0,
        }
    }

    pub fn with_rotation(mut self, rotation: f32) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_pitch(mut self, pitch: i32) -> Self {
        self.pitch = pitch;
        self
    }

    /// Rendered edge length in layout units.
    pub fn size(&self) -> f32 {
        BASE_STICKER_SIZE * self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialises_ui_records() {
        let json = r#"{"id":"s1","type":"001-001","x":400,"y":120,"rotation":-15,"scale":1.5,"pitch":3}"#;
        let sticker: StickerInstance = serde_json::from_str(json).unwrap();

        assert_eq!(sticker.sticker_type, "001-001");
        assert_eq!(sticker.rotation, -15.0);
        assert_eq!(sticker.pitch, 3);
        assert_eq!(sticker.size(), 120.0);
    }

    #[test]
    fn optional_fields_default_to_neutral() {
        let json = r#"{"id":"s2","type":"002-004","x":10,"y":20}"#;
        let sticker: StickerInstance = serde_json::from_str(json).unwrap();

        assert_eq!(sticker, StickerInstance::new("s2", "002-004", 10.0, 20.0));
    }
}
