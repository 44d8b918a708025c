use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Separator between the group and index parts of a sticker type (`"001-012"`).
pub const TYPE_SEPARATOR: char = '-';

/// Built-in sticker groups: group id, number of stickers, and the 1-based
/// indices that carry percussion samples.
const BUILTIN_GROUPS: &[(&str, u32, &[u32])] = &[
    ("001", 12, &[1, 2, 3]),
    ("002", 12, &[1, 2]),
    ("003", 12, &[1, 2, 3, 4]),
    ("004", 8, &[1]),
];

/// Audio metadata for a sticker type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerAudio {
    pub sample_path: String,
    #[serde(default)]
    pub is_percussion: bool,
}

/// A runtime-registered kit entry (server-driven kits).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitEntry {
    #[serde(rename = "type")]
    pub sticker_type: String,
    #[serde(flatten)]
    pub audio: StickerAudio,
}

/// Registry handle shared between the live engine, the offline mixer and the UI.
pub type SharedRegistry = Arc<RwLock<StickerRegistry>>;

/// Group part of a type identifier: everything before the first separator.
pub fn group_of(sticker_type: &str) -> &str {
    sticker_type
        .split(TYPE_SEPARATOR)
        .next()
        .unwrap_or(sticker_type)
}

/// Derives the per-group audio asset path for a type.
pub fn sample_path_for(sticker_type: &str) -> String {
    format!("audio/{}/{}.wav", group_of(sticker_type), sticker_type)
}

/// Layered lookup from sticker type to audio metadata.
///
/// Resolution checks the dynamic overlay first and falls back to the static
/// catalog. [`StickerRegistry::clear`] only ever empties the overlay.
#[derive(Debug, Clone)]
pub struct StickerRegistry {
    builtin: HashMap<String, StickerAudio>,
    overlay: HashMap<String, StickerAudio>,
}

impl Default for StickerRegistry {
    fn default() -> Self {
        Self::with_builtin_catalog()
    }
}

impl StickerRegistry {
    /// Registry with no static entries at all.
    pub fn empty() -> Self {
        Self {
            builtin: HashMap::new(),
            overlay: HashMap::new(),
        }
    }

    /// Registry pre-populated with the compiled-in sticker catalog.
    pub fn with_builtin_catalog() -> Self {
        let mut builtin = HashMap::new();
        for (group, count, percussion) in BUILTIN_GROUPS {
            for index in 1..=*count {
                let sticker_type = format!("{group}{TYPE_SEPARATOR}{index:03}");
                let audio = StickerAudio {
                    sample_path: sample_path_for(&sticker_type),
                    is_percussion: percussion.contains(&index),
                };
                builtin.insert(sticker_type, audio);
            }
        }

        Self {
            builtin,
            overlay: HashMap::new(),
        }
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Registers (or replaces) a dynamic entry. Dynamic entries shadow static ones.
    pub fn register(&mut self, sticker_type: impl Into<String>, audio: StickerAudio) {
        self.overlay.insert(sticker_type.into(), audio);
    }

    pub fn register_kit(&mut self, entry: KitEntry) {
        self.register(entry.sticker_type, entry.audio);
    }

    /// Registers a dynamic type using the derived per-group sample path.
    pub fn register_type(&mut self, sticker_type: &str, is_percussion: bool) {
        self.register(
            sticker_type,
            StickerAudio {
                sample_path: sample_path_for(sticker_type),
                is_percussion,
            },
        );
    }

    /// Flushes every dynamically registered entry.
    pub fn clear(&mut self) {
        self.overlay.clear();
    }

    pub fn resolve(&self, sticker_type: &str) -> Option<&StickerAudio> {
        self.overlay
            .get(sticker_type)
            .or_else(|| self.builtin.get(sticker_type))
    }

    pub fn is_known(&self, sticker_type: &str) -> bool {
        self.resolve(sticker_type).is_some()
    }

    /// Every resolvable type, sorted and de-duplicated across both layers.
    pub fn list_all_types(&self) -> Vec<String> {
        let all: BTreeSet<&String> = self.builtin.keys().chain(self.overlay.keys()).collect();
        all.into_iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_group_paths() {
        assert_eq!(group_of("001-012"), "001");
        assert_eq!(group_of("solo"), "solo");
        assert_eq!(sample_path_for("003-007"), "audio/003/003-007.wav");
    }

    #[test]
    fn resolves_builtin_catalog() {
        let registry = StickerRegistry::with_builtin_catalog();
        let audio = registry.resolve("001-001").unwrap();

        assert_eq!(audio.sample_path, "audio/001/001-001.wav");
        assert!(audio.is_percussion);
        assert!(!registry.resolve("001-012").unwrap().is_percussion);
        assert!(registry.resolve("999-001").is_none());
    }

    #[test]
    fn overlay_takes_precedence_until_cleared() {
        let mut registry = StickerRegistry::with_builtin_catalog();
        registry.register(
            "001-001",
            StickerAudio {
                sample_path: "kits/custom.wav".to_string(),
                is_percussion: false,
            },
        );
        registry.register_type("900-001", true);

        assert_eq!(registry.resolve("001-001").unwrap().sample_path, "kits/custom.wav");
        assert!(registry.is_known("900-001"));

        registry.clear();

        assert_eq!(
            registry.resolve("001-001").unwrap().sample_path,
            "audio/001/001-001.wav"
        );
        assert!(!registry.is_known("900-001"));
    }

    #[test]
    fn lists_types_from_both_layers_once() {
        let mut registry = StickerRegistry::empty();
        registry.register_type("b-1", false);
        registry.register_type("a-1", false);
        registry.register_type("a-1", true);

        assert_eq!(registry.list_all_types(), vec!["a-1", "b-1"]);
        assert_eq!(StickerRegistry::with_builtin_catalog().list_all_types().len(), 44);
    }

    #[test]
    fn kit_entries_deserialise_flat() {
        let entry: KitEntry = serde_json::from_str(
            r#"{"type":"777-001","sample_path":"kits/777/a.wav","is_percussion":true}"#,
        )
        .unwrap();

        let mut registry = StickerRegistry::empty();
        registry.register_kit(entry);
        assert!(registry.resolve("777-001").unwrap().is_percussion);
    }
}
