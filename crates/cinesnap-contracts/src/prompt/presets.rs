use indexmap::IndexMap;

pub const DEFAULT_QUALITY_PRESET: &str = "hd";
pub const DEFAULT_CAMERA_VIEW: &str = "default";
pub const DEFAULT_ASPECT_RATIO: &str = "16:9";

pub const ASPECT_RATIOS: &[&str] = &["1:1", "3:4", "4:3", "9:16", "16:9"];

pub const CAMERA_VIEWS: &[&str] = &[
    "default",
    "eye-level",
    "low-angle",
    "high-angle",
    "birds-eye-view",
    "worms-eye-view",
    "dutch-angle",
    "over-the-shoulder",
    "close-up",
    "wide-shot",
];

pub const COMMON_STYLE_KEYWORDS: &[&str] = &[
    "photorealistic",
    "film still",
    "movie scene",
    "fit prompt",
    "no distortion",
    "no deformations",
    "no text overlays",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityPreset {
    pub name: String,
    pub label: String,
    pub keywords: String,
}

/// Ordered lookup of quality tiers to the descriptive keywords appended to prompts.
#[derive(Debug, Clone)]
pub struct QualityPresets {
    presets: IndexMap<String, QualityPreset>,
}

impl QualityPresets {
    pub fn new(presets: Option<IndexMap<String, QualityPreset>>) -> Self {
        Self {
            presets: presets.unwrap_or_else(default_quality_presets),
        }
    }

    pub fn get(&self, name: &str) -> Option<&QualityPreset> {
        self.presets.get(name)
    }

    /// Unknown tiers contribute no keywords.
    pub fn keywords(&self, name: &str) -> &str {
        self.get(name)
            .map(|preset| preset.keywords.as_str())
            .unwrap_or("")
    }

    pub fn list(&self) -> impl Iterator<Item = &QualityPreset> {
        self.presets.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.presets.keys().cloned().collect()
    }
}

impl Default for QualityPresets {
    fn default() -> Self {
        Self::new(None)
    }
}

pub fn is_known_aspect_ratio(value: &str) -> bool {
    ASPECT_RATIOS.iter().any(|candidate| *candidate == value)
}

pub fn common_style_keywords() -> String {
    COMMON_STYLE_KEYWORDS.join(", ")
}

fn default_quality_presets() -> IndexMap<String, QualityPreset> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, label: &str, keywords: &[&str]| {
        map.insert(
            name.to_string(),
            QualityPreset {
                name: name.to_string(),
                label: label.to_string(),
                keywords: keywords.join(", "),
            },
        );
    };

    insert(
        "sd",
        "Standard (720p)",
        &[
            "720p resolution",
            "standard quality",
            "sharp focus",
            "basic detail",
        ],
    );
    insert(
        "hd",
        "High definition (1080p)",
        &[
            "1080p resolution",
            "high definition",
            "sharp focus",
            "fine detail",
            "professional lighting",
        ],
    );
    insert(
        "ultra",
        "Ultra (8K)",
        &[
            "8K resolution",
            "ultra high definition",
            "ultra sharp focus",
            "intricate detail",
            "cinematic lighting",
            "masterpiece",
        ],
    );

    map
}
