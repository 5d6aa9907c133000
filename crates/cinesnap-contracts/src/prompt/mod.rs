mod presets;

pub use presets::{
    common_style_keywords, is_known_aspect_ratio, QualityPreset, QualityPresets, ASPECT_RATIOS,
    CAMERA_VIEWS, COMMON_STYLE_KEYWORDS, DEFAULT_ASPECT_RATIO, DEFAULT_CAMERA_VIEW,
    DEFAULT_QUALITY_PRESET,
};

/// Options captured by value when a generation is submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequestConfig {
    pub prompt: String,
    pub negative_prompt: String,
    pub aspect_ratio: String,
    pub quality_preset: String,
    pub camera_view: String,
}

impl GenerationRequestConfig {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

impl Default for GenerationRequestConfig {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
            quality_preset: DEFAULT_QUALITY_PRESET.to_string(),
            camera_view: DEFAULT_CAMERA_VIEW.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptComposer {
    quality: QualityPresets,
}

impl PromptComposer {
    pub fn new(quality: QualityPresets) -> Self {
        Self { quality }
    }

    pub fn quality_presets(&self) -> &QualityPresets {
        &self.quality
    }

    /// Builds the prompt actually sent to the image service. Pure.
    ///
    /// Layout: `<prompt>[, Shot from a <view> perspective], <quality>, <style>[. Negative prompt: <neg>]`
    pub fn compose(&self, config: &GenerationRequestConfig) -> String {
        let mut composed = config.prompt.clone();
        if config.camera_view != DEFAULT_CAMERA_VIEW {
            composed.push_str(&format!(
                ", Shot from a {} perspective",
                config.camera_view.replace('-', " ")
            ));
        }
        composed.push_str(&format!(
            ", {}, {}",
            self.quality.keywords(&config.quality_preset),
            common_style_keywords()
        ));
        let negative = config.negative_prompt.trim();
        if !negative.is_empty() {
            composed.push_str(&format!(". Negative prompt: {negative}"));
        }
        composed
    }
}

pub fn compose(config: &GenerationRequestConfig) -> String {
    PromptComposer::default().compose(config)
}
