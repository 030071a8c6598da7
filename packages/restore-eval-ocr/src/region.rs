/// Box of a detected string, in pixels of the image handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One recognized string. Engines return these in detection order.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRegion {
    pub text: String,
    pub bounding_box: Option<BoundingBox>,
    pub confidence: Option<f32>,
}

impl TextRegion {
    /// A region carrying only text, for engines that report no geometry.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bounding_box: None,
            confidence: None,
        }
    }
}
