//! Detected UI elements and target matching
//!
//! A `UiElement` is one detection produced from a single screenshot; it
//! is ephemeral and never persisted. A `TargetDescriptor` is the
//! configured shape a step is looking for.

use serde::{Deserialize, Serialize};

/// A detected screen region with type, text, and absolute-pixel geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiElement {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub confidence: f32,
    pub element_type: String,
    pub element_text: String,
}

impl UiElement {
    /// Bounding-box center, the point a click is aimed at.
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// Text matching strategy for a target descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextMatch {
    Exact,
    #[default]
    Contains,
    Startswith,
    Endswith,
}

/// What a step is looking for on screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Element type to match; "any" is a wildcard.
    #[serde(rename = "type", default = "any_type")]
    pub element_type: String,

    /// Expected text; empty means any element of the right type.
    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub text_match: TextMatch,
}

fn any_type() -> String {
    "any".to_string()
}

impl TargetDescriptor {
    /// Whether `element` satisfies this descriptor.
    ///
    /// Matching is case-insensitive. An empty `text` matches any element
    /// of the right type; a non-empty `text` additionally requires the
    /// element to carry text, so `contains("")` is vacuously true for
    /// any element with non-empty text.
    pub fn matches(&self, element: &UiElement) -> bool {
        let type_ok = self.element_type == "any" || element.element_type == self.element_type;
        if !type_ok {
            return false;
        }

        if self.text.is_empty() {
            return true;
        }
        if element.element_text.is_empty() {
            return false;
        }

        let have = element.element_text.to_lowercase();
        let want = self.text.to_lowercase();
        match self.text_match {
            TextMatch::Exact => have == want,
            TextMatch::Contains => have.contains(&want),
            TextMatch::Startswith => have.starts_with(&want),
            TextMatch::Endswith => have.ends_with(&want),
        }
    }

    /// First matching element in perception-return order.
    ///
    /// Order is whatever the perception service returned; duplicate-name
    /// ambiguity resolves to "first seen".
    pub fn find_match<'a>(&self, elements: &'a [UiElement]) -> Option<&'a UiElement> {
        elements.iter().find(|e| self.matches(e))
    }
}
