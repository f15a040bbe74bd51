//! Render and input collaborators.
//!
//! Drawing and input capture live on the client. The simulation only
//! depends on these two contracts so drawable and playable entities can be
//! driven by whatever front end sits on the other side.

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};

use crate::core::shape::Aabb;
use crate::core::vec2::Vec2;

/// RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgba {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
    /// Alpha
    pub a: u8,
}

impl Rgba {
    /// Opaque black
    pub const BLACK: Self = Self::opaque(0, 0, 0);
    /// Opaque red
    pub const RED: Self = Self::opaque(255, 0, 0);
    /// Opaque green
    pub const GREEN: Self = Self::opaque(0, 255, 0);

    /// Colour with full alpha.
    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

/// Render target handed to drawable entities.
pub trait Canvas {
    /// Blit the `source` region of a texture onto the `target` region of the world.
    fn draw_shape(&mut self, texture_id: &str, target: Aabb, source: Aabb);

    /// Fill the `target` region with a solid colour.
    fn draw_color(&mut self, color: Rgba, target: Aabb);

    /// Draw a text label at a world position.
    fn draw_text(&mut self, text: &str, at: Vec2, font: &str);

    /// Ease the camera toward a world position.
    fn move_to(&mut self, _center: Vec2) {}
}

/// Mouse button state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MouseButton {
    /// Nothing pressed.
    #[default]
    Released,
    /// Primary button held.
    Pressed,
}

/// Key code used by [`InputSnapshot::pressed`] for the space bar.
pub const KEY_SPACE: u32 = 32;

/// Locally captured input state, sampled by playable entities on the client.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InputSnapshot {
    /// Key codes currently held.
    pub pressed: BTreeSet<u32>,
    /// Primary mouse button.
    pub mouse: MouseButton,
    /// Mouse position in world space.
    pub mouse_position: Vec2,
}

impl InputSnapshot {
    /// Whether a key is held.
    pub fn is_pressed(&self, key: u32) -> bool {
        self.pressed.contains(&key)
    }

    /// Whether the primary mouse button is held.
    pub fn mouse_pressed(&self) -> bool {
        self.mouse == MouseButton::Pressed
    }
}

/// Canvas that records every call. Handy for tests and headless runs.
#[derive(Debug, Default)]
pub struct RecordingCanvas {
    /// Recorded draw calls in order.
    pub calls: Vec<DrawCall>,
}

/// One recorded canvas call.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCall {
    /// `draw_shape`
    Shape {
        /// Texture id.
        texture_id: String,
        /// World region.
        target: Aabb,
    },
    /// `draw_color`
    Color {
        /// Fill colour.
        color: Rgba,
        /// World region.
        target: Aabb,
    },
    /// `draw_text`
    Text {
        /// Label.
        text: String,
        /// World position.
        at: Vec2,
    },
}

impl Canvas for RecordingCanvas {
    fn draw_shape(&mut self, texture_id: &str, target: Aabb, _source: Aabb) {
        self.calls.push(DrawCall::Shape {
            texture_id: texture_id.to_string(),
            target,
        });
    }

    fn draw_color(&mut self, color: Rgba, target: Aabb) {
        self.calls.push(DrawCall::Color { color, target });
    }

    fn draw_text(&mut self, text: &str, at: Vec2, _font: &str) {
        self.calls.push(DrawCall::Text {
            text: text.to_string(),
            at,
        });
    }
}
