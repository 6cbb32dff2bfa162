//! Canvas object model: what lives on a canvas and how it is edited.
//!
//! `CanvasObject` is the full record as the server returns it. `ObjectPatch`
//! is a sparse edit: only present fields are applied, and patches compose by
//! later-wins merging so rapid edits coalesce into one submission.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::SyncError;

/// Longest text payload accepted locally.
pub const MAX_TEXT_LEN: usize = 10_000;

const DEFAULT_SIZE: f64 = 100.0;
const DEFAULT_RADIUS: f64 = 50.0;
const DEFAULT_STROKE_WIDTH: f64 = 1.0;

/// Shape type of a canvas object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Rectangle,
    Circle,
    Text,
    Line,
    Arrow,
    Diamond,
    Star,
    Heart,
}

impl ObjectKind {
    /// Circles are sized by radius; everything else by width/height.
    #[must_use]
    pub fn uses_radius(self) -> bool {
        matches!(self, Self::Circle)
    }
}

/// A canvas object as stored locally and on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasObject {
    pub id: Uuid,
    pub canvas_id: Uuid,
    pub kind: ObjectKind,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default)]
    pub rotation: f64,
    /// Stacking order; lower values are drawn beneath higher values.
    #[serde(default)]
    pub z_index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default = "default_stroke_width")]
    pub stroke_width: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Server-assigned edit counter. Zero means never confirmed.
    #[serde(default)]
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<Uuid>,
    /// Milliseconds since the Unix epoch of the last accepted mutation.
    #[serde(default)]
    pub updated_at: i64,
}

fn default_stroke_width() -> f64 {
    DEFAULT_STROKE_WIDTH
}

impl CanvasObject {
    /// Build an unconfirmed object with a provisional client id and the
    /// default size for its kind.
    #[must_use]
    pub fn draft(canvas_id: Uuid, kind: ObjectKind, x: f64, y: f64, owner_id: Option<Uuid>) -> Self {
        let (width, height, radius) = if kind.uses_radius() {
            (None, None, Some(DEFAULT_RADIUS))
        } else {
            (Some(DEFAULT_SIZE), Some(DEFAULT_SIZE), None)
        };
        Self {
            id: Uuid::new_v4(),
            canvas_id,
            kind,
            x,
            y,
            width,
            height,
            radius,
            rotation: 0.0,
            z_index: 0,
            fill: None,
            stroke: None,
            stroke_width: DEFAULT_STROKE_WIDTH,
            text: (kind == ObjectKind::Text).then(String::new),
            version: 0,
            owner_id,
            updated_at: 0,
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// True once the server has assigned a version.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.version > 0
    }

    /// Reject geometry or text that must never reach the server.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailure` naming the first offending field.
    pub fn validate(&self) -> Result<(), SyncError> {
        check_finite("x", self.x)?;
        check_finite("y", self.y)?;
        check_finite("rotation", self.rotation)?;
        check_non_negative("stroke_width", self.stroke_width)?;
        if self.kind.uses_radius() {
            match self.radius {
                Some(r) => check_positive("radius", r)?,
                None => return Err(SyncError::validation("circle requires a radius")),
            }
        } else {
            if let Some(w) = self.width {
                check_non_negative("width", w)?;
            }
            if let Some(h) = self.height {
                check_non_negative("height", h)?;
            }
        }
        if let Some(text) = &self.text {
            check_text(text)?;
        } else if self.kind == ObjectKind::Text {
            return Err(SyncError::validation("text object requires text content"));
        }
        Ok(())
    }
}

/// Sparse update for a canvas object. Only present fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    /// `Some(None)` clears the text; it goes over the wire as `null`.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub text: Option<Option<String>>,
}

/// Distinguish an explicit `null` from an absent key.
fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl ObjectPatch {
    /// Patch that moves an object to `(x, y)`.
    #[must_use]
    pub fn position(x: f64, y: f64) -> Self {
        Self { x: Some(x), y: Some(y), ..Self::default() }
    }

    /// Patch that resizes an object's bounding box.
    #[must_use]
    pub fn size(width: f64, height: f64) -> Self {
        Self { width: Some(width), height: Some(height), ..Self::default() }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Position, size or rotation changes. Style and text edits are cosmetic.
    #[must_use]
    pub fn is_substantive(&self) -> bool {
        self.x.is_some()
            || self.y.is_some()
            || self.width.is_some()
            || self.height.is_some()
            || self.radius.is_some()
            || self.rotation.is_some()
    }

    /// Fold a later patch into this one. Fields present in `later` win.
    pub fn merge(&mut self, later: &ObjectPatch) {
        merge_field(&mut self.x, later.x);
        merge_field(&mut self.y, later.y);
        merge_field(&mut self.width, later.width);
        merge_field(&mut self.height, later.height);
        merge_field(&mut self.radius, later.radius);
        merge_field(&mut self.rotation, later.rotation);
        merge_field(&mut self.z_index, later.z_index);
        merge_field(&mut self.stroke_width, later.stroke_width);
        if let Some(fill) = &later.fill {
            self.fill = Some(fill.clone());
        }
        if let Some(stroke) = &later.stroke {
            self.stroke = Some(stroke.clone());
        }
        if let Some(text) = &later.text {
            self.text = Some(text.clone());
        }
    }

    /// Apply present fields onto `obj`. Version and timestamps are untouched.
    pub fn apply_to(&self, obj: &mut CanvasObject) {
        if let Some(x) = self.x {
            obj.x = x;
        }
        if let Some(y) = self.y {
            obj.y = y;
        }
        if let Some(w) = self.width {
            obj.width = Some(w);
        }
        if let Some(h) = self.height {
            obj.height = Some(h);
        }
        if let Some(r) = self.radius {
            obj.radius = Some(r);
        }
        if let Some(r) = self.rotation {
            obj.rotation = r;
        }
        if let Some(z) = self.z_index {
            obj.z_index = z;
        }
        if let Some(sw) = self.stroke_width {
            obj.stroke_width = sw;
        }
        if let Some(fill) = &self.fill {
            obj.fill = Some(fill.clone());
        }
        if let Some(stroke) = &self.stroke {
            obj.stroke = Some(stroke.clone());
        }
        if let Some(text) = &self.text {
            obj.text.clone_from(text);
        }
    }

    /// Field-level checks that don't need the target object.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailure` for empty patches, non-finite numbers,
    /// negative sizes and oversized text.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.is_empty() {
            return Err(SyncError::validation("empty patch"));
        }
        if let Some(x) = self.x {
            check_finite("x", x)?;
        }
        if let Some(y) = self.y {
            check_finite("y", y)?;
        }
        if let Some(r) = self.rotation {
            check_finite("rotation", r)?;
        }
        if let Some(w) = self.width {
            check_non_negative("width", w)?;
        }
        if let Some(h) = self.height {
            check_non_negative("height", h)?;
        }
        if let Some(r) = self.radius {
            check_positive("radius", r)?;
        }
        if let Some(sw) = self.stroke_width {
            check_non_negative("stroke_width", sw)?;
        }
        if let Some(Some(text)) = &self.text {
            check_text(text)?;
        }
        Ok(())
    }
}

fn merge_field<T: Copy>(slot: &mut Option<T>, later: Option<T>) {
    if later.is_some() {
        *slot = later;
    }
}

fn check_finite(field: &str, value: f64) -> Result<(), SyncError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SyncError::validation(format!("{field} must be finite")))
    }
}

fn check_non_negative(field: &str, value: f64) -> Result<(), SyncError> {
    check_finite(field, value)?;
    if value < 0.0 {
        return Err(SyncError::validation(format!("{field} must not be negative")));
    }
    Ok(())
}

fn check_positive(field: &str, value: f64) -> Result<(), SyncError> {
    check_finite(field, value)?;
    if value <= 0.0 {
        return Err(SyncError::validation(format!("{field} must be positive")));
    }
    Ok(())
}

fn check_text(text: &str) -> Result<(), SyncError> {
    if text.chars().count() > MAX_TEXT_LEN {
        return Err(SyncError::validation(format!("text exceeds {MAX_TEXT_LEN} characters")));
    }
    Ok(())
}

#[cfg(test)]
#[path = "object_test.rs"]
mod tests;
