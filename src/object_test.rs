use super::*;

fn rect() -> CanvasObject {
    CanvasObject::draft(Uuid::new_v4(), ObjectKind::Rectangle, 10.0, 20.0, None)
}

// =============================================================================
// DRAFTS
// =============================================================================

#[test]
fn draft_rectangle_has_default_size_and_no_version() {
    let obj = rect();
    assert_eq!(obj.width, Some(100.0));
    assert_eq!(obj.height, Some(100.0));
    assert_eq!(obj.radius, None);
    assert_eq!(obj.version, 0);
    assert!(!obj.is_confirmed());
    assert!(obj.validate().is_ok());
}

#[test]
fn draft_circle_uses_radius() {
    let obj = CanvasObject::draft(Uuid::new_v4(), ObjectKind::Circle, 0.0, 0.0, None);
    assert_eq!(obj.radius, Some(50.0));
    assert_eq!(obj.width, None);
    assert!(obj.validate().is_ok());
}

#[test]
fn draft_text_starts_with_empty_text() {
    let obj = CanvasObject::draft(Uuid::new_v4(), ObjectKind::Text, 0.0, 0.0, None);
    assert_eq!(obj.text.as_deref(), Some(""));
    assert!(obj.validate().is_ok());
}

#[test]
fn kind_serializes_lowercase() {
    let json = serde_json::to_value(ObjectKind::Rectangle).expect("serialize");
    assert_eq!(json, serde_json::json!("rectangle"));
}

#[test]
fn object_deserializes_with_defaults() {
    let id = Uuid::new_v4();
    let canvas = Uuid::new_v4();
    let obj: CanvasObject = serde_json::from_value(serde_json::json!({
        "id": id, "canvas_id": canvas, "kind": "star", "x": 1.0, "y": 2.0, "version": 3
    }))
    .expect("deserialize");
    assert_eq!(obj.kind, ObjectKind::Star);
    assert!((obj.stroke_width - 1.0).abs() < f64::EPSILON);
    assert_eq!(obj.version, 3);
    assert!(obj.is_confirmed());
}

// =============================================================================
// VALIDATION
// =============================================================================

#[test]
fn validate_rejects_non_finite_position() {
    let mut obj = rect();
    obj.x = f64::NAN;
    assert!(matches!(obj.validate(), Err(SyncError::ValidationFailure(_))));
}

#[test]
fn validate_rejects_negative_width() {
    let obj = rect().with_size(-1.0, 10.0);
    assert!(obj.validate().is_err());
}

#[test]
fn validate_rejects_text_object_without_text() {
    let mut obj = CanvasObject::draft(Uuid::new_v4(), ObjectKind::Text, 0.0, 0.0, None);
    obj.text = None;
    assert!(obj.validate().is_err());
}

#[test]
fn validate_rejects_oversized_text() {
    let obj = rect().with_text("a".repeat(MAX_TEXT_LEN + 1));
    assert!(obj.validate().is_err());
    let ok = rect().with_text("a".repeat(MAX_TEXT_LEN));
    assert!(ok.validate().is_ok());
}

#[test]
fn validate_rejects_circle_without_radius() {
    let mut obj = CanvasObject::draft(Uuid::new_v4(), ObjectKind::Circle, 0.0, 0.0, None);
    obj.radius = None;
    assert!(obj.validate().is_err());
}

// =============================================================================
// PATCHES
// =============================================================================

#[test]
fn merge_later_fields_win() {
    let mut a = ObjectPatch { x: Some(1.0), fill: Some("#f00".into()), ..ObjectPatch::default() };
    let b = ObjectPatch { x: Some(5.0), y: Some(6.0), ..ObjectPatch::default() };
    a.merge(&b);
    assert_eq!(a.x, Some(5.0));
    assert_eq!(a.y, Some(6.0));
    assert_eq!(a.fill.as_deref(), Some("#f00"));
}

#[test]
fn apply_to_only_touches_present_fields() {
    let mut obj = rect();
    let before = obj.clone();
    ObjectPatch { fill: Some("#00f".into()), ..ObjectPatch::default() }.apply_to(&mut obj);
    assert_eq!(obj.fill.as_deref(), Some("#00f"));
    assert_eq!(obj.x, before.x);
    assert_eq!(obj.width, before.width);
    assert_eq!(obj.version, before.version);
}

#[test]
fn substantive_vs_cosmetic() {
    assert!(ObjectPatch::position(1.0, 2.0).is_substantive());
    assert!(ObjectPatch::size(1.0, 2.0).is_substantive());
    assert!(ObjectPatch { rotation: Some(45.0), ..ObjectPatch::default() }.is_substantive());
    assert!(!ObjectPatch { fill: Some("#fff".into()), ..ObjectPatch::default() }.is_substantive());
    assert!(!ObjectPatch { text: Some(Some("hi".into())), ..ObjectPatch::default() }.is_substantive());
    assert!(!ObjectPatch { z_index: Some(3), ..ObjectPatch::default() }.is_substantive());
}

#[test]
fn empty_patch_is_invalid() {
    assert!(ObjectPatch::default().is_empty());
    assert!(ObjectPatch::default().validate().is_err());
}

#[test]
fn patch_validate_rejects_zero_radius() {
    let patch = ObjectPatch { radius: Some(0.0), ..ObjectPatch::default() };
    assert!(patch.validate().is_err());
}

#[test]
fn patch_serializes_only_present_fields() {
    let json = serde_json::to_value(ObjectPatch::position(3.0, 4.0)).expect("serialize");
    assert_eq!(json, serde_json::json!({"x": 3.0, "y": 4.0}));
}

#[test]
fn explicit_null_text_clears_label() {
    let patch: ObjectPatch = serde_json::from_value(serde_json::json!({ "text": null })).expect("deserialize");
    assert_eq!(patch.text, Some(None));
    assert!(!patch.is_empty());
    assert_eq!(serde_json::to_value(&patch).expect("serialize"), serde_json::json!({ "text": null }));

    let mut obj = CanvasObject::draft(Uuid::nil(), ObjectKind::Rectangle, 0.0, 0.0, None).with_text("label");
    patch.apply_to(&mut obj);
    assert_eq!(obj.text, None);

    let mut typed = ObjectPatch { text: Some(Some("typed".into())), ..ObjectPatch::default() };
    typed.merge(&patch);
    assert_eq!(typed.text, Some(None));

    let absent: ObjectPatch = serde_json::from_value(serde_json::json!({ "x": 1.0 })).expect("deserialize");
    assert_eq!(absent.text, None);
}
