//! Content moderation and card-type validation over detected labels.

use crate::error::{Error, Result};

use super::backend::DetectedLabel;

/// Moderation labels that reject an upload at confidence > 0.6.
const MODERATION_BLOCKLIST: &[&str] = &[
    "explicit nudity",
    "suggestive",
    "violence",
    "visually disturbing",
    "rude gestures",
    "drugs",
    "tobacco",
    "alcohol",
    "gambling",
    "hate symbols",
    "exposed body parts",
    "partial nudity",
];

const MODERATION_THRESHOLD: f64 = 0.6;

/// Labels that positively indicate a card-like subject, at confidence > 0.7.
const POSITIVE_CARD_LABELS: &[&str] = &[
    "text",
    "document",
    "paper",
    "card",
    "poster",
    "flyer",
    "advertisement",
    "art",
    "drawing",
    "painting",
];

const POSITIVE_THRESHOLD: f64 = 0.7;

/// Labels that indicate the subject is not a card, at confidence > 0.8.
const NEGATIVE_CARD_LABELS: &[&str] = &[
    "person",
    "human",
    "face",
    "portrait",
    "animal",
    "pet",
    "dog",
    "cat",
    "bird",
    "food",
    "meal",
    "dish",
    "vehicle",
    "car",
    "truck",
    "building",
    "architecture",
    "nature",
    "landscape",
    "screen",
    "monitor",
    "television",
    "furniture",
    "chair",
    "table",
];

const NEGATIVE_THRESHOLD: f64 = 0.8;

fn matches(label: &DetectedLabel, names: &[&str], threshold: f64) -> bool {
    let lower = label.name.to_ascii_lowercase();
    label.confidence > threshold && names.iter().any(|n| *n == lower)
}

/// Reject the image when any moderation label on the kid-safety blocklist
/// exceeds the moderation threshold.
pub fn check_moderation(labels: &[DetectedLabel]) -> Result<()> {
    if let Some(hit) = labels
        .iter()
        .find(|l| matches(l, MODERATION_BLOCKLIST, MODERATION_THRESHOLD))
    {
        return Err(Error::invalid_content(format!(
            "moderation label '{}' at confidence {:.2}",
            hit.name, hit.confidence
        )));
    }
    Ok(())
}

/// Reject the image when strong not-a-card labels are present and no
/// positive card label backs the upload.
pub fn check_card_type(labels: &[DetectedLabel]) -> Result<()> {
    let has_positive = labels
        .iter()
        .any(|l| matches(l, POSITIVE_CARD_LABELS, POSITIVE_THRESHOLD));
    let negative = labels
        .iter()
        .find(|l| matches(l, NEGATIVE_CARD_LABELS, NEGATIVE_THRESHOLD));

    match negative {
        Some(hit) if !has_positive => Err(Error::invalid_content(format!(
            "non-card label '{}' at confidence {:.2} with no card labels",
            hit.name, hit.confidence
        ))),
        _ => Ok(()),
    }
}

/// Whether any label suggests a reflective or foil surface.
pub fn has_reflective_label(labels: &[DetectedLabel]) -> bool {
    const REFLECTIVE: &[&str] = &["reflective", "metallic", "shiny", "glossy"];
    labels
        .iter()
        .any(|l| REFLECTIVE.contains(&l.name.to_ascii_lowercase().as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_moderation_rejects_blocklisted_label() {
        let labels = vec![
            DetectedLabel::new("Card", 0.9),
            DetectedLabel::new("Violence", 0.7),
        ];
        let err = check_moderation(&labels).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidContent);
    }

    #[test]
    fn test_moderation_respects_threshold() {
        let labels = vec![DetectedLabel::new("Violence", 0.6)];
        assert!(check_moderation(&labels).is_ok());
    }

    #[test]
    fn test_card_type_rejects_person_without_card_labels() {
        let labels = vec![DetectedLabel::new("Person", 0.95)];
        let err = check_card_type(&labels).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidContent);
    }

    #[test]
    fn test_card_type_allows_person_with_card_art() {
        let labels = vec![
            DetectedLabel::new("Person", 0.95),
            DetectedLabel::new("Card", 0.85),
        ];
        assert!(check_card_type(&labels).is_ok());
    }

    #[test]
    fn test_card_type_allows_weak_negatives() {
        let labels = vec![DetectedLabel::new("Animal", 0.75)];
        assert!(check_card_type(&labels).is_ok());
    }

    #[test]
    fn test_reflective_labels() {
        assert!(has_reflective_label(&[DetectedLabel::new("Shiny", 0.5)]));
        assert!(!has_reflective_label(&[DetectedLabel::new("Paper", 0.9)]));
    }
}
