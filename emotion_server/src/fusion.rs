//! Confidence-weighted fusion of face and speech predictions.
use common::protocol::{CombinedResult, ModalityResult};

/// Weight of the more confident modality.
const DOMINANT_WEIGHT: f32 = 0.6;

/// Weight of the less confident modality.
const SECONDARY_WEIGHT: f32 = 0.4;

pub const FUSION_METHOD: &str = "weighted_average";

/// Combine two predictions. The label of the more confident modality wins; speech wins ties.
pub fn fuse(face: &ModalityResult, speech: &ModalityResult) -> CombinedResult {
    let (emotion, confidence) = if face.confidence > speech.confidence {
        (
            &face.emotion,
            DOMINANT_WEIGHT * face.confidence + SECONDARY_WEIGHT * speech.confidence,
        )
    } else {
        (
            &speech.emotion,
            SECONDARY_WEIGHT * face.confidence + DOMINANT_WEIGHT * speech.confidence,
        )
    };

    CombinedResult {
        emotion: emotion.clone(),
        confidence,
        method: FUSION_METHOD.into(),
    }
}
