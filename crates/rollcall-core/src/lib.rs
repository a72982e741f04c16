//! rollcall-core — face detection, descriptor extraction, and gallery matching.
//!
//! SCRFD finds faces, ArcFace turns an aligned crop into a descriptor, and
//! the Euclidean matcher decides which known operator (if any) it belongs to.

pub mod alignment;
pub mod detector;
pub mod matcher;
pub mod recognizer;
pub mod roster;
pub mod types;

use std::path::PathBuf;

pub use detector::FaceDetector;
pub use matcher::{EuclideanMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use recognizer::FaceRecognizer;
pub use roster::{RosterError, RosterRules};
pub use types::{DetectedFace, Embedding, Gallery, LabeledDescriptor, MatchResult, Operator};

/// Default directory holding `det_10g.onnx` and `w600k_r50.onnx`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/models")
}
