use serde::{Deserialize, Serialize};

/// A detected face: bounding box, detector confidence, and five-point landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// [left_eye, right_eye, nose, left_mouth, right_mouth] in source pixels.
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl DetectedFace {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-union with another face box.
    pub fn iou(&self, other: &DetectedFace) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);

        let overlap = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - overlap;
        if union > 0.0 {
            overlap / union
        } else {
            0.0
        }
    }
}

/// Face descriptor (512-dimensional, L2-normalised for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance between two descriptors.
    ///
    /// Descriptors of different length are compared over the shared prefix;
    /// the extra dimensions count as distance from zero.
    pub fn distance(&self, other: &Embedding) -> f32 {
        let (short, long) = if self.values.len() <= other.values.len() {
            (&self.values, &other.values)
        } else {
            (&other.values, &self.values)
        };

        let shared: f32 = short
            .iter()
            .zip(long.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        let tail: f32 = long[short.len()..].iter().map(|v| v * v).sum();

        (shared + tail).sqrt()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Operator record as served by the operator directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operator {
    pub id: String,
    pub name: String,
    pub employee_id: String,
    pub station: String,
    /// Absolute URL or a path relative to the directory base URL.
    pub photo: String,
    #[serde(default)]
    pub led_index: Option<u32>,
}

/// An operator identity paired with the descriptor computed from their photo.
#[derive(Debug, Clone)]
pub struct LabeledDescriptor {
    pub operator: Operator,
    pub descriptor: Embedding,
}

/// Labeled descriptors currently considered known, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<LabeledDescriptor>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LabeledDescriptor) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LabeledDescriptor] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the LED index of the given operator, keeping its descriptor.
    pub fn clear_led(&mut self, operator_id: &str) {
        for entry in self.entries.iter_mut().filter(|e| e.operator.id == operator_id) {
            entry.operator.led_index = None;
        }
    }
}

impl FromIterator<LabeledDescriptor> for Gallery {
    fn from_iter<I: IntoIterator<Item = LabeledDescriptor>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Outcome of comparing a probe against a gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Matched operator, or `None` for "unknown".
    pub operator: Option<Operator>,
    /// Distance to the nearest gallery entry; infinite for an empty gallery.
    pub distance: f32,
}

impl MatchResult {
    pub fn unknown(distance: f32) -> Self {
        Self {
            operator: None,
            distance,
        }
    }

    pub fn is_match(&self) -> bool {
        self.operator.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32) -> DetectedFace {
        DetectedFace {
            x,
            y,
            width: w,
            height: h,
            confidence: 1.0,
            landmarks: None,
        }
    }

    #[test]
    fn test_distance_identical() {
        let a = Embedding::new(vec![0.3, 0.4, 0.5]);
        assert_eq!(a.distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_distance_pythagorean() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
        assert!((b.distance(&a) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_length_mismatch_counts_tail() {
        let a = Embedding::new(vec![1.0]);
        let b = Embedding::new(vec![1.0, 2.0]);
        assert!((a.distance(&b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_identical() {
        let a = face(0.0, 0.0, 100.0, 100.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = face(0.0, 0.0, 10.0, 10.0);
        let b = face(20.0, 20.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = face(0.0, 0.0, 10.0, 10.0);
        let b = face(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_operator_json_camel_case() {
        let op: Operator = serde_json::from_str(
            r#"{"id":"7","name":"Ana","employeeId":"E-7","station":"press","photo":"/uploads/7.jpg","ledIndex":3}"#,
        )
        .unwrap();
        assert_eq!(op.employee_id, "E-7");
        assert_eq!(op.led_index, Some(3));

        let no_led: Operator = serde_json::from_str(
            r#"{"id":"8","name":"Bo","employeeId":"E-8","station":"press","photo":"8.jpg"}"#,
        )
        .unwrap();
        assert_eq!(no_led.led_index, None);
    }

    #[test]
    fn test_gallery_clear_led() {
        let op = Operator {
            id: "1".into(),
            name: "A".into(),
            employee_id: "E1".into(),
            station: "s".into(),
            photo: "p".into(),
            led_index: Some(2),
        };
        let mut gallery: Gallery = [LabeledDescriptor {
            operator: op,
            descriptor: Embedding::new(vec![1.0]),
        }]
        .into_iter()
        .collect();
        gallery.clear_led("1");
        assert_eq!(gallery.entries()[0].operator.led_index, None);
    }
}
