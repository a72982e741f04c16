//! Gallery construction from operator reference photos.

use crate::api::OperatorDirectory;
use crate::engine::FaceEmbedder;
use futures::future::join_all;
use rollcall_core::{Gallery, LabeledDescriptor, Operator};

/// Gallery plus the operators that could not be described.
pub struct GalleryReport {
    pub gallery: Gallery,
    /// (operator id, reason) for every dropped operator.
    pub dropped: Vec<(String, String)>,
}

impl GalleryReport {
    /// No operator yielded a usable reference face.
    pub fn no_usable_faces(&self) -> bool {
        self.gallery.is_empty()
    }
}

async fn describe_operator(
    directory: &dyn OperatorDirectory,
    embedder: &dyn FaceEmbedder,
    operator: &Operator,
) -> Result<LabeledDescriptor, String> {
    let bytes = directory
        .fetch_photo(&operator.photo)
        .await
        .map_err(|e| format!("photo fetch failed: {e}"))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|e| format!("photo decode failed: {e}"))?
        .to_luma8();

    match embedder.describe(image).await {
        Ok(Some(descriptor)) => Ok(LabeledDescriptor {
            operator: operator.clone(),
            descriptor,
        }),
        Ok(None) => Err("no face in reference photo".to_string()),
        Err(e) => Err(format!("describe failed: {e}")),
    }
}

/// Fetch and describe every operator concurrently.
///
/// Operators whose photo can't be fetched, decoded, or described are dropped;
/// the surviving entries keep roster order.
pub async fn build_gallery(
    directory: &dyn OperatorDirectory,
    embedder: &dyn FaceEmbedder,
    operators: &[Operator],
) -> GalleryReport {
    let results = join_all(
        operators
            .iter()
            .map(|op| describe_operator(directory, embedder, op)),
    )
    .await;

    let mut gallery = Gallery::new();
    let mut dropped = Vec::new();
    for (op, result) in operators.iter().zip(results) {
        match result {
            Ok(entry) => gallery.push(entry),
            Err(reason) => {
                tracing::warn!(
                    operator = %op.id,
                    name = %op.name,
                    %reason,
                    "operator left out of gallery"
                );
                dropped.push((op.id.clone(), reason));
            }
        }
    }

    tracing::info!(size = gallery.len(), dropped = dropped.len(), "gallery built");

    GalleryReport { gallery, dropped }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::engine::EngineError;
    use async_trait::async_trait;
    use image::{GrayImage, ImageFormat};
    use reqwest::StatusCode;
    use rollcall_core::Embedding;
    use std::collections::HashMap;
    use std::io::Cursor;

    pub(crate) fn operator(id: &str) -> Operator {
        Operator {
            id: id.into(),
            name: format!("Operator {id}"),
            employee_id: format!("E-{id}"),
            station: "press".into(),
            photo: format!("/uploads/{id}.png"),
            led_index: None,
        }
    }

    /// PNG whose uniform brightness doubles as the fake descriptor.
    pub(crate) fn png(brightness: u8) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        GrayImage::from_pixel(8, 8, image::Luma([brightness]))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    /// Describes an image by its first pixel; black means "no face".
    pub(crate) struct PixelEmbedder;

    #[async_trait]
    impl FaceEmbedder for PixelEmbedder {
        async fn describe(&self, image: GrayImage) -> Result<Option<Embedding>, EngineError> {
            let value = image.get_pixel(0, 0)[0];
            Ok((value != 0).then(|| Embedding::new(vec![value as f32])))
        }
    }

    struct FakeDirectory {
        photos: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl OperatorDirectory for FakeDirectory {
        async fn list_operators(&self) -> Result<Vec<Operator>, ApiError> {
            Ok(Vec::new())
        }

        async fn fetch_photo(&self, photo: &str) -> Result<Vec<u8>, ApiError> {
            self.photos.get(photo).cloned().ok_or(ApiError::Status {
                url: photo.to_string(),
                status: StatusCode::NOT_FOUND,
            })
        }
    }

    #[tokio::test]
    async fn test_failed_fetches_are_dropped() {
        let operators: Vec<Operator> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|id| operator(id))
            .collect();
        // b and d have no photo on the server.
        let photos = [("a", 10u8), ("c", 30), ("e", 50)]
            .iter()
            .map(|(id, v)| (format!("/uploads/{id}.png"), png(*v)))
            .collect();
        let directory = FakeDirectory { photos };

        let report = build_gallery(&directory, &PixelEmbedder, &operators).await;

        assert_eq!(report.gallery.len(), 3);
        let ids: Vec<&str> = report
            .gallery
            .entries()
            .iter()
            .map(|e| e.operator.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "c", "e"]);
        for entry in report.gallery.entries() {
            let expected = match entry.operator.id.as_str() {
                "a" => 10.0,
                "c" => 30.0,
                _ => 50.0,
            };
            assert_eq!(entry.descriptor.values, vec![expected]);
        }
        let dropped: Vec<&str> = report.dropped.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(dropped, vec!["b", "d"]);
    }

    #[tokio::test]
    async fn test_no_face_and_corrupt_photo_are_dropped() {
        let operators = vec![operator("dark"), operator("junk"), operator("ok")];
        let photos = HashMap::from([
            ("/uploads/dark.png".to_string(), png(0)),
            ("/uploads/junk.png".to_string(), vec![1, 2, 3]),
            ("/uploads/ok.png".to_string(), png(77)),
        ]);
        let report = build_gallery(&FakeDirectory { photos }, &PixelEmbedder, &operators).await;

        assert_eq!(report.gallery.len(), 1);
        assert_eq!(report.gallery.entries()[0].operator.id, "ok");
        assert!(report.dropped[0].1.contains("no face"));
        assert!(report.dropped[1].1.contains("decode"));
    }

    #[tokio::test]
    async fn test_all_failures_reports_empty_gallery() {
        let operators = vec![operator("x"), operator("y")];
        let directory = FakeDirectory {
            photos: HashMap::new(),
        };
        let report = build_gallery(&directory, &PixelEmbedder, &operators).await;
        assert!(report.no_usable_faces());
        assert_eq!(report.dropped.len(), 2);
    }
}
