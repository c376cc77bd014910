// THEORY:
// `PredictionResult` is the typed shape of one answer from the remote classifier. The
// service speaks loosely-typed JSON where almost every key is optional; this module is
// the single place where that looseness is pinned down into explicit `Option`s and
// sub-records (CDR, segmentation bundle, Grad-CAM heatmap).
//
// A result can come from two places:
// - **The wire**: a 200 response body, parsed by `PredictionResult::from_json`.
// - **Local synthesis**: transport failures, HTTP errors, unreadable files and
//   pre-screen rejections are all folded into the same shape with `validation: false`,
//   an `error` message, and a `FailureKind` saying which layer failed.
//
// Either way, downstream code (the evaluator, the CLI) never has to ask "did this throw?"
// It only asks "did this pass validation?"

use crate::core_modules::dataset_index::Category;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Cup-to-disc ratio measurements.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CupDiscRatio {
    #[serde(default)]
    pub vertical: f64,
    #[serde(default)]
    pub area: f64,
}

/// An image returned by the service, already base64-decoded.
#[derive(Clone, PartialEq)]
pub struct ImageArtifact {
    bytes: Vec<u8>,
}

impl ImageArtifact {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Decodes a base64 payload, tolerating a `data:<mime>;base64,` prefix.
    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        let payload = match encoded.find("base64,") {
            Some(idx) if encoded.starts_with("data:") => &encoded[idx + "base64,".len()..],
            _ => encoded,
        };
        let bytes = STANDARD.decode(payload.trim())?;
        Ok(Self { bytes })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decodes the artifact into pixels.
    pub fn to_image(&self) -> Result<DynamicImage, ImageError> {
        image::load_from_memory(&self.bytes)
    }
}

impl fmt::Debug for ImageArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageArtifact")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Optic disc, optic cup and overlay masks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SegmentationBundle {
    pub disc: Option<ImageArtifact>,
    pub cup: Option<ImageArtifact>,
    pub overlay: Option<ImageArtifact>,
}

impl SegmentationBundle {
    /// Names of the artifacts present, in disc/cup/overlay order.
    pub fn present(&self) -> Vec<&'static str> {
        [
            ("disc", self.disc.is_some()),
            ("cup", self.cup.is_some()),
            ("overlay", self.overlay.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect()
    }
}

/// Which layer produced a failed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The service answered with a non-200 status.
    Http { status: u16 },
    /// Connection refused, timeout, DNS, or an unparseable body.
    Transport,
    /// The sample could not be read from disk.
    Read,
    /// The local acceptance gate turned the image away before any request.
    Rejected,
}

/// One classification outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub validation: bool,
    pub error: Option<String>,
    /// Empty when the service sent no prediction.
    pub predicted_label: String,
    /// Zero when the service sent no probability.
    pub probability: f64,
    pub cdr: Option<CupDiscRatio>,
    #[serde(skip)]
    pub segmentation: Option<SegmentationBundle>,
    #[serde(skip)]
    pub heatmap: Option<ImageArtifact>,
    pub failure: Option<FailureKind>,
    pub ground_truth: Option<Category>,
    pub filename: Option<String>,
}

#[derive(Deserialize)]
struct WireSegmentation {
    disc: Option<String>,
    cup: Option<String>,
    overlay: Option<String>,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    validation: bool,
    error: Option<String>,
    prediction: Option<String>,
    probability: Option<f64>,
    cdr: Option<CupDiscRatio>,
    segmentation: Option<WireSegmentation>,
    gradcam: Option<String>,
}

fn decode_artifact(name: &str, encoded: Option<String>) -> Option<ImageArtifact> {
    let encoded = encoded?;
    match ImageArtifact::from_base64(&encoded) {
        Ok(artifact) => Some(artifact),
        Err(err) => {
            warn!(artifact = name, error = %err, "dropping artifact with invalid base64");
            None
        }
    }
}

impl PredictionResult {
    /// Parses a 200 response body. Missing optional keys become `None`.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        let wire: WireResponse = serde_json::from_str(body)?;
        let segmentation = wire.segmentation.map(|seg| SegmentationBundle {
            disc: decode_artifact("segmentation.disc", seg.disc),
            cup: decode_artifact("segmentation.cup", seg.cup),
            overlay: decode_artifact("segmentation.overlay", seg.overlay),
        });

        Ok(Self {
            validation: wire.validation,
            error: wire.error,
            predicted_label: wire.prediction.unwrap_or_default(),
            probability: wire.probability.unwrap_or(0.0),
            cdr: wire.cdr,
            segmentation,
            heatmap: decode_artifact("gradcam", wire.gradcam),
            failure: None,
            ground_truth: None,
            filename: None,
        })
    }

    /// A locally synthesized failure.
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            validation: false,
            error: Some(message.into()),
            predicted_label: String::new(),
            probability: 0.0,
            cdr: None,
            segmentation: None,
            heatmap: None,
            failure: Some(kind),
            ground_truth: None,
            filename: None,
        }
    }

    pub fn http_error(status: u16, body: &str) -> Self {
        Self::failed(
            FailureKind::Http { status },
            format!("API Error: {status} - {body}"),
        )
    }

    pub fn connection_error(message: impl fmt::Display) -> Self {
        Self::failed(FailureKind::Transport, format!("Connection Error: {message}"))
    }

    pub fn read_error(message: impl fmt::Display) -> Self {
        Self::failed(FailureKind::Read, format!("Read Error: {message}"))
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::failed(FailureKind::Rejected, reason)
    }

    /// Attaches the sample's ground truth and file name.
    pub fn with_ground_truth(mut self, category: Category, filename: impl Into<String>) -> Self {
        self.ground_truth = Some(category);
        self.filename = Some(filename.into());
        self
    }

    pub fn predicts_glaucoma(&self) -> bool {
        self.predicted_label.to_lowercase() == "glaucoma"
    }

    /// A validated prediction of "glaucoma" matches glaucoma ground truth; any other
    /// validated prediction matches non-glaucoma. Unvalidated results never match.
    pub fn is_correct_for(&self, truth: Category) -> bool {
        self.validation && self.predicts_glaucoma() == (truth == Category::Glaucoma)
    }
}
