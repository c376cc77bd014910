// THEORY:
// This file is the main entry point for the `fundus_screen` library crate. It defines
// the public API used by the `batch_tester` command-line harness and by any other
// consumer that wants to score a glaucoma classifier against a REFUGE-style dataset.
//
// The primary export is the `BatchEvaluator` and its request/report types. The building
// blocks in `core_modules` (dataset indexing, local image acceptance, the HTTP client,
// subset extraction) are public too, because the harness exposes each of them as its
// own command, but their most-used types are re-exported here.

pub mod config;
pub mod core_modules;
pub mod evaluator;
pub mod parallel_evaluator;

pub use config::ScreeningConfig;
pub use core_modules::dataset_index::{Category, DatasetError, DatasetIndex, DatasetManifest, SampleRecord, Split};
pub use core_modules::image_acceptance::{AcceptancePolicy, Rejection, ValidationOutcome, validate};
pub use core_modules::inference_client::{Classifier, ClientError, InferenceClient};
pub use core_modules::prediction::{FailureKind, PredictionResult};
pub use core_modules::subset_extractor::{ExtractionReport, SubsetExtractor};
pub use evaluator::{BatchEvaluator, BatchProgress, BatchRequest, EvalError, EvaluationEntry, EvaluationReport};
