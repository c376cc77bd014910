//! Output formatting for harness commands.
//!
//! Every command has a human-readable rendering; `manifest` and `evaluate` can also emit
//! JSON for scripting.

use fundus_screen::core_modules::dataset_index::{DatasetManifest, SplitStructure};
use fundus_screen::{Category, EvaluationReport, ExtractionReport, PredictionResult, SampleRecord, Split, ValidationOutcome};
use serde::Serialize;
use std::fmt::Write;
use std::path::Path;

const RULE_WIDTH: usize = 60;

fn rule(out: &mut String, title: &str) {
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
}

/// Pretty JSON, or `{}` if serialization somehow fails.
pub fn format_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

pub fn format_manifest(manifest: &DatasetManifest) -> String {
    let mut out = String::new();
    rule(&mut out, "Dataset Manifest");
    let _ = writeln!(out, "Total images: {}", manifest.total_images);
    for (split, summary) in &manifest.splits {
        if !summary.present {
            let _ = writeln!(out, "\n{split}: not found");
            continue;
        }
        let _ = writeln!(out, "\n{split}: {} images", summary.total);
        for category in Category::ALL {
            let _ = writeln!(out, "  {category}: {}", summary.count(category));
        }
    }
    out
}

pub fn format_structure(root: &Path, structure: &[SplitStructure]) -> String {
    let mut out = String::new();
    rule(&mut out, "Dataset Structure");
    let _ = writeln!(out, "Root: {}", root.display());
    for split in structure {
        let mark = if split.exists { "ok" } else { "MISSING" };
        let _ = writeln!(out, "\n[{mark}] {} ({})", split.split, split.path.display());
        for category in &split.categories {
            if category.exists {
                let _ = writeln!(out, "  [ok] {}: {} images", category.category, category.images);
            } else {
                let _ = writeln!(out, "  [MISSING] {}", category.category);
            }
        }
    }
    out
}

pub fn format_samples(split: Split, samples: &[SampleRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} samples from {split}:", samples.len());
    for sample in samples {
        let _ = writeln!(
            out,
            "  {:<14} label={} {}",
            sample.category.dir_name(),
            sample.label,
            sample.path.display()
        );
    }
    out
}

pub fn format_validation(file: &Path, outcome: &ValidationOutcome) -> String {
    let mark = if outcome.accepted { "ACCEPT" } else { "REJECT" };
    format!("[{mark}] {}: {}", file.display(), outcome.reason)
}

pub fn format_extraction(report: &ExtractionReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Copied {} images to {}",
        report.copied,
        report.destination.display()
    );
    for (category, count) in &report.per_category {
        let _ = writeln!(out, "  {category}: {count}");
    }
    if !report.skipped.is_empty() {
        let _ = writeln!(out, "Skipped {} files:", report.skipped.len());
        for skipped in &report.skipped {
            let _ = writeln!(out, "  {}: {}", skipped.source.display(), skipped.reason);
        }
    }
    out
}

/// Single-image result: prediction, confidence, CDR and the artifacts that came back.
pub fn format_prediction(file: &Path, result: &PredictionResult) -> String {
    let mut out = String::new();
    rule(&mut out, &format!("Classification: {}", file.display()));
    if !result.validation {
        let _ = writeln!(out, "Failed: {}", result.error.as_deref().unwrap_or("unknown error"));
        return out;
    }
    let _ = writeln!(out, "Prediction:  {}", result.predicted_label);
    let _ = writeln!(out, "Confidence:  {:.1}%", result.probability * 100.0);
    if let Some(cdr) = result.cdr {
        let _ = writeln!(out, "Vertical CDR: {:.3}", cdr.vertical);
        let _ = writeln!(out, "Area CDR:     {:.3}", cdr.area);
    }
    let mut artifacts: Vec<&str> = result
        .segmentation
        .as_ref()
        .map(|bundle| bundle.present())
        .unwrap_or_default();
    if result.heatmap.is_some() {
        artifacts.push("gradcam");
    }
    if artifacts.is_empty() {
        let _ = writeln!(out, "Artifacts:   none");
    } else {
        let _ = writeln!(out, "Artifacts:   {}", artifacts.join(", "));
    }
    out
}

/// Summary block followed by one line per tested sample.
pub fn format_report(report: &EvaluationReport) -> String {
    let mut out = String::new();
    rule(&mut out, "Evaluation Summary");
    let _ = writeln!(out, "Total Tested: {}", report.total_tested);
    let _ = writeln!(out, "Correct Predictions: {}", report.correct_count);
    let _ = writeln!(out, "Accuracy: {:.2}%", report.accuracy * 100.0);
    if report.cancelled {
        let _ = writeln!(out, "(cancelled before all samples were tested)");
    }

    if report.entries.is_empty() {
        return out;
    }
    let _ = writeln!(out);
    rule(&mut out, "Detailed Results");
    for entry in &report.entries {
        let result = &entry.result;
        let mark = if entry.is_correct() { "+" } else { "-" };
        if !result.validation {
            let _ = writeln!(
                out,
                "[{mark}] {} (truth: {}) error: {}",
                entry.sample.filename,
                entry.sample.category,
                result.error.as_deref().unwrap_or("unknown error")
            );
            continue;
        }
        let cdr = result
            .cdr
            .map(|cdr| format!(" cdr: {:.3}/{:.3}", cdr.vertical, cdr.area))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "[{mark}] {} (truth: {}) prediction: {} ({:.1}%){cdr}",
            entry.sample.filename,
            entry.sample.category,
            result.predicted_label,
            result.probability * 100.0
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundus_screen::core_modules::prediction::FailureKind;
    use fundus_screen::EvaluationEntry;

    fn entry(filename: &str, category: Category, result: PredictionResult) -> EvaluationEntry {
        let sample = SampleRecord::new(format!("/d/test/x/{filename}").into(), category, Split::Test);
        EvaluationEntry { sample, result }
    }

    #[test]
    fn report_shows_summary_and_details() {
        let ok = PredictionResult::from_json(r#"{"validation": true, "prediction": "Glaucoma", "probability": 0.9}"#)
            .unwrap();
        let mut report = EvaluationReport::default();
        report.entries.push(entry("g1.jpg", Category::Glaucoma, ok));
        report.entries.push(entry(
            "n1.jpg",
            Category::NonGlaucoma,
            PredictionResult::http_error(500, "boom"),
        ));
        report.finalize();

        let text = format_report(&report);
        assert!(text.contains("Total Tested: 2"));
        assert!(text.contains("Correct Predictions: 1"));
        assert!(text.contains("Accuracy: 50.00%"));
        assert!(text.contains("[+] g1.jpg (truth: glaucoma) prediction: Glaucoma (90.0%)"));
        assert!(text.contains("error: API Error: 500 - boom"));
        assert_eq!(report.entries[1].result.failure, Some(FailureKind::Http { status: 500 }));
    }

    #[test]
    fn empty_report_has_zero_accuracy_line() {
        let mut report = EvaluationReport::default();
        report.finalize();
        let text = format_report(&report);
        assert!(text.contains("Accuracy: 0.00%"));
        assert!(!text.contains("Detailed Results"));
    }
}
