// THEORY:
// The `SubsetExtractor` stages a small, flat copy of the corpus for fast local
// iteration: `dest/glaucoma/*` and `dest/non-glaucoma/*`, filenames unchanged.
//
// It only draws from `training` and `validation`. `test` is the held-out split and is
// never copied out. The budget is split evenly: each category may take at most
// `max_samples / 2` files across both splits, and copying stops the moment the global
// count reaches `max_samples`. Files with the same name in different splits land on the
// same destination path; the later copy wins.

use crate::core_modules::dataset_index::{Category, DatasetError, DatasetIndex, Split};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Splits the extractor draws from, in order.
pub const EXTRACT_SPLITS: [Split; 2] = [Split::Training, Split::Validation];

pub const DEFAULT_MAX_SAMPLES: usize = 20;

/// A source file that could not be copied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedCopy {
    pub source: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionReport {
    pub destination: PathBuf,
    pub copied: usize,
    pub per_category: BTreeMap<Category, usize>,
    pub skipped: Vec<SkippedCopy>,
}

pub struct SubsetExtractor {
    index: DatasetIndex,
}

impl SubsetExtractor {
    pub fn new(index: DatasetIndex) -> Self {
        Self { index }
    }

    /// Copies up to `max_samples` images into `destination/{category}/`.
    ///
    /// Fails only if the destination tree cannot be created; individual copy failures
    /// are logged and listed in `skipped`.
    pub fn extract(&self, destination: &Path, max_samples: usize) -> Result<ExtractionReport, DatasetError> {
        for category in Category::ALL {
            let dir = destination.join(category.dir_name());
            fs::create_dir_all(&dir).map_err(|source| DatasetError::CreateDir { path: dir, source })?;
        }

        let per_category_cap = max_samples / 2;
        let mut per_category: BTreeMap<Category, usize> = Category::ALL.into_iter().map(|c| (c, 0)).collect();
        let mut skipped = Vec::new();
        let mut copied = 0;

        'splits: for split in EXTRACT_SPLITS {
            if copied >= max_samples {
                break;
            }
            if !self.index.split_dir(split).is_dir() {
                warn!(split = %split, "split directory not found, skipping");
                continue;
            }

            for category in Category::ALL {
                if copied >= max_samples {
                    break 'splits;
                }
                let Some(images) = self.index.category_images(split, category) else {
                    continue;
                };

                let taken = per_category.entry(category).or_insert(0);
                for source in images {
                    if copied >= max_samples || *taken >= per_category_cap {
                        break;
                    }
                    let Some(filename) = source.file_name() else {
                        continue;
                    };
                    let target = destination.join(category.dir_name()).join(filename);
                    match fs::copy(&source, &target) {
                        Ok(_) => {
                            copied += 1;
                            *taken += 1;
                        }
                        Err(err) => {
                            warn!(source = %source.display(), error = %err, "failed to copy image");
                            skipped.push(SkippedCopy {
                                source,
                                reason: err.to_string(),
                            });
                        }
                    }
                }
            }
        }

        info!(copied, destination = %destination.display(), "created staging subset");
        Ok(ExtractionReport {
            destination: destination.to_path_buf(),
            copied,
            per_category,
            skipped,
        })
    }
}
