// THEORY:
// The `DatasetIndex` is the ground floor of the evaluation stack. It turns a directory
// tree into typed records and counts, and it is the *only* source of ground truth in the
// whole system: a fundus photograph is "glaucoma" because it sits in a `glaucoma/`
// folder, nothing more.
//
// Expected layout:
//
//   <root>/
//   ├── training/   { glaucoma/, non-glaucoma/ }
//   ├── validation/ { glaucoma/, non-glaucoma/ }
//   └── test/       { glaucoma/, non-glaucoma/ }
//
// Key architectural principles:
// 1.  **Read-Only**: The index never writes. Every call re-walks the filesystem, so a
//     manifest is a snapshot that goes stale the moment the tree changes. There is no
//     cache to invalidate.
// 2.  **Absence Is Data**: A missing split or category is reported as a count of zero
//     (and a warning), never as a failure. One missing folder must not hide the counts
//     of its siblings.
// 3.  **Deterministic Discovery**: Images are matched by exact file suffix (`.jpg`,
//     `.png`), never by sniffing content. Within a category, `.jpg` files come first,
//     then `.png` files, each group sorted by name, so repeated scans of an unchanged
//     tree always yield the same order.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

/// File suffixes accepted as images, in discovery order.
pub const IMAGE_EXTENSIONS: [&str; 2] = [".jpg", ".png"];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("unknown split `{0}` (expected training, validation or test)")]
    UnknownSplit(String),
    #[error("unknown category `{0}` (expected glaucoma or non-glaucoma)")]
    UnknownCategory(String),
    #[error("failed to create directory `{path}`: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One partition of the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Split {
    #[serde(rename = "training")]
    Training,
    #[serde(rename = "validation")]
    Validation,
    #[serde(rename = "test")]
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Training, Split::Validation, Split::Test];

    /// The directory name of this split under the dataset root.
    pub fn dir_name(self) -> &'static str {
        match self {
            Split::Training => "training",
            Split::Validation => "validation",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Split {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Split::ALL
            .into_iter()
            .find(|split| split.dir_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DatasetError::UnknownSplit(s.to_string()))
    }
}

/// The binary ground-truth class, encoded by directory placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Category {
    #[serde(rename = "glaucoma")]
    Glaucoma,
    #[serde(rename = "non-glaucoma")]
    NonGlaucoma,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Glaucoma, Category::NonGlaucoma];

    pub fn dir_name(self) -> &'static str {
        match self {
            Category::Glaucoma => "glaucoma",
            Category::NonGlaucoma => "non-glaucoma",
        }
    }

    /// Numeric label: 1 for glaucoma, 0 otherwise.
    pub fn label(self) -> u8 {
        match self {
            Category::Glaucoma => 1,
            Category::NonGlaucoma => 0,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Category {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.dir_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DatasetError::UnknownCategory(s.to_string()))
    }
}

/// A single indexed image. Immutable once created by a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRecord {
    pub path: PathBuf,
    pub filename: String,
    pub category: Category,
    pub split: Split,
    /// Always `category.label()`.
    pub label: u8,
}

impl SampleRecord {
    pub fn new(path: PathBuf, category: Category, split: Split) -> Self {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            filename,
            category,
            split,
            label: category.label(),
        }
    }
}

fn is_present(present: &bool) -> bool {
    *present
}

/// Per-split image counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitSummary {
    /// Sum of `categories` values.
    pub total: usize,
    pub categories: BTreeMap<Category, usize>,
    /// `false` when the split directory does not exist on disk.
    #[serde(skip_serializing_if = "is_present")]
    pub present: bool,
}

impl SplitSummary {
    fn absent() -> Self {
        Self {
            total: 0,
            categories: Category::ALL.into_iter().map(|c| (c, 0)).collect(),
            present: false,
        }
    }

    pub fn count(&self, category: Category) -> usize {
        self.categories.get(&category).copied().unwrap_or(0)
    }
}

/// Corpus summary, recomputed on every call to [`DatasetIndex::build_manifest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetManifest {
    pub total_images: usize,
    pub splits: BTreeMap<Split, SplitSummary>,
}

impl DatasetManifest {
    pub fn split(&self, split: Split) -> Option<&SplitSummary> {
        self.splits.get(&split)
    }
}

/// Existence and size of one category directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryStructure {
    pub category: Category,
    pub exists: bool,
    pub images: usize,
}

/// Existence of one split directory and its categories.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitStructure {
    pub split: Split,
    pub path: PathBuf,
    pub exists: bool,
    pub categories: Vec<CategoryStructure>,
}

/// Walks a `{split}/{category}/*.{jpg,png}` tree.
#[derive(Debug, Clone)]
pub struct DatasetIndex {
    root: PathBuf,
}

impl DatasetIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn split_dir(&self, split: Split) -> PathBuf {
        self.root.join(split.dir_name())
    }

    pub fn category_dir(&self, split: Split, category: Category) -> PathBuf {
        self.split_dir(split).join(category.dir_name())
    }

    /// Counts images per split and category. Never fails: missing directories count as zero.
    pub fn build_manifest(&self) -> DatasetManifest {
        let mut splits = BTreeMap::new();
        let mut total_images = 0;

        for split in Split::ALL {
            let split_path = self.split_dir(split);
            if !split_path.is_dir() {
                warn!(split = %split, path = %split_path.display(), "split directory not found");
                splits.insert(split, SplitSummary::absent());
                continue;
            }

            let mut categories = BTreeMap::new();
            let mut total = 0;
            for category in Category::ALL {
                let count = self
                    .category_images(split, category)
                    .map(|images| images.len())
                    .unwrap_or(0);
                categories.insert(category, count);
                total += count;
            }

            debug!(split = %split, total, "indexed split");
            total_images += total;
            splits.insert(
                split,
                SplitSummary {
                    total,
                    categories,
                    present: true,
                },
            );
        }

        DatasetManifest {
            total_images,
            splits,
        }
    }

    /// Returns up to `limit` records per category for `split`, category-major, in discovery order.
    /// An absent split yields an empty list.
    pub fn sample_images(&self, split: Split, limit: usize) -> Vec<SampleRecord> {
        let split_path = self.split_dir(split);
        if !split_path.is_dir() {
            warn!(split = %split, path = %split_path.display(), "split directory not found");
            return Vec::new();
        }

        let mut samples = Vec::new();
        for category in Category::ALL {
            let Some(images) = self.category_images(split, category) else {
                continue;
            };
            samples.extend(
                images
                    .into_iter()
                    .take(limit)
                    .map(|path| SampleRecord::new(path, category, split)),
            );
        }
        samples
    }

    /// Reports which split/category directories exist and how many images each holds.
    pub fn structure_report(&self) -> Vec<SplitStructure> {
        Split::ALL
            .into_iter()
            .map(|split| {
                let path = self.split_dir(split);
                let exists = path.is_dir();
                let categories = Category::ALL
                    .into_iter()
                    .map(|category| {
                        let images = if exists {
                            self.category_images(split, category)
                        } else {
                            None
                        };
                        CategoryStructure {
                            category,
                            exists: images.is_some(),
                            images: images.map(|i| i.len()).unwrap_or(0),
                        }
                    })
                    .collect();
                SplitStructure {
                    split,
                    path,
                    exists,
                    categories,
                }
            })
            .collect()
    }

    /// Image paths in one category directory, or `None` if that directory is absent.
    pub fn category_images(&self, split: Split, category: Category) -> Option<Vec<PathBuf>> {
        let dir = self.category_dir(split, category);
        if !dir.is_dir() {
            warn!(split = %split, category = %category, path = %dir.display(), "category directory not found");
            return None;
        }
        Some(list_images(&dir))
    }
}

/// Lists `.jpg` files then `.png` files in `dir`, each group sorted by file name.
fn list_images(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %dir.display(), error = %err, "could not read directory");
            return Vec::new();
        }
    };

    let mut groups: [Vec<PathBuf>; IMAGE_EXTENSIONS.len()] = Default::default();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(slot) = IMAGE_EXTENSIONS.iter().position(|ext| name.ends_with(ext)) {
            groups[slot].push(path);
        }
    }

    groups
        .into_iter()
        .flat_map(|mut group| {
            group.sort();
            group
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"not really an image").unwrap();
    }

    /// training/glaucoma: 3, training/non-glaucoma: 2, validation: empty, test: absent.
    fn scenario_a() -> TempDir {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "training/glaucoma/g001.jpg");
        touch(dir.path(), "training/glaucoma/g002.jpg");
        touch(dir.path(), "training/glaucoma/g003.png");
        touch(dir.path(), "training/non-glaucoma/n001.jpg");
        touch(dir.path(), "training/non-glaucoma/n002.png");
        fs::create_dir_all(dir.path().join("validation")).unwrap();
        dir
    }

    #[test]
    fn manifest_counts_present_and_absent_splits() {
        let dir = scenario_a();
        let manifest = DatasetIndex::new(dir.path()).build_manifest();

        assert_eq!(manifest.total_images, 5);

        let training = manifest.split(Split::Training).unwrap();
        assert_eq!(training.total, 5);
        assert_eq!(training.count(Category::Glaucoma), 3);
        assert_eq!(training.count(Category::NonGlaucoma), 2);

        let validation = manifest.split(Split::Validation).unwrap();
        assert!(validation.present);
        assert_eq!(validation.total, 0);

        let test = manifest.split(Split::Test).unwrap();
        assert!(!test.present);
        assert_eq!(test.total, 0);
        assert_eq!(test.count(Category::Glaucoma), 0);
        assert_eq!(test.count(Category::NonGlaucoma), 0);
    }

    #[test]
    fn manifest_totals_are_consistent() {
        let dir = scenario_a();
        touch(dir.path(), "test/non-glaucoma/t1.png");
        let manifest = DatasetIndex::new(dir.path()).build_manifest();

        let mut grand_total = 0;
        for summary in manifest.splits.values() {
            assert_eq!(summary.total, summary.categories.values().sum::<usize>());
            grand_total += summary.total;
        }
        assert_eq!(manifest.total_images, grand_total);
        assert_eq!(manifest.total_images, 6);
    }

    #[test]
    fn manifest_of_missing_root_is_all_zero() {
        let manifest = DatasetIndex::new("/definitely/not/a/dataset").build_manifest();
        assert_eq!(manifest.total_images, 0);
        assert_eq!(manifest.splits.len(), 3);
        assert!(manifest.splits.values().all(|s| !s.present && s.total == 0));
    }

    #[test]
    fn only_exact_image_suffixes_are_counted() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "test/glaucoma/a.jpg");
        touch(dir.path(), "test/glaucoma/b.jpeg");
        touch(dir.path(), "test/glaucoma/c.JPG");
        touch(dir.path(), "test/glaucoma/d.png.txt");
        touch(dir.path(), "test/glaucoma/notes.md");
        fs::create_dir_all(dir.path().join("test/glaucoma/nested.jpg")).unwrap();

        let manifest = DatasetIndex::new(dir.path()).build_manifest();
        assert_eq!(manifest.split(Split::Test).unwrap().count(Category::Glaucoma), 1);
    }

    #[test]
    fn manifest_serializes_with_directory_names() {
        let dir = scenario_a();
        let manifest = DatasetIndex::new(dir.path()).build_manifest();
        let json = serde_json::to_value(&manifest).unwrap();

        assert_eq!(json["total_images"], 5);
        assert_eq!(json["splits"]["training"]["categories"]["glaucoma"], 3);
        assert_eq!(json["splits"]["training"]["categories"]["non-glaucoma"], 2);
        assert!(json["splits"]["training"].get("present").is_none());
        assert_eq!(json["splits"]["test"]["present"], false);
    }

    #[test]
    fn samples_are_category_major_and_limited() {
        let dir = scenario_a();
        let samples = DatasetIndex::new(dir.path()).sample_images(Split::Training, 2);

        let names: Vec<_> = samples.iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(names, ["g001.jpg", "g002.jpg", "n001.jpg", "n002.png"]);

        for sample in &samples {
            assert_eq!(sample.split, Split::Training);
            assert_eq!(sample.label, sample.category.label());
            assert!(sample.path.ends_with(format!("{}/{}", sample.category, sample.filename)));
        }
        assert_eq!(samples[0].label, 1);
        assert_eq!(samples[3].label, 0);
    }

    #[test]
    fn jpg_files_are_discovered_before_png() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "training/glaucoma/a.png");
        touch(dir.path(), "training/glaucoma/z.jpg");
        let samples = DatasetIndex::new(dir.path()).sample_images(Split::Training, 10);
        let names: Vec<_> = samples.iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(names, ["z.jpg", "a.png"]);
    }

    #[test]
    fn samples_from_absent_split_or_category() {
        let dir = scenario_a();
        let index = DatasetIndex::new(dir.path());
        assert!(index.sample_images(Split::Test, 5).is_empty());
        assert!(index.sample_images(Split::Validation, 5).is_empty());

        fs::remove_dir_all(dir.path().join("training/glaucoma")).unwrap();
        let samples = index.sample_images(Split::Training, 5);
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.category == Category::NonGlaucoma));
    }

    #[test]
    fn structure_report_flags_missing_directories() {
        let dir = scenario_a();
        let report = DatasetIndex::new(dir.path()).structure_report();

        assert_eq!(report.len(), 3);
        assert!(report[0].exists);
        assert_eq!(report[0].categories[0].images, 3);
        assert!(report[1].exists);
        assert!(report[1].categories.iter().all(|c| !c.exists));
        assert!(!report[2].exists);
    }

    #[test]
    fn split_and_category_parse_from_directory_names() {
        assert_eq!("training".parse::<Split>().unwrap(), Split::Training);
        assert_eq!("Test".parse::<Split>().unwrap(), Split::Test);
        assert!(matches!("train".parse::<Split>(), Err(DatasetError::UnknownSplit(_))));
        assert_eq!("non-glaucoma".parse::<Category>().unwrap(), Category::NonGlaucoma);
        assert!("normal".parse::<Category>().is_err());
    }
}
