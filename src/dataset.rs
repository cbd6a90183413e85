use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::{ClothType, Layout};
use crate::errors::{AgnosticMaskError, Result};

/// Input folder of the flat layout.
pub const IMAGE_DIR: &str = "image";
/// Output folder, relative to the dataset root (flat) or category (paired).
pub const MASK_DIR: &str = "agnostic_masks";
pub const MASK_EXTENSION: &str = "png";
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Person images of a paired category live here.
pub const PAIRED_IMAGE_DIR: &str = "images";
pub const PAIR_LIST: &str = "test_pairs_paired.txt";
pub const PAIRED_CATEGORIES: [(&str, ClothType); 3] = [
    ("upper_body", ClothType::Upper),
    ("lower_body", ClothType::Lower),
    ("dresses", ClothType::Overall),
];

/// One image to mask and where its mask goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub input: PathBuf,
    pub output: PathBuf,
    pub cloth_type: ClothType,
}

/// A group of work items sharing one output folder.
#[derive(Debug, Clone)]
pub struct Batch {
    pub name: String,
    pub output_dir: PathBuf,
    pub items: Vec<WorkItem>,
}

/// The on-disk shape of a dataset and how to turn it into batches.
#[derive(Debug, Clone)]
pub struct Dataset {
    root: PathBuf,
    layout: Layout,
    cloth_type: ClothType,
}

impl Dataset {
    pub fn new(root: impl Into<PathBuf>, layout: Layout, cloth_type: ClothType) -> Self {
        Self {
            root: root.into(),
            layout,
            cloth_type,
        }
    }

    pub fn flat(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Layout::Flat, ClothType::Upper)
    }

    /// Checks every required input path. Never writes anything, so it can run
    /// before checkpoints are resolved.
    pub fn validate(&self) -> Result<()> {
        match self.layout {
            Layout::Flat => {
                let input_dir = self.root.join(IMAGE_DIR);
                if !input_dir.is_dir() {
                    return Err(AgnosticMaskError::missing(input_dir, "input folder"));
                }
            }
            Layout::Paired => {
                for (category, _) in PAIRED_CATEGORIES {
                    let category_dir = self.root.join(category);
                    if !category_dir.is_dir() {
                        return Err(AgnosticMaskError::missing(category_dir, "category folder"));
                    }
                    let pair_list = category_dir.join(PAIR_LIST);
                    if !pair_list.is_file() {
                        return Err(AgnosticMaskError::missing(pair_list, "pair list"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Enumerates the work for this dataset. Reads only.
    pub fn batches(&self) -> Result<Vec<Batch>> {
        self.validate()?;
        match self.layout {
            Layout::Flat => Ok(vec![self.flat_batch()?]),
            Layout::Paired => PAIRED_CATEGORIES
                .iter()
                .map(|(category, cloth_type)| self.paired_batch(category, *cloth_type))
                .collect(),
        }
    }

    fn flat_batch(&self) -> Result<Batch> {
        let input_dir = self.root.join(IMAGE_DIR);
        let output_dir = self.root.join(MASK_DIR);

        let mut items = Vec::new();
        for path in list_images(&input_dir)? {
            if let Some(output) = mask_path_for(&path, &output_dir) {
                items.push(WorkItem {
                    input: path,
                    output,
                    cloth_type: self.cloth_type,
                });
            }
        }

        Ok(Batch {
            name: IMAGE_DIR.to_string(),
            output_dir,
            items,
        })
    }

    fn paired_batch(&self, category: &str, cloth_type: ClothType) -> Result<Batch> {
        let category_dir = self.root.join(category);
        let pair_list = category_dir.join(PAIR_LIST);
        let image_dir = category_dir.join(PAIRED_IMAGE_DIR);
        let output_dir = category_dir.join(MASK_DIR);

        let content = fs::read_to_string(&pair_list)
            .map_err(|e| AgnosticMaskError::file_system(&pair_list, "read pair list", e))?;

        let mut items = Vec::new();
        for person in parse_pair_list(&content, &pair_list)? {
            let input = image_dir.join(&person);
            let output = mask_path_for(&input, &output_dir).ok_or_else(|| {
                AgnosticMaskError::Validation {
                    field: pair_list.display().to_string(),
                    reason: format!("has an unusable person image name {person:?}"),
                }
            })?;
            items.push(WorkItem {
                input,
                output,
                cloth_type,
            });
        }

        Ok(Batch {
            name: category.to_string(),
            output_dir,
            items,
        })
    }
}

/// Supported images directly inside `dir`, sorted by file name. Symlinks
/// to files count; listing errors are returned, not skipped.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry
            .map_err(|e| AgnosticMaskError::file_system(dir, "list input folder", e.into()))?;
        let path = entry.path();
        if path.is_file() && is_supported_image_format(path) {
            images.push(path.to_path_buf());
        }
    }
    Ok(images)
}

/// Person image names from a `<person> <cloth>` pair list, in file order.
pub fn parse_pair_list(content: &str, source: &Path) -> Result<Vec<String>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [person, _cloth] => Ok((*person).to_string()),
                _ => Err(AgnosticMaskError::Validation {
                    field: format!("{}:{}", source.display(), index + 1),
                    reason: format!("expected `<person> <cloth>`, got {line:?}"),
                }),
            }
        })
        .collect()
}

pub fn is_supported_image_format(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// `<stem>.png`, whatever the input extension was.
pub fn mask_file_name(file_name: &Path) -> Option<String> {
    let stem = file_name.file_stem()?.to_str()?;
    Some(format!("{stem}.{MASK_EXTENSION}"))
}

fn mask_path_for(input: &Path, output_dir: &Path) -> Option<PathBuf> {
    let name = input.file_name().map(Path::new)?;
    mask_file_name(name).map(|name| output_dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_supported_formats() {
        let test_cases = vec![
            ("test.jpg", true),
            ("test.JPEG", true),
            ("test.png", true),
            ("test.WebP", true),
            ("test.bmp", false),
            ("test.txt", false),
            ("test", false),
            (".jpg", false),
        ];

        for (filename, expected) in test_cases {
            assert_eq!(
                is_supported_image_format(Path::new(filename)),
                expected,
                "{filename}"
            );
        }
    }

    #[test]
    fn test_mask_file_name_replaces_extension() {
        let test_cases = vec![
            ("a.jpg", "a.png"),
            ("b.jpeg", "b.png"),
            ("c.png", "c.png"),
            ("d.webp", "d.png"),
            ("E.JPG", "E.png"),
            ("x.jpg.jpg", "x.jpg.png"),
            ("my.jpgphoto.jpeg", "my.jpgphoto.png"),
        ];

        for (input, expected) in test_cases {
            assert_eq!(
                mask_file_name(Path::new(input)).as_deref(),
                Some(expected),
                "{input}"
            );
        }
    }

    #[test]
    fn test_parse_pair_list() -> Result<()> {
        let content = "048392_0.jpg 048392_1.jpg\n\n  048393_0.jpg   048393_1.jpg  \n";
        let persons = parse_pair_list(content, Path::new("pairs.txt"))?;
        assert_eq!(persons, vec!["048392_0.jpg", "048393_0.jpg"]);
        Ok(())
    }

    #[test]
    fn test_parse_pair_list_rejects_malformed_line() {
        let content = "a.jpg a_cloth.jpg\nlonely.jpg\n";
        let err = parse_pair_list(content, Path::new("pairs.txt")).unwrap_err();
        assert!(err.to_string().contains("pairs.txt:2"), "{err}");
    }

    #[test]
    fn test_flat_batch_filters_and_sorts() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let image_dir = temp_dir.path().join(IMAGE_DIR);
        fs::create_dir_all(image_dir.join("nested"))?;
        for name in ["b.png", "a.JPG", "notes.txt", "c.webp"] {
            fs::write(image_dir.join(name), b"")?;
        }
        fs::write(image_dir.join("nested").join("deep.jpg"), b"")?;

        let batches = Dataset::flat(temp_dir.path()).batches()?;
        assert_eq!(batches.len(), 1);

        let names: Vec<_> = batches[0]
            .items
            .iter()
            .map(|item| item.output.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
        assert_eq!(batches[0].output_dir, temp_dir.path().join(MASK_DIR));
        Ok(())
    }

    #[test]
    fn test_list_images_reports_listing_errors() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("gone");

        match list_images(&missing) {
            Err(AgnosticMaskError::FileSystem {
                path, operation, ..
            }) => {
                assert_eq!(path, missing);
                assert_eq!(operation, "list input folder");
            }
            other => panic!("expected a listing error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_list_images_follows_symlinks() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let image_dir = temp_dir.path().join(IMAGE_DIR);
        fs::create_dir_all(&image_dir)?;
        let target = temp_dir.path().join("real.jpg");
        fs::write(&target, b"")?;
        std::os::unix::fs::symlink(&target, image_dir.join("linked.jpg"))?;
        std::os::unix::fs::symlink(
            temp_dir.path().join("nowhere.jpg"),
            image_dir.join("dangling.jpg"),
        )?;

        assert_eq!(list_images(&image_dir)?, vec![image_dir.join("linked.jpg")]);
        Ok(())
    }

    #[test]
    fn test_validate_flat_missing_input() {
        let temp_dir = TempDir::new().unwrap();
        assert!(Dataset::flat(temp_dir.path()).validate().is_err());
    }

    #[test]
    fn test_paired_batches() -> Result<()> {
        let temp_dir = TempDir::new()?;
        for (category, _) in PAIRED_CATEGORIES {
            let dir = temp_dir.path().join(category);
            fs::create_dir_all(dir.join(PAIRED_IMAGE_DIR))?;
            fs::write(dir.join(PAIR_LIST), format!("{category}_0.jpg {category}_1.jpg\n"))?;
        }

        let dataset = Dataset::new(temp_dir.path(), Layout::Paired, ClothType::Upper);
        let batches = dataset.batches()?;
        assert_eq!(batches.len(), 3);

        let lower = &batches[1];
        assert_eq!(lower.name, "lower_body");
        assert_eq!(lower.items[0].cloth_type, ClothType::Lower);
        assert_eq!(
            lower.items[0].input,
            temp_dir.path().join("lower_body/images/lower_body_0.jpg")
        );
        assert_eq!(
            lower.items[0].output,
            temp_dir.path().join("lower_body/agnostic_masks/lower_body_0.png")
        );
        assert_eq!(batches[2].items[0].cloth_type, ClothType::Overall);
        Ok(())
    }

    #[test]
    fn test_validate_paired_requires_pair_lists() -> Result<()> {
        let temp_dir = TempDir::new()?;
        for (category, _) in PAIRED_CATEGORIES {
            fs::create_dir_all(temp_dir.path().join(category))?;
        }
        let dataset = Dataset::new(temp_dir.path(), Layout::Paired, ClothType::Upper);
        assert!(dataset.validate().is_err());
        Ok(())
    }
}
