//! Image-folder dataset loader
//!
//! Expects one sub-directory per class under the root. Images are found
//! recursively inside each class directory, decoded, resized with a bicubic
//! filter, and min-max normalized per image.
//!
//! ```text
//! root/
//! ├── class_a/
//! │   ├── img_001.jpg
//! │   └── nested/img_002.jpg
//! └── class_b/
//!     └── ...
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::imageops::FilterType;
use image::ImageReader;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::dataset::image_set::{ImageSet, CHANNELS};
use crate::{CapsNetError, Result};

/// Optional per-class brightness scaling applied after normalization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassIntensity {
    /// Leave normalized pixels in [0, 1]
    #[default]
    None,
    /// Multiply every pixel by `(label + 1) / num_classes`
    ByClassIndex,
}

impl ClassIntensity {
    /// Factor applied to images of class `label`
    pub fn factor(&self, label: usize, num_classes: usize) -> f32 {
        match self {
            ClassIntensity::None => 1.0,
            ClassIntensity::ByClassIndex => (label + 1) as f32 / num_classes.max(1) as f32,
        }
    }
}

/// Options controlling how folder images are decoded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderLoadOptions {
    /// Side length images are resized to
    pub image_size: usize,
    /// Accepted file extensions, compared case-insensitively
    pub extensions: Vec<String>,
    pub class_intensity: ClassIntensity,
}

impl Default for FolderLoadOptions {
    fn default() -> Self {
        Self {
            image_size: 75,
            extensions: vec!["jpg".to_string()],
            class_intensity: ClassIntensity::None,
        }
    }
}

/// One image file and its class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderSample {
    pub path: PathBuf,
    pub label: usize,
}

/// Files discovered under a class-per-directory root
#[derive(Debug, Clone)]
pub struct ImageFolder {
    pub root: PathBuf,
    /// Sorted class directory names; the index is the label
    pub class_names: Vec<String>,
    pub samples: Vec<FolderSample>,
}

impl ImageFolder {
    /// Walk `root` and collect every file matching `extensions`
    pub fn scan<P: AsRef<Path>>(root: P, extensions: &[String]) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        info!("Scanning image folder: {:?}", root);

        if !root.is_dir() {
            return Err(CapsNetError::PathNotFound(root));
        }

        let mut class_names = Vec::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    class_names.push(name.to_string());
                }
            }
        }
        class_names.sort();

        if class_names.is_empty() {
            return Err(CapsNetError::Dataset(format!(
                "no class directories found in {:?}",
                root
            )));
        }

        let mut samples = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let before = samples.len();
            for entry in WalkDir::new(root.join(class_name))
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let path = entry.path();
                if has_extension(path, extensions) {
                    samples.push(FolderSample {
                        path: path.to_path_buf(),
                        label,
                    });
                }
            }
            debug!(
                "Class '{}' (label {}): {} files",
                class_name,
                label,
                samples.len() - before
            );
        }

        info!(
            "Found {} files in {} classes",
            samples.len(),
            class_names.len()
        );

        Ok(Self {
            root,
            class_names,
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Number of files per class
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.num_classes()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }

    /// Decode every file in parallel
    ///
    /// Files that fail to decode are logged and skipped. Order follows the
    /// scan order regardless of thread scheduling.
    pub fn load(&self, options: &FolderLoadOptions) -> Result<ImageSet> {
        let total = self.samples.len();
        let num_classes = self.num_classes();
        info!("Decoding {} images at {}px", total, options.image_size);

        let pb = ProgressBar::new(total as u64);
        pb.set_style(progress_style());
        let done = AtomicUsize::new(0);

        let decoded: Vec<Option<(Vec<f32>, usize)>> = self
            .samples
            .par_iter()
            .map(|sample| {
                let result = load_image(&sample.path, options.image_size);
                let count = done.fetch_add(1, Ordering::Relaxed);
                if count % 100 == 0 {
                    pb.set_position(count as u64);
                }
                match result {
                    Ok(mut image) => {
                        let factor = options.class_intensity.factor(sample.label, num_classes);
                        if factor != 1.0 {
                            image.iter_mut().for_each(|v| *v *= factor);
                        }
                        Some((image, sample.label))
                    }
                    Err(e) => {
                        warn!("Problem in file {:?}: {}", sample.path, e);
                        None
                    }
                }
            })
            .collect();

        pb.finish_and_clear();

        let (images, labels): (Vec<_>, Vec<_>) = decoded.into_iter().flatten().unzip();
        let skipped = total - images.len();
        if skipped > 0 {
            warn!("Skipped {} unreadable files", skipped);
        }
        if images.is_empty() {
            return Err(CapsNetError::Dataset(format!(
                "no readable images under {:?}",
                self.root
            )));
        }

        ImageSet::new(images, labels, self.class_names.clone(), options.image_size)
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
        .unwrap_or(false)
}

pub(crate) fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Decode one image, resize it bicubically, and return min-max normalized CHW data
pub fn load_image(path: &Path, image_size: usize) -> Result<Vec<f32>> {
    let rgb = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?
        .resize_exact(image_size as u32, image_size as u32, FilterType::CatmullRom)
        .to_rgb8();

    let plane = image_size * image_size;
    let mut data = vec![0.0f32; CHANNELS * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = y as usize * image_size + x as usize;
        for c in 0..CHANNELS {
            data[c * plane + offset] = pixel[c] as f32;
        }
    }

    min_max_normalize(&mut data);
    Ok(data)
}

/// Rescale values into [0, 1]; a constant image becomes all zeros
pub fn min_max_normalize(data: &mut [f32]) {
    let (min, max) = data
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    if !range.is_finite() || range <= f32::EPSILON {
        data.iter_mut().for_each(|v| *v = 0.0);
        return;
    }
    data.iter_mut().for_each(|v| *v = (*v - min) / range);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_jpg(path: &Path, shade: u8) {
        let mut img = RgbImage::new(8, 8);
        for (x, y, px) in img.enumerate_pixels_mut() {
            let v = shade.saturating_add((x + y) as u8 * 4);
            *px = Rgb([v, v / 2, 255 - v]);
        }
        img.save(path).unwrap();
    }

    fn build_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("alpha");
        let b = dir.path().join("beta").join("nested");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        write_jpg(&a.join("one.jpg"), 10);
        write_jpg(&a.join("two.JPG"), 40);
        write_jpg(&b.join("three.jpg"), 90);
        std::fs::write(a.join("notes.txt"), "ignored").unwrap();
        std::fs::write(a.join("broken.jpg"), b"not an image").unwrap();
        dir
    }

    #[test]
    fn test_scan_sorts_classes_and_recurses() {
        let dir = build_tree();
        let folder = ImageFolder::scan(dir.path(), &["jpg".to_string()]).unwrap();

        assert_eq!(folder.class_names, vec!["alpha", "beta"]);
        // broken.jpg is still listed; it fails at decode time
        assert_eq!(folder.class_counts(), vec![3, 1]);
    }

    #[test]
    fn test_load_skips_unreadable_files() {
        let dir = build_tree();
        let folder = ImageFolder::scan(dir.path(), &["jpg".to_string()]).unwrap();
        let options = FolderLoadOptions {
            image_size: 4,
            ..Default::default()
        };
        let set = folder.load(&options).unwrap();

        assert_eq!(set.len(), 3);
        assert_eq!(set.class_counts(), vec![2, 1]);
        assert_eq!(set.images[0].len(), 3 * 4 * 4);
        for image in &set.images {
            assert!(image.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
    }

    #[test]
    fn test_class_intensity_scales_pixels() {
        let dir = build_tree();
        let folder = ImageFolder::scan(dir.path(), &["jpg".to_string()]).unwrap();
        let options = FolderLoadOptions {
            image_size: 4,
            class_intensity: ClassIntensity::ByClassIndex,
            ..Default::default()
        };
        let set = folder.load(&options).unwrap();

        let alpha_max = set.images[0].iter().cloned().fold(0.0f32, f32::max);
        assert!((alpha_max - 0.5).abs() < 1e-6);
        let beta_max = set.images[2].iter().cloned().fold(0.0f32, f32::max);
        assert!((beta_max - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_scan_missing_root() {
        let result = ImageFolder::scan("/definitely/not/here", &["jpg".to_string()]);
        assert!(matches!(result, Err(CapsNetError::PathNotFound(_))));
    }

    #[test]
    fn test_min_max_normalize() {
        let mut data = vec![2.0, 4.0, 6.0];
        min_max_normalize(&mut data);
        assert_eq!(data, vec![0.0, 0.5, 1.0]);

        let mut flat = vec![3.0; 4];
        min_max_normalize(&mut flat);
        assert!(flat.iter().all(|&v| v == 0.0));
    }
}
