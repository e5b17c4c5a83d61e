// ============================================================
// Layer 6 — File Saver
// ============================================================
// Renders one prediction mask into one of six artifact sets.
// For a source file `<dir>/<stem>.<ext>` and output dir `out`:
//
//   npy        out/<stem>.npy             bool array [N, H, W]
//   npz        out/<stem>.npz             same, compressed, key "arr_0"
//   png        out/<stem>/<label>.png     one black/white image per layer
//   jpg        out/<stem>.jpg             original image, zeroed outside
//                                         the MASK_OF_INTEREST union
//   json       out/<stem>.json            COCO document
//   dicom-seg  out/<stem>/segmentation.dcm  (source must be .dcm)
//
// Output directories are created as needed. ExportMode is a
// closed enum, so adding a format means handling it below.

use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::{Array2, Array3};
use ndarray_npy::{write_npy, NpzWriter};
use serde::{Deserialize, Serialize};

use crate::domain::categories::{CategoryTable, MASK_OF_INTEREST};
use crate::domain::error::{ensure_invariant, PipelineError};
use crate::domain::mask::PredictionMask;
use crate::infra::{coco, dicom_seg};

// ─── ExportMode ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportMode {
    Npy,
    Npz,
    Png,
    Jpg,
    Json,
    DicomSeg,
}

impl ExportMode {
    pub const ALL: [ExportMode; 6] = [
        ExportMode::Npy,
        ExportMode::Npz,
        ExportMode::Png,
        ExportMode::Jpg,
        ExportMode::Json,
        ExportMode::DicomSeg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportMode::Npy      => "npy",
            ExportMode::Npz      => "npz",
            ExportMode::Png      => "png",
            ExportMode::Jpg      => "jpg",
            ExportMode::Json     => "json",
            ExportMode::DicomSeg => "dicom-seg",
        }
    }
}

impl FromStr for ExportMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| PipelineError::UnsupportedFormat(format!("output mode '{s}'")))
    }
}

impl fmt::Display for ExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── FileSaver ────────────────────────────────────────────────────────────────
pub struct FileSaver {
    categories: CategoryTable,
}

impl FileSaver {
    pub fn new(categories: CategoryTable) -> Self {
        Self { categories }
    }

    /// Write the artifacts for one mask and return the paths written.
    ///
    /// `orig_data` is the source image as [3, H, W] bytes; only the
    /// jpg export reads it. `base_ann_id` seeds COCO annotation ids.
    pub fn save(
        &self,
        mask:        &PredictionMask,
        mode:        ExportMode,
        outdir:      &Path,
        source:      &Path,
        orig_data:   &Array3<u8>,
        base_ann_id: u64,
    ) -> Result<Vec<PathBuf>> {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| PipelineError::invariant(format!("'{}' has no file name", source.display())))?;

        let written = match mode {
            ExportMode::Npy      => vec![self.save_npy(mask, outdir, &stem)?],
            ExportMode::Npz      => vec![self.save_npz(mask, outdir, &stem)?],
            ExportMode::Png      => self.save_png(mask, &outdir.join(&stem))?,
            ExportMode::Jpg      => vec![self.save_jpg(mask, outdir, &stem, orig_data)?],
            ExportMode::Json     => vec![self.save_json(mask, outdir, &stem, source, base_ann_id)?],
            ExportMode::DicomSeg => vec![dicom_seg::write_dicom_seg(
                source,
                mask,
                &self.categories,
                &outdir.join(&stem),
            )?],
        };

        tracing::debug!("Saved {} as {} ({} files)", source.display(), mode, written.len());
        Ok(written)
    }

    // ── npy / npz ──

    fn save_npy(&self, mask: &PredictionMask, outdir: &Path, stem: &str) -> Result<PathBuf> {
        create_dir(outdir)?;
        let path = outdir.join(format!("{stem}.npy"));
        write_npy(&path, mask.as_array())
            .with_context(|| format!("Cannot write '{}'", path.display()))?;
        Ok(path)
    }

    fn save_npz(&self, mask: &PredictionMask, outdir: &Path, stem: &str) -> Result<PathBuf> {
        create_dir(outdir)?;
        let path = outdir.join(format!("{stem}.npz"));
        let file = File::create(&path).with_context(|| format!("Cannot create '{}'", path.display()))?;
        let mut npz = NpzWriter::new_compressed(file);
        npz.add_array("arr_0", mask.as_array())?;
        npz.finish()?;
        Ok(path)
    }

    // ── png ──

    fn save_png(&self, mask: &PredictionMask, dir: &Path) -> Result<Vec<PathBuf>> {
        create_dir(dir)?;
        let (h, w) = mask.spatial_size();
        let mut written = Vec::with_capacity(mask.layer_count());
        for i in 0..mask.layer_count() {
            let label = self
                .categories
                .label(i)
                .map(str::to_string)
                .unwrap_or_else(|| format!("category_{i:03}"));
            let path = dir.join(format!("{}.png", label.replace(['/', '\\'], "_")));

            let layer = mask.layer(i);
            let img = GrayImage::from_fn(w as u32, h as u32, |x, y| {
                Luma([if layer[[y as usize, x as usize]] { 255 } else { 0 }])
            });
            img.save(&path).with_context(|| format!("Cannot write '{}'", path.display()))?;
            written.push(path);
        }
        Ok(written)
    }

    // ── jpg ──

    fn save_jpg(&self, mask: &PredictionMask, outdir: &Path, stem: &str, orig: &Array3<u8>) -> Result<PathBuf> {
        let (c, h, w) = orig.dim();
        ensure_invariant(c == 3, || format!("original image must have 3 channels, got {c}"))?;

        let union = mask.union(MASK_OF_INTEREST)?;
        let keep = resize_nearest(&union, h, w);

        let img = RgbImage::from_fn(w as u32, h as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            if keep[[y, x]] {
                Rgb([orig[[0, y, x]], orig[[1, y, x]], orig[[2, y, x]]])
            } else {
                Rgb([0, 0, 0])
            }
        });

        create_dir(outdir)?;
        let path = outdir.join(format!("{stem}.jpg"));
        img.save(&path).with_context(|| format!("Cannot write '{}'", path.display()))?;
        Ok(path)
    }

    // ── json ──

    fn save_json(&self, mask: &PredictionMask, outdir: &Path, stem: &str, source: &Path, base_ann_id: u64) -> Result<PathBuf> {
        let file_name = source.to_string_lossy();
        let doc = coco::build_document(mask, &self.categories, &file_name, 1, base_ann_id);

        create_dir(outdir)?;
        let path = outdir.join(format!("{stem}.json"));
        fs::write(&path, serde_json::to_string(&doc)?)
            .with_context(|| format!("Cannot write '{}'", path.display()))?;
        Ok(path)
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Cannot create '{}'", dir.display()))
}

/// Nearest-neighbour resize: output (y, x) reads input (y·H/h, x·W/w).
pub fn resize_nearest(mask: &Array2<bool>, height: usize, width: usize) -> Array2<bool> {
    let (mh, mw) = mask.dim();
    if (mh, mw) == (height, width) {
        return mask.clone();
    }
    Array2::from_shape_fn((height, width), |(y, x)| {
        mask[[y * mh / height, x * mw / width]]
    })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::categories::NUM_CATEGORIES;
    use ndarray_npy::{read_npy, NpzReader};

    fn sample_mask(layers: usize) -> PredictionMask {
        let a = Array3::from_shape_fn((layers, 6, 5), |(c, y, x)| (c + y * 5 + x) % (c + 2) == 0);
        PredictionMask::new(a)
    }

    fn saver(layers: usize) -> FileSaver {
        FileSaver::new(CategoryTable::numbered(layers))
    }

    #[test]
    fn test_mode_parsing() {
        for m in ExportMode::ALL {
            assert_eq!(m.as_str().parse::<ExportMode>().unwrap(), m);
        }
        let err = "tiff".parse::<ExportMode>().unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_npy_and_npz_reload_bit_for_bit() {
        let dir = tempfile::tempdir().unwrap();
        let mask = sample_mask(4);
        let orig = Array3::zeros((3, 6, 5));
        let s = saver(4);

        let npy = s.save(&mask, ExportMode::Npy, dir.path(), Path::new("in/img01.png"), &orig, 1).unwrap();
        assert_eq!(npy, vec![dir.path().join("img01.npy")]);
        let back: Array3<bool> = read_npy(&npy[0]).unwrap();
        assert_eq!(&back, mask.as_array());

        let npz = s.save(&mask, ExportMode::Npz, dir.path(), Path::new("in/img01.png"), &orig, 1).unwrap();
        let mut reader = NpzReader::new(File::open(&npz[0]).unwrap()).unwrap();
        let back: Array3<bool> = reader.by_name("arr_0").unwrap();
        assert_eq!(&back, mask.as_array());
    }

    #[test]
    fn test_png_one_file_per_layer_with_matching_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mask = sample_mask(3);
        let files = saver(3)
            .save(&mask, ExportMode::Png, dir.path(), Path::new("a/b/scan7.jpg"), &Array3::zeros((3, 6, 5)), 1)
            .unwrap();

        assert_eq!(files.len(), 3);
        assert_eq!(fs::read_dir(dir.path().join("scan7")).unwrap().count(), 3);
        for (i, path) in files.iter().enumerate() {
            assert_eq!(path, &dir.path().join("scan7").join(format!("category_{i:03}.png")));
            let img = image::open(path).unwrap().to_luma8();
            let on = img.pixels().filter(|p| p.0[0] > 0).count();
            assert_eq!(on, mask.true_count(i));
        }
    }

    #[test]
    fn test_jpg_cutout_at_original_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Array3::from_elem((NUM_CATEGORIES, 4, 4), false);
        // top-left quadrant on in a layer of interest, bottom-right in one outside it
        for y in 0..2 {
            for x in 0..2 {
                a[[MASK_OF_INTEREST[0], y, x]] = true;
                a[[0, y + 2, x + 2]] = true;
            }
        }
        let orig = Array3::from_elem((3, 8, 8), 200u8);
        let files = FileSaver::new(CategoryTable::default())
            .save(&PredictionMask::new(a), ExportMode::Jpg, dir.path(), Path::new("cxr.png"), &orig, 1)
            .unwrap();

        let img = image::open(&files[0]).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (8, 8));
        assert!(img.get_pixel(1, 1).0[0] > 150);
        assert!(img.get_pixel(6, 6).0[0] < 50);
    }

    #[test]
    fn test_json_writes_coco_document() {
        let dir = tempfile::tempdir().unwrap();
        let files = saver(4)
            .save(&sample_mask(4), ExportMode::Json, dir.path(), Path::new("x.png"), &Array3::zeros((3, 6, 5)), 5)
            .unwrap();
        let doc: coco::CocoDocument = serde_json::from_str(&fs::read_to_string(&files[0]).unwrap()).unwrap();
        assert_eq!(doc.categories.len(), 4);
        assert_eq!(doc.annotations[0].id, 5);
    }

    #[test]
    fn test_dicom_seg_on_bitmap_source_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let err = saver(2)
            .save(&sample_mask(2), ExportMode::DicomSeg, &out, Path::new("x.png"), &Array3::zeros((3, 6, 5)), 1)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::UnsupportedFormat(_))
        ));
        assert!(!out.exists());
    }

    #[test]
    fn test_resize_nearest() {
        let m = Array2::from_shape_vec((2, 2), vec![true, false, false, true]).unwrap();
        let r = resize_nearest(&m, 4, 4);
        assert!(r[[0, 1]] && r[[1, 0]] && r[[3, 3]]);
        assert!(!r[[0, 2]] && !r[[2, 1]]);
    }
}
