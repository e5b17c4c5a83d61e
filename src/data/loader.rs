// ============================================================
// Layer 4 — File Loader
// ============================================================
// Reads one image file from disk and turns it into a
// model-ready tensor plus the untouched original pixels.
//
// Dispatch is on the file extension (case-insensitive):
//   .jpg / .png  → bitmap path  (image crate)
//   .dcm         → scan path    (dicom-object + dicom-pixeldata)
//   anything else → PipelineError::UnsupportedFormat
//
// Bitmap path:
//   decode → RGB → CHW bytes (orig_data) → /255 → normalise
// Scan path:
//   decode first slice → min-max to [0,1] → replicate ×3
//   → orig_data = bytes of the scaled slice → normalise
//
// Both paths then build a [1, 3, H, W] tensor on the loader's
// device and interpolate it to [1, 3, S, S].
//
// Reference: Burn Book §3 (Tensors), image crate docs,
//            dicom-rs pixeldata docs

use std::path::{Path, PathBuf};

use anyhow::Result;
use burn::prelude::*;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use dicom_pixeldata::PixelDecoder;
use ndarray::Array3;

use crate::data::preprocessor::{
    min_max_normalize, replicate_gray, to_bytes, to_chw, to_unit_range, ImageNormalizer,
};
use crate::domain::error::{ensure_invariant, PipelineError};

/// Square side every loaded tensor is resized to for segmentation.
pub const BASE_SIZE: usize = 512;

// ─── FileKind ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Bitmap,
    Scan,
}

impl FileKind {
    /// Extensions accepted by the loader, lowercase.
    pub const EXTENSIONS: [&'static str; 3] = ["jpg", "png", "dcm"];

    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "jpg" | "png" => Ok(FileKind::Bitmap),
            "dcm"         => Ok(FileKind::Scan),
            other         => Err(PipelineError::UnsupportedFormat(format!(
                "file extension '{other}' ({})",
                path.display()
            ))),
        }
    }

    pub fn is_supported(path: &Path) -> bool {
        Self::from_path(path).is_ok()
    }
}

// ─── ImageRecord ──────────────────────────────────────────────────────────────
/// One loaded file.
#[derive(Debug, Clone)]
pub struct ImageRecord<B: Backend> {
    /// Normalised pixels — shape: [1, 3, S, S]
    pub data:      Tensor<B, 4>,
    /// Unscaled bytes at the source resolution — shape: [3, H, W]
    pub orig_data: Array3<u8>,
    pub filename:  PathBuf,
    /// (height, width) of the source image
    pub file_size: (usize, usize),
}

// ─── FileLoader ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct FileLoader<B: Backend> {
    device:     B::Device,
    size:       usize,
    normalizer: ImageNormalizer,
    mode:       InterpolateMode,
}

impl<B: Backend> FileLoader<B> {
    /// Segmentation defaults: 512×512, ImageNet statistics, nearest-neighbour resize.
    pub fn new(device: B::Device) -> Self {
        Self {
            device,
            size:       BASE_SIZE,
            normalizer: ImageNormalizer::imagenet(),
            mode:       InterpolateMode::Nearest,
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_normalizer(mut self, normalizer: ImageNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_interpolation(mut self, mode: InterpolateMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn load(&self, path: &Path) -> Result<ImageRecord<B>> {
        let (unit, orig_data) = match FileKind::from_path(path)? {
            FileKind::Bitmap => read_bitmap(path)?,
            FileKind::Scan   => read_scan(path)?,
        };
        let (_, h, w) = unit.dim();
        let data = self.to_tensor(unit)?;

        tracing::debug!("Loaded {} ({}×{})", path.display(), h, w);

        Ok(ImageRecord {
            data,
            orig_data,
            filename:  path.to_path_buf(),
            file_size: (h, w),
        })
    }

    /// Normalise a [3, H, W] array in [0,1] and resize it to [1, 3, S, S].
    fn to_tensor(&self, unit: Array3<f32>) -> Result<Tensor<B, 4>> {
        let normalized = self.normalizer.normalize(unit)?;
        let (c, h, w) = normalized.dim();
        let values: Vec<f32> = normalized.iter().copied().collect();

        let tensor = Tensor::<B, 3>::from_data(TensorData::new(values, [c, h, w]), &self.device)
            .unsqueeze::<4>();
        let resized = interpolate(
            tensor,
            [self.size, self.size],
            InterpolateOptions::new(self.mode.clone()),
        );

        let dims = resized.dims();
        ensure_invariant(dims[1] == 3, || format!("expected 3 channels, got {dims:?}"))?;
        Ok(resized)
    }
}

// ── Bitmap ──
fn read_bitmap(path: &Path) -> Result<(Array3<f32>, Array3<u8>)> {
    let img = image::open(path)
        .map_err(|e| PipelineError::decode(path, e))?
        .to_rgb8();
    let orig = to_chw(&img);
    Ok((to_unit_range(&orig), orig))
}

// ── Scan ──
fn read_scan(path: &Path) -> Result<(Array3<f32>, Array3<u8>)> {
    let obj = dicom_object::open_file(path).map_err(|e| PipelineError::decode(path, e))?;
    let pixels = obj
        .decode_pixel_data()
        .map_err(|e| PipelineError::decode(path, e))?;
    let array = pixels
        .to_ndarray::<f32>()
        .map_err(|e| PipelineError::decode(path, e))?;

    // [frames, rows, columns, samples]
    let shape = array.shape().to_vec();
    ensure_invariant(shape.len() == 4 && shape[0] == 1 && shape[3] == 1, || {
        format!("expected a single-frame single-sample scan, got shape {shape:?}")
    })?;
    let (h, w) = (shape[1], shape[2]);

    let mut plane: Vec<f32> = array.iter().copied().collect();
    min_max_normalize(&mut plane);
    let unit = replicate_gray(&plane, h, w)?;
    let orig = to_bytes(&unit);
    Ok((unit, orig))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use burn::backend::NdArray;
    use dicom_core::{DataElement, PrimitiveValue, VR};
    use dicom_dictionary_std::{tags, uids};
    use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray;

    /// A 16-bit MONOCHROME2 single-frame scan with a horizontal ramp.
    pub(crate) fn write_test_scan(path: &Path, rows: u16, cols: u16) {
        let pixels: Vec<u16> = (0..rows as usize * cols as usize)
            .map(|i| (i % cols as usize) as u16 * 100)
            .collect();

        let mut obj = InMemDicomObject::new_empty();
        obj.put(DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(uids::SECONDARY_CAPTURE_IMAGE_STORAGE)));
        obj.put(DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("2.25.1234")));
        obj.put(DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)));
        obj.put(DataElement::new(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, PrimitiveValue::from("MONOCHROME2")));
        obj.put(DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(rows)));
        obj.put(DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(cols)));
        obj.put(DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)));
        obj.put(DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16)));
        obj.put(DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16)));
        obj.put(DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)));
        obj.put(DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::U16(pixels.into())));

        let file = obj
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(uids::SECONDARY_CAPTURE_IMAGE_STORAGE)
                    .media_storage_sop_instance_uid("2.25.1234"),
            )
            .unwrap();
        file.write_to_file(path).unwrap();
    }

    pub(crate) fn write_test_png(path: &Path, w: u32, h: u32) {
        let img = RgbImage::from_fn(w, h, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 128]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_file_kind_dispatch() {
        assert_eq!(FileKind::from_path(Path::new("a/b.JPG")).unwrap(), FileKind::Bitmap);
        assert_eq!(FileKind::from_path(Path::new("scan.dcm")).unwrap(), FileKind::Scan);
        let err = FileKind::from_path(Path::new("notes.tiff")).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(m) if m.contains("tiff")));
    }

    #[test]
    fn test_load_bitmap_shapes_and_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.png");
        write_test_png(&path, 20, 10);

        let loader = FileLoader::<TestBackend>::new(Default::default());
        let rec = loader.load(&path).unwrap();

        assert_eq!(rec.data.dims(), [1, 3, BASE_SIZE, BASE_SIZE]);
        assert_eq!(rec.orig_data.dim(), (3, 10, 20));
        assert_eq!(rec.file_size, (10, 20));

        let bounds = ImageNormalizer::imagenet().output_bounds();
        let lo = bounds.iter().map(|b| b.0).fold(f32::INFINITY, f32::min);
        let hi = bounds.iter().map(|b| b.1).fold(f32::NEG_INFINITY, f32::max);
        let values = rec.data.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|&v| v >= lo - 1e-4 && v <= hi + 1e-4));
    }

    #[test]
    fn test_load_scan_replicates_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.dcm");
        write_test_scan(&path, 6, 8);

        let loader = FileLoader::<TestBackend>::new(Default::default()).with_size(16);
        let rec = loader.load(&path).unwrap();

        assert_eq!(rec.data.dims(), [1, 3, 16, 16]);
        assert_eq!(rec.file_size, (6, 8));
        assert_eq!(rec.orig_data[[0, 2, 7]], 255);
        assert_eq!(rec.orig_data[[2, 2, 0]], 0);
        assert_eq!(rec.orig_data[[1, 3, 7]], rec.orig_data[[0, 3, 7]]);
    }

    #[test]
    fn test_unsupported_extension_fails() {
        let loader = FileLoader::<TestBackend>::new(Default::default());
        let err = loader.load(Path::new("report.txt")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::UnsupportedFormat(_))
        ));
    }
}
