// ============================================================
// Layer 6 — DICOM Segmentation Writer
// ============================================================
// Writes a prediction mask as a DICOM Segmentation object
// (SOP class 1.2.840.10008.5.1.4.1.1.66.4) that references the
// scan it was predicted from.
//
//   patient / study attributes   ← copied from the source scan
//   series / instance UIDs       ← fresh "2.25.<uuid>" UIDs
//   SegmentSequence              ← one item per mask layer, labelled
//   PerFrameFunctionalGroups     ← frame i belongs to segment i + 1
//   PixelData                    ← BINARY segmentation: 1 bit per
//                                  pixel, frames packed back to back,
//                                  least significant bit first
//
// Reference: DICOM PS3.3 C.8.20 (Segmentation IOD), dicom-rs docs

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dicom_core::value::DataSetSequence;
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use uuid::Uuid;

use crate::domain::categories::CategoryTable;
use crate::domain::error::PipelineError;
use crate::domain::mask::PredictionMask;

pub const SEG_FILE_NAME: &str = "segmentation.dcm";

/// Patient and study attributes carried over from the source scan.
const COPIED_TAGS: [Tag; 11] = [
    tags::SPECIFIC_CHARACTER_SET,
    tags::PATIENT_NAME,
    tags::PATIENT_ID,
    tags::PATIENT_BIRTH_DATE,
    tags::PATIENT_SEX,
    tags::STUDY_INSTANCE_UID,
    tags::STUDY_DATE,
    tags::STUDY_TIME,
    tags::STUDY_ID,
    tags::ACCESSION_NUMBER,
    tags::REFERRING_PHYSICIAN_NAME,
];

/// A globally unique UID derived from a random UUID.
pub fn new_uid() -> String {
    format!("2.25.{}", Uuid::new_v4().as_u128())
}

/// Pack booleans eight to a byte, first value in the lowest bit,
/// padded to an even byte count.
pub fn pack_bits(bits: impl Iterator<Item = bool>) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, on) in bits.enumerate() {
        if i % 8 == 0 {
            out.push(0u8);
        }
        if on {
            if let Some(last) = out.last_mut() {
                *last |= 1 << (i % 8);
            }
        }
    }
    if out.len() % 2 == 1 {
        out.push(0);
    }
    out
}

fn put_str(obj: &mut InMemDicomObject, tag: Tag, vr: VR, value: impl Into<String>) {
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value.into())));
}

fn put_u16(obj: &mut InMemDicomObject, tag: Tag, value: u16) {
    obj.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)));
}

fn put_seq(obj: &mut InMemDicomObject, tag: Tag, items: Vec<InMemDicomObject>) {
    obj.put(DataElement::new(tag, VR::SQ, DataSetSequence::from(items)));
}

fn code_item(value: &str, scheme: &str, meaning: &str) -> InMemDicomObject {
    let mut item = InMemDicomObject::new_empty();
    put_str(&mut item, tags::CODE_VALUE, VR::SH, value);
    put_str(&mut item, tags::CODING_SCHEME_DESIGNATOR, VR::SH, scheme);
    put_str(&mut item, tags::CODE_MEANING, VR::LO, meaning);
    item
}

fn segment_item(index: usize, label: &str) -> InMemDicomObject {
    let mut item = InMemDicomObject::new_empty();
    put_u16(&mut item, tags::SEGMENT_NUMBER, (index + 1) as u16);
    put_str(&mut item, tags::SEGMENT_LABEL, VR::LO, label);
    put_str(&mut item, tags::SEGMENT_ALGORITHM_TYPE, VR::CS, "AUTOMATIC");
    put_str(&mut item, tags::SEGMENT_ALGORITHM_NAME, VR::LO, env!("CARGO_PKG_NAME"));
    put_seq(
        &mut item,
        tags::SEGMENTED_PROPERTY_CATEGORY_CODE_SEQUENCE,
        vec![code_item("123037004", "SCT", "Anatomical Structure")],
    );
    put_seq(
        &mut item,
        tags::SEGMENTED_PROPERTY_TYPE_CODE_SEQUENCE,
        vec![code_item(&format!("CXR{index:03}"), "99CXR", label)],
    );
    item
}

fn frame_item(index: usize) -> InMemDicomObject {
    let mut ident = InMemDicomObject::new_empty();
    put_u16(&mut ident, tags::REFERENCED_SEGMENT_NUMBER, (index + 1) as u16);
    let mut item = InMemDicomObject::new_empty();
    put_seq(&mut item, tags::SEGMENT_IDENTIFICATION_SEQUENCE, vec![ident]);
    item
}

fn read_str(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
}

/// Write `mask` as `<out_dir>/segmentation.dcm`, referencing `source`.
/// `source` must be a `.dcm` file; anything else fails before any
/// output is created.
pub fn write_dicom_seg(
    source:     &Path,
    mask:       &PredictionMask,
    categories: &CategoryTable,
    out_dir:    &Path,
) -> Result<PathBuf> {
    let is_dicom = source
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("dcm"));
    if !is_dicom {
        return Err(PipelineError::UnsupportedFormat(format!(
            "dicom-seg export needs a .dcm source, got '{}'",
            source.display()
        ))
        .into());
    }

    let src = dicom_object::open_file(source).map_err(|e| PipelineError::decode(source, e))?;
    let (rows, cols) = mask.spatial_size();
    let frames = mask.layer_count();

    let mut obj = InMemDicomObject::new_empty();
    for tag in COPIED_TAGS {
        if let Ok(e) = src.element(tag) {
            obj.put(e.clone());
        }
    }

    // ── Identity ──
    let sop_instance_uid = new_uid();
    put_str(&mut obj, tags::SOP_CLASS_UID, VR::UI, uids::SEGMENTATION_STORAGE);
    put_str(&mut obj, tags::SOP_INSTANCE_UID, VR::UI, sop_instance_uid.clone());
    put_str(&mut obj, tags::SERIES_INSTANCE_UID, VR::UI, new_uid());
    put_str(&mut obj, tags::FRAME_OF_REFERENCE_UID, VR::UI,
        read_str(&src, tags::FRAME_OF_REFERENCE_UID).unwrap_or_else(new_uid));
    put_str(&mut obj, tags::MODALITY, VR::CS, "SEG");
    put_str(&mut obj, tags::SERIES_NUMBER, VR::IS, "300");
    put_str(&mut obj, tags::INSTANCE_NUMBER, VR::IS, "1");
    put_str(&mut obj, tags::MANUFACTURER, VR::LO, env!("CARGO_PKG_NAME"));
    obj.put(DataElement::new(
        tags::IMAGE_TYPE,
        VR::CS,
        PrimitiveValue::Strs(["DERIVED".to_string(), "PRIMARY".to_string()].into_iter().collect()),
    ));
    put_str(&mut obj, tags::CONTENT_LABEL, VR::CS, "ANATOMY");
    put_str(&mut obj, tags::CONTENT_DESCRIPTION, VR::LO, "Chest X-ray anatomy segmentation");
    put_str(&mut obj, tags::SEGMENTATION_TYPE, VR::CS, "BINARY");

    // ── Image pixel module ──
    put_u16(&mut obj, tags::SAMPLES_PER_PIXEL, 1);
    put_str(&mut obj, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2");
    put_u16(&mut obj, tags::ROWS, rows as u16);
    put_u16(&mut obj, tags::COLUMNS, cols as u16);
    put_u16(&mut obj, tags::BITS_ALLOCATED, 1);
    put_u16(&mut obj, tags::BITS_STORED, 1);
    put_u16(&mut obj, tags::HIGH_BIT, 0);
    put_u16(&mut obj, tags::PIXEL_REPRESENTATION, 0);
    put_str(&mut obj, tags::LOSSY_IMAGE_COMPRESSION, VR::CS, "00");
    put_str(&mut obj, tags::NUMBER_OF_FRAMES, VR::IS, frames.to_string());

    // ── Segments and frames ──
    let segments = (0..frames)
        .map(|i| {
            let label = categories.label(i).map(str::to_string).unwrap_or_else(|| format!("category_{i:03}"));
            segment_item(i, &label)
        })
        .collect();
    put_seq(&mut obj, tags::SEGMENT_SEQUENCE, segments);
    put_seq(&mut obj, tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE, (0..frames).map(frame_item).collect());

    // ── Reference to the source image ──
    if let (Some(series), Some(class), Some(instance)) = (
        read_str(&src, tags::SERIES_INSTANCE_UID),
        read_str(&src, tags::SOP_CLASS_UID),
        read_str(&src, tags::SOP_INSTANCE_UID),
    ) {
        let mut instance_item = InMemDicomObject::new_empty();
        put_str(&mut instance_item, tags::REFERENCED_SOP_CLASS_UID, VR::UI, class);
        put_str(&mut instance_item, tags::REFERENCED_SOP_INSTANCE_UID, VR::UI, instance);
        let mut series_item = InMemDicomObject::new_empty();
        put_str(&mut series_item, tags::SERIES_INSTANCE_UID, VR::UI, series);
        put_seq(&mut series_item, tags::REFERENCED_INSTANCE_SEQUENCE, vec![instance_item]);
        put_seq(&mut obj, tags::REFERENCED_SERIES_SEQUENCE, vec![series_item]);
    }

    let pixels = pack_bits(mask.as_array().iter().copied());
    obj.put(DataElement::new(tags::PIXEL_DATA, VR::OB, PrimitiveValue::U8(pixels.into())));

    // ── Write ──
    let file = obj
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(uids::SEGMENTATION_STORAGE)
                .media_storage_sop_instance_uid(sop_instance_uid),
        )
        .context("Cannot build DICOM file meta group")?;

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Cannot create '{}'", out_dir.display()))?;
    let out_path = out_dir.join(SEG_FILE_NAME);
    file.write_to_file(&out_path)
        .with_context(|| format!("Cannot write '{}'", out_path.display()))?;

    tracing::debug!("Wrote DICOM SEG with {} segments to '{}'", frames, out_path.display());
    Ok(out_path)
}
