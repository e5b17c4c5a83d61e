// ============================================================
// Layer 6 — COCO Annotations
// ============================================================
// Converts a prediction mask into a COCO-style document:
//
//   {
//     "info": {...}, "licenses": [],
//     "categories":  [{id, name, supercategory}, ...],   one per layer
//     "images":      [{id, file_name, height, width}],
//     "annotations": [{id, image_id, category_id,
//                      segmentation: [[x0,y0,x1,y1,...], ...],
//                      area, bbox: [x, y, w, h], iscrowd: 0}, ...]
//   }
//
// One annotation per non-empty layer. Polygons are the outer
// borders traced by imageproc; area is the layer's pixel count.
// Annotation ids are sequential from the caller's base, in
// layer order, skipping empty layers.

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::domain::categories::CategoryTable;
use crate::domain::mask::PredictionMask;

const SUPERCATEGORY: &str = "anatomy";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoDocument {
    pub info:        CocoInfo,
    pub licenses:    Vec<serde_json::Value>,
    pub categories:  Vec<CocoCategory>,
    pub images:      Vec<CocoImage>,
    pub annotations: Vec<CocoAnnotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoInfo {
    pub description: String,
    pub version:     String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoCategory {
    pub id:            usize,
    pub name:          String,
    pub supercategory: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoImage {
    pub id:        u64,
    pub file_name: String,
    pub height:    usize,
    pub width:     usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoAnnotation {
    pub id:           u64,
    pub image_id:     u64,
    pub category_id:  usize,
    pub segmentation: Vec<Vec<f64>>,
    pub area:         usize,
    /// [x, y, width, height]
    pub bbox:         [usize; 4],
    pub iscrowd:      u8,
}

pub fn build_document(
    mask:        &PredictionMask,
    categories:  &CategoryTable,
    file_name:   &str,
    image_id:    u64,
    base_ann_id: u64,
) -> CocoDocument {
    let (height, width) = mask.spatial_size();

    let categories = (0..mask.layer_count())
        .map(|i| CocoCategory {
            id:            i,
            name:          categories.label(i).map(str::to_string).unwrap_or_else(|| format!("category_{i:03}")),
            supercategory: SUPERCATEGORY.to_string(),
        })
        .collect();

    let mut annotations = Vec::new();
    let mut next_id = base_ann_id;
    for layer in 0..mask.layer_count() {
        if let Some(ann) = layer_annotation(mask.layer(layer), layer, image_id, next_id) {
            annotations.push(ann);
            next_id += 1;
        }
    }

    CocoDocument {
        info: CocoInfo {
            description: "Anatomical segmentation".to_string(),
            version:     env!("CARGO_PKG_VERSION").to_string(),
        },
        licenses: Vec::new(),
        categories,
        images: vec![CocoImage { id: image_id, file_name: file_name.to_string(), height, width }],
        annotations,
    }
}

/// None when the layer has no pixels set.
fn layer_annotation(layer: ArrayView2<'_, bool>, category_id: usize, image_id: u64, id: u64) -> Option<CocoAnnotation> {
    let bbox = bounding_box(layer)?;
    let area = layer.iter().filter(|&&on| on).count();
    Some(CocoAnnotation {
        id,
        image_id,
        category_id,
        segmentation: polygons(layer),
        area,
        bbox,
        iscrowd: 0,
    })
}

/// [x, y, w, h] of the set pixels.
pub fn bounding_box(layer: ArrayView2<'_, bool>) -> Option<[usize; 4]> {
    let mut bounds: Option<(usize, usize, usize, usize)> = None;
    for ((y, x), &on) in layer.indexed_iter() {
        if !on {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    bounds.map(|(x0, y0, x1, y1)| [x0, y0, x1 - x0 + 1, y1 - y0 + 1])
}

/// Outer borders of each connected region as flat [x, y, ...] lists.
/// Regions too small to trace a polygon (fewer than three border
/// points) are covered by their pixel square instead.
pub fn polygons(layer: ArrayView2<'_, bool>) -> Vec<Vec<f64>> {
    let (h, w) = layer.dim();
    let img = GrayImage::from_fn(w as u32, h as u32, |x, y| {
        Luma([if layer[[y as usize, x as usize]] { 255 } else { 0 }])
    });

    find_contours::<u32>(&img)
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer))
        .map(|c| {
            if c.points.len() >= 3 {
                c.points.iter().flat_map(|p| [p.x as f64, p.y as f64]).collect()
            } else {
                let xs = c.points.iter().map(|p| p.x);
                let ys = c.points.iter().map(|p| p.y);
                let (x0, x1) = (xs.clone().min().unwrap_or(0) as f64, xs.max().unwrap_or(0) as f64 + 1.0);
                let (y0, y1) = (ys.clone().min().unwrap_or(0) as f64, ys.max().unwrap_or(0) as f64 + 1.0);
                vec![x0, y0, x1, y0, x1, y1, x0, y1]
            }
        })
        .collect()
}
