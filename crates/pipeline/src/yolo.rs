//! YOLOv8 pothole detector on ONNX Runtime.
//!
//! Expects a single-input model (`images`, `[1, 3, S, S]`, RGB in `0..1`)
//! whose output is `[1, 4 + classes, anchors]` in centre format. Frames are
//! letterboxed to `S × S` and boxes mapped back to frame coordinates.

use std::path::Path;
use std::sync::Mutex;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;

use crate::detector::{BoundingBox, Detection, Detector, DetectorError};
use crate::frame::Frame;

pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// Candidates below this are dropped before NMS. The configured
/// confidence threshold is applied later by the invoker.
const MIN_CANDIDATE_CONFIDENCE: f32 = 0.05;
const NMS_IOU_THRESHOLD: f32 = 0.45;
const LETTERBOX_FILL: u8 = 114;

pub struct YoloDetector {
    session: Mutex<Session>,
    class_names: Vec<String>,
    input_size: u32,
}

impl YoloDetector {
    pub fn load(
        model_path: &Path,
        class_names: Vec<String>,
        intra_threads: usize,
    ) -> Result<Self, DetectorError> {
        tracing::info!(model_path = %model_path.display(), "Loading YOLO model");

        let session = Session::builder()
            .map_err(model_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(model_error)?
            .with_intra_threads(intra_threads)
            .map_err(model_error)?
            .commit_from_file(model_path)
            .map_err(model_error)?;

        tracing::info!(classes = class_names.len(), "YOLO detector initialized");
        Ok(Self {
            session: Mutex::new(session),
            class_names,
            input_size: DEFAULT_INPUT_SIZE,
        })
    }

    fn infer(&self, input: Vec<f32>) -> Result<Vec<f32>, DetectorError> {
        let size = self.input_size as usize;
        let shape = [1usize, 3, size, size];
        let tensor = ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))
            .map_err(model_error)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectorError::Model("session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs!["images" => tensor])
            .map_err(model_error)?;
        let (_, data) = outputs[0].try_extract_tensor::<f32>().map_err(model_error)?;
        Ok(data.to_vec())
    }
}

impl Detector for YoloDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectorError::UnsupportedFrame {
                width: frame.width(),
                height: frame.height(),
            });
        }

        let letterbox = Letterbox::fit(frame.width(), frame.height(), self.input_size);
        let input = letterbox.tensor(frame);
        let output = self.infer(input)?;

        let candidates = decode_output(
            &output,
            self.class_names.len(),
            &letterbox,
            MIN_CANDIDATE_CONFIDENCE,
        )?;
        let kept = nms(candidates, NMS_IOU_THRESHOLD);

        tracing::trace!(detections = kept.len(), "YOLO inference done");
        Ok(kept
            .into_iter()
            .map(|c| {
                let detection = Detection::new(f64::from(c.confidence)).with_bbox(c.bbox);
                match self.class_names.get(c.class_id) {
                    Some(name) => detection.with_label(name.clone()),
                    None => detection,
                }
            })
            .collect())
    }
}

fn model_error(e: impl std::fmt::Display) -> DetectorError {
    DetectorError::Model(e.to_string())
}

// ---------------------------------------------------------------------------
// Pre/post processing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    size: u32,
    scale: f32,
    scaled_w: u32,
    scaled_h: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, size: u32) -> Self {
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let scaled_w = ((width as f32 * scale) as u32).clamp(1, size);
        let scaled_h = ((height as f32 * scale) as u32).clamp(1, size);
        Self {
            size,
            scale,
            scaled_w,
            scaled_h,
            pad_x: (size - scaled_w) / 2,
            pad_y: (size - scaled_h) / 2,
        }
    }

    /// Resize onto a grey canvas and flatten to normalised CHW.
    fn tensor(&self, frame: &Frame) -> Vec<f32> {
        let resized = imageops::resize(frame, self.scaled_w, self.scaled_h, FilterType::Triangle);
        let mut canvas = RgbImage::from_pixel(self.size, self.size, Rgb([LETTERBOX_FILL; 3]));
        imageops::replace(&mut canvas, &resized, self.pad_x.into(), self.pad_y.into());

        let plane = (self.size * self.size) as usize;
        let mut input = vec![0.0f32; 3 * plane];
        for (i, pixel) in canvas.pixels().enumerate() {
            for c in 0..3 {
                input[c * plane + i] = f32::from(pixel[c]) / 255.0;
            }
        }
        input
    }

    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    bbox: BoundingBox,
    confidence: f32,
    class_id: usize,
}

fn decode_output(
    output: &[f32],
    num_classes: usize,
    letterbox: &Letterbox,
    min_confidence: f32,
) -> Result<Vec<Candidate>, DetectorError> {
    let rows = 4 + num_classes.max(1);
    if output.is_empty() || output.len() % rows != 0 {
        return Err(DetectorError::Model(format!(
            "unexpected output length {} for {rows} rows",
            output.len()
        )));
    }
    let anchors = output.len() / rows;

    let mut candidates = Vec::new();
    for i in 0..anchors {
        let (class_id, confidence) = (0..rows - 4)
            .map(|c| (c, output[anchors * (4 + c) + i]))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if confidence < min_confidence {
            continue;
        }

        let cx = output[i];
        let cy = output[anchors + i];
        let w = output[anchors * 2 + i];
        let h = output[anchors * 3 + i];
        let (x1, y1) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);

        candidates.push(Candidate {
            bbox: BoundingBox { x1, y1, x2, y2 },
            confidence: confidence.min(1.0),
            class_id,
        });
    }
    Ok(candidates)
}

fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let overlaps = keep.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) >= iou_threshold
        });
        if !overlaps {
            keep.push(candidate);
        }
    }
    keep
}
