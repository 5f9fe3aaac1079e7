use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use domino_vision::error::Result;
use domino_vision::model::{
    Backend, CustomModel, DetectionContext, DetectorModel, ModelLoader, RawDetection, ScopedTensor,
};
use domino_vision::{DetectionError, DetectionResult, DetectionStrategy, RawImage};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;
use tempfile::NamedTempFile;

pub const TABLE: Rgb<u8> = Rgb([30, 90, 40]);
pub const TILE_FACE: Rgb<u8> = Rgb([245, 245, 240]);
pub const PIP: Rgb<u8> = Rgb([15, 15, 15]);

/// Tile placement used by [`domino_photo`]
pub const TILE_RECT: (i32, i32, u32, u32) = (100, 100, 160, 80);

/// A 400x300 photo of one landscape domino on a green table.
/// The left half shows two pips, the right half three.
pub fn domino_photo() -> DynamicImage {
    let mut img = RgbImage::from_pixel(400, 300, TABLE);
    let (x, y, w, h) = TILE_RECT;
    draw_filled_rect_mut(&mut img, Rect::at(x, y).of_size(w, h), TILE_FACE);
    // Divider
    draw_filled_rect_mut(&mut img, Rect::at(x + w as i32 / 2 - 1, y + 4).of_size(2, h - 8), PIP);

    for (px, py) in [(125, 120), (155, 160)] {
        draw_filled_circle_mut(&mut img, (px, py), 7, PIP);
    }
    for (px, py) in [(205, 120), (220, 140), (235, 160)] {
        draw_filled_circle_mut(&mut img, (px, py), 7, PIP);
    }
    DynamicImage::ImageRgb8(img)
}

/// Uniformly colored image
pub fn plain_image(width: u32, height: u32, color: Rgb<u8>) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, color))
}

pub fn raw_image(img: &DynamicImage) -> RawImage {
    RawImage::from_image(img).expect("Failed to encode test image")
}

/// Saves `img` as a PNG in a temp file that is removed on drop
pub fn write_temp_png(img: &DynamicImage) -> NamedTempFile {
    let file = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .expect("Failed to create temp image file");
    img.save_with_format(file.path(), image::ImageFormat::Png)
        .expect("Failed to save test image");
    file
}

/// Fractional detection box with the given class and score
pub fn raw_detection(ymin: f32, xmin: f32, ymax: f32, xmax: f32, class_id: usize, score: f32) -> RawDetection {
    RawDetection {
        ymin,
        xmin,
        ymax,
        xmax,
        class_id,
        score,
    }
}

/// Detector returning a fixed set of boxes, or failing on demand
#[derive(Default)]
pub struct FakeDetector {
    pub detections: Vec<RawDetection>,
    pub fail: bool,
    pub calls: AtomicUsize,
    /// `(height, width)` of every input seen
    pub inputs: Mutex<Vec<(usize, usize)>>,
}

impl FakeDetector {
    pub fn returning(detections: Vec<RawDetection>) -> Self {
        Self {
            detections,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DetectorModel for FakeDetector {
    fn infer(&self, input: &ScopedTensor) -> Result<Vec<RawDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(input.image_size());
        if self.fail {
            return Err(DetectionError::InferenceFailed("fake detector failure".to_string()));
        }
        Ok(self.detections.clone())
    }
}

/// Context on the CPU backend whose loaders hand out the given models
pub fn fake_context(
    general: Arc<FakeDetector>,
    custom: Option<CustomModel>,
    max_dimension: u32,
) -> Arc<DetectionContext> {
    let general_loader = ModelLoader::<dyn DetectorModel>::new("fake-general", move || {
        Ok(general.clone() as Arc<dyn DetectorModel>)
    });
    let custom = custom.map(Arc::new);
    let custom_loader = ModelLoader::<CustomModel>::new("fake-custom", move || {
        custom
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no custom model configured"))
    });
    Arc::new(DetectionContext::new(
        Backend::Cpu,
        Some(max_dimension),
        general_loader,
        custom_loader,
    ))
}

/// Custom model backed by a [`FakeDetector`]
pub fn fake_custom_model(detections: Vec<RawDetection>, labels: &[&str]) -> CustomModel {
    CustomModel {
        detector: Box::new(FakeDetector::returning(detections)),
        labels: labels.iter().map(|l| l.to_string()).collect(),
    }
}

pub fn empty_result() -> DetectionResult {
    DetectionResult::from_tiles(Vec::new(), DynamicImage::new_rgb8(1, 1))
}

/// Strategy that sleeps and then returns an empty result
pub struct SlowStrategy {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl SlowStrategy {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DetectionStrategy for SlowStrategy {
    fn detect_and_annotate(&self, _image: &RawImage) -> Result<DetectionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(empty_result())
    }

    fn preload(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "Slow"
    }
}

/// Strategy whose detections bring down the thread running them
pub struct PanickingStrategy;

impl DetectionStrategy for PanickingStrategy {
    fn detect_and_annotate(&self, _image: &RawImage) -> Result<DetectionResult> {
        std::thread::sleep(Duration::from_millis(50));
        panic!("simulated worker crash");
    }

    fn preload(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "Panicking"
    }
}
