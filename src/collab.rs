//! What the trainer needs from the hand tracker and the feature extractor.
//!
//! Both collaborators live outside this crate. The trainer only calls them
//! through [`Tracker`] and [`Extractor`], one frame at a time.

use image::{imageops, GrayImage, RgbImage};

use crate::{BowResult, DescriptorSet};

/// Image coordinate in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Closed polygon, in order.
pub type Contour = Vec<Point>;

/// Convexity defect between two hull points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Defect {
    pub start: Point,
    pub end: Point,
    /// Contour point farthest from the hull.
    pub far: Point,
    pub depth: f32,
}

/// Hand found in a binary mask.
#[derive(Debug, Clone, PartialEq)]
pub struct HandShape {
    pub contour: Contour,
    pub hull: Contour,
    pub centroid: Point,
    pub defects: Vec<Defect>,
}

/// Sub-rectangle of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub pt: Point,
    pub size: f32,
    pub angle: f32,
    pub response: f32,
}

impl Keypoint {
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            pt: Point::new(x, y),
            size: 0.,
            angle: -1.,
            response: 0.,
        }
    }
}

/// Keypoints that survived description, with one descriptor each.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Described {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: DescriptorSet,
}

/// Hand segmentation driven by a color profile.
pub trait Tracker {
    /// Build the color profile from a frame showing the hand. Called once before capture.
    fn calibrate(&mut self, _frame: &RgbImage) {}

    /// Foreground mask of a frame: hand pixels are 255.
    fn binary_mask(&mut self, frame: &RgbImage) -> GrayImage;

    /// Largest hand-like contour of a mask, if any.
    fn contour(&mut self, mask: &GrayImage) -> Option<HandShape>;

    /// Crop `frame` to the bounding box of `contour`, grown by `margin`
    /// times the frame size on each side and clipped to the frame.
    fn crop(&self, frame: &RgbImage, contour: &Contour, margin: f32) -> (RgbImage, CropRegion) {
        let region = crop_region(frame.dimensions(), contour, margin);
        let cropped =
            imageops::crop_imm(frame, region.x, region.y, region.width, region.height).to_image();
        (cropped, region)
    }

    /// Express a frame contour in the coordinates of a crop.
    fn crop_contour(&self, contour: &Contour, region: &CropRegion) -> Contour {
        contour
            .iter()
            .map(|p| Point::new(p.x - region.x as f32, p.y - region.y as f32))
            .collect()
    }
}

/// Local feature detection and description on grayscale patches.
pub trait Extractor {
    fn keypoints(&mut self, gray: &GrayImage) -> BowResult<Vec<Keypoint>>;

    /// Keep the keypoints lying inside `contour`.
    fn restrict_to_contour(&self, keypoints: Vec<Keypoint>, contour: &Contour) -> Vec<Keypoint> {
        keypoints
            .into_iter()
            .filter(|k| point_in_contour(k.pt, contour))
            .collect()
    }

    /// Describe the keypoints. Keypoints the descriptor cannot be computed for
    /// are dropped; `None` when nothing could be described.
    fn descriptors(
        &mut self,
        gray: &GrayImage,
        keypoints: Vec<Keypoint>,
    ) -> BowResult<Option<Described>>;
}

/// Even-odd test of a point against a closed polygon.
pub fn point_in_contour(p: Point, contour: &[Point]) -> bool {
    if contour.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = contour.len() - 1;
    for i in 0..contour.len() {
        let (a, b) = (contour[i], contour[j]);
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn crop_region((width, height): (u32, u32), contour: &[Point], margin: f32) -> CropRegion {
    let (mut x0, mut y0) = (f32::INFINITY, f32::INFINITY);
    let (mut x1, mut y1) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
    for p in contour {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    if contour.is_empty() || width == 0 || height == 0 {
        return CropRegion {
            x: 0,
            y: 0,
            width,
            height,
        };
    }
    let (mx, my) = (margin * width as f32, margin * height as f32);
    let clamp = |v: f32, max: u32| v.max(0.).min(max as f32) as u32;
    let (x, y) = (clamp(x0 - mx, width - 1), clamp(y0 - my, height - 1));
    let (xe, ye) = (clamp(x1 + mx + 1., width), clamp(y1 + my + 1., height));
    CropRegion {
        x,
        y,
        width: (xe - x).max(1),
        height: (ye - y).max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    struct Plain;

    impl Tracker for Plain {
        fn binary_mask(&mut self, frame: &RgbImage) -> GrayImage {
            GrayImage::new(frame.width(), frame.height())
        }
        fn contour(&mut self, _mask: &GrayImage) -> Option<HandShape> {
            None
        }
    }

    fn square(x0: f32, y0: f32, x1: f32, y1: f32) -> Contour {
        vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]
    }

    #[test]
    fn point_in_square() {
        let sq = square(2., 2., 8., 8.);
        assert!(point_in_contour(Point::new(5., 5.), &sq));
        assert!(!point_in_contour(Point::new(9., 5.), &sq));
        assert!(!point_in_contour(Point::new(5., 1.), &sq));
        assert!(!point_in_contour(Point::new(5., 5.), &sq[..2]));
    }

    #[test]
    fn crop_grows_by_margin_and_clips() {
        let frame = RgbImage::from_pixel(100, 50, Rgb([1, 2, 3]));
        let (crop, region) = Plain.crop(&frame, &square(10., 10., 19., 19.), 0.05);
        assert_eq!(
            region,
            CropRegion {
                x: 5,
                y: 7,
                width: 20,
                height: 15
            }
        );
        assert_eq!(crop.dimensions(), (20, 15));

        let (_, edge) = Plain.crop(&frame, &square(0., 0., 99., 49.), 0.05);
        assert_eq!(
            edge,
            CropRegion {
                x: 0,
                y: 0,
                width: 100,
                height: 50
            }
        );
    }

    #[test]
    fn contour_moves_into_crop() {
        let region = CropRegion {
            x: 5,
            y: 7,
            width: 20,
            height: 16,
        };
        let moved = Plain.crop_contour(&square(10., 10., 19., 19.), &region);
        assert_eq!(moved[0], Point::new(5., 3.));
        assert_eq!(moved[2], Point::new(14., 12.));
    }
}
