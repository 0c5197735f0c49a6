use image::{imageops, GrayImage, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::*;

const IMAGE_EXT: &str = "jpg";
const MASK_EXT: &str = "bmp";

/// Descriptor sets read from disk, one per image.
#[derive(Debug, Clone)]
pub struct Batch {
    pub store: DescriptorStore,
    /// First image of each gesture directory that had one.
    pub first_images: Vec<RgbImage>,
}

/// Gesture-labeled image directories: `root/<gesture>/**/*.jpg`.
///
/// Images of the `i`-th gesture directory get label `i + 1`. With masks
/// enabled, every image needs a mask at `mask_root/<gesture>/<same path>.bmp`.
#[derive(Debug, Clone)]
pub struct ImageTree {
    root: PathBuf,
    gestures: Vec<String>,
    mask_root: Option<PathBuf>,
    polarity: MaskPolarity,
}

impl ImageTree {
    pub fn new<P: AsRef<Path>>(root: P, gestures: Vec<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            gestures,
            mask_root: None,
            polarity: MaskPolarity::None,
        }
    }

    /// Restrict keypoints to the hand in companion masks. `MaskPolarity::None` turns masks off.
    pub fn with_masks<P: AsRef<Path>>(mut self, mask_root: P, polarity: MaskPolarity) -> Self {
        self.mask_root = Some(mask_root.as_ref().to_path_buf());
        self.polarity = polarity;
        self
    }

    pub fn gestures(&self) -> &[String] {
        &self.gestures
    }

    /// Images of one gesture directory, sorted.
    pub fn images(&self, gesture: &str) -> BowResult<Vec<PathBuf>> {
        let mut found = Vec::new();
        walk(&self.root.join(gesture), &mut found)?;
        found.sort();
        Ok(found)
    }

    /// Describe every image, without any acceptance gating. An image whose
    /// keypoints could not be described is skipped.
    pub fn ingest<T: Tracker, E: Extractor>(
        &self,
        config: &TrainerConfig,
        tracker: &mut T,
        extractor: &mut E,
    ) -> BowResult<Batch> {
        let mut store = DescriptorStore::new();
        let mut first_images = Vec::new();

        for (i, gesture) in self.gestures.iter().enumerate() {
            let label = i as Label + 1;
            let dir = self.root.join(gesture);
            info!("Extracting descriptors from {:?}", dir);
            for (j, path) in self.images(gesture)?.into_iter().enumerate() {
                let image = imageops::flip_horizontal(&image::open(&path)?.to_rgb8());
                let mask = match self.mask_path(gesture, &dir, &path) {
                    Some(mask_path) => {
                        if !mask_path.is_file() {
                            return Err(BowErr::MissingMask(mask_path));
                        }
                        let raw = imageops::flip_horizontal(&image::open(&mask_path)?.to_luma8());
                        Some(binarize(&raw, self.polarity, config.mask_dilation))
                    }
                    None => None,
                };
                match describe(&image, mask.as_ref(), tracker, extractor)? {
                    Some(described) => {
                        store.add(described.descriptors, label);
                    }
                    None => debug!("no descriptors in {:?}", path),
                }
                if j == 0 {
                    first_images.push(image);
                }
            }
        }
        info!("Ingested {} images", store.len());
        Ok(Batch {
            store,
            first_images,
        })
    }

    fn mask_path(&self, gesture: &str, dir: &Path, image: &Path) -> Option<PathBuf> {
        if self.polarity == MaskPolarity::None {
            return None;
        }
        let relative = image.strip_prefix(dir).ok()?;
        let root = self.mask_root.as_ref()?;
        Some(root.join(gesture).join(relative).with_extension(MASK_EXT))
    }
}

/// Threshold a grayscale mask at 127 by polarity, then dilate it with a
/// square of the given radius.
pub fn binarize(mask: &GrayImage, polarity: MaskPolarity, radius: u8) -> GrayImage {
    let mut binary = mask.clone();
    for p in binary.pixels_mut() {
        let white = p.0[0] > 127;
        let keep = match polarity {
            MaskPolarity::Inverted => !white,
            _ => white,
        };
        p.0[0] = if keep { 255 } else { 0 };
    }
    if radius == 0 {
        binary
    } else {
        dilate(&binary, Norm::LInf, radius)
    }
}

/// Keypoints and descriptors of a whole image, restricted to the hand contour
/// of `mask` when one is given. A mask without a hand keeps no keypoint.
fn describe<T: Tracker, E: Extractor>(
    image: &RgbImage,
    mask: Option<&GrayImage>,
    tracker: &mut T,
    extractor: &mut E,
) -> BowResult<Option<Described>> {
    let gray = imageops::grayscale(image);
    let mut keypoints = extractor.keypoints(&gray)?;
    if let Some(mask) = mask {
        keypoints = match tracker.contour(mask) {
            Some(shape) => extractor.restrict_to_contour(keypoints, &shape.contour),
            None => Vec::new(),
        };
    }
    extractor.descriptors(&gray, keypoints)
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> BowResult<()> {
    for entry in dir.read_dir()? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, found)?;
        } else if path.extension().map_or(false, |e| e == IMAGE_EXT) {
            found.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};
    use std::fs;

    /// Bounding rectangle of the white pixels.
    struct BoxTracker;

    impl Tracker for BoxTracker {
        fn binary_mask(&mut self, frame: &RgbImage) -> GrayImage {
            imageops::grayscale(frame)
        }
        fn contour(&mut self, mask: &GrayImage) -> Option<HandShape> {
            let white: Vec<(u32, u32)> = mask
                .enumerate_pixels()
                .filter(|(_, _, p)| p.0[0] == 255)
                .map(|(x, y, _)| (x, y))
                .collect();
            let x0 = white.iter().map(|w| w.0).min()? as f32;
            let x1 = white.iter().map(|w| w.0).max()? as f32;
            let y0 = white.iter().map(|w| w.1).min()? as f32;
            let y1 = white.iter().map(|w| w.1).max()? as f32;
            Some(HandShape {
                contour: vec![
                    Point::new(x0, y0),
                    Point::new(x1, y0),
                    Point::new(x1, y1),
                    Point::new(x0, y1),
                ],
                hull: Vec::new(),
                centroid: Point::new((x0 + x1) / 2., (y0 + y1) / 2.),
                defects: Vec::new(),
            })
        }
    }

    /// Keypoints on an 8 pixel grid, described by their position.
    struct Grid;

    impl Extractor for Grid {
        fn keypoints(&mut self, gray: &GrayImage) -> BowResult<Vec<Keypoint>> {
            let mut kps = Vec::new();
            for y in (4..gray.height()).step_by(8) {
                for x in (4..gray.width()).step_by(8) {
                    kps.push(Keypoint::at(x as f32, y as f32));
                }
            }
            Ok(kps)
        }
        fn descriptors(
            &mut self,
            _gray: &GrayImage,
            keypoints: Vec<Keypoint>,
        ) -> BowResult<Option<Described>> {
            if keypoints.is_empty() {
                return Ok(None);
            }
            let descriptors = keypoints.iter().map(|k| vec![k.pt.x, k.pt.y]).collect();
            Ok(Some(Described {
                keypoints,
                descriptors,
            }))
        }
    }

    fn gestures() -> Vec<String> {
        vec!["fist".to_string(), "palm".to_string()]
    }

    fn tree(root: &Path, with_masks: bool) {
        let image = RgbImage::from_pixel(32, 32, Rgb([120, 80, 60]));
        let mask = GrayImage::from_fn(32, 32, |x, _| Luma([if x < 16 { 255 } else { 0 }]));
        for (g, n) in gestures().iter().zip(&[2, 3]) {
            let dir = root.join("img").join(g).join("take");
            fs::create_dir_all(&dir).unwrap();
            let mask_dir = root.join("mask").join(g).join("take");
            fs::create_dir_all(&mask_dir).unwrap();
            for i in 0..*n {
                image.save(dir.join(format!("{}.jpg", i))).unwrap();
                if with_masks {
                    mask.save(mask_dir.join(format!("{}.bmp", i))).unwrap();
                }
            }
            fs::write(dir.join("notes.txt"), "skip me").unwrap();
        }
    }

    fn restricted(root: &Path, polarity: MaskPolarity) -> DescriptorStore {
        let images = ImageTree::new(root.join("img"), gestures()).with_masks(root.join("mask"), polarity);
        images
            .ingest(&TrainerConfig::default(), &mut BoxTracker, &mut Grid)
            .unwrap()
            .store
    }

    #[test]
    fn labels_follow_directory_order() {
        let dir = tempfile::tempdir().unwrap();
        tree(dir.path(), false);
        let images = ImageTree::new(dir.path().join("img"), gestures());
        assert_eq!(images.images("palm").unwrap().len(), 3);

        let batch = images
            .ingest(&TrainerConfig::default(), &mut BoxTracker, &mut Grid)
            .unwrap();
        assert_eq!(batch.store.labels(), vec![1, 1, 2, 2, 2]);
        assert_eq!(batch.first_images.len(), 2);
        for e in batch.store.examples() {
            assert_eq!(e.descriptors.len(), 16);
        }
    }

    #[test]
    fn mask_polarity_selects_complementary_keypoints() {
        let dir = tempfile::tempdir().unwrap();
        tree(dir.path(), true);
        let white = restricted(dir.path(), MaskPolarity::Foreground);
        let black = restricted(dir.path(), MaskPolarity::Inverted);
        assert_eq!(white.len(), 5);
        assert_eq!(black.len(), 5);

        let (w, b) = (&white.get(0).unwrap().descriptors, &black.get(0).unwrap().descriptors);
        assert_eq!(w.len(), 8);
        assert_eq!(b.len(), 8);
        assert!(w.iter().all(|d| !b.contains(d)));
        // masks are mirrored with the image: the white left half ends up on the right
        assert!(w.iter().all(|d| d[0] > 16.));
    }

    #[test]
    fn missing_mask_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        tree(dir.path(), false);
        let images = ImageTree::new(dir.path().join("img"), gestures())
            .with_masks(dir.path().join("mask"), MaskPolarity::from_flag(1));
        let err = images.ingest(&TrainerConfig::default(), &mut BoxTracker, &mut Grid);
        assert!(matches!(err, Err(BowErr::MissingMask(_))));
    }

    #[test]
    fn binarize_thresholds_and_dilates() {
        let mut mask = GrayImage::new(9, 9);
        mask.put_pixel(4, 4, Luma([200]));
        mask.put_pixel(0, 0, Luma([127]));
        let white = binarize(&mask, MaskPolarity::Foreground, 1);
        assert_eq!(white.pixels().filter(|p| p.0[0] == 255).count(), 9);
        assert_eq!(white.get_pixel(0, 0).0[0], 0);

        let inverted = binarize(&mask, MaskPolarity::Inverted, 0);
        assert_eq!(inverted.get_pixel(4, 4).0[0], 0);
        assert_eq!(inverted.get_pixel(0, 0).0[0], 255);
    }
}
