#![cfg(feature = "opencv")]
use crate::{BowErr, BowResult, Described, DescriptorKind, Extractor, Keypoint, Point};
use image::GrayImage;
use opencv::{
    core::{KeyPoint, Mat, Point2f, Scalar, CV_8UC1},
    features2d::{BRISK, ORB},
    prelude::*,
    types::VectorOfKeyPoint,
};

enum Detector {
    Orb(opencv::core::Ptr<dyn ORB>),
    Brisk(opencv::core::Ptr<dyn BRISK>),
}

/// ORB or BRISK keypoints and descriptors computed by opencv.
///
/// Binary descriptors are widened byte by byte to `f32`, so they can be
/// clustered with the Euclidean vocabulary.
pub struct CvExtractor {
    detector: Detector,
}

impl CvExtractor {
    pub fn new(kind: DescriptorKind) -> BowResult<Self> {
        let detector = match kind {
            DescriptorKind::Orb => Detector::Orb(ORB::default()?),
            DescriptorKind::Brisk => Detector::Brisk(BRISK::create(30, 3, 1.0)?),
        };
        Ok(Self { detector })
    }
}

impl Extractor for CvExtractor {
    fn keypoints(&mut self, gray: &GrayImage) -> BowResult<Vec<Keypoint>> {
        let img = to_mat(gray)?;
        let mask = Mat::default()?;
        let mut kps = VectorOfKeyPoint::new();
        match &mut self.detector {
            Detector::Orb(orb) => orb.detect(&img, &mut kps, &mask)?,
            Detector::Brisk(brisk) => brisk.detect(&img, &mut kps, &mask)?,
        }
        Ok(kps
            .iter()
            .map(|k| Keypoint {
                pt: Point::new(k.pt.x, k.pt.y),
                size: k.size,
                angle: k.angle,
                response: k.response,
            })
            .collect())
    }

    fn descriptors(
        &mut self,
        gray: &GrayImage,
        keypoints: Vec<Keypoint>,
    ) -> BowResult<Option<Described>> {
        if keypoints.is_empty() {
            return Ok(None);
        }
        let img = to_mat(gray)?;
        let mut kps = VectorOfKeyPoint::new();
        for k in &keypoints {
            kps.push(KeyPoint::new_point(
                Point2f::new(k.pt.x, k.pt.y),
                k.size,
                k.angle,
                k.response,
                0,
                -1,
            )?);
        }
        let mut desc = Mat::default()?;
        match &mut self.detector {
            Detector::Orb(orb) => orb.compute(&img, &mut kps, &mut desc)?,
            Detector::Brisk(brisk) => brisk.compute(&img, &mut kps, &mut desc)?,
        }
        if desc.rows() == 0 {
            return Ok(None);
        }
        if desc.rows() as usize != kps.len() {
            return Err(BowErr::OpenCvDecode);
        }

        // compute() drops keypoints it cannot describe
        let keypoints = kps
            .iter()
            .map(|k| Keypoint {
                pt: Point::new(k.pt.x, k.pt.y),
                size: k.size,
                angle: k.angle,
                response: k.response,
            })
            .collect();
        let mut descriptors = Vec::with_capacity(desc.rows() as usize);
        for i in 0..desc.rows() {
            let row = (0..desc.cols())
                .map(|j| desc.at_2d::<u8>(i, j).map(|&v| v as f32))
                .collect::<opencv::Result<Vec<f32>>>()?;
            descriptors.push(row);
        }
        Ok(Some(Described {
            keypoints,
            descriptors,
        }))
    }
}

fn to_mat(gray: &GrayImage) -> BowResult<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(
        gray.height() as i32,
        gray.width() as i32,
        CV_8UC1,
        Scalar::all(0.),
    )?;
    for (x, y, p) in gray.enumerate_pixels() {
        *mat.at_2d_mut::<u8>(y as i32, x as i32)? = p.0[0];
    }
    Ok(mat)
}
