//! Live capture of training exemplars.
//!
//! [`Gate`] holds the per-gesture counters; [`Acquisition`] runs the frame loop
//! around it: one frame per tick, segmented by the [`Tracker`], described by the
//! [`Extractor`], and kept only if it looks like a single hand with enough
//! descriptors. The operator drives the loop through [`Signal`]s.

use image::{imageops, GrayImage, RgbImage};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::*;

/// Where the capture of one run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Waiting for the operator to begin `gesture`.
    AwaitingGestureStart { gesture: Label },
    /// `frame` exemplars of `gesture` accepted so far.
    Capturing { gesture: Label, frame: usize },
    Finished,
}

/// Operator input for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    None,
    /// Start capturing the awaited gesture. Ignored in other states.
    Begin,
    /// Stop acquisition, keeping what was accepted.
    Abort,
    /// Save the current frame, mask and crop to the snapshot directory.
    Snapshot,
}

/// What happened to the frame of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Tracker calibration preview, nothing was segmented.
    Calibrating,
    /// No hand contour in the mask.
    NoContour,
    /// Hand found while not capturing.
    Tracked { descriptors: usize, defects: usize },
    Rejected { descriptors: usize, defects: usize },
    Accepted { descriptors: usize, defects: usize },
}

/// Everything the operator can show about a tick.
#[derive(Debug)]
pub struct Tick<'a> {
    /// State after this frame was gated.
    pub state: CaptureState,
    pub outcome: FrameOutcome,
    /// Mirrored camera frame.
    pub frame: &'a RgbImage,
    pub mask: Option<&'a GrayImage>,
    pub crop: Option<&'a RgbImage>,
    /// Described keypoints, in crop coordinates.
    pub keypoints: &'a [Keypoint],
    pub prompt: &'a str,
}

/// The person in front of the camera: sees every tick and answers with a signal.
pub trait Operator {
    fn react(&mut self, tick: &Tick<'_>) -> Signal;
}

/// Camera or any other producer of frames. `None` once no more frames will come.
pub trait FrameSource {
    fn next_frame(&mut self) -> BowResult<Option<RgbImage>>;
}

impl<I: Iterator<Item = RgbImage>> FrameSource for I {
    fn next_frame(&mut self) -> BowResult<Option<RgbImage>> {
        Ok(self.next())
    }
}

/// Gesture and frame counters of the capture, with their transitions.
#[derive(Debug, Clone, PartialEq)]
pub struct Gate {
    num_gestures: usize,
    frames_per_gesture: usize,
    state: CaptureState,
}

impl Gate {
    pub fn new(num_gestures: usize, frames_per_gesture: usize) -> Self {
        Self {
            num_gestures,
            frames_per_gesture,
            state: CaptureState::AwaitingGestureStart { gesture: 1 },
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Start capturing the awaited gesture. False in any other state.
    pub fn begin(&mut self) -> bool {
        match self.state {
            CaptureState::AwaitingGestureStart { gesture } => {
                self.state = CaptureState::Capturing { gesture, frame: 0 };
                true
            }
            _ => false,
        }
    }

    /// Count one accepted exemplar and return its (gesture, frame) slot.
    /// `None` unless capturing.
    pub fn accept(&mut self) -> Option<(Label, usize)> {
        let (gesture, frame) = match self.state {
            CaptureState::Capturing { gesture, frame } => (gesture, frame),
            _ => return None,
        };
        let next = frame + 1;
        self.state = if next < self.frames_per_gesture {
            CaptureState::Capturing {
                gesture,
                frame: next,
            }
        } else if (gesture as usize) < self.num_gestures {
            CaptureState::AwaitingGestureStart {
                gesture: gesture + 1,
            }
        } else {
            CaptureState::Finished
        };
        Some((gesture, frame))
    }
}

/// Convexity defect count of every accepted frame, one row per gesture.
#[derive(Debug, Clone, PartialEq)]
pub struct DefectCounts {
    frames_per_gesture: usize,
    counts: Vec<u8>,
}

impl DefectCounts {
    pub fn new(num_gestures: usize, frames_per_gesture: usize) -> Self {
        Self {
            frames_per_gesture,
            counts: vec![0; num_gestures * frames_per_gesture],
        }
    }

    fn set(&mut self, gesture: Label, frame: usize, defects: usize) {
        let i = (gesture as usize - 1) * self.frames_per_gesture + frame;
        self.counts[i] = defects.min(u8::MAX as usize) as u8;
    }

    /// Counts of one gesture, by frame. Frames not captured read 0.
    pub fn row(&self, gesture: Label) -> &[u8] {
        let start = (gesture as usize - 1) * self.frames_per_gesture;
        &self.counts[start..start + self.frames_per_gesture]
    }

    pub fn num_gestures(&self) -> usize {
        if self.frames_per_gesture == 0 {
            0
        } else {
            self.counts.len() / self.frames_per_gesture
        }
    }

    /// Median defect count of each gesture.
    pub fn medians(&self) -> Vec<f32> {
        (1..=self.num_gestures() as Label)
            .map(|g| {
                let mut row = self.row(g).to_vec();
                row.sort_unstable();
                let n = row.len();
                if n % 2 == 1 {
                    row[n / 2] as f32
                } else {
                    (row[n / 2 - 1] as f32 + row[n / 2] as f32) / 2.
                }
            })
            .collect()
    }
}

/// How an acquisition run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEnd {
    /// Every gesture got its frames.
    Finished,
    /// The operator aborted.
    Aborted,
    /// The frame source ran dry first.
    SourceClosed,
}

/// Result of an acquisition run, partial unless it ended with [`CaptureEnd::Finished`].
#[derive(Debug, Clone)]
pub struct Capture {
    pub store: DescriptorStore,
    pub defects: DefectCounts,
    /// Frame of the first accepted exemplar of each gesture.
    pub first_frames: Vec<RgbImage>,
    /// State when the run stopped.
    pub state: CaptureState,
    pub end: CaptureEnd,
}

impl Capture {
    pub fn is_complete(&self) -> bool {
        self.end == CaptureEnd::Finished
    }
}

/// Segmentation and description of one frame.
struct View {
    mask: GrayImage,
    shape: Option<HandShape>,
    crop: Option<RgbImage>,
    described: Option<Described>,
}

/// Live capture session around a tracker and an extractor.
pub struct Acquisition<T, E> {
    config: TrainerConfig,
    tracker: T,
    extractor: E,
}

impl<T: Tracker, E: Extractor> Acquisition<T, E> {
    pub fn new(config: TrainerConfig, tracker: T, extractor: E) -> BowResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            tracker,
            extractor,
        })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn into_parts(self) -> (T, E) {
        (self.tracker, self.extractor)
    }

    /// Show frames until the operator begins, then build the tracker's color profile
    /// from the last frame. False if the operator aborted or the source closed first.
    pub fn calibrate<S: FrameSource, O: Operator>(
        &mut self,
        source: &mut S,
        operator: &mut O,
    ) -> BowResult<bool> {
        let prompt = "Cover the sample boxes with your hand and press <space>";
        while let Some(raw) = source.next_frame()? {
            let frame = imageops::flip_horizontal(&raw);
            let tick = Tick {
                state: CaptureState::AwaitingGestureStart { gesture: 1 },
                outcome: FrameOutcome::Calibrating,
                frame: &frame,
                mask: None,
                crop: None,
                keypoints: &[],
                prompt,
            };
            match operator.react(&tick) {
                Signal::Begin => {
                    self.tracker.calibrate(&frame);
                    info!("Tracker calibrated");
                    return Ok(true);
                }
                Signal::Abort => return Ok(false),
                _ => {}
            }
        }
        Ok(false)
    }

    /// Capture `frames_per_gesture` exemplars of each gesture.
    ///
    /// The source is owned by the run and dropped when it returns, whichever
    /// way it ends. Aborting or running out of frames is not an error: the
    /// returned [`Capture`] holds what was accepted so far.
    pub fn run<S: FrameSource, O: Operator>(
        &mut self,
        mut source: S,
        operator: &mut O,
    ) -> BowResult<Capture> {
        let mut gate = Gate::new(self.config.num_gestures, self.config.frames_per_gesture);
        let mut store = DescriptorStore::new();
        let mut defects =
            DefectCounts::new(self.config.num_gestures, self.config.frames_per_gesture);
        let mut first_frames = Vec::new();

        let end = loop {
            let raw = match source.next_frame()? {
                Some(raw) => raw,
                None => break CaptureEnd::SourceClosed,
            };
            let frame = imageops::flip_horizontal(&raw);
            let mut view = self.process(&frame)?;

            let outcome = match (&view.shape, gate.state()) {
                (None, _) => FrameOutcome::NoContour,
                (Some(shape), CaptureState::Capturing { .. }) => {
                    let n = view.described.as_ref().map_or(0, |d| d.descriptors.len());
                    let d = shape.defects.len();
                    let is_hand = d <= self.config.max_defects;
                    match view.described.take() {
                        Some(described)
                            if n >= self.config.min_descriptors_per_frame && is_hand =>
                        {
                            if let Some((gesture, slot)) = gate.accept() {
                                store.add(described.descriptors, gesture);
                                defects.set(gesture, slot, d);
                                if slot == 0 {
                                    first_frames.push(frame.clone());
                                }
                                view.described = Some(Described {
                                    keypoints: described.keypoints,
                                    descriptors: Vec::new(),
                                });
                            }
                            FrameOutcome::Accepted {
                                descriptors: n,
                                defects: d,
                            }
                        }
                        other => {
                            view.described = other;
                            debug!("frame rejected: {} descriptors, {} defects", n, d);
                            FrameOutcome::Rejected {
                                descriptors: n,
                                defects: d,
                            }
                        }
                    }
                }
                (Some(shape), _) => FrameOutcome::Tracked {
                    descriptors: view.described.as_ref().map_or(0, |d| d.descriptors.len()),
                    defects: shape.defects.len(),
                },
            };

            let state = gate.state();
            if let FrameOutcome::Accepted { .. } = outcome {
                match state {
                    CaptureState::AwaitingGestureStart { gesture } => {
                        info!("Gesture {} captured", gesture - 1)
                    }
                    CaptureState::Finished => {
                        info!("All {} gestures captured", self.config.num_gestures);
                        break CaptureEnd::Finished;
                    }
                    CaptureState::Capturing { .. } => {}
                }
            }

            let prompt = match state {
                CaptureState::AwaitingGestureStart { gesture } => {
                    format!("Press <space> for new gesture {}", gesture)
                }
                CaptureState::Capturing { gesture, .. } => format!("Getting gesture {}", gesture),
                CaptureState::Finished => String::new(),
            };
            let keypoints = view
                .described
                .as_ref()
                .map_or(&[][..], |d| d.keypoints.as_slice());
            let tick = Tick {
                state,
                outcome,
                frame: &frame,
                mask: Some(&view.mask),
                crop: view.crop.as_ref(),
                keypoints,
                prompt: &prompt,
            };
            match operator.react(&tick) {
                Signal::Begin => {
                    if gate.begin() {
                        if let CaptureState::Capturing { gesture, .. } = gate.state() {
                            info!("Capturing gesture {}", gesture);
                        }
                    }
                }
                Signal::Abort => {
                    warn!("Acquisition aborted with {} exemplars", store.len());
                    break CaptureEnd::Aborted;
                }
                Signal::Snapshot => self.snapshot(&frame, &view)?,
                Signal::None => {}
            }
        };

        Ok(Capture {
            store,
            defects,
            first_frames,
            state: gate.state(),
            end,
        })
    }

    fn process(&mut self, frame: &RgbImage) -> BowResult<View> {
        let mask = self.tracker.binary_mask(frame);
        let shape = match self.tracker.contour(&mask) {
            Some(shape) => shape,
            None => {
                return Ok(View {
                    mask,
                    shape: None,
                    crop: None,
                    described: None,
                })
            }
        };
        let (crop, region) = self
            .tracker
            .crop(frame, &shape.contour, self.config.crop_margin);
        let gray = imageops::grayscale(&crop);
        let keypoints = self.extractor.keypoints(&gray)?;
        let crop_contour = self.tracker.crop_contour(&shape.contour, &region);
        let keypoints = self.extractor.restrict_to_contour(keypoints, &crop_contour);
        let described = self.extractor.descriptors(&gray, keypoints)?;
        Ok(View {
            mask,
            shape: Some(shape),
            crop: Some(crop),
            described,
        })
    }

    fn snapshot(&self, frame: &RgbImage, view: &View) -> BowResult<()> {
        let dir = match &self.config.snapshot_dir {
            Some(dir) => dir,
            None => {
                warn!("Snapshot requested but no snapshot directory is configured");
                return Ok(());
            }
        };
        save_snapshot(dir, frame, &view.mask, view.crop.as_ref())
    }
}

fn save_snapshot(
    dir: &Path,
    frame: &RgbImage,
    mask: &GrayImage,
    crop: Option<&RgbImage>,
) -> BowResult<()> {
    std::fs::create_dir_all(dir)?;
    frame.save(dir.join("TrainingImage.jpg"))?;
    mask.save(dir.join("BinaryImage.jpg"))?;
    if let Some(crop) = crop {
        crop.save(dir.join("CroppedImage.jpg"))?;
    }
    info!("Snapshot saved to {:?}", dir);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::collections::VecDeque;

    /// Whole-frame hand whose defect count follows a script; `None` means no hand.
    struct Scripted(VecDeque<Option<usize>>);

    impl Tracker for Scripted {
        fn binary_mask(&mut self, frame: &RgbImage) -> GrayImage {
            GrayImage::from_pixel(frame.width(), frame.height(), image::Luma([255]))
        }
        fn contour(&mut self, mask: &GrayImage) -> Option<HandShape> {
            let defects = self.0.pop_front().unwrap_or(Some(1))?;
            let (w, h) = (mask.width() as f32 - 1., mask.height() as f32 - 1.);
            let far = Point::new(w / 2., h / 2.);
            Some(HandShape {
                contour: vec![
                    Point::new(0., 0.),
                    Point::new(w, 0.),
                    Point::new(w, h),
                    Point::new(0., h),
                ],
                hull: Vec::new(),
                centroid: far,
                defects: vec![
                    Defect {
                        start: far,
                        end: far,
                        far,
                        depth: 1.
                    };
                    defects
                ],
            })
        }
    }

    /// One descriptor per keypoint on a diagonal; `count` keypoints per frame.
    struct Diagonal {
        count: usize,
    }

    impl Extractor for Diagonal {
        fn keypoints(&mut self, _gray: &GrayImage) -> BowResult<Vec<Keypoint>> {
            Ok((0..self.count)
                .map(|i| Keypoint::at(2. + i as f32, 2. + i as f32))
                .collect())
        }
        fn descriptors(
            &mut self,
            _gray: &GrayImage,
            keypoints: Vec<Keypoint>,
        ) -> BowResult<Option<Described>> {
            let descriptors = keypoints.iter().map(|k| vec![k.pt.x, k.pt.y]).collect();
            Ok(Some(Described {
                keypoints,
                descriptors,
            }))
        }
    }

    struct Script(VecDeque<Signal>, Vec<CaptureState>);

    impl Operator for Script {
        fn react(&mut self, tick: &Tick<'_>) -> Signal {
            self.1.push(tick.state);
            self.0.pop_front().unwrap_or(Signal::None)
        }
    }

    fn frames(n: usize) -> impl Iterator<Item = RgbImage> {
        (0..n).map(|_| RgbImage::from_pixel(24, 24, Rgb([90, 90, 90])))
    }

    fn config(gestures: usize, frames: usize) -> TrainerConfig {
        TrainerConfig {
            num_gestures: gestures,
            frames_per_gesture: frames,
            min_descriptors_per_frame: 3,
            ..Default::default()
        }
    }

    #[test]
    fn gate_walks_gestures_in_order() {
        let mut gate = Gate::new(2, 2);
        assert_eq!(gate.accept(), None);
        assert!(gate.begin());
        assert!(!gate.begin());
        assert_eq!(gate.accept(), Some((1, 0)));
        assert_eq!(gate.accept(), Some((1, 1)));
        assert_eq!(
            gate.state(),
            CaptureState::AwaitingGestureStart { gesture: 2 }
        );
        assert_eq!(gate.accept(), None);
        assert!(gate.begin());
        assert_eq!(gate.accept(), Some((2, 0)));
        assert_eq!(gate.accept(), Some((2, 1)));
        assert_eq!(gate.state(), CaptureState::Finished);
        assert!(!gate.begin());
        assert_eq!(gate.accept(), None);
    }

    #[test]
    fn gate_never_exceeds_frames_per_gesture() {
        let mut gate = Gate::new(3, 4);
        let mut per_gesture = [0usize; 3];
        for _ in 0..100 {
            gate.begin();
            if let CaptureState::Capturing { gesture, frame } = gate.state() {
                assert!(frame < 4);
                assert!(per_gesture[..gesture as usize - 1].iter().all(|&n| n == 4));
            }
            if let Some((g, _)) = gate.accept() {
                per_gesture[g as usize - 1] += 1;
            }
        }
        assert_eq!(per_gesture, [4, 4, 4]);
    }

    #[test]
    fn rejected_frames_do_not_advance() {
        let tracker = Scripted(
            vec![
                Some(1), // awaiting, Begin
                None,    // no contour
                Some(5), // too many defects
                Some(0),
                Some(4),
            ]
            .into(),
        );
        let mut op = Script(vec![Signal::Begin].into(), Vec::new());
        let mut acq = Acquisition::new(config(1, 2), tracker, Diagonal { count: 4 }).unwrap();
        let capture = acq.run(frames(10), &mut op).unwrap();

        assert_eq!(capture.end, CaptureEnd::Finished);
        assert!(capture.is_complete());
        assert_eq!(capture.store.len(), 2);
        assert_eq!(capture.store.labels(), vec![1, 1]);
        assert_eq!(capture.defects.row(1), &[0, 4]);
        assert_eq!(capture.first_frames.len(), 1);
        assert_eq!(
            op.1,
            vec![
                CaptureState::AwaitingGestureStart { gesture: 1 },
                CaptureState::Capturing {
                    gesture: 1,
                    frame: 0
                },
                CaptureState::Capturing {
                    gesture: 1,
                    frame: 0
                },
                CaptureState::Capturing {
                    gesture: 1,
                    frame: 1
                },
            ]
        );
    }

    #[test]
    fn too_few_descriptors_rejected() {
        let mut op = Script(vec![Signal::Begin].into(), Vec::new());
        let mut acq =
            Acquisition::new(config(1, 1), Scripted(VecDeque::new()), Diagonal { count: 2 })
                .unwrap();
        let capture = acq.run(frames(5), &mut op).unwrap();
        assert_eq!(capture.end, CaptureEnd::SourceClosed);
        assert!(capture.store.is_empty());
        assert_eq!(
            capture.state,
            CaptureState::Capturing {
                gesture: 1,
                frame: 0
            }
        );
    }

    #[test]
    fn begin_only_counts_when_awaiting() {
        let signals = vec![Signal::Begin, Signal::Begin, Signal::Begin, Signal::Abort];
        let mut op = Script(signals.into(), Vec::new());
        let mut acq =
            Acquisition::new(config(2, 5), Scripted(VecDeque::new()), Diagonal { count: 4 })
                .unwrap();
        let capture = acq.run(frames(10), &mut op).unwrap();
        assert_eq!(capture.end, CaptureEnd::Aborted);
        assert_eq!(capture.store.len(), 3);
        assert_eq!(capture.store.count_label(2), 0);
    }

    #[test]
    fn calibration_waits_for_begin() {
        let mut op = Script(vec![Signal::None, Signal::Begin].into(), Vec::new());
        let mut acq =
            Acquisition::new(config(1, 1), Scripted(VecDeque::new()), Diagonal { count: 4 })
                .unwrap();
        let mut source = frames(5);
        assert!(acq.calibrate(&mut source, &mut op).unwrap());
        assert_eq!(source.count(), 3);

        let mut abort = Script(vec![Signal::Abort].into(), Vec::new());
        assert!(!acq.calibrate(&mut frames(5), &mut abort).unwrap());
    }

    #[test]
    fn snapshot_writes_images() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainerConfig {
            snapshot_dir: Some(dir.path().join("snaps")),
            ..config(1, 3)
        };
        let mut op = Script(vec![Signal::Snapshot, Signal::Abort].into(), Vec::new());
        let mut acq = Acquisition::new(cfg, Scripted(VecDeque::new()), Diagonal { count: 4 }).unwrap();
        let capture = acq.run(frames(5), &mut op).unwrap();
        assert_eq!(capture.end, CaptureEnd::Aborted);
        for name in ["TrainingImage.jpg", "BinaryImage.jpg", "CroppedImage.jpg"].iter() {
            assert!(dir.path().join("snaps").join(name).exists(), "{}", name);
        }
    }

    #[test]
    fn defect_medians() {
        let mut counts = DefectCounts::new(2, 3);
        counts.set(1, 0, 3);
        counts.set(1, 1, 1);
        counts.set(1, 2, 2);
        counts.set(2, 0, 300);
        assert_eq!(counts.row(2), &[255, 0, 0]);
        assert_eq!(counts.medians(), vec![2., 0.]);
    }
}
