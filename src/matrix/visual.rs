//! Visual assertions for screenshot scenarios.
//!
//! The simulated screen paints one band per unit in scope, colored from the
//! unit's current body, so a redefinition that changes behavior changes the
//! picture.

use image::{Rgba, RgbaImage};
use lab::{Lab, rgb_bytes_to_labs};

use crate::core::UnitName;
use crate::engine::{RecompositionScope, SimulatedRuntime};

pub const SCREEN_WIDTH: u32 = 64;
pub const BAND_HEIGHT: u32 = 8;

/// Largest ΔE between two pixels still considered equal.
pub const DEFAULT_MAX_DELTA_E: f32 = 2.3;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

pub trait VisualAssertion {
    fn render(&self, scope: &RecompositionScope) -> RgbaImage;

    fn compare(&self, expected: &RgbaImage, actual: &RgbaImage) -> Diff {
        compare(expected, actual, DEFAULT_MAX_DELTA_E)
    }
}

/// Pixel difference between two renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diff {
    pub differing: u64,
    pub total: u64,
}

impl Diff {
    pub fn is_identical(&self) -> bool {
        self.differing == 0
    }

    /// Share of differing pixels, 0.0 for two empty images.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.differing as f64 / self.total as f64
    }

    pub fn within(&self, tolerance: f64) -> bool {
        self.ratio() <= tolerance
    }
}

/// Compare in LAB space. Images of different size differ everywhere.
pub fn compare(expected: &RgbaImage, actual: &RgbaImage, max_delta_e: f32) -> Diff {
    if expected.dimensions() != actual.dimensions() {
        let total = u64::from(expected.width().max(actual.width()))
            * u64::from(expected.height().max(actual.height()));
        return Diff {
            differing: total,
            total,
        };
    }

    let threshold = max_delta_e * max_delta_e;
    let (expected_lab, actual_lab) = (to_lab(expected), to_lab(actual));
    let differing = expected
        .pixels()
        .zip(actual.pixels())
        .zip(expected_lab.iter().zip(&actual_lab))
        .filter(|((a, b), (la, lb))| a[3] != b[3] || distance_sq(la, lb) > threshold)
        .count() as u64;

    Diff {
        differing,
        total: u64::from(expected.width()) * u64::from(expected.height()),
    }
}

fn to_lab(img: &RgbaImage) -> Vec<Lab> {
    let mut rgb_bytes = Vec::with_capacity(img.width() as usize * img.height() as usize * 3);
    for pixel in img.pixels() {
        rgb_bytes.extend_from_slice(&pixel.0[..3]);
    }
    rgb_bytes_to_labs(&rgb_bytes)
}

#[inline]
fn distance_sq(c1: &Lab, c2: &Lab) -> f32 {
    let dl = c1.l - c2.l;
    let da = c1.a - c2.a;
    let db = c1.b - c2.b;
    dl * dl + da * da + db * db
}

/// Renders the state of a [`SimulatedRuntime`].
#[derive(Debug, Clone)]
pub struct SimulatedScreen {
    runtime: SimulatedRuntime,
}

impl SimulatedScreen {
    pub fn new(runtime: SimulatedRuntime) -> Self {
        Self { runtime }
    }

    fn band_color(&self, unit: &UnitName) -> Rgba<u8> {
        match self.runtime.body(unit) {
            Some(body) => {
                let hash = blake3::hash(&body);
                let [r, g, b] = [hash.as_bytes()[0], hash.as_bytes()[1], hash.as_bytes()[2]];
                Rgba([r, g, b, 255])
            }
            None => TRANSPARENT,
        }
    }
}

impl VisualAssertion for SimulatedScreen {
    fn render(&self, scope: &RecompositionScope) -> RgbaImage {
        let mut units = scope.units.clone();
        units.sort();

        let bands = units.len().max(1) as u32;
        let mut img = RgbaImage::from_pixel(SCREEN_WIDTH, bands * BAND_HEIGHT, TRANSPARENT);
        for (row, unit) in units.iter().enumerate() {
            let color = self.band_color(unit);
            let top = row as u32 * BAND_HEIGHT;
            for y in top..top + BAND_HEIGHT {
                for x in 0..SCREEN_WIDTH {
                    img.put_pixel(x, y, color);
                }
            }
        }
        img
    }
}
