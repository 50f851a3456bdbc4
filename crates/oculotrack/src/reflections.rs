//! Corneal reflection (glint) localization near the pupil.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blob::find_blobs;
use crate::ellipse::Ellipse;
use crate::imageops::{binarize, Roi};

/// One corneal reflection with its stable identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CornealReflection {
    /// Index after left-to-right ordering; stable frame-to-frame as long as
    /// the same reflections stay visible.
    pub index: usize,
    /// Reflection center in image pixels.
    pub center: [f64; 2],
    /// Equivalent radius in pixels.
    pub radius: f64,
}

/// Corneal reflection tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// Pixels at or above this intensity count as glint-bright.
    pub bright_threshold: u8,
    /// Smallest accepted glint radius, pixels.
    pub min_radius_px: f64,
    /// Largest accepted glint radius, pixels.
    pub max_radius_px: f64,
    /// Number of reflections the illuminator geometry produces.
    pub expected_count: usize,
    /// Search neighborhood half-width as a multiple of the pupil mean radius.
    pub search_radius_factor: f64,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            bright_threshold: 230,
            min_radius_px: 1.0,
            max_radius_px: 8.0,
            expected_count: 2,
            search_radius_factor: 2.5,
        }
    }
}

/// Find corneal reflections in a neighborhood anchored at the pupil.
///
/// Bright blobs outside the [min, max] radius band are discarded; survivors
/// are capped at `expected_count` keeping the largest, then ordered
/// left-to-right so identities stay consistent across frames. No match is an
/// empty set, never an error.
pub fn find_reflections(
    img: &GrayImage,
    pupil: &Ellipse,
    config: &ReflectionConfig,
) -> Vec<CornealReflection> {
    let half = pupil.mean_radius() * config.search_radius_factor;
    let roi = Roi::centered([pupil.cx, pupil.cy], half, half, img);
    if roi.area() == 0 {
        return Vec::new();
    }

    let threshold = config.bright_threshold;
    let bright = binarize(img, roi, |p| p >= threshold);
    let mut glints: Vec<CornealReflection> = find_blobs(&bright)
        .into_iter()
        .filter_map(|b| {
            let r = b.equivalent_radius();
            (r >= config.min_radius_px && r <= config.max_radius_px).then_some(
                CornealReflection {
                    index: 0,
                    center: b.centroid,
                    radius: r,
                },
            )
        })
        .collect();

    if glints.len() > config.expected_count {
        debug!(
            found = glints.len(),
            expected = config.expected_count,
            "dropping surplus glint candidates"
        );
        glints.sort_by(|a, b| b.radius.partial_cmp(&a.radius).unwrap());
        glints.truncate(config.expected_count);
    }

    glints.sort_by(|a, b| a.center[0].partial_cmp(&b.center[0]).unwrap());
    for (i, g) in glints.iter_mut().enumerate() {
        g.index = i;
    }
    glints
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn scene_with_glints(centers: &[(u32, u32)]) -> (GrayImage, Ellipse) {
        let mut img = GrayImage::from_pixel(120, 120, Luma([90]));
        for &(cx, cy) in centers {
            for dy in -2i32..=2 {
                for dx in -2i32..=2 {
                    if dx * dx + dy * dy <= 4 {
                        img.put_pixel((cx as i32 + dx) as u32, (cy as i32 + dy) as u32, Luma([250]));
                    }
                }
            }
        }
        let pupil = Ellipse {
            cx: 60.0,
            cy: 60.0,
            a: 15.0,
            b: 15.0,
            angle: 0.0,
        };
        (img, pupil)
    }

    #[test]
    fn orders_glints_left_to_right() {
        let (img, pupil) = scene_with_glints(&[(75, 58), (48, 62)]);
        let found = find_reflections(&img, &pupil, &ReflectionConfig::default());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].index, 0);
        assert!(found[0].center[0] < found[1].center[0]);
    }

    #[test]
    fn no_glints_yields_empty_set() {
        let (img, pupil) = scene_with_glints(&[]);
        assert!(find_reflections(&img, &pupil, &ReflectionConfig::default()).is_empty());
    }

    #[test]
    fn glints_outside_search_window_are_ignored() {
        let (img, pupil) = scene_with_glints(&[(5, 5)]);
        assert!(find_reflections(&img, &pupil, &ReflectionConfig::default()).is_empty());
    }

    #[test]
    fn surplus_glints_capped_at_expected_count() {
        let (img, pupil) = scene_with_glints(&[(45, 60), (60, 55), (75, 65)]);
        let cfg = ReflectionConfig {
            expected_count: 2,
            ..Default::default()
        };
        let found = find_reflections(&img, &pupil, &cfg);
        assert_eq!(found.len(), 2);
    }
}
