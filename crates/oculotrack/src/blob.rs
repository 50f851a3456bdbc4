//! Connected-component statistics over binarized images.

use image::GrayImage;
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::ellipse::Ellipse;

/// Statistics of one connected component.
#[derive(Debug, Clone)]
pub struct Blob {
    /// Pixel count.
    pub area: u64,
    /// Centroid in image pixels.
    pub centroid: [f64; 2],
    /// Central second moments (mu20, mu02, mu11).
    pub moments: [f64; 3],
    /// Bounding box (x0, y0, x1, y1), inclusive.
    pub bbox: [u32; 4],
}

impl Blob {
    /// Radius of the circle with the same area.
    pub fn equivalent_radius(&self) -> f64 {
        (self.area as f64 / std::f64::consts::PI).sqrt()
    }

    /// Ellipse with the same centroid and second moments as this blob.
    ///
    /// For a solid ellipse of semi-axes (a, b) the normalized central moments
    /// along the principal axes are a²/4 and b²/4, so the axes are recovered
    /// as twice the square roots of the moment eigenvalues.
    pub fn to_ellipse(&self) -> Option<Ellipse> {
        let [mu20, mu02, mu11] = self.moments;
        let sum = mu20 + mu02;
        let diff_term = ((mu20 - mu02).powi(2) + 4.0 * mu11 * mu11).sqrt();
        let l1 = (sum + diff_term) * 0.5;
        let l2 = (sum - diff_term) * 0.5;
        if l1 <= 0.0 || l2 <= 0.0 {
            return None;
        }
        let angle = 0.5 * (2.0 * mu11).atan2(mu20 - mu02);
        let e = Ellipse {
            cx: self.centroid[0],
            cy: self.centroid[1],
            a: 2.0 * l1.sqrt(),
            b: 2.0 * l2.sqrt(),
            angle,
        };
        e.is_valid().then_some(e)
    }
}

/// Label foreground (non-zero) regions of a binary image and collect their
/// statistics. 8-connectivity.
pub fn find_blobs(binary: &GrayImage) -> Vec<Blob> {
    let labels = connected_components(binary, Connectivity::Eight, image::Luma([0u8]));
    let (w, h) = labels.dimensions();

    struct Acc {
        n: u64,
        sx: f64,
        sy: f64,
        sxx: f64,
        syy: f64,
        sxy: f64,
        bbox: [u32; 4],
    }
    let mut accs: Vec<Option<Acc>> = Vec::new();

    for y in 0..h {
        for x in 0..w {
            let label = labels.get_pixel(x, y)[0] as usize;
            if label == 0 {
                continue;
            }
            if accs.len() < label {
                accs.resize_with(label, || None);
            }
            let acc = accs[label - 1].get_or_insert(Acc {
                n: 0,
                sx: 0.0,
                sy: 0.0,
                sxx: 0.0,
                syy: 0.0,
                sxy: 0.0,
                bbox: [x, y, x, y],
            });
            let (fx, fy) = (x as f64, y as f64);
            acc.n += 1;
            acc.sx += fx;
            acc.sy += fy;
            acc.sxx += fx * fx;
            acc.syy += fy * fy;
            acc.sxy += fx * fy;
            acc.bbox[0] = acc.bbox[0].min(x);
            acc.bbox[1] = acc.bbox[1].min(y);
            acc.bbox[2] = acc.bbox[2].max(x);
            acc.bbox[3] = acc.bbox[3].max(y);
        }
    }

    accs.into_iter()
        .flatten()
        .map(|a| {
            let n = a.n as f64;
            let cx = a.sx / n;
            let cy = a.sy / n;
            Blob {
                area: a.n,
                centroid: [cx, cy],
                moments: [
                    a.sxx / n - cx * cx,
                    a.syy / n - cy * cy,
                    a.sxy / n - cx * cy,
                ],
                bbox: a.bbox,
            }
        })
        .collect()
}

/// Select the largest blob, breaking area ties deterministically.
///
/// Ties go to the blob whose centroid is closest to `previous` when one is
/// available, otherwise to the earliest blob in label (scan) order.
pub fn select_largest(blobs: &[Blob], previous: Option<[f64; 2]>) -> Option<&Blob> {
    let max_area = blobs.iter().map(|b| b.area).max()?;
    let mut candidates = blobs.iter().filter(|b| b.area == max_area);
    let first = candidates.next()?;
    match previous {
        None => Some(first),
        Some(p) => {
            let dist2 = |b: &Blob| {
                let dx = b.centroid[0] - p[0];
                let dy = b.centroid[1] - p[1];
                dx * dx + dy * dy
            };
            let mut best = first;
            let mut best_d = dist2(first);
            for b in candidates {
                let d = dist2(b);
                if d < best_d {
                    best = b;
                    best_d = d;
                }
            }
            Some(best)
        }
    }
}
