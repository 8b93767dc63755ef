//! Template matching via zero-mean normalized cross-correlation
//!
//! Equivalent to OpenCV's `TM_CCOEFF_NORMED` on grayscale input: confidence
//! is in [-1, 1], 1.0 being an exact match. Matching is done in grayscale to
//! reduce sensitivity to color and lighting drift between capture and replay.
//!
//! Callers are responsible for scale: the interpreter rescales the haystack
//! to the workflow's declared resolution before matching, since templates are
//! stored at workflow resolution.

use crate::frame::Frame;

/// One template placement in haystack coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    /// Top-left corner of the placement.
    pub x: u32,
    pub y: u32,
    /// Normalized correlation in [-1, 1].
    pub confidence: f32,
}

impl Match {
    /// Center of the placement for a needle of the given size.
    pub fn center(&self, needle_width: u32, needle_height: u32) -> (u32, u32) {
        (self.x + needle_width / 2, self.y + needle_height / 2)
    }
}

/// Best placement of `needle` in `haystack`, or None below `threshold`.
pub fn best_match(haystack: &Frame, needle: &Frame, threshold: f32) -> Option<Match> {
    let scores = ScoreMap::compute(haystack, needle)?;

    let mut best: Option<Match> = None;
    for y in 0..scores.height {
        for x in 0..scores.width {
            let confidence = scores.at(x, y);
            if best.map_or(true, |b| confidence > b.confidence) {
                best = Some(Match {
                    x,
                    y,
                    confidence,
                });
            }
        }
    }

    best.filter(|m| m.confidence >= threshold)
}

/// All placements above `threshold`, non-maximum suppressed with radius
/// `min(needle_w, needle_h) / 2`, sorted by descending confidence.
pub fn match_all(haystack: &Frame, needle: &Frame, threshold: f32) -> Vec<Match> {
    let scores = match ScoreMap::compute(haystack, needle) {
        Some(scores) => scores,
        None => return Vec::new(),
    };

    let mut candidates = Vec::new();
    for y in 0..scores.height {
        for x in 0..scores.width {
            let confidence = scores.at(x, y);
            if confidence >= threshold {
                candidates.push(Match {
                    x,
                    y,
                    confidence,
                });
            }
        }
    }

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let radius = (needle.width().min(needle.height()) / 2).max(1);
    let mut accepted: Vec<Match> = Vec::new();
    for candidate in candidates {
        let suppressed = accepted.iter().any(|kept| {
            let dx = kept.x.abs_diff(candidate.x);
            let dy = kept.y.abs_diff(candidate.y);
            dx.max(dy) < radius
        });
        if !suppressed {
            accepted.push(candidate);
        }
    }

    accepted
}

/// Dense NCC score map over every valid placement.
struct ScoreMap {
    width: u32,
    height: u32,
    scores: Vec<f32>,
}

impl ScoreMap {
    fn at(&self, x: u32, y: u32) -> f32 {
        self.scores[y as usize * self.width as usize + x as usize]
    }

    fn compute(haystack: &Frame, needle: &Frame) -> Option<ScoreMap> {
        let (hw, hh) = (haystack.width() as usize, haystack.height() as usize);
        let (nw, nh) = (needle.width() as usize, needle.height() as usize);
        if nw == 0 || nh == 0 || nw > hw || nh > hh {
            return None;
        }

        let hay = haystack.to_gray();
        let tpl = needle.to_gray();
        let n = (nw * nh) as f64;

        // Zero-mean template and its norm, computed once.
        let tpl_mean = tpl.iter().map(|&v| v as f64).sum::<f64>() / n;
        let tpl_zm: Vec<f64> = tpl.iter().map(|&v| v as f64 - tpl_mean).collect();
        let tpl_norm_sq: f64 = tpl_zm.iter().map(|v| v * v).sum();

        // Integral images over the haystack for O(1) window sums.
        let integral = Integral::build(&hay, hw, hh);

        let out_w = hw - nw + 1;
        let out_h = hh - nh + 1;
        let mut scores = vec![0.0f32; out_w * out_h];

        for oy in 0..out_h {
            for ox in 0..out_w {
                let win_sum = integral.sum(ox, oy, nw, nh);
                let win_sum_sq = integral.sum_sq(ox, oy, nw, nh);
                let win_norm_sq = win_sum_sq - win_sum * win_sum / n;

                let denom_sq = win_norm_sq * tpl_norm_sq;
                if denom_sq <= f64::EPSILON {
                    // Flat window or flat template: correlation undefined.
                    continue;
                }

                // Cross term: the template is zero-mean, so the window mean
                // drops out of the sum.
                let mut cross = 0.0f64;
                for ty in 0..nh {
                    let hay_row = (oy + ty) * hw + ox;
                    let tpl_row = ty * nw;
                    for tx in 0..nw {
                        cross += hay[hay_row + tx] as f64 * tpl_zm[tpl_row + tx];
                    }
                }

                scores[oy * out_w + ox] = (cross / denom_sq.sqrt()) as f32;
            }
        }

        Some(ScoreMap {
            width: out_w as u32,
            height: out_h as u32,
            scores,
        })
    }
}

/// Summed-area tables for value and squared value.
struct Integral {
    width: usize,
    sums: Vec<f64>,
    sq_sums: Vec<f64>,
}

impl Integral {
    fn build(values: &[f32], width: usize, height: usize) -> Self {
        let stride = width + 1;
        let mut sums = vec![0.0f64; stride * (height + 1)];
        let mut sq_sums = vec![0.0f64; stride * (height + 1)];

        for y in 0..height {
            let mut row_sum = 0.0f64;
            let mut row_sq = 0.0f64;
            for x in 0..width {
                let v = values[y * width + x] as f64;
                row_sum += v;
                row_sq += v * v;
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row_sum;
                sq_sums[(y + 1) * stride + x + 1] = sq_sums[y * stride + x + 1] + row_sq;
            }
        }

        Self {
            width: stride,
            sums,
            sq_sums,
        }
    }

    fn rect(&self, table: &[f64], x: usize, y: usize, w: usize, h: usize) -> f64 {
        let stride = self.width;
        table[(y + h) * stride + x + w] + table[y * stride + x]
            - table[y * stride + x + w]
            - table[(y + h) * stride + x]
    }

    fn sum(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        self.rect(&self.sums, x, y, w, h)
    }

    fn sum_sq(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        self.rect(&self.sq_sums, x, y, w, h)
    }
}
