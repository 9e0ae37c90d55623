//! Largest stable rectangle inside a warped validity mask.

use ndarray::Array2;

/// Axis-aligned rectangle with inclusive bounds, in (row, column) space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub top: usize,
    pub left: usize,
    pub bottom: usize,
    pub right: usize,
}

impl Rect {
    pub fn height(&self) -> usize {
        self.bottom - self.top + 1
    }

    pub fn width(&self) -> usize {
        self.right - self.left + 1
    }

    /// Shrink the bottom-right corner so both dimensions are exact multiples
    /// of `modulus`. Returns `None` when a dimension is smaller than the
    /// modulus and no valid rectangle remains.
    pub fn snap_to_multiple(self, modulus: usize) -> Option<Rect> {
        if modulus <= 1 {
            return Some(self);
        }
        let row_excess = self.height() % modulus;
        let col_excess = self.width() % modulus;
        if row_excess == self.height() || col_excess == self.width() {
            return None;
        }
        Some(Rect {
            bottom: self.bottom - row_excess,
            right: self.right - col_excess,
            ..self
        })
    }
}

fn span_valid(mask: &Array2<f32>, row_range: (usize, usize), col_range: (usize, usize)) -> bool {
    for row in row_range.0..=row_range.1 {
        for col in col_range.0..=col_range.1 {
            if mask[[row, col]] < 0.5 {
                return false;
            }
        }
    }
    true
}

/// Find a locally maximal rectangle of valid pixels.
///
/// Seeds a 1x1 rectangle at the mask's center of mass, then grows each side
/// in clockwise order (top, right, bottom, left). A side grows by 2 when
/// every pixel it would newly cover is valid, falls back to 1, and freezes
/// once neither step fits. Each growth step covers at least one new line, so
/// the loop terminates after O(height + width) iterations.
///
/// An empty mask seeds at the geometric center and returns that single pixel.
pub fn largest_rectangle(mask: &Array2<f32>) -> Rect {
    let (h, w) = mask.dim();
    debug_assert!(h > 0 && w > 0);

    let mut mass = 0.0f64;
    let mut row_sum = 0.0f64;
    let mut col_sum = 0.0f64;
    for ((row, col), &v) in mask.indexed_iter() {
        if v >= 0.5 {
            mass += 1.0;
            row_sum += row as f64;
            col_sum += col as f64;
        }
    }

    let (seed_row, seed_col) = if mass > 0.0 {
        (
            (row_sum / mass).round() as usize,
            (col_sum / mass).round() as usize,
        )
    } else {
        (h / 2, w / 2)
    };

    let mut rect = Rect {
        top: seed_row.min(h - 1),
        left: seed_col.min(w - 1),
        bottom: seed_row.min(h - 1),
        right: seed_col.min(w - 1),
    };

    let mut top_open = true;
    let mut right_open = true;
    let mut bottom_open = true;
    let mut left_open = true;

    while top_open || right_open || bottom_open || left_open {
        if top_open {
            if rect.top >= 2 && span_valid(mask, (rect.top - 2, rect.top - 1), (rect.left, rect.right)) {
                rect.top -= 2;
            } else {
                if rect.top >= 1
                    && span_valid(mask, (rect.top - 1, rect.top - 1), (rect.left, rect.right))
                {
                    rect.top -= 1;
                }
                top_open = false;
            }
        }

        if right_open {
            if rect.right + 2 < w
                && span_valid(mask, (rect.top, rect.bottom), (rect.right + 1, rect.right + 2))
            {
                rect.right += 2;
            } else {
                if rect.right + 1 < w
                    && span_valid(mask, (rect.top, rect.bottom), (rect.right + 1, rect.right + 1))
                {
                    rect.right += 1;
                }
                right_open = false;
            }
        }

        if bottom_open {
            if rect.bottom + 2 < h
                && span_valid(mask, (rect.bottom + 1, rect.bottom + 2), (rect.left, rect.right))
            {
                rect.bottom += 2;
            } else {
                if rect.bottom + 1 < h
                    && span_valid(mask, (rect.bottom + 1, rect.bottom + 1), (rect.left, rect.right))
                {
                    rect.bottom += 1;
                }
                bottom_open = false;
            }
        }

        if left_open {
            if rect.left >= 2 && span_valid(mask, (rect.top, rect.bottom), (rect.left - 2, rect.left - 1)) {
                rect.left -= 2;
            } else {
                if rect.left >= 1
                    && span_valid(mask, (rect.top, rect.bottom), (rect.left - 1, rect.left - 1))
                {
                    rect.left -= 1;
                }
                left_open = false;
            }
        }
    }

    rect
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mask_covers_everything() {
        for &(h, w) in &[(10usize, 10usize), (11, 17), (64, 33)] {
            let mask = Array2::<f32>::from_elem((h, w), 1.0);
            let rect = largest_rectangle(&mask);
            assert_eq!(
                rect,
                Rect {
                    top: 0,
                    left: 0,
                    bottom: h - 1,
                    right: w - 1
                }
            );
        }
    }

    #[test]
    fn isolated_pixel_degenerates_to_it() {
        let mut mask = Array2::<f32>::zeros((20, 20));
        mask[[7, 12]] = 1.0;
        let rect = largest_rectangle(&mask);
        assert_eq!(
            rect,
            Rect {
                top: 7,
                left: 12,
                bottom: 7,
                right: 12
            }
        );
    }

    #[test]
    fn empty_mask_returns_center_pixel() {
        let mask = Array2::<f32>::zeros((9, 13));
        let rect = largest_rectangle(&mask);
        assert_eq!(rect.top, rect.bottom);
        assert_eq!(rect.left, rect.right);
        assert_eq!(rect.top, 4);
        assert_eq!(rect.left, 6);
    }

    #[test]
    fn stays_inside_an_inset_block() {
        let mut mask = Array2::<f32>::zeros((30, 30));
        for row in 5..25 {
            for col in 8..22 {
                mask[[row, col]] = 1.0;
            }
        }
        let rect = largest_rectangle(&mask);
        assert!(rect.top >= 5 && rect.bottom <= 24);
        assert!(rect.left >= 8 && rect.right <= 21);
        // Close to the full block.
        assert!(rect.height() >= 18);
        assert!(rect.width() >= 12);
    }

    #[test]
    fn snap_shrinks_to_exact_multiple() {
        let rect = Rect {
            top: 3,
            left: 5,
            bottom: 19,
            right: 24,
        };
        let snapped = rect.snap_to_multiple(4).unwrap();
        assert_eq!(snapped.height() % 4, 0);
        assert_eq!(snapped.width() % 4, 0);
        assert_eq!(snapped.top, 3);
        assert_eq!(snapped.left, 5);
        assert!(snapped.bottom <= 19 && snapped.right <= 24);
    }

    #[test]
    fn snap_rejects_too_small_rectangle() {
        let rect = Rect {
            top: 0,
            left: 0,
            bottom: 1,
            right: 1,
        };
        assert!(rect.snap_to_multiple(4).is_none());
    }
}
