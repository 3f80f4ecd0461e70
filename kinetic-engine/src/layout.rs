//! Hit areas on an instrument's background image (keyboard keys, drum pads).

/// Axis-aligned rectangle, `min` inclusive, `max` inclusive.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Rect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Rect {
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    #[inline]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    #[inline]
    pub fn center(&self) -> (f64, f64) {
        ((self.min_x + self.max_x) * 0.5, (self.min_y + self.max_y) * 0.5)
    }

    #[inline]
    fn center_distance(&self, x: f64, y: f64) -> f64 {
        let (cx, cy) = self.center();
        (x - cx).hypot(y - cy)
    }
}

/// Index of the rect hit at `(x, y)`.
///
/// A point inside exactly one rect picks it. Inside several, the nearest centre among those
/// wins; inside none, the nearest centre overall. `None` only for an empty layout.
pub fn pick(rects: &[Rect], x: f64, y: f64) -> Option<usize> {
    let inside: Vec<usize> = (0..rects.len()).filter(|&i| rects[i].contains(x, y)).collect();
    if inside.len() == 1 {
        return Some(inside[0]);
    }

    let candidates: Box<dyn Iterator<Item = usize>> =
        if inside.is_empty() { Box::new(0..rects.len()) } else { Box::new(inside.into_iter()) };

    candidates.min_by(|&a, &b| {
        rects[a].center_distance(x, y).total_cmp(&rects[b].center_distance(x, y))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<Rect> {
        vec![
            Rect::new(0.0, 0.0, 10.0, 10.0),
            Rect::new(10.0, 0.0, 20.0, 10.0),
            Rect::new(5.0, 5.0, 15.0, 15.0),
        ]
    }

    #[test]
    fn single_containing_rect_wins() {
        assert_eq!(pick(&grid(), 1.0, 1.0), Some(0));
        assert_eq!(pick(&grid(), 18.0, 2.0), Some(1));
    }

    #[test]
    fn overlap_goes_to_the_nearest_centre() {
        // inside 0 and 2; centre of 2 is (10, 10)
        assert_eq!(pick(&grid(), 9.0, 9.0), Some(2));
        assert_eq!(pick(&grid(), 6.0, 6.0), Some(0));
    }

    #[test]
    fn outside_everything_falls_back_to_nearest() {
        assert_eq!(pick(&grid(), 100.0, 12.0), Some(1));
        assert_eq!(pick(&[], 0.0, 0.0), None);
    }
}
