//! Top-down pixel observations and ASCII frames.

use ndarray::{ArrayViewMut2, Axis};

/// Side length of pixel observations.
pub const IMAGE_SIZE: usize = 64;

/// Add a Gaussian blob centred at pixel coordinates `(cx, cy)`.
///
/// Values are combined with `max`, so overlapping drawings stay in `[0, 1]`.
pub fn draw_blob(mut canvas: ArrayViewMut2<f32>, cx: f32, cy: f32, sigma: f32) {
    let denom = 2.0 * sigma * sigma;
    for (row, mut line) in canvas.axis_iter_mut(Axis(0)).enumerate() {
        let dy = row as f32 + 0.5 - cy;
        for (col, px) in line.iter_mut().enumerate() {
            let dx = col as f32 + 0.5 - cx;
            let v = (-(dx * dx + dy * dy) / denom).exp();
            *px = px.max(v);
        }
    }
}

/// Fill every pixel whose centre (in world units) satisfies `solid`.
pub fn fill_mask<F>(mut canvas: ArrayViewMut2<f32>, world_per_pixel: f32, solid: F)
where
    F: Fn(f32, f32) -> bool,
{
    for ((row, col), px) in canvas.indexed_iter_mut() {
        let x = (col as f32 + 0.5) * world_per_pixel;
        let y = (row as f32 + 0.5) * world_per_pixel;
        if solid(x, y) {
            *px = 1.0;
        }
    }
}

/// Character grid used by the ASCII renderers.
pub struct AsciiCanvas {
    cells: Vec<Vec<char>>,
}

impl AsciiCanvas {
    pub fn new(cols: usize, rows: usize) -> Self {
        Self {
            cells: vec![vec!['.'; cols]; rows],
        }
    }

    pub fn cols(&self) -> usize {
        self.cells.first().map_or(0, Vec::len)
    }

    pub fn rows(&self) -> usize {
        self.cells.len()
    }

    /// Set a cell; out-of-range coordinates are ignored.
    pub fn put(&mut self, col: usize, row: usize, ch: char) {
        if let Some(cell) = self.cells.get_mut(row).and_then(|r| r.get_mut(col)) {
            *cell = ch;
        }
    }

    /// Place a marker at world coordinates given the world size per cell.
    pub fn mark(&mut self, x: f32, y: f32, cell_size: f32, ch: char) {
        let col = (x / cell_size).floor().max(0.0) as usize;
        let row = (y / cell_size).floor().max(0.0) as usize;
        let col = col.min(self.cols().saturating_sub(1));
        let row = row.min(self.rows().saturating_sub(1));
        self.put(col, row, ch);
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.rows() * (self.cols() + 1));
        for row in &self.cells {
            out.extend(row.iter());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_blob_peaks_at_centre() {
        let mut img = Array2::<f32>::zeros((16, 16));
        draw_blob(img.view_mut(), 4.5, 10.5, 1.0);
        let (argmax, _) = img
            .indexed_iter()
            .fold(((0, 0), f32::MIN), |best, (idx, &v)| if v > best.1 { (idx, v) } else { best });
        assert_eq!(argmax, (10, 4));
        assert!(img.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_fill_mask() {
        let mut img = Array2::<f32>::zeros((4, 4));
        fill_mask(img.view_mut(), 2.0, |x, _| x < 4.0);
        assert_eq!(img.sum(), 8.0);
        assert_eq!(img[[3, 1]], 1.0);
        assert_eq!(img[[3, 2]], 0.0);
    }

    #[test]
    fn test_canvas_marks_clamp() {
        let mut canvas = AsciiCanvas::new(4, 2);
        canvas.mark(100.0, 100.0, 1.0, 'A');
        canvas.mark(-3.0, 0.5, 1.0, 'G');
        assert_eq!(canvas.render(), "G...\n...A\n");
    }
}
