//! Box (continuous) observation/action space

use super::Space;
use ndarray::{ArrayD, IxDyn};
use rand::Rng;

/// Box space for continuous values with per-element bounds
#[derive(Clone, Debug, PartialEq)]
pub struct BoxSpace {
    /// Lower bound for each element
    pub low: ArrayD<f32>,
    /// Upper bound for each element
    pub high: ArrayD<f32>,
    shape: Vec<usize>,
}

impl BoxSpace {
    /// Create a new box space with given bounds
    pub fn new(low: ArrayD<f32>, high: ArrayD<f32>) -> Self {
        assert_eq!(low.shape(), high.shape(), "Low and high must have same shape");
        let shape = low.shape().to_vec();
        Self { low, high, shape }
    }

    /// Create a box space with uniform bounds
    pub fn uniform(shape: &[usize], low: f32, high: f32) -> Self {
        Self::new(
            ArrayD::from_elem(IxDyn(shape), low),
            ArrayD::from_elem(IxDyn(shape), high),
        )
    }

    /// Create a unit box [0, 1] for all elements
    pub fn unit(shape: &[usize]) -> Self {
        Self::uniform(shape, 0.0, 1.0)
    }

    /// Create a symmetric box [-bound, bound] for all elements
    pub fn symmetric(shape: &[usize], bound: f32) -> Self {
        Self::uniform(shape, -bound, bound)
    }

    /// Radius of the largest origin-centred L2 ball inside the box.
    ///
    /// Zero when the origin is outside the box.
    pub fn inscribed_radius(&self) -> f32 {
        self.low
            .iter()
            .zip(self.high.iter())
            .map(|(&l, &h)| (-l).min(h).max(0.0))
            .fold(f32::INFINITY, f32::min)
    }

    /// Clip a value element-wise into the bounds.
    pub fn clip(&self, value: &ArrayD<f32>) -> ArrayD<f32> {
        let mut clipped = value.clone();
        for ((v, &l), &h) in clipped
            .iter_mut()
            .zip(self.low.iter())
            .zip(self.high.iter())
        {
            *v = v.max(l).min(h);
        }
        clipped
    }
}

impl Space for BoxSpace {
    type Sample = ArrayD<f32>;

    fn sample<R: Rng>(&self, rng: &mut R) -> Self::Sample {
        let mut result = ArrayD::zeros(IxDyn(&self.shape));
        for ((&l, &h), r) in self
            .low
            .iter()
            .zip(self.high.iter())
            .zip(result.iter_mut())
        {
            *r = if l < h { rng.gen_range(l..h) } else { l };
        }
        result
    }

    fn contains(&self, value: &Self::Sample) -> bool {
        if value.shape() != self.low.shape() {
            return false;
        }
        value
            .iter()
            .zip(self.low.iter())
            .zip(self.high.iter())
            .all(|((&v, &l), &h)| v >= l && v <= h)
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }
}
