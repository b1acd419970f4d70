use num_traits::{AsPrimitive, Zero};

/// A number-like type that may be stored as a sample in a moving window.
///
/// Samples are compared with their natural ordering and converted to
/// `f64` for the mean and variance calculations. All primitive integer
/// and floating-point types satisfy this bound. Empty-window queries
/// report [`Zero::zero`] as the neutral value.
pub trait Sample: Copy + PartialOrd + Zero + AsPrimitive<f64> {}

impl<T> Sample for T where T: Copy + PartialOrd + Zero + AsPrimitive<f64> {}

/// The contract shared by the moving-window aggregators.
///
/// Every operation is deterministic and free of side effects other than
/// mutating the window itself. None of the observers fail on an empty
/// window; they return zero instead.
pub trait Window<T: Sample> {
    /// Returns the current number of samples in the window.
    fn size(&self) -> usize;

    /// Adds a new sample to the window.
    fn put(&mut self, value: T);

    /// Returns the lowest sample currently tracked by the window, or the
    /// zero value if the window is empty.
    fn min(&self) -> T;

    /// Returns the highest sample currently tracked by the window, or the
    /// zero value if the window is empty.
    fn max(&self) -> T;

    /// Returns the mean of the tracked samples, or 0.0 if the window
    /// is empty.
    fn mean(&self) -> f64;

    /// Returns the population variance of the tracked samples, or 0.0 if
    /// the window is empty.
    fn variance(&self) -> f64;
}

#[cfg(test)]
mod tests {
    use crate::{ExponentialWindow, FixedWindow, Window};

    fn drive<W: Window<i64>>(w: &mut W) -> (usize, i64, i64) {
        for v in [3, 1, 4, 1, 5] {
            w.put(v);
        }
        (w.size(), w.min(), w.max())
    }

    #[test]
    fn test_window_object_safety() {
        let mut fixed = FixedWindow::new(5);
        assert_eq!(drive(&mut fixed), (5, 1, 5));

        let mut exponential = ExponentialWindow::new(0.5);
        assert_eq!(drive(&mut exponential), (5, 1, 5));

        let windows: [&dyn Window<i64>; 2] = [&fixed, &exponential];
        for w in windows {
            assert_eq!(w.size(), 5);
        }
    }
}
