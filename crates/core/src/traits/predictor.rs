/// Trained model turning an input vector into a prediction vector.
///
/// Pure function. Outputs may contain NaN or negative values; callers clamp.
pub trait Predictor: Send + Sync {
    fn predict(&self, x: &[f64]) -> Vec<f64>;
}

impl<F> Predictor for F
where
    F: Fn(&[f64]) -> Vec<f64> + Send + Sync,
{
    fn predict(&self, x: &[f64]) -> Vec<f64> {
        self(x)
    }
}
