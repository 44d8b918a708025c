/// Waveshaping saturator. `amount == 0` is an exact bypass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Saturator {
    amount: f32,
    drive: f32,
}

impl Saturator {
    /// `drive` is the curve steepness reached at `amount == 1`.
    pub fn new(drive: f32) -> Self {
        Self { amount: 0.0, drive }
    }

    pub fn set_amount(&mut self, amount: f32) {
        self.amount = amount.clamp(0.0, 1.0);
    }

    pub fn amount(&self) -> f32 {
        self.amount
    }

    #[inline]
    pub fn process(&self, sample: f32) -> f32 {
        if self.amount <= 0.0 {
            return sample;
        }
        let k = self.amount * self.drive;
        (1.0 + k) * sample / (1.0 + k * sample.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypass_at_zero_amount() {
        let saturator = Saturator::new(20.0);
        assert_eq!(saturator.process(0.37), 0.37);
        assert_eq!(saturator.process(-1.5), -1.5);
    }

    #[test]
    fn curve_is_odd_and_bounded_at_unity() {
        let mut saturator = Saturator::new(20.0);
        saturator.set_amount(1.0);

        assert!((saturator.process(1.0) - 1.0).abs() < 1e-6);
        assert_eq!(saturator.process(-0.3), -saturator.process(0.3));
        assert!(saturator.process(0.1) > 0.1);
    }
}
