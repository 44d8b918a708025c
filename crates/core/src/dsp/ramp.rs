/// Linear parameter ramp, advanced once per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRamp {
    current: f32,
    target: f32,
    step: f32,
    remaining: u32,
}

impl ParamRamp {
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
        }
    }

    pub fn set_immediate(&mut self, value: f32) {
        *self = Self::new(value);
    }

    /// Glides from the current value to `target` over `frames` frames.
    pub fn ramp_to(&mut self, target: f32, frames: u32) {
        if frames == 0 || target == self.current {
            self.set_immediate(target);
            return;
        }
        self.target = target;
        self.remaining = frames;
        self.step = (target - self.current) / frames as f32;
    }

    #[inline]
    pub fn next_value(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 {
                self.target
            } else {
                self.current + self.step
            };
        }
        self.current
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_ramping(&self) -> bool {
        self.remaining > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaches_target_exactly() {
        let mut ramp = ParamRamp::new(0.0);
        ramp.ramp_to(1.0, 4);

        let values: Vec<f32> = (0..6).map(|_| ramp.next_value()).collect();
        assert_eq!(values, vec![0.25, 0.5, 0.75, 1.0, 1.0, 1.0]);
        assert!(!ramp.is_ramping());
    }

    #[test]
    fn zero_length_jumps() {
        let mut ramp = ParamRamp::new(0.3);
        ramp.ramp_to(0.9, 0);
        assert_eq!(ramp.value(), 0.9);
        assert_eq!(ramp.target(), 0.9);
    }
}
