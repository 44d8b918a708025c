use std::f32::consts::FRAC_PI_2;

/// Equal-power stereo panner for a stereo input. Centre (`pan == 0`) is unity;
/// moving to one side folds the opposite channel in.
#[inline]
pub fn pan_stereo(left: f32, right: f32, pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    if pan == 0.0 {
        return (left, right);
    }
    if pan <= 0.0 {
        let x = (pan + 1.0) * FRAC_PI_2;
        (left + right * x.cos(), right * x.sin())
    } else {
        let x = pan * FRAC_PI_2;
        (left * x.cos(), right + left * x.sin())
    }
}
