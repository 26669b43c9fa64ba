//! Biquad filters for the channel kill filter and bass-energy extraction
//!
//! Two variants behind one `process` call:
//! - `Filter::LowPass`: a peaking biquad centred on the kick/bass region whose
//!   gain is swept by the mix plan. 0 dB is transparent, -23 dB kills the bass.
//! - `Filter::BandPassFixed`: a fixed 20-150 Hz band-pass (high-pass and
//!   low-pass cascade) used by the feature extractor to isolate bass energy.
//!
//! Coefficients follow the RBJ audio EQ cookbook.

use crate::types::StereoSample;

/// Centre frequency of the kill filter
pub const KILL_FILTER_FREQ: f32 = 50.0;
/// Q of the kill filter
pub const KILL_FILTER_Q: f32 = 0.9;

/// Lower edge of the bass band
pub const BASS_BAND_LOW: f32 = 20.0;
/// Upper edge of the bass band
pub const BASS_BAND_HIGH: f32 = 150.0;

const BUTTERWORTH_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Stereo biquad delay line
#[derive(Debug, Clone, Default)]
pub struct BiquadState {
    x1_l: f32, x2_l: f32, y1_l: f32, y2_l: f32,
    x1_r: f32, x2_r: f32, y1_r: f32, y2_r: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input_l: f32, input_r: f32, coeffs: &BiquadCoeffs) -> (f32, f32) {
        let out_l = coeffs.b0 * input_l + coeffs.b1 * self.x1_l + coeffs.b2 * self.x2_l
                  - coeffs.a1 * self.y1_l - coeffs.a2 * self.y2_l;
        self.x2_l = self.x1_l;
        self.x1_l = input_l;
        self.y2_l = self.y1_l;
        self.y1_l = out_l;

        let out_r = coeffs.b0 * input_r + coeffs.b1 * self.x1_r + coeffs.b2 * self.x2_r
                  - coeffs.a1 * self.y1_r - coeffs.a2 * self.y2_r;
        self.x2_r = self.x1_r;
        self.x1_r = input_r;
        self.y2_r = self.y1_r;
        self.y1_r = out_r;

        (out_l, out_r)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Normalised biquad coefficients (a0 == 1)
#[derive(Debug, Clone, PartialEq)]
pub struct BiquadCoeffs {
    b0: f32, b1: f32, b2: f32,
    a1: f32, a2: f32,
}

impl BiquadCoeffs {
    fn peaking(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }

    fn low_pass(freq: f32, q: f32, sample_rate: f32) -> Self {
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let a0 = 1.0 + alpha;
        Self {
            b0: ((1.0 - cos_w0) / 2.0) / a0,
            b1: (1.0 - cos_w0) / a0,
            b2: ((1.0 - cos_w0) / 2.0) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn high_pass(freq: f32, q: f32, sample_rate: f32) -> Self {
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let a0 = 1.0 + alpha;
        Self {
            b0: ((1.0 + cos_w0) / 2.0) / a0,
            b1: (-(1.0 + cos_w0)) / a0,
            b2: ((1.0 + cos_w0) / 2.0) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn passthrough() -> Self {
        Self { b0: 1.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0 }
    }
}

/// Filter kernel applied in place to stereo blocks
#[derive(Debug, Clone)]
pub enum Filter {
    LowPass {
        gain_db: f32,
        sample_rate: f32,
        coeffs: BiquadCoeffs,
        state: BiquadState,
    },
    BandPassFixed {
        high_pass: BiquadCoeffs,
        low_pass: BiquadCoeffs,
        high_pass_state: BiquadState,
        low_pass_state: BiquadState,
    },
}

impl Filter {
    /// Kill filter at the given gain (0 dB is transparent)
    pub fn low_pass(sample_rate: u32, gain_db: f32) -> Self {
        let mut filter = Filter::LowPass {
            gain_db,
            sample_rate: sample_rate as f32,
            coeffs: BiquadCoeffs::passthrough(),
            state: BiquadState::default(),
        };
        filter.set_gain_db(gain_db);
        filter
    }

    /// Fixed 20-150 Hz band-pass
    pub fn band_pass_fixed(sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        Filter::BandPassFixed {
            high_pass: BiquadCoeffs::high_pass(BASS_BAND_LOW, BUTTERWORTH_Q, sr),
            low_pass: BiquadCoeffs::low_pass(BASS_BAND_HIGH, BUTTERWORTH_Q, sr),
            high_pass_state: BiquadState::default(),
            low_pass_state: BiquadState::default(),
        }
    }

    /// Change the kill gain. Filter history is kept so sweeps don't click.
    /// No effect on the band-pass variant.
    pub fn set_gain_db(&mut self, new_gain_db: f32) {
        if let Filter::LowPass { gain_db, sample_rate, coeffs, .. } = self {
            *gain_db = new_gain_db;
            *coeffs = if new_gain_db == 0.0 {
                BiquadCoeffs::passthrough()
            } else {
                BiquadCoeffs::peaking(KILL_FILTER_FREQ, new_gain_db, KILL_FILTER_Q, *sample_rate)
            };
        }
    }

    /// Current kill gain, 0 for the band-pass variant
    pub fn gain_db(&self) -> f32 {
        match self {
            Filter::LowPass { gain_db, .. } => *gain_db,
            Filter::BandPassFixed { .. } => 0.0,
        }
    }

    /// Filter a block in place
    pub fn process(&mut self, buffer: &mut [StereoSample]) {
        match self {
            Filter::LowPass { coeffs, state, .. } => {
                for sample in buffer.iter_mut() {
                    let (l, r) = state.process(sample.left, sample.right, coeffs);
                    *sample = StereoSample::new(l, r);
                }
            }
            Filter::BandPassFixed { high_pass, low_pass, high_pass_state, low_pass_state } => {
                for sample in buffer.iter_mut() {
                    let (l, r) = high_pass_state.process(sample.left, sample.right, high_pass);
                    let (l, r) = low_pass_state.process(l, r, low_pass);
                    *sample = StereoSample::new(l, r);
                }
            }
        }
    }

    /// Clear filter history
    pub fn reset(&mut self) {
        match self {
            Filter::LowPass { state, .. } => state.reset(),
            Filter::BandPassFixed { high_pass_state, low_pass_state, .. } => {
                high_pass_state.reset();
                low_pass_state.reset();
            }
        }
    }
}
