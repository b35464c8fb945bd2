//! Fade curve pair definitions for crossfading
//!
//! Each curve defines a complementary fade-out/fade-in pair over the
//! normalized position `u ∈ [0, 1]`. The pairs are chosen so the perceived
//! envelope across a crossfade is monotone: linear and logarithmic pairs
//! sum to 1, the equal-power pair keeps the sum of squares at 1.

use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;

/// Fade curve types for fades and crossfades
///
/// - Linear: constant rate of change (precise, predictable)
/// - EqualPower: constant perceived loudness across a crossfade
/// - Logarithmic: perceptually even for recorded material
/// - Exponential: slow start, fast finish
/// - SCurve: smoothstep, gentle at both ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// y = u
    Linear,
    /// y = sin(u·π/2); squares of the pair sum to 1
    #[default]
    EqualPower,
    /// y = log10(9u + 1)
    Logarithmic,
    /// y = u²
    Exponential,
    /// y = 3u² − 2u³ (smoothstep)
    SCurve,
}

impl FadeCurve {
    /// Fade-in multiplier at normalized position `u`
    ///
    /// Input is clamped to [0, 1]; output rises from 0.0 to 1.0.
    pub fn fade_in(&self, u: f32) -> f32 {
        let u = u.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => u,
            FadeCurve::EqualPower => (u * FRAC_PI_2).sin(),
            FadeCurve::Logarithmic => (9.0 * u + 1.0).log10(),
            FadeCurve::Exponential => u * u,
            FadeCurve::SCurve => u * u * (3.0 - 2.0 * u),
        }
    }

    /// Fade-out multiplier at normalized position `u`
    ///
    /// Falls from 1.0 to 0.0 as the complement of [`fade_in`] under the
    /// curve's pair identity.
    ///
    /// [`fade_in`]: FadeCurve::fade_in
    pub fn fade_out(&self, u: f32) -> f32 {
        let u = u.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => 1.0 - u,
            FadeCurve::EqualPower => (u * FRAC_PI_2).cos(),
            FadeCurve::Logarithmic => 1.0 - (9.0 * u + 1.0).log10(),
            FadeCurve::Exponential => {
                let inv = 1.0 - u;
                inv * inv
            }
            FadeCurve::SCurve => 1.0 - u * u * (3.0 - 2.0 * u),
        }
    }

    /// Interpolate a single fade between arbitrary endpoints
    ///
    /// Runs the fade-in shape from `from` to `to`; used for one-sided fades
    /// where the endpoints are not 0 and 1 (volume ramps, resume fades).
    pub fn interpolate(&self, from: f32, to: f32, u: f32) -> f32 {
        from + (to - from) * self.fade_in(u)
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Some(FadeCurve::Linear),
            "equal_power" | "equalpower" => Some(FadeCurve::EqualPower),
            "logarithmic" | "log" => Some(FadeCurve::Logarithmic),
            "exponential" => Some(FadeCurve::Exponential),
            "s_curve" | "scurve" | "s-curve" | "smoothstep" => Some(FadeCurve::SCurve),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "linear",
            FadeCurve::EqualPower => "equal_power",
            FadeCurve::Logarithmic => "logarithmic",
            FadeCurve::Exponential => "exponential",
            FadeCurve::SCurve => "s_curve",
        }
    }

    /// All curve variants, for validation and UI listings
    pub fn all() -> &'static [FadeCurve] {
        &[
            FadeCurve::Linear,
            FadeCurve::EqualPower,
            FadeCurve::Logarithmic,
            FadeCurve::Exponential,
            FadeCurve::SCurve,
        ]
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
