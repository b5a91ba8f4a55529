//! Parameters
//!
//! A parameter is a user- or automation-controllable scalar owned by a
//! module. Its raw value is always clamped to `[min, max]` and is what the
//! audio algorithms read. A separate [`DisplayScale`] converts the raw value
//! into a human unit (milliseconds, Hz, percent) for editors and documents.
//!
//! Control voltage modulation follows two conventions:
//!
//! - **Bipolar** (±5V): the mapped value is scaled by `voltage / 5`
//! - **Unipolar** (0–10V): the mapped value is scaled by `voltage / 10`
//!
//! Both only apply while the CV input is patched.

use crate::port::Port;
use serde::{Deserialize, Serialize};

/// Number of ticks a smoothed sweep across the full range takes by default
pub const DEFAULT_SMOOTHING_TICKS: f64 = 2048.0;

/// Editor hint describing how a parameter is manipulated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    Slider,
    Knob,
    /// Latching on/off switch
    Toggle,
    /// Momentary switch, high while held
    Button,
}

/// Conversion between a raw parameter value and a human-facing unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DisplayScale {
    /// `value * multiplier + offset`
    Linear { multiplier: f64, offset: f64 },

    /// `base^value * multiplier + offset`
    Exp {
        base: f64,
        multiplier: f64,
        offset: f64,
    },

    /// `log(value) / log(base) * multiplier + offset`
    Log {
        base: f64,
        multiplier: f64,
        offset: f64,
    },
}

impl DisplayScale {
    pub const IDENTITY: DisplayScale = DisplayScale::Linear {
        multiplier: 1.0,
        offset: 0.0,
    };

    pub fn linear(multiplier: f64) -> Self {
        DisplayScale::Linear {
            multiplier,
            offset: 0.0,
        }
    }

    pub fn exp(base: f64, multiplier: f64) -> Self {
        DisplayScale::Exp {
            base,
            multiplier,
            offset: 0.0,
        }
    }

    pub fn log(base: f64, multiplier: f64) -> Self {
        DisplayScale::Log {
            base,
            multiplier,
            offset: 0.0,
        }
    }

    /// Raw value to display unit
    pub fn to_display(&self, value: f64) -> f64 {
        match *self {
            DisplayScale::Linear { multiplier, offset } => value * multiplier + offset,
            DisplayScale::Exp {
                base,
                multiplier,
                offset,
            } => base.powf(value) * multiplier + offset,
            DisplayScale::Log {
                base,
                multiplier,
                offset,
            } => value.ln() / base.ln() * multiplier + offset,
        }
    }

    /// Display unit to raw value, `None` if the display value has no preimage
    pub fn from_display(&self, display: f64) -> Option<f64> {
        let raw = match *self {
            DisplayScale::Linear { multiplier, offset } => (display - offset) / multiplier,
            DisplayScale::Exp {
                base,
                multiplier,
                offset,
            } => ((display - offset) / multiplier).ln() / base.ln(),
            DisplayScale::Log {
                base,
                multiplier,
                offset,
            } => base.powf((display - offset) / multiplier),
        };
        raw.is_finite().then_some(raw)
    }
}

impl Default for DisplayScale {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Affine remap of `value` from `[from_min, from_max]` to `[to_min, to_max]`
#[inline]
pub fn map_range(value: f64, from_min: f64, from_max: f64, to_min: f64, to_max: f64) -> f64 {
    let span = from_max - from_min;
    if span == 0.0 {
        return to_min;
    }
    to_min + (value - from_min) / span * (to_max - to_min)
}

/// A scalar control owned by a module
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,
    kind: ParamType,
    min: f64,
    max: f64,
    value: f64,
    default: f64,
    display: DisplayScale,
    smoothing_step: f64,
    target: Option<f64>,
}

impl Parameter {
    /// Build a parameter; a non-finite `value` starts at `min`
    ///
    /// # Panics
    ///
    /// Panics if `min` or `max` is not finite or `min > max`.
    pub fn new(name: impl Into<String>, kind: ParamType, min: f64, max: f64, value: f64) -> Self {
        let name = name.into();
        assert!(
            min.is_finite() && max.is_finite() && min <= max,
            "Invalid range for parameter {}: [{}, {}]",
            name,
            min,
            max
        );
        let value = if value.is_finite() { value.clamp(min, max) } else { min };
        Self {
            name,
            kind,
            min,
            max,
            value,
            default: value,
            display: DisplayScale::IDENTITY,
            smoothing_step: (max - min) / DEFAULT_SMOOTHING_TICKS,
            target: None,
        }
    }

    pub fn slider(name: impl Into<String>, min: f64, max: f64, value: f64) -> Self {
        Self::new(name, ParamType::Slider, min, max, value)
    }

    pub fn knob(name: impl Into<String>, min: f64, max: f64, value: f64) -> Self {
        Self::new(name, ParamType::Knob, min, max, value)
    }

    /// A 0/1 latching switch
    pub fn toggle(name: impl Into<String>, on: bool) -> Self {
        Self::new(name, ParamType::Toggle, 0.0, 1.0, if on { 1.0 } else { 0.0 })
    }

    /// A 0/1 momentary switch, initially released
    pub fn button(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Button, 0.0, 1.0, 0.0)
    }

    pub fn with_display(mut self, display: DisplayScale) -> Self {
        self.display = display;
        self
    }

    /// Override the per-tick step used by smoothed updates
    pub fn with_smoothing_step(mut self, step: f64) -> Self {
        self.smoothing_step = step.abs();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ParamType {
        self.kind
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn default_value(&self) -> f64 {
        self.default
    }

    pub fn display_scale(&self) -> DisplayScale {
        self.display
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Set the raw value, clamped to `[min, max]`
    ///
    /// Cancels any smoothing in progress. Non-finite values are ignored.
    #[inline]
    pub fn set_value(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.value = value.clamp(self.min, self.max);
        self.target = None;
    }

    /// Restore the construction-time value
    pub fn reset(&mut self) {
        self.set_value(self.default);
    }

    /// Position of the value within the range, 0–1
    #[inline]
    pub fn normalized(&self) -> f64 {
        map_range(self.value, self.min, self.max, 0.0, 1.0)
    }

    #[inline]
    pub fn mapped_value(&self, to_min: f64, to_max: f64) -> f64 {
        map_range(self.value, self.min, self.max, to_min, to_max)
    }

    /// Map with the normalized position multiplied by `scale` first
    #[inline]
    pub fn scaled_mapped_value(&self, scale: f64, to_min: f64, to_max: f64) -> f64 {
        to_min + self.normalized() * scale * (to_max - to_min)
    }

    /// Mapped value modulated by a ±5V control voltage when `cv` is patched
    #[inline]
    pub fn bipolar_mapped_value(&self, cv: &Port, to_min: f64, to_max: f64) -> f64 {
        if cv.is_connected() {
            self.scaled_mapped_value(cv.voltage() / 5.0, to_min, to_max)
        } else {
            self.mapped_value(to_min, to_max)
        }
    }

    /// Mapped value modulated by a 0–10V control voltage when `cv` is patched
    #[inline]
    pub fn unipolar_mapped_value(&self, cv: &Port, to_min: f64, to_max: f64) -> f64 {
        if cv.is_connected() {
            self.scaled_mapped_value(cv.voltage() / 10.0, to_min, to_max)
        } else {
            self.mapped_value(to_min, to_max)
        }
    }

    /// Raw value modulated by a 0–10V control voltage when `cv` is patched
    #[inline]
    pub fn unipolar_value(&self, cv: &Port) -> f64 {
        self.unipolar_mapped_value(cv, self.min, self.max)
    }

    pub fn is_toggle_up(&self) -> bool {
        self.value >= self.max
    }

    pub fn is_toggle_down(&self) -> bool {
        self.value <= self.min
    }

    /// Flip between `min` and `max`
    pub fn toggle_value(&mut self) {
        if self.is_toggle_up() {
            self.set_value(self.min);
        } else {
            self.set_value(self.max);
        }
    }

    pub fn display_value(&self) -> f64 {
        self.display.to_display(self.value)
    }

    /// Set the raw value from a display-unit value
    ///
    /// Display values outside the scale's domain are ignored.
    pub fn set_display_value(&mut self, display: f64) {
        if let Some(raw) = self.display.from_display(display) {
            self.set_value(raw);
        }
    }

    pub fn is_smoothing(&self) -> bool {
        self.target.is_some()
    }

    pub fn smoothing_target(&self) -> Option<f64> {
        self.target
    }

    /// Start moving towards `target` one step per tick
    ///
    /// Only the owning rack advances the sweep, see
    /// [`Rack::set_value_smoothed`](crate::rack::Rack::set_value_smoothed).
    /// Returns false, leaving the parameter untouched, for a non-finite target.
    pub(crate) fn begin_smoothing(&mut self, target: f64) -> bool {
        if !target.is_finite() {
            return false;
        }
        self.target = Some(target.clamp(self.min, self.max));
        true
    }

    /// Advance one tick; returns whether smoothing is still in progress
    pub(crate) fn advance_smoothing(&mut self) -> bool {
        let Some(target) = self.target else {
            return false;
        };
        let diff = target - self.value;
        if diff.abs() <= self.smoothing_step || self.smoothing_step == 0.0 {
            self.value = target;
            self.target = None;
            return false;
        }
        self.value += self.smoothing_step.copysign(diff);
        true
    }
}
