//! ADSR Envelope Generator
//!
//! Linear-segment envelope state machine. Rates are expressed in level per
//! tick; the owning module derives them from its time parameters.

/// Envelope stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeState {
    #[default]
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Attack-Decay-Sustain-Release envelope
#[derive(Debug, Clone)]
pub struct EnvelopeGenerator {
    level: f64,
    state: EnvelopeState,
    released: bool,
    release_rate: f64,
    pub base_level: f64,
    pub peak_level: f64,
    /// Level change per tick during attack
    pub attack_rate: f64,
    /// Level change per tick during decay, negative when falling
    pub decay_rate: f64,
    pub sustain_level: f64,
    /// Release duration in ticks
    pub release_time: f64,
}

impl EnvelopeGenerator {
    pub fn new() -> Self {
        Self {
            level: 0.0,
            state: EnvelopeState::Idle,
            released: true,
            release_rate: 0.0,
            base_level: 0.0,
            peak_level: 1.0,
            attack_rate: 0.0,
            decay_rate: 0.0,
            sustain_level: 0.0,
            release_time: 1.0,
        }
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Restart from the base level
    pub fn attack(&mut self) {
        self.state = EnvelopeState::Attack;
        self.level = self.base_level;
        self.released = false;
    }

    pub fn release(&mut self) {
        self.released = true;
    }

    /// Feed the current gate; only edges change state
    pub fn gate(&mut self, high: bool) {
        if high {
            if self.released {
                self.attack();
            }
        } else if !self.released {
            self.release();
        }
    }

    /// Advance one tick
    ///
    /// Returns the new level and whether the envelope is at rest: `true` on
    /// every idle tick and on the tick that finishes the release.
    pub fn process(&mut self) -> (f64, bool) {
        let mut completed = false;

        // A release during attack waits until the peak is reached
        if self.released
            && matches!(self.state, EnvelopeState::Decay | EnvelopeState::Sustain)
        {
            self.state = EnvelopeState::Release;
            self.release_rate = (self.base_level - self.level) / self.release_time.max(1.0);
        }

        match self.state {
            EnvelopeState::Idle => {
                self.level = self.base_level;
                completed = true;
            }
            EnvelopeState::Attack => {
                self.level += self.attack_rate;
                if reached(self.attack_rate, self.level, self.peak_level) {
                    self.level = self.peak_level;
                    self.state = EnvelopeState::Decay;
                }
            }
            EnvelopeState::Decay => {
                self.level += self.decay_rate;
                if reached(self.decay_rate, self.level, self.sustain_level) {
                    self.level = self.sustain_level;
                    self.state = EnvelopeState::Sustain;
                }
            }
            EnvelopeState::Sustain => {}
            EnvelopeState::Release => {
                self.level += self.release_rate;
                if reached(self.release_rate, self.level, self.base_level)
                    || self.release_rate == 0.0
                {
                    self.level = self.base_level;
                    self.state = EnvelopeState::Idle;
                    completed = true;
                }
            }
        }

        (self.level, completed)
    }
}

impl Default for EnvelopeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn reached(rate: f64, level: f64, target: f64) -> bool {
    (rate > 0.0 && level >= target) || (rate < 0.0 && level <= target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn envelope() -> EnvelopeGenerator {
        let mut env = EnvelopeGenerator::new();
        env.attack_rate = 0.25;
        env.sustain_level = 0.5;
        env.decay_rate = -0.1;
        env.release_time = 5.0;
        env
    }

    #[test]
    fn test_starts_idle_and_completed() {
        let mut env = envelope();
        assert_eq!(env.state(), EnvelopeState::Idle);
        assert_eq!(env.process(), (0.0, true));
    }

    #[test]
    fn test_attack_rises_strictly_to_peak() {
        let mut env = envelope();
        env.gate(true);
        assert_eq!(env.state(), EnvelopeState::Attack);

        let mut last = env.level();
        while env.state() == EnvelopeState::Attack {
            let (level, completed) = env.process();
            assert!(level > last);
            assert!(!completed);
            last = level;
        }
        assert_eq!(last, 1.0);
        assert_eq!(env.state(), EnvelopeState::Decay);
    }

    #[test]
    fn test_decay_settles_at_sustain() {
        let mut env = envelope();
        env.gate(true);
        for _ in 0..20 {
            env.process();
        }
        assert_eq!(env.state(), EnvelopeState::Sustain);
        assert_relative_eq!(env.level(), 0.5);
    }

    #[test]
    fn test_gate_off_releases_to_idle() {
        let mut env = envelope();
        env.gate(true);
        for _ in 0..20 {
            env.process();
        }
        env.gate(false);
        let (_, completed) = env.process();
        assert_eq!(env.state(), EnvelopeState::Release);
        assert!(!completed);

        let mut finished = 0;
        for _ in 0..10 {
            let (_, completed) = env.process();
            if env.state() == EnvelopeState::Idle {
                finished += 1;
                assert!(completed);
                break;
            }
            assert!(!completed);
        }
        assert_eq!(finished, 1);
        assert_eq!(env.level(), 0.0);
    }

    #[test]
    fn test_release_during_attack_waits_for_peak() {
        let mut env = envelope();
        env.gate(true);
        env.process();
        env.gate(false);
        env.process();
        assert_eq!(env.state(), EnvelopeState::Attack);
        env.process();
        env.process();
        assert_eq!(env.state(), EnvelopeState::Decay);
        env.process();
        assert_eq!(env.state(), EnvelopeState::Release);
    }

    #[test]
    fn test_held_gate_does_not_retrigger() {
        let mut env = envelope();
        env.gate(true);
        env.process();
        env.process();
        let level = env.level();
        env.gate(true);
        assert_relative_eq!(env.level(), level);
        assert_eq!(env.state(), EnvelopeState::Attack);
    }

    #[test]
    fn test_retrigger_after_release() {
        let mut env = envelope();
        env.gate(true);
        for _ in 0..20 {
            env.process();
        }
        env.gate(false);
        env.process();
        env.gate(true);
        assert_eq!(env.state(), EnvelopeState::Attack);
        assert_eq!(env.level(), 0.0);
    }
}
