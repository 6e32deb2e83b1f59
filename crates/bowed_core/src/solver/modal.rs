//! Modal bowed string.
//!
//! The string is a bank of damped oscillators, one per partial, driven at the
//! bow position by a soft friction curve and read out at two listening
//! positions. Mode shapes are `sin(n·π·x)`.

use std::f64::consts::{PI, TAU};

use crate::params::NonlinearMode;
use crate::snapshot::CommitSnapshot;
use crate::solver::{SolverInlets, StereoFrame, StringSolver};

pub const MAX_MODES: usize = 64;

/// Room left in the stability bound so vibrato and tension modulation can
/// raise partials without crossing it.
pub const MODULATION_HEADROOM: f64 = 1.25;

/// Sharpness `a` of the friction curve `sqrt(2a)·v·exp(-a·v² + 1/2)`.
const FRICTION_SHARPNESS: f64 = 100.0;

/// Bow force to modal acceleration, the inverse modal mass.
const BOW_COUPLING: f64 = 50.0;

const FRICTION_ITERATIONS: usize = 24;

/// Energy to tension coupling for the nonlinear string models.
const TENSION_COUPLING: f64 = 1.0e5;

const OUTPUT_SCALE: f64 = 0.25;

/// `T60 = 6.9 / sigma`
const T60_FACTOR: f64 = 6.9;

#[derive(Debug, Clone)]
pub struct ModalCoefficients {
    sequence: u64,
    sample_rate: u32,
    fundamental: f64,
    mode_count: usize,
    /// Partial frequencies in Hz at the committed fundamental.
    frequencies: [f64; MAX_MODES],
    /// Loss per partial, 1/s.
    damping: [f64; MAX_MODES],
    nonlinear: NonlinearMode,
    /// Lag of the modal energy estimate driving tension modulation.
    regularisation: f64,
}

impl ModalCoefficients {
    /// No modes; the string is silent until the first commit is installed.
    pub fn silent(sample_rate: u32) -> Self {
        Self {
            sequence: 0,
            sample_rate,
            fundamental: 0.0,
            mode_count: 0,
            frequencies: [0.0; MAX_MODES],
            damping: [0.0; MAX_MODES],
            nonlinear: NonlinearMode::Linear,
            regularisation: 0.0,
        }
    }

    pub fn design(snapshot: &CommitSnapshot) -> Self {
        let params = snapshot.params();
        let sample_rate = snapshot.sample_rate();
        let dt = 1.0 / sample_rate as f64;
        let (s0, s1) = fit_damping(
            params.first_decay_frequency,
            params.first_decay_time,
            params.second_decay_frequency,
            params.second_decay_time,
        );
        let limit = 2.0 * params.stability_setting / MODULATION_HEADROOM;

        let mut coefficients = Self::silent(sample_rate);
        coefficients.sequence = snapshot.sequence();
        coefficients.fundamental = params.fundamental_frequency;
        coefficients.nonlinear = params.nonlinear();
        coefficients.regularisation = params.regularisation_parameter;

        for index in 0..MAX_MODES {
            let n = (index + 1) as f64;
            let frequency =
                n * params.fundamental_frequency * (1.0 + params.beta * n * n).sqrt();
            if TAU * frequency * dt > limit {
                break;
            }
            coefficients.frequencies[index] = frequency;
            coefficients.damping[index] = s0 + s1 * frequency * frequency;
            coefficients.mode_count = index + 1;
        }
        coefficients
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn mode_count(&self) -> usize {
        self.mode_count
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies[..self.mode_count]
    }

    pub fn damping(&self) -> &[f64] {
        &self.damping[..self.mode_count]
    }
}

/// Fit `sigma(f) = s0 + s1·f²` through two (frequency, T60) points.
fn fit_damping(f1: f64, t1: f64, f2: f64, t2: f64) -> (f64, f64) {
    let sigma1 = T60_FACTOR / t1;
    let sigma2 = T60_FACTOR / t2;
    let span = f2 * f2 - f1 * f1;
    if span.abs() < f64::EPSILON {
        return (sigma1.min(sigma2).max(0.0), 0.0);
    }
    let s1 = (sigma2 - sigma1) / span;
    let s0 = sigma1 - s1 * f1 * f1;
    (s0.max(0.0), s1.max(0.0))
}

/// Relative bow velocity `η` solving `η + stiffness·φ(η) = free`.
///
/// `free` is the relative velocity before the bow force acts and `stiffness`
/// how strongly that force feeds back on the string at the bow. Since
/// `|φ| <= 1` the root lies in `free ± stiffness`; bisection keeps the cost
/// fixed and finds a root even where the curve folds over.
fn solve_relative_velocity(free: f64, stiffness: f64) -> f64 {
    let mut low = free - stiffness;
    let mut high = free + stiffness;
    for _ in 0..FRICTION_ITERATIONS {
        let mid = 0.5 * (low + high);
        if mid + stiffness * friction(mid) > free {
            high = mid;
        } else {
            low = mid;
        }
    }
    0.5 * (low + high)
}

/// Soft friction characteristic, peak magnitude 1 at `|v| = 1/sqrt(2a)`.
fn friction(relative_velocity: f64) -> f64 {
    let a = FRICTION_SHARPNESS;
    (2.0 * a).sqrt()
        * relative_velocity
        * (-a * relative_velocity * relative_velocity + 0.5).exp()
}

/// Iterates `sin(n·θ)` for n = 1, 2, ... via the Chebyshev recurrence.
struct ModeShape {
    twice_cos: f64,
    previous: f64,
    current: f64,
}

impl ModeShape {
    fn new(position: f32) -> Self {
        let theta = PI * position.clamp(0.0, 1.0) as f64;
        Self {
            twice_cos: 2.0 * theta.cos(),
            previous: 0.0,
            current: theta.sin(),
        }
    }

    fn advance(&mut self) -> f64 {
        let value = self.current;
        let next = self.twice_cos * self.current - self.previous;
        self.previous = self.current;
        self.current = next;
        value
    }
}

pub struct ModalString {
    coefficients: Box<ModalCoefficients>,
    sample_rate: f32,
    dt: f64,
    displacement: [f64; MAX_MODES],
    velocity: [f64; MAX_MODES],
    energy: f64,
}

impl ModalString {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            coefficients: Box::new(ModalCoefficients::silent(sample_rate as u32)),
            sample_rate,
            dt: 1.0 / sample_rate as f64,
            displacement: [0.0; MAX_MODES],
            velocity: [0.0; MAX_MODES],
            energy: 0.0,
        }
    }

    pub fn coefficients(&self) -> &ModalCoefficients {
        &self.coefficients
    }

    /// Weighted modal energy `Σ n²·q_n²` as currently tracked.
    pub fn energy(&self) -> f64 {
        self.energy
    }

    fn pitch_factor(&self) -> f64 {
        let stretch = TENSION_COUPLING * self.energy;
        match self.coefficients.nonlinear {
            NonlinearMode::Linear => 1.0,
            NonlinearMode::KirchhoffCarrier => (1.0 + stretch).sqrt(),
            NonlinearMode::CubicGeometric => 1.0 + 0.5 * stretch,
            NonlinearMode::Geometric => (1.0 + stretch / (1.0 + self.energy).sqrt()).sqrt(),
        }
    }

    fn track_energy(&mut self) {
        if self.coefficients.nonlinear == NonlinearMode::Linear {
            self.energy = 0.0;
            return;
        }
        let mut target = 0.0;
        for index in 0..self.coefficients.mode_count {
            let n = (index + 1) as f64;
            let q = self.displacement[index];
            target += n * n * q * q;
        }
        // 0 follows instantly, larger values lag further behind.
        let alpha = 1.0 / (1.0 + self.coefficients.regularisation * self.dt);
        self.energy += alpha * (target - self.energy);
        if !self.energy.is_finite() {
            self.energy = 0.0;
        }
    }
}

impl StringSolver for ModalString {
    type Coefficients = ModalCoefficients;

    fn design(snapshot: &CommitSnapshot) -> ModalCoefficients {
        ModalCoefficients::design(snapshot)
    }

    fn install(&mut self, coefficients: Box<ModalCoefficients>) -> Option<Box<ModalCoefficients>> {
        let count = coefficients.mode_count;
        for index in count..MAX_MODES {
            self.displacement[index] = 0.0;
            self.velocity[index] = 0.0;
        }
        Some(std::mem::replace(&mut self.coefficients, coefficients))
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        if sample_rate.is_finite() && sample_rate > 0.0 {
            self.sample_rate = sample_rate;
            self.dt = 1.0 / sample_rate as f64;
        }
    }

    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn process(&mut self, inlets: &SolverInlets) -> StereoFrame {
        let count = self.coefficients.mode_count;
        if count == 0 {
            return StereoFrame::default();
        }
        let dt = self.dt;

        let mut ratio = inlets.excitation_frequency as f64 / self.coefficients.fundamental;
        if !ratio.is_finite() || ratio <= 0.0 {
            ratio = 1.0;
        }
        let scale = TAU * ratio * self.pitch_factor();

        let mut bow_shape = ModeShape::new(inlets.excitation_position);
        let mut bow_weights = [0.0f64; MAX_MODES];
        let mut free_velocity = [0.0f64; MAX_MODES];
        let mut loss_gain = [0.0f64; MAX_MODES];
        let mut string_velocity = 0.0;
        let mut bow_admittance = 0.0;
        for index in 0..count {
            let weight = bow_shape.advance();
            bow_weights[index] = weight;
            let omega = scale * self.coefficients.frequencies[index];
            if omega * dt >= 2.0 {
                continue;
            }
            // Damping taken implicitly so large losses stay stable.
            let gain = 1.0 / (1.0 + 2.0 * self.coefficients.damping[index] * dt);
            loss_gain[index] = gain;
            free_velocity[index] =
                (self.velocity[index] - dt * omega * omega * self.displacement[index]) * gain;
            string_velocity += weight * free_velocity[index];
            bow_admittance += weight * weight * gain;
        }

        let normal_force = inlets.normal_force.max(0.0) as f64;
        let force = normal_force
            * friction(solve_relative_velocity(
                inlets.excitation_velocity as f64 - string_velocity,
                dt * BOW_COUPLING * normal_force * bow_admittance,
            ));

        let mut left_shape = ModeShape::new(inlets.left_position);
        let mut right_shape = ModeShape::new(inlets.right_position);
        let mut left = 0.0;
        let mut right = 0.0;

        for index in 0..count {
            let left_weight = left_shape.advance();
            let right_weight = right_shape.advance();
            let gain = loss_gain[index];
            if gain == 0.0 {
                self.displacement[index] = 0.0;
                self.velocity[index] = 0.0;
                continue;
            }
            let p = free_velocity[index] + dt * BOW_COUPLING * force * bow_weights[index] * gain;
            self.velocity[index] = p;
            self.displacement[index] += dt * p;

            left += left_weight * p;
            right += right_weight * p;
        }

        self.track_energy();

        StereoFrame {
            left: (left * OUTPUT_SCALE) as f32,
            right: (right * OUTPUT_SCALE) as f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::PhysicalParameterSet;

    fn snapshot(params: PhysicalParameterSet, sample_rate: u32) -> CommitSnapshot {
        CommitSnapshot::new(1, params, sample_rate)
    }

    fn bowing() -> SolverInlets {
        SolverInlets {
            excitation_velocity: 0.2,
            normal_force: 1.0,
            excitation_position: 0.13,
            left_position: 0.3,
            right_position: 0.7,
            excitation_frequency: 220.0,
        }
    }

    #[test]
    fn test_partials_follow_inharmonicity() {
        let params = PhysicalParameterSet {
            beta: 0.01,
            ..Default::default()
        };
        let coefficients = ModalCoefficients::design(&snapshot(params, 48000));
        let f = coefficients.frequencies();
        assert!((f[0] - 220.0 * (1.01f64).sqrt()).abs() < 1e-9);
        assert!((f[2] - 3.0 * 220.0 * (1.09f64).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_mode_count_respects_stability_bound() {
        let params = PhysicalParameterSet {
            fundamental_frequency: 1000.0,
            beta: 0.0,
            ..Default::default()
        };
        let coefficients = ModalCoefficients::design(&snapshot(params, 44100));
        let dt = 1.0 / 44100.0;
        let limit = 2.0 * params.stability_setting / MODULATION_HEADROOM;
        assert!(coefficients.mode_count() > 0);
        for f in coefficients.frequencies() {
            assert!(TAU * f * dt <= limit);
        }
        // 1000 Hz partials up to ~10 kHz fit, the next does not
        assert_eq!(coefficients.mode_count(), 10);
    }

    #[test]
    fn test_higher_rate_allows_more_modes() {
        let params = PhysicalParameterSet {
            fundamental_frequency: 880.0,
            ..Default::default()
        };
        let low = ModalCoefficients::design(&snapshot(params, 44100));
        let high = ModalCoefficients::design(&snapshot(params, 96000));
        assert!(high.mode_count() > low.mode_count());
        assert!(high.mode_count() <= MAX_MODES);
    }

    #[test]
    fn test_damping_fit_passes_through_decay_points() {
        let (s0, s1) = fit_damping(0.0, 8.0, 1000.0, 3.0);
        assert!((s0 - 6.9 / 8.0).abs() < 1e-12);
        assert!((s0 + s1 * 1.0e6 - 6.9 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_damping_fit_clamps_negative_slope() {
        // longer decay at the higher frequency would need a negative s1
        let (s0, s1) = fit_damping(100.0, 2.0, 1000.0, 10.0);
        assert_eq!(s1, 0.0);
        assert!(s0 >= 0.0);
    }

    #[test]
    fn test_friction_peak_is_unity() {
        let peak = friction(1.0 / (2.0 * FRICTION_SHARPNESS).sqrt());
        assert!((peak - 1.0).abs() < 1e-12);
        assert_eq!(friction(0.0), 0.0);
        assert!((friction(0.05) + friction(-0.05)).abs() < 1e-12);
    }

    #[test]
    fn test_mode_shape_recurrence_matches_sin() {
        let mut shape = ModeShape::new(0.37);
        for n in 1..=MAX_MODES {
            let expected = (n as f64 * PI * 0.37f32 as f64).sin();
            assert!((shape.advance() - expected).abs() < 1e-9, "mode {}", n);
        }
    }

    #[test]
    fn test_silent_until_installed() {
        let mut string = ModalString::new(48000.0);
        assert_eq!(string.process(&bowing()), StereoFrame::default());
    }

    #[test]
    fn test_bowing_produces_bounded_sound() {
        let mut string = ModalString::new(48000.0);
        let designed = ModalCoefficients::design(&snapshot(PhysicalParameterSet::default(), 48000));
        string.install(Box::new(designed));

        let mut peak = 0.0f32;
        for _ in 0..48000 {
            let frame = string.process(&bowing());
            assert!(frame.left.is_finite() && frame.right.is_finite());
            peak = peak.max(frame.left.abs()).max(frame.right.abs());
        }
        // About -17 dBFS before the output stage.
        assert!(peak > 0.05, "string too quiet: {}", peak);
        assert!(peak < 1.0, "string blew up: {}", peak);
    }

    #[test]
    fn test_install_returns_previous_coefficients() {
        let mut string = ModalString::new(48000.0);
        let designed = ModalCoefficients::design(&snapshot(PhysicalParameterSet::default(), 48000));
        let old = string.install(Box::new(designed)).expect("previous coefficients");
        assert_eq!(old.mode_count(), 0);
        assert_eq!(string.coefficients().sequence(), 1);
    }

    #[test]
    fn test_linear_mode_tracks_no_energy() {
        let params = PhysicalParameterSet {
            nonlinear_mode: NonlinearMode::Linear.as_field(),
            ..Default::default()
        };
        let mut string = ModalString::new(48000.0);
        string.install(Box::new(ModalCoefficients::design(&snapshot(params, 48000))));
        for _ in 0..1000 {
            string.process(&bowing());
        }
        assert_eq!(string.energy(), 0.0);
    }

    #[test]
    fn test_nonlinear_mode_tracks_energy() {
        let mut string = ModalString::new(48000.0);
        string.install(Box::new(ModalCoefficients::design(&snapshot(
            PhysicalParameterSet::default(),
            48000,
        ))));
        for _ in 0..4800 {
            string.process(&bowing());
        }
        assert!(string.energy() > 0.0);
        assert!(string.pitch_factor() >= 1.0);
    }

    #[test]
    fn test_relative_velocity_solves_bow_balance() {
        for (free, stiffness) in [(0.2, 0.02), (-0.3, 0.5), (0.07, 3.0), (0.0, 0.0)] {
            let eta = solve_relative_velocity(free, stiffness);
            let residual = eta + stiffness * friction(eta) - free;
            assert!(residual.abs() < 1e-4, "{} {} -> {}", free, stiffness, residual);
        }
    }

    #[test]
    fn test_heavy_bow_stays_bounded() {
        let mut string = ModalString::new(44100.0);
        let params = PhysicalParameterSet::default();
        string.install(Box::new(ModalCoefficients::design(&snapshot(params, 44100))));
        let inlets = SolverInlets {
            normal_force: 100.0,
            ..bowing()
        };
        for _ in 0..22050 {
            let frame = string.process(&inlets);
            assert!(frame.left.abs() < 2.0 && frame.right.abs() < 2.0);
        }
    }

    #[test]
    fn test_still_bow_is_silent() {
        let mut string = ModalString::new(48000.0);
        let params = PhysicalParameterSet::default();
        string.install(Box::new(ModalCoefficients::design(&snapshot(params, 48000))));
        let inlets = SolverInlets {
            excitation_velocity: 0.0,
            ..bowing()
        };
        for _ in 0..4800 {
            let frame = string.process(&inlets);
            assert!(frame.left.abs() < 1e-6 && frame.right.abs() < 1e-6);
        }
    }
}
