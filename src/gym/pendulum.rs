use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f32::consts::PI;

use crate::env::{ActionSpace, Environment, Step, StepInfo};

const MAX_SPEED: f32 = 8.0;
const MAX_TORQUE: f32 = 2.0;
const DT: f32 = 0.05;
const G: f32 = 10.0;
const M: f32 = 1.0;
const L: f32 = 1.0;

/// Classic Pendulum swing-up with a continuous torque action
///
/// The goal is to keep the pendulum upright by applying torque.
/// The observation is `[cos(θ), sin(θ), θ_dot]` to avoid discontinuity issues
/// with angle wrapping.
///
/// # Physics
/// - Mass: 1.0 kg
/// - Length: 1.0 m
/// - Gravity: 10.0 m/s²
/// - Time step: 0.05 s
/// - Max angular velocity: 8.0 rad/s
/// - Max torque: 2.0 N⋅m
///
/// # Reward
/// r = -θ² - 0.1⋅θ̇² - 0.001⋅u², evaluated on the state the action is applied to.
///
/// Episodes never terminate on their own; they are truncated after `max_steps`.
#[derive(Debug, Clone)]
pub struct Pendulum {
    theta: f32,
    theta_dot: f32,
    steps: usize,
    max_steps: usize,
    rng: StdRng,
}

impl Pendulum {
    /// # Arguments
    /// * `max_steps` - Maximum number of steps per episode (typically 200)
    /// * `seed` - Seed for the initial-state distribution
    pub fn new(max_steps: usize, seed: u64) -> Self {
        Self {
            theta: 0.0,
            theta_dot: 0.0,
            steps: 0,
            max_steps,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn observation(&self) -> Vec<f32> {
        vec![self.theta.cos(), self.theta.sin(), self.theta_dot]
    }

    fn angle_normalize(x: f32) -> f32 {
        (x + PI).rem_euclid(2.0 * PI) - PI
    }
}

impl Environment for Pendulum {
    fn observation_dim(&self) -> usize {
        3
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::Box {
            low: vec![-MAX_TORQUE],
            high: vec![MAX_TORQUE],
        }
    }

    fn reset(&mut self) -> Vec<f32> {
        self.theta = self.rng.gen_range(-PI..PI);
        self.theta_dot = self.rng.gen_range(-1.0..1.0);
        self.steps = 0;
        self.observation()
    }

    fn step(&mut self, action: &[f32]) -> Step {
        let torque = action[0].clamp(-MAX_TORQUE, MAX_TORQUE);

        let reward = -(Self::angle_normalize(self.theta).powi(2)
            + 0.1 * self.theta_dot.powi(2)
            + 0.001 * torque.powi(2));

        // θ̈ = (3g/2L)sin(θ) + (3/mL²)u
        let theta_acc = (3.0 * G / (2.0 * L)) * self.theta.sin() + (3.0 / (M * L * L)) * torque;

        self.theta_dot = (self.theta_dot + theta_acc * DT).clamp(-MAX_SPEED, MAX_SPEED);
        self.theta += self.theta_dot * DT;
        self.steps += 1;

        let truncated = self.steps >= self.max_steps;

        Step {
            observation: self.observation(),
            reward,
            done: truncated,
            info: StepInfo {
                truncated,
                ..StepInfo::default()
            },
        }
    }
}
