use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::env::{ActionSpace, Environment, Step, StepInfo};

const MAX_VELOCITY: f32 = 1.0;
const DT: f32 = 0.1;
const EXTENT: f32 = 1.0;

/// Point mass on a line that has to reach a target
///
/// Observation is `[position, target]`, the action is a velocity in `[-1, 1]`.
/// Dynamics are deterministic: `x ← clamp(x + DT⋅v, -1, 1)`. The reward is the
/// negative distance to the target after the move. Start and target positions
/// are drawn uniformly in `[-1, 1]` at every reset.
///
/// Episodes are truncated after `max_steps`.
#[derive(Debug, Clone)]
pub struct PointMass {
    position: f32,
    target: f32,
    steps: usize,
    max_steps: usize,
    rng: StdRng,
}

impl PointMass {
    pub fn new(max_steps: usize, seed: u64) -> Self {
        Self {
            position: 0.0,
            target: 0.0,
            steps: 0,
            max_steps,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn observation(&self) -> Vec<f32> {
        vec![self.position, self.target]
    }
}

impl Environment for PointMass {
    fn observation_dim(&self) -> usize {
        2
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::Box {
            low: vec![-MAX_VELOCITY],
            high: vec![MAX_VELOCITY],
        }
    }

    fn reset(&mut self) -> Vec<f32> {
        self.position = self.rng.gen_range(-EXTENT..EXTENT);
        self.target = self.rng.gen_range(-EXTENT..EXTENT);
        self.steps = 0;
        self.observation()
    }

    fn step(&mut self, action: &[f32]) -> Step {
        let velocity = action[0].clamp(-MAX_VELOCITY, MAX_VELOCITY);
        self.position = (self.position + DT * velocity).clamp(-EXTENT, EXTENT);
        self.steps += 1;

        let truncated = self.steps >= self.max_steps;

        Step {
            observation: self.observation(),
            reward: -(self.position - self.target).abs(),
            done: truncated,
            info: StepInfo {
                truncated,
                ..StepInfo::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moving_toward_target_pays_more() {
        let mut env = PointMass::new(50, 0);
        env.position = 0.0;
        env.target = 0.5;

        let toward = env.step(&[1.0]).reward;
        env.position = 0.0;
        let away = env.step(&[-1.0]).reward;

        assert!((toward + 0.4).abs() < 1e-6);
        assert!((away + 0.6).abs() < 1e-6);
    }

    #[test]
    fn position_stays_on_the_line() {
        let mut env = PointMass::new(50, 0);
        env.position = 0.95;
        env.target = 0.0;
        let step = env.step(&[5.0]);
        assert_eq!(step.observation[0], EXTENT);
    }

    #[test]
    fn truncates_after_max_steps() {
        let mut env = PointMass::new(3, 1);
        env.reset();
        assert!(!env.step(&[0.0]).done);
        assert!(!env.step(&[0.0]).done);
        let last = env.step(&[0.0]);
        assert!(last.done && last.info.truncated);
    }
}
