//! Built-in environments

pub mod pendulum;
pub mod point_mass;

pub use pendulum::Pendulum;
pub use point_mass::PointMass;

use crate::{
    env::Environment,
    error::{Error, Result},
};

/// Build a registered environment by id
///
/// | id             | episode length |
/// |----------------|----------------|
/// | `Pendulum-v1`  | 200            |
/// | `PointMass-v0` | 50             |
pub fn make(env_id: &str, seed: u64) -> Result<Box<dyn Environment>> {
    match env_id {
        "Pendulum-v1" => Ok(Box::new(Pendulum::new(200, seed))),
        "PointMass-v0" => Ok(Box::new(PointMass::new(50, seed))),
        other => Err(Error::UnknownEnvironment(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry() {
        let env = make("Pendulum-v1", 0).unwrap();
        assert_eq!(env.observation_dim(), 3);
        let env = make("PointMass-v0", 0).unwrap();
        assert_eq!(env.observation_dim(), 2);
        assert!(matches!(make("CartPole-v1", 0), Err(Error::UnknownEnvironment(_))));
    }
}
