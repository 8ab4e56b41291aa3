//! Custom Resource Definitions for the RedisHA operator

mod redis_ha;
mod types;

pub use redis_ha::{RedisHA, RedisHASpec, RedisHAStatus};
pub use types::{KubernetesConfig, Phase, RedisConfig, Storage};
