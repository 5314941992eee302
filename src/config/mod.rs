pub mod schema;

pub use schema::{
    duration_from_secs, Config, GenerationConfig, IdentityConfig, ObservabilityConfig,
    PersonasConfig, RatePolicyConfig, SessionsConfig, MAX_DURATION_SECS,
};
