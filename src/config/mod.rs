mod manager_config;

pub use manager_config::{
    ApiConfig, ConfigError, HealthConfig, LoggingConfig, ManagerConfig, ReservationConfig, SessionConfig,
};
