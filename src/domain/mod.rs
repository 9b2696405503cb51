// Domain layer - Core business models
pub mod aircraft;
pub mod error;
pub mod geo;
pub mod session;
pub mod trail;
