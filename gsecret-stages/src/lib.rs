pub mod bws_read;
pub mod bws_write;
pub mod cache;
pub mod generator;
pub mod parse_secret;
pub mod rate_limiter;

pub use bws_read::{BwsReadStage, BwsReadStageBuilder};
pub use bws_write::{BwsWriteStage, BwsWriteStageBuilder};
pub use cache::{CacheController, CacheStage, CacheStageBuilder};
pub use generator::{GeneratorStage, GeneratorStageBuilder};
pub use parse_secret::{ParseSecretStage, ParseSecretStageBuilder};
pub use rate_limiter::{RateLimiterStage, RateLimiterStageBuilder};
