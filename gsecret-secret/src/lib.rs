pub mod stage;
pub mod token;
pub mod types;

pub use stage::GSecretStage;
pub use token::{Token, TokenID};
pub use types::{RateLimit, Secret, UpdatedSecret, WriteSecret};

pub use gsecret_core::GsecretError;
