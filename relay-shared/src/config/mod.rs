pub mod providers;
pub mod server;

pub use providers::{
    ProviderKey, ProviderProfile, ProvidersConfig, SystemPlacement, WireDialect,
};
pub use server::{Config, LogFormat, PromptConfig};
