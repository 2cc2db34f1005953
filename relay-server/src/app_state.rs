use shared::config::{Config, ProviderKey, ProviderProfile, WireDialect};
use std::{collections::HashMap, sync::Arc};

use crate::providers::{ChatBackend, anthropic::AnthropicBackend, openai::OpenAiBackend};
use crate::services::turn::TurnServices;
use crate::store::{ConversationStore, UserStore};

/// One configured provider: its profile plus the adapter speaking its
/// dialect.
#[derive(Clone)]
pub struct ProviderEntry {
    pub profile: ProviderProfile,
    pub backend: Arc<dyn ChatBackend>,
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("provider", &self.profile.key)
            .finish()
    }
}

/// Application state shared across all routes. Built once at startup;
/// everything is an explicitly constructed handle, no process-wide
/// singletons.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub conversations: Arc<dyn ConversationStore>,
    pub users: Arc<dyn UserStore>,
    providers: HashMap<ProviderKey, ProviderEntry>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("providers", &self.providers.len())
            .finish()
    }
}

impl AppState {
    /// Wire up provider adapters from the config and bundle the service
    /// handles.
    #[must_use]
    pub fn build(
        config: Arc<Config>,
        conversations: Arc<dyn ConversationStore>,
        users: Arc<dyn UserStore>,
    ) -> Arc<Self> {
        let client = reqwest::Client::new();

        let providers = config
            .providers
            .profiles
            .iter()
            .map(|profile| {
                let backend: Arc<dyn ChatBackend> = match profile.dialect {
                    WireDialect::OpenAi => {
                        Arc::new(OpenAiBackend::new(client.clone(), profile.clone()))
                    }
                    WireDialect::Anthropic => {
                        Arc::new(AnthropicBackend::new(client.clone(), profile.clone()))
                    }
                };
                (
                    profile.key,
                    ProviderEntry {
                        profile: profile.clone(),
                        backend,
                    },
                )
            })
            .collect();

        Arc::new(Self {
            config,
            conversations,
            users,
            providers,
        })
    }

    /// Look up a configured provider.
    #[must_use]
    pub fn provider(&self, key: ProviderKey) -> Option<&ProviderEntry> {
        self.providers.get(&key)
    }

    /// Assemble the dependency bundle for one chat turn.
    #[must_use]
    pub fn turn_services(&self, key: ProviderKey) -> Option<TurnServices> {
        let entry = self.provider(key)?;
        Some(TurnServices {
            conversations: self.conversations.clone(),
            users: self.users.clone(),
            backend: entry.backend.clone(),
            profile: entry.profile.clone(),
            prompts: self.config.prompts.clone(),
            upload_dir: self.config.uploads.dir.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn build_registers_every_configured_provider() {
        let config = Arc::new(Config::with_defaults());
        let store = Arc::new(MemoryStore::new());
        let state = AppState::build(config, store.clone(), store);

        for key in ProviderKey::ALL {
            assert!(state.provider(key).is_some(), "missing backend for {key}");
            assert!(state.turn_services(key).is_some());
        }
    }
}
