use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// The providers this gateway can front.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKey {
    /// OpenAI chat completions.
    Gpt,
    /// Anthropic messages API.
    Claude,
    /// Google Gemini through its OpenAI-compatible surface.
    Gemini,
    /// DeepSeek.
    Deepseek,
    /// Llama API.
    Llama,
    /// Perplexity (returns citations).
    Perplexity,
    /// xAI Grok.
    Grok,
}

impl ProviderKey {
    /// All supported providers, in route-registration order.
    pub const ALL: [ProviderKey; 7] = [
        ProviderKey::Gpt,
        ProviderKey::Claude,
        ProviderKey::Gemini,
        ProviderKey::Deepseek,
        ProviderKey::Llama,
        ProviderKey::Perplexity,
        ProviderKey::Grok,
    ];

    /// The HTTP route that serves this provider.
    #[must_use]
    pub fn endpoint(self) -> &'static str {
        match self {
            ProviderKey::Gpt => "/gpt",
            ProviderKey::Claude => "/claude",
            ProviderKey::Gemini => "/gemini",
            ProviderKey::Deepseek => "/deepseek",
            ProviderKey::Llama => "/llama",
            ProviderKey::Perplexity => "/perplexity",
            ProviderKey::Grok => "/grok",
        }
    }

    /// Environment variable holding the provider's API key.
    #[must_use]
    pub fn api_key_env(self) -> &'static str {
        match self {
            ProviderKey::Gpt => "OPENAI_API_KEY",
            ProviderKey::Claude => "ANTHROPIC_API_KEY",
            ProviderKey::Gemini => "GEMINI_API_KEY",
            ProviderKey::Deepseek => "DEEPSEEK_API_KEY",
            ProviderKey::Llama => "LLAMA_API_KEY",
            ProviderKey::Perplexity => "PERPLEXITY_API_KEY",
            ProviderKey::Grok => "XAI_API_KEY",
        }
    }
}

impl Display for ProviderKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            ProviderKey::Gpt => "gpt",
            ProviderKey::Claude => "claude",
            ProviderKey::Gemini => "gemini",
            ProviderKey::Deepseek => "deepseek",
            ProviderKey::Llama => "llama",
            ProviderKey::Perplexity => "perplexity",
            ProviderKey::Grok => "grok",
        };
        f.write_str(name)
    }
}

/// Which upstream wire protocol an adapter speaks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WireDialect {
    /// `POST {base}/chat/completions`, SSE `delta` chunks.
    OpenAi,
    /// `POST {base}/messages`, SSE content-block events.
    Anthropic,
}

/// Where injected system directives go in the upstream payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SystemPlacement {
    /// A dedicated top-level request field.
    TopLevelField,
    /// A synthetic leading message carrying the profile's admin role.
    LeadingMessage,
}

/// Per-provider wiring: endpoint dialect, credentials, and formatting rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderProfile {
    /// Which provider this profile configures.
    pub key: ProviderKey,
    /// Upstream base URL.
    pub base_url: String,
    /// API key; resolved from the provider's env var when left empty.
    #[serde(default)]
    pub api_key: String,
    /// Role name used for injected directives when they travel as a message.
    pub admin_role: String,
    /// Placement of system directives.
    pub system_placement: SystemPlacement,
    /// Wire protocol to speak.
    pub dialect: WireDialect,
    /// Bounded history suffix sent upstream.
    pub history_window: usize,
    /// Whether the upstream supports incremental token delivery.
    pub supports_streaming: bool,
    /// Whether reasoning tokens are kept in the persisted assistant message.
    #[serde(default)]
    pub persist_thinking: bool,
    /// Completion cap forwarded upstream, where the dialect requires one.
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ProviderProfile {
    fn defaults_for(key: ProviderKey) -> Self {
        match key {
            ProviderKey::Gpt => Self {
                key,
                base_url: "https://api.openai.com/v1".into(),
                api_key: String::new(),
                admin_role: "developer".into(),
                system_placement: SystemPlacement::LeadingMessage,
                dialect: WireDialect::OpenAi,
                history_window: 40,
                supports_streaming: true,
                persist_thinking: false,
                max_tokens: None,
            },
            ProviderKey::Claude => Self {
                key,
                base_url: "https://api.anthropic.com/v1".into(),
                api_key: String::new(),
                admin_role: "system".into(),
                system_placement: SystemPlacement::TopLevelField,
                dialect: WireDialect::Anthropic,
                history_window: 20,
                supports_streaming: true,
                persist_thinking: false,
                max_tokens: Some(2048),
            },
            ProviderKey::Gemini => Self {
                key,
                base_url: "https://generativelanguage.googleapis.com/v1beta/openai".into(),
                api_key: String::new(),
                admin_role: "system".into(),
                system_placement: SystemPlacement::LeadingMessage,
                dialect: WireDialect::OpenAi,
                history_window: 40,
                supports_streaming: true,
                persist_thinking: false,
                max_tokens: None,
            },
            ProviderKey::Deepseek => Self {
                key,
                base_url: "https://api.deepseek.com".into(),
                api_key: String::new(),
                admin_role: "system".into(),
                system_placement: SystemPlacement::LeadingMessage,
                dialect: WireDialect::OpenAi,
                history_window: 40,
                supports_streaming: true,
                persist_thinking: false,
                max_tokens: None,
            },
            ProviderKey::Llama => Self {
                key,
                base_url: "https://api.llama-api.com".into(),
                api_key: String::new(),
                admin_role: "assistant".into(),
                system_placement: SystemPlacement::LeadingMessage,
                dialect: WireDialect::OpenAi,
                history_window: 40,
                // The Llama API answers in one shot; the adapter re-chunks.
                supports_streaming: false,
                persist_thinking: false,
                max_tokens: None,
            },
            ProviderKey::Perplexity => Self {
                key,
                base_url: "https://api.perplexity.ai".into(),
                api_key: String::new(),
                admin_role: "system".into(),
                system_placement: SystemPlacement::LeadingMessage,
                dialect: WireDialect::OpenAi,
                history_window: 20,
                supports_streaming: true,
                persist_thinking: false,
                max_tokens: None,
            },
            ProviderKey::Grok => Self {
                key,
                base_url: "https://api.x.ai/v1".into(),
                api_key: String::new(),
                admin_role: "system".into(),
                system_placement: SystemPlacement::LeadingMessage,
                dialect: WireDialect::OpenAi,
                history_window: 40,
                supports_streaming: true,
                persist_thinking: false,
                max_tokens: None,
            },
        }
    }
}

/// The full provider table plus gateway-level provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvidersConfig {
    /// One profile per supported provider.
    pub profiles: Vec<ProviderProfile>,
    /// Model used for generating conversation aliases.
    pub alias_model: String,
}

impl ProvidersConfig {
    /// Default table covering every supported provider.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            profiles: ProviderKey::ALL
                .iter()
                .map(|key| ProviderProfile::defaults_for(*key))
                .collect(),
            alias_model: "gpt-4o-mini".into(),
        }
    }

    /// Look up the profile for a provider.
    #[must_use]
    pub fn profile(&self, key: ProviderKey) -> Option<&ProviderProfile> {
        self.profiles.iter().find(|profile| profile.key == key)
    }

    /// Fill empty API keys from the environment.
    pub fn apply_env_overrides(&mut self) {
        for profile in &mut self.profiles {
            if profile.api_key.is_empty()
                && let Ok(key) = env::var(profile.key.api_key_env())
            {
                profile.api_key = key;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_provider() {
        let config = ProvidersConfig::with_defaults();
        for key in ProviderKey::ALL {
            assert!(config.profile(key).is_some(), "missing profile for {key}");
        }
    }

    #[test]
    fn claude_uses_top_level_system_field() {
        let config = ProvidersConfig::with_defaults();
        let claude = config.profile(ProviderKey::Claude).unwrap();
        assert_eq!(claude.system_placement, SystemPlacement::TopLevelField);
        assert_eq!(claude.dialect, WireDialect::Anthropic);
        assert_eq!(claude.history_window, 20);
    }

    #[test]
    fn gpt_injects_directives_as_developer_messages() {
        let config = ProvidersConfig::with_defaults();
        let gpt = config.profile(ProviderKey::Gpt).unwrap();
        assert_eq!(gpt.admin_role, "developer");
        assert_eq!(gpt.system_placement, SystemPlacement::LeadingMessage);
    }

    #[test]
    fn endpoints_are_stable() {
        assert_eq!(ProviderKey::Gpt.endpoint(), "/gpt");
        assert_eq!(ProviderKey::Perplexity.endpoint(), "/perplexity");
    }
}
