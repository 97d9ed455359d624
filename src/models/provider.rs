use serde::{Deserialize, Serialize};

/// Language-model backends the semantic interpreter can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Claude,
    Local,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Claude => "claude",
            ProviderId::Local => "local",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::Claude => "Anthropic Claude",
            ProviderId::Local => "Local (OpenAI Compatible)",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "claude" => Some(ProviderId::Claude),
            "local" => Some(ProviderId::Local),
            _ => None,
        }
    }
}
