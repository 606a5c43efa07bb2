use std::fmt;

use serde::{Deserialize, Serialize};

/// Runtime identifier handed out by the profile store. Not persisted; ids are
/// assigned in load order and stay stable for the life of the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProfileId(pub u64);

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The user-editable part of a profile, exactly as it appears on disk.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ProfileData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub arguments: String,
}

impl ProfileData {
    pub fn new(name: &str, url: &str, arguments: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            arguments: arguments.to_string(),
        }
    }

    /// Extra client arguments, split on whitespace. Quoting is not supported:
    /// `--auth "a b"` yields the tokens `--auth`, `"a` and `b"`.
    pub fn argument_tokens(&self) -> impl Iterator<Item = &str> {
        self.arguments.split_whitespace()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub id: ProfileId,
    pub data: ProfileData,
}

impl ConnectionProfile {
    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn endpoint(&self) -> &str {
        &self.data.url
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StartupPolicy {
    #[default]
    #[serde(rename = "When logged in")]
    WhenLoggedIn,
    #[serde(rename = "On lid open")]
    OnLidOpen,
    #[serde(rename = "Never")]
    Never,
    #[serde(rename = "Manual only")]
    ManualOnly,
}

impl StartupPolicy {
    pub const ALL: [Self; 4] = [
        Self::WhenLoggedIn,
        Self::OnLidOpen,
        Self::Never,
        Self::ManualOnly,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::WhenLoggedIn => "When logged in",
            Self::OnLidOpen => "On lid open",
            Self::Never => "Never",
            Self::ManualOnly => "Manual only",
        }
    }

    /// Accepts either the display label or its kebab-case form.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|policy| label_matches(policy.label(), value))
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ShutoffPolicy {
    #[default]
    #[serde(rename = "On log off")]
    OnLogOff,
    #[serde(rename = "On lid close")]
    OnLidClose,
    #[serde(rename = "Never")]
    Never,
}

impl ShutoffPolicy {
    pub const ALL: [Self; 3] = [Self::OnLogOff, Self::OnLidClose, Self::Never];

    pub fn label(self) -> &'static str {
        match self {
            Self::OnLogOff => "On log off",
            Self::OnLidClose => "On lid close",
            Self::Never => "Never",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|policy| label_matches(policy.label(), value))
    }
}

fn label_matches(label: &str, value: &str) -> bool {
    let kebab = label.to_lowercase().replace(' ', "-");
    value.eq_ignore_ascii_case(label) || value.eq_ignore_ascii_case(&kebab)
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub startup: StartupPolicy,
    #[serde(default)]
    pub shutoff: ShutoffPolicy,
}

/// The on-disk aggregate. Order of `connections` is the display order.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct PersistedStore {
    #[serde(default)]
    pub connections: Vec<ProfileData>,
    #[serde(default)]
    pub settings: Settings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_use_display_labels_on_disk() {
        let settings = Settings {
            startup: StartupPolicy::ManualOnly,
            shutoff: ShutoffPolicy::OnLidClose,
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert_eq!(json, r#"{"startup":"Manual only","shutoff":"On lid close"}"#);
    }

    #[test]
    fn missing_settings_keys_fall_back_individually() {
        let store: PersistedStore =
            serde_json::from_str(r#"{"settings":{"shutoff":"Never"}}"#).unwrap();
        assert!(store.connections.is_empty());
        assert_eq!(store.settings.startup, StartupPolicy::WhenLoggedIn);
        assert_eq!(store.settings.shutoff, ShutoffPolicy::Never);
    }

    #[test]
    fn policies_parse_labels_and_kebab_words() {
        assert_eq!(StartupPolicy::parse("On lid open"), Some(StartupPolicy::OnLidOpen));
        assert_eq!(StartupPolicy::parse("manual-only"), Some(StartupPolicy::ManualOnly));
        assert_eq!(ShutoffPolicy::parse("on-log-off"), Some(ShutoffPolicy::OnLogOff));
        assert_eq!(ShutoffPolicy::parse("sometimes"), None);
    }

    #[test]
    fn arguments_split_on_whitespace_without_quoting() {
        let data = ProfileData::new("home", "wss://h.example:9000", "  socks  --auth \"a b\" ");
        let tokens: Vec<&str> = data.argument_tokens().collect();
        assert_eq!(tokens, ["socks", "--auth", "\"a", "b\""]);
    }
}
