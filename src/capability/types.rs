//! Capability and Provider Types
//!
//! Core identifiers for the capability system. Capability kinds are an open
//! set: the runtime ships with the kinds Anima uses out of the box, but
//! plugins may register providers under any kind they invent, with no code
//! change in the runtime.

use serde::{Deserialize, Serialize};

/// A named kind of assistant functionality (e.g. text generation).
///
/// `CapabilityKind` is deliberately a string newtype rather than a closed
/// enum: new capability kinds appear at runtime as plugins register them.
/// The seeded kinds below are the ones the assistant core resolves itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityKind(String);

impl CapabilityKind {
    /// Text generation (LLM completion/chat)
    pub const TEXT_GEN: &'static str = "text-gen";
    /// Text-to-speech synthesis
    pub const TTS: &'static str = "tts";
    /// Speech-to-text transcription
    pub const STT: &'static str = "stt";
    /// Image generation
    pub const IMAGE_GEN: &'static str = "image-gen";
    /// Text embeddings
    pub const EMBEDDINGS: &'static str = "embeddings";

    /// Create a capability kind from any identifier
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// The capability kinds every registry starts out with
    pub fn seeded() -> [CapabilityKind; 5] {
        [
            Self::new(Self::TEXT_GEN),
            Self::new(Self::TTS),
            Self::new(Self::STT),
            Self::new(Self::IMAGE_GEN),
            Self::new(Self::EMBEDDINGS),
        ]
    }

    /// The kind identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CapabilityKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl From<String> for CapabilityKind {
    fn from(kind: String) -> Self {
        Self(kind)
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A concrete implementation of a capability, supplied by a plugin.
///
/// Uniquely identified by `(capability, id)` within the registry. The
/// `config` value carries provider-specific settings opaquely; the runtime
/// never interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    /// Provider identifier (e.g. "deepgram", "whisper-local")
    pub id: String,

    /// Human-readable provider name (e.g. "Deepgram Nova-3")
    pub name: String,

    /// Provider-specific configuration carried alongside the registration
    #[serde(default)]
    pub config: serde_json::Value,
}

impl Provider {
    /// Create a provider with no attached configuration
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            config: serde_json::Value::Null,
        }
    }

    /// Attach provider-specific configuration
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// A plugin's declared requirement on a capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRequirement {
    /// The capability the plugin needs
    pub capability: CapabilityKind,

    /// Optional requirements never block the plugin; they are only reported
    #[serde(default)]
    pub optional: bool,
}

impl CapabilityRequirement {
    /// A hard requirement
    pub fn required(capability: impl Into<CapabilityKind>) -> Self {
        Self {
            capability: capability.into(),
            optional: false,
        }
    }

    /// An optional requirement
    pub fn optional(capability: impl Into<CapabilityKind>) -> Self {
        Self {
            capability: capability.into(),
            optional: true,
        }
    }
}

/// Result of checking a requirement set against the registry
#[derive(Debug, Clone, Serialize)]
pub struct RequirementsReport {
    /// True iff every non-optional requirement has at least one provider
    pub satisfied: bool,

    /// Non-optional requirements with no provider
    pub missing: Vec<CapabilityKind>,

    /// Optional requirements with no provider (reported, never blocking)
    pub optional: Vec<CapabilityKind>,
}

/// Summary row for capability listings
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityInfo {
    /// The capability kind
    pub capability: CapabilityKind,

    /// Number of providers currently registered for it
    pub provider_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_kind_open_set() {
        let custom = CapabilityKind::new("video-gen");
        assert_eq!(custom.as_str(), "video-gen");
        assert_ne!(custom, CapabilityKind::new(CapabilityKind::TTS));
    }

    #[test]
    fn test_seeded_kinds() {
        let seeded = CapabilityKind::seeded();
        assert_eq!(seeded.len(), 5);
        assert!(seeded.contains(&CapabilityKind::new("text-gen")));
        assert!(seeded.contains(&CapabilityKind::new("embeddings")));
    }

    #[test]
    fn test_capability_kind_serde_transparent() {
        let kind = CapabilityKind::new("stt");
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, "\"stt\"");
        let back: CapabilityKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn test_provider_builder() {
        let provider = Provider::new("deepgram", "Deepgram Nova-3")
            .with_config(serde_json::json!({"model": "nova-3"}));
        assert_eq!(provider.id, "deepgram");
        assert_eq!(provider.config["model"], "nova-3");
    }

    #[test]
    fn test_requirement_constructors() {
        assert!(!CapabilityRequirement::required("tts").optional);
        assert!(CapabilityRequirement::optional("tts").optional);
    }
}
