//! Content descriptor validation.

use std::fmt;

use super::SwarmError;

/// Opaque locator for a swarm resource, typically a magnet URI.
///
/// Only non-emptiness is enforced. Magnet URIs are additionally inspected for
/// a display name and a BitTorrent info hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentDescriptor {
    raw: String,
    display_name: Option<String>,
    info_hash: Option<String>,
}

impl ContentDescriptor {
    /// Validates and wraps a client-supplied descriptor.
    ///
    /// # Errors
    /// - `SwarmError::InvalidDescriptor` - Descriptor is empty or whitespace
    pub fn parse(raw: &str) -> Result<Self, SwarmError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SwarmError::InvalidDescriptor {
                reason: "descriptor is empty".to_string(),
            });
        }

        let magnet = is_magnet(trimmed)
            .then(|| magnet_url::Magnet::new(trimmed).ok())
            .flatten();
        let display_name = magnet
            .as_ref()
            .and_then(|m| m.display_name())
            .map(str::to_string);
        let info_hash = magnet.as_ref().and_then(|m| {
            m.hash_type()
                .filter(|kind| kind.eq_ignore_ascii_case("btih"))
                .and(m.hash())
                .filter(|hash| !hash.is_empty())
                .map(str::to_lowercase)
        });

        Ok(Self {
            raw: trimmed.to_string(),
            display_name,
            info_hash,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn is_magnet(&self) -> bool {
        is_magnet(&self.raw)
    }

    /// Lowercase BitTorrent info hash from the `xt=urn:btih:` topic, if any.
    pub fn info_hash(&self) -> Option<&str> {
        self.info_hash.as_deref()
    }
}

fn is_magnet(raw: &str) -> bool {
    raw.get(..7)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("magnet:"))
}

impl fmt::Display for ContentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            return write!(f, "{name}");
        }
        // Long magnets make unreadable log lines
        match self.raw.char_indices().nth(60) {
            Some((cut, _)) => write!(f, "{}...", &self.raw[..cut]),
            None => write!(f, "{}", self.raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_descriptor() {
        assert!(matches!(
            ContentDescriptor::parse(""),
            Err(SwarmError::InvalidDescriptor { .. })
        ));
        assert!(matches!(
            ContentDescriptor::parse("   \n"),
            Err(SwarmError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_accepts_opaque_descriptor() {
        let descriptor = ContentDescriptor::parse("  library://movies/a  ").unwrap();
        assert_eq!(descriptor.as_str(), "library://movies/a");
        assert!(!descriptor.is_magnet());
        assert_eq!(descriptor.display_name(), None);
        assert_eq!(descriptor.to_string(), "library://movies/a");
    }

    #[test]
    fn test_magnet_detection() {
        let descriptor = ContentDescriptor::parse(
            "MAGNET:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567",
        )
        .unwrap();
        assert!(descriptor.is_magnet());
    }

    #[test]
    fn test_info_hash_extraction() {
        let descriptor = ContentDescriptor::parse(
            "magnet:?dn=Movie&xt=urn:btih:ABCDEF0123456789ABCDEF0123456789ABCDEF01&tr=udp://t",
        )
        .unwrap();
        assert_eq!(
            descriptor.info_hash(),
            Some("abcdef0123456789abcdef0123456789abcdef01")
        );

        let without = ContentDescriptor::parse("magnet:?dn=Movie").unwrap();
        assert_eq!(without.info_hash(), None);
        let opaque = ContentDescriptor::parse("library://x").unwrap();
        assert_eq!(opaque.info_hash(), None);

        let sha256 = ContentDescriptor::parse("magnet:?xt=urn:sha256:ffee").unwrap();
        assert_eq!(sha256.info_hash(), None);
    }

    #[test]
    fn test_long_descriptor_display_is_truncated() {
        let raw = format!("magnet:?xt=urn:btih:{}", "a".repeat(80));
        let descriptor = ContentDescriptor::parse(&raw).unwrap();
        if descriptor.display_name().is_none() {
            assert!(descriptor.to_string().ends_with("..."));
            assert!(descriptor.to_string().len() < raw.len());
        }
    }
}
