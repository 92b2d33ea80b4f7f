use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::time::Duration;

/// Marker byte that opens a sequence-number component.
const SEQUENCE_MARKER: u8 = 0x00;

/// Hierarchical NDN name: an ordered list of opaque binary components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Name {
    components: Vec<Bytes>,
}

impl Name {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `/a/b/c` URI form. Empty segments are ignored, so `/` is the empty name.
    pub fn from_uri(uri: &str) -> Self {
        let components = uri
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| Bytes::copy_from_slice(segment.as_bytes()))
            .collect();
        Self { components }
    }

    pub fn components(&self) -> &[Bytes] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn push(&mut self, component: Bytes) {
        self.components.push(component);
    }

    /// Append a sequence-number component: the marker byte followed by the
    /// minimal big-endian encoding of `seq`.
    pub fn append_sequence(&mut self, seq: u64) {
        let raw = seq.to_be_bytes();
        let skip = raw.iter().take_while(|b| **b == 0).count();
        let mut buf = BytesMut::with_capacity(1 + raw.len() - skip);
        buf.put_u8(SEQUENCE_MARKER);
        buf.put_slice(&raw[skip..]);
        self.components.push(buf.freeze());
    }

    pub fn with_sequence(mut self, seq: u64) -> Self {
        self.append_sequence(seq);
        self
    }

    /// Decode the last component as a sequence number, if it is one.
    pub fn sequence(&self) -> Option<u64> {
        let last = self.components.last()?;
        let (marker, digits) = last.split_first()?;
        if *marker != SEQUENCE_MARKER || digits.len() > 8 {
            return None;
        }
        Some(digits.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    pub fn starts_with(&self, prefix: &Name) -> bool {
        self.components.len() >= prefix.components.len()
            && self
                .components
                .iter()
                .zip(&prefix.components)
                .all(|(a, b)| a == b)
    }
}

impl From<&str> for Name {
    fn from(uri: &str) -> Self {
        Name::from_uri(uri)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return f.write_str("/");
        }
        for component in &self.components {
            f.write_str("/")?;
            for &byte in component.iter() {
                if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
                    write!(f, "{}", byte as char)?;
                } else {
                    write!(f, "%{byte:02X}")?;
                }
            }
        }
        Ok(())
    }
}

/// A named content request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interest {
    pub name: Name,
    pub nonce: u32,
    pub lifetime: Duration,
}

impl Interest {
    /// The content index carried in the last name component.
    pub fn sequence(&self) -> Option<u64> {
        self.name.sequence()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_uri_prefix() {
        let name = Name::from_uri("/good/leaf-3");
        assert_eq!(name.len(), 2);
        assert_eq!(name.to_string(), "/good/leaf-3");
        assert!(Name::from_uri("/").is_empty());
        assert_eq!(Name::from_uri("//a//b/").len(), 2);
    }

    #[test]
    fn sequence_component_is_minimal_big_endian() {
        let name = Name::from_uri("/evil").with_sequence(0x0102);
        assert_eq!(&name.components()[1][..], &[0x00u8, 0x01, 0x02]);
        assert_eq!(name.to_string(), "/evil/%00%01%02");
        assert_eq!(name.sequence(), Some(0x0102));

        let zero = Name::new().with_sequence(0);
        assert_eq!(&zero.components()[0][..], &[0x00u8]);
        assert_eq!(zero.sequence(), Some(0));

        assert_eq!(Name::new().with_sequence(u64::MAX).sequence(), Some(u64::MAX));
    }

    #[test]
    fn plain_component_is_not_a_sequence() {
        assert_eq!(Name::from_uri("/good/x").sequence(), None);
        assert_eq!(Name::new().sequence(), None);
    }

    #[test]
    fn prefix_matching() {
        let prefix = Name::from_uri("/good");
        assert!(Name::from_uri("/good/leaf-1").with_sequence(7).starts_with(&prefix));
        assert!(!Name::from_uri("/evil/leaf-1").starts_with(&prefix));
        assert!(Name::from_uri("/anything").starts_with(&Name::new()));
        assert!(!prefix.starts_with(&Name::from_uri("/good/leaf-1")));
    }
}
