//! Stamps: values tagged with the HLC of their last write and a content hash
//!
//! On the wire a stamp is a JSON array `[value, hlc, hash]`. Changes (as
//! opposed to full content) omit the hash, and a missing HLC means "never
//! set".

use crate::types::{Hash, Hlc};
use serde::{
    de::{self, SeqAccess, Visitor},
    ser::SerializeSeq,
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::{fmt, marker::PhantomData};

/// Last-writer-wins rule: an incoming write replaces the stored one when the
/// stored one was never set or the incoming HLC is strictly greater.
pub fn supersedes(incoming: &Hlc, stored: &Hlc) -> bool {
    stored.is_empty() || incoming > stored
}

/// A value with the HLC of its latest write and, for content, its hash
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Stamp<T> {
    pub value: T,
    pub hlc: Hlc,
    pub hash: Option<Hash>,
}

impl<T> Stamp<T> {
    /// Stamp without a hash, as used in changes
    pub fn new(value: T, hlc: Hlc) -> Self {
        Self {
            value,
            hlc,
            hash: None,
        }
    }

    /// Stamp carrying a hash, as used in content
    pub fn with_hash(value: T, hlc: Hlc, hash: Hash) -> Self {
        Self {
            value,
            hlc,
            hash: Some(hash),
        }
    }
}

impl<T: Serialize> Serialize for Stamp<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.hash.is_some() { 3 } else { 2 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.value)?;
        seq.serialize_element(&self.hlc)?;
        if let Some(hash) = self.hash {
            seq.serialize_element(&hash)?;
        }
        seq.end()
    }
}

struct StampVisitor<T>(PhantomData<T>);

impl<'de, T: Deserialize<'de>> Visitor<'de> for StampVisitor<T> {
    type Value = Stamp<T>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a stamp array [value, hlc?, hash?]")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let value = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let hlc = seq.next_element::<Hlc>()?.unwrap_or_default();
        let hash = seq.next_element::<Hash>()?;
        if seq.next_element::<de::IgnoredAny>()?.is_some() {
            return Err(de::Error::invalid_length(4, &self));
        }
        Ok(Stamp { value, hlc, hash })
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Stamp<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_seq(StampVisitor(PhantomData))
    }
}

/// Node of a stamp tree: like [`Stamp`] but always hashed
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StampNode<T> {
    pub value: T,
    pub hlc: Hlc,
    pub hash: Hash,
}

impl<T> StampNode<T> {
    /// Record a newer HLC on this node; older ones are ignored
    pub fn touch(&mut self, hlc: &Hlc) {
        if *hlc > self.hlc {
            self.hlc = hlc.clone();
        }
    }
}

impl<T: Clone> StampNode<T> {
    /// Wire form of a leaf node
    pub fn to_stamp(&self, with_hash: bool) -> Stamp<T> {
        Stamp {
            value: self.value.clone(),
            hlc: self.hlc.clone(),
            hash: with_hash.then_some(self.hash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hlc(s: &str) -> Hlc {
        Hlc::parse(s).unwrap()
    }

    #[test]
    fn test_supersedes() {
        let older = hlc("0000000000000000");
        let newer = hlc("0000000000000001");
        assert!(supersedes(&older, &Hlc::empty()));
        assert!(supersedes(&newer, &older));
        assert!(!supersedes(&older, &newer));
        assert!(!supersedes(&older, &older));
    }

    #[test]
    fn test_stamp_serializes_as_array() {
        let stamp = Stamp::with_hash(Some(1), hlc("0000000000000000"), 7);
        assert_eq!(
            serde_json::to_string(&stamp).unwrap(),
            r#"[1,"0000000000000000",7]"#
        );
        let change = Stamp::new(None::<i32>, hlc("0000000000000000"));
        assert_eq!(
            serde_json::to_string(&change).unwrap(),
            r#"[null,"0000000000000000"]"#
        );
    }

    #[test]
    fn test_stamp_deserializes_partial_arrays() {
        let full: Stamp<i32> = serde_json::from_str(r#"[1,"0000000000000000",7]"#).unwrap();
        assert_eq!(full.hash, Some(7));
        let bare: Stamp<i32> = serde_json::from_str("[1]").unwrap();
        assert!(bare.hlc.is_empty());
        assert_eq!(bare.hash, None);
        assert!(serde_json::from_str::<Stamp<i32>>("[]").is_err());
        assert!(serde_json::from_str::<Stamp<i32>>(r#"[1,"",2,3]"#).is_err());
        assert!(serde_json::from_str::<Stamp<i32>>(r#"[1,"bad"]"#).is_err());
    }

    #[test]
    fn test_node_touch_keeps_latest() {
        let mut node = StampNode::<()>::default();
        node.touch(&hlc("0000000000000005"));
        node.touch(&hlc("0000000000000002"));
        assert_eq!(node.hlc.as_str(), "0000000000000005");
    }
}
