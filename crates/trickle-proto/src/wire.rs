// SPDX-License-Identifier: Apache-2.0
//! JSON text-frame encoding for [`Header`].
//!
//! Headers ride websocket text frames as single JSON objects tagged by
//! `kind`; binary chunks ride binary frames untouched. Nothing here frames
//! or length-prefixes — the transport's frame boundary is the message
//! boundary.

use crate::{Header, ProtoError};

/// Encode a header for a text frame.
///
/// # Errors
///
/// Returns [`ProtoError::Encode`] if serialization fails.
pub fn encode_header(header: &Header) -> Result<String, ProtoError> {
    serde_json::to_string(header).map_err(ProtoError::Encode)
}

/// Decode a text frame into a header.
///
/// # Errors
///
/// Returns [`ProtoError::Decode`] for malformed JSON or unknown kinds.
pub fn decode_header(text: &str) -> Result<Header, ProtoError> {
    serde_json::from_str(text).map_err(ProtoError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{content_id, BufferItem, ContentId, Interleave, Policy, SortKey};
    use trickle_asset::{ComponentType, ElementType};

    fn buffer_item() -> BufferItem {
        BufferItem {
            id: ContentId([7; 32]),
            property: "mesh0".into(),
            property_name: None,
            primitive: Some(0),
            attribute: "POSITION".into(),
            element_type: ElementType::Vec3,
            component_type: ComponentType::F32,
            count: 24,
            animation: None,
            hierarchy: Vec::new(),
        }
    }

    #[test]
    fn headers_round_trip() {
        for header in [
            Header::BufferItem(buffer_item()),
            Header::AssetRequest { reference: "duck".into() },
            Header::Warning { message: "non-triangle primitive".into() },
            Header::StreamComplete,
        ] {
            let text = encode_header(&header).expect("encode");
            assert_eq!(decode_header(&text).expect("decode"), header);
        }
    }

    #[test]
    fn kind_tags_are_kebab_case() {
        let text = encode_header(&Header::BufferItem(buffer_item())).expect("encode");
        assert!(text.contains(r#""kind":"buffer-item""#), "{text}");
        let text = encode_header(&Header::StreamComplete).expect("encode");
        assert_eq!(text, r#"{"kind":"stream-complete"}"#);
    }

    #[test]
    fn content_id_round_trips_as_hex() {
        let id = ContentId([0xab; 32]);
        let json = serde_json::to_string(&id).expect("encode");
        assert_eq!(json.len(), 66); // 64 hex chars plus quotes
        let back: ContentId = serde_json::from_str(&json).expect("decode");
        assert_eq!(back, id);
    }

    #[test]
    fn content_id_separates_natures_but_dedups_descriptors() {
        let desc = ("data.bin", 128u64, 24u64);
        let a = content_id("buffer", &desc).expect("id");
        let b = content_id("buffer", &desc).expect("id");
        let c = content_id("texture", &desc).expect("id");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn unknown_kind_is_a_decode_error() {
        assert!(decode_header(r#"{"kind":"mystery"}"#).is_err());
        assert!(decode_header("not json").is_err());
    }

    #[test]
    fn policy_fields_all_default() {
        let policy: Policy = serde_json::from_str(r#"{"interleave":"round-robin"}"#).expect("decode");
        assert_eq!(policy.interleave, Interleave::RoundRobin);
        assert_eq!(policy.property_sort, SortKey::SourceOrder);
        assert!(policy.send_indices);
        assert_eq!(policy.animation_chunk_bytes, 32);
    }
}
