//! Field trees: the structured, typed representation of one object's data.
//!
//! The workspace never inspects an object's binary layout itself. It hands
//! the raw bytes to a [`FieldCodec`] and receives a [`FieldTree`] back; edits
//! go the other way through [`FieldCodec::write_field_tree`]. The codec is a
//! pluggable seam: production code supplies a codec for its real formats,
//! while [`BincodeFieldCodec`] is the built-in reference implementation used
//! by the integration tests and the simple fixture formats.

use serde::{Deserialize, Serialize};

use crate::error::{BundleError, Result};

/// A cross-file reference as stored inside an object's field tree.
///
/// `file_index == 0` means "the same file this pointer lives in"; any other
/// value is translated through the owning file's dependency list
/// (`file_index - 1` is the dependency slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PointerRef {
    /// Local dependency-file index. 0 = self.
    pub file_index: u32,
    /// The referenced object's id within the target file.
    pub object_id: i64,
}

/// A terminal value held by a field tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Boolean scalar.
    Bool(bool),
    /// Signed integer scalar (covers all integer widths of the source data).
    Int(i64),
    /// Floating-point scalar.
    Float(f64),
    /// UTF-8 string.
    Text(String),
    /// Raw byte payload (e.g. an embedded blob the codec left opaque).
    Blob(Vec<u8>),
    /// A typed pointer to another object, possibly in another file.
    Pointer(PointerRef),
}

/// One node of an object's materialized field data.
///
/// A node is either a leaf carrying a [`FieldValue`] or a branch carrying
/// children; arrays are branches whose children share a type name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldTree {
    /// Field name as declared by the object's type.
    pub name: String,
    /// Type name of the field (informational, surfaced to callers as-is).
    pub type_name: String,
    /// Leaf payload. `None` for pure branch nodes.
    pub value: Option<FieldValue>,
    /// Child fields, in declaration order.
    pub children: Vec<FieldTree>,
}

impl FieldTree {
    /// Creates a leaf node.
    pub fn leaf(
        name: impl Into<String>,
        type_name: impl Into<String>,
        value: FieldValue,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            value: Some(value),
            children: Vec::new(),
        }
    }

    /// Creates a branch node from its children.
    pub fn branch(
        name: impl Into<String>,
        type_name: impl Into<String>,
        children: Vec<FieldTree>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            value: None,
            children,
        }
    }

    /// Finds a direct child by field name.
    pub fn get(&self, name: &str) -> Option<&FieldTree> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Collects every [`PointerRef`] stored anywhere in this tree, in
    /// depth-first order. Used to walk an object's outgoing references.
    pub fn pointers(&self) -> Vec<PointerRef> {
        let mut out = Vec::new();
        self.collect_pointers(&mut out);
        out
    }

    fn collect_pointers(&self, out: &mut Vec<PointerRef>) {
        if let Some(FieldValue::Pointer(p)) = self.value {
            out.push(p);
        }
        for child in &self.children {
            child.collect_pointers(out);
        }
    }
}

/// Interface to the external deserialization service.
///
/// Implementors translate between raw object bytes and [`FieldTree`]s. The
/// `type_id` is the object's type discriminator from its file's object
/// table; codecs for self-describing payloads may ignore it.
pub trait FieldCodec: Send + Sync {
    /// Parses an object's raw bytes into a field tree.
    fn read_field_tree(&self, data: &[u8], type_id: u32) -> Result<FieldTree>;

    /// Serializes a field tree back into the object's raw byte form.
    fn write_field_tree(&self, tree: &FieldTree) -> Result<Vec<u8>>;
}

/// The built-in reference codec: field trees encoded with bincode.
///
/// Self-describing, so `type_id` is ignored. The simple fixture formats and
/// the integration tests speak this codec end to end.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeFieldCodec;

impl FieldCodec for BincodeFieldCodec {
    fn read_field_tree(&self, data: &[u8], _type_id: u32) -> Result<FieldTree> {
        bincode::serde::decode_from_slice(data, bincode::config::standard())
            .map(|(tree, _)| tree)
            .map_err(|e| BundleError::Decode(e.to_string()))
    }

    fn write_field_tree(&self, tree: &FieldTree) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(tree, bincode::config::standard())
            .map_err(|e| BundleError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> FieldTree {
        FieldTree::branch(
            "Base",
            "Material",
            vec![
                FieldTree::leaf("m_Name", "string", FieldValue::Text("grass".into())),
                FieldTree::branch(
                    "m_Textures",
                    "vector",
                    vec![
                        FieldTree::leaf(
                            "data",
                            "PPtr",
                            FieldValue::Pointer(PointerRef {
                                file_index: 1,
                                object_id: 42,
                            }),
                        ),
                        FieldTree::leaf(
                            "data",
                            "PPtr",
                            FieldValue::Pointer(PointerRef {
                                file_index: 0,
                                object_id: 7,
                            }),
                        ),
                    ],
                ),
            ],
        )
    }

    #[test]
    fn pointer_walk_is_depth_first_and_complete() {
        let tree = sample_tree();
        let ptrs = tree.pointers();
        assert_eq!(ptrs.len(), 2);
        assert_eq!(ptrs[0].file_index, 1);
        assert_eq!(ptrs[0].object_id, 42);
        assert_eq!(ptrs[1].file_index, 0);
    }

    #[test]
    fn bincode_codec_round_trips_field_for_field() {
        let tree = sample_tree();
        let codec = BincodeFieldCodec;
        let bytes = codec.write_field_tree(&tree).expect("encode");
        let back = codec.read_field_tree(&bytes, 0).expect("decode");
        assert_eq!(tree, back);
    }

    #[test]
    fn decode_of_garbage_is_an_error_not_a_panic() {
        let codec = BincodeFieldCodec;
        let err = codec.read_field_tree(&[0xFF, 0xFE, 0xFD], 0);
        assert!(matches!(err, Err(BundleError::Decode(_))));
    }
}
