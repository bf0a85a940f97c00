//! Byte encoding for [`Node`] records stored in record pages (spec §3.2).
//! Mirrors the teacher crate's tag-byte-plus-big-endian-fields convention
//! (see `sombra_storage::node`/`edge`) rather than a generic serializer.

use sirix_types::{NodeKey, Result, SirixError};

use crate::node::{NamedData, Node, StructuralData, ValuedData};

const TAG_DOCUMENT_ROOT: u8 = 0;
const TAG_ELEMENT: u8 = 1;
const TAG_TEXT: u8 = 2;
const TAG_ATTRIBUTE: u8 = 3;
const TAG_NAMESPACE: u8 = 4;
const TAG_COMMENT: u8 = 5;
const TAG_PROCESSING_INSTRUCTION: u8 = 6;
const TAG_DELETED: u8 = 7;

pub fn encode(node: &Node) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&node.node_key().0.to_be_bytes());
    match node {
        Node::DocumentRoot {
            hash, structural, ..
        } => {
            buf.push(TAG_DOCUMENT_ROOT);
            buf.extend_from_slice(&hash.to_be_bytes());
            encode_structural(structural, &mut buf);
        }
        Node::Element {
            parent_key,
            hash,
            structural,
            named,
            attributes,
            namespaces,
            ..
        } => {
            buf.push(TAG_ELEMENT);
            buf.extend_from_slice(&parent_key.0.to_be_bytes());
            buf.extend_from_slice(&hash.to_be_bytes());
            encode_structural(structural, &mut buf);
            encode_named(named, &mut buf);
            encode_key_list(attributes, &mut buf);
            encode_key_list(namespaces, &mut buf);
        }
        Node::Text {
            parent_key,
            hash,
            structural,
            valued,
            ..
        } => {
            buf.push(TAG_TEXT);
            buf.extend_from_slice(&parent_key.0.to_be_bytes());
            buf.extend_from_slice(&hash.to_be_bytes());
            encode_structural(structural, &mut buf);
            encode_valued(valued, &mut buf);
        }
        Node::Attribute {
            parent_key,
            hash,
            named,
            valued,
            ..
        } => {
            buf.push(TAG_ATTRIBUTE);
            buf.extend_from_slice(&parent_key.0.to_be_bytes());
            buf.extend_from_slice(&hash.to_be_bytes());
            encode_named(named, &mut buf);
            encode_valued(valued, &mut buf);
        }
        Node::Namespace {
            parent_key,
            hash,
            named,
            ..
        } => {
            buf.push(TAG_NAMESPACE);
            buf.extend_from_slice(&parent_key.0.to_be_bytes());
            buf.extend_from_slice(&hash.to_be_bytes());
            encode_named(named, &mut buf);
        }
        Node::Comment {
            parent_key,
            hash,
            structural,
            valued,
            ..
        } => {
            buf.push(TAG_COMMENT);
            buf.extend_from_slice(&parent_key.0.to_be_bytes());
            buf.extend_from_slice(&hash.to_be_bytes());
            encode_structural(structural, &mut buf);
            encode_valued(valued, &mut buf);
        }
        Node::ProcessingInstruction {
            parent_key,
            hash,
            structural,
            named,
            valued,
            ..
        } => {
            buf.push(TAG_PROCESSING_INSTRUCTION);
            buf.extend_from_slice(&parent_key.0.to_be_bytes());
            buf.extend_from_slice(&hash.to_be_bytes());
            encode_structural(structural, &mut buf);
            encode_named(named, &mut buf);
            encode_valued(valued, &mut buf);
        }
        Node::Deleted { .. } => {
            buf.push(TAG_DELETED);
        }
    }
    buf
}

pub fn decode(data: &[u8]) -> Result<Node> {
    let mut cur = Cursor::new(data);
    let key = NodeKey(cur.take_u64()?);
    let tag = cur.take_u8()?;
    let node = match tag {
        TAG_DOCUMENT_ROOT => {
            let hash = cur.take_u64()?;
            let structural = decode_structural(&mut cur)?;
            Node::DocumentRoot {
                key,
                hash,
                structural,
            }
        }
        TAG_ELEMENT => {
            let parent_key = NodeKey(cur.take_u64()?);
            let hash = cur.take_u64()?;
            let structural = decode_structural(&mut cur)?;
            let named = decode_named(&mut cur)?;
            let attributes = decode_key_list(&mut cur)?;
            let namespaces = decode_key_list(&mut cur)?;
            Node::Element {
                key,
                parent_key,
                hash,
                structural,
                named,
                attributes,
                namespaces,
            }
        }
        TAG_TEXT => {
            let parent_key = NodeKey(cur.take_u64()?);
            let hash = cur.take_u64()?;
            let structural = decode_structural(&mut cur)?;
            let valued = decode_valued(&mut cur)?;
            Node::Text {
                key,
                parent_key,
                hash,
                structural,
                valued,
            }
        }
        TAG_ATTRIBUTE => {
            let parent_key = NodeKey(cur.take_u64()?);
            let hash = cur.take_u64()?;
            let named = decode_named(&mut cur)?;
            let valued = decode_valued(&mut cur)?;
            Node::Attribute {
                key,
                parent_key,
                hash,
                named,
                valued,
            }
        }
        TAG_NAMESPACE => {
            let parent_key = NodeKey(cur.take_u64()?);
            let hash = cur.take_u64()?;
            let named = decode_named(&mut cur)?;
            Node::Namespace {
                key,
                parent_key,
                hash,
                named,
            }
        }
        TAG_COMMENT => {
            let parent_key = NodeKey(cur.take_u64()?);
            let hash = cur.take_u64()?;
            let structural = decode_structural(&mut cur)?;
            let valued = decode_valued(&mut cur)?;
            Node::Comment {
                key,
                parent_key,
                hash,
                structural,
                valued,
            }
        }
        TAG_PROCESSING_INSTRUCTION => {
            let parent_key = NodeKey(cur.take_u64()?);
            let hash = cur.take_u64()?;
            let structural = decode_structural(&mut cur)?;
            let named = decode_named(&mut cur)?;
            let valued = decode_valued(&mut cur)?;
            Node::ProcessingInstruction {
                key,
                parent_key,
                hash,
                structural,
                named,
                valued,
            }
        }
        TAG_DELETED => Node::Deleted { key },
        _ => return Err(SirixError::Corruption("unknown node record tag")),
    };
    Ok(node)
}

fn encode_structural(structural: &StructuralData, buf: &mut Vec<u8>) {
    encode_option_key(structural.first_child_key, buf);
    encode_option_key(structural.left_sibling_key, buf);
    encode_option_key(structural.right_sibling_key, buf);
    buf.extend_from_slice(&structural.child_count.to_be_bytes());
    buf.extend_from_slice(&structural.descendant_count.to_be_bytes());
}

fn decode_structural(cur: &mut Cursor<'_>) -> Result<StructuralData> {
    Ok(StructuralData {
        first_child_key: decode_option_key(cur)?,
        left_sibling_key: decode_option_key(cur)?,
        right_sibling_key: decode_option_key(cur)?,
        child_count: cur.take_u64()?,
        descendant_count: cur.take_u64()?,
    })
}

fn encode_named(named: &NamedData, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&named.name_key.to_be_bytes());
    buf.extend_from_slice(&named.uri_key.to_be_bytes());
    encode_option_key(named.path_node_key, buf);
}

fn decode_named(cur: &mut Cursor<'_>) -> Result<NamedData> {
    Ok(NamedData {
        name_key: cur.take_u32()?,
        uri_key: cur.take_u32()?,
        path_node_key: decode_option_key(cur)?,
    })
}

fn encode_valued(valued: &ValuedData, buf: &mut Vec<u8>) {
    buf.push(valued.compressed as u8);
    let len = valued.value.len() as u32;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&valued.value);
}

fn decode_valued(cur: &mut Cursor<'_>) -> Result<ValuedData> {
    let compressed = cur.take_u8()? != 0;
    let len = cur.take_u32()? as usize;
    let value = cur.take_bytes(len)?.to_vec();
    Ok(ValuedData { value, compressed })
}

fn encode_option_key(key: Option<NodeKey>, buf: &mut Vec<u8>) {
    match key {
        Some(k) => {
            buf.push(1);
            buf.extend_from_slice(&k.0.to_be_bytes());
        }
        None => buf.push(0),
    }
}

fn decode_option_key(cur: &mut Cursor<'_>) -> Result<Option<NodeKey>> {
    match cur.take_u8()? {
        0 => Ok(None),
        1 => Ok(Some(NodeKey(cur.take_u64()?))),
        _ => Err(SirixError::Corruption("invalid option-key discriminant")),
    }
}

fn encode_key_list(keys: &[NodeKey], buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(keys.len() as u16).to_be_bytes());
    for key in keys {
        buf.extend_from_slice(&key.0.to_be_bytes());
    }
}

fn decode_key_list(cur: &mut Cursor<'_>) -> Result<Vec<NodeKey>> {
    let count = cur.take_u16()? as usize;
    let mut keys = Vec::with_capacity(count);
    for _ in 0..count {
        keys.push(NodeKey(cur.take_u64()?));
    }
    Ok(keys)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(SirixError::Corruption("node record truncated"));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take_bytes(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take_bytes(2)?.try_into().unwrap()))
    }

    fn take_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take_bytes(4)?.try_into().unwrap()))
    }

    fn take_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take_bytes(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_round_trips_with_attributes_and_namespaces() {
        let node = Node::Element {
            key: NodeKey(5),
            parent_key: NodeKey(1),
            hash: 0xABCD,
            structural: StructuralData {
                first_child_key: Some(NodeKey(6)),
                left_sibling_key: None,
                right_sibling_key: Some(NodeKey(9)),
                child_count: 1,
                descendant_count: 3,
            },
            named: NamedData {
                name_key: 42,
                uri_key: 0,
                path_node_key: Some(NodeKey(2)),
            },
            attributes: vec![NodeKey(7)],
            namespaces: vec![NodeKey(8), NodeKey(10)],
        };
        let bytes = encode(&node);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn text_round_trips() {
        let node = Node::Text {
            key: NodeKey(11),
            parent_key: NodeKey(1),
            hash: 7,
            structural: StructuralData::default(),
            valued: ValuedData {
                value: b"hello".to_vec(),
                compressed: false,
            },
        };
        let bytes = encode(&node);
        assert_eq!(decode(&bytes).unwrap(), node);
    }

    #[test]
    fn deleted_round_trips_as_tombstone() {
        let node = Node::Deleted { key: NodeKey(3) };
        let bytes = encode(&node);
        let decoded = decode(&bytes).unwrap();
        assert!(decoded.is_tombstone());
        assert_eq!(decoded.node_key(), NodeKey(3));
    }

    #[test]
    fn truncated_record_is_corruption() {
        let err = decode(&[0, 0, 0, 0, 0, 0, 0, 1]).unwrap_err();
        assert!(matches!(err, SirixError::Corruption(_)));
    }
}
