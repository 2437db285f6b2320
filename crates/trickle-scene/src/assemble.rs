// SPDX-License-Identifier: Apache-2.0
//! Cross-chunk reassembly of binary payloads.
//!
//! Chunk boundaries are arbitrary: a frame may end mid-element or even
//! mid-component. The assembler buffers the trailing fragment of each frame
//! and hands back only whole, typed elements, so the port never sees a torn
//! value.

use trickle_asset::{ComponentType, ElementType};

use crate::port::ElementData;

/// Reassembly failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssembleError {
    /// The announcing header named a component type the wire does not carry.
    #[error("component type {0:?} is not valid on the wire")]
    Unsupported(ComponentType),
    /// More bytes arrived than the announced element count allows.
    #[error("payload overflow: {count} elements announced, more bytes arrived")]
    Overflow {
        /// Announced element count.
        count: u64,
    },
}

/// Reassembles one binary item from little-endian chunk bytes.
#[derive(Debug, Clone)]
pub struct BufferAssembler {
    element_type: ElementType,
    component_type: ComponentType,
    count: u64,
    carry: Vec<u8>,
    elements_received: u64,
}

impl BufferAssembler {
    /// Assembler for a payload of `count` elements.
    ///
    /// # Errors
    ///
    /// Returns [`AssembleError::Unsupported`] for 32-bit integer components,
    /// which the sender never streams.
    pub fn new(
        element_type: ElementType,
        component_type: ComponentType,
        count: u64,
    ) -> Result<Self, AssembleError> {
        if !component_type.streamable() {
            return Err(AssembleError::Unsupported(component_type));
        }
        Ok(BufferAssembler {
            element_type,
            component_type,
            count,
            carry: Vec::new(),
            elements_received: 0,
        })
    }

    fn element_bytes(&self) -> usize {
        (self.element_type.components() * self.component_type.byte_width()) as usize
    }

    /// Elements delivered so far.
    pub fn elements_received(&self) -> u64 {
        self.elements_received
    }

    /// True once every announced element has arrived.
    pub fn is_complete(&self) -> bool {
        self.elements_received >= self.count
    }

    /// Bytes currently carried across a chunk boundary.
    pub fn carry_len(&self) -> usize {
        self.carry.len()
    }

    /// Feed one chunk. Returns the decoded whole elements, if any, together
    /// with their element offset into the full payload.
    ///
    /// # Errors
    ///
    /// Returns [`AssembleError::Overflow`] when the bytes exceed the
    /// announced count; the assembler is unchanged in that case.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Option<(u64, ElementData)>, AssembleError> {
        let element_bytes = self.element_bytes();
        let total = self.carry.len() + bytes.len();
        let whole = total / element_bytes;
        if self.elements_received + whole as u64 > self.count {
            return Err(AssembleError::Overflow { count: self.count });
        }
        self.carry.extend_from_slice(bytes);
        if whole == 0 {
            return Ok(None);
        }
        let usable = whole * element_bytes;
        let rest = self.carry.split_off(usable);
        let ready = std::mem::replace(&mut self.carry, rest);
        let offset = self.elements_received;
        self.elements_received += whole as u64;
        Ok(Some((offset, decode(&ready, self.component_type))))
    }
}

/// Decode little-endian bytes into typed components. `bytes` is always a
/// whole number of components here.
fn decode(bytes: &[u8], component_type: ComponentType) -> ElementData {
    match component_type {
        ComponentType::F32 => ElementData::F32(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        ComponentType::U16 => ElementData::U16(
            bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect(),
        ),
        ComponentType::I16 => ElementData::I16(
            bytes
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]))
                .collect(),
        ),
        ComponentType::U8 => ElementData::U8(bytes.to_vec()),
        ComponentType::I8 => ElementData::I8(bytes.iter().map(|&b| b as i8).collect()),
        // Rejected in the constructor.
        ComponentType::I32 | ComponentType::U32 => ElementData::U8(bytes.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misaligned_chunks_yield_whole_elements_and_empty_carry() {
        // VEC3 float elements are 12 bytes; 7 + 13 + 4 = 24 = 2 elements.
        let mut asm =
            BufferAssembler::new(ElementType::Vec3, ComponentType::F32, 2).expect("assembler");
        let payload: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect();

        assert_eq!(asm.push(&payload[..7]).expect("push"), None);
        assert_eq!(asm.carry_len(), 7);

        let (offset, data) = asm.push(&payload[7..20]).expect("push").expect("elements");
        assert_eq!(offset, 0);
        assert_eq!(data, ElementData::F32(vec![1.0, 2.0, 3.0]));
        assert_eq!(asm.carry_len(), 8);

        let (offset, data) = asm.push(&payload[20..]).expect("push").expect("elements");
        assert_eq!(offset, 1);
        assert_eq!(data, ElementData::F32(vec![4.0, 5.0, 6.0]));
        assert_eq!(asm.carry_len(), 0);
        assert!(asm.is_complete());
    }

    #[test]
    fn scalar_u16_indices_decode_in_order() {
        let mut asm =
            BufferAssembler::new(ElementType::Scalar, ComponentType::U16, 6).expect("assembler");
        let payload: Vec<u8> = [0u16, 1, 2, 2, 1, 3].iter().flat_map(|v| v.to_le_bytes()).collect();
        let (offset, data) = asm.push(&payload).expect("push").expect("elements");
        assert_eq!(offset, 0);
        assert_eq!(data, ElementData::U16(vec![0, 1, 2, 2, 1, 3]));
        assert!(asm.is_complete());
    }

    #[test]
    fn overflow_is_rejected_without_consuming() {
        let mut asm =
            BufferAssembler::new(ElementType::Scalar, ComponentType::U8, 2).expect("assembler");
        assert!(matches!(
            asm.push(&[1, 2, 3]),
            Err(AssembleError::Overflow { count: 2 })
        ));
        // The valid prefix can still be delivered afterwards.
        let (_, data) = asm.push(&[1, 2]).expect("push").expect("elements");
        assert_eq!(data, ElementData::U8(vec![1, 2]));
    }

    #[test]
    fn wide_integers_are_rejected_up_front() {
        assert!(matches!(
            BufferAssembler::new(ElementType::Scalar, ComponentType::U32, 1),
            Err(AssembleError::Unsupported(ComponentType::U32))
        ));
    }
}
