//! Input declaration and per-instance input buffers.
//!
//! Inputs are the variables conditions read. Each declared input owns a fixed-size slot in a flat
//! byte buffer; conditions and events are compiled against the slot offsets so the runtime never
//! looks names up.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Names reserved for condition built-ins.
pub const RESERVED_NAMES: [&str; 2] = ["time", "length"];

/// Declared type of an input variable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Bool,
    Int,
    Float,
}

impl InputType {
    /// Bytes occupied in the input buffer.
    #[inline]
    pub fn size(self) -> usize {
        match self {
            InputType::Bool => 1,
            InputType::Int | InputType::Float => 4,
        }
    }

    #[inline]
    pub fn tag(self) -> u8 {
        match self {
            InputType::Bool => 0,
            InputType::Int => 1,
            InputType::Float => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(InputType::Bool),
            1 => Some(InputType::Int),
            2 => Some(InputType::Float),
            _ => None,
        }
    }
}

/// A typed input value.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputValue {
    Bool(bool),
    Int(i32),
    Float(f32),
}

impl InputValue {
    #[inline]
    pub fn ty(&self) -> InputType {
        match self {
            InputValue::Bool(_) => InputType::Bool,
            InputValue::Int(_) => InputType::Int,
            InputValue::Float(_) => InputType::Float,
        }
    }

    pub fn as_bool(&self) -> bool {
        match *self {
            InputValue::Bool(b) => b,
            InputValue::Int(i) => i != 0,
            InputValue::Float(f) => f != 0.0,
        }
    }

    pub fn as_int(&self) -> i32 {
        match *self {
            InputValue::Bool(b) => b as i32,
            InputValue::Int(i) => i,
            InputValue::Float(f) => f as i32,
        }
    }

    pub fn as_float(&self) -> f32 {
        match *self {
            InputValue::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            InputValue::Int(i) => i as f32,
            InputValue::Float(f) => f,
        }
    }

    /// Convert into the representation of `ty`.
    pub fn coerce(&self, ty: InputType) -> InputValue {
        match ty {
            InputType::Bool => InputValue::Bool(self.as_bool()),
            InputType::Int => InputValue::Int(self.as_int()),
            InputType::Float => InputValue::Float(self.as_float()),
        }
    }

    /// Encode into a 4-byte little-endian cell (bools use the first byte).
    pub fn to_cell(&self) -> [u8; 4] {
        match *self {
            InputValue::Bool(b) => [b as u8, 0, 0, 0],
            InputValue::Int(i) => i.to_le_bytes(),
            InputValue::Float(f) => f.to_le_bytes(),
        }
    }

    /// Decode a 4-byte cell written by [`InputValue::to_cell`] as `ty`.
    pub fn from_cell(cell: [u8; 4], ty: InputType) -> InputValue {
        match ty {
            InputType::Bool => InputValue::Bool(cell[0] != 0),
            InputType::Int => InputValue::Int(i32::from_le_bytes(cell)),
            InputType::Float => InputValue::Float(f32::from_le_bytes(cell)),
        }
    }
}

/// One declared input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSlot {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: InputType,
    /// Byte offset into the instance input buffer.
    pub offset: u32,
}

/// Ordered list of declared inputs with contiguous offsets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputDecl {
    inputs: Vec<InputSlot>,
    max_name_len: usize,
}

impl Default for InputDecl {
    fn default() -> Self {
        Self::new(32)
    }
}

impl InputDecl {
    pub fn new(max_name_len: usize) -> Self {
        Self {
            inputs: Vec::new(),
            max_name_len,
        }
    }

    /// Declare a new input at the end of the buffer and return its offset.
    pub fn declare(&mut self, name: &str, ty: InputType) -> Result<u32, InputError> {
        if name.is_empty() {
            return Err(InputError::EmptyName);
        }
        if name.len() > self.max_name_len {
            return Err(InputError::NameTooLong {
                name: name.to_string(),
                max: self.max_name_len,
            });
        }
        if RESERVED_NAMES.contains(&name) {
            return Err(InputError::Reserved(name.to_string()));
        }
        if self.index_of(name).is_some() {
            return Err(InputError::Duplicate(name.to_string()));
        }
        let offset = self.total_size() as u32;
        self.inputs.push(InputSlot {
            name: name.to_string(),
            ty,
            offset,
        });
        Ok(offset)
    }

    /// Remove an input and return the index it occupied. Later offsets shift down.
    pub fn remove(&mut self, name: &str) -> Result<usize, InputError> {
        let index = self
            .index_of(name)
            .ok_or_else(|| InputError::Unknown(name.to_string()))?;
        self.inputs.remove(index);
        self.relayout();
        Ok(index)
    }

    fn relayout(&mut self) {
        let mut offset = 0u32;
        for slot in &mut self.inputs {
            slot.offset = offset;
            offset += slot.ty.size() as u32;
        }
    }

    /// Look up a declared input by name.
    pub fn resolve(&self, name: &str) -> Option<&InputSlot> {
        self.inputs.iter().find(|slot| slot.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|slot| slot.name == name)
    }

    pub fn get(&self, index: usize) -> Option<&InputSlot> {
        self.inputs.get(index)
    }

    pub fn slots(&self) -> &[InputSlot] {
        &self.inputs
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Size in bytes of an input buffer laid out for this declaration.
    pub fn total_size(&self) -> usize {
        self.inputs.iter().map(|slot| slot.ty.size()).sum()
    }

    pub fn max_name_len(&self) -> usize {
        self.max_name_len
    }
}

/// Flat per-instance storage for input values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InputBuffer {
    bytes: Vec<u8>,
}

impl InputBuffer {
    /// Zeroed buffer of `size` bytes.
    pub fn zeroed(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
        }
    }

    pub fn for_slots(slots: &[InputSlot]) -> Self {
        Self::zeroed(slots.iter().map(|slot| slot.ty.size()).sum())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Read a value of type `ty` at `offset`. Out-of-range reads yield the type's zero.
    pub fn read(&self, offset: u32, ty: InputType) -> InputValue {
        read_value(&self.bytes, offset, ty)
    }

    /// Write `value` at `offset`, coerced to `ty`. Out-of-range writes are ignored.
    pub fn write(&mut self, offset: u32, ty: InputType, value: InputValue) {
        let start = offset as usize;
        match value.coerce(ty) {
            InputValue::Bool(b) => {
                if let Some(byte) = self.bytes.get_mut(start) {
                    *byte = b as u8;
                }
            }
            InputValue::Int(i) => {
                if let Some(cell) = self.bytes.get_mut(start..start + 4) {
                    LittleEndian::write_i32(cell, i);
                }
            }
            InputValue::Float(f) => {
                if let Some(cell) = self.bytes.get_mut(start..start + 4) {
                    LittleEndian::write_f32(cell, f);
                }
            }
        }
    }

    /// Set a declared input by name. The value must match the declared type, except that
    /// integers are accepted for float inputs.
    pub fn set(
        &mut self,
        slots: &[InputSlot],
        name: &str,
        value: InputValue,
    ) -> Result<(), InputError> {
        let slot = slots
            .iter()
            .find(|slot| slot.name == name)
            .ok_or_else(|| InputError::Unknown(name.to_string()))?;
        let compatible = value.ty() == slot.ty
            || (slot.ty == InputType::Float && value.ty() == InputType::Int);
        if !compatible {
            return Err(InputError::TypeMismatch {
                name: name.to_string(),
                declared: slot.ty,
                given: value.ty(),
            });
        }
        self.write(slot.offset, slot.ty, value);
        Ok(())
    }

    pub fn get(&self, slots: &[InputSlot], name: &str) -> Option<InputValue> {
        slots
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| self.read(slot.offset, slot.ty))
    }
}

/// Read a typed value from raw input bytes.
pub(crate) fn read_value(bytes: &[u8], offset: u32, ty: InputType) -> InputValue {
    let start = offset as usize;
    match ty {
        InputType::Bool => InputValue::Bool(bytes.get(start).is_some_and(|b| *b != 0)),
        InputType::Int => InputValue::Int(
            bytes
                .get(start..start + 4)
                .map(LittleEndian::read_i32)
                .unwrap_or(0),
        ),
        InputType::Float => InputValue::Float(
            bytes
                .get(start..start + 4)
                .map(LittleEndian::read_f32)
                .unwrap_or(0.0),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_contiguous_and_recomputed_on_remove() {
        let mut decl = InputDecl::default();
        assert_eq!(decl.declare("grounded", InputType::Bool).unwrap(), 0);
        assert_eq!(decl.declare("stance", InputType::Int).unwrap(), 1);
        assert_eq!(decl.declare("speed", InputType::Float).unwrap(), 5);
        assert_eq!(decl.total_size(), 9);

        assert_eq!(decl.remove("stance").unwrap(), 1);
        assert_eq!(decl.resolve("speed").unwrap().offset, 1);
        assert_eq!(decl.total_size(), 5);
    }

    #[test]
    fn declare_rejects_bad_names() {
        let mut decl = InputDecl::new(4);
        assert_eq!(decl.declare("", InputType::Bool), Err(InputError::EmptyName));
        assert!(matches!(
            decl.declare("toolong", InputType::Bool),
            Err(InputError::NameTooLong { max: 4, .. })
        ));
        assert_eq!(
            decl.declare("time", InputType::Float),
            Err(InputError::Reserved("time".into()))
        );
        decl.declare("a", InputType::Int).unwrap();
        assert_eq!(
            decl.declare("a", InputType::Float),
            Err(InputError::Duplicate("a".into()))
        );
        assert_eq!(decl.remove("b"), Err(InputError::Unknown("b".into())));
    }

    #[test]
    fn buffer_reads_back_written_values() {
        let mut decl = InputDecl::default();
        decl.declare("on", InputType::Bool).unwrap();
        decl.declare("count", InputType::Int).unwrap();
        decl.declare("speed", InputType::Float).unwrap();
        let mut buf = InputBuffer::for_slots(decl.slots());
        assert_eq!(buf.len(), 9);

        buf.set(decl.slots(), "on", InputValue::Bool(true)).unwrap();
        buf.set(decl.slots(), "count", InputValue::Int(-3)).unwrap();
        buf.set(decl.slots(), "speed", InputValue::Int(2)).unwrap();

        assert_eq!(buf.get(decl.slots(), "on"), Some(InputValue::Bool(true)));
        assert_eq!(buf.get(decl.slots(), "count"), Some(InputValue::Int(-3)));
        assert_eq!(buf.get(decl.slots(), "speed"), Some(InputValue::Float(2.0)));
        assert!(matches!(
            buf.set(decl.slots(), "count", InputValue::Float(1.5)),
            Err(InputError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn out_of_range_access_is_harmless() {
        let mut buf = InputBuffer::zeroed(2);
        buf.write(1, InputType::Float, InputValue::Float(4.0));
        assert_eq!(buf.read(1, InputType::Float), InputValue::Float(0.0));
        assert_eq!(buf.read(7, InputType::Bool), InputValue::Bool(false));
    }

    #[test]
    fn cells_round_trip_by_declared_type() {
        let cell = InputValue::Float(3.0).to_cell();
        assert_eq!(InputValue::from_cell(cell, InputType::Float), InputValue::Float(3.0));
        let cell = InputValue::Bool(true).to_cell();
        assert_eq!(InputValue::from_cell(cell, InputType::Bool), InputValue::Bool(true));
    }
}
