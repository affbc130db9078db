//! The tagged value type carried by items and wire messages (§3).
//!
//! A `Variant` is a sum of null, bool, the four signed/unsigned integer
//! widths, the two IEEE float widths, a UTF-8 string, and a same-shaped
//! vector of each of the ten numeric scalar kinds. Vectors carry a flat
//! buffer and an element count; the logical tensor shape lives out-of-band
//! in an item's `Metadata` (`metadata::Layout`), not in the `Variant` itself.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Variant {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    VecI8(Vec<i8>),
    VecI16(Vec<i16>),
    VecI32(Vec<i32>),
    VecI64(Vec<i64>),
    VecU8(Vec<u8>),
    VecU16(Vec<u16>),
    VecU32(Vec<u32>),
    VecU64(Vec<u64>),
    VecF32(Vec<f32>),
    VecF64(Vec<f64>),
}

/// The tag half of the tagged union, used for type comparisons without
/// cloning a (possibly large) vector payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantTag {
    Null,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    String,
    VecI8,
    VecI16,
    VecI32,
    VecI64,
    VecU8,
    VecU16,
    VecU32,
    VecU64,
    VecF32,
    VecF64,
}

impl Variant {
    pub fn tag(&self) -> VariantTag {
        match self {
            Variant::Null => VariantTag::Null,
            Variant::Bool(_) => VariantTag::Bool,
            Variant::I8(_) => VariantTag::I8,
            Variant::I16(_) => VariantTag::I16,
            Variant::I32(_) => VariantTag::I32,
            Variant::I64(_) => VariantTag::I64,
            Variant::U8(_) => VariantTag::U8,
            Variant::U16(_) => VariantTag::U16,
            Variant::U32(_) => VariantTag::U32,
            Variant::U64(_) => VariantTag::U64,
            Variant::F32(_) => VariantTag::F32,
            Variant::F64(_) => VariantTag::F64,
            Variant::String(_) => VariantTag::String,
            Variant::VecI8(_) => VariantTag::VecI8,
            Variant::VecI16(_) => VariantTag::VecI16,
            Variant::VecI32(_) => VariantTag::VecI32,
            Variant::VecI64(_) => VariantTag::VecI64,
            Variant::VecU8(_) => VariantTag::VecU8,
            Variant::VecU16(_) => VariantTag::VecU16,
            Variant::VecU32(_) => VariantTag::VecU32,
            Variant::VecU64(_) => VariantTag::VecU64,
            Variant::VecF32(_) => VariantTag::VecF32,
            Variant::VecF64(_) => VariantTag::VecF64,
        }
    }

    pub fn is_vector(&self) -> bool {
        self.vector_len().is_some()
    }

    /// Element count for vector variants, `None` for scalars/strings/null.
    pub fn vector_len(&self) -> Option<usize> {
        match self {
            Variant::VecI8(v) => Some(v.len()),
            Variant::VecI16(v) => Some(v.len()),
            Variant::VecI32(v) => Some(v.len()),
            Variant::VecI64(v) => Some(v.len()),
            Variant::VecU8(v) => Some(v.len()),
            Variant::VecU16(v) => Some(v.len()),
            Variant::VecU32(v) => Some(v.len()),
            Variant::VecU64(v) => Some(v.len()),
            Variant::VecF32(v) => Some(v.len()),
            Variant::VecF64(v) => Some(v.len()),
            _ => None,
        }
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        use Variant::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (I8(a), I8(b)) => a == b,
            (I16(a), I16(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (U8(a), U8(b)) => a == b,
            (U16(a), U16(b)) => a == b,
            (U32(a), U32(b)) => a == b,
            (U64(a), U64(b)) => a == b,
            (F32(a), F32(b)) => a.to_bits() == b.to_bits(),
            (F64(a), F64(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) => a == b,
            (VecI8(a), VecI8(b)) => a == b,
            (VecI16(a), VecI16(b)) => a == b,
            (VecI32(a), VecI32(b)) => a == b,
            (VecI64(a), VecI64(b)) => a == b,
            (VecU8(a), VecU8(b)) => a == b,
            (VecU16(a), VecU16(b)) => a == b,
            (VecU32(a), VecU32(b)) => a == b,
            (VecU64(a), VecU64(b)) => a == b,
            (VecF32(a), VecF32(b)) => a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits()),
            (VecF64(a), VecF64(b)) => a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits()),
            _ => false,
        }
    }
}

/// §4.7.3: given a sample (typically `default_value`) and an incoming value,
/// decide whether the incoming value may replace the item's current value.
///
/// A null sample never accepts anything (items are never created with a
/// null default in practice, but the rule is total). Scalars and strings
/// must match type exactly. Vectors must match type and element count;
/// shape (row/column-major, dimensions) lives in metadata and is not
/// re-checked here.
pub fn check_value_compatibility(sample: &Variant, incoming: &Variant) -> bool {
    if matches!(sample, Variant::Null) {
        return false;
    }
    if sample.tag() != incoming.tag() {
        return false;
    }
    match (sample.vector_len(), incoming.vector_len()) {
        (Some(a), Some(b)) => a == b,
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_same_type_compatible() {
        assert!(check_value_compatibility(&Variant::F64(1.0), &Variant::F64(2.5)));
    }

    #[test]
    fn scalar_type_mismatch_rejected() {
        assert!(!check_value_compatibility(
            &Variant::U32(1),
            &Variant::String("oops".into())
        ));
    }

    #[test]
    fn null_sample_never_compatible() {
        assert!(!check_value_compatibility(&Variant::Null, &Variant::Bool(true)));
    }

    #[test]
    fn vector_same_length_compatible() {
        assert!(check_value_compatibility(
            &Variant::VecU8(vec![1, 2, 3]),
            &Variant::VecU8(vec![4, 5, 6])
        ));
    }

    #[test]
    fn vector_length_mismatch_rejected() {
        assert!(!check_value_compatibility(
            &Variant::VecU8(vec![1, 2, 3]),
            &Variant::VecU8(vec![4, 5])
        ));
    }

    #[test]
    fn vector_type_mismatch_rejected() {
        assert!(!check_value_compatibility(
            &Variant::VecU8(vec![1, 2, 3]),
            &Variant::VecI8(vec![1, 2, 3])
        ));
    }

    #[test]
    fn tag_round_trips_through_variant() {
        assert_eq!(Variant::VecF32(vec![1.0]).tag(), VariantTag::VecF32);
        assert_eq!(Variant::Null.tag(), VariantTag::Null);
    }
}
