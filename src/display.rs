//! String-form rendering and parsing of `Variant` values (§12 of
//! `SPEC_FULL.md`, scenario S3).
//!
//! Ported from the original tool's `tweak_variant_*` string conversion
//! helpers (`tweakappcommon.c`): floats truncate to `decimals` places when
//! metadata specifies it, and vectors with a `layout` render as nested
//! brackets following the declared dimensions and major order, rather than
//! as a flat list.

use crate::error::{Error, Result};
use crate::metadata::{Layout, MajorOrder, Metadata};
use crate::variant::Variant;

impl Variant {
    /// Render this value as a string, honoring `decimals` truncation for
    /// floats and tensor-shaped bracket nesting for vectors with a layout.
    pub fn to_display_string(&self, meta: Option<&Metadata>) -> String {
        let decimals = meta.and_then(|m| m.control.decimals);
        match self {
            Variant::Null => "null".to_string(),
            Variant::Bool(b) => b.to_string(),
            Variant::I8(v) => v.to_string(),
            Variant::I16(v) => v.to_string(),
            Variant::I32(v) => v.to_string(),
            Variant::I64(v) => v.to_string(),
            Variant::U8(v) => v.to_string(),
            Variant::U16(v) => v.to_string(),
            Variant::U32(v) => v.to_string(),
            Variant::U64(v) => v.to_string(),
            Variant::F32(v) => format_float(*v as f64, decimals),
            Variant::F64(v) => format_float(*v, decimals),
            Variant::String(s) => s.clone(),
            _ => {
                let flat = flat_scalar_strings(self, decimals);
                match meta.and_then(|m| m.layout.as_ref()) {
                    Some(layout) if layout.element_count() == flat.len() => {
                        nest(&flat, &layout.dimensions, layout.order)
                    }
                    _ => format!("[{}]", flat.join(",")),
                }
            }
        }
    }

    /// Parse a string back into a value of the same type (and, for
    /// vectors, the same layout-implied shape) as `sample`. Truncates
    /// floating point input to `decimals` places per metadata, the same as
    /// the string-rendering direction.
    pub fn parse_from_str(s: &str, sample: &Variant, meta: Option<&Metadata>) -> Result<Variant> {
        let decimals = meta.and_then(|m| m.control.decimals);
        let bad = |msg: &str| Error::InvalidArgument(format!("{msg}: {s:?}"));
        Ok(match sample {
            Variant::Bool(_) => Variant::Bool(s.parse().map_err(|_| bad("not a bool"))?),
            Variant::I8(_) => Variant::I8(s.parse().map_err(|_| bad("not an i8"))?),
            Variant::I16(_) => Variant::I16(s.parse().map_err(|_| bad("not an i16"))?),
            Variant::I32(_) => Variant::I32(s.parse().map_err(|_| bad("not an i32"))?),
            Variant::I64(_) => Variant::I64(s.parse().map_err(|_| bad("not an i64"))?),
            Variant::U8(_) => Variant::U8(s.parse().map_err(|_| bad("not a u8"))?),
            Variant::U16(_) => Variant::U16(s.parse().map_err(|_| bad("not a u16"))?),
            Variant::U32(_) => Variant::U32(s.parse().map_err(|_| bad("not a u32"))?),
            Variant::U64(_) => Variant::U64(s.parse().map_err(|_| bad("not a u64"))?),
            Variant::F32(_) => Variant::F32(truncate(
                s.parse::<f64>().map_err(|_| bad("not a float"))?,
                decimals,
            ) as f32),
            Variant::F64(_) => Variant::F64(truncate(
                s.parse::<f64>().map_err(|_| bad("not a float"))?,
                decimals,
            )),
            Variant::String(_) => Variant::String(s.to_string()),
            other => {
                let layout = meta.and_then(|m| m.layout.as_ref());
                let flat = flatten_nested(s, layout)?;
                parse_flat_vector(other, &flat, decimals)?
            }
        })
    }
}

fn format_float(v: f64, decimals: Option<u32>) -> String {
    match decimals {
        Some(d) => format!("{:.*}", d as usize, truncate(v, Some(d))),
        None => v.to_string(),
    }
}

fn truncate(v: f64, decimals: Option<u32>) -> f64 {
    match decimals {
        Some(d) => {
            let factor = 10f64.powi(d as i32);
            (v * factor).trunc() / factor
        }
        None => v,
    }
}

fn flat_scalar_strings(v: &Variant, decimals: Option<u32>) -> Vec<String> {
    match v {
        Variant::VecI8(x) => x.iter().map(|n| n.to_string()).collect(),
        Variant::VecI16(x) => x.iter().map(|n| n.to_string()).collect(),
        Variant::VecI32(x) => x.iter().map(|n| n.to_string()).collect(),
        Variant::VecI64(x) => x.iter().map(|n| n.to_string()).collect(),
        Variant::VecU8(x) => x.iter().map(|n| n.to_string()).collect(),
        Variant::VecU16(x) => x.iter().map(|n| n.to_string()).collect(),
        Variant::VecU32(x) => x.iter().map(|n| n.to_string()).collect(),
        Variant::VecU64(x) => x.iter().map(|n| n.to_string()).collect(),
        Variant::VecF32(x) => x.iter().map(|n| format_float(*n as f64, decimals)).collect(),
        Variant::VecF64(x) => x.iter().map(|n| format_float(*n, decimals)).collect(),
        _ => Vec::new(),
    }
}

/// Nest a flat element list into bracketed rows according to `dimensions`
/// and `order`. Only the outermost dimension is re-grouped for
/// column-major; row-major nests from the innermost dimension outward,
/// which matches how the original tool renders 2-D tensors in its tree
/// view (`TweakTreeModel`). Dimensions beyond 2 are treated as repeated
/// applications of the same nesting rule.
fn nest(flat: &[String], dimensions: &[usize], order: MajorOrder) -> String {
    fn go(flat: &[String], dims: &[usize], row_major: bool) -> String {
        match dims {
            [] | [_] => format!("[{}]", flat.join(",")),
            [outer, rest @ ..] => {
                let stride: usize = rest.iter().product();
                let groups: Vec<String> = flat
                    .chunks(stride)
                    .map(|chunk| go(chunk, rest, row_major))
                    .collect();
                debug_assert_eq!(groups.len(), *outer);
                format!("[{}]", groups.join(","))
            }
        }
    }
    match order {
        MajorOrder::RowMajor => go(flat, dimensions, true),
        MajorOrder::ColumnMajor => {
            let mut reversed = dimensions.to_vec();
            reversed.reverse();
            go(flat, &reversed, false)
        }
    }
}

/// Strip brackets and commas from a (possibly nested) bracketed string,
/// yielding the flat, in-order list of scalar tokens.
fn flatten_nested(s: &str, layout: Option<&Layout>) -> Result<Vec<String>> {
    let trimmed = s.trim();
    let stripped = trimmed.trim_start_matches('[').trim_end_matches(']');
    let flat: Vec<String> = stripped
        .replace(['[', ']'], ",")
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if let Some(layout) = layout {
        if flat.len() != layout.element_count() {
            return Err(Error::InvalidArgument(format!(
                "expected {} elements, got {}",
                layout.element_count(),
                flat.len()
            )));
        }
    }
    Ok(flat)
}

fn parse_flat_vector(sample: &Variant, flat: &[String], decimals: Option<u32>) -> Result<Variant> {
    let bad = || Error::InvalidArgument("malformed vector element".into());
    Ok(match sample {
        Variant::VecI8(_) => Variant::VecI8(
            flat.iter().map(|t| t.parse().map_err(|_| bad())).collect::<Result<_>>()?,
        ),
        Variant::VecI16(_) => Variant::VecI16(
            flat.iter().map(|t| t.parse().map_err(|_| bad())).collect::<Result<_>>()?,
        ),
        Variant::VecI32(_) => Variant::VecI32(
            flat.iter().map(|t| t.parse().map_err(|_| bad())).collect::<Result<_>>()?,
        ),
        Variant::VecI64(_) => Variant::VecI64(
            flat.iter().map(|t| t.parse().map_err(|_| bad())).collect::<Result<_>>()?,
        ),
        Variant::VecU8(_) => Variant::VecU8(
            flat.iter().map(|t| t.parse().map_err(|_| bad())).collect::<Result<_>>()?,
        ),
        Variant::VecU16(_) => Variant::VecU16(
            flat.iter().map(|t| t.parse().map_err(|_| bad())).collect::<Result<_>>()?,
        ),
        Variant::VecU32(_) => Variant::VecU32(
            flat.iter().map(|t| t.parse().map_err(|_| bad())).collect::<Result<_>>()?,
        ),
        Variant::VecU64(_) => Variant::VecU64(
            flat.iter().map(|t| t.parse().map_err(|_| bad())).collect::<Result<_>>()?,
        ),
        Variant::VecF32(_) => Variant::VecF32(
            flat.iter()
                .map(|t| t.parse::<f64>().map(|v| truncate(v, decimals) as f32).map_err(|_| bad()))
                .collect::<Result<_>>()?,
        ),
        Variant::VecF64(_) => Variant::VecF64(
            flat.iter()
                .map(|t| t.parse::<f64>().map(|v| truncate(v, decimals)).map_err(|_| bad()))
                .collect::<Result<_>>()?,
        ),
        _ => return Err(bad()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;

    #[test]
    fn scalar_float_truncates_to_decimals() {
        let json = r#"{"decimals":2}"#;
        let meta = Metadata::parse(json, &Variant::F64(0.0)).unwrap();
        assert_eq!(Variant::F64(3.14159).to_display_string(Some(&meta)), "3.14");
    }

    #[test]
    fn s3_vector_round_trip() {
        // Scenario S3: a row-major 2x3 uint8 tensor renders as nested rows
        // and parses back to the flat buffer.
        let json = r#"{"layout":{"order":"row-major","dimensions":[2,3]}}"#;
        let sample = Variant::VecU8(vec![1, 2, 3, 4, 5, 6]);
        let meta = Metadata::parse(json, &sample).unwrap();

        assert_eq!(sample.to_display_string(Some(&meta)), "[[1,2,3],[4,5,6]]");

        let parsed = Variant::parse_from_str("[[7,8,9],[10,11,12]]", &sample, Some(&meta)).unwrap();
        assert_eq!(parsed, Variant::VecU8(vec![7, 8, 9, 10, 11, 12]));
    }

    #[test]
    fn vector_without_layout_renders_flat() {
        let sample = Variant::VecU8(vec![1, 2, 3]);
        assert_eq!(sample.to_display_string(None), "[1,2,3]");
    }

    #[test]
    fn parse_rejects_wrong_element_count() {
        let json = r#"{"layout":{"order":"row-major","dimensions":[2,3]}}"#;
        let sample = Variant::VecU8(vec![1, 2, 3, 4, 5, 6]);
        let meta = Metadata::parse(json, &sample).unwrap();
        assert!(Variant::parse_from_str("[[1,2],[3,4]]", &sample, Some(&meta)).is_err());
    }
}
