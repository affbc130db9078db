//! Per-item metadata: the lazily-parsed, read-through cache over an item's
//! `meta` JSON string (§3, §6.4).
//!
//! Two facets are recognised: `layout` (a tensor shape for vector-typed
//! items) and a grab-bag of GUI/control hints. The control hints are part
//! of the original tool's metadata surface (`tweak-json`, `TweakMetadataParser`)
//! that the distilled spec's §6.4 table already lists; they're parsed here
//! even though no GUI consumes them in this crate, because `get_metadata`
//! is a public API regardless of what's listening on the other end.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::variant::Variant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MajorOrder {
    RowMajor,
    ColumnMajor,
}

/// A tensor shape: an ordered list of dimension extents plus a major-order
/// flag. `dimensions.iter().product() == value.vector_len()` is a hard
/// invariant, checked whenever the layout is consulted (§3).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Layout {
    pub order: MajorOrder,
    pub dimensions: Vec<usize>,
}

impl Layout {
    pub fn element_count(&self) -> usize {
        self.dimensions.iter().product()
    }

    /// Returns an error if the layout's declared shape doesn't match the
    /// vector's actual element count (§3: "a hard error when the metadata
    /// is consulted").
    pub fn check_against(&self, value: &Variant) -> Result<()> {
        match value.vector_len() {
            Some(len) if len == self.element_count() => Ok(()),
            Some(len) => Err(Error::InvalidArgument(format!(
                "layout product {} does not match vector length {}",
                self.element_count(),
                len
            ))),
            None => Err(Error::InvalidArgument(
                "layout present on a non-vector value".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Checkbox,
    Spinbox,
    Slider,
    Combobox,
    Button,
}

/// GUI/control hints parsed from the metadata JSON. Every field is optional:
/// an item with no `meta` string at all still gets a `Metadata` with all
/// fields `None`/empty.
#[derive(Debug, Clone, Default)]
pub struct ControlHint {
    pub control: Option<ControlKind>,
    pub min: Option<Variant>,
    pub max: Option<Variant>,
    pub step: Option<Variant>,
    pub decimals: Option<u32>,
    pub readonly: bool,
    pub options: Vec<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub layout: Option<Layout>,
    pub control: ControlHint,
}

/// Raw shape matching the JSON grammar of §6.4, deserialized first and then
/// lowered into `Metadata` so numeric `min`/`max`/`step` (which arrive as
/// untyped JSON numbers) can be coerced against the item's own value type.
#[derive(Debug, Deserialize, Default)]
struct RawMetadata {
    control: Option<ControlKind>,
    min: Option<Value>,
    max: Option<Value>,
    step: Option<Value>,
    decimals: Option<u32>,
    #[serde(default)]
    readonly: bool,
    #[serde(default)]
    options: Vec<String>,
    caption: Option<String>,
    layout: Option<Layout>,
}

impl Metadata {
    /// Parse an item's `meta` JSON string in the context of its current
    /// value type, which is needed to coerce bare JSON numbers in
    /// `min`/`max`/`step` into the right `Variant` arm. An empty string
    /// parses to an all-default `Metadata`.
    pub fn parse(meta_json: &str, sample: &Variant) -> Result<Metadata> {
        if meta_json.trim().is_empty() {
            return Ok(Metadata::default());
        }
        let raw: RawMetadata = serde_json::from_str(meta_json)
            .map_err(|e| Error::InvalidArgument(format!("malformed metadata json: {e}")))?;

        if let Some(layout) = &raw.layout {
            layout.check_against(sample)?;
        }

        let control = ControlHint {
            control: raw.control.or(if raw.options.is_empty() {
                None
            } else {
                Some(ControlKind::Combobox)
            }),
            min: raw.min.and_then(|v| coerce_numeric(&v, sample)),
            max: raw.max.and_then(|v| coerce_numeric(&v, sample)),
            step: raw.step.and_then(|v| coerce_numeric(&v, sample)),
            decimals: raw.decimals,
            readonly: raw.readonly,
            options: raw.options,
            caption: raw.caption,
        };

        Ok(Metadata {
            layout: raw.layout,
            control,
        })
    }
}

/// Coerce a bare JSON number into the same `Variant` arm as `sample`'s
/// scalar type (or its element type, for vectors). Used for `min`/`max`/
/// `step`, which the JSON grammar leaves untyped.
fn coerce_numeric(value: &Value, sample: &Variant) -> Option<Variant> {
    let f = value.as_f64()?;
    use crate::variant::VariantTag::*;
    Some(match sample.tag() {
        I8 | VecI8 => Variant::I8(f as i8),
        I16 | VecI16 => Variant::I16(f as i16),
        I32 | VecI32 => Variant::I32(f as i32),
        I64 | VecI64 => Variant::I64(f as i64),
        U8 | VecU8 => Variant::U8(f as u8),
        U16 | VecU16 => Variant::U16(f as u16),
        U32 | VecU32 => Variant::U32(f as u32),
        U64 | VecU64 => Variant::U64(f as u64),
        F32 | VecF32 => Variant::F32(f as f32),
        F64 | VecF64 => Variant::F64(f),
        Bool | String | Null => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_default() {
        let m = Metadata::parse("", &Variant::F64(0.0)).unwrap();
        assert!(m.layout.is_none());
        assert!(m.control.min.is_none());
    }

    #[test]
    fn layout_matching_vector_parses() {
        let json = r#"{"layout":{"order":"row-major","dimensions":[2,3]}}"#;
        let sample = Variant::VecU8(vec![0; 6]);
        let m = Metadata::parse(json, &sample).unwrap();
        let layout = m.layout.unwrap();
        assert_eq!(layout.dimensions, vec![2, 3]);
        assert_eq!(layout.order, MajorOrder::RowMajor);
    }

    #[test]
    fn layout_mismatched_product_is_error() {
        let json = r#"{"layout":{"order":"row-major","dimensions":[2,4]}}"#;
        let sample = Variant::VecU8(vec![0; 6]);
        assert!(Metadata::parse(json, &sample).is_err());
    }

    #[test]
    fn control_hints_parse_and_coerce() {
        let json = r#"{"control":"slider","min":0,"max":100,"step":5,"decimals":2,"caption":"Gain"}"#;
        let m = Metadata::parse(json, &Variant::F64(1.0)).unwrap();
        assert_eq!(m.control.control, Some(ControlKind::Slider));
        assert_eq!(m.control.min, Some(Variant::F64(0.0)));
        assert_eq!(m.control.max, Some(Variant::F64(100.0)));
        assert_eq!(m.control.decimals, Some(2));
        assert_eq!(m.control.caption.as_deref(), Some("Gain"));
    }

    #[test]
    fn options_imply_combobox() {
        let json = r#"{"options":["a","b","c"]}"#;
        let m = Metadata::parse(json, &Variant::String(String::new())).unwrap();
        assert_eq!(m.control.control, Some(ControlKind::Combobox));
        assert_eq!(m.control.options, vec!["a", "b", "c"]);
    }

    #[test]
    fn malformed_json_is_invalid_argument() {
        let err = Metadata::parse("{not json", &Variant::Bool(true)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
