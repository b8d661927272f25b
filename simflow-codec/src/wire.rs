use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use simflow_data::{
    string_bucket_width, AttributeData, ElementType, GeneralSection, UnitShape, UpdateData,
    ValueArray, MAX_STR_WIDTH,
};
use simflow_errors::{codec_err, SimError, SimResult};

/// The array encoding version this build understands.
pub const CURRENT_ENCODE_VERSION: u64 = 1;

/// The binary (msgpack) update wire format.
///
/// Payloads are nested string-keyed maps mirroring the in-memory
/// [`UpdateData`] shape; leaf columns travel as
/// `{"__np_encode_version__": 1, "dtype": ..., "shape": [...], "data": bytes}`
/// with little-endian numeric buffers and fixed-width zero-padded UTF-8
/// string buckets. Unknown encoding versions are an error.
#[derive(Serialize, Deserialize, Default)]
struct WirePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    general: Option<GeneralSection>,
    #[serde(flatten)]
    datasets: IndexMap<String, IndexMap<String, IndexMap<String, WireAttr>>>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireAttr {
    Data(WireAttrData),
    /// Component-scoped names arrive one level deeper and are flattened to
    /// `"component/attr"` at ingest.
    Component(IndexMap<String, WireAttrData>),
}

#[derive(Serialize, Deserialize)]
struct WireAttrData {
    data: WireArray,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "row_ptr",
        alias = "ind_ptr"
    )]
    indptr: Option<WireArray>,
}

#[derive(Serialize, Deserialize)]
struct WireArray {
    #[serde(rename = "__np_encode_version__")]
    version: u64,
    dtype: String,
    shape: Vec<usize>,
    data: serde_bytes::ByteBuf,
}

/// Serialize an update payload to wire bytes.
pub fn dump_update(update: &UpdateData) -> SimResult<Vec<u8>> {
    let mut payload = WirePayload {
        general: update.general.clone(),
        ..WirePayload::default()
    };
    for (dataset, groups) in &update.datasets {
        let mut wire_groups = IndexMap::new();
        for (entity_group, group_data) in groups {
            let mut wire_attrs = IndexMap::new();
            for (name, data) in group_data {
                wire_attrs.insert(name.clone(), WireAttr::Data(encode_attribute(data)));
            }
            wire_groups.insert(entity_group.clone(), wire_attrs);
        }
        payload.datasets.insert(dataset.clone(), wire_groups);
    }
    rmp_serde::to_vec_named(&payload).map_err(|e| codec_err!("cannot encode update: {e}"))
}

/// Deserialize wire bytes into an update payload.
pub fn load_update(bytes: &[u8]) -> SimResult<UpdateData> {
    let payload: WirePayload =
        rmp_serde::from_slice(bytes).map_err(|e| codec_err!("cannot decode update: {e}"))?;
    let mut update = UpdateData {
        general: payload.general,
        ..UpdateData::default()
    };
    for (dataset, groups) in payload.datasets {
        for (entity_group, attrs) in groups {
            let mut group_data = simflow_data::GroupData::new();
            for (name, attr) in attrs {
                match attr {
                    WireAttr::Data(data) => {
                        group_data.insert(name.clone(), decode_attribute(data)?);
                    }
                    WireAttr::Component(component) => {
                        for (attr_name, data) in component {
                            group_data
                                .insert(format!("{name}/{attr_name}"), decode_attribute(data)?);
                        }
                    }
                }
            }
            update.insert_group(&dataset, &entity_group, group_data);
        }
    }
    Ok(update)
}

fn encode_attribute(data: &AttributeData) -> WireAttrData {
    WireAttrData {
        data: encode_array(&data.data, &data.unit_shape),
        indptr: data.row_ptr.as_ref().map(|row_ptr| encode_row_ptr(row_ptr)),
    }
}

fn decode_attribute(wire: WireAttrData) -> SimResult<AttributeData> {
    let (data, unit_shape) = decode_array(&wire.data)?;
    let row_ptr = wire.indptr.as_ref().map(decode_row_ptr).transpose()?;
    Ok(AttributeData {
        data,
        unit_shape,
        row_ptr,
    })
}

fn encode_array(values: &ValueArray, unit_shape: &UnitShape) -> WireArray {
    let stride: usize = unit_shape.iter().product::<usize>().max(1);
    // The leading axis is the row count for uniform columns and the flat
    // element count for CSR data.
    let mut shape = vec![values.len() / stride];
    shape.extend(unit_shape.iter().copied());
    let (dtype, data) = match values {
        ValueArray::Bool(v) => (
            ElementType::Bool.dtype_string(1),
            v.iter().map(|&b| b as u8).collect::<Vec<u8>>(),
        ),
        ValueArray::Int(v) => (
            ElementType::Int.dtype_string(1),
            v.iter().flat_map(|i| i.to_le_bytes()).collect(),
        ),
        ValueArray::Float(v) => (
            ElementType::Float.dtype_string(1),
            v.iter().flat_map(|f| f.to_le_bytes()).collect(),
        ),
        ValueArray::Str(v) => {
            let width = string_bucket_width(
                v.iter().map(|s| s.len()).max().unwrap_or(1),
            );
            let mut buf = vec![0u8; v.len() * width];
            for (i, s) in v.iter().enumerate() {
                let bytes = clamp_to_bucket(s, width);
                buf[i * width..i * width + bytes.len()].copy_from_slice(bytes);
            }
            (ElementType::Str.dtype_string(width), buf)
        }
    };
    WireArray {
        version: CURRENT_ENCODE_VERSION,
        dtype,
        shape,
        data: serde_bytes::ByteBuf::from(data),
    }
}

fn decode_array(wire: &WireArray) -> SimResult<(ValueArray, UnitShape)> {
    if wire.version != CURRENT_ENCODE_VERSION {
        return Err(SimError::UnsupportedEncodingVersion {
            version: wire.version,
        });
    }
    let (element_type, width) = ElementType::from_dtype(&wire.dtype)?;
    let unit_shape = UnitShape::from_slice(wire.shape.get(1..).unwrap_or(&[]));
    let bytes: &[u8] = &wire.data;
    let values = match element_type {
        ElementType::Bool => ValueArray::Bool(bytes.iter().map(|&b| b as i8).collect()),
        ElementType::Int => ValueArray::Int(
            chunked(bytes, 4)?
                .map(|c| i32::from_le_bytes(c.try_into().expect("4-byte chunk")))
                .collect(),
        ),
        ElementType::Float => ValueArray::Float(
            chunked(bytes, 8)?
                .map(|c| f64::from_le_bytes(c.try_into().expect("8-byte chunk")))
                .collect(),
        ),
        ElementType::Str => {
            if width == 0 || width > MAX_STR_WIDTH {
                return Err(codec_err!("invalid string bucket width {width}"));
            }
            ValueArray::Str(
                chunked(bytes, width)?
                    .map(|bucket| {
                        let end = bucket
                            .iter()
                            .rposition(|&b| b != 0)
                            .map_or(0, |pos| pos + 1);
                        std::str::from_utf8(&bucket[..end])
                            .map(str::to_owned)
                            .map_err(|_| codec_err!("string bucket is not valid utf-8"))
                    })
                    .collect::<SimResult<_>>()?,
            )
        }
    };
    Ok((values, unit_shape))
}

fn encode_row_ptr(row_ptr: &[usize]) -> WireArray {
    WireArray {
        version: CURRENT_ENCODE_VERSION,
        dtype: ElementType::Int.dtype_string(1),
        shape: vec![row_ptr.len()],
        data: serde_bytes::ByteBuf::from(
            row_ptr
                .iter()
                .flat_map(|&p| (p as i32).to_le_bytes())
                .collect::<Vec<u8>>(),
        ),
    }
}

fn decode_row_ptr(wire: &WireArray) -> SimResult<Vec<usize>> {
    let (values, _) = decode_array(wire)?;
    match values {
        ValueArray::Int(v) => v
            .into_iter()
            .map(|p| usize::try_from(p).map_err(|_| codec_err!("negative row offset {p}")))
            .collect(),
        _ => Err(codec_err!("row offsets must be integers")),
    }
}

fn chunked(bytes: &[u8], size: usize) -> SimResult<impl Iterator<Item = &[u8]>> {
    if bytes.len() % size != 0 {
        return Err(codec_err!(
            "{} data bytes do not divide into {size}-byte elements",
            bytes.len()
        ));
    }
    Ok(bytes.chunks(size))
}

/// The longest prefix of `s` that fits a `width`-byte bucket, cut at a char
/// boundary.
fn clamp_to_bucket(s: &str, width: usize) -> &[u8] {
    if s.len() <= width {
        return s.as_bytes();
    }
    let mut end = width;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s.as_bytes()[..end]
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use simflow_data::{GroupData, Scalar, ID_KEY};

    use super::*;

    fn sample_update() -> UpdateData {
        let mut group = GroupData::new();
        group.insert(ID_KEY.to_owned(), AttributeData::uniform(vec![1, 2]));
        group.insert(
            "x".to_owned(),
            AttributeData::uniform(vec![1.5, f64::NAN]),
        );
        group.insert(
            "flags".to_owned(),
            AttributeData {
                data: ValueArray::Bool(vec![0, 1]),
                unit_shape: UnitShape::new(),
                row_ptr: None,
            },
        );
        group.insert(
            "labels".to_owned(),
            AttributeData::csr(
                ValueArray::Str(vec!["alpha".to_owned(), "beta".to_owned(), "c".to_owned()]),
                vec![0, 2, 3],
            ),
        );
        let mut update = UpdateData::default();
        update.insert_group("ds", "grp", group);
        update
    }

    #[test]
    fn round_trips_all_element_types() {
        let update = sample_update();
        let bytes = dump_update(&update).unwrap();
        let decoded = load_update(&bytes).unwrap();
        assert_eq!(decoded.datasets.keys().collect::<Vec<_>>(), vec!["ds"]);
        let group = decoded.group("ds", "grp").unwrap();
        assert_eq!(group[ID_KEY].data, ValueArray::Int(vec![1, 2]));
        match &group["x"].data {
            ValueArray::Float(v) => {
                assert_eq!(v[0], 1.5);
                assert!(v[1].is_nan());
            }
            _ => panic!("expected float data"),
        }
        assert_eq!(group["flags"].data, ValueArray::Bool(vec![0, 1]));
        assert_eq!(
            group["labels"].data,
            ValueArray::Str(vec![
                "alpha".to_owned(),
                "beta".to_owned(),
                "c".to_owned()
            ])
        );
        assert_eq!(group["labels"].row_ptr, Some(vec![0, 2, 3]));
    }

    #[test]
    fn round_trips_unit_shapes() {
        let mut group = GroupData::new();
        group.insert(ID_KEY.to_owned(), AttributeData::uniform(vec![1]));
        group.insert(
            "line".to_owned(),
            AttributeData::csr(vec![0.0, 0.5, 1.0, 1.5], vec![0, 2]).with_unit_shape(&[2]),
        );
        let mut update = UpdateData::default();
        update.insert_group("ds", "grp", group);

        let decoded = load_update(&dump_update(&update).unwrap()).unwrap();
        let line = &decoded.group("ds", "grp").unwrap()["line"];
        assert_eq!(line.unit_shape.as_slice(), &[2]);
        assert_eq!(line.data, ValueArray::Float(vec![0.0, 0.5, 1.0, 1.5]));
    }

    #[test]
    fn round_trips_general_section() {
        let mut update = sample_update();
        update.general = Some(
            serde_json::from_str(r#"{"enum": {"color": ["red"]}, "special": {"grp.x": -1.0}}"#)
                .unwrap(),
        );
        let decoded = load_update(&dump_update(&update).unwrap()).unwrap();
        let general = decoded.general.unwrap();
        assert_eq!(general.enums["color"], vec!["red"]);
        assert_eq!(general.special["grp.x"], Scalar::Float(-1.0));
    }

    #[test]
    fn empty_update_round_trips() {
        let bytes = dump_update(&UpdateData::default()).unwrap();
        assert!(load_update(&bytes).unwrap().is_empty());
    }

    #[test]
    fn unknown_version_is_rejected() {
        let update = sample_update();
        let mut payload: WirePayload =
            rmp_serde::from_slice(&dump_update(&update).unwrap()).unwrap();
        if let Some(WireAttr::Data(attr)) = payload
            .datasets
            .get_mut("ds")
            .and_then(|g| g.get_mut("grp"))
            .and_then(|a| a.get_mut("x"))
        {
            attr.data.version = 2;
        } else {
            panic!("expected attribute data");
        }
        let bytes = rmp_serde::to_vec_named(&payload).unwrap();
        assert_eq!(
            load_update(&bytes).unwrap_err(),
            SimError::UnsupportedEncodingVersion { version: 2 }
        );
    }

    #[test]
    fn string_buckets_round_to_powers_of_two() {
        let values = ValueArray::Str(vec!["abcdefghi".to_owned()]);
        let wire = encode_array(&values, &UnitShape::new());
        assert_eq!(wire.dtype, "<U16");
        assert_eq!(wire.data.len(), 16);
        let (decoded, _) = decode_array(&wire).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn accepts_row_ptr_key_aliases() {
        use serde::Serialize;

        // `indptr` is what we emit; `row_ptr` (and `ind_ptr`) are accepted
        // on ingest.
        #[derive(Serialize)]
        struct AltAttr {
            data: WireArray,
            row_ptr: WireArray,
        }
        let labels = AttributeData::csr(vec![4, 5], vec![0, 1, 2]);
        let alt = AltAttr {
            data: encode_array(&labels.data, &labels.unit_shape),
            row_ptr: encode_row_ptr(labels.row_ptr.as_ref().unwrap()),
        };
        let mut attrs = IndexMap::new();
        attrs.insert("labels".to_owned(), alt);
        let mut groups = IndexMap::new();
        groups.insert("grp".to_owned(), attrs);
        let mut datasets = IndexMap::new();
        datasets.insert("ds".to_owned(), groups);
        let bytes = rmp_serde::to_vec_named(&datasets).unwrap();

        let decoded = load_update(&bytes).unwrap();
        assert_eq!(
            decoded.group("ds", "grp").unwrap()["labels"].row_ptr,
            Some(vec![0, 1, 2])
        );
    }
}
