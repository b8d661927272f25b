use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use simflow_data::{
    AttributeData, DataType, ElementType, GeneralSection, GroupData, UpdateData, ValueArray,
    ID_KEY,
};
use simflow_errors::{codec_err, SimResult};
use simflow_state::AttributeSchema;
use tracing::debug;

/// The JSON initial-dataset format.
///
/// Accepts both the file envelope
/// `{"name": ..., "general": ..., "data": {...}}` and bare
/// `{"<dataset>": {"<group>": ...}}` maps. Attribute values may be nested
/// one level (`{"component": {"attr": [...]}}`), which flattens to
/// `"component/attr"`. `null` entries become the undefined sentinel (for
/// ragged attributes: one row with one undefined element).
///
/// Attribute typing is schema-driven; unregistered names fall back to
/// inference from the literal values.
pub struct InitDataFormat<'a> {
    schema: &'a AttributeSchema,
}

impl<'a> InitDataFormat<'a> {
    pub fn new(schema: &'a AttributeSchema) -> Self {
        Self { schema }
    }

    /// Parse a JSON document into an update payload.
    pub fn loads(&self, raw: &str) -> SimResult<UpdateData> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| codec_err!("invalid json: {e}"))?;
        let Value::Object(root) = value else {
            return Err(codec_err!("dataset must be a dictionary"));
        };
        let mut update = UpdateData::default();
        if let Some(general) = root.get("general") {
            if !general.is_null() {
                update.general = Some(
                    serde_json::from_value(general.clone())
                        .map_err(|e| codec_err!("invalid general section: {e}"))?,
                );
            }
        }
        match (root.get("name").and_then(Value::as_str), root.get("data")) {
            (Some(name), Some(Value::Object(data))) => {
                update
                    .datasets
                    .insert(name.to_owned(), self.load_data_section(data)?);
            }
            _ => {
                for (key, value) in &root {
                    if key == "general" {
                        continue;
                    }
                    if let Value::Object(data) = value {
                        update
                            .datasets
                            .insert(key.clone(), self.load_data_section(data)?);
                    }
                }
            }
        }
        Ok(update)
    }

    /// Serialize a payload back to the JSON dataset form. A single-dataset
    /// payload is written with the `{"name", "general", "data"}` envelope;
    /// anything else as a bare dataset map.
    pub fn dumps(&self, update: &UpdateData) -> SimResult<String> {
        let mut datasets = Map::new();
        for (dataset, groups) in &update.datasets {
            let mut group_map = Map::new();
            for (entity_group, group_data) in groups {
                group_map.insert(entity_group.clone(), dump_group(group_data)?);
            }
            datasets.insert(dataset.clone(), Value::Object(group_map));
        }
        let general = match &update.general {
            Some(section) if !section.is_empty() => Some(
                serde_json::to_value(section).map_err(|e| codec_err!("general section: {e}"))?,
            ),
            _ => None,
        };
        let document = if update.datasets.len() == 1 {
            let (name, data) = datasets.into_iter().next().expect("one dataset");
            let mut envelope = Map::new();
            envelope.insert("name".to_owned(), json!(name));
            if let Some(general) = general {
                envelope.insert("general".to_owned(), general);
            }
            envelope.insert("data".to_owned(), data);
            Value::Object(envelope)
        } else {
            let mut document = Map::new();
            if let Some(general) = general {
                document.insert("general".to_owned(), general);
            }
            document.extend(datasets);
            Value::Object(document)
        };
        serde_json::to_string(&document).map_err(|e| codec_err!("cannot serialize dataset: {e}"))
    }

    fn load_data_section(
        &self,
        data: &Map<String, Value>,
    ) -> SimResult<IndexMap<String, GroupData>> {
        let mut groups = IndexMap::new();
        for (entity_group, group_value) in data {
            let Value::Object(group_map) = group_value else {
                return Err(codec_err!(
                    "entity group '{entity_group}' data must be a dictionary"
                ));
            };
            let mut group = GroupData::new();
            for (name, attr_value) in group_map {
                match attr_value {
                    // One level of component nesting flattens to a dotted
                    // path separated by '/'.
                    Value::Object(component) => {
                        for (attr, value) in component {
                            let full_name = format!("{name}/{attr}");
                            let Value::Array(values) = value else {
                                return Err(codec_err!(
                                    "attribute '{full_name}' must be a list"
                                ));
                            };
                            group.insert(full_name.clone(), self.load_attribute(values, &full_name)?);
                        }
                    }
                    Value::Array(values) => {
                        group.insert(name.clone(), self.load_attribute(values, name)?);
                    }
                    _ => {
                        return Err(codec_err!(
                            "attribute '{name}' must be a list or a component dictionary"
                        ));
                    }
                }
            }
            groups.insert(entity_group.clone(), group);
        }
        Ok(groups)
    }

    fn load_attribute(&self, values: &[Value], name: &str) -> SimResult<AttributeData> {
        let data_type = match self.schema.get(name) {
            Some(spec) => spec.data_type.clone(),
            None if name == ID_KEY => DataType::of(ElementType::Int),
            None => {
                let inferred = infer_data_type_from_values(values);
                debug!(attribute = name, data_type = %inferred, "inferring data type");
                inferred
            }
        };
        parse_list(values, &data_type)
            .map_err(|e| codec_err!("cannot parse data for '{name}': {e}"))
    }
}

/// The data type implied by literal JSON values: lists of lists are ragged,
/// `null`s and empty lists default to float.
fn infer_data_type_from_values(values: &[Value]) -> DataType {
    fn element_of(values: &[Value]) -> ElementType {
        match values.first() {
            Some(Value::Bool(_)) => ElementType::Bool,
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => ElementType::Int,
            Some(Value::Number(_)) => ElementType::Float,
            Some(Value::String(_)) => ElementType::Str,
            _ => ElementType::Float,
        }
    }
    match values.first() {
        Some(Value::Array(first_row)) => DataType::csr_of(element_of(first_row)),
        _ => DataType::of(element_of(values)),
    }
}

/// A parsed scalar position: `None` is the undefined sentinel.
type Cell<'a> = Option<&'a Value>;

fn parse_list(values: &[Value], data_type: &DataType) -> SimResult<AttributeData> {
    let stride = data_type.stride();
    let mut cells: Vec<Cell> = Vec::new();
    let row_ptr = if data_type.csr {
        let mut row_ptr = vec![0usize];
        for entry in values {
            match entry {
                // A null row is one row with one undefined element.
                Value::Null => {
                    cells.extend(std::iter::repeat(None).take(stride));
                    row_ptr.push(row_ptr.last().unwrap() + 1);
                }
                Value::Array(row) => {
                    for item in row {
                        push_logical_element(&mut cells, item, stride)?;
                    }
                    row_ptr.push(row_ptr.last().unwrap() + row.len());
                }
                _ => return Err(codec_err!("ragged attribute rows must be lists or null")),
            }
        }
        Some(row_ptr)
    } else {
        for entry in values {
            push_logical_element(&mut cells, entry, stride)?;
        }
        None
    };
    Ok(AttributeData {
        data: cells_to_array(&cells, data_type.element_type)?,
        unit_shape: data_type.unit_shape.clone(),
        row_ptr,
    })
}

/// Append one logical element (`stride` scalar cells) for a JSON entry.
/// Entries containing any `null` are treated as wholly undefined.
fn push_logical_element<'a>(
    cells: &mut Vec<Cell<'a>>,
    entry: &'a Value,
    stride: usize,
) -> SimResult<()> {
    match entry {
        Value::Null => cells.extend(std::iter::repeat(None).take(stride)),
        Value::Array(parts) => {
            if parts.len() != stride || stride == 1 {
                return Err(codec_err!(
                    "expected {stride} values per element, found a list of {}",
                    parts.len()
                ));
            }
            if parts.iter().any(Value::is_null) {
                cells.extend(std::iter::repeat(None).take(stride));
            } else {
                cells.extend(parts.iter().map(Some));
            }
        }
        value => {
            if stride != 1 {
                return Err(codec_err!("expected {stride} values per element"));
            }
            cells.push(Some(value));
        }
    }
    Ok(())
}

fn cells_to_array(cells: &[Cell], element_type: ElementType) -> SimResult<ValueArray> {
    match element_type {
        ElementType::Bool => cells
            .iter()
            .map(|cell| match cell {
                None => Ok(simflow_data::UNDEFINED_BOOL),
                Some(Value::Bool(b)) => Ok(*b as i8),
                Some(other) => Err(codec_err!("expected a boolean, found {other}")),
            })
            .collect::<SimResult<_>>()
            .map(ValueArray::Bool),
        ElementType::Int => cells
            .iter()
            .map(|cell| match cell {
                None => Ok(simflow_data::UNDEFINED_INT),
                Some(Value::Number(n)) => n
                    .as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(|| codec_err!("integer out of range: {n}")),
                Some(other) => Err(codec_err!("expected an integer, found {other}")),
            })
            .collect::<SimResult<_>>()
            .map(ValueArray::Int),
        ElementType::Float => cells
            .iter()
            .map(|cell| match cell {
                None => Ok(f64::NAN),
                Some(Value::Number(n)) => n
                    .as_f64()
                    .ok_or_else(|| codec_err!("float out of range: {n}")),
                Some(other) => Err(codec_err!("expected a number, found {other}")),
            })
            .collect::<SimResult<_>>()
            .map(ValueArray::Float),
        ElementType::Str => cells
            .iter()
            .map(|cell| match cell {
                None => Ok(simflow_data::UNDEFINED_STR.to_owned()),
                Some(Value::String(s)) => Ok(s.clone()),
                Some(other) => Err(codec_err!("expected a string, found {other}")),
            })
            .collect::<SimResult<_>>()
            .map(ValueArray::Str),
    }
}

fn dump_group(group: &GroupData) -> SimResult<Value> {
    let mut out = Map::new();
    for (name, data) in group {
        out.insert(name.clone(), dump_attribute(data)?);
    }
    Ok(Value::Object(out))
}

/// Dump one attribute to the JSON list form; undefined rows become `null`.
fn dump_attribute(data: &AttributeData) -> SimResult<Value> {
    let stride = data.unit_shape.iter().product::<usize>().max(1);
    let scalar = |k: usize| -> Value {
        match &data.data {
            ValueArray::Bool(v) => {
                if v[k] == simflow_data::UNDEFINED_BOOL {
                    Value::Null
                } else {
                    json!(v[k] != 0)
                }
            }
            ValueArray::Int(v) => {
                if v[k] == simflow_data::UNDEFINED_INT {
                    Value::Null
                } else {
                    json!(v[k])
                }
            }
            ValueArray::Float(v) => {
                if v[k].is_nan() {
                    Value::Null
                } else {
                    json!(v[k])
                }
            }
            ValueArray::Str(v) => {
                if v[k] == simflow_data::UNDEFINED_STR {
                    Value::Null
                } else {
                    json!(v[k])
                }
            }
        }
    };
    let element = |logical: usize| -> Value {
        if stride == 1 {
            scalar(logical)
        } else {
            Value::Array((0..stride).map(|j| scalar(logical * stride + j)).collect())
        }
    };
    let element_is_undefined = |logical: usize| -> bool {
        (0..stride).all(|j| scalar(logical * stride + j).is_null())
    };

    let rows = match &data.row_ptr {
        None => {
            let n = data.data.len() / stride;
            (0..n)
                .map(|row| {
                    if element_is_undefined(row) {
                        Value::Null
                    } else {
                        element(row)
                    }
                })
                .collect()
        }
        Some(row_ptr) => row_ptr
            .windows(2)
            .map(|w| {
                let (start, end) = (w[0], w[1]);
                // A row that is a single undefined element dumps as null.
                if end - start == 1 && element_is_undefined(start) {
                    Value::Null
                } else {
                    Value::Array((start..end).map(element).collect())
                }
            })
            .collect(),
    };
    Ok(Value::Array(rows))
}
