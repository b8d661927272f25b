use indexmap::IndexMap;
use simflow_data::{AttributeData, DataType};
use simflow_errors::{SimError, SimResult};

/// The declared specification of one attribute: its name, data type and
/// optional enumeration name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: String,
    pub data_type: DataType,
    pub enum_name: Option<String>,
}

impl AttributeSpec {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            enum_name: None,
        }
    }

    pub fn with_enum(mut self, enum_name: impl Into<String>) -> Self {
        self.enum_name = Some(enum_name.into());
        self
    }
}

/// A case-sensitive registry of known attribute specifications.
///
/// The schema is consulted when the tracked state auto-creates attributes
/// and when the codec types incoming columns. It is a pure value registry:
/// it never owns attribute data.
#[derive(Debug, Clone, Default)]
pub struct AttributeSchema {
    specs: IndexMap<String, AttributeSpec>,
}

impl AttributeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schema from a sequence of specs; incompatible duplicates are
    /// rejected.
    pub fn from_specs(specs: impl IntoIterator<Item = AttributeSpec>) -> SimResult<Self> {
        let mut schema = Self::new();
        for spec in specs {
            schema.register(spec)?;
        }
        Ok(schema)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.specs.values()
    }

    /// Register a spec. Registering the exact same spec again is a no-op;
    /// registering a different data type under an existing name is an
    /// error.
    pub fn register(&mut self, spec: AttributeSpec) -> SimResult<()> {
        match self.specs.get(&spec.name) {
            None => {
                self.specs.insert(spec.name.clone(), spec);
                Ok(())
            }
            Some(existing) if existing.data_type == spec.data_type => Ok(()),
            Some(existing) => Err(SimError::IncompatibleSpec {
                name: spec.name.clone(),
                msg: format!(
                    "registered as {}, redefined as {}",
                    existing.data_type, spec.data_type
                ),
            }),
        }
    }

    /// Look up a registered spec by name.
    pub fn get(&self, name: &str) -> Option<&AttributeSpec> {
        self.specs.get(name)
    }

    /// Look up a spec, constructing one from `default_data_type` when the
    /// name is unknown. With `cache`, the constructed spec is stored for
    /// later lookups.
    pub fn get_spec(
        &mut self,
        name: &str,
        default_data_type: Option<DataType>,
        cache: bool,
    ) -> Option<AttributeSpec> {
        if let Some(spec) = self.specs.get(name) {
            return Some(spec.clone());
        }
        let spec = AttributeSpec::new(name, default_data_type?);
        if cache {
            self.specs.insert(name.to_owned(), spec.clone());
        }
        Some(spec)
    }
}

/// The data type implied by one payload column, used when no spec is
/// registered for its name.
pub fn infer_data_type(data: &AttributeData) -> DataType {
    data.infer_data_type()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use simflow_data::{ElementType, ValueArray};

    use super::*;

    fn float_spec(name: &str) -> AttributeSpec {
        AttributeSpec::new(name, DataType::of(ElementType::Float))
    }

    #[test]
    fn register_is_idempotent_for_equal_specs() {
        let mut schema = AttributeSchema::new();
        schema.register(float_spec("attr")).unwrap();
        schema.register(float_spec("attr")).unwrap();
        assert_eq!(schema.len(), 1);
    }

    #[test]
    fn register_rejects_incompatible_redefinition() {
        let mut schema = AttributeSchema::new();
        schema.register(float_spec("attr")).unwrap();
        let err = schema
            .register(AttributeSpec::new("attr", DataType::of(ElementType::Int)))
            .unwrap_err();
        assert!(matches!(err, SimError::IncompatibleSpec { .. }));
    }

    #[test]
    fn get_spec_with_default() {
        let mut schema = AttributeSchema::from_specs([float_spec("existing")]).unwrap();
        assert_eq!(
            schema.get_spec("existing", None, true).unwrap().data_type,
            DataType::of(ElementType::Float)
        );
        assert_eq!(schema.get_spec("not_existing", None, true), None);
        assert_eq!(
            schema
                .get_spec("not_existing", Some(DataType::of(ElementType::Int)), true)
                .unwrap()
                .data_type,
            DataType::of(ElementType::Int)
        );
    }

    #[test]
    fn get_spec_caching() {
        // Cached default wins over a later default.
        let mut schema = AttributeSchema::new();
        schema.get_spec("attr", Some(DataType::of(ElementType::Float)), true);
        let spec = schema
            .get_spec("attr", Some(DataType::of(ElementType::Int)), true)
            .unwrap();
        assert_eq!(spec.data_type, DataType::of(ElementType::Float));

        // Without caching, the later default applies.
        let mut schema = AttributeSchema::new();
        schema.get_spec("attr", Some(DataType::of(ElementType::Float)), false);
        let spec = schema
            .get_spec("attr", Some(DataType::of(ElementType::Int)), true)
            .unwrap();
        assert_eq!(spec.data_type, DataType::of(ElementType::Int));
    }

    #[test]
    fn infer_data_type_from_payload() {
        assert_eq!(
            infer_data_type(&AttributeData::uniform(vec![1, 2])),
            DataType::of(ElementType::Int)
        );
        assert_eq!(
            infer_data_type(&AttributeData::csr(vec![1.0], vec![0, 1])),
            DataType::csr_of(ElementType::Float)
        );
        assert_eq!(
            infer_data_type(
                &AttributeData::uniform(ValueArray::Str(vec!["a".into()]))
            ),
            DataType::of(ElementType::Str)
        );
        assert_eq!(
            infer_data_type(&AttributeData::uniform(vec![1.0, 2.0]).with_unit_shape(&[2])),
            DataType::new(ElementType::Float, &[2], false)
        );
    }
}
