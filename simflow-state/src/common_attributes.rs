//! Specs for common, generic attribute types that can be used in datasets.

use simflow_data::{DataType, ElementType};
use simflow_errors::SimResult;

use crate::schema::{AttributeSchema, AttributeSpec};

fn uniform(name: &str, element_type: ElementType) -> AttributeSpec {
    AttributeSpec::new(name, DataType::of(element_type))
}

fn csr(name: &str, element_type: ElementType) -> AttributeSpec {
    AttributeSpec::new(name, DataType::csr_of(element_type))
}

fn csr_shaped(name: &str, element_type: ElementType, unit_shape: &[usize]) -> AttributeSpec {
    AttributeSpec::new(name, DataType::new(element_type, unit_shape, true))
}

/// The common attribute specs: entity identity and display attributes plus
/// the generic geometry, topology, shape and connection vocabulary.
pub fn common_attributes() -> Vec<AttributeSpec> {
    use ElementType::{Float, Int, Str};
    vec![
        uniform("id", Int),
        uniform("reference", Str),
        csr("labels", Int),
        uniform("display_name", Str),
        uniform("geometry.x", Float),
        uniform("geometry.y", Float),
        uniform("geometry.z", Float),
        csr_shaped("geometry.linestring_2d", Float, &[2]),
        csr_shaped("geometry.linestring_3d", Float, &[3]),
        csr_shaped("geometry.polygon", Float, &[2]),
        csr("grid.grid_points", Int),
        uniform("topology.from_node_id", Int),
        uniform("topology.to_node_id", Int),
        uniform("shape.area", Float),
        uniform("shape.length", Float),
        uniform("connection.from_id", Int),
        csr("connection.from_ids", Int),
        uniform("connection.to_id", Int),
        csr("connection.to_ids", Int),
        uniform("connection.from_dataset", Str),
        uniform("connection.to_dataset", Str),
        uniform("connection.from_reference", Str),
        csr("connection.from_references", Str),
        uniform("connection.to_reference", Str),
        csr("connection.to_references", Str),
    ]
}

/// Register the whole common-attribute namespace into a schema.
pub fn register_common_attributes(schema: &mut AttributeSchema) -> SimResult<()> {
    for spec in common_attributes() {
        schema.register(spec)?;
    }
    Ok(())
}
