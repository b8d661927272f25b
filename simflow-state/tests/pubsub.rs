use pretty_assertions::assert_eq;
use simflow_data::{
    AttributeData, Closeness, DataType, ElementType, GroupData, UpdateData, ValueArray, ID_KEY,
};
use simflow_state::{AttributeFlags, AttributeSpec, TrackedState};

fn float_spec(name: &str) -> AttributeSpec {
    AttributeSpec::new(name, DataType::of(ElementType::Float))
}

fn ids_only_update(dataset: &str, entity_group: &str, ids: Vec<i32>) -> UpdateData {
    let mut group = GroupData::new();
    group.insert(ID_KEY.to_owned(), AttributeData::uniform(ids));
    let mut update = UpdateData::default();
    update.insert_group(dataset, entity_group, group);
    update
}

fn write_rows(state: &mut TrackedState, attr: &str, rows: &[usize], values: Vec<f64>) {
    state
        .get_attribute_mut("dataset", "grp", attr)
        .unwrap()
        .update(&AttributeData::uniform(values), rows, false)
        .unwrap();
}

/// Two models, one publishing `x` and subscribing `y`, the other doing the
/// opposite; updates loop between them through the payload form.
#[test]
fn pub_sub_loopback() {
    let mut a = TrackedState::new();
    a.register_attribute("dataset", "grp", &float_spec("x"), AttributeFlags::PUB);
    a.register_attribute("dataset", "grp", &float_spec("y"), AttributeFlags::SUB);
    let mut b = TrackedState::new();
    b.register_attribute("dataset", "grp", &float_spec("x"), AttributeFlags::SUB);
    b.register_attribute("dataset", "grp", &float_spec("y"), AttributeFlags::PUB);

    let init = ids_only_update("dataset", "grp", vec![1, 2]);
    a.receive_update(&init, true, false).unwrap();
    b.receive_update(&init, true, false).unwrap();

    write_rows(&mut a, "x", &[0, 1], vec![1.0, 2.0]);
    let update = a.generate_update(AttributeFlags::PUBLISH).unwrap();
    let group = update.group("dataset", "grp").unwrap();
    assert_eq!(group[ID_KEY].data, ValueArray::Int(vec![1, 2]));
    assert_eq!(group["x"].data, ValueArray::Float(vec![1.0, 2.0]));
    assert!(!group.contains_key("y"));

    b.receive_update(&update, false, false).unwrap();
    let b_x = b.get_attribute("dataset", "grp", "x").unwrap();
    assert!(b_x
        .to_attribute_data()
        .unwrap()
        .data
        .all_close(&ValueArray::Float(vec![1.0, 2.0]), &Closeness::default()));

    write_rows(&mut b, "y", &[0, 1], vec![10.0, 20.0]);
    let reply = b.generate_update(AttributeFlags::PUBLISH).unwrap();
    a.receive_update(&reply, false, false).unwrap();
    let a_y = a.get_attribute("dataset", "grp", "y").unwrap();
    assert!(a_y
        .to_attribute_data()
        .unwrap()
        .data
        .all_close(&ValueArray::Float(vec![10.0, 20.0]), &Closeness::default()));
}

/// Writes within tolerance do not end up in the generated update; writes
/// beyond tolerance produce a payload addressing only the changed row.
#[test]
fn sparse_change_detection() {
    let mut state = TrackedState::new();
    state.register_attribute("dataset", "grp", &float_spec("a"), AttributeFlags::PUB);
    let mut group = GroupData::new();
    group.insert(ID_KEY.to_owned(), AttributeData::uniform(vec![5, 6, 7]));
    group.insert("a".to_owned(), AttributeData::uniform(vec![1.0, 2.0, 3.0]));
    let mut init = UpdateData::default();
    init.insert_group("dataset", "grp", group);
    state.receive_update(&init, true, false).unwrap();

    write_rows(&mut state, "a", &[0, 1, 2], vec![1.000000001, 2.0, 3.1]);
    let update = state.generate_update(AttributeFlags::PUBLISH).unwrap();
    let group = update.group("dataset", "grp").unwrap();
    assert_eq!(group[ID_KEY].data, ValueArray::Int(vec![7]));
    assert_eq!(group["a"].data, ValueArray::Float(vec![3.1]));
}

/// Applying a generated PUBLISH update to a fresh state with the same
/// schema reproduces the original on the PUBLISH attributes.
#[test]
fn generate_then_receive_round_trips() {
    let mut source = TrackedState::new();
    source.register_attribute("dataset", "grp", &float_spec("x"), AttributeFlags::PUB);
    source.register_attribute(
        "dataset",
        "grp",
        &AttributeSpec::new("tags", DataType::csr_of(ElementType::Int)),
        AttributeFlags::PUB,
    );
    source
        .receive_update(&ids_only_update("dataset", "grp", vec![3, 4, 8]), true, false)
        .unwrap();
    write_rows(&mut source, "x", &[0, 2], vec![0.5, 8.5]);
    source
        .get_attribute_mut("dataset", "grp", "tags")
        .unwrap()
        .update(
            &AttributeData::csr(vec![1, 2, 3], vec![0, 2, 3]),
            &[0, 1],
            false,
        )
        .unwrap();

    let update = source.generate_update(AttributeFlags::PUBLISH).unwrap();

    let mut target = TrackedState::new();
    target.register_attribute("dataset", "grp", &float_spec("x"), AttributeFlags::PUB);
    target.register_attribute(
        "dataset",
        "grp",
        &AttributeSpec::new("tags", DataType::csr_of(ElementType::Int)),
        AttributeFlags::PUB,
    );
    target.receive_update(&update, false, false).unwrap();

    for attr in ["x", "tags"] {
        let source_rows = source.get_attribute("dataset", "grp", attr).unwrap();
        let target_attr = target.get_attribute("dataset", "grp", attr).unwrap();
        // The target only has rows for the changed ids; compare via id.
        let source_index = source.index("dataset", "grp").unwrap();
        let target_index = target.index("dataset", "grp").unwrap();
        for &id in target_index.ids() {
            let source_row = source_index.query(id).unwrap();
            let target_row = target_index.query(id).unwrap();
            let source_data = source_rows.to_attribute_data().unwrap();
            let target_data = target_attr.to_attribute_data().unwrap();
            match (&source_data.data, &target_data.data) {
                (ValueArray::Float(s), ValueArray::Float(t)) => {
                    let (s_val, t_val) = (s[source_row], t[target_row]);
                    // Undefined (NaN) rows must survive as undefined.
                    assert!((s_val.is_nan() && t_val.is_nan()) || s_val == t_val);
                }
                (ValueArray::Int(s), ValueArray::Int(t)) => {
                    let s_range = source_data.row_ptr.as_ref().unwrap();
                    let t_range = target_data.row_ptr.as_ref().unwrap();
                    assert_eq!(
                        &s[s_range[source_row]..s_range[source_row + 1]],
                        &t[t_range[target_row]..t_range[target_row + 1]]
                    );
                }
                _ => panic!("unexpected storage"),
            }
        }
    }
}

/// After resetting PUBLISH-side tracking, the next generated update is
/// empty.
#[test]
fn reset_empties_generated_updates() {
    let mut state = TrackedState::new();
    state.register_attribute("dataset", "grp", &float_spec("x"), AttributeFlags::PUB);
    state
        .receive_update(&ids_only_update("dataset", "grp", vec![1]), true, false)
        .unwrap();
    write_rows(&mut state, "x", &[0], vec![4.0]);
    assert!(!state.generate_update(AttributeFlags::PUBLISH).unwrap().is_empty());

    state.reset_tracked_changes(AttributeFlags::PUBLISH).unwrap();
    assert!(state.generate_update(AttributeFlags::PUBLISH).unwrap().is_empty());
}
