use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use simflow_data::{UpdateData, ID_KEY};

/// One side of a pub/sub declaration: dataset → entity group → attribute
/// names. `None` at the group or attribute level means "everything"; that
/// wildcard form is only produced by wildcard-subscriber tools, never by
/// [`TrackedState::get_data_mask`](crate::TrackedState::get_data_mask).
pub type Mask = IndexMap<String, GroupMask>;

/// The groups of one dataset in a mask; `None` means all groups.
pub type GroupMask = Option<IndexMap<String, AttrMask>>;

/// The attributes of one group in a mask; `None` means all attributes.
pub type AttrMask = Option<Vec<String>>;

/// The pub/sub declaration a model emits after setup so the orchestrator
/// can route only relevant updates.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataMask {
    #[serde(rename = "pub")]
    pub publish: Mask,
    #[serde(rename = "sub")]
    pub subscribe: Mask,
}

impl DataMask {
    pub fn insert_publish(&mut self, dataset: &str, entity_group: &str, attributes: Vec<String>) {
        insert(&mut self.publish, dataset, entity_group, attributes);
    }

    pub fn insert_subscribe(&mut self, dataset: &str, entity_group: &str, attributes: Vec<String>) {
        insert(&mut self.subscribe, dataset, entity_group, attributes);
    }
}

fn insert(mask: &mut Mask, dataset: &str, entity_group: &str, attributes: Vec<String>) {
    match mask
        .entry(dataset.to_owned())
        .or_insert_with(|| Some(IndexMap::new()))
    {
        // A dataset-level wildcard already covers the group.
        None => {}
        Some(groups) => {
            groups.insert(entity_group.to_owned(), Some(attributes));
        }
    }
}

/// Whether one mask side has the correct shape: lists inside maps inside a
/// map, with no empty collection below the top level. `None` for the whole
/// side means "everything" and is valid.
pub fn validate_mask(mask: Option<&Mask>) -> bool {
    let Some(mask) = mask else {
        return true;
    };
    mask.values().all(|group_mask| match group_mask {
        None => true,
        Some(groups) => {
            !groups.is_empty()
                && groups.values().all(|attrs| match attrs {
                    None => true,
                    Some(attrs) => !attrs.is_empty(),
                })
        }
    })
}

/// Apply one mask side to a payload, keeping only the masked datasets,
/// groups and attributes. The id column is always kept for surviving
/// groups. `None` masks pass data through unfiltered at their level.
pub fn filter_data(data: &UpdateData, mask: Option<&Mask>) -> UpdateData {
    let Some(mask) = mask else {
        return data.clone();
    };
    let mut filtered = UpdateData {
        general: data.general.clone(),
        ..UpdateData::default()
    };
    for (dataset, groups) in &data.datasets {
        let Some(group_mask) = mask.get(dataset) else {
            continue;
        };
        for (entity_group, group_data) in groups {
            let attr_mask = match group_mask {
                None => None,
                Some(group_mask) => match group_mask.get(entity_group) {
                    None => continue,
                    Some(attrs) => attrs.as_ref(),
                },
            };
            let kept = match attr_mask {
                None => group_data.clone(),
                Some(attrs) => group_data
                    .iter()
                    .filter(|(name, _)| name.as_str() == ID_KEY || attrs.contains(name))
                    .map(|(name, data)| (name.clone(), data.clone()))
                    .collect(),
            };
            filtered.insert_group(dataset, entity_group, kept);
        }
    }
    filtered
}

/// Whether a publisher's mask and a subscriber's mask share any attribute,
/// assuming both sides have been validated. `None` is the wildcard.
pub fn masks_overlap(publish: Option<&Mask>, subscribe: Option<&Mask>) -> bool {
    match (publish, subscribe) {
        (None, None) => true,
        (None, Some(mask)) | (Some(mask), None) => !mask.is_empty(),
        (Some(publish), Some(subscribe)) => publish.iter().any(|(dataset, pub_groups)| {
            let Some(sub_groups) = subscribe.get(dataset) else {
                return false;
            };
            match (pub_groups, sub_groups) {
                (None, _) | (_, None) => true,
                (Some(pub_groups), Some(sub_groups)) => {
                    pub_groups.iter().any(|(group, pub_attrs)| {
                        let Some(sub_attrs) = sub_groups.get(group) else {
                            return false;
                        };
                        match (pub_attrs, sub_attrs) {
                            (None, _) | (_, None) => true,
                            (Some(pub_attrs), Some(sub_attrs)) => {
                                pub_attrs.iter().any(|attr| sub_attrs.contains(attr))
                            }
                        }
                    })
                }
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use simflow_data::{AttributeData, GroupData};

    use super::*;

    fn mask(json: serde_json::Value) -> Mask {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn serializes_to_the_wire_shape() {
        let mut data_mask = DataMask::default();
        data_mask.insert_publish("ds", "grp", vec!["a".to_owned()]);
        assert_eq!(
            serde_json::to_value(&data_mask).unwrap(),
            serde_json::json!({"pub": {"ds": {"grp": ["a"]}}, "sub": {}})
        );
    }

    #[test]
    fn validation_rejects_empty_collections() {
        assert!(validate_mask(None));
        assert!(validate_mask(Some(&mask(serde_json::json!({})))));
        assert!(validate_mask(Some(&mask(
            serde_json::json!({"ds": {"grp": ["attr"]}})
        ))));
        assert!(validate_mask(Some(&mask(serde_json::json!({"ds": null})))));
        assert!(validate_mask(Some(&mask(
            serde_json::json!({"ds": {"grp": null}})
        ))));
        assert!(!validate_mask(Some(&mask(serde_json::json!({"ds": {}})))));
        assert!(!validate_mask(Some(&mask(
            serde_json::json!({"ds": {"grp": []}})
        ))));
    }

    #[test]
    fn filtering_keeps_id_column() {
        let mut group = GroupData::new();
        group.insert(ID_KEY.to_owned(), AttributeData::uniform(vec![1]));
        group.insert("a".to_owned(), AttributeData::uniform(vec![2]));
        group.insert("b".to_owned(), AttributeData::uniform(vec![3]));
        let mut data = UpdateData::default();
        data.insert_group("ds", "grp", group);

        let filtered = filter_data(&data, Some(&mask(serde_json::json!({"ds": {"grp": ["a"]}}))));
        let group = filtered.group("ds", "grp").unwrap();
        assert_eq!(
            group.keys().collect::<Vec<_>>(),
            vec![ID_KEY, "a"]
        );

        let dropped = filter_data(&data, Some(&mask(serde_json::json!({"other": null}))));
        assert!(dropped.group("ds", "grp").is_none());

        let wildcard = filter_data(&data, None);
        assert_eq!(wildcard.group("ds", "grp").unwrap().len(), 3);
    }

    #[test]
    fn overlap_with_wildcards() {
        let pub_mask = mask(serde_json::json!({"ds": {"grp": ["a"]}}));
        assert!(masks_overlap(Some(&pub_mask), None));
        assert!(masks_overlap(
            Some(&pub_mask),
            Some(&mask(serde_json::json!({"ds": null})))
        ));
        assert!(masks_overlap(
            Some(&pub_mask),
            Some(&mask(serde_json::json!({"ds": {"grp": ["a", "b"]}})))
        ));
        assert!(!masks_overlap(
            Some(&pub_mask),
            Some(&mask(serde_json::json!({"ds": {"grp": ["b"]}})))
        ));
        assert!(!masks_overlap(
            Some(&pub_mask),
            Some(&mask(serde_json::json!({"other": {"grp": ["a"]}})))
        ));
        assert!(!masks_overlap(Some(&mask(serde_json::json!({}))), None));
    }
}
