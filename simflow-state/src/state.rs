use indexmap::IndexMap;
use simflow_data::{
    group_ids, AttributeData, Closeness, GeneralSection, GroupData, UpdateData, ID_KEY,
};
use simflow_errors::{invalid_data, AttributePath, SimError, SimResult};
use tracing::warn;

use crate::attribute::{Attribute, AttributeFlags, AttributeOptions};
use crate::data_mask::DataMask;
use crate::index::Index;
use crate::schema::{AttributeSchema, AttributeSpec};

/// A small numeric handle into the state's attribute arena.
///
/// Entity-group façades and model code hold handles, never references into
/// the state; the state remains the single owner of every attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeHandle(u32);

#[derive(Debug, Default)]
struct EntityGroupState {
    index: Index,
    optional: bool,
    attributes: IndexMap<String, AttributeHandle>,
}

/// The whole in-process world state: a three-level mapping from
/// `(dataset, entity group, attribute)` to [`Attribute`], with one shared
/// [`Index`] per entity group.
///
/// Invariants: every attribute column in a group has the group's index
/// length; all attributes of a group resize together when new ids arrive;
/// attribute names are unique within a group and re-registration ORs flags
/// without replacing data.
#[derive(Debug, Default)]
pub struct TrackedState {
    arena: Vec<Attribute>,
    datasets: IndexMap<String, IndexMap<String, EntityGroupState>>,
    schema: AttributeSchema,
    track_unknown: AttributeFlags,
}

impl TrackedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(schema: AttributeSchema) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }

    pub fn schema(&self) -> &AttributeSchema {
        &self.schema
    }

    /// Flags used to auto-register attributes (and their groups) appearing
    /// in updates without prior registration. Empty (the default) means
    /// unknown data is ignored.
    pub fn set_track_unknown(&mut self, flags: AttributeFlags) {
        self.track_unknown = flags;
    }

    /// Register an entity group. Idempotent.
    pub fn register_entity_group(&mut self, dataset: &str, entity_group: &str) {
        self.group_entry(dataset, entity_group);
    }

    /// Register an entity group that is considered ready even when its id
    /// set stays empty.
    pub fn register_optional_entity_group(&mut self, dataset: &str, entity_group: &str) {
        self.group_entry(dataset, entity_group).optional = true;
    }

    /// Register an attribute with default tolerances; see
    /// [`register_attribute_with`](Self::register_attribute_with).
    pub fn register_attribute(
        &mut self,
        dataset: &str,
        entity_group: &str,
        spec: &AttributeSpec,
        flags: AttributeFlags,
    ) -> AttributeHandle {
        self.register_attribute_with(dataset, entity_group, spec, flags, Closeness::default())
    }

    /// Register an attribute on a group (registering the group as needed).
    /// Registering a name that already exists ORs the new flags into the
    /// existing attribute and returns its handle; data is never replaced.
    pub fn register_attribute_with(
        &mut self,
        dataset: &str,
        entity_group: &str,
        spec: &AttributeSpec,
        flags: AttributeFlags,
        closeness: Closeness,
    ) -> AttributeHandle {
        self.register_entity_group(dataset, entity_group);
        let Self {
            arena, datasets, ..
        } = self;
        let group = datasets
            .get_mut(dataset)
            .and_then(|groups| groups.get_mut(entity_group))
            .expect("group registered above");
        if let Some(&handle) = group.attributes.get(&spec.name) {
            arena[handle.0 as usize].add_flags(flags);
            return handle;
        }
        let attribute = Attribute::with_options(
            spec.data_type.clone(),
            flags,
            closeness,
            AttributeOptions {
                enum_name: spec.enum_name.clone(),
                ..AttributeOptions::default()
            },
        );
        let handle = AttributeHandle(arena.len() as u32);
        arena.push(attribute);
        group.attributes.insert(spec.name.clone(), handle);
        handle
    }

    pub fn attribute(&self, handle: AttributeHandle) -> &Attribute {
        &self.arena[handle.0 as usize]
    }

    pub fn attribute_mut(&mut self, handle: AttributeHandle) -> &mut Attribute {
        &mut self.arena[handle.0 as usize]
    }

    pub fn attribute_handle(
        &self,
        dataset: &str,
        entity_group: &str,
        name: &str,
    ) -> Option<AttributeHandle> {
        self.datasets
            .get(dataset)?
            .get(entity_group)?
            .attributes
            .get(name)
            .copied()
    }

    pub fn get_attribute(
        &self,
        dataset: &str,
        entity_group: &str,
        name: &str,
    ) -> SimResult<&Attribute> {
        self.attribute_handle(dataset, entity_group, name)
            .map(|handle| self.attribute(handle))
            .ok_or_else(|| SimError::AttributeNotFound { name: name.into() })
    }

    pub fn get_attribute_mut(
        &mut self,
        dataset: &str,
        entity_group: &str,
        name: &str,
    ) -> SimResult<&mut Attribute> {
        let handle = self
            .attribute_handle(dataset, entity_group, name)
            .ok_or_else(|| SimError::AttributeNotFound { name: name.into() })?;
        Ok(self.attribute_mut(handle))
    }

    /// The id index of one entity group.
    pub fn index(&self, dataset: &str, entity_group: &str) -> Option<&Index> {
        Some(&self.datasets.get(dataset)?.get(entity_group)?.index)
    }

    /// The names of all registered datasets, in registration order.
    pub fn dataset_names(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }

    /// Apply one update payload. General-section metadata is processed
    /// before entity data, so enums and specials are in place when values
    /// arrive. Unknown datasets or groups are ignored unless track-unknown
    /// flags are configured.
    pub fn receive_update(
        &mut self,
        update: &UpdateData,
        is_initial: bool,
        process_undefined: bool,
    ) -> SimResult<()> {
        for (dataset, dataset_data) in &update.datasets {
            if let Some(general) = &update.general {
                self.process_general_section(dataset, general);
            }
            for (entity_group, group_data) in dataset_data {
                let known = self
                    .datasets
                    .get(dataset)
                    .is_some_and(|groups| groups.contains_key(entity_group));
                if !known {
                    if self.track_unknown.is_empty() {
                        continue;
                    }
                    self.register_entity_group(dataset, entity_group);
                }
                self.receive_group_update(
                    dataset,
                    entity_group,
                    group_data,
                    is_initial,
                    process_undefined,
                )?;
            }
        }
        Ok(())
    }

    /// Generate the sparse payload of all changes on attributes matching
    /// `flags` (usually [`AttributeFlags::PUBLISH`]). Groups without
    /// changes are omitted entirely.
    pub fn generate_update(&mut self, flags: AttributeFlags) -> SimResult<UpdateData> {
        let Self {
            arena, datasets, ..
        } = self;
        let mut update = UpdateData::default();
        for (dataset, groups) in datasets {
            for (entity_group, group_state) in groups {
                if let Some(data) = generate_group_update(arena, group_state, flags)? {
                    update.insert_group(dataset, entity_group, data);
                }
            }
        }
        Ok(update)
    }

    /// The pub/sub declaration of this state, derived from attribute flags.
    /// Groups with nothing to declare on a side are omitted from that side.
    pub fn get_data_mask(&self) -> DataMask {
        let mut mask = DataMask::default();
        for (dataset, groups) in &self.datasets {
            for (entity_group, group_state) in groups {
                let side = |flags: AttributeFlags| -> Vec<String> {
                    group_state
                        .attributes
                        .iter()
                        .filter(|(_, &handle)| {
                            self.arena[handle.0 as usize].flags().intersects(flags)
                        })
                        .map(|(name, _)| name.clone())
                        .collect()
                };
                let published = side(AttributeFlags::PUBLISH);
                if !published.is_empty() {
                    mask.insert_publish(dataset, entity_group, published);
                }
                let subscribed = side(AttributeFlags::SUBSCRIBE);
                if !subscribed.is_empty() {
                    mask.insert_subscribe(dataset, entity_group, subscribed);
                }
            }
        }
        mask
    }

    /// Whether every attribute whose flags intersect `flags` is
    /// initialized. Optional groups with an empty id set are ready
    /// regardless of their attributes.
    pub fn is_ready_for(&self, flags: AttributeFlags) -> bool {
        self.iter_group_states()
            .filter(|(_, _, group)| !(group.optional && group.index.is_empty()))
            .flat_map(|(_, _, group)| group.attributes.values())
            .filter(|handle| self.arena[handle.0 as usize].flags().intersects(flags))
            .all(|handle| self.arena[handle.0 as usize].is_initialized())
    }

    /// Every uninitialized `dataset/group/attr` whose flags intersect
    /// `flags`, skipping optional groups with no ids. Used for readiness
    /// error reporting.
    pub fn uninitialized_attributes(&self, flags: AttributeFlags) -> Vec<AttributePath> {
        self.iter_group_states()
            .filter(|(_, _, group)| !(group.optional && group.index.is_empty()))
            .flat_map(|(dataset, entity_group, group)| {
                group
                    .attributes
                    .iter()
                    .map(move |(name, handle)| (dataset, entity_group, name.as_str(), *handle))
            })
            .filter(|(_, _, _, handle)| {
                let attribute = &self.arena[handle.0 as usize];
                attribute.flags().intersects(flags) && !attribute.is_initialized()
            })
            .map(|(dataset, entity_group, name, _)| AttributePath::new(dataset, entity_group, name))
            .collect()
    }

    /// Reset change tracking on all attributes matching the flag. The flag
    /// must be exactly SUBSCRIBE or PUBLISH.
    pub fn reset_tracked_changes(&mut self, flags: AttributeFlags) -> SimResult<()> {
        if flags != AttributeFlags::SUBSCRIBE && flags != AttributeFlags::PUBLISH {
            return Err(invalid_data!("flag must be SUBSCRIBE or PUBLISH"));
        }
        for attribute in &mut self.arena {
            if attribute.flags().intersects(flags) && attribute.has_data() {
                attribute.reset();
            }
        }
        Ok(())
    }

    /// Merge dataset-level metadata into this dataset's attributes: enums
    /// attach to attributes with a matching enum name, specials to
    /// `"<group>.<attr>"` keys. Conflicting re-assignment warns and keeps
    /// the first value. The section itself is not retained; the pass walks
    /// all currently registered attributes, so it must be re-run when it is
    /// seen again after new attributes appeared.
    pub fn process_general_section(&mut self, dataset: &str, section: &GeneralSection) {
        let Self {
            arena, datasets, ..
        } = self;
        let Some(groups) = datasets.get(dataset) else {
            return;
        };
        for (entity_group, group_state) in groups {
            for (name, handle) in &group_state.attributes {
                let attribute = &mut arena[handle.0 as usize];
                let key = format!("{entity_group}.{name}");
                if let Some(value) = section.special.get(&key) {
                    match &attribute.options().special {
                        Some(existing) if existing != value => {
                            warn!(
                                attribute = %format!("{dataset}/{entity_group}/{name}"),
                                "special value already set"
                            );
                        }
                        _ => attribute.options_mut().special = Some(value.clone()),
                    }
                }
                let enum_values = attribute
                    .options()
                    .enum_name
                    .as_ref()
                    .and_then(|enum_name| section.enums.get(enum_name));
                if let Some(values) = enum_values {
                    match &attribute.options().enum_values {
                        Some(existing) if existing != values => {
                            warn!(
                                attribute = %format!("{dataset}/{entity_group}/{name}"),
                                "enum already set"
                            );
                        }
                        _ => attribute.options_mut().enum_values = Some(values.clone()),
                    }
                }
            }
        }
    }

    /// Whether any attribute carries tracked changes.
    pub fn has_changes(&mut self) -> bool {
        self.arena.iter_mut().any(Attribute::has_changes)
    }

    /// The full state as one payload: ids plus every allocated attribute
    /// column of every group.
    pub fn dump(&self) -> UpdateData {
        let mut update = UpdateData::default();
        for (dataset, entity_group, group_state) in self.iter_group_states() {
            let mut group_data = GroupData::new();
            group_data.insert(
                ID_KEY.to_owned(),
                AttributeData::uniform(group_state.index.ids().to_vec()),
            );
            for (name, handle) in &group_state.attributes {
                if let Ok(data) = self.arena[handle.0 as usize].to_attribute_data() {
                    group_data.insert(name.clone(), data);
                }
            }
            update.insert_group(dataset, entity_group, group_data);
        }
        update
    }

    fn iter_group_states(&self) -> impl Iterator<Item = (&str, &str, &EntityGroupState)> {
        self.datasets.iter().flat_map(|(dataset, groups)| {
            groups
                .iter()
                .map(move |(name, group)| (dataset.as_str(), name.as_str(), group))
        })
    }

    fn group_entry(&mut self, dataset: &str, entity_group: &str) -> &mut EntityGroupState {
        self.datasets
            .entry(dataset.to_owned())
            .or_default()
            .entry(entity_group.to_owned())
            .or_default()
    }

    /// Apply one group's worth of update data; the group must exist.
    fn receive_group_update(
        &mut self,
        dataset: &str,
        entity_group: &str,
        data: &GroupData,
        is_initial: bool,
        process_undefined: bool,
    ) -> SimResult<()> {
        let track_unknown = self.track_unknown;
        let Self {
            arena, datasets, ..
        } = self;
        let group = datasets
            .get_mut(dataset)
            .and_then(|groups| groups.get_mut(entity_group))
            .expect("caller ensures the group exists");

        let ids = group_ids(data).ok_or_else(|| {
            invalid_data!("no ids provided")
                .with_path(AttributePath::new(dataset, entity_group, ID_KEY))
        })?;

        if is_initial {
            group.index.set_ids(ids)?;
            let len = group.index.len();
            for handle in group.attributes.values() {
                let attribute = &mut arena[handle.0 as usize];
                if !attribute.has_data() {
                    attribute.initialize(len)?;
                }
            }
        } else {
            let new_ids: Vec<i32> = ids
                .iter()
                .copied()
                .filter(|&id| group.index.query(id).is_none())
                .collect();
            if !new_ids.is_empty() {
                group.index.add_ids(&new_ids)?;
                let len = group.index.len();
                for handle in group.attributes.values() {
                    arena[handle.0 as usize].resize(len)?;
                }
            }
        }

        let rows = group.index.resolve_many(ids)?;
        for (name, column) in data {
            if name == ID_KEY {
                continue;
            }
            let handle = match group.attributes.get(name) {
                Some(&handle) => handle,
                None if track_unknown.is_empty() => continue,
                None => {
                    let attribute = Attribute::new(column.infer_data_type(), track_unknown);
                    let handle = AttributeHandle(arena.len() as u32);
                    arena.push(attribute);
                    group.attributes.insert(name.clone(), handle);
                    handle
                }
            };
            let attribute = &mut arena[handle.0 as usize];
            if !attribute.has_data() {
                attribute.initialize(group.index.len())?;
            }
            attribute
                .update(column, &rows, process_undefined)
                .map_err(|e| e.with_path(AttributePath::new(dataset, entity_group, name)))?;
        }

        if is_initial {
            // Initial values are not changes.
            for handle in group.attributes.values() {
                arena[handle.0 as usize].reset();
            }
        }
        Ok(())
    }
}

fn generate_group_update(
    arena: &mut [Attribute],
    group: &EntityGroupState,
    flags: AttributeFlags,
) -> SimResult<Option<GroupData>> {
    let len = group.index.len();
    let mut all_changes = vec![false; len];
    let mut any_changes = false;
    for handle in group.attributes.values() {
        let attribute = &mut arena[handle.0 as usize];
        if !attribute.flags().intersects(flags) || !attribute.has_data() {
            continue;
        }
        for (row, changed) in attribute.changed()?.into_iter().enumerate() {
            if changed {
                all_changes[row] = true;
                any_changes = true;
            }
        }
    }
    if !any_changes {
        return Ok(None);
    }

    let mut data = GroupData::new();
    let ids: Vec<i32> = group
        .index
        .ids()
        .iter()
        .zip(&all_changes)
        .filter(|&(_, &changed)| changed)
        .map(|(&id, _)| id)
        .collect();
    data.insert(ID_KEY.to_owned(), AttributeData::uniform(ids));

    for (name, handle) in &group.attributes {
        let attribute = &mut arena[handle.0 as usize];
        if !attribute.flags().intersects(flags)
            || !attribute.has_data()
            || !attribute.has_changes()
        {
            continue;
        }
        data.insert(name.clone(), attribute.generate_update(Some(&all_changes))?);
    }
    Ok(Some(data))
}
