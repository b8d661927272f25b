use serde::{Deserialize, Serialize};
use simflow_codec::{dump_update, load_update, InitDataFormat};
use simflow_data::UpdateData;
use simflow_errors::{SimError, SimResult};
use simflow_state::{AttributeFlags, AttributeSchema, DataMask, TrackedState};
use tracing::debug;

use crate::init_data::{FileType, InitDataHandler};
use crate::messages::{NewTimeMessage, QuitMessage, UpdateMessage, UpdateSeriesMessage};
use crate::moment::{Moment, TimelineInfo};

/// Process-level configuration handed to a model during setup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Settings {
    pub timeline_info: Option<TimelineInfo>,
    /// Model-specific configuration, uninterpreted by the adapter.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// A simulation model driven by the [`ModelAdapter`].
///
/// Models are pure callbacks over the tracked state: they register their
/// entity groups and attributes during `setup`, read subscribed columns and
/// write published columns during `update`, and may schedule their next
/// wake-up by returning a moment.
pub trait TrackedModel {
    /// Register entity groups and attributes on the state. Called exactly
    /// once, before any data is applied.
    fn setup(&mut self, state: &mut TrackedState, settings: &Settings) -> SimResult<()>;

    /// Called once all INIT-flagged attributes have data. Returning
    /// [`SimError::NotReady`] defers initialization without failing the
    /// process; the adapter retries on a later `initialize` call.
    fn initialize(&mut self, state: &mut TrackedState) -> SimResult<()> {
        let _ = state;
        Ok(())
    }

    /// React to the world state at a timestamp; optionally return the next
    /// moment at which this model wants to be woken.
    fn update(&mut self, state: &mut TrackedState, moment: Moment) -> SimResult<Option<Moment>>;

    /// Simulation time has advanced; all updates for earlier times are in.
    fn new_time(&mut self, state: &mut TrackedState, moment: Moment) -> SimResult<()> {
        let _ = (state, moment);
        Ok(())
    }

    /// Teardown; called at most once.
    fn shutdown(&mut self, state: &mut TrackedState) -> SimResult<()> {
        let _ = state;
        Ok(())
    }
}

/// Drives a [`TrackedModel`] through its lifecycle: setup, initial-data
/// loading, readiness-gated initialization, per-timestamp updates with
/// pub/sub payload generation, new-time notifications and shutdown.
pub struct ModelAdapter<M> {
    model: M,
    state: TrackedState,
    settings: Settings,
    setup_done: bool,
    shutdown_done: bool,
    model_initialized: bool,
    model_ready_for_update: bool,
    next_time: Option<Moment>,
}

impl<M: TrackedModel> ModelAdapter<M> {
    pub fn new(model: M, settings: Settings) -> Self {
        Self::with_schema(model, settings, AttributeSchema::default())
    }

    pub fn with_schema(model: M, settings: Settings, schema: AttributeSchema) -> Self {
        Self {
            model,
            state: TrackedState::with_schema(schema),
            settings,
            setup_done: false,
            shutdown_done: false,
            model_initialized: false,
            model_ready_for_update: false,
            next_time: None,
        }
    }

    pub fn state(&self) -> &TrackedState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut TrackedState {
        &mut self.state
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn model_initialized(&self) -> bool {
        self.model_initialized
    }

    pub fn model_ready_for_update(&self) -> bool {
        self.model_ready_for_update
    }

    /// Apply all available initial datasets and, if every INIT-flagged
    /// attribute is defined, initialize the model. A model that is not
    /// ready yet stays uninitialized and is retried on the next call.
    ///
    /// Returns the pub/sub data mask for delivery to the orchestrator.
    pub fn initialize(&mut self, init_data: &dyn InitDataHandler) -> SimResult<DataMask> {
        self.ensure_setup()?;
        for dataset in self.state.dataset_names() {
            let Some((file_type, path)) = init_data.get(&dataset)? else {
                continue;
            };
            if file_type != FileType::Json {
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            let parsed = InitDataFormat::new(self.state.schema()).loads(&raw)?;
            self.state.receive_update(&parsed, true, false)?;
        }
        self.try_initialize()?;
        Ok(self.state.get_data_mask())
    }

    /// Handle one update message. Applies the payload (if any), runs the
    /// model when all REQUIRED attributes are defined, and returns the
    /// generated PUBLISH payload together with the model's next scheduled
    /// moment.
    ///
    /// A cascading update whose data was entirely filtered away skips the
    /// model call and returns the previously cached next time.
    pub fn update(
        &mut self,
        message: &UpdateMessage,
        data: Option<&[u8]>,
    ) -> SimResult<(Option<Vec<u8>>, Option<Moment>)> {
        self.ensure_setup()?;
        let payload = data.map(load_update).transpose()?;
        if let Some(payload) = &payload {
            if payload.is_empty() {
                debug!(timestamp = message.timestamp, "skipping empty update");
                return Ok((None, self.next_time));
            }
        }
        self.apply_and_run(payload.as_ref(), message.timestamp)
    }

    /// Handle a series of updates for one timestamp: apply every payload,
    /// then run the model once.
    pub fn update_series(
        &mut self,
        message: &UpdateSeriesMessage,
        data: &[Vec<u8>],
    ) -> SimResult<(Option<Vec<u8>>, Option<Moment>)> {
        self.ensure_setup()?;
        let timestamp = message.timestamp().unwrap_or(0);
        let mut applied_any = false;
        for bytes in data {
            let payload = load_update(bytes)?;
            if payload.is_empty() {
                continue;
            }
            self.state.receive_update(&payload, false, false)?;
            applied_any = true;
        }
        if !applied_any && !data.is_empty() {
            return Ok((None, self.next_time));
        }
        self.run_model(timestamp)
    }

    /// Handle a new-time notification. Requires the model to be initialized
    /// and ready for updates, except at the very beginning of the timeline.
    /// Resets SUBSCRIBE-side change tracking.
    pub fn new_time(&mut self, message: &NewTimeMessage) -> SimResult<()> {
        self.ensure_setup()?;
        let moment = Moment(message.timestamp);
        let timeline = self.settings.timeline_info.unwrap_or_default();
        let lifecycle_satisfied = self.model_initialized && self.model_ready_for_update;
        if !lifecycle_satisfied && !timeline.is_at_beginning(moment) {
            return Err(self.not_ready_error());
        }
        self.state
            .reset_tracked_changes(AttributeFlags::SUBSCRIBE)?;
        debug!(%moment, "new time");
        self.model.new_time(&mut self.state, moment)
    }

    /// Handle a quit message. On a normal quit the lifecycle flags must be
    /// satisfied; when quitting due to failure, teardown runs
    /// unconditionally. The model's shutdown runs at most once.
    pub fn close(&mut self, message: &QuitMessage) -> SimResult<()> {
        if !message.due_to_failure && !(self.model_initialized && self.model_ready_for_update) {
            return Err(self.not_ready_error());
        }
        if !self.shutdown_done {
            self.shutdown_done = true;
            self.model.shutdown(&mut self.state)?;
        }
        Ok(())
    }

    fn ensure_setup(&mut self) -> SimResult<()> {
        if !self.setup_done {
            self.model.setup(&mut self.state, &self.settings)?;
            self.setup_done = true;
        }
        Ok(())
    }

    fn try_initialize(&mut self) -> SimResult<()> {
        if self.model_initialized || !self.state.is_ready_for(AttributeFlags::INITIALIZE) {
            return Ok(());
        }
        match self.model.initialize(&mut self.state) {
            Ok(()) => {
                debug!("model initialized");
                self.model_initialized = true;
                Ok(())
            }
            // The model gets another chance after more data has arrived.
            Err(SimError::NotReady) => Ok(()),
            Err(other) => Err(other),
        }
    }

    fn apply_and_run(
        &mut self,
        payload: Option<&UpdateData>,
        timestamp: i64,
    ) -> SimResult<(Option<Vec<u8>>, Option<Moment>)> {
        if let Some(payload) = payload {
            self.state.receive_update(payload, false, false)?;
        }
        self.run_model(timestamp)
    }

    fn run_model(&mut self, timestamp: i64) -> SimResult<(Option<Vec<u8>>, Option<Moment>)> {
        if self.state.is_ready_for(AttributeFlags::REQUIRED) {
            let moment = Moment(timestamp);
            debug!(%moment, "running model update");
            self.next_time = self.model.update(&mut self.state, moment)?;
            self.model_ready_for_update = true;
        }
        let update = self.state.generate_update(AttributeFlags::PUBLISH)?;
        self.state.reset_tracked_changes(AttributeFlags::PUBLISH)?;
        let bytes = if update.is_empty() {
            None
        } else {
            Some(dump_update(&update)?)
        };
        Ok((bytes, self.next_time))
    }

    fn not_ready_error(&self) -> SimError {
        SimError::AttributesNotReady {
            paths: self
                .state
                .uninitialized_attributes(AttributeFlags::REQUIRED),
        }
    }
}
