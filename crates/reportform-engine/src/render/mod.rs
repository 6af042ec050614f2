//! Render engine: owns the session and orchestrates every operator action
//!
//! ```text
//! UiEvent → RenderEngine ─┬→ DependencyEngine (cascade) → tree patch
//!                         ├→ RepeatingListController      → tree patch
//!                         ├→ services (await)             → generation check → write back
//!                         └→ ValidationEngine             → SubmissionService
//! ```
//!
//! All state sits behind `&mut self`; the only suspension points are the
//! collaborator calls. Results that arrive for an older schema generation
//! are dropped.

pub mod tree;

pub use tree::{FieldNode, GroupNode, ItemNode, RenderContext, RenderTree, Widget};

use crate::cache::{CacheStats, DataSourceCache};
use crate::dependency::{Cascade, DependencyEngine, PendingLookup};
use crate::error::{
    EngineError, EngineResult, ListError, LookupError, SubmissionError, SubmitError, UploadError,
};
use crate::events::{EventQueue, UiEvent};
use crate::list::{LibraryTicket, RepeatingListController};
use crate::services::{ImageRef, ReloadSummary, Services, SubmissionReceipt};
use crate::state::FormState;
use crate::types::{Clock, DefaultsContext, EngineConfig, ItemId, SchemaGeneration, SystemClock};
use crate::validation::{ValidationEngine, ValidationReport};
use reportform_schema::{
    get_path, value_as_text, FieldDefinition, FieldType, Provenance, Schema, SelectOption,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Pending data-source fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    /// Generation at issue time
    pub generation: SchemaGeneration,
    /// Data source
    pub source_id: String,
}

/// Everything tied to one schema load
#[derive(Debug)]
pub struct Session {
    schema: Arc<Schema>,
    state: FormState,
    cache: DataSourceCache,
    generation: SchemaGeneration,
    validator: ValidationEngine,
    tree: RenderTree,
    source_options: HashMap<String, Vec<SelectOption>>,
    filters: HashMap<String, String>,
    empty_list_message: String,
}

impl Session {
    fn new(
        schema: Arc<Schema>,
        cache: DataSourceCache,
        generation: SchemaGeneration,
        config: &EngineConfig,
        defaults: &DefaultsContext,
    ) -> Self {
        let mut state = FormState::new();
        state.reset(&schema, defaults);

        let source_options = schema
            .data_sources()
            .iter()
            .filter_map(|ds| ds.inline_value().map(|v| (ds.id.clone(), options_from_payload(v))))
            .collect();
        let filters = HashMap::new();
        let tree = RenderTree::build(
            &schema,
            &state,
            &RenderContext {
                source_options: &source_options,
                filters: &filters,
                empty_list_message: &config.empty_list_message,
            },
        );
        Self {
            validator: ValidationEngine::new(&schema),
            schema,
            state,
            cache,
            generation,
            tree,
            source_options,
            filters,
            empty_list_message: config.empty_list_message.clone(),
        }
    }

    /// Active schema
    #[inline]
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Form state
    #[inline]
    #[must_use]
    pub fn state(&self) -> &FormState {
        &self.state
    }

    /// Render tree
    #[inline]
    #[must_use]
    pub fn tree(&self) -> &RenderTree {
        &self.tree
    }

    /// Generation of this load
    #[inline]
    #[must_use]
    pub fn generation(&self) -> SchemaGeneration {
        self.generation
    }

    /// Data-source cache
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &DataSourceCache {
        &self.cache
    }

    fn dependency(&self) -> (Arc<Schema>, SchemaGeneration) {
        (Arc::clone(&self.schema), self.generation)
    }

    fn patch(&mut self, keys: &[String]) -> Vec<String> {
        let ctx = RenderContext {
            source_options: &self.source_options,
            filters: &self.filters,
            empty_list_message: &self.empty_list_message,
        };
        self.tree.patch(&self.schema, &self.state, &ctx, keys)
    }

    fn rebuild(&mut self) {
        let ctx = RenderContext {
            source_options: &self.source_options,
            filters: &self.filters,
            empty_list_message: &self.empty_list_message,
        };
        self.tree.rebuild(&self.schema, &self.state, &ctx);
    }

    /// Field keys whose options come from `source_id`
    fn fields_using(&self, source_id: &str) -> Vec<String> {
        self.schema
            .fields()
            .iter()
            .filter(|f| {
                f.source.as_deref() == Some(source_id)
                    || f.list.as_ref().is_some_and(|l| {
                        l.columns.iter().any(|c| c.source.as_deref() == Some(source_id))
                    })
            })
            .map(|f| f.key.clone())
            .collect()
    }
}

/// Options from a data-source payload
///
/// Accepts an array of scalars or of objects with `value`/`label` (falling
/// back to `id`/`name`).
#[must_use]
pub fn options_from_payload(payload: &Value) -> Vec<SelectOption> {
    let items = match payload {
        Value::Array(items) => items.as_slice(),
        _ => return Vec::new(),
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(map) => {
                let value = ["value", "id", "name"]
                    .iter()
                    .find_map(|k| map.get(*k))
                    .map(value_as_text)?;
                let label = ["label", "name"]
                    .iter()
                    .find_map(|k| map.get(*k))
                    .map_or_else(|| value.clone(), value_as_text);
                Some(SelectOption { value, label })
            }
            Value::Null => None,
            scalar => {
                let text = value_as_text(scalar);
                Some(SelectOption {
                    value: text.clone(),
                    label: text,
                })
            }
        })
        .collect()
}

/// Orchestrator for one editing surface
pub struct RenderEngine {
    config: EngineConfig,
    services: Services,
    clock: Arc<dyn Clock>,
    session: Option<Session>,
    generation: SchemaGeneration,
    sequence: u32,
    last_patch: Vec<String>,
}

impl std::fmt::Debug for RenderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderEngine")
            .field("config", &self.config)
            .field("generation", &self.generation)
            .field("sequence", &self.sequence)
            .field("template", &self.session.as_ref().map(|s| s.schema.id().to_string()))
            .finish_non_exhaustive()
    }
}

impl RenderEngine {
    /// Create engine without a loaded template
    #[must_use]
    pub fn new(config: EngineConfig, services: Services) -> Self {
        Self {
            config,
            services,
            clock: Arc::new(SystemClock),
            session: None,
            generation: SchemaGeneration::default(),
            sequence: 1,
            last_patch: Vec::new(),
        }
    }

    /// Use `clock` for date defaults
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Engine configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Active session, if a template is loaded
    #[inline]
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn active(&self) -> EngineResult<&Session> {
        self.session.as_ref().ok_or(EngineError::NoSchema)
    }

    fn active_mut(&mut self) -> EngineResult<&mut Session> {
        self.session.as_mut().ok_or(EngineError::NoSchema)
    }

    /// Form state of the active session
    pub fn state(&self) -> EngineResult<&FormState> {
        Ok(&self.active()?.state)
    }

    /// Render tree of the active session
    pub fn tree(&self) -> EngineResult<&RenderTree> {
        Ok(&self.active()?.tree)
    }

    /// Current schema generation
    #[inline]
    #[must_use]
    pub fn generation(&self) -> SchemaGeneration {
        self.generation
    }

    /// Report sequence used by `{seq}` in auto-generated defaults
    #[inline]
    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Data-source cache statistics
    pub fn cache_stats(&self) -> EngineResult<CacheStats> {
        Ok(self.active()?.cache.stats())
    }

    /// Widget ids replaced by the last operation
    #[inline]
    #[must_use]
    pub fn last_patch(&self) -> &[String] {
        &self.last_patch
    }

    fn defaults_context(&self, template_id: &str) -> DefaultsContext {
        DefaultsContext::new(self.clock.today(), template_id, self.sequence)
    }

    fn install(&mut self, schema: Schema, cache: Option<DataSourceCache>) -> &RenderTree {
        self.generation = self.generation.next();
        let cache = cache.unwrap_or_else(|| {
            DataSourceCache::new(schema.id(), self.config.cache_capacity, self.config.cache_ttl())
        });
        let defaults = self.defaults_context(schema.id());
        let session = Session::new(Arc::new(schema), cache, self.generation, &self.config, &defaults);
        tracing::info!(
            "Template {} active ({})",
            session.schema.id(),
            self.generation
        );
        self.last_patch.clear();
        &self.session.insert(session).tree
    }

    /// Replace the session with one for `schema`
    ///
    /// Only inline data sources are resolved; see [`Self::load_template`] for
    /// the full load.
    pub fn load_schema(&mut self, schema: Schema) -> &RenderTree {
        self.install(schema, None)
    }

    /// Parse `document` and replace the session
    ///
    /// # Errors
    /// `EngineError::Schema` if the document does not load; the current
    /// session stays active.
    pub fn load_document(&mut self, document: &str) -> EngineResult<&RenderTree> {
        let schema = Schema::load(document)?;
        Ok(self.install(schema, None))
    }

    /// Fetch, load and render a template, then resolve its data sources
    ///
    /// # Errors
    /// - `EngineError::Template` if the template service fails
    /// - `EngineError::Schema` if the document does not load
    ///
    /// In both cases the current session stays active.
    pub async fn load_template(&mut self, template_id: &str) -> EngineResult<&RenderTree> {
        let document = self
            .services
            .templates
            .fetch_schema(template_id)
            .await
            .map_err(|e| EngineError::Template(e.to_string()))?;
        let schema = Schema::load(&document)?;
        self.install(schema, None);
        self.prefetch_sources().await;
        self.tree()
    }

    /// Reload templates and re-install the active one
    ///
    /// Bumps the generation and clears the data-source cache; tickets issued
    /// before the reload are discarded when they complete. A reload whose
    /// template fails to fetch or load leaves the session and its cache as
    /// they were.
    ///
    /// # Errors
    /// `EngineError::Template` / `EngineError::Schema` as for a load
    pub async fn hot_reload(&mut self) -> EngineResult<ReloadSummary> {
        let summary = self
            .services
            .templates
            .reload()
            .await
            .map_err(|e| EngineError::Template(e.to_string()))?;
        tracing::info!("Templates reloaded ({} available)", summary.loaded_count);

        let Some(session) = self.session.as_ref() else {
            return Ok(summary);
        };
        let template_id = session.schema.id().to_string();
        let cache = session.cache.clone();

        let document = self
            .services
            .templates
            .fetch_schema(&template_id)
            .await
            .map_err(|e| EngineError::Template(e.to_string()))?;
        let schema = Schema::load(&document)?;
        cache.invalidate_all();
        self.install(schema, Some(cache));
        self.prefetch_sources().await;
        Ok(summary)
    }

    async fn prefetch_sources(&mut self) {
        let Ok(session) = self.active() else {
            return;
        };
        let sources: Vec<String> = session
            .schema
            .data_sources()
            .iter()
            .filter(|ds| !matches!(ds.provenance, Provenance::Api { .. }))
            .filter(|ds| ds.inline_value().is_none())
            .map(|ds| ds.id.clone())
            .collect();
        for source_id in sources {
            if let Err(e) = self.data_source(&source_id).await {
                tracing::warn!("Data source {} unavailable: {}", source_id, e);
            }
        }
    }

    /// Start a data-source fetch
    ///
    /// # Errors
    /// `LookupError::UnknownSource` if the schema does not declare it
    pub fn begin_fetch(&self, source_id: &str) -> EngineResult<FetchTicket> {
        let session = self.active()?;
        if session.schema.data_source(source_id).is_none() {
            return Err(LookupError::UnknownSource(source_id.to_string()).into());
        }
        Ok(FetchTicket {
            generation: session.generation,
            source_id: source_id.to_string(),
        })
    }

    /// Deliver a fetch result
    ///
    /// # Errors
    /// - `LookupError::Stale` if the generation moved on; nothing is cached
    /// - the fetch error itself
    pub fn complete_fetch(
        &mut self,
        ticket: &FetchTicket,
        result: Result<Value, LookupError>,
    ) -> EngineResult<Value> {
        let session = self.active_mut()?;
        if ticket.generation != session.generation {
            tracing::debug!(
                "Discarding fetch of {} from {} (active {})",
                ticket.source_id,
                ticket.generation,
                session.generation
            );
            return Err(LookupError::Stale {
                ticket: ticket.generation.0,
                active: session.generation.0,
            }
            .into());
        }
        let payload = result?;
        session.cache.set(&ticket.source_id, payload.clone());
        session
            .source_options
            .insert(ticket.source_id.clone(), options_from_payload(&payload));
        let keys = session.fields_using(&ticket.source_id);
        self.last_patch = session.patch(&keys);
        Ok(payload)
    }

    /// Payload of a data source: inline value, cache, or a fetch
    ///
    /// # Errors
    /// - `LookupError::UnknownSource` for undeclared sources
    /// - the template service's error on a failed fetch
    pub async fn data_source(&mut self, source_id: &str) -> EngineResult<Value> {
        let session = self.active()?;
        let source = session
            .schema
            .data_source(source_id)
            .ok_or_else(|| LookupError::UnknownSource(source_id.to_string()))?;
        if let Some(value) = source.inline_value() {
            return Ok(value.clone());
        }
        if let Some(value) = session.cache.get(source_id) {
            return Ok(value);
        }

        let template_id = session.schema.id().to_string();
        let ticket = self.begin_fetch(source_id)?;
        let result = self
            .services
            .templates
            .fetch_data_source(&template_id, source_id)
            .await;
        self.complete_fetch(&ticket, result)
    }

    fn editable(&self, key: &str) -> EngineResult<&FieldDefinition> {
        let field = self
            .active()?
            .schema
            .field(key)
            .ok_or_else(|| EngineError::UnknownField(key.to_string()))?;
        if field.field_type.is_repeating() {
            return Err(ListError::NotAList(key.to_string()).into());
        }
        if field.readonly {
            return Err(EngineError::Readonly(key.to_string()));
        }
        Ok(field)
    }

    /// Write a field and run its cascade without resolving lookups
    ///
    /// The returned cascade's `lookups` are for the caller to resolve with
    /// [`Self::complete_lookup`].
    ///
    /// # Errors
    /// - `EngineError::UnknownField` / `EngineError::Readonly`
    /// - `ListError::NotAList` for repeating lists (use the item operations)
    pub fn apply_change(&mut self, key: &str, value: Value) -> EngineResult<Cascade> {
        self.editable(key)?;
        let session = self.active_mut()?;
        let (schema, generation) = session.dependency();
        let cascade = DependencyEngine::new(&schema)
            .with_generation(generation)
            .on_field_changed(&mut session.state, key, value);
        self.last_patch = session.patch(&cascade.changed);
        Ok(cascade)
    }

    /// Write a field, run its cascade and resolve the lookups it issued
    ///
    /// Lookup failures end up in `Cascade::warnings`; they never undo the
    /// write or block later edits.
    ///
    /// # Errors
    /// As [`Self::apply_change`]
    pub async fn set_field(&mut self, key: &str, value: Value) -> EngineResult<Cascade> {
        let cascade = self.apply_change(key, value)?;
        Ok(self.settle_lookups(cascade).await)
    }

    /// Run blur behaviors of a field and resolve their lookups
    ///
    /// # Errors
    /// `EngineError::UnknownField` for undeclared keys
    pub async fn blur_field(&mut self, key: &str) -> EngineResult<Cascade> {
        let session = self.active_mut()?;
        if !session.schema.contains(key) {
            return Err(EngineError::UnknownField(key.to_string()));
        }
        let (schema, generation) = session.dependency();
        let cascade = DependencyEngine::new(&schema)
            .with_generation(generation)
            .on_field_blurred(&mut session.state, key);
        self.last_patch = session.patch(&cascade.changed);
        Ok(self.settle_lookups(cascade).await)
    }

    /// Resolve every lookup of `cascade`, following lookups issued by the results
    ///
    /// Each endpoint/id pair is queried once per call.
    pub async fn settle_lookups(&mut self, mut cascade: Cascade) -> Cascade {
        let mut queue: VecDeque<PendingLookup> = cascade.lookups.iter().cloned().collect();
        let mut seen = HashSet::new();
        while let Some(lookup) = queue.pop_front() {
            if !seen.insert((lookup.endpoint.clone(), lookup.id.clone())) {
                continue;
            }
            let result = self
                .services
                .reference
                .lookup_entity(&lookup.endpoint, &lookup.id)
                .await;
            let follow = self.complete_lookup(&lookup, result);
            queue.extend(follow.lookups.iter().cloned());
            cascade.merge(follow);
        }
        cascade
    }

    /// Deliver a lookup result
    ///
    /// Each mapped path found in the result is written through the cascade of
    /// its target field. Failures and stale results leave every field as it
    /// was.
    pub fn complete_lookup(
        &mut self,
        lookup: &PendingLookup,
        result: Result<Value, LookupError>,
    ) -> Cascade {
        let mut cascade = Cascade::default();
        let Ok(session) = self.active_mut() else {
            return cascade;
        };
        if lookup.generation != session.generation {
            tracing::debug!(
                "Discarding {} lookup from {} (active {})",
                lookup.endpoint,
                lookup.generation,
                session.generation
            );
            return cascade;
        }
        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                let message = format!("{} lookup for '{}' failed: {}", lookup.endpoint, lookup.id, e);
                tracing::warn!("{}", message);
                cascade.warnings.push(message);
                return cascade;
            }
        };

        let (schema, generation) = session.dependency();
        let engine = DependencyEngine::new(&schema).with_generation(generation);
        for (target, path) in &lookup.result_mapping {
            match get_path(&payload, path) {
                Some(value) => {
                    cascade.merge(engine.on_field_changed(&mut session.state, target, value.clone()));
                }
                None => {
                    tracing::debug!("{} result has no '{}' for {}", lookup.endpoint, path, target);
                }
            }
        }
        self.last_patch = session.patch(&cascade.changed);
        cascade
    }

    fn list_follow_up(
        &mut self,
        list: &str,
        count_field: Option<String>,
    ) -> EngineResult<Cascade> {
        let session = self.active_mut()?;
        let (schema, generation) = session.dependency();
        let cascade = DependencyEngine::new(&schema)
            .with_generation(generation)
            .on_list_changed(&mut session.state, list, count_field.as_deref());
        self.last_patch = session.patch(&cascade.changed);
        Ok(cascade)
    }

    fn count_field(&self, list: &str) -> Option<String> {
        self.active()
            .ok()?
            .schema
            .field(list)?
            .list
            .as_ref()?
            .count_field
            .clone()
    }

    fn add_item_with_cascade(&mut self, list: &str) -> EngineResult<(ItemId, Cascade)> {
        let label_fallback = self.config.item_label_fallback.clone();
        let session = self.active_mut()?;
        let schema = Arc::clone(&session.schema);
        let id = RepeatingListController::new(&schema, &label_fallback)
            .add_item(&mut session.state, list)?;
        let cascade = self.list_follow_up(list, self.count_field(list))?;
        Ok((id, cascade))
    }

    /// Append a blank item to a repeating list
    ///
    /// # Errors
    /// `ListError::NotAList` if `list` is not a repeating list
    pub fn add_item(&mut self, list: &str) -> EngineResult<ItemId> {
        self.add_item_with_cascade(list).map(|(id, _)| id)
    }

    /// Remove one item
    ///
    /// # Errors
    /// `ListError::UnknownItem` if the item is not in the list
    pub fn remove_item(&mut self, list: &str, item: ItemId) -> EngineResult<Cascade> {
        let label_fallback = self.config.item_label_fallback.clone();
        let session = self.active_mut()?;
        let schema = Arc::clone(&session.schema);
        RepeatingListController::new(&schema, &label_fallback).remove_item(
            &mut session.state,
            list,
            item,
        )?;
        self.list_follow_up(list, self.count_field(list))
    }

    /// Move one item to `position`
    ///
    /// # Errors
    /// `ListError::UnknownItem` if the item is not in the list
    pub fn move_item(&mut self, list: &str, item: ItemId, position: usize) -> EngineResult<Cascade> {
        let label_fallback = self.config.item_label_fallback.clone();
        let session = self.active_mut()?;
        let schema = Arc::clone(&session.schema);
        RepeatingListController::new(&schema, &label_fallback).move_item(
            &mut session.state,
            list,
            item,
            position,
        )?;
        self.list_follow_up(list, None)
    }

    /// Write one cell of one item
    ///
    /// # Errors
    /// `ListError::UnknownItem` / `ListError::UnknownColumn`
    pub fn set_item_field(
        &mut self,
        list: &str,
        item: ItemId,
        column: &str,
        value: Value,
    ) -> EngineResult<Cascade> {
        let label_fallback = self.config.item_label_fallback.clone();
        let session = self.active_mut()?;
        let (schema, generation) = session.dependency();
        RepeatingListController::new(&schema, &label_fallback).set_item_field(
            &mut session.state,
            list,
            item,
            column,
            value,
        )?;
        let cascade = DependencyEngine::new(&schema)
            .with_generation(generation)
            .on_item_changed(&mut session.state, list, column);
        self.last_patch = session.patch(&cascade.changed);
        Ok(cascade)
    }

    /// Read one cell of one item
    ///
    /// # Errors
    /// `ListError::UnknownItem` if the item is not in the list
    pub fn item_field(&self, list: &str, item: ItemId, column: &str) -> EngineResult<Option<&Value>> {
        let session = self.active()?;
        let value = RepeatingListController::new(&session.schema, &self.config.item_label_fallback)
            .item_field(&session.state, list, item, column)?;
        Ok(value)
    }

    /// Start a library fill for one item
    ///
    /// # Errors
    /// `ListError::NoLibrary` / `ListError::UnknownItem`
    pub fn begin_library_fill(
        &self,
        list: &str,
        item: ItemId,
        entity_id: &str,
    ) -> EngineResult<LibraryTicket> {
        let session = self.active()?;
        let ticket = RepeatingListController::new(&session.schema, &self.config.item_label_fallback)
            .begin_library_fill(&session.state, session.generation, list, item, entity_id)?;
        Ok(ticket)
    }

    /// Deliver a library record; false when it was discarded
    pub fn complete_library_fill(&mut self, ticket: &LibraryTicket, record: &Value) -> bool {
        let label_fallback = self.config.item_label_fallback.clone();
        let Ok(session) = self.active_mut() else {
            return false;
        };
        let (schema, generation) = session.dependency();
        let Some(columns) = RepeatingListController::new(&schema, &label_fallback)
            .complete_library_fill(&mut session.state, generation, ticket, record)
        else {
            return false;
        };
        let engine = DependencyEngine::new(&schema).with_generation(generation);
        let mut cascade = Cascade::default();
        for column in &columns {
            cascade.merge(engine.on_item_changed(&mut session.state, &ticket.list_key, column));
        }
        self.last_patch = session.patch(&cascade.changed);
        true
    }

    /// Fill one item from its list's reference library
    ///
    /// Only that item is written; siblings are untouched however the list
    /// changed in between.
    ///
    /// # Errors
    /// - `ListError::NoLibrary` / `ListError::UnknownItem`
    /// - the lookup error; the item is left as it was
    pub async fn fill_item_from_library(
        &mut self,
        list: &str,
        item: ItemId,
        entity_id: &str,
    ) -> EngineResult<bool> {
        let ticket = self.begin_library_fill(list, item, entity_id)?;
        let record = self
            .services
            .reference
            .lookup_entity(&ticket.endpoint, &ticket.entity_id)
            .await
            .map_err(|e| {
                tracing::warn!("Library fill of {} in {} failed: {}", item, list, e);
                e
            })?;
        Ok(self.complete_library_fill(&ticket, &record))
    }

    fn image_target(&self, key: &str) -> EngineResult<&FieldDefinition> {
        let field = self
            .active()?
            .schema
            .field(key)
            .ok_or_else(|| EngineError::UnknownField(key.to_string()))?;
        match field.field_type {
            FieldType::Image | FieldType::ImageList => Ok(field),
            _ => Err(UploadError::NotAnImageField(key.to_string()).into()),
        }
    }

    /// Upload an image into an image or image-list field
    ///
    /// # Errors
    /// - `UploadError::NotAnImageField` / `UploadError::LimitReached`
    /// - `UploadError::Failed`; the field is left unset
    pub async fn upload_image(
        &mut self,
        key: &str,
        bytes: Vec<u8>,
        filename: &str,
    ) -> EngineResult<ImageRef> {
        let field = self.image_target(key)?;
        let (field_type, max) = (field.field_type, field.max_count);
        let existing: Vec<Value> = self
            .active()?
            .state
            .value(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if field_type == FieldType::ImageList && existing.len() >= max as usize {
            return Err(UploadError::LimitReached {
                field: key.to_string(),
                max,
            }
            .into());
        }

        let image = self
            .services
            .assets
            .upload_image(bytes, filename)
            .await
            .map_err(|e| {
                tracing::warn!("Upload of {} for {} failed: {}", filename, key, e);
                e
            })?;

        let value = if field_type == FieldType::ImageList {
            let mut images = existing;
            images.push(image.to_value());
            Value::Array(images)
        } else {
            image.to_value()
        };
        let session = self.active_mut()?;
        let (schema, generation) = session.dependency();
        let cascade = DependencyEngine::new(&schema)
            .with_generation(generation)
            .on_field_changed(&mut session.state, key, value);
        self.last_patch = session.patch(&cascade.changed);
        Ok(image)
    }

    /// Upload evidence into an image column of one item
    ///
    /// # Errors
    /// - `UploadError::NotAnImageField` if the column is not an image column
    /// - `ListError::UnknownItem` if the item is gone
    /// - `UploadError::Failed`; the item is left as it was
    pub async fn upload_item_image(
        &mut self,
        list: &str,
        item: ItemId,
        column: &str,
        bytes: Vec<u8>,
        filename: &str,
    ) -> EngineResult<ImageRef> {
        let column_type = self
            .active()?
            .schema
            .field(list)
            .and_then(|f| f.list.as_ref())
            .and_then(|l| l.column(column))
            .map(|c| c.field_type);
        if !matches!(column_type, Some(FieldType::Image | FieldType::ImageList)) {
            return Err(UploadError::NotAnImageField(format!("{list}.{column}")).into());
        }
        let existing = self.item_field(list, item, column)?.cloned();

        let image = self
            .services
            .assets
            .upload_image(bytes, filename)
            .await
            .map_err(|e| {
                tracing::warn!("Upload of {} for {} failed: {}", filename, item, e);
                e
            })?;

        let value = match (column_type, existing) {
            (Some(FieldType::ImageList), Some(Value::Array(mut images))) => {
                images.push(image.to_value());
                Value::Array(images)
            }
            (Some(FieldType::ImageList), _) => Value::Array(vec![image.to_value()]),
            _ => image.to_value(),
        };
        self.set_item_field(list, item, column, value)?;
        Ok(image)
    }

    /// Validate the active form
    ///
    /// # Errors
    /// `EngineError::NoSchema` without a loaded template
    pub fn validate(&self) -> EngineResult<ValidationReport> {
        let session = self.active()?;
        Ok(session.validator.validate(&session.schema, &session.state))
    }

    /// Validate and hand the flattened form to the submission service
    ///
    /// The form state is kept on every outcome. A successful submission
    /// advances the report sequence.
    ///
    /// # Errors
    /// - `SubmitError::Invalid` with the validation report
    /// - `SubmitError::Submission` with the service's message
    pub async fn submit(&mut self) -> EngineResult<SubmissionReceipt> {
        let report = self.validate()?;
        if !report.valid {
            return Err(SubmitError::Invalid(report).into());
        }
        let session = self.active()?;
        let template_id = session.schema.id().to_string();
        let payload = session.state.collect(&session.schema);

        let receipt = self
            .services
            .submission
            .generate(&template_id, payload)
            .await
            .map_err(|e| {
                tracing::error!("Report generation for {} failed: {}", template_id, e);
                SubmitError::from(e)
            })?;
        if !receipt.success {
            tracing::error!("Report generation for {} rejected: {}", template_id, receipt.message);
            return Err(SubmitError::from(SubmissionError::Rejected(receipt.message)).into());
        }
        self.sequence += 1;
        tracing::info!("Generated report {}", receipt.report_path);
        Ok(receipt)
    }

    /// Reinstate defaults; the data-source cache is kept
    ///
    /// # Errors
    /// `EngineError::NoSchema` without a loaded template
    pub fn reset(&mut self) -> EngineResult<Cascade> {
        let defaults = self.defaults_context(self.active()?.schema.id());
        let session = self.active_mut()?;
        let schema = Arc::clone(&session.schema);
        let cascade = session.state.reset(&schema, &defaults);
        session.rebuild();
        self.last_patch.clear();
        Ok(cascade)
    }

    /// Collapse or expand a group; returns the new collapsed flag
    ///
    /// # Errors
    /// `EngineError::UnknownGroup` for undeclared groups
    pub fn toggle_group(&mut self, group: &str) -> EngineResult<bool> {
        self.active_mut()?
            .tree
            .toggle_group(group)
            .ok_or_else(|| EngineError::UnknownGroup(group.to_string()))
    }

    /// Filter the options of a searchable field; returns the visible options
    ///
    /// # Errors
    /// `EngineError::UnknownField` for undeclared keys
    pub fn search(&mut self, key: &str, query: &str) -> EngineResult<Vec<SelectOption>> {
        let session = self.active_mut()?;
        if !session.schema.contains(key) {
            return Err(EngineError::UnknownField(key.to_string()));
        }
        session.filters.insert(key.to_string(), query.to_string());
        let keys = [key.to_string()];
        let patched = session.patch(&keys);
        let options = match session.tree.field(key).map(|n| &n.widget) {
            Some(Widget::Select { options, .. } | Widget::CheckboxGroup { options, .. }) => {
                options.clone()
            }
            _ => Vec::new(),
        };
        self.last_patch = patched;
        Ok(options)
    }

    /// Event queue with the configured search debounce
    #[must_use]
    pub fn event_queue(&self) -> EventQueue {
        EventQueue::new(self.config.search_debounce())
    }

    /// Handle one operator event to completion
    ///
    /// # Errors
    /// The error of the underlying operation
    pub async fn dispatch(&mut self, event: UiEvent) -> EngineResult<Cascade> {
        match event {
            UiEvent::FieldChanged { key, value } => self.set_field(&key, value).await,
            UiEvent::FieldBlurred { key } => self.blur_field(&key).await,
            UiEvent::AddItem { list } => self.add_item_with_cascade(&list).map(|(_, c)| c),
            UiEvent::RemoveItem { list, item } => self.remove_item(&list, item),
            UiEvent::MoveItem {
                list,
                item,
                position,
            } => self.move_item(&list, item, position),
            UiEvent::ItemFieldChanged {
                list,
                item,
                column,
                value,
            } => self.set_item_field(&list, item, &column, value),
            UiEvent::ToggleGroup { group } => self.toggle_group(&group).map(|_| Cascade::default()),
            UiEvent::Search { key, query } => self.search(&key, &query).map(|_| Cascade::default()),
            UiEvent::Reset => self.reset(),
        }
    }

    /// Handle every queued event in arrival order
    ///
    /// A failing event is logged and does not stop the ones after it.
    pub async fn process(&mut self, queue: &mut EventQueue) -> Vec<EngineResult<Cascade>> {
        let mut results = Vec::new();
        for event in queue.drain() {
            let result = self.dispatch(event).await;
            if let Err(e) = &result {
                tracing::warn!("Event failed: {}", e);
            }
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_options_accept_scalars_and_objects() {
        let options = options_from_payload(&json!([
            "高危",
            {"value": "m", "label": "中危"},
            {"id": 7, "name": "SQL注入"},
            null
        ]));
        assert_eq!(options.len(), 3);
        assert_eq!(options[0].label, "高危");
        assert_eq!(options[1].value, "m");
        assert_eq!(options[2].value, "7");
        assert_eq!(options[2].label, "SQL注入");
        assert!(options_from_payload(&json!({"a": 1})).is_empty());
    }
}
