//! Experiment use-case service.
//!
//! # Responsibility
//! - Create/update/delete experiments with referential checks.
//! - Drive the status state machine through one conditional update per call.
//! - Serve the newest-first listing from the collection index projection.
//!
//! # Invariants
//! - Create never overwrites an existing experiment.
//! - Update never touches status; transition never touches the payload.
//! - A lost conditional write is reported as `NotFound` when the item is
//!   absent and as `Conflict` when it exists in another state.

use crate::codec::{self, AttributeValue, Item};
use crate::context::{Clock, RequestContext, SystemClock};
use crate::error::{ConflictReason, CoreError, CoreResult};
use crate::keyspace::{EntityKey, EntityKind, ExperimentKey, PrimaryKey};
use crate::model::experiment::{
    resolve_status, Experiment, ExperimentData, ExperimentStatus, ExperimentSummary,
    NewExperiment, StatusSource, ValidationReport,
};
use crate::model::ids::normalize_id;
use crate::repo::document_store::{
    Condition, DocumentStore, ItemUpdate, ItemWrite, ReadConsistency, StoreError,
};
use crate::service::common::{
    generate_id, new_item, now, stamp_created, string_attr, ATTR_CREATED_AT, ATTR_CREATED_BY,
    ATTR_DATA, ATTR_ID, ATTR_UPDATED_AT, ATTR_UPDATED_BY,
};
use crate::service::questionnaire_service::QuestionnaireLookup;
use crate::service::validation_service::{ReferenceScope, ReferentialValidator};
use log::{info, warn};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

const ATTR_NAME: &str = "name";
const ATTR_DESCRIPTION: &str = "description";
const ATTR_STATUS: &str = "status";
/// Payload fields owned by the service rather than by callers.
const FIELD_QUESTIONNAIRE_IDS: &str = "questionnaireIds";
const FIELD_LEGACY_STATUS: &str = "status";

/// Experiment service facade over a document store and the questionnaire catalog.
pub struct ExperimentService<S: DocumentStore, Q: QuestionnaireLookup> {
    store: S,
    validator: ReferentialValidator<Q>,
    clock: Arc<dyn Clock>,
}

impl<S: DocumentStore, Q: QuestionnaireLookup> ExperimentService<S, Q> {
    pub fn new(store: S, questionnaires: Q) -> Self {
        Self {
            store,
            validator: ReferentialValidator::new(questionnaires),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the audit clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Lists experiment summaries newest-first from the index projection.
    pub fn list(&self, ctx: &RequestContext) -> CoreResult<Vec<ExperimentSummary>> {
        let query = ExperimentKey::listing_query().project(&[
            ATTR_ID,
            ATTR_NAME,
            ATTR_DESCRIPTION,
            ATTR_STATUS,
        ]);
        self.store
            .query(&query, ctx.cancellation())?
            .iter()
            .map(decode_summary)
            .collect()
    }

    /// Strongly consistent read; `Ok(None)` when the experiment is absent.
    pub fn get(&self, ctx: &RequestContext, experiment_id: &str) -> CoreResult<Option<Experiment>> {
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        let item = self.store.get(
            &ExperimentKey::new(&experiment_id).primary_key(),
            ReadConsistency::Strong,
            ctx.cancellation(),
        )?;
        item.map(|item| decode_experiment(&item)).transpose()
    }

    /// Creates a `Draft` experiment after checking every referenced questionnaire.
    pub fn create(&self, ctx: &RequestContext, request: &NewExperiment) -> CoreResult<Experiment> {
        let started_at = Instant::now();
        let performed_by = ctx.require_researcher("create experiments")?;
        let experiment_id = match request.id.as_deref() {
            Some(raw) => normalize_id("experiment id", raw)?,
            None => generate_id(),
        };
        check_payload(&request.data)?;
        let questionnaire_ids = self.validator.assert_valid(
            &request.data,
            ReferenceScope::SessionTypesAndSchedule,
            ctx.cancellation(),
        )?;

        let created_at = now(self.clock.as_ref())?;
        let key = ExperimentKey::new(&experiment_id);
        let mut attributes = new_item(EntityKind::Experiment);
        attributes.insert(ATTR_ID.to_string(), string_attr(experiment_id.as_str()));
        attributes.insert(ATTR_STATUS.to_string(), string_attr(ExperimentStatus::Draft.as_str()));
        insert_payload(&mut attributes, &request.data, &questionnaire_ids, None)?;
        stamp_created(&mut attributes, &created_at, performed_by);

        let write = ItemWrite {
            key: key.primary_key(),
            index_keys: vec![key.listing_index(&created_at)],
            attributes,
        };
        match self
            .store
            .put(&write, Some(&Condition::NotExists), ctx.cancellation())
        {
            Ok(()) => {}
            Err(StoreError::ConditionFailed(_)) => {
                warn!(
                    "event=experiment_create module=experiment status=conflict experiment_id={}",
                    experiment_id
                );
                return Err(CoreError::already_exists(EntityKind::Experiment, experiment_id));
            }
            Err(err) => return Err(err.into()),
        }

        info!(
            "event=experiment_create module=experiment status=ok experiment_id={} questionnaires={} performed_by={} duration_ms={}",
            experiment_id,
            questionnaire_ids.len(),
            performed_by,
            started_at.elapsed().as_millis()
        );
        decode_experiment(&write.attributes)
    }

    /// Replaces the payload of an existing experiment; status is left as is.
    pub fn update(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        data: &ExperimentData,
    ) -> CoreResult<Experiment> {
        let performed_by = ctx.require_researcher("update experiments")?;
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        check_payload(data)?;
        let questionnaire_ids =
            self.validator
                .assert_valid(data, ReferenceScope::SessionTypes, ctx.cancellation())?;

        let key = ExperimentKey::new(&experiment_id).primary_key();
        let Some(current) = self
            .store
            .get(&key, ReadConsistency::Strong, ctx.cancellation())?
        else {
            return Err(CoreError::not_found(EntityKind::Experiment, experiment_id));
        };
        // Rows that predate the top-level status keep their nested one.
        let legacy_status = nested_status(&current).map(str::to_string);

        let updated_at = now(self.clock.as_ref())?;
        let mut update = ItemUpdate::new(key)
            .set(ATTR_UPDATED_AT, string_attr(updated_at.as_str()))
            .set(ATTR_UPDATED_BY, string_attr(performed_by))
            .when(Condition::Exists);
        insert_payload(&mut update.set, data, &questionnaire_ids, legacy_status.as_deref())?;

        let item = match self.store.update(&update, ctx.cancellation()) {
            Ok(item) => item,
            Err(StoreError::ConditionFailed(_)) => {
                return Err(CoreError::not_found(EntityKind::Experiment, experiment_id));
            }
            Err(err) => return Err(err.into()),
        };
        info!(
            "event=experiment_update module=experiment status=ok experiment_id={} questionnaires={} performed_by={}",
            experiment_id,
            questionnaire_ids.len(),
            performed_by
        );
        decode_experiment(&item)
    }

    /// Hard-deletes the root record; sub-items are left in place.
    pub fn delete(&self, ctx: &RequestContext, experiment_id: &str) -> CoreResult<()> {
        let performed_by = ctx.require_researcher("delete experiments")?;
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        let key = ExperimentKey::new(&experiment_id).primary_key();
        match self
            .store
            .delete(&key, Some(&Condition::Exists), ctx.cancellation())
        {
            Ok(()) => {
                info!(
                    "event=experiment_delete module=experiment status=ok experiment_id={} performed_by={}",
                    experiment_id, performed_by
                );
                Ok(())
            }
            Err(StoreError::ConditionFailed(_)) => {
                Err(CoreError::not_found(EntityKind::Experiment, experiment_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Moves an experiment to `target` when its current status allows it.
    pub fn transition(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        target: ExperimentStatus,
    ) -> CoreResult<Experiment> {
        let performed_by = ctx.require_researcher("change experiment status")?;
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        if target == ExperimentStatus::Draft {
            return Err(CoreError::validation(
                "Draft is an initial status and cannot be a transition target",
            ));
        }

        let key = ExperimentKey::new(&experiment_id).primary_key();
        let updated_at = now(self.clock.as_ref())?;
        let update = ItemUpdate::new(key.clone())
            .set(ATTR_STATUS, string_attr(target.as_str()))
            .set(ATTR_UPDATED_AT, string_attr(updated_at.as_str()))
            .set(ATTR_UPDATED_BY, string_attr(performed_by))
            .when(transition_condition(target));

        let item = match self.store.update(&update, ctx.cancellation()) {
            Ok(item) => item,
            Err(StoreError::ConditionFailed(_)) => {
                let err = self.classify_lost_transition(ctx, &key, &experiment_id, target)?;
                warn!(
                    "event=experiment_transition module=experiment status={} experiment_id={} target={}",
                    err.kind().as_str(),
                    experiment_id,
                    target
                );
                return Err(err);
            }
            Err(err) => return Err(err.into()),
        };
        info!(
            "event=experiment_transition module=experiment status=ok experiment_id={} target={} performed_by={}",
            experiment_id, target, performed_by
        );
        decode_experiment(&item)
    }

    /// Dry-run referential check over session types and the schedule map.
    pub fn validate(&self, ctx: &RequestContext, data: &ExperimentData) -> CoreResult<ValidationReport> {
        self.validator.report(
            data,
            ReferenceScope::SessionTypesAndSchedule,
            ctx.cancellation(),
        )
    }

    fn classify_lost_transition(
        &self,
        ctx: &RequestContext,
        key: &PrimaryKey,
        experiment_id: &str,
        target: ExperimentStatus,
    ) -> CoreResult<CoreError> {
        let Some(current) = self
            .store
            .get(key, ReadConsistency::Strong, ctx.cancellation())?
        else {
            return Ok(CoreError::not_found(EntityKind::Experiment, experiment_id));
        };
        let (status, _) = current_status(&current, experiment_id)?;
        Ok(CoreError::Conflict {
            entity: EntityKind::Experiment,
            id: experiment_id.to_string(),
            reason: ConflictReason::InvalidTransition {
                attempted: target,
                current: status,
            },
        })
    }
}

/// Item exists and its effective status is one of the allowed sources.
///
/// The nested status is only consulted when the top-level one is missing.
fn transition_condition(target: ExperimentStatus) -> Condition {
    let allowed: Vec<AttributeValue> = target
        .allowed_sources()
        .iter()
        .flat_map(|status| {
            [
                AttributeValue::string(status.as_str()),
                AttributeValue::string(status.as_str().to_ascii_lowercase()),
            ]
        })
        .collect();

    Condition::And(vec![
        Condition::Exists,
        Condition::Or(vec![
            Condition::attribute_in(&[ATTR_STATUS], allowed.clone()),
            Condition::And(vec![
                Condition::attribute_missing(&[ATTR_STATUS]),
                Condition::attribute_in(&[ATTR_DATA, FIELD_LEGACY_STATUS], allowed),
            ]),
        ]),
    ])
}

/// Rejects payloads that are unnamed or that try to set service-owned fields.
fn check_payload(data: &ExperimentData) -> CoreResult<()> {
    if data.name.trim().is_empty() {
        return Err(CoreError::validation("experiment name must not be empty"));
    }
    let reserved: Vec<String> = [FIELD_LEGACY_STATUS, FIELD_QUESTIONNAIRE_IDS]
        .into_iter()
        .filter(|field| data.extra.contains_key(*field))
        .map(str::to_string)
        .collect();
    if !reserved.is_empty() {
        return Err(CoreError::Validation {
            message: "experiment data must not set service-owned fields".to_string(),
            offending_ids: reserved,
        });
    }
    Ok(())
}

/// Writes `data` plus its top-level name/description projection into `item`.
fn insert_payload(
    item: &mut Item,
    data: &ExperimentData,
    questionnaire_ids: &[String],
    legacy_status: Option<&str>,
) -> CoreResult<()> {
    let mut payload = match serde_json::to_value(data) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) => return Err(CoreError::Internal("experiment data is not an object".to_string())),
        Err(err) => return Err(CoreError::Internal(err.to_string())),
    };
    payload.insert(
        FIELD_QUESTIONNAIRE_IDS.to_string(),
        Value::from(questionnaire_ids.to_vec()),
    );
    if let Some(status) = legacy_status {
        payload.insert(FIELD_LEGACY_STATUS.to_string(), Value::from(status));
    }

    item.insert(ATTR_NAME.to_string(), string_attr(data.name.trim()));
    item.insert(ATTR_DESCRIPTION.to_string(), string_attr(data.description.as_str()));
    item.insert(ATTR_DATA.to_string(), codec::encode(&Value::Object(payload)));
    Ok(())
}

fn nested_status(item: &Item) -> Option<&str> {
    item.get(ATTR_DATA)?
        .as_map()?
        .get(FIELD_LEGACY_STATUS)?
        .as_str()
}

fn current_status(
    item: &Item,
    experiment_id: &str,
) -> CoreResult<(ExperimentStatus, StatusSource)> {
    let top_level = codec::optional_string(item, ATTR_STATUS)?;
    resolve_status(top_level.as_deref(), nested_status(item))
        .map_err(|err| CoreError::Internal(format!("experiment {experiment_id}: {err}")))
}

fn decode_experiment(item: &Item) -> CoreResult<Experiment> {
    let id = codec::required_string(item, ATTR_ID)?;
    let (status, status_source) = current_status(item, &id)?;

    let mut payload = match codec::structured(item, ATTR_DATA)? {
        Value::Object(fields) => fields,
        Value::Null => Map::new(),
        _ => {
            return Err(CoreError::Internal(format!(
                "experiment {id}: data attribute is not a map"
            )))
        }
    };
    let questionnaire_ids = match payload.remove(FIELD_QUESTIONNAIRE_IDS) {
        Some(ids) => serde_json::from_value(ids)
            .map_err(|err| CoreError::Internal(format!("experiment {id}: {err}")))?,
        None => Vec::new(),
    };
    payload.remove(FIELD_LEGACY_STATUS);
    let data: ExperimentData = serde_json::from_value(Value::Object(payload))
        .map_err(|err| CoreError::Internal(format!("experiment {id}: {err}")))?;

    Ok(Experiment {
        id,
        data,
        status,
        status_source,
        questionnaire_ids,
        created_at: codec::required_string(item, ATTR_CREATED_AT)?,
        created_by: codec::required_string(item, ATTR_CREATED_BY)?,
        updated_at: codec::required_string(item, ATTR_UPDATED_AT)?,
        updated_by: codec::required_string(item, ATTR_UPDATED_BY)?,
    })
}

fn decode_summary(item: &Item) -> CoreResult<ExperimentSummary> {
    let id = codec::required_string(item, ATTR_ID)?;
    let status = match codec::optional_string(item, ATTR_STATUS)? {
        Some(raw) => Some(ExperimentStatus::parse(&raw).ok_or_else(|| {
            CoreError::Internal(format!("experiment {id}: unknown status `{raw}`"))
        })?),
        None => None,
    };
    Ok(ExperimentSummary {
        name: codec::optional_string(item, ATTR_NAME)?.unwrap_or_default(),
        description: codec::optional_string(item, ATTR_DESCRIPTION)?.unwrap_or_default(),
        id,
        status,
    })
}
