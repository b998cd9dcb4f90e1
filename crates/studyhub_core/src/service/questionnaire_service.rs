//! Questionnaire catalog over the external questionnaire collection.
//!
//! # Responsibility
//! - Answer "does questionnaire X exist" for referential checks.
//! - Offer put/import for local setups and bulk loads.
//!
//! # Invariants
//! - Ids are trimmed and uppercased before key derivation.
//! - `import_batch` processes every draft and never aborts on a failure.

use crate::codec::{self, Item};
use crate::context::{CancellationToken, Clock, RequestContext, SystemClock};
use crate::error::CoreResult;
use crate::keyspace::{EntityKey, EntityKind, QuestionnaireKey};
use crate::model::ids::{normalize_id, normalize_questionnaire_id};
use crate::model::questionnaire::{Questionnaire, QuestionnaireDraft};
use crate::repo::document_store::{DocumentStore, ItemWrite, ReadConsistency};
use crate::service::batch::BatchSummary;
use crate::service::common::{
    new_item, now, string_attr, ATTR_ID, ATTR_UPDATED_AT, ATTR_UPDATED_BY,
};
use log::{info, warn};
use std::sync::Arc;

const ATTR_NAME: &str = "name";
const ATTR_DEFINITION: &str = "definition";

/// Existence check against the questionnaire collection.
pub trait QuestionnaireLookup {
    fn questionnaire_exists(&self, id: &str, cancel: &CancellationToken) -> CoreResult<bool>;
}

impl<T: QuestionnaireLookup + ?Sized> QuestionnaireLookup for &T {
    fn questionnaire_exists(&self, id: &str, cancel: &CancellationToken) -> CoreResult<bool> {
        (**self).questionnaire_exists(id, cancel)
    }
}

/// Catalog service over a questionnaire collection store.
pub struct QuestionnaireService<S: DocumentStore> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: DocumentStore> QuestionnaireService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Creates or replaces one questionnaire.
    pub fn put(&self, ctx: &RequestContext, draft: &QuestionnaireDraft) -> CoreResult<Questionnaire> {
        let performed_by = ctx.require_researcher("write questionnaires")?;
        let id = normalize_id("questionnaire id", &draft.id)?.to_uppercase();
        let updated_at = now(self.clock.as_ref())?;

        let mut attributes = new_item(EntityKind::Questionnaire);
        attributes.insert(ATTR_ID.to_string(), string_attr(id.as_str()));
        attributes.insert(ATTR_NAME.to_string(), string_attr(draft.name.trim()));
        attributes.insert(ATTR_DEFINITION.to_string(), codec::encode(&draft.definition));
        attributes.insert(ATTR_UPDATED_AT.to_string(), string_attr(updated_at.as_str()));
        attributes.insert(ATTR_UPDATED_BY.to_string(), string_attr(performed_by));

        let write = ItemWrite {
            key: QuestionnaireKey::new(&id).primary_key(),
            index_keys: Vec::new(),
            attributes,
        };
        self.store.put(&write, None, ctx.cancellation())?;
        info!(
            "event=questionnaire_put module=questionnaire status=ok questionnaire_id={} performed_by={}",
            id, performed_by
        );

        Ok(Questionnaire {
            id,
            name: draft.name.trim().to_string(),
            definition: draft.definition.clone(),
            updated_at,
            updated_by: performed_by.to_string(),
        })
    }

    pub fn get(&self, ctx: &RequestContext, id: &str) -> CoreResult<Option<Questionnaire>> {
        let Some(id) = normalize_questionnaire_id(id) else {
            return Ok(None);
        };
        let item = self.store.get(
            &QuestionnaireKey::new(&id).primary_key(),
            ReadConsistency::Strong,
            ctx.cancellation(),
        )?;
        item.map(|item| decode_questionnaire(&item)).transpose()
    }

    /// Imports every draft, recording a per-item outcome.
    pub fn import_batch(
        &self,
        ctx: &RequestContext,
        drafts: &[QuestionnaireDraft],
    ) -> CoreResult<BatchSummary> {
        ctx.require_researcher("import questionnaires")?;
        ctx.ensure_active()?;
        let summary = drafts.iter().fold(BatchSummary::default(), |summary, draft| {
            let outcome = self.put(ctx, draft);
            if let Err(err) = &outcome {
                warn!(
                    "event=questionnaire_import module=questionnaire status=item_failed questionnaire_id={} error_kind={}",
                    draft.id.trim(),
                    err.kind().as_str()
                );
            }
            summary.record(draft.id.trim(), outcome)
        });
        info!(
            "event=questionnaire_import module=questionnaire status=ok processed={} successful={} failed={}",
            summary.processed, summary.successful, summary.failed
        );
        Ok(summary)
    }
}

impl<S: DocumentStore> QuestionnaireLookup for QuestionnaireService<S> {
    fn questionnaire_exists(&self, id: &str, cancel: &CancellationToken) -> CoreResult<bool> {
        let Some(id) = normalize_questionnaire_id(id) else {
            return Ok(false);
        };
        let item = self.store.get(
            &QuestionnaireKey::new(&id).primary_key(),
            ReadConsistency::Eventual,
            cancel,
        )?;
        Ok(item.is_some())
    }
}

fn decode_questionnaire(item: &Item) -> CoreResult<Questionnaire> {
    Ok(Questionnaire {
        id: codec::required_string(item, ATTR_ID)?,
        name: codec::optional_string(item, ATTR_NAME)?.unwrap_or_default(),
        definition: codec::structured(item, ATTR_DEFINITION)?,
        updated_at: codec::required_string(item, ATTR_UPDATED_AT)?,
        updated_by: codec::required_string(item, ATTR_UPDATED_BY)?,
    })
}
