//! Experiment membership (enrollment) service.
//!
//! # Responsibility
//! - Add/remove participants in an experiment partition.
//! - Maintain the participant reverse-lookup entry for "my experiments".
//!
//! # Invariants
//! - Add is an unconditional upsert; the last write wins.
//! - Remove requires the row to exist.
//! - Listing filters run on the fetched rows.

use crate::codec::{self, Item};
use crate::context::{Clock, RequestContext, SystemClock};
use crate::error::{CoreError, CoreResult};
use crate::keyspace::{EntityKey, EntityKind, MembershipKey};
use crate::model::ids::normalize_id;
use crate::model::membership::{
    AddMemberRequest, MemberRole, MemberStatus, Membership, MembershipFilter,
    ParticipantExperiment,
};
use crate::repo::document_store::{Condition, DocumentStore, ItemWrite, StoreError};
use crate::service::batch::BatchSummary;
use crate::service::common::{new_item, now, string_attr};
use log::{info, warn};
use std::sync::Arc;

const ATTR_EXPERIMENT_ID: &str = "experimentId";
const ATTR_PARTICIPANT_ID: &str = "participantId";
const ATTR_ROLE: &str = "role";
const ATTR_STATUS: &str = "status";
const ATTR_COHORT: &str = "cohort";
const ATTR_ENROLLED_AT: &str = "enrolledAt";
const ATTR_ADDED_BY: &str = "addedBy";

pub struct MembershipService<S: DocumentStore> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: DocumentStore> MembershipService<S> {
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

    /// Reads the whole member partition, then applies `filter` in memory.
    pub fn list(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        filter: &MembershipFilter,
    ) -> CoreResult<Vec<Membership>> {
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        let items = self.store.query(
            &MembershipKey::experiment_members_query(&experiment_id),
            ctx.cancellation(),
        )?;
        let mut members = Vec::with_capacity(items.len());
        for item in &items {
            let membership = decode_membership(item)?;
            if filter.matches(&membership) {
                members.push(membership);
            }
        }
        Ok(members)
    }

    /// Experiments a participant is enrolled in, via the reverse-lookup index.
    pub fn list_for_participant(
        &self,
        ctx: &RequestContext,
        participant_id: &str,
    ) -> CoreResult<Vec<ParticipantExperiment>> {
        let participant_id = normalize_id("participant id", participant_id)?;
        self.store
            .query(
                &MembershipKey::participant_experiments_query(&participant_id),
                ctx.cancellation(),
            )?
            .iter()
            .map(|item| {
                let membership = decode_membership(item)?;
                Ok(ParticipantExperiment {
                    experiment_id: membership.experiment_id,
                    role: membership.role,
                    status: membership.status,
                    cohort: membership.cohort,
                    enrolled_at: membership.enrolled_at,
                })
            })
            .collect()
    }

    /// Writes (or overwrites) one membership row.
    pub fn add(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        participant_id: &str,
        request: &AddMemberRequest,
    ) -> CoreResult<Membership> {
        let performed_by = ctx.require_researcher("manage experiment members")?;
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        let participant_id = normalize_id("participant id", participant_id)?;
        let cohort = request
            .cohort
            .as_deref()
            .map(str::trim)
            .filter(|cohort| !cohort.is_empty())
            .map(str::to_string);
        let enrolled_at = now(self.clock.as_ref())?;

        let key = MembershipKey::new(&experiment_id, &participant_id);
        let mut attributes = new_item(EntityKind::Membership);
        attributes.insert(ATTR_EXPERIMENT_ID.to_string(), string_attr(experiment_id.as_str()));
        attributes.insert(ATTR_PARTICIPANT_ID.to_string(), string_attr(participant_id.as_str()));
        attributes.insert(ATTR_ROLE.to_string(), string_attr(request.role.as_str()));
        attributes.insert(ATTR_STATUS.to_string(), string_attr(request.status.as_str()));
        if let Some(cohort) = cohort.as_deref() {
            attributes.insert(ATTR_COHORT.to_string(), string_attr(cohort));
        }
        attributes.insert(ATTR_ENROLLED_AT.to_string(), string_attr(enrolled_at.as_str()));
        attributes.insert(ATTR_ADDED_BY.to_string(), string_attr(performed_by));

        let write = ItemWrite {
            key: key.primary_key(),
            index_keys: vec![key.participant_index()],
            attributes,
        };
        self.store.put(&write, None, ctx.cancellation())?;
        info!(
            "event=membership_add module=membership status=ok experiment_id={} participant_id={} role={} performed_by={}",
            experiment_id,
            participant_id,
            request.role.as_str(),
            performed_by
        );

        Ok(Membership {
            experiment_id,
            participant_id,
            role: request.role,
            status: request.status,
            cohort,
            enrolled_at,
            added_by: performed_by.to_string(),
        })
    }

    /// Adds every entry independently and reports per-item outcomes.
    pub fn add_many(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        entries: &[(String, AddMemberRequest)],
    ) -> CoreResult<BatchSummary> {
        ctx.require_researcher("manage experiment members")?;
        ctx.ensure_active()?;
        let summary = entries
            .iter()
            .fold(BatchSummary::default(), |summary, (participant_id, request)| {
                let outcome = self.add(ctx, experiment_id, participant_id, request);
                if let Err(err) = &outcome {
                    warn!(
                        "event=membership_add_many module=membership status=item_failed participant_id={} error_kind={}",
                        participant_id.trim(),
                        err.kind().as_str()
                    );
                }
                summary.record(participant_id.trim(), outcome)
            });
        info!(
            "event=membership_add_many module=membership status=ok experiment_id={} processed={} successful={} failed={}",
            experiment_id.trim(),
            summary.processed,
            summary.successful,
            summary.failed
        );
        Ok(summary)
    }

    /// Deletes one membership row; `NotFound` when it never existed.
    pub fn remove(
        &self,
        ctx: &RequestContext,
        experiment_id: &str,
        participant_id: &str,
    ) -> CoreResult<()> {
        let performed_by = ctx.require_researcher("manage experiment members")?;
        let experiment_id = normalize_id("experiment id", experiment_id)?;
        let participant_id = normalize_id("participant id", participant_id)?;
        let key = MembershipKey::new(&experiment_id, &participant_id).primary_key();

        match self
            .store
            .delete(&key, Some(&Condition::Exists), ctx.cancellation())
        {
            Ok(()) => {
                info!(
                    "event=membership_remove module=membership status=ok experiment_id={} participant_id={} performed_by={}",
                    experiment_id, participant_id, performed_by
                );
                Ok(())
            }
            Err(StoreError::ConditionFailed(_)) => Err(CoreError::not_found(
                EntityKind::Membership,
                format!("{experiment_id}/{participant_id}"),
            )),
            Err(err) => Err(err.into()),
        }
    }
}

fn decode_membership(item: &Item) -> CoreResult<Membership> {
    let raw_role = codec::required_string(item, ATTR_ROLE)?;
    let raw_status = codec::required_string(item, ATTR_STATUS)?;
    Ok(Membership {
        experiment_id: codec::required_string(item, ATTR_EXPERIMENT_ID)?,
        participant_id: codec::required_string(item, ATTR_PARTICIPANT_ID)?,
        role: MemberRole::parse(&raw_role)
            .ok_or_else(|| CoreError::Internal(format!("unknown member role `{raw_role}`")))?,
        status: MemberStatus::parse(&raw_status)
            .ok_or_else(|| CoreError::Internal(format!("unknown member status `{raw_status}`")))?,
        cohort: codec::optional_string(item, ATTR_COHORT)?,
        enrolled_at: codec::required_string(item, ATTR_ENROLLED_AT)?,
        added_by: codec::required_string(item, ATTR_ADDED_BY)?,
    })
}
