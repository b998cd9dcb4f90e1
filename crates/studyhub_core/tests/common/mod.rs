#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use studyhub_core::{
    CallerIdentity, Clock, QuestionnaireDraft, QuestionnaireService, RequestContext,
    SqliteDocumentStore,
};
use rusqlite::Connection;
use serde_json::json;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

/// Deterministic clock advancing one millisecond per reading.
pub struct StepClock {
    start: OffsetDateTime,
    ticks: AtomicI64,
}

impl StepClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start: datetime!(2026-03-01 09:00 UTC),
            ticks: AtomicI64::new(0),
        })
    }
}

impl Clock for StepClock {
    fn now(&self) -> OffsetDateTime {
        self.start + Duration::milliseconds(self.ticks.fetch_add(1, Ordering::SeqCst))
    }
}

pub fn researcher() -> RequestContext {
    RequestContext::new(CallerIdentity::researcher("rita"))
}

pub fn participant(username: &str) -> RequestContext {
    RequestContext::new(CallerIdentity::participant(username))
}

pub fn catalog(conn: &Connection) -> QuestionnaireService<SqliteDocumentStore<'_>> {
    QuestionnaireService::new(SqliteDocumentStore::questionnaires(conn).unwrap())
}

pub fn seed_questionnaires(conn: &Connection, ids: &[&str]) {
    let catalog = catalog(conn);
    for id in ids {
        catalog
            .put(
                &researcher(),
                &QuestionnaireDraft::new(*id, format!("{id} form"), json!({ "items": [] })),
            )
            .unwrap();
    }
}
