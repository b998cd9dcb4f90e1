//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate document-store calls into use-case level APIs.
//! - Classify lost conditional writes into `NotFound` / `Conflict`.
//! - Keep boundary layers decoupled from keys and attribute layout.

pub mod batch;
pub(crate) mod common;
pub mod experiment_service;
pub mod membership_service;
pub mod protocol_session_service;
pub mod questionnaire_service;
pub mod response_service;
pub mod session_service;
pub mod task_service;
pub mod validation_service;
