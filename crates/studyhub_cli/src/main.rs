//! CLI smoke entry point.
//!
//! # Responsibility
//! - Load configuration, start logging and open the database.
//! - Print a deterministic health line for quick local checks.

use std::process::ExitCode;
use studyhub_core::{
    core_version, init_logging, ping, CoreConfig, ExperimentService, QuestionnaireService,
    RequestContext, SqliteDocumentStore,
};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("studyhub: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    let config = CoreConfig::from_env().map_err(|err| err.to_string())?;
    if let Some(log_dir) = config.log_dir.as_deref() {
        init_logging(config.log_level, log_dir).map_err(|err| err.to_string())?;
    }

    let conn = config.open_database().map_err(|err| err.to_string())?;
    let items = SqliteDocumentStore::study_items(&conn).map_err(|err| err.to_string())?;
    let questionnaires =
        SqliteDocumentStore::questionnaires(&conn).map_err(|err| err.to_string())?;
    let experiments = ExperimentService::new(items, QuestionnaireService::new(questionnaires));
    let count = experiments
        .list(&RequestContext::default())
        .map_err(|err| err.to_string())?
        .len();
    log::info!("event=cli_health module=cli status=ok experiments={count}");

    println!("studyhub_core ping={}", ping());
    println!("studyhub_core version={}", core_version());
    println!(
        "studyhub_core db={} experiments={count} local_mode={}",
        config
            .db_path
            .as_deref()
            .map_or_else(|| ":memory:".to_string(), |path| path.display().to_string()),
        config.local_mode
    );
    Ok(())
}
