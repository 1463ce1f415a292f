//! Races between concurrent completions
//!
//! Sled serializes conflicting transactions, so two completions can never
//! both pass their guards: either the second sees a finished note, or it
//! sees a drained stock row.

use exchange_note::actor::{Actor, Role};
use exchange_note::note::{NoteDraft, SourceType};
use exchange_note::service::NoteService;
use exchange_note::NoteError;
use std::sync::Arc;
use tempfile::tempdir;

fn open_service(dir: &tempfile::TempDir, name: &str) -> anyhow::Result<Arc<NoteService>> {
    let db = sled::open(dir.path().join(name))?;
    Ok(Arc::new(NoteService::open(Arc::new(db))?))
}

fn seed_fifty_units(service: &NoteService) -> anyhow::Result<()> {
    let catalog = service.catalog();
    catalog.register_product("PR0001", "Crewneck shirt", None, None)?;
    catalog.register_warehouse("WH0001", "North depot")?;

    let manager = Actor::new("US0001", Role::Manager);
    let note = service.create_note(
        NoteDraft::import(SourceType::External)
            .destination("WH0001")
            .item("PR0001", 50),
        &manager,
    )?;
    service.approve(&note.id, &manager)?;
    service.complete(&note.id, &manager)?;
    Ok(())
}

/// Scenario D: two accepted exports of 50 units race over a warehouse
/// holding exactly 50. Exactly one completes.
#[test]
fn racing_exports_cannot_overdraw() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let service = open_service(&dir, "racing_exports.db")?;
    seed_fifty_units(&service)?;

    let manager = Actor::new("US0001", Role::Manager);
    let mut ids = Vec::new();
    for _ in 0..2 {
        let note = service.create_note(
            NoteDraft::export(SourceType::External)
                .source("WH0001")
                .item("PR0001", 50),
            &manager,
        )?;
        service.approve(&note.id, &manager)?;
        ids.push(note.id);
    }

    let handles: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                let manager = Actor::new("US0001", Role::Manager);
                service.complete(&id, &manager)
            })
        })
        .collect();

    let results: Vec<Result<_, NoteError>> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "exactly one export may drain the warehouse");
    for result in &results {
        if let Err(err) = result {
            assert!(matches!(err, NoteError::InsufficientStock { .. }));
        }
    }

    assert_eq!(service.on_hand("WH0001", "PR0001")?, 0);
    assert_eq!(service.catalog().product("PR0001")?.unwrap().quantity, 0);
    Ok(())
}

/// Two threads completing the same note: the loser observes the finished
/// status, and the effect applies once.
#[test]
fn racing_completions_of_one_note_apply_once() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let service = open_service(&dir, "racing_same_note.db")?;
    seed_fifty_units(&service)?;

    let manager = Actor::new("US0001", Role::Manager);
    let note = service.create_note(
        NoteDraft::export(SourceType::External)
            .source("WH0001")
            .item("PR0001", 50),
        &manager,
    )?;
    service.approve(&note.id, &manager)?;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let service = Arc::clone(&service);
            let id = note.id.clone();
            std::thread::spawn(move || {
                let manager = Actor::new("US0001", Role::Manager);
                service.complete(&id, &manager)
            })
        })
        .collect();

    let results: Vec<Result<_, NoteError>> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "the effect must apply exactly once");
    for result in &results {
        if let Err(err) = result {
            assert!(matches!(err, NoteError::InvalidTransition { .. }));
        }
    }

    assert_eq!(service.on_hand("WH0001", "PR0001")?, 0);
    Ok(())
}
