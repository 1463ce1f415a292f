//! Movement ledger read side
//!
//! The `notes` tree is append-mostly: notes are inserted at creation and
//! rewritten only by status transitions. Keys are uuid7 note ids, which sort
//! by creation time, so reverse iteration yields the newest-first ordering
//! audit review wants.

use crate::error::{NoteError, NoteResult};
use crate::note::{ExchangeNote, NoteStatus, SourceType, TransactionType};
use crate::stock::SYSTEM_POOL;
use std::collections::BTreeMap;

/// Optional axes for [`list_notes`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NoteFilter {
    pub status: Option<NoteStatus>,
    pub transaction_type: Option<TransactionType>,
}

impl NoteFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_status(status: NoteStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    fn matches(&self, note: &ExchangeNote) -> bool {
        self.status.is_none_or(|s| note.status == s)
            && self
                .transaction_type
                .is_none_or(|t| note.transaction_type == t)
    }
}

/// Axis for [`sum_finished`]: a `None` warehouse means the system pool.
#[derive(Debug, Clone, Copy)]
pub struct MovementQuery<'a> {
    pub product_code: &'a str,
    pub transaction_type: TransactionType,
    pub warehouse: Option<&'a str>,
    pub exclude_sources: &'a [SourceType],
}

pub(crate) fn load_note(notes: &sled::Tree, note_id: &str) -> NoteResult<ExchangeNote> {
    match notes.get(note_id)? {
        Some(bytes) => ExchangeNote::from_cbor(&bytes),
        None => Err(NoteError::not_found("exchange note", note_id)),
    }
}

/// All notes matching the filter, newest first.
pub(crate) fn list_notes(notes: &sled::Tree, filter: &NoteFilter) -> NoteResult<Vec<ExchangeNote>> {
    let mut out = Vec::new();
    for entry in notes.iter().rev() {
        let (_, bytes) = entry?;
        let note = ExchangeNote::from_cbor(&bytes)?;
        if filter.matches(&note) {
            out.push(note);
        }
    }
    Ok(out)
}

/// The location an import lands in: its destination warehouse, or the pool.
fn import_destination(note: &ExchangeNote) -> &str {
    note.destination_warehouse.as_deref().unwrap_or(SYSTEM_POOL)
}

/// Sum of item quantities across finished notes on the given axis.
///
/// An import is counted against its (effective) destination, an export
/// against its source warehouse. This is the aggregation primitive behind
/// "how much of product P does location L hold according to the ledger".
pub(crate) fn sum_finished(notes: &sled::Tree, query: &MovementQuery<'_>) -> NoteResult<u64> {
    let axis = query.warehouse.unwrap_or(SYSTEM_POOL);
    let mut total = 0u64;

    for entry in notes.iter() {
        let (_, bytes) = entry?;
        let note = ExchangeNote::from_cbor(&bytes)?;
        if note.status != NoteStatus::Finished
            || note.transaction_type != query.transaction_type
            || query.exclude_sources.contains(&note.source_type)
        {
            continue;
        }
        let touched = match note.transaction_type {
            TransactionType::Import => import_destination(&note) == axis,
            TransactionType::Export => note.source_warehouse.as_deref() == Some(axis),
        };
        if !touched {
            continue;
        }
        for item in &note.items {
            if item.product_code == query.product_code {
                total += item.quantity;
            }
        }
    }
    Ok(total)
}

/// Per-location signed deltas a single finished note contributes for one
/// product. Mirrors the reconciliation effect matrix.
fn effect_deltas(note: &ExchangeNote, product_code: &str, totals: &mut BTreeMap<String, i64>) {
    let mut bump = |location: &str, delta: i64| {
        *totals.entry(location.to_string()).or_insert(0) += delta;
    };

    for item in &note.items {
        if item.product_code != product_code {
            continue;
        }
        let q = item.quantity as i64;
        match (note.transaction_type, note.source_type) {
            (TransactionType::Import, SourceType::External) => bump(import_destination(note), q),
            (TransactionType::Import, SourceType::System) => {
                bump(SYSTEM_POOL, -q);
                bump(import_destination(note), q);
            }
            (TransactionType::Import, SourceType::Internal) => bump(import_destination(note), q),
            (TransactionType::Export, SourceType::External) => {
                if let Some(src) = note.source_warehouse.as_deref() {
                    bump(src, -q);
                }
            }
            (TransactionType::Export, SourceType::System) => {
                if let Some(src) = note.source_warehouse.as_deref() {
                    bump(src, -q);
                }
                bump(SYSTEM_POOL, q);
            }
            (TransactionType::Export, SourceType::Internal) => {
                if let Some(src) = note.source_warehouse.as_deref() {
                    bump(src, -q);
                }
            }
        }
    }
}

/// What the finished ledger says each location holds of a product.
pub(crate) fn ledger_totals(
    notes: &sled::Tree,
    product_code: &str,
) -> NoteResult<BTreeMap<String, i64>> {
    let mut totals = BTreeMap::new();
    for entry in notes.iter() {
        let (_, bytes) = entry?;
        let note = ExchangeNote::from_cbor(&bytes)?;
        if note.status == NoteStatus::Finished {
            effect_deltas(&note, product_code, &mut totals);
        }
    }
    Ok(totals)
}
