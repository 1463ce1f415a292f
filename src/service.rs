//! Service layer for the exchange-note workflow
//!
//! Every multi-step mutation runs inside a single sled transaction across the
//! trees it touches. Status transitions re-read the note inside that
//! transaction, so a lost race surfaces as `InvalidTransition` instead of a
//! silent double-apply, and availability guards share the transaction with
//! the decrement they guard.

use crate::actor::Actor;
use crate::catalog::Catalog;
use crate::error::{NoteError, NoteResult};
use crate::ledger::{self, MovementQuery, NoteFilter};
use crate::note::{
    ExchangeNote, NoteAction, NoteDraft, NoteItem, NoteStatus, SourceType, TimeStamp,
    TransactionType,
};
use crate::stock::{self, AuditEntry, AuditReport, SYSTEM_POOL};
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::sync::Arc;
use tracing::{debug, info};
use uuid7::uuid7;

/// A note joined against master data for display.
#[derive(Debug, Clone)]
pub struct NoteView {
    pub note: ExchangeNote,
    pub source_warehouse_name: Option<String>,
    pub destination_warehouse_name: Option<String>,
    pub items: Vec<NoteItemView>,
}

#[derive(Debug, Clone)]
pub struct NoteItemView {
    pub product_code: String,
    pub product_name: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub quantity: u64,
}

/// Listing bucketed by status, newest first within each bucket.
#[derive(Debug, Default, Clone)]
pub struct GroupedNotes {
    pub pending: Vec<ExchangeNote>,
    pub accepted: Vec<ExchangeNote>,
    pub rejected: Vec<ExchangeNote>,
    pub finished: Vec<ExchangeNote>,
}

/// One product's on-hand line within a warehouse stock listing.
#[derive(Debug, Clone)]
pub struct StockLine {
    pub product_code: String,
    pub product_name: Option<String>,
    pub quantity: u64,
}

pub struct NoteService {
    db: Arc<sled::Db>,
    notes: sled::Tree,
    stock: sled::Tree,
    catalog: Catalog,
}

impl NoteService {
    pub fn open(db: Arc<sled::Db>) -> NoteResult<Self> {
        let notes = db.open_tree("notes")?;
        let stock = db.open_tree("stock")?;
        let catalog = Catalog::open(&db)?;
        Ok(Self {
            db,
            notes,
            stock,
            catalog,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn flush(&self) -> NoteResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Create a pending note with its items, as one atomic unit.
    ///
    /// Field validation and master-data existence checks run before anything
    /// is written. A system-sourced import is additionally refused when the
    /// pool does not currently hold the requested quantities; the same guard
    /// runs again at completion.
    pub fn create_note(&self, draft: NoteDraft, actor: &Actor) -> NoteResult<ExchangeNote> {
        let checked = draft.validate()?;

        for (code, _) in &checked.items {
            if !self.catalog.product_exists(code)? {
                return Err(NoteError::not_found("product", code.clone()));
            }
        }
        for code in [&checked.source_warehouse, &checked.destination_warehouse]
            .into_iter()
            .flatten()
        {
            if !self.catalog.warehouse_exists(code)? {
                return Err(NoteError::not_found("warehouse", code.clone()));
            }
        }

        let note = checked.into_note(&actor.user_code);

        let result: Result<ExchangeNote, TransactionError<NoteError>> = (&self.notes, &self.stock)
            .transaction(|(notes, stock_view)| {
                if note.transaction_type == TransactionType::Import
                    && note.source_type == SourceType::System
                {
                    for item in &note.items {
                        let available = stock::read(stock_view, &item.product_code, SYSTEM_POOL)?;
                        if available < item.quantity {
                            return stock::abort(NoteError::InsufficientStock {
                                location: SYSTEM_POOL.to_string(),
                                product: item.product_code.clone(),
                                available,
                                requested: item.quantity,
                            });
                        }
                    }
                }

                let bytes = note.to_cbor().map_err(ConflictableTransactionError::Abort)?;
                notes.insert(note.id.as_bytes(), bytes)?;
                Ok(note.clone())
            });
        let created = result.map_err(NoteError::from)?;

        info!(
            note_id = %created.id,
            created_by = %actor.user_code,
            items = created.items.len(),
            "exchange note created"
        );
        Ok(created)
    }

    /// Gate a pending note: Pending to Accepted, recording the approver.
    /// Approval has no stock effects.
    pub fn approve(&self, note_id: &str, actor: &Actor) -> NoteResult<ExchangeNote> {
        self.review(note_id, actor, NoteAction::Approve)
    }

    /// Refuse a note: Pending or Accepted to Rejected. No stock effects.
    pub fn reject(&self, note_id: &str, actor: &Actor) -> NoteResult<ExchangeNote> {
        self.review(note_id, actor, NoteAction::Reject)
    }

    fn review(&self, note_id: &str, actor: &Actor, action: NoteAction) -> NoteResult<ExchangeNote> {
        if !actor.role.can_review() {
            return Err(NoteError::Unauthorized {
                user: actor.user_code.clone(),
                action: action.as_str(),
            });
        }

        let result: Result<ExchangeNote, TransactionError<NoteError>> =
            self.notes.transaction(|notes| {
                let bytes = notes.get(note_id.as_bytes())?.ok_or_else(|| {
                    ConflictableTransactionError::Abort(NoteError::not_found(
                        "exchange note",
                        note_id,
                    ))
                })?;
                let mut note =
                    ExchangeNote::from_cbor(&bytes).map_err(ConflictableTransactionError::Abort)?;

                let Some(next) = note.status.next(action) else {
                    return stock::abort(NoteError::InvalidTransition {
                        action: action.as_str(),
                        status: note.status,
                    });
                };
                note.status = next;
                note.approved_by = Some(actor.user_code.clone());

                let encoded = note.to_cbor().map_err(ConflictableTransactionError::Abort)?;
                notes.insert(note.id.as_bytes(), encoded)?;
                Ok(note)
            });
        let updated = result.map_err(NoteError::from)?;

        info!(
            note_id,
            status = %updated.status,
            reviewed_by = %actor.user_code,
            "exchange note reviewed"
        );
        Ok(updated)
    }

    /// Finish an accepted note and apply its quantity effects, exactly once.
    ///
    /// This is the only path that mutates stock. The status flip, every
    /// guarded stock movement, the product-total refresh, and (for transfers)
    /// the synthesized source-side export all commit or roll back together.
    pub fn complete(&self, note_id: &str, actor: &Actor) -> NoteResult<ExchangeNote> {
        if !actor.role.can_review() {
            return Err(NoteError::Unauthorized {
                user: actor.user_code.clone(),
                action: NoteAction::Complete.as_str(),
            });
        }

        type Done = (ExchangeNote, Option<ExchangeNote>);
        let result: Result<Done, TransactionError<NoteError>> =
            (&self.notes, &self.stock, &self.catalog.products).transaction(
                |(notes, stock_view, products)| {
                    let bytes = notes.get(note_id.as_bytes())?.ok_or_else(|| {
                        ConflictableTransactionError::Abort(NoteError::not_found(
                            "exchange note",
                            note_id,
                        ))
                    })?;
                    let mut note = ExchangeNote::from_cbor(&bytes)
                        .map_err(ConflictableTransactionError::Abort)?;

                    let Some(next) = note.status.next(NoteAction::Complete) else {
                        return stock::abort(NoteError::InvalidTransition {
                            action: NoteAction::Complete.as_str(),
                            status: note.status,
                        });
                    };

                    stock::apply_effects(stock_view, products, &note)?;

                    // Warehouse-to-warehouse transfer: emit the source-side
                    // export so every stock movement is backed by a finished
                    // note (the current stock of a warehouse stays fully
                    // explained by the notes touching it).
                    let mut companion = None;
                    if note.transaction_type == TransactionType::Import
                        && note.source_type == SourceType::Internal
                    {
                        let export = synthesize_transfer_export(&note);
                        stock::apply_effects(stock_view, products, &export)?;
                        let encoded =
                            export.to_cbor().map_err(ConflictableTransactionError::Abort)?;
                        notes.insert(export.id.as_bytes(), encoded)?;
                        companion = Some(export);
                    }

                    note.status = next;
                    let encoded = note.to_cbor().map_err(ConflictableTransactionError::Abort)?;
                    notes.insert(note.id.as_bytes(), encoded)?;
                    Ok((note, companion))
                },
            );
        let (completed, companion) = result.map_err(NoteError::from)?;

        info!(
            note_id = %completed.id,
            completed_by = %actor.user_code,
            transfer_export = companion.as_ref().map(|n| n.id.clone()),
            "exchange note completed, stock effects applied"
        );
        Ok(completed)
    }

    pub fn get_note(&self, note_id: &str) -> NoteResult<ExchangeNote> {
        ledger::load_note(&self.notes, note_id)
    }

    /// The note resolved against product and warehouse display names.
    pub fn note(&self, note_id: &str) -> NoteResult<NoteView> {
        let note = ledger::load_note(&self.notes, note_id)?;

        let source_warehouse_name = match note.source_warehouse.as_deref() {
            Some(code) => self.catalog.warehouse_display_name(code)?,
            None => None,
        };
        let destination_warehouse_name = match note.destination_warehouse.as_deref() {
            Some(code) => self.catalog.warehouse_display_name(code)?,
            None => None,
        };

        let mut items = Vec::with_capacity(note.items.len());
        for item in &note.items {
            let record = self.catalog.product(&item.product_code)?;
            items.push(NoteItemView {
                product_code: item.product_code.clone(),
                product_name: record.as_ref().map(|r| r.name.clone()),
                size: record.as_ref().and_then(|r| r.size.clone()),
                color: record.as_ref().and_then(|r| r.color.clone()),
                quantity: item.quantity,
            });
        }

        Ok(NoteView {
            note,
            source_warehouse_name,
            destination_warehouse_name,
            items,
        })
    }

    /// Notes matching the filter, newest first.
    pub fn list(&self, filter: &NoteFilter) -> NoteResult<Vec<ExchangeNote>> {
        ledger::list_notes(&self.notes, filter)
    }

    pub fn list_grouped(&self) -> NoteResult<GroupedNotes> {
        let mut grouped = GroupedNotes::default();
        for note in ledger::list_notes(&self.notes, &NoteFilter::any())? {
            match note.status {
                NoteStatus::Pending => grouped.pending.push(note),
                NoteStatus::Accepted => grouped.accepted.push(note),
                NoteStatus::Rejected => grouped.rejected.push(note),
                NoteStatus::Finished => grouped.finished.push(note),
            }
        }
        Ok(grouped)
    }

    /// Current on-hand quantity of a product in a warehouse.
    pub fn on_hand(&self, warehouse_code: &str, product_code: &str) -> NoteResult<u64> {
        stock::on_hand(&self.stock, product_code, warehouse_code)
    }

    /// Current quantity of a product in the system pool.
    pub fn pool_quantity(&self, product_code: &str) -> NoteResult<u64> {
        stock::on_hand(&self.stock, product_code, SYSTEM_POOL)
    }

    /// Total tracked quantity of a product: pool plus every warehouse.
    pub fn tracked_total(&self, product_code: &str) -> NoteResult<u64> {
        Ok(stock::product_locations(&self.stock, product_code)?
            .values()
            .sum())
    }

    /// The ledger aggregation primitive: sum of finished item quantities on
    /// the given axis.
    pub fn sum_finished(&self, query: &MovementQuery<'_>) -> NoteResult<u64> {
        ledger::sum_finished(&self.notes, query)
    }

    /// Everything a warehouse currently holds, joined with product names.
    pub fn warehouse_stock(&self, warehouse_code: &str) -> NoteResult<Vec<StockLine>> {
        let mut lines = Vec::new();
        for entry in self.stock.iter() {
            let (key, _) = entry?;
            let key_str = String::from_utf8_lossy(&key);
            let Some((product_code, location)) = key_str.split_once(':') else {
                continue;
            };
            if location != warehouse_code {
                continue;
            }
            let quantity = stock::on_hand(&self.stock, product_code, location)?;
            if quantity == 0 {
                continue;
            }
            let record = self.catalog.product(product_code)?;
            lines.push(StockLine {
                product_code: product_code.to_string(),
                product_name: record.map(|r| r.name),
                quantity,
            });
        }
        debug!(warehouse_code, lines = lines.len(), "warehouse stock listed");
        Ok(lines)
    }

    /// Reconcile the materialized projection against the finished ledger.
    ///
    /// With all mutation flowing through `complete` the two cannot disagree;
    /// drift means the database was touched outside the workflow.
    pub fn audit_product(&self, product_code: &str) -> NoteResult<AuditReport> {
        let materialized = stock::product_locations(&self.stock, product_code)?;
        let from_ledger = ledger::ledger_totals(&self.notes, product_code)?;

        let mut locations: Vec<&String> = materialized.keys().collect();
        for loc in from_ledger.keys() {
            if !materialized.contains_key(loc) {
                locations.push(loc);
            }
        }

        let entries = locations
            .into_iter()
            .map(|location| AuditEntry {
                location: location.clone(),
                materialized: materialized.get(location).copied().unwrap_or(0),
                ledger: from_ledger.get(location).copied().unwrap_or(0),
            })
            .collect();

        Ok(AuditReport {
            product_code: product_code.to_string(),
            entries,
        })
    }
}

/// Build the finished source-side export mirroring a transfer import. It
/// carries the import's items, creator, and approver, and links back to the
/// import id.
fn synthesize_transfer_export(import: &ExchangeNote) -> ExchangeNote {
    ExchangeNote {
        id: uuid7().to_string(),
        transaction_type: TransactionType::Export,
        source_type: SourceType::Internal,
        source_warehouse: import.source_warehouse.clone(),
        destination_warehouse: None,
        status: NoteStatus::Finished,
        created_by: import.created_by.clone(),
        approved_by: import.approved_by.clone(),
        date: TimeStamp::new(),
        items: import
            .items
            .iter()
            .map(|item| NoteItem {
                id: uuid7().to_string(),
                product_code: item.product_code.clone(),
                quantity: item.quantity,
            })
            .collect(),
        linked_note: Some(import.id.clone()),
    }
}
