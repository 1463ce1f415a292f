//! Stock reconciliation: the materialized `(product, location)` projection
//!
//! Rows live in the `stock` tree keyed `product:location` with big-endian u64
//! values. The distinguished location [`SYSTEM_POOL`] holds stock not yet
//! assigned to a physical warehouse. All mutation happens through
//! [`apply_effects`], inside the same sled transaction that flips the note
//! status, so the projection can never drift from the ledger except through
//! outside interference; [`crate::service::NoteService::audit_product`]
//! detects exactly that.

use crate::catalog::{ProductRecord, ProductStatus};
use crate::error::{NoteError, NoteResult};
use crate::note::{ExchangeNote, SourceType, TransactionType};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use std::collections::BTreeMap;

/// Reserved location code for the virtual, warehouse-less pool. `@` keeps it
/// outside the space of real warehouse codes.
pub const SYSTEM_POOL: &str = "@system";

pub(crate) type TxResult<T> = Result<T, ConflictableTransactionError<NoteError>>;

pub(crate) fn abort<T>(err: NoteError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

pub(crate) fn stock_key(product: &str, location: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(product.len() + 1 + location.len());
    key.extend_from_slice(product.as_bytes());
    key.push(b':');
    key.extend_from_slice(location.as_bytes());
    key
}

fn decode_qty(bytes: &[u8]) -> NoteResult<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| NoteError::Codec("stock row is not a u64".to_string()))?;
    Ok(u64::from_be_bytes(arr))
}

/// Quantity at a location, read inside a transaction. Absent row means zero.
pub(crate) fn read(tree: &TransactionalTree, product: &str, location: &str) -> TxResult<u64> {
    match tree.get(stock_key(product, location))? {
        Some(bytes) => decode_qty(&bytes).map_err(ConflictableTransactionError::Abort),
        None => Ok(0),
    }
}

pub(crate) fn credit(
    tree: &TransactionalTree,
    product: &str,
    location: &str,
    quantity: u64,
) -> TxResult<u64> {
    let have = read(tree, product, location)?;
    let Some(total) = have.checked_add(quantity) else {
        return abort(NoteError::validation(format!(
            "stock of {product} at {location} would overflow"
        )));
    };
    tree.insert(stock_key(product, location), &total.to_be_bytes())?;
    Ok(total)
}

/// Guarded decrement: the availability check and the write share the
/// transaction, so concurrent completions cannot jointly overdraw a row.
/// Underflow aborts the whole transaction, it is never clamped.
pub(crate) fn debit(
    tree: &TransactionalTree,
    product: &str,
    location: &str,
    quantity: u64,
) -> TxResult<u64> {
    let have = read(tree, product, location)?;
    if have < quantity {
        return abort(NoteError::InsufficientStock {
            location: location.to_string(),
            product: product.to_string(),
            available: have,
            requested: quantity,
        });
    }
    let rest = have - quantity;
    if rest == 0 {
        tree.remove(stock_key(product, location))?;
    } else {
        tree.insert(stock_key(product, location), &rest.to_be_bytes())?;
    }
    Ok(rest)
}

fn require_warehouse(field: Option<&str>) -> TxResult<&str> {
    match field {
        Some(code) => Ok(code),
        None => abort(NoteError::validation("note is missing its warehouse field")),
    }
}

/// Move the product's total tracked quantity and refresh its derived status.
/// Only External movements call this.
fn adjust_total(products: &TransactionalTree, code: &str, delta: i64) -> TxResult<()> {
    let mut record = match products.get(code)? {
        Some(bytes) => {
            ProductRecord::from_cbor(&bytes).map_err(ConflictableTransactionError::Abort)?
        }
        None => return abort(NoteError::not_found("product", code)),
    };

    record.quantity = if delta >= 0 {
        match record.quantity.checked_add(delta as u64) {
            Some(q) => q,
            None => {
                return abort(NoteError::validation(format!(
                    "total quantity of {code} would overflow"
                )));
            }
        }
    } else {
        let take = delta.unsigned_abs();
        match record.quantity.checked_sub(take) {
            Some(q) => q,
            None => {
                return abort(NoteError::InsufficientStock {
                    location: "total".to_string(),
                    product: code.to_string(),
                    available: record.quantity,
                    requested: take,
                });
            }
        }
    };
    record.status = if record.quantity > 0 {
        ProductStatus::InStock
    } else {
        ProductStatus::OutOfStock
    };

    let bytes = record.to_cbor().map_err(ConflictableTransactionError::Abort)?;
    products.insert(code.as_bytes(), bytes)?;
    Ok(())
}

/// Apply one finished note's quantity effects.
///
/// Conservation: only the External arms touch the product total; System and
/// Internal movements relocate stock between the pool and warehouses.
pub(crate) fn apply_effects(
    stock: &TransactionalTree,
    products: &TransactionalTree,
    note: &ExchangeNote,
) -> TxResult<()> {
    for item in &note.items {
        let code = item.product_code.as_str();
        let quantity = item.quantity;

        match (note.transaction_type, note.source_type) {
            (TransactionType::Import, SourceType::External) => {
                let dest = note.destination_warehouse.as_deref().unwrap_or(SYSTEM_POOL);
                credit(stock, code, dest, quantity)?;
                adjust_total(products, code, quantity as i64)?;
            }
            (TransactionType::Import, SourceType::System) => {
                let dest = require_warehouse(note.destination_warehouse.as_deref())?;
                debit(stock, code, SYSTEM_POOL, quantity)?;
                credit(stock, code, dest, quantity)?;
            }
            // A transfer import credits its destination only; the linked
            // export note carries the source-side debit.
            (TransactionType::Import, SourceType::Internal) => {
                let dest = require_warehouse(note.destination_warehouse.as_deref())?;
                credit(stock, code, dest, quantity)?;
            }
            (TransactionType::Export, SourceType::External) => {
                let src = require_warehouse(note.source_warehouse.as_deref())?;
                debit(stock, code, src, quantity)?;
                adjust_total(products, code, -(quantity as i64))?;
            }
            (TransactionType::Export, SourceType::System) => {
                let src = require_warehouse(note.source_warehouse.as_deref())?;
                debit(stock, code, src, quantity)?;
                credit(stock, code, SYSTEM_POOL, quantity)?;
            }
            (TransactionType::Export, SourceType::Internal) => {
                let src = require_warehouse(note.source_warehouse.as_deref())?;
                debit(stock, code, src, quantity)?;
            }
        }
    }
    Ok(())
}

/// Non-transactional point read for the query surface.
pub(crate) fn on_hand(tree: &sled::Tree, product: &str, location: &str) -> NoteResult<u64> {
    match tree.get(stock_key(product, location))? {
        Some(bytes) => decode_qty(&bytes),
        None => Ok(0),
    }
}

/// Every location currently holding the product, with quantities.
pub(crate) fn product_locations(
    tree: &sled::Tree,
    product: &str,
) -> NoteResult<BTreeMap<String, u64>> {
    let mut prefix = Vec::with_capacity(product.len() + 1);
    prefix.extend_from_slice(product.as_bytes());
    prefix.push(b':');

    let mut out = BTreeMap::new();
    for entry in tree.scan_prefix(&prefix) {
        let (key, bytes) = entry?;
        let location = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
        out.insert(location, decode_qty(&bytes)?);
    }
    Ok(out)
}

/// One location's materialized quantity next to what the finished ledger says
/// it should be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub location: String,
    pub materialized: u64,
    pub ledger: i64,
}

/// Result of reconciling a product's projection against its ledger.
#[derive(Debug, Clone)]
pub struct AuditReport {
    pub product_code: String,
    pub entries: Vec<AuditEntry>,
}

impl AuditReport {
    pub fn consistent(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.ledger >= 0 && e.materialized == e.ledger as u64)
    }
}
