//! Warehouse exchange-note workflow over an embedded sled database.
//!
//! Stock enters, leaves, and moves between warehouses through approvable
//! exchange notes. A note is created pending, gated by a manager, and only
//! on completion are its quantity effects applied, atomically with the
//! status flip. Current quantities live in a materialized projection that is
//! always updated in the same transaction as the ledger write; the finished
//! ledger remains the audit trail it can be reconciled against.

pub mod actor;
pub mod catalog;
pub mod error;
pub mod ledger;
pub mod note;
pub mod service;
pub mod stock;

pub use error::{NoteError, NoteResult};
pub use service::NoteService;
