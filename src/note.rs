//! Exchange-note data model and status state machine
use crate::error::{NoteError, NoteResult};
use chrono::{DateTime, TimeZone, Utc};
use uuid7::uuid7;

/// Whether a note brings stock in or moves it out.
#[derive(Debug, Copy, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum TransactionType {
    #[n(0)]
    Import,
    #[n(1)]
    Export,
}

/// Where the moved goods originate.
///
/// `External` goods cross the system boundary and change the total tracked
/// quantity; `System` goods move between the virtual pool and a warehouse;
/// `Internal` goods move warehouse to warehouse. Only `External` movements may
/// change a product's total.
#[derive(Debug, Copy, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum SourceType {
    #[n(0)]
    External,
    #[n(1)]
    Internal,
    #[n(2)]
    System,
}

/// Approval status of a note. `Rejected` and `Finished` are absorbing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum NoteStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Accepted,
    #[n(2)]
    Rejected,
    #[n(3)]
    Finished,
}

/// The three review actions a manager can take on a note.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NoteAction {
    Approve,
    Reject,
    Complete,
}

impl NoteAction {
    pub fn as_str(self) -> &'static str {
        match self {
            NoteAction::Approve => "approve",
            NoteAction::Reject => "reject",
            NoteAction::Complete => "complete",
        }
    }
}

impl NoteStatus {
    /// The transition table. Anything not listed here is illegal, including
    /// every action on a terminal status.
    pub fn next(self, action: NoteAction) -> Option<NoteStatus> {
        match (self, action) {
            (NoteStatus::Pending, NoteAction::Approve) => Some(NoteStatus::Accepted),
            (NoteStatus::Pending, NoteAction::Reject) => Some(NoteStatus::Rejected),
            (NoteStatus::Accepted, NoteAction::Reject) => Some(NoteStatus::Rejected),
            (NoteStatus::Accepted, NoteAction::Complete) => Some(NoteStatus::Finished),
            (NoteStatus::Pending, NoteAction::Complete)
            | (NoteStatus::Accepted, NoteAction::Approve)
            | (NoteStatus::Rejected, _)
            | (NoteStatus::Finished, _) => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NoteStatus::Rejected | NoteStatus::Finished)
    }
}

impl core::fmt::Display for NoteStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            NoteStatus::Pending => "pending",
            NoteStatus::Accepted => "accepted",
            NoteStatus::Rejected => "rejected",
            NoteStatus::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// One product line inside an exchange note.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct NoteItem {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub product_code: String,
    #[n(2)]
    pub quantity: u64,
}

/// One approvable unit of inventory movement, with its items embedded so the
/// note persists as a single CBOR document.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ExchangeNote {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub transaction_type: TransactionType,
    #[n(2)]
    pub source_type: SourceType,
    #[n(3)]
    pub source_warehouse: Option<String>,
    #[n(4)]
    pub destination_warehouse: Option<String>,
    #[n(5)]
    pub status: NoteStatus,
    #[n(6)]
    pub created_by: String,
    #[n(7)]
    pub approved_by: Option<String>,
    #[n(8)]
    pub date: TimeStamp<Utc>,
    #[n(9)]
    pub items: Vec<NoteItem>,
    /// For a synthesized transfer export, the id of the import it mirrors.
    #[n(10)]
    pub linked_note: Option<String>,
}

impl ExchangeNote {
    pub fn to_cbor(&self) -> NoteResult<Vec<u8>> {
        minicbor::to_vec(self).map_err(|e| NoteError::Codec(e.to_string()))
    }

    pub fn from_cbor(bytes: &[u8]) -> NoteResult<Self> {
        minicbor::decode(bytes).map_err(|e| NoteError::Codec(e.to_string()))
    }
}

/// Builder for a new note, in draft form.
///
/// `validate` runs the field-level checks (the source-type matrix, item
/// sanity); existence checks against master data happen in the service where
/// the catalog is available.
#[derive(Debug, Default, Clone)]
pub struct NoteDraft {
    transaction_type: Option<TransactionType>,
    source_type: Option<SourceType>,
    source_warehouse: Option<String>,
    destination_warehouse: Option<String>,
    items: Vec<(String, u64)>,
}

/// A draft whose fields have passed the matrix checks.
#[derive(Debug, Clone)]
pub struct ValidatedDraft {
    pub transaction_type: TransactionType,
    pub source_type: SourceType,
    pub source_warehouse: Option<String>,
    pub destination_warehouse: Option<String>,
    pub items: Vec<(String, u64)>,
}

impl NoteDraft {
    pub fn import(source_type: SourceType) -> Self {
        Self {
            transaction_type: Some(TransactionType::Import),
            source_type: Some(source_type),
            ..Self::default()
        }
    }

    pub fn export(source_type: SourceType) -> Self {
        Self {
            transaction_type: Some(TransactionType::Export),
            source_type: Some(source_type),
            ..Self::default()
        }
    }

    pub fn source(mut self, warehouse_code: &str) -> Self {
        self.source_warehouse = Some(warehouse_code.to_string());
        self
    }

    pub fn destination(mut self, warehouse_code: &str) -> Self {
        self.destination_warehouse = Some(warehouse_code.to_string());
        self
    }

    pub fn item(mut self, product_code: &str, quantity: u64) -> Self {
        self.items.push((product_code.to_string(), quantity));
        self
    }

    pub fn validate(self) -> NoteResult<ValidatedDraft> {
        let transaction_type = self
            .transaction_type
            .ok_or_else(|| NoteError::validation("transaction type is not set"))?;
        let source_type = self
            .source_type
            .ok_or_else(|| NoteError::validation("source type is not set"))?;

        if self.items.is_empty() {
            return Err(NoteError::validation("note has no items"));
        }
        for (code, quantity) in &self.items {
            if *quantity == 0 {
                return Err(NoteError::validation(format!(
                    "item {code} has a zero quantity"
                )));
            }
        }

        match (transaction_type, source_type) {
            (TransactionType::Import, SourceType::External) => {
                if self.source_warehouse.is_some() {
                    return Err(NoteError::validation(
                        "an external import cannot name a source warehouse",
                    ));
                }
                // destination is optional: absent means the system pool
            }
            (TransactionType::Import, SourceType::System) => {
                if self.source_warehouse.is_some() {
                    return Err(NoteError::validation(
                        "a system-sourced import cannot name a source warehouse",
                    ));
                }
                if self.destination_warehouse.is_none() {
                    return Err(NoteError::validation(
                        "a system-sourced import requires a destination warehouse",
                    ));
                }
            }
            (TransactionType::Import, SourceType::Internal) => {
                match (&self.source_warehouse, &self.destination_warehouse) {
                    (Some(src), Some(dst)) if src == dst => {
                        return Err(NoteError::validation(
                            "transfer source and destination warehouses must differ",
                        ));
                    }
                    (Some(_), Some(_)) => {}
                    _ => {
                        return Err(NoteError::validation(
                            "a transfer requires both source and destination warehouses",
                        ));
                    }
                }
            }
            (TransactionType::Export, SourceType::External)
            | (TransactionType::Export, SourceType::System) => {
                if self.source_warehouse.is_none() {
                    return Err(NoteError::validation("an export requires a source warehouse"));
                }
                if self.destination_warehouse.is_some() {
                    return Err(NoteError::validation(
                        "an export cannot name a destination warehouse",
                    ));
                }
            }
            (TransactionType::Export, SourceType::Internal) => {
                return Err(NoteError::validation(
                    "internal exports are synthesized on transfer completion and cannot be created directly",
                ));
            }
        }

        Ok(ValidatedDraft {
            transaction_type,
            source_type,
            source_warehouse: self.source_warehouse,
            destination_warehouse: self.destination_warehouse,
            items: self.items,
        })
    }
}

impl ValidatedDraft {
    /// Materialize the draft as a pending note owned by `created_by`.
    /// uuid7 ids are time-ordered, so note keys iterate in creation order.
    pub fn into_note(self, created_by: &str) -> ExchangeNote {
        let items = self
            .items
            .into_iter()
            .map(|(product_code, quantity)| NoteItem {
                id: uuid7().to_string(),
                product_code,
                quantity,
            })
            .collect();

        ExchangeNote {
            id: uuid7().to_string(),
            transaction_type: self.transaction_type,
            source_type: self.source_type,
            source_warehouse: self.source_warehouse,
            destination_warehouse: self.destination_warehouse,
            status: NoteStatus::Pending,
            created_by: created_by.to_string(),
            approved_by: None,
            date: TimeStamp::new(),
            items,
            linked_note: None,
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }

    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}
