//! In-memory data service with fault injection.
//!
//! Implements [`MutationTransport`] over a cell map. Requests and responses
//! go through the CBOR codec, so the wire types are exercised on every
//! call. Faults are scripted up front and consumed in order.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use stratus_client::{run_async, MutationTransport, PendingOp, SharedQueue};
use stratus_protocol::{
    BulkMutationRequest, BulkMutationResponse, CellTimestamp, MutateRowRequest, Mutation,
    RowMutation, Status, StatusCode,
};

type CellKey = (Bytes, String, Bytes);

/// One stored cell version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellVersion {
    /// Timestamp in microseconds.
    pub timestamp: i64,
    /// Stored value.
    pub value: Bytes,
}

#[derive(Debug, Default)]
struct ServiceState {
    cells: BTreeMap<CellKey, Vec<CellVersion>>,
    clock: i64,
    refusals: u32,
    call_failures: VecDeque<StatusCode>,
    row_failures: HashMap<Bytes, (u32, StatusCode)>,
    truncations: VecDeque<usize>,
    applied: HashMap<Bytes, u32>,
    bulk_log: Vec<Vec<Bytes>>,
    bulk_calls: u32,
    unary_calls: u32,
}

fn internal(error: impl std::fmt::Display) -> Status {
    Status::internal(error.to_string())
}

impl ServiceState {
    fn next_timestamp(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    fn injected_row_failure(&mut self, row_key: &Bytes) -> Option<Status> {
        let (remaining, code) = self.row_failures.get_mut(row_key)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(Status::new(*code, "injected row failure"))
    }

    fn handle_bulk(&mut self, encoded: &[u8]) -> Result<BulkMutationResponse, Status> {
        let request = BulkMutationRequest::decode(encoded).map_err(internal)?;
        self.bulk_calls += 1;
        self.bulk_log
            .push(request.entries.iter().map(|e| e.row_key.clone()).collect());
        if let Some(code) = self.call_failures.pop_front() {
            return Err(Status::new(code, "injected call failure"));
        }

        let mut response = BulkMutationResponse::new();
        for (index, row) in request.entries.iter().enumerate() {
            let status = match self.injected_row_failure(&row.row_key) {
                Some(status) => status,
                None => self.apply_row(row).err().unwrap_or_else(Status::ok),
            };
            response = response.with_entry(index, status);
        }
        if let Some(keep) = self.truncations.pop_front() {
            response.entries.truncate(keep);
        }

        let bytes = response.encode().map_err(internal)?;
        BulkMutationResponse::decode(&bytes).map_err(internal)
    }

    fn handle_unary(&mut self, encoded: &[u8]) -> Result<(), Status> {
        let request = MutateRowRequest::decode(encoded).map_err(internal)?;
        self.unary_calls += 1;
        if let Some(code) = self.call_failures.pop_front() {
            return Err(Status::new(code, "injected call failure"));
        }
        if let Some(status) = self.injected_row_failure(&request.row.row_key) {
            return Err(status);
        }
        self.apply_row(&request.row)
    }

    /// Applies every mutation of `row` or none of them.
    fn apply_row(&mut self, row: &RowMutation) -> Result<(), Status> {
        let backup = self.cells.clone();
        for mutation in &row.mutations {
            if let Err(status) = self.apply_one(&row.row_key, mutation) {
                self.cells = backup;
                return Err(status);
            }
        }
        *self.applied.entry(row.row_key.clone()).or_default() += 1;
        Ok(())
    }

    fn apply_one(&mut self, row_key: &Bytes, mutation: &Mutation) -> Result<(), Status> {
        match mutation {
            Mutation::SetCell {
                family,
                column,
                timestamp,
                value,
            } => {
                let timestamp = match timestamp {
                    CellTimestamp::Micros(micros) => *micros,
                    CellTimestamp::ServerAssigned => self.next_timestamp(),
                };
                let versions = self
                    .cells
                    .entry((row_key.clone(), family.clone(), column.clone()))
                    .or_default();
                versions.retain(|v| v.timestamp != timestamp);
                versions.push(CellVersion {
                    timestamp,
                    value: value.clone(),
                });
                versions.sort_by_key(|v| std::cmp::Reverse(v.timestamp));
            }
            Mutation::Increment {
                family,
                column,
                delta,
            } => {
                let key = (row_key.clone(), family.clone(), column.clone());
                let current = match self.cells.get(&key).and_then(|v| v.first()) {
                    None => 0,
                    Some(cell) => {
                        let bytes: [u8; 8] = cell.value[..].try_into().map_err(|_| {
                            Status::new(
                                StatusCode::FailedPrecondition,
                                "increment target is not a 64-bit counter",
                            )
                        })?;
                        i64::from_be_bytes(bytes)
                    }
                };
                let timestamp = self.next_timestamp();
                self.cells.insert(
                    key,
                    vec![CellVersion {
                        timestamp,
                        value: Bytes::copy_from_slice(&current.wrapping_add(*delta).to_be_bytes()),
                    }],
                );
            }
            Mutation::DeleteFromColumn { family, column } => {
                self.cells
                    .remove(&(row_key.clone(), family.clone(), column.clone()));
            }
            Mutation::DeleteFromFamily { family } => {
                self.cells
                    .retain(|(row, fam, _), _| !(row == row_key && fam == family));
            }
            Mutation::DeleteFromRow => {
                self.cells.retain(|(row, _, _), _| row != row_key);
            }
        }
        Ok(())
    }
}

/// Data service double backed by memory.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataService {
    state: Arc<Mutex<ServiceState>>,
}

impl InMemoryDataService {
    /// Creates an empty service with no faults scheduled.
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` calls cannot be started.
    pub fn refuse_next_calls(&self, count: u32) -> &Self {
        self.state.lock().refusals += count;
        self
    }

    /// The next call fails as a whole with `code`, before applying anything.
    pub fn fail_next_call(&self, code: StatusCode) -> &Self {
        self.state.lock().call_failures.push_back(code);
        self
    }

    /// Entries for `row_key` fail with `code` the next `times` times.
    pub fn fail_row(&self, row_key: impl Into<Bytes>, times: u32, code: StatusCode) -> &Self {
        self.state
            .lock()
            .row_failures
            .insert(row_key.into(), (times, code));
        self
    }

    /// The next bulk response only reports its first `keep` entries; the
    /// rest are applied but their outcome is lost.
    pub fn truncate_next_response(&self, keep: usize) -> &Self {
        self.state.lock().truncations.push_back(keep);
        self
    }

    /// Latest value of a cell.
    pub fn cell(&self, row_key: &[u8], family: &str, column: &[u8]) -> Option<Bytes> {
        self.versions(row_key, family, column)
            .first()
            .map(|v| v.value.clone())
    }

    /// Every stored version of a cell, newest first.
    pub fn versions(&self, row_key: &[u8], family: &str, column: &[u8]) -> Vec<CellVersion> {
        let key = (
            Bytes::copy_from_slice(row_key),
            family.to_string(),
            Bytes::copy_from_slice(column),
        );
        self.state.lock().cells.get(&key).cloned().unwrap_or_default()
    }

    /// Value of a counter cell.
    pub fn counter(&self, row_key: &[u8], family: &str, column: &[u8]) -> Option<i64> {
        let value = self.cell(row_key, family, column)?;
        let bytes: [u8; 8] = value[..].try_into().ok()?;
        Some(i64::from_be_bytes(bytes))
    }

    /// Returns true if any cell of the row exists.
    pub fn row_exists(&self, row_key: &[u8]) -> bool {
        self.state
            .lock()
            .cells
            .keys()
            .any(|(row, _, _)| &row[..] == row_key)
    }

    /// Number of times a mutation of `row_key` was applied.
    pub fn applied_count(&self, row_key: &[u8]) -> u32 {
        self.state
            .lock()
            .applied
            .get(row_key)
            .copied()
            .unwrap_or(0)
    }

    /// Bulk calls received, including failed ones.
    pub fn bulk_calls(&self) -> u32 {
        self.state.lock().bulk_calls
    }

    /// Row keys of every bulk call received, in arrival order.
    pub fn bulk_log(&self) -> Vec<Vec<Bytes>> {
        self.state.lock().bulk_log.clone()
    }

    /// Unary calls received, including failed ones.
    pub fn unary_calls(&self) -> u32 {
        self.state.lock().unary_calls
    }

    fn take_refusal(&self) -> Option<Status> {
        let mut state = self.state.lock();
        if state.refusals == 0 {
            return None;
        }
        state.refusals -= 1;
        Some(Status::unavailable("connection refused"))
    }
}

impl MutationTransport for InMemoryDataService {
    fn mutate_row(
        &self,
        cq: &SharedQueue,
        request: MutateRowRequest,
    ) -> Result<PendingOp<()>, Status> {
        if let Some(status) = self.take_refusal() {
            return Err(status);
        }
        let encoded = request.encode().map_err(internal)?;
        let state = Arc::clone(&self.state);
        Ok(run_async(&**cq, async move {
            state.lock().handle_unary(&encoded)
        }))
    }

    fn mutate_rows(
        &self,
        cq: &SharedQueue,
        request: BulkMutationRequest,
    ) -> Result<PendingOp<BulkMutationResponse>, Status> {
        if let Some(status) = self.take_refusal() {
            return Err(status);
        }
        let encoded = request.encode().map_err(internal)?;
        let state = Arc::clone(&self.state);
        Ok(run_async(&**cq, async move {
            state.lock().handle_bulk(&encoded)
        }))
    }
}
