//! Audit guard for requests the client abandons mid-flight.
//!
//! axum drops the handler future when the inbound connection goes away. The
//! guard owns the request's pending audit record; if it is dropped without
//! being disarmed, it writes that record as rejected with status 499 so the
//! request still leaves exactly one entry in the audit trail.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::audit::{AuditLogger, AuditRecord};
use crate::metrics;

/// nginx's "client closed request" status.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Owns a request's audit record until the normal path takes it back.
pub struct InFlightGuard {
    audit: Arc<AuditLogger>,
    record: Option<AuditRecord>,
    started: Instant,
}

impl InFlightGuard {
    pub fn new(audit: Arc<AuditLogger>, record: AuditRecord, started: Instant) -> Self {
        Self {
            audit,
            record: Some(record),
            started,
        }
    }

    /// Pending record, for filling in details as the request progresses.
    pub fn record_mut(&mut self) -> Option<&mut AuditRecord> {
        self.record.as_mut()
    }

    /// Take the record back; dropping the guard afterwards writes nothing.
    pub fn disarm(mut self) -> Option<AuditRecord> {
        self.record.take()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let Some(record) = self.record.take() else {
            return;
        };

        info!(
            method = %record.method,
            path = %record.path,
            client = %record.client_identity,
            "Client closed connection before response"
        );
        metrics::record_cancelled_request();

        let record = record.completed(
            CLIENT_CLOSED_REQUEST,
            self.started.elapsed(),
            "client closed request",
        );
        self.audit.record_rejected(record);
    }
}
