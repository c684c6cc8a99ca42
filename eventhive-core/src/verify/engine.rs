//! Verification engine: decides whether a scanned ticket admits its holder.

use super::cooldown::CooldownGate;
use super::payload::{Payload, SignatureCheck};
use super::{Reason, Verdict};
use crate::config::ScannerConfig;
use crate::crypto::HmacSecret;
use crate::database::models::truncate_to_millis;
use crate::database::{Attendee, TicketStore};
use crate::remote::RemoteTicketStore;
use crate::DatabaseError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Outcome of the remote-first lookup.
enum RemoteLookup {
    /// Remote says the ticket was already used.
    CheckedIn(Attendee),
    /// Continue with the local store (remote record merged if there was one).
    Continue,
}

/// Per-scanner verification state machine.
///
/// Owns the cooldown gate, so one engine serves one scan stream. The remote
/// store is authoritative when reachable; the local store is used alone
/// when it is not.
pub struct VerificationEngine {
    store: TicketStore,
    remote: Option<Arc<dyn RemoteTicketStore>>,
    secret: HmacSecret,
    scanner_id: String,
    remote_timeout: Duration,
    cooldown: CooldownGate,
}

impl VerificationEngine {
    /// Create an offline engine with the default 2s cooldown.
    pub fn new(store: TicketStore, secret: HmacSecret, scanner_id: impl Into<String>) -> Self {
        Self {
            store,
            remote: None,
            secret,
            scanner_id: scanner_id.into(),
            remote_timeout: Duration::from_secs(8),
            cooldown: CooldownGate::new(Duration::from_secs(2)),
        }
    }

    /// Build an engine from scanner settings.
    pub fn from_config(
        config: &ScannerConfig,
        store: TicketStore,
        remote: Option<Arc<dyn RemoteTicketStore>>,
    ) -> Self {
        let engine = Self::new(store, config.hmac_secret.clone(), config.scanner_id.clone())
            .with_cooldown(config.cooldown())
            .with_remote_timeout(config.remote_timeout());
        match remote {
            Some(remote) => engine.with_remote(remote),
            None => engine,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteTicketStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_cooldown(mut self, window: Duration) -> Self {
        self.cooldown = CooldownGate::new(window);
        self
    }

    pub fn with_remote_timeout(mut self, remote_timeout: Duration) -> Self {
        self.remote_timeout = remote_timeout;
        self
    }

    pub fn scanner_id(&self) -> &str {
        &self.scanner_id
    }

    /// Verify one raw scan and apply its side effects.
    ///
    /// Scans inside the cooldown window are rejected without touching the
    /// store and do not extend the window; every other outcome restarts it.
    pub async fn verify(&mut self, raw: &str) -> Verdict {
        let payload = Payload::parse(raw);

        if let Some(remaining) = self.cooldown.remaining() {
            debug!("Scan of {} debounced ({:?} left)", payload.code(), remaining);
            return Verdict::rejected(Reason::Cooldown, payload.code());
        }

        let at = truncate_to_millis(Utc::now());
        let verdict = self.evaluate(&payload, at).await;
        self.cooldown.record_outcome();
        verdict
    }

    async fn evaluate(&self, payload: &Payload, at: DateTime<Utc>) -> Verdict {
        let code = payload.code();

        let signature_verified = match payload.signature_check(self.secret.as_bytes()) {
            SignatureCheck::Unsigned => false,
            SignatureCheck::Valid => {
                if let Payload::Signed { event_id, .. } = payload {
                    self.check_event(code, event_id);
                }
                true
            }
            SignatureCheck::Invalid => {
                warn!("Invalid signature for ticket {}", code);
                return Verdict::rejected(Reason::InvalidSignature, code);
            }
            SignatureCheck::Malformed(detail) => {
                warn!("Malformed signed payload for ticket {}: {}", code, detail);
                return Verdict::rejected(Reason::MalformedPayload, code).with_detail(detail);
            }
        };

        if code.is_empty() {
            return Verdict::rejected(Reason::NotFound, code);
        }

        if let RemoteLookup::CheckedIn(record) = self.lookup_remote(code).await {
            let checked_in_at = record.checked_in_at;
            info!("Ticket {} already checked in remotely", code);
            return Verdict::rejected(Reason::Duplicate, code)
                .with_checked_in_at(checked_in_at)
                .with_attendee(Some(record));
        }

        match self.commit_local(code, signature_verified, at).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("Storage error while verifying {}: {}", code, e);
                Verdict::rejected(Reason::StorageError, code).with_detail(e.to_string())
            }
        }
    }

    /// Warn when a validly signed ticket names an event other than the active one.
    fn check_event(&self, code: &str, event_id: &str) {
        match self.store.sync_metadata() {
            Ok(meta) => match meta.active_event_id.as_deref() {
                Some(active) if active != event_id => warn!(
                    "Ticket {} is signed for event {}, active event is {}",
                    code, event_id, active
                ),
                _ => {}
            },
            Err(e) => debug!("Could not read active event: {}", e),
        }
    }

    /// Consult the remote store and merge what it knows into the local one.
    async fn lookup_remote(&self, code: &str) -> RemoteLookup {
        let Some(remote) = &self.remote else {
            return RemoteLookup::Continue;
        };

        let lookup = timeout(self.remote_timeout, remote.fetch_attendee_by_code(code));
        let record = match lookup.await {
            Ok(Ok(Some(record))) => record.normalized(),
            Ok(Ok(None)) => {
                debug!("Ticket {} unknown remotely", code);
                return RemoteLookup::Continue;
            }
            Ok(Err(e)) => {
                warn!("Remote lookup failed, using local store: {}", e);
                return RemoteLookup::Continue;
            }
            Err(_) => {
                warn!(
                    "Remote lookup timed out after {:?}, using local store",
                    self.remote_timeout
                );
                return RemoteLookup::Continue;
            }
        };

        // The merge is last-write-wins, so a pending local check-in survives
        // an older unchecked remote row.
        if let Err(e) = self.store.upsert_attendees(std::slice::from_ref(&record)) {
            warn!("Failed to cache remote record for {}: {}", code, e);
        }

        if record.checked_in {
            RemoteLookup::CheckedIn(record)
        } else {
            RemoteLookup::Continue
        }
    }

    async fn commit_local(
        &self,
        code: &str,
        signature_verified: bool,
        at: DateTime<Utc>,
    ) -> Result<Verdict, DatabaseError> {
        let attendee = match self.store.get_attendee(code)? {
            Some(attendee) => attendee,
            None if signature_verified => return self.admit_unlisted(code, at).await,
            None => {
                info!("Ticket {} not found", code);
                return Ok(Verdict::rejected(Reason::NotFound, code));
            }
        };

        if attendee.checked_in {
            info!("Ticket {} already checked in", code);
            let checked_in_at = attendee.checked_in_at;
            return Ok(Verdict::rejected(Reason::Duplicate, code)
                .with_checked_in_at(checked_in_at)
                .with_attendee(Some(attendee)));
        }

        match self.store.record_check_in(code, &self.scanner_id, at)? {
            Some(scan_id) => {
                info!("Checked in {} ({}) as scan {}", code, attendee.name, scan_id);
                self.push_now(code, at).await;
                let attendee = self.store.get_attendee(code)?.or(Some(attendee));
                Ok(Verdict::accepted(Reason::CheckedIn, code)
                    .with_checked_in_at(Some(at))
                    .with_attendee(attendee))
            }
            None => {
                // Checked in between the lookup and the commit, or admitted
                // on its signature before the row was cached.
                let current = self.store.get_attendee(code)?;
                let checked_in_at = current.as_ref().and_then(|a| a.checked_in_at);
                Ok(Verdict::rejected(Reason::Duplicate, code)
                    .with_checked_in_at(checked_in_at)
                    .with_attendee(current))
            }
        }
    }

    async fn admit_unlisted(
        &self,
        code: &str,
        at: DateTime<Utc>,
    ) -> Result<Verdict, DatabaseError> {
        match self.store.record_unlisted_scan(code, &self.scanner_id, at)? {
            Some(scan_id) => {
                info!("Admitted signed ticket {} without a record as scan {}", code, scan_id);
                self.push_now(code, at).await;
                Ok(Verdict::accepted(Reason::SignatureOnly, code).with_checked_in_at(Some(at)))
            }
            None => {
                info!("Signed ticket {} was already admitted", code);
                Ok(Verdict::rejected(Reason::Duplicate, code))
            }
        }
    }

    /// Best-effort immediate push. Failures are left to the reconciler,
    /// which owns the `synced` flag.
    async fn push_now(&self, code: &str, at: DateTime<Utc>) {
        let Some(remote) = &self.remote else {
            return;
        };

        let push = async {
            remote.record_scan(code, &self.scanner_id, at).await?;
            remote.set_checked_in(code, at).await
        };
        match timeout(self.remote_timeout, push).await {
            Ok(Ok(())) => debug!("Pushed check-in of {} immediately", code),
            Ok(Err(e)) => warn!("Immediate push of {} failed, deferring to sync: {}", code, e),
            Err(_) => warn!("Immediate push of {} timed out, deferring to sync", code),
        }
    }
}
