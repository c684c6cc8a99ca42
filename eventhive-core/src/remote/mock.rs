//! Scripted in-memory remote used by engine and reconciler tests.

use super::{RemoteError, RemoteTicketStore, Result};
use crate::database::{Attendee, Event};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MockMode {
    Online,
    /// Every call fails with `Unavailable`.
    Unreachable,
    /// Every call fails with a 500 status.
    Failing,
    /// Every call never completes.
    Hanging,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedScan {
    pub code: String,
    pub scanner_id: String,
    pub at: DateTime<Utc>,
}

#[derive(Default)]
struct MockState {
    attendees: HashMap<String, Attendee>,
    events: HashMap<String, Event>,
    scans: Vec<RecordedScan>,
    fail_codes: HashSet<String>,
    lookups: usize,
}

pub(crate) struct MockRemote {
    mode: Mutex<MockMode>,
    state: Mutex<MockState>,
}

impl MockRemote {
    pub fn new(mode: MockMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn online() -> Self {
        Self::new(MockMode::Online)
    }

    pub fn with_attendees(self, attendees: Vec<Attendee>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for attendee in attendees {
                state.attendees.insert(attendee.code.clone(), attendee);
            }
        }
        self
    }

    pub fn with_event(self, event: Event) -> Self {
        self.state.lock().unwrap().events.insert(event.id.clone(), event);
        self
    }

    pub fn set_mode(&self, mode: MockMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Make writes for one code fail while the rest succeed.
    pub fn fail_writes_for(&self, code: &str) {
        self.state.lock().unwrap().fail_codes.insert(code.to_string());
    }

    pub fn scans(&self) -> Vec<RecordedScan> {
        self.state.lock().unwrap().scans.clone()
    }

    pub fn attendee(&self, code: &str) -> Option<Attendee> {
        self.state.lock().unwrap().attendees.get(code).cloned()
    }

    pub fn lookups(&self) -> usize {
        self.state.lock().unwrap().lookups
    }

    async fn gate(&self) -> Result<()> {
        let mode = *self.mode.lock().unwrap();
        match mode {
            MockMode::Online => Ok(()),
            MockMode::Unreachable => {
                Err(RemoteError::Unavailable("connection refused".to_string()))
            }
            MockMode::Failing => Err(RemoteError::Status {
                status: 500,
                body: "internal error".to_string(),
            }),
            MockMode::Hanging => std::future::pending().await,
        }
    }

    fn check_write(&self, code: &str) -> Result<()> {
        if self.state.lock().unwrap().fail_codes.contains(code) {
            return Err(RemoteError::Status {
                status: 409,
                body: format!("rejected {}", code),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTicketStore for MockRemote {
    async fn fetch_attendees(&self, event_id: &str) -> Result<Vec<Attendee>> {
        self.gate().await?;
        let state = self.state.lock().unwrap();
        let mut rows: Vec<Attendee> = state
            .attendees
            .values()
            .filter(|a| a.event_id == event_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    async fn fetch_attendee_by_code(&self, code: &str) -> Result<Option<Attendee>> {
        self.gate().await?;
        let mut state = self.state.lock().unwrap();
        state.lookups += 1;
        Ok(state.attendees.get(code).cloned())
    }

    async fn fetch_event(&self, event_id: &str) -> Result<Option<Event>> {
        self.gate().await?;
        Ok(self.state.lock().unwrap().events.get(event_id).cloned())
    }

    async fn record_scan(&self, code: &str, scanner_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.gate().await?;
        self.check_write(code)?;
        let scan = RecordedScan {
            code: code.to_string(),
            scanner_id: scanner_id.to_string(),
            at,
        };
        let mut state = self.state.lock().unwrap();
        if !state.scans.contains(&scan) {
            state.scans.push(scan);
        }
        Ok(())
    }

    async fn set_checked_in(&self, code: &str, at: DateTime<Utc>) -> Result<()> {
        self.gate().await?;
        self.check_write(code)?;
        let mut state = self.state.lock().unwrap();
        if let Some(attendee) = state.attendees.get_mut(code) {
            if !attendee.checked_in {
                attendee.checked_in = true;
                attendee.checked_in_at = Some(at);
                attendee.updated_at = at;
            }
        }
        Ok(())
    }
}
