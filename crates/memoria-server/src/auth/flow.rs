//! In-memory device-authorization state machine:
//! `INITIATED -> APPROVED -> COMPLETE`, with `DENIED` and `EXPIRED`
//! branches. Flow state never touches the `Store` — it's short-lived
//! (10-minute TTL) and only the resulting `Device` record needs to survive
//! a restart.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use memoria_core::{Error, Result};

use super::tokens::{generate_device_code, generate_token, generate_user_code};

const FLOW_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Initiated,
    Approved,
    Denied,
    Expired,
    Complete,
}

#[derive(Debug, Clone)]
pub struct FlowState {
    pub status: FlowStatus,
    pub device_name: String,
    pub user_code: String,
    pub device_id: Option<String>,
    pub pending_tokens: Option<(String, String)>,
    created_at: Instant,
}

impl FlowState {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > FLOW_TTL
    }
}

pub struct InitiatedFlow {
    pub device_code: String,
    pub user_code: String,
    pub expires_in: u64,
    pub interval: u64,
}

/// Outcome of a device polling `/api/auth/token`.
pub enum ExchangeOutcome {
    Pending,
    Denied,
    Expired,
    Success {
        device_id: String,
        device_name: String,
        access_token: String,
        refresh_token: String,
    },
}

#[derive(Default)]
pub struct DeviceFlowTable {
    by_device_code: Mutex<HashMap<String, FlowState>>,
}

impl DeviceFlowTable {
    pub fn new() -> Self {
        DeviceFlowTable::default()
    }

    /// Starts a new flow for `device_name`, returning the codes and
    /// verification metadata the client should display to the user.
    pub fn initiate(&self, device_name: &str) -> InitiatedFlow {
        let device_code = generate_device_code();
        let user_code = generate_user_code();
        let state = FlowState {
            status: FlowStatus::Initiated,
            device_name: device_name.to_string(),
            user_code: user_code.clone(),
            device_id: None,
            pending_tokens: None,
            created_at: Instant::now(),
        };
        self.by_device_code
            .lock()
            .unwrap()
            .insert(device_code.clone(), state);

        InitiatedFlow {
            device_code,
            user_code,
            expires_in: FLOW_TTL.as_secs(),
            interval: 5,
        }
    }

    /// Approves the flow identified by its user-facing code (the
    /// `/device/authorize` form submission), minting the token pair and
    /// a fresh device id. Returns the device id so the caller can register
    /// it in the persistent `DeviceRegistry`.
    pub fn approve(&self, user_code: &str) -> Result<(String, String, String)> {
        let mut table = self.by_device_code.lock().unwrap();
        let state = table
            .values_mut()
            .find(|s| s.user_code.eq_ignore_ascii_case(user_code))
            .ok_or_else(|| Error::not_found("device code"))?;

        if state.is_expired() {
            state.status = FlowStatus::Expired;
            return Err(Error::InvalidInput("device code expired".to_string()));
        }
        if state.status != FlowStatus::Initiated {
            return Err(Error::Conflict("device code already resolved".to_string()));
        }

        let device_id = memoria_core::new_id();
        let access_token = generate_token();
        let refresh_token = generate_token();
        state.status = FlowStatus::Approved;
        state.device_id = Some(device_id.clone());
        state.pending_tokens = Some((access_token.clone(), refresh_token.clone()));

        Ok((device_id, access_token, refresh_token))
    }

    pub fn deny(&self, user_code: &str) -> Result<()> {
        let mut table = self.by_device_code.lock().unwrap();
        let state = table
            .values_mut()
            .find(|s| s.user_code.eq_ignore_ascii_case(user_code))
            .ok_or_else(|| Error::not_found("device code"))?;
        state.status = FlowStatus::Denied;
        Ok(())
    }

    /// Polls the flow for `device_code`. On success the flow transitions
    /// to `Complete` and subsequent polls return `Expired`-like semantics
    /// via a plain not-found, since the device code is single-use.
    pub fn exchange(&self, device_code: &str) -> Result<ExchangeOutcome> {
        let mut table = self.by_device_code.lock().unwrap();
        let state = table
            .get_mut(device_code)
            .ok_or_else(|| Error::not_found("device code"))?;

        if state.is_expired() {
            state.status = FlowStatus::Expired;
        }

        match state.status {
            FlowStatus::Initiated => Ok(ExchangeOutcome::Pending),
            FlowStatus::Denied => Ok(ExchangeOutcome::Denied),
            FlowStatus::Expired => Ok(ExchangeOutcome::Expired),
            FlowStatus::Complete => Err(Error::not_found("device code")),
            FlowStatus::Approved => {
                let (access_token, refresh_token) = state
                    .pending_tokens
                    .clone()
                    .expect("approved flow always carries pending tokens");
                let device_id = state
                    .device_id
                    .clone()
                    .expect("approved flow always carries a device id");
                state.status = FlowStatus::Complete;
                let device_name = state.device_name.clone();
                Ok(ExchangeOutcome::Success {
                    device_id,
                    device_name,
                    access_token,
                    refresh_token,
                })
            }
        }
    }

    /// Drops expired entries. Intended to be called periodically (e.g. on
    /// each `initiate` call) as a lazy sweep, rather than on its own timer.
    pub fn cleanup_expired(&self) {
        let mut table = self.by_device_code.lock().unwrap();
        table.retain(|_, state| !state.is_expired() || state.status == FlowStatus::Complete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approve_then_exchange_yields_tokens() {
        let table = DeviceFlowTable::new();
        let initiated = table.initiate("laptop");
        table.approve(&initiated.user_code).unwrap();

        match table.exchange(&initiated.device_code).unwrap() {
            ExchangeOutcome::Success { device_id, .. } => assert!(!device_id.is_empty()),
            _ => panic!("expected success"),
        }
    }

    #[test]
    fn exchange_before_approval_is_pending() {
        let table = DeviceFlowTable::new();
        let initiated = table.initiate("laptop");
        match table.exchange(&initiated.device_code).unwrap() {
            ExchangeOutcome::Pending => {}
            _ => panic!("expected pending"),
        }
    }

    #[test]
    fn denied_flow_reports_denied() {
        let table = DeviceFlowTable::new();
        let initiated = table.initiate("laptop");
        table.deny(&initiated.user_code).unwrap();
        match table.exchange(&initiated.device_code).unwrap() {
            ExchangeOutcome::Denied => {}
            _ => panic!("expected denied"),
        }
    }

    #[test]
    fn user_code_lookup_is_case_insensitive() {
        let table = DeviceFlowTable::new();
        let initiated = table.initiate("laptop");
        let lower = initiated.user_code.to_lowercase();
        assert!(table.approve(&lower).is_ok());
    }

    #[test]
    fn double_exchange_after_complete_is_not_found() {
        let table = DeviceFlowTable::new();
        let initiated = table.initiate("laptop");
        table.approve(&initiated.user_code).unwrap();
        table.exchange(&initiated.device_code).unwrap();
        assert!(table.exchange(&initiated.device_code).is_err());
    }
}
