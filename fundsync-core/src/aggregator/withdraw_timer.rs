//! Withdrawal countdowns.
//!
//! A pending withdrawal becomes redeemable `redeem_period` seconds after it
//! was requested. Each tracked (vault, role) pair gets one ticking task that
//! republishes the remaining seconds once per second on a watch channel.
//! Tasks are aborted when their entry is replaced, cancelled or dropped.

use super::equity::quote_units;
use fundsync_sdk::Pubkey;
use fundsync_sdk::objects::WithdrawRequest;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const TICK: Duration = Duration::from_secs(1);

/// On whose behalf a withdrawal was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Investor,
    Manager,
    Protocol,
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActorRole::Investor => "investor",
            ActorRole::Manager => "manager",
            ActorRole::Protocol => "protocol",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawTimer {
    pub vault: Pubkey,
    pub role: ActorRole,
    /// Quote units fixed at request time.
    pub requested_equity: Decimal,
    pub request_ts: i64,
    pub redeem_period_secs: i64,
    pub seconds_remaining: i64,
}

/// `max(redeem_period - (now - request_ts), 0)`.
pub fn seconds_remaining(redeem_period: i64, request_ts: i64, now: i64) -> i64 {
    redeem_period
        .saturating_sub(now.saturating_sub(request_ts))
        .max(0)
}

/// Wall clock in unix seconds that advances with tokio's clock, so paused
/// test time drives it too.
#[derive(Debug, Clone, Copy)]
pub struct UnixClock {
    anchor_unix: i64,
    anchor: Instant,
}

impl UnixClock {
    pub fn system() -> Self {
        Self::starting_at(OffsetDateTime::now_utc().unix_timestamp())
    }

    pub fn starting_at(unix: i64) -> Self {
        Self {
            anchor_unix: unix,
            anchor: Instant::now(),
        }
    }

    pub fn now(&self) -> i64 {
        let elapsed = i64::try_from(self.anchor.elapsed().as_secs()).unwrap_or(i64::MAX);
        self.anchor_unix.saturating_add(elapsed)
    }
}

struct TimerEntry {
    authority: Pubkey,
    request: WithdrawRequest,
    redeem_period: i64,
    rx: watch::Receiver<WithdrawTimer>,
    handle: JoinHandle<()>,
}

impl Drop for TimerEntry {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

type TimerKey = (Pubkey, ActorRole);

/// Every live countdown, keyed by vault and role.
pub struct WithdrawTimerTable {
    clock: UnixClock,
    entries: Mutex<HashMap<TimerKey, TimerEntry>>,
}

impl Default for WithdrawTimerTable {
    fn default() -> Self {
        Self::new(UnixClock::system())
    }
}

impl WithdrawTimerTable {
    pub fn new(clock: UnixClock) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TimerKey, TimerEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `request` for `authority`. A request that is not pending
    /// removes any existing timer and returns `None`. Restarting with an
    /// unchanged request keeps the running task.
    pub fn start(
        &self,
        vault: Pubkey,
        role: ActorRole,
        authority: Pubkey,
        request: WithdrawRequest,
        redeem_period: i64,
    ) -> Option<watch::Receiver<WithdrawTimer>> {
        let key = (vault, role);
        let mut entries = self.lock();
        if !request.is_pending() {
            if entries.remove(&key).is_some() {
                tracing::debug!(%vault, %role, "withdraw request cleared, timer removed");
            }
            return None;
        }
        if let Some(entry) = entries.get(&key) {
            if entry.authority == authority
                && entry.request == request
                && entry.redeem_period == redeem_period
            {
                return Some(entry.rx.clone());
            }
        }

        let entry = self.spawn(vault, role, authority, request, redeem_period);
        let rx = entry.rx.clone();
        tracing::info!(
            %vault,
            %role,
            request_ts = request.ts,
            seconds_remaining = rx.borrow().seconds_remaining,
            "withdraw timer started"
        );
        entries.insert(key, entry);
        Some(rx)
    }

    fn spawn(
        &self,
        vault: Pubkey,
        role: ActorRole,
        authority: Pubkey,
        request: WithdrawRequest,
        redeem_period: i64,
    ) -> TimerEntry {
        let clock = self.clock;
        let timer = WithdrawTimer {
            vault,
            role,
            requested_equity: quote_units(i128::from(request.value)),
            request_ts: request.ts,
            redeem_period_secs: redeem_period,
            seconds_remaining: seconds_remaining(redeem_period, request.ts, clock.now()),
        };
        let (tx, rx) = watch::channel(timer);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + TICK, TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let remaining = seconds_remaining(redeem_period, request.ts, clock.now());
                tx.send_modify(|t| t.seconds_remaining = remaining);
            }
        });
        TimerEntry {
            authority,
            request,
            redeem_period,
            rx,
            handle,
        }
    }

    /// Bring an existing timer in line with the latest on-chain request.
    /// Untracked pairs are left alone. Returns whether a timer remains.
    pub fn reconcile(
        &self,
        vault: Pubkey,
        role: ActorRole,
        request: WithdrawRequest,
        redeem_period: i64,
    ) -> bool {
        let authority = match self.lock().get(&(vault, role)) {
            Some(entry) => entry.authority,
            None => return false,
        };
        self.start(vault, role, authority, request, redeem_period)
            .is_some()
    }

    /// Who the timer of this pair was started for.
    pub fn authority(&self, vault: &Pubkey, role: ActorRole) -> Option<Pubkey> {
        self.lock().get(&(*vault, role)).map(|e| e.authority)
    }

    pub fn get(&self, vault: &Pubkey, role: ActorRole) -> Option<WithdrawTimer> {
        self.lock()
            .get(&(*vault, role))
            .map(|e| e.rx.borrow().clone())
    }

    pub fn watch(&self, vault: &Pubkey, role: ActorRole) -> Option<watch::Receiver<WithdrawTimer>> {
        self.lock().get(&(*vault, role)).map(|e| e.rx.clone())
    }

    pub fn cancel(&self, vault: &Pubkey, role: ActorRole) -> bool {
        self.lock().remove(&(*vault, role)).is_some()
    }

    /// Remove every timer of `vault`.
    pub fn cancel_vault(&self, vault: &Pubkey) {
        self.lock().retain(|(v, _), _| v != vault);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Abort every timer task.
    pub fn shutdown(&self) {
        let drained: Vec<TimerEntry> = self.lock().drain().map(|(_, e)| e).collect();
        if !drained.is_empty() {
            tracing::info!(timers = drained.len(), "withdraw timers stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(value: u64, ts: i64) -> WithdrawRequest {
        WithdrawRequest {
            shares: 1,
            value,
            ts,
        }
    }

    #[test]
    fn test_remaining_clamps_at_zero() {
        assert_eq!(seconds_remaining(100, 1_000, 1_030), 70);
        assert_eq!(seconds_remaining(100, 1_000, 1_100), 0);
        assert_eq!(seconds_remaining(100, 1_000, 5_000), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_down_then_clears() {
        let table = WithdrawTimerTable::new(UnixClock::starting_at(10_000));
        let vault = Pubkey::new_from_array([1u8; 32]);
        let authority = Pubkey::new_from_array([2u8; 32]);

        let rx = table
            .start(vault, ActorRole::Investor, authority, request(5_000_000, 10_000), 3)
            .unwrap();
        assert_eq!(rx.borrow().seconds_remaining, 3);
        assert_eq!(rx.borrow().requested_equity, Decimal::from(5));

        for expected in [2, 1, 0, 0] {
            tokio::time::sleep(Duration::from_millis(1000)).await;
            tokio::time::sleep(Duration::from_millis(1)).await;
            assert_eq!(table.get(&vault, ActorRole::Investor).unwrap().seconds_remaining, expected);
        }

        assert!(!table.reconcile(vault, ActorRole::Investor, request(0, 0), 3));
        assert!(table.is_empty());
        assert!(table.get(&vault, ActorRole::Investor).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_request_keeps_task() {
        let table = WithdrawTimerTable::new(UnixClock::starting_at(0));
        let vault = Pubkey::new_from_array([1u8; 32]);
        let authority = Pubkey::new_from_array([2u8; 32]);
        let req = request(1, 1);

        let first = table.start(vault, ActorRole::Manager, authority, req, 60).unwrap();
        let second = table.start(vault, ActorRole::Manager, authority, req, 60).unwrap();
        assert!(first.same_channel(&second));

        assert!(table.reconcile(vault, ActorRole::Manager, request(2, 5), 60));
        let third = table.watch(&vault, ActorRole::Manager).unwrap();
        assert!(!first.same_channel(&third));
        assert_eq!(table.get(&vault, ActorRole::Manager).unwrap().request_ts, 5);

        // Untracked pairs are not created by reconcile.
        assert!(!table.reconcile(vault, ActorRole::Protocol, req, 60));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_ticking() {
        let table = WithdrawTimerTable::new(UnixClock::starting_at(1));
        let vault = Pubkey::new_from_array([1u8; 32]);
        let rx = table
            .start(vault, ActorRole::Protocol, Pubkey::default(), request(1, 1), 60)
            .unwrap();
        table.shutdown();
        assert!(table.is_empty());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(rx.borrow().seconds_remaining, 60);
        assert!(rx.has_changed().is_err());
    }
}
