use bell_protocol::AccountId;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Live connection count per account.
///
/// Transition callbacks run while the count is locked, so a connect racing a
/// disconnect of the same account cannot apply their effects out of order.
#[derive(Default)]
pub struct Presence {
    counts: Mutex<HashMap<AccountId, usize>>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns true if the account transitioned to online.
    pub fn connect(&self, account: AccountId, on_online: impl FnOnce()) -> bool {
        let mut guard = self.counts.lock();
        let c = guard.entry(account).or_insert(0);
        *c += 1;
        let first = *c == 1;
        if first {
            on_online();
        }
        first
    }

    /// Deregister a connection. Returns true if that was the account's last one.
    pub fn disconnect(&self, account: AccountId, on_offline: impl FnOnce()) -> bool {
        let mut guard = self.counts.lock();
        let last = match guard.get_mut(&account) {
            Some(c) if *c > 1 => {
                *c -= 1;
                false
            }
            Some(_) => {
                guard.remove(&account);
                true
            }
            None => false,
        };
        if last {
            on_offline();
        }
        last
    }

    pub fn online(&self) -> usize {
        self.counts.lock().len()
    }
}
