//! Ordered account list.

use std::collections::HashSet;
use std::sync::Arc;

use crate::account::Account;

/// Accounts in the order they were first added.
///
/// Always accessed under the session manager's lock.
#[derive(Debug, Default)]
pub(crate) struct AccountList {
    accounts: Vec<Arc<Account>>,
    /// IDs of first-time logins that have not been listed yet.
    pending: HashSet<String>,
}

impl AccountList {
    pub(crate) fn len(&self) -> usize {
        self.accounts.len()
    }

    pub(crate) fn to_vec(&self) -> Vec<Arc<Account>> {
        self.accounts.clone()
    }

    /// Finds an account by exact identifier.
    pub(crate) fn find_by_id(&self, id: &str) -> Option<Arc<Account>> {
        self.accounts.iter().find(|a| a.id() == id).cloned()
    }

    /// Finds the first account matching an ID, username or address, ignoring case.
    pub(crate) fn find(&self, query: &str) -> Option<Arc<Account>> {
        self.accounts.iter().find(|a| a.matches(query)).cloned()
    }

    /// Reserves an ID for a first-time login.
    ///
    /// Fails if the ID is already listed or reserved.
    pub(crate) fn reserve(&mut self, id: &str) -> bool {
        self.find_by_id(id).is_none() && self.pending.insert(id.to_string())
    }

    pub(crate) fn release(&mut self, id: &str) {
        self.pending.remove(id);
    }

    pub(crate) fn push(&mut self, account: Arc<Account>) {
        self.accounts.push(account);
    }

    /// Removes exactly this account, returning whether it was present.
    ///
    /// When it is the last one, as after a failed append, this truncates the list.
    pub(crate) fn remove(&mut self, account: &Arc<Account>) -> bool {
        if self.accounts.last().is_some_and(|last| Arc::ptr_eq(last, account)) {
            self.accounts.pop();
            return true;
        }

        match self.accounts.iter().position(|a| Arc::ptr_eq(a, account)) {
            Some(index) => {
                self.accounts.remove(index);
                true
            }
            None => false,
        }
    }
}
