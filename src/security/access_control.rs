//! Static allow/deny lists for the admission controller.

use std::collections::HashSet;

use crate::security::client_ip::sanitize_client_key;

/// Verdict of the static lists for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListVerdict {
    Whitelisted,
    Blacklisted,
    Unlisted,
}

/// Whitelist and blacklist of sanitized client keys.
///
/// A client on both lists is treated as whitelisted, matching the order the
/// admission controller checks them in.
#[derive(Debug, Clone, Default)]
pub struct AccessList {
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
}

impl AccessList {
    pub fn new<W, B>(whitelist: W, blacklist: B) -> Self
    where
        W: IntoIterator,
        W::Item: AsRef<str>,
        B: IntoIterator,
        B::Item: AsRef<str>,
    {
        Self {
            whitelist: whitelist
                .into_iter()
                .map(|k| sanitize_client_key(k.as_ref()))
                .collect(),
            blacklist: blacklist
                .into_iter()
                .map(|k| sanitize_client_key(k.as_ref()))
                .collect(),
        }
    }

    /// Look up an already sanitized key.
    pub fn verdict(&self, client_key: &str) -> ListVerdict {
        if self.whitelist.contains(client_key) {
            ListVerdict::Whitelisted
        } else if self.blacklist.contains(client_key) {
            ListVerdict::Blacklisted
        } else {
            ListVerdict::Unlisted
        }
    }
}
