//! # Client Registry
//!
//! Tracks the remote endpoints talking to the server and what pad data they
//! asked for. A client is created by its first request and forgotten after a
//! period of silence. Each registration (all slots, one slot, one MAC) carries
//! its own timestamp and lapses on its own, so a client that stops asking for
//! slot 2 stops receiving it even while it keeps polling slot 1.
//!
//! The registry is owned by the server loop and takes explicit `now`
//! instants, which keeps expiry deterministic in tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::dsu::protocol::{MacAddress, Registration};

#[derive(Debug, Clone)]
struct ClientEntry {
    last_seen: Instant,
    all: Option<Instant>,
    slots: HashMap<u8, Instant>,
    macs: HashMap<MacAddress, Instant>,
}

impl ClientEntry {
    fn new(now: Instant) -> Self {
        Self {
            last_seen: now,
            all: None,
            slots: HashMap::new(),
            macs: HashMap::new(),
        }
    }
}

/// Remote clients with their pad data registrations
#[derive(Debug)]
pub struct ClientRegistry {
    timeout: Duration,
    clients: HashMap<SocketAddr, ClientEntry>,
}

impl ClientRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: HashMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn live(&self, at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(at) <= self.timeout
    }

    /// Record traffic from `addr`, creating the client if it is new
    ///
    /// Returns true when the client was not known before.
    pub fn touch(&mut self, addr: SocketAddr, now: Instant) -> bool {
        match self.clients.get_mut(&addr) {
            Some(entry) => {
                entry.last_seen = now;
                false
            }
            None => {
                debug!("New DSU client {}", addr);
                self.clients.insert(addr, ClientEntry::new(now));
                true
            }
        }
    }

    /// Touch `addr` and refresh the registration described by `registration`
    pub fn subscribe(&mut self, addr: SocketAddr, registration: &Registration, now: Instant) {
        self.touch(addr, now);
        let Some(entry) = self.clients.get_mut(&addr) else {
            return;
        };

        if registration.is_all() {
            entry.all = Some(now);
        }
        if registration.by_slot {
            entry.slots.insert(registration.slot, now);
        }
        if registration.by_mac {
            entry.macs.insert(registration.mac, now);
        }
    }

    /// Drop silent clients and lapsed registrations
    ///
    /// Returns the addresses that were removed.
    pub fn sweep(&mut self, now: Instant) -> Vec<SocketAddr> {
        let timeout = self.timeout;
        let live = |at: Instant| now.saturating_duration_since(at) <= timeout;

        let expired: Vec<SocketAddr> = self
            .clients
            .iter()
            .filter(|(_, entry)| !live(entry.last_seen))
            .map(|(addr, _)| *addr)
            .collect();

        for addr in &expired {
            self.clients.remove(addr);
            debug!("DSU client {} timed out", addr);
        }

        for entry in self.clients.values_mut() {
            if entry.all.is_some_and(|at| !live(at)) {
                entry.all = None;
            }
            entry.slots.retain(|_, at| live(*at));
            entry.macs.retain(|_, at| live(*at));
        }

        expired
    }

    /// Clients with a live registration matching `slot` or `mac`
    pub fn subscribers_for(&self, slot: u8, mac: &MacAddress, now: Instant) -> Vec<SocketAddr> {
        let mut subscribers: Vec<SocketAddr> = self
            .clients
            .iter()
            .filter(|(_, entry)| self.live(entry.last_seen, now))
            .filter(|(_, entry)| {
                entry.all.is_some_and(|at| self.live(at, now))
                    || entry.slots.get(&slot).is_some_and(|at| self.live(*at, now))
                    || entry.macs.get(mac).is_some_and(|at| self.live(*at, now))
            })
            .map(|(addr, _)| *addr)
            .collect();
        subscribers.sort_unstable();
        subscribers
    }

    /// Clients heard from within the timeout
    pub fn active_clients(&self, now: Instant) -> Vec<SocketAddr> {
        let mut clients: Vec<SocketAddr> = self
            .clients
            .iter()
            .filter(|(_, entry)| self.live(entry.last_seen, now))
            .map(|(addr, _)| *addr)
            .collect();
        clients.sort_unstable();
        clients
    }

    /// Remove a client immediately, e.g. after a failed send
    pub fn forget(&mut self, addr: &SocketAddr) -> bool {
        self.clients.remove(addr).is_some()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.clients.contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
