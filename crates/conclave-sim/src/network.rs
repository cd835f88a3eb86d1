//! Simulated network shared by every engine of one test run.
//!
//! Datagrams travel through per-address inboxes with seeded latency jitter.
//! Each (sender, recipient) link is FIFO: a datagram is never delivered
//! before one sent earlier on the same link. Delivery is pulled, not pushed:
//! an engine's `iterate` drains whatever has become due in its inbox.
//!
//! The network also plays three out-of-band services:
//! - the registrar (`sip:registrar@<domain>`), answered synchronously on send
//! - a per-identity persistent store, so restarted engines find their state
//! - the end-to-end key server secret

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet, VecDeque},
    rc::Rc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use conclave_core::{Address, EngineError, Message, WireError};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Network configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Seed for latency jitter and everything derived from it
    pub seed: u64,
    /// Lower bound of one-way latency
    pub min_latency: Duration,
    /// Upper bound of one-way latency
    pub max_latency: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { seed: 0, min_latency: Duration::ZERO, max_latency: Duration::from_millis(1) }
    }
}

impl NetworkConfig {
    /// Default latencies with a specific seed.
    pub fn with_seed(seed: u64) -> Self {
        Self { seed, ..Self::default() }
    }
}

/// One datagram in transit or delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Sending address
    pub from: Address,
    /// Receiving address
    pub to: Address,
    /// CBOR-encoded [`Message`]
    pub payload: Bytes,
}

struct InFlight {
    deliver_at: Instant,
    datagram: Datagram,
}

struct NetworkState {
    config: NetworkConfig,
    rng: ChaCha8Rng,
    /// Bound address → inbox
    inboxes: HashMap<Address, VecDeque<InFlight>>,
    /// Last scheduled delivery per (from, to), for FIFO links
    link_tail: HashMap<(Address, Address), Instant>,
    /// Registrar bindings
    registrations: HashSet<Address>,
    /// Persisted engine state, by identity
    storage: HashMap<Address, Vec<u8>>,
    key_server_secret: [u8; 32],
    dropped: u64,
}

/// Handle to the shared network. Cheap to clone.
#[derive(Clone)]
pub struct SimNetwork {
    state: Rc<RefCell<NetworkState>>,
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new(NetworkConfig::default())
    }
}

impl SimNetwork {
    /// Create an empty network.
    pub fn new(config: NetworkConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut key_server_secret = [0u8; 32];
        rng.fill_bytes(&mut key_server_secret);

        Self {
            state: Rc::new(RefCell::new(NetworkState {
                config,
                rng,
                inboxes: HashMap::new(),
                link_tail: HashMap::new(),
                registrations: HashSet::new(),
                storage: HashMap::new(),
                key_server_secret,
                dropped: 0,
            })),
        }
    }

    /// Open an inbox for `address`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AddressInUse`] if another engine holds it.
    pub fn bind(&self, address: &Address) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        if state.inboxes.contains_key(address) {
            return Err(EngineError::AddressInUse(address.clone()));
        }
        state.inboxes.insert(address.clone(), VecDeque::new());
        tracing::debug!(%address, "bound");
        Ok(())
    }

    /// Close the inbox for `address`, discarding undelivered datagrams and
    /// any registrar binding.
    pub fn unbind(&self, address: &Address) {
        let mut state = self.state.borrow_mut();
        if let Some(inbox) = state.inboxes.remove(address) {
            state.dropped += inbox.len() as u64;
        }
        state.registrations.remove(address);
        state.link_tail.retain(|(from, to), _| from != address && to != address);
        tracing::debug!(%address, "unbound");
    }

    /// True if `address` has an open inbox.
    pub fn is_bound(&self, address: &Address) -> bool {
        self.state.borrow().inboxes.contains_key(address)
    }

    /// True if the registrar holds a binding for `address`.
    pub fn is_registered(&self, address: &Address) -> bool {
        self.state.borrow().registrations.contains(address)
    }

    /// Send `message` from `from` to `to`.
    ///
    /// Datagrams to unbound addresses are dropped silently, as a real network
    /// would. Registrar requests are answered immediately.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] if the message cannot be encoded.
    pub fn send(&self, from: &Address, to: &Address, message: &Message) -> Result<(), WireError> {
        if to.user() == "registrar" && to.device().is_none() {
            return self.handle_registrar(from, message);
        }

        let payload = message.encode()?;
        let mut state = self.state.borrow_mut();
        let state = &mut *state;

        if !state.inboxes.contains_key(to) {
            state.dropped += 1;
            tracing::debug!(%from, %to, kind = message.kind(), "dropped datagram to unbound address");
            return Ok(());
        }

        let now = Instant::now();
        let latency = jitter(&mut state.rng, &state.config);
        let link = (from.clone(), to.clone());
        let deliver_at = match state.link_tail.get(&link) {
            Some(tail) if *tail > now + latency => *tail,
            _ => now + latency,
        };
        state.link_tail.insert(link, deliver_at);

        let datagram = Datagram { from: from.clone(), to: to.clone(), payload };
        if let Some(inbox) = state.inboxes.get_mut(to) {
            inbox.push_back(InFlight { deliver_at, datagram });
        }
        tracing::trace!(%from, %to, kind = message.kind(), ?latency, "datagram queued");
        Ok(())
    }

    /// Pop the next datagram for `address` whose delivery time has passed.
    pub fn receive(&self, address: &Address) -> Option<Datagram> {
        let mut state = self.state.borrow_mut();
        let inbox = state.inboxes.get_mut(address)?;
        let due = inbox.front().is_some_and(|head| head.deliver_at <= Instant::now());
        if due { inbox.pop_front().map(|in_flight| in_flight.datagram) } else { None }
    }

    /// Datagrams queued but not yet received, across all inboxes.
    pub fn in_flight(&self) -> usize {
        self.state.borrow().inboxes.values().map(VecDeque::len).sum()
    }

    /// Datagrams dropped because their recipient was not bound.
    pub fn dropped(&self) -> u64 {
        self.state.borrow().dropped
    }

    /// Store persistent state for `identity`.
    pub fn persist(&self, identity: &Address, bytes: Vec<u8>) {
        self.state.borrow_mut().storage.insert(identity.clone(), bytes);
    }

    /// Load persistent state for `identity`.
    pub fn load(&self, identity: &Address) -> Option<Vec<u8>> {
        self.state.borrow().storage.get(identity).cloned()
    }

    /// Forget persistent state for `identity`.
    pub fn forget(&self, identity: &Address) {
        self.state.borrow_mut().storage.remove(identity);
    }

    /// Secret from which every conversation key is derived.
    pub fn key_server_secret(&self) -> [u8; 32] {
        self.state.borrow().key_server_secret
    }

    /// Derive an independent RNG for an engine.
    pub fn fork_rng(&self) -> ChaCha8Rng {
        let seed = self.state.borrow_mut().rng.next_u64();
        ChaCha8Rng::seed_from_u64(seed)
    }

    fn handle_registrar(&self, from: &Address, message: &Message) -> Result<(), WireError> {
        let registrar = from.registrar();
        match message {
            Message::Register { expires } => {
                let bound = self.state.borrow_mut().registrations.insert(from.clone());
                tracing::debug!(address = %from, refreshed = !bound, "registrar accepted binding");
                self.send(&registrar, from, &Message::RegisterOk { expires: *expires })
            },
            Message::Unregister => {
                self.state.borrow_mut().registrations.remove(from);
                tracing::debug!(address = %from, "registrar removed binding");
                Ok(())
            },
            other => {
                tracing::warn!(address = %from, kind = other.kind(), "registrar ignored message");
                Ok(())
            },
        }
    }
}

fn jitter(rng: &mut ChaCha8Rng, config: &NetworkConfig) -> Duration {
    let min = config.min_latency.as_nanos() as u64;
    let max = config.max_latency.as_nanos() as u64;
    if max <= min {
        return config.min_latency;
    }
    Duration::from_nanos(rng.gen_range(min..=max))
}
