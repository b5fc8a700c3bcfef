use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::client::Client;

/// Chooses which broker the failover client tries next.
pub trait Pool: Send {
    /// Next client to try, or `None` for an empty pool. The choice does not
    /// depend on whether earlier attempts succeeded.
    fn next_client(&mut self) -> Option<Client>;

    fn clients(&self) -> &[Client];

    fn len(&self) -> usize {
        self.clients().len()
    }

    fn is_empty(&self) -> bool {
        self.clients().is_empty()
    }
}

/// Cycles through the clients in order, wrapping around.
pub struct RoundRobin {
    clients: Vec<Client>,
    cursor: usize,
}

impl RoundRobin {
    pub fn new(clients: Vec<Client>) -> Self {
        Self { clients, cursor: 0 }
    }
}

impl Pool for RoundRobin {
    fn next_client(&mut self) -> Option<Client> {
        let client = self.clients.get(self.cursor)?.clone();
        self.cursor = (self.cursor + 1) % self.clients.len();
        Some(client)
    }

    fn clients(&self) -> &[Client] {
        &self.clients
    }
}

/// Visits every client once per pass, in a fresh random order each pass.
pub struct Shuffle {
    clients: Vec<Client>,
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl Shuffle {
    pub fn new(clients: Vec<Client>) -> Self {
        Self::with_rng(clients, StdRng::from_entropy())
    }

    /// Deterministic order for tests.
    pub fn with_seed(clients: Vec<Client>, seed: u64) -> Self {
        Self::with_rng(clients, StdRng::seed_from_u64(seed))
    }

    fn with_rng(clients: Vec<Client>, rng: StdRng) -> Self {
        let order = (0..clients.len()).collect();
        Self {
            clients,
            order,
            cursor: 0,
            rng,
        }
    }
}

impl Pool for Shuffle {
    fn next_client(&mut self) -> Option<Client> {
        if self.clients.is_empty() {
            return None;
        }
        if self.cursor == 0 {
            self.order.shuffle(&mut self.rng);
        }
        let client = self.clients[self.order[self.cursor]].clone();
        self.cursor = (self.cursor + 1) % self.clients.len();
        Some(client)
    }

    fn clients(&self) -> &[Client] {
        &self.clients
    }
}
