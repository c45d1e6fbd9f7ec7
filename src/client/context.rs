use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::client::Client;
use crate::errors::ProtoResult;

use dakv_logger::prelude::*;

/// Execution context clients are created in. It numbers the clients and
/// keeps the registry of shared clients by pool name.
pub struct Context {
    next_client_id: AtomicU64,
    shared: Mutex<HashMap<String, Weak<Client>>>,
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Context {
            next_client_id: AtomicU64::new(1),
            shared: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn next_client_id(&self) -> u64 {
        self.next_client_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Return the live shared client registered under `name`, or register a new one.
    pub(crate) fn shared_client<F>(&self, name: &str, create: F) -> ProtoResult<Arc<Client>>
    where
        F: FnOnce(u64) -> ProtoResult<Client>,
    {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = shared.get(name).and_then(|c| c.upgrade()) {
            if !client.is_closed() {
                return Ok(client);
            }
        }
        let client = Arc::new(create(self.next_client_id())?);
        debug!("Register shared client {} as {}", client.id(), name);
        shared.insert(name.to_string(), Arc::downgrade(&client));
        Ok(client)
    }

    pub fn shared_count(&self) -> usize {
        let shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.values().filter(|c| c.strong_count() > 0).count()
    }

    /// Close every shared client still alive. The first error is returned after all are closed.
    pub fn close(&self) -> ProtoResult<()> {
        let clients: Vec<Arc<Client>> = {
            let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
            shared.drain().filter_map(|(_, c)| c.upgrade()).collect()
        };
        let mut result = Ok(());
        for client in clients {
            if let Err(err) = client.close() {
                error!("Close shared client {} failed: {}", client.id(), err);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}
