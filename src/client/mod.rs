mod connection;
mod context;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{ClientConfig, ConfigRecord};
use crate::errors::{ProtoError, ProtoResult};
use crate::sql_type::SqlResult;

pub use connection::ClientConnection;
pub use context::Context;

use dakv_logger::prelude::*;

/// Pool name used by `MySqlClient::create_shared_default`.
pub const DEFAULT_DS_NAME: &str = "DEFAULT_MYSQL_DS";

/// Factory for MySQL client handles.
pub struct MySqlClient;

impl MySqlClient {
    /// A client owned by the caller alone. Nothing is connected until first use.
    pub fn create_non_shared(ctx: &Context, config: ConfigRecord) -> ProtoResult<Client> {
        let config = ClientConfig::from_record(&config)?;
        let client = Client::new(ctx.next_client_id(), config, None);
        debug!(
            "Created non-shared client {} for {}",
            client.id(),
            client.config().address()
        );
        Ok(client)
    }

    /// A client shared by every caller using the same pool name in this context.
    /// The config of the first caller wins.
    pub fn create_shared(
        ctx: &Context,
        config: ConfigRecord,
        pool_name: &str,
    ) -> ProtoResult<Arc<Client>> {
        ctx.shared_client(pool_name, |id| {
            let config = ClientConfig::from_record(&config)?;
            Ok(Client::new(id, config, Some(pool_name.to_string())))
        })
    }

    pub fn create_shared_default(ctx: &Context, config: ConfigRecord) -> ProtoResult<Arc<Client>> {
        MySqlClient::create_shared(ctx, config, DEFAULT_DS_NAME)
    }
}

/// Client handle. The connection is opened lazily and dropped on I/O errors,
/// so the next operation reconnects.
pub struct Client {
    id: u64,
    config: ClientConfig,
    pool_name: Option<String>,
    conn: Mutex<Option<ClientConnection>>,
    closed: AtomicBool,
}

impl Client {
    fn new(id: u64, config: ClientConfig, pool_name: Option<String>) -> Self {
        Client {
            id,
            config,
            pool_name,
            conn: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_shared(&self) -> bool {
        self.pool_name.is_some()
    }

    pub fn pool_name(&self) -> Option<&str> {
        self.pool_name.as_ref().map(|s| s.as_str())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.conn
            .lock()
            .map(|conn| conn.is_some())
            .unwrap_or(false)
    }

    /// Server side id of the current connection, if any.
    pub fn connection_id(&self) -> Option<u32> {
        self.conn
            .lock()
            .ok()
            .and_then(|conn| conn.as_ref().map(|c| c.connection_id()))
    }

    fn with_connection<T, F>(&self, f: F) -> ProtoResult<T>
    where
        F: FnOnce(&mut ClientConnection) -> ProtoResult<T>,
    {
        if self.is_closed() {
            return Err(ProtoError::Closed);
        }
        let mut guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        // close() may have run while waiting for the lock.
        if self.is_closed() {
            return Err(ProtoError::Closed);
        }
        if guard.is_none() {
            info!("Client {} connecting to {}", self.id, self.config.address());
            *guard = Some(ClientConnection::connect(&self.config)?);
        }
        let result = match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(ProtoError::Closed),
        };
        match &result {
            Ok(_) | Err(ProtoError::Server { .. }) => {}
            Err(err) => {
                error!("Client {} drops its connection: {}", self.id, err);
                *guard = None;
            }
        }
        result
    }

    /// Open the connection now instead of on first use.
    pub fn connect(&self) -> ProtoResult<()> {
        self.with_connection(|_| Ok(()))
    }

    pub fn ping(&self) -> ProtoResult<()> {
        self.with_connection(|conn| conn.ping())
    }

    pub fn use_database(&self, database: &str) -> ProtoResult<()> {
        self.with_connection(|conn| conn.init_db(database))
    }

    /// Every result of a (possibly multi statement) query.
    pub fn query_all(&self, sql: &str) -> ProtoResult<Vec<SqlResult>> {
        self.with_connection(|conn| conn.query(sql))
    }

    /// The first result of a query.
    pub fn query(&self, sql: &str) -> ProtoResult<SqlResult> {
        self.query_all(sql)?
            .into_iter()
            .next()
            .ok_or(ProtoError::EmptyPacketError)
    }

    /// Affected rows of a statement.
    pub fn execute(&self, sql: &str) -> ProtoResult<u64> {
        self.query(sql).map(|r| r.affected_rows)
    }

    /// Close the connection. Closing twice is a no-op.
    pub fn close(&self) -> ProtoResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        debug!("Close client {}", self.id);
        match conn {
            Some(conn) => conn.quit(),
            None => Ok(()),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!("Close client {} failed: {}", self.id, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::client::{Context, MySqlClient, DEFAULT_DS_NAME};
    use crate::config::ConfigRecord;
    use crate::errors::ProtoError;
    use serde_json::json;

    fn host(host: &str) -> ConfigRecord {
        json!({ "host": host }).as_object().cloned().unwrap()
    }

    #[test]
    fn test_non_shared_is_lazy() {
        let ctx = Context::new();
        let client = MySqlClient::create_non_shared(&ctx, host("192.168.59.103")).unwrap();
        assert_eq!(client.config().host, "192.168.59.103");
        assert!(!client.is_shared());
        assert!(!client.is_connected());
        assert_eq!(client.connection_id(), None);

        let other = MySqlClient::create_non_shared(&ctx, host("192.168.59.103")).unwrap();
        assert_ne!(client.id(), other.id());
    }

    #[test]
    fn test_malformed_config() {
        let ctx = Context::new();
        let record = json!({ "host": 1 }).as_object().cloned().unwrap();
        match MySqlClient::create_non_shared(&ctx, record) {
            Err(ProtoError::InvalidConfig(key, _)) => assert_eq!(key, "host"),
            _ => panic!("Unexpected result"),
        }
    }

    #[test]
    fn test_closed() {
        let ctx = Context::new();
        let client = MySqlClient::create_non_shared(&ctx, host("127.0.0.1")).unwrap();
        client.close().unwrap();
        client.close().unwrap();
        assert!(client.is_closed());
        match client.ping() {
            Err(ProtoError::Closed) => {}
            _ => panic!("Unexpected result"),
        }
    }

    #[test]
    fn test_closed_while_waiting_for_connection() {
        let ctx = Context::new();
        let client = Arc::new(MySqlClient::create_non_shared(&ctx, host("127.0.0.1")).unwrap());
        let guard = client.conn.lock().unwrap();
        let pinger = {
            let client = client.clone();
            thread::spawn(move || client.ping())
        };
        thread::sleep(Duration::from_millis(50));
        client.closed.store(true, Ordering::SeqCst);
        drop(guard);

        match pinger.join().unwrap() {
            Err(ProtoError::Closed) => {}
            other => panic!("Unexpected result {:?}", other),
        }
        assert!(!client.is_connected());
    }

    #[test]
    fn test_shared() {
        let ctx = Context::new();
        let a = MySqlClient::create_shared_default(&ctx, host("a")).unwrap();
        let b = MySqlClient::create_shared(&ctx, host("b"), DEFAULT_DS_NAME).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.config().host, "a");
        assert_eq!(a.pool_name(), Some(DEFAULT_DS_NAME));

        let c = MySqlClient::create_shared(&ctx, host("c"), "other").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(ctx.shared_count(), 2);

        drop(c);
        assert_eq!(ctx.shared_count(), 1);

        ctx.close().unwrap();
        assert!(a.is_closed());
        let d = MySqlClient::create_shared_default(&ctx, host("d")).unwrap();
        assert!(!Arc::ptr_eq(&a, &d));
        assert_eq!(d.config().host, "d");
    }
}
