use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::constants::DEFAULT_SERVER_VERSION;
use crate::errors::ProtoResult;
use crate::proto::Connection;
use crate::sql_type::SqlResult;

use dakv_logger::prelude::*;

pub trait Handler: Send + Sync {
    // new_connection is called when a connection is created.
    fn new_connection(&self, connection_id: u32);
    // close_connection is called when a connection is closed.
    fn close_connection(&self, connection_id: u32);
    // check_auth decides whether the handshake succeeds. The auth response
    // is the mysql_native_password scramble of the greeting salt.
    fn check_auth(&self, _user: &str, _salt: &[u8], _auth_response: &[u8]) -> bool {
        true
    }
    // init_db is called for COM_INIT_DB and for the database sent on connect.
    fn init_db(&self, _database: &str) -> ProtoResult<()> {
        Ok(())
    }
    // com_query is called when a connection receives a query. Every result
    // passed to the callback is streamed to the client; returning
    // ProtoError::Server answers the query with an ERR packet.
    fn com_query(
        &self,
        sql: &str,
        callback: &mut dyn FnMut(SqlResult) -> ProtoResult<()>,
    ) -> ProtoResult<()>;
}

pub struct Listener {
    listener: TcpListener,
    connection_id: u32,
    server_version: String,
    shutdown: Arc<AtomicBool>,
}

/// A listener accepting on a background thread. Dropping it stops the accept loop.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Listener {
    pub fn new_tcp_listener<Addr: ToSocketAddrs>(addr: Addr) -> ProtoResult<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Listener {
            listener,
            connection_id: 1,
            server_version: DEFAULT_SERVER_VERSION.to_string(),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> ProtoResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown, serving each on its own thread.
    pub fn accept(&mut self, handler: Arc<dyn Handler>) {
        debug!("Start server ...");
        for stream in self.listener.incoming() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let connection_id = self.connection_id;
            self.connection_id += 1;
            let server_version = self.server_version.clone();
            let handler = handler.clone();
            match stream {
                Ok(stream) => {
                    thread::spawn(move || {
                        let mut conn =
                            Connection::new(connection_id, server_version, Box::new(stream));
                        conn.handle(handler);
                    });
                }
                Err(err) => {
                    error!("Accept failed: {}", err);
                }
            }
        }
        debug!("Server stopped");
    }

    pub fn spawn(mut self, handler: Arc<dyn Handler>) -> ProtoResult<ServerHandle> {
        let addr = self.local_addr()?;
        let shutdown = self.shutdown.clone();
        let thread = thread::Builder::new()
            .name(format!("listener-{}", addr))
            .spawn(move || self.accept(handler))?;
        info!("Listening on {}", addr);
        Ok(ServerHandle {
            addr,
            shutdown,
            thread: Some(thread),
        })
    }
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake up the blocking accept.
        if let Err(err) = TcpStream::connect(self.addr) {
            error!("Wake up listener {} failed: {}", self.addr, err);
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Listener thread {} panicked", self.addr);
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
