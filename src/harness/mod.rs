mod backend;

use std::env;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::client::{Client, Context, MySqlClient};
use crate::config::ConfigRecord;
use crate::errors::{ProtoError, ProtoResult};
use crate::sql_type::SqlResult;

pub use backend::ScriptedBackend;

use dakv_logger::prelude::*;
use serde_json::Value;

/// Address of the database the client suite talks to unless told otherwise.
pub const DEFAULT_FIXTURE_HOST: &str = "192.168.59.103";
/// Environment variable overriding `DEFAULT_FIXTURE_HOST` in `MySqlClientSuite::from_env`.
pub const FIXTURE_HOST_ENV: &str = "MYSQL_FIXTURE_HOST";

/// What a client test suite provides to the runner: how to build the client
/// for one case, how to release it, and the assertions shared by all suites.
pub trait SqlTestHarness {
    fn create_client(&self, ctx: &Context) -> ProtoResult<Client>;

    fn tear_down(&self, client: Client) -> ProtoResult<()> {
        client.close()
    }

    fn assert_columns(&self, result: &SqlResult, expected: &[&str]) -> ProtoResult<()> {
        let names = result.column_names();
        if names.as_slice() != expected {
            return Err(ProtoError::AssertionFailed(format!(
                "columns {:?} != {:?}",
                names, expected
            )));
        }
        Ok(())
    }

    /// Compare rows by text value, `None` standing for NULL.
    fn assert_rows(&self, result: &SqlResult, expected: &[Vec<Option<&str>>]) -> ProtoResult<()> {
        let rows: Vec<Vec<Option<&str>>> = result
            .rows
            .iter()
            .map(|row| row.iter().map(|v| v.as_str()).collect())
            .collect();
        if rows.as_slice() != expected {
            return Err(ProtoError::AssertionFailed(format!(
                "rows {:?} != {:?}",
                rows, expected
            )));
        }
        Ok(())
    }
}

/// Builds a fresh non-shared client for every case from a record holding only `host`.
pub struct MySqlClientSuite {
    host: String,
    eager: bool,
}

impl Default for MySqlClientSuite {
    fn default() -> Self {
        MySqlClientSuite::new()
    }
}

impl MySqlClientSuite {
    pub fn new() -> Self {
        MySqlClientSuite::with_host(DEFAULT_FIXTURE_HOST)
    }

    pub fn with_host<S: Into<String>>(host: S) -> Self {
        MySqlClientSuite {
            host: host.into(),
            eager: false,
        }
    }

    /// Host from `FIXTURE_HOST_ENV`, falling back to `DEFAULT_FIXTURE_HOST`.
    pub fn from_env() -> Self {
        match env::var(FIXTURE_HOST_ENV) {
            Ok(host) if !host.trim().is_empty() => MySqlClientSuite::with_host(host.trim()),
            _ => MySqlClientSuite::new(),
        }
    }

    /// Connect during setup, so an unreachable server fails the setup
    /// instead of the first query.
    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// A new record on every call.
    pub fn config_record(&self) -> ConfigRecord {
        let mut record = ConfigRecord::new();
        record.insert("host".to_string(), Value::String(self.host.clone()));
        record
    }
}

impl SqlTestHarness for MySqlClientSuite {
    fn create_client(&self, ctx: &Context) -> ProtoResult<Client> {
        let client = MySqlClient::create_non_shared(ctx, self.config_record())?;
        if self.eager {
            client.connect()?;
        }
        Ok(client)
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Phase {
    Setup,
    Body,
    TearDown,
}

#[derive(Debug)]
pub struct CaseFailure {
    pub case: String,
    pub phase: Phase,
    pub error: ProtoError,
}

impl fmt::Display for CaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "case {} failed in {:?}: {}", self.case, self.phase, self.error)
    }
}

impl std::error::Error for CaseFailure {}

/// Runs cases against a harness: setup once per case, body with the client, teardown.
pub struct TestRunner<H: SqlTestHarness> {
    harness: H,
    context: Context,
    setups: AtomicUsize,
    teardowns: AtomicUsize,
}

impl<H: SqlTestHarness> TestRunner<H> {
    pub fn new(harness: H) -> Self {
        TestRunner {
            harness,
            context: Context::new(),
            setups: AtomicUsize::new(0),
            teardowns: AtomicUsize::new(0),
        }
    }

    pub fn harness(&self) -> &H {
        &self.harness
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn setup_count(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    pub fn teardown_count(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    /// A failing setup fails the case and skips the body. Teardown runs
    /// whenever setup succeeded; a body failure wins over a teardown failure.
    pub fn run_case<T, F>(&self, name: &str, body: F) -> Result<T, CaseFailure>
    where
        F: FnOnce(&Client) -> ProtoResult<T>,
    {
        let fail = |phase: Phase, error: ProtoError| {
            error!("Case {} failed in {:?}: {}", name, phase, error);
            CaseFailure {
                case: name.to_string(),
                phase,
                error,
            }
        };

        info!("Run case {}", name);
        self.setups.fetch_add(1, Ordering::SeqCst);
        let client = self
            .harness
            .create_client(&self.context)
            .map_err(|e| fail(Phase::Setup, e))?;
        debug!("Case {} got client {}", name, client.id());

        let result = body(&client);
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        let teardown = self.harness.tear_down(client);
        match (result, teardown) {
            (Err(e), _) => Err(fail(Phase::Body, e)),
            (Ok(_), Err(e)) => Err(fail(Phase::TearDown, e)),
            (Ok(v), Ok(())) => Ok(v),
        }
    }
}

impl<H: SqlTestHarness> Drop for TestRunner<H> {
    fn drop(&mut self) {
        if let Err(err) = self.context.close() {
            error!("Close test context failed: {}", err);
        }
    }
}
