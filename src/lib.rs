#[macro_use]
extern crate quick_error;
#[macro_use]
extern crate lazy_static;

#[macro_use]
mod errors;
mod client;
mod config;
mod constants;
mod harness;
mod proto;
mod sql_type;

pub use crate::client::{Client, Context, MySqlClient, DEFAULT_DS_NAME};
pub use crate::config::{ClientConfig, ConfigRecord};
pub use crate::errors::{ProtoError, ProtoResult};
pub use crate::harness::{
    CaseFailure, MySqlClientSuite, Phase, ScriptedBackend, SqlTestHarness, TestRunner,
    DEFAULT_FIXTURE_HOST, FIXTURE_HOST_ENV,
};
pub use crate::proto::{Handler, Listener, ServerHandle};
pub use crate::sql_type::{Field, MysqlType, SqlResult, Value};
