//! Seam between the bridge and the running simulation.
//!
//! The simulation client itself lives outside this crate. Everything here
//! talks to it through [`SimConnector`] and [`SimConnection`]: named
//! procedures taking and returning JSON values.

mod capability;
mod readers;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SimError;

pub use capability::{CapabilityProbe, ProbeOutcome, SimControl, Strategy};
pub use readers::{
    DIAGNOSTIC_FIELDS, Reader, collect_diagnostics, environment_info, flight_snapshot, orbit_info,
    part_tree, stage_plan, time_status, vessel_info,
};

pub const DEFAULT_RPC_PORT: u16 = 50000;
pub const DEFAULT_STREAM_PORT: u16 = 50001;

/// Where the simulation's RPC server is listening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimTarget {
    pub address: String,
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,
    #[serde(default = "default_stream_port")]
    pub stream_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_rpc_port() -> u16 {
    DEFAULT_RPC_PORT
}

fn default_stream_port() -> u16 {
    DEFAULT_STREAM_PORT
}

impl Default for SimTarget {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            stream_port: DEFAULT_STREAM_PORT,
            name: None,
        }
    }
}

impl SimTarget {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn with_ports(mut self, rpc_port: u16, stream_port: u16) -> Self {
        self.rpc_port = rpc_port;
        self.stream_port = stream_port;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Connection parameters as a JSON object, for follow-up hints.
    pub fn to_params(&self) -> Value {
        serde_json::json!({
            "address": self.address,
            "rpc_port": self.rpc_port,
            "stream_port": self.stream_port,
            "name": self.name,
        })
    }
}

impl std::fmt::Display for SimTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.address, self.rpc_port, self.stream_port)
    }
}

/// An open session with the simulation.
pub trait SimConnection: Send {
    /// Whether the server exposes `procedure`.
    fn supports(&self, procedure: &str) -> bool;

    /// Invoke a procedure.
    fn call(&mut self, procedure: &str, args: &[Value]) -> Result<Value, SimError>;

    /// Close the session. Further calls fail with [`SimError::Closed`].
    fn close(&mut self) -> Result<(), SimError>;
}

/// Opens sessions with the simulation.
pub trait SimConnector: Send + Sync {
    fn connect(
        &self,
        target: &SimTarget,
        timeout: Duration,
    ) -> Result<Box<dyn SimConnection>, SimError>;
}

/// Connector used when no simulation client is linked in. Every connect
/// attempt fails with [`SimError::Unavailable`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DisconnectedConnector;

impl SimConnector for DisconnectedConnector {
    fn connect(
        &self,
        _target: &SimTarget,
        _timeout: Duration,
    ) -> Result<Box<dyn SimConnection>, SimError> {
        Err(SimError::Unavailable {
            reason: "no simulation client is configured".to_string(),
        })
    }
}

/// Closes the wrapped connection when dropped.
pub struct Session {
    conn: Box<dyn SimConnection>,
}

impl Session {
    /// Connect and wrap the resulting connection.
    pub fn open(
        connector: &dyn SimConnector,
        target: &SimTarget,
        timeout: Duration,
    ) -> Result<Self, SimError> {
        connector
            .connect(target, timeout)
            .map(|conn| Self { conn })
    }

    pub fn conn(&mut self) -> &mut dyn SimConnection {
        self.conn.as_mut()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.conn.close() {
            tracing::debug!("Error closing simulation session: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory simulation used by tests.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Procedure table shared by every connection a [`FakeConnector`] opens.
    #[derive(Default, Clone)]
    pub struct FakeSim {
        pub responses: Arc<Mutex<HashMap<String, Result<Value, SimError>>>>,
        pub calls: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
        pub closed: Arc<Mutex<usize>>,
    }

    impl FakeSim {
        pub fn with(self, procedure: &str, response: Result<Value, SimError>) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(procedure.to_string(), response);
            self
        }

        pub fn calls_to(&self, procedure: &str) -> Vec<Vec<Value>> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| p == procedure)
                .map(|(_, args)| args.clone())
                .collect()
        }
    }

    pub struct FakeConnection {
        sim: FakeSim,
        open: bool,
    }

    impl SimConnection for FakeConnection {
        fn supports(&self, procedure: &str) -> bool {
            self.sim.responses.lock().unwrap().contains_key(procedure)
        }

        fn call(&mut self, procedure: &str, args: &[Value]) -> Result<Value, SimError> {
            if !self.open {
                return Err(SimError::Closed);
            }
            self.sim
                .calls
                .lock()
                .unwrap()
                .push((procedure.to_string(), args.to_vec()));
            match self.sim.responses.lock().unwrap().get(procedure) {
                Some(response) => response.clone(),
                None => Err(SimError::Unsupported {
                    procedure: procedure.to_string(),
                }),
            }
        }

        fn close(&mut self) -> Result<(), SimError> {
            self.open = false;
            *self.sim.closed.lock().unwrap() += 1;
            Ok(())
        }
    }

    /// Connector handing out [`FakeConnection`]s, or failing if `refuse` is set.
    #[derive(Default, Clone)]
    pub struct FakeConnector {
        pub sim: FakeSim,
        pub refuse: bool,
    }

    impl FakeConnector {
        pub fn new(sim: FakeSim) -> Self {
            Self { sim, refuse: false }
        }

        pub fn refusing() -> Self {
            Self {
                sim: FakeSim::default(),
                refuse: true,
            }
        }

        pub fn open(&self) -> FakeConnection {
            FakeConnection {
                sim: self.sim.clone(),
                open: true,
            }
        }
    }

    impl SimConnector for FakeConnector {
        fn connect(
            &self,
            target: &SimTarget,
            _timeout: Duration,
        ) -> Result<Box<dyn SimConnection>, SimError> {
            if self.refuse {
                return Err(SimError::Connect {
                    address: target.address.clone(),
                    rpc_port: target.rpc_port,
                    stream_port: target.stream_port,
                    reason: "connection refused".to_string(),
                });
            }
            Ok(Box::new(self.open()))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing::{FakeConnector, FakeSim};
    use super::*;

    #[test]
    fn test_target_defaults_from_json() {
        let target: SimTarget = serde_json::from_value(json!({"address": "10.0.0.2"})).unwrap();
        assert_eq!(target.rpc_port, DEFAULT_RPC_PORT);
        assert_eq!(target.stream_port, DEFAULT_STREAM_PORT);
        assert!(target.name.is_none());
        assert_eq!(target.to_string(), "10.0.0.2:50000/50001");
    }

    #[test]
    fn test_disconnected_connector_is_unavailable() {
        let err = DisconnectedConnector
            .connect(&SimTarget::default(), Duration::from_secs(1))
            .err()
            .unwrap();
        assert_eq!(err.kind(), "Unavailable");
    }

    #[test]
    fn test_session_closes_on_drop() {
        let sim = FakeSim::default().with("ping", Ok(json!("pong")));
        let connector = FakeConnector::new(sim.clone());
        {
            let mut session =
                Session::open(&connector, &SimTarget::default(), Duration::from_secs(1)).unwrap();
            assert_eq!(session.conn().call("ping", &[]).unwrap(), json!("pong"));
        }
        assert_eq!(*sim.closed.lock().unwrap(), 1);
    }
}
