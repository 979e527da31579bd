//! Capability probing for control actions whose procedure name differs
//! between simulation server versions.

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::SimError;
use crate::sim::SimConnection;

/// One way of performing an action: a guard and the call it makes.
pub struct Strategy {
    pub name: &'static str,
    pub predicate: fn(&dyn SimConnection) -> bool,
    pub action: fn(&mut dyn SimConnection, &Value) -> Result<Value, SimError>,
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy").field("name", &self.name).finish()
    }
}

/// Strategy that calls `$procedure` with the probe argument when the server
/// exposes it.
macro_rules! procedure_strategy {
    ($procedure:literal) => {
        Strategy {
            name: $procedure,
            predicate: |conn| conn.supports($procedure),
            action: |conn, arg| conn.call($procedure, std::slice::from_ref(arg)),
        }
    };
}

/// Outcome of a probe. Never an error: callers decide what a failure means.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Succeeded { via: String },
    Unsupported,
    Failed { reason: String },
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Succeeded { .. })
    }
}

/// Ordered strategies tried until one succeeds.
#[derive(Debug)]
pub struct CapabilityProbe {
    strategies: Vec<Strategy>,
}

impl CapabilityProbe {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self { strategies }
    }

    /// Try each strategy whose predicate holds, in order.
    ///
    /// Returns the first success; if every applicable strategy failed, the
    /// last failure; if none applied, `Unsupported`.
    pub fn run(&self, conn: &mut dyn SimConnection, arg: &Value) -> ProbeOutcome {
        let mut last_failure = None;
        for strategy in &self.strategies {
            if !(strategy.predicate)(&*conn) {
                continue;
            }
            match (strategy.action)(conn, arg) {
                Ok(_) => {
                    return ProbeOutcome::Succeeded {
                        via: strategy.name.to_string(),
                    };
                }
                Err(e) => {
                    tracing::debug!("Strategy {} failed: {}", strategy.name, e);
                    last_failure = Some(format!("{}: {}", strategy.name, e));
                }
            }
        }
        match last_failure {
            Some(reason) => ProbeOutcome::Failed { reason },
            None => ProbeOutcome::Unsupported,
        }
    }
}

/// Pause and time-warp controls built from the known procedure variants.
#[derive(Debug)]
pub struct SimControl {
    pause: CapabilityProbe,
    warp: CapabilityProbe,
}

impl Default for SimControl {
    fn default() -> Self {
        Self {
            pause: CapabilityProbe::new(vec![
                procedure_strategy!("krpc.set_paused"),
                procedure_strategy!("space_center.set_paused"),
                procedure_strategy!("space_center.set_pause"),
                procedure_strategy!("space_center.pause"),
            ]),
            warp: CapabilityProbe::new(vec![
                procedure_strategy!("space_center.warp_to"),
                procedure_strategy!("space_center.warp_to_ut"),
            ]),
        }
    }
}

impl SimControl {
    pub fn new(pause: CapabilityProbe, warp: CapabilityProbe) -> Self {
        Self { pause, warp }
    }

    pub fn pause(&self, conn: &mut dyn SimConnection) -> ProbeOutcome {
        self.pause.run(conn, &json!(true))
    }

    pub fn unpause(&self, conn: &mut dyn SimConnection) -> ProbeOutcome {
        self.pause.run(conn, &json!(false))
    }

    pub fn warp_to(&self, conn: &mut dyn SimConnection, ut: f64) -> ProbeOutcome {
        self.warp.run(conn, &json!(ut))
    }
}
