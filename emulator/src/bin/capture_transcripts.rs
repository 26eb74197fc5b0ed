use std::io;

use camnode_core::capture::{MemoryClass, SensorModel};
use camnode_core::config::DeviceConfig;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

#[allow(dead_code)]
#[path = "../sim.rs"]
mod sim;

use session::{Scenario, Session, SessionOptions, StubEndpoint};

fn main() -> io::Result<()> {
    for scenario in Scenario::ALL {
        record_scenario(scenario)?;
    }
    Ok(())
}

fn record_scenario(scenario: Scenario) -> io::Result<()> {
    let stub = StubEndpoint::spawn(scenario)?;
    let config = DeviceConfig::from_parts(
        "transcript-net",
        "transcript-pass",
        &stub.url(),
        "ESP32_CAM_TRANSCRIPT",
        "transcript-key",
    )
    .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;

    let mut session = Session::new(SessionOptions {
        scenario,
        config,
        memory: MemoryClass::Abundant,
        sensor: SensorModel::Ov2640,
        image: None,
        realtime: false,
        color: false,
        transcript: true,
    })?;
    session.run_cycle(1)?.map_err(|fault| io::Error::other(fault.to_string()))?;
    Ok(())
}
