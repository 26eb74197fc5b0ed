mod session;
mod sim;

use std::env;
use std::fs;
use std::io::{self, IsTerminal};
use std::process;
use std::thread;
use std::time::Duration;

use camnode_core::capture::{MemoryClass, SensorModel};
use camnode_core::config::{CycleTiming, DeviceConfig};
use session::{Scenario, Session, SessionOptions, StubEndpoint};

const USAGE: &str = "\
Usage: camnode-emulator [options] [scenario]

Scenarios: nominal, link-down, empty-capture, endpoint-refused, endpoint-rejecting

Options:
  --scenario <name>          scenario to simulate (default: nominal)
  --endpoint <url>           upload URL           [CAMNODE_ENDPOINT]
  --ssid <name>              network name         [CAMNODE_WIFI_SSID]
  --passphrase <secret>      network passphrase   [CAMNODE_WIFI_PASSWORD]
  --device-id <id>           Device-ID header     [CAMNODE_DEVICE_ID]
  --api-key <key>            X-API-Key header     [CAMNODE_API_KEY]
  --wake-interval-secs <n>   sleep between cycles [CAMNODE_WAKE_INTERVAL_SECS]
  --image <path>             JPEG served by the simulated camera
  --memory <psram|dram>      memory class used to pick the capture preset
  --sensor <ov2640|ov3660|ov5640>
  --cycles <n>               wake cycles to run (default: 1)
  --stub                     serve the scenario's canned endpoint locally
  --realtime                 sleep through delays instead of skipping them
  --transcript               also write transcripts/<scenario>.log
  --no-color";

#[derive(Debug, Default, PartialEq)]
struct Cli {
    scenario: Option<String>,
    endpoint: Option<String>,
    ssid: Option<String>,
    passphrase: Option<String>,
    device_id: Option<String>,
    api_key: Option<String>,
    wake_interval_secs: Option<String>,
    image: Option<String>,
    memory: Option<String>,
    sensor: Option<String>,
    cycles: Option<String>,
    stub: bool,
    realtime: bool,
    transcript: bool,
    no_color: bool,
}

fn main() -> io::Result<()> {
    let cli = parse_args(env::args().skip(1)).unwrap_or_else(|err| exit_with_usage(&err));
    let (options, cycles, _stub) = build_options(cli).unwrap_or_else(|err| exit_with_usage(&err));
    let wake_interval = options.config.timing.wake_interval;
    let realtime = options.realtime;

    let mut session = Session::new(options)?;
    for cycle in 1..=cycles {
        if let Err(fault) = session.run_cycle(cycle)? {
            // A hosted restart is a nonzero exit; the supervisor starts us again.
            eprintln!("fatal: {fault}");
            process::exit(1);
        }
        if cycle < cycles && realtime {
            thread::sleep(wake_interval);
        }
    }
    Ok(())
}

fn exit_with_usage(err: &str) -> ! {
    eprintln!("{err}");
    eprintln!("{USAGE}");
    process::exit(2);
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Cli, String> {
    let mut cli = Cli::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
            _ => (arg.clone(), None),
        };

        let slot = match flag.as_str() {
            "--help" | "-h" => return Err("camnode camera node emulator".to_string()),
            "--stub" => {
                cli.stub = true;
                continue;
            }
            "--realtime" => {
                cli.realtime = true;
                continue;
            }
            "--transcript" => {
                cli.transcript = true;
                continue;
            }
            "--no-color" => {
                cli.no_color = true;
                continue;
            }
            "--scenario" => &mut cli.scenario,
            "--endpoint" => &mut cli.endpoint,
            "--ssid" => &mut cli.ssid,
            "--passphrase" => &mut cli.passphrase,
            "--device-id" => &mut cli.device_id,
            "--api-key" => &mut cli.api_key,
            "--wake-interval-secs" => &mut cli.wake_interval_secs,
            "--image" => &mut cli.image,
            "--memory" => &mut cli.memory,
            "--sensor" => &mut cli.sensor,
            "--cycles" => &mut cli.cycles,
            other if other.starts_with("--") => return Err(format!("Unknown option `{other}`")),
            _ => {
                if cli.scenario.replace(arg).is_some() {
                    return Err("Scenario given more than once".to_string());
                }
                continue;
            }
        };

        let value = match inline {
            Some(value) => value,
            None => args
                .next()
                .ok_or_else(|| format!("Expected value after {flag}"))?,
        };
        *slot = Some(value);
    }

    Ok(cli)
}

fn from_env(value: Option<String>, key: &str, fallback: &str) -> String {
    value
        .or_else(|| env::var(key).ok())
        .unwrap_or_else(|| fallback.to_string())
}

fn build_options(cli: Cli) -> Result<(SessionOptions, u32, Option<StubEndpoint>), String> {
    let scenario = match cli.scenario.as_deref() {
        Some(tag) => Scenario::from_tag(tag)?,
        None => Scenario::Nominal,
    };

    let stub = if cli.stub {
        Some(StubEndpoint::spawn(scenario).map_err(|err| format!("stub endpoint: {err}"))?)
    } else {
        None
    };
    let endpoint = match &stub {
        Some(stub) => stub.url(),
        None => from_env(cli.endpoint, "CAMNODE_ENDPOINT", "http://127.0.0.1:5000/upload"),
    };

    let mut timing = CycleTiming::DEFAULT;
    if let Some(secs) = cli
        .wake_interval_secs
        .or_else(|| env::var("CAMNODE_WAKE_INTERVAL_SECS").ok())
    {
        let secs: u64 = secs
            .parse()
            .map_err(|_| format!("Invalid wake interval `{secs}`"))?;
        timing = timing.with_wake_interval(Duration::from_secs(secs));
    }

    let config = DeviceConfig::from_parts(
        &from_env(cli.ssid, "CAMNODE_WIFI_SSID", "emulator-net"),
        &from_env(cli.passphrase, "CAMNODE_WIFI_PASSWORD", "emulator-pass"),
        &endpoint,
        &from_env(cli.device_id, "CAMNODE_DEVICE_ID", "ESP32_CAM_EMU"),
        &from_env(cli.api_key, "CAMNODE_API_KEY", "emulator-key"),
    )
    .map_err(|err| format!("Invalid configuration: {err}"))?
    .with_timing(timing);

    let memory = match cli.memory.as_deref() {
        None | Some("psram") => MemoryClass::Abundant,
        Some("dram") => MemoryClass::Constrained,
        Some(other) => return Err(format!("Unknown memory class `{other}`")),
    };
    let sensor = match cli.sensor.as_deref() {
        None | Some("ov2640") => SensorModel::Ov2640,
        Some("ov3660") => SensorModel::Ov3660,
        Some("ov5640") => SensorModel::Ov5640,
        Some(other) => return Err(format!("Unknown sensor `{other}`")),
    };
    let image = match cli.image {
        Some(path) => Some(fs::read(&path).map_err(|err| format!("Cannot read {path}: {err}"))?),
        None => None,
    };
    let cycles = match cli.cycles {
        Some(value) => value
            .parse()
            .ok()
            .filter(|cycles| *cycles > 0)
            .ok_or_else(|| format!("Invalid cycle count `{value}`"))?,
        None => 1,
    };

    let options = SessionOptions {
        scenario,
        config,
        memory,
        sensor,
        image,
        realtime: cli.realtime,
        color: !cli.no_color && io::stdout().is_terminal(),
        transcript: cli.transcript,
    };
    Ok((options, cycles, stub))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_flags_and_positional_scenario() {
        let cli = parse_args(args(&[
            "link-down",
            "--endpoint=http://10.0.0.2:8080/in",
            "--cycles",
            "2",
            "--realtime",
        ]))
        .expect("valid arguments");

        assert_eq!(cli.scenario.as_deref(), Some("link-down"));
        assert_eq!(cli.endpoint.as_deref(), Some("http://10.0.0.2:8080/in"));
        assert_eq!(cli.cycles.as_deref(), Some("2"));
        assert!(cli.realtime);
        assert!(!cli.stub);
    }

    #[test]
    fn rejects_unknown_and_incomplete_flags() {
        assert!(parse_args(args(&["--frobnicate"])).is_err());
        assert!(parse_args(args(&["--endpoint"])).is_err());
        assert!(parse_args(args(&["nominal", "link-down"])).is_err());
    }

    #[test]
    fn builds_configuration_from_flags() {
        let cli = parse_args(args(&[
            "--scenario",
            "empty-capture",
            "--endpoint",
            "http://192.168.1.20/upload",
            "--ssid",
            "lab",
            "--passphrase",
            "password1",
            "--device-id",
            "CAM_7",
            "--api-key",
            "k",
            "--wake-interval-secs",
            "300",
            "--memory",
            "dram",
        ]))
        .expect("valid arguments");

        let (options, cycles, stub) = build_options(cli).expect("valid options");
        assert!(stub.is_none());
        assert_eq!(cycles, 1);
        assert_eq!(options.scenario, Scenario::EmptyCapture);
        assert_eq!(options.memory, MemoryClass::Constrained);
        assert_eq!(options.config.device_id.as_str(), "CAM_7");
        assert_eq!(options.config.endpoint.port(), 80);
        assert_eq!(
            options.config.timing.wake_interval,
            Duration::from_secs(300)
        );
    }
}
