use std::cell::RefCell;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::rc::Rc;
use std::thread;

use camnode_core::capture::{MemoryClass, SensorModel};
use camnode_core::config::DeviceConfig;
use camnode_core::cycle::{CycleController, CycleFault, CycleReport};
use camnode_core::power::POWER_DOWN_STEPS;
use embassy_futures::block_on;

use crate::sim::{
    ConsoleSink, HostClock, SimCamera, SimRadio, SimSleep, TcpConnector, synthetic_jpeg,
};

/// Size of the generated frame when no image file is given.
pub const SYNTHETIC_FRAME_LEN: usize = 48 * 1024;

/// Status polls before the simulated station associates.
const ASSOCIATE_AFTER_POLLS: u8 = 3;

const STUB_ACCEPTED: &str = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 19\r\nConnection: close\r\n\r\n{\"status\":\"stored\"}";
const STUB_FAILING: &str = "HTTP/1.1 500 Internal Server Error\r\nContent-Type: application/json\r\nContent-Length: 27\r\nConnection: close\r\n\r\n{\"error\":\"storage offline\"}";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scenario {
    Nominal,
    LinkDown,
    EmptyCapture,
    EndpointRefused,
    EndpointRejecting,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Nominal,
        Scenario::LinkDown,
        Scenario::EmptyCapture,
        Scenario::EndpointRefused,
        Scenario::EndpointRejecting,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Scenario::Nominal => "nominal",
            Scenario::LinkDown => "link-down",
            Scenario::EmptyCapture => "empty-capture",
            Scenario::EndpointRefused => "endpoint-refused",
            Scenario::EndpointRejecting => "endpoint-rejecting",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        Self::ALL
            .into_iter()
            .find(|scenario| scenario.tag().eq_ignore_ascii_case(tag))
            .ok_or_else(|| format!("Unknown scenario `{tag}`"))
    }

    pub fn log_path(self) -> PathBuf {
        PathBuf::from("transcripts").join(format!("{}.log", self.tag()))
    }

    pub fn header(self) -> &'static str {
        match self {
            Scenario::Nominal => "Camera node emulator transcript: nominal cycle",
            Scenario::LinkDown => "Camera node emulator transcript: access point unreachable",
            Scenario::EmptyCapture => "Camera node emulator transcript: sensor returns no frames",
            Scenario::EndpointRefused => "Camera node emulator transcript: endpoint refuses connections",
            Scenario::EndpointRejecting => "Camera node emulator transcript: endpoint answers 500",
        }
    }

    /// `None` keeps the station from ever associating.
    pub fn associate_after(self) -> Option<u8> {
        match self {
            Scenario::LinkDown => None,
            _ => Some(ASSOCIATE_AFTER_POLLS),
        }
    }

    pub fn delivers_frames(self) -> bool {
        self != Scenario::EmptyCapture
    }

    /// Canned answer of the stub endpoint; `None` leaves the port closed.
    pub fn stub_response(self) -> Option<&'static str> {
        match self {
            Scenario::EndpointRefused => None,
            Scenario::EndpointRejecting => Some(STUB_FAILING),
            Scenario::Nominal | Scenario::LinkDown | Scenario::EmptyCapture => Some(STUB_ACCEPTED),
        }
    }
}

pub struct SessionOptions {
    pub scenario: Scenario,
    pub config: DeviceConfig,
    pub memory: MemoryClass,
    pub sensor: SensorModel,
    /// JPEG served by the simulated camera; a synthetic frame when `None`.
    pub image: Option<Vec<u8>>,
    pub realtime: bool,
    pub color: bool,
    pub transcript: bool,
}

/// Runs wake cycles against simulated peripherals and a real TCP endpoint.
pub struct Session {
    options: SessionOptions,
    transcript: Option<Rc<RefCell<TranscriptLogger>>>,
}

impl Session {
    pub fn new(options: SessionOptions) -> io::Result<Self> {
        let transcript = if options.transcript {
            Some(Rc::new(RefCell::new(TranscriptLogger::new(options.scenario)?)))
        } else {
            None
        };
        Ok(Self {
            options,
            transcript,
        })
    }

    /// Boots a fresh controller and runs it to sleep.
    ///
    /// Nothing carries over between cycles except the session options.
    pub fn run_cycle(&mut self, cycle: u32) -> io::Result<Result<CycleReport, CycleFault>> {
        let wake_cause = if cycle == 1 { "power-on" } else { "timer" };
        let plan: Vec<&str> = POWER_DOWN_STEPS.iter().map(|step| step.summary).collect();
        self.note(&format!(
            "boot: cycle={cycle} wake-cause={wake_cause} scenario={} memory={:?} endpoint={}",
            self.options.scenario.tag(),
            self.options.memory,
            self.options.config.endpoint,
        ))?;
        self.note(&format!("boot: power-down plan {}", plan.join(" -> ")))?;

        let image = self
            .options
            .image
            .clone()
            .unwrap_or_else(|| synthetic_jpeg(SYNTHETIC_FRAME_LEN));
        let controller = CycleController::new(
            self.options.config.clone(),
            self.options.memory,
            SimRadio::new(self.options.scenario.associate_after()),
            SimCamera::new(image, self.options.sensor, self.options.scenario.delivers_frames()),
            TcpConnector::default(),
            SimSleep::default(),
            HostClock::new(self.options.realtime),
            ConsoleSink::new(self.options.color, self.transcript.clone()),
        );
        let result = block_on(controller.run());

        match &result {
            Ok(report) => self.note(&format!(
                "cycle {cycle}: {}; asleep for {}s",
                report.outcome,
                self.options.config.timing.wake_interval.as_secs()
            ))?,
            Err(fault) => self.note(&format!("cycle {cycle}: {fault}"))?,
        }
        Ok(result)
    }

    fn note(&mut self, line: &str) -> io::Result<()> {
        println!("{line}");
        match &self.transcript {
            Some(transcript) => transcript.borrow_mut().append(line),
            None => Ok(()),
        }
    }
}

/// Local HTTP endpoint with a canned answer per scenario.
pub struct StubEndpoint {
    addr: SocketAddr,
}

impl StubEndpoint {
    pub fn spawn(scenario: Scenario) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        let addr = listener.local_addr()?;
        match scenario.stub_response() {
            // Dropping the listener leaves a port that refuses connections.
            None => drop(listener),
            Some(response) => {
                thread::spawn(move || serve(&listener, response));
            }
        }
        Ok(Self { addr })
    }

    pub fn url(&self) -> String {
        format!("http://{}/upload", self.addr)
    }
}

fn serve(listener: &TcpListener, response: &'static str) {
    for stream in listener.incoming().flatten() {
        if let Err(err) = answer(stream, response) {
            eprintln!("stub endpoint: {err}");
        }
    }
}

fn answer(mut stream: TcpStream, response: &str) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut content_length: u64 = 0;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((_, value)) = line
            .split_once(':')
            .filter(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }
    io::copy(&mut reader.take(content_length), &mut io::sink())?;
    stream.write_all(response.as_bytes())?;
    stream.flush()
}

pub struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(scenario: Scenario) -> io::Result<Self> {
        let path = scenario.log_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        writeln!(logger.writer, "# {}", scenario.header())?;
        writeln!(
            logger.writer,
            "# Timestamps are seconds since the emulated boot"
        )?;
        writeln!(logger.writer)?;
        logger.writer.flush()?;
        Ok(logger)
    }

    pub fn append(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{line}")?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_tags_round_trip() {
        for scenario in Scenario::ALL {
            assert_eq!(Scenario::from_tag(scenario.tag()), Ok(scenario));
        }
        assert!(Scenario::from_tag("sunny-day").is_err());
        assert_eq!(
            Scenario::EndpointRefused.log_path(),
            PathBuf::from("transcripts/endpoint-refused.log")
        );
    }

    #[test]
    fn stub_answers_after_draining_the_body() {
        let stub = StubEndpoint::spawn(Scenario::EndpointRejecting).expect("stub endpoint");
        let mut stream = TcpStream::connect(stub.addr).expect("connect to stub");
        stream
            .write_all(b"POST /upload HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcd")
            .expect("send request");

        let mut response = String::new();
        stream.read_to_string(&mut response).expect("read response");
        assert!(response.starts_with("HTTP/1.1 500 "));
    }

    #[test]
    fn refused_stub_leaves_port_closed() {
        let stub = StubEndpoint::spawn(Scenario::EndpointRefused).expect("stub endpoint");
        assert!(TcpStream::connect(stub.addr).is_err());
    }
}
