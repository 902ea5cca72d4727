// telecon-sim
//
// Bench stand-in for the instrument: greets each client, acknowledges
// commands, and reports property changes on a fixed period.
//
// Commands understood: `get <property>`, `set <property> <value>`.

use chrono::Utc;
use clap::Parser;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};
use telecon_tools::init_logging;

const GREETING: &str = "Succesfully Connected to Host \r\n";

#[derive(Parser, Debug, Clone)]
#[command(name = "telecon-sim", version, about = "Simulated line-protocol instrument")]
struct Cli {
    /// Address to listen on
    #[arg(short = 'b', long = "bind", default_value = "127.0.0.1")]
    bind: String,

    /// TCP port to listen on
    #[arg(short = 'p', long = "port", default_value_t = 1234)]
    port: u16,

    /// Interval between unsolicited property reports
    #[arg(long = "period-ms", default_value_t = 1000)]
    period_ms: u64,
}

struct Instrument {
    seq: u64,
    started: Instant,
    properties: BTreeMap<String, String>,
}

impl Instrument {
    fn new() -> Instrument {
        let mut properties = BTreeMap::new();
        properties.insert("de1.temp".to_string(), "23.0/C".to_string());
        properties.insert("coil0.cur".to_string(), "0.000/A".to_string());
        properties.insert("mode".to_string(), "idle".to_string());
        Instrument {
            seq: 0,
            started: Instant::now(),
            properties,
        }
    }

    fn stamp(&mut self) -> String {
        self.seq += 1;
        let now = Utc::now();
        format!(
            "{} {} {}",
            now.format("%Y-%b-%d"),
            now.format("%H:%M:%S"),
            self.seq
        )
    }

    fn ack(&mut self) -> String {
        format!("{} ACK\r\n", self.stamp())
    }

    fn report(&mut self, property: &str) -> Option<String> {
        let value = self.properties.get(property)?.clone();
        Some(format!("{} note {} {}\r\n", self.stamp(), property, value))
    }

    /// Moves the drifting properties and reports them.
    fn tick(&mut self) -> Vec<String> {
        let t = self.started.elapsed().as_secs_f64();
        let temp = 23.0 + 0.5 * (t / 30.0).sin();
        let cur = 0.25 * (t / 7.0).cos();
        self.properties
            .insert("de1.temp".to_string(), format!("{:.2}/C", temp));
        self.properties
            .insert("coil0.cur".to_string(), format!("{:.3}/A", cur));
        ["de1.temp", "coil0.cur"]
            .iter()
            .filter_map(|p| self.report(p))
            .collect()
    }

    fn handle(&mut self, command: &str) -> Vec<String> {
        let tokens: Vec<&str> = command.split_whitespace().collect();
        let mut replies = vec![self.ack()];
        match tokens[..] {
            ["get", property] => replies.extend(self.report(property)),
            ["set", property, value] => {
                self.properties
                    .insert(property.to_string(), value.to_string());
                replies.extend(self.report(property));
            }
            _ => debug!("unknown command {:?}", command),
        }
        replies
    }
}

fn serve_client(stream: TcpStream, period: Duration) -> io::Result<()> {
    let peer: SocketAddr = stream.peer_addr()?;
    info!("connection from {}", peer);

    stream.set_read_timeout(Some(period))?;
    let mut out = stream.try_clone()?;
    let mut input = BufReader::new(stream);
    let mut instrument = Instrument::new();
    let mut pending = Vec::new();
    let mut next_tick = Instant::now() + period;

    out.write_all(GREETING.as_bytes())?;

    loop {
        match input.read_until(b'\n', &mut pending) {
            Ok(0) => break,
            Ok(_) => {
                let command = String::from_utf8_lossy(&pending).trim().to_string();
                pending.clear();
                if !command.is_empty() {
                    debug!("{} sent {:?}", peer, command);
                    for reply in instrument.handle(&command) {
                        out.write_all(reply.as_bytes())?;
                    }
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => return Err(e),
        }

        if Instant::now() >= next_tick {
            for line in instrument.tick() {
                out.write_all(line.as_bytes())?;
            }
            next_tick += period;
        }
    }

    info!("disconnected: {}", peer);
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    let period = Duration::from_millis(cli.period_ms.max(10));

    let listener = match TcpListener::bind((cli.bind.as_str(), cli.port)) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("could not listen on {}:{}: {}", cli.bind, cli.port, e);
            return ExitCode::FAILURE;
        }
    };
    info!("listening on {}:{}", cli.bind, cli.port);

    for connection in listener.incoming() {
        match connection {
            Ok(stream) => {
                thread::spawn(move || {
                    if let Err(e) = serve_client(stream, period) {
                        warn!("client error: {}", e);
                    }
                });
            }
            Err(e) => warn!("accept failed: {}", e),
        }
    }
    ExitCode::SUCCESS
}
