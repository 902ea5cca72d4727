// telecon-monitor
//
// Interactive console: live property table, text plots of selected
// properties, raw console, and a command line with history recall.
//
// Quit: Esc / Ctrl-C / :quit

use chrono::Local;
use clap::Parser;
use crossbeam::channel;
use crossterm::event::{KeyCode, KeyEventKind, KeyModifiers};
use crossterm::style::{Attribute, Color, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::{cursor, event, style, terminal, ExecutableCommand, QueueableCommand};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Write};
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;
use telecon::console::{Direction, RawSink, Transcript, ViewHandle, ViewObserver};
use telecon::data::export::OUTBOUND_PREFIX;
use telecon::data::{CommandCatalog, SubscriberCursor};
use telecon::link::LinkState;
use telecon::{ConsoleConfig, Engine};
use telecon_tools::{init_logging, ConsoleOpts};

const SPARK: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
const SPARK_WIDTH: usize = 48;

#[derive(Parser, Debug)]
#[command(name = "telecon-monitor", version, about = "Interactive instrument console")]
struct Cli {
    #[command(flatten)]
    opts: ConsoleOpts,

    /// Do not connect at startup
    #[arg(long)]
    offline: bool,

    /// Log to stderr (redirect it, or the screen gets garbled)
    #[arg(long)]
    log: bool,

    /// UI refresh rate
    #[arg(long, default_value_t = 20)]
    fps: u64,

    /// Console lines shown
    #[arg(long = "console-lines", default_value_t = 8)]
    console_lines: usize,
}

/// Counts refreshes per view, for the plot titles.
#[derive(Clone, Default)]
struct RefreshCounter(Rc<RefCell<BTreeMap<ViewHandle, u64>>>);

impl ViewObserver for RefreshCounter {
    fn refresh(&mut self, handle: ViewHandle, _cursor: &SubscriberCursor) {
        *self.0.borrow_mut().entry(handle).or_insert(0) += 1;
    }
}

enum Status {
    Info(String),
    Error(String),
}

struct App {
    engine: Engine,
    config: ConsoleConfig,
    catalog: CommandCatalog,
    views: Vec<ViewHandle>,
    refreshes: RefreshCounter,
    raw_rx: channel::Receiver<(Direction, String)>,
    transcript: Transcript,
    console: VecDeque<(Direction, String)>,
    console_lines: usize,
    input: String,
    status: Option<Status>,
}

impl App {
    fn new(config: ConsoleConfig, console_lines: usize) -> Result<App, telecon::ConsoleError> {
        let catalog = match &config.catalog_path {
            Some(path) => CommandCatalog::load(path)?,
            None => CommandCatalog::default(),
        };
        let (raw_tx, raw_rx) = channel::bounded(1024);
        let refreshes = RefreshCounter::default();
        let engine = Engine::from_config(&config)?
            .with_raw_sink(raw_tx)
            .with_observer(refreshes.clone());
        Ok(App {
            engine,
            config,
            catalog,
            views: Vec::new(),
            refreshes,
            raw_rx,
            transcript: Transcript::new(),
            console: VecDeque::new(),
            console_lines,
            input: String::new(),
            status: None,
        })
    }

    fn info(&mut self, msg: impl Into<String>) {
        self.status = Some(Status::Info(msg.into()));
    }

    fn error(&mut self, msg: impl std::fmt::Display) {
        self.status = Some(Status::Error(msg.to_string()));
    }

    fn connect(&mut self, host: Option<&str>, port: Option<&str>) {
        let (default_host, default_port) = match self.config.default_endpoint() {
            Ok((h, p)) => (h.to_string(), p),
            Err(e) => return self.error(e),
        };
        let host = host.unwrap_or(&default_host).to_string();
        let port = match port.map(str::parse::<u16>) {
            None => default_port,
            Some(Ok(p)) => p,
            Some(Err(_)) => return self.error("invalid port"),
        };
        match self.engine.connect(&host, port) {
            Ok(peer) => self.info(format!("connected to {}", peer)),
            Err(e) => self.error(e),
        }
    }

    fn pump(&mut self) {
        if self.engine.state() == LinkState::Connected {
            match self.engine.pump(Duration::ZERO) {
                Ok(reports) => {
                    if let Some(err) = reports.iter().find_map(|r| r.persistence.as_ref()) {
                        let msg = format!("store: {}", err);
                        self.error(msg);
                    }
                }
                Err(e) => self.error(e),
            }
        }
        let engine = &self.engine;
        self.views.retain(|h| engine.view(*h).is_some());
        self.drain_raw();
    }

    fn drain_raw(&mut self) {
        while let Ok((dir, line)) = self.raw_rx.try_recv() {
            match dir {
                Direction::Inbound => self.transcript.inbound(&line),
                Direction::Outbound => self.transcript.outbound(&line),
            }
            self.console.push_back((dir, line));
            while self.console.len() > self.console_lines {
                self.console.pop_front();
            }
        }
    }

    fn note(&mut self, text: String) {
        self.console.push_back((Direction::Inbound, text));
        while self.console.len() > self.console_lines {
            self.console.pop_front();
        }
    }

    fn view_at(&self, ordinal: Option<&str>) -> Option<ViewHandle> {
        match ordinal {
            None => self.views.last().copied(),
            Some(n) => n
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| self.views.get(i).copied()),
        }
    }

    /// Handles the input line. Returns false to quit.
    fn submit(&mut self) -> bool {
        let line = std::mem::take(&mut self.input);
        let line = line.trim();
        if line.is_empty() {
            return true;
        }
        match line.strip_prefix(':') {
            Some(cmd) => self.local_command(cmd),
            None => {
                match self.engine.send(line) {
                    Ok(_) => self.status = None,
                    Err(e) => self.error(format!("not sent: {}", e)),
                }
                true
            }
        }
    }

    fn local_command(&mut self, cmd: &str) -> bool {
        let args: Vec<&str> = cmd.split_whitespace().collect();
        match args[..] {
            ["quit"] | ["q"] => return false,
            ["help"] => self.info(
                ":connect [host] [port]  :disconnect  :plot <prop>..  :close [n]  \
                 :add <n> <prop>  :remove <n> <prop>  :catalog  :use <n>  \
                 :export log|console <file>  :clear  :quit",
            ),
            ["connect"] => self.connect(None, None),
            ["connect", host] => self.connect(Some(host), None),
            ["connect", host, port] => self.connect(Some(host), Some(port)),
            ["disconnect"] => match self.engine.disconnect() {
                Ok(()) => self.info("disconnected"),
                Err(e) => self.error(e),
            },
            ["plot", ref props @ ..] if !props.is_empty() => {
                let handle = self.engine.open_view(props.iter().copied());
                self.views.push(handle);
                self.info(format!("opened plot {}", self.views.len()));
            }
            ["close"] | ["close", _] => match self.view_at(args.get(1).copied()) {
                Some(handle) => {
                    if let Err(e) = self.engine.close_view(handle) {
                        self.error(e);
                    }
                    self.views.retain(|h| *h != handle);
                    self.refreshes.0.borrow_mut().remove(&handle);
                }
                None => self.error("no such plot"),
            },
            ["add", n, prop] => match self.view_at(Some(n)) {
                Some(handle) => {
                    if let Err(e) = self.engine.add_view_target(handle, prop) {
                        self.error(e);
                    }
                }
                None => self.error("no such plot"),
            },
            ["remove", n, prop] => match self.view_at(Some(n)) {
                Some(handle) => {
                    if let Err(e) = self.engine.remove_view_target(handle, prop) {
                        self.error(e);
                    }
                }
                None => self.error("no such plot"),
            },
            ["catalog"] => {
                let lines: Vec<String> = self
                    .catalog
                    .entries()
                    .enumerate()
                    .map(|(i, (group, entry))| {
                        format!("{:>3} [{}] {}  {}", i + 1, group, entry.command, entry.effect)
                    })
                    .collect();
                for line in lines {
                    self.note(line);
                }
            }
            ["use", n] => {
                let entry = n
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| self.catalog.entries().nth(i))
                    .map(|(_, e)| e.command.clone());
                match entry {
                    // only fills the input line
                    Some(command) => self.input = command,
                    None => self.error("no such catalog entry"),
                }
            }
            ["export", "log", path] => match self.engine.export_log(path) {
                Ok(n) => self.info(format!("wrote {} frames to {}", n, path)),
                Err(e) => self.error(e),
            },
            ["clear"] => {
                // what is still queued belongs to the cleared screen too
                self.drain_raw();
                self.console.clear();
                self.transcript.clear();
                self.info("console cleared");
            }
            ["export", "console", path] => match self.transcript.export(path) {
                Ok(n) => self.info(format!("wrote {} lines to {}", n, path)),
                Err(e) => self.error(e),
            },
            _ => self.error(format!("unknown command :{} (try :help)", cmd)),
        }
        true
    }

    /// Returns false to quit.
    fn on_key(&mut self, k: event::KeyEvent) -> bool {
        if k.kind != KeyEventKind::Press {
            return true;
        }
        match k.code {
            KeyCode::Esc => return false,
            KeyCode::Char('c') if k.modifiers.contains(KeyModifiers::CONTROL) => return false,
            KeyCode::Char(c) => self.input.push(c),
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Enter => return self.submit(),
            KeyCode::Up => {
                if let Some(cmd) = self.engine.history_up() {
                    self.input = cmd;
                }
            }
            KeyCode::Down => {
                if let Some(cmd) = self.engine.history_down() {
                    self.input = cmd;
                }
            }
            _ => {}
        }
        true
    }
}

fn sparkline(view: &SubscriberCursor, property: &str) -> (String, Option<f64>) {
    let points = view.series(property).unwrap_or_default();
    let shown = &points[points.len().saturating_sub(SPARK_WIDTH)..];
    let (min, max) = shown
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.value), hi.max(p.value))
        });
    let span = max - min;
    let line = shown
        .iter()
        .map(|p| {
            if span > 0.0 {
                let level = ((p.value - min) / span * (SPARK.len() - 1) as f64).round();
                SPARK[level as usize]
            } else {
                SPARK[SPARK.len() / 2]
            }
        })
        .collect();
    (line, shown.last().map(|p| p.value))
}

struct Tui {
    stdout: io::Stdout,
}

impl Tui {
    fn setup() -> io::Result<Self> {
        let mut stdout = io::stdout();
        terminal::enable_raw_mode()?;
        stdout.execute(terminal::EnterAlternateScreen)?;
        stdout.execute(cursor::Hide)?;
        Ok(Self { stdout })
    }

    fn teardown(&mut self) {
        let _ = self.stdout.execute(cursor::Show);
        let _ = self.stdout.execute(terminal::LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
        let _ = self.stdout.flush();
    }

    fn heading(&mut self, text: &str) -> io::Result<()> {
        self.stdout.queue(SetAttribute(Attribute::Bold))?;
        self.stdout.queue(style::Print(text))?;
        self.stdout.queue(SetAttribute(Attribute::Reset))?;
        self.stdout.queue(cursor::MoveToNextLine(1))?;
        Ok(())
    }

    fn draw(&mut self, app: &App) -> io::Result<()> {
        let engine = &app.engine;
        self.stdout.queue(cursor::MoveTo(0, 0))?;
        self.stdout
            .queue(terminal::Clear(terminal::ClearType::All))?;

        let peer = engine
            .peer()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        self.heading(&format!(
            "telecon-monitor  {}  link={} peer={}  frames={}  properties={}",
            Local::now().format("%H:%M:%S"),
            engine.state(),
            peer,
            engine.log().len(),
            engine.properties().len()
        ))?;
        self.stdout.queue(cursor::MoveToNextLine(1))?;

        self.heading(&format!("{:<24} {}", "property", "value"))?;
        for (property, value) in engine.properties().iter() {
            self.stdout.queue(style::Print(format!("{:<24} {}", property, value)))?;
            self.stdout.queue(cursor::MoveToNextLine(1))?;
        }

        let counts = app.refreshes.0.borrow();
        for (n, handle) in app.views.iter().enumerate() {
            let Some(view) = engine.view(*handle) else {
                continue;
            };
            self.stdout.queue(cursor::MoveToNextLine(1))?;
            self.heading(&format!(
                "plot {} ({} updates)",
                n + 1,
                counts.get(handle).copied().unwrap_or(0)
            ))?;
            for property in view.targets() {
                let (line, last) = sparkline(view, property);
                let last = last.map(|v| format!("{}", v)).unwrap_or_default();
                self.stdout.queue(SetForegroundColor(Color::Cyan))?;
                self.stdout
                    .queue(style::Print(format!("  {:<20} {:<48} {}", property, line, last)))?;
                self.stdout.queue(ResetColor)?;
                self.stdout.queue(cursor::MoveToNextLine(1))?;
            }
        }

        self.stdout.queue(cursor::MoveToNextLine(1))?;
        self.heading("console")?;
        for (dir, line) in &app.console {
            let (prefix, color) = match dir {
                Direction::Inbound => ("", Color::Blue),
                Direction::Outbound => (OUTBOUND_PREFIX, Color::Magenta),
            };
            self.stdout.queue(SetForegroundColor(color))?;
            self.stdout
                .queue(style::Print(format!("{}{}", prefix, line.trim_end())))?;
            self.stdout.queue(ResetColor)?;
            self.stdout.queue(cursor::MoveToNextLine(1))?;
        }

        self.stdout.queue(cursor::MoveToNextLine(1))?;
        match &app.status {
            Some(Status::Info(msg)) => {
                self.stdout.queue(SetForegroundColor(Color::Green))?;
                self.stdout.queue(style::Print(msg))?;
            }
            Some(Status::Error(msg)) => {
                self.stdout.queue(SetForegroundColor(Color::Red))?;
                self.stdout.queue(style::Print(msg))?;
            }
            None => {}
        }
        self.stdout.queue(ResetColor)?;
        self.stdout.queue(cursor::MoveToNextLine(1))?;
        self.stdout
            .queue(style::Print(format!("> {}_", app.input)))?;
        self.stdout.queue(cursor::MoveToNextLine(1))?;
        self.stdout.queue(SetForegroundColor(Color::DarkGrey))?;
        self.stdout.queue(style::Print(
            "Enter send  Up/Down history  :help commands  Esc quit",
        ))?;
        self.stdout.queue(ResetColor)?;

        self.stdout.flush()
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.log {
        init_logging();
    }

    let config = match cli.opts.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut app = match App::new(config, cli.console_lines.max(1)) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if !cli.offline {
        app.connect(None, None);
    }

    let mut tui = match Tui::setup() {
        Ok(tui) => tui,
        Err(e) => {
            eprintln!("terminal setup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let mut t = Tui {
            stdout: io::stdout(),
        };
        t.teardown();
        original_hook(panic_info);
    }));

    // Keyboard handler
    let (key_tx, key_rx) = channel::unbounded();
    std::thread::spawn(move || loop {
        if let Ok(ev) = event::read() {
            if key_tx.send(ev).is_err() {
                break;
            }
        }
    });

    let tick = channel::tick(Duration::from_millis(1000 / cli.fps.max(1)));
    'main: loop {
        crossbeam::select! {
            recv(key_rx) -> ev => {
                if let Ok(event::Event::Key(k)) = ev {
                    if !app.on_key(k) {
                        break 'main;
                    }
                }
            }
            recv(tick) -> _ => {
                app.pump();
                if tui.draw(&app).is_err() {
                    break 'main;
                }
            }
        }
    }

    tui.teardown();
    ExitCode::SUCCESS
}
