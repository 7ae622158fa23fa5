use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use clap::Parser;
use crossterm::event::{self, DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture, Event, MouseButton, MouseEventKind};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use muxview::client::{Client, ClientEvent};
use muxview::config::load_config;
use muxview::groups::{FileGroupStore, GroupStore, MemoryGroupStore};
use muxview::rendering;
use muxview::sync::ConnectionState;
use muxview::transport::TcpTransport;

/// Upper bound on how long the loop sleeps waiting for input.
const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "muxview", version, about = "Interactive client for a remote tmux session")]
struct Args {
    /// Address of the session bridge.
    #[arg(long, default_value = "127.0.0.1:7300")]
    addr: String,
    /// Authentication token sent on connect.
    #[arg(long, env = "MUXVIEW_TOKEN")]
    token: Option<String>,
    /// Configuration file (defaults to the usual search path).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Session name used to key persisted pane groups.
    #[arg(long, default_value = "default")]
    session: String,
    /// Write logs here; filter with MUXVIEW_LOG.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(path: Option<&PathBuf>) -> io::Result<()> {
    let filter = EnvFilter::try_from_env("MUXVIEW_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false);
    // stdout belongs to the UI; without a log file everything is discarded.
    let _ = match path {
        Some(p) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(p)?;
            builder.with_writer(Mutex::new(file)).try_init()
        }
        None => builder.with_writer(io::sink).try_init(),
    };
    Ok(())
}

fn translate(ev: Event) -> Option<ClientEvent> {
    match ev {
        Event::Key(key) => Some(ClientEvent::Key(key)),
        Event::Mouse(me) => {
            let (x, y) = (me.column as f32, me.row as f32);
            match me.kind {
                MouseEventKind::Down(MouseButton::Left) => Some(ClientEvent::PointerDown { x, y }),
                MouseEventKind::Drag(MouseButton::Left) => Some(ClientEvent::PointerMove { x, y }),
                MouseEventKind::Up(MouseButton::Left) => Some(ClientEvent::PointerUp { x, y }),
                MouseEventKind::Down(MouseButton::Right) => Some(ClientEvent::Cancel),
                _ => None,
            }
        }
        Event::Resize(cols, rows) => Some(ClientEvent::Resize { cols, rows }),
        _ => None,
    }
}

fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, client: &mut Client) -> io::Result<()> {
    let size = terminal.size()?;
    client.handle(ClientEvent::Resize { cols: size.width, rows: size.height }, Instant::now());
    terminal.draw(|f| rendering::draw(f, client))?;
    loop {
        let now = Instant::now();
        let wait = client.next_deadline()
            .map(|d| d.saturating_duration_since(now))
            .unwrap_or(IDLE_POLL)
            .min(IDLE_POLL);

        let mut redraw = false;
        if event::poll(wait)? {
            match event::read()? {
                Event::Paste(text) => client.paste(&text, Instant::now()),
                ev => {
                    if let Some(ev) = translate(ev) {
                        redraw |= client.handle(ev, Instant::now());
                    }
                }
            }
        }
        redraw |= client.handle(ClientEvent::Tick, Instant::now());

        if client.is_detached() { return Ok(()); }
        if client.connection_state() == ConnectionState::Disconnected {
            let reason = client.message().unwrap_or("connection lost").to_string();
            return Err(io::Error::new(io::ErrorKind::ConnectionAborted, reason));
        }
        if redraw {
            terminal.draw(|f| rendering::draw(f, client))?;
        }
    }
}

fn main() -> io::Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_ref())?;

    let config = load_config(args.config.as_deref()).map_err(io::Error::other)?;
    let store: Box<dyn GroupStore> = match FileGroupStore::for_session(&args.session) {
        Some(s) => Box::new(s),
        None => Box::new(MemoryGroupStore::new()),
    };
    let transport = TcpTransport::new(args.addr.clone(), args.token.clone());
    let mut client = Client::new(Box::new(transport), config, store);
    if let Err(e) = client.connect(Instant::now()) {
        // A reconnect is already scheduled; keep going.
        error!(error = %e, addr = %args.addr, "initial connect failed");
    }
    info!(addr = %args.addr, "starting");

    let mut stdout = io::stdout();
    enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture, EnableBracketedPaste)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal, &mut client);

    // Always restore the terminal, even on error.
    let _ = disable_raw_mode();
    let out = terminal.backend_mut();
    let _ = execute!(out, crossterm::style::Print("\x1b[0m"));
    let _ = execute!(out, DisableMouseCapture, DisableBracketedPaste, LeaveAlternateScreen);
    let _ = terminal.show_cursor();
    if let Err(e) = &result {
        eprintln!("muxview: {}", e);
    }
    result
}
