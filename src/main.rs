use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::{
    io,
    time::{Duration, Instant},
};

mod action;
mod app;
mod command;
mod db;
mod filter;
mod format;
mod os;
mod rate;
mod record;
mod sampler;
mod sort;
mod ui;

use app::App;
use filter::ViewOptions;
use sort::SortKey;

/// A top-style monitor for PostgreSQL backend processes.
#[derive(Parser, Debug)]
#[command(name = "pgtop", version, about)]
struct Args {
    /// Database server host
    #[arg(short = 'H', long, env = "PGHOST", default_value = "localhost")]
    host: String,

    /// Database server port
    #[arg(short = 'p', long, env = "PGPORT", default_value_t = 5432)]
    port: u16,

    /// Database user name
    #[arg(short = 'U', long, env = "PGUSER", default_value = "postgres")]
    user: String,

    /// Database user password
    #[arg(long, env = "PGPASSWORD")]
    password: Option<String>,

    /// Database to connect to
    #[arg(short = 'd', long, env = "PGDATABASE", default_value = "postgres")]
    dbname: String,

    /// Seconds between screen updates
    #[arg(short = 's', long, default_value_t = 5)]
    delay: u64,

    /// Number of process rows to show (0 fits the screen)
    #[arg(short = 'n', long, default_value_t = 0)]
    count: usize,

    /// Initial sort order: cpu, size, res, time or prio
    #[arg(short = 'o', long, default_value = "cpu")]
    order: String,

    /// Show idle processes
    #[arg(short = 'i', long)]
    show_idle: bool,

    /// Seconds a process must sleep before it counts as idle
    #[arg(long, default_value_t = 0)]
    idle_threshold: u64,

    /// Disable color output
    #[arg(long)]
    no_color: bool,
}

fn options_from(args: &Args) -> Result<ViewOptions> {
    let sort_key = SortKey::from_name(&args.order)
        .ok_or_else(|| eyre!("unknown sort order {:?}", args.order))?;
    if args.delay == 0 {
        return Err(eyre!("delay must be at least one second"));
    }
    Ok(ViewOptions {
        show_idle: args.show_idle,
        sort_key,
        display_count: if args.count == 0 {
            None
        } else {
            Some(args.count)
        },
        delay: Duration::from_secs(args.delay),
        color: !args.no_color,
        idle_threshold: args.idle_threshold,
        ..ViewOptions::default()
    })
}

fn pg_config(args: &Args) -> postgres::Config {
    let mut config = postgres::Config::new();
    config
        .host(&args.host)
        .port(args.port)
        .user(&args.user)
        .dbname(&args.dbname)
        .application_name("pgtop");
    if let Some(password) = &args.password {
        config.password(password);
    }
    config
}

fn main() -> Result<()> {
    env_logger::init();
    color_eyre::install()?;
    let args = Args::parse();
    let opts = options_from(&args)?;

    let mut app = App::new(
        Box::new(os::LinuxEnumerator::new()),
        Box::new(db::PgSessionSource::new(pg_config(&args))),
        Box::new(action::LibcDispatcher),
        Box::new(format::PasswdResolver::default()),
        opts,
        unsafe { libc::getuid() },
        vec![0],
    );

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("{err:?}");
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()>
where
    B::Error: std::error::Error + Send + Sync + 'static,
{
    app.tick(Instant::now());
    let mut last_tick = Instant::now();
    loop {
        if app.needs_clear {
            terminal.clear()?;
            app.needs_clear = false;
        }
        terminal.draw(|f| ui::ui(f, app))?;

        let timeout = app
            .opts
            .delay
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if event::poll(timeout)? {
            loop {
                if let Event::Key(key) = event::read()?
                    && key.kind == KeyEventKind::Press
                    && app.handle_key(key)
                {
                    return Ok(());
                }
                if !event::poll(Duration::from_millis(0))? {
                    break;
                }
            }
        }

        if app.force_update || last_tick.elapsed() >= app.opts.delay {
            app.tick(Instant::now());
            last_tick = Instant::now();
        }
    }
}
