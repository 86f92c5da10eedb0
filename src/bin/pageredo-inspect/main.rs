//! Inspection tool for relation fork files and local WAL segments.
#![forbid(unsafe_code)]

mod ui;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use pageredo::primitives::page;
use pageredo::wal::{LocalWalPageReader, SegmentFileReader, WalAvailability};
use pageredo::types::INVALID_BACKEND_ID;
use pageredo::{
    BlockNumber, ForkNumber, Lsn, RedoError, RedoOptions, RelFileNode, StorageManager, TimeLineId,
};
use tracing_subscriber::EnvFilter;
use ui::{Theme, Ui};

#[derive(Parser, Debug)]
#[command(
    name = "pageredo-inspect",
    version,
    about = "Inspect relation fork files and WAL pages used by redo",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "PAGEREDO_CONFIG",
        value_name = "FILE",
        help = "TOML options file (defaults to the user config directory)"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_name = "DIR", help = "Override the data directory")]
    data_dir: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    plain: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the block count of every fork of a relation.
    Forks {
        #[arg(value_name = "SPC/DB/REL", value_parser = parse_rel)]
        rel: RelFileNode,
    },
    /// Show the header of one relation page.
    Page {
        #[arg(value_name = "SPC/DB/REL", value_parser = parse_rel)]
        rel: RelFileNode,
        #[arg(long, value_enum, default_value_t = ForkArg::Main)]
        fork: ForkArg,
        #[arg(long)]
        block: BlockNumber,
        #[arg(long, help = "Dump the page bytes")]
        dump: bool,
    },
    /// Read one WAL page through the local segment reader.
    WalPage {
        #[arg(long, default_value_t = 1)]
        timeline: u32,
        #[arg(long, value_name = "HI/LO", value_parser = parse_lsn, help = "Any position inside the page")]
        lsn: Lsn,
        #[arg(
            long,
            value_name = "HI/LO",
            value_parser = parse_lsn,
            help = "Flushed WAL position (defaults to the end of the page)"
        )]
        upto: Option<Lsn>,
        #[arg(long, help = "Dump the valid page bytes")]
        dump: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ForkArg {
    Main,
    Fsm,
    Vm,
    Init,
}

impl From<ForkArg> for ForkNumber {
    fn from(fork: ForkArg) -> Self {
        match fork {
            ForkArg::Main => ForkNumber::Main,
            ForkArg::Fsm => ForkNumber::FreeSpaceMap,
            ForkArg::Vm => ForkNumber::VisibilityMap,
            ForkArg::Init => ForkNumber::Init,
        }
    }
}

fn parse_rel(text: &str) -> Result<RelFileNode, String> {
    let parts: Vec<&str> = text.split('/').collect();
    let [spc, db, rel] = parts.as_slice() else {
        return Err("expected SPC/DB/REL".to_string());
    };
    let oid = |part: &str| part.parse::<u32>().map_err(|err| format!("{part}: {err}"));
    Ok(RelFileNode::new(oid(*spc)?, oid(*db)?, oid(*rel)?))
}

fn parse_lsn(text: &str) -> Result<Lsn, String> {
    text.parse().map_err(|err: RedoError| err.to_string())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("pageredo").join("redo.toml"))
}

fn load_options(cli: &Cli) -> Result<RedoOptions, RedoError> {
    let path = cli
        .config
        .clone()
        .or_else(|| default_config_path().filter(|path| path.exists()));
    let mut options = match path {
        Some(path) => RedoOptions::load(path)?,
        None => RedoOptions::default(),
    };
    if let Some(dir) = &cli.data_dir {
        options.data_dir = dir.clone();
    }
    options.validate()?;
    Ok(options)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let ui = Ui::new(if cli.plain { Theme::Plain } else { Theme::Auto });
    let options = load_options(&cli)?;

    match cli.command {
        Command::Forks { rel } => cmd_forks(&ui, options, rel)?,
        Command::Page {
            rel,
            fork,
            block,
            dump,
        } => cmd_page(&ui, options, rel, fork.into(), block, dump)?,
        Command::WalPage {
            timeline,
            lsn,
            upto,
            dump,
        } => cmd_wal_page(&ui, options, TimeLineId(timeline), lsn, upto, dump)?,
    }
    Ok(())
}

// Read-only: unlike `RedoEnv::open` this never creates the data directory.
fn open_storage(options: &RedoOptions) -> StorageManager {
    StorageManager::new(&options.data_dir, options.page_size, options.verify_checksums)
}

fn cmd_forks(ui: &Ui, options: RedoOptions, rel: RelFileNode) -> Result<(), RedoError> {
    let smgr = open_storage(&options);
    let smgr_rel = smgr.open(rel, INVALID_BACKEND_ID);
    let mut rows = Vec::new();
    for fork in ForkNumber::ALL {
        let value = if smgr_rel.exists(fork) {
            format!("{} blocks ({})", smgr_rel.nblocks(fork)?, rel.path(fork))
        } else {
            "missing".to_string()
        };
        rows.push((fork_label(fork), value));
    }
    ui.section(&format!("relation {rel}"), rows);
    Ok(())
}

fn cmd_page(
    ui: &Ui,
    options: RedoOptions,
    rel: RelFileNode,
    fork: ForkNumber,
    block: BlockNumber,
    dump: bool,
) -> Result<(), RedoError> {
    let smgr = open_storage(&options);
    let smgr_rel = smgr.open(rel, INVALID_BACKEND_ID);
    let mut data = vec![0u8; smgr.page_size()];
    smgr_rel.read_block(fork, block, &mut data)?;

    if page::is_new(&data) {
        ui.warn(&format!("block {block} of {} is uninitialized", rel.path(fork)));
    }
    let (lower, upper) = page::bounds(&data);
    let flags = page::flags(&data);
    ui.section(
        &format!("block {block} of {}", rel.path(fork)),
        [
            ("lsn", page::lsn(&data).to_string()),
            ("flags", format!("{flags:#06x}")),
            ("all visible", page::is_all_visible(&data).to_string()),
            ("just after fpw", page::is_just_after_fpw(&data).to_string()),
            ("lower", lower.to_string()),
            ("upper", upper.to_string()),
            ("checksum", format!("{:#010x}", page::stored_checksum(&data))),
            ("checksum ok", page::verify_checksum(block, &data).to_string()),
        ],
    );
    if dump {
        ui.dump("bytes", &data, 0);
    }
    Ok(())
}

fn cmd_wal_page(
    ui: &Ui,
    options: RedoOptions,
    timeline: TimeLineId,
    lsn: Lsn,
    upto: Option<Lsn>,
    dump: bool,
) -> Result<(), RedoError> {
    let page_size = options.wal_page_size;
    let target = Lsn(lsn.0 - lsn.0 % page_size as u64);
    let upto = upto.unwrap_or_else(|| target.advance(page_size as u64));
    if upto <= target {
        ui.warn(&format!("no WAL available at {target} (flushed up to {upto})"));
        return Ok(());
    }
    let wal_dir = options.data_dir.join(&options.wal_dir);
    let segments = SegmentFileReader::new(&wal_dir, options.wal_segment_size);
    let availability = Arc::new(WalAvailability::new(upto, timeline));
    let mut reader = LocalWalPageReader::new(
        segments,
        availability,
        page_size,
        options.wal_wait_timeout(),
    );
    let mut buf = vec![0u8; page_size];
    let valid = reader.read_page(target, 1, &mut buf)?;
    reader.close();
    ui.section(
        &format!("WAL page {target} on timeline {timeline}"),
        [
            ("directory", wal_dir.display().to_string()),
            ("flushed up to", upto.to_string()),
            ("valid bytes", valid.to_string()),
        ],
    );
    if dump {
        ui.dump("bytes", &buf[..valid], target.0 % options.wal_segment_size);
    }
    Ok(())
}

fn fork_label(fork: ForkNumber) -> &'static str {
    match fork {
        ForkNumber::Main => "main",
        ForkNumber::FreeSpaceMap => "fsm",
        ForkNumber::VisibilityMap => "vm",
        ForkNumber::Init => "init",
    }
}
