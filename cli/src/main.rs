use clap::Parser;
use colored::*;
use std::io::Write;
use std::process;
use std::sync::Arc;

use freshen_core::{
    CommandFetcher, ConsoleSink, ContactDirectory, ContactProvider, JsonFileStore, KeyValueStore,
    RefreshConfig, RefreshScheduler, ThrottleGate,
};

#[derive(Parser, Debug)]
#[command(
    name = "freshen",
    version,
    about = "Keeps contact profiles fresh without flooding the profile service",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  Run the scheduler:              freshen --contacts contacts.json --fetch-cmd ./fetch-profile
  Single pass now:                freshen --contacts contacts.json --once
  Preview the next selection:     freshen --contacts contacts.json --dry-run
  Cooldown status:                freshen --status --state .freshen-state.json"
)]
pub struct Args {
    #[arg(long, required_unless_present = "status", help = "Contacts file (JSON with localId and contacts)")]
    pub contacts: Option<String>,

    #[arg(long, default_value = JsonFileStore::DEFAULT_PATH, help = "State file holding the cooldown timestamp")]
    pub state: String,

    #[arg(long = "fetch-cmd", default_value = "profile-fetch", help = "Helper invoked as <cmd> <id> [<e164>] for each fetch")]
    pub fetch_cmd: String,

    #[arg(long, help = "JSON config file overriding the refresh defaults")]
    pub config: Option<String>,

    #[arg(short = 'c', long, help = "Maximum concurrent profile fetches")]
    pub concurrency: Option<usize>,

    #[arg(long = "max", help = "Maximum profiles refreshed per pass")]
    pub max_per_pass: Option<usize>,

    #[arg(long, help = "Run a single pass immediately, ignoring the cooldown")]
    pub once: bool,

    #[arg(long, help = "Print the contacts the next pass would refresh and exit")]
    pub dry_run: bool,

    #[arg(long, help = "Print the remaining cooldown and exit")]
    pub status: bool,

    #[arg(short = 'v', long, default_value_t = false, help = "Verbose logging")]
    pub verbose: bool,
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args).await {
        eprint!("{}\r\n", format!("[!] {:#}", e).red());
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(&args.state));

    if args.status {
        print_status(&config, store);
        return Ok(());
    }

    let contacts_path = args
        .contacts
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("--contacts is required"))?;
    let directory = Arc::new(ContactDirectory::open(contacts_path)?);

    if args.dry_run {
        return dry_run(&config, store, directory).await;
    }

    print_banner();
    let fetcher = Arc::new(CommandFetcher::resolve(&args.fetch_cmd)?);
    print_run_config(&args, &config, fetcher.program());

    let scheduler = RefreshScheduler::new(config, store, directory, fetcher, ConsoleSink::new_ref());

    if args.once {
        scheduler.run_pass().await?;
        return Ok(());
    }

    let handle = scheduler.spawn();
    tokio::signal::ctrl_c().await?;
    print!(
        "\r\n{}\r\n",
        "[*] Stopping scheduler, waiting for the running pass (Ctrl-C again to force)...".yellow()
    );
    std::io::stdout().flush().ok();
    let second_interrupt = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    if !handle.stop_or(second_interrupt).await {
        eprint!("{}\r\n", "[!] Interrupted again, abandoning the running pass.".red());
        process::exit(130);
    }
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<RefreshConfig> {
    let mut config = match args.config {
        Some(ref path) => RefreshConfig::load(path)?,
        None => RefreshConfig::default(),
    };
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(max) = args.max_per_pass {
        config.max_per_pass = max;
    }
    Ok(config)
}

/// Selection preview. Uses a fetcher that never runs, so no helper is required.
async fn dry_run(
    config: &RefreshConfig,
    store: Arc<dyn KeyValueStore>,
    directory: Arc<ContactDirectory>,
) -> anyhow::Result<()> {
    let total = directory.list_all_contacts().await?.len();
    let scheduler = RefreshScheduler::new(
        config.clone(),
        store,
        directory,
        Arc::new(CommandFetcher::new("true")),
        ConsoleSink::new_ref(),
    );
    let selection = scheduler.preview().await?;

    println!("[DRY RUN] {} of {} contact(s) would be refreshed", selection.len(), total);
    for candidate in &selection {
        let note = if candidate.credential_cleared { " (expired credential)" } else { "" };
        match candidate.e164 {
            Some(ref e164) => println!("[DRY RUN] {} {}{}", candidate.id, e164, note),
            None => println!("[DRY RUN] {}{}", candidate.id, note),
        }
    }
    Ok(())
}

fn print_status(config: &RefreshConfig, store: Arc<dyn KeyValueStore>) {
    let gate = ThrottleGate::new(store, config.storage_key.clone(), config.cooldown());
    let remaining = gate.time_remaining();
    if remaining.is_zero() {
        println!("[+] Ready: next refresh pass may start now");
    } else {
        let secs = remaining.as_secs();
        println!(
            "[*] Cooling down: next refresh pass in {}h {:02}m {:02}s",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        );
    }
}

fn print_banner() {
    print!("{}\r\n", "freshen · contact profile refresh".bright_cyan().bold());
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

fn print_run_config(args: &Args, config: &RefreshConfig, helper: &str) {
    let mode_label = if args.once { "Single pass" } else { "Scheduler" };

    print!("{}\r\n", format!("[+] Mode:        {}", mode_label).magenta().bold());
    print!("{}\r\n", format!("[+] Helper:      {}", helper).green());
    print!("{}\r\n", format!("[+] State:       {}", args.state).blue());
    print!("{}\r\n", format!("[+] Cooldown:    {}h", config.cooldown_secs / 3600).blue());
    print!("{}\r\n", format!("[+] Batch cap:   {}", config.max_per_pass).blue());
    print!("{}\r\n", format!("[+] Concurrency: {}", config.concurrency).blue());
    print!("{}\r\n", format!("[+] Timeout:     {}m", config.fetch_timeout_secs / 60).blue());
    if let Some(ref path) = args.config {
        print!("{}\r\n", format!("[+] Config:      {}", path).yellow());
    }
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}
