// fanout CLI - run one command on many hosts at once

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{ArgGroup, Parser};
use tracing_subscriber::EnvFilter;

use fanout::executor::{BoundedDispatcher, RemoteExecutor, SshOptions, TaskSpec, DEFAULT_REMOTE_DIR};
use fanout::inventory::Inventory;
use fanout::output::{FanoutError, OutputFormat, OutputWriter, RunRecap};

#[derive(Parser)]
#[command(
    name = "fanout",
    about = "Run one command on many hosts at once",
    version,
    disable_colored_help = true,
    term_width = 0,
)]
#[command(group(ArgGroup::new("targets").required(true).args(["hostlist", "hosts"])))]
struct Cli {
    /// File with one destination host per line ([user@]host[:port])
    #[arg(long)]
    hostlist: Option<PathBuf>,

    /// Comma-separated host list (alternative to --hostlist)
    #[arg(short = 'H', long)]
    hosts: Option<String>,

    /// Command to execute on every host
    #[arg(short, long)]
    command: String,

    /// Seconds before a host is abandoned
    #[arg(long, default_value = "60")]
    timeout: u64,

    /// Directory where each host's output is stored [default: <temp dir>/fanout]
    #[arg(long, visible_alias = "out_dir")]
    out_dir: Option<PathBuf>,

    /// Maximum number of hosts worked on at once
    #[arg(long, visible_aliases = ["max-child", "max_child"], default_value = "5")]
    forks: usize,

    /// File copied to every host before the command runs
    #[arg(short, long, visible_alias = "filename")]
    file: Option<PathBuf>,

    /// Remote directory the file is copied into
    #[arg(long, default_value = DEFAULT_REMOTE_DIR)]
    remote_dir: String,

    /// SSH user for hosts that do not name one
    #[arg(short, long)]
    user: Option<String>,

    /// SSH port for hosts that do not name one
    #[arg(long, default_value = "22")]
    port: u16,

    /// Path to SSH private key
    #[arg(long)]
    private_key: Option<PathBuf>,

    /// SSH connection timeout in seconds
    #[arg(long, default_value = "30")]
    connect_timeout: u64,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode - only show failures and timeouts
    #[arg(short, long)]
    quiet: bool,

    /// Output format (text or json)
    #[arg(long, default_value = "text")]
    output_format: String,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "fanout=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output_format = OutputFormat::from_str(&cli.output_format).unwrap_or_else(|_| {
        eprintln!("Invalid output format: {}. Using 'text'.", cli.output_format);
        OutputFormat::Text
    });

    let code = match run(cli, output_format).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    };

    // Abandoned hosts may still hold worker threads; exit without joining them
    std::process::exit(code);
}

async fn run(cli: Cli, output_format: OutputFormat) -> Result<(), FanoutError> {
    let inventory = match (cli.hostlist.as_deref(), cli.hosts.as_deref()) {
        (Some(path), _) => Inventory::from_file(path)?,
        (None, Some(hosts)) => Inventory::from_cli_hosts(hosts)?,
        (None, None) => {
            return Err(FanoutError::Inventory {
                message: "No hosts given".to_string(),
                suggestion: Some("Pass --hostlist <FILE> or --hosts a,b,c".to_string()),
            })
        }
    };

    let out_dir = cli
        .out_dir
        .unwrap_or_else(|| std::env::temp_dir().join("fanout"));

    let mut spec = TaskSpec::new(cli.command)
        .with_timeout(Duration::from_secs(cli.timeout))
        .with_max_concurrency(cli.forks)
        .with_out_dir(out_dir)
        .with_remote_dir(cli.remote_dir);
    if let Some(file) = cli.file {
        spec = spec.with_file(file);
    }

    std::fs::create_dir_all(&spec.out_dir).map_err(|e| FanoutError::Io {
        message: format!("Failed to create output directory: {}", e),
        path: Some(spec.out_dir.clone()),
    })?;

    let mut options = SshOptions::new()
        .with_default_port(cli.port)
        .with_connect_timeout(Duration::from_secs(cli.connect_timeout));
    if let Some(user) = cli.user {
        options = options.with_default_user(user);
    }
    if let Some(key) = cli.private_key {
        options = options.with_private_key(key);
    }

    let spec = Arc::new(spec);
    let dispatcher = BoundedDispatcher::new(Arc::new(RemoteExecutor::new(options)), spec.clone())?;

    let items = inventory.work_items();
    let capacity = dispatcher.effective_capacity(items.len());

    let mut output = OutputWriter::new(output_format, cli.verbose, cli.quiet);
    output.print_dispatch_header(&spec.command, items.len(), capacity, &spec.out_dir);

    let start = Instant::now();
    let mut recap = RunRecap::new();
    let mut dispatch = dispatcher.dispatch_all(items)?;

    while let Some(completion) = dispatch.next().await {
        recap.record(&completion.outcome);
        output.print_completion(&completion);
    }

    recap.total_duration = start.elapsed();
    output.print_recap(&recap);

    Ok(())
}
