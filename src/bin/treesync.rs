//! treesync CLI - rsync-style file and tree synchronization.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use treesync::codec::{read_signature, write_signature};
use treesync::{
    make_deltas, read_deltas, rebuild_file, serve, write_deltas, Batch, Configuration,
    ConsoleReporter, DeltaStats, ErrorPolicy, LocalParty, RemoteParty, RuleSet, Signature,
    SyncParty,
};

/// treesync - delta transfer for files and directory trees
#[derive(Parser)]
#[command(name = "treesync")]
#[command(version)]
#[command(about = "rsync-style delta synchronization of files and directory trees")]
#[command(long_about = None)]
struct Cli {
    /// Log more (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the signature stream of a basis file
    Signature {
        /// Basis file
        basis: PathBuf,

        /// Output signature file (default: <basis>.sig)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Block length in bytes
        #[arg(short, long, default_value_t = Configuration::DEFAULT_BLOCK_LENGTH)]
        block_length: usize,

        /// Strong digest bytes kept per block
        #[arg(short, long, default_value_t = Configuration::DEFAULT_STRONG_LEN)]
        strong_len: usize,
    },

    /// Write the delta stream of a new file against a signature
    Delta {
        /// Signature file of the basis
        signature: PathBuf,

        /// New file
        new: PathBuf,

        /// Output delta file (default: <new>.delta)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rebuild a file from its basis and a delta stream
    Patch {
        /// Basis file
        basis: PathBuf,

        /// Delta file
        delta: PathBuf,

        /// Output file (default: <basis>.patched)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Synchronize a directory tree into a local directory or a serve endpoint
    Sync {
        /// Source directory
        source: PathBuf,

        /// Target directory, or tcp://host:port of `treesync serve`
        target: String,

        /// TOML rule file, applied before the command-line rules
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Copy source paths matching this glob (default: **)
        #[arg(long)]
        copy: Vec<String>,

        /// Hide source paths matching this glob
        #[arg(long)]
        exclude: Vec<String>,

        /// Drop directory actions matching this glob
        #[arg(long)]
        prune: Vec<String>,

        /// Never erase target paths matching this glob
        #[arg(long)]
        retain: Vec<String>,

        /// Keep going after a failed action and report all failures
        #[arg(long)]
        continue_on_error: bool,

        /// Block length in bytes
        #[arg(short, long, default_value_t = Configuration::DEFAULT_BLOCK_LENGTH)]
        block_length: usize,
    },

    /// Expose a directory to remote `sync` runs
    Serve {
        /// Directory to serve
        root: PathBuf,

        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7373")]
        listen: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Signature {
            basis,
            output,
            block_length,
            strong_len,
        } => run_signature(&basis, output, block_length, strong_len),
        Commands::Delta {
            signature,
            new,
            output,
        } => run_delta(&signature, &new, output),
        Commands::Patch {
            basis,
            delta,
            output,
        } => run_patch(&basis, &delta, output),
        Commands::Sync {
            source,
            target,
            rules,
            copy,
            exclude,
            prune,
            retain,
            continue_on_error,
            block_length,
        } => {
            let config = Configuration::builder().block_length(block_length).build()?;
            let mut rule_set = match rules {
                Some(path) => RuleSet::load(&path)?,
                None => RuleSet::default(),
            };
            cli_rules(&mut rule_set, exclude, copy, prune, retain);
            let policy = if continue_on_error {
                ErrorPolicy::Continue
            } else {
                ErrorPolicy::Abort
            };
            run_sync(&source, &target, &rule_set, policy, config)
        }
        Commands::Serve { root, listen } => run_serve(&root, &listen),
    }
}

fn with_extension(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn run_signature(
    basis: &Path,
    output: Option<PathBuf>,
    block_length: usize,
    strong_len: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Configuration::builder()
        .block_length(block_length)
        .strong_len(strong_len)
        .build()?;
    let output = output.unwrap_or_else(|| with_extension(basis, "sig"));

    let signature = Signature::generate(BufReader::new(File::open(basis)?), &config)?;
    write_signature(BufWriter::new(File::create(&output)?), &signature)?;

    println!(
        "Generated signature: {} ({} blocks, {} bytes)",
        output.display(),
        signature.len(),
        signature.file_size()
    );
    Ok(())
}

fn run_delta(
    signature: &Path,
    new: &Path,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let output = output.unwrap_or_else(|| with_extension(new, "delta"));

    let signature = read_signature(BufReader::new(File::open(signature)?))?;
    let deltas = make_deltas(
        &Configuration::default(),
        &signature,
        BufReader::new(File::open(new)?),
    )?;
    write_deltas(BufWriter::new(File::create(&output)?), &deltas)?;

    let stats = DeltaStats::from_deltas(&deltas);
    println!(
        "Generated delta: {} ({} ops, {:.1}% matched)",
        output.display(),
        stats.copy_ops + stats.literal_ops,
        stats.ratio() * 100.0
    );
    Ok(())
}

fn run_patch(
    basis: &Path,
    delta: &Path,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let output = output.unwrap_or_else(|| with_extension(basis, "patched"));

    let deltas = read_deltas(BufReader::new(File::open(delta)?))?;
    let written = rebuild_file(basis, &deltas, &output)?;

    println!("Applied patch: {} ({written} bytes)", output.display());
    Ok(())
}

fn cli_rules(
    rules: &mut RuleSet,
    exclude: Vec<String>,
    copy: Vec<String>,
    prune: Vec<String>,
    retain: Vec<String>,
) {
    use treesync::Rule;

    let has_copy = !copy.is_empty()
        || rules
            .rules
            .iter()
            .any(|rule| matches!(rule, Rule::Copy { .. }));

    for pattern in exclude {
        rules.push(Rule::Exclude { pattern });
    }
    for pattern in copy {
        rules.push(Rule::copy(pattern));
    }
    if !has_copy {
        rules.push(Rule::copy("**"));
    }
    for pattern in prune {
        rules.push(Rule::Prune { pattern });
    }
    for pattern in retain {
        rules.push(Rule::Retain { pattern });
    }
}

fn run_sync(
    source: &Path,
    target: &str,
    rules: &RuleSet,
    policy: ErrorPolicy,
    config: Configuration,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = LocalParty::open(source, config.clone())?;
    let target: Box<dyn SyncParty> = match target.strip_prefix("tcp://") {
        Some(addr) => Box::new(RemoteParty::connect(addr)?),
        None => Box::new(LocalParty::with_config(target, config)),
    };

    let mut batch = Batch::start(&source)?;
    batch.set_error_policy(policy);
    for rule in &rules.rules {
        batch.apply(rule)?;
    }

    let mut reporter = ConsoleReporter::stdout();
    batch.prepare(&mut reporter)?;
    let summary = batch.execute(&*target, &mut reporter)?;
    info!(%summary, "sync complete");
    Ok(())
}

fn run_serve(root: &Path, listen: &str) -> Result<(), Box<dyn std::error::Error>> {
    let party = LocalParty::open(root, Configuration::default())?;
    let listener = TcpListener::bind(listen)?;
    eprintln!("Serving {} on {}", root.display(), listener.local_addr()?);

    for stream in listener.incoming() {
        let stream = stream?;
        stream.set_nodelay(true)?;
        info!(peer = ?stream.peer_addr().ok(), "connection");
        if let Err(e) = serve(&party, stream) {
            warn!(error = %e, "connection ended with error");
        }
    }
    Ok(())
}
