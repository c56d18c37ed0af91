use clap::Parser;
use miette::Result;
use plansync::cli::{Cli, Commands};

fn main() -> Result<()> {
    // Reset SIGPIPE so piping into `head` or `grep -q` exits quietly instead of panicking
    #[cfg(unix)]
    {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }
    }
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))?;

    let cli = Cli::parse();
    let global = cli.global;
    init_tracing(global.quiet, global.verbose)?;

    match cli.command {
        Commands::Init(args) => plansync::cli::commands::init::run(args, &global),
        Commands::Sync(args) => plansync::cli::commands::sync::run(args, &global),
        Commands::Status(args) => plansync::cli::commands::status::run(args, &global),
        Commands::Schema(args) => plansync::cli::commands::schema::run(args),
        Commands::Completions(args) => plansync::cli::commands::completions::run(args),
    }
}

fn init_tracing(quiet: bool, verbose: bool) -> Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("PLANSYNC_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| miette::miette!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
