use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "hapolicy",
    about = "hapolicy — placement and transition planning for HA clusters",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scheduling pass over a cluster snapshot.
    ///
    /// Prints where every resource will run and the actions needed to get
    /// there. Logs go to stderr so the output can be piped.
    Simulate {
        /// Snapshot file (JSON)
        #[arg(short, long)]
        input: String,
        /// Policy file (TOML); defaults apply when omitted
        #[arg(short, long)]
        config: Option<String>,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
        /// Also write the transition graph as Graphviz to this file
        #[arg(long)]
        dot: Option<String>,
    },
    /// Print the effective policy configuration
    Config {
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hapolicy=info".parse()?)
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate { input, config, format, dot } => {
            commands::simulate::simulate(&input, config.as_deref(), &format, dot.as_deref())
        }
        Commands::Config { config } => {
            commands::config::show(config.as_deref())
        }
    }
}
