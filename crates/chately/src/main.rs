use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod output;

use output::Output;

#[derive(Parser)]
#[command(name = "chately")]
#[command(version)]
#[command(about = "Two-party chat inbox and conversation sync")]
#[command(long_about = "A command-line front end for the chately sync core.\n\nState lives in a file-backed document store under the data directory.")]
struct Cli {
    /// Output in JSON format (for agents/scripts)
    #[arg(short, long, global = true)]
    json: bool,

    /// Data directory (default: platform data dir/chately)
    #[arg(long, global = true, env = "CHATELY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Act as this user instead of the logged-in one
    #[arg(short, long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in as a user id
    Login {
        /// User id
        uid: String,
        /// Display name stored in the profile on first sign-in
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Forget the signed-in user
    Logout,

    /// Show or edit your profile
    Profile {
        /// New display name
        #[arg(short, long)]
        name: Option<String>,
        /// New bio
        #[arg(long)]
        bio: Option<String>,
        /// New location
        #[arg(long)]
        location: Option<String>,
    },

    /// Show current identity
    Whoami,

    /// Send a message
    Send {
        /// Peer user id
        peer: String,
        /// Message text
        message: String,
    },

    /// Read messages from a conversation
    Read {
        /// Peer user id
        peer: String,
        /// Maximum number of messages to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// List conversations, most recent first
    Inbox,

    /// Run a two-user exchange over an in-process store server
    Demo,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CHATELY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let output = Output::new(cli.json);

    let result = run(cli, &output).await;

    if let Err(e) = result {
        output.error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli, output: &Output) -> anyhow::Result<()> {
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?
            .join("chately"),
    };

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;

    let config = config::Config::load(&data_dir)?;
    let user = cli.user.as_deref();

    match cli.command {
        Commands::Login { uid, name } => {
            commands::identity::login(&uid, name, &data_dir, &config, output).await
        }
        Commands::Logout => commands::identity::logout(&config, output).await,
        Commands::Profile {
            name,
            bio,
            location,
        } => {
            let edit = chately_sync::ProfileEdit {
                display_name: name,
                bio,
                location,
            };
            commands::identity::profile(edit, &data_dir, &config, user, output).await
        }
        Commands::Whoami => commands::identity::whoami(&config, output).await,
        Commands::Send { peer, message } => {
            commands::message::send(&peer, &message, &data_dir, &config, user, output).await
        }
        Commands::Read { peer, limit } => {
            commands::message::read(&peer, limit, &data_dir, &config, user, output).await
        }
        Commands::Inbox => commands::inbox::list(&data_dir, &config, user, output).await,
        Commands::Demo => commands::demo::run(&config, output).await,
    }
}
