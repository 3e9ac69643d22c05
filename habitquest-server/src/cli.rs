use clap::{Parser, Subcommand};

const HELP_EPILOG: &str = r#"Server options can also be provided via environment variables:
  CONFIG_PATH (default: ./config.yaml)
  DB_PATH     (default: data/habitquest.db)
  PORT        (default: 5151 or config.listen_port)

Use `hash-secret` to produce bcrypt hashes for the parents' password_hash entries.
"#;

#[derive(Debug, Parser)]
#[command(
    name = "habitquest-server",
    version,
    about = "HabitQuest server",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Optional subcommand. Without one, runs the server.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read a password from stdin and print its bcrypt hash
    HashSecret {
        /// bcrypt cost factor
        #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
        cost: u32,
    },
}
