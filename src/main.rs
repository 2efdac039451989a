#![allow(missing_docs)]

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "scriptreload", about = "Script include, line map and bytecode cache inspection")]
struct Cli {
	#[command(flatten)]
	sources: cmd::SourceArgs,
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	Info(cmd::info::Args),
	Expand(cmd::expand::Args),
	Cache(cmd::cache::Args),
}

fn main() {
	init_tracing();
	if let Err(err) = run() {
		eprintln!("error: {err}");
		std::process::exit(1);
	}
}

fn init_tracing() {
	let filter = EnvFilter::try_from_env("SCRIPTRELOAD_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn run() -> scriptreload::reload::Result<()> {
	let cli = Cli::parse();
	let env = cli.sources.into_env()?;

	match cli.command {
		Commands::Info(args) => cmd::info::run(&env, args),
		Commands::Expand(args) => cmd::expand::run(&env, args),
		Commands::Cache(args) => cmd::cache::run(&env, args),
	}
}
