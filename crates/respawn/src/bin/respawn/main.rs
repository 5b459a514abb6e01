use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use respawn::{load_config, Supervisor, SupervisorConfig};
use respawn_daemon::clap::{ControlCommand, DaemonArgs};
use respawn_daemon::{Error, InstanceStatus};

const DEFAULT_CONFIG: &str = "respawn.toml";

#[derive(Parser)]
#[command(name = "respawn", version, about = "Run commands as a supervised daemon")]
struct Cli {
	/// Supervisor config file
	#[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG)]
	config: PathBuf,

	#[command(flatten)]
	daemon: DaemonArgs,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Daemonize and supervise the configured commands
	Run {
		/// Skip the interactive shell in the foreground
		#[arg(long)]
		no_shell: bool,
		/// Extra command to supervise, after `--`
		#[arg(last = true, value_name = "CMD")]
		cmd: Vec<String>,
	},
	/// Show whether the supervisor is running
	Status {
		#[arg(long)]
		json: bool,
	},
	/// Stop the running supervisor
	Stop,
}

#[tokio::main]
async fn main() {
	// background generations log into the capture file
	tracing_subscriber::fmt()
		.with_ansi(std::io::stdout().is_terminal())
		.init();

	let cli = Cli::parse();
	let config = match load(&cli) {
		Ok(c) => c,
		Err(e) => fail(e),
	};

	match cli.command {
		Command::Run { no_shell, cmd } => cmd_run(config, no_shell, &cmd).await,
		Command::Status { json } => cmd_status(&config, json),
		Command::Stop => cmd_stop(&config),
	}
}

fn load(cli: &Cli) -> respawn_daemon::Result<SupervisorConfig> {
	let mut config = load_config(&cli.config)?;
	cli.daemon.apply(&mut config.daemon);
	Ok(config)
}

fn fail(e: Error) -> ! {
	eprintln!("{} {}", "error:".red().bold(), e);
	std::process::exit(1);
}

fn pidfile(config: &SupervisorConfig) -> &Path {
	match config.daemon.pidfile.as_deref() {
		Some(path) => path,
		None => fail(Error::config("no pidfile configured, pass --pidfile or set daemon.pidfile")),
	}
}

async fn cmd_run(config: SupervisorConfig, no_shell: bool, cmd: &[String]) {
	let mut sup = match Supervisor::from_config(config) {
		Ok(s) => s,
		Err(e) => fail(e),
	};
	if no_shell {
		sup.set_interactive_shell(false);
	}
	if let Some((name, args)) = cmd.split_first() {
		if let Err(e) = sup.add_command(name, args.iter().cloned()) {
			fail(e);
		}
	}

	if let Err(e) = respawn_daemon::run(&mut sup).await {
		fail(e);
	}
	// a shell gate may still block on stdin, which would stall runtime shutdown
	std::process::exit(0);
}

fn cmd_status(config: &SupervisorConfig, json: bool) {
	let path = pidfile(config);
	let status = match respawn_daemon::status(path) {
		Ok(s) => s,
		Err(e) => fail(e),
	};

	if json {
		match serde_json::to_string_pretty(&status) {
			Ok(out) => println!("{}", out),
			Err(e) => fail(Error::config(e.to_string())),
		}
		return;
	}

	match status {
		InstanceStatus::Running { pid } => {
			println!("{} {} pid {}", "●".green(), "running".green(), pid)
		}
		InstanceStatus::Stale { pid } => println!(
			"{} {} pid {} ({} is stale)",
			"●".yellow(),
			"stopped".yellow(),
			pid,
			path.display()
		),
		InstanceStatus::NotRunning => println!("{} {}", "●".red(), "not running".red()),
	}
}

fn cmd_stop(config: &SupervisorConfig) {
	ControlCommand::Stop.execute(pidfile(config));
}
