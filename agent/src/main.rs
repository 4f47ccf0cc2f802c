//! Slick test agent.
//!
//! Repeatedly runs the configured phase pipeline: discover capabilities,
//! request a test from the slick queue, run it, and report status, until a
//! phase asks the agent to exit.

use anyhow::{Context, Result};
use clap::Parser;
use reqwest::blocking::Client;
use tracing::{debug, info, warn};

use slick_agent::agent::Agent;
use slick_agent::exit_codes;
use slick_agent::io::config::ConfigStore;
use slick_agent::io::phase::PhaseApplier;
use slick_agent::io::process::Shell;
use slick_agent::io::queue::HttpQueue;
use slick_agent::io::grpc::GrpcConnector;
use slick_agent::io::reporter::StatusReporter;
use slick_agent::logging;
use slick_agent::options::{AgentOptions, parse_groups};

#[derive(Parser, Debug)]
#[command(
    name = "slick-agent",
    version,
    about = "Run a configurable test agent against a slick server"
)]
struct Cli {
    /// Configuration location (file path or http(s) URL).
    #[arg(long = "conf", env = "SLICK_AGENT_CONF")]
    conf: String,
    /// Comma separated list of groups.
    #[arg(long, env = "SLICK_AGENT_GROUPS", default_value = "")]
    groups: String,
    /// Shell to use for command execution.
    #[arg(long, env = "SLICK_AGENT_SHELL")]
    shell: Option<String>,
    /// Option to pass to the shell before the command.
    #[arg(long = "shell-arg", env = "SLICK_AGENT_SHELL_ARG", allow_hyphen_values = true)]
    shell_arg: Option<String>,
    /// Enable debug logging.
    #[arg(long, env = "SLICK_AGENT_DEBUG")]
    debug: bool,
}

impl Cli {
    fn into_options(self) -> AgentOptions {
        let default_shell = Shell::default();
        AgentOptions {
            config_location: self.conf,
            groups: parse_groups(&self.groups),
            shell: Shell {
                program: self.shell.unwrap_or(default_shell.program),
                arg: self.shell_arg.unwrap_or(default_shell.arg),
            },
            debug: self.debug,
        }
    }
}

fn main() {
    let options = Cli::parse().into_options();
    logging::init(options.debug);
    if let Err(err) = run(options) {
        eprintln!("{err:#}");
        std::process::exit(exit_codes::FATAL);
    }
    std::process::exit(exit_codes::OK);
}

fn run(options: AgentOptions) -> Result<()> {
    info!("initializing agent");
    debug!(?options, "program options");
    info!(location = %options.config_location, "loading configuration");
    let store = ConfigStore::open(&options.config_location).context("error loading configuration")?;
    match serde_yaml::to_string(store.config()) {
        Ok(yaml) => info!("configuration:\n{yaml}"),
        Err(err) => warn!("unable to render configuration: {err}"),
    }

    let slick = &store.config().slick;
    let reporter = if slick.grpc_url.is_empty() {
        None
    } else {
        match StatusReporter::connect(GrpcConnector::new(&slick.grpc_url), &slick.api_token) {
            Ok(reporter) => Some(reporter),
            Err(err) => {
                warn!("error creating status reporter: {err:#}");
                None
            }
        }
    };

    let http = Client::builder().build().context("build http client")?;
    let mut agent = Agent::new(
        store,
        PhaseApplier::new(options.shell),
        HttpQueue::new(http),
        reporter,
        options.groups,
    );
    agent.run(|iteration| debug!(?iteration, "iteration finished"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal() {
        let cli = Cli::parse_from(["slick-agent", "--conf", "agent.yml"]);
        let options = cli.into_options();
        assert_eq!(options.config_location, "agent.yml");
        assert!(options.groups.is_empty());
        assert_eq!(options.shell, Shell::default());
        assert!(!options.debug);
    }

    #[test]
    fn parse_all_flags() {
        let cli = Cli::parse_from([
            "slick-agent",
            "--conf",
            "http://conf.local/agent.yml",
            "--groups",
            "smoke, nightly",
            "--shell",
            "/bin/zsh",
            "--shell-arg",
            "-lc",
            "--debug",
        ]);
        let options = cli.into_options();
        assert_eq!(options.groups, vec!["smoke", "nightly"]);
        assert_eq!(options.shell.program, "/bin/zsh");
        assert_eq!(options.shell.arg, "-lc");
        assert!(options.debug);
    }

    #[test]
    fn shell_arg_accepts_dash_values() {
        let cli = Cli::parse_from(["slick-agent", "--conf", "agent.yml", "--shell-arg", "-c"]);
        assert_eq!(cli.into_options().shell.arg, "-c");
    }

    #[test]
    fn conf_is_required() {
        assert!(Cli::try_parse_from(["slick-agent"]).is_err());
    }
}
