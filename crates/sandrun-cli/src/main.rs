//! Command-line front end for the execution orchestrator
//!
//! Stands in for the service layer that normally sits in front of the
//! orchestrator: it resolves the caller identity and tier from flags, submits
//! a single source file, and prints the result record as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use sandrun_core::config::{ConfigLoader, ExecutionMode, SandrunConfig};
use sandrun_core::{resolve_client_ip, CallerIdentity, ExecutionRequest, Orchestrator, Tier};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "sandrun", author, version, about = "Run untrusted code in resource-bounded sandboxes")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, help = "Path to a YAML configuration file (built-in defaults when omitted)")]
    config: Option<PathBuf>,

    #[clap(long, help = "Log level; overrides logging.level from the configuration")]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute one source file and print the result as JSON
    Run {
        #[clap(long, short)]
        language: String,

        #[clap(long, short, help = "Source file to execute")]
        file: PathBuf,

        #[clap(long, help = "File whose contents are fed to the program's stdin")]
        stdin: Option<PathBuf>,

        #[clap(flatten)]
        caller: CallerArgs,

        #[clap(long, help = "Fabricate output instead of running a sandbox")]
        mock: bool,

        #[clap(long, help = "Pretty-print the JSON result")]
        pretty: bool,
    },
    /// List the languages that can be executed
    Languages {
        #[clap(flatten)]
        caller: CallerArgs,
    },
}

#[derive(clap::Args, Debug)]
struct CallerArgs {
    #[clap(long, help = "Authenticated caller id; anonymous when omitted")]
    caller: Option<String>,

    #[clap(long, default_value = "basic", help = "Tier of the authenticated caller")]
    tier: String,

    #[clap(long, help = "Remote address of an anonymous caller")]
    client_addr: Option<String>,

    #[clap(long, help = "Forwarded-for header value, takes precedence over --client-addr")]
    forwarded_for: Option<String>,
}

impl CallerArgs {
    fn client_ip(&self) -> String {
        resolve_client_ip(self.forwarded_for.as_deref(), self.client_addr.as_deref())
    }

    fn apply(&self, request: ExecutionRequest) -> Result<ExecutionRequest> {
        let request = request.with_client_addr(self.client_ip());
        match &self.caller {
            Some(id) => Ok(request.with_caller(id.clone(), self.tier.parse::<Tier>()?)),
            None => Ok(request),
        }
    }

    fn identity(&self) -> Result<CallerIdentity> {
        match &self.caller {
            Some(id) => Ok(CallerIdentity::authenticated(id.clone(), self.tier.parse::<Tier>()?)),
            None => Ok(CallerIdentity::anonymous(self.client_ip())),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::from_file(path).await?,
        None => ConfigLoader::defaults()?,
    };

    let level = cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    let log_level_filter = level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    match cli.command {
        Commands::Run {
            language,
            file,
            stdin,
            caller,
            mock,
            pretty,
        } => {
            if mock {
                config.execution.mode = ExecutionMode::Mock;
            }
            run_file(&config, language, file, stdin, &caller, pretty).await
        }
        Commands::Languages { caller } => list_languages(&config, &caller),
    }
}

async fn run_file(
    config: &SandrunConfig,
    language: String,
    file: PathBuf,
    stdin: Option<PathBuf>,
    caller: &CallerArgs,
    pretty: bool,
) -> Result<()> {
    let code = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read source file {}", file.display()))?;

    let mut request = caller.apply(ExecutionRequest::new(code, language))?;
    if let Some(path) = stdin {
        let input = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read stdin file {}", path.display()))?;
        request = request.with_input(input);
    }

    let orchestrator = Orchestrator::from_config(config)?;
    let result = orchestrator.execute(request).await;

    let json = if pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{}", json);

    if let Some(error) = &result.error {
        log::warn!("Execution did not complete: {}", error);
    }
    Ok(())
}

fn list_languages(config: &SandrunConfig, caller: &CallerArgs) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    let languages = orchestrator.languages_for(&caller.identity()?)?;
    for language in languages {
        println!("{}", language);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_resolve_an_authenticated_caller() {
        let cli = Cli::try_parse_from([
            "sandrun", "run", "--language", "python", "--file", "main.py", "--caller", "u1", "--tier", "master",
        ])
        .unwrap();
        let Commands::Run { caller, language, .. } = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(language, "python");
        let identity = caller.identity().unwrap();
        assert_eq!(identity.tier, Tier::Master);
        assert_eq!(identity.quota_key(), "u1");
    }

    #[test]
    fn anonymous_caller_is_keyed_by_forwarded_address() {
        let cli = Cli::try_parse_from([
            "sandrun",
            "languages",
            "--tier",
            "master",
            "--client-addr",
            "10.0.0.1",
            "--forwarded-for",
            "203.0.113.7, 10.0.0.1",
        ])
        .unwrap();
        let Commands::Languages { caller } = cli.command else {
            panic!("expected languages command");
        };
        let identity = caller.identity().unwrap();
        assert_eq!(identity.tier, Tier::Anonymous);
        assert_eq!(identity.burst_key(), "ip:203.0.113.7");
    }

    #[test]
    fn unknown_tier_is_rejected() {
        let cli = Cli::try_parse_from(["sandrun", "languages", "--caller", "u1", "--tier", "gold"]).unwrap();
        let Commands::Languages { caller } = cli.command else {
            panic!("expected languages command");
        };
        assert!(caller.identity().is_err());
    }
}
