// src/main.rs

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use xyz::BuildOptions;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let rules = cli.rules.as_deref();

    // Compatibility flags take precedence over a subcommand
    if cli.clean || cli.clean_release {
        let config = commands::load_config(&cli.root, rules, None)?;
        return commands::cmd_clean(&config, cli.clean_release);
    }
    if cli.check_packages {
        let config = commands::load_config(&cli.root, rules, None)?;
        return commands::cmd_check_packages(&config);
    }

    match cli.command {
        Some(Commands::Build {
            targets,
            force,
            force_recursive,
            reconfigure,
            platform,
        }) => {
            let config = commands::load_config(&cli.root, rules, Some(&platform))?;
            let requests = commands::parse_targets(&targets)?;
            let options = BuildOptions {
                force,
                force_recursive,
                reconfigure,
            };
            commands::cmd_build(&config, &requests, options)
        }
        Some(Commands::Plan { targets, platform }) => {
            let config = commands::load_config(&cli.root, rules, Some(&platform))?;
            let requests = commands::parse_targets(&targets)?;
            commands::cmd_plan(&config, &requests)
        }
        Some(Commands::Clean { release }) => {
            let config = commands::load_config(&cli.root, rules, None)?;
            commands::cmd_clean(&config, release)
        }
        Some(Commands::CheckPackages) => {
            let config = commands::load_config(&cli.root, rules, None)?;
            commands::cmd_check_packages(&config)
        }
        None => {
            println!("xyz: no command given; try `xyz --help`");
            Ok(())
        }
    }
}
