use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use reel_config::{Config, OverridableConfig};

use crate::cliapp::make_app;
use crate::setup;

/// Default folder of the configuration, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = ".reel";

fn config_path(matches: &ArgMatches) -> PathBuf {
    matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();
    let config_path = config_path(&matches);

    match matches.subcommand() {
        Some(("config", matches)) => manage_config(&config_path, matches),
        Some(("token", matches)) => manage_token(matches),
        Some(("run", matches)) => {
            let mut config = load_config(&config_path)?;
            config.apply_override(extract_config_args(matches))?;
            run(config)
        }
        _ => unreachable!(),
    }
}

/// Loads the config folder, falling back to defaults if it does not exist.
fn load_config(path: &Path) -> Result<Config> {
    if Config::config_exists(path) {
        Config::from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))
    } else {
        Ok(Config::default())
    }
}

/// Extracts config overrides from the command line and environment.
fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    let processing = if matches.get_flag("processing") {
        Some("true".to_owned())
    } else if matches.get_flag("no_processing") {
        Some("false".to_owned())
    } else {
        None
    };

    OverridableConfig {
        host: matches.get_one("host").cloned(),
        port: matches.get_one("port").cloned(),
        shard_id: matches.get_one("shard_id").cloned(),
        token_secret: matches.get_one("token_secret").cloned(),
        processing,
        kafka_url: matches.get_one("kafka_broker_url").cloned(),
        log_level: matches.get_one("log_level").cloned(),
    }
}

#[allow(clippy::print_stdout)]
fn manage_config(path: &Path, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("init", _)) => init_config(path),
        Some(("show", _)) => {
            let config = load_config(path)?;
            print!("{}", config.to_yaml_string()?);
            Ok(())
        }
        _ => unreachable!(),
    }
}

#[allow(clippy::print_stdout)]
fn init_config(path: &Path) -> Result<()> {
    if Config::config_exists(path) {
        bail!("a config already exists in {}", path.display());
    }

    let mut config = Config::default();
    config.values_mut().auth.token_secret = Some(reel_auth::generate_secret());
    config
        .save_in_folder(path)
        .with_context(|| format!("failed to write config to {}", path.display()))?;

    println!("Wrote a new config to {}", path.display());
    println!("Add your projects to the `projects` section before running the gateway.");
    Ok(())
}

#[allow(clippy::print_stdout)]
fn manage_token(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("generate-secret", _)) => {
            println!("{}", reel_auth::generate_secret());
            Ok(())
        }
        _ => unreachable!(),
    }
}

pub fn run(config: Config) -> Result<()> {
    setup::init_logging(&config);
    setup::check_config(&config)?;
    setup::dump_spawn_infos(&config);
    setup::init_metrics(&config)?;

    reel_server::run(config)?;

    Ok(())
}
