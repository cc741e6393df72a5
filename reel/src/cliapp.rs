//! This module implements the definition of the command line app.

use clap::builder::ValueParser;
use clap::{Arg, ArgAction, ArgGroup, Command, ValueHint};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "The ingestion gateway for session replays.";

pub fn make_app() -> Command {
    Command::new("reel")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .propagate_version(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_hint(ValueHint::DirPath)
                .value_parser(ValueParser::path_buf())
                .help("The path to the config folder."),
        )
        .subcommand(
            Command::new("run")
                .about("Run the gateway")
                .after_help(
                    "This runs the gateway in the foreground until it's shut down.  It will bind \
                     to the port and network interface configured in the config file.",
                )
                .arg(
                    Arg::new("host")
                        .value_name("HOST")
                        .short('H')
                        .long("host")
                        .env("REEL_HOST")
                        .help("The host dns name."),
                )
                .arg(
                    Arg::new("port")
                        .value_name("PORT")
                        .short('P')
                        .long("port")
                        .env("REEL_PORT")
                        .help("The server port."),
                )
                .arg(
                    Arg::new("shard_id")
                        .value_name("SHARD")
                        .long("shard-id")
                        .env("REEL_SHARD_ID")
                        .help("The shard encoded into minted session ids, between 0 and 255."),
                )
                .arg(
                    Arg::new("token_secret")
                        .value_name("SECRET")
                        .long("token-secret")
                        .env("REEL_TOKEN_SECRET")
                        .hide_env_values(true)
                        .help("The secret that signs session tokens."),
                )
                .arg(
                    Arg::new("processing")
                        .long("processing")
                        .env("REEL_PROCESSING_ENABLED")
                        .action(ArgAction::SetTrue)
                        .help("Enable the Kafka hand-off."),
                )
                .arg(
                    Arg::new("no_processing")
                        .long("no-processing")
                        .action(ArgAction::SetTrue)
                        .help("Disable the Kafka hand-off."),
                )
                .group(
                    ArgGroup::new("processing_group")
                        .args(["processing", "no_processing"])
                        .multiple(false),
                )
                .arg(
                    Arg::new("kafka_broker_url")
                        .value_name("KAFKA_BROKER_URL")
                        .long("kafka-broker-url")
                        .env("REEL_KAFKA_URL")
                        .help("Kafka broker URL."),
                )
                .arg(
                    Arg::new("log_level")
                        .value_name("LEVEL")
                        .long("log-level")
                        .env("REEL_LOG_LEVEL")
                        .help("The log level: error, warn, info, debug or trace."),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Manage the gateway config")
                .after_help(
                    "This command provides basic config management.  It can be used primarily to \
                     initialize a new config file for the gateway.",
                )
                .subcommand_required(true)
                .subcommand(
                    Command::new("init")
                        .about("Initialize a new gateway config")
                        .after_help(
                            "This writes a default config with a freshly generated token secret \
                             into the config folder.",
                        ),
                )
                .subcommand(
                    Command::new("show")
                        .about("Show the entire gateway config")
                        .after_help(
                            "This prints the effective config as YAML, including all defaults.",
                        ),
                ),
        )
        .subcommand(
            Command::new("token")
                .about("Manage session token secrets")
                .subcommand_required(true)
                .subcommand(
                    Command::new("generate-secret")
                        .about("Print a random secret for auth.token_secret"),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_app() {
        make_app().debug_assert();
    }

    #[test]
    fn test_parse_run_overrides() {
        let matches = make_app()
            .try_get_matches_from(["reel", "run", "--port", "9001", "--processing"])
            .unwrap();

        let (name, run) = matches.subcommand().unwrap();
        assert_eq!(name, "run");
        assert_eq!(run.get_one::<String>("port").map(String::as_str), Some("9001"));
        assert!(run.get_flag("processing"));
        assert!(!run.get_flag("no_processing"));
    }

    #[test]
    fn test_processing_flags_conflict() {
        let result = make_app().try_get_matches_from([
            "reel",
            "run",
            "--processing",
            "--no-processing",
        ]);
        assert!(result.is_err());
    }
}
