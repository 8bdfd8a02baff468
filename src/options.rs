//! Parsing Options.
//! `cpn run --filename {def} [PLACE VALUE]...` or `cpn list --dir {dir}`

use std::path::PathBuf;
use std::time::Duration;

use clap::{Arg, ArgAction, Command};
use thiserror::Error;

pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Process exit codes of the `cpn` binary.
pub mod exit_codes {
    pub const GENERAL: u8 = 1;
    pub const WRONG_DEFINITION: u8 = 2;
    pub const WRONG_RUN: u8 = 3;
    pub const RUN_ERROR: u8 = 4;
}

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error(transparent)]
    Clap(#[from] clap::Error),
    #[error("can't split flags: {0}")]
    Shell(#[from] shellwords::MismatchedQuotes),
    #[error("markup needs PLACE VALUE pairs, got {0} values")]
    OddMarkup(usize),
}

fn make_options_parser() -> Command {
    let run = Command::new("run")
        .about("Run a net definition with a given markup")
        .arg(
            Arg::new("filename")
                .short('f')
                .long("filename")
                .value_name("FILE")
                .help("Net definition (.toml, .json or .ron)")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Load and build the net only")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .value_name("MS")
                .help("Cancel the run after this many milliseconds")
                .default_value("1000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("stats")
                .short('s')
                .long("stats")
                .value_name("FILE")
                .help("Path to file where place stats will be stored as JSON")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("dot")
                .long("dot")
                .value_name("FILE")
                .help("Write the net topology as Graphviz dot")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("markup")
                .value_name("PLACE VALUE")
                .num_args(0..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true),
        );
    let list = Command::new("list")
        .about("List net definitions")
        .arg(
            Arg::new("dir")
                .short('d')
                .long("dir")
                .value_name("DIR")
                .default_value(".")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .help("Load and build every definition found")
                .action(ArgAction::SetTrue),
        );

    Command::new("cpn")
        .no_binary_name(true)
        .about("Tool to manage colored Petri nets")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .subcommand(run)
        .subcommand(list)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub filename: PathBuf,
    pub dry_run: bool,
    pub timeout: Duration,
    pub stats: Option<PathBuf>,
    pub dot: Option<PathBuf>,
    pub markup: Vec<String>,
}

impl RunOptions {
    /// Markup as `(place, value)` pairs.
    pub fn markup_pairs(&self) -> Result<Vec<(String, String)>, OptionsError> {
        if self.markup.len() % 2 != 0 {
            return Err(OptionsError::OddMarkup(self.markup.len()));
        }
        Ok(self
            .markup
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    pub dir: PathBuf,
    pub check: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Options {
    Run(RunOptions),
    List(ListOptions),
}

impl Options {
    pub fn parse_from_str(s: &str) -> Result<Self, OptionsError> {
        let flags = shellwords::split(s)?;
        Self::parse_from_args(&flags)
    }

    /// Arguments without the binary name.
    pub fn parse_from_args(flags: &[String]) -> Result<Self, OptionsError> {
        let app = make_options_parser();
        let matches = app.try_get_matches_from(flags.iter())?;
        match matches.subcommand() {
            Some(("run", matches)) => {
                let markup = matches
                    .get_many::<String>("markup")
                    .map(|values| values.cloned().collect())
                    .unwrap_or_default();
                Ok(Options::Run(RunOptions {
                    filename: matches
                        .get_one::<PathBuf>("filename")
                        .cloned()
                        .unwrap_or_default(),
                    dry_run: matches.get_flag("dry-run"),
                    timeout: Duration::from_millis(
                        matches
                            .get_one::<u64>("timeout")
                            .copied()
                            .unwrap_or(DEFAULT_TIMEOUT_MS),
                    ),
                    stats: matches.get_one::<PathBuf>("stats").cloned(),
                    dot: matches.get_one::<PathBuf>("dot").cloned(),
                    markup,
                }))
            }
            Some(("list", matches)) => Ok(Options::List(ListOptions {
                dir: matches
                    .get_one::<PathBuf>("dir")
                    .cloned()
                    .unwrap_or_else(|| PathBuf::from(".")),
                check: matches.get_flag("check"),
            })),
            _ => Err(make_options_parser()
                .error(clap::error::ErrorKind::MissingSubcommand, "a subcommand is required")
                .into()),
        }
    }
}
