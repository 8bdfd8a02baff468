use std::fs;
use std::process::ExitCode;

use anyhow::Context as _;
use thiserror::Error;

use cpn::config::{BuiltNet, NetDefinition, list_definitions};
use cpn::net::io;
use cpn::options::{ListOptions, Options, OptionsError, RunOptions, exit_codes};
use cpn::payload::Value;
use cpn::{Context, NetError, Token};

#[derive(Debug, Error)]
enum Failure {
    #[error("{0:#}")]
    General(anyhow::Error),
    #[error("{0:#}")]
    Definition(anyhow::Error),
    #[error(transparent)]
    Markup(OptionsError),
    #[error("{0:#}")]
    Run(anyhow::Error),
}

impl Failure {
    fn exit_code(&self) -> u8 {
        match self {
            Failure::General(_) => exit_codes::GENERAL,
            Failure::Definition(_) => exit_codes::WRONG_DEFINITION,
            Failure::Markup(_) => exit_codes::WRONG_RUN,
            Failure::Run(_) => exit_codes::RUN_ERROR,
        }
    }
}

fn main() -> ExitCode {
    if std::env::var("CPN_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("CPN_LOG")
            .write_style("CPN_LOG_STYLE");
        env_logger::init_from_env(e);
    }

    let mut args = Vec::new();
    for (i, arg) in std::env::args_os().enumerate().skip(1) {
        match arg.into_string() {
            Ok(arg) => args.push(arg),
            Err(arg) => {
                eprintln!("Argument {i} is not valid Unicode: {arg:?}");
                return ExitCode::from(exit_codes::GENERAL);
            }
        }
    }

    let parsed = if args.is_empty() {
        let flags = std::env::var("CPN_FLAGS").unwrap_or_default();
        log::debug!("cpn options from environment: {:?}", flags);
        Options::parse_from_str(&flags)
    } else {
        Options::parse_from_args(&args)
    };
    let options = match parsed {
        Ok(options) => options,
        Err(OptionsError::Clap(err)) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(exit_codes::GENERAL)
            } else {
                ExitCode::SUCCESS
            };
        }
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(exit_codes::GENERAL);
        }
    };
    log::debug!("cpn options: {:?}", options);

    let result = match options {
        Options::Run(options) => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("Failed to start the tokio runtime")
            .map_err(Failure::General)
            .and_then(|runtime| runtime.block_on(run(options))),
        Options::List(options) => list(options),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            log::error!("{failure}");
            eprintln!("error: {failure}");
            ExitCode::from(failure.exit_code())
        }
    }
}

async fn run(options: RunOptions) -> Result<(), Failure> {
    let definition =
        NetDefinition::load_from_file(&options.filename).map_err(Failure::Definition)?;
    let BuiltNet { net, collectors } = definition
        .build_with_collectors()
        .map_err(Failure::Definition)?;
    log::info!("net {} loaded from {:?}", net.id(), options.filename);

    if let Some(path) = &options.dot {
        net.write_dot(path)
            .with_context(|| format!("Failed to write dot file: {:?}", path))
            .map_err(Failure::General)?;
    }
    if options.dry_run {
        return Ok(());
    }
    let markup = options.markup_pairs().map_err(Failure::Markup)?;

    let ctx = Context::background().with_timeout(options.timeout);
    let running = async {
        let result = net.run(&ctx).await;
        // Offers still pending have nobody left to take them.
        ctx.cancel();
        result
    };
    let offering = async {
        let offer_all = async {
            for (place, value) in &markup {
                net.offer(place, Token::new(Value::parse_arg(value))).await?;
            }
            Ok::<(), NetError>(())
        };
        tokio::select! {
            result = offer_all => result,
            _ = ctx.cancelled() => Ok(()),
        }
    };
    let (ran, offered) = tokio::join!(running, offering);
    ran.and(offered)
        .with_context(|| format!("Net {} failed", net.id()))
        .map_err(Failure::Run)?;

    let stats = net.stats();
    print!("{stats}");
    for (place, collector) in &collectors {
        for token in collector.tokens() {
            println!("{place} {token}");
        }
    }
    if let Some(path) = &options.stats {
        io::write_json(path, &stats)
            .with_context(|| format!("Failed to write stats: {:?}", path))
            .map_err(Failure::General)?;
    }
    log::info!("net {} has been completed", net.id());
    Ok(())
}

fn list(options: ListOptions) -> Result<(), Failure> {
    let found = list_definitions(&options.dir).map_err(Failure::General)?;
    let mut invalid = 0usize;
    for path in &found {
        if !options.check {
            println!("{}", path.display());
            continue;
        }
        match NetDefinition::load_from_file(path).and_then(|definition| definition.build()) {
            Ok(net) => println!(
                "{} ok ({} places, {} transitions)",
                path.display(),
                net.place_ids().len(),
                net.transitions().len()
            ),
            Err(err) => {
                invalid += 1;
                println!("{} invalid: {err:#}", path.display());
            }
        }
    }
    log::info!("total definitions in {:?}: {}", options.dir, found.len());
    if invalid > 0 {
        return Err(Failure::Definition(anyhow::anyhow!(
            "{invalid} of {} definitions in {:?} are invalid",
            found.len(),
            fs::canonicalize(&options.dir).unwrap_or_else(|_| options.dir.clone())
        )));
    }
    Ok(())
}
