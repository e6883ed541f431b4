use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use sdk_roll::executor::{Executor, FailPolicy, StdoutSink};
use sdk_roll::roots::{RollRoots, RootOverrides};
use sdk_roll::steps::RollOptions;
use sdk_roll::{Result, config, roll};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(author, version, about = "Roll a pinned SDK revision through the engine DEPS and build")]
struct Args {
    /// Roll definition TOML (defaults to ./roll.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Patch the manifest, run the pipeline and optionally commit
    Run {
        #[command(flatten)]
        roll: RollArgs,
        /// Create the engine commit with the upstream commit log
        #[arg(long)]
        create_commit: bool,
        /// Print what would run without writing the manifest or spawning stages
        #[arg(long)]
        dry_run: bool,
        /// Keep running later stages after a failure
        #[arg(long)]
        keep_going: bool,
        /// Run the sync stage even if its stamp is up to date
        #[arg(long)]
        force_sync: bool,
    },
    /// Print the stages a roll would run
    Plan {
        #[command(flatten)]
        roll: RollArgs,
    },
    /// Print the fully-resolved roll definition (after imports/extends) and roots
    Resolve {
        #[command(flatten)]
        roots: RootArgs,
    },
}

#[derive(Debug, ClapArgs)]
struct RollArgs {
    /// Target SDK revision
    revision: String,
    /// Skip updating DEPS and syncing
    #[arg(long)]
    no_update_deps: bool,
    /// Skip regenerating build files and rebuilding the engine
    #[arg(long)]
    no_build: bool,
    /// Skip framework tests
    #[arg(long)]
    no_test: bool,
    /// Skip hot reload launches
    #[arg(long)]
    no_hot_reload: bool,
    /// Skip updating licenses
    #[arg(long)]
    no_update_licenses: bool,
    #[command(flatten)]
    roots: RootArgs,
}

#[derive(Debug, ClapArgs)]
struct RootArgs {
    /// Flutter framework checkout (overrides FLUTTER_HOME)
    #[arg(long)]
    flutter_home: Option<PathBuf>,
    /// Flutter engine checkout (overrides ENGINE_HOME)
    #[arg(long)]
    engine_home: Option<PathBuf>,
    /// Dart SDK checkout (overrides DART_SDK_HOME)
    #[arg(long)]
    dart_sdk_home: Option<PathBuf>,
}

impl RootArgs {
    fn overrides(&self) -> RootOverrides {
        RootOverrides {
            flutter_home: self.flutter_home.clone(),
            engine_home: self.engine_home.clone(),
            dart_sdk_home: self.dart_sdk_home.clone(),
        }
    }
}

impl RollArgs {
    fn options(&self) -> RollOptions {
        RollOptions {
            target_revision: self.revision.trim().to_string(),
            no_update_deps: self.no_update_deps,
            no_build: self.no_build,
            no_test: self.no_test,
            no_hot_reload: self.no_hot_reload,
            no_update_licenses: self.no_update_licenses,
            ..Default::default()
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

fn main() {
    let _ = dotenv::dotenv();
    let args = Args::parse();
    init_tracing(args.log_format);

    if let Err(e) = dispatch(args) {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

fn dispatch(args: Args) -> Result<()> {
    let doc = config::load_or_default(args.config.as_deref())?;
    match args.cmd {
        Command::Run {
            roll: roll_args,
            create_commit,
            dry_run,
            keep_going,
            force_sync,
        } => {
            let options = RollOptions {
                create_commit,
                dry_run,
                keep_going,
                force_sync,
                ..roll_args.options()
            };
            let policy = if keep_going {
                FailPolicy::Continue
            } else {
                FailPolicy::FailFast
            };
            let executor = Executor::new(Arc::new(StdoutSink::default()))
                .with_dry_run(dry_run)
                .with_policy(policy);
            let report = roll::run(&doc, &options, &roll_args.roots.overrides(), &executor)?;
            if let Some(rev) = report.revisions() {
                println!("Rolled {} -> {}", rev.original, rev.updated);
            }
            Ok(())
        }
        Command::Plan { roll: roll_args } => {
            let plan = roll::plan(&doc, &roll_args.options(), &roll_args.roots.overrides())?;
            if plan.is_empty() {
                println!("(no stages)");
            } else {
                print!("{}", plan.describe());
            }
            Ok(())
        }
        Command::Resolve { roots } => {
            let s = toml::to_string_pretty(&doc.value).unwrap_or_else(|_| format!("{:?}", doc.value));
            print!("{s}");
            let resolved = RollRoots::resolve(&doc, &roots.overrides())?;
            for (name, root) in [
                ("flutter_home", resolved.flutter()),
                ("engine_home", resolved.engine()),
                ("dart_sdk_home", resolved.dart_sdk()),
            ] {
                match root {
                    Ok(p) => println!("# {name} = {}", p.display()),
                    Err(_) => println!("# {name} = <unset>"),
                }
            }
            Ok(())
        }
    }
}
