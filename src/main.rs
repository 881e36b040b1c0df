use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod launcher;
mod list;
mod names;
mod seeds;
mod store;
mod update;

use cli::{Command, RootArgs};
use config::Paths;
use launcher::BwrapRunner;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_env("BOXES_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = RootArgs::parse();
    let paths = Paths::discover()?;
    let registry = config::default_registry(&paths);

    match args.command {
        Command::Enter(args) => {
            let runner = BwrapRunner::locate()?;
            store::enter_environment(&paths, &registry, &runner, &args.name)
        }
        Command::Exec(args) => {
            let runner = BwrapRunner::locate()?;
            store::exec_environment(
                &paths,
                &registry,
                &runner,
                &args.name,
                &args.command,
                &args.args,
            )
        }
        Command::List(args) => list::list_environments(&paths, args.format),
        Command::New(args) => {
            // Resolve the selection first so a bad seed name is reported even
            // on hosts without bwrap.
            let seeds = args.seeds.resolve(&registry)?;
            let runner = BwrapRunner::locate()?;
            store::new_environment(&paths, &registry, &runner, &args.name, &seeds)?;
            if args.enter {
                store::enter_environment(&paths, &registry, &runner, &args.name)?;
            }
            Ok(())
        }
        Command::Purge(args) => {
            for name in &args.names {
                store::purge_environment(&paths, name)?;
            }
            Ok(())
        }
        Command::Reset(args) => {
            let seeds = args.seeds.resolve(&registry)?;
            let runner = BwrapRunner::locate()?;
            for name in &args.names {
                store::reset_environment(&paths, &registry, &runner, name, &seeds, args.clean)?;
            }
            Ok(())
        }
        Command::Tmp(args) => {
            let seeds = args.seeds.resolve(&registry)?;
            let runner = BwrapRunner::locate()?;
            store::tmp_environment(
                &paths,
                &registry,
                &runner,
                &seeds,
                names::candidates(&paths.cache_dir, rand::thread_rng()),
            )
        }
    }
}
