mod args;
mod sync;

use crate::args::{Args, Command};
use crate::sync::config_reader::{read_config, DEFAULT_CONFIG_PATH};
use crate::sync::*;
use chrono::Utc;
use clap::Parser;
use log::error;

async fn run(args: Args) -> SyncResult<()> {
    // The file check works without any configuration.
    if let Command::Check { file } = &args.command {
        run_check(file).await?;
        return Ok(());
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = read_config(&config_path).await?;
    let ctx = SyncContext::from_config(config)?;

    match args.command {
        Command::Login { code, password } => {
            run_login(&ctx, &code, &password, Utc::now()).await?;
        }
        Command::Logout => run_logout(&ctx).await?,
        Command::Points => {
            run_points(&ctx).await?;
        }
        Command::SelectPoint { point_id } => {
            run_select_point(&ctx, point_id).await?;
        }
        Command::Check { .. } => {}
        Command::Import {
            file,
            answers,
            keep_file,
        } => {
            let opts = ImportOptions {
                path: file,
                answers,
                keep_file,
            };
            run_import(&ctx, &opts, Utc::now()).await?;
        }
        Command::History { limit } => {
            run_history(&ctx, limit).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if args.verbose {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }
    if let Err(e) = run(args).await {
        error!("{:?}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
