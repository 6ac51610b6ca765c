//! orgstats CLI
#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;
use orgstats::{Cli, run};
use orgstats_core::config::ConfigLoader;
use tracing::debug;

mod observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.color.apply();

    if let Some(ref dir) = cli.chdir {
        std::env::set_current_dir(dir)
            .with_context(|| format!("failed to change directory to {}", dir.display()))?;
    }

    let cwd = std::env::current_dir().context("failed to determine current directory")?;
    let cwd = camino::Utf8PathBuf::try_from(cwd).map_err(|e| {
        anyhow::anyhow!(
            "current directory is not valid UTF-8: {}",
            e.into_path_buf().display()
        )
    })?;
    let mut loader = ConfigLoader::new().with_project_search(&cwd);
    if let Some(ref config_path) = cli.config {
        let config_path = camino::Utf8PathBuf::try_from(config_path.clone()).map_err(|e| {
            anyhow::anyhow!(
                "config path is not valid UTF-8: {}",
                e.into_path_buf().display()
            )
        })?;
        loader = loader.with_file(&config_path);
    }
    let config = loader.load().context("failed to load configuration")?;

    let run_log = observability::RunLog::new(
        &cli.org,
        config
            .log_dir
            .as_ref()
            .map(|dir| dir.as_std_path().to_path_buf()),
    );
    let env_filter = observability::env_filter(cli.quiet, cli.verbose, config.log_level.as_str());
    let _guard = observability::init(&run_log, env_filter).context("failed to initialize logging")?;

    debug!(
        org = %cli.org,
        verbose = cli.verbose,
        quiet = cli.quiet,
        color = ?cli.color,
        chdir = ?cli.chdir,
        "CLI initialized"
    );

    let result = run::cmd_report(&cli.org, cli.report_options(), &config, cli.quiet).await;
    if let Err(ref err) = result {
        tracing::error!(error = %format!("{err:#}"), "fatal error");
    }
    result
}
