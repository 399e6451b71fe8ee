use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod catalog;
mod cli;
mod config;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use app::AppFactory;
use cli::Command;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    let language = args.language;

    let paths = AppFactory::get_paths()?;
    let mut app = AppFactory::create_app_service(&paths)?;

    match args.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                app = app.with_bind_address(bind);
            }
            web::start_daemon(app)
        }
        Command::Search {
            query,
            count,
            mode,
            metrics,
            json,
        } => cli::handle_search(&app, language, query, count, mode, metrics, json),
        Command::BuildIndex { force } => cli::handle_build_index(&app, language, force),
        Command::Stats {} => cli::handle_stats(&app, language),
        Command::ClearCache {} => cli::handle_clear_cache(&app, language),
        Command::Embed { overwrite } => cli::handle_embed(&app, language, overwrite),
        Command::Verify { samples } => cli::handle_verify(&app, language, samples),
        Command::ImportCsv { csv, output } => cli::handle_import_csv(&app, language, csv, output),
    }
}
