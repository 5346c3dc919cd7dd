mod cli;

use chrono::{NaiveDate, Utc};
use clap::Parser;
use std::error::Error;

use flowstat_service::builder::run_builder;
use flowstat_service::config::{Backend, Settings};
use flowstat_service::db::{self, PostgresHistory};
use flowstat_service::ingest::usgs::UsgsClient;
use flowstat_service::live::run_classifier;
use flowstat_service::logging::{self, DataSource, LogLevel};
use flowstat_service::model::GaugeSite;
use flowstat_service::publish::Publisher;
use flowstat_service::stations;
use flowstat_service::store::baselines::BaselineStore;

use crate::cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    let settings = match Settings::load(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("flowstat: {}", e);
            std::process::exit(2);
        }
    };

    let level = settings.logging.level.parse().unwrap_or(LogLevel::Info);
    logging::init_logger(
        level,
        settings.logging.file.as_deref(),
        settings.logging.timestamps,
    );

    if let Err(err) = run(cli.command, &settings) {
        logging::error(DataSource::System, None, &format!("run failed: {}", err));
        let mut cause = err.source();
        while let Some(e) = cause {
            logging::error(DataSource::System, None, &format!("caused by: {}", e));
            cause = e.source();
        }
        std::process::exit(1);
    }
}

fn load_registry(settings: &Settings) -> Result<Vec<GaugeSite>, Box<dyn Error>> {
    let sites = match settings.sources.sites {
        Backend::Usgs => stations::load_sites(&settings.sources.registry_path)?,
        Backend::Database => db::load_sites(&mut db::connect()?)?,
    };
    logging::info(
        DataSource::System,
        None,
        &format!("loaded {} registered sites", sites.len()),
    );
    Ok(sites)
}

fn run(command: Commands, settings: &Settings) -> Result<(), Box<dyn Error>> {
    let history_start = NaiveDate::parse_from_str(&settings.builder.history_start, "%Y-%m-%d")?;
    let store = BaselineStore::new(&settings.storage.data_dir);

    match command {
        Commands::Baselines(args) => {
            let scope = args.scope(true)?;
            let registry = load_registry(settings)?;

            let summary = match settings.sources.history {
                Backend::Usgs => {
                    let client = UsgsClient::new(&settings.http, history_start)?;
                    run_builder(&client, &store, &registry, &scope, &settings.builder)?
                }
                Backend::Database => {
                    let history = PostgresHistory::new(db::connect()?, history_start);
                    run_builder(&history, &store, &registry, &scope, &settings.builder)?
                }
            };

            println!(
                "Baselines: {} partitions, {} rows, {}/{} sites published",
                summary.states.len(),
                summary.rows_written,
                summary.sites_published,
                summary.sites_total
            );
        }
        Commands::Classify(args) => {
            let scope = args.scope(false)?;
            let registry = load_registry(settings)?;
            let client = UsgsClient::new(&settings.http, history_start)?;
            let publisher = Publisher::new(&settings.storage.data_dir);

            let outcome = run_classifier(
                &client,
                &store,
                &publisher,
                &registry,
                &scope,
                Utc::now(),
                &settings.classifier,
            )?;

            println!(
                "Live conditions: {} sites published, {} omitted",
                outcome.document.site_count,
                outcome.summary.omitted_total()
            );
        }
    }

    Ok(())
}
