use clap::{App, Arg, SubCommand};
use log::error;

mod config;
mod db;
mod encoding;
mod feed;
mod homepage;
mod models;
mod request;
mod retry;
mod streamcheck;
mod sync;

use config::Config;

fn debugcheck(url: &str, config: &Config) {
    let result = streamcheck::probe(url, config.probe_timeout);
    println!("{:#?}", result);
}

fn main() {
    env_logger::init();

    let matches = App::new("stream-catalog")
        .version(env!("CARGO_PKG_VERSION"))
        .about("verifies stream endpoints and keeps the station catalog in sync")
        .subcommand(
            SubCommand::with_name("refresh")
                .about("re-probe every catalog row and write detected changes"),
        )
        .subcommand(
            SubCommand::with_name("discover")
                .about("ingest the public directory feed and insert unknown streams"),
        )
        .subcommand(
            SubCommand::with_name("check")
                .about("probe a single url and print the result")
                .arg(Arg::with_name("url").required(true)),
        )
        .get_matches();

    let config = Config::from_env();
    println!("DATABASE_PATH       : {}", config.database_path.display());
    println!("CONCURRENCY         : {}", config.concurrency);
    println!("RETRIES             : {}", config.retries);
    println!("PAGE_SIZE           : {}", config.page_size);
    println!("PROBE_TIMEOUT_MS    : {}", config.probe_timeout.as_millis());
    println!("HOMEPAGE_TIMEOUT_MS : {}", config.homepage_timeout.as_millis());
    println!("FEED_TIMEOUT_MS     : {}", config.feed_timeout.as_millis());
    println!("FEED_URL            : {}", config.feed_url);

    match matches.subcommand() {
        ("refresh", _) => {
            if let Err(err) = sync::run_refresh(&config) {
                error!("refresh run failed: {}", err);
            }
        }
        ("discover", _) => {
            if let Err(err) = sync::run_discovery(&config) {
                error!("discovery run failed: {}", err);
            }
        }
        ("check", Some(sub)) => {
            let url = sub.value_of("url").unwrap();
            debugcheck(url, &config);
        }
        _ => {
            eprintln!("no subcommand given, try: refresh | discover | check <url>");
        }
    }
}
