use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime tunables, all taken from the environment with defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub concurrency: usize,
    pub retries: u32,
    pub page_size: u32,
    pub probe_timeout: Duration,
    pub homepage_timeout: Duration,
    pub feed_timeout: Duration,
    pub feed_url: String,
    pub page_pause: Duration,
}

impl Config {
    pub fn from_env() -> Config {
        let database_path: PathBuf = env::var("DATABASE_PATH")
            .unwrap_or_else(|_| String::from("stations.db"))
            .into();
        let concurrency: usize = env::var("CONCURRENCY")
            .unwrap_or_else(|_| String::from("5"))
            .parse()
            .expect("CONCURRENCY is not a number");
        let retries: u32 = env::var("RETRIES")
            .unwrap_or_else(|_| String::from("3"))
            .parse()
            .expect("RETRIES is not a number");
        let page_size: u32 = env::var("PAGE_SIZE")
            .unwrap_or_else(|_| String::from("100"))
            .parse()
            .expect("PAGE_SIZE is not a number");
        let probe_timeout_ms: u64 = env::var("PROBE_TIMEOUT_MS")
            .unwrap_or_else(|_| String::from("1500"))
            .parse()
            .expect("PROBE_TIMEOUT_MS is not a number");
        let homepage_timeout_ms: u64 = env::var("HOMEPAGE_TIMEOUT_MS")
            .unwrap_or_else(|_| String::from("5000"))
            .parse()
            .expect("HOMEPAGE_TIMEOUT_MS is not a number");
        let feed_timeout_ms: u64 = env::var("FEED_TIMEOUT_MS")
            .unwrap_or_else(|_| String::from("20000"))
            .parse()
            .expect("FEED_TIMEOUT_MS is not a number");
        let feed_url = env::var("FEED_URL")
            .unwrap_or_else(|_| String::from("http://dir.xiph.org/yp.xml"));
        let page_pause_ms: u64 = env::var("PAGE_PAUSE_MS")
            .unwrap_or_else(|_| String::from("100"))
            .parse()
            .expect("PAGE_PAUSE_MS is not a number");

        Config {
            database_path,
            concurrency,
            retries,
            page_size,
            probe_timeout: Duration::from_millis(probe_timeout_ms),
            homepage_timeout: Duration::from_millis(homepage_timeout_ms),
            feed_timeout: Duration::from_millis(feed_timeout_ms),
            feed_url,
            page_pause: Duration::from_millis(page_pause_ms),
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Config {
        Config {
            database_path: PathBuf::from(":memory:"),
            concurrency: 5,
            retries: 3,
            page_size: 100,
            probe_timeout: Duration::from_millis(50),
            homepage_timeout: Duration::from_millis(50),
            feed_timeout: Duration::from_millis(50),
            feed_url: String::from("http://feed.invalid/yp.xml"),
            page_pause: Duration::from_millis(0),
        }
    }
}
