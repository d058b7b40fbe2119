use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use colored::*;
use log::{debug, error, info, warn};
use threadpool::ThreadPool;
use url::Url;

use crate::config::Config;
use crate::db::{AddOutcome, Catalog};
use crate::feed;
use crate::homepage;
use crate::models::{
    DirectoryEntry, DiscoverySummary, ProbeResult, RefreshSummary, StationRecord, UNKNOWN,
};
use crate::request::BoxResult;
use crate::retry::retry;
use crate::streamcheck;

/// Content types a discovered stream must declare to be inserted. The
/// prober only reports `audio/*` types, so every entry stays in that range.
const ACCEPTED_AUDIO_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/aac",
    "audio/aacp",
    "audio/ogg",
    "audio/opus",
    "audio/flac",
];

/// Network seam for the synchronizer drivers. The production implementation
/// probes real servers; tests substitute canned results.
pub trait ProbeService: Send + Sync {
    fn probe_stream(&self, url: &str) -> ProbeResult;
    fn resolve_homepage(&self, hint: &str) -> Option<String>;
}

pub struct NetProber {
    probe_timeout: std::time::Duration,
    homepage_timeout: std::time::Duration,
}

impl NetProber {
    pub fn new(config: &Config) -> NetProber {
        NetProber {
            probe_timeout: config.probe_timeout,
            homepage_timeout: config.homepage_timeout,
        }
    }
}

impl ProbeService for NetProber {
    fn probe_stream(&self, url: &str) -> ProbeResult {
        streamcheck::probe(url, self.probe_timeout)
    }

    fn resolve_homepage(&self, hint: &str) -> Option<String> {
        homepage::resolve(hint, self.homepage_timeout)
    }
}

enum UnitOutcome {
    Unchanged,
    Updated,
    Existing,
    Added,
    Rejected,
    Failed,
}

/// The fresh values a write would persist for the change-gating field set.
/// Comparison and write use the same resolution so a written row compares
/// clean on the next run.
fn resolve_fields(old: &StationRecord, fresh: &ProbeResult) -> (String, String, String, bool, u32) {
    let name = if fresh.name.is_empty() {
        old.name.clone()
    } else {
        fresh.name.clone()
    };
    let url = if fresh.url.is_empty() {
        old.url.clone()
    } else {
        fresh.url.clone()
    };
    let genre = if fresh.genre.is_empty() {
        UNKNOWN.to_string()
    } else {
        fresh.genre.clone()
    };
    (name, url, genre, fresh.is_live, fresh.bitrate)
}

/// Decide whether a fresh probe warrants a write, with a one-line colored
/// diff for the log. Only {name, url, genre, online, bitrate} gate the
/// write; content type, homepage and error ride along once it happens.
pub fn check_for_change(old: &StationRecord, fresh: &ProbeResult) -> (bool, String) {
    let (name, url, genre, online, bitrate) = resolve_fields(old, fresh);
    let mut changed = false;
    let mut result = String::new();

    if old.online != online {
        result.push(if online { '+' } else { '-' });
        changed = true;
    } else {
        result.push('~');
    }
    result.push_str(&format!(" '{}' {}", old.name, old.url));
    if old.name != name {
        result.push_str(&format!(" name:'{}'->'{}'", old.name, name));
        changed = true;
    }
    if old.url != url {
        result.push_str(&format!(" url:{}->{}", old.url, url));
        changed = true;
    }
    if old.genre != genre {
        result.push_str(&format!(" genre:'{}'->'{}'", old.genre, genre));
        changed = true;
    }
    if old.bitrate != bitrate {
        result.push_str(&format!(" bitrate:{}->{}", old.bitrate, bitrate));
        changed = true;
    }

    let line = if old.online != online {
        if online {
            result.green().to_string()
        } else {
            result.red().to_string()
        }
    } else {
        result.yellow().to_string()
    };
    (changed, line)
}

/// Merge a fresh probe into a stored row. `duplicate`, `play_minutes` and
/// `in_list` are owned by other subsystems and pass through verbatim.
pub fn merge(old: &StationRecord, fresh: &ProbeResult, homepage: Option<String>) -> StationRecord {
    let (name, url, genre, online, bitrate) = resolve_fields(old, fresh);
    StationRecord {
        id: old.id,
        name,
        url,
        genre,
        content_type: if fresh.ok {
            fresh.content_type.clone()
        } else {
            old.content_type.clone()
        },
        bitrate,
        online,
        icon: old.icon.clone(),
        homepage: homepage.unwrap_or_else(|| old.homepage.clone()),
        error: fresh.error.clone(),
        duplicate: old.duplicate,
        play_minutes: old.play_minutes,
        in_list: old.in_list,
    }
}

/// Re-validate every stored row, page by page. Pages are strictly
/// sequential; rows within a page go through the bounded worker pool.
pub fn run_refresh(config: &Config) -> BoxResult<RefreshSummary> {
    run_refresh_with(config, Arc::new(NetProber::new(config)))
}

pub fn run_refresh_with<P: ProbeService + 'static>(
    config: &Config,
    prober: Arc<P>,
) -> BoxResult<RefreshSummary> {
    let catalog = Catalog::open(&config.database_path)?;
    let result = refresh_pages(config, prober, &catalog);
    catalog.close();
    result
}

fn refresh_pages<P: ProbeService + 'static>(
    config: &Config,
    prober: Arc<P>,
    catalog: &Catalog,
) -> BoxResult<RefreshSummary> {
    let start = Instant::now();
    // not being able to size the run is fatal, unlike page errors below
    let total = catalog.total_count()?;
    let page_size = config.page_size.max(1);
    let pages = (total + page_size - 1) / page_size;
    info!("refresh: {} stations in {} pages", total, pages);

    let pool = ThreadPool::new(config.concurrency);
    let mut summary = RefreshSummary::default();

    for page in 0..pages {
        let rows = match catalog.get_page(page_size, page * page_size) {
            Ok(rows) => rows,
            Err(err) => {
                error!("refresh: page {} fetch failed: {}", page, err);
                continue;
            }
        };
        let (tx, rx) = channel();
        for station in rows {
            let tx = tx.clone();
            let catalog = catalog.clone();
            let prober = prober.clone();
            let retries = config.retries;
            pool.execute(move || {
                let outcome = refresh_station(&catalog, prober.as_ref(), retries, station);
                // receiver only goes away if the run was torn down
                let _ = tx.send(outcome);
            });
        }
        drop(tx);
        for outcome in rx {
            summary.probed += 1;
            match outcome {
                UnitOutcome::Updated => summary.updated += 1,
                UnitOutcome::Failed => summary.failed += 1,
                _ => {}
            }
        }
        pool.join();
        summary.pages += 1;
        // observation point + pause between pages, keeps queued I/O bounded
        debug!(
            "refresh: page {}/{} settled ({} probed, {} updated, {} failed)",
            page + 1,
            pages,
            summary.probed,
            summary.updated,
            summary.failed
        );
        thread::sleep(config.page_pause);
    }

    match catalog.stats() {
        Ok(stats) => info!(
            "refresh done: {} probed, {} updated, {} failed in {:.1?}; {} total, {} online, {} offline",
            summary.probed,
            summary.updated,
            summary.failed,
            start.elapsed(),
            stats.total,
            stats.online,
            stats.total - stats.online
        ),
        Err(err) => warn!("refresh done but stats unavailable: {}", err),
    }
    Ok(summary)
}

fn refresh_station<P: ProbeService + ?Sized>(
    catalog: &Catalog,
    prober: &P,
    retries: u32,
    station: StationRecord,
) -> UnitOutcome {
    // a probe that stays broken after all retries still feeds the change
    // detector, a station going offline must be written
    let fresh = match retry(retries, || {
        let result = prober.probe_stream(&station.url);
        if result.ok {
            Ok(result)
        } else {
            Err(result)
        }
    }) {
        Ok(fresh) => fresh,
        Err(fresh) => fresh,
    };

    let (changed, line) = check_for_change(&station, &fresh);
    if !changed {
        debug!("unchanged: {}", station.url);
        return UnitOutcome::Unchanged;
    }
    info!("{}", line);

    let homepage = resolve_homepage_retried(prober, retries, &fresh.homepage_hint);
    let record = merge(&station, &fresh, homepage);
    match catalog.update_station(&record) {
        Ok(()) => UnitOutcome::Updated,
        Err(err) => {
            warn!("update failed for {}: {}", record.url, err);
            UnitOutcome::Failed
        }
    }
}

/// Ingest the external directory feed: probe unknown URLs, insert the ones
/// that turn out to be acceptable audio streams.
pub fn run_discovery(config: &Config) -> BoxResult<DiscoverySummary> {
    let entries = feed::fetch(&config.feed_url, config.feed_timeout)?;
    ingest_entries(config, Arc::new(NetProber::new(config)), entries)
}

pub fn ingest_entries<P: ProbeService + 'static>(
    config: &Config,
    prober: Arc<P>,
    entries: Vec<DirectoryEntry>,
) -> BoxResult<DiscoverySummary> {
    let start = Instant::now();
    let catalog = Catalog::open(&config.database_path)?;

    let pool = ThreadPool::new(config.concurrency);
    let mut summary = DiscoverySummary::default();
    let (tx, rx) = channel();
    for entry in entries {
        let tx = tx.clone();
        let catalog = catalog.clone();
        let prober = prober.clone();
        let retries = config.retries;
        pool.execute(move || {
            let outcome = discover_entry(&catalog, prober.as_ref(), retries, entry);
            let _ = tx.send(outcome);
        });
    }
    drop(tx);
    for outcome in rx {
        summary.entries += 1;
        match outcome {
            UnitOutcome::Existing => summary.existing += 1,
            UnitOutcome::Added => summary.added += 1,
            UnitOutcome::Rejected => summary.rejected += 1,
            UnitOutcome::Failed => summary.failed += 1,
            _ => {}
        }
    }
    pool.join();
    summary.elapsed = start.elapsed();

    match catalog.stats() {
        Ok(stats) => info!(
            "discovery done: {} entries, {} known, {} added, {} rejected, {} failed in {:.1?}; {} total, {} online, {} offline",
            summary.entries,
            summary.existing,
            summary.added,
            summary.rejected,
            summary.failed,
            summary.elapsed,
            stats.total,
            stats.online,
            stats.total - stats.online
        ),
        Err(err) => warn!("discovery done but stats unavailable: {}", err),
    }
    catalog.close();
    Ok(summary)
}

fn discover_entry<P: ProbeService + ?Sized>(
    catalog: &Catalog,
    prober: &P,
    retries: u32,
    entry: DirectoryEntry,
) -> UnitOutcome {
    // strip the fragment reference before the existence check
    let parsed = match Url::parse(&entry.listen_url) {
        Ok(mut url) => {
            url.set_fragment(None);
            streamcheck::normalize_url(url)
        }
        Err(err) => {
            debug!("discovery: bad listen_url {}: {}", entry.listen_url, err);
            return UnitOutcome::Rejected;
        }
    };
    let url = parsed.to_string();
    // known URLs are skipped before any probe goes out; an http entry may
    // already be stored under the https upgrade the prober persisted
    let mut candidates = vec![url.clone()];
    if parsed.scheme() == "http" {
        if let Some(upgraded) = streamcheck::https_variant(&parsed) {
            candidates.push(upgraded.to_string());
        }
    }
    for candidate in &candidates {
        match catalog.exists(candidate) {
            Ok(true) => return UnitOutcome::Existing,
            Ok(false) => {}
            Err(err) => {
                warn!("discovery: existence check failed for {}: {}", candidate, err);
                return UnitOutcome::Failed;
            }
        }
    }

    let fresh = match retry(retries, || {
        let result = prober.probe_stream(&url);
        if result.ok {
            Ok(result)
        } else {
            Err(result)
        }
    }) {
        Ok(fresh) => fresh,
        Err(fresh) => {
            debug!("discovery: probe failed for {}: {}", url, fresh.error);
            return UnitOutcome::Failed;
        }
    };
    if !ACCEPTED_AUDIO_TYPES.contains(&fresh.content_type.as_str()) {
        debug!(
            "discovery: {} rejected (content-type '{}')",
            url, fresh.content_type
        );
        return UnitOutcome::Rejected;
    }

    let homepage = resolve_homepage_retried(prober, retries, &fresh.homepage_hint);
    let mut record = StationRecord::new(&fresh.url);
    record.name = pick(&fresh.name, &entry.server_name);
    record.genre = pick(&fresh.genre, &entry.genre);
    record.content_type = fresh.content_type.clone();
    record.bitrate = if fresh.bitrate > 0 {
        fresh.bitrate
    } else {
        entry.bitrate
    };
    record.online = fresh.is_live;
    record.homepage = homepage.unwrap_or_else(|| UNKNOWN.to_string());
    record.error = fresh.error;

    match catalog.add_station(&record) {
        Ok(AddOutcome::Added(id)) => {
            debug!("discovery: added {} as id {}", record.url, id);
            UnitOutcome::Added
        }
        // lost the insert race to another in-flight unit
        Ok(AddOutcome::AlreadyExists) => UnitOutcome::Existing,
        Err(err) => {
            warn!("discovery: insert failed for {}: {}", record.url, err);
            UnitOutcome::Failed
        }
    }
}

fn pick(probed: &str, declared: &str) -> String {
    if !probed.trim().is_empty() {
        probed.trim().to_string()
    } else if !declared.trim().is_empty() {
        declared.trim().to_string()
    } else {
        UNKNOWN.to_string()
    }
}

fn resolve_homepage_retried<P: ProbeService + ?Sized>(
    prober: &P,
    retries: u32,
    hint: &str,
) -> Option<String> {
    if hint.trim().is_empty() {
        return None;
    }
    retry(retries, || prober.resolve_homepage(hint).ok_or(())).ok()
}
