use std::time::Duration;

use log::info;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::models::DirectoryEntry;
use crate::request::{BoxResult, RequestError, USER_AGENT};
use crate::streamcheck;

/// Fetch the public directory feed and parse it into entries. A failure here
/// is fatal to a discovery run.
pub fn fetch(feed_url: &str, timeout: Duration) -> BoxResult<Vec<DirectoryEntry>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?;
    let response = client.get(feed_url).send()?;
    if !response.status().is_success() {
        return Err(Box::new(RequestError::new(&format!(
            "feed fetch returned status {}",
            response.status()
        ))));
    }
    let body = response.text()?;
    let entries = parse(&body)?;
    info!("directory feed: {} entries", entries.len());
    Ok(entries)
}

/// Event-driven parse of the YP directory format:
/// `<directory><entry><server_name/><listen_url/><server_type/><bitrate/><genre/></entry>...`
pub fn parse(xml: &str) -> BoxResult<Vec<DirectoryEntry>> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut buf = Vec::new();
    let mut current: Option<DirectoryEntry> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"entry" => {
                    current = Some(DirectoryEntry {
                        server_name: String::new(),
                        server_type: String::new(),
                        bitrate: 0,
                        listen_url: String::new(),
                        genre: String::new(),
                    });
                }
                b"server_name" => field = Some(Field::ServerName),
                b"server_type" => field = Some(Field::ServerType),
                b"bitrate" => field = Some(Field::Bitrate),
                b"listen_url" => field = Some(Field::ListenUrl),
                b"genre" => field = Some(Field::Genre),
                _ => field = None,
            },
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"entry" {
                    if let Some(entry) = current.take() {
                        if !entry.listen_url.is_empty() {
                            entries.push(entry);
                        }
                    }
                }
                field = None;
            }
            Ok(Event::Text(t)) => {
                if let (Some(entry), Some(field)) = (current.as_mut(), field.as_ref()) {
                    let text = t.unescape()?.to_string();
                    match field {
                        Field::ServerName => entry.server_name = text,
                        Field::ServerType => entry.server_type = text,
                        Field::Bitrate => entry.bitrate = streamcheck::parse_bitrate(&text),
                        Field::ListenUrl => entry.listen_url = text,
                        Field::Genre => entry.genre = text,
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(Box::new(err)),
            _ => {}
        }
        buf.clear();
    }
    Ok(entries)
}

enum Field {
    ServerName,
    ServerType,
    Bitrate,
    ListenUrl,
    Genre,
}
