use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use native_tls::TlsConnector;
use url::Url;

pub type BoxResult<T> = Result<T, Box<dyn Error>>;

pub const USER_AGENT: &str = concat!("stream-catalog-rust/", env!("CARGO_PKG_VERSION"));

#[derive(Debug)]
pub struct RequestError {
    details: String,
}

impl RequestError {
    pub fn new(msg: &str) -> RequestError {
        RequestError {
            details: msg.to_string(),
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.details)
    }
}

impl Error for RequestError {}

pub struct HttpHeaders {
    pub code: u32,
    pub message: String,
    pub version: String,
    pub headers: HashMap<String, String>,
}

/// Minimal header-only GET over plain TCP or TLS. Shoutcast-style servers
/// answer with a bare "ICY 200 OK" status line that strict HTTP clients
/// reject, so the response is parsed by hand.
pub struct Request {
    url: Url,
    timeout: Duration,
}

impl Request {
    pub fn new(url_str: &str, timeout: Duration) -> BoxResult<Request> {
        Ok(Request {
            url: Url::parse(url_str)?,
            timeout,
        })
    }

    fn read_stream_until(stream: &mut dyn Read, condition: &'static [u8]) -> BoxResult<String> {
        let mut buffer = vec![0; 1];
        let mut bytes = Vec::new();
        loop {
            match stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(_) => {
                    bytes.push(buffer[0]);
                    if bytes.len() >= condition.len() {
                        let (_, right) = bytes.split_at(bytes.len() - condition.len());
                        if right == condition {
                            break;
                        }
                    }
                    // headers of a sane server fit well below this
                    if bytes.len() > 32 * 1024 {
                        return Err(Box::new(RequestError::new("header section too large")));
                    }
                }
                Err(_) => break,
            }
        }
        // lossy: ICY servers routinely send non-UTF-8 header bytes, the
        // encoding repair happens later on the extracted values
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn send_request(&self, stream: &mut dyn Write, host: &str) -> BoxResult<()> {
        let path = match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        };
        let request_str = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nIcy-MetaData: 0\r\nRange: bytes=0-1\r\nConnection: close\r\n\r\n",
            path, host, USER_AGENT
        );
        stream.write_all(request_str.as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    pub fn connect(&self) -> BoxResult<HttpHeaders> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| RequestError::new("illegal host name"))?;
        let port = self
            .url
            .port_or_known_default()
            .ok_or_else(|| RequestError::new("port unknown"))?;

        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| RequestError::new("could not resolve host"))?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        if self.url.scheme() == "https" {
            let connector = TlsConnector::new()?;
            let mut stream = connector.connect(host, stream)?;
            self.send_request(&mut stream, host)?;
            Request::read_response(&mut stream)
        } else if self.url.scheme() == "http" {
            let mut stream = stream;
            self.send_request(&mut stream, host)?;
            Request::read_response(&mut stream)
        } else {
            Err(Box::new(RequestError::new("unknown scheme")))
        }
    }

    fn read_response(stream: &mut dyn Read) -> BoxResult<HttpHeaders> {
        let status_line = Request::read_stream_until(stream, b"\r\n")?;
        let mut info = Request::parse_status_line(&status_line)?;

        let out = Request::read_stream_until(stream, b"\r\n\r\n")?;
        for line in out.lines() {
            if let Some(index) = line.find(':') {
                let (key, value) = line.split_at(index);
                info.headers
                    .insert(key.to_lowercase(), String::from(value[1..].trim()));
            }
        }
        Ok(info)
    }

    // "HTTP/1.1 200 OK" or the non-standard "ICY 200 OK"
    fn parse_status_line(line: &str) -> BoxResult<HttpHeaders> {
        let line = line.trim_end();
        let mut parts = line.splitn(3, ' ');
        let proto = parts
            .next()
            .ok_or_else(|| RequestError::new("empty status line"))?;
        let version = if proto.starts_with("HTTP/") {
            String::from(&proto[5..])
        } else if proto == "ICY" {
            String::from("ICY")
        } else {
            return Err(Box::new(RequestError::new("not http")));
        };
        let code: u32 = parts
            .next()
            .ok_or_else(|| RequestError::new("status line without code"))?
            .parse()?;
        let message = parts.next().unwrap_or("").to_string();
        Ok(HttpHeaders {
            code,
            message,
            version,
            headers: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_http_status_line() {
        let info = Request::parse_status_line("HTTP/1.1 200 OK\r\n").unwrap();
        assert_eq!(info.code, 200);
        assert_eq!(info.version, "1.1");
        assert_eq!(info.message, "OK");
    }

    #[test]
    fn parses_icy_status_line() {
        let info = Request::parse_status_line("ICY 200 OK\r\n").unwrap();
        assert_eq!(info.code, 200);
        assert_eq!(info.version, "ICY");
    }

    #[test]
    fn rejects_non_http_response() {
        assert!(Request::parse_status_line("SSH-2.0-OpenSSH\r\n").is_err());
        assert!(Request::parse_status_line("").is_err());
        assert!(Request::parse_status_line("HTTP/1.1").is_err());
    }

    #[test]
    fn response_headers_are_lowercased() {
        let raw = b"ICY 200 OK\r\nContent-Type: audio/mpeg\r\nicy-br:128\r\n\r\n";
        let mut cursor = &raw[..];
        let info = Request::read_response(&mut cursor).unwrap();
        assert_eq!(info.code, 200);
        assert_eq!(info.headers.get("content-type").unwrap(), "audio/mpeg");
        assert_eq!(info.headers.get("icy-br").unwrap(), "128");
    }
}
