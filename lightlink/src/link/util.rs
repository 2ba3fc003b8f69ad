//! Endpoint and environment helpers shared by the ports.

use std::env;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

/// Path of the command channel on the device web server.
pub static COMMAND_PATH: &str = "/ws";
/// Path of the telemetry event stream on the device web server.
pub static TELEMETRY_PATH: &str = "/events";
/// Port the device web server listens on.
pub static DEFAULT_HTTP_PORT: u16 = 80;

/// Host used when nothing else is configured. Overridden by `LIGHTLINK_HOST`.
pub fn default_host() -> String {
    env::var("LIGHTLINK_HOST").unwrap_or_else(|_| "ailight.local".to_string())
}

/// Reads a buffer size from the environment, never going below `min_size`.
pub fn env_bufsize(var: &str, min_size: usize) -> usize {
    if let Ok(req) = env::var(var) {
        std::cmp::max(req.parse().unwrap_or(0), min_size)
    } else {
        min_size
    }
}

/// A host, port and path of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    /// Command channel endpoint for a device web server at `host:port`.
    pub fn command(host: &str, port: u16) -> Endpoint {
        Endpoint {
            scheme: "ws".to_string(),
            host: host.to_string(),
            port,
            path: COMMAND_PATH.to_string(),
        }
    }

    /// Telemetry channel endpoint for a device web server at `host:port`.
    pub fn telemetry(host: &str, port: u16) -> Endpoint {
        Endpoint {
            scheme: "http".to_string(),
            host: host.to_string(),
            port,
            path: TELEMETRY_PATH.to_string(),
        }
    }

    /// Value for the HTTP `Host` header.
    pub fn host_header(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host_header(), self.path)
    }

    /// Resolves to the first socket address for this endpoint.
    pub fn resolve(&self) -> Result<SocketAddr, io::Error> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        (host, self.port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "address resolution failed")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_from_page_host() {
        let cmd = Endpoint::command("192.168.1.20", 80);
        assert_eq!(cmd.url(), "ws://192.168.1.20:80/ws");
        let tel = Endpoint::telemetry("ailight.local", 8080);
        assert_eq!(tel.url(), "http://ailight.local:8080/events");
    }
}
