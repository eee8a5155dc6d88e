use serde::{Deserialize, Serialize};

/// Where a link server listens, as handed to workers on their command line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkEndpoint {
    pub host: String,
    pub port: u16,
}

impl LinkEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Endpoint to bind on: port 0 lets the OS pick a free port.
    pub fn ephemeral(host: impl Into<String>) -> Self {
        Self::new(host, 0)
    }

    /// ZeroMQ endpoint address string.
    pub fn zmq_endpoint(&self) -> String {
        if self.host.contains(':') {
            format!("tcp://[{}]:{}", self.host, self.port)
        } else {
            format!("tcp://{}:{}", self.host, self.port)
        }
    }

    /// Parse the `<host> <port>` pair a worker receives positionally.
    pub fn from_args(host: &str, port: &str) -> Option<Self> {
        let port = port.parse().ok()?;
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port))
    }
}

impl std::fmt::Display for LinkEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.zmq_endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_endpoint() {
        let e = LinkEndpoint::new("127.0.0.1", 5555);
        assert_eq!(e.zmq_endpoint(), "tcp://127.0.0.1:5555");
        assert_eq!(e.to_string(), e.zmq_endpoint());
    }

    #[test]
    fn ipv6_host_is_bracketed() {
        assert_eq!(LinkEndpoint::ephemeral("::1").zmq_endpoint(), "tcp://[::1]:0");
    }

    #[test]
    fn from_args_rejects_garbage_port() {
        assert_eq!(
            LinkEndpoint::from_args("localhost", "4242"),
            Some(LinkEndpoint::new("localhost", 4242))
        );
        assert_eq!(LinkEndpoint::from_args("localhost", "http"), None);
        assert_eq!(LinkEndpoint::from_args("", "1"), None);
    }
}
