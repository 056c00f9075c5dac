//! Name resolution for the display layer: reverse DNS for addresses and
//! `/etc/services` for port names. Lookup misses always fall back to the
//! literal address or numeric port, so rendering never blocks on a result.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::IpAddr;
use std::time::Duration;

use log::warn;
use trust_dns_resolver::TokioAsyncResolver;

use crate::types::ConnectionEntry;

const LOOKUP_TIMEOUT: Duration = Duration::from_millis(300);

pub struct Resolver {
    dns: Option<TokioAsyncResolver>,
    hosts: HashMap<IpAddr, String>,
    services: HashMap<(u16, &'static str), String>,
}

impl Resolver {
    pub fn new() -> Resolver {
        let dns = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(r) => Some(r),
            Err(e) => {
                warn!("reverse DNS unavailable: {e}");
                None
            }
        };
        Resolver {
            dns,
            hosts: HashMap::new(),
            services: load_services("/etc/services"),
        }
    }

    #[cfg(test)]
    fn offline(services: HashMap<(u16, &'static str), String>) -> Resolver {
        Resolver {
            dns: None,
            hosts: HashMap::new(),
            services,
        }
    }

    async fn hostname(&mut self, addr: IpAddr) -> String {
        if let Some(name) = self.hosts.get(&addr) {
            return name.clone();
        }
        let mut name = addr.to_string();
        if let Some(dns) = &self.dns {
            if let Ok(Ok(ptr)) = tokio::time::timeout(LOOKUP_TIMEOUT, dns.reverse_lookup(addr)).await
            {
                if let Some(host) = ptr.iter().next() {
                    name = host.to_string().trim_end_matches('.').to_string();
                }
            }
        }
        self.hosts.insert(addr, name.clone());
        name
    }

    fn service(&self, port: u16, proto: &str) -> String {
        let key = match proto {
            "tcp" => (port, "tcp"),
            "udp" => (port, "udp"),
            _ => return port.to_string(),
        };
        self.services
            .get(&key)
            .cloned()
            .unwrap_or_else(|| port.to_string())
    }

    /// Fill an entry's display fields. With lookup off this is a plain
    /// stringify; with it on, addresses become hostnames and ports become
    /// service names where a lookup succeeds.
    pub async fn stringify(&mut self, entry: &mut ConnectionEntry, lookup: bool) {
        if lookup {
            entry.src_name = self.hostname(entry.src).await;
            entry.dst_name = self.hostname(entry.dst).await;
            entry.sport_name = self.service(entry.sport, &entry.proto);
            entry.dport_name = self.service(entry.dport, &entry.proto);
        } else {
            entry.src_name = entry.src.to_string();
            entry.dst_name = entry.dst.to_string();
            entry.sport_name = entry.sport.to_string();
            entry.dport_name = entry.dport.to_string();
        }
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Resolver::new()
    }
}

/// Parse the services database into (port, proto) -> name. Missing or
/// unreadable files just mean numeric ports.
fn load_services(path: &str) -> HashMap<(u16, &'static str), String> {
    let mut map = HashMap::new();
    let Ok(file) = File::open(path) else {
        return map;
    };
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        let line = line.split('#').next().unwrap_or("");
        let mut fields = line.split_whitespace();
        let (Some(name), Some(portproto)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Some((port, proto)) = portproto.split_once('/') else {
            continue;
        };
        let Ok(port) = port.parse::<u16>() else {
            continue;
        };
        let proto = match proto {
            "tcp" => "tcp",
            "udp" => "udp",
            _ => continue,
        };
        map.entry((port, proto)).or_insert_with(|| name.to_string());
    }
    map
}
