//! The Metrics Service (C12): fetches Prometheus-format metric lines from
//! every compute-pool node, using Snowpark Container Services' discovery DNS
//! record to enumerate node IPs. `LocalMetricsService` is the fixed fake
//! used off-platform.

use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::Resolver;

const METRICS_PORT: u16 = 9001;

pub struct MetricsService {
    compute_pool_name: String,
    client: reqwest::blocking::Client,
}

impl MetricsService {
    pub fn new(compute_pool_name: impl Into<String>) -> Self {
        Self {
            compute_pool_name: compute_pool_name.into(),
            client: reqwest::blocking::Client::new(),
        }
    }

    fn discover_host(&self) -> String {
        format!(
            "discover.monitor.{}.snowflakecomputing.internal",
            self.compute_pool_name
        )
    }

    /// Resolves the discovery hostname to every node IP, then requests
    /// `/metrics` from each one, concatenating the Prometheus lines.
    pub fn fetch_metrics(&self) -> Vec<String> {
        let discover_host = self.discover_host();
        let resolver = match Resolver::new(ResolverConfig::default(), ResolverOpts::default()) {
            Ok(resolver) => resolver,
            Err(err) => {
                error!("failed to construct DNS resolver"; "error" => err.to_string());
                return Vec::new();
            }
        };

        let addresses: std::collections::HashSet<std::net::IpAddr> =
            match resolver.lookup_ip(discover_host.as_str()) {
                Ok(lookup) => lookup.iter().collect(),
                Err(err) => {
                    error!("failed to resolve discovery host"; "host" => discover_host, "error" => err.to_string());
                    return Vec::new();
                }
            };

        info!("discovery host resolved"; "host" => &discover_host, "address_count" => addresses.len());

        let mut lines = Vec::new();
        for address in addresses {
            info!("requesting metrics"; "address" => address.to_string());
            match self
                .client
                .get(format!("http://{}:{}/metrics", address, METRICS_PORT))
                .send()
                .and_then(|r| r.error_for_status())
            {
                Ok(response) => {
                    if let Ok(text) = response.text() {
                        lines.extend(text.lines().map(str::to_owned));
                    }
                }
                Err(err) => {
                    error!("failed to fetch metrics"; "address" => address.to_string(), "error" => err.to_string());
                }
            }
        }
        lines
    }
}

/// Fixed fake metrics used for local development, off the warehouse
/// platform where the discovery DNS record doesn't exist.
pub struct LocalMetricsService;

impl LocalMetricsService {
    pub fn fetch_metrics() -> Vec<String> {
        vec![
            r#"metric_1{host="abc.com",resource="cpu"} 1"#.to_owned(),
            "metric_2 2".to_owned(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_metrics_service_returns_the_fixed_fake_lines() {
        let lines = LocalMetricsService::fetch_metrics();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("metric_1"));
    }

    #[test]
    fn discover_host_is_scoped_to_the_compute_pool() {
        let service = MetricsService::new("mcd_agent_compute_pool");
        assert_eq!(
            service.discover_host(),
            "discover.monitor.mcd_agent_compute_pool.snowflakecomputing.internal"
        );
    }
}
