use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::filter::FilterSpec;

#[derive(Parser, Debug)]
#[clap(version, about = "Records how old the images of running pods are")]
pub struct Opts {
    /// Comma separated wildcard patterns of namespaces to process, all when empty.
    #[clap(long, env = "INCLUDE_NAMESPACES", default_value = "")]
    pub include_namespaces: String,

    /// Comma separated wildcard patterns of namespaces to skip.
    #[clap(long, env = "EXCLUDE_NAMESPACES", default_value = "")]
    pub exclude_namespaces: String,

    /// Comma separated wildcard patterns of image references to process, all when empty.
    #[clap(long, env = "INCLUDE_IMAGES", default_value = "")]
    pub include_images: String,

    /// Comma separated wildcard patterns of image references to skip.
    #[clap(long, env = "EXCLUDE_IMAGES", default_value = "")]
    pub exclude_images: String,

    /// How long a resolved image creation time is reused.
    #[clap(long, env = "CACHE_TTL", default_value = "168h", value_parser = humantime::parse_duration)]
    pub cache_ttl: Duration,

    /// Upper bound on a single registry lookup.
    #[clap(long, env = "INSPECT_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub inspect_timeout: Duration,

    /// Docker `config.json` style file holding registry credentials.
    #[clap(long, env = "AUTH_CONFIG")]
    pub auth_config: Option<PathBuf>,

    /// Maximum number of pods reconciled at once.
    /// Defaults to the number of CPUs the machine has, as reported by `num_cpus`.
    #[clap(long, env = "CONCURRENCY")]
    pub concurrency: Option<u16>,

    #[clap(long, env = "METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    pub metrics_bind_address: SocketAddr,

    /// How often the gauges of known namespaces are recomputed.
    #[clap(long, env = "METRICS_INTERVAL", default_value = "60s", value_parser = humantime::parse_duration)]
    pub metrics_interval: Duration,

    /// How often expired cache entries are dropped.
    #[clap(long, env = "CACHE_SWEEP_INTERVAL", default_value = "1h", value_parser = humantime::parse_duration)]
    pub cache_sweep_interval: Duration,

    /// Delay before a pod whose reconciliation failed is tried again.
    #[clap(long, env = "ERROR_REQUEUE", default_value = "30s", value_parser = humantime::parse_duration)]
    pub error_requeue: Duration,
}

impl Opts {
    pub fn filter_spec(&self) -> FilterSpec {
        FilterSpec::new(
            &self.include_namespaces,
            &self.exclude_namespaces,
            &self.include_images,
            &self.exclude_images,
        )
    }

    pub fn concurrency(&self) -> u16 {
        self.concurrency
            .unwrap_or_else(|| u16::try_from(num_cpus::get()).unwrap_or(u16::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn defaults() {
        let opts = Opts::try_parse_from(["pod-image-aging"]).unwrap();
        assert_eq!(opts.cache_ttl, Duration::from_secs(168 * 60 * 60));
        assert_eq!(opts.inspect_timeout, Duration::from_secs(30));
        assert_eq!(opts.metrics_bind_address.port(), 8080);
        assert!(opts.auth_config.is_none());
        assert!(opts.concurrency() >= 1);

        let filters = opts.filter_spec();
        assert!(filters.should_process_namespace("kube-system"));
        assert!(filters.should_process_image("nginx"));
    }

    #[test_log::test]
    fn filters_and_durations_from_flags() {
        let opts = Opts::try_parse_from([
            "pod-image-aging",
            "--exclude-namespaces",
            "kube-*",
            "--include-images",
            "ghcr.io/*",
            "--cache-ttl",
            "2d",
            "--concurrency",
            "4",
        ])
        .unwrap();
        assert_eq!(opts.cache_ttl, Duration::from_secs(2 * 24 * 60 * 60));
        assert_eq!(opts.concurrency(), 4);

        let filters = opts.filter_spec();
        assert!(!filters.should_process_namespace("kube-system"));
        assert!(filters.should_process_namespace("default"));
        assert!(filters.should_process_image("ghcr.io/org/app:v1"));
        assert!(!filters.should_process_image("docker.io/library/nginx"));
    }

    #[test_log::test]
    fn invalid_duration_is_rejected() {
        assert!(Opts::try_parse_from(["pod-image-aging", "--cache-ttl", "soon"]).is_err());
    }
}
