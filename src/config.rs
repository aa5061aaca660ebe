use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the built-in shell workload.
///
/// Every job gets its own workload; with `scratch_dir` enabled each one runs
/// inside a private temporary directory that is deleted on teardown.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Interpreter invoked as `<program> -c <script>`
    pub program: String,
    /// Run each job inside its own temporary working directory
    pub scratch_dir: bool,
    /// Parent directory for scratch directories (system temp dir when unset)
    pub scratch_root: Option<PathBuf>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "sh".to_string(),
            scratch_dir: true,
            scratch_root: None,
        }
    }
}

/// Configuration for the periodic security-data refreshers.
///
/// Refreshers only run when `base_url` is set.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Base URL of the API serving security keys and hashes
    pub base_url: Option<String>,
    /// Access key appended to every refresh request
    pub api_key: String,
    /// Seconds between refresh passes
    pub interval_secs: u64,
    /// Salt appended to each security key before hashing
    pub security_salt: String,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: String::new(),
            interval_secs: 300,
            security_salt: "HregBEighE".to_string(),
        }
    }
}

impl RefreshConfig {
    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn security_keys_url(&self) -> Option<String> {
        self.api_url("api/security/rcc/security-keys")
    }

    pub fn content_hashes_url(&self) -> Option<String> {
        self.api_url("api/security/rcc/md5-hashes")
    }

    pub fn mem_hashes_url(&self) -> Option<String> {
        self.api_url("GetAllowedMemHashes")
    }

    fn api_url(&self, path: &str) -> Option<String> {
        let base = self.base_url.as_deref()?.trim_end_matches('/');
        Some(if self.api_key.is_empty() {
            format!("{}/{}", base, path)
        } else {
            format!("{}/{}?apiKey={}", base, path, self.api_key)
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    /// Deadline applied to `/Execute` requests
    pub execute_timeout_ms: u64,
    /// Added to every lease wait so clock granularity never wakes a waiter early
    pub lease_slack_ms: u64,
    /// Interval of the liveness heartbeat while interactive jobs are open
    pub heartbeat_interval_ms: u64,
    pub shell: ShellConfig,
    pub refresh: RefreshConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:64989"
                .parse()
                .expect("default listen address is valid"),
            execute_timeout_ms: 30_000,
            lease_slack_ms: 3,
            heartbeat_interval_ms: 1_000,
            shell: ShellConfig::default(),
            refresh: RefreshConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_refresh_base(mut self, base_url: String, api_key: String) -> Self {
        self.refresh.base_url = Some(base_url);
        self.refresh.api_key = api_key;
        self
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_millis(self.execute_timeout_ms)
    }

    pub fn lease_slack(&self) -> Duration {
        Duration::from_millis(self.lease_slack_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_config_default() {
        let cfg = ShellConfig::default();
        assert_eq!(cfg.program, "sh");
        assert!(cfg.scratch_dir);
        assert!(cfg.scratch_root.is_none());
    }

    #[test]
    fn refresh_config_disabled_without_base_url() {
        let cfg = RefreshConfig::default();
        assert!(!cfg.is_enabled());
        assert!(cfg.security_keys_url().is_none());
        assert_eq!(cfg.interval(), Duration::from_secs(300));
        assert_eq!(cfg.security_salt, "HregBEighE");
    }

    #[test]
    fn refresh_urls_include_api_key() {
        let cfg = ServiceConfig::default()
            .with_refresh_base("https://api.example.com/".to_string(), "k1".to_string())
            .refresh;
        assert!(cfg.is_enabled());
        assert_eq!(
            cfg.security_keys_url().as_deref(),
            Some("https://api.example.com/api/security/rcc/security-keys?apiKey=k1")
        );
        assert_eq!(
            cfg.content_hashes_url().as_deref(),
            Some("https://api.example.com/api/security/rcc/md5-hashes?apiKey=k1")
        );
        assert_eq!(
            cfg.mem_hashes_url().as_deref(),
            Some("https://api.example.com/GetAllowedMemHashes?apiKey=k1")
        );
    }

    #[test]
    fn refresh_urls_without_api_key() {
        let cfg = RefreshConfig {
            base_url: Some("http://localhost:9000".to_string()),
            ..Default::default()
        };
        assert_eq!(
            cfg.mem_hashes_url().as_deref(),
            Some("http://localhost:9000/GetAllowedMemHashes")
        );
    }

    #[test]
    fn service_config_default() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:64989");
        assert_eq!(cfg.execute_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.lease_slack(), Duration::from_millis(3));
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(1));
    }

    #[test]
    fn service_config_new() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = ServiceConfig::new(addr);
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.execute_timeout_ms, 30_000);
    }
}
