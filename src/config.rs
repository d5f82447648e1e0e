// src/config.rs
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub http_host: String,
    pub http_port: u16,
    pub rpc_listen: String,
    pub switch_listen: String,
    pub rater_urls: Vec<String>,
    pub rater_timeout_ms: u64,
    pub debit_interval: Duration,
    pub rounding_decimals: u32,
    pub default_queue_length: usize,
    pub cdr_replication_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv::dotenv().ok();

        Ok(Config {
            environment: env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "production".to_string()),
            http_host: env::var("HTTP_HOST")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env::var("HTTP_PORT")
                .unwrap_or_else(|_| "2080".to_string())
                .parse()?,
            rpc_listen: env::var("RPC_LISTEN")
                .unwrap_or_else(|_| "0.0.0.0:2012".to_string()),
            switch_listen: env::var("SWITCH_LISTEN")
                .unwrap_or_else(|_| "0.0.0.0:8021".to_string()),
            rater_urls: Self::parse_list(
                &env::var("RATER_URLS")
                    .unwrap_or_else(|_| "http://127.0.0.1:2080/jsonrpc".to_string()),
            ),
            rater_timeout_ms: env::var("RATER_TIMEOUT_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()?,
            debit_interval: Duration::from_secs(
                env::var("DEBIT_INTERVAL_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
            ),
            rounding_decimals: env::var("ROUNDING_DECIMALS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            default_queue_length: env::var("DEFAULT_QUEUE_LENGTH")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            cdr_replication_url: env::var("CDR_REPLICATION_URL").ok(),
        })
    }

    fn parse_list(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let urls = Config::parse_list("http://r1:2080/jsonrpc, http://r2:2080/jsonrpc");
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[1], "http://r2:2080/jsonrpc");
        assert!(Config::parse_list("").is_empty());
    }
}
