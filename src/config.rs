use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
    #[error("invalid address {value} in {context}")]
    InvalidAddress { context: String, value: String },
    #[error("no rpc url configured for chain {0}")]
    MissingRpc(String),
    #[error("cannot build http client: {0}")]
    Client(String),
    #[error("duplicate {key} in {scope}")]
    Duplicate { scope: String, key: String },
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub http: HttpConfig,
    /// Chain name -> JSON-RPC endpoint.
    pub rpc: BTreeMap<String, String>,
    pub gas: GasConfig,
    pub quotes: QuoteConfig,
    pub pools: PoolsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GasConfig {
    pub delay_secs: f64,
    pub base_url: String,
    pub api_key: String,
    /// Share of recent blocks a fee must have been accepted in.
    pub accept: u8,
    pub chains: Vec<GasChain>,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            delay_secs: 120.0,
            base_url: "https://api.owlracle.info/v3".to_string(),
            api_key: String::new(),
            accept: 90,
            chains: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GasChain {
    pub name: String,
    /// Chain path segment on the oracle, e.g. `eth` for ethereum.
    pub slug: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QuoteConfig {
    pub delay_secs: f64,
    pub base_url: String,
    pub api_key: Option<String>,
    pub tokens: Vec<QuoteToken>,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            delay_secs: 60.0,
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            api_key: None,
            tokens: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuoteToken {
    pub symbol: String,
    /// CoinGecko coin id.
    pub id: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PoolsConfig {
    pub delay_secs: f64,
    /// In-flight contract reads per partition.
    pub concurrency: usize,
    pub swap: Vec<SwapChainConfig>,
    pub multichain: Vec<MultichainConfig>,
    pub symbiosis: Vec<SymbiosisConfig>,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            delay_secs: 60.0,
            concurrency: 8,
            swap: Vec::new(),
            multichain: Vec::new(),
            symbiosis: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SwapChainConfig {
    pub chain: String,
    pub protocol_name: String,
    pub factory: String,
    pub tokens: Vec<TokenConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenConfig {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MultichainConfig {
    pub chain: String,
    pub protocol_name: String,
    /// `address` is the bridge account holding the token.
    pub tokens: Vec<TokenConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SymbiosisConfig {
    /// `<rpc chain>_<counterpart chain>`.
    pub chain_pair: String,
    pub protocol_name: String,
    pub nerves: Vec<NerveConfig>,
}

impl SymbiosisConfig {
    pub fn rpc_chain(&self) -> &str {
        self.chain_pair.split('_').next().unwrap_or(&self.chain_pair)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NerveConfig {
    pub name: Option<String>,
    pub address: String,
    pub tokens: Vec<NerveToken>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NerveToken {
    pub address: String,
    pub decimals: u8,
}

/// Delays are checked by `Config::validate`, so the fallback is never hit
/// on a loaded config.
fn delay(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

fn positive_secs(secs: f64) -> bool {
    secs.is_finite() && secs > 0.0 && Duration::try_from_secs_f64(secs).is_ok()
}

fn unique<'a>(
    scope: &str,
    keys: impl IntoIterator<Item = &'a String>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key) {
            return Err(ConfigError::Duplicate {
                scope: scope.to_string(),
                key: key.clone(),
            });
        }
    }
    Ok(())
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Environment names used by earlier deployments of the poller.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("REDIS_URL") {
            self.store.url = url;
        }
        if let Some(key) = lookup("OWLRACLE_API_KEY") {
            self.gas.api_key = key;
        }
        if let Some(key) = lookup("COINGECKO_API_KEY") {
            self.quotes.api_key = Some(key);
        }

        for (var, chain) in [
            ("MAINNET_HTTP_PROVIDER_URL", "ethereum"),
            ("BSC_HTTP_PROVIDER_URL", "bsc"),
            ("POLYGON_HTTP_PROVIDER_URL", "polygon"),
        ] {
            if let Some(url) = lookup(var) {
                self.rpc.insert(chain.to_string(), url);
            }
        }

        for (var, target) in [
            ("GET_GAS_DELAY", &mut self.gas.delay_secs),
            ("GET_POOLS_DELAY", &mut self.pools.delay_secs),
            ("GET_QUOTES_DELAY", &mut self.quotes.delay_secs),
        ] {
            if let Some(value) = lookup(var) {
                *target = value
                    .parse::<f64>()
                    .ok()
                    .filter(|secs| positive_secs(*secs))
                    .ok_or(ConfigError::InvalidVar { name: var, value })?;
            }
        }

        Ok(())
    }

    /// Rejects values that would spin a poller loop or fail every request,
    /// and dataset keys that would collide in a snapshot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, secs) in [
            ("gas.delay_secs", self.gas.delay_secs),
            ("quotes.delay_secs", self.quotes.delay_secs),
            ("pools.delay_secs", self.pools.delay_secs),
        ] {
            if !positive_secs(secs) {
                return Err(ConfigError::InvalidVar {
                    name,
                    value: secs.to_string(),
                });
            }
        }
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::InvalidVar {
                name: "http.timeout_secs",
                value: "0".to_string(),
            });
        }
        if self.pools.concurrency == 0 {
            return Err(ConfigError::InvalidVar {
                name: "pools.concurrency",
                value: "0".to_string(),
            });
        }

        unique("gas.chains", self.gas.chains.iter().map(|c| &c.name))?;
        unique("quotes.tokens", self.quotes.tokens.iter().map(|t| &t.symbol))?;
        Ok(())
    }

    pub fn gas_delay(&self) -> Duration {
        delay(self.gas.delay_secs)
    }

    pub fn quotes_delay(&self) -> Duration {
        delay(self.quotes.delay_secs)
    }

    pub fn pools_delay(&self) -> Duration {
        delay(self.pools.delay_secs)
    }

    pub fn rpc_url(&self, chain: &str) -> Result<&str, ConfigError> {
        self.rpc
            .get(chain)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingRpc(chain.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
        [store]
        url = "memory://"

        [rpc]
        ethereum = "https://eth.example"

        [gas]
        api_key = "k"
        [[gas.chains]]
        name = "ethereum"
        slug = "eth"

        [[pools.swap]]
        chain = "ethereum"
        protocol_name = "uniswapv2"
        factory = "0x5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f"
        tokens = [{ name = "WETH", address = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2" }]

        [[pools.symbiosis]]
        chain_pair = "bsc_polygon"
        protocol_name = "symbiosis"
        nerves = [{ address = "0x01", tokens = [] }]
    "#;

    #[test]
    fn parses_sections_and_fills_defaults() {
        let config = Config::from_toml(SAMPLE).unwrap();

        assert_eq!(config.store.url, "memory://");
        assert_eq!(config.gas.chains[0].slug, "eth");
        assert_eq!(config.gas.accept, 90);
        assert_eq!(config.gas_delay(), Duration::from_secs(120));
        assert_eq!(config.pools_delay(), Duration::from_secs(60));
        assert_eq!(config.quotes_delay(), Duration::from_secs(60));
        assert_eq!(config.http.timeout(), Duration::from_secs(10));
        assert_eq!(config.pools.swap[0].tokens[0].name, "WETH");
        assert_eq!(config.pools.symbiosis[0].rpc_chain(), "bsc");
        assert_eq!(config.rpc_url("ethereum").unwrap(), "https://eth.example");
        assert!(matches!(config.rpc_url("bsc"), Err(ConfigError::MissingRpc(_))));
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.store.url, "redis://127.0.0.1:6379/0");
        assert!(config.gas.chains.is_empty());
        assert_eq!(config.pools.concurrency, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sample_is_valid() {
        assert!(Config::from_toml(SAMPLE).unwrap().validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_gas_chain() {
        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.gas.chains.push(GasChain {
            name: "ethereum".to_string(),
            slug: "eth".to_string(),
        });

        match config.validate() {
            Err(ConfigError::Duplicate { scope, key }) => {
                assert_eq!(scope, "gas.chains");
                assert_eq!(key, "ethereum");
            }
            other => panic!("expected duplicate gas chain, got {:?}", other),
        }
    }

    #[test]
    fn rejects_duplicate_quote_symbol() {
        let config = Config::from_toml(
            r#"
            [[quotes.tokens]]
            symbol = "ETH"
            id = "ethereum"
            [[quotes.tokens]]
            symbol = "ETH"
            id = "weth"
        "#,
        )
        .unwrap();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Duplicate { ref scope, ref key }) if scope == "quotes.tokens" && key == "ETH"
        ));
    }

    #[test]
    fn rejects_delays_that_would_spin() {
        for bad in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let mut config = Config::default();
            config.pools.delay_secs = bad;
            assert!(
                matches!(
                    config.validate(),
                    Err(ConfigError::InvalidVar { name: "pools.delay_secs", .. })
                ),
                "delay {} accepted",
                bad
            );
        }
    }

    #[test]
    fn rejects_negative_delay_in_file() {
        let config = Config::from_toml("[gas]\ndelay_secs = -1.0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidVar { name: "gas.delay_secs", .. })
        ));
    }

    #[test]
    fn rejects_zero_http_timeout() {
        let config = Config::from_toml("[http]\ntimeout_secs = 0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidVar { name: "http.timeout_secs", .. })
        ));
    }

    #[test]
    fn rejects_zero_delay_override() {
        let mut config = Config::default();
        let result = config.apply_overrides(|name| (name == "GET_GAS_DELAY").then(|| "0".to_string()));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidVar { name: "GET_GAS_DELAY", .. })
        ));
    }

    #[test]
    fn environment_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("REDIS_URL", "redis://cache:6379/1"),
            ("BSC_HTTP_PROVIDER_URL", "https://bsc.example"),
            ("GET_GAS_DELAY", "2.5"),
            ("OWLRACLE_API_KEY", "override"),
        ]);
        let mut config = Config::from_toml(SAMPLE).unwrap();

        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.store.url, "redis://cache:6379/1");
        assert_eq!(config.rpc_url("bsc").unwrap(), "https://bsc.example");
        assert_eq!(config.gas_delay(), Duration::from_millis(2500));
        assert_eq!(config.gas.api_key, "override");
    }

    #[test]
    fn rejects_unparseable_delay() {
        let mut config = Config::default();
        let result = config.apply_overrides(|name| (name == "GET_POOLS_DELAY").then(|| "soon".to_string()));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidVar { name: "GET_POOLS_DELAY", .. })
        ));
    }
}
