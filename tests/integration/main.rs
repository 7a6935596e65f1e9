//! Integration tests: full source-chain scenarios and real fetchers
//! against a local HTTP stand-in for the upstream services.

mod chain_scenarios;
mod http_fetchers;
mod mock_fetcher;
