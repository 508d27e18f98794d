pub mod coingecko;
pub mod etherscan;
pub mod sheets;
pub mod taostats;
pub mod util;

pub use coingecko::CoingeckoProvider;
pub use etherscan::EtherscanProvider;
pub use sheets::SheetsProvider;
pub use taostats::TaostatsProvider;
