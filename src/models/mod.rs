pub mod token;
pub mod snapshot;
pub mod portfolio;

// Re-export commonly used types
pub use portfolio::{PortfolioSnapshot, TokenValuation};
pub use snapshot::MarketSnapshot;
pub use token::TokenConfig;
