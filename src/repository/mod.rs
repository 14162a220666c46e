pub mod proxy;
pub mod usage;

pub use proxy::{OptimizeSummary, ProxyRepository, UpsertSummary};
pub use usage::UsageRepository;
