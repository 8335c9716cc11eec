//! Built-in domains

mod hypothesis;
mod modeling;
mod quality;

pub use hypothesis::hypothesis;
pub use modeling::modeling;
pub use quality::quality;

use super::DomainConfig;

/// Every built-in domain, in registration order
pub fn all() -> Vec<DomainConfig> {
    vec![hypothesis(), modeling(), quality()]
}
