//! Weekly ceilings per dimension and classification.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Classification;
use crate::config::Environment;

/// Axis along which usage is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Every request of the deployment.
    Global,
    /// Requests of one authenticated user.
    PerUser,
    /// Requests of all unauthenticated callers together.
    Anonymous,
    /// Requests from one client address.
    PerClientAddress,
}

impl Dimension {
    /// Name used in counter keys, denial messages and metric labels.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Dimension::Global => "global",
            Dimension::PerUser => "user",
            Dimension::Anonymous => "anonymous",
            Dimension::PerClientAddress => "ip",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free and metered ceilings of one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ceiling {
    /// Weekly ceiling for free requests.
    pub free: u64,
    /// Weekly ceiling for metered requests.
    pub metered: u64,
}

impl Ceiling {
    /// Ceiling for `classification`.
    pub const fn get(&self, classification: Classification) -> u64 {
        match classification {
            Classification::Free => self.free,
            Classification::Metered => self.metered,
        }
    }

    fn set(&mut self, classification: Classification, limit: u64) {
        match classification {
            Classification::Free => self.free = limit,
            Classification::Metered => self.metered = limit,
        }
    }
}

/// Weekly ceilings for every dimension.
///
/// Selected once per process with [`for_environment`](Self::for_environment);
/// non-production deployments get a reduced set so a runaway test cannot run
/// up the upstream bill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLimits {
    /// Whole-deployment ceiling.
    pub global: Ceiling,
    /// Ceiling per authenticated user.
    pub per_user: Ceiling,
    /// Ceiling shared by all unauthenticated callers.
    pub anonymous: Ceiling,
    /// Ceiling per client address.
    pub per_client_address: Ceiling,
}

impl UsageLimits {
    /// Production ceilings.
    pub const fn production() -> Self {
        Self {
            global: Ceiling {
                free: 2_000_000,
                metered: 30_000,
            },
            per_user: Ceiling {
                free: 100_000,
                metered: 2_000,
            },
            anonymous: Ceiling {
                free: 500_000,
                metered: 5_000,
            },
            per_client_address: Ceiling {
                free: 50_000,
                metered: 1_000,
            },
        }
    }

    /// Reduced ceilings for development, staging and test deployments.
    pub const fn reduced() -> Self {
        Self {
            global: Ceiling {
                free: 100_000,
                metered: 1_000,
            },
            per_user: Ceiling {
                free: 10_000,
                metered: 200,
            },
            anonymous: Ceiling {
                free: 20_000,
                metered: 200,
            },
            per_client_address: Ceiling {
                free: 5_000,
                metered: 100,
            },
        }
    }

    /// Ceilings for a deployment environment.
    pub const fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self::production(),
            Environment::Development | Environment::Staging | Environment::Test => Self::reduced(),
        }
    }

    /// Ceiling for one dimension and classification.
    pub const fn limit(&self, dimension: Dimension, classification: Classification) -> u64 {
        self.ceiling(dimension).get(classification)
    }

    /// Returns a copy with one ceiling replaced.
    pub fn with_limit(
        mut self,
        dimension: Dimension,
        classification: Classification,
        limit: u64,
    ) -> Self {
        let ceiling = match dimension {
            Dimension::Global => &mut self.global,
            Dimension::PerUser => &mut self.per_user,
            Dimension::Anonymous => &mut self.anonymous,
            Dimension::PerClientAddress => &mut self.per_client_address,
        };
        ceiling.set(classification, limit);
        self
    }

    const fn ceiling(&self, dimension: Dimension) -> &Ceiling {
        match dimension {
            Dimension::Global => &self.global,
            Dimension::PerUser => &self.per_user,
            Dimension::Anonymous => &self.anonymous,
            Dimension::PerClientAddress => &self.per_client_address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_production_is_reduced() {
        for env in [Environment::Development, Environment::Staging, Environment::Test] {
            let limits = UsageLimits::for_environment(env);
            assert_eq!(limits, UsageLimits::reduced());
        }
        let prod = UsageLimits::for_environment(Environment::Production);
        assert!(
            prod.limit(Dimension::Global, Classification::Metered)
                > UsageLimits::reduced().limit(Dimension::Global, Classification::Metered)
        );
    }

    #[test]
    fn test_with_limit() {
        let limits = UsageLimits::reduced().with_limit(Dimension::Global, Classification::Metered, 5);
        assert_eq!(limits.limit(Dimension::Global, Classification::Metered), 5);
        assert_eq!(
            limits.limit(Dimension::Global, Classification::Free),
            UsageLimits::reduced().global.free
        );
    }
}
