//! Per-service scaling limits

use crate::models::ScalingConfig;
use std::collections::HashMap;

/// Scaling limits keyed by service id with a fallback default
#[derive(Debug, Clone, Default)]
pub struct ScalingPolicies {
    default: ScalingConfig,
    services: HashMap<String, ScalingConfig>,
}

impl ScalingPolicies {
    pub fn new(default: ScalingConfig) -> Self {
        Self {
            default,
            services: HashMap::new(),
        }
    }

    pub fn with_service(mut self, service_id: impl Into<String>, config: ScalingConfig) -> Self {
        self.services.insert(service_id.into(), config);
        self
    }

    pub fn insert(&mut self, service_id: impl Into<String>, config: ScalingConfig) {
        self.services.insert(service_id.into(), config);
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Limits for a service: exact id first, then a case-insensitive match,
    /// then the default.
    pub fn for_service(&self, service_id: &str) -> &ScalingConfig {
        if let Some(config) = self.services.get(service_id) {
            return config;
        }
        self.services
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(service_id))
            .map(|(_, config)| config)
            .unwrap_or(&self.default)
    }

    /// Validate every entry, naming the first offending service
    pub fn validate(&self) -> Result<(), String> {
        self.default
            .validate()
            .map_err(|e| format!("default limits: {}", e))?;

        let mut ids: Vec<&String> = self.services.keys().collect();
        ids.sort();
        for id in ids {
            self.services[id]
                .validate()
                .map_err(|e| format!("service {}: {}", id, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_order() {
        let web = ScalingConfig {
            max: 4,
            ..Default::default()
        };
        let policies = ScalingPolicies::default().with_service("shop_web", web.clone());

        assert_eq!(policies.for_service("shop_web"), &web);
        assert_eq!(policies.for_service("Shop_Web"), &web);
        assert_eq!(policies.for_service("shop_api"), &ScalingConfig::default());
    }

    #[test]
    fn test_validate_names_service() {
        let broken = ScalingConfig {
            min: 6,
            max: 2,
            ..Default::default()
        };
        let policies = ScalingPolicies::default().with_service("shop_web", broken);

        let err = policies.validate().unwrap_err();
        assert!(err.contains("shop_web"));
    }
}
