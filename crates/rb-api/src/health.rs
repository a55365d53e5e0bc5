//! Dependency health registry behind `/ready`.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Unhealthy,
    Healthy,
    /// Running on a substitute (e.g. the in-memory store instead of Redis)
    Fallback,
}

#[derive(Debug)]
pub struct Dependencies {
    all: RwLock<BTreeMap<String, Health>>,
    mark_fallbacks_unhealthy: bool,
}

impl Dependencies {
    /// Registers `names`, all unhealthy until told otherwise.
    pub fn new(names: &[&str], mark_fallbacks_unhealthy: bool) -> Self {
        let all = names
            .iter()
            .map(|name| (name.to_string(), Health::Unhealthy))
            .collect();
        Self {
            all: RwLock::new(all),
            mark_fallbacks_unhealthy,
        }
    }

    pub fn set(&self, name: &str, health: Health) {
        self.all
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), health);
    }

    pub fn healthy(&self) -> bool {
        self.report().values().all(|health| match health {
            Health::Healthy => true,
            Health::Fallback => !self.mark_fallbacks_unhealthy,
            Health::Unhealthy => false,
        })
    }

    pub fn report(&self) -> BTreeMap<String, Health> {
        self.all
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
