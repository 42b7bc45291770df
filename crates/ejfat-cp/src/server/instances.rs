//! Reserved LB instances.
//!
//! Each reservation claims a named LB until an expiry instant and receives
//! an instance token. The admin token may act on any instance; an instance
//! token only on its own.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use super::registry::generate_token;

/// Errors from reservation bookkeeping.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InstanceError {
    #[error("invalid admin token")]
    BadToken,

    #[error("load balancer name must not be empty")]
    EmptyName,

    #[error("reservation end {until} is not in the future")]
    UntilInPast { until: i64 },

    #[error("load balancer name {0} is already reserved")]
    NameTaken(String),

    #[error("unknown load balancer: {0}")]
    UnknownLb(String),

    #[error("token generation failed: {0}")]
    Token(String),
}

pub type InstanceResult<T> = Result<T, InstanceError>;

/// One reserved LB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbInstance {
    pub lb_id: String,
    pub name: String,
    pub token: String,
    /// Expiry, epoch seconds.
    pub until: i64,
}

impl LbInstance {
    pub fn is_expired(&self, now_secs: i64) -> bool {
        now_secs > self.until
    }
}

/// Table of reserved LB instances, keyed by LB id.
pub struct LbInstances {
    admin_token: String,
    instances: RwLock<HashMap<String, LbInstance>>,
    next_id: AtomicU64,
}

impl LbInstances {
    pub fn new(admin_token: impl Into<String>) -> Self {
        Self {
            admin_token: admin_token.into(),
            instances: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn is_admin(&self, token: &str) -> bool {
        token == self.admin_token
    }

    /// Whether `token` may act on `lb_id`: the admin token, or the
    /// instance token of that LB.
    pub fn authorizes(&self, lb_id: &str, token: &str) -> bool {
        if self.is_admin(token) {
            return true;
        }
        let instances = self.instances.read().expect("instances lock");
        instances.get(lb_id).is_some_and(|lb| lb.token == token)
    }

    /// Reserve a new LB instance.
    pub fn reserve(&self, admin_token: &str, name: &str, until: i64, now_secs: i64) -> InstanceResult<LbInstance> {
        if !self.is_admin(admin_token) {
            return Err(InstanceError::BadToken);
        }
        if name.is_empty() {
            return Err(InstanceError::EmptyName);
        }
        if until <= now_secs {
            return Err(InstanceError::UntilInPast { until });
        }

        let mut instances = self.instances.write().expect("instances lock");
        if instances
            .values()
            .any(|lb| lb.name == name && !lb.is_expired(now_secs))
        {
            return Err(InstanceError::NameTaken(name.to_string()));
        }

        let instance = LbInstance {
            lb_id: format!("lb{}", self.next_id.fetch_add(1, Ordering::Relaxed)),
            name: name.to_string(),
            token: generate_token().map_err(InstanceError::Token)?,
            until,
        };
        instances.insert(instance.lb_id.clone(), instance.clone());

        info!(lb_id = %instance.lb_id, %name, until, "load balancer reserved");
        Ok(instance)
    }

    /// Release an LB. Freeing an unknown or already freed LB succeeds.
    ///
    /// Returns the released instance, if one was held.
    pub fn free(&self, admin_token: &str, lb_id: &str) -> InstanceResult<Option<LbInstance>> {
        if !self.is_admin(admin_token) {
            return Err(InstanceError::BadToken);
        }
        let removed = self.instances.write().expect("instances lock").remove(lb_id);
        if let Some(lb) = &removed {
            info!(%lb_id, name = %lb.name, "load balancer freed");
        }
        Ok(removed)
    }

    pub fn get(&self, lb_id: &str) -> InstanceResult<LbInstance> {
        self.instances
            .read()
            .expect("instances lock")
            .get(lb_id)
            .cloned()
            .ok_or_else(|| InstanceError::UnknownLb(lb_id.to_string()))
    }

    /// Remove reservations past their expiry. Returns the removed LB ids.
    pub fn reap_expired(&self, now_secs: i64) -> Vec<String> {
        let mut instances = self.instances.write().expect("instances lock");
        let expired: Vec<String> = instances
            .values()
            .filter(|lb| lb.is_expired(now_secs))
            .map(|lb| lb.lb_id.clone())
            .collect();
        for lb_id in &expired {
            instances.remove(lb_id);
            info!(%lb_id, "reservation expired");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.instances.read().expect("instances lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn reserve_issues_id_and_token() {
        let table = LbInstances::new("admin");
        let lb = table.reserve("admin", "test", NOW + 3600, NOW).unwrap();
        assert_eq!(lb.lb_id, "lb1");
        assert_eq!(lb.token.len(), 32);
        assert_eq!(table.get("lb1").unwrap(), lb);
        assert!(table.authorizes("lb1", &lb.token));
        assert!(table.authorizes("lb1", "admin"));
        assert!(!table.authorizes("lb2", &lb.token));
    }

    #[test]
    fn reserve_rejects_bad_input() {
        let table = LbInstances::new("admin");
        assert_eq!(
            table.reserve("wrong", "test", NOW + 10, NOW),
            Err(InstanceError::BadToken)
        );
        assert_eq!(table.reserve("admin", "", NOW + 10, NOW), Err(InstanceError::EmptyName));
        assert_eq!(
            table.reserve("admin", "test", NOW - 1, NOW),
            Err(InstanceError::UntilInPast { until: NOW - 1 })
        );
        assert!(table.is_empty());
    }

    #[test]
    fn name_is_held_until_expiry() {
        let table = LbInstances::new("admin");
        table.reserve("admin", "test", NOW + 10, NOW).unwrap();
        assert_eq!(
            table.reserve("admin", "test", NOW + 20, NOW),
            Err(InstanceError::NameTaken("test".into()))
        );
        // Past the first reservation's expiry the name is free again.
        let second = table.reserve("admin", "test", NOW + 100, NOW + 11).unwrap();
        assert_eq!(second.lb_id, "lb2");
    }

    #[test]
    fn free_is_idempotent() {
        let table = LbInstances::new("admin");
        let lb = table.reserve("admin", "test", NOW + 10, NOW).unwrap();

        assert_eq!(table.free("admin", &lb.lb_id).unwrap(), Some(lb.clone()));
        assert_eq!(table.free("admin", &lb.lb_id).unwrap(), None);
        assert_eq!(table.free(&lb.token, &lb.lb_id), Err(InstanceError::BadToken));
        assert!(matches!(table.get(&lb.lb_id), Err(InstanceError::UnknownLb(_))));
    }

    #[test]
    fn reap_removes_only_expired() {
        let table = LbInstances::new("admin");
        table.reserve("admin", "short", NOW + 10, NOW).unwrap();
        table.reserve("admin", "long", NOW + 1000, NOW).unwrap();

        assert_eq!(table.reap_expired(NOW + 11), vec!["lb1".to_string()]);
        assert_eq!(table.len(), 1);
        assert!(table.reap_expired(NOW + 11).is_empty());
    }
}
