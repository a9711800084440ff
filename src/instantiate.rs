//! Memoized function instantiation
//!
//! Every callable body (a concrete function, one overload, or a generic
//! realized for one argument-type tuple) is analyzed once per
//! [`InstanceKey`]. Concurrent requests for the same key coalesce on one
//! `OnceLock`: the first caller runs the instantiation, the others wait for
//! and share its record.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::ir::{Intent, TypedFunction};
use crate::types::Type;

/// Identity of one realization: the function plus the concrete parameter types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub module: String,
    pub function: String,
    pub overload: usize,
    pub args: Vec<Type>,
}

impl InstanceKey {
    /// Deterministic emitted name for this key.
    ///
    /// A lone concrete function keeps its source name; overloads and generic
    /// instances get one suffix per parameter type (`add_f64_f64`). Instances
    /// of another module's generic are prefixed with that module.
    pub fn emitted_name(&self, mangled: bool, home: &str) -> String {
        let mut name = if self.module != home {
            format!("{}_{}", self.module, self.function)
        } else {
            self.function.clone()
        };
        if mangled {
            if self.args.is_empty() {
                name.push_str(&format!("_{}", self.overload));
            }
            for arg in &self.args {
                name.push('_');
                name.push_str(&arg.mangle());
            }
        }
        name
    }
}

/// Result of realizing one key
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    pub key: InstanceKey,
    pub emitted_name: String,
    pub params: Vec<Type>,
    pub intents: Vec<Intent>,
    pub ret: Type,
    /// The typed body; `None` when analysis of the body failed
    pub function: Option<TypedFunction>,
}

/// Per-unit memo table of realized functions
#[derive(Debug, Default)]
pub struct InstantiationCache {
    entries: DashMap<InstanceKey, Arc<OnceLock<Arc<InstanceRecord>>>>,
    order: Mutex<Vec<InstanceKey>>,
}

impl InstantiationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the record for `key`, running `init` only if no other request
    /// for the key has.
    pub fn get_or_instantiate<F>(&self, key: &InstanceKey, init: F) -> Arc<InstanceRecord>
    where
        F: FnOnce() -> InstanceRecord,
    {
        // The map shard lock must be released before `init` runs: it may
        // request other keys.
        let cell = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceLock::new()))
            .clone();
        let mut realized = false;
        let record = cell
            .get_or_init(|| {
                realized = true;
                Arc::new(init())
            })
            .clone();
        if realized {
            debug!(name = %record.emitted_name, "realized instance");
            self.order.lock().push(key.clone());
        }
        record
    }

    /// A finished record, if any
    pub fn get(&self, key: &InstanceKey) -> Option<Arc<InstanceRecord>> {
        self.entries
            .get(key)
            .and_then(|cell| cell.get().cloned())
    }

    /// Finished records in the order they completed
    pub fn records(&self) -> Vec<Arc<InstanceRecord>> {
        self.order
            .lock()
            .iter()
            .filter_map(|key| self.get(key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Dim, Order, ScalarType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(function: &str, args: Vec<Type>) -> InstanceKey {
        InstanceKey {
            module: "m".to_string(),
            function: function.to_string(),
            overload: 0,
            args,
        }
    }

    fn record(key: &InstanceKey) -> InstanceRecord {
        InstanceRecord {
            key: key.clone(),
            emitted_name: key.emitted_name(true, "m"),
            params: key.args.clone(),
            intents: vec![Intent::In; key.args.len()],
            ret: Type::Void,
            function: None,
        }
    }

    #[test]
    fn test_emitted_names() {
        let f64 = Type::Scalar(ScalarType::FLOAT64);
        let add = key("add", vec![f64.clone(), f64.clone()]);
        assert_eq!(add.emitted_name(true, "m"), "add_f64_f64");
        assert_eq!(add.emitted_name(false, "m"), "add");
        assert_eq!(add.emitted_name(true, "main"), "m_add_f64_f64");
        let scale = key(
            "scale",
            vec![
                Type::array(ScalarType::FLOAT64, vec![Dim::Unknown; 2], Order::F),
                Type::Scalar(ScalarType::INT64),
            ],
        );
        assert_eq!(scale.emitted_name(true, "m"), "scale_f64a2f_i64");
    }

    #[test]
    fn test_one_realization_per_key() {
        let cache = InstantiationCache::new();
        let k = key("norm", vec![Type::array(ScalarType::FLOAT64, vec![Dim::Unknown], Order::C)]);
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            cache.get_or_instantiate(&k, || {
                calls.fetch_add(1, Ordering::SeqCst);
                record(&k)
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.records()[0].emitted_name, "norm_f64a1");
    }

    #[test]
    fn test_concurrent_requests_coalesce() {
        let cache = Arc::new(InstantiationCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("add", vec![Type::Scalar(ScalarType::INT64); 2]);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let k = k.clone();
                std::thread::spawn(move || {
                    cache
                        .get_or_instantiate(&k, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            record(&k)
                        })
                        .emitted_name
                        .clone()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), "add_i64_i64");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nested_requests_record_completion_order() {
        let cache = InstantiationCache::new();
        let outer = key("outer", vec![Type::Scalar(ScalarType::INT64)]);
        let inner = key("inner", vec![Type::Scalar(ScalarType::INT64)]);
        cache.get_or_instantiate(&outer, || {
            cache.get_or_instantiate(&inner, || record(&inner));
            record(&outer)
        });
        let names: Vec<String> = cache
            .records()
            .iter()
            .map(|r| r.emitted_name.clone())
            .collect();
        assert_eq!(names, vec!["inner_i64", "outer_i64"]);
    }
}
