//! Minimal service locator.
//!
//! Services are registered under string keys either as ready instances or
//! as factories. A factory runs on first [`Container::resolve`] and its
//! result is memoized, so every later resolve of the key yields the same
//! `Arc`.

use std::any::{Any, type_name};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::debug;

use crate::error::{CoreError, CoreResult};

type AnyService = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&Container) -> AnyService + Send + Sync>;

#[derive(Clone)]
enum Slot {
    Instance(AnyService),
    Lazy {
        factory: Factory,
        cell: Arc<OnceLock<AnyService>>,
    },
}

thread_local! {
    /// Factory slots being materialized on this thread.
    static MATERIALIZING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

struct MaterializeGuard(usize);

impl MaterializeGuard {
    /// `None` if this thread is already materializing `cell`.
    fn enter(cell: &Arc<OnceLock<AnyService>>) -> Option<Self> {
        let addr = Arc::as_ptr(cell).addr();
        MATERIALIZING.with(|m| {
            let mut m = m.borrow_mut();
            if m.contains(&addr) {
                return None;
            }
            m.push(addr);
            Some(Self(addr))
        })
    }
}

impl Drop for MaterializeGuard {
    fn drop(&mut self) {
        MATERIALIZING.with(|m| {
            let mut m = m.borrow_mut();
            if let Some(pos) = m.iter().rposition(|a| *a == self.0) {
                m.remove(pos);
            }
        });
    }
}

/// Service container shared by the host and extensions.
///
/// Factories are invoked without the registry lock held, so a factory may
/// resolve other services. A factory that resolves its own key, directly or
/// through other factories, gets [`CoreError::CyclicFactory`].
#[derive(Clone, Default)]
pub struct Container {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl Container {
    /// Create an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ready instance, replacing any previous registration.
    pub fn register_instance<T>(&self, key: impl Into<String>, value: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let key = key.into();
        debug!(service = %key, "Registered instance");
        self.lock().insert(key, Slot::Instance(value));
    }

    /// Register a factory that is materialized on first resolve.
    pub fn register_factory<T, F>(&self, key: impl Into<String>, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Container) -> Arc<T> + Send + Sync + 'static,
    {
        let key = key.into();
        debug!(service = %key, "Registered factory");
        let factory: Factory = Arc::new(move |c: &Container| -> AnyService { factory(c) });
        self.lock().insert(
            key,
            Slot::Lazy {
                factory,
                cell: Arc::new(OnceLock::new()),
            },
        );
    }

    /// Resolve the service registered under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotRegistered`] if nothing is registered under
    /// `key`, [`CoreError::TypeMismatch`] if it is not a `T`, or
    /// [`CoreError::CyclicFactory`] if its factory depends on itself.
    pub fn resolve<T>(&self, key: &str) -> CoreResult<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let slot = self
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| CoreError::NotRegistered(key.to_string()))?;

        let service = match slot {
            Slot::Instance(service) => service,
            Slot::Lazy { factory, cell } => match cell.get() {
                Some(service) => Arc::clone(service),
                None => {
                    let _guard = MaterializeGuard::enter(&cell)
                        .ok_or_else(|| CoreError::CyclicFactory(key.to_string()))?;
                    let service = cell.get_or_init(|| {
                        debug!(service = %key, "Materializing service");
                        factory(self)
                    });
                    Arc::clone(service)
                },
            },
        };

        service.downcast::<T>().map_err(|_| CoreError::TypeMismatch {
            key: key.to_string(),
            expected: type_name::<T>(),
        })
    }

    /// Whether anything is registered under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Remove a registration. Returns `true` if one existed.
    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Reader(&'static str);

    #[test]
    fn test_instance_resolves_same_arc() {
        let container = Container::new();
        let reader = Arc::new(Reader("logs"));
        container.register_instance("reader", Arc::clone(&reader));

        let resolved = container.resolve::<Reader>("reader").unwrap();
        assert!(Arc::ptr_eq(&resolved, &reader));
    }

    #[test]
    fn test_not_registered() {
        let container = Container::new();
        let err = container.resolve::<Reader>("missing").unwrap_err();
        assert!(matches!(err, CoreError::NotRegistered(k) if k == "missing"));
    }

    #[test]
    fn test_type_mismatch() {
        let container = Container::new();
        container.register_instance("n", Arc::new(5_u32));
        assert!(matches!(
            container.resolve::<Reader>("n").unwrap_err(),
            CoreError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_factory_is_lazy_and_memoized() {
        let container = Container::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        container.register_factory("reader", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Arc::new(Reader("lazy"))
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let a = container.resolve::<Reader>("reader").unwrap();
        let b = container.resolve::<Reader>("reader").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.0, "lazy");
    }

    #[test]
    fn test_factory_may_resolve_dependencies() {
        let container = Container::new();
        container.register_instance("name", Arc::new(String::from("detector")));
        container.register_factory("reader", |c| {
            let name = c.resolve::<String>("name").unwrap();
            Arc::new(format!("reader for {name}"))
        });
        assert_eq!(
            *container.resolve::<String>("reader").unwrap(),
            "reader for detector"
        );
    }

    #[test]
    fn test_concurrent_resolve_materializes_once() {
        let container = Container::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        container.register_factory("svc", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Arc::new(Reader("shared"))
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let container = container.clone();
                std::thread::spawn(move || container.resolve::<Reader>("svc").unwrap())
            })
            .collect();
        let first = container.resolve::<Reader>("svc").unwrap();
        for h in handles {
            assert!(Arc::ptr_eq(&h.join().unwrap(), &first));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_self_resolving_factory_is_an_error() {
        let container = Container::new();
        container.register_factory("loop", |c| {
            let inner = c.resolve::<String>("loop");
            assert!(matches!(inner, Err(CoreError::CyclicFactory(ref k)) if k == "loop"));
            Arc::new(String::from("fallback"))
        });
        assert_eq!(*container.resolve::<String>("loop").unwrap(), "fallback");
    }

    #[test]
    fn test_factory_cycle_through_another_key_is_an_error() {
        let container = Container::new();
        container.register_factory("a", |c| {
            Arc::new(c.resolve::<String>("b").map_or_else(|e| e.to_string(), |b| (*b).clone()))
        });
        container.register_factory("b", |c| {
            let a = c.resolve::<String>("a").map(|a| (*a).clone());
            Arc::new(a.unwrap_or_else(|e| e.to_string()))
        });

        let a = container.resolve::<String>("a").unwrap();
        assert!(a.contains("cyclic"), "{a}");
    }

    #[test]
    fn test_remove_and_keys() {
        let container = Container::new();
        container.register_instance("b", Arc::new(1_u8));
        container.register_instance("a", Arc::new(2_u8));
        assert_eq!(container.keys(), vec!["a", "b"]);
        assert!(container.remove("a"));
        assert!(!container.contains("a"));
    }
}
