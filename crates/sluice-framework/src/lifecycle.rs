//! Per-handler-instance resource tracking.
//!
//! Every registration gets an [`InstanceId`]. Timers and subscriptions a
//! handler creates through its [`Lifecycle`] handle are recorded against that
//! id and released by [`LifecycleManager::dispose`], which the registry calls
//! on deregistration and the runtime calls for every instance at shutdown.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

/// Identifies one registered handler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Unsubscribe = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Resources {
    timers: Vec<AbortHandle>,
    subscriptions: Vec<Unsubscribe>,
}

impl Resources {
    fn release(self) -> (usize, usize) {
        let timers = self.timers.len();
        let subscriptions = self.subscriptions.len();
        for timer in self.timers {
            timer.abort();
        }
        for unsubscribe in self.subscriptions {
            unsubscribe();
        }
        (timers, subscriptions)
    }
}

/// Tracks timers and subscriptions per handler instance.
#[derive(Default)]
pub struct LifecycleManager {
    instances: Mutex<HashMap<InstanceId, Resources>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `instance`. Resources added to an untracked instance
    /// are released immediately.
    pub fn track(&self, instance: InstanceId) {
        self.instances.lock().entry(instance).or_default();
    }

    /// Returns `true` if `instance` is tracked and not yet disposed.
    pub fn is_tracked(&self, instance: InstanceId) -> bool {
        self.instances.lock().contains_key(&instance)
    }

    /// Number of live timers and subscriptions recorded for `instance`.
    pub fn resource_count(&self, instance: InstanceId) -> usize {
        self.instances
            .lock()
            .get(&instance)
            .map_or(0, |r| r.timers.len() + r.subscriptions.len())
    }

    /// Records a timer task. Finished timers are pruned as new ones arrive.
    pub fn add_timer(&self, instance: InstanceId, timer: AbortHandle) {
        let mut instances = self.instances.lock();
        if let Some(resources) = instances.get_mut(&instance) {
            resources.timers.retain(|t| !t.is_finished());
            resources.timers.push(timer);
            return;
        }
        drop(instances);
        warn!(instance = %instance, "Timer created for a disposed instance, aborting");
        timer.abort();
    }

    /// Records a subscription; `unsubscribe` runs on disposal.
    pub fn add_subscription(&self, instance: InstanceId, unsubscribe: impl FnOnce() + Send + 'static) {
        let mut instances = self.instances.lock();
        if let Some(resources) = instances.get_mut(&instance) {
            resources.subscriptions.push(Box::new(unsubscribe));
            return;
        }
        drop(instances);
        warn!(instance = %instance, "Subscription created for a disposed instance, removing");
        unsubscribe();
    }

    /// Cancels every timer and removes every subscription of `instance`,
    /// then forgets it. Returns `false` if it was already disposed.
    pub fn dispose(&self, instance: InstanceId) -> bool {
        // Release outside the lock: unsubscribe callbacks may call back in.
        let Some(resources) = self.instances.lock().remove(&instance) else {
            trace!(instance = %instance, "Instance already disposed");
            return false;
        };
        let (timers, subscriptions) = resources.release();
        debug!(instance = %instance, timers, subscriptions, "Disposed handler instance");
        true
    }

    /// Disposes every tracked instance.
    pub fn dispose_all(&self) -> usize {
        let drained: Vec<_> = self.instances.lock().drain().collect();
        let count = drained.len();
        for (instance, resources) in drained {
            let (timers, subscriptions) = resources.release();
            trace!(instance = %instance, timers, subscriptions, "Disposed handler instance");
        }
        if count > 0 {
            debug!(count, "Disposed all handler instances");
        }
        count
    }
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("instances", &self.instances.lock().len())
            .finish()
    }
}

/// Resource handle given to a handler, scoped to its instance.
#[derive(Clone)]
pub struct Lifecycle {
    instance: InstanceId,
    manager: Arc<LifecycleManager>,
}

impl Lifecycle {
    pub fn new(instance: InstanceId, manager: Arc<LifecycleManager>) -> Self {
        Self { instance, manager }
    }

    /// The handler instance this handle belongs to.
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Runs `task` after `delay` unless the instance is disposed first.
    pub fn spawn_timer<F>(&self, delay: Duration, task: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        let abort = handle.abort_handle();
        self.manager.add_timer(self.instance, abort.clone());
        abort
    }

    /// Runs `tick` every `period` until the instance is disposed.
    pub fn spawn_interval<F, Fut>(&self, period: Duration, mut tick: F) -> AbortHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        let abort = handle.abort_handle();
        self.manager.add_timer(self.instance, abort.clone());
        abort
    }

    /// Registers a callback that removes a subscription on disposal.
    pub fn on_dispose(&self, unsubscribe: impl FnOnce() + Send + 'static) {
        self.manager.add_subscription(self.instance, unsubscribe);
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("instance", &self.instance)
            .finish()
    }
}
