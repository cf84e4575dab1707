use std::{future::Future, rc::Rc, time::Duration};

use futures::{
    future::{abortable, AbortHandle, FutureExt},
    task::{LocalFutureObj, LocalSpawn, LocalSpawnExt, SpawnError},
};
use fxhash::FxHashMap;
use log::debug;

use super::{clock::Clock, PlayerError, PlayerErrorCode};

/// Spawns local tasks on the browser's event loop.
pub struct BrowserSpawner;

impl LocalSpawn for BrowserSpawner {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        async_std::task::spawn_local(future);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleKind {
    /// Network refresh of the active segment list, then a local update.
    Main,
    /// Local update only.
    Sub,
}

impl CycleKind {
    pub fn name(&self) -> &'static str {
        match self {
            CycleKind::Main => "main",
            CycleKind::Sub => "sub",
        }
    }
}

pub struct PeriodicTask {
    pub kind: CycleKind,
    pub period: Duration,
    handle: AbortHandle,
}

impl PeriodicTask {
    pub fn cancel(&self) {
        debug!("cancel {} cycle", self.kind.name());
        self.handle.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_aborted()
    }
}

/// Independently scheduled, independently cancellable periodic tasks.
pub struct CycleScheduler {
    tasks: FxHashMap<CycleKind, PeriodicTask>,
}

impl CycleScheduler {
    pub fn new() -> CycleScheduler {
        CycleScheduler {
            tasks: FxHashMap::default(),
        }
    }

    /// Runs `tick` every `period` until cancelled or until `tick` returns
    /// `None`. With `immediate` the first tick fires right away instead of
    /// after one period. Replaces any task already scheduled for `kind`.
    pub fn schedule<F, Fut>(
        &mut self,
        kind: CycleKind,
        period: Duration,
        immediate: bool,
        clock: Rc<dyn Clock>,
        spawner: &dyn LocalSpawn,
        mut tick: F,
    ) -> Result<(), PlayerError>
    where
        F: FnMut() -> Option<Fut> + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.forget(kind);

        let task = async move {
            if !immediate {
                clock.sleep(period).await;
            }
            while let Some(work) = tick() {
                work.await;
                clock.sleep(period).await;
            }
            debug!("{} cycle finished", kind.name());
        };
        let (task, handle) = abortable(task);
        spawner.spawn_local(task.map(|_| ())).map_err(|err| {
            PlayerError::new_code(
                PlayerErrorCode::Generic,
                format!("failed to spawn {} cycle: {}", kind.name(), err),
            )
        })?;

        debug!("schedule {} cycle every {:?}", kind.name(), period);
        self.tasks.insert(
            kind,
            PeriodicTask {
                kind,
                period,
                handle,
            },
        );
        Ok(())
    }

    pub fn forget(&mut self, kind: CycleKind) {
        if let Some(task) = self.tasks.remove(&kind) {
            task.cancel();
        }
    }

    pub fn get(&self, kind: CycleKind) -> Option<&PeriodicTask> {
        self.tasks.get(&kind)
    }

    pub fn is_scheduled(&self, kind: CycleKind) -> bool {
        self.tasks
            .get(&kind)
            .is_some_and(|task| !task.is_cancelled())
    }

    pub fn clear(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.cancel();
        }
    }
}

impl Default for CycleScheduler {
    fn default() -> Self {
        CycleScheduler::new()
    }
}
