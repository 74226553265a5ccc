use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;

use crate::error::{GpioError, Result};

pub(crate) fn spawn_named<F>(name: String, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|e| GpioError::Os(format!("spawn {name}: {e}")))
}

pub struct Task<T> {
    name: String,
    handle: JoinHandle<()>,
    result: oneshot::Receiver<T>,
}

impl<T: Send + 'static> Task<T> {
    pub fn spawn<F>(name: impl Into<String>, f: F) -> Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let name = name.into();
        let (tx, rx) = oneshot::channel();
        let handle = spawn_named(name.clone(), move || {
            let _ = tx.send(f());
        })?;

        Ok(Self {
            name,
            handle,
            result: rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn join(self) -> Result<T> {
        let Self {
            name,
            handle,
            mut result,
        } = self;
        handle
            .join()
            .map_err(|_| GpioError::Os(format!("task {name} panicked")))?;
        result
            .try_recv()
            .map_err(|_| GpioError::Os(format!("task {name} produced no result")))
    }

    pub async fn completion(self) -> Result<T> {
        let Self {
            name,
            handle,
            result,
        } = self;
        let value = result
            .await
            .map_err(|_| GpioError::Os(format!("task {name} panicked")))?;
        // the sender is the closure's last action, so this join does not block
        let _ = handle.join();
        Ok(value)
    }
}
