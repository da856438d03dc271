//! Debug console: stdin/stdout/stderr over two GATT characteristics
//!
//! Writes to stdin go out on the stdinout characteristic in chunks of at most
//! `max_write` bytes. Notifications on stdinout are stdout, notifications on
//! the stderr characteristic are stderr.
//!
//! Listener callbacks of one console run in the order the traffic happened.
//! A console is closed when a reconnect drops its characteristics; its
//! listeners get `on_closed` and later writes fail.

use crate::dispatch::{Dispatcher, SerialQueue};
use crate::firmware::transfer::ConsoleSink;
use crate::gatt::Characteristic;
use crate::node::Node;
use crate::BlueStError;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Console traffic callbacks; all methods default to no-ops
pub trait DebugConsoleListener: Send + Sync {
    fn on_stdout_receive(&self, _console: &Arc<DebugConsole>, _data: &[u8]) {}

    fn on_stderr_receive(&self, _console: &Arc<DebugConsole>, _data: &[u8]) {}

    /// One chunk of a `write` call went out (`sent`) or failed
    fn on_stdin_send(&self, _console: &Arc<DebugConsole>, _data: &[u8], _sent: bool) {}

    /// The console is gone; the listener has already been removed
    fn on_closed(&self, _console: &Arc<DebugConsole>) {}
}

pub struct DebugConsole {
    me: Weak<DebugConsole>,
    node: Weak<Node>,
    stdinout: Characteristic,
    stderr: Option<Characteristic>,
    listeners: RwLock<Vec<Arc<dyn DebugConsoleListener>>>,
    queue: SerialQueue,
    // owns the runtime `queue` runs on
    _dispatcher: Arc<Dispatcher>,
    max_write: usize,
    upload_active: AtomicBool,
    closed: AtomicBool,
}

impl DebugConsole {
    pub(crate) fn new(
        node: Weak<Node>,
        stdinout: Characteristic,
        stderr: Option<Characteristic>,
        dispatcher: Arc<Dispatcher>,
        max_write: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            node,
            stdinout,
            stderr,
            listeners: RwLock::new(Vec::new()),
            queue: dispatcher.serial_queue(),
            _dispatcher: dispatcher,
            max_write: max_write.max(1),
            upload_active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn node(&self) -> Option<Arc<Node>> {
        self.node.upgrade()
    }

    pub fn max_write(&self) -> usize {
        self.max_write
    }

    pub(crate) fn handles(&self, handle: u16) -> bool {
        self.stdinout.handle == handle
            || self.stderr.as_ref().is_some_and(|c| c.handle == handle)
    }

    /// True when this console talks through exactly these characteristics
    pub(crate) fn uses(&self, stdinout: &Characteristic, stderr: Option<&Characteristic>) -> bool {
        self.stdinout.handle == stdinout.handle
            && self.stdinout.uuid == stdinout.uuid
            && self.stderr.as_ref().map(|c| (c.handle, c.uuid))
                == stderr.map(|c| (c.handle, c.uuid))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), BlueStError> {
        if self.is_closed() {
            return Err(BlueStError::InvalidOperation(
                "debug console is closed".to_string(),
            ));
        }
        Ok(())
    }

    /// Send `data` to the device's stdin.
    ///
    /// Returns the number of bytes written. A transport failure stops the
    /// write; the bytes sent before it are still reported.
    pub fn write(&self, data: &[u8]) -> Result<usize, BlueStError> {
        self.ensure_open()?;
        let node = self.node.upgrade().ok_or_else(|| {
            BlueStError::InvalidOperation("debug console outlived its node".to_string())
        })?;

        let mut written = 0;
        for chunk in data.chunks(self.max_write) {
            let sent = match node.write_characteristic(self.stdinout.handle, chunk, true) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Debug console write failed after {} bytes: {}", written, e);
                    false
                }
            };
            self.notify_stdin_send(chunk, sent);
            if !sent {
                break;
            }
            written += chunk.len();
        }
        Ok(written)
    }

    /// UTF-8 convenience over `write`
    pub fn write_str(&self, text: &str) -> Result<usize, BlueStError> {
        self.write(text.as_bytes())
    }

    /// Register a listener. The first one turns on stdout/stderr notifications.
    pub fn add_listener(&self, listener: Arc<dyn DebugConsoleListener>) -> Result<(), BlueStError> {
        self.ensure_open()?;
        let first = {
            let mut listeners = self.listeners.write();
            if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
                return Ok(());
            }
            listeners.push(listener);
            listeners.len() == 1
        };
        if first {
            self.set_notifications(true)?;
        }
        Ok(())
    }

    /// Unregister a listener. Removing the last one turns notifications off.
    pub fn remove_listener(&self, listener: &Arc<dyn DebugConsoleListener>) -> Result<(), BlueStError> {
        let last = {
            let mut listeners = self.listeners.write();
            let before = listeners.len();
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
            before > 0 && listeners.is_empty()
        };
        if last && !self.is_closed() {
            self.set_notifications(false)?;
        }
        Ok(())
    }

    /// Turn notifications back on after a reconnect if anyone is listening.
    pub(crate) fn resume(&self) -> Result<(), BlueStError> {
        if self.is_closed() || self.listeners.read().is_empty() {
            return Ok(());
        }
        self.set_notifications(true)
    }

    /// Detach every listener and tell it the console is gone.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(console) = self.me.upgrade() else {
            return;
        };
        let listeners = std::mem::take(&mut *self.listeners.write());
        debug!("Debug console closed with {} listener(s)", listeners.len());
        for listener in listeners {
            let console = console.clone();
            self.queue.submit(move || listener.on_closed(&console));
        }
    }

    fn set_notifications(&self, enabled: bool) -> Result<(), BlueStError> {
        let node = match self.node.upgrade() {
            Some(node) => node,
            None => return Ok(()),
        };
        node.set_notification_status(self.stdinout.handle, enabled)?;
        if let Some(stderr) = &self.stderr {
            node.set_notification_status(stderr.handle, enabled)?;
        }
        Ok(())
    }

    pub(crate) fn on_characteristic_update(&self, handle: u16, data: &[u8]) {
        let Some(console) = self.me.upgrade() else {
            return;
        };
        let is_stderr = self.stderr.as_ref().is_some_and(|c| c.handle == handle);
        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            debug!("Debug console: {} byte(s) with no listener", data.len());
            return;
        }

        let data: Arc<[u8]> = data.into();
        for listener in listeners {
            let console = console.clone();
            let data = data.clone();
            self.queue.submit(move || {
                if is_stderr {
                    listener.on_stderr_receive(&console, &data);
                } else {
                    listener.on_stdout_receive(&console, &data);
                }
            });
        }
    }

    fn notify_stdin_send(&self, chunk: &[u8], sent: bool) {
        let Some(console) = self.me.upgrade() else {
            return;
        };
        let listeners = self.listeners.read().clone();
        let chunk: Arc<[u8]> = chunk.into();
        for listener in listeners {
            let console = console.clone();
            let chunk = chunk.clone();
            self.queue
                .submit(move || listener.on_stdin_send(&console, &chunk, sent));
        }
    }

    /// Claim the console for a firmware upload; false when one is running.
    pub(crate) fn try_begin_upload(&self) -> bool {
        self.upload_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn end_upload(&self) {
        self.upload_active.store(false, Ordering::SeqCst);
    }

    pub fn is_uploading(&self) -> bool {
        self.upload_active.load(Ordering::SeqCst)
    }
}

impl ConsoleSink for DebugConsole {
    fn write(&self, data: &[u8]) -> Result<usize, BlueStError> {
        DebugConsole::write(self, data)
    }
}

impl std::fmt::Debug for DebugConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugConsole")
            .field("stdinout", &self.stdinout.handle)
            .field("stderr", &self.stderr.as_ref().map(|c| c.handle))
            .field("max_write", &self.max_write)
            .field("closed", &self.is_closed())
            .finish()
    }
}
