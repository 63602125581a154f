//! Ownership of the serial handle and the in-flight command.
//!
//! [`ConnectionState`] enforces the two singleton rules of the engine: at most one open
//! transport and at most one command in flight. All access goes through its methods,
//! which may be called from any thread (a Ctrl-C handler cancelling a command, for
//! example).
//!
//! ```text
//!  closed ──open──► open ──begin_command──► busy
//!    ▲               │  ▲                    │
//!    └─────close─────┘  └──── guard drop ────┘
//! ```
//!
//! Closing while a command is in flight only forgets the handle: the running session keeps
//! its own reference and the port is released once that session ends.
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError},
};

use log::{debug, info, warn};
use thiserror::Error;

use super::{
    cancel::CancellationToken,
    response::CancelReport,
    transport::{SerialTransport, TransportError},
};

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("a transport is already open")]
    AlreadyOpen,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum CloseError {
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("a command is already in flight")]
pub struct BusyError;

/// Shared reference to the open transport.
#[derive(Clone)]
pub struct TransportHandle {
    id: u64,
    inner: Arc<Mutex<Box<dyn SerialTransport>>>,
}

impl TransportHandle {
    fn new(id: u64, transport: Box<dyn SerialTransport>) -> Self {
        Self {
            id,
            inner: Arc::new(Mutex::new(transport)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_open()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Box<dyn SerialTransport>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("id", &self.id)
            .finish()
    }
}

#[derive(Debug)]
struct ActiveCommand {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct Slots {
    transport: Option<TransportHandle>,
    active: Option<ActiveCommand>,
    next_handle: u64,
    next_command: u64,
}

#[derive(Debug, Default)]
pub struct ConnectionState {
    slots: Mutex<Slots>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a transport through `source` unless one is already open.
    ///
    /// `source` runs without the state lock held, so a slow device open never delays
    /// `cancel_command` for a command still running on a previous handle.
    pub fn open<F>(&self, source: F) -> Result<TransportHandle, OpenError>
    where
        F: FnOnce() -> Result<Box<dyn SerialTransport>, TransportError>,
    {
        if self.slots().transport.is_some() {
            return Err(OpenError::AlreadyOpen);
        }

        let mut transport = source()?;

        let mut slots = self.slots();
        if slots.transport.is_some() {
            drop(slots);
            if let Err(e) = transport.close() {
                warn!("failed to close surplus transport: {e}");
            }
            return Err(OpenError::AlreadyOpen);
        }
        slots.next_handle += 1;
        let handle = TransportHandle::new(slots.next_handle, transport);
        slots.transport = Some(handle.clone());

        info!("transport {} opened", handle.id);
        Ok(handle)
    }

    /// Forgets the open transport. Closing with nothing open succeeds.
    pub fn close(&self) -> Result<(), CloseError> {
        let (handle, busy) = {
            let mut slots = self.slots();
            (slots.transport.take(), slots.active.is_some())
        };
        let Some(handle) = handle else {
            debug!("close requested without an open transport");
            return Ok(());
        };

        if busy {
            info!(
                "transport {} in use by a command; released when it finishes",
                handle.id
            );
            return Ok(());
        }

        match handle.inner.try_lock() {
            Ok(mut transport) => transport.close()?,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().close()?,
            Err(TryLockError::WouldBlock) => {
                info!(
                    "transport {} in use by a command; released when it finishes",
                    handle.id
                );
            }
        }

        info!("transport {} closed", handle.id);
        Ok(())
    }

    /// Drops `handle` after a fatal transport error, unless it was already replaced.
    pub(crate) fn discard(&self, handle: &TransportHandle) {
        let mut slots = self.slots();
        if slots.transport.as_ref().is_some_and(|t| t.id == handle.id) {
            slots.transport = None;
            info!("transport {} discarded after failure", handle.id);
        }
    }

    /// Marks a command as in flight. The returned guard clears it again when dropped.
    pub fn begin_command(&self) -> Result<CommandGuard<'_>, BusyError> {
        let mut slots = self.slots();
        if slots.active.is_some() {
            return Err(BusyError);
        }

        slots.next_command += 1;
        let id = slots.next_command;
        let cancel = CancellationToken::new();
        slots.active = Some(ActiveCommand {
            id,
            cancel: cancel.clone(),
        });

        debug!("command {id} started");
        Ok(CommandGuard {
            state: self,
            id,
            cancel,
            transport: slots.transport.clone(),
        })
    }

    /// Asks the in-flight command to stop. A no-op when nothing is running.
    pub fn cancel_command(&self) -> CancelReport {
        match &self.slots().active {
            Some(active) => {
                active.cancel.cancel();
                info!("cancel requested for command {}", active.id);
                CancelReport::ok("Requesting Cancel")
            }
            None => {
                debug!("cancel requested with no command in flight");
                CancelReport::ok("No command in flight")
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.slots().transport.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.slots().active.is_some()
    }
}

/// Proof that the holder owns the single in-flight command slot.
#[derive(Debug)]
pub struct CommandGuard<'a> {
    state: &'a ConnectionState,
    id: u64,
    cancel: CancellationToken,
    transport: Option<TransportHandle>,
}

impl CommandGuard<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Transport that was open when the command began.
    pub fn transport(&self) -> Option<&TransportHandle> {
        self.transport.as_ref()
    }

    pub(crate) fn state(&self) -> &ConnectionState {
        self.state
    }
}

impl Drop for CommandGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.state.slots();
        if slots.active.as_ref().is_some_and(|a| a.id == self.id) {
            slots.active = None;
            debug!("command {} finished", self.id);
        }
    }
}
