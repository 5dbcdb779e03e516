// ABOUTME: Terminal proxy state machine shared by the PTY/pipe-pane/SSH variants (§4.8)
// States: INITIAL -> ATTACHING -> READY <-> SWITCHING -> DEAD; switches coalesce to "latest wins"

pub mod pipe_pane;
pub mod pty;
pub mod ssh;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Initial,
    Attaching,
    Ready,
    Switching,
    Dead,
}

/// Capability set a concrete variant (PTY / pipe-pane / SSH) implements.
/// `TerminalProxy` owns everything state-machine-shaped; backends only know
/// how to actually attach, switch, write, resize and tear themselves down.
#[async_trait]
pub trait ProxyBackend: Send + Sync {
    /// Attach the helper session and start streaming output into `output_tx`.
    /// Resolves once the client TTY (or control-mode channel) is usable.
    async fn attach(&self, output_tx: mpsc::Sender<Vec<u8>>) -> Result<(), AppError>;

    async fn raw_switch(&self, target: &str) -> Result<(), AppError>;

    async fn raw_write(&self, data: &[u8]) -> Result<(), AppError>;

    async fn raw_resize(&self, cols: u16, rows: u16) -> Result<(), AppError>;

    async fn raw_dispose(&self);

    fn mode(&self) -> &'static str;
}

struct SwitchSlot {
    target: Option<String>,
    waiters: Vec<oneshot::Sender<Result<String, String>>>,
    running: bool,
}

/// Shared state-machine wrapper generic over any `ProxyBackend`.
pub struct TerminalProxy {
    backend: Arc<dyn ProxyBackend>,
    state: Arc<RwLock<ProxyState>>,
    start_lock: Arc<Mutex<()>>,
    start_attempt_id: Arc<AtomicU64>,
    switch: Arc<Mutex<SwitchSlot>>,
    last_dims: Arc<Mutex<(u16, u16)>>,
    output_suppressed: Arc<AtomicBool>,
    start_timeout: Duration,
}

impl TerminalProxy {
    pub fn new(backend: Arc<dyn ProxyBackend>, start_timeout: Duration) -> Self {
        Self {
            backend,
            state: Arc::new(RwLock::new(ProxyState::Initial)),
            start_lock: Arc::new(Mutex::new(())),
            start_attempt_id: Arc::new(AtomicU64::new(0)),
            switch: Arc::new(Mutex::new(SwitchSlot {
                target: None,
                waiters: Vec::new(),
                running: false,
            })),
            last_dims: Arc::new(Mutex::new((80, 24))),
            output_suppressed: Arc::new(AtomicBool::new(false)),
            start_timeout,
        }
    }

    pub async fn state(&self) -> ProxyState {
        *self.state.read().await
    }

    pub fn mode(&self) -> &'static str {
        self.backend.mode()
    }

    /// Idempotent: concurrent callers serialize on `start_lock` and the
    /// second caller observes `Ready` already set and returns immediately,
    /// so exactly one `attach()` (and thus one `new-session`) ever runs.
    pub async fn start(
        &self,
        cols: u16,
        rows: u16,
        output_tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), AppError> {
        if *self.state.read().await == ProxyState::Ready {
            return Ok(());
        }
        let _guard = self.start_lock.lock().await;
        if *self.state.read().await == ProxyState::Ready {
            return Ok(());
        }

        *self.state.write().await = ProxyState::Attaching;
        *self.last_dims.lock().await = (cols, rows);
        let attempt_id = self.start_attempt_id.fetch_add(1, Ordering::SeqCst) + 1;

        let (raw_tx, mut raw_rx) = mpsc::channel(256);
        let suppressed = self.output_suppressed.clone();
        tokio::spawn(async move {
            while let Some(chunk) = raw_rx.recv().await {
                if !suppressed.load(Ordering::Relaxed) {
                    let _ = output_tx.send(chunk).await;
                }
            }
        });

        let attach_result = tokio::time::timeout(self.start_timeout, self.backend.attach(raw_tx)).await;

        if self.start_attempt_id.load(Ordering::SeqCst) != attempt_id {
            // Disposed (or a newer start) superseded us while attaching.
            return Err(AppError::StartTimeout);
        }

        match attach_result {
            Ok(Ok(())) => {
                *self.state.write().await = ProxyState::Ready;
                Ok(())
            }
            Ok(Err(e)) => {
                *self.state.write().await = ProxyState::Dead;
                Err(e)
            }
            Err(_) => {
                warn!(mode = self.backend.mode(), "terminal proxy start timed out");
                *self.state.write().await = ProxyState::Dead;
                self.backend.raw_dispose().await;
                Err(AppError::StartTimeout)
            }
        }
    }

    /// Coalescing switch: if a switch is already executing when this is
    /// called, our target replaces whatever is pending and our waiter joins
    /// whichever batch resolves last — so only the most recently requested
    /// target is ever actually switched to.
    pub async fn switch_to(&self, target: String) -> Result<String, AppError> {
        if *self.state.read().await == ProxyState::Dead {
            return Err(AppError::NotReady);
        }
        let (tx, rx) = oneshot::channel();
        let mut slot = self.switch.lock().await;
        slot.target = Some(target);
        slot.waiters.push(tx);
        let should_spawn = !slot.running;
        slot.running = true;
        drop(slot);

        if should_spawn {
            self.spawn_switch_worker();
        }

        rx.await
            .unwrap_or_else(|_| Err("switch worker dropped".to_string()))
            .map_err(AppError::TmuxSwitchFailed)
    }

    fn spawn_switch_worker(&self) {
        let backend = self.backend.clone();
        let switch = self.switch.clone();
        let state = self.state.clone();
        let suppressed = self.output_suppressed.clone();

        tokio::spawn(async move {
            loop {
                let (target, waiters) = {
                    let mut slot = switch.lock().await;
                    let target = match slot.target.take() {
                        Some(t) => t,
                        None => {
                            slot.running = false;
                            return;
                        }
                    };
                    let waiters = std::mem::take(&mut slot.waiters);
                    (target, waiters)
                };

                *state.write().await = ProxyState::Switching;
                suppressed.store(true, Ordering::Relaxed);
                let result = backend
                    .raw_switch(&target)
                    .await
                    .map(|()| target.clone())
                    .map_err(|e| e.to_string());
                suppressed.store(false, Ordering::Relaxed);
                if *state.read().await != ProxyState::Dead {
                    *state.write().await = ProxyState::Ready;
                }

                let mut slot = switch.lock().await;
                if slot.target.is_some() {
                    // A newer target arrived mid-switch; keep these waiters
                    // to be resolved with the eventual final result too.
                    slot.waiters.splice(0..0, waiters);
                    continue;
                }
                slot.running = false;
                drop(slot);

                debug!(target = %target, ok = result.is_ok(), "terminal proxy switch settled");
                for w in waiters {
                    let _ = w.send(result.clone());
                }
                break;
            }
        });
    }

    pub async fn write(&self, data: &[u8]) -> Result<(), AppError> {
        if *self.state.read().await != ProxyState::Ready {
            return Ok(());
        }
        self.backend.raw_write(data).await
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), AppError> {
        *self.last_dims.lock().await = (cols, rows);
        if *self.state.read().await == ProxyState::Ready {
            self.backend.raw_resize(cols, rows).await?;
        }
        Ok(())
    }

    pub fn suppress_output(&self, suppressed: bool) {
        self.output_suppressed.store(suppressed, Ordering::Relaxed);
    }

    /// Invalidates any in-flight start/switch, tears down the helper
    /// session, and transitions to `Dead`. Idempotent.
    pub async fn dispose(&self) {
        self.start_attempt_id.fetch_add(1, Ordering::SeqCst);
        *self.state.write().await = ProxyState::Dead;
        self.backend.raw_dispose().await;
    }
}

/// Unescape tmux control-mode's octal byte escapes (`\NNN`) back into raw
/// bytes, used by the pipe-pane variant when decoding `%output` lines.
pub(crate) fn unescape_control_mode(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && bytes[i + 1].is_ascii_digit() {
            let octal = &s[i + 1..i + 4];
            if let Ok(value) = u8::from_str_radix(octal, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FakeBackend {
        switch_calls: AtomicUsize,
        last_target: Mutex<Option<String>>,
        fail_attach: bool,
    }

    #[async_trait]
    impl ProxyBackend for FakeBackend {
        async fn attach(&self, _output_tx: mpsc::Sender<Vec<u8>>) -> Result<(), AppError> {
            if self.fail_attach {
                Err(AppError::SessionCreateFailed("boom".into()))
            } else {
                Ok(())
            }
        }

        async fn raw_switch(&self, target: &str) -> Result<(), AppError> {
            self.switch_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_target.lock().await = Some(target.to_string());
            Ok(())
        }

        async fn raw_write(&self, _data: &[u8]) -> Result<(), AppError> {
            Ok(())
        }

        async fn raw_resize(&self, _cols: u16, _rows: u16) -> Result<(), AppError> {
            Ok(())
        }

        async fn raw_dispose(&self) {}

        fn mode(&self) -> &'static str {
            "fake"
        }
    }

    #[tokio::test]
    async fn start_is_idempotent_across_concurrent_callers() {
        let backend = Arc::new(FakeBackend {
            switch_calls: AtomicUsize::new(0),
            last_target: Mutex::new(None),
            fail_attach: false,
        });
        let proxy = Arc::new(TerminalProxy::new(backend, Duration::from_secs(2)));
        let (tx, _rx) = mpsc::channel(16);

        let p1 = proxy.clone();
        let t1 = tx.clone();
        let p2 = proxy.clone();
        let t2 = tx.clone();
        let (r1, r2) = tokio::join!(p1.start(80, 24, t1), p2.start(80, 24, t2));
        assert!(r1.is_ok());
        assert!(r2.is_ok());
        assert_eq!(proxy.state().await, ProxyState::Ready);
    }

    #[tokio::test]
    async fn failed_attach_leaves_proxy_dead() {
        let backend = Arc::new(FakeBackend {
            switch_calls: AtomicUsize::new(0),
            last_target: Mutex::new(None),
            fail_attach: true,
        });
        let proxy = TerminalProxy::new(backend, Duration::from_secs(2));
        let (tx, _rx) = mpsc::channel(16);
        assert!(proxy.start(80, 24, tx).await.is_err());
        assert_eq!(proxy.state().await, ProxyState::Dead);
    }

    #[tokio::test]
    async fn coalesced_switches_only_execute_the_latest_target() {
        let backend = Arc::new(FakeBackend {
            switch_calls: AtomicUsize::new(0),
            last_target: Mutex::new(None),
            fail_attach: false,
        });
        let proxy = Arc::new(TerminalProxy::new(backend.clone(), Duration::from_secs(2)));
        let (tx, _rx) = mpsc::channel(16);
        proxy.start(80, 24, tx).await.unwrap();

        let p1 = proxy.clone();
        let p2 = proxy.clone();
        let p3 = proxy.clone();
        let (r1, r2, r3) = tokio::join!(
            p1.switch_to("agentboard:0".to_string()),
            p2.switch_to("agentboard:1".to_string()),
            p3.switch_to("agentboard:2".to_string()),
        );
        assert_eq!(r1.unwrap(), "agentboard:2");
        assert_eq!(r2.unwrap(), "agentboard:2");
        assert_eq!(r3.unwrap(), "agentboard:2");
    }

    #[test]
    fn unescapes_octal_sequences() {
        assert_eq!(unescape_control_mode(r"a\015\012b"), vec![b'a', 13, 10, b'b']);
        assert_eq!(unescape_control_mode("plain"), b"plain".to_vec());
    }
}
