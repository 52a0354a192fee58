use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Host-side handle that asks a running VM to stop.
///
/// The dispatch loop polls the flag before every instruction. A raised flag ends the outermost
/// execution with the silent [`crate::VmError::Exit`] and is lowered again once that execution
/// has unwound, so the next `exec` runs normally.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
  flag: Arc<AtomicBool>,
}

impl InterruptHandle {
  pub(crate) fn new(flag: Option<Arc<AtomicBool>>) -> Self {
    Self {
      flag: flag.unwrap_or_else(|| Arc::new(AtomicBool::new(false))),
    }
  }

  pub fn interrupt(&self) {
    self.flag.store(true, Ordering::Relaxed);
  }

  pub fn is_interrupted(&self) -> bool {
    self.flag.load(Ordering::Relaxed)
  }

  pub(crate) fn clear(&self) {
    self.flag.store(false, Ordering::Relaxed);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn shared_flag_is_observed_by_every_clone() {
    let shared = Arc::new(AtomicBool::new(false));
    let handle = InterruptHandle::new(Some(shared.clone()));
    let other = handle.clone();
    other.interrupt();
    assert!(handle.is_interrupted());
    assert!(shared.load(Ordering::Relaxed));
    handle.clear();
    assert!(!other.is_interrupted());
  }
}
