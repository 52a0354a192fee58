//! Mark/sweep over the cell arenas plus compaction of the owned-string heap.
//!
//! Marking walks the roots (data, call, argument and scope stacks, the VM registers, pinned
//! roots and FFI callback registrations) with an explicit worklist. Owned strings have no mark
//! bit; the offsets reached during marking form the side table that compaction slides and that
//! the rewrite pass uses to patch every value slot.
//!
//! Collections only run at instruction boundaries or through [`Vm::gc`], never while a native
//! holds borrowed heap data.

use crate::heap::Heap;
use crate::heap::ObjectKind;
use crate::value::StrRepr;
use crate::value::Unpacked;
use crate::value::Value;
use crate::vm::Vm;

/// Outcome of one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
  pub objects_freed: usize,
  pub properties_freed: usize,
  pub ffi_sigs_freed: usize,
  pub blocks_released: usize,
  pub string_bytes_reclaimed: usize,
}

fn mark(heap: &mut Heap, mut work: Vec<Value>) -> Vec<u64> {
  let mut live_strings = Vec::new();
  while let Some(v) = work.pop() {
    match v.unpack() {
      Unpacked::Str(StrRepr::Owned(at)) => live_strings.push(at),
      Unpacked::Object(id)
      | Unpacked::Array(id)
      | Unpacked::ArrayBuffer(id)
      | Unpacked::DataView(id) => {
        if !heap.objects.mark(id.0) {
          continue;
        }
        let Some(cell) = heap.objects.get(id.0) else {
          continue;
        };
        match &cell.kind {
          ObjectKind::Array(items) => work.extend(items.iter().copied()),
          ObjectKind::DataView { buffer, .. } => work.push(Value::array_buffer(*buffer)),
          ObjectKind::Plain | ObjectKind::ArrayBuffer(_) => {}
        }
        let mut next = cell.props;
        while let Some(pid) = next {
          if !heap.properties.mark(pid.0) {
            break;
          }
          let Some(prop) = heap.properties.get(pid.0) else {
            break;
          };
          work.push(prop.name);
          work.push(prop.value);
          next = prop.next;
        }
      }
      Unpacked::FfiSig(id) => {
        heap.sigs.mark(id.0);
      }
      _ => {}
    }
  }
  live_strings
}

impl Vm {
  /// Visits every root slot the collector scans.
  fn for_each_root_mut(&mut self, mut f: impl FnMut(&mut Value)) {
    self.stack.iter_mut().for_each(&mut f);
    self.scopes.iter_mut().for_each(&mut f);
    for frame in self.call_stack.iter_mut() {
      f(&mut frame.prev_this);
    }
    for frame in self.arg_stack.iter_mut() {
      f(&mut frame.this);
    }
    f(&mut self.this_obj);
    f(&mut self.last_getprop_obj);
    self.roots.values_mut().for_each(&mut f);
    self.callbacks.values_mut().for_each(&mut f);
  }

  /// Runs a collection now. A full collection also shrinks the string heap to its live size
  /// plus the configured slack.
  pub fn gc(&mut self, full: bool) -> GcStats {
    let mut roots = Vec::new();
    self.for_each_root_mut(|v| roots.push(*v));
    let live_strings = mark(&mut self.heap, roots);

    let objects = self.heap.objects.sweep();
    let properties = self.heap.properties.sweep();
    let sigs = self.heap.sigs.sweep();

    let relocation = self.heap.strings.compact(live_strings);
    self.for_each_root_mut(|v| relocation.apply(v));
    self.heap.for_each_value_mut(|v| relocation.apply(v));
    if full {
      self.heap.strings.trim(self.options.string_slack);
    }
    self.heap.need_gc = false;

    let stats = GcStats {
      objects_freed: objects.freed,
      properties_freed: properties.freed,
      ffi_sigs_freed: sigs.freed,
      blocks_released: objects.released_blocks + properties.released_blocks + sigs.released_blocks,
      string_bytes_reclaimed: relocation.reclaimed,
    };
    tracing::debug!(
      target: "mjs_vm::gc",
      full,
      objects_freed = stats.objects_freed,
      properties_freed = stats.properties_freed,
      ffi_sigs_freed = stats.ffi_sigs_freed,
      blocks_released = stats.blocks_released,
      string_bytes_reclaimed = stats.string_bytes_reclaimed,
      "collected"
    );
    stats
  }

  /// Collects if an allocation asked for it and collection is not inhibited.
  pub(crate) fn maybe_gc(&mut self) {
    if self.heap.need_gc && self.inhibit_gc == 0 {
      self.gc(false);
    }
  }
}
