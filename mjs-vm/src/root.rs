use crate::handle::CellId;
use crate::handle::RootId;
use crate::value::Value;
use crate::vm::Vm;

/// Values pinned by the embedder. Every live entry is a GC root and is rewritten when the
/// string it references moves.
#[derive(Default)]
pub(crate) struct RootRegistry {
  slots: Vec<(u16, Option<Value>)>,
  free: Vec<u32>,
}

impl RootRegistry {
  pub fn add(&mut self, value: Value) -> RootId {
    let index = match self.free.pop() {
      Some(index) => index as usize,
      None => {
        self.slots.push((0, None));
        self.slots.len() - 1
      }
    };
    let slot = &mut self.slots[index];
    slot.1 = Some(value);
    RootId(CellId::from_parts(index as u32, slot.0))
  }

  fn slot(&self, id: RootId) -> Option<&Option<Value>> {
    let (generation, value) = self.slots.get(id.0.index() as usize)?;
    (*generation == id.0.generation()).then_some(value)
  }

  pub fn get(&self, id: RootId) -> Option<Value> {
    self.slot(id).copied().flatten()
  }

  pub fn set(&mut self, id: RootId, value: Value) -> bool {
    if self.get(id).is_none() {
      return false;
    }
    self.slots[id.0.index() as usize].1 = Some(value);
    true
  }

  pub fn remove(&mut self, id: RootId) -> bool {
    if self.get(id).is_none() {
      return false;
    }
    let index = id.0.index();
    let slot = &mut self.slots[index as usize];
    slot.1 = None;
    slot.0 = slot.0.wrapping_add(1);
    self.free.push(index);
    true
  }

  pub fn len(&self) -> usize {
    self.slots.iter().filter(|(_, v)| v.is_some()).count()
  }

  pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> {
    self.slots.iter_mut().filter_map(|(_, v)| v.as_mut())
  }
}

/// RAII wrapper for a root created by [`Vm::own`].
///
/// While the guard is alive it holds a mutable borrow of the [`Vm`]; run scripts through
/// [`PersistentRoot::vm_mut`]. For roots stored in host state, keep the [`RootId`] instead and
/// release it with [`Vm::disown`].
pub struct PersistentRoot<'a> {
  vm: &'a mut Vm,
  id: RootId,
}

impl<'a> PersistentRoot<'a> {
  pub fn new(vm: &'a mut Vm, value: Value) -> Self {
    let id = vm.own(value);
    Self { vm, id }
  }

  #[inline]
  pub fn id(&self) -> RootId {
    self.id
  }

  /// The pinned value, with string offsets kept current across collections.
  pub fn get(&self) -> Value {
    self.vm.root_value(self.id).unwrap_or(Value::UNDEFINED)
  }

  pub fn set(&mut self, value: Value) {
    self.vm.set_root(self.id, value);
  }

  pub fn vm(&self) -> &Vm {
    self.vm
  }

  pub fn vm_mut(&mut self) -> &mut Vm {
    self.vm
  }
}

impl Drop for PersistentRoot<'_> {
  fn drop(&mut self) {
    self.vm.disown(self.id);
  }
}
