//! Managed objects: plain objects, arrays, array buffers and their views, plus the property
//! lists hanging off them.
//!
//! Objects and properties live in separate [`Arena`]s. An object owns the head of a singly
//! linked list of properties; new properties are appended at the tail so enumeration follows
//! insertion order. Lookup is a linear walk comparing key bytes.

use crate::arena::Arena;
use crate::arena::ArenaStats;
use crate::error::VmError;
use crate::ffi::FfiSignature;
use crate::handle::ObjectId;
use crate::handle::PropertyId;
use crate::handle::SigId;
use crate::string::StrRef;
use crate::string::StringHeap;
use crate::value::Unpacked;
use crate::value::Value;
use crate::vm::VmOptions;
use ahash::HashSet;
use ahash::HashSetExt;

/// Name of the property used for delegation: a failed lookup continues on the object it holds.
pub(crate) const PROTO_KEY: &[u8] = b"__p";

pub(crate) enum ObjectKind {
  Plain,
  /// Dense elements.
  Array(Vec<Value>),
  ArrayBuffer(Vec<u8>),
  DataView {
    buffer: ObjectId,
    offset: usize,
    len: usize,
  },
}

pub(crate) struct ObjectCell {
  pub props: Option<PropertyId>,
  pub kind: ObjectKind,
}

pub(crate) struct Property {
  pub next: Option<PropertyId>,
  pub name: Value,
  pub value: Value,
}

/// Live-cell statistics for every arena and the string heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
  pub objects: ArenaStats,
  pub properties: ArenaStats,
  pub ffi_sigs: ArenaStats,
  /// Bytes used by owned-string records.
  pub string_bytes: usize,
  /// Reserved size of the owned-string heap.
  pub string_capacity: usize,
  /// Live FFI callback registrations.
  pub callbacks: usize,
}

pub(crate) struct Heap {
  pub objects: Arena<ObjectCell>,
  pub properties: Arena<Property>,
  pub sigs: Arena<FfiSignature>,
  pub strings: StringHeap,
  /// Set by allocations that crossed a low-water mark; cleared by the collector.
  pub need_gc: bool,
}

fn invalid_handle() -> VmError {
  VmError::internal("invalid handle")
}

/// Object handle of a value that can carry properties.
pub(crate) fn prop_holder(v: Value) -> Option<ObjectId> {
  match v.unpack() {
    Unpacked::Object(id) | Unpacked::Array(id) => Some(id),
    _ => None,
  }
}

impl Heap {
  pub fn new(options: &VmOptions) -> Self {
    Self {
      objects: Arena::new(
        "object",
        options.object_cells_per_block,
        options.object_reserve,
      ),
      properties: Arena::new(
        "property",
        options.property_cells_per_block,
        options.property_reserve,
      ),
      sigs: Arena::new(
        "ffi_sig",
        options.ffi_sig_cells_per_block,
        options.ffi_sig_reserve,
      ),
      strings: StringHeap::new(options.string_heap_size, options.string_gc_ratio),
      need_gc: false,
    }
  }

  fn alloc_cell(&mut self, kind: ObjectKind) -> ObjectId {
    let (id, low) = self.objects.alloc(ObjectCell { props: None, kind });
    self.need_gc |= low;
    ObjectId(id)
  }

  pub fn new_object(&mut self) -> Value {
    Value::object(self.alloc_cell(ObjectKind::Plain))
  }

  pub fn new_array(&mut self, items: Vec<Value>) -> Value {
    Value::array(self.alloc_cell(ObjectKind::Array(items)))
  }

  pub fn new_array_buffer(&mut self, bytes: Vec<u8>) -> Value {
    Value::array_buffer(self.alloc_cell(ObjectKind::ArrayBuffer(bytes)))
  }

  pub fn new_data_view(&mut self, buffer: ObjectId, offset: usize, len: usize) -> Value {
    Value::data_view(self.alloc_cell(ObjectKind::DataView {
      buffer,
      offset,
      len,
    }))
  }

  pub fn new_sig(&mut self, sig: FfiSignature) -> Value {
    let (id, low) = self.sigs.alloc(sig);
    self.need_gc |= low;
    Value::ffi_sig(SigId(id))
  }

  pub fn alloc_string(&mut self, bytes: &[u8]) -> Result<Value, VmError> {
    let v = self.strings.alloc(bytes)?;
    self.need_gc |= self.strings.over_threshold();
    Ok(v)
  }

  pub fn str(&self, v: Value) -> Option<StrRef<'_>> {
    self.strings.get(v)
  }

  pub fn cell(&self, id: ObjectId) -> Result<&ObjectCell, VmError> {
    self.objects.get(id.0).ok_or_else(invalid_handle)
  }

  pub fn cell_mut(&mut self, id: ObjectId) -> Result<&mut ObjectCell, VmError> {
    self.objects.get_mut(id.0).ok_or_else(invalid_handle)
  }

  pub fn sig(&self, id: SigId) -> Result<&FfiSignature, VmError> {
    self.sigs.get(id.0).ok_or_else(invalid_handle)
  }

  fn prop(&self, id: PropertyId) -> Result<&Property, VmError> {
    self.properties.get(id.0).ok_or_else(invalid_handle)
  }

  fn prop_mut(&mut self, id: PropertyId) -> Result<&mut Property, VmError> {
    self.properties.get_mut(id.0).ok_or_else(invalid_handle)
  }

  fn key_bytes(&self, key: Value) -> Result<StrRef<'_>, VmError> {
    self
      .str(key)
      .ok_or_else(|| VmError::internal("property key is not a string"))
  }

  /// Finds the property named `key`, returning it together with its predecessor in the list.
  fn find(
    &self,
    obj: ObjectId,
    key: &[u8],
  ) -> Result<(Option<PropertyId>, Option<PropertyId>), VmError> {
    let mut prev = None;
    let mut cur = self.cell(obj)?.props;
    while let Some(id) = cur {
      let prop = self.prop(id)?;
      if self.str(prop.name).is_some_and(|name| &*name == key) {
        return Ok((prev, Some(id)));
      }
      prev = Some(id);
      cur = prop.next;
    }
    Ok((prev, None))
  }

  pub fn get_own_bytes(&self, obj: ObjectId, key: &[u8]) -> Result<Option<Value>, VmError> {
    match self.find(obj, key)?.1 {
      Some(id) => Ok(Some(self.prop(id)?.value)),
      None => Ok(None),
    }
  }

  pub fn get_own(&self, obj: ObjectId, key: Value) -> Result<Option<Value>, VmError> {
    let key = self.key_bytes(key)?;
    self.get_own_bytes(obj, &key)
  }

  /// Own lookup followed by the `__p` delegation chain. A chain that loops ends the lookup.
  pub fn get(&self, obj: ObjectId, key: &[u8]) -> Result<Option<Value>, VmError> {
    let mut seen = HashSet::new();
    let mut cur = obj;
    while seen.insert(cur) {
      if let Some(v) = self.get_own_bytes(cur, key)? {
        return Ok(Some(v));
      }
      match self.get_own_bytes(cur, PROTO_KEY)?.and_then(prop_holder) {
        Some(next) => cur = next,
        None => break,
      }
    }
    Ok(None)
  }

  /// Overwrites an existing property or appends a new one at the tail.
  pub fn set(&mut self, obj: ObjectId, key: Value, value: Value) -> Result<(), VmError> {
    let (tail, found) = {
      let key_bytes = self.key_bytes(key)?;
      self.find(obj, &key_bytes)?
    };
    if let Some(id) = found {
      self.prop_mut(id)?.value = value;
      return Ok(());
    }
    let (id, low) = self.properties.alloc(Property {
      next: None,
      name: key,
      value,
    });
    self.need_gc |= low;
    let id = PropertyId(id);
    match tail {
      Some(last) => self.prop_mut(last)?.next = Some(id),
      None => self.cell_mut(obj)?.props = Some(id),
    }
    Ok(())
  }

  /// Unlinks a property. The cell itself is reclaimed by the next sweep.
  pub fn del(&mut self, obj: ObjectId, key: Value) -> Result<bool, VmError> {
    let (prev, found) = {
      let key_bytes = self.key_bytes(key)?;
      self.find(obj, &key_bytes)?
    };
    let Some(id) = found else {
      return Ok(false);
    };
    let next = self.prop(id)?.next;
    match prev {
      Some(prev) => self.prop_mut(prev)?.next = next,
      None => self.cell_mut(obj)?.props = next,
    }
    Ok(true)
  }

  /// Name of the `n`th own property in insertion order.
  pub fn nth_key(&self, obj: ObjectId, n: usize) -> Result<Option<Value>, VmError> {
    let mut cur = self.cell(obj)?.props;
    let mut i = 0;
    while let Some(id) = cur {
      let prop = self.prop(id)?;
      if i == n {
        return Ok(Some(prop.name));
      }
      i += 1;
      cur = prop.next;
    }
    Ok(None)
  }

  pub fn keys(&self, obj: ObjectId) -> Result<Vec<Value>, VmError> {
    let mut out = Vec::new();
    let mut cur = self.cell(obj)?.props;
    while let Some(id) = cur {
      let prop = self.prop(id)?;
      out.push(prop.name);
      cur = prop.next;
    }
    Ok(out)
  }

  pub fn array(&self, id: ObjectId) -> Result<&Vec<Value>, VmError> {
    match &self.cell(id)?.kind {
      ObjectKind::Array(items) => Ok(items),
      _ => Err(VmError::type_error("not an array")),
    }
  }

  pub fn array_mut(&mut self, id: ObjectId) -> Result<&mut Vec<Value>, VmError> {
    match &mut self.cell_mut(id)?.kind {
      ObjectKind::Array(items) => Ok(items),
      _ => Err(VmError::type_error("not an array")),
    }
  }

  /// Writes an element, padding with `undefined` when writing past the end.
  pub fn array_set(&mut self, id: ObjectId, idx: usize, value: Value) -> Result<(), VmError> {
    let items = self.array_mut(id)?;
    if idx >= items.len() {
      let len = idx
        .checked_add(1)
        .ok_or_else(|| VmError::type_error(format!("index {idx} is out of range")))?;
      items
        .try_reserve(len - items.len())
        .map_err(|_| VmError::OutOfMemory(format!("cannot grow array to {len} elements")))?;
      items.resize(len, Value::UNDEFINED);
    }
    items[idx] = value;
    Ok(())
  }

  pub fn buffer(&self, id: ObjectId) -> Result<&Vec<u8>, VmError> {
    match &self.cell(id)?.kind {
      ObjectKind::ArrayBuffer(bytes) => Ok(bytes),
      _ => Err(VmError::type_error("not an array buffer")),
    }
  }

  pub fn buffer_mut(&mut self, id: ObjectId) -> Result<&mut Vec<u8>, VmError> {
    match &mut self.cell_mut(id)?.kind {
      ObjectKind::ArrayBuffer(bytes) => Ok(bytes),
      _ => Err(VmError::type_error("not an array buffer")),
    }
  }

  /// `(buffer, offset, len)` of a view.
  pub fn view(&self, id: ObjectId) -> Result<(ObjectId, usize, usize), VmError> {
    match self.cell(id)?.kind {
      ObjectKind::DataView {
        buffer,
        offset,
        len,
      } => Ok((buffer, offset, len)),
      _ => Err(VmError::type_error("not a data view")),
    }
  }

  /// Visits every value slot held inside the arenas.
  pub fn for_each_value_mut(&mut self, mut f: impl FnMut(&mut Value)) {
    self.properties.for_each_mut(|_, prop| {
      f(&mut prop.name);
      f(&mut prop.value);
    });
    self.objects.for_each_mut(|_, cell| {
      if let ObjectKind::Array(items) = &mut cell.kind {
        items.iter_mut().for_each(&mut f);
      }
    });
  }

  pub fn stats(&self) -> HeapStats {
    HeapStats {
      objects: self.objects.stats(),
      properties: self.properties.stats(),
      ffi_sigs: self.sigs.stats(),
      string_bytes: self.strings.len(),
      string_capacity: self.strings.size(),
      // The registry lives on the VM, which fills this in.
      callbacks: 0,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn heap() -> Heap {
    Heap::new(&VmOptions::default())
  }

  #[test]
  fn properties_keep_insertion_order_and_overwrite_in_place() {
    let mut heap = heap();
    let obj = prop_holder(heap.new_object()).unwrap();
    let a = heap.alloc_string(b"alpha_key").unwrap();
    let b = heap.alloc_string(b"b").unwrap();
    heap.set(obj, a, Value::number(1.0)).unwrap();
    heap.set(obj, b, Value::number(2.0)).unwrap();
    heap.set(obj, a, Value::number(3.0)).unwrap();
    assert_eq!(heap.keys(obj).unwrap(), vec![a, b]);
    assert_eq!(heap.get_own(obj, a).unwrap(), Some(Value::number(3.0)));
    assert!(heap.del(obj, a).unwrap());
    assert!(!heap.del(obj, a).unwrap());
    assert_eq!(heap.keys(obj).unwrap(), vec![b]);
    assert_eq!(heap.nth_key(obj, 1).unwrap(), None);
  }

  #[test]
  fn delegation_chain_stops_at_cycles() {
    let mut heap = heap();
    let base = heap.new_object();
    let derived = heap.new_object();
    let proto = heap.alloc_string(PROTO_KEY).unwrap();
    let key = heap.alloc_string(b"x").unwrap();
    let (b, d) = (prop_holder(base).unwrap(), prop_holder(derived).unwrap());
    heap.set(b, key, Value::TRUE).unwrap();
    heap.set(d, proto, base).unwrap();
    heap.set(b, proto, derived).unwrap();
    assert_eq!(heap.get(d, b"x").unwrap(), Some(Value::TRUE));
    assert_eq!(heap.get(d, b"y").unwrap(), None);
  }
}
