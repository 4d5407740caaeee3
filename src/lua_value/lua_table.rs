//! The hybrid array+hash table (spec §3 "Table", §4.2, §9 "Hybrid table
//! growth"). Implemented from scratch — not a wrapper over a generic
//! hash-map crate — because the array/hash split, tombstones, and the
//! "migrate consecutive integer keys out of the hash part when the array
//! grows" policy are the testable, load-bearing semantics spec.md singles
//! out as the one subtle correctness point (property 4).

use crate::limits::TABLE_INITIAL_HASH_CAPACITY;
use crate::lua_value::Value;

/// One hash-part slot. Empty = `key == Nil, value == Nil`. Tombstone =
/// `key == Nil, value != Nil` (must be skipped, not treated as empty, by
/// linear probing — spec glossary "Tombstone").
#[derive(Clone, Copy)]
struct Entry {
    key: Value,
    value: Value,
}

impl Entry {
    fn empty() -> Self {
        Entry { key: Value::Nil, value: Value::Nil }
    }

    fn is_empty(&self) -> bool {
        matches!(self.key, Value::Nil) && matches!(self.value, Value::Nil)
    }

    fn is_tombstone(&self) -> bool {
        matches!(self.key, Value::Nil) && !matches!(self.value, Value::Nil)
    }
}

pub struct LuaTable {
    array: Vec<Value>,
    entries: Vec<Entry>,
    /// Number of live (non-empty, non-tombstone) hash entries.
    hash_count: usize,
}

impl LuaTable {
    pub fn new() -> Self {
        Self {
            array: Vec::new(),
            entries: vec![Entry::empty(); TABLE_INITIAL_HASH_CAPACITY],
            hash_count: 0,
        }
    }

    fn hash_cap(&self) -> usize {
        self.entries.len()
    }

    fn main_index(&self, key: &Value) -> usize {
        (key.table_hash() as usize) & (self.hash_cap() - 1)
    }

    /// `get(t,k)`: array first for integer keys in range, else hash part.
    pub fn get(&self, key: &Value) -> Value {
        if let Some(i) = key.as_array_index() {
            if (i as usize) <= self.array.len() {
                return self.array[(i - 1) as usize];
            }
        }
        if matches!(key, Value::Nil) {
            return Value::Nil;
        }
        self.hash_get(key)
    }

    fn hash_get(&self, key: &Value) -> Value {
        if self.hash_cap() == 0 {
            return Value::Nil;
        }
        let start = self.main_index(key);
        let cap = self.hash_cap();
        for step in 0..cap {
            let idx = (start + step) % cap;
            let entry = &self.entries[idx];
            if entry.is_empty() {
                return Value::Nil;
            }
            if entry.is_tombstone() {
                continue;
            }
            if entry.key.raw_eq(key) {
                return entry.value;
            }
        }
        Value::Nil
    }

    /// `set(t,k,v)`. Rejects `Nil`/NaN keys. Integer keys that fit the
    /// array, or that can be made to fit by growing it (migrating
    /// consecutive integer keys out of the hash part), land in the array;
    /// otherwise the hash part is used, growing it first if over 3/4 load.
    pub fn set(&mut self, key: Value, value: Value) -> Result<(), &'static str> {
        if !key.is_valid_key() {
            return Err("table index is nil or NaN");
        }

        if let Some(i) = key.as_array_index() {
            let idx = i as usize;
            if idx <= self.array.len() {
                self.array[idx - 1] = value;
                self.shrink_border();
                return Ok(());
            }
            if idx == self.array.len() + 1 && !matches!(value, Value::Nil) {
                self.array.push(value);
                self.absorb_hash_tail();
                return Ok(());
            }
            // Key unreachable by a simple append: try growing the array to
            // the next power-of-two size that would make it contiguous,
            // migrating any consecutive integer keys already in the hash
            // part (spec §9 "Hybrid table growth").
            if !matches!(value, Value::Nil) && self.try_grow_array_for(idx) {
                self.array[idx - 1] = value;
                self.absorb_hash_tail();
                return Ok(());
            }
        }

        self.hash_set(key, value);
        Ok(())
    }

    /// After an array write lands a `Nil`, the array's logical length may
    /// shrink; nothing to physically move (absent entries are simply
    /// `Nil`), so this is a no-op placeholder for symmetry with growth.
    fn shrink_border(&mut self) {}

    /// After the array grows by one (`set` at `len+1`), pull any
    /// consecutive integer keys starting at `len+1` out of the hash part.
    fn absorb_hash_tail(&mut self) {
        loop {
            let next = self.array.len() as i64 + 1;
            let probe = Value::Number(next as f64);
            let v = self.hash_get(&probe);
            if matches!(v, Value::Nil) {
                break;
            }
            self.hash_remove(&probe);
            self.array.push(v);
        }
    }

    /// Try to grow the array to the next power-of-two capacity ≥ `idx`,
    /// counting (and then migrating) consecutive integer keys already
    /// present in the hash part so the array stays dense where it can.
    fn try_grow_array_for(&mut self, idx: usize) -> bool {
        let mut new_len = (self.array.len()).max(1);
        while new_len < idx {
            new_len *= 2;
        }
        // Only worthwhile if over half the new slots would end up filled
        // (array entries plus migratable hash entries), matching the
        // original's `computesizes` heuristic referenced in SPEC_FULL.md.
        let mut filled = self.array.len();
        for i in (self.array.len() + 1)..=new_len {
            if !matches!(self.hash_get(&Value::Number(i as f64)), Value::Nil) {
                filled += 1;
            }
        }
        if filled * 2 < new_len {
            return false;
        }
        let old_len = self.array.len();
        self.array.resize(new_len, Value::Nil);
        for i in (old_len + 1)..=new_len {
            let key = Value::Number(i as f64);
            let v = self.hash_get(&key);
            if !matches!(v, Value::Nil) {
                self.hash_remove(&key);
                self.array[i - 1] = v;
            }
        }
        true
    }

    fn hash_set(&mut self, key: Value, value: Value) {
        if matches!(value, Value::Nil) {
            self.hash_remove(&key);
            return;
        }
        if self.hash_count * 4 > self.hash_cap() * 3 {
            self.hash_grow();
        }
        let cap = self.hash_cap();
        let start = self.main_index(&key);
        let mut first_tombstone: Option<usize> = None;
        for step in 0..cap {
            let idx = (start + step) % cap;
            let entry = self.entries[idx];
            if entry.is_empty() {
                let target = first_tombstone.unwrap_or(idx);
                self.entries[target] = Entry { key, value };
                self.hash_count += 1;
                return;
            }
            if entry.is_tombstone() {
                if first_tombstone.is_none() {
                    first_tombstone = Some(idx);
                }
                continue;
            }
            if entry.key.raw_eq(&key) {
                self.entries[idx].value = value;
                return;
            }
        }
        // Unreachable in practice: hash_grow keeps load ≤ 3/4.
    }

    /// `unset(t,k)`: place a tombstone; `count` is left unchanged per spec.
    fn hash_remove(&mut self, key: &Value) {
        if self.hash_cap() == 0 {
            return;
        }
        let cap = self.hash_cap();
        let start = self.main_index(key);
        for step in 0..cap {
            let idx = (start + step) % cap;
            let entry = self.entries[idx];
            if entry.is_empty() {
                return;
            }
            if entry.is_tombstone() {
                continue;
            }
            if entry.key.raw_eq(key) {
                // Tombstone: key Nil, value non-Nil sentinel.
                self.entries[idx] = Entry { key: Value::Nil, value: Value::Boolean(true) };
                return;
            }
        }
    }

    /// `unset` as exposed to callers: integer keys in the array just get
    /// `Nil` written in place; everything else goes through the hash path.
    pub fn unset(&mut self, key: &Value) {
        if let Some(i) = key.as_array_index() {
            if (i as usize) <= self.array.len() {
                self.array[(i - 1) as usize] = Value::Nil;
                return;
            }
        }
        self.hash_remove(key);
    }

    fn hash_grow(&mut self) {
        let new_cap = (self.hash_cap().max(1)) * 2;
        let old = std::mem::replace(&mut self.entries, vec![Entry::empty(); new_cap]);
        self.hash_count = 0;
        for entry in old {
            if entry.is_empty() || entry.is_tombstone() {
                continue;
            }
            self.hash_set(entry.key, entry.value);
        }
    }

    /// `#t`: the largest `i` such that `array[i] != Nil` and either
    /// `i == len(array)` or `array[i+1] == Nil` — a border.
    pub fn len(&self) -> i64 {
        if self.array.is_empty() || !matches!(self.array[self.array.len() - 1], Value::Nil) {
            // Whole array is a border candidate; if the hash part also
            // holds `len+1`, that isn't our concern here since spec.md's
            // border only promises *a* border, and the array's own tail is
            // always a valid one when non-Nil.
            return self.array.len() as i64;
        }
        // Binary search for a border inside the array: array[len-1] is Nil.
        let (mut lo, mut hi) = (0usize, self.array.len());
        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            if matches!(self.array[mid - 1], Value::Nil) {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        lo as i64
    }

    /// `next(t, prev_key)`: iteration order is array slots first (in
    /// index order), then hash-part physical slot order, starting right
    /// after `prev_key`.
    pub fn next(&self, prev_key: &Value) -> Result<Option<(Value, Value)>, &'static str> {
        let array_start = match prev_key {
            Value::Nil => 0usize,
            _ => {
                if let Some(i) = prev_key.as_array_index() {
                    if (i as usize) <= self.array.len() {
                        i as usize
                    } else {
                        return self.next_in_hash(prev_key);
                    }
                } else {
                    return self.next_in_hash(prev_key);
                }
            }
        };
        for idx in array_start..self.array.len() {
            if !matches!(self.array[idx], Value::Nil) {
                return Ok(Some((Value::Number((idx + 1) as f64), self.array[idx])));
            }
        }
        self.first_hash_entry(0)
    }

    fn next_in_hash(&self, prev_key: &Value) -> Result<Option<(Value, Value)>, &'static str> {
        let cap = self.hash_cap();
        for idx in 0..cap {
            let entry = self.entries[idx];
            if !entry.is_empty() && !entry.is_tombstone() && entry.key.raw_eq(prev_key) {
                return self.first_hash_entry(idx + 1);
            }
        }
        Err("invalid key to 'next'")
    }

    fn first_hash_entry(&self, from: usize) -> Result<Option<(Value, Value)>, &'static str> {
        for idx in from..self.hash_cap() {
            let entry = self.entries[idx];
            if !entry.is_empty() && !entry.is_tombstone() {
                return Ok(Some((entry.key, entry.value)));
            }
        }
        Ok(None)
    }

    /// Current length of the array part (used by table-constructor codegen
    /// to size the initial array and by debugging/tests).
    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    /// Whether any *live* key remains in the hash part (tombstones from
    /// keys that migrated into the array, or were deleted, don't count).
    pub fn hash_is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.is_empty() || e.is_tombstone())
    }
}

impl Default for LuaTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let mut t = LuaTable::new();
        t.set(Value::Number(1.0), Value::Boolean(true)).unwrap();
        assert!(t.get(&Value::Number(1.0)).is_truthy());
    }

    #[test]
    fn unset_then_get_is_nil() {
        let mut t = LuaTable::new();
        t.set(Value::Number(5.0), Value::Boolean(true)).unwrap();
        t.unset(&Value::Number(5.0));
        assert!(t.get(&Value::Number(5.0)).is_nil());
    }

    #[test]
    fn rejects_nil_and_nan_keys() {
        let mut t = LuaTable::new();
        assert!(t.set(Value::Nil, Value::Boolean(true)).is_err());
        assert!(t.set(Value::Number(f64::NAN), Value::Boolean(true)).is_err());
    }

    #[test]
    fn reverse_insertion_promotes_to_array() {
        // t[2] = "b"; t[1] = "a"  =>  #t == 2, hash part empty.
        let mut t = LuaTable::new();
        t.set(Value::Number(2.0), Value::Number(20.0)).unwrap();
        t.set(Value::Number(1.0), Value::Number(10.0)).unwrap();
        assert_eq!(t.len(), 2);
        assert!(t.hash_is_empty());
    }

    #[test]
    fn border_length_with_internal_hole_in_hash_part() {
        let mut t = LuaTable::new();
        t.set(Value::Number(1.0), Value::Number(1.0)).unwrap();
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn next_visits_every_live_entry_exactly_once() {
        let mut t = LuaTable::new();
        t.set(Value::Number(1.0), Value::Number(1.0)).unwrap();
        t.set(Value::Number(2.0), Value::Number(2.0)).unwrap();
        t.set(Value::Boolean(true), Value::Number(3.0)).unwrap();

        let mut seen = Vec::new();
        let mut key = Value::Nil;
        loop {
            match t.next(&key).unwrap() {
                Some((k, v)) => {
                    seen.push(v.as_number());
                    key = k;
                }
                None => break,
            }
        }
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(seen, vec![Some(1.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn next_on_missing_key_is_error() {
        let t = LuaTable::new();
        assert!(t.next(&Value::Number(99.0)).is_err());
    }
}
