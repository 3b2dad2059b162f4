//! In-memory backend
//!
//! Mirrors the Redis semantics the typed store relies on (wrong-type
//! errors, negative list indices, glob key patterns, lazy expiry) and adds
//! hooks for tests: a call log, scripted failures and injected watch
//! conflicts.

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{Backend, Transaction, TxBuilder, TxCommand, TxOutcome};
use crate::error::{Result, StoreError};

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum Slot {
    Str(String),
    Hash(HashMap<String, String>),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(slot: Slot) -> Self {
        Self {
            slot,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// Expiry instant for `ttl` from now; `None` when it lies past what
/// `Instant` can represent, which leaves the key persistent
fn deadline(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Open watches by id: the watched key and whether it was written since
    watches: HashMap<u64, (String, bool)>,
    next_watch: u64,
    calls: Vec<String>,
    failures: VecDeque<(String, StoreError)>,
    pending_conflicts: usize,
}

impl Inner {
    fn record(&mut self, op: &str) -> Result<()> {
        self.calls.push(op.to_string());
        let scripted = self
            .failures
            .iter()
            .position(|(name, _)| name == op)
            .and_then(|idx| self.failures.remove(idx));
        match scripted {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    }

    /// Mark every open watch on `key` as dirty
    fn touch(&mut self, key: &str) {
        for (watched, dirty) in self.watches.values_mut() {
            if watched == key {
                *dirty = true;
            }
        }
    }

    fn begin_watch(&mut self, key: &str) -> u64 {
        self.next_watch += 1;
        self.watches.insert(self.next_watch, (key.to_string(), false));
        self.next_watch
    }

    /// Close a watch; true if its key was written while it was open
    fn end_watch(&mut self, id: u64) -> bool {
        self.watches.remove(&id).map(|(_, dirty)| dirty).unwrap_or(true)
    }

    /// Live entry for `key`, dropping it first if it has expired
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            self.entries.remove(key);
            self.touch(key);
        }
        self.entries.get_mut(key)
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut HashMap<String, String>> {
        if self.live(key).is_none() {
            self.entries
                .insert(key.to_string(), Entry::new(Slot::Hash(HashMap::new())));
        }
        match self.entries.get_mut(key).map(|e| &mut e.slot) {
            Some(Slot::Hash(map)) => Ok(map),
            _ => Err(StoreError::Backend(WRONG_TYPE.to_string())),
        }
    }

    fn list_mut(&mut self, key: &str) -> Result<&mut Vec<String>> {
        if self.live(key).is_none() {
            self.entries
                .insert(key.to_string(), Entry::new(Slot::List(Vec::new())));
        }
        match self.entries.get_mut(key).map(|e| &mut e.slot) {
            Some(Slot::List(items)) => Ok(items),
            _ => Err(StoreError::Backend(WRONG_TYPE.to_string())),
        }
    }

    fn hset_fields(&mut self, key: &str, fields: &[(String, String)]) -> Result<i64> {
        let map = self.hash_mut(key)?;
        let mut created = 0;
        for (field, value) in fields {
            if map.insert(field.clone(), value.clone()).is_none() {
                created += 1;
            }
        }
        self.touch(key);
        Ok(created)
    }

    fn rpush_elements(&mut self, key: &str, elements: &[String]) -> Result<i64> {
        let list = self.list_mut(key)?;
        list.extend(elements.iter().cloned());
        let len = list.len() as i64;
        self.touch(key);
        Ok(len)
    }

    fn expire_key(&mut self, key: &str, ttl: Duration) -> bool {
        match self.live(key) {
            Some(entry) => {
                entry.expires_at = deadline(ttl);
                self.touch(key);
                true
            }
            None => false,
        }
    }

    fn exec(&mut self, key: &str, command: &TxCommand) -> Result<()> {
        self.record(command.name())?;
        match command {
            TxCommand::HMSet(fields) => self.hset_fields(key, fields).map(|_| ()),
            TxCommand::RPush(elements) => self.rpush_elements(key, elements).map(|_| ()),
        }
    }
}

/// Thread-safe in-memory backend, cloneable as a shared handle
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
    max_watch_retries: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            max_watch_retries: 3,
        }
    }

    pub fn with_max_watch_retries(mut self, retries: usize) -> Self {
        self.max_watch_retries = retries;
        self
    }

    /// Commands received so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.inner.lock().calls.len()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Make the next `op` command (e.g. `"EXPIRE"`) fail with `err`
    pub fn fail_next(&self, op: &str, err: StoreError) {
        self.inner.lock().failures.push_back((op.to_string(), err));
    }

    /// Simulate `n` concurrent writers touching the watched key between a
    /// transaction's build and its execution
    pub fn inject_conflicts(&self, n: usize) {
        self.inner.lock().pending_conflicts += n;
    }

    /// Remaining time to live of `key`, `None` if missing or persistent
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut inner = self.inner.lock();
        let expires_at = inner.live(key)?.expires_at?;
        Some(expires_at.saturating_duration_since(Instant::now()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().live(key).is_some()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a raw list element, bypassing the codec
    pub fn push_raw(&self, key: &str, raw: &str) {
        let mut inner = self.inner.lock();
        if let Ok(list) = inner.list_mut(key) {
            list.push(raw.to_string());
        }
        inner.touch(key);
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<String> {
        let mut inner = self.inner.lock();
        inner.record("GET")?;
        match inner.live(key).map(|e| &e.slot) {
            Some(Slot::Str(s)) => Ok(s.clone()),
            Some(_) => Err(StoreError::Backend(WRONG_TYPE.to_string())),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<String> {
        let mut inner = self.inner.lock();
        inner.record("SET")?;
        let mut entry = Entry::new(Slot::Str(value.to_string()));
        entry.expires_at = ttl.and_then(deadline);
        inner.entries.insert(key.to_string(), entry);
        inner.touch(key);
        Ok("OK".to_string())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut inner = self.inner.lock();
        inner.record("HGETALL")?;
        match inner.live(key).map(|e| &e.slot) {
            Some(Slot::Hash(map)) => Ok(map.clone()),
            Some(_) => Err(StoreError::Backend(WRONG_TYPE.to_string())),
            None => Ok(HashMap::new()),
        }
    }

    async fn hmset(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.record("HMSET")?;
        inner.hset_fields(key, fields).map(|_| ())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<String> {
        let mut inner = self.inner.lock();
        inner.record("HGET")?;
        match inner.live(key).map(|e| &e.slot) {
            Some(Slot::Hash(map)) => map
                .get(field)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("{}.{}", key, field))),
            Some(_) => Err(StoreError::Backend(WRONG_TYPE.to_string())),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<i64> {
        let mut inner = self.inner.lock();
        inner.record("HSET")?;
        inner.hset_fields(key, fields)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut inner = self.inner.lock();
        inner.record("LRANGE")?;
        let items = match inner.live(key).map(|e| &e.slot) {
            Some(Slot::List(items)) => items,
            Some(_) => return Err(StoreError::Backend(WRONG_TYPE.to_string())),
            None => return Ok(Vec::new()),
        };

        let len = items.len() as i64;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Ok(Vec::new());
        }
        Ok(items[start as usize..=stop as usize].to_vec())
    }

    async fn rpush(&self, key: &str, elements: &[String]) -> Result<i64> {
        let mut inner = self.inner.lock();
        inner.record("RPUSH")?;
        inner.rpush_elements(key, elements)
    }

    async fn lset(&self, key: &str, index: i64, value: &str) -> Result<String> {
        let mut inner = self.inner.lock();
        inner.record("LSET")?;
        let items = match inner.live(key).map(|e| &mut e.slot) {
            Some(Slot::List(items)) => items,
            Some(_) => return Err(StoreError::Backend(WRONG_TYPE.to_string())),
            None => return Err(StoreError::Backend("ERR no such key".to_string())),
        };

        let len = items.len() as i64;
        let idx = if index < 0 { len + index } else { index };
        if idx < 0 || idx >= len {
            return Err(StoreError::Backend("ERR index out of range".to_string()));
        }
        items[idx as usize] = value.to_string();
        inner.touch(key);
        Ok("OK".to_string())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut inner = self.inner.lock();
        inner.record("KEYS")?;
        let re = glob_to_regex(pattern)?;
        let now = Instant::now();
        let mut keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(k, e)| !e.is_expired(now) && re.is_match(k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn del(&self, key: &str) -> Result<i64> {
        let mut inner = self.inner.lock();
        inner.record("DEL")?;
        let existed = inner.live(key).is_some();
        inner.entries.remove(key);
        if existed {
            inner.touch(key);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.lock();
        inner.record("EXPIRE")?;
        Ok(inner.expire_key(key, ttl))
    }

    async fn save(&self) -> Result<()> {
        self.inner.lock().record("SAVE")
    }

    async fn ping(&self) -> Result<()> {
        self.inner.lock().record("PING")
    }

    async fn watch(&self, key: &str, build: &TxBuilder<'_>) -> Result<TxOutcome> {
        for attempt in 0..=self.max_watch_retries {
            let id = {
                let mut inner = self.inner.lock();
                inner.record("WATCH")?;
                inner.begin_watch(key)
            };

            let mut tx = Transaction::new();
            if let Err(err) = build(&mut tx) {
                self.inner.lock().end_watch(id);
                return Err(err);
            }

            let mut inner = self.inner.lock();
            if inner.pending_conflicts > 0 {
                inner.pending_conflicts -= 1;
                inner.touch(key);
            }

            if inner.end_watch(id) {
                warn!(key = %key, attempt = attempt, "Watched key changed, retrying transaction");
                continue;
            }

            debug!(key = %key, commands = tx.len(), "Executing watched transaction");
            let outcome: TxOutcome = tx
                .commands()
                .iter()
                .map(|command| inner.exec(key, command))
                .collect();
            return Ok(outcome);
        }

        Err(StoreError::Conflict(format!(
            "{} changed during {} attempts",
            key,
            self.max_watch_retries + 1
        )))
    }
}

/// Translate a Redis glob pattern into an anchored regex
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(&next.to_string()));
                }
            }
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('^');
                }
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    if inner == '\\' || inner == '[' {
                        out.push('\\');
                    }
                    out.push(inner);
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| StoreError::Backend(format!("ERR invalid pattern: {}", e)))
}
