//! Session-scoped persistence for breakpoints and the stop flag.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::breakpoints::BreakpointMap;
use crate::error::Result;

pub trait SessionStore {
    fn load_breakpoints(&self) -> Result<Option<BreakpointMap>>;
    fn save_breakpoints(&mut self, breakpoints: &BreakpointMap) -> Result<()>;
    fn load_stop_at_breakpoints(&self) -> Result<Option<bool>>;
    fn save_stop_at_breakpoints(&mut self, stop: bool) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoints: Option<BreakpointMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_at_breakpoints: Option<bool>,
}

/// In-memory store. Clones share contents, so a caller can keep a handle
/// and inspect what the engine wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore(Rc<RefCell<StoredSession>>);

impl MemoryStore {
    pub fn new(session: StoredSession) -> Self {
        Self(Rc::new(RefCell::new(session)))
    }

    pub fn contents(&self) -> StoredSession {
        self.0.borrow().clone()
    }
}

impl SessionStore for MemoryStore {
    fn load_breakpoints(&self) -> Result<Option<BreakpointMap>> {
        Ok(self.0.borrow().breakpoints.clone())
    }

    fn save_breakpoints(&mut self, breakpoints: &BreakpointMap) -> Result<()> {
        self.0.borrow_mut().breakpoints = Some(breakpoints.clone());
        Ok(())
    }

    fn load_stop_at_breakpoints(&self) -> Result<Option<bool>> {
        Ok(self.0.borrow().stop_at_breakpoints)
    }

    fn save_stop_at_breakpoints(&mut self, stop: bool) -> Result<()> {
        self.0.borrow_mut().stop_at_breakpoints = Some(stop);
        Ok(())
    }
}

/// JSON file holding a [`StoredSession`]. A missing file reads as empty.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Result<StoredSession> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredSession::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn update(&mut self, apply: impl FnOnce(&mut StoredSession)) -> Result<()> {
        let mut session = self.read()?;
        apply(&mut session);
        std::fs::write(&self.path, serde_json::to_string_pretty(&session)?)?;
        Ok(())
    }
}

impl SessionStore for FileStore {
    fn load_breakpoints(&self) -> Result<Option<BreakpointMap>> {
        Ok(self.read()?.breakpoints)
    }

    fn save_breakpoints(&mut self, breakpoints: &BreakpointMap) -> Result<()> {
        self.update(|s| s.breakpoints = Some(breakpoints.clone()))
    }

    fn load_stop_at_breakpoints(&self) -> Result<Option<bool>> {
        Ok(self.read()?.stop_at_breakpoints)
    }

    fn save_stop_at_breakpoints(&mut self, stop: bool) -> Result<()> {
        self.update(|s| s.stop_at_breakpoints = Some(stop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips_and_tolerates_missing_file() {
        let path = std::env::temp_dir().join(format!(
            "lua-debugger-store-{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let mut store = FileStore::new(&path);
        assert_eq!(store.load_breakpoints().unwrap(), None);
        assert_eq!(store.load_stop_at_breakpoints().unwrap(), None);

        let mut map = BreakpointMap::new();
        map.insert("a.lua.json".into(), vec![false, true]);
        store.save_breakpoints(&map).unwrap();
        store.save_stop_at_breakpoints(false).unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.load_breakpoints().unwrap(), Some(map));
        assert_eq!(reopened.load_stop_at_breakpoints().unwrap(), Some(false));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn memory_store_clones_share_state() {
        let store = MemoryStore::default();
        let mut writer = store.clone();
        writer.save_stop_at_breakpoints(true).unwrap();
        assert_eq!(store.contents().stop_at_breakpoints, Some(true));
    }
}
