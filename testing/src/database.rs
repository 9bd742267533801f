use async_trait::async_trait;
use std::sync::Mutex;

use log_api::database::{DatabaseError, TreeHeadDatabase};
use log_api::SignedTreeHead;

/// An in-memory [`TreeHeadDatabase`] with injectable lookup failures.
#[derive(Debug, Default)]
pub struct FakeDatabase {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    latest: Option<SignedTreeHead>,
    writes: Vec<SignedTreeHead>,
    fail_lookups: bool,
}

impl FakeDatabase {
    pub fn new() -> Self {
        FakeDatabase::default()
    }

    /// Seed the stored tree head without recording a write.
    pub fn set_latest(&self, sth: Option<SignedTreeHead>) {
        self.inner.lock().unwrap().latest = sth;
    }

    /// Make subsequent lookups fail with [`DatabaseError::Io`].
    pub fn set_fail_lookups(&self, fail: bool) {
        self.inner.lock().unwrap().fail_lookups = fail;
    }

    /// Every tree head written, oldest first.
    pub fn writes(&self) -> Vec<SignedTreeHead> {
        self.inner.lock().unwrap().writes.clone()
    }
}

#[async_trait]
impl TreeHeadDatabase for FakeDatabase {
    async fn latest_tree_head(&self) -> Result<Option<SignedTreeHead>, DatabaseError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_lookups {
            return Err(DatabaseError::Io(String::from("fake database is down")));
        }
        Ok(inner.latest.clone())
    }

    async fn write_tree_head(&self, sth: &SignedTreeHead) -> Result<(), DatabaseError> {
        let mut inner = self.inner.lock().unwrap();
        inner.latest = Some(sth.clone());
        inner.writes.push(sth.clone());
        Ok(())
    }
}
