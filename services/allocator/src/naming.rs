//! Worker-instance naming.
//!
//! Every granted container is bound to an instance name that the worker
//! registers under. Names freed by released or failed containers are handed
//! out again, lowest sequence first, so a replacement takes over the identity
//! of the container it replaces.

use std::collections::{BTreeSet, HashMap};

use yarnscale_id::{IdError, InstanceName};

/// Supplies instance names for newly granted containers.
pub trait InstanceNamer: Send {
    /// Name for a newly granted container.
    fn acquire(&mut self) -> Result<InstanceName, IdError>;

    /// Return a name whose container is gone; it may be handed out again.
    fn release(&mut self, name: &InstanceName);

    /// Return a name that must never be handed out again.
    fn retire(&mut self, name: &InstanceName);
}

/// `{prefix}_{n}` names starting at 1.
#[derive(Debug)]
pub struct SequentialNamer {
    prefix: String,
    next: u64,
    issued: HashMap<InstanceName, u64>,
    unused: BTreeSet<u64>,
}

impl SequentialNamer {
    /// Create a namer producing `{prefix}_1`, `{prefix}_2`, ...
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
            issued: HashMap::new(),
            unused: BTreeSet::new(),
        }
    }
}

impl InstanceNamer for SequentialNamer {
    fn acquire(&mut self) -> Result<InstanceName, IdError> {
        if let Some(seq) = self.unused.pop_first() {
            return InstanceName::sequential(&self.prefix, seq);
        }

        let seq = self.next;
        let name = InstanceName::sequential(&self.prefix, seq)?;
        self.next += 1;
        self.issued.insert(name.clone(), seq);
        Ok(name)
    }

    fn release(&mut self, name: &InstanceName) {
        if let Some(seq) = self.issued.get(name) {
            self.unused.insert(*seq);
        }
    }

    fn retire(&mut self, name: &InstanceName) {
        if let Some(seq) = self.issued.remove(name) {
            self.unused.remove(&seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_from_one() {
        let mut namer = SequentialNamer::new("YarnTaskRunner");
        assert_eq!(namer.acquire().unwrap().as_str(), "YarnTaskRunner_1");
        assert_eq!(namer.acquire().unwrap().as_str(), "YarnTaskRunner_2");
    }

    #[test]
    fn test_released_names_reused_lowest_first() {
        let mut namer = SequentialNamer::new("w");
        let names: Vec<_> = (0..12).map(|_| namer.acquire().unwrap()).collect();

        namer.release(&names[10]); // w_11
        namer.release(&names[1]); // w_2

        assert_eq!(namer.acquire().unwrap().as_str(), "w_2");
        assert_eq!(namer.acquire().unwrap().as_str(), "w_11");
        assert_eq!(namer.acquire().unwrap().as_str(), "w_13");
    }

    #[test]
    fn test_retired_names_not_reused() {
        let mut namer = SequentialNamer::new("w");
        let first = namer.acquire().unwrap();
        namer.release(&first);
        namer.retire(&first);

        assert_eq!(namer.acquire().unwrap().as_str(), "w_2");
    }

    #[test]
    fn test_foreign_names_ignored() {
        let mut namer = SequentialNamer::new("w");
        namer.release(&InstanceName::parse("other_1").unwrap());
        assert_eq!(namer.acquire().unwrap().as_str(), "w_1");
    }

    #[test]
    fn test_invalid_prefix_surfaces_error() {
        let mut namer = SequentialNamer::new("bad prefix");
        assert!(namer.acquire().is_err());
    }
}
