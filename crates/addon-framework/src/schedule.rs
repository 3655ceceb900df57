//! Callback name → [`Scheduler`] association driven by the main loop.

use crate::scheduler::Scheduler;

#[derive(Default)]
pub struct ScheduleTable {
    entries: Vec<(String, Box<dyn Scheduler>)>,
}

impl ScheduleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `scheduler` to `callback`, replacing any previous scheduler of that callback.
    pub fn insert(&mut self, callback: String, scheduler: Box<dyn Scheduler>) {
        match self.entries.iter_mut().find(|(name, _)| *name == callback) {
            Some(entry) => entry.1 = scheduler,
            None => self.entries.push((callback, scheduler)),
        }
    }

    /// Asks every scheduler once and returns the callbacks that should fire this tick.
    pub fn due(&mut self) -> Vec<String> {
        self.entries
            .iter_mut()
            .filter_map(|(name, scheduler)| scheduler.should_fire_now().then(|| name.clone()))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ScheduleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleTable")
            .field("callbacks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_collects_every_yes() {
        let mut table = ScheduleTable::new();
        table.insert("always".into(), Box::new(|| true));
        table.insert("never".into(), Box::new(|| false));
        table.insert("again".into(), Box::new(|| true));
        assert_eq!(table.due(), vec!["always".to_string(), "again".to_string()]);
    }

    #[test]
    fn test_insert_replaces_scheduler() {
        let mut table = ScheduleTable::new();
        table.insert("cb".into(), Box::new(|| false));
        table.insert("cb".into(), Box::new(|| true));
        assert_eq!(table.len(), 1);
        assert_eq!(table.due(), vec!["cb".to_string()]);
    }
}
