//! Windowed free-id allocator
//!
//! Finds the lowest unused integer value of a resource property within a
//! configured range. The range is scanned window by window: a window whose
//! every id is taken is skipped without listing its gaps, the first window with
//! room yields its free ids, which are cached for a short time so consecutive
//! calls do not rescan the graph.
//!
//! An id handed out stays reserved for the cache lifetime even if it never
//! reaches the graph, so a rescan within that time skips it.

use crate::error::{Error, Result};
use crate::reader::GraphReader;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// What to allocate and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdAllocatorConfig {
    pub resource_type: String,
    /// Integer property acting as the id
    pub property: String,
    /// First id of the range, inclusive
    pub range_start: i64,
    /// Last id of the range, inclusive
    pub range_end: i64,
    /// Ids examined per query
    pub window_size: i64,
    /// How long computed free ids stay valid
    pub ttl: Duration,
}

impl IdAllocatorConfig {
    pub fn new(resource_type: impl Into<String>, property: impl Into<String>, range_start: i64, range_end: i64) -> Self {
        Self {
            resource_type: resource_type.into(),
            property: property.into(),
            range_start,
            range_end,
            window_size: 100,
            ttl: Duration::from_secs(30),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.range_start > self.range_end {
            return Err(Error::validation(format!(
                "empty id range [{}, {}]",
                self.range_start, self.range_end
            )));
        }
        if self.window_size <= 0 {
            return Err(Error::validation("window size must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct FreeWindow {
    free: VecDeque<i64>,
    computed_at: Instant,
}

#[derive(Debug, Default)]
struct AllocatorState {
    config: Option<IdAllocatorConfig>,
    cache: Option<FreeWindow>,
    /// Ids handed out, with when
    reserved: BTreeMap<i64, Instant>,
}

/// Hands out unused ids for one resource property.
#[derive(Debug)]
pub struct IdAllocator {
    reader: GraphReader,
    state: Mutex<AllocatorState>,
}

impl IdAllocator {
    /// Create an allocator. It must be configured before use.
    pub fn new(reader: GraphReader) -> Self {
        Self {
            reader,
            state: Mutex::new(AllocatorState::default()),
        }
    }

    /// Set or replace the configuration; drops any cached window.
    pub fn configure(&self, config: IdAllocatorConfig) -> Result<()> {
        config.validate()?;
        let mut state = self.lock()?;
        log::debug!(
            "Id allocator for {}.{} covers [{}, {}]",
            config.resource_type,
            config.property,
            config.range_start,
            config.range_end
        );
        state.config = Some(config);
        state.cache = None;
        state.reserved.clear();
        Ok(())
    }

    /// Forget the cached free ids and the reservations.
    pub fn invalidate(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.cache = None;
        state.reserved.clear();
        Ok(())
    }

    /// Lowest id believed free. The id is reserved: later calls do not return
    /// it again while the reservation is alive.
    pub fn get_next_available_id(&self) -> Result<i64> {
        let mut state = self.lock()?;
        let config = state.config.clone().ok_or(Error::NotInitialized)?;
        state
            .reserved
            .retain(|_, handed_out| handed_out.elapsed() < config.ttl);

        let cached = match &mut state.cache {
            Some(window) if window.computed_at.elapsed() < config.ttl => window.free.pop_front(),
            _ => None,
        };
        if let Some(id) = cached {
            state.reserved.insert(id, Instant::now());
            return Ok(id);
        }

        let mut free = self.scan(&config, &state.reserved)?;
        let id = free.pop_front().ok_or_else(|| Error::Exhausted {
            resource_type: config.resource_type.clone(),
            property: config.property.clone(),
            range_start: config.range_start,
            range_end: config.range_end,
        })?;
        let now = Instant::now();
        state.reserved.insert(id, now);
        state.cache = Some(FreeWindow {
            free,
            computed_at: now,
        });
        Ok(id)
    }

    /// Free ids of the first window that has any, or none when the range is
    /// full. Reserved ids count as taken.
    fn scan(&self, config: &IdAllocatorConfig, reserved: &BTreeMap<i64, Instant>) -> Result<VecDeque<i64>> {
        let mut from = config.range_start;
        while from <= config.range_end {
            let to = from
                .saturating_add(config.window_size - 1)
                .min(config.range_end);
            let taken = self.reader.integer_values_between(
                &config.resource_type,
                &config.property,
                from,
                to,
            )?;

            // `taken` is sorted, walk both sequences together
            let mut taken = taken.into_iter().peekable();
            let mut free = VecDeque::new();
            for candidate in from..=to {
                if taken.peek() == Some(&candidate) {
                    taken.next();
                } else if !reserved.contains_key(&candidate) {
                    free.push_back(candidate);
                }
            }
            if !free.is_empty() {
                return Ok(free);
            }

            log::trace!("Id window [{from}, {to}] is full");
            match to.checked_add(1) {
                Some(next) => from = next,
                None => break,
            }
        }
        Ok(VecDeque::new())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, AllocatorState>> {
        self.state
            .lock()
            .map_err(|_| Error::Poisoned("id allocator"))
    }
}
