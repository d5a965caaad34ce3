use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Minted generations start above [`Generation::UNINITIALIZED`].
static NEXT: AtomicU64 = AtomicU64::new(1);

/// Version stamp of an observable state.
///
/// Every call to [`Generation::next()`] returns a value greater than every generation minted
/// before it, anywhere in the process. This is what lets a derived variable compare the
/// generations of unrelated sources: the newest change always carries the largest stamp.
///
/// ```rust
/// use tidings::Generation;
///
/// let a = Generation::next();
/// let b = Generation::next();
///
/// assert!(b > a);
/// assert!(a > Generation::UNINITIALIZED);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Generation(u64);

impl Generation {
    /// The generation of a state that never received a value. Smaller than any minted one.
    pub const UNINITIALIZED: Self = Self(0);

    /// Mints a generation greater than every previously minted one.
    #[must_use]
    pub fn next() -> Self {
        // Relaxed is enough: the read-modify-write itself totally orders all minted values.
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Whether this is [`Generation::UNINITIALIZED`].
    #[must_use]
    pub const fn is_uninitialized(self) -> bool {
        self.0 == Self::UNINITIALIZED.0
    }

    /// The raw counter value, for diagnostics.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A [`Generation`] slot shared between threads, for implementing
/// [`Updatable`][crate::Updatable] sources.
///
/// Writers publish with release ordering and readers load with acquire ordering, so whoever
/// observes a generation also observes the state written before it was published.
#[derive(Debug, Default)]
pub struct AtomicGeneration(AtomicU64);

impl AtomicGeneration {
    /// Creates a slot holding `generation`.
    #[must_use]
    pub const fn new(generation: Generation) -> Self {
        Self(AtomicU64::new(generation.0))
    }

    /// The most recently published generation.
    #[must_use]
    pub fn current(&self) -> Generation {
        Generation(self.0.load(Ordering::Acquire))
    }

    /// Mints and publishes a new generation, returning it.
    #[expect(clippy::must_use_candidate, reason = "publishing is the point, the return is extra")]
    pub fn update(&self) -> Generation {
        let generation = Generation::next();
        self.update_to(generation);
        generation
    }

    /// Publishes `generation`.
    pub fn update_to(&self, generation: Generation) {
        self.0.store(generation.0, Ordering::Release);
    }
}
