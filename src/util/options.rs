//! The configuration snapshot of a collector.
//!
//! Options are set before a collector is created, either from environment variables with the
//! `RGC_` prefix (e.g. `RGC_CONC_THREADS=4`), or programmatically with [`Options::set_from_str`]
//! and [`Options::set_bulk_from_str`].  [`crate::Collector::new`] validates the whole snapshot and
//! freezes it in an `Arc`; nothing changes it afterwards.

use std::str::FromStr;

use strum_macros::{Display, EnumString};

use crate::util::constants::*;
use crate::util::error::GcError;

/// How heap memory is backed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumString, Display)]
pub enum HeapBacking {
    /// Private anonymous memory.
    Anonymous,
    /// A shared file on a `tmpfs` mount.
    Tmpfs,
    /// A shared file on a `hugetlbfs` mount (large pages).
    Hugetlbfs,
}

impl HeapBacking {
    /// The filesystem type in the mount table, and the mount points preferred when more than one
    /// is accessible.
    pub fn filesystem(&self) -> Option<(&'static str, &'static [&'static str])> {
        match self {
            HeapBacking::Anonymous => None,
            HeapBacking::Tmpfs => Some(("tmpfs", &["/dev/shm", "/run/shm"])),
            HeapBacking::Hugetlbfs => Some(("hugetlbfs", &["/dev/hugepages", "/hugepages"])),
        }
    }
}

fn always_valid<T>(_: &T) -> bool {
    true
}

fn is_percentage(v: &f64) -> bool {
    (0.0..=100.0).contains(v)
}

fn default_heap_size() -> usize {
    use sysinfo::{MemoryRefreshKind, RefreshKind, System};
    // Only load the memory component.  Loading everything takes long enough to be noticed in
    // start-up time.
    let sys = System::new_with_specifics(
        RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
    );
    let quarter = (sys.total_memory() / 4) as usize;
    quarter
        .clamp(64 * BYTES_IN_MBYTE, 64 * BYTES_IN_GBYTE)
        .next_power_of_two()
}

const ENV_PREFIX: &str = "RGC_";

macro_rules! options {
    ($($(#[$outer:meta])* $name:ident: $type:ty [$validator:expr] = $default:expr),* $(,)?) => [
        /// The immutable configuration snapshot consumed by the collector.
        #[derive(Clone, Debug)]
        pub struct Options {
            $($(#[$outer])* pub $name: $type),*
        }

        impl Options {
            /// Set an option from its name and a string value.  Return true if the value was
            /// parsed and passed validation.  Invalid values keep the old value.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            self.$name = val.clone();
                        } else {
                            warn!("Unable to set {}={:?}. Invalid value. Old value is kept.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("Unable to set {}={:?}. Can't parse value. Old value is kept.", s, val);
                        false
                    })*
                    _ => {
                        warn!("Unknown option {}", s);
                        false
                    }
                }
            }

            /// Names of all the options.
            pub fn names() -> &'static [&'static str] {
                &[$(stringify!($name)),*]
            }

            /// Run the validator of every option against its current value.
            fn validate_each(&self) -> Result<(), GcError> {
                $(
                    let validate_fn = $validator;
                    if !validate_fn(&self.$name) {
                        return Err(GcError::InvalidOption {
                            name: stringify!($name),
                            reason: format!("{:?} is out of range", self.$name),
                        });
                    }
                )*
                Ok(())
            }

            /// Options with their defaults, ignoring the environment.
            pub fn without_env() -> Self {
                Options {
                    $($name: $default),*
                }
            }
        }
    ]
}

options! {
    /// Number of runtime worker threads.
    threads:                usize       [|v: &usize| *v > 0] = num_cpus::get(),
    /// Number of GC worker threads for concurrent phases.
    conc_threads:           usize       [|v: &usize| *v > 0] = std::cmp::max(1, num_cpus::get() / 4),
    /// Maximum heap size in bytes.
    heap_size:              usize       [|v: &usize| *v >= MIN_REGION_SIZE] = default_heap_size(),
    /// The size of a region.  A policy knob: any power of two no smaller than 64K.
    region_size:            usize       [|v: &usize| v.is_power_of_two() && *v >= MIN_REGION_SIZE] = DEFAULT_REGION_SIZE,
    /// Maximum number of bytes reserved for mark stacks.
    mark_stack_space_limit: usize       [|v: &usize| (MIN_MARK_STACK_SPACE_LIMIT..=MAX_MARK_STACK_SPACE_LIMIT).contains(v)] = DEFAULT_MARK_STACK_SPACE_LIMIT,
    /// A region is relocated if more than this percentage of it is garbage.
    fragmentation_limit:    f64         [is_percentage] = 25.0,
    /// Record the NUMA node of regions and relocate into node-local regions.
    use_numa:               bool        [always_valid] = true,
    /// How heap memory is backed.
    heap_backing:           HeapBacking [always_valid] = HeapBacking::Anonymous,
    /// Put the heap backing file in this directory instead of looking up a mount point.
    allocate_heap_at:       String      [always_valid] = String::new(),
    /// Run a GC at least this often, in milliseconds.  0 disables the timer.
    collection_interval_ms: u64         [always_valid] = 0,
    /// How many times per second the director evaluates its rules.
    director_hz:            u64         [|v: &u64| *v > 0 && *v <= 1000] = 10,
    /// Start a GC when this percentage of the heap is in use.
    occupancy_trigger:      f64         [is_percentage] = 90.0,
    /// Run the director thread.  Without it, cycles only start on explicit requests.
    use_director:           bool        [always_valid] = true,
}

impl Default for Options {
    /// Default options, overridden by environment variables that start with `RGC_` and match an
    /// option name (e.g. `RGC_HEAP_SIZE`).
    fn default() -> Self {
        let mut options = Options::without_env();
        for (key, val) in std::env::vars() {
            if let Some(rest_of_key) = key.strip_prefix(ENV_PREFIX) {
                let lowercase: &str = &rest_of_key.to_lowercase();
                if Options::names().contains(&lowercase) {
                    options.set_from_str(lowercase, &val);
                }
            }
        }
        options
    }
}

impl Options {
    /// Set options from a whitespace separated list of `key=value` pairs.  Every pair is
    /// processed; return true only if all of them were accepted.
    pub fn set_bulk_from_str(&mut self, options: &str) -> bool {
        let mut all_ok = true;
        for opt in options.split_ascii_whitespace() {
            let kv_pair: Vec<&str> = opt.split('=').collect();
            if kv_pair.len() != 2 {
                warn!("Malformed option {:?}, expected key=value", opt);
                all_ok = false;
                continue;
            }
            all_ok &= self.set_from_str(kv_pair[0], kv_pair[1]);
        }
        all_ok
    }

    /// The heap backing file location override, if set.
    pub fn heap_location_override(&self) -> Option<&str> {
        if self.allocate_heap_at.is_empty() {
            None
        } else {
            Some(&self.allocate_heap_at)
        }
    }

    /// Check the combination of options.  Values set through `set_from_str` have already been
    /// validated, but defaults and fields assigned directly are checked again here.
    pub fn validate(&self) -> Result<(), GcError> {
        if self.threads == 0 {
            return Err(GcError::InvalidOption {
                name: "threads",
                reason: "at least one runtime worker is required".to_string(),
            });
        }
        if self.conc_threads == 0 {
            return Err(GcError::InvalidOption {
                name: "conc_threads",
                reason: "at least one GC worker is required".to_string(),
            });
        }
        if !self.region_size.is_power_of_two() || self.region_size < MIN_REGION_SIZE {
            return Err(GcError::InvalidOption {
                name: "region_size",
                reason: format!(
                    "{} is not a power of two no smaller than {}",
                    self.region_size, MIN_REGION_SIZE
                ),
            });
        }
        self.validate_each()?;
        if self.heap_size < self.region_size {
            return Err(GcError::InvalidOption {
                name: "heap_size",
                reason: format!(
                    "heap size {} is smaller than one region ({})",
                    self.heap_size, self.region_size
                ),
            });
        }
        Ok(())
    }
}

impl FromStr for Options {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut options = Options::without_env();
        if options.set_bulk_from_str(s) {
            Ok(options)
        } else {
            Err(format!("Invalid options: {}", s))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_validate() {
        let mut options = Options::without_env();
        assert!(options.set_from_str("conc_threads", "3"));
        assert_eq!(options.conc_threads, 3);
        assert!(options.set_from_str("heap_backing", "Tmpfs"));
        assert_eq!(options.heap_backing, HeapBacking::Tmpfs);
        assert!(options.set_from_str("fragmentation_limit", "12.5"));
        assert_eq!(options.fragmentation_limit, 12.5);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn invalid_values_keep_old_value() {
        let mut options = Options::without_env();
        let threads = options.threads;
        assert!(!options.set_from_str("threads", "0"));
        assert_eq!(options.threads, threads);
        assert!(!options.set_from_str("threads", "many"));
        assert!(!options.set_from_str("region_size", "100000"));
        assert_eq!(options.region_size, DEFAULT_REGION_SIZE);
        assert!(!options.set_from_str("fragmentation_limit", "101"));
        assert!(!options.set_from_str("no_such_option", "1"));
    }

    #[test]
    fn bulk() {
        let mut options = Options::without_env();
        assert!(options.set_bulk_from_str("threads=2 conc_threads=1 allocate_heap_at=/mnt/heap"));
        assert_eq!(options.threads, 2);
        assert_eq!(options.conc_threads, 1);
        assert_eq!(options.heap_location_override(), Some("/mnt/heap"));

        assert!(!options.set_bulk_from_str("threads=4 conc_threads"));
        assert_eq!(options.threads, 4);

        assert!("threads=1 conc_threads=1".parse::<Options>().is_ok());
        assert!("threads=0".parse::<Options>().is_err());
    }

    #[test]
    fn zero_workers_rejected() {
        let mut options = Options::without_env();
        options.conc_threads = 0;
        assert!(matches!(
            options.validate(),
            Err(GcError::InvalidOption {
                name: "conc_threads",
                ..
            })
        ));
    }

    #[test]
    fn directly_assigned_values_are_validated() {
        let invalid = |assign: fn(&mut Options), name: &str| {
            let mut options = Options::without_env();
            assign(&mut options);
            match options.validate() {
                Err(GcError::InvalidOption { name: found, .. }) => assert_eq!(found, name),
                other => panic!("{} was accepted: {:?}", name, other),
            }
        };
        invalid(|o| o.mark_stack_space_limit = 0, "mark_stack_space_limit");
        invalid(
            |o| o.mark_stack_space_limit = MAX_MARK_STACK_SPACE_LIMIT + 1,
            "mark_stack_space_limit",
        );
        invalid(|o| o.fragmentation_limit = 250.0, "fragmentation_limit");
        invalid(|o| o.occupancy_trigger = -5.0, "occupancy_trigger");
        invalid(|o| o.director_hz = 5_000_000_000, "director_hz");
        invalid(|o| o.director_hz = 0, "director_hz");
        invalid(|o| o.region_size = 3 * MIN_REGION_SIZE, "region_size");
    }

    #[test]
    fn backing_filesystems() {
        assert_eq!(HeapBacking::Anonymous.filesystem(), None);
        let (fs, preferred) = HeapBacking::Hugetlbfs.filesystem().unwrap();
        assert_eq!(fs, "hugetlbfs");
        assert!(preferred.contains(&"/dev/hugepages"));
    }
}
