//! NUMA node identification.
//!
//! Only Linux reports NUMA topology here.  Elsewhere, or with NUMA support turned off, every
//! query answers node 0 and the node count is 1.

use crate::util::address::Address;

const NODE_ONLINE: &str = "/sys/devices/system/node/online";

/// `get_mempolicy(2)` flags.  Not every libc version exports them.
#[cfg(target_os = "linux")]
const MPOL_F_NODE: libc::c_ulong = 1 << 0;
#[cfg(target_os = "linux")]
const MPOL_F_ADDR: libc::c_ulong = 1 << 1;

#[derive(Debug, Clone, Copy)]
pub struct Numa {
    enabled: bool,
    count: usize,
}

impl Numa {
    /// Probe the NUMA topology.  If `enabled` is false, or the topology can't be read, NUMA
    /// support stays off.
    pub fn new(enabled: bool) -> Self {
        if !enabled || !cfg!(target_os = "linux") {
            return Self::disabled();
        }
        match std::fs::read_to_string(NODE_ONLINE) {
            Ok(online) => match parse_node_count(online.trim()) {
                Some(count) => {
                    info!("NUMA support: enabled ({} nodes)", count);
                    Self {
                        enabled: true,
                        count,
                    }
                }
                None => {
                    warn!("Can't parse {}: {:?}", NODE_ONLINE, online);
                    Self::disabled()
                }
            },
            Err(e) => {
                debug!("NUMA support: disabled ({}: {})", NODE_ONLINE, e);
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            count: 1,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of NUMA nodes.  Node ids are in `0..count()`.
    pub fn count(&self) -> usize {
        self.count
    }

    /// The node of the CPU the calling thread runs on.
    pub fn id(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        self.clamp(current_node())
    }

    /// The node backing the committed memory at `addr`.
    pub fn node_of(&self, addr: Address) -> usize {
        if !self.enabled {
            return 0;
        }
        self.clamp(memory_node(addr))
    }

    fn clamp(&self, node: Option<usize>) -> usize {
        match node {
            Some(n) if n < self.count => n,
            _ => 0,
        }
    }
}

/// Parse a node list such as `0`, `0-3` or `0,2-3`.  Node ids may be sparse, so the count is one
/// more than the highest id.
fn parse_node_count(list: &str) -> Option<usize> {
    let mut highest = None;
    for range in list.split(',') {
        let last = match range.split_once('-') {
            Some((lo, hi)) => {
                let lo: usize = lo.parse().ok()?;
                let hi: usize = hi.parse().ok()?;
                if lo > hi {
                    return None;
                }
                hi
            }
            None => range.parse().ok()?,
        };
        highest = Some(std::cmp::max(highest.unwrap_or(0), last));
    }
    highest.map(|h| h + 1)
}

#[cfg(target_os = "linux")]
fn current_node() -> Option<usize> {
    let mut cpu: libc::c_uint = 0;
    let mut node: libc::c_uint = 0;
    let ret = unsafe {
        libc::syscall(
            libc::SYS_getcpu,
            &mut cpu as *mut libc::c_uint,
            &mut node as *mut libc::c_uint,
            std::ptr::null_mut::<libc::c_void>(),
        )
    };
    if ret == 0 {
        Some(node as usize)
    } else {
        trace!("getcpu failed: {}", std::io::Error::last_os_error());
        None
    }
}

#[cfg(not(target_os = "linux"))]
fn current_node() -> Option<usize> {
    None
}

#[cfg(target_os = "linux")]
fn memory_node(addr: Address) -> Option<usize> {
    let mut node: libc::c_int = 0;
    let ret = unsafe {
        libc::syscall(
            libc::SYS_get_mempolicy,
            &mut node as *mut libc::c_int,
            std::ptr::null_mut::<libc::c_ulong>(),
            0 as libc::c_ulong,
            addr.to_mut_ptr::<libc::c_void>(),
            MPOL_F_NODE | MPOL_F_ADDR,
        )
    };
    if ret == 0 && node >= 0 {
        Some(node as usize)
    } else {
        trace!(
            "get_mempolicy({}) failed: {}",
            addr,
            std::io::Error::last_os_error()
        );
        None
    }
}

#[cfg(not(target_os = "linux"))]
fn memory_node(_addr: Address) -> Option<usize> {
    None
}
