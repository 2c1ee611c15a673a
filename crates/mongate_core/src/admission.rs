use std::net::IpAddr;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Per-IP concurrent-session gate.
///
/// Counts currently-serving sessions per source IP. An IP whose count would
/// exceed the cap is refused before any byte of its traffic is read. Entries
/// are removed as soon as their count reaches zero, so the map only ever
/// holds IPs with live sessions.
#[derive(Debug)]
pub struct ClientAdmission {
    counts: DashMap<IpAddr, usize>,
    max_per_ip: usize,
}

impl ClientAdmission {
    pub fn new(max_per_ip: usize) -> Self {
        Self {
            counts: DashMap::new(),
            max_per_ip,
        }
    }

    /// Admit one more session from `ip`, unless it is at the cap.
    pub fn try_admit(&self, ip: IpAddr) -> bool {
        match self.counts.entry(ip) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() >= self.max_per_ip {
                    false
                } else {
                    *occupied.get_mut() += 1;
                    true
                }
            }
            Entry::Vacant(vacant) => {
                if self.max_per_ip == 0 {
                    false
                } else {
                    vacant.insert(1);
                    true
                }
            }
        }
    }

    /// Record the end of one session from `ip`.
    pub fn depart(&self, ip: IpAddr) {
        if let Entry::Occupied(mut occupied) = self.counts.entry(ip) {
            if *occupied.get() <= 1 {
                occupied.remove();
            } else {
                *occupied.get_mut() -= 1;
            }
        }
    }

    /// Sessions currently admitted from `ip`.
    pub fn active(&self, ip: IpAddr) -> usize {
        self.counts.get(&ip).map(|count| *count).unwrap_or(0)
    }

    /// True when no IP has a live session.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
