//! Sandbox port allocation
//!
//! 각 샌드박스는 기준 포트에 같은 오프셋을 더한 포트 4개를 받는다.
//! 오프셋은 증가하다가 범위 끝에서 0으로 돌아가며, 활성 할당과 겹치는 오프셋은 건너뛴다.

use agentbox_foundation::{Error, Result, SandboxPorts};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct PortState {
    next_offset: u32,
    active: HashMap<String, SandboxPorts>,
}

/// Hands out disjoint port sets to active sandboxes
#[derive(Debug)]
pub struct PortAllocator {
    base: SandboxPorts,
    state: Mutex<PortState>,
}

impl PortAllocator {
    pub fn new(base: SandboxPorts) -> Self {
        Self {
            base,
            state: Mutex::new(PortState::default()),
        }
    }

    fn ports_at(&self, offset: u32) -> Option<SandboxPorts> {
        let shift = |base: u16| -> Option<u16> { u16::try_from(base as u32 + offset).ok() };
        Some(SandboxPorts {
            vnc: shift(self.base.vnc)?,
            novnc: shift(self.base.novnc)?,
            jupyter: shift(self.base.jupyter)?,
            dev: shift(self.base.dev)?,
        })
    }

    /// Allocate a port set for `key`. An existing allocation is returned as is.
    pub fn allocate(&self, key: &str) -> Result<SandboxPorts> {
        let mut state = self.state.lock();
        if let Some(existing) = state.active.get(key) {
            return Ok(*existing);
        }

        let in_use: HashSet<u16> = state.active.values().flat_map(port_list).collect();

        // 범위 끝에 닿으면 0으로 돌아가고, 한 바퀴를 다 돌면 실패
        let span = self.offset_span();
        for _ in 0..span {
            let offset = state.next_offset % span;
            state.next_offset = offset + 1;
            let Some(ports) = self.ports_at(offset) else {
                continue;
            };

            let list = port_list(&ports);
            let distinct: HashSet<u16> = list.iter().copied().collect();
            if distinct.len() == list.len() && list.iter().all(|p| !in_use.contains(p)) {
                state.active.insert(key.to_string(), ports);
                return Ok(ports);
            }
        }

        Err(Error::Container(
            "No free sandbox ports left in the port range".to_string(),
        ))
    }

    /// 유효한 오프셋 개수 (가장 큰 기준 포트가 u16::MAX에 닿을 때까지)
    fn offset_span(&self) -> u32 {
        let highest = port_list(&self.base).into_iter().max().unwrap_or(0);
        u32::from(u16::MAX - highest) + 1
    }

    /// Release the ports held by `key`
    pub fn release(&self, key: &str) -> Option<SandboxPorts> {
        self.state.lock().active.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<SandboxPorts> {
        self.state.lock().active.get(key).copied()
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }
}

fn port_list(ports: &SandboxPorts) -> [u16; 4] {
    [ports.vnc, ports.novnc, ports.jupyter, ports.dev]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> SandboxPorts {
        SandboxPorts {
            vnc: 5900,
            novnc: 6080,
            jupyter: 8888,
            dev: 3001,
        }
    }

    fn disjoint(a: &SandboxPorts, b: &SandboxPorts) -> bool {
        let a: HashSet<u16> = port_list(a).into_iter().collect();
        port_list(b).iter().all(|p| !a.contains(p))
    }

    #[test]
    fn test_first_allocation_uses_base() {
        let ports = PortAllocator::new(base()).allocate("job_a").unwrap();
        assert_eq!(ports, base());
    }

    #[test]
    fn test_allocations_are_disjoint() {
        let alloc = PortAllocator::new(base());
        let a = alloc.allocate("job_a").unwrap();
        let b = alloc.allocate("job_b").unwrap();
        assert!(disjoint(&a, &b));
        assert_eq!(alloc.allocate("job_a").unwrap(), a);
    }

    #[test]
    fn test_release_does_not_reissue_active_ports() {
        let alloc = PortAllocator::new(base());
        let _a = alloc.allocate("job_a").unwrap();
        let b = alloc.allocate("job_b").unwrap();
        alloc.release("job_a");

        // 활성 컨테이너 수(1)를 오프셋으로 쓰면 b와 겹치지만, 회전 오프셋은 활성 포트를 건너뛴다
        let c = alloc.allocate("job_c").unwrap();
        assert!(disjoint(&b, &c));
        assert_eq!(alloc.active_count(), 2);
    }

    #[test]
    fn test_skips_colliding_offsets() {
        // vnc 기준 + 3 == dev 기준이 되도록 배치
        let alloc = PortAllocator::new(SandboxPorts {
            vnc: 100,
            novnc: 200,
            jupyter: 300,
            dev: 103,
        });
        let a = alloc.allocate("a").unwrap();
        for key in ["b", "c", "d", "e"] {
            let next = alloc.allocate(key).unwrap();
            assert!(disjoint(&a, &next), "{:?} vs {:?}", a, next);
        }
    }

    #[test]
    fn test_offset_wraps_after_release() {
        let alloc = PortAllocator::new(SandboxPorts {
            vnc: 65534,
            novnc: 65533,
            jupyter: 65532,
            dev: 65531,
        });
        for cycle in 0..5 {
            let ports = alloc
                .allocate("job")
                .unwrap_or_else(|e| panic!("cycle {}: {}", cycle, e));
            assert!(ports.dev >= 65531);
            assert!(alloc.release("job").is_some());
        }
        assert_eq!(alloc.active_count(), 0);
    }

    #[test]
    fn test_wrapped_offset_skips_active_ports() {
        let alloc = PortAllocator::new(SandboxPorts {
            vnc: 65530,
            novnc: 65520,
            jupyter: 65510,
            dev: 65500,
        });
        let a = alloc.allocate("a").unwrap();
        let b = alloc.allocate("b").unwrap();
        alloc.release("a");
        for key in ["c", "d", "e", "f", "g", "h"] {
            let next = alloc.allocate(key).unwrap();
            assert!(disjoint(&b, &next), "{:?} vs {:?}", b, next);
            alloc.release(key);
        }
        assert_eq!(alloc.get("b"), Some(b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_exhaustion() {
        let alloc = PortAllocator::new(SandboxPorts {
            vnc: 65534,
            novnc: 65533,
            jupyter: 65532,
            dev: 65531,
        });
        alloc.allocate("a").unwrap();
        // 가능한 오프셋은 0..=1 뿐이고 offset 1은 a와 겹친다
        assert!(matches!(alloc.allocate("b"), Err(Error::Container(_))));
        assert_eq!(alloc.active_count(), 1);
    }
}
