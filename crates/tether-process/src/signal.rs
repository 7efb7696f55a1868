//! Signal delivery to a whole process tree.

use std::collections::HashMap;

pub use sysinfo::Signal;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

/// Send `signal` to `root` and every descendant, deepest first. Returns how
/// many processes accepted the signal.
///
/// Dev servers fork watchers and bundlers of their own, so signalling only
/// the direct child leaves those running.
pub fn kill_tree(root: u32, signal: Signal) -> usize {
    let mut system = System::new();
    let _ = system.refresh_processes(ProcessesToUpdate::All, true);

    let targets = descendants_of(&system, Pid::from_u32(root));
    let mut signalled = 0;

    for pid in targets.iter().rev() {
        let Some(process) = system.process(*pid) else {
            continue;
        };
        match process.kill_with(signal) {
            Some(true) => signalled += 1,
            Some(false) => debug!(pid = pid.as_u32(), ?signal, "process did not accept signal"),
            None => warn!(pid = pid.as_u32(), ?signal, "signal not supported on this platform"),
        }
    }

    debug!(root, ?signal, targets = targets.len(), signalled, "signalled process tree");
    signalled
}

/// `root` followed by its descendants in breadth-first order.
fn descendants_of(system: &System, root: Pid) -> Vec<Pid> {
    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut tree = vec![root];
    let mut next = 0;
    while next < tree.len() {
        if let Some(kids) = children.get(&tree[next]) {
            for kid in kids {
                if !tree.contains(kid) {
                    tree.push(*kid);
                }
            }
        }
        next += 1;
    }
    tree
}
