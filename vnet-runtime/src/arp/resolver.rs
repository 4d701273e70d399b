use crate::device::{FrameSender, Interface};
use crate::icmp::IcmpGenerator;
use crate::state::{ArpCache, ArpEntry};
use std::collections::{HashMap, VecDeque};
use std::convert::TryFrom;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time;
use tracing::{debug, info};
use vnet_packets::{EthernetFrame, Ipv4Packet, MacAddr, UnreachableCode};

pub const ARP_REQUEST_ATTEMPTS: u32 = 3;
pub const ARP_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// How hard a resolution tries before giving up on a next hop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolverConfig {
    pub attempts: u32,
    pub retry_interval: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            attempts: ARP_REQUEST_ATTEMPTS,
            retry_interval: ARP_RETRY_INTERVAL,
        }
    }
}

/// A forwarded frame waiting for its next hop's MAC. The frame already carries its
/// decremented TTL and outgoing source MAC; `in_iface` and `src_mac` describe how it
/// arrived, for the host unreachable error if resolution fails.
#[derive(Clone, Debug)]
pub struct PendingFrame {
    pub frame: EthernetFrame,
    pub in_iface: Interface,
    pub src_mac: MacAddr,
}

#[derive(Default)]
struct TaskState {
    queue: VecDeque<PendingFrame>,
    done: bool,
    reply: Option<(MacAddr, Interface)>,
}

/// One in-flight resolution of a next hop.
pub struct ResolutionTask {
    target: Ipv4Addr,
    request: EthernetFrame,
    out_iface: Interface,
    state: Mutex<TaskState>,
}

impl ResolutionTask {
    pub fn new(target: Ipv4Addr, request: EthernetFrame, out_iface: Interface) -> Self {
        ResolutionTask {
            target,
            request,
            out_iface,
            state: Mutex::new(TaskState::default()),
        }
    }

    pub fn target(&self) -> Ipv4Addr {
        self.target
    }

    /// Queues `pending` behind the frames already waiting. Once the task has finished the
    /// frame is handed back.
    pub fn enqueue(&self, pending: PendingFrame) -> Result<(), PendingFrame> {
        let mut state = self.lock_state();
        if state.done {
            return Err(pending);
        }
        state.queue.push_back(pending);
        Ok(())
    }

    /// Records the reply for this task. Only the first reply counts; returns whether this
    /// one did.
    pub fn resolve(&self, mac: MacAddr, iface: &Interface) -> bool {
        let mut state = self.lock_state();
        if state.reply.is_some() {
            return false;
        }
        state.reply = Some((mac, iface.clone()));
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.lock_state().reply.is_some()
    }

    pub fn is_done(&self) -> bool {
        self.lock_state().done
    }

    pub fn queued(&self) -> usize {
        self.lock_state().queue.len()
    }

    /// Closes the queue and hands back everything in it, oldest first, with the reply if
    /// one arrived.
    fn finish(&self) -> (VecDeque<PendingFrame>, Option<(MacAddr, Interface)>) {
        let mut state = self.lock_state();
        state.done = true;
        (std::mem::take(&mut state.queue), state.reply.clone())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drives the task to completion: broadcast the request up to `config.attempts` times,
    /// `config.retry_interval` apart, then release the queued frames.
    pub async fn run(
        self: Arc<Self>,
        registry: Arc<TaskRegistry>,
        sender: Arc<dyn FrameSender>,
        config: ResolverConfig,
    ) {
        for attempt in 1..=config.attempts {
            if self.is_resolved() {
                break;
            }
            debug!(target_ip = %self.target, iface = %self.out_iface.name, attempt, "sending ARP request");
            sender.send_frame(self.request.clone(), &self.out_iface);
            time::sleep(config.retry_interval).await;
        }

        let (queue, reply) = self.finish();
        match reply {
            Some((mac, iface)) => {
                info!(target_ip = %self.target, %mac, iface = %iface.name, frames = queue.len(), "ARP resolved");
                for pending in queue {
                    let mut frame = pending.frame;
                    frame.set_dest_mac(mac);
                    sender.send_frame(frame, &iface);
                }
            }
            None => {
                info!(target_ip = %self.target, frames = queue.len(), "ARP resolution timed out");
                registry.remove_if_same(self.target, &self);
                for pending in queue {
                    let packet = match Ipv4Packet::try_from(pending.frame) {
                        Ok(packet) => packet,
                        Err(reason) => {
                            debug!(reason, "dropping queued frame");
                            continue;
                        }
                    };
                    let error = IcmpGenerator::new(&pending.in_iface, pending.src_mac)
                        .unreachable(UnreachableCode::Host, &packet);
                    debug!(dest = %packet.src_addr(), iface = %pending.in_iface.name, "sending ICMP host unreachable");
                    sender.send_frame(error, &pending.in_iface);
                }
            }
        }
    }
}

/// What happened to a frame handed to `TaskRegistry::submit`.
pub enum Submitted {
    /// The next hop was learned after the caller's cache lookup. The frame is handed back
    /// to be sent right away.
    Resolved(PendingFrame, ArpEntry),
    /// The frame joined an unfinished task.
    Queued,
    /// A new task was registered holding the frame. The caller must run it.
    Started(Arc<ResolutionTask>),
}

/// What a received ARP reply did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// No resolution was waiting on the sender.
    Unsolicited,
    /// A task was waiting but already had its answer.
    AlreadyResolved,
    Resolved,
}

/// The active resolutions, at most one per next hop.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<Ipv4Addr, Arc<ResolutionTask>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        TaskRegistry {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Parks `pending` until `next_hop` is resolved. The cache check, the enqueue and the
    /// registration of a new task happen under one lock, so concurrent callers for the same
    /// next hop share a single task.
    pub fn submit(
        &self,
        next_hop: Ipv4Addr,
        pending: PendingFrame,
        arp_cache: &ArpCache,
        out_iface: &Interface,
    ) -> Submitted {
        let mut tasks = self.lock_tasks();
        if let Some(entry) = arp_cache.lookup(next_hop) {
            return Submitted::Resolved(pending, entry);
        }

        let pending = match tasks.get(&next_hop) {
            Some(task) => match task.enqueue(pending) {
                Ok(()) => {
                    debug!(next_hop = %next_hop, queued = task.queued(), "queued frame on pending ARP resolution");
                    return Submitted::Queued;
                }
                Err(pending) => pending,
            },
            None => pending,
        };

        let task = Arc::new(ResolutionTask::new(
            next_hop,
            super::arp_request(out_iface, next_hop),
            out_iface.clone(),
        ));
        // A fresh task is never done, the enqueue cannot fail.
        let _ = task.enqueue(pending);
        tasks.insert(next_hop, Arc::clone(&task));
        debug!(next_hop = %next_hop, iface = %out_iface.name, "starting ARP resolution");
        Submitted::Started(task)
    }

    /// Correlates a reply from `ip` with its task. The task is removed, marked resolved and
    /// the binding cached, all under the registry lock.
    pub fn complete(
        &self,
        ip: Ipv4Addr,
        mac: MacAddr,
        iface: &Interface,
        arp_cache: &ArpCache,
    ) -> ReplyOutcome {
        let mut tasks = self.lock_tasks();
        let task = match tasks.remove(&ip) {
            Some(task) => task,
            None => return ReplyOutcome::Unsolicited,
        };
        if !task.resolve(mac, iface) {
            return ReplyOutcome::AlreadyResolved;
        }
        arp_cache.insert(mac, ip);
        ReplyOutcome::Resolved
    }

    /// Removes the entry for `ip` only if it is still `task`.
    pub fn remove_if_same(&self, ip: Ipv4Addr, task: &Arc<ResolutionTask>) -> bool {
        let mut tasks = self.lock_tasks();
        match tasks.get(&ip) {
            Some(current) if Arc::ptr_eq(current, task) => {
                tasks.remove(&ip);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, ip: Ipv4Addr) -> Option<Arc<ResolutionTask>> {
        self.lock_tasks().get(&ip).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<HashMap<Ipv4Addr, Arc<ResolutionTask>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ChannelSender, SentFrame};
    use crossbeam::channel::Receiver;
    use vnet_packets::{ArpFrame, IcmpPacket, IpProtocol, ARP_ETHER_TYPE};

    fn eth0() -> Interface {
        Interface::new(
            "eth0",
            MacAddr::new([0, 0, 0, 0, 0, 1]),
            Ipv4Addr::new(10, 0, 1, 1),
            Ipv4Addr::new(255, 255, 255, 0),
        )
    }

    fn eth1() -> Interface {
        Interface::new(
            "eth1",
            MacAddr::new([0, 0, 0, 0, 0, 2]),
            Ipv4Addr::new(10, 0, 2, 1),
            Ipv4Addr::new(255, 255, 255, 0),
        )
    }

    const NEXT_HOP: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 7);
    const HOST_MAC: MacAddr = MacAddr {
        bytes: [2, 0, 0, 0, 0, 7],
    };

    fn pending(tag: u8) -> PendingFrame {
        let mut packet = Ipv4Packet::empty();
        packet.set_ttl(63);
        packet.set_protocol(IpProtocol::UDP);
        packet.set_src_addr(Ipv4Addr::new(10, 0, 1, 50));
        packet.set_dest_addr(NEXT_HOP);
        packet.set_payload(&[tag; 12]);
        packet.set_checksum();
        let mut frame = EthernetFrame::encap_ipv4(packet);
        frame.set_src_mac(eth1().mac);
        PendingFrame {
            frame,
            in_iface: eth0(),
            src_mac: MacAddr::new([2, 0, 0, 0, 0, 50]),
        }
    }

    fn drain(receiver: &Receiver<SentFrame>) -> Vec<SentFrame> {
        receiver.try_iter().collect()
    }

    fn start(
        registry: &Arc<TaskRegistry>,
        cache: &ArpCache,
        sender: &Arc<dyn FrameSender>,
        frame: PendingFrame,
    ) -> Option<tokio::task::JoinHandle<()>> {
        match registry.submit(NEXT_HOP, frame, cache, &eth1()) {
            Submitted::Started(task) => Some(tokio::spawn(task.run(
                Arc::clone(registry),
                Arc::clone(sender),
                ResolverConfig::default(),
            ))),
            Submitted::Queued => None,
            Submitted::Resolved(..) => panic!("next hop should not be cached"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn three_requests_then_host_unreachable() {
        let (sender, receiver) = ChannelSender::new();
        let sender: Arc<dyn FrameSender> = Arc::new(sender);
        let registry = Arc::new(TaskRegistry::new());
        let cache = ArpCache::new();

        let handle = start(&registry, &cache, &sender, pending(1)).unwrap();
        assert!(start(&registry, &cache, &sender, pending(2)).is_none());
        handle.await.unwrap();

        let sent = drain(&receiver);
        assert_eq!(sent.len(), 5);
        for request in &sent[..3] {
            assert_eq!(request.iface, "eth1");
            assert_eq!(request.frame.ether_type(), ARP_ETHER_TYPE);
            let arp = ArpFrame::try_from(request.frame.clone()).unwrap();
            assert_eq!(arp.target_ipv4_addr(), Some(NEXT_HOP));
        }
        for (error, tag) in sent[3..].iter().zip(&[1u8, 2]) {
            assert_eq!(error.iface, "eth0");
            assert_eq!(error.frame.dest_mac(), MacAddr::new([2, 0, 0, 0, 0, 50]));
            assert_eq!(error.frame.src_mac(), eth0().mac);
            let icmp = IcmpPacket::try_from(Ipv4Packet::try_from(error.frame.clone()).unwrap())
                .unwrap();
            assert_eq!((icmp.icmp_type(), icmp.code()), (3, 1));
            assert_eq!(icmp.ipv4().dest_addr(), Ipv4Addr::new(10, 0, 1, 50));
            assert_eq!(icmp.body()[24], *tag);
        }

        assert!(registry.is_empty());
        assert!(cache.lookup(NEXT_HOP).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reply_releases_queue_in_order() {
        let (sender, receiver) = ChannelSender::new();
        let sender: Arc<dyn FrameSender> = Arc::new(sender);
        let registry = Arc::new(TaskRegistry::new());
        let cache = ArpCache::new();

        let handle = start(&registry, &cache, &sender, pending(1)).unwrap();
        assert!(start(&registry, &cache, &sender, pending(2)).is_none());

        time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(
            registry.complete(NEXT_HOP, HOST_MAC, &eth1(), &cache),
            ReplyOutcome::Resolved
        );
        assert_eq!(cache.lookup(NEXT_HOP).unwrap().mac, HOST_MAC);
        assert!(registry.is_empty());
        handle.await.unwrap();

        let sent = drain(&receiver);
        // Two requests, one at t=0 and one at t=1s, then the queued frames.
        assert_eq!(sent.len(), 4);
        assert!(sent[..2]
            .iter()
            .all(|s| s.frame.ether_type() == ARP_ETHER_TYPE));
        for (forwarded, tag) in sent[2..].iter().zip(&[1u8, 2]) {
            assert_eq!(forwarded.iface, "eth1");
            assert_eq!(forwarded.frame.dest_mac(), HOST_MAC);
            let packet = Ipv4Packet::try_from(forwarded.frame.clone()).unwrap();
            assert_eq!(packet.payload()[0], *tag);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn submit_sees_binding_learned_meanwhile() {
        let registry = TaskRegistry::new();
        let cache = ArpCache::new();
        cache.insert(HOST_MAC, NEXT_HOP);
        match registry.submit(NEXT_HOP, pending(1), &cache, &eth1()) {
            Submitted::Resolved(_, entry) => assert_eq!(entry.mac, HOST_MAC),
            _ => panic!("expected the cached binding"),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn unsolicited_and_duplicate_replies() {
        let registry = TaskRegistry::new();
        let cache = ArpCache::new();
        assert_eq!(
            registry.complete(NEXT_HOP, HOST_MAC, &eth1(), &cache),
            ReplyOutcome::Unsolicited
        );
        assert!(cache.is_empty());

        let task = match registry.submit(NEXT_HOP, pending(1), &cache, &eth1()) {
            Submitted::Started(task) => task,
            _ => panic!("expected a new task"),
        };
        assert!(task.resolve(HOST_MAC, &eth1()));
        assert_eq!(
            registry.complete(NEXT_HOP, HOST_MAC, &eth1(), &cache),
            ReplyOutcome::AlreadyResolved
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn finished_task_is_replaced() {
        let registry = TaskRegistry::new();
        let cache = ArpCache::new();
        let first = match registry.submit(NEXT_HOP, pending(1), &cache, &eth1()) {
            Submitted::Started(task) => task,
            _ => panic!("expected a new task"),
        };
        let (queue, reply) = first.finish();
        assert_eq!(queue.len(), 1);
        assert!(reply.is_none());
        assert!(first.is_done());

        let second = match registry.submit(NEXT_HOP, pending(2), &cache, &eth1()) {
            Submitted::Started(task) => task,
            _ => panic!("a finished task must not accept frames"),
        };
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!registry.remove_if_same(NEXT_HOP, &first));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove_if_same(NEXT_HOP, &second));
        assert!(registry.is_empty());
    }

    #[test]
    fn one_task_per_next_hop_across_threads() {
        let registry = Arc::new(TaskRegistry::new());
        let cache = Arc::new(ArpCache::new());
        let handles: Vec<_> = (0..16u8)
            .map(|tag| {
                let registry = Arc::clone(&registry);
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    matches!(
                        registry.submit(NEXT_HOP, pending(tag), &cache, &eth1()),
                        Submitted::Started(_)
                    )
                })
            })
            .collect();
        let started = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|started| *started)
            .count();
        assert_eq!(started, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(NEXT_HOP).unwrap().queued(), 16);
    }
}
